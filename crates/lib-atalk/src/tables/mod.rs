mod amt;
mod routing;
mod zones;

pub use amt::*;
pub use routing::*;
pub use zones::*;

/// The routing information base and zone information base. The two tables
/// are independent, linked only through the network-range key, and live
/// together under the router's single reader-writer lock.
#[derive(Debug, Default)]
pub struct Tables {
    pub routes: RoutingTable,
    pub zones: ZoneTable,
}
