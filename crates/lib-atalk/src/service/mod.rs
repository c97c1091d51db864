use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::port::Port;
use crate::router::Router;
use crate::types::Datagram;

mod age;
mod echo;
mod nbp;
mod rtmp;
mod zip;

pub use age::*;
pub use echo::*;
pub use nbp::*;
pub use rtmp::*;
pub use zip::*;

/// An in-router agent. Reactive services bind a well-known static socket
/// and get every datagram addressed to it, on the ingress port's dispatch
/// path; they must not block on external I/O. Periodic services drive their
/// own timer loop in `run` until shutdown fires.
///
/// A service may be both (none of the standard ones are).
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// The static socket this service answers on, if reactive.
    fn socket(&self) -> Option<u8> {
        None
    }

    /// Handle a datagram addressed to this service's socket.
    async fn handle(&self, _router: &Router, _datagram: Datagram, _ingress: &Arc<Port>) {}

    /// Periodic loop; returns promptly when `shutdown` fires.
    async fn run(&self, _router: Router, _shutdown: broadcast::Receiver<()>) {}
}
