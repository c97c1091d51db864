use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants;
use crate::types::NetRange;

/// Distance advertised for a route that is going away.
pub const UNREACHABLE_DISTANCE: u8 = 16;

/// How long a route may sit in each ageing state before moving to the next.
const AGING_STEP: Duration = Duration::from_secs(constants::ROUTE_AGING_INTERVAL_SECS);

/// Ageing states of a learned route. A refresh from the owning neighbor
/// resets the route to `Good`; otherwise it only ever moves forward until
/// removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Good,
    Suspect,
    Bad,

    /// Still advertised, at distance 16, so neighbors learn the loss.
    ZombieForNotifications,
}

impl Display for RouteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Suspect => write!(f, "suspect"),
            Self::Bad => write!(f, "bad"),
            Self::ZombieForNotifications => write!(f, "zombie"),
        }
    }
}

/// One entry in the routing table.
#[derive(Debug, Clone)]
pub struct Route {
    pub range: NetRange,
    pub distance: u8,

    /// `None` for directly-connected networks.
    pub next_hop: Option<(u16, u8)>,

    /// Egress port index.
    pub port: usize,

    /// Whether the covered network is extended; decides the advertisement
    /// tuple form.
    pub extended: bool,

    pub state: RouteState,
    pub last_refreshed: Instant,
}

impl Route {
    pub fn is_direct(&self) -> bool {
        self.next_hop.is_none()
    }
}

/// What an RTMP tuple did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    Inserted,
    Refreshed,
    Replaced,
    Ignored,
}

/// The routing information base, keyed by non-overlapping network ranges.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: BTreeMap<u16, Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// The route whose range contains `network`, if any.
    pub fn lookup(&self, network: u16) -> Option<&Route> {
        self.routes
            .range(..=network)
            .next_back()
            .map(|(_, route)| route)
            .filter(|route| route.range.contains(network))
    }

    pub fn get(&self, range: &NetRange) -> Option<&Route> {
        self.routes.get(&range.first())
    }

    /// Install the directly-connected route for a port that came online.
    /// Overlapping learned routes yield to the direct one.
    pub fn insert_direct(&mut self, range: NetRange, port: usize, extended: bool) {
        self.remove_overlapping(&range);
        self.routes.insert(
            range.first(),
            Route {
                range,
                distance: 0,
                next_hop: None,
                port,
                extended,
                state: RouteState::Good,
                last_refreshed: Instant::now(),
            },
        );
    }

    /// Apply one received RTMP tuple. `distance` is the candidate distance,
    /// already incremented for the hop to the advertising neighbor.
    pub fn observe(
        &mut self,
        range: NetRange,
        extended: bool,
        distance: u8,
        next_hop: (u16, u8),
        port: usize,
        now: Instant,
    ) -> RouteUpdate {
        let existing = self
            .routes
            .values()
            .find(|route| route.range.overlaps(&range))
            .map(|route| (route.range.first(), route.next_hop, route.port, route.distance));
        let same_neighbor = matches!(
            existing,
            Some((_, hop, p, _)) if hop == Some(next_hop) && p == port
        );

        if distance > constants::MAX_HOP_COUNT {
            // The neighbor lost the route. If it is the neighbor we learned
            // it from, start notifying and let ageing remove it.
            if same_neighbor {
                if let Some(route) = existing.and_then(|(key, ..)| self.routes.get_mut(&key)) {
                    route.state = RouteState::ZombieForNotifications;
                    route.distance = UNREACHABLE_DISTANCE;
                    route.last_refreshed = now;
                    return RouteUpdate::Refreshed;
                }
            }
            return RouteUpdate::Ignored;
        }

        match existing {
            None => {
                self.routes.insert(
                    range.first(),
                    Route {
                        range,
                        distance,
                        next_hop: Some(next_hop),
                        port,
                        extended,
                        state: RouteState::Good,
                        last_refreshed: now,
                    },
                );
                RouteUpdate::Inserted
            }
            Some((key, ..)) if same_neighbor => {
                if let Some(route) = self.routes.get_mut(&key) {
                    route.distance = distance;
                    route.state = RouteState::Good;
                    route.last_refreshed = now;
                }
                RouteUpdate::Refreshed
            }
            Some((.., existing_distance)) if distance < existing_distance => {
                // A strictly better path supersedes the old entry.
                self.remove_overlapping(&range);
                self.routes.insert(
                    range.first(),
                    Route {
                        range,
                        distance,
                        next_hop: Some(next_hop),
                        port,
                        extended,
                        state: RouteState::Good,
                        last_refreshed: now,
                    },
                );
                RouteUpdate::Replaced
            }
            // Equal or worse via a different neighbor: first wins.
            Some(_) => RouteUpdate::Ignored,
        }
    }

    /// Withdraw every route using the given port. Returns the ranges that
    /// disappeared so zone state can follow.
    pub fn remove_port(&mut self, port: usize) -> Vec<NetRange> {
        let removed: Vec<NetRange> = self
            .routes
            .values()
            .filter(|route| route.port == port)
            .map(|route| route.range)
            .collect();
        for range in &removed {
            self.routes.remove(&range.first());
        }
        removed
    }

    /// One ageing pass. Learned routes advance one state per
    /// [`AGING_STEP`] without a refresh; zombies get removed. Returns the
    /// ranges removed on this pass.
    pub fn sweep(&mut self, now: Instant) -> Vec<NetRange> {
        let mut removed = Vec::new();

        for route in self.routes.values_mut() {
            if route.is_direct() || now.duration_since(route.last_refreshed) < AGING_STEP {
                continue;
            }
            route.last_refreshed = now;
            route.state = match route.state {
                RouteState::Good => RouteState::Suspect,
                RouteState::Suspect => RouteState::Bad,
                RouteState::Bad => {
                    route.distance = UNREACHABLE_DISTANCE;
                    RouteState::ZombieForNotifications
                }
                RouteState::ZombieForNotifications => {
                    removed.push(route.range);
                    route.state
                }
            };
        }

        for range in &removed {
            self.routes.remove(&range.first());
        }
        removed
    }

    fn remove_overlapping(&mut self, range: &NetRange) {
        let keys: Vec<u16> = self
            .routes
            .values()
            .filter(|route| route.range.overlaps(range))
            .map(|route| route.range.first())
            .collect();
        for key in keys {
            self.routes.remove(&key);
        }
    }
}
