use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::info;

use crate::constants;
use crate::router::Router;

use super::Service;

/// Periodic sweeper advancing routes through their ageing states and
/// withdrawing the ones that expired, zones included.
#[derive(Debug, Default)]
pub struct RouteAger;

impl RouteAger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Service for RouteAger {
    fn name(&self) -> &'static str {
        "route-ager"
    }

    async fn run(&self, router: Router, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(constants::ROUTE_AGING_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {}
            }

            let removed = {
                let mut tables = router.tables().write().unwrap_or_else(|e| e.into_inner());
                let removed = tables.routes.sweep(Instant::now());
                for range in &removed {
                    tables.zones.remove_range(range);
                }
                removed
            };
            for range in removed {
                info!(%range, "route aged out");
            }
        }
    }
}
