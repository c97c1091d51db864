use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::constants;
use crate::error::DeliveryError;
use crate::link::{LinkDriver, LinkError, LinkEvent};
use crate::port::{Port, PortConfig};
use crate::service::Service;
use crate::tables::Tables;
use crate::types::{Addr, Datagram};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router is already running")]
    AlreadyRunning,
}

/// Router-wide drop counters; per-port counters live on the ports.
#[derive(Debug, Default)]
pub struct RouterStats {
    route_misses: AtomicU64,
    hop_exceeded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub route_misses: u64,
    pub hop_exceeded: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            route_misses: self.route_misses.load(Ordering::Relaxed),
            hop_exceeded: self.hop_exceeded.load(Ordering::Relaxed),
        }
    }
}

/// Declaratively assemble a [`Router`] from link drivers and services.
#[derive(Default)]
pub struct RouterBuilder {
    ports: Vec<(Box<dyn LinkDriver>, PortConfig)>,
    services: Vec<Arc<dyn Service>>,
}

impl RouterBuilder {
    /// Add a port backed by the given link driver.
    pub fn port(mut self, driver: Box<dyn LinkDriver>, config: PortConfig) -> Self {
        self.ports.push((driver, config));
        self
    }

    pub fn service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    /// The full standard service set: RTMP, ZIP, NBP and Echo responders
    /// plus the periodic RTMP/ZIP senders and the route ager.
    pub fn with_standard_services(self) -> Self {
        use crate::service::{
            EchoService, NbpService, RouteAger, RtmpResponder, RtmpSender, ZipResponder, ZipSender,
        };
        self.service(Arc::new(RtmpResponder::new()))
            .service(Arc::new(ZipResponder::new()))
            .service(Arc::new(NbpService::new()))
            .service(Arc::new(EchoService::new()))
            .service(Arc::new(RtmpSender::new()))
            .service(Arc::new(ZipSender::new()))
            .service(Arc::new(RouteAger::new()))
    }

    pub fn build(self) -> Router {
        let ports = self
            .ports
            .into_iter()
            .enumerate()
            .map(|(id, (driver, config))| Arc::new(Port::new(id, driver, config)))
            .collect();
        let (shutdown, _) = broadcast::channel(1);

        Router {
            inner: Arc::new(RouterInner {
                ports,
                services: self.services,
                tables: RwLock::new(Tables::default()),
                stats: RouterStats::default(),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
        }
    }
}

struct RouterInner {
    ports: Vec<Arc<Port>>,
    services: Vec<Arc<dyn Service>>,
    tables: RwLock<Tables>,
    stats: RouterStats,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

/// The AppleTalk internet router: an ordered set of ports, the routing and
/// zone tables, and the services running on the well-known sockets.
///
/// `Router` is a cheap cloneable handle; every clone drives the same
/// instance.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn ports(&self) -> &[Arc<Port>] {
        &self.inner.ports
    }

    pub fn port(&self, id: usize) -> Option<&Arc<Port>> {
        self.inner.ports.get(id)
    }

    /// The routing and zone tables, under their shared reader-writer lock.
    /// Never held across suspension points.
    pub fn tables(&self) -> &RwLock<Tables> {
        &self.inner.tables
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Start every port and every service.
    pub async fn start(&self) -> Result<(), RouterError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(RouterError::AlreadyRunning);
        }
        info!(
            ports = self.inner.ports.len(),
            services = self.inner.services.len(),
            "starting router"
        );

        let mut tasks = Vec::new();
        for port in &self.inner.ports {
            let router = self.clone();
            let port = port.clone();
            let shutdown = self.inner.shutdown.subscribe();
            tasks.push(tokio::spawn(port_task(router, port, shutdown)));
        }
        for service in &self.inner.services {
            let router = self.clone();
            let service = service.clone();
            let shutdown = self.inner.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                service.run(router, shutdown).await;
            }));
        }

        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(tasks);
        Ok(())
    }

    /// Signal every task to terminate and wait for them to settle.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping router");
        let _ = self.inner.shutdown.send(());

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        let settle = Duration::from_secs(constants::STOP_SETTLE_TIMEOUT_SECS);
        for mut task in tasks {
            if tokio::time::timeout(settle, &mut task).await.is_err() {
                warn!("task did not settle in time, aborting");
                task.abort();
            }
        }

        for port in &self.inner.ports {
            port.mark_stopped();
        }
    }

    /// Dispatch a datagram received on a port: deliver it to a local
    /// service, forward it onward, or both for broadcasts.
    pub(crate) async fn inbound(&self, datagram: Datagram, ingress: &Arc<Port>) {
        let dst = datagram.dst;
        let local = self.is_local(dst, ingress);

        if local {
            match self.service_for(dst.socket) {
                Some(service) => service.handle(self, datagram.clone(), ingress).await,
                None => trace!(socket = dst.socket, "no service on socket"),
            }
        }

        // A broadcast for a network served by another port also goes back
        // out that port; everything non-local goes through forwarding.
        let rebroadcast = dst.node == constants::BROADCAST_NODE
            && dst.network != 0
            && !ingress.serves(dst.network);
        if !local || rebroadcast {
            if let Err(err) = self.forward(datagram, true).await {
                self.count_delivery_error(err);
            }
        }
    }

    /// Whether the datagram targets this router itself on some port.
    fn is_local(&self, dst: Addr, _ingress: &Arc<Port>) -> bool {
        if dst.network == 0 {
            return true;
        }
        self.inner.ports.iter().any(|port| {
            port.is_online()
                && port.serves(dst.network)
                && (dst.node == constants::BROADCAST_NODE
                    || dst.node == constants::ANY_ROUTER_NODE
                    || port.node() == Some(dst.node))
        })
    }

    fn service_for(&self, socket: u8) -> Option<&Arc<dyn Service>> {
        self.inner
            .services
            .iter()
            .find(|service| service.socket() == Some(socket))
    }

    /// Emit a datagram this router originated.
    pub async fn route_out(&self, datagram: Datagram) {
        if let Err(err) = self.forward(datagram, false).await {
            self.count_delivery_error(err);
        }
    }

    /// Send a reply back toward a requester. Requesters without a routable
    /// source (startup-range nodes discovering their network) are answered
    /// directly on the ingress link.
    pub async fn reply_via(&self, datagram: Datagram, ingress: &Arc<Port>) {
        match self.forward(datagram.clone(), false).await {
            Ok(()) => {}
            Err(DeliveryError::NoRoute(_)) => {
                let next = (datagram.dst.network, datagram.dst.node);
                if let Err(err) = ingress.send(&datagram, next).await {
                    debug!(port = ingress.id(), %err, "direct reply failed");
                }
            }
            Err(err) => self.count_delivery_error(err),
        }
    }

    /// Forwarding proper: RIB lookup, hop-count discipline for transit
    /// traffic, egress transmission.
    async fn forward(&self, datagram: Datagram, transit: bool) -> Result<(), DeliveryError> {
        if transit && datagram.hop_count >= constants::MAX_HOP_COUNT {
            return Err(DeliveryError::HopLimitExceeded);
        }

        let dst = datagram.dst;
        let (egress_id, next_hop) = {
            let tables = self.inner.tables.read().unwrap_or_else(|e| e.into_inner());
            let route = tables
                .routes
                .lookup(dst.network)
                .ok_or(DeliveryError::NoRoute(dst.network))?;
            (route.port, route.next_hop.unwrap_or((dst.network, dst.node)))
        };

        let egress = self
            .inner
            .ports
            .get(egress_id)
            .filter(|port| port.is_online())
            .ok_or(DeliveryError::NoRoute(dst.network))?;

        let mut out = datagram;
        if transit {
            out.hop_count += 1;
        }
        egress.send(&out, next_hop).await?;
        Ok(())
    }

    fn count_delivery_error(&self, err: DeliveryError) {
        match err {
            DeliveryError::NoRoute(network) => {
                self.inner.stats.route_misses.fetch_add(1, Ordering::Relaxed);
                debug!(network, "no route");
            }
            DeliveryError::HopLimitExceeded => {
                self.inner.stats.hop_exceeded.fetch_add(1, Ordering::Relaxed);
            }
            // Already counted at the port; unresolved AARP is routine.
            DeliveryError::LinkTransmitFailed(LinkError::UnresolvedAddress { network, node }) => {
                trace!(network, node, "holding for address resolution");
            }
            DeliveryError::LinkTransmitFailed(err) => {
                debug!(%err, "transmit failed");
            }
            DeliveryError::MalformedDatagram(_) | DeliveryError::ChecksumMismatch => {}
        }
    }

    /// Install the directly-connected route and seed zones for a port that
    /// finished acquisition.
    fn port_online(&self, port: &Arc<Port>) {
        let Some(address) = port.address() else {
            return;
        };
        let mut tables = self.inner.tables.write().unwrap_or_else(|e| e.into_inner());
        tables
            .routes
            .insert_direct(address.range, port.id(), port.is_extended());

        if let Some(seed) = port.seed() {
            if !seed.zones.is_empty() {
                tables
                    .zones
                    .seed(address.range, seed.zones.clone(), seed.default_zone.clone());
            }
        } else if let Some(zone) = port.discovered_zone() {
            tables
                .zones
                .seed(address.range, vec![zone.clone()], Some(zone));
        }
    }

    /// Withdraw everything a dead port contributed.
    fn port_offline(&self, port: &Arc<Port>) {
        let mut tables = self.inner.tables.write().unwrap_or_else(|e| e.into_inner());
        for range in tables.routes.remove_port(port.id()) {
            tables.zones.remove_range(&range);
        }
    }
}

/// One port's task: run acquisition, then pump the link until shutdown.
async fn port_task(router: Router, port: Arc<Port>, mut shutdown: broadcast::Receiver<()>) {
    let acquired = tokio::select! {
        _ = shutdown.recv() => {
            port.mark_stopped();
            return;
        }
        result = port.acquire() => result,
    };
    if let Err(err) = acquired {
        warn!(port = port.id(), kind = port.kind(), %err, "port failed to start");
        port.mark_stopped();
        return;
    }
    router.port_online(&port);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            event = port.recv() => match event {
                Ok(LinkEvent::Inbound(frame)) => match port.decode(&frame) {
                    Ok(datagram) => router.inbound(datagram, &port).await,
                    Err(err) => {
                        port.stats.count_decode_error(&err);
                        debug!(port = port.id(), %err, "dropped inbound frame");
                    }
                },
                // Claims only matter while acquiring an address.
                Ok(LinkEvent::Claimed { .. }) => {}
                Err(LinkError::Closed) => {
                    warn!(port = port.id(), "link closed");
                    break;
                }
                Err(err) => debug!(port = port.id(), %err, "receive error"),
            },
        }
    }

    port.mark_stopped();
    router.port_offline(&port);
}
