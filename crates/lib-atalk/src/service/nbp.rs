use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::constants;
use crate::port::Port;
use crate::router::Router;
use crate::types::{
    Addr, Datagram, NbpPacket, NetRange, NBP_FUNC_BRRQ, NBP_FUNC_FWDREQ, NBP_FUNC_LKUP,
    NBP_WILDCARD,
};

use super::Service;

/// The NBP router role on socket 2: turns broadcast requests into lookups
/// on the right links, forwarding across networks when the zone lives
/// elsewhere. The router registers no names of its own, so plain lookups
/// pass it by.
#[derive(Debug, Default)]
pub struct NbpService;

impl NbpService {
    pub fn new() -> Self {
        Self
    }

    /// The zone a request targets. The `=` wildcard, an empty zone and the
    /// end-node `*` shorthand all resolve to the ingress port's own
    /// (default) zone.
    fn target_zone(&self, router: &Router, packet: &NbpPacket, ingress: &Arc<Port>) -> Option<Vec<u8>> {
        let zone = &packet.tuples.first()?.entity.zone;
        if !matches!(zone.as_slice(), [] | [NBP_WILDCARD | b'*']) {
            return Some(zone.clone());
        }
        let address = ingress.address()?;
        let tables = router.tables().read().unwrap_or_else(|e| e.into_inner());
        tables
            .zones
            .entry_for(address.network)
            .and_then(|entry| entry.default_zone.clone())
            .map(|zone| zone.as_bytes().to_vec())
    }

    /// Ports that serve the zone locally.
    fn local_ports_for_zone(&self, router: &Router, zone: &[u8]) -> Vec<Arc<Port>> {
        let tables = router.tables().read().unwrap_or_else(|e| e.into_inner());
        router
            .ports()
            .iter()
            .filter(|port| port.is_online())
            .filter(|port| {
                port.address()
                    .map(|a| tables.zones.zones_for(a.network).iter().any(|z| z.matches(zone)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// A remote network range serving the zone, with a route to get there.
    fn remote_range_for_zone(&self, router: &Router, zone: &[u8]) -> Option<NetRange> {
        let tables = router.tables().read().unwrap_or_else(|e| e.into_inner());
        tables
            .zones
            .ranges_serving_zone(zone)
            .into_iter()
            .find(|range| {
                tables
                    .routes
                    .get(range)
                    .map(|route| !route.is_direct())
                    .unwrap_or(false)
            })
    }

    /// Broadcast the packet as a lookup on the given port.
    async fn lookup_on(&self, packet: &NbpPacket, port: &Arc<Port>) {
        let Some(address) = port.address() else {
            return;
        };
        let our_addr = Addr::new(address.network, address.node, constants::NBP_SOCKET);
        let lookup = Datagram::new(
            our_addr,
            Addr::new(address.network, constants::BROADCAST_NODE, constants::NBP_SOCKET),
            constants::DDP_TYPE_NBP,
            packet.with_function(NBP_FUNC_LKUP).encode(),
        );
        if let Err(err) = port.broadcast(&lookup).await {
            debug!(port = port.id(), %err, "nbp lookup broadcast failed");
        }
    }

    async fn handle_broadcast_request(
        &self,
        router: &Router,
        packet: &NbpPacket,
        ingress: &Arc<Port>,
    ) {
        let Some(zone) = self.target_zone(router, packet, ingress) else {
            trace!("broadcast request without a resolvable zone");
            return;
        };

        let local = self.local_ports_for_zone(router, &zone);
        if !local.is_empty() {
            for port in local {
                self.lookup_on(packet, &port).await;
            }
            return;
        }

        // The zone lives on a remote network: hand the request to a router
        // that serves it.
        match self.remote_range_for_zone(router, &zone) {
            Some(range) => {
                let Some(our_addr) = ingress.addr(constants::NBP_SOCKET) else {
                    return;
                };
                let forward = Datagram::new(
                    our_addr,
                    Addr::new(range.first(), constants::ANY_ROUTER_NODE, constants::NBP_SOCKET),
                    constants::DDP_TYPE_NBP,
                    packet.with_function(NBP_FUNC_FWDREQ).encode(),
                );
                router.route_out(forward).await;
            }
            None => {
                debug!(zone = %String::from_utf8_lossy(&zone), "no network serves zone");
            }
        }
    }

    async fn handle_forward_request(&self, router: &Router, packet: &NbpPacket, ingress: &Arc<Port>) {
        let Some(zone) = self.target_zone(router, packet, ingress) else {
            return;
        };
        for port in self.local_ports_for_zone(router, &zone) {
            self.lookup_on(packet, &port).await;
        }
    }
}

#[async_trait]
impl Service for NbpService {
    fn name(&self) -> &'static str {
        "nbp"
    }

    fn socket(&self) -> Option<u8> {
        Some(constants::NBP_SOCKET)
    }

    async fn handle(&self, router: &Router, datagram: Datagram, ingress: &Arc<Port>) {
        if datagram.ddp_type != constants::DDP_TYPE_NBP {
            trace!("ignoring non-nbp datagram on nbp socket");
            return;
        }
        let packet = match NbpPacket::parse(&datagram.payload) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(%err, "bad nbp packet");
                return;
            }
        };

        match packet.function {
            NBP_FUNC_BRRQ => self.handle_broadcast_request(router, &packet, ingress).await,
            NBP_FUNC_FWDREQ => self.handle_forward_request(router, &packet, ingress).await,
            // The router registers no names; lookups and replies addressed
            // to it have nothing to find.
            _ => trace!(function = packet.function, "nbp function ignored"),
        }
    }
}
