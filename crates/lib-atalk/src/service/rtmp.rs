use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, trace};

use crate::constants;
use crate::port::Port;
use crate::router::Router;
use crate::tables::{RouteUpdate, Tables};
use crate::types::{
    is_valid_network, tuple_wire_len, Addr, Datagram, RtmpData, RtmpRequest, RtmpTuple,
    RTMP_FUNC_RDR_FULL, RTMP_FUNC_RDR_SPLIT, RTMP_FUNC_REQUEST,
};

use super::Service;

/// Tuples that fit one RTMP data payload after the 4-byte header.
const TUPLE_BUDGET: usize = constants::MAX_DDP_PAYLOAD - RtmpData::HEADER_LEN;

/// Build the tuple list advertised out of `port_id`. Split horizon: routes
/// whose egress is that port stay home, except the port's own
/// directly-connected range. Zombie routes go out at distance 16.
pub(crate) fn advertisement_tuples(
    tables: &Tables,
    port_id: usize,
    split_horizon: bool,
) -> Vec<RtmpTuple> {
    tables
        .routes
        .iter()
        .filter(|route| !split_horizon || route.is_direct() || route.port != port_id)
        .map(|route| RtmpTuple {
            range: route.range,
            distance: route.distance,
            extended: route.extended,
        })
        .collect()
}

/// Split a tuple list into payload-sized chunks.
fn chunk_tuples(tuples: &[RtmpTuple]) -> Vec<Vec<RtmpTuple>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;
    for tuple in tuples {
        let len = tuple_wire_len(tuple);
        if used + len > TUPLE_BUDGET && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        used += len;
        current.push(*tuple);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Reactive half of RTMP on socket 1: learns routes from neighbor data
/// packets and answers requests and route data requests.
#[derive(Debug, Default)]
pub struct RtmpResponder;

impl RtmpResponder {
    pub fn new() -> Self {
        Self
    }

    fn learn(&self, router: &Router, data: &RtmpData, ingress: &Arc<Port>) {
        // Our own broadcasts can come back on some media.
        if ingress.addr(constants::RTMP_SOCKET).map(|a| (a.network, a.node))
            == Some((data.sender_network, data.sender_node))
        {
            return;
        }
        if !is_valid_network(data.sender_network) || data.sender_node == 0 {
            return;
        }

        let neighbor = (data.sender_network, data.sender_node);
        let now = Instant::now();
        let mut tables = router.tables().write().unwrap_or_else(|e| e.into_inner());
        for tuple in &data.tuples {
            if !is_valid_network(tuple.range.first()) {
                continue;
            }
            let candidate = tuple.distance.saturating_add(1);
            let update = tables.routes.observe(
                tuple.range,
                tuple.extended,
                candidate,
                neighbor,
                ingress.id(),
                now,
            );
            match update {
                RouteUpdate::Inserted | RouteUpdate::Replaced => {
                    debug!(
                        range = %tuple.range,
                        distance = candidate,
                        neighbor_network = neighbor.0,
                        neighbor_node = neighbor.1,
                        "learned route"
                    );
                }
                RouteUpdate::Refreshed | RouteUpdate::Ignored => {}
            }
        }
    }

    async fn answer(&self, router: &Router, request: RtmpRequest, datagram: &Datagram, ingress: &Arc<Port>) {
        let Some(our_addr) = ingress.addr(constants::RTMP_SOCKET) else {
            return;
        };

        let tuples = {
            let tables = router.tables().read().unwrap_or_else(|e| e.into_inner());
            match request.function {
                // A plain request wants the short enumerating form: just our
                // directly-connected networks.
                RTMP_FUNC_REQUEST => tables
                    .routes
                    .iter()
                    .filter(|route| route.is_direct())
                    .map(|route| RtmpTuple {
                        range: route.range,
                        distance: 0,
                        extended: route.extended,
                    })
                    .collect(),
                RTMP_FUNC_RDR_SPLIT => advertisement_tuples(&tables, ingress.id(), true),
                RTMP_FUNC_RDR_FULL => advertisement_tuples(&tables, ingress.id(), false),
                _ => return,
            }
        };

        for chunk in chunk_tuples(&tuples) {
            let data = RtmpData {
                sender_network: our_addr.network,
                sender_node: our_addr.node,
                tuples: chunk,
            };
            let reply = Datagram::new(
                our_addr,
                datagram.src,
                constants::DDP_TYPE_RTMP_DATA,
                data.encode(),
            );
            router.reply_via(reply, ingress).await;
        }
    }
}

#[async_trait]
impl Service for RtmpResponder {
    fn name(&self) -> &'static str {
        "rtmp"
    }

    fn socket(&self) -> Option<u8> {
        Some(constants::RTMP_SOCKET)
    }

    async fn handle(&self, router: &Router, datagram: Datagram, ingress: &Arc<Port>) {
        match datagram.ddp_type {
            constants::DDP_TYPE_RTMP_DATA => match RtmpData::parse(&datagram.payload) {
                Ok(data) => self.learn(router, &data, ingress),
                Err(err) => debug!(%err, "bad rtmp data packet"),
            },
            constants::DDP_TYPE_RTMP_REQUEST => match RtmpRequest::parse(&datagram.payload) {
                Ok(request) => self.answer(router, request, &datagram, ingress).await,
                Err(err) => debug!(%err, "bad rtmp request"),
            },
            other => trace!(ddp_type = other, "ignoring datagram on rtmp socket"),
        }
    }
}

/// Periodic half of RTMP: one data packet per online port every ten
/// seconds, to the link broadcast address.
#[derive(Debug, Default)]
pub struct RtmpSender;

impl RtmpSender {
    pub fn new() -> Self {
        Self
    }

    async fn send_round(&self, router: &Router) {
        for port in router.ports() {
            if !port.is_online() {
                continue;
            }
            let Some(our_addr) = port.addr(constants::RTMP_SOCKET) else {
                continue;
            };

            let tuples = {
                let tables = router.tables().read().unwrap_or_else(|e| e.into_inner());
                advertisement_tuples(&tables, port.id(), true)
            };

            for chunk in chunk_tuples(&tuples) {
                let data = RtmpData {
                    sender_network: our_addr.network,
                    sender_node: our_addr.node,
                    tuples: chunk,
                };
                let datagram = Datagram::new(
                    our_addr,
                    Addr::new(0, constants::BROADCAST_NODE, constants::RTMP_SOCKET),
                    constants::DDP_TYPE_RTMP_DATA,
                    data.encode(),
                );
                if let Err(err) = port.broadcast(&datagram).await {
                    debug!(port = port.id(), %err, "rtmp broadcast failed");
                }
            }
        }
    }
}

#[async_trait]
impl Service for RtmpSender {
    fn name(&self) -> &'static str {
        "rtmp-sender"
    }

    async fn run(&self, router: Router, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(constants::RTMP_SEND_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {}
            }
            self.send_round(&router).await;
        }
    }
}
