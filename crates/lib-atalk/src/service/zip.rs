use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, trace};

use crate::constants;
use crate::port::Port;
use crate::router::Router;
use crate::types::{
    zone_pair_wire_len, Addr, Datagram, GetNetInfoReply, NetRange, ZipPacket, ZoneListReply,
    ZoneListRequest, ZoneName, GNI_FLAG_ONLY_ONE_ZONE, GNI_FLAG_USE_BROADCAST,
    GNI_FLAG_ZONE_INVALID, ZIP_ATP_GET_LOCAL_ZONES, ZIP_ATP_GET_MY_ZONE, ZIP_ATP_GET_ZONE_LIST,
};

use super::Service;

/// Payload budget for the pairs in one ZIP reply, after function and count.
const REPLY_BUDGET: usize = constants::MAX_DDP_PAYLOAD - 2;

/// Payload budget for zone names in one zone-list response, after the ATP
/// header.
const ZONE_LIST_BUDGET: usize = constants::MAX_DDP_PAYLOAD - 8;

/// Reactive half of ZIP on socket 6: answers queries, GetNetInfo and the
/// ATP-carried zone-list functions, and learns zones from replies.
#[derive(Debug, Default)]
pub struct ZipResponder;

impl ZipResponder {
    pub fn new() -> Self {
        Self
    }

    /// Answer a ZIP query with as many replies as the zone lists need.
    async fn answer_query(
        &self,
        router: &Router,
        networks: &[u16],
        datagram: &Datagram,
        ingress: &Arc<Port>,
    ) {
        let Some(our_addr) = ingress.addr(constants::ZIP_SOCKET) else {
            return;
        };

        // Snapshot the zone lists under the read lock, then build packets.
        let mut single: Vec<(u16, ZoneName)> = Vec::new();
        let mut multi: Vec<(u16, Vec<ZoneName>)> = Vec::new();
        {
            let tables = router.tables().read().unwrap_or_else(|e| e.into_inner());
            for network in networks {
                let Some(entry) = tables.zones.entry_for(*network) else {
                    continue;
                };
                match entry.zones.len() {
                    0 => {}
                    1 => single.push((*network, entry.zones[0].clone())),
                    _ => multi.push((*network, entry.zones.clone())),
                }
            }
        }

        let mut packets = Vec::new();
        // Networks with one zone share plain replies.
        let mut pairs = Vec::new();
        let mut used = 0;
        for (network, zone) in single {
            let len = zone_pair_wire_len(&zone);
            if used + len > REPLY_BUDGET && !pairs.is_empty() {
                packets.push(ZipPacket::Reply {
                    zones: std::mem::take(&mut pairs),
                });
                used = 0;
            }
            used += len;
            pairs.push((network, zone));
        }
        if !pairs.is_empty() {
            packets.push(ZipPacket::Reply { zones: pairs });
        }

        // Multi-zone networks get extended replies carrying the total count.
        for (network, zones) in multi {
            let total = zones.len() as u8;
            let mut pairs: Vec<(u16, ZoneName)> = Vec::new();
            let mut used = 0;
            for zone in zones {
                let len = zone_pair_wire_len(&zone);
                if used + len > REPLY_BUDGET && !pairs.is_empty() {
                    packets.push(ZipPacket::ExtendedReply {
                        total,
                        zones: std::mem::take(&mut pairs),
                    });
                    used = 0;
                }
                used += len;
                pairs.push((network, zone));
            }
            if !pairs.is_empty() {
                packets.push(ZipPacket::ExtendedReply {
                    total,
                    zones: pairs,
                });
            }
        }

        for packet in packets {
            let reply = Datagram::new(
                our_addr,
                datagram.src,
                constants::DDP_TYPE_ZIP,
                packet.encode(),
            );
            router.reply_via(reply, ingress).await;
        }
    }

    /// Fold zones from a reply into the table, releasing pending queries.
    fn learn(&self, router: &Router, zones: Vec<(u16, ZoneName)>) {
        let mut tables = router.tables().write().unwrap_or_else(|e| e.into_inner());
        for (network, zone) in zones {
            let Some(range) = tables.routes.lookup(network).map(|r| r.range) else {
                trace!(network, "zone reply for unknown network");
                continue;
            };
            tables.zones.clear_pending(&range);
            if tables.zones.add_zone(range, zone.clone()) {
                debug!(network, %zone, "learned zone");
            }
        }
    }

    async fn answer_get_net_info(
        &self,
        router: &Router,
        requested: Option<ZoneName>,
        datagram: &Datagram,
        ingress: &Arc<Port>,
    ) {
        let Some(address) = ingress.address() else {
            return;
        };
        let our_addr = Addr::new(address.network, address.node, constants::ZIP_SOCKET);

        let (zones, default_zone) = {
            let tables = router.tables().read().unwrap_or_else(|e| e.into_inner());
            match tables.zones.entry_for(address.network) {
                Some(entry) => (entry.zones.clone(), entry.default_zone.clone()),
                None => (Vec::new(), None),
            }
        };

        let valid = requested
            .as_ref()
            .map(|zone| zones.contains(zone))
            .unwrap_or(false);

        // No zone multicast support on these media: end nodes fall back to
        // link broadcasts.
        let mut flags = GNI_FLAG_USE_BROADCAST;
        if !valid {
            flags |= GNI_FLAG_ZONE_INVALID;
        }
        if zones.len() == 1 {
            flags |= GNI_FLAG_ONLY_ONE_ZONE;
        }

        let reply = ZipPacket::GetNetInfoReply(GetNetInfoReply {
            flags,
            range: address.range,
            zone: requested.map(|z| z.as_bytes().to_vec()).unwrap_or_default(),
            multicast: Vec::new(),
            default_zone: if valid { None } else { default_zone },
        });
        let reply = Datagram::new(
            our_addr,
            datagram.src,
            constants::DDP_TYPE_ZIP,
            reply.encode(),
        );
        router.reply_via(reply, ingress).await;
    }

    /// The ATP-carried zone list functions, paginated by a start index.
    async fn answer_zone_list(
        &self,
        router: &Router,
        request: ZoneListRequest,
        datagram: &Datagram,
        ingress: &Arc<Port>,
    ) {
        let Some(our_addr) = ingress.addr(constants::ZIP_SOCKET) else {
            return;
        };

        let all: Vec<ZoneName> = {
            let tables = router.tables().read().unwrap_or_else(|e| e.into_inner());
            match request.function {
                ZIP_ATP_GET_ZONE_LIST => tables.zones.all_zones(),
                ZIP_ATP_GET_LOCAL_ZONES => ingress
                    .address()
                    .map(|a| tables.zones.zones_for(a.network).to_vec())
                    .unwrap_or_default(),
                ZIP_ATP_GET_MY_ZONE => tables
                    .zones
                    .entry_for(datagram.src.network)
                    .and_then(|entry| entry.default_zone.clone())
                    .into_iter()
                    .collect(),
                _ => return,
            }
        };

        let start = (request.start_index.max(1) as usize) - 1;
        let mut zones = Vec::new();
        let mut used = 0;
        let mut last = true;
        for zone in all.iter().skip(start) {
            let len = 1 + zone.len();
            if used + len > ZONE_LIST_BUDGET {
                last = false;
                break;
            }
            used += len;
            zones.push(zone.clone());
        }

        let reply = ZoneListReply {
            tid: request.tid,
            last,
            zones,
        };
        let reply = Datagram::new(
            our_addr,
            datagram.src,
            constants::DDP_TYPE_ATP,
            reply.encode(),
        );
        router.reply_via(reply, ingress).await;
    }
}

#[async_trait]
impl Service for ZipResponder {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn socket(&self) -> Option<u8> {
        Some(constants::ZIP_SOCKET)
    }

    async fn handle(&self, router: &Router, datagram: Datagram, ingress: &Arc<Port>) {
        match datagram.ddp_type {
            constants::DDP_TYPE_ZIP => match ZipPacket::parse(&datagram.payload) {
                Ok(ZipPacket::Query { networks }) => {
                    self.answer_query(router, &networks, &datagram, ingress).await
                }
                Ok(ZipPacket::Reply { zones })
                | Ok(ZipPacket::ExtendedReply { zones, .. }) => self.learn(router, zones),
                Ok(ZipPacket::GetNetInfo { zone }) => {
                    self.answer_get_net_info(router, zone, &datagram, ingress)
                        .await
                }
                // Our ports consume these while discovering their network.
                Ok(ZipPacket::GetNetInfoReply(_)) => {}
                Err(err) => debug!(%err, "bad zip packet"),
            },
            constants::DDP_TYPE_ATP => match ZoneListRequest::parse(&datagram.payload) {
                Ok(request) => {
                    self.answer_zone_list(router, request, &datagram, ingress)
                        .await
                }
                Err(err) => debug!(%err, "bad zone list request"),
            },
            other => trace!(ddp_type = other, "ignoring datagram on zip socket"),
        }
    }
}

/// Periodic half of ZIP: queries next hops for the zones of any route that
/// has none, one outstanding query per range with a ten-second timeout.
#[derive(Debug, Default)]
pub struct ZipSender;

impl ZipSender {
    pub fn new() -> Self {
        Self
    }

    async fn query_round(&self, router: &Router) {
        // target -> networks to ask about; None targets broadcast the query
        // on the route's own port.
        let mut wanted: HashMap<(usize, Option<(u16, u8)>), Vec<u16>> = HashMap::new();
        {
            let now = Instant::now();
            let timeout = Duration::from_secs(constants::ZIP_QUERY_TIMEOUT_SECS);
            let mut tables = router.tables().write().unwrap_or_else(|e| e.into_inner());

            let candidates: Vec<(NetRange, usize, Option<(u16, u8)>)> = tables
                .routes
                .iter()
                .map(|route| (route.range, route.port, route.next_hop))
                .collect();
            for (range, port, next_hop) in candidates {
                if tables.zones.has_zones(&range) {
                    continue;
                }
                if tables.zones.should_query(&range, now, timeout) {
                    wanted
                        .entry((port, next_hop))
                        .or_default()
                        .push(range.first());
                }
            }
        }

        for ((port_id, next_hop), networks) in wanted {
            let Some(port) = router.port(port_id).filter(|p| p.is_online()) else {
                continue;
            };
            let Some(our_addr) = port.addr(constants::ZIP_SOCKET) else {
                continue;
            };

            let query = ZipPacket::Query { networks };
            match next_hop {
                Some((network, node)) => {
                    let datagram = Datagram::new(
                        our_addr,
                        Addr::new(network, node, constants::ZIP_SOCKET),
                        constants::DDP_TYPE_ZIP,
                        query.encode(),
                    );
                    if let Err(err) = port.send(&datagram, (network, node)).await {
                        debug!(port = port_id, %err, "zip query failed");
                    }
                }
                None => {
                    // A directly-connected network whose zones nobody told
                    // us: ask the neighbors at large.
                    let datagram = Datagram::new(
                        our_addr,
                        Addr::new(0, constants::BROADCAST_NODE, constants::ZIP_SOCKET),
                        constants::DDP_TYPE_ZIP,
                        query.encode(),
                    );
                    if let Err(err) = port.broadcast(&datagram).await {
                        debug!(port = port_id, %err, "zip query broadcast failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Service for ZipSender {
    fn name(&self) -> &'static str {
        "zip-sender"
    }

    async fn run(&self, router: Router, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(constants::ZIP_SEND_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {}
            }
            self.query_round(&router).await;
        }
    }
}
