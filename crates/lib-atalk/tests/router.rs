use atalk::link::{LinkDest, LinkEvent};
use atalk::port::{PortConfig, PortState};
use atalk::tables::RouteState;
use atalk::types::{
    is_startup_network, Addr, Datagram, EntityName, GetNetInfoReply, NbpPacket, NbpTuple,
    NetRange, RtmpData, RtmpRequest, RtmpTuple, ZipPacket, ZoneListReply, ZoneListRequest,
    GNI_FLAG_USE_BROADCAST, GNI_FLAG_ZONE_INVALID, NBP_FUNC_BRRQ, NBP_FUNC_FWDREQ,
    NBP_FUNC_LKUP, ZIP_ATP_GET_ZONE_LIST,
};
use atalk::Router;

use crate::common::*;

mod common;

/// A fresh two-port router: port 0 on network 1, port 1 on network 2.
async fn two_port_router(zone_a: &str, zone_b: &str) -> (Router, LinkHarness, LinkHarness) {
    let (link_a, harness_a) = test_link(false);
    let (link_b, harness_b) = test_link(false);
    let router = Router::builder()
        .port(Box::new(link_a), seeded(1, zone_a))
        .port(Box::new(link_b), seeded(2, zone_b))
        .with_standard_services()
        .build();
    router.start().await.unwrap();
    wait_online(&router).await;
    (router, harness_a, harness_b)
}

/// A node number distinct from the router's own on a port, as close to
/// `preferred` as possible. Router nodes are random, so the literal values
/// in the scenarios occasionally need nudging.
fn node_other_than(router: &Router, port: usize, preferred: u8) -> u8 {
    if router.port(port).unwrap().node() == Some(preferred) {
        preferred + 1
    } else {
        preferred
    }
}

/// Teach the router a route to network 10 via a neighbor router on port 1.
async fn learn_network_10(router: &Router, harness_b: &LinkHarness, neighbor: u8) {
    let data = RtmpData {
        sender_network: 2,
        sender_node: neighbor,
        tuples: vec![RtmpTuple::single(10, 0)],
    };
    let datagram = Datagram::new(
        Addr::new(2, neighbor, 1),
        Addr::new(0, 255, 1),
        1,
        data.encode(),
    );
    harness_b.inject.send(inbound(&datagram)).unwrap();
    wait_for(|| {
        router
            .tables()
            .read()
            .unwrap()
            .routes
            .lookup(10)
            .is_some()
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn forwards_echo_between_ports() {
    let (router, mut ha, mut hb) = two_port_router("Machine Room", "Finance").await;
    let target = node_other_than(&router, 1, 7);
    let source = node_other_than(&router, 0, 5);

    let request = Datagram::new(
        Addr::new(1, source, 4),
        Addr::new(2, target, 4),
        4,
        vec![1, 0xAB, 0xCD],
    );
    ha.inject.send(inbound(&request)).unwrap();

    let (forwarded, dest) = next_matching(&mut hb.sent, |dg, _| dg.ddp_type == 4).await;
    assert_eq!(
        dest,
        LinkDest::Unicast {
            network: 2,
            node: target
        }
    );
    assert_eq!(forwarded.hop_count, 1);
    assert_eq!(forwarded.src, Addr::new(1, source, 4));
    assert_eq!(forwarded.dst, Addr::new(2, target, 4));
    assert_eq!(forwarded.payload, vec![1, 0xAB, 0xCD]);

    // And the endpoint's reply comes back the other way.
    let reply = Datagram::new(
        Addr::new(2, target, 4),
        Addr::new(1, source, 4),
        4,
        vec![2, 0xAB, 0xCD],
    );
    hb.inject.send(inbound(&reply)).unwrap();

    let (returned, dest) = next_matching(&mut ha.sent, |dg, _| dg.ddp_type == 4).await;
    assert_eq!(
        dest,
        LinkDest::Unicast {
            network: 1,
            node: source
        }
    );
    assert_eq!(returned.hop_count, 1);
    assert_eq!(returned.payload, vec![2, 0xAB, 0xCD]);

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn learns_routes_and_schedules_zone_queries() {
    let (router, _ha, mut hb) = two_port_router("Machine Room", "Shipping").await;
    let neighbor = node_other_than(&router, 1, 100);

    learn_network_10(&router, &hb, neighbor).await;
    {
        let tables = router.tables().read().unwrap();
        let route = tables.routes.lookup(10).unwrap();
        assert_eq!(route.range, NetRange::single(10));
        assert_eq!(route.distance, 1);
        assert_eq!(route.next_hop, Some((2, neighbor)));
        assert_eq!(route.port, 1);
        assert_eq!(route.state, RouteState::Good);
    }

    // A zone query for the new network goes to the advertising router.
    let (query, dest) = next_matching(&mut hb.sent, |dg, _| {
        dg.ddp_type == 6
            && matches!(
                ZipPacket::parse(&dg.payload),
                Ok(ZipPacket::Query { ref networks }) if networks.contains(&10)
            )
    })
    .await;
    assert_eq!(
        dest,
        LinkDest::Unicast {
            network: 2,
            node: neighbor
        }
    );
    assert_eq!(query.dst, Addr::new(2, neighbor, 6));

    // The reply lands in the zone table, default zone included.
    let node_b = router.port(1).unwrap().node().unwrap();
    let reply = ZipPacket::Reply {
        zones: vec![(10, zone("Finance"))],
    };
    let datagram = Datagram::new(
        Addr::new(2, neighbor, 6),
        Addr::new(2, node_b, 6),
        6,
        reply.encode(),
    );
    hb.inject.send(inbound(&datagram)).unwrap();

    wait_for(|| {
        router
            .tables()
            .read()
            .unwrap()
            .zones
            .has_zones(&NetRange::single(10))
    })
    .await;
    {
        let tables = router.tables().read().unwrap();
        let entry = tables.zones.entry_for(10).unwrap();
        assert!(entry.zones.contains(&zone("Finance")));
        assert_eq!(entry.default_zone, Some(zone("Finance")));
    }

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn ages_unrefreshed_routes_out_through_zombie() {
    let (router, mut ha, hb) = two_port_router("Machine Room", "Shipping").await;
    let neighbor = node_other_than(&router, 1, 100);
    learn_network_10(&router, &hb, neighbor).await;

    // With no further advertisements the route degrades; while a zombie it
    // is still advertised out the other port, at distance 16.
    next_matching(&mut ha.sent, |dg, _| {
        dg.ddp_type == 1
            && RtmpData::parse(&dg.payload)
                .map(|data| {
                    data.tuples
                        .iter()
                        .any(|t| t.range == NetRange::single(10) && t.distance == 16)
                })
                .unwrap_or(false)
    })
    .await;

    // And then it is gone, zones with it.
    wait_for(|| {
        router
            .tables()
            .read()
            .unwrap()
            .routes
            .lookup(10)
            .is_none()
    })
    .await;
    assert!(!router
        .tables()
        .read()
        .unwrap()
        .zones
        .has_zones(&NetRange::single(10)));

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn split_horizon_keeps_learned_routes_off_their_port() {
    let (router, _ha, mut hb) = two_port_router("Machine Room", "Shipping").await;
    let neighbor = node_other_than(&router, 1, 100);
    let node_b = router.port(1).unwrap().node().unwrap();
    learn_network_10(&router, &hb, neighbor).await;

    // Drain everything sent so far, then inspect a fresh advertisement.
    while hb.sent.try_recv().is_ok() {}
    let (advert, _) = next_matching(&mut hb.sent, |dg, _| {
        dg.ddp_type == 1 && dg.src.node == node_b
    })
    .await;
    let data = RtmpData::parse(&advert.payload).unwrap();
    let ranges: Vec<NetRange> = data.tuples.iter().map(|t| t.range).collect();
    assert!(ranges.contains(&NetRange::single(1)));
    assert!(ranges.contains(&NetRange::single(2)));
    assert!(!ranges.contains(&NetRange::single(10)));

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn answers_rtmp_requests_with_direct_networks() {
    let (router, mut ha, _hb) = two_port_router("Machine Room", "Finance").await;
    let node_a = router.port(0).unwrap().node().unwrap();
    let source = node_other_than(&router, 0, 40);

    let request = Datagram::new(
        Addr::new(1, source, 200),
        Addr::new(1, node_a, 1),
        5,
        RtmpRequest { function: 1 }.encode(),
    );
    ha.inject.send(inbound(&request)).unwrap();

    let (reply, dest) = next_matching(&mut ha.sent, |dg, _| {
        dg.ddp_type == 1 && dg.dst.node == source
    })
    .await;
    assert_eq!(
        dest,
        LinkDest::Unicast {
            network: 1,
            node: source
        }
    );
    let data = RtmpData::parse(&reply.payload).unwrap();
    assert_eq!(data.sender_network, 1);
    assert!(data.tuples.iter().all(|t| t.distance == 0));
    let ranges: Vec<NetRange> = data.tuples.iter().map(|t| t.range).collect();
    assert!(ranges.contains(&NetRange::single(1)));
    assert!(ranges.contains(&NetRange::single(2)));

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn zone_list_spans_all_known_zones() {
    let (router, mut ha, _hb) = two_port_router("Machine Room", "Finance").await;
    let node_a = router.port(0).unwrap().node().unwrap();
    let source = node_other_than(&router, 0, 5);

    let request = ZoneListRequest {
        tid: 7,
        function: ZIP_ATP_GET_ZONE_LIST,
        start_index: 1,
    };
    let datagram = Datagram::new(
        Addr::new(1, source, 200),
        Addr::new(1, node_a, 6),
        3,
        request.encode(),
    );
    ha.inject.send(inbound(&datagram)).unwrap();

    let (reply, dest) = next_matching(&mut ha.sent, |dg, _| dg.ddp_type == 3).await;
    assert_eq!(
        dest,
        LinkDest::Unicast {
            network: 1,
            node: source
        }
    );
    let reply = ZoneListReply::parse(&reply.payload).unwrap();
    assert_eq!(reply.tid, 7);
    assert!(reply.last);
    assert!(reply.zones.contains(&zone("Machine Room")));
    assert!(reply.zones.contains(&zone("Finance")));

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn get_net_info_answers_startup_nodes_directly() {
    let (router, mut ha, _hb) = two_port_router("Machine Room", "Finance").await;

    let request = Datagram::new(
        Addr::new(65283, 77, 6),
        Addr::new(0, 255, 6),
        6,
        ZipPacket::GetNetInfo { zone: None }.encode(),
    );
    ha.inject.send(inbound(&request)).unwrap();

    let (reply, dest) = next_matching(&mut ha.sent, |dg, _| {
        dg.ddp_type == 6
            && matches!(ZipPacket::parse(&dg.payload), Ok(ZipPacket::GetNetInfoReply(_)))
    })
    .await;
    assert_eq!(
        dest,
        LinkDest::Unicast {
            network: 65283,
            node: 77
        }
    );
    assert_eq!(reply.dst, Addr::new(65283, 77, 6));
    match ZipPacket::parse(&reply.payload).unwrap() {
        ZipPacket::GetNetInfoReply(info) => {
            assert_eq!(info.range, NetRange::single(1));
            assert_ne!(info.flags & GNI_FLAG_ZONE_INVALID, 0);
            assert_ne!(info.flags & GNI_FLAG_USE_BROADCAST, 0);
            assert_eq!(info.default_zone, Some(zone("Machine Room")));
        }
        other => panic!("expected get-net-info reply, got {other:?}"),
    }

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn nbp_broadcast_request_forwards_to_the_remote_zone() {
    let (router, ha, mut hb) = two_port_router("Machine Room", "Shipping").await;
    let neighbor = node_other_than(&router, 1, 100);
    let node_b = router.port(1).unwrap().node().unwrap();
    learn_network_10(&router, &hb, neighbor).await;

    // Zone Finance lives on remote network 10.
    let reply = ZipPacket::Reply {
        zones: vec![(10, zone("Finance"))],
    };
    hb.inject
        .send(inbound(&Datagram::new(
            Addr::new(2, neighbor, 6),
            Addr::new(2, node_b, 6),
            6,
            reply.encode(),
        )))
        .unwrap();
    wait_for(|| {
        router
            .tables()
            .read()
            .unwrap()
            .zones
            .has_zones(&NetRange::single(10))
    })
    .await;

    let source = node_other_than(&router, 0, 5);
    let request = NbpPacket {
        function: NBP_FUNC_BRRQ,
        id: 1,
        tuples: vec![NbpTuple {
            addr: Addr::new(1, source, 253),
            enumerator: 0,
            entity: EntityName::new(&b"="[..], &b"AFPServer"[..], &b"Finance"[..]),
        }],
    };
    let datagram = Datagram::new(
        Addr::new(1, source, 253),
        Addr::new(0, 255, 2),
        2,
        request.encode(),
    );
    ha.inject.send(inbound(&datagram)).unwrap();

    // The request leaves as a forward request toward a router serving the
    // zone, via the next hop on port B.
    let (forwarded, dest) = next_matching(&mut hb.sent, |dg, _| dg.ddp_type == 2).await;
    assert_eq!(
        dest,
        LinkDest::Unicast {
            network: 2,
            node: neighbor
        }
    );
    assert_eq!(forwarded.dst, Addr::new(10, 0, 2));
    let packet = NbpPacket::parse(&forwarded.payload).unwrap();
    assert_eq!(packet.function, NBP_FUNC_FWDREQ);
    assert_eq!(packet.id, 1);
    assert_eq!(packet.tuples[0].addr, Addr::new(1, source, 253));

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn nbp_wildcard_zone_resolves_to_the_local_zone() {
    let (router, mut ha, _hb) = two_port_router("Machine Room", "Finance").await;
    let source = node_other_than(&router, 0, 5);

    let request = NbpPacket {
        function: NBP_FUNC_BRRQ,
        id: 3,
        tuples: vec![NbpTuple {
            addr: Addr::new(1, source, 253),
            enumerator: 0,
            entity: EntityName::new(&b"="[..], &b"AFPServer"[..], &b"="[..]),
        }],
    };
    let datagram = Datagram::new(
        Addr::new(1, source, 253),
        Addr::new(0, 255, 2),
        2,
        request.encode(),
    );
    ha.inject.send(inbound(&datagram)).unwrap();

    // A wildcarded zone means the ingress port's own zone, so the request
    // comes straight back out as a lookup broadcast there.
    let (lookup, dest) = next_matching(&mut ha.sent, |dg, _| dg.ddp_type == 2).await;
    assert_eq!(dest, LinkDest::Broadcast);
    assert_eq!(lookup.dst, Addr::new(1, 255, 2));
    let packet = NbpPacket::parse(&lookup.payload).unwrap();
    assert_eq!(packet.function, NBP_FUNC_LKUP);
    assert_eq!(packet.id, 3);
    assert_eq!(packet.tuples[0].addr, Addr::new(1, source, 253));
    assert_eq!(packet.tuples[0].entity.zone, b"=");

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn network_broadcasts_cross_to_the_serving_port() {
    let (router, ha, mut hb) = two_port_router("Machine Room", "Finance").await;
    let source = node_other_than(&router, 0, 5);

    let datagram = Datagram::new(
        Addr::new(1, source, 4),
        Addr::new(2, 255, 4),
        4,
        vec![1, 9],
    );
    ha.inject.send(inbound(&datagram)).unwrap();

    let (forwarded, dest) = next_matching(&mut hb.sent, |dg, _| dg.ddp_type == 4).await;
    assert_eq!(dest, LinkDest::Broadcast);
    assert_eq!(forwarded.hop_count, 1);
    assert_eq!(forwarded.dst, Addr::new(2, 255, 4));

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn hop_limit_drops_silently() {
    let (router, ha, _hb) = two_port_router("Machine Room", "Finance").await;
    let target = node_other_than(&router, 1, 7);
    let source = node_other_than(&router, 0, 5);

    let mut datagram = Datagram::new(
        Addr::new(1, source, 4),
        Addr::new(2, target, 4),
        4,
        vec![1],
    );
    datagram.hop_count = 15;
    ha.inject.send(inbound(&datagram)).unwrap();

    wait_for(|| router.stats().hop_exceeded >= 1).await;
    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn node_collision_selects_a_different_address() {
    let (link, mut harness) = test_link(false);
    let router = Router::builder()
        .port(Box::new(link), seeded(1, "Machine Room"))
        .with_standard_services()
        .build();
    router.start().await.unwrap();

    let (_, first) = harness.probes.recv().await.unwrap();
    let inject = harness.inject.clone();
    let mut probes = harness.probes;
    tokio::spawn(async move {
        // An existing node defends the probed address, every time.
        let _ = inject.send(LinkEvent::Claimed {
            network: 0,
            node: first,
        });
        while let Some((_, node)) = probes.recv().await {
            if node == first {
                let _ = inject.send(LinkEvent::Claimed {
                    network: 0,
                    node: first,
                });
            }
        }
    });

    wait_online(&router).await;
    let adopted = router.port(0).unwrap().node().unwrap();
    assert_ne!(adopted, first);

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn non_seeded_port_discovers_its_network_from_rtmp() {
    let (link, mut harness) = test_link(false);
    let router = Router::builder()
        .port(Box::new(link), PortConfig::default())
        .with_standard_services()
        .build();
    router.start().await.unwrap();

    // Discovery starts with GetNetInfo broadcasts from a startup address.
    let (request, dest) = next_matching(&mut harness.sent, |dg, _| dg.ddp_type == 6).await;
    assert_eq!(dest, LinkDest::Broadcast);
    assert!(is_startup_network(request.src.network));
    assert!(matches!(
        ZipPacket::parse(&request.payload),
        Ok(ZipPacket::GetNetInfo { .. })
    ));

    // A routing broadcast from a peer reveals the network number.
    let data = RtmpData {
        sender_network: 5,
        sender_node: 90,
        tuples: Vec::new(),
    };
    harness
        .inject
        .send(inbound(&Datagram::new(
            Addr::new(5, 90, 1),
            Addr::new(0, 255, 1),
            1,
            data.encode(),
        )))
        .unwrap();

    wait_online(&router).await;
    let address = router.port(0).unwrap().address().unwrap();
    assert_eq!(address.range, NetRange::single(5));
    {
        let tables = router.tables().read().unwrap();
        let route = tables.routes.lookup(5).unwrap();
        assert!(route.is_direct());
        assert_eq!(route.distance, 0);
    }

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn non_seeded_port_adopts_range_and_zone_from_get_net_info() {
    let (link, mut harness) = test_link(true);
    let router = Router::builder()
        .port(Box::new(link), PortConfig::default())
        .with_standard_services()
        .build();
    router.start().await.unwrap();

    next_matching(&mut harness.sent, |dg, _| dg.ddp_type == 6).await;
    let info = ZipPacket::GetNetInfoReply(GetNetInfoReply {
        flags: GNI_FLAG_ZONE_INVALID | GNI_FLAG_USE_BROADCAST,
        range: NetRange::new(10, 19),
        zone: Vec::new(),
        multicast: Vec::new(),
        default_zone: Some(zone("Backbone")),
    });
    harness
        .inject
        .send(inbound(&Datagram::new(
            Addr::new(10, 1, 6),
            Addr::new(0, 255, 6),
            6,
            info.encode(),
        )))
        .unwrap();

    wait_online(&router).await;
    let address = router.port(0).unwrap().address().unwrap();
    assert_eq!(address.range, NetRange::new(10, 19));
    {
        let tables = router.tables().read().unwrap();
        assert!(tables
            .zones
            .zones_for(address.network)
            .contains(&zone("Backbone")));
    }

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dead_link_withdraws_its_routes_and_zones() {
    let (router, _ha, hb) = two_port_router("Machine Room", "Finance").await;
    assert!(router.tables().read().unwrap().routes.lookup(2).is_some());

    drop(hb);
    wait_for(|| router.tables().read().unwrap().routes.lookup(2).is_none()).await;
    assert!(router.tables().read().unwrap().routes.lookup(1).is_some());
    assert!(!router
        .tables()
        .read()
        .unwrap()
        .zones
        .has_zones(&NetRange::single(2)));
    assert_eq!(router.port(1).unwrap().state(), PortState::Stopped);

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_settles_every_port() {
    let (router, _ha, _hb) = two_port_router("Machine Room", "Finance").await;
    router.stop().await;
    for port in router.ports() {
        assert_eq!(port.state(), PortState::Stopped);
    }
}
