use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use atalk::link::{InboundFrame, LinkAddr, LinkDest, LinkDriver, LinkError, LinkEvent};
use atalk::port::{PortConfig, PortSeed};
use atalk::types::{Datagram, NetRange, ZoneName};
use atalk::Router;

/// An in-memory link driver: tests inject link events and observe every
/// transmitted datagram and probe.
pub struct TestLink {
    extended: bool,
    events: AsyncMutex<mpsc::UnboundedReceiver<LinkEvent>>,
    sent: mpsc::UnboundedSender<(Datagram, LinkDest)>,
    probes: mpsc::UnboundedSender<(u16, u8)>,
}

/// The test's side of a [`TestLink`].
pub struct LinkHarness {
    pub inject: mpsc::UnboundedSender<LinkEvent>,
    pub sent: mpsc::UnboundedReceiver<(Datagram, LinkDest)>,
    pub probes: mpsc::UnboundedReceiver<(u16, u8)>,
}

pub fn test_link(extended: bool) -> (TestLink, LinkHarness) {
    let (inject, events) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (probe_tx, probe_rx) = mpsc::unbounded_channel();
    (
        TestLink {
            extended,
            events: AsyncMutex::new(events),
            sent: sent_tx,
            probes: probe_tx,
        },
        LinkHarness {
            inject,
            sent: sent_rx,
            probes: probe_rx,
        },
    )
}

#[async_trait]
impl LinkDriver for TestLink {
    fn kind(&self) -> &'static str {
        "test"
    }

    fn is_extended(&self) -> bool {
        self.extended
    }

    fn max_payload(&self) -> usize {
        600
    }

    async fn bind(&self, _network: u16, _node: u8) {}

    async fn recv(&self) -> Result<LinkEvent, LinkError> {
        self.events
            .lock()
            .await
            .recv()
            .await
            .ok_or(LinkError::Closed)
    }

    async fn probe(&self, network: u16, node: u8) -> Result<(), LinkError> {
        let _ = self.probes.send((network, node));
        Ok(())
    }

    async fn send_ddp(&self, datagram: &Datagram, dest: LinkDest) -> Result<(), LinkError> {
        // A dropped harness receiver behaves like a saturated link.
        let _ = self.sent.send((datagram.clone(), dest));
        Ok(())
    }
}

/// A long-form inbound frame carrying the given datagram.
pub fn inbound(datagram: &Datagram) -> LinkEvent {
    LinkEvent::Inbound(InboundFrame {
        ddp: datagram.encode_long().expect("encodable datagram"),
        llap: None,
        src: LinkAddr::Node(datagram.src.node),
    })
}

pub fn zone(name: &str) -> ZoneName {
    ZoneName::new(name.as_bytes().to_vec()).expect("valid zone")
}

/// A port seeded with a single network and one zone.
pub fn seeded(network: u16, zone_name: &str) -> PortConfig {
    PortConfig {
        seed: Some(PortSeed {
            range: NetRange::single(network),
            zones: vec![zone(zone_name)],
            default_zone: Some(zone(zone_name)),
        }),
    }
}

/// Wait until every port is online. Runs under a paused clock, so the
/// probe timers burn no real time.
pub async fn wait_online(router: &Router) {
    wait_for(|| router.ports().iter().all(|p| p.is_online())).await;
}

pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// The next transmitted frame matching the predicate, skipping periodic
/// chatter.
pub async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<(Datagram, LinkDest)>,
    mut predicate: impl FnMut(&Datagram, &LinkDest) -> bool,
) -> (Datagram, LinkDest) {
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            let (datagram, dest) = rx.recv().await.expect("link closed");
            if predicate(&datagram, &dest) {
                return (datagram, dest);
            }
        }
    })
    .await
    .expect("expected frame never transmitted")
}
