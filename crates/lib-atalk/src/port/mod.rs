use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::constants;
use crate::link::{InboundFrame, LinkDest, LinkDriver, LinkError, LinkEvent};
use crate::constants::{DDP_TYPE_RTMP_DATA, DDP_TYPE_ZIP};
use crate::types::{
    is_valid_network, Addr, Datagram, NetRange, RtmpData, WireError, ZipPacket, ZoneName,
};

mod state;

pub use state::*;

/// Operator-provided identity for a seeded port. Non-seeded ports discover
/// their network from peers instead.
#[derive(Debug, Clone)]
pub struct PortSeed {
    pub range: NetRange,
    pub zones: Vec<ZoneName>,
    pub default_zone: Option<ZoneName>,
}

#[derive(Debug, Default, Clone)]
pub struct PortConfig {
    pub seed: Option<PortSeed>,
}

#[derive(Debug, Error)]
pub enum PortError {
    /// Every probed candidate node collided.
    #[error("all probed node addresses are in use")]
    AddressInUse,

    #[error("network discovery timed out")]
    StartupTimeout,

    #[error(transparent)]
    State(#[from] PortStateError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Per-port drop and traffic counters.
#[derive(Debug, Default)]
pub struct PortStats {
    in_datagrams: AtomicU64,
    out_datagrams: AtomicU64,
    malformed: AtomicU64,
    checksum_mismatch: AtomicU64,
    transmit_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStatsSnapshot {
    pub in_datagrams: u64,
    pub out_datagrams: u64,
    pub malformed: u64,
    pub checksum_mismatch: u64,
    pub transmit_failures: u64,
}

impl PortStats {
    pub fn snapshot(&self) -> PortStatsSnapshot {
        PortStatsSnapshot {
            in_datagrams: self.in_datagrams.load(Ordering::Relaxed),
            out_datagrams: self.out_datagrams.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            checksum_mismatch: self.checksum_mismatch.load(Ordering::Relaxed),
            transmit_failures: self.transmit_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn count_decode_error(&self, err: &WireError) {
        match err {
            WireError::ChecksumMismatch => self.checksum_mismatch.fetch_add(1, Ordering::Relaxed),
            _ => self.malformed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// The address a port holds once its acquisition finished: the network
/// range it serves, the specific network its node lives on, and the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAddress {
    pub range: NetRange,
    pub network: u16,
    pub node: u8,
}

/// One router port: a link driver plus the address-acquisition state
/// machine and per-port counters. The router drives `acquire` once on
/// start, then pumps `recv` in the port's read loop.
pub struct Port {
    id: usize,
    driver: Box<dyn LinkDriver>,
    seed: Option<PortSeed>,
    state: Mutex<PortState>,
    address: Mutex<Option<PortAddress>>,

    /// Zone name gleaned from a GetNetInfo reply during discovery.
    discovered_zone: Mutex<Option<ZoneName>>,

    pub stats: PortStats,
}

impl Port {
    pub(crate) fn new(id: usize, driver: Box<dyn LinkDriver>, config: PortConfig) -> Self {
        Self {
            id,
            driver,
            seed: config.seed,
            state: Mutex::new(PortState::Unstarted),
            address: Mutex::new(None),
            discovered_zone: Mutex::new(None),
            stats: PortStats::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        self.driver.kind()
    }

    pub fn is_extended(&self) -> bool {
        self.driver.is_extended()
    }

    pub fn seed(&self) -> Option<&PortSeed> {
        self.seed.as_ref()
    }

    pub fn state(&self) -> PortState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_online(&self) -> bool {
        self.state() == PortState::Online
    }

    pub fn address(&self) -> Option<PortAddress> {
        *self.address.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn network_range(&self) -> Option<NetRange> {
        self.address().map(|a| a.range)
    }

    pub fn node(&self) -> Option<u8> {
        self.address().map(|a| a.node)
    }

    /// Our full address on this port, at the given socket.
    pub fn addr(&self, socket: u8) -> Option<Addr> {
        self.address().map(|a| Addr::new(a.network, a.node, socket))
    }

    /// Whether this port's network range covers the given network.
    pub fn serves(&self, network: u16) -> bool {
        self.address()
            .map(|a| a.range.contains(network))
            .unwrap_or(false)
    }

    /// Zone learned from the network during a non-seeded start.
    pub fn discovered_zone(&self) -> Option<ZoneName> {
        self.discovered_zone
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn transition(&self, next: PortState) -> Result<(), PortStateError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.can_transition_to(next) {
            return Err(PortStateError::new(*state, next));
        }
        *state = next;
        Ok(())
    }

    /// Unconditional transition to `Stopped`.
    pub(crate) fn mark_stopped(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = PortState::Stopped;
    }

    pub(crate) async fn recv(&self) -> Result<LinkEvent, LinkError> {
        self.driver.recv().await
    }

    /// Decode a received frame into a datagram. Short-form frames borrow
    /// the port's current network for the elided addressing.
    pub(crate) fn decode(&self, frame: &InboundFrame) -> Result<Datagram, WireError> {
        let datagram = match frame.llap {
            Some((src_node, dst_node)) => {
                let network = self.address().map(|a| a.network).unwrap_or(0);
                Datagram::parse_short(&frame.ddp, src_node, dst_node, network)?
            }
            None => Datagram::parse_long(&frame.ddp)?,
        };
        self.stats.in_datagrams.fetch_add(1, Ordering::Relaxed);
        Ok(datagram)
    }

    /// Transmit a datagram toward a next hop on this link.
    pub async fn send(&self, datagram: &Datagram, next_hop: (u16, u8)) -> Result<(), LinkError> {
        let dest = if next_hop.1 == constants::BROADCAST_NODE {
            LinkDest::Broadcast
        } else {
            LinkDest::Unicast {
                network: next_hop.0,
                node: next_hop.1,
            }
        };
        self.transmit(datagram, dest).await
    }

    /// Transmit a datagram to the link broadcast address.
    pub async fn broadcast(&self, datagram: &Datagram) -> Result<(), LinkError> {
        self.transmit(datagram, LinkDest::Broadcast).await
    }

    async fn transmit(&self, datagram: &Datagram, dest: LinkDest) -> Result<(), LinkError> {
        match self.driver.send_ddp(datagram, dest).await {
            Ok(()) => {
                self.stats.out_datagrams.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.stats.transmit_failures.fetch_add(1, Ordering::Relaxed);
                debug!(port = self.id, %err, "transmit failed");
                Err(err)
            }
        }
    }

    /// Run the address-acquisition state machine to `Online`.
    pub(crate) async fn acquire(&self) -> Result<(), PortError> {
        self.transition(PortState::AcquiringNetworkRange)?;
        let range = match &self.seed {
            Some(seed) => seed.range,
            None => self.discover_network().await?,
        };

        self.transition(PortState::AcquiringNodeAddress)?;
        let (network, node) = self.acquire_node(range).await?;

        self.driver.bind(network, node).await;
        *self.address.lock().unwrap_or_else(|e| e.into_inner()) = Some(PortAddress {
            range,
            network,
            node,
        });
        self.transition(PortState::Online)?;
        info!(
            port = self.id,
            kind = self.kind(),
            %range,
            network,
            node,
            "port online"
        );
        Ok(())
    }

    /// Broadcast GetNetInfo from a startup address and wait for any RTMP or
    /// ZIP traffic that reveals the network, for at most a minute.
    async fn discover_network(&self) -> Result<NetRange, PortError> {
        let (startup_network, startup_node) = random_startup_address();
        debug!(
            port = self.id,
            startup_network, startup_node, "discovering network"
        );

        let deadline =
            Instant::now() + Duration::from_secs(constants::NETWORK_DISCOVERY_TIMEOUT_SECS);
        let retry = Duration::from_secs(constants::NETWORK_DISCOVERY_RETRY_SECS);
        let mut next_request = Instant::now();

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(PortError::StartupTimeout);
            }
            if now >= next_request {
                let request = Datagram::new(
                    Addr::new(startup_network, startup_node, constants::ZIP_SOCKET),
                    Addr::new(0, constants::BROADCAST_NODE, constants::ZIP_SOCKET),
                    DDP_TYPE_ZIP,
                    ZipPacket::GetNetInfo { zone: None }.encode(),
                );
                if let Err(err) = self.driver.send_ddp(&request, LinkDest::Broadcast).await {
                    debug!(port = self.id, %err, "get-net-info broadcast failed");
                }
                next_request = now + retry;
            }

            let wake = next_request.min(deadline);
            tokio::select! {
                _ = sleep_until(wake) => {}
                event = self.driver.recv() => match event {
                    Ok(LinkEvent::Inbound(frame)) => {
                        if let Some((range, zone)) = self.network_evidence(&frame) {
                            if zone.is_some() {
                                *self
                                    .discovered_zone
                                    .lock()
                                    .unwrap_or_else(|e| e.into_inner()) = zone;
                            }
                            return Ok(range);
                        }
                    }
                    Ok(LinkEvent::Claimed { .. }) => {}
                    Err(LinkError::Closed) => return Err(PortError::Link(LinkError::Closed)),
                    Err(err) => debug!(port = self.id, %err, "receive error during discovery"),
                },
            }
        }
    }

    /// Extract a network range (and possibly a zone) from a frame seen
    /// while discovering.
    fn network_evidence(&self, frame: &InboundFrame) -> Option<(NetRange, Option<ZoneName>)> {
        let datagram = self.decode(frame).ok()?;
        match datagram.ddp_type {
            DDP_TYPE_ZIP => match ZipPacket::parse(&datagram.payload).ok()? {
                ZipPacket::GetNetInfoReply(reply) if is_valid_network(reply.range.first()) => {
                    let zone = reply
                        .default_zone
                        .or_else(|| ZoneName::new(reply.zone.clone()).ok());
                    Some((reply.range, zone))
                }
                _ => None,
            },
            DDP_TYPE_RTMP_DATA => {
                let data = RtmpData::parse(&datagram.payload).ok()?;
                if !is_valid_network(data.sender_network) {
                    return None;
                }
                // An extended tuple naming the sender's own network carries
                // the full range; otherwise the header's network stands
                // alone.
                let range = data
                    .tuples
                    .iter()
                    .find(|t| t.extended && t.range.contains(data.sender_network))
                    .map(|t| t.range)
                    .unwrap_or_else(|| NetRange::single(data.sender_network));
                Some((range, None))
            }
            _ => None,
        }
    }

    /// Probe random candidate node numbers until one goes unclaimed.
    async fn acquire_node(&self, range: NetRange) -> Result<(u16, u8), PortError> {
        let network = random_network_in(range);
        for _ in 0..constants::MAX_NODE_CANDIDATES {
            let candidate = random_candidate_node();
            if self.probe_candidate(network, candidate).await? {
                return Ok((network, candidate));
            }
            debug!(
                port = self.id,
                network, candidate, "node address collision, retrying"
            );
        }
        warn!(port = self.id, "node address space exhausted");
        Err(PortError::AddressInUse)
    }

    /// Probe one candidate. True means the address went unclaimed through
    /// every probe round.
    async fn probe_candidate(&self, network: u16, candidate: u8) -> Result<bool, PortError> {
        for _ in 0..constants::PROBE_ATTEMPTS {
            self.driver.probe(network, candidate).await?;
            let deadline =
                Instant::now() + Duration::from_millis(constants::PROBE_INTERVAL_MS);
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    event = self.driver.recv() => match event {
                        Ok(event) => {
                            if self.claims_candidate(&event, network, candidate) {
                                return Ok(false);
                            }
                        }
                        Err(LinkError::Closed) => {
                            return Err(PortError::Link(LinkError::Closed))
                        }
                        Err(err) => debug!(port = self.id, %err, "receive error during probe"),
                    },
                }
            }
        }
        Ok(true)
    }

    /// Whether link evidence says the candidate address is taken.
    fn claims_candidate(&self, event: &LinkEvent, network: u16, candidate: u8) -> bool {
        match event {
            LinkEvent::Claimed {
                network: claimed_network,
                node,
            } => *node == candidate && (*claimed_network == 0 || *claimed_network == network),
            LinkEvent::Inbound(frame) => match frame.llap {
                // Any traffic sourced from the candidate node proves it live.
                Some((src_node, _)) => src_node == candidate,
                None => Datagram::parse_long(&frame.ddp)
                    .map(|dg| dg.src.node == candidate && dg.src.network == network)
                    .unwrap_or(false),
            },
        }
    }
}

fn random_startup_address() -> (u16, u8) {
    let mut rng = rand::thread_rng();
    (
        rng.gen_range(constants::STARTUP_RANGE_FIRST..=constants::STARTUP_RANGE_LAST),
        rng.gen_range(1..=254),
    )
}

fn random_candidate_node() -> u8 {
    // User range by policy; routers are content anywhere in 1-127.
    rand::thread_rng().gen_range(1..=127)
}

fn random_network_in(range: NetRange) -> u16 {
    if range.is_single() {
        range.first()
    } else {
        rand::thread_rng().gen_range(range.first()..=range.last())
    }
}
