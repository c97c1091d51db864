use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Datagram, EthernetAddr};

mod ethertalk;
mod ltoudp;
mod tashtalk;

pub use ethertalk::*;
pub use ltoudp::*;
pub use tashtalk::*;

/// A link-layer address: a LocalTalk node number or an Ethernet hardware
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAddr {
    Node(u8),
    Mac(EthernetAddr),
}

/// Where an outbound datagram goes on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDest {
    /// The next hop's protocol address; the driver derives the link address.
    Unicast { network: u16, node: u8 },
    Broadcast,
}

/// A received DDP-bearing frame, stripped of link framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// The DDP bytes, starting at the DDP header.
    pub ddp: Vec<u8>,

    /// `Some((src node, dst node))` when the frame used the short DDP form,
    /// which elides addressing; `None` for long-form frames.
    pub llap: Option<(u8, u8)>,

    pub src: LinkAddr,
}

/// What a link driver hands upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Inbound(InboundFrame),

    /// Link-level evidence that some node holds an address: probe replies,
    /// address enquiries, AARP traffic. Drives collision detection during
    /// address acquisition. `network` is 0 on media that only know nodes.
    Claimed { network: u16, node: u8 },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link closed")]
    Closed,

    #[error("frame exceeds the link payload limit")]
    FrameTooLarge,

    #[error("no hardware address known for {network}.{node}")]
    UnresolvedAddress { network: u16, node: u8 },
}

/// The contract every link driver satisfies: an asynchronous stream of
/// received frames, datagram transmission toward a link destination, and
/// the link-level plumbing for address probing.
///
/// Drivers own their medium's quirks: LLAP control frames and self-broadcast
/// filtering on LocalTalk media, SNAP framing and AARP on Ethernet.
#[async_trait]
pub trait LinkDriver: Send + Sync {
    /// Short tag for logs ("ltoudp", "tashtalk", "ethertalk").
    fn kind(&self) -> &'static str;

    /// Whether the attached medium carries an extended network.
    fn is_extended(&self) -> bool {
        false
    }

    /// Largest DDP buffer (header plus payload) this link can carry.
    fn max_payload(&self) -> usize;

    /// Tell the driver the address its port bound, so it can filter its own
    /// broadcasts, answer enquiries and defend the address.
    async fn bind(&self, network: u16, node: u8);

    /// Wait for the next link event.
    async fn recv(&self) -> Result<LinkEvent, LinkError>;

    /// Emit one probe asserting a tentative address claim.
    async fn probe(&self, network: u16, node: u8) -> Result<(), LinkError>;

    /// Encode and transmit a datagram toward the destination.
    async fn send_ddp(&self, datagram: &Datagram, dest: LinkDest) -> Result<(), LinkError>;
}
