use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::constants;
use crate::types::{
    Datagram, LlapFrame, LLAP_TYPE_ACK, LLAP_TYPE_DDP_LONG, LLAP_TYPE_DDP_SHORT, LLAP_TYPE_ENQ,
};

use super::{InboundFrame, LinkAddr, LinkDest, LinkDriver, LinkError, LinkEvent};

pub const LTOUDP_PORT: u16 = 1954;
pub const LTOUDP_GROUP: Ipv4Addr = Ipv4Addr::new(239, 192, 76, 84);

/// LocalTalk carried over UDP multicast: every UDP payload is one leading
/// source-node byte followed by a complete LLAP frame. Our own multicasts
/// come back and are filtered by that leading byte.
pub struct LtoudpDriver {
    socket: UdpSocket,
    group: SocketAddrV4,

    /// The node bound on this port, once acquired.
    bound: Mutex<Option<u8>>,
}

impl LtoudpDriver {
    /// Join the LToUDP multicast group on the given local interface.
    pub async fn open(interface: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], LTOUDP_PORT))).await?;
        socket.join_multicast_v4(LTOUDP_GROUP, interface)?;
        // Looped-back copies of our own frames would race address probing.
        socket.set_multicast_loop_v4(false)?;
        Ok(Self {
            socket,
            group: SocketAddrV4::new(LTOUDP_GROUP, LTOUDP_PORT),
            bound: Mutex::new(None),
        })
    }

    fn bound_node(&self) -> Option<u8> {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn transmit(&self, src_node: u8, frame: &LlapFrame) -> Result<(), LinkError> {
        let mut payload = Vec::with_capacity(4 + frame.payload.len());
        payload.push(src_node);
        payload.extend_from_slice(&frame.encode());
        self.socket.send_to(&payload, self.group).await?;
        Ok(())
    }
}

#[async_trait]
impl LinkDriver for LtoudpDriver {
    fn kind(&self) -> &'static str {
        "ltoudp"
    }

    fn max_payload(&self) -> usize {
        constants::MAX_LINK_PAYLOAD
    }

    async fn bind(&self, _network: u16, node: u8) {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = Some(node);
    }

    async fn recv(&self) -> Result<LinkEvent, LinkError> {
        let mut buf = [0u8; 1 + 3 + constants::MAX_LINK_PAYLOAD];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len < 4 {
                trace!(len, %from, "runt ltoudp packet");
                continue;
            }

            let tag = buf[0];
            if Some(tag) == self.bound_node() {
                // One of our own multicasts came back around.
                continue;
            }

            let frame = match LlapFrame::parse(&buf[1..len]) {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(%err, "bad llap frame");
                    continue;
                }
            };

            match frame.kind {
                LLAP_TYPE_DDP_SHORT => {
                    return Ok(LinkEvent::Inbound(InboundFrame {
                        ddp: frame.payload,
                        llap: Some((frame.src, frame.dst)),
                        src: LinkAddr::Node(frame.src),
                    }))
                }
                LLAP_TYPE_DDP_LONG => {
                    return Ok(LinkEvent::Inbound(InboundFrame {
                        ddp: frame.payload,
                        llap: None,
                        src: LinkAddr::Node(frame.src),
                    }))
                }
                LLAP_TYPE_ENQ => {
                    // Defend our own node number.
                    if Some(frame.dst) == self.bound_node() {
                        let ack = LlapFrame::control(frame.src, frame.dst, LLAP_TYPE_ACK);
                        let node = frame.dst;
                        self.transmit(node, &ack).await?;
                    }
                    return Ok(LinkEvent::Claimed {
                        network: 0,
                        node: frame.src,
                    });
                }
                LLAP_TYPE_ACK => {
                    return Ok(LinkEvent::Claimed {
                        network: 0,
                        node: frame.src,
                    })
                }
                other => {
                    trace!(kind = other, "unhandled llap frame type");
                    continue;
                }
            }
        }
    }

    async fn probe(&self, _network: u16, node: u8) -> Result<(), LinkError> {
        let enq = LlapFrame::control(node, node, LLAP_TYPE_ENQ);
        self.transmit(node, &enq).await
    }

    async fn send_ddp(&self, datagram: &Datagram, dest: LinkDest) -> Result<(), LinkError> {
        let ddp = datagram
            .encode_long()
            .map_err(|_| LinkError::FrameTooLarge)?;
        if ddp.len() > self.max_payload() {
            return Err(LinkError::FrameTooLarge);
        }

        let dst_node = match dest {
            LinkDest::Unicast { node, .. } if node != constants::BROADCAST_NODE => node,
            _ => constants::BROADCAST_NODE,
        };
        let src_node = self.bound_node().unwrap_or(datagram.src.node);
        let frame = LlapFrame::data(dst_node, src_node, LLAP_TYPE_DDP_LONG, ddp);
        self.transmit(src_node, &frame).await
    }
}
