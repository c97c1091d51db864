use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::constants;
use crate::tables::AddressMappingTable;
use crate::types::{
    AarpPacket, Datagram, ElapFrame, ElapPayload, EthernetAddr, AARP_FUNC_PROBE,
    AARP_FUNC_REQUEST, APPLETALK_BROADCAST_MAC,
};

use super::{InboundFrame, LinkAddr, LinkDest, LinkDriver, LinkError, LinkEvent};

/// Raw Ethernet frame I/O, supplied by the embedding application (a packet
/// socket, a TAP device, a pcap handle). The driver owns everything above
/// it: SNAP framing, AARP and the address mapping table.
#[async_trait]
pub trait EthernetTap: Send + Sync {
    /// Hardware address of the attached interface.
    fn address(&self) -> EthernetAddr;

    /// Receive one whole Ethernet frame.
    async fn recv(&self) -> Result<Vec<u8>, LinkError>;

    /// Transmit one whole Ethernet frame.
    async fn transmit(&self, frame: &[u8]) -> Result<(), LinkError>;
}

/// EtherTalk: DDP over 802.3 with the 802.2 LLC/SNAP encapsulation, plus
/// AARP for protocol-to-hardware address resolution.
pub struct EthertalkDriver {
    tap: Box<dyn EthernetTap>,
    amt: Mutex<AddressMappingTable>,
    bound: Mutex<Option<(u16, u8)>>,
}

impl EthertalkDriver {
    pub fn new(tap: Box<dyn EthernetTap>) -> Self {
        Self {
            tap,
            amt: Mutex::new(AddressMappingTable::new()),
            bound: Mutex::new(None),
        }
    }

    fn bound_addr(&self) -> Option<(u16, u8)> {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn glean(&self, proto: (u16, u8), hw: EthernetAddr) {
        if proto.1 != 0 {
            self.amt
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(proto, hw, Instant::now());
        }
    }

    async fn send_aarp(&self, dst: EthernetAddr, packet: AarpPacket) -> Result<(), LinkError> {
        let frame = ElapFrame {
            dst,
            src: self.tap.address(),
            payload: ElapPayload::Aarp(packet),
        };
        self.tap.transmit(&frame.encode()).await
    }
}

#[async_trait]
impl LinkDriver for EthertalkDriver {
    fn kind(&self) -> &'static str {
        "ethertalk"
    }

    fn is_extended(&self) -> bool {
        true
    }

    fn max_payload(&self) -> usize {
        constants::MAX_LINK_PAYLOAD
    }

    async fn bind(&self, network: u16, node: u8) {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = Some((network, node));
    }

    async fn recv(&self) -> Result<LinkEvent, LinkError> {
        loop {
            let raw = self.tap.recv().await?;
            let frame = match ElapFrame::parse(&raw) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(err) => {
                    debug!(%err, "bad ethernet frame");
                    continue;
                }
            };

            match frame.payload {
                ElapPayload::Aarp(pkt) => {
                    self.glean(pkt.src_proto, pkt.src_hw);

                    let ours = self.bound_addr();
                    let defended = match pkt.function {
                        AARP_FUNC_REQUEST | AARP_FUNC_PROBE => {
                            ours.is_some() && Some(pkt.dst_proto) == ours
                        }
                        _ => false,
                    };
                    if defended {
                        // `ours` checked above.
                        if let Some(ours) = ours {
                            let response = AarpPacket::response(
                                self.tap.address(),
                                ours,
                                pkt.src_hw,
                                pkt.src_proto,
                            );
                            self.send_aarp(pkt.src_hw, response).await?;
                        }
                    }

                    return Ok(LinkEvent::Claimed {
                        network: pkt.src_proto.0,
                        node: pkt.src_proto.1,
                    });
                }
                ElapPayload::AppleTalk(ddp) => {
                    // Glean the sender's mapping from the long-form header.
                    if ddp.len() >= crate::types::DDP_LONG_HEADER_LEN {
                        let network = u16::from_be_bytes([ddp[6], ddp[7]]);
                        let node = ddp[9];
                        self.glean((network, node), frame.src);
                    }
                    return Ok(LinkEvent::Inbound(InboundFrame {
                        ddp,
                        llap: None,
                        src: LinkAddr::Mac(frame.src),
                    }));
                }
            }
        }
    }

    async fn probe(&self, network: u16, node: u8) -> Result<(), LinkError> {
        let probe = AarpPacket::probe(self.tap.address(), (network, node));
        self.send_aarp(APPLETALK_BROADCAST_MAC, probe).await
    }

    async fn send_ddp(&self, datagram: &Datagram, dest: LinkDest) -> Result<(), LinkError> {
        let ddp = datagram
            .encode_long()
            .map_err(|_| LinkError::FrameTooLarge)?;
        if ddp.len() > self.max_payload() {
            return Err(LinkError::FrameTooLarge);
        }

        let dst_hw = match dest {
            LinkDest::Broadcast => APPLETALK_BROADCAST_MAC,
            LinkDest::Unicast { node, .. } if node == constants::BROADCAST_NODE => {
                APPLETALK_BROADCAST_MAC
            }
            LinkDest::Unicast { network, node } => {
                let hit = self
                    .amt
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .lookup((network, node), Instant::now());
                match hit {
                    Some(hw) => hw,
                    None => {
                        // Ask and drop; the upper layers retransmit.
                        let source = self.bound_addr().unwrap_or((0, 0));
                        let request =
                            AarpPacket::request(self.tap.address(), source, (network, node));
                        self.send_aarp(APPLETALK_BROADCAST_MAC, request).await?;
                        return Err(LinkError::UnresolvedAddress { network, node });
                    }
                }
            }
        };

        let frame = ElapFrame {
            dst: dst_hw,
            src: self.tap.address(),
            payload: ElapPayload::AppleTalk(ddp),
        };
        self.tap.transmit(&frame.encode()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::types::AARP_FUNC_RESPONSE;

    #[derive(Clone)]
    struct FakeTap(std::sync::Arc<TapState>);

    struct TapState {
        mac: EthernetAddr,
        inbound: StdMutex<VecDeque<Vec<u8>>>,
        outbound: StdMutex<Vec<Vec<u8>>>,
    }

    impl FakeTap {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            Self(std::sync::Arc::new(TapState {
                mac: EthernetAddr([2, 0, 0, 0, 0, 1]),
                inbound: StdMutex::new(frames.into()),
                outbound: StdMutex::new(Vec::new()),
            }))
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.0.outbound.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EthernetTap for FakeTap {
        fn address(&self) -> EthernetAddr {
            self.0.mac
        }

        async fn recv(&self) -> Result<Vec<u8>, LinkError> {
            self.0
                .inbound
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(LinkError::Closed)
        }

        async fn transmit(&self, frame: &[u8]) -> Result<(), LinkError> {
            self.0.outbound.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    fn datagram() -> Datagram {
        Datagram::new(
            crate::types::Addr::new(10, 1, 1),
            crate::types::Addr::new(10, 42, 4),
            4,
            vec![1],
        )
    }

    #[tokio::test]
    async fn unresolved_unicast_asks_aarp_and_drops() {
        let tap = FakeTap::new(Vec::new());
        let driver = EthertalkDriver::new(Box::new(tap));
        driver.bind(10, 1).await;

        let err = driver
            .send_ddp(
                &datagram(),
                LinkDest::Unicast {
                    network: 10,
                    node: 42,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::UnresolvedAddress {
                network: 10,
                node: 42
            }
        ));
    }

    #[tokio::test]
    async fn gleaned_mapping_resolves_unicast() {
        let peer_mac = EthernetAddr([2, 0, 0, 0, 0, 9]);
        let aarp = ElapFrame {
            dst: APPLETALK_BROADCAST_MAC,
            src: peer_mac,
            payload: ElapPayload::Aarp(AarpPacket {
                function: AARP_FUNC_RESPONSE,
                src_hw: peer_mac,
                src_proto: (10, 42),
                dst_hw: EthernetAddr([2, 0, 0, 0, 0, 1]),
                dst_proto: (10, 1),
            }),
        };

        let tap = FakeTap::new(vec![aarp.encode()]);
        let driver = EthertalkDriver::new(Box::new(tap));
        driver.bind(10, 1).await;

        let event = driver.recv().await.unwrap();
        assert_eq!(
            event,
            LinkEvent::Claimed {
                network: 10,
                node: 42
            }
        );

        driver
            .send_ddp(
                &datagram(),
                LinkDest::Unicast {
                    network: 10,
                    node: 42,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn probes_for_our_address_are_defended() {
        let prober_mac = EthernetAddr([2, 0, 0, 0, 0, 9]);
        let probe = ElapFrame {
            dst: APPLETALK_BROADCAST_MAC,
            src: prober_mac,
            payload: ElapPayload::Aarp(AarpPacket::probe(prober_mac, (10, 1))),
        };

        let tap = FakeTap::new(vec![probe.encode()]);
        let driver = EthertalkDriver::new(Box::new(tap.clone()));
        driver.bind(10, 1).await;

        let event = driver.recv().await.unwrap();
        assert_eq!(
            event,
            LinkEvent::Claimed {
                network: 10,
                node: 1
            }
        );

        let sent = tap.sent();
        assert_eq!(sent.len(), 1);
        let reply = ElapFrame::parse(&sent[0]).unwrap().unwrap();
        assert_eq!(reply.dst, prober_mac);
        match reply.payload {
            ElapPayload::Aarp(pkt) => {
                assert_eq!(pkt.function, AARP_FUNC_RESPONSE);
                assert_eq!(pkt.src_proto, (10, 1));
                assert_eq!(pkt.dst_proto, (10, 1));
            }
            other => panic!("expected aarp, got {other:?}"),
        }
    }
}
