use std::fmt::Display;

use bytes::BufMut;

use super::{AarpPacket, WireError};

/// The AppleTalk broadcast/multicast MAC address.
pub const APPLETALK_BROADCAST_MAC: EthernetAddr =
    EthernetAddr([0x09, 0x00, 0x07, 0xFF, 0xFF, 0xFF]);

/// 802.2 LLC + SNAP prefix for AppleTalk datagrams (EtherType 0x809B).
pub const SNAP_APPLETALK: [u8; 8] = [0xAA, 0xAA, 0x03, 0x08, 0x00, 0x07, 0x80, 0x9B];

/// 802.2 LLC + SNAP prefix for AARP (EtherType 0x80F3).
pub const SNAP_AARP: [u8; 8] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x80, 0xF3];

/// Minimum 802.3 frame length on the wire (without FCS); short frames are
/// zero-padded and trimmed back via the length field.
const MIN_FRAME_LEN: usize = 60;

/// A 48-bit Ethernet address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthernetAddr(pub [u8; 6]);

impl Display for EthernetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl EthernetAddr {
    pub fn is_broadcast(&self) -> bool {
        *self == APPLETALK_BROADCAST_MAC || self.0 == [0xFF; 6]
    }
}

/// Payload of an EtherTalk frame after the SNAP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElapPayload {
    /// A DDP datagram, still encoded.
    AppleTalk(Vec<u8>),
    Aarp(AarpPacket),
}

/// An IEEE 802.3 frame with the 802.2 LLC/SNAP encapsulation EtherTalk uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElapFrame {
    pub dst: EthernetAddr,
    pub src: EthernetAddr,
    pub payload: ElapPayload,
}

impl ElapFrame {
    /// Decode a raw Ethernet frame. Returns `Ok(None)` for frames that are
    /// not AppleTalk or AARP (foreign SNAP protocols, plain EtherType II).
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, WireError> {
        if buf.len() < 14 + 8 {
            return Err(WireError::Truncated);
        }

        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&buf[0..6]);
        src.copy_from_slice(&buf[6..12]);

        let length = u16::from_be_bytes([buf[12], buf[13]]) as usize;
        // An EtherType II frame (length field > 1500) is not 802.3/SNAP.
        if length > 1500 {
            return Ok(None);
        }
        if buf.len() < 14 + length || length < 8 {
            return Err(WireError::Truncated);
        }

        // Trim the zero padding that short frames carry.
        let body = &buf[14..14 + length];
        let snap = &body[..8];
        let inner = &body[8..];

        if snap == SNAP_APPLETALK {
            Ok(Some(Self {
                dst: EthernetAddr(dst),
                src: EthernetAddr(src),
                payload: ElapPayload::AppleTalk(inner.to_vec()),
            }))
        } else if snap == SNAP_AARP {
            Ok(Some(Self {
                dst: EthernetAddr(dst),
                src: EthernetAddr(src),
                payload: ElapPayload::Aarp(AarpPacket::parse(inner)?),
            }))
        } else {
            Ok(None)
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (snap, inner) = match &self.payload {
            ElapPayload::AppleTalk(ddp) => (&SNAP_APPLETALK, ddp.clone()),
            ElapPayload::Aarp(pkt) => (&SNAP_AARP, pkt.encode()),
        };

        let length = 8 + inner.len();
        let mut buf = Vec::with_capacity(14 + length);
        buf.put_slice(&self.dst.0);
        buf.put_slice(&self.src.0);
        buf.put_u16(length as u16);
        buf.put_slice(snap);
        buf.put_slice(&inner);
        while buf.len() < MIN_FRAME_LEN {
            buf.push(0);
        }
        buf
    }
}
