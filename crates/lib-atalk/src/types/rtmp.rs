use bytes::{Buf, BufMut};

use super::{ensure_remaining, NetRange, WireError};

/// Functions carried by an RTMP request (DDP type 5).
pub const RTMP_FUNC_REQUEST: u8 = 1;
pub const RTMP_FUNC_RDR_SPLIT: u8 = 2;
pub const RTMP_FUNC_RDR_FULL: u8 = 3;

/// Router node IDs are always 8 bits on the media this router speaks.
const ID_LENGTH_BITS: u8 = 8;

/// Extended tuples set the high bit of the distance byte and append the
/// range end plus this version marker.
const EXTENDED_FLAG: u8 = 0x80;
const RTMP_VERSION: u8 = 0x82;

const DISTANCE_MASK: u8 = 0x1F;

/// One routing tuple in an RTMP data packet: a network (or network range for
/// extended networks) and its distance in hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtmpTuple {
    pub range: NetRange,
    pub distance: u8,
    pub extended: bool,
}

impl RtmpTuple {
    pub fn single(network: u16, distance: u8) -> Self {
        Self {
            range: NetRange::single(network),
            distance,
            extended: false,
        }
    }

    pub fn extended(range: NetRange, distance: u8) -> Self {
        Self {
            range,
            distance,
            extended: true,
        }
    }
}

/// An RTMP data packet (DDP type 1): the sender's own address followed by
/// routing tuples. Also used for the response to an RTMP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpData {
    pub sender_network: u16,
    pub sender_node: u8,
    pub tuples: Vec<RtmpTuple>,
}

impl RtmpData {
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = buf;
        ensure_remaining!(&mut cur, 4);

        let sender_network = cur.get_u16();
        if cur.get_u8() != ID_LENGTH_BITS {
            return Err(WireError::InvalidField("id length"));
        }
        let sender_node = cur.get_u8();

        let mut tuples = Vec::new();
        while cur.has_remaining() {
            ensure_remaining!(&mut cur, 3);
            let network = cur.get_u16();
            let raw = cur.get_u8();
            if raw & EXTENDED_FLAG != 0 {
                ensure_remaining!(&mut cur, 3);
                let last = cur.get_u16();
                if cur.get_u8() != RTMP_VERSION {
                    return Err(WireError::InvalidField("version"));
                }
                tuples.push(RtmpTuple::extended(
                    NetRange::new(network, last),
                    raw & DISTANCE_MASK,
                ));
            } else {
                tuples.push(RtmpTuple::single(network, raw & DISTANCE_MASK));
            }
        }

        Ok(Self {
            sender_network,
            sender_node,
            tuples,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.tuples.len() * 6);
        buf.put_u16(self.sender_network);
        buf.put_u8(ID_LENGTH_BITS);
        buf.put_u8(self.sender_node);
        for tuple in &self.tuples {
            encode_tuple(&mut buf, tuple);
        }
        buf
    }

    /// Wire size of the 4-byte header alone.
    pub const HEADER_LEN: usize = 4;
}

pub fn encode_tuple(buf: &mut Vec<u8>, tuple: &RtmpTuple) {
    buf.put_u16(tuple.range.first());
    if tuple.extended {
        buf.put_u8(EXTENDED_FLAG | (tuple.distance & DISTANCE_MASK));
        buf.put_u16(tuple.range.last());
        buf.put_u8(RTMP_VERSION);
    } else {
        buf.put_u8(tuple.distance & DISTANCE_MASK);
    }
}

pub fn tuple_wire_len(tuple: &RtmpTuple) -> usize {
    if tuple.extended {
        6
    } else {
        3
    }
}

/// An RTMP request (DDP type 5): a bare function byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtmpRequest {
    pub function: u8,
}

impl RtmpRequest {
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        match buf.first() {
            Some(f @ (RTMP_FUNC_REQUEST..=RTMP_FUNC_RDR_FULL)) => Ok(Self { function: *f }),
            Some(_) => Err(WireError::InvalidField("function")),
            None => Err(WireError::Truncated),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.function]
    }
}
