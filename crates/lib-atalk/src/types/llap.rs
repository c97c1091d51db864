use crate::constants;

use super::WireError;

/// LLAP frame types carrying DDP.
pub const LLAP_TYPE_DDP_SHORT: u8 = 1;
pub const LLAP_TYPE_DDP_LONG: u8 = 2;

/// LLAP control frames used for node address probing: a node enquires about
/// the address it wants, the current holder acknowledges to defend it.
pub const LLAP_TYPE_ENQ: u8 = 0x81;
pub const LLAP_TYPE_ACK: u8 = 0x82;

/// A LocalTalk link-layer frame: destination node, source node, frame type
/// and (for data frames) the DDP bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlapFrame {
    pub dst: u8,
    pub src: u8,
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl LlapFrame {
    pub fn data(dst: u8, src: u8, kind: u8, payload: Vec<u8>) -> Self {
        Self {
            dst,
            src,
            kind,
            payload,
        }
    }

    /// A payload-less control frame (ENQ/ACK).
    pub fn control(dst: u8, src: u8, kind: u8) -> Self {
        Self {
            dst,
            src,
            kind,
            payload: Vec::new(),
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind & 0x80 != 0
    }

    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 3 {
            return Err(WireError::Truncated);
        }
        if buf.len() > 3 + constants::MAX_LINK_PAYLOAD {
            return Err(WireError::InvalidField("frame length"));
        }
        Ok(Self {
            dst: buf[0],
            src: buf[1],
            kind: buf[2],
            payload: buf[3..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.payload.len());
        buf.push(self.dst);
        buf.push(self.src);
        buf.push(self.kind);
        buf.extend_from_slice(&self.payload);
        buf
    }
}
