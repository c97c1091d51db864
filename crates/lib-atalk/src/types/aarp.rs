use bytes::{Buf, BufMut};

use super::{ensure_remaining, EthernetAddr, WireError};

pub const AARP_FUNC_REQUEST: u16 = 1;
pub const AARP_FUNC_RESPONSE: u16 = 2;
pub const AARP_FUNC_PROBE: u16 = 3;

const HARDWARE_TYPE_ETHERNET: u16 = 1;
const PROTOCOL_TYPE_APPLETALK: u16 = 0x809B;
const HARDWARE_ADDR_LEN: u8 = 6;
const PROTOCOL_ADDR_LEN: u8 = 4;

/// An AARP packet mapping (network, node) protocol addresses to Ethernet
/// hardware addresses. Protocol addresses travel as four bytes: a zero pad,
/// the network number and the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AarpPacket {
    pub function: u16,
    pub src_hw: EthernetAddr,
    pub src_proto: (u16, u8),
    pub dst_hw: EthernetAddr,
    pub dst_proto: (u16, u8),
}

impl AarpPacket {
    pub fn request(src_hw: EthernetAddr, src_proto: (u16, u8), target: (u16, u8)) -> Self {
        Self {
            function: AARP_FUNC_REQUEST,
            src_hw,
            src_proto,
            dst_hw: EthernetAddr::default(),
            dst_proto: target,
        }
    }

    pub fn response(
        src_hw: EthernetAddr,
        src_proto: (u16, u8),
        dst_hw: EthernetAddr,
        dst_proto: (u16, u8),
    ) -> Self {
        Self {
            function: AARP_FUNC_RESPONSE,
            src_hw,
            src_proto,
            dst_hw,
            dst_proto,
        }
    }

    /// A probe asserts a tentative address: source and destination protocol
    /// addresses both name the address being claimed.
    pub fn probe(src_hw: EthernetAddr, tentative: (u16, u8)) -> Self {
        Self {
            function: AARP_FUNC_PROBE,
            src_hw,
            src_proto: tentative,
            dst_hw: EthernetAddr::default(),
            dst_proto: tentative,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = buf;
        ensure_remaining!(&mut cur, 28);

        if cur.get_u16() != HARDWARE_TYPE_ETHERNET {
            return Err(WireError::InvalidField("hardware type"));
        }
        if cur.get_u16() != PROTOCOL_TYPE_APPLETALK {
            return Err(WireError::InvalidField("protocol type"));
        }
        if cur.get_u8() != HARDWARE_ADDR_LEN || cur.get_u8() != PROTOCOL_ADDR_LEN {
            return Err(WireError::InvalidField("address length"));
        }

        let function = cur.get_u16();
        if !(AARP_FUNC_REQUEST..=AARP_FUNC_PROBE).contains(&function) {
            return Err(WireError::InvalidField("function"));
        }

        let src_hw = read_hw(&mut cur);
        let src_proto = read_proto(&mut cur);
        let dst_hw = read_hw(&mut cur);
        let dst_proto = read_proto(&mut cur);

        Ok(Self {
            function,
            src_hw,
            src_proto,
            dst_hw,
            dst_proto,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28);
        buf.put_u16(HARDWARE_TYPE_ETHERNET);
        buf.put_u16(PROTOCOL_TYPE_APPLETALK);
        buf.put_u8(HARDWARE_ADDR_LEN);
        buf.put_u8(PROTOCOL_ADDR_LEN);
        buf.put_u16(self.function);
        write_pair(&mut buf, self.src_hw, self.src_proto);
        write_pair(&mut buf, self.dst_hw, self.dst_proto);
        buf
    }
}

fn read_hw(cur: &mut &[u8]) -> EthernetAddr {
    let mut hw = [0u8; 6];
    cur.copy_to_slice(&mut hw);
    EthernetAddr(hw)
}

fn read_proto(cur: &mut &[u8]) -> (u16, u8) {
    let _pad = cur.get_u8();
    let network = cur.get_u16();
    let node = cur.get_u8();
    (network, node)
}

fn write_pair(buf: &mut Vec<u8>, hw: EthernetAddr, proto: (u16, u8)) {
    buf.put_slice(&hw.0);
    buf.put_u8(0);
    buf.put_u16(proto.0);
    buf.put_u8(proto.1);
}
