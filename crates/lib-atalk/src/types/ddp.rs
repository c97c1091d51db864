use bytes::{Buf, BufMut};

use crate::constants;

use super::{ensure_remaining, Addr, WireError};

/// Long-form DDP header length: length word, checksum, networks, nodes,
/// sockets and type.
pub const DDP_LONG_HEADER_LEN: usize = 13;

/// Short-form DDP header length: length word, sockets and type. Networks and
/// nodes come from the LLAP header.
pub const DDP_SHORT_HEADER_LEN: usize = 5;

/// Bits 13-10 of the first header word carry the hop count.
const HOP_SHIFT: u16 = 10;
const LENGTH_MASK: u16 = 0x03FF;

/// A DDP datagram. The router carries datagrams fully decoded; link framing
/// and header form are re-derived on emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub hop_count: u8,
    pub src: Addr,
    pub dst: Addr,
    pub ddp_type: u8,

    /// Whether the datagram carried a checksum on receipt, and will carry a
    /// freshly computed one on emission.
    pub checksummed: bool,

    pub payload: Vec<u8>,
}

impl Datagram {
    pub fn new(src: Addr, dst: Addr, ddp_type: u8, payload: Vec<u8>) -> Self {
        Self {
            hop_count: 0,
            src,
            dst,
            ddp_type,
            checksummed: false,
            payload,
        }
    }

    /// Decode a long-form datagram from a complete DDP buffer.
    pub fn parse_long(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = buf;
        ensure_remaining!(&mut cur, DDP_LONG_HEADER_LEN);

        let first = cur.get_u16();
        let length = (first & LENGTH_MASK) as usize;
        let hop_count = ((first >> HOP_SHIFT) & 0x0F) as u8;
        if length != buf.len() || length < DDP_LONG_HEADER_LEN {
            return Err(WireError::LengthMismatch);
        }

        let checksum = cur.get_u16();
        let dst_network = cur.get_u16();
        let src_network = cur.get_u16();
        let dst_node = cur.get_u8();
        let src_node = cur.get_u8();
        let dst_socket = cur.get_u8();
        let src_socket = cur.get_u8();
        let ddp_type = cur.get_u8();

        if checksum != 0 && checksum != ddp_checksum(&buf[4..]) {
            return Err(WireError::ChecksumMismatch);
        }

        Ok(Self {
            hop_count,
            src: Addr::new(src_network, src_node, src_socket),
            dst: Addr::new(dst_network, dst_node, dst_socket),
            ddp_type,
            checksummed: checksum != 0,
            payload: cur.to_vec(),
        })
    }

    /// Decode a short-form datagram. The addressing that the header elides is
    /// supplied from the LLAP header and the receiving port's network.
    pub fn parse_short(
        buf: &[u8],
        src_node: u8,
        dst_node: u8,
        network: u16,
    ) -> Result<Self, WireError> {
        let mut cur = buf;
        ensure_remaining!(&mut cur, DDP_SHORT_HEADER_LEN);

        let first = cur.get_u16();
        let length = (first & LENGTH_MASK) as usize;
        if length != buf.len() || length < DDP_SHORT_HEADER_LEN {
            return Err(WireError::LengthMismatch);
        }

        let dst_socket = cur.get_u8();
        let src_socket = cur.get_u8();
        let ddp_type = cur.get_u8();

        Ok(Self {
            hop_count: 0,
            src: Addr::new(network, src_node, src_socket),
            dst: Addr::new(network, dst_node, dst_socket),
            ddp_type,
            checksummed: false,
            payload: cur.to_vec(),
        })
    }

    /// Encode with the long-form header, recomputing the checksum when the
    /// datagram carries one.
    pub fn encode_long(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > constants::MAX_DDP_PAYLOAD {
            return Err(WireError::InvalidField("payload length"));
        }

        let length = DDP_LONG_HEADER_LEN + self.payload.len();
        let first = ((self.hop_count as u16 & 0x0F) << HOP_SHIFT) | (length as u16 & LENGTH_MASK);

        let mut buf = Vec::with_capacity(length);
        buf.put_u16(first);
        buf.put_u16(0);
        buf.put_u16(self.dst.network);
        buf.put_u16(self.src.network);
        buf.put_u8(self.dst.node);
        buf.put_u8(self.src.node);
        buf.put_u8(self.dst.socket);
        buf.put_u8(self.src.socket);
        buf.put_u8(self.ddp_type);
        buf.extend_from_slice(&self.payload);

        if self.checksummed {
            let sum = ddp_checksum(&buf[4..]);
            buf[2..4].copy_from_slice(&sum.to_be_bytes());
        }

        Ok(buf)
    }

    /// Encode with the short-form header. Addressing beyond the sockets is
    /// dropped; the caller puts the nodes into the LLAP header.
    pub fn encode_short(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > constants::MAX_DDP_PAYLOAD {
            return Err(WireError::InvalidField("payload length"));
        }

        let length = DDP_SHORT_HEADER_LEN + self.payload.len();
        let mut buf = Vec::with_capacity(length);
        buf.put_u16(length as u16 & LENGTH_MASK);
        buf.put_u8(self.dst.socket);
        buf.put_u8(self.src.socket);
        buf.put_u8(self.ddp_type);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }
}

/// The DDP checksum: starting from zero, add each byte from the destination
/// network field onward into a 16-bit accumulator, rotating the accumulator
/// left by one bit after every byte. An all-zero result is sent as 0xFFFF.
pub fn ddp_checksum(bytes: &[u8]) -> u16 {
    let mut acc: u16 = 0;
    for b in bytes {
        acc = acc.wrapping_add(*b as u16).rotate_left(1);
    }
    if acc == 0 {
        0xFFFF
    } else {
        acc
    }
}
