use bytes::{Buf, BufMut};

use super::{ensure_remaining, NetRange, WireError, ZoneName};

pub const ZIP_FUNC_QUERY: u8 = 1;
pub const ZIP_FUNC_REPLY: u8 = 2;
pub const ZIP_FUNC_GET_NET_INFO: u8 = 5;
pub const ZIP_FUNC_GET_NET_INFO_REPLY: u8 = 6;
pub const ZIP_FUNC_EXTENDED_REPLY: u8 = 8;

/// GetNetInfo reply flag bits.
pub const GNI_FLAG_ZONE_INVALID: u8 = 0x80;
pub const GNI_FLAG_USE_BROADCAST: u8 = 0x40;
pub const GNI_FLAG_ONLY_ONE_ZONE: u8 = 0x20;

/// Zone-list functions carried in ATP user bytes (DDP type 3, socket 6).
pub const ZIP_ATP_GET_MY_ZONE: u8 = 7;
pub const ZIP_ATP_GET_ZONE_LIST: u8 = 8;
pub const ZIP_ATP_GET_LOCAL_ZONES: u8 = 9;

const ATP_CONTROL_TREQ: u8 = 0x40;
const ATP_CONTROL_TRESP: u8 = 0x80;
const ATP_CONTROL_FUNC_MASK: u8 = 0xC0;
const ATP_EOM: u8 = 0x10;

/// A ZIP packet proper (DDP type 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZipPacket {
    /// Ask for the zones of a list of networks.
    Query { networks: Vec<u16> },

    /// Zones for one or more networks; one (network, zone) pair per zone.
    Reply { zones: Vec<(u16, ZoneName)> },

    /// Like `Reply` but for a single network with many zones: `total` is the
    /// complete zone count so the querier can detect the final packet.
    ExtendedReply {
        total: u8,
        zones: Vec<(u16, ZoneName)>,
    },

    /// An end node asking its network's zone information.
    GetNetInfo { zone: Option<ZoneName> },

    GetNetInfoReply(GetNetInfoReply),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetNetInfoReply {
    pub flags: u8,
    pub range: NetRange,

    /// The zone name echoed from the request.
    pub zone: Vec<u8>,

    /// Link multicast address for the zone; empty on media that broadcast.
    pub multicast: Vec<u8>,

    /// Supplied when the requested zone was invalid.
    pub default_zone: Option<ZoneName>,
}

impl ZipPacket {
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = buf;
        ensure_remaining!(&mut cur, 2);
        let function = cur.get_u8();

        match function {
            ZIP_FUNC_QUERY => {
                let count = cur.get_u8() as usize;
                ensure_remaining!(&mut cur, count * 2);
                let networks = (0..count).map(|_| cur.get_u16()).collect();
                Ok(Self::Query { networks })
            }
            ZIP_FUNC_REPLY => {
                let _count = cur.get_u8();
                Ok(Self::Reply {
                    zones: parse_zone_pairs(&mut cur)?,
                })
            }
            ZIP_FUNC_EXTENDED_REPLY => {
                let total = cur.get_u8();
                Ok(Self::ExtendedReply {
                    total,
                    zones: parse_zone_pairs(&mut cur)?,
                })
            }
            ZIP_FUNC_GET_NET_INFO => {
                // flags byte plus two placeholder words mirroring the reply
                ensure_remaining!(&mut cur, 6);
                cur.advance(5);
                let len = cur.get_u8() as usize;
                let zone = if len == 0 {
                    None
                } else {
                    ensure_remaining!(&mut cur, len);
                    Some(ZoneName::new(cur.copy_to_bytes(len).to_vec())?)
                };
                Ok(Self::GetNetInfo { zone })
            }
            ZIP_FUNC_GET_NET_INFO_REPLY => {
                ensure_remaining!(&mut cur, 6);
                let flags = cur.get_u8();
                let first = cur.get_u16();
                let last = cur.get_u16();
                let len = cur.get_u8() as usize;
                ensure_remaining!(&mut cur, len + 1);
                let zone = cur.copy_to_bytes(len).to_vec();
                let mc_len = cur.get_u8() as usize;
                ensure_remaining!(&mut cur, mc_len);
                let multicast = cur.copy_to_bytes(mc_len).to_vec();
                let default_zone = if flags & GNI_FLAG_ZONE_INVALID != 0 {
                    ensure_remaining!(&mut cur, 1);
                    let len = cur.get_u8() as usize;
                    ensure_remaining!(&mut cur, len);
                    Some(ZoneName::new(cur.copy_to_bytes(len).to_vec())?)
                } else {
                    None
                };
                Ok(Self::GetNetInfoReply(GetNetInfoReply {
                    flags,
                    range: NetRange::new(first, last),
                    zone,
                    multicast,
                    default_zone,
                }))
            }
            _ => Err(WireError::InvalidField("function")),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Query { networks } => {
                buf.put_u8(ZIP_FUNC_QUERY);
                buf.put_u8(networks.len() as u8);
                for net in networks {
                    buf.put_u16(*net);
                }
            }
            Self::Reply { zones } => {
                buf.put_u8(ZIP_FUNC_REPLY);
                let mut networks: Vec<u16> = zones.iter().map(|(net, _)| *net).collect();
                networks.dedup();
                buf.put_u8(networks.len() as u8);
                encode_zone_pairs(&mut buf, zones);
            }
            Self::ExtendedReply { total, zones } => {
                buf.put_u8(ZIP_FUNC_EXTENDED_REPLY);
                buf.put_u8(*total);
                encode_zone_pairs(&mut buf, zones);
            }
            Self::GetNetInfo { zone } => {
                buf.put_u8(ZIP_FUNC_GET_NET_INFO);
                buf.put_slice(&[0; 5]);
                match zone {
                    Some(zone) => {
                        buf.put_u8(zone.len() as u8);
                        buf.put_slice(zone.as_bytes());
                    }
                    None => buf.put_u8(0),
                }
            }
            Self::GetNetInfoReply(reply) => {
                buf.put_u8(ZIP_FUNC_GET_NET_INFO_REPLY);
                buf.put_u8(reply.flags);
                buf.put_u16(reply.range.first());
                buf.put_u16(reply.range.last());
                buf.put_u8(reply.zone.len() as u8);
                buf.put_slice(&reply.zone);
                buf.put_u8(reply.multicast.len() as u8);
                buf.put_slice(&reply.multicast);
                if let Some(default_zone) = &reply.default_zone {
                    buf.put_u8(default_zone.len() as u8);
                    buf.put_slice(default_zone.as_bytes());
                }
            }
        }
        buf
    }
}

fn parse_zone_pairs(cur: &mut &[u8]) -> Result<Vec<(u16, ZoneName)>, WireError> {
    let mut zones = Vec::new();
    while cur.has_remaining() {
        ensure_remaining!(cur, 3);
        let network = cur.get_u16();
        let len = cur.get_u8() as usize;
        ensure_remaining!(cur, len);
        zones.push((network, ZoneName::new(cur.copy_to_bytes(len).to_vec())?));
    }
    Ok(zones)
}

fn encode_zone_pairs(buf: &mut Vec<u8>, zones: &[(u16, ZoneName)]) {
    for (network, zone) in zones {
        buf.put_u16(*network);
        buf.put_u8(zone.len() as u8);
        buf.put_slice(zone.as_bytes());
    }
}

/// Wire length of one (network, zone) pair in a reply.
pub fn zone_pair_wire_len(zone: &ZoneName) -> usize {
    3 + zone.len()
}

/// A zone-list request carried in a minimal ATP transaction request: the
/// user bytes hold the function and the 1-based start index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneListRequest {
    pub tid: u16,
    pub function: u8,
    pub start_index: u16,
}

impl ZoneListRequest {
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = buf;
        ensure_remaining!(&mut cur, 8);

        if cur.get_u8() & ATP_CONTROL_FUNC_MASK != ATP_CONTROL_TREQ {
            return Err(WireError::InvalidField("atp control"));
        }
        let _bitmap = cur.get_u8();
        let tid = cur.get_u16();

        let function = cur.get_u8();
        if !(ZIP_ATP_GET_MY_ZONE..=ZIP_ATP_GET_LOCAL_ZONES).contains(&function) {
            return Err(WireError::InvalidField("function"));
        }
        let _pad = cur.get_u8();
        let start_index = cur.get_u16();

        Ok(Self {
            tid,
            function,
            start_index,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.put_u8(ATP_CONTROL_TREQ);
        buf.put_u8(0x01);
        buf.put_u16(self.tid);
        buf.put_u8(self.function);
        buf.put_u8(0);
        buf.put_u16(self.start_index);
        buf
    }
}

/// A zone-list response: single ATP response packet whose user bytes carry
/// the last-packet flag and the number of zones included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneListReply {
    pub tid: u16,
    pub last: bool,
    pub zones: Vec<ZoneName>,
}

impl ZoneListReply {
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = buf;
        ensure_remaining!(&mut cur, 8);

        if cur.get_u8() & ATP_CONTROL_FUNC_MASK != ATP_CONTROL_TRESP {
            return Err(WireError::InvalidField("atp control"));
        }
        let _seq = cur.get_u8();
        let tid = cur.get_u16();
        let last = cur.get_u8() != 0;
        let _pad = cur.get_u8();
        let count = cur.get_u16() as usize;

        let mut zones = Vec::with_capacity(count);
        for _ in 0..count {
            ensure_remaining!(&mut cur, 1);
            let len = cur.get_u8() as usize;
            ensure_remaining!(&mut cur, len);
            zones.push(ZoneName::new(cur.copy_to_bytes(len).to_vec())?);
        }

        Ok(Self { tid, last, zones })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(ATP_CONTROL_TRESP | ATP_EOM);
        buf.put_u8(0);
        buf.put_u16(self.tid);
        buf.put_u8(self.last as u8);
        buf.put_u8(0);
        buf.put_u16(self.zones.len() as u16);
        for zone in &self.zones {
            buf.put_u8(zone.len() as u8);
            buf.put_slice(zone.as_bytes());
        }
        buf
    }
}
