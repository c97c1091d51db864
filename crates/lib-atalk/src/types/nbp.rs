use bytes::{Buf, BufMut};

use super::{ensure_remaining, ucase, Addr, WireError};

pub const NBP_FUNC_BRRQ: u8 = 1;
pub const NBP_FUNC_LKUP: u8 = 2;
pub const NBP_FUNC_LKUP_REPLY: u8 = 3;
pub const NBP_FUNC_FWDREQ: u8 = 4;

/// The wildcard matching any object or type.
pub const NBP_WILDCARD: u8 = b'=';

const MAX_FIELD_LEN: usize = 32;

/// An NBP entity name: object, type and zone, each 0-32 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityName {
    pub object: Vec<u8>,
    pub typ: Vec<u8>,
    pub zone: Vec<u8>,
}

impl EntityName {
    pub fn new(
        object: impl Into<Vec<u8>>,
        typ: impl Into<Vec<u8>>,
        zone: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            object: object.into(),
            typ: typ.into(),
            zone: zone.into(),
        }
    }

    /// Whether this (possibly wildcarded) name matches a concrete name.
    /// Comparison is case-insensitive; zone is compared but not wildcarded
    /// beyond the empty-means-local convention handled by the caller.
    pub fn matches(&self, concrete: &EntityName) -> bool {
        field_matches(&self.object, &concrete.object)
            && field_matches(&self.typ, &concrete.typ)
            && field_matches(&self.zone, &concrete.zone)
    }
}

fn field_matches(pattern: &[u8], value: &[u8]) -> bool {
    if pattern == [NBP_WILDCARD] {
        return true;
    }
    pattern.len() == value.len()
        && pattern
            .iter()
            .zip(value)
            .all(|(a, b)| ucase(*a) == ucase(*b))
}

/// One name-to-address binding inside an NBP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NbpTuple {
    pub addr: Addr,
    pub enumerator: u8,
    pub entity: EntityName,
}

/// An NBP packet: function and tuple count packed into one byte, a request
/// id, then the tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NbpPacket {
    pub function: u8,
    pub id: u8,
    pub tuples: Vec<NbpTuple>,
}

impl NbpPacket {
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = buf;
        ensure_remaining!(&mut cur, 2);

        let first = cur.get_u8();
        let function = first >> 4;
        let count = (first & 0x0F) as usize;
        if !(NBP_FUNC_BRRQ..=NBP_FUNC_FWDREQ).contains(&function) {
            return Err(WireError::InvalidField("function"));
        }
        let id = cur.get_u8();

        let mut tuples = Vec::with_capacity(count);
        for _ in 0..count {
            ensure_remaining!(&mut cur, 5);
            let network = cur.get_u16();
            let node = cur.get_u8();
            let socket = cur.get_u8();
            let enumerator = cur.get_u8();
            let object = read_field(&mut cur)?;
            let typ = read_field(&mut cur)?;
            let zone = read_field(&mut cur)?;
            tuples.push(NbpTuple {
                addr: Addr::new(network, node, socket),
                enumerator,
                entity: EntityName { object, typ, zone },
            });
        }

        Ok(Self {
            function,
            id,
            tuples,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8((self.function << 4) | (self.tuples.len() as u8 & 0x0F));
        buf.put_u8(self.id);
        for tuple in &self.tuples {
            buf.put_u16(tuple.addr.network);
            buf.put_u8(tuple.addr.node);
            buf.put_u8(tuple.addr.socket);
            buf.put_u8(tuple.enumerator);
            write_field(&mut buf, &tuple.entity.object);
            write_field(&mut buf, &tuple.entity.typ);
            write_field(&mut buf, &tuple.entity.zone);
        }
        buf
    }

    /// The same packet re-issued under a different function code.
    pub fn with_function(&self, function: u8) -> Self {
        Self {
            function,
            id: self.id,
            tuples: self.tuples.clone(),
        }
    }
}

fn read_field(cur: &mut &[u8]) -> Result<Vec<u8>, WireError> {
    ensure_remaining!(cur, 1);
    let len = cur.get_u8() as usize;
    if len > MAX_FIELD_LEN {
        return Err(WireError::InvalidField("name length"));
    }
    ensure_remaining!(cur, len);
    Ok(cur.copy_to_bytes(len).to_vec())
}

fn write_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.put_u8(field.len() as u8);
    buf.put_slice(field);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> NbpPacket {
        NbpPacket {
            function: NBP_FUNC_LKUP,
            id: 9,
            tuples: vec![NbpTuple {
                addr: Addr::new(1, 5, 253),
                enumerator: 0,
                entity: EntityName::new(&b"="[..], &b"AFPServer"[..], &b"Finance"[..]),
            }],
        }
    }

    #[test]
    fn round_trip() {
        let pkt = lookup();
        assert_eq!(NbpPacket::parse(&pkt.encode()).unwrap(), pkt);
    }

    #[test]
    fn wildcard_matches_any_object() {
        let pattern = EntityName::new(&b"="[..], &b"AFPServer"[..], &b"Finance"[..]);
        let concrete = EntityName::new(&b"Vault"[..], &b"afpserver"[..], &b"finance"[..]);
        assert!(pattern.matches(&concrete));

        let other_type = EntityName::new(&b"Vault"[..], &b"LaserWriter"[..], &b"finance"[..]);
        assert!(!pattern.matches(&other_type));
    }

    #[test]
    fn function_is_validated() {
        let mut wire = lookup().encode();
        wire[0] = 0x71;
        assert_eq!(
            NbpPacket::parse(&wire),
            Err(WireError::InvalidField("function"))
        );
    }

    #[test]
    fn truncated_tuple_is_rejected() {
        let wire = lookup().encode();
        assert_eq!(
            NbpPacket::parse(&wire[..wire.len() - 3]),
            Err(WireError::Truncated)
        );
    }
}
