use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants;
use crate::types::EthernetAddr;

/// The AARP mapping table of one EtherTalk port: (network, node) to hardware
/// address. Populated from observed traffic and probe responses; an entry
/// not used for [`constants::AMT_ENTRY_TTL_SECS`] expires.
#[derive(Debug, Default)]
pub struct AddressMappingTable {
    entries: HashMap<(u16, u8), AmtEntry>,
}

#[derive(Debug)]
struct AmtEntry {
    hw: EthernetAddr,
    last_used: Instant,
}

impl AddressMappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record a mapping, replacing any previous hardware address.
    pub fn insert(&mut self, proto: (u16, u8), hw: EthernetAddr, now: Instant) {
        self.entries.insert(proto, AmtEntry { hw, last_used: now });
    }

    /// Resolve a protocol address. A hit refreshes the entry's use time; a
    /// stale entry is dropped and reported as a miss.
    pub fn lookup(&mut self, proto: (u16, u8), now: Instant) -> Option<EthernetAddr> {
        let ttl = Duration::from_secs(constants::AMT_ENTRY_TTL_SECS);
        match self.entries.get_mut(&proto) {
            Some(entry) if now.duration_since(entry.last_used) < ttl => {
                entry.last_used = now;
                Some(entry.hw)
            }
            Some(_) => {
                self.entries.remove(&proto);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: EthernetAddr = EthernetAddr([2, 0, 0, 0, 0, 9]);

    #[tokio::test(start_paused = true)]
    async fn entries_expire_without_use() {
        let mut amt = AddressMappingTable::new();
        let start = Instant::now();
        amt.insert((10, 42), MAC, start);

        assert_eq!(amt.lookup((10, 42), start + Duration::from_secs(29)), Some(MAC));
        // The hit above refreshed the entry.
        assert_eq!(amt.lookup((10, 42), start + Duration::from_secs(58)), Some(MAC));
        assert_eq!(amt.lookup((10, 42), start + Duration::from_secs(89)), None);
        assert_eq!(amt.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_mapping_replaces_old() {
        let mut amt = AddressMappingTable::new();
        let start = Instant::now();
        let other = EthernetAddr([2, 0, 0, 0, 0, 7]);
        amt.insert((10, 42), MAC, start);
        amt.insert((10, 42), other, start);
        assert_eq!(amt.lookup((10, 42), start), Some(other));
    }
}
