use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{NetRange, ZoneName};

/// One network range's zone information.
#[derive(Debug, Clone)]
pub struct ZoneEntry {
    pub range: NetRange,
    pub zones: Vec<ZoneName>,

    /// The designated default zone for extended networks; the only zone for
    /// non-extended ones.
    pub default_zone: Option<ZoneName>,
}

/// The zone information base: network range to zone list, plus the state of
/// outstanding ZIP queries keyed by the range's first network.
#[derive(Debug, Default)]
pub struct ZoneTable {
    entries: BTreeMap<u16, ZoneEntry>,
    pending: HashMap<u16, Instant>,
}

impl ZoneTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZoneEntry> {
        self.entries.values()
    }

    /// The entry whose range contains `network`.
    pub fn entry_for(&self, network: u16) -> Option<&ZoneEntry> {
        self.entries
            .range(..=network)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.range.contains(network))
    }

    pub fn zones_for(&self, network: u16) -> &[ZoneName] {
        self.entry_for(network).map(|e| e.zones.as_slice()).unwrap_or(&[])
    }

    /// Seed a range's complete zone list, as configured by the operator.
    pub fn seed(&mut self, range: NetRange, zones: Vec<ZoneName>, default_zone: Option<ZoneName>) {
        let default_zone = default_zone.or_else(|| zones.first().cloned());
        self.entries.insert(
            range.first(),
            ZoneEntry {
                range,
                zones,
                default_zone,
            },
        );
        self.pending.remove(&range.first());
    }

    /// Record one zone learned from a ZIP reply. The first zone learned for
    /// a range becomes its default. Returns true when the zone was new.
    pub fn add_zone(&mut self, range: NetRange, zone: ZoneName) -> bool {
        let entry = self.entries.entry(range.first()).or_insert_with(|| ZoneEntry {
            range,
            zones: Vec::new(),
            default_zone: None,
        });
        if entry.zones.contains(&zone) {
            return false;
        }
        if entry.default_zone.is_none() {
            entry.default_zone = Some(zone.clone());
        }
        entry.zones.push(zone);
        true
    }

    /// Drop zone information for a range whose last route went away.
    pub fn remove_range(&mut self, range: &NetRange) -> bool {
        self.pending.remove(&range.first());
        self.entries.remove(&range.first()).is_some()
    }

    /// The union of every known zone, in stable table order.
    pub fn all_zones(&self) -> Vec<ZoneName> {
        let mut zones: Vec<ZoneName> = Vec::new();
        for entry in self.entries.values() {
            for zone in &entry.zones {
                if !zones.contains(zone) {
                    zones.push(zone.clone());
                }
            }
        }
        zones
    }

    /// Ranges whose zone list names the given zone.
    pub fn ranges_serving_zone(&self, zone: &[u8]) -> Vec<NetRange> {
        self.entries
            .values()
            .filter(|entry| entry.zones.iter().any(|z| z.matches(zone)))
            .map(|entry| entry.range)
            .collect()
    }

    /// Whether a query for this range should go out now: true when none is
    /// outstanding or the previous one timed out. Marks the range pending.
    pub fn should_query(&mut self, range: &NetRange, now: Instant, timeout: Duration) -> bool {
        match self.pending.get(&range.first()) {
            Some(sent) if now.duration_since(*sent) < timeout => false,
            _ => {
                self.pending.insert(range.first(), now);
                true
            }
        }
    }

    pub fn clear_pending(&mut self, range: &NetRange) {
        self.pending.remove(&range.first());
    }

    /// Whether zone information for this range is known or being queried.
    pub fn has_zones(&self, range: &NetRange) -> bool {
        self.entries
            .get(&range.first())
            .map(|entry| !entry.zones.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str) -> ZoneName {
        ZoneName::new(name.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn first_learned_zone_becomes_default() {
        let mut table = ZoneTable::new();
        let range = NetRange::single(10);
        assert!(table.add_zone(range, zone("Finance")));
        assert!(table.add_zone(range, zone("Shipping")));
        assert!(!table.add_zone(range, zone("finance")));

        let entry = table.entry_for(10).unwrap();
        assert_eq!(entry.zones.len(), 2);
        assert_eq!(entry.default_zone, Some(zone("Finance")));
    }

    #[test]
    fn entry_lookup_covers_the_range() {
        let mut table = ZoneTable::new();
        table.seed(NetRange::new(10, 19), vec![zone("Lab")], None);
        assert!(table.entry_for(14).is_some());
        assert!(table.entry_for(20).is_none());
    }

    #[test]
    fn all_zones_deduplicates_case_insensitively() {
        let mut table = ZoneTable::new();
        table.add_zone(NetRange::single(10), zone("Finance"));
        table.add_zone(NetRange::single(20), zone("FINANCE"));
        table.add_zone(NetRange::single(20), zone("Shipping"));
        assert_eq!(table.all_zones().len(), 2);
    }

    #[test]
    fn ranges_serving_zone_matches_case_insensitively() {
        let mut table = ZoneTable::new();
        table.add_zone(NetRange::single(10), zone("Finance"));
        assert_eq!(
            table.ranges_serving_zone(b"finance"),
            vec![NetRange::single(10)]
        );
        assert!(table.ranges_serving_zone(b"Shipping").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn query_rate_limiting() {
        let mut table = ZoneTable::new();
        let range = NetRange::single(10);
        let timeout = Duration::from_secs(10);
        let start = Instant::now();

        assert!(table.should_query(&range, start, timeout));
        assert!(!table.should_query(&range, start + Duration::from_secs(5), timeout));
        assert!(table.should_query(&range, start + Duration::from_secs(11), timeout));

        table.clear_pending(&range);
        assert!(table.should_query(&range, start + Duration::from_secs(12), timeout));
    }
}
