use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;

use super::DissectorHandle;
use super::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    UInt,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DissectorKey {
    UInt(u64),
    Str(String),
}

impl DissectorKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            DissectorKey::UInt(_) => KeyKind::UInt,
            DissectorKey::Str(_) => KeyKind::String,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            DissectorKey::UInt(v) => Some(*v),
            DissectorKey::Str(_) => None,
        }
    }
}

impl fmt::Display for DissectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DissectorKey::UInt(v) => write!(f, "{v}"),
            DissectorKey::Str(v) => f.write_str(v),
        }
    }
}

impl From<u64> for DissectorKey {
    fn from(value: u64) -> Self {
        DissectorKey::UInt(value)
    }
}

impl From<u32> for DissectorKey {
    fn from(value: u32) -> Self {
        DissectorKey::UInt(value as u64)
    }
}

impl From<u16> for DissectorKey {
    fn from(value: u16) -> Self {
        DissectorKey::UInt(value as u64)
    }
}

impl From<u8> for DissectorKey {
    fn from(value: u8) -> Self {
        DissectorKey::UInt(value as u64)
    }
}

impl From<&str> for DissectorKey {
    fn from(value: &str) -> Self {
        DissectorKey::Str(value.to_string())
    }
}

impl From<String> for DissectorKey {
    fn from(value: String) -> Self {
        DissectorKey::Str(value)
    }
}

/// How a dispatch decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Override,
    Exact,
    Range,
    Heuristic,
    Fallback,
}

/// Tie-break among heuristics of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeuristicOrder {
    /// Earliest registration runs first.
    #[default]
    Registration,
    /// Latest registration runs first.
    LatestFirst,
}

#[derive(Debug, Clone)]
pub struct HeuristicEntry {
    pub handle: DissectorHandle,
    pub priority: i32,
    pub enabled: bool,
    seq: u32,
}

#[derive(Debug, Clone)]
struct RangeEntry {
    range: RangeInclusive<u64>,
    handle: DissectorHandle,
}

/// One named discriminator table.
#[derive(Debug, Clone)]
pub struct DissectorTable {
    name: String,
    ui_name: String,
    key_kind: KeyKind,
    exact: HashMap<DissectorKey, DissectorHandle>,
    ranges: Vec<RangeEntry>,
    heuristics: Vec<HeuristicEntry>,
    heuristic_order: HeuristicOrder,
    fallback: Option<DissectorHandle>,
    decode_as: Vec<DissectorHandle>,
    next_seq: u32,
}

impl DissectorTable {
    pub fn new(name: &str, ui_name: &str, key_kind: KeyKind) -> Self {
        Self {
            name: name.to_string(),
            ui_name: ui_name.to_string(),
            key_kind,
            exact: HashMap::new(),
            ranges: Vec::new(),
            heuristics: Vec::new(),
            heuristic_order: HeuristicOrder::default(),
            fallback: None,
            decode_as: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ui_name(&self) -> &str {
        &self.ui_name
    }

    pub fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    pub fn check_key(&self, key: &DissectorKey) -> Result<(), DispatchError> {
        if key.kind() != self.key_kind {
            return Err(DispatchError::KeyKindMismatch {
                table: self.name.clone(),
                expected: self.key_kind,
            });
        }
        Ok(())
    }

    /// Replaces any previous exact entry for `key`.
    pub fn insert(&mut self, key: DissectorKey, handle: DissectorHandle) -> Result<(), DispatchError> {
        self.check_key(&key)?;
        self.offer_for_decode_as(&handle);
        self.exact.insert(key, handle);
        Ok(())
    }

    pub fn insert_range(
        &mut self,
        range: RangeInclusive<u64>,
        handle: DissectorHandle,
    ) -> Result<(), DispatchError> {
        if self.key_kind != KeyKind::UInt {
            return Err(DispatchError::KeyKindMismatch {
                table: self.name.clone(),
                expected: self.key_kind,
            });
        }
        self.offer_for_decode_as(&handle);
        self.ranges.push(RangeEntry { range, handle });
        Ok(())
    }

    pub fn add_heuristic(&mut self, handle: DissectorHandle, priority: i32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heuristics.push(HeuristicEntry {
            handle,
            priority,
            enabled: true,
            seq,
        });
        self.sort_heuristics();
    }

    /// Enable or disable a heuristic by dissector name.
    pub fn set_heuristic_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for entry in self.heuristics.iter_mut().filter(|e| e.handle.name() == name) {
            entry.enabled = enabled;
            found = true;
        }
        found
    }

    pub fn set_heuristic_order(&mut self, order: HeuristicOrder) {
        self.heuristic_order = order;
        self.sort_heuristics();
    }

    /// Keeps `heuristics` in try order so dispatch never sorts.
    fn sort_heuristics(&mut self) {
        match self.heuristic_order {
            HeuristicOrder::Registration => self
                .heuristics
                .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq))),
            HeuristicOrder::LatestFirst => self
                .heuristics
                .sort_by(|a, b| b.priority.cmp(&a.priority).then(b.seq.cmp(&a.seq))),
        }
    }

    pub fn set_fallback(&mut self, handle: DissectorHandle) {
        self.fallback = Some(handle);
    }

    pub fn fallback(&self) -> Option<&DissectorHandle> {
        self.fallback.as_ref()
    }

    pub fn offer_for_decode_as(&mut self, handle: &DissectorHandle) {
        if !self.decode_as.iter().any(|h| h.name() == handle.name()) {
            self.decode_as.push(handle.clone());
        }
    }

    /// Dissectors a user may pick for this table.
    pub fn decode_as_choices(&self) -> &[DissectorHandle] {
        &self.decode_as
    }

    pub fn decode_as_choice(&self, name: &str) -> Option<&DissectorHandle> {
        self.decode_as.iter().find(|h| h.name() == name)
    }

    /// Static entry for `key`: exact entries win over ranges, and the first
    /// registered range containing the key wins among ranges.
    pub fn lookup(&self, key: &DissectorKey) -> Option<(MatchKind, &DissectorHandle)> {
        if let Some(handle) = self.exact.get(key) {
            return Some((MatchKind::Exact, handle));
        }
        let value = key.as_uint()?;
        self.ranges
            .iter()
            .find(|entry| entry.range.contains(&value))
            .map(|entry| (MatchKind::Range, &entry.handle))
    }

    /// Enabled heuristics in the order they should be tried.
    pub fn heuristics(&self) -> impl Iterator<Item = &HeuristicEntry> {
        self.heuristics.iter().filter(|e| e.enabled)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DissectorKey, &DissectorHandle)> {
        self.exact.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{DissectorKey, DissectorTable, HeuristicOrder, KeyKind, MatchKind};
    use crate::dispatch::{DispatchError, DissectorHandle, Outcome};

    fn handle(name: &str) -> DissectorHandle {
        DissectorHandle::from_fn(name, None, |_, _, _| Ok(Outcome::Rejected))
    }

    #[test]
    fn exact_entry_wins_over_range() {
        let mut table = DissectorTable::new("udp.port", "UDP port", KeyKind::UInt);
        table.insert_range(5000..=5010, handle("ranged")).unwrap();
        table.insert(DissectorKey::UInt(5004), handle("exact")).unwrap();

        let (kind, found) = table.lookup(&DissectorKey::UInt(5004)).unwrap();
        assert_eq!(kind, MatchKind::Exact);
        assert_eq!(found.name(), "exact");
        let (kind, found) = table.lookup(&DissectorKey::UInt(5005)).unwrap();
        assert_eq!(kind, MatchKind::Range);
        assert_eq!(found.name(), "ranged");
        assert!(table.lookup(&DissectorKey::UInt(6000)).is_none());
    }

    #[test]
    fn string_key_on_integer_table_is_rejected() {
        let mut table = DissectorTable::new("ethertype", "EtherType", KeyKind::UInt);
        let err = table.insert(DissectorKey::from("ip"), handle("ip")).unwrap_err();
        assert!(matches!(err, DispatchError::KeyKindMismatch { .. }));
    }

    #[test]
    fn heuristics_sort_by_priority_then_order() {
        let mut table = DissectorTable::new("udp", "UDP heuristics", KeyKind::UInt);
        table.add_heuristic(handle("h1"), 0);
        table.add_heuristic(handle("h2"), 0);
        table.add_heuristic(handle("urgent"), 10);
        let names: Vec<_> = table.heuristics().map(|e| e.handle.name()).collect();
        assert_eq!(names, ["urgent", "h1", "h2"]);

        table.set_heuristic_order(HeuristicOrder::LatestFirst);
        let names: Vec<_> = table.heuristics().map(|e| e.handle.name()).collect();
        assert_eq!(names, ["urgent", "h2", "h1"]);

        table.set_heuristic_enabled("h2", false);
        let names: Vec<_> = table.heuristics().map(|e| e.handle.name()).collect();
        assert_eq!(names, ["urgent", "h1"]);
    }

    #[test]
    fn heuristics_added_after_order_change_stay_in_order() {
        let mut table = DissectorTable::new("udp", "UDP heuristics", KeyKind::UInt);
        table.set_heuristic_order(HeuristicOrder::LatestFirst);
        table.add_heuristic(handle("h1"), 0);
        table.add_heuristic(handle("h2"), 0);
        table.add_heuristic(handle("low"), -5);
        table.add_heuristic(handle("h3"), 0);
        let names: Vec<_> = table.heuristics().map(|e| e.handle.name()).collect();
        assert_eq!(names, ["h3", "h2", "h1", "low"]);

        table.set_heuristic_enabled("h2", false);
        table.set_heuristic_enabled("h2", true);
        let names: Vec<_> = table.heuristics().map(|e| e.handle.name()).collect();
        assert_eq!(names, ["h3", "h2", "h1", "low"]);
    }
}
