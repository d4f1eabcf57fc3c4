use std::collections::HashMap;

use super::DissectorHandle;
use super::table::DissectorKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OverrideKey {
    table: String,
    key: DissectorKey,
    layer: Option<u8>,
}

/// User "decode as" choices, keyed by (table, key, layer occurrence).
///
/// A choice without a layer applies to every occurrence of the table in a
/// frame; a layer-specific choice wins over it for that layer.
#[derive(Debug, Clone, Default)]
pub struct DecodeAsStore {
    entries: HashMap<OverrideKey, DissectorHandle>,
}

impl DecodeAsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, table: &str, key: DissectorKey, layer: Option<u8>, handle: DissectorHandle) {
        self.entries.insert(
            OverrideKey {
                table: table.to_string(),
                key,
                layer,
            },
            handle,
        );
    }

    /// Returns whether an entry was removed.
    pub fn clear(&mut self, table: &str, key: &DissectorKey, layer: Option<u8>) -> bool {
        self.entries
            .remove(&OverrideKey {
                table: table.to_string(),
                key: key.clone(),
                layer,
            })
            .is_some()
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn lookup(&self, table: &str, key: &DissectorKey, layer: u8) -> Option<&DissectorHandle> {
        let mut wanted = OverrideKey {
            table: table.to_string(),
            key: key.clone(),
            layer: Some(layer),
        };
        if let Some(handle) = self.entries.get(&wanted) {
            return Some(handle);
        }
        wanted.layer = None;
        self.entries.get(&wanted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
