use std::collections::{BTreeMap, HashMap};

use super::error::DispatchError;
use super::table::{DissectorKey, DissectorTable, HeuristicOrder, KeyKind};
use super::DissectorHandle;

/// Every table and named dissector known to an engine.
#[derive(Debug, Clone)]
pub struct DissectorRegistry {
    tables: BTreeMap<String, DissectorTable>,
    dissectors: HashMap<String, DissectorHandle>,
    data: DissectorHandle,
}

impl DissectorRegistry {
    /// `data` is the decoder of last resort and is always registered.
    pub fn new(data: DissectorHandle) -> Self {
        let mut dissectors = HashMap::new();
        dissectors.insert(data.name().to_string(), data.clone());
        Self {
            tables: BTreeMap::new(),
            dissectors,
            data,
        }
    }

    pub fn data(&self) -> &DissectorHandle {
        &self.data
    }

    pub fn register_table(
        &mut self,
        name: &str,
        ui_name: &str,
        key_kind: KeyKind,
    ) -> Result<(), DispatchError> {
        if self.tables.contains_key(name) {
            return Err(DispatchError::DuplicateTable {
                name: name.to_string(),
            });
        }
        self.tables
            .insert(name.to_string(), DissectorTable::new(name, ui_name, key_kind));
        Ok(())
    }

    pub fn register_dissector(&mut self, handle: DissectorHandle) -> Result<(), DispatchError> {
        if self.dissectors.contains_key(handle.name()) {
            return Err(DispatchError::DuplicateDissector {
                name: handle.name().to_string(),
            });
        }
        self.dissectors.insert(handle.name().to_string(), handle);
        Ok(())
    }

    pub fn find_dissector(&self, name: &str) -> Result<DissectorHandle, DispatchError> {
        self.dissectors
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownDissector {
                name: name.to_string(),
            })
    }

    pub fn table(&self, name: &str) -> Option<&DissectorTable> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &DissectorTable> {
        self.tables.values()
    }

    pub fn dissector_names(&self) -> impl Iterator<Item = &str> {
        self.dissectors.keys().map(String::as_str)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut DissectorTable, DispatchError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DispatchError::UnknownTable {
                name: name.to_string(),
            })
    }

    pub fn set_dissector(
        &mut self,
        table: &str,
        key: DissectorKey,
        handle: &DissectorHandle,
    ) -> Result<(), DispatchError> {
        self.table_mut(table)?.insert(key, handle.clone())
    }

    pub fn set_dissector_range(
        &mut self,
        table: &str,
        range: std::ops::RangeInclusive<u64>,
        handle: &DissectorHandle,
    ) -> Result<(), DispatchError> {
        self.table_mut(table)?.insert_range(range, handle.clone())
    }

    pub fn add_heuristic(
        &mut self,
        table: &str,
        handle: &DissectorHandle,
        priority: i32,
    ) -> Result<(), DispatchError> {
        self.table_mut(table)?.add_heuristic(handle.clone(), priority);
        Ok(())
    }

    pub fn set_heuristic_enabled(
        &mut self,
        table: &str,
        name: &str,
        enabled: bool,
    ) -> Result<(), DispatchError> {
        if self.table_mut(table)?.set_heuristic_enabled(name, enabled) {
            Ok(())
        } else {
            Err(DispatchError::UnknownDissector {
                name: name.to_string(),
            })
        }
    }

    pub fn set_heuristic_order(
        &mut self,
        table: &str,
        order: HeuristicOrder,
    ) -> Result<(), DispatchError> {
        self.table_mut(table)?.set_heuristic_order(order);
        Ok(())
    }

    pub fn add_for_decode_as(
        &mut self,
        table: &str,
        handle: &DissectorHandle,
    ) -> Result<(), DispatchError> {
        self.table_mut(table)?.offer_for_decode_as(handle);
        Ok(())
    }

    pub fn set_fallback(&mut self, table: &str, handle: &DissectorHandle) -> Result<(), DispatchError> {
        self.table_mut(table)?.set_fallback(handle.clone());
        Ok(())
    }

    /// Resolve a decode-as choice: the table's offered dissectors first,
    /// then any named dissector.
    pub fn resolve_choice(
        &self,
        table: &str,
        key: &DissectorKey,
        dissector: &str,
    ) -> Result<DissectorHandle, DispatchError> {
        let table = self.table(table).ok_or_else(|| DispatchError::UnknownTable {
            name: table.to_string(),
        })?;
        table.check_key(key)?;
        match table.decode_as_choice(dissector) {
            Some(handle) => Ok(handle.clone()),
            None => self.find_dissector(dissector),
        }
    }
}
