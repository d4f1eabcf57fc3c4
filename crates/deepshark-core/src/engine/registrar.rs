use std::ops::RangeInclusive;

use crate::catalog::{
    CatalogBuilder, ExpertId, FieldId, FieldSpec, ProtocolId, SubtreeId,
};
use crate::dispatch::{DissectorHandle, DissectorKey, DissectorRegistry, HeuristicOrder, KeyKind};
use crate::dissectors::{data, frame};
use crate::expert::ExpertSpec;
use crate::prefs::{PrefSpec, Preferences};

use super::EngineError;

/// Mutable registration surface handed to every protocol while the engine
/// is being built.
#[derive(Debug)]
pub struct Registrar {
    pub(crate) catalog: CatalogBuilder,
    pub(crate) registry: DissectorRegistry,
    pub(crate) prefs: Preferences,
    pub(crate) frame_fields: frame::FrameFields,
}

impl Registrar {
    pub(crate) fn new() -> Result<Self, EngineError> {
        let mut catalog = CatalogBuilder::new();
        let frame_fields = frame::register(&mut catalog)?;
        let data = data::register(&mut catalog)?;
        let mut registry = DissectorRegistry::new(data);
        registry.register_table(frame::WTAP_ENCAP_TABLE, "Link-layer encapsulation", KeyKind::UInt)?;
        Ok(Self {
            catalog,
            registry,
            prefs: Preferences::new(),
            frame_fields,
        })
    }

    pub fn register_protocol(
        &mut self,
        name: &str,
        short_name: &str,
        filter: &str,
    ) -> Result<ProtocolId, EngineError> {
        Ok(self.catalog.register_protocol(name, short_name, filter)?)
    }

    pub fn register_field(
        &mut self,
        protocol: ProtocolId,
        spec: FieldSpec,
    ) -> Result<FieldId, EngineError> {
        Ok(self.catalog.register_field(Some(protocol), spec)?)
    }

    pub fn register_subtree(&mut self) -> SubtreeId {
        self.catalog.register_subtree()
    }

    pub fn register_expert(
        &mut self,
        protocol: ProtocolId,
        spec: ExpertSpec,
    ) -> Result<ExpertId, EngineError> {
        Ok(self.catalog.register_expert(Some(protocol), spec)?)
    }

    /// Filter lookup for fields registered by another protocol.
    pub fn field_id(&self, filter: &str) -> Result<FieldId, EngineError> {
        Ok(self.catalog.field_id(filter)?)
    }

    pub fn register_table(
        &mut self,
        name: &str,
        ui_name: &str,
        key_kind: KeyKind,
    ) -> Result<(), EngineError> {
        Ok(self.registry.register_table(name, ui_name, key_kind)?)
    }

    /// Register a named dissector and hand the handle back.
    pub fn register_dissector(
        &mut self,
        handle: DissectorHandle,
    ) -> Result<DissectorHandle, EngineError> {
        self.registry.register_dissector(handle.clone())?;
        Ok(handle)
    }

    pub fn find_dissector(&self, name: &str) -> Result<DissectorHandle, EngineError> {
        Ok(self.registry.find_dissector(name)?)
    }

    pub fn set_dissector(
        &mut self,
        table: &str,
        key: impl Into<DissectorKey>,
        handle: &DissectorHandle,
    ) -> Result<(), EngineError> {
        Ok(self.registry.set_dissector(table, key.into(), handle)?)
    }

    pub fn set_dissector_range(
        &mut self,
        table: &str,
        range: RangeInclusive<u64>,
        handle: &DissectorHandle,
    ) -> Result<(), EngineError> {
        Ok(self.registry.set_dissector_range(table, range, handle)?)
    }

    pub fn add_heuristic(
        &mut self,
        table: &str,
        handle: &DissectorHandle,
        priority: i32,
    ) -> Result<(), EngineError> {
        Ok(self.registry.add_heuristic(table, handle, priority)?)
    }

    pub fn set_heuristic_order(
        &mut self,
        table: &str,
        order: HeuristicOrder,
    ) -> Result<(), EngineError> {
        Ok(self.registry.set_heuristic_order(table, order)?)
    }

    pub fn set_heuristic_enabled(
        &mut self,
        table: &str,
        dissector: &str,
        enabled: bool,
    ) -> Result<(), EngineError> {
        Ok(self.registry.set_heuristic_enabled(table, dissector, enabled)?)
    }

    pub fn add_for_decode_as(
        &mut self,
        table: &str,
        handle: &DissectorHandle,
    ) -> Result<(), EngineError> {
        Ok(self.registry.add_for_decode_as(table, handle)?)
    }

    pub fn set_fallback(&mut self, table: &str, handle: &DissectorHandle) -> Result<(), EngineError> {
        Ok(self.registry.set_fallback(table, handle)?)
    }

    pub fn register_pref(&mut self, spec: PrefSpec) -> Result<(), EngineError> {
        Ok(self.prefs.register(spec)?)
    }

    /// Preference values; user overrides are applied before handoff.
    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }
}
