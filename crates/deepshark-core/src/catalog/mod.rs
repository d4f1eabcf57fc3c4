//! Write-once registry of protocols, fields, subtree categories and expert
//! descriptors.
//!
//! Everything is registered through `CatalogBuilder` before the first frame
//! is dissected, then frozen into an immutable `Catalog`. Field names and
//! filter abbreviations are unique across the whole catalog so a filter
//! expression resolves to exactly one field.

pub mod error;
pub mod field;

use std::collections::{HashMap, HashSet};

pub use error::CatalogError;
pub use field::{FieldDescriptor, FieldDisplay, FieldSpec, FieldType, FrameNumKind, ValueMap};

use crate::expert::{ExpertGroup, ExpertSpec, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubtreeId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpertId(pub(crate) u32);

impl FieldId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub id: ProtocolId,
    pub name: String,
    pub short_name: String,
    pub filter: String,
    /// The `Protocol`-typed field representing this protocol in trees.
    pub field: FieldId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpertDescriptor {
    pub id: ExpertId,
    pub protocol: Option<ProtocolId>,
    pub name: String,
    pub group: ExpertGroup,
    pub severity: Severity,
    pub summary: String,
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    fields: Vec<FieldDescriptor>,
    by_filter: HashMap<String, FieldId>,
    names: HashSet<String>,
    protocols: Vec<ProtocolInfo>,
    subtrees: u32,
    experts: Vec<ExpertDescriptor>,
    expert_by_name: HashMap<String, ExpertId>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protocol and its `Protocol`-typed field.
    ///
    /// # Examples
    /// ```
    /// use deepshark_core::catalog::CatalogBuilder;
    ///
    /// let mut builder = CatalogBuilder::new();
    /// let proto = builder.register_protocol("Example Protocol", "EX", "ex")?;
    /// let catalog = builder.build();
    /// assert_eq!(catalog.protocol(proto).map(|p| p.filter.as_str()), Some("ex"));
    /// # Ok::<(), deepshark_core::catalog::CatalogError>(())
    /// ```
    pub fn register_protocol(
        &mut self,
        name: &str,
        short_name: &str,
        filter: &str,
    ) -> Result<ProtocolId, CatalogError> {
        if self
            .protocols
            .iter()
            .any(|p| p.name == name || p.short_name == short_name)
        {
            return Err(CatalogError::DuplicateProtocol {
                name: name.to_string(),
            });
        }
        let id = ProtocolId(self.protocols.len() as u32);
        let field = self.insert_field(Some(id), FieldSpec::new(name, filter, FieldType::Protocol))?;
        self.protocols.push(ProtocolInfo {
            id,
            name: name.to_string(),
            short_name: short_name.to_string(),
            filter: filter.to_string(),
            field,
        });
        Ok(id)
    }

    /// # Errors
    /// `DuplicateField` when the name or filter abbreviation is taken,
    /// `InvalidBitmask` when a mask is given for a non-integer type.
    pub fn register_field(
        &mut self,
        protocol: Option<ProtocolId>,
        spec: FieldSpec,
    ) -> Result<FieldId, CatalogError> {
        if spec.bitmask != 0 && !spec.ftype.accepts_bitmask() {
            return Err(CatalogError::InvalidBitmask {
                filter: spec.filter,
                ftype: spec.ftype.as_str(),
            });
        }
        self.insert_field(protocol, spec)
    }

    pub fn register_subtree(&mut self) -> SubtreeId {
        let id = SubtreeId(self.subtrees);
        self.subtrees += 1;
        id
    }

    pub fn register_expert(
        &mut self,
        protocol: Option<ProtocolId>,
        spec: ExpertSpec,
    ) -> Result<ExpertId, CatalogError> {
        if self.expert_by_name.contains_key(&spec.name) {
            return Err(CatalogError::DuplicateExpert { name: spec.name });
        }
        let id = ExpertId(self.experts.len() as u32);
        self.expert_by_name.insert(spec.name.clone(), id);
        self.experts.push(ExpertDescriptor {
            id,
            protocol,
            name: spec.name,
            group: spec.group,
            severity: spec.severity,
            summary: spec.summary,
        });
        Ok(id)
    }

    /// Look up an already registered field during registration.
    pub fn field_id(&self, filter: &str) -> Result<FieldId, CatalogError> {
        self.by_filter
            .get(filter)
            .copied()
            .ok_or_else(|| CatalogError::UnknownField {
                filter: filter.to_string(),
            })
    }

    pub fn build(self) -> Catalog {
        Catalog {
            fields: self.fields,
            by_filter: self.by_filter,
            protocols: self.protocols,
            subtrees: self.subtrees,
            experts: self.experts,
            expert_by_name: self.expert_by_name,
        }
    }

    fn insert_field(
        &mut self,
        protocol: Option<ProtocolId>,
        spec: FieldSpec,
    ) -> Result<FieldId, CatalogError> {
        if self.names.contains(&spec.name) {
            return Err(CatalogError::DuplicateField {
                kind: "name",
                value: spec.name,
            });
        }
        if self.by_filter.contains_key(&spec.filter) {
            return Err(CatalogError::DuplicateField {
                kind: "filter",
                value: spec.filter,
            });
        }
        let id = FieldId(self.fields.len() as u32);
        self.names.insert(spec.name.clone());
        self.by_filter.insert(spec.filter.clone(), id);
        self.fields.push(FieldDescriptor {
            id,
            protocol,
            name: spec.name,
            filter: spec.filter,
            ftype: spec.ftype,
            display: spec.display,
            values: spec.values,
            bitmask: spec.bitmask,
            blurb: spec.blurb,
        });
        Ok(id)
    }
}

/// Frozen catalog shared by every dissection.
#[derive(Debug)]
pub struct Catalog {
    fields: Vec<FieldDescriptor>,
    by_filter: HashMap<String, FieldId>,
    protocols: Vec<ProtocolInfo>,
    subtrees: u32,
    experts: Vec<ExpertDescriptor>,
    expert_by_name: HashMap<String, ExpertId>,
}

impl Catalog {
    pub fn field(&self, id: FieldId) -> Option<&FieldDescriptor> {
        self.fields.get(id.index())
    }

    pub fn field_by_filter(&self, filter: &str) -> Result<&FieldDescriptor, CatalogError> {
        self.by_filter
            .get(filter)
            .and_then(|id| self.field(*id))
            .ok_or_else(|| CatalogError::UnknownField {
                filter: filter.to_string(),
            })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn protocol(&self, id: ProtocolId) -> Option<&ProtocolInfo> {
        self.protocols.get(id.0 as usize)
    }

    pub fn protocol_by_filter(&self, filter: &str) -> Option<&ProtocolInfo> {
        self.protocols.iter().find(|p| p.filter == filter)
    }

    pub fn protocols(&self) -> impl Iterator<Item = &ProtocolInfo> {
        self.protocols.iter()
    }

    pub fn subtree_count(&self) -> usize {
        self.subtrees as usize
    }

    pub fn expert(&self, id: ExpertId) -> Option<&ExpertDescriptor> {
        self.experts.get(id.0 as usize)
    }

    pub fn expert_by_name(&self, name: &str) -> Option<&ExpertDescriptor> {
        self.expert_by_name
            .get(name)
            .and_then(|id| self.expert(*id))
    }

    pub fn experts(&self) -> impl Iterator<Item = &ExpertDescriptor> {
        self.experts.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{CatalogBuilder, CatalogError, FieldSpec, FieldType};
    use crate::expert::{ExpertGroup, ExpertSpec, Severity};

    #[test]
    fn duplicate_filter_is_rejected() {
        let mut builder = CatalogBuilder::new();
        builder
            .register_field(None, FieldSpec::new("Length", "x.len", FieldType::UInt16))
            .unwrap();
        let err = builder
            .register_field(None, FieldSpec::new("Other length", "x.len", FieldType::UInt16))
            .unwrap_err();
        assert_eq!(
            err,
            CatalogError::DuplicateField {
                kind: "filter",
                value: "x.len".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut builder = CatalogBuilder::new();
        builder
            .register_field(None, FieldSpec::new("Length", "x.len", FieldType::UInt16))
            .unwrap();
        let err = builder
            .register_field(None, FieldSpec::new("Length", "y.len", FieldType::UInt16))
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateField { kind: "name", .. }));
    }

    #[test]
    fn bitmask_on_bytes_is_rejected() {
        let mut builder = CatalogBuilder::new();
        let err = builder
            .register_field(
                None,
                FieldSpec::new("Blob", "x.blob", FieldType::Bytes).bitmask(0x0f),
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidBitmask { .. }));
    }

    #[test]
    fn lookup_by_filter() {
        let mut builder = CatalogBuilder::new();
        let proto = builder.register_protocol("Example", "EX", "ex").unwrap();
        let id = builder
            .register_field(Some(proto), FieldSpec::new("Kind", "ex.kind", FieldType::UInt8))
            .unwrap();
        let catalog = builder.build();
        assert_eq!(catalog.field_by_filter("ex.kind").unwrap().id, id);
        assert_eq!(catalog.field_by_filter("ex").unwrap().ftype, FieldType::Protocol);
        assert!(matches!(
            catalog.field_by_filter("ex.missing"),
            Err(CatalogError::UnknownField { .. })
        ));
    }

    #[test]
    fn expert_names_are_unique() {
        let mut builder = CatalogBuilder::new();
        let spec = ExpertSpec::new("ex.bad", ExpertGroup::Malformed, Severity::Error, "Bad");
        builder.register_expert(None, spec.clone()).unwrap();
        assert!(matches!(
            builder.register_expert(None, spec),
            Err(CatalogError::DuplicateExpert { .. })
        ));
    }
}
