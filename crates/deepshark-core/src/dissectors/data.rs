//! Generic byte dump; the decoder of last resort.

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{CatalogBuilder, CatalogError, FieldDisplay, FieldId, FieldSpec, FieldType, ProtocolId, SubtreeId};
use crate::dispatch::{DissectCx, DissectResult, Dissector, DissectorHandle, Outcome};
use crate::tree::{FieldValue, NodeId};

pub const DATA_DISSECTOR: &str = "data";

struct DataDissector {
    proto: ProtocolId,
    subtree: SubtreeId,
    hf_data: FieldId,
    hf_len: FieldId,
}

impl Dissector for DataDissector {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        let reported = view.reported_len();
        if reported == 0 {
            return Ok(Outcome::Accepted(0));
        }
        let item = cx.add_protocol(parent, self.proto, view, 0, reported, self.subtree);
        cx.append_text(item, &format!(" ({reported} bytes)"));
        cx.add_item(item, self.hf_data, view, 0, view.captured_len(), Endianness::Big);
        let len = cx.add_generated(item, self.hf_len, FieldValue::UInt(reported as u64));
        if view.is_truncated() {
            cx.append_text(len, &format!(" ({} captured)", view.captured_len()));
        }
        Ok(Outcome::Accepted(reported))
    }
}

pub(crate) fn register(catalog: &mut CatalogBuilder) -> Result<DissectorHandle, CatalogError> {
    let proto = catalog.register_protocol("Data", "DATA", "data")?;
    let hf_data = catalog.register_field(
        Some(proto),
        FieldSpec::new("Data bytes", "data.data", FieldType::Bytes),
    )?;
    let hf_len = catalog.register_field(
        Some(proto),
        FieldSpec::new("Data length", "data.len", FieldType::UInt32).display(FieldDisplay::Dec),
    )?;
    let subtree = catalog.register_subtree();
    Ok(DissectorHandle::new(
        DATA_DISSECTOR,
        Some(proto),
        DataDissector {
            proto,
            subtree,
            hf_data,
            hf_len,
        },
    ))
}
