//! Bytes a PSN appended after a short PW payload.

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{FieldId, FieldSpec, FieldType, ProtocolId, SubtreeId};
use crate::dispatch::{DissectCx, DissectResult, Dissector, DissectorHandle, Outcome};
use crate::engine::{EngineError, Protocol, Registrar};
use crate::tree::NodeId;

pub const PW_PADDING_DISSECTOR: &str = "pw_padding";

struct PaddingDissector {
    proto: ProtocolId,
    subtree: SubtreeId,
    bytes: FieldId,
}

impl Dissector for PaddingDissector {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        let size = view.reported_len();
        let item = cx.add_protocol(parent, self.proto, view, 0, size, self.subtree);
        let unit = if size == 1 { "byte" } else { "bytes" };
        cx.append_text(item, &format!(", {size} {unit}"));
        cx.add_item(item, self.bytes, view, 0, view.captured_len(), Endianness::Big);
        Ok(Outcome::Accepted(size))
    }
}

#[derive(Debug, Default)]
pub struct PwPadding;

impl Protocol for PwPadding {
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        let proto = reg.register_protocol("PW packet padding", "PW padding", "pw.padding")?;
        let dissector = PaddingDissector {
            proto,
            subtree: reg.register_subtree(),
            bytes: reg.register_field(
                proto,
                FieldSpec::new("Padding", "pw.padding.bytes", FieldType::Bytes),
            )?,
        };
        reg.register_dissector(DissectorHandle::new(PW_PADDING_DISSECTOR, Some(proto), dissector))?;
        Ok(())
    }
}
