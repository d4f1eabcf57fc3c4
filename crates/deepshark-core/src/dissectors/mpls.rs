//! MPLS label stack.
//!
//! After the bottom-of-stack entry the payload is offered to `mpls.label`
//! keyed by the bottom label (normally only populated via Decode-As), then
//! to `mpls.pfn` keyed by the first nibble of the payload: 4 is IPv4, 0 a
//! pseudowire control word.

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{FieldDisplay, FieldId, FieldSpec, FieldType, ProtocolId, SubtreeId, ValueMap};
use crate::dispatch::{DissectCx, DissectResult, Dissector, DissectorHandle, KeyKind, Outcome};
use crate::engine::{EngineError, Protocol, Registrar};
use crate::tree::{NodeId, TreeCursor};

use super::eth::{ETHERTYPE_MPLS, ETHERTYPE_TABLE};

/// Table keyed by the bottom-of-stack label value.
pub const MPLS_LABEL_TABLE: &str = "mpls.label";
/// Table keyed by the first nibble after the label stack.
pub const MPLS_PFN_TABLE: &str = "mpls.pfn";

const ENTRY_LEN: usize = 4;
const LABEL_MASK: u32 = 0xffff_f000;
const BOTTOM_MASK: u32 = 0x0000_0100;

const SPECIAL_LABELS: &[(u64, &str)] = &[
    (0, "IPv4 Explicit-Null"),
    (1, "Router Alert"),
    (2, "IPv6 Explicit-Null"),
    (3, "Implicit-Null"),
    (7, "Entropy Label Indicator"),
    (13, "Generic Associated Channel Label"),
    (14, "OAM Alert"),
    (15, "Extension"),
];

const PAYLOAD_FIRST_NIBBLE: &[(u64, &str)] = &[
    (0, "PW MPLS Control Word"),
    (1, "PW Associated Channel"),
    (4, "IPv4"),
    (6, "IPv6"),
];

#[derive(Debug, Clone, Copy)]
struct MplsFields {
    proto: ProtocolId,
    subtree: SubtreeId,
    label: FieldId,
    exp: FieldId,
    bottom: FieldId,
    ttl: FieldId,
    pfn: FieldId,
}

struct MplsDissector {
    f: MplsFields,
}

impl Dissector for MplsDissector {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        let f = self.f;
        cx.columns().set_protocol("MPLS");
        let mut offset = 0;
        let mut item;
        let bottom_label = loop {
            item = cx.add_protocol(parent, f.proto, view, offset, ENTRY_LEN, f.subtree);
            let mut cursor = TreeCursor::new(view, offset, item);
            for field in [f.label, f.exp, f.bottom, f.ttl] {
                cursor.add_no_advance(cx, field, ENTRY_LEN, Endianness::Big);
            }
            let entry = view.u32(offset, Endianness::Big)?;
            let label = (entry & LABEL_MASK) >> 12;
            cx.append_text(
                item,
                &format!(
                    ", Label: {label}, Exp: {}, S: {}, TTL: {}",
                    (entry >> 9) & 0x7,
                    (entry >> 8) & 0x1,
                    entry & 0xff
                ),
            );
            offset += ENTRY_LEN;
            if entry & BOTTOM_MASK != 0 {
                break label;
            }
        };
        cx.columns().set_info(format!("MPLS Label: {bottom_label}"));

        let payload = view.slice_to_end(offset)?;
        if payload.reported_len() == 0 {
            return Ok(Outcome::Accepted(offset));
        }
        if let Some(consumed) = cx.try_table(MPLS_LABEL_TABLE, bottom_label, &payload, parent) {
            return Ok(Outcome::Accepted(offset + consumed));
        }
        let nibble = payload.u8(0)? >> 4;
        cx.add_item(item, f.pfn, &payload, 0, 1, Endianness::Big);
        let consumed = cx.call_table(MPLS_PFN_TABLE, nibble, &payload, parent);
        Ok(Outcome::Accepted(offset + consumed))
    }
}

#[derive(Debug, Default)]
pub struct Mpls {
    handle: Option<DissectorHandle>,
}

impl Protocol for Mpls {
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        let proto = reg.register_protocol("MultiProtocol Label Switching Header", "MPLS", "mpls")?;
        let f = MplsFields {
            proto,
            subtree: reg.register_subtree(),
            label: reg.register_field(
                proto,
                FieldSpec::new("MPLS Label", "mpls.label", FieldType::UInt32)
                    .display(FieldDisplay::Dec)
                    .bitmask(LABEL_MASK as u64)
                    .values(ValueMap::Values(SPECIAL_LABELS)),
            )?,
            exp: reg.register_field(
                proto,
                FieldSpec::new("MPLS Experimental Bits", "mpls.exp", FieldType::UInt32)
                    .display(FieldDisplay::Dec)
                    .bitmask(0x0000_0e00),
            )?,
            bottom: reg.register_field(
                proto,
                FieldSpec::new("MPLS Bottom Of Label Stack", "mpls.bottom", FieldType::UInt32)
                    .display(FieldDisplay::Dec)
                    .bitmask(BOTTOM_MASK as u64),
            )?,
            ttl: reg.register_field(
                proto,
                FieldSpec::new("MPLS TTL", "mpls.ttl", FieldType::UInt32)
                    .display(FieldDisplay::Dec)
                    .bitmask(0x0000_00ff),
            )?,
            pfn: reg.register_field(
                proto,
                FieldSpec::new("Payload first nibble", "mpls.pfn", FieldType::UInt8)
                    .display(FieldDisplay::Dec)
                    .bitmask(0xf0)
                    .values(ValueMap::Values(PAYLOAD_FIRST_NIBBLE)),
            )?,
        };
        reg.register_table(MPLS_LABEL_TABLE, "MPLS label", KeyKind::UInt)?;
        reg.register_table(MPLS_PFN_TABLE, "MPLS payload first nibble", KeyKind::UInt)?;
        let handle = reg.register_dissector(DissectorHandle::new("mpls", Some(proto), MplsDissector { f }))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn handoff(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        if let Some(handle) = &self.handle {
            reg.set_dissector(ETHERTYPE_TABLE, ETHERTYPE_MPLS, handle)?;
        }
        Ok(())
    }
}
