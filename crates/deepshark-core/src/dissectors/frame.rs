//! The `frame` pseudo-protocol: per-frame metadata at the top of every tree.

use crate::buffer::BufferView;
use crate::catalog::{
    CatalogBuilder, CatalogError, FieldDisplay, FieldId, FieldSpec, FieldType, ProtocolId,
    SubtreeId, ValueMap,
};
use crate::dispatch::DissectCx;
use crate::frame::Direction;
use crate::tree::FieldValue;

/// Table keyed by capture link type; entry point of every dissection.
pub const WTAP_ENCAP_TABLE: &str = "wtap_encap";

const DIRECTIONS: &[(u64, &str)] = &[(0, "Unknown"), (1, "Sent"), (2, "Received")];

#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameFields {
    proto: ProtocolId,
    subtree: SubtreeId,
    hf_number: FieldId,
    hf_time: FieldId,
    hf_len: FieldId,
    hf_cap_len: FieldId,
    hf_link_type: FieldId,
    hf_direction: FieldId,
    hf_protocols: FieldId,
}

pub(crate) fn register(catalog: &mut CatalogBuilder) -> Result<FrameFields, CatalogError> {
    let proto = catalog.register_protocol("Frame", "FRAME", "frame")?;
    let p = Some(proto);
    Ok(FrameFields {
        proto,
        subtree: catalog.register_subtree(),
        hf_number: catalog.register_field(
            p,
            FieldSpec::new("Frame Number", "frame.number", FieldType::UInt32)
                .display(FieldDisplay::Dec),
        )?,
        hf_time: catalog.register_field(
            p,
            FieldSpec::new("Arrival Time", "frame.time", FieldType::AbsoluteTime),
        )?,
        hf_len: catalog.register_field(
            p,
            FieldSpec::new("Frame Length", "frame.len", FieldType::UInt32)
                .display(FieldDisplay::Dec),
        )?,
        hf_cap_len: catalog.register_field(
            p,
            FieldSpec::new("Capture Length", "frame.cap_len", FieldType::UInt32)
                .display(FieldDisplay::Dec),
        )?,
        hf_link_type: catalog.register_field(
            p,
            FieldSpec::new("Encapsulation type", "frame.encap_type", FieldType::UInt32)
                .display(FieldDisplay::Dec),
        )?,
        hf_direction: catalog.register_field(
            p,
            FieldSpec::new("Point-to-Point Direction", "frame.p2p_dir", FieldType::UInt8)
                .display(FieldDisplay::Dec)
                .values(ValueMap::Values(DIRECTIONS)),
        )?,
        hf_protocols: catalog.register_field(
            p,
            FieldSpec::new("Protocols in frame", "frame.protocols", FieldType::String),
        )?,
    })
}

pub(crate) fn dissect_frame(cx: &mut DissectCx<'_>, fields: &FrameFields, view: &BufferView) {
    let root = cx.tree().root();
    let reported = view.reported_len();
    let captured = view.captured_len();
    let number = cx.frame().number;
    let link_type = cx.frame().link_type;
    let direction = cx.frame().direction;
    let timestamp = cx.frame().timestamp;

    let item = cx.add_protocol(root, fields.proto, view, 0, reported, fields.subtree);
    cx.tree_mut().set_label(
        item,
        format!(
            "Frame {number}: {reported} bytes on wire ({} bits), {captured} bytes captured ({} bits)",
            reported * 8,
            captured * 8
        ),
    );
    if let Some(ts) = timestamp {
        let secs = ts.floor();
        let nanos = ((ts - secs) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
        cx.add_generated(
            item,
            fields.hf_time,
            FieldValue::Time {
                secs: secs as i64,
                nanos,
            },
        );
    }
    cx.add_generated(item, fields.hf_number, FieldValue::UInt(number as u64));
    cx.add_generated(item, fields.hf_len, FieldValue::UInt(reported as u64));
    cx.add_generated(item, fields.hf_cap_len, FieldValue::UInt(captured as u64));
    cx.add_generated(
        item,
        fields.hf_link_type,
        FieldValue::UInt(link_type.0 as u32 as u64),
    );
    if direction != Direction::Unknown {
        let code = match direction {
            Direction::Outbound => 1,
            Direction::Inbound => 2,
            Direction::Unknown => 0,
        };
        cx.add_generated(item, fields.hf_direction, FieldValue::UInt(code));
    }

    cx.frame_mut().layers_mut().push("frame".into());
    let consumed = cx.call_table(WTAP_ENCAP_TABLE, link_type.0 as u32, view, root);
    cx.flag_unconsumed(root, view, consumed);

    let protocols = cx.frame().layers().joined();
    cx.add_generated(item, fields.hf_protocols, FieldValue::String(protocols));
}
