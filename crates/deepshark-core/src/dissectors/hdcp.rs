//! HDCP (version 1) register traffic over I2C.
//!
//! The transmitter either writes a register (offset byte plus data) or asks
//! for the content of one (offset byte alone); the receiver answers with the
//! bare content. A request is remembered in capture scope on the first pass
//! and the next inbound frame is taken as its response. The frame direction
//! has to be supplied by the frame source.
//!
//! No static table entry points here; select it with Decode-As on
//! `wtap_encap`.

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{
    FieldDisplay, FieldId, FieldSpec, FieldType, FrameNumKind, ProtocolId, SubtreeId, ValueMap,
};
use crate::dispatch::{DissectCx, DissectResult, Dissector, DissectorHandle, Outcome};
use crate::engine::{EngineError, Protocol, Registrar};
use crate::frame::Direction;
use crate::scope::FrameMap;
use crate::tree::{FieldValue, NodeId, TreeCursor};

use super::frame::WTAP_ENCAP_TABLE;

pub const HDCP_DISSECTOR: &str = "hdcp";
/// Capture-scope slot holding a `FrameMap<HdcpTransaction>` keyed by
/// request frame.
pub const TRANSACTIONS_SLOT: &str = "hdcp.transactions";

const REG_BKSV: u8 = 0x00;
const REG_AKSV: u8 = 0x10;
const REG_AN: u8 = 0x18;
const REG_BCAPS: u8 = 0x40;
const REG_BSTATUS: u8 = 0x41;

const REGISTERS: &[(u64, &str)] = &[
    (REG_BKSV as u64, "B_ksv"),
    (REG_AKSV as u64, "A_ksv"),
    (REG_AN as u64, "An"),
    (REG_BCAPS as u64, "B_caps"),
    (REG_BSTATUS as u64, "B_status"),
];

/// A register read: request frame, response frame once seen (0 before).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdcpTransaction {
    pub request_frame: u32,
    pub response_frame: u32,
    pub register: u8,
}

fn register_name(reg: u8) -> String {
    REGISTERS
        .iter()
        .find(|(value, _)| *value == reg as u64)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("unknown (0x{reg:x})"))
}

#[derive(Debug, Clone, Copy)]
struct HdcpFields {
    proto: ProtocolId,
    subtree: SubtreeId,
    reg: FieldId,
    resp_in: FieldId,
    resp_to: FieldId,
    a_ksv: FieldId,
    b_ksv: FieldId,
    an: FieldId,
    bcaps: [FieldId; 6],
    bstatus: [FieldId; 5],
    link_vfy: FieldId,
}

struct HdcpDissector {
    f: HdcpFields,
}

impl Dissector for HdcpDissector {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        let f = self.f;
        let number = cx.frame().number;
        cx.columns().set_protocol("HDCP");
        cx.columns().clear_info();
        let item = cx.add_protocol(parent, f.proto, view, 0, view.reported_len(), f.subtree);
        let mut cursor = TreeCursor::new(view, 0, item);

        if cx.frame().direction == Direction::Outbound {
            let reg = view.u8(0)?;
            cursor.add(cx, f.reg, 1, Endianness::Little);
            if view.remaining_reported(cursor.offset())? == 0 {
                cx.columns()
                    .append_sep_info(" ", &format!("request {}", register_name(reg)));
                self.request(cx, item, number, reg);
            } else {
                cx.columns()
                    .append_sep_info(" ", &format!("send {}", register_name(reg)));
                match reg {
                    REG_AKSV => {
                        cursor.add(cx, f.a_ksv, 5, Endianness::Little);
                    }
                    REG_AN => {
                        cursor.add(cx, f.an, 8, Endianness::Little);
                    }
                    _ => {}
                }
            }
            return Ok(Outcome::Accepted(view.reported_len()));
        }

        let matched = cx.capture().with(
            TRANSACTIONS_SLOT,
            |map: &mut FrameMap<HdcpTransaction>| {
                map.lookup_le_mut(number).map(|(_, trans)| {
                    if trans.response_frame == 0 {
                        trans.response_frame = number;
                    }
                    *trans
                })
            },
        );
        match matched.filter(|trans| trans.response_frame == number) {
            Some(trans) => {
                let name = register_name(trans.register);
                cx.columns().append_sep_info(" ", &format!("send {name}"));
                let node = cx.add_generated(item, f.resp_to, FieldValue::FrameNum(trans.request_frame));
                cx.tree_mut().set_label(
                    node,
                    format!(
                        "Response to frame {} (content of register {name})",
                        trans.request_frame
                    ),
                );
                match trans.register {
                    REG_BKSV => {
                        cursor.add(cx, f.b_ksv, 5, Endianness::Little);
                    }
                    REG_BCAPS => {
                        for field in f.bcaps {
                            cursor.add_no_advance(cx, field, 1, Endianness::Little);
                        }
                    }
                    REG_BSTATUS => {
                        for field in f.bstatus {
                            cursor.add_no_advance(cx, field, 2, Endianness::Little);
                        }
                    }
                    _ => {}
                }
            }
            None => {
                // Not an answer to a pending read: a 2-byte Ri' link check.
                if view.remaining_reported(cursor.offset())? == 2 {
                    cx.columns()
                        .append_sep_info(" ", "send link verification Ri'");
                    cursor.add_no_advance(cx, f.link_vfy, 2, Endianness::Little);
                }
            }
        }
        Ok(Outcome::Accepted(view.reported_len()))
    }
}

impl HdcpDissector {
    /// Record a register read on the first pass; point at its response on
    /// later passes.
    fn request(&self, cx: &mut DissectCx<'_>, item: NodeId, number: u32, reg: u8) {
        if !cx.visited() {
            cx.capture().with(TRANSACTIONS_SLOT, |map: &mut FrameMap<HdcpTransaction>| {
                map.insert(
                    number,
                    HdcpTransaction {
                        request_frame: number,
                        response_frame: 0,
                        register: reg,
                    },
                );
            });
            return;
        }
        let trans = cx.capture().with(
            TRANSACTIONS_SLOT,
            |map: &mut FrameMap<HdcpTransaction>| map.get(number).copied(),
        );
        let Some(trans) = trans.filter(|t| t.request_frame == number && t.response_frame != 0) else {
            return;
        };
        let node = cx.add_generated(item, self.f.resp_in, FieldValue::FrameNum(trans.response_frame));
        cx.tree_mut().set_label(
            node,
            format!(
                "Request to get the content of register {}, response in frame {}",
                register_name(trans.register),
                trans.response_frame
            ),
        );
    }
}

#[derive(Debug, Default)]
pub struct Hdcp {
    handle: Option<DissectorHandle>,
}

impl Protocol for Hdcp {
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        let proto = reg.register_protocol(
            "High bandwidth Digital Content Protection",
            "HDCP",
            "hdcp",
        )?;
        let bit = |name: &str, filter: &str, ftype, mask| {
            FieldSpec::new(name, filter, ftype)
                .display(FieldDisplay::Dec)
                .bitmask(mask)
        };
        let f = HdcpFields {
            proto,
            subtree: reg.register_subtree(),
            reg: reg.register_field(
                proto,
                FieldSpec::new("Register offset", "hdcp.reg", FieldType::UInt8)
                    .display(FieldDisplay::Hex)
                    .values(ValueMap::Values(REGISTERS)),
            )?,
            resp_in: reg.register_field(
                proto,
                FieldSpec::new(
                    "Response In",
                    "hdcp.resp_in",
                    FieldType::FrameNum(FrameNumKind::Response),
                )
                .blurb("The response to this request is in this frame"),
            )?,
            resp_to: reg.register_field(
                proto,
                FieldSpec::new(
                    "Response To",
                    "hdcp.resp_to",
                    FieldType::FrameNum(FrameNumKind::Request),
                )
                .blurb("This is the response to the request in this frame"),
            )?,
            a_ksv: reg.register_field(
                proto,
                FieldSpec::new("Transmitter's key selection vector", "hdcp.a_ksv", FieldType::UInt40)
                    .display(FieldDisplay::Hex),
            )?,
            b_ksv: reg.register_field(
                proto,
                FieldSpec::new("Receiver's key selection vector", "hdcp.b_ksv", FieldType::UInt40)
                    .display(FieldDisplay::Hex),
            )?,
            an: reg.register_field(
                proto,
                FieldSpec::new("Random number for the session", "hdcp.an", FieldType::UInt64)
                    .display(FieldDisplay::Hex),
            )?,
            bcaps: [
                reg.register_field(proto, bit("HDMI reserved", "hdcp.hdmi_reserved", FieldType::UInt8, 0x80))?,
                reg.register_field(proto, bit("Repeater", "hdcp.repeater", FieldType::UInt8, 0x40))?,
                reg.register_field(proto, bit("KSV fifo ready", "hdcp.ksv_fifo", FieldType::UInt8, 0x20))?,
                reg.register_field(
                    proto,
                    bit("Support for 400KHz transfers", "hdcp.fast_trans", FieldType::UInt8, 0x10),
                )?,
                reg.register_field(
                    proto,
                    bit("Support for additional features", "hdcp.features", FieldType::UInt8, 0x02),
                )?,
                reg.register_field(
                    proto,
                    bit("Support for fast re-authentication", "hdcp.fast_reauth", FieldType::UInt8, 0x01),
                )?,
            ],
            bstatus: [
                reg.register_field(proto, bit("HDMI mode", "hdcp.hdmi_mode", FieldType::UInt16, 0x1000))?,
                reg.register_field(
                    proto,
                    bit("Maximum cascading depth exceeded", "hdcp.max_casc_exc", FieldType::UInt16, 0x0800),
                )?,
                reg.register_field(
                    proto,
                    bit("Repeater cascade depth", "hdcp.depth", FieldType::UInt16, 0x0700),
                )?,
                reg.register_field(
                    proto,
                    bit("Maximum number of devices exceeded", "hdcp.max_devs_exc", FieldType::UInt16, 0x0080),
                )?,
                reg.register_field(
                    proto,
                    bit("Number of downstream receivers", "hdcp.downstream", FieldType::UInt16, 0x007f),
                )?,
            ],
            link_vfy: reg.register_field(
                proto,
                FieldSpec::new("Link verification response Ri'", "hdcp.link_vfy", FieldType::UInt16)
                    .display(FieldDisplay::Hex),
            )?,
        };
        let handle = reg.register_dissector(DissectorHandle::new(
            HDCP_DISSECTOR,
            Some(proto),
            HdcpDissector { f },
        ))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn handoff(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        if let Some(handle) = &self.handle {
            reg.add_for_decode_as(WTAP_ENCAP_TABLE, handle)?;
        }
        Ok(())
    }
}
