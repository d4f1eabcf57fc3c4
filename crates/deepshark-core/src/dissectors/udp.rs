//! User Datagram Protocol.
//!
//! Payload dispatch order: `udp.port` on the lower port, then on the higher
//! port, then the `udp` heuristic chain, then `data`. With the
//! `udp.try_heuristic_first` preference the heuristic chain runs first.

use etherparse::IpNumber;

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{ExpertId, FieldDisplay, FieldId, FieldSpec, FieldType, ProtocolId, SubtreeId};
use crate::dispatch::{DissectCx, DissectResult, Dissector, DissectorHandle, KeyKind, Outcome};
use crate::engine::{EngineError, Protocol, Registrar};
use crate::expert::{ExpertGroup, ExpertSpec, Severity};
use crate::prefs::PrefSpec;
use crate::tree::{FieldValue, NodeId, TreeCursor};

use super::ipv4::IP_PROTO_TABLE;

/// Table keyed by UDP port.
pub const UDP_PORT_TABLE: &str = "udp.port";
/// Heuristic chain for payloads no port claims.
pub const UDP_HEURISTIC_TABLE: &str = "udp";
/// Frame-scope slot holding the `UdpPorts` of the datagram being decoded.
pub const PORTS_SLOT: &str = "udp.ports";

const HEADER_LEN: usize = 8;
const PREF_HEURISTIC_FIRST: &str = "udp.try_heuristic_first";

/// Ports of the innermost UDP header, readable by payload decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpPorts {
    pub src: u16,
    pub dst: u16,
}

#[derive(Debug, Clone, Copy)]
struct UdpFields {
    proto: ProtocolId,
    subtree: SubtreeId,
    srcport: FieldId,
    dstport: FieldId,
    port: FieldId,
    length: FieldId,
    checksum: FieldId,
    payload_len: FieldId,
    ei_bad_length: ExpertId,
}

struct UdpDissector {
    f: UdpFields,
}

impl Dissector for UdpDissector {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        let f = self.f;
        let header_len = HEADER_LEN.min(view.reported_len());
        let item = cx.add_protocol(parent, f.proto, view, 0, header_len, f.subtree);
        let mut cursor = TreeCursor::new(view, 0, item);
        cursor.add(cx, f.srcport, 2, Endianness::Big);
        cursor.add(cx, f.dstport, 2, Endianness::Big);
        let length_node = cursor.add(cx, f.length, 2, Endianness::Big);
        cursor.add(cx, f.checksum, 2, Endianness::Big);

        let src = view.u16(0, Endianness::Big)?;
        let dst = view.u16(2, Endianness::Big)?;
        let length = view.u16(4, Endianness::Big)? as usize;
        for offset in [0, 2] {
            let node = cx.add_item(item, f.port, view, offset, 2, Endianness::Big);
            cx.tree_mut().set_hidden(node);
        }
        cx.append_text(item, &format!(", Src Port: {src}, Dst Port: {dst}"));
        cx.columns().set_protocol("UDP");

        if length < HEADER_LEN {
            cx.report_expert_with(
                length_node,
                f.ei_bad_length,
                format!("Bad length value {length} < {HEADER_LEN}"),
            );
            cx.columns().set_info(format!("{src} → {dst} [BAD UDP LENGTH {length} < {HEADER_LEN}]"));
            return Ok(Outcome::Accepted(view.reported_len()));
        }
        let length = if length > view.reported_len() {
            cx.report_expert_with(
                length_node,
                f.ei_bad_length,
                format!(
                    "Bad length value {length} > IP payload length {}",
                    view.reported_len()
                ),
            );
            view.reported_len()
        } else {
            length
        };
        let payload_len = length - HEADER_LEN;
        cx.columns().set_info(format!("{src} → {dst} Len={payload_len}"));
        let generated = cx.add_generated(item, f.payload_len, FieldValue::UInt(payload_len as u64));
        cx.tree_mut().set_hidden(generated);

        cx.frame_mut().scope_mut().insert(PORTS_SLOT, UdpPorts { src, dst });
        let payload = view.slice(HEADER_LEN, payload_len)?;
        let consumed = dispatch_payload(cx, &payload, parent, src, dst);
        Ok(Outcome::Accepted(HEADER_LEN + consumed))
    }
}

fn dispatch_payload(
    cx: &mut DissectCx<'_>,
    payload: &BufferView,
    parent: NodeId,
    src: u16,
    dst: u16,
) -> usize {
    if payload.reported_len() == 0 {
        return 0;
    }
    let heuristic_first = cx.prefs().get_bool(PREF_HEURISTIC_FIRST).unwrap_or(false);
    if heuristic_first {
        if let Some(consumed) = cx.try_heuristics(UDP_HEURISTIC_TABLE, payload, parent) {
            return consumed;
        }
    }
    let (low, high) = if src <= dst { (src, dst) } else { (dst, src) };
    if let Some(consumed) = cx.try_table(UDP_PORT_TABLE, low, payload, parent) {
        return consumed;
    }
    if high != low {
        if let Some(consumed) = cx.try_table(UDP_PORT_TABLE, high, payload, parent) {
            return consumed;
        }
    }
    if !heuristic_first {
        if let Some(consumed) = cx.try_heuristics(UDP_HEURISTIC_TABLE, payload, parent) {
            return consumed;
        }
    }
    cx.call_data(payload, parent)
}

#[derive(Debug, Default)]
pub struct Udp {
    handle: Option<DissectorHandle>,
}

impl Protocol for Udp {
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        let proto = reg.register_protocol("User Datagram Protocol", "UDP", "udp")?;
        let port = |name: &str, filter: &str| {
            FieldSpec::new(name, filter, FieldType::UInt16).display(FieldDisplay::Dec)
        };
        let f = UdpFields {
            proto,
            subtree: reg.register_subtree(),
            srcport: reg.register_field(proto, port("Source Port", "udp.srcport"))?,
            dstport: reg.register_field(proto, port("Destination Port", "udp.dstport"))?,
            port: reg.register_field(proto, port("Source or Destination Port", "udp.port"))?,
            length: reg.register_field(proto, port("UDP Length", "udp.length"))?,
            checksum: reg.register_field(
                proto,
                FieldSpec::new("Checksum", "udp.checksum", FieldType::UInt16)
                    .display(FieldDisplay::Hex),
            )?,
            payload_len: reg.register_field(
                proto,
                FieldSpec::new("Payload length", "udp.payload_len", FieldType::UInt32)
                    .display(FieldDisplay::Dec),
            )?,
            ei_bad_length: reg.register_expert(
                proto,
                ExpertSpec::new(
                    "udp.length.bad",
                    ExpertGroup::Malformed,
                    Severity::Error,
                    "Bad length value",
                ),
            )?,
        };
        reg.register_table(UDP_PORT_TABLE, "UDP port", KeyKind::UInt)?;
        reg.register_table(UDP_HEURISTIC_TABLE, "UDP heuristic dissectors", KeyKind::UInt)?;
        reg.register_pref(PrefSpec::bool(
            PREF_HEURISTIC_FIRST,
            "Try heuristic sub-dissectors first",
            false,
        ))?;
        let handle = reg.register_dissector(DissectorHandle::new("udp", Some(proto), UdpDissector { f }))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn handoff(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        if let Some(handle) = &self.handle {
            reg.set_dissector(IP_PROTO_TABLE, IpNumber::UDP.0, handle)?;
        }
        Ok(())
    }
}
