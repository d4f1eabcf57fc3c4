//! SAToP: structure-agnostic TDM over packet (RFC 4553).
//!
//! Two entry points share one decoder: `pw_satop_mpls` (control word first,
//! optional RTP header after it) and `pw_satop_udp` (optional RTP header
//! first). Neither sits in a static table; they are offered for Decode-As on
//! `mpls.label`, `mpls.pfn` and `udp.port`, and `pwsatopcw.udp.port` pins the
//! UDP variant to a port.

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{ExpertId, FieldDisplay, FieldId, FieldSpec, FieldType, ProtocolId, SubtreeId, ValueMap};
use crate::dispatch::{DissectCx, DissectResult, Dissector, DissectorHandle, Outcome};
use crate::engine::{EngineError, Protocol, Registrar};
use crate::expert::{ExpertGroup, ExpertSpec, Severity};
use crate::prefs::PrefSpec;
use crate::tree::{FieldValue, NodeId};

use super::super::mpls::{MPLS_LABEL_TABLE, MPLS_PFN_TABLE};
use super::super::udp::UDP_PORT_TABLE;
use super::length::{LengthProblem, PayloadShape, arbitrate};
use super::padding::PW_PADDING_DISSECTOR;
use super::CONTROL_WORD_LEN;

pub const SATOP_MPLS_DISSECTOR: &str = "pw_satop_mpls";
pub const SATOP_UDP_DISSECTOR: &str = "pw_satop_udp";

const SHORT_NAME: &str = "SAToP";
const RTP_HEADER_LEN: usize = 12;

const PREF_RTP_HEADER: &str = "pwsatopcw.rtp_header";
const PREF_RTP_HEURISTIC: &str = "pwsatopcw.rtp_header_heuristic";
const PREF_UDP_PORT: &str = "pwsatopcw.udp.port";

const L_BIT: &[(u64, &str)] = &[(0, "Valid"), (1, "Invalid")];
const R_BIT: &[(u64, &str)] = &[(0, "Received"), (1, "Not received")];
const FRAGMENTATION: &[(u64, &str)] = &[
    (0, "Unfragmented"),
    (1, "First fragment"),
    (2, "Last fragment"),
    (3, "Intermediate fragment"),
];

/// How the PW reached us; decides where the RTP header may sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Demux {
    Mpls,
    Udp,
}

impl Demux {
    fn rtp_offset(self) -> usize {
        match self {
            Demux::Mpls => CONTROL_WORD_LEN,
            Demux::Udp => 0,
        }
    }

    /// Offset of the control word sequence number when an RTP header is
    /// present.
    fn seqno_offset(self) -> usize {
        match self {
            Demux::Mpls => 2,
            Demux::Udp => RTP_HEADER_LEN + 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SatopFields {
    proto: ProtocolId,
    subtree: SubtreeId,
    cw: FieldId,
    bits03: FieldId,
    lbit: FieldId,
    rbit: FieldId,
    rsv: FieldId,
    frag: FieldId,
    length: FieldId,
    seqno: FieldId,
    payload: FieldId,
    payload_len: FieldId,
    ei_too_small: ExpertId,
    ei_bits03: ExpertId,
    ei_rsv: ExpertId,
    ei_frag: ExpertId,
    ei_size_invalid: ExpertId,
    ei_undecoded: ExpertId,
}

/// Control word checks that do not depend on the length field.
#[derive(Debug, Clone, Copy, Default)]
struct CwFlags {
    bad_bits03: bool,
    bad_rsv: bool,
    bad_frag: bool,
}

impl CwFlags {
    fn any(self) -> bool {
        self.bad_bits03 || self.bad_rsv || self.bad_frag
    }
}

struct SatopDissector {
    f: SatopFields,
    demux: Demux,
}

impl Dissector for SatopDissector {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        let f = self.f;
        if self.demux == Demux::Mpls && !view.is_empty() {
            // IP straight after the label stack: not a pseudowire.
            let nibble = view.u8(0)? >> 4;
            if nibble == 4 || nibble == 6 {
                return Ok(Outcome::Rejected);
            }
        }

        let packet_size = view.reported_len();
        let rtp_forced = cx.prefs().get_bool(PREF_RTP_HEADER).unwrap_or(false);
        let min_size = if rtp_forced {
            CONTROL_WORD_LEN + RTP_HEADER_LEN
        } else {
            CONTROL_WORD_LEN
        };
        cx.columns().set_protocol(SHORT_NAME);
        if packet_size < min_size {
            let item = cx.add_protocol(parent, f.proto, view, 0, packet_size, f.subtree);
            cx.report_expert_with(
                item,
                f.ei_too_small,
                format!("PW packet size ({packet_size}) is too small to carry sensible information"),
            );
            cx.columns().set_info("Malformed: PW packet is too small");
            return Ok(Outcome::Accepted(packet_size));
        }

        let has_rtp = rtp_forced
            || (cx.prefs().get_bool(PREF_RTP_HEURISTIC).unwrap_or(true)
                && looks_like_rtp(view, self.demux));
        let (cw_offset, encaps_size) = match (has_rtp, self.demux) {
            (true, Demux::Udp) => (RTP_HEADER_LEN, CONTROL_WORD_LEN + RTP_HEADER_LEN),
            (true, Demux::Mpls) => (0, CONTROL_WORD_LEN + RTP_HEADER_LEN),
            (false, _) => (0, CONTROL_WORD_LEN),
        };

        let cw = view.u32(cw_offset, Endianness::Big)?;
        let [flags_byte, length_byte, _, _] = cw.to_be_bytes();
        let flags = CwFlags {
            bad_bits03: flags_byte & 0xf0 != 0,
            bad_rsv: flags_byte & 0x03 != 0,
            bad_frag: length_byte & 0xc0 != 0,
        };
        let layout = arbitrate(encaps_size, packet_size, (length_byte & 0x3f) as usize);
        // With the L bit set an empty payload is expected.
        let payload_bad = layout.payload == 0 && flags_byte & 0x08 == 0;

        cx.columns().clear_info();
        if flags.any() || layout.problem.is_some() {
            cx.columns().set_info("CW:Bad, ");
        }
        if payload_bad {
            cx.columns().append_info("Payload size:0 (Bad)");
        } else {
            cx.columns()
                .append_info(&format!("TDM octets:{}", layout.payload));
        }
        if layout.padding != 0 {
            cx.columns()
                .append_info(&format!(", Padding:{}", layout.padding));
        }

        let item = cx.add_protocol(parent, f.proto, view, 0, packet_size, f.subtree);
        cx.append_text(item, &format!(", CW: 0x{cw:08x}, {}", octets(layout.payload)));
        if has_rtp && self.demux == Demux::Udp {
            self.add_rtp(cx, item, view, 0);
        }
        self.add_control_word(cx, item, view, cw_offset, flags, layout.problem, encaps_size);
        if has_rtp && self.demux == Demux::Mpls {
            self.add_rtp(cx, item, view, CONTROL_WORD_LEN);
        }

        if payload_bad {
            cx.report_expert_with(
                item,
                f.ei_size_invalid,
                "SAToP payload: none found. Size of payload must be <> 0",
            );
        } else if layout.payload == 0 {
            cx.report_expert(item, f.ei_undecoded);
        } else {
            let payload = view.slice(encaps_size, layout.payload)?;
            let node = cx.add_item(item, f.payload, &payload, 0, payload.captured_len(), Endianness::Big);
            let shape = PayloadShape::classify(layout.payload);
            cx.append_text(node, &format!(", {}{}", octets(layout.payload), shape.label()));
            let tree = cx.start_subtree(node, f.subtree);
            cx.call_data(&payload, tree);
            let len = cx.add_generated(tree, f.payload_len, FieldValue::Int(layout.payload as i64));
            cx.tree_mut().set_hidden(len);
        }

        if layout.padding > 0 {
            let padding = view.slice(encaps_size + layout.payload, layout.padding)?;
            match cx.find_dissector(PW_PADDING_DISSECTOR) {
                Some(handle) => {
                    cx.call_dissector(&handle, &padding, item);
                }
                None => {
                    cx.call_data(&padding, item);
                }
            }
        }
        Ok(Outcome::Accepted(packet_size))
    }
}

impl SatopDissector {
    #[allow(clippy::too_many_arguments)]
    fn add_control_word(
        &self,
        cx: &mut DissectCx<'_>,
        item: NodeId,
        view: &BufferView,
        offset: usize,
        flags: CwFlags,
        problem: Option<LengthProblem>,
        encaps_size: usize,
    ) {
        let f = self.f;
        let cw_view = match view.slice(offset, CONTROL_WORD_LEN) {
            Ok(cw_view) => cw_view,
            Err(_) => return,
        };
        let node = cx.add_item(item, f.cw, &cw_view, 0, CONTROL_WORD_LEN, Endianness::Big);
        let tree = cx.start_subtree(node, f.subtree);
        if flags.bad_bits03 {
            let bits = cx.add_item(tree, f.bits03, &cw_view, 0, 1, Endianness::Big);
            cx.report_expert(bits, f.ei_bits03);
        }
        cx.add_item(tree, f.lbit, &cw_view, 0, 1, Endianness::Big);
        cx.add_item(tree, f.rbit, &cw_view, 0, 1, Endianness::Big);
        let rsv = cx.add_item(tree, f.rsv, &cw_view, 0, 1, Endianness::Big);
        if flags.bad_rsv {
            cx.report_expert(rsv, f.ei_rsv);
        }
        let frag = cx.add_item(tree, f.frag, &cw_view, 1, 1, Endianness::Big);
        if flags.bad_frag {
            cx.report_expert(frag, f.ei_frag);
        }
        let length = cx.add_item(tree, f.length, &cw_view, 1, 1, Endianness::Big);
        if let Some(problem) = problem {
            tracing::debug!(%problem, encaps_size, "SAToP length field rejected");
            cx.report_expert_with(length, f.ei_size_invalid, problem.to_string());
        }
        cx.add_item(tree, f.seqno, &cw_view, 2, 2, Endianness::Big);
    }

    fn add_rtp(&self, cx: &mut DissectCx<'_>, item: NodeId, view: &BufferView, offset: usize) {
        let node = cx.add_text(item, view, offset, RTP_HEADER_LEN, "RTP Header");
        if let Ok(seq) = view.u16(offset + 2, Endianness::Big) {
            cx.append_text(node, &format!(", Seq: {seq}"));
        }
    }
}

/// RTP version 2 with no padding, extension, CSRCs or marker, whose
/// sequence number matches the control word's.
fn looks_like_rtp(view: &BufferView, demux: Demux) -> bool {
    if view.reported_len() < CONTROL_WORD_LEN + RTP_HEADER_LEN {
        return false;
    }
    let offset = demux.rtp_offset();
    let check = || -> Result<bool, crate::buffer::BufferError> {
        let first = view.u8(offset)?;
        let marker = view.u8(offset + 1)? & 0x80;
        let rtp_seq = view.u16(offset + 2, Endianness::Big)?;
        let cw_seq = view.u16(demux.seqno_offset(), Endianness::Big)?;
        Ok(first == 0x80 && marker == 0 && rtp_seq == cw_seq)
    };
    check().unwrap_or(false)
}

fn octets(n: usize) -> String {
    if n == 1 {
        "1 octet".to_string()
    } else {
        format!("{n} octets")
    }
}

#[derive(Debug, Default)]
pub struct Satop {
    mpls: Option<DissectorHandle>,
    udp: Option<DissectorHandle>,
}

impl Protocol for Satop {
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        let proto = reg.register_protocol(
            "Structure-agnostic TDM over Packet",
            SHORT_NAME,
            "pwsatopcw",
        )?;
        let bits = |name: &str, filter: &str, mask| {
            FieldSpec::new(name, filter, FieldType::UInt8)
                .display(FieldDisplay::Dec)
                .bitmask(mask)
        };
        let malformed = |name: &str, summary: &str| {
            ExpertSpec::new(name, ExpertGroup::Malformed, Severity::Error, summary)
        };
        let f = SatopFields {
            proto,
            subtree: reg.register_subtree(),
            cw: reg.register_field(proto, FieldSpec::new("Control Word", "pwsatop.cw", FieldType::None))?,
            bits03: reg.register_field(proto, bits("Bits 0 to 3", "pwsatop.cw.bits03", 0xf0))?,
            lbit: reg.register_field(
                proto,
                bits("L bit: TDM payload state", "pwsatop.cw.lbit", 0x08).values(ValueMap::Values(L_BIT)),
            )?,
            rbit: reg.register_field(
                proto,
                bits("R bit: Local CE-bound IWF", "pwsatop.cw.rbit", 0x04).values(ValueMap::Values(R_BIT)),
            )?,
            rsv: reg.register_field(proto, bits("Reserved", "pwsatop.cw.rsv", 0x03))?,
            frag: reg.register_field(
                proto,
                bits("Fragmentation", "pwsatop.cw.frag", 0xc0).values(ValueMap::Values(FRAGMENTATION)),
            )?,
            length: reg.register_field(proto, bits("CW Length", "pwsatop.cw.length", 0x3f))?,
            seqno: reg.register_field(
                proto,
                FieldSpec::new("Sequence number", "pwsatop.cw.seqno", FieldType::UInt16)
                    .display(FieldDisplay::Dec),
            )?,
            payload: reg.register_field(
                proto,
                FieldSpec::new("TDM payload", "pwsatop.payload", FieldType::Bytes),
            )?,
            payload_len: reg.register_field(
                proto,
                FieldSpec::new("TDM payload length", "pwsatop.payload.len", FieldType::Int32)
                    .display(FieldDisplay::Dec),
            )?,
            ei_too_small: reg.register_expert(
                proto,
                malformed(
                    "pwsatop.packet_size_too_small",
                    "PW packet size is too small to carry sensible information",
                ),
            )?,
            ei_bits03: reg.register_expert(
                proto,
                malformed("pwsatop.cw.bits03.not_zero", "Bits 0..3 of Control Word must be 0"),
            )?,
            ei_rsv: reg.register_expert(
                proto,
                malformed("pwsatop.cw.rsv.not_zero", "RSV bits of Control Word must be 0"),
            )?,
            ei_frag: reg.register_expert(
                proto,
                malformed(
                    "pwsatop.cw.frag.not_allowed",
                    "Fragmentation of payload is not allowed for SAToP",
                ),
            )?,
            ei_size_invalid: reg.register_expert(
                proto,
                malformed("pwsatop.payload.size_invalid", "Bad Length: too small"),
            )?,
            ei_undecoded: reg.register_expert(
                proto,
                ExpertSpec::new(
                    "pwsatop.payload.undecoded",
                    ExpertGroup::Undecoded,
                    Severity::Note,
                    "SAToP payload: omitted to conserve bandwidth",
                ),
            )?,
        };
        reg.register_pref(PrefSpec::bool(PREF_RTP_HEADER, "RTP header in SAToP header", false))?;
        reg.register_pref(PrefSpec::bool(
            PREF_RTP_HEURISTIC,
            "Try to find RTP header in SAToP header",
            true,
        ))?;
        reg.register_pref(PrefSpec::uint(PREF_UDP_PORT, "SAToP UDP port", 0))?;

        self.mpls = Some(reg.register_dissector(DissectorHandle::new(
            SATOP_MPLS_DISSECTOR,
            Some(proto),
            SatopDissector { f, demux: Demux::Mpls },
        ))?);
        self.udp = Some(reg.register_dissector(DissectorHandle::new(
            SATOP_UDP_DISSECTOR,
            Some(proto),
            SatopDissector { f, demux: Demux::Udp },
        ))?);
        Ok(())
    }

    fn handoff(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        if let Some(mpls) = &self.mpls {
            reg.add_for_decode_as(MPLS_LABEL_TABLE, mpls)?;
            reg.add_for_decode_as(MPLS_PFN_TABLE, mpls)?;
        }
        if let Some(udp) = &self.udp {
            reg.add_for_decode_as(UDP_PORT_TABLE, udp)?;
            let port = reg.prefs().get_uint(PREF_UDP_PORT).unwrap_or(0);
            if let Ok(port) = u16::try_from(port) {
                if port != 0 {
                    reg.set_dissector(UDP_PORT_TABLE, port, udp)?;
                }
            }
        }
        Ok(())
    }
}
