//! Internet Protocol version 4.
//!
//! Header fields, header checksum verification and dispatch on the protocol
//! number through `ip.proto`. Fragments are not reassembled; their payload is
//! handed to `data`.

use etherparse::IpNumber;
use pcap_parser::Linktype;

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{
    ExpertId, FieldDisplay, FieldId, FieldSpec, FieldType, ProtocolId, SubtreeId, ValueMap,
};
use crate::dispatch::{DissectCx, DissectResult, Dissector, DissectorHandle, KeyKind, Outcome};
use crate::engine::{EngineError, Protocol, Registrar};
use crate::expert::{ExpertGroup, ExpertSpec, Severity};
use crate::tree::{FieldValue, NodeId, TreeCursor};

use super::eth::{ETHERTYPE_IPV4, ETHERTYPE_TABLE};
use super::frame::WTAP_ENCAP_TABLE;
use super::mpls::MPLS_PFN_TABLE;

/// Table keyed by the IP protocol number.
pub const IP_PROTO_TABLE: &str = "ip.proto";
/// Registered dissector name.
pub const IP_DISSECTOR: &str = "ip";

const MIN_HEADER_LEN: usize = 20;
const FLAG_MORE_FRAGMENTS: u16 = 0x2000;
const FRAG_OFFSET_MASK: u16 = 0x1fff;

const IP_PROTOCOLS: &[(u64, &str)] = &[
    (1, "ICMP"),
    (2, "IGMP"),
    (4, "IPIP"),
    (6, "TCP"),
    (17, "UDP"),
    (41, "IPv6"),
    (47, "GRE"),
    (50, "ESP"),
    (137, "MPLS-in-IP"),
];

const FLAGS: &[(u64, &str)] = &[
    (0, "None"),
    (1, "More fragments"),
    (2, "Don't fragment"),
    (4, "Reserved bit"),
];

#[derive(Debug, Clone, Copy)]
struct IpFields {
    proto: ProtocolId,
    subtree: SubtreeId,
    version: FieldId,
    hdr_len: FieldId,
    dsfield: FieldId,
    len: FieldId,
    id: FieldId,
    flags: FieldId,
    frag_offset: FieldId,
    ttl: FieldId,
    protocol: FieldId,
    checksum: FieldId,
    src: FieldId,
    dst: FieldId,
    ei_bad_version: ExpertId,
    ei_bad_header_len: ExpertId,
    ei_bad_total_len: ExpertId,
    ei_bad_checksum: ExpertId,
}

struct Ipv4Dissector {
    f: IpFields,
}

impl Dissector for Ipv4Dissector {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        let f = self.f;
        let first = view.u8(0)?;
        let version = first >> 4;
        let header_len = (first & 0x0f) as usize * 4;

        cx.columns().set_protocol("IPv4");
        cx.columns().clear_info();
        let item = cx.add_protocol(
            parent,
            f.proto,
            view,
            0,
            header_len.clamp(1, view.reported_len()),
            f.subtree,
        );
        let mut cursor = TreeCursor::new(view, 0, item);
        let version_node = cursor.add_no_advance(cx, f.version, 1, Endianness::Big);
        let hdr_len_node = cursor.add(cx, f.hdr_len, 1, Endianness::Big);
        cx.append_text(hdr_len_node, &format!(" ({header_len} bytes)"));

        if version != 4 {
            cx.report_expert_with(
                version_node,
                f.ei_bad_version,
                format!("Bogus IP version ({version}, must be 4)"),
            );
            return Ok(Outcome::Accepted(view.reported_len()));
        }
        if header_len < MIN_HEADER_LEN {
            cx.report_expert_with(
                hdr_len_node,
                f.ei_bad_header_len,
                format!("Bogus IP header length ({header_len}, must be at least {MIN_HEADER_LEN})"),
            );
            cx.columns().set_info(format!("Bogus IP header length ({header_len})"));
            return Ok(Outcome::Accepted(view.reported_len()));
        }

        cursor.add(cx, f.dsfield, 1, Endianness::Big);
        let len_node = cursor.add(cx, f.len, 2, Endianness::Big);
        cursor.add(cx, f.id, 2, Endianness::Big);
        cursor.add_no_advance(cx, f.flags, 2, Endianness::Big);
        cursor.add(cx, f.frag_offset, 2, Endianness::Big);
        cursor.add(cx, f.ttl, 1, Endianness::Big);
        cursor.add(cx, f.protocol, 1, Endianness::Big);
        let checksum_node = cursor.add(cx, f.checksum, 2, Endianness::Big);
        let src_node = cursor.add(cx, f.src, 4, Endianness::Big);
        let dst_node = cursor.add(cx, f.dst, 4, Endianness::Big);
        if header_len > MIN_HEADER_LEN {
            let options = header_len - MIN_HEADER_LEN;
            cx.add_text(item, view, MIN_HEADER_LEN, options, format!("Options: ({options} bytes)"));
        }

        let total_len = view.u16(2, Endianness::Big)? as usize;
        let fragment = view.u16(6, Endianness::Big)?;
        let protocol = view.u8(9)?;
        let src = cx.tree().value(src_node).clone();
        let dst = cx.tree().value(dst_node).clone();
        let (src, dst) = (display_addr(&src), display_addr(&dst));
        cx.append_text(item, &format!(", Src: {src}, Dst: {dst}"));
        cx.columns().set_info(format!("{src} → {dst}"));

        if total_len < header_len {
            cx.report_expert_with(
                len_node,
                f.ei_bad_total_len,
                format!("Bogus IP length ({total_len}, less than header length {header_len})"),
            );
            return Ok(Outcome::Accepted(view.reported_len()));
        }
        let total_len = if total_len > view.reported_len() {
            cx.report_expert_with(
                len_node,
                f.ei_bad_total_len,
                format!(
                    "Bogus IP length ({total_len}, exceeds packet length {})",
                    view.reported_len()
                ),
            );
            view.reported_len()
        } else {
            total_len
        };

        if let Ok(header) = view.bytes(0, header_len) {
            let computed = ones_complement_sum(&header);
            if computed != 0xffff {
                let stored = view.u16(10, Endianness::Big)?;
                cx.report_expert_with(
                    checksum_node,
                    f.ei_bad_checksum,
                    format!("Bad checksum 0x{stored:04x} [should be 0x{:04x}]", expected_checksum(&header)),
                );
                cx.append_text(checksum_node, " [incorrect]");
            } else {
                cx.append_text(checksum_node, " [correct]");
            }
        }

        let payload = view.slice(header_len, total_len - header_len)?;
        let is_fragment =
            fragment & FLAG_MORE_FRAGMENTS != 0 || fragment & FRAG_OFFSET_MASK != 0;
        if is_fragment {
            cx.columns().append_sep_info(" ", "[Fragmented IP protocol]");
            cx.call_data(&payload, parent);
        } else {
            cx.call_table(IP_PROTO_TABLE, protocol, &payload, parent);
        }
        Ok(Outcome::Accepted(total_len))
    }
}

fn display_addr(value: &FieldValue) -> String {
    match value {
        FieldValue::Ipv4(addr) => addr.to_string(),
        _ => String::from("?"),
    }
}

/// 16-bit one's-complement sum over `bytes`, folded.
fn ones_complement_sum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Checksum the header should carry, computed with the checksum field zeroed.
fn expected_checksum(header: &[u8]) -> u16 {
    let mut copy = header.to_vec();
    if copy.len() >= 12 {
        copy[10] = 0;
        copy[11] = 0;
    }
    !ones_complement_sum(&copy)
}

#[derive(Debug, Default)]
pub struct Ipv4 {
    handle: Option<DissectorHandle>,
}

impl Protocol for Ipv4 {
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        let proto = reg.register_protocol("Internet Protocol Version 4", "IPv4", "ip")?;
        let f = IpFields {
            proto,
            subtree: reg.register_subtree(),
            version: reg.register_field(
                proto,
                FieldSpec::new("Version", "ip.version", FieldType::UInt8)
                    .display(FieldDisplay::Dec)
                    .bitmask(0xf0),
            )?,
            hdr_len: reg.register_field(
                proto,
                FieldSpec::new("Header Length", "ip.hdr_len", FieldType::UInt8)
                    .display(FieldDisplay::Dec)
                    .bitmask(0x0f)
                    .blurb("Header length in 32-bit words"),
            )?,
            dsfield: reg.register_field(
                proto,
                FieldSpec::new("Differentiated Services Field", "ip.dsfield", FieldType::UInt8)
                    .display(FieldDisplay::Hex),
            )?,
            len: reg.register_field(
                proto,
                FieldSpec::new("Total Length", "ip.len", FieldType::UInt16).display(FieldDisplay::Dec),
            )?,
            id: reg.register_field(
                proto,
                FieldSpec::new("Identification", "ip.id", FieldType::UInt16).display(FieldDisplay::HexDec),
            )?,
            flags: reg.register_field(
                proto,
                FieldSpec::new("Flags", "ip.flags", FieldType::UInt16)
                    .display(FieldDisplay::Hex)
                    .bitmask(0xe000)
                    .values(ValueMap::Values(FLAGS)),
            )?,
            frag_offset: reg.register_field(
                proto,
                FieldSpec::new("Fragment Offset", "ip.frag_offset", FieldType::UInt16)
                    .display(FieldDisplay::Dec)
                    .bitmask(FRAG_OFFSET_MASK as u64),
            )?,
            ttl: reg.register_field(
                proto,
                FieldSpec::new("Time to Live", "ip.ttl", FieldType::UInt8).display(FieldDisplay::Dec),
            )?,
            protocol: reg.register_field(
                proto,
                FieldSpec::new("Protocol", "ip.proto", FieldType::UInt8)
                    .display(FieldDisplay::Dec)
                    .values(ValueMap::Values(IP_PROTOCOLS)),
            )?,
            checksum: reg.register_field(
                proto,
                FieldSpec::new("Header Checksum", "ip.checksum", FieldType::UInt16).display(FieldDisplay::Hex),
            )?,
            src: reg.register_field(
                proto,
                FieldSpec::new("Source Address", "ip.src", FieldType::Ipv4),
            )?,
            dst: reg.register_field(
                proto,
                FieldSpec::new("Destination Address", "ip.dst", FieldType::Ipv4),
            )?,
            ei_bad_version: reg.register_expert(
                proto,
                ExpertSpec::new(
                    "ip.bogus_ip_version",
                    ExpertGroup::Malformed,
                    Severity::Error,
                    "Bogus IP version",
                ),
            )?,
            ei_bad_header_len: reg.register_expert(
                proto,
                ExpertSpec::new(
                    "ip.bogus_header_length",
                    ExpertGroup::Malformed,
                    Severity::Error,
                    "Bogus IP header length",
                ),
            )?,
            ei_bad_total_len: reg.register_expert(
                proto,
                ExpertSpec::new(
                    "ip.bogus_ip_length",
                    ExpertGroup::Malformed,
                    Severity::Error,
                    "Bogus IP length",
                ),
            )?,
            ei_bad_checksum: reg.register_expert(
                proto,
                ExpertSpec::new(
                    "ip.checksum_bad",
                    ExpertGroup::Checksum,
                    Severity::Error,
                    "Bad checksum",
                ),
            )?,
        };
        reg.register_table(IP_PROTO_TABLE, "IP protocol", KeyKind::UInt)?;
        let handle = reg.register_dissector(DissectorHandle::new(
            IP_DISSECTOR,
            Some(proto),
            Ipv4Dissector { f },
        ))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn handoff(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        reg.set_dissector(ETHERTYPE_TABLE, ETHERTYPE_IPV4, handle)?;
        reg.set_dissector(WTAP_ENCAP_TABLE, Linktype::RAW.0 as u32, handle)?;
        reg.set_dissector(IP_PROTO_TABLE, IpNumber::IPV4.0, handle)?;
        reg.set_dissector(MPLS_PFN_TABLE, 4u8, handle)?;
        Ok(())
    }
}
