//! Ethernet II.

use etherparse::EtherType;
use pcap_parser::Linktype;

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{FieldDisplay, FieldId, FieldSpec, FieldType, ProtocolId, SubtreeId, ValueMap};
use crate::dispatch::{DissectCx, DissectResult, Dissector, DissectorHandle, KeyKind, Outcome};
use crate::engine::{EngineError, Protocol, Registrar};
use crate::tree::value::ether_string;
use crate::tree::{NodeId, TreeCursor};

use super::frame::WTAP_ENCAP_TABLE;

/// Table keyed by the 16-bit EtherType.
pub const ETHERTYPE_TABLE: &str = "ethertype";
pub const ETHERTYPE_IPV4: u16 = EtherType::IPV4.0;
pub const ETHERTYPE_MPLS: u16 = 0x8847;

const HEADER_LEN: usize = 14;
/// Type/length values below this are 802.3 lengths.
const MIN_ETHERTYPE: u16 = 0x0600;

const ETHERTYPES: &[(u64, &str)] = &[
    (0x0800, "IPv4"),
    (0x0806, "ARP"),
    (0x8100, "802.1Q Virtual LAN"),
    (0x86dd, "IPv6"),
    (0x8847, "MPLS label switched packet"),
    (0x8848, "MPLS multicast label switched packet"),
];

#[derive(Debug, Clone, Copy)]
struct EthFields {
    proto: ProtocolId,
    subtree: SubtreeId,
    dst: FieldId,
    src: FieldId,
    ethertype: FieldId,
    len: FieldId,
    trailer: FieldId,
}

struct EthDissector {
    f: EthFields,
}

impl Dissector for EthDissector {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        let f = self.f;
        let header_len = HEADER_LEN.min(view.reported_len());
        let item = cx.add_protocol(parent, f.proto, view, 0, header_len, f.subtree);

        let mut cursor = TreeCursor::new(view, 0, item);
        cursor.add(cx, f.dst, 6, Endianness::Big);
        cursor.add(cx, f.src, 6, Endianness::Big);
        let dst = view.bytes(0, 6)?;
        let src = view.bytes(6, 6)?;
        let (dst, src) = (mac(&dst), mac(&src));
        cx.append_text(item, &format!(", Src: {src}, Dst: {dst}"));
        cx.columns().set_protocol("ETH");
        cx.columns().set_info(format!("{src} → {dst}"));

        let type_or_len = view.u16(12, Endianness::Big)?;
        if type_or_len < MIN_ETHERTYPE {
            // IEEE 802.3 frame: the field is the payload length.
            cursor.add(cx, f.len, 2, Endianness::Big);
            let payload_len = (type_or_len as usize).min(view.remaining_reported(HEADER_LEN)?);
            let payload = view.slice(HEADER_LEN, payload_len)?;
            let consumed = cx.call_data(&payload, parent);
            self.add_trailer(cx, item, view, HEADER_LEN + consumed);
            return Ok(Outcome::Accepted(view.reported_len()));
        }

        cursor.add(cx, f.ethertype, 2, Endianness::Big);
        let payload = view.slice_to_end(HEADER_LEN)?;
        let consumed = cx.call_table(ETHERTYPE_TABLE, type_or_len, &payload, parent);
        self.add_trailer(cx, item, view, HEADER_LEN + consumed);
        Ok(Outcome::Accepted(view.reported_len()))
    }
}

impl EthDissector {
    /// Bytes after the upper layer's payload, e.g. minimum-size padding.
    fn add_trailer(&self, cx: &mut DissectCx<'_>, item: NodeId, view: &BufferView, end: usize) {
        let captured = view.remaining_captured(end);
        if captured == 0 {
            return;
        }
        cx.add_item(item, self.f.trailer, view, end, captured, Endianness::Big);
    }
}

fn mac(bytes: &[u8]) -> String {
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&bytes[..6]);
    ether_string(&octets)
}

#[derive(Debug, Default)]
pub struct Ethernet {
    handle: Option<DissectorHandle>,
}

impl Protocol for Ethernet {
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        let proto = reg.register_protocol("Ethernet II", "ETH", "eth")?;
        let f = EthFields {
            proto,
            subtree: reg.register_subtree(),
            dst: reg.register_field(
                proto,
                FieldSpec::new("Destination", "eth.dst", FieldType::Ether),
            )?,
            src: reg.register_field(proto, FieldSpec::new("Source", "eth.src", FieldType::Ether))?,
            ethertype: reg.register_field(
                proto,
                FieldSpec::new("Type", "eth.type", FieldType::UInt16)
                    .display(FieldDisplay::Hex)
                    .values(ValueMap::Values(ETHERTYPES)),
            )?,
            len: reg.register_field(
                proto,
                FieldSpec::new("802.3 Length", "eth.len", FieldType::UInt16).display(FieldDisplay::Dec),
            )?,
            trailer: reg.register_field(
                proto,
                FieldSpec::new("Trailer", "eth.trailer", FieldType::Bytes)
                    .blurb("Bytes after the payload of the upper layer"),
            )?,
        };
        reg.register_table(ETHERTYPE_TABLE, "Ethertype", KeyKind::UInt)?;
        let handle = reg.register_dissector(DissectorHandle::new("eth", Some(proto), EthDissector { f }))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn handoff(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        if let Some(handle) = &self.handle {
            reg.set_dissector(WTAP_ENCAP_TABLE, Linktype::ETHERNET.0 as u32, handle)?;
        }
        Ok(())
    }
}
