use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use deepshark_core::buffer::Endianness;
use deepshark_core::catalog::{CatalogError, FieldSpec, FieldType};
use deepshark_core::dispatch::{DispatchError, DissectorHandle, KeyKind, Outcome};
use deepshark_core::dissectors::frame::WTAP_ENCAP_TABLE;
use deepshark_core::dissectors::hdcp::{HdcpTransaction, TRANSACTIONS_SLOT};
use deepshark_core::engine::{Capture, Engine, EngineBuilder, EngineError, FrameState, Protocol, Registrar};
use deepshark_core::frame::{Direction, FrameRecord};
use deepshark_core::prefs::PrefError;
use deepshark_core::scope::FrameMap;
use deepshark_core::{ExpertGroup, Severity};
use etherparse::PacketBuilder;
use pcap_parser::Linktype;

const USER0: Linktype = Linktype(147);

struct Scripted<F>(F);

impl<F> Protocol for Scripted<F>
where
    F: FnMut(&mut Registrar) -> Result<(), EngineError>,
{
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError> {
        (self.0)(reg)
    }
}

fn scripted<F>(f: F) -> Scripted<F>
where
    F: FnMut(&mut Registrar) -> Result<(), EngineError>,
{
    Scripted(f)
}

fn builtin() -> Engine {
    EngineBuilder::with_builtin_dissectors()
        .build()
        .expect("engine")
}

fn field_id(engine: &Engine, filter: &str) -> deepshark_core::catalog::FieldId {
    engine.catalog().field_by_filter(filter).expect("field").id
}

fn ethernet_frame(payload_len: usize) -> Vec<u8> {
    let mut frame = vec![0xff; 6];
    frame.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    frame.extend_from_slice(&0x88b5u16.to_be_bytes());
    frame.extend(std::iter::repeat_n(0xab, payload_len));
    frame
}

fn satop_packet(length_field: u8, total: usize) -> Vec<u8> {
    let mut packet = vec![0x00, length_field, 0x00, 0x01];
    packet.extend(std::iter::repeat_n(0x5a, total - packet.len()));
    packet
}

fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([0x00, 0x11, 0x22, 0x33, 0x44, 0x55], [0xff; 6])
        .ipv4([192, 168, 0, 1], [192, 168, 0, 2], 64)
        .udp(src_port, dst_port);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).expect("build frame");
    frame
}

#[test]
fn builtin_engine_builds_with_unique_field_names() {
    let engine = EngineBuilder::with_builtin_dissectors().build();
    assert!(engine.is_ok(), "{:?}", engine.err());
    let engine = builtin();
    let mut names: Vec<&str> = engine.catalog().fields().map(|f| f.name.as_str()).collect();
    let total = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), total);
    for filter in ["eth.len", "udp.length", "pwsatop.cw.length"] {
        assert!(engine.catalog().field_by_filter(filter).is_ok(), "{filter}");
    }
}

#[test]
fn duplicate_field_filter_fails_the_build() {
    let err = EngineBuilder::with_builtin_dissectors()
        .protocol(scripted(|reg: &mut Registrar| {
            let proto = reg.register_protocol("Duplicate", "DUP", "dup")?;
            reg.register_field(proto, FieldSpec::new("Port again", "udp.port", FieldType::UInt16))?;
            Ok(())
        }))
        .build()
        .expect_err("duplicate filter");
    assert!(matches!(
        err,
        EngineError::Catalog(CatalogError::DuplicateField { .. })
    ));
}

#[test]
fn catalog_filters_are_unique() {
    let engine = builtin();
    let mut filters: Vec<&str> = engine.catalog().fields().map(|f| f.filter.as_str()).collect();
    let total = filters.len();
    filters.sort_unstable();
    filters.dedup();
    assert_eq!(filters.len(), total);
    assert!(engine.catalog().field_by_filter("pwsatop.cw.length").is_ok());
    assert!(engine.catalog().field_by_filter("no.such.field").is_err());
}

#[test]
fn unknown_or_invalid_preferences_fail_the_build() {
    let err = EngineBuilder::with_builtin_dissectors()
        .pref("no.such.pref", "1")
        .build()
        .expect_err("unknown pref");
    assert!(matches!(err, EngineError::Prefs(PrefError::Unknown { .. })));

    let err = EngineBuilder::with_builtin_dissectors()
        .pref("udp.try_heuristic_first", "maybe")
        .build()
        .expect_err("bad bool");
    assert!(matches!(err, EngineError::Prefs(PrefError::InvalidValue { .. })));
}

#[test]
fn out_of_bounds_read_keeps_earlier_siblings() {
    let engine = EngineBuilder::new()
        .protocol(scripted(|reg: &mut Registrar| {
            let proto = reg.register_protocol("Bounded", "BND", "bnd")?;
            let first = reg.register_field(proto, FieldSpec::new("First", "bnd.first", FieldType::UInt8))?;
            let handle = reg.register_dissector(DissectorHandle::from_fn(
                "bnd",
                Some(proto),
                move |cx, view, parent| {
                    cx.columns().set_protocol("BND");
                    cx.add_item(parent, first, view, 0, 1, Endianness::Big);
                    view.u32(2, Endianness::Big)?;
                    Ok(Outcome::Accepted(view.reported_len()))
                },
            ))?;
            reg.set_dissector(WTAP_ENCAP_TABLE, 147u32, &handle)
        }))
        .build()
        .expect("engine");

    let capture = Capture::new();
    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, vec![0x07, 0x00, 0x01]));
    let first = field_id(&engine, "bnd.first");
    let node = dissection.tree.find_first(first).expect("sibling kept");
    assert_eq!(dissection.tree.value(node).as_uint(), Some(7));
    assert!(dissection.summary.malformed);
    assert_eq!(dissection.summary.severity, Some(Severity::Error));
    assert_eq!(dissection.summary.protocol, "BND");
    assert!(dissection.summary.info.contains("[Malformed Packet]"));
}

#[test]
fn truncated_capture_is_flagged_differently_from_malformed() {
    let engine = EngineBuilder::new()
        .protocol(scripted(|reg: &mut Registrar| {
            let handle = reg.register_dissector(DissectorHandle::from_fn("wide", None, |_cx, view, _parent| {
                view.u32(0, Endianness::Big)?;
                Ok(Outcome::Accepted(view.reported_len()))
            }))?;
            reg.set_dissector(WTAP_ENCAP_TABLE, 147u32, &handle)
        }))
        .build()
        .expect("engine");

    let capture = Capture::new();
    let record = FrameRecord::new(1, USER0, vec![0x01, 0x02]).with_reported_len(8);
    let dissection = engine.dissect(&capture, &record);
    assert!(dissection.summary.info.contains("[Packet size limited during capture]"));
}

fn guessing_engine(disable: Option<&str>) -> (Engine, [Arc<AtomicUsize>; 3]) {
    let counters = [
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    ];
    let calls = counters.clone();
    let disable = disable.map(str::to_string);
    let engine = EngineBuilder::new()
        .protocol(scripted(move |reg: &mut Registrar| {
            let proto = reg.register_protocol("Guess", "GUESS", "guess")?;
            let claimed = reg.register_field(proto, FieldSpec::new("Claimed", "guess.claimed", FieldType::Bytes))?;
            reg.register_table("guess", "Guessed payloads", KeyKind::UInt)?;

            let a = Arc::clone(&calls[0]);
            let rejecting = DissectorHandle::from_fn("guess.a", None, move |cx, view, parent| {
                a.fetch_add(1, Ordering::SeqCst);
                cx.columns().set_protocol("A");
                cx.add_item(parent, claimed, view, 0, view.captured_len(), Endianness::Big);
                Ok(Outcome::Rejected)
            });
            let b = Arc::clone(&calls[1]);
            let accepting = DissectorHandle::from_fn("guess.b", None, move |cx, view, _parent| {
                b.fetch_add(1, Ordering::SeqCst);
                cx.columns().set_protocol("B");
                Ok(Outcome::Accepted(view.reported_len()))
            });
            let c = Arc::clone(&calls[2]);
            let late = DissectorHandle::from_fn("guess.c", None, move |cx, view, _parent| {
                c.fetch_add(1, Ordering::SeqCst);
                cx.columns().set_protocol("C");
                Ok(Outcome::Accepted(view.reported_len()))
            });
            for handle in [rejecting, accepting, late] {
                let handle = reg.register_dissector(handle)?;
                reg.add_heuristic("guess", &handle, 0)?;
            }
            if let Some(name) = &disable {
                reg.set_heuristic_enabled("guess", name, false)?;
            }

            let entry = reg.register_dissector(DissectorHandle::from_fn(
                "guess.entry",
                None,
                |cx, view, parent| Ok(Outcome::Accepted(cx.call_table("guess", 0u32, view, parent))),
            ))?;
            reg.set_dissector(WTAP_ENCAP_TABLE, 147u32, &entry)
        }))
        .build()
        .expect("engine");
    (engine, counters)
}

#[test]
fn heuristics_stop_at_first_acceptance_and_roll_back_rejections() {
    let (engine, calls) = guessing_engine(None);
    let capture = Capture::new();
    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, vec![1, 2, 3, 4]));

    let counts: Vec<usize> = calls.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(counts, vec![1, 1, 0]);
    assert_eq!(dissection.summary.protocol, "B");
    assert_eq!(dissection.summary.protocols, "frame:guess.entry:guess.b");
    let claimed = field_id(&engine, "guess.claimed");
    assert!(dissection.tree.find_first(claimed).is_none());
}

#[test]
fn disabled_heuristic_is_skipped() {
    let (engine, calls) = guessing_engine(Some("guess.b"));
    let capture = Capture::new();
    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, vec![1, 2, 3, 4]));
    assert_eq!(calls[1].load(Ordering::SeqCst), 0);
    assert_eq!(calls[2].load(Ordering::SeqCst), 1);
    assert_eq!(dissection.summary.protocol, "C");
}

#[test]
fn override_takes_precedence_over_static_entry() {
    let engine = builtin();
    let capture = Capture::new();
    let record = FrameRecord::new(1, Linktype::ETHERNET, ethernet_frame(10));

    assert_eq!(engine.dissect(&capture, &record).summary.protocols, "frame:eth:data");
    engine.set_override(WTAP_ENCAP_TABLE, 1u32, "hdcp").expect("override");
    assert_eq!(engine.dissect(&capture, &record).summary.protocols, "frame:hdcp");
    assert!(engine.clear_override(WTAP_ENCAP_TABLE, 1u32, None));
    assert_eq!(engine.dissect(&capture, &record).summary.protocols, "frame:eth:data");
}

#[test]
fn layer_override_applies_only_at_its_layer() {
    let engine = builtin();
    let capture = Capture::new();
    let record = FrameRecord::new(1, Linktype::ETHERNET, ethernet_frame(10));

    engine.set_override_at(WTAP_ENCAP_TABLE, 1u32, 2, "hdcp").expect("override");
    assert_eq!(engine.dissect(&capture, &record).summary.protocols, "frame:eth:data");
    engine.set_override_at(WTAP_ENCAP_TABLE, 1u32, 1, "hdcp").expect("override");
    assert_eq!(engine.dissect(&capture, &record).summary.protocols, "frame:hdcp");
    engine.clear_overrides();
    assert_eq!(engine.dissect(&capture, &record).summary.protocols, "frame:eth:data");
}

#[test]
fn override_errors_name_the_missing_piece() {
    let engine = builtin();
    assert!(matches!(
        engine.set_override("no.such.table", 1u32, "hdcp"),
        Err(DispatchError::UnknownTable { .. })
    ));
    assert!(matches!(
        engine.set_override(WTAP_ENCAP_TABLE, 1u32, "no_such_dissector"),
        Err(DispatchError::UnknownDissector { .. })
    ));
}

fn transactions(capture: &Capture) -> usize {
    capture
        .scope()
        .with(TRANSACTIONS_SLOT, |map: &mut FrameMap<HdcpTransaction>| map.len())
}

#[test]
fn hdcp_request_and_response_are_linked_across_passes() {
    let engine = builtin();
    engine.set_override(WTAP_ENCAP_TABLE, 147u32, "hdcp").expect("override");
    let capture = Capture::new();
    let request = FrameRecord::new(5, USER0, vec![0x00]).with_direction(Direction::Outbound);
    let response =
        FrameRecord::new(9, USER0, vec![0x01, 0x02, 0x03, 0x04, 0x05]).with_direction(Direction::Inbound);
    let resp_in = field_id(&engine, "hdcp.resp_in");
    let resp_to = field_id(&engine, "hdcp.resp_to");
    let b_ksv = field_id(&engine, "hdcp.b_ksv");

    let first = engine.dissect(&capture, &request);
    assert_eq!(first.summary.protocol, "HDCP");
    assert_eq!(first.summary.info, "request B_ksv");
    assert!(first.tree.find_first(resp_in).is_none());

    let answer = engine.dissect(&capture, &response);
    assert_eq!(answer.summary.info, "send B_ksv");
    assert_eq!(
        answer.tree.value_of(resp_to).and_then(|v| v.as_frame_num()),
        Some(5)
    );
    assert_eq!(
        answer.tree.value_of(b_ksv).and_then(|v| v.as_uint()),
        Some(0x05_0403_0201)
    );
    assert_eq!(transactions(&capture), 1);

    let second = engine.dissect(&capture, &request);
    assert!(second.summary.visited);
    let node = second.tree.find_first(resp_in).expect("response link");
    assert_eq!(second.tree.value(node).as_frame_num(), Some(9));
    assert_eq!(
        second.tree.label(engine.catalog(), node),
        "Request to get the content of register B_ksv, response in frame 9"
    );
    let again = engine.dissect(&capture, &response);
    assert!(again.tree.same_structure(&answer.tree));
    assert_eq!(transactions(&capture), 1);
}

#[test]
fn redissection_is_idempotent() {
    let engine = builtin();
    engine.set_override(WTAP_ENCAP_TABLE, 147u32, "hdcp").expect("override");
    let mut capture = Capture::new();
    let request = FrameRecord::new(1, USER0, vec![0x40]).with_direction(Direction::Outbound);
    let response = FrameRecord::new(2, USER0, vec![0x83]).with_direction(Direction::Inbound);
    engine.dissect(&capture, &request);
    engine.dissect(&capture, &response);

    let second = engine.dissect(&capture, &request);
    let generation = capture.scope().generation();
    let third = engine.dissect(&capture, &request);
    assert!(second.tree.same_structure(&third.tree));
    assert_eq!(second.summary, third.summary);
    assert_eq!(capture.scope().generation(), generation);
    assert_eq!(transactions(&capture), 1);
    assert_eq!(capture.state(1), FrameState::Visited);
    assert_eq!(capture.visited_frames(), 2);

    capture.reset();
    assert_eq!(capture.scope().generation(), generation + 1);
    assert_eq!(capture.state(1), FrameState::Unvisited);
    assert!(!engine.dissect(&capture, &request).summary.visited);
}

#[test]
fn frames_dissected_in_parallel_share_capture_state() {
    let engine = builtin();
    engine.set_override(WTAP_ENCAP_TABLE, 147u32, "hdcp").expect("override");
    let capture = Capture::new();
    let resp_to = field_id(&engine, "hdcp.resp_to");
    let resp_in = field_id(&engine, "hdcp.resp_in");
    let pair = |t: u32| {
        (
            FrameRecord::new(10 * t + 1, USER0, vec![0x00]).with_direction(Direction::Outbound),
            FrameRecord::new(10 * t + 2, USER0, vec![0x01, 0x02, 0x03, 0x04, 0x05])
                .with_direction(Direction::Inbound),
        )
    };

    let linked: Vec<(u32, Option<u32>)> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..4u32)
            .map(|t| {
                let (engine, capture) = (&engine, &capture);
                s.spawn(move || {
                    let (request, response) = pair(t);
                    engine.dissect(capture, &request);
                    let answer = engine.dissect(capture, &response);
                    let linked = answer.tree.value_of(resp_to).and_then(|v| v.as_frame_num());
                    (request.number, linked)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("worker"))
            .collect()
    });

    for (request, linked) in linked {
        assert_eq!(linked, Some(request));
    }
    assert_eq!(transactions(&capture), 4);
    assert_eq!(capture.visited_frames(), 8);

    for t in 0..4u32 {
        let (request, response) = pair(t);
        let again = engine.dissect(&capture, &request);
        assert_eq!(
            again.tree.value_of(resp_in).and_then(|v| v.as_frame_num()),
            Some(response.number)
        );
    }
    assert_eq!(transactions(&capture), 4);
}

#[test]
fn hdcp_link_verification_without_pending_request() {
    let engine = builtin();
    engine.set_override(WTAP_ENCAP_TABLE, 147u32, "hdcp").expect("override");
    let capture = Capture::new();
    let record = FrameRecord::new(1, USER0, vec![0x34, 0x12]).with_direction(Direction::Inbound);
    let dissection = engine.dissect(&capture, &record);
    assert_eq!(dissection.summary.info, "send link verification Ri'");
    let link_vfy = field_id(&engine, "hdcp.link_vfy");
    assert_eq!(
        dissection.tree.value_of(link_vfy).and_then(|v| v.as_uint()),
        Some(0x1234)
    );
}

#[test]
fn recursion_limit_stops_self_dispatch() {
    let engine = EngineBuilder::new()
        .max_depth(4)
        .protocol(scripted(|reg: &mut Registrar| {
            reg.register_table("loop", "Loop", KeyKind::UInt)?;
            let handle = reg.register_dissector(DissectorHandle::from_fn("looper", None, |cx, view, parent| {
                Ok(Outcome::Accepted(cx.call_table("loop", 0u32, view, parent)))
            }))?;
            reg.set_dissector("loop", 0u32, &handle)?;
            reg.set_dissector(WTAP_ENCAP_TABLE, 147u32, &handle)
        }))
        .build()
        .expect("engine");

    let capture = Capture::new();
    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, vec![0u8; 4]));
    assert_eq!(
        dissection.summary.protocols,
        "frame:looper:looper:looper:looper"
    );
    assert!(dissection.summary.malformed);
    assert!(
        dissection
            .tree
            .notes()
            .iter()
            .any(|note| note.message.starts_with("Recursion limit exceeded"))
    );
}

#[test]
fn panicking_dissector_is_contained() {
    let engine = EngineBuilder::with_builtin_dissectors()
        .protocol(scripted(|reg: &mut Registrar| {
            let handle = reg.register_dissector(DissectorHandle::from_fn("boom", None, |_cx, _view, _parent| {
                panic!("boom")
            }))?;
            reg.set_dissector(WTAP_ENCAP_TABLE, 147u32, &handle)
        }))
        .build()
        .expect("engine");

    let capture = Capture::new();
    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, vec![0u8; 4]));
    assert!(dissection.summary.malformed);
    assert!(dissection.tree.notes().iter().any(|note| {
        note.group == ExpertGroup::Malformed && note.message == "Dissector bug: boom"
    }));
    assert_eq!(capture.state(1), FrameState::Visited);

    let next = engine.dissect(&capture, &FrameRecord::new(2, Linktype::ETHERNET, ethernet_frame(4)));
    assert_eq!(next.summary.protocols, "frame:eth:data");
}

#[test]
fn satop_length_field_splits_payload_and_padding() {
    let engine = builtin();
    engine.set_override(WTAP_ENCAP_TABLE, 147u32, "pw_satop_mpls").expect("override");
    let capture = Capture::new();

    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, satop_packet(20, 50)));
    assert_eq!(dissection.summary.protocol, "SAToP");
    assert_eq!(dissection.summary.info, "TDM octets:16, Padding:30");
    assert!(!dissection.summary.malformed);
    assert!(dissection.summary.protocols.contains("pw.padding"));
    let padding = field_id(&engine, "pw.padding.bytes");
    assert!(dissection.tree.find_first(padding).is_some());
}

#[test]
fn satop_length_past_packet_end_is_malformed() {
    let engine = builtin();
    engine.set_override(WTAP_ENCAP_TABLE, 147u32, "pw_satop_mpls").expect("override");
    let capture = Capture::new();

    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, satop_packet(60, 50)));
    assert_eq!(dissection.summary.info, "CW:Bad, TDM octets:46");
    assert!(dissection.summary.malformed);
    let length = field_id(&engine, "pwsatop.cw.length");
    let node = dissection.tree.find_first(length).expect("length field");
    assert!(
        dissection
            .tree
            .notes_for(node)
            .any(|note| note.message == "Malformed: length exceeds packet size (50)")
    );
    let payload_len = field_id(&engine, "pwsatop.payload.len");
    assert_eq!(
        dissection.tree.value_of(payload_len).and_then(|v| v.as_int()),
        Some(46)
    );
}

#[test]
fn satop_payload_label_names_the_circuit() {
    let engine = builtin();
    engine.set_override(WTAP_ENCAP_TABLE, 147u32, "pw_satop_udp").expect("override");
    let capture = Capture::new();

    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, satop_packet(0, 4 + 256)));
    assert_eq!(dissection.summary.info, "TDM octets:256");
    let payload = field_id(&engine, "pwsatop.payload");
    let node = dissection.tree.find_first(payload).expect("payload");
    assert!(dissection.tree.label(engine.catalog(), node).ends_with("(looks like E1)"));
}

#[test]
fn satop_mpls_declines_ip_payloads() {
    let engine = builtin();
    engine.set_override(WTAP_ENCAP_TABLE, 147u32, "pw_satop_mpls").expect("override");
    let capture = Capture::new();
    let mut packet = satop_packet(0, 24);
    packet[0] = 0x45;
    let dissection = engine.dissect(&capture, &FrameRecord::new(1, USER0, packet));
    assert_eq!(dissection.summary.protocols, "frame:data");
}

#[test]
fn satop_port_preference_hooks_udp() {
    let engine = EngineBuilder::with_builtin_dissectors()
        .pref("pwsatopcw.udp.port", "0x1f90")
        .build()
        .expect("engine");
    let capture = Capture::new();
    let frame = udp_frame(5000, 8080, &satop_packet(0, 20));

    let dissection = engine.dissect(&capture, &FrameRecord::new(1, Linktype::ETHERNET, frame));
    assert!(dissection.summary.protocols.starts_with("frame:eth:ip:udp:pwsatopcw"));
    assert_eq!(dissection.summary.protocol, "SAToP");
    assert_eq!(dissection.summary.info, "TDM octets:16");
    assert_eq!(engine.prefs().get_uint("pwsatopcw.udp.port"), Some(8080));
}
