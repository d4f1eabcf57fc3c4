use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("deepshark"))
}

fn pcapng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let total_len = (8 + body.len() + 4) as u32;
    let mut block = Vec::with_capacity(total_len as usize);
    block.extend_from_slice(&block_type.to_be_bytes());
    block.extend_from_slice(&total_len.to_be_bytes());
    block.extend_from_slice(body);
    block.extend_from_slice(&total_len.to_be_bytes());
    block
}

fn write_capture(path: &Path, frames: &[Vec<u8>]) {
    let mut output = Vec::new();
    let mut shb = Vec::new();
    shb.extend_from_slice(&0x1A2B3C4Du32.to_be_bytes());
    shb.extend_from_slice(&1u16.to_be_bytes());
    shb.extend_from_slice(&0u16.to_be_bytes());
    shb.extend_from_slice(&(-1i64).to_be_bytes());
    output.extend_from_slice(&pcapng_block(0x0A0D0D0A, &shb));

    let mut idb = Vec::new();
    idb.extend_from_slice(&1u16.to_be_bytes());
    idb.extend_from_slice(&0u16.to_be_bytes());
    idb.extend_from_slice(&65535u32.to_be_bytes());
    output.extend_from_slice(&pcapng_block(1, &idb));

    for (index, data) in frames.iter().enumerate() {
        let ts_us = 1_700_000_000_000_000u64 + index as u64 * 1_000;
        let mut epb = Vec::new();
        epb.extend_from_slice(&0u32.to_be_bytes());
        epb.extend_from_slice(&((ts_us >> 32) as u32).to_be_bytes());
        epb.extend_from_slice(&((ts_us & 0xFFFF_FFFF) as u32).to_be_bytes());
        epb.extend_from_slice(&(data.len() as u32).to_be_bytes());
        epb.extend_from_slice(&(data.len() as u32).to_be_bytes());
        epb.extend_from_slice(data);
        epb.extend(std::iter::repeat_n(0u8, (4 - data.len() % 4) % 4));
        output.extend_from_slice(&pcapng_block(6, &epb));
    }
    fs::write(path, output).expect("write capture");
}

fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair[1]])))
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Ethernet/IPv4/UDP frame; `udp_len` overrides the UDP length field.
fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8], udp_len: Option<u16>) -> Vec<u8> {
    let udp_total = 8 + payload.len();
    let mut frame = vec![0xff; 6];
    frame.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());

    let mut ip = vec![0x45, 0x00];
    ip.extend_from_slice(&((20 + udp_total) as u16).to_be_bytes());
    ip.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 64, 17, 0x00, 0x00]);
    ip.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
    let checksum = ipv4_checksum(&ip);
    ip[10..12].copy_from_slice(&checksum.to_be_bytes());
    frame.extend_from_slice(&ip);

    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&udp_len.unwrap_or(udp_total as u16).to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn satop_payload() -> Vec<u8> {
    let mut payload = vec![0x00, 0x00, 0x00, 0x07];
    payload.extend(std::iter::repeat_n(0x5a, 16));
    payload
}

/// Two frames: a SAToP-over-UDP datagram to port 5000 and a datagram whose
/// UDP length field is too small.
fn sample_capture(dir: &Path) -> PathBuf {
    let path = dir.join("sample.pcapng");
    write_capture(
        &path,
        &[
            udp_frame(40000, 5000, &satop_payload(), None),
            udp_frame(6000, 7000, &[1, 2, 3, 4], Some(4)),
        ],
    );
    path
}

fn stdout_json(assert: &assert_cmd::assert::Assert) -> Value {
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout");
    serde_json::from_str(&stdout).expect("valid json")
}

#[test]
fn help_supports_dissect_and_decode() {
    cmd().arg("pcap").arg("dissect").arg("--help").assert().success();
    cmd().arg("pcap").arg("decode").arg("--help").assert().success();
}

#[test]
fn missing_input_shows_error_and_hint() {
    let temp = TempDir::new().expect("tempdir");
    let missing = temp.path().join("missing.pcapng");
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(missing)
        .arg("-o")
        .arg(report)
        .assert()
        .failure()
        .stderr(contains("error:").and(contains("hint:")));
}

#[test]
fn stdout_outputs_json_report() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());
    let assert = cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("--stdout")
        .assert()
        .success();
    let json = stdout_json(&assert);
    assert_eq!(json["report_version"], 1);
    assert_eq!(json["tool"]["name"], "deepshark");
    assert_eq!(json["capture_summary"]["frames_total"], 2);
    assert_eq!(json["capture_summary"]["malformed_frames"], 1);
    assert_eq!(json["frames"][0]["protocols"], "frame:eth:ip:udp:data");
    assert_eq!(json["frames"][1]["protocol"], "UDP");
    assert_eq!(json["frames"][1]["malformed"], true);
}

#[test]
fn decode_as_routes_port_to_satop() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());
    let assert = cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("--stdout")
        .arg("--decode-as")
        .arg("udp.port==5000,pw_satop_udp")
        .arg("-2")
        .assert()
        .success();
    let json = stdout_json(&assert);
    assert_eq!(json["capture_summary"]["passes"], 2);
    assert_eq!(json["frames"][0]["protocol"], "SAToP");
    assert_eq!(json["frames"][0]["info"], "TDM octets:16");
}

#[test]
fn report_file_is_written() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());
    let report = temp.path().join("out").join("report.json");

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("-o")
        .arg(&report)
        .assert()
        .success()
        .stderr(contains("OK: report written"));
    let json: Value =
        serde_json::from_str(&fs::read_to_string(&report).expect("report")).expect("valid json");
    assert_eq!(json["frames"].as_array().map(Vec::len), Some(2));
}

#[test]
fn stdout_and_report_conflict() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("--stdout")
        .arg("-o")
        .arg(report)
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn pretty_and_compact_conflict() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("-o")
        .arg(report)
        .arg("--pretty")
        .arg("--compact")
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn report_may_not_overwrite_input() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(&input)
        .arg("-o")
        .arg(&input)
        .assert()
        .failure()
        .stderr(contains("report path must differ from input"));
}

#[test]
fn quiet_suppresses_ok_message() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("-o")
        .arg(report)
        .arg("--quiet")
        .assert()
        .success()
        .stderr(contains("OK:").not());
}

#[test]
fn list_malformed_names_frames() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("-o")
        .arg(report)
        .arg("--list-malformed")
        .assert()
        .success()
        .stderr(contains("Malformed frames:").and(contains("BAD UDP LENGTH")));
}

#[test]
fn strict_fails_when_frames_are_malformed() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("-o")
        .arg(report)
        .arg("--strict")
        .assert()
        .failure()
        .stderr(contains("1 malformed frame(s) detected"));
}

#[test]
fn bad_decode_as_rule_is_reported() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(&input)
        .arg("--stdout")
        .arg("--decode-as")
        .arg("udp.port=5000")
        .assert()
        .failure()
        .stderr(contains("invalid decode-as rule").and(contains("hint:")));

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(&input)
        .arg("--stdout")
        .arg("--decode-as")
        .arg("udp.port==5000,no_such_dissector")
        .assert()
        .failure()
        .stderr(contains("cannot apply decode-as rule"));
}

#[test]
fn unknown_preference_is_reported() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path());

    cmd()
        .arg("pcap")
        .arg("dissect")
        .arg(input)
        .arg("--stdout")
        .arg("--pref")
        .arg("no.such.pref=1")
        .assert()
        .failure()
        .stderr(contains("engine setup failed").and(contains("no.such.pref")));
}

#[test]
fn fields_lists_filters_with_prefix() {
    cmd()
        .arg("fields")
        .arg("--prefix")
        .arg("pwsatop.cw")
        .assert()
        .success()
        .stdout(
            contains("pwsatop.cw.length\tCW Length\tuint8")
                .and(contains("pwsatop.cw.seqno"))
                .and(contains("udp.port").not()),
        );
}
