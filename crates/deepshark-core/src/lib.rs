//! deepshark core library: an incremental protocol-dissection engine.
//!
//! Frames handed in by a frame source are decoded layer by layer into an
//! annotated protocol tree. The engine owns the pieces every decoder shares:
//! bounds-checked buffer views, a write-once field catalog, named dissector
//! tables with heuristic chains and user overrides, frame- and capture-scoped
//! state, and severity-tagged diagnostics that never abort a dissection.
//!
//! Layout:
//! - `buffer`, `catalog`, `tree`, `expert`: the data model.
//! - `dispatch`, `engine`, `scope`, `prefs`, `frame`: the runtime.
//! - `dissectors`: bundled decoders (Ethernet, MPLS, IPv4, UDP, HDCP, SAToP).
//! - `source`: PCAP/PCAPNG frame source.
//!
//! Invariants:
//! - The catalog is frozen before the first frame is dissected.
//! - A malformed field yields a placeholder node and an Error note; siblings
//!   already in the tree are kept.
//! - Re-dissecting a frame yields the same tree and adds no capture state.
//!
//! # Examples
//! ```no_run
//! use std::path::Path;
//!
//! use deepshark_core::engine::EngineBuilder;
//! use deepshark_core::{AnalysisOptions, dissect_pcap_file};
//!
//! let engine = EngineBuilder::with_builtin_dissectors().build()?;
//! let report = dissect_pcap_file(Path::new("capture.pcapng"), &engine, AnalysisOptions::default())?;
//! println!("frames: {}", report.frames.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};

mod analysis;
pub mod buffer;
pub mod catalog;
pub mod dispatch;
pub mod dissectors;
pub mod engine;
pub mod expert;
pub mod frame;
pub mod prefs;
pub mod scope;
pub mod source;
pub mod tree;

pub use analysis::{AnalysisError, AnalysisOptions, dissect_pcap_file, dissect_source};
pub use expert::{ExpertGroup, Severity};
pub use source::{FrameSource, PcapFileSource, SourceError};

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;
/// Default timestamp used when no capture time is available.
pub const DEFAULT_GENERATED_AT: &str = "1970-01-01T00:00:00Z";

/// Dissection report for a whole capture, frames in capture order.
///
/// # Examples
/// ```
/// use deepshark_core::make_stub_report;
///
/// let report = make_stub_report("capture.pcapng", 123);
/// assert_eq!(report.report_version, deepshark_core::REPORT_VERSION);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    pub tool: ToolInfo,
    /// RFC3339 timestamp; the last frame time when known.
    pub generated_at: String,

    pub input: InputInfo,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_summary: Option<CaptureSummary>,
    pub frames: Vec<FrameReport>,
}

/// Tool metadata embedded in reports.
///
/// # Examples
/// ```
/// use deepshark_core::ToolInfo;
///
/// let tool = ToolInfo {
///     name: "deepshark".to_string(),
///     version: "0.1.0".to_string(),
/// };
/// assert_eq!(tool.name, "deepshark");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

/// Input capture metadata embedded in reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputInfo {
    /// Input path as provided to the driver.
    pub path: String,
    /// Input size in bytes.
    pub bytes: u64,
}

/// Capture-wide totals.
///
/// # Examples
/// ```
/// use deepshark_core::CaptureSummary;
///
/// let summary = CaptureSummary {
///     frames_total: 10,
///     malformed_frames: 0,
///     passes: 1,
///     max_severity: None,
///     time_start: None,
///     time_end: None,
/// };
/// assert_eq!(summary.frames_total, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub frames_total: u64,
    /// Frames carrying at least one Error-severity malformed note.
    pub malformed_frames: u64,
    /// Dissection passes over the capture (1, or 2 with two-pass mode).
    pub passes: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_severity: Option<Severity>,
    /// RFC3339 timestamp of the first frame (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<String>,
    /// RFC3339 timestamp of the last frame (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<String>,
}

/// One dissected frame: summary columns plus the protocol tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameReport {
    pub number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Layer chain, e.g. `frame:eth:ip:udp:data`.
    pub protocols: String,
    /// Protocol column.
    pub protocol: String,
    /// Info column.
    pub info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub malformed: bool,
    pub tree: Vec<NodeReport>,
}

/// Serialized tree node.
///
/// # Examples
/// ```
/// use deepshark_core::NodeReport;
///
/// let node = NodeReport {
///     label: "Time to Live: 64".to_string(),
///     filter: Some("ip.ttl".to_string()),
///     value: Some(serde_json::json!(64)),
///     range: None,
///     generated: false,
///     hidden: false,
///     notes: Vec::new(),
///     children: Vec::new(),
/// };
/// let json = serde_json::to_value(&node).unwrap();
/// assert!(json.get("children").is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub label: String,
    /// Filter name of the node's field; absent for text-only nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Absent for generated nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeReport>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub generated: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<NoteReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeReport>,
}

/// Byte range of a node within one of the frame's data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeReport {
    /// Data source index; 0 is the frame itself.
    pub source: usize,
    pub offset: usize,
    pub length: usize,
}

/// Diagnostic attached to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteReport {
    pub severity: Severity,
    pub group: ExpertGroup,
    pub message: String,
    /// Registered expert name, e.g. `udp.length.bad`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expert: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Build a stub report with base fields filled and no frames.
///
/// # Examples
/// ```
/// use deepshark_core::make_stub_report;
///
/// let report = make_stub_report("capture.pcapng", 123);
/// assert!(report.frames.is_empty());
/// ```
pub fn make_stub_report(input_path: &str, input_bytes: u64) -> Report {
    Report {
        report_version: REPORT_VERSION,
        tool: ToolInfo {
            name: "deepshark".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        generated_at: DEFAULT_GENERATED_AT.to_string(),
        input: InputInfo {
            path: input_path.to_string(),
            bytes: input_bytes,
        },
        capture_summary: None,
        frames: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_omits_optional_fields_when_none() {
        let mut report = make_stub_report("capture.pcapng", 1);
        report.capture_summary = Some(CaptureSummary {
            frames_total: 1,
            malformed_frames: 0,
            passes: 1,
            max_severity: None,
            time_start: None,
            time_end: None,
        });
        report.frames.push(FrameReport {
            number: 1,
            time: None,
            protocols: "frame:data".to_string(),
            protocol: "DATA".to_string(),
            info: String::new(),
            severity: None,
            malformed: false,
            tree: vec![NodeReport {
                label: "Data (2 bytes)".to_string(),
                filter: Some("data".to_string()),
                value: None,
                range: Some(RangeReport {
                    source: 0,
                    offset: 0,
                    length: 2,
                }),
                generated: false,
                hidden: false,
                notes: Vec::new(),
                children: Vec::new(),
            }],
        });

        let value = serde_json::to_value(&report).expect("report json");
        let capture = value.get("capture_summary").expect("capture_summary");
        assert!(capture.get("time_start").is_none());
        assert!(capture.get("max_severity").is_none());

        let frame = &value["frames"][0];
        assert!(frame.get("time").is_none());
        assert!(frame.get("severity").is_none());
        let node = &frame["tree"][0];
        assert!(node.get("generated").is_none());
        assert!(node.get("notes").is_none());
        assert_eq!(node["range"]["length"], 2);
    }

    #[test]
    fn severities_serialize_lowercase() {
        let note = NoteReport {
            severity: Severity::Warning,
            group: ExpertGroup::Malformed,
            message: "Bad length value".to_string(),
            expert: Some("udp.length.bad".to_string()),
        };
        let value = serde_json::to_value(&note).expect("note json");
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["group"], "malformed");
    }
}
