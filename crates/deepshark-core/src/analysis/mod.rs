use std::path::Path;

use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::engine::{Capture, Engine};
use crate::frame::FrameRecord;
use crate::source::{FrameSource, PcapFileSource, SourceError};
use crate::{CaptureSummary, DEFAULT_GENERATED_AT, FrameReport, Report, make_stub_report};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOptions {
    /// Dissect every frame once to build correlation state, then report the
    /// trees of a second pass. Responses then point back at requests and
    /// requests forward at their responses.
    pub two_pass: bool,
}

pub fn dissect_pcap_file(
    path: &Path,
    engine: &Engine,
    options: AnalysisOptions,
) -> Result<Report, AnalysisError> {
    let source = PcapFileSource::open(path)?;
    dissect_source(path, source, engine, options)
}

pub fn dissect_source<S: FrameSource>(
    path: &Path,
    mut source: S,
    engine: &Engine,
    options: AnalysisOptions,
) -> Result<Report, AnalysisError> {
    let capture = Capture::new();
    let mut first_ts = None;
    let mut last_ts = None;
    let mut frames: Vec<FrameReport> = Vec::new();
    let mut pending: Vec<FrameRecord> = Vec::new();

    while let Some(record) = source.next_frame()? {
        update_ts_bounds(&mut first_ts, &mut last_ts, record.timestamp);
        let dissection = engine.dissect(&capture, &record);
        if options.two_pass {
            pending.push(record);
        } else {
            frames.push(dissection.to_report(engine.catalog()));
        }
    }
    if options.two_pass {
        tracing::debug!(frames = pending.len(), "second pass");
        frames = pending
            .iter()
            .map(|record| engine.dissect(&capture, record).to_report(engine.catalog()))
            .collect();
    }

    let mut report = make_stub_report(&path.display().to_string(), path.metadata()?.len());
    report.capture_summary = Some(CaptureSummary {
        frames_total: frames.len() as u64,
        malformed_frames: frames.iter().filter(|frame| frame.malformed).count() as u64,
        passes: if options.two_pass { 2 } else { 1 },
        max_severity: frames.iter().filter_map(|frame| frame.severity).max(),
        time_start: first_ts.and_then(ts_to_rfc3339),
        time_end: last_ts.and_then(ts_to_rfc3339),
    });
    report.generated_at = report
        .capture_summary
        .as_ref()
        .and_then(|summary| summary.time_end.clone().or(summary.time_start.clone()))
        .unwrap_or_else(|| DEFAULT_GENERATED_AT.to_string());
    report.frames = frames;
    Ok(report)
}

fn update_ts_bounds(first: &mut Option<f64>, last: &mut Option<f64>, ts: Option<f64>) {
    let Some(ts) = ts else {
        return;
    };
    if first.is_none_or(|existing| ts < existing) {
        *first = Some(ts);
    }
    if last.is_none_or(|existing| ts > existing) {
        *last = Some(ts);
    }
}

/// RFC 3339 text for a capture timestamp, at microsecond resolution.
pub(crate) fn ts_to_rfc3339(ts: f64) -> Option<String> {
    let nanos = (ts * 1_000_000.0).round() as i128 * 1_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_bounds_track_min_and_max() {
        let mut first = None;
        let mut last = None;
        update_ts_bounds(&mut first, &mut last, Some(2.0));
        update_ts_bounds(&mut first, &mut last, None);
        update_ts_bounds(&mut first, &mut last, Some(1.0));
        update_ts_bounds(&mut first, &mut last, Some(3.5));
        assert_eq!(first, Some(1.0));
        assert_eq!(last, Some(3.5));
    }

    #[test]
    fn rfc3339_formats_epoch() {
        assert_eq!(ts_to_rfc3339(0.0).as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(
            ts_to_rfc3339(1_700_000_000.25).as_deref(),
            Some("2023-11-14T22:13:20.25Z")
        );
    }
}
