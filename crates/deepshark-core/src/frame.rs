//! Per-dissection frame state.

use std::sync::Arc;

use bytes::Bytes;
use pcap_parser::Linktype;
use serde::{Deserialize, Serialize};

use crate::scope::FrameScope;

/// Direction of a frame relative to the capturing host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Unknown,
    Outbound,
    Inbound,
}

/// One frame as handed over by a frame source.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// 1-based position in the capture.
    pub number: u32,
    pub timestamp: Option<f64>,
    pub link_type: Linktype,
    pub direction: Direction,
    pub data: Bytes,
    /// On-wire length; at least `data.len()`.
    pub reported_len: usize,
}

impl FrameRecord {
    pub fn new(number: u32, link_type: Linktype, data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let reported_len = data.len();
        Self {
            number,
            timestamp: None,
            link_type,
            direction: Direction::Unknown,
            data,
            reported_len,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_reported_len(mut self, reported_len: usize) -> Self {
        self.reported_len = reported_len;
        self
    }
}

/// Summary columns filled in by decoders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Columns {
    pub protocol: String,
    pub info: String,
}

impl Columns {
    pub fn set_protocol(&mut self, protocol: &str) {
        self.protocol.clear();
        self.protocol.push_str(protocol);
    }

    pub fn set_info(&mut self, info: impl Into<String>) {
        self.info = info.into();
    }

    pub fn append_info(&mut self, text: &str) {
        self.info.push_str(text);
    }

    /// Append with `sep` unless the column is empty.
    pub fn append_sep_info(&mut self, sep: &str, text: &str) {
        if !self.info.is_empty() {
            self.info.push_str(sep);
        }
        self.info.push_str(text);
    }

    pub fn clear_info(&mut self) {
        self.info.clear();
    }
}

/// Protocols encountered so far in this frame, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerStack {
    layers: Vec<Arc<str>>,
}

impl LayerStack {
    pub fn push(&mut self, layer: Arc<str>) {
        self.layers.push(layer);
    }

    pub fn pop(&mut self) -> Option<Arc<str>> {
        self.layers.pop()
    }

    /// Current layer number (1-based; 0 before the first push).
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|layer| layer.as_ref())
    }

    /// How many times `layer` appears so far.
    pub fn occurrences(&self, layer: &str) -> usize {
        self.layers.iter().filter(|l| l.as_ref() == layer).count()
    }

    /// `frame:eth:ethertype:ip` style chain.
    pub fn joined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(":")
    }
}

/// Mutable state of one dissection call.
#[derive(Debug)]
pub struct FrameContext {
    pub number: u32,
    pub timestamp: Option<f64>,
    pub direction: Direction,
    pub link_type: Linktype,
    pub columns: Columns,
    visited: bool,
    layers: LayerStack,
    scope: FrameScope,
    depth: usize,
}

impl FrameContext {
    pub fn new(record: &FrameRecord, visited: bool) -> Self {
        Self {
            number: record.number,
            timestamp: record.timestamp,
            direction: record.direction,
            link_type: record.link_type,
            columns: Columns::default(),
            visited,
            layers: LayerStack::default(),
            scope: FrameScope::new(),
            depth: 0,
        }
    }

    /// True when this frame was dissected before in the current capture.
    pub fn visited(&self) -> bool {
        self.visited
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut LayerStack {
        &mut self.layers
    }

    pub fn scope(&self) -> &FrameScope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut FrameScope {
        &mut self.scope
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}
