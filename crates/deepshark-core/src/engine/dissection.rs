use serde_json::Value;

use crate::catalog::Catalog;
use crate::expert::{ExpertGroup, Severity};
use crate::frame::{FrameContext, FrameRecord};
use crate::tree::value::{ether_string, hex_string};
use crate::tree::{FieldValue, NodeId, ProtocolTree};
use crate::analysis::ts_to_rfc3339;
use crate::{FrameReport, NodeReport, NoteReport, RangeReport};

/// One-line view of a dissected frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub number: u32,
    pub timestamp: Option<f64>,
    /// Protocol column.
    pub protocol: String,
    /// Info column.
    pub info: String,
    /// Layer chain, e.g. `frame:eth:ip:udp:data`.
    pub protocols: String,
    pub severity: Option<Severity>,
    /// An Error-severity malformed note was raised.
    pub malformed: bool,
    /// The frame had been dissected before this call.
    pub visited: bool,
}

/// Output of `Engine::dissect`.
#[derive(Debug, Clone)]
pub struct Dissection {
    pub tree: ProtocolTree,
    pub summary: FrameSummary,
}

impl Dissection {
    pub(crate) fn new(record: &FrameRecord, frame: &FrameContext, tree: ProtocolTree) -> Self {
        let malformed = tree
            .notes()
            .iter()
            .any(|note| note.severity == Severity::Error && note.group == ExpertGroup::Malformed);
        let summary = FrameSummary {
            number: record.number,
            timestamp: record.timestamp,
            protocol: frame.columns.protocol.clone(),
            info: frame.columns.info.clone(),
            protocols: frame.layers().joined(),
            severity: tree.max_severity(),
            malformed,
            visited: frame.visited(),
        };
        Self { tree, summary }
    }

    /// Serializable form of the tree and summary.
    pub fn to_report(&self, catalog: &Catalog) -> FrameReport {
        let tree = self
            .tree
            .children(self.tree.root())
            .iter()
            .map(|child| node_report(&self.tree, catalog, *child))
            .collect();
        FrameReport {
            number: self.summary.number,
            time: self.summary.timestamp.and_then(ts_to_rfc3339),
            protocols: self.summary.protocols.clone(),
            protocol: self.summary.protocol.clone(),
            info: self.summary.info.clone(),
            severity: self.summary.severity,
            malformed: self.summary.malformed,
            tree,
        }
    }
}

fn node_report(tree: &ProtocolTree, catalog: &Catalog, id: NodeId) -> NodeReport {
    let node = tree.node(id);
    let filter = node
        .and_then(|n| n.field())
        .and_then(|field| catalog.field(field))
        .map(|desc| desc.filter.clone());
    let range = node.and_then(|n| n.range()).map(|r| RangeReport {
        source: r.source,
        offset: r.offset,
        length: r.length,
    });
    let notes = tree
        .notes_for(id)
        .map(|note| NoteReport {
            severity: note.severity,
            group: note.group,
            message: note.message.clone(),
            expert: note
                .expert
                .and_then(|expert| catalog.expert(expert))
                .map(|desc| desc.name.clone()),
        })
        .collect();
    let children = tree
        .children(id)
        .iter()
        .map(|child| node_report(tree, catalog, *child))
        .collect();
    NodeReport {
        label: tree.label(catalog, id),
        filter,
        value: node.and_then(|n| json_value(n.value())),
        range,
        generated: node.is_some_and(|n| n.is_generated()),
        hidden: node.is_some_and(|n| n.is_hidden()),
        notes,
        children,
    }
}

fn json_value(value: &FieldValue) -> Option<Value> {
    match value {
        FieldValue::None | FieldValue::Missing => None,
        FieldValue::Boolean(v) => Some(Value::from(*v)),
        FieldValue::UInt(v) => Some(Value::from(*v)),
        FieldValue::Int(v) => Some(Value::from(*v)),
        FieldValue::Float(v) => Some(Value::from(*v)),
        FieldValue::Time { secs, nanos } => {
            ts_to_rfc3339(*secs as f64 + *nanos as f64 * 1e-9).map(Value::from)
        }
        FieldValue::Bytes(bytes) => Some(Value::from(hex_string(bytes))),
        FieldValue::String(text) => Some(Value::from(text.clone())),
        FieldValue::FrameNum(v) => Some(Value::from(*v)),
        FieldValue::Ipv4(addr) => Some(Value::from(addr.to_string())),
        FieldValue::Ether(mac) => Some(Value::from(ether_string(mac))),
    }
}
