//! Per-frame protocol tree.
//!
//! Nodes live in an index arena addressed by `NodeId`; parent and child links
//! are indices, so the tree is cheap to build and to throw away. Each node
//! references a catalog field, carries a decoded value and either a byte
//! range in one of the frame's data sources or the *generated* marker.
//!
//! Adding an item never fails: a read past the available bytes yields a
//! placeholder node (`FieldValue::Missing`) and an Error note anchored to it,
//! and siblings added before or after stay intact.

mod cursor;
pub mod value;

use crate::buffer::{BufferError, BufferView, Endianness};
use crate::catalog::{Catalog, ExpertId, FieldId, FieldType, SubtreeId};
use crate::expert::{ExpertGroup, Note, Severity};

pub use cursor::TreeCursor;
pub use value::FieldValue;

use value::{DecodeError, bit_pattern, decode, format_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bytes backing a node: data source index, offset within it, length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub source: usize,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Field(FieldId),
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    kind: NodeKind,
    value: FieldValue,
    range: Option<ByteRange>,
    /// Raw integer before masking, kept for bit-pattern rendering.
    raw: Option<u64>,
    generated: bool,
    hidden: bool,
    subtree: Option<SubtreeId>,
    label: Option<String>,
    appended: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            value: FieldValue::None,
            range: None,
            raw: None,
            generated: false,
            hidden: false,
            subtree: None,
            label: None,
            appended: String::new(),
            parent,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn field(&self) -> Option<FieldId> {
        match self.kind {
            NodeKind::Field(id) => Some(id),
            _ => None,
        }
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// `None` for generated nodes.
    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn subtree(&self) -> Option<SubtreeId> {
        self.subtree
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// A named byte source that node ranges point into.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub name: String,
    pub view: BufferView,
}

/// Position to roll the tree back to when a heuristic declines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMark {
    nodes: usize,
    notes: usize,
    sources: usize,
}

#[derive(Debug, Clone)]
pub struct ProtocolTree {
    nodes: Vec<Node>,
    notes: Vec<Note>,
    sources: Vec<DataSource>,
}

impl ProtocolTree {
    /// Empty tree whose first data source is `view`.
    pub fn new(source_name: impl Into<String>, view: &BufferView) -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Root, None)],
            notes: Vec::new(),
            sources: vec![DataSource {
                name: source_name.into(),
                view: view.clone(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children()).unwrap_or(&[])
    }

    pub fn value(&self, id: NodeId) -> &FieldValue {
        self.node(id).map(|n| &n.value).unwrap_or(&FieldValue::Missing)
    }

    pub fn sources(&self) -> &[DataSource] {
        &self.sources
    }

    /// Register a named data source (e.g. a reassembled buffer).
    pub fn add_data_source(&mut self, name: impl Into<String>, view: &BufferView) -> usize {
        if let Some(index) = self.source_index(view) {
            return index;
        }
        self.sources.push(DataSource {
            name: name.into(),
            view: view.clone(),
        });
        self.sources.len() - 1
    }

    /// Decode a field from `view` and attach it under `parent`.
    ///
    /// # Examples
    /// ```
    /// use deepshark_core::buffer::{BufferView, Endianness};
    /// use deepshark_core::catalog::{CatalogBuilder, FieldSpec, FieldType};
    /// use deepshark_core::tree::ProtocolTree;
    ///
    /// let mut builder = CatalogBuilder::new();
    /// let port = builder.register_field(None, FieldSpec::new("Port", "ex.port", FieldType::UInt16))?;
    /// let catalog = builder.build();
    ///
    /// let view = BufferView::from_bytes(vec![0x13, 0x88]);
    /// let mut tree = ProtocolTree::new("Frame", &view);
    /// let root = tree.root();
    /// let node = tree.add_item(&catalog, root, port, &view, 0, 2, Endianness::Big);
    /// assert_eq!(tree.value(node).as_uint(), Some(5000));
    ///
    /// // Past the end: placeholder plus an Error note, no panic.
    /// let bad = tree.add_item(&catalog, root, port, &view, 1, 2, Endianness::Big);
    /// assert!(tree.value(bad).is_missing());
    /// assert_eq!(tree.notes().len(), 1);
    /// # Ok::<(), deepshark_core::catalog::CatalogError>(())
    /// ```
    #[allow(clippy::too_many_arguments)]
    pub fn add_item(
        &mut self,
        catalog: &Catalog,
        parent: NodeId,
        field: FieldId,
        view: &BufferView,
        offset: usize,
        length: usize,
        endianness: Endianness,
    ) -> NodeId {
        let node = self.push(parent, NodeKind::Field(field));
        let source = self.source_for(view);
        self.nodes[node.index()].range = Some(ByteRange {
            source,
            offset: view.source_offset() + offset,
            length,
        });

        let Some(desc) = catalog.field(field) else {
            self.nodes[node.index()].value = FieldValue::Missing;
            self.report(
                node,
                Severity::Error,
                ExpertGroup::Malformed,
                format!("Dissector bug: field id {} is not registered", field.index()),
                None,
            );
            return node;
        };

        match decode(desc, view, offset, length, endianness) {
            Ok(value) => {
                if desc.bitmask != 0 {
                    self.nodes[node.index()].raw = view.uint(offset, length, endianness).ok();
                }
                self.nodes[node.index()].value = value;
            }
            Err(DecodeError::Buffer(err)) => {
                self.nodes[node.index()].value = FieldValue::Missing;
                let message = bounds_message(&desc.filter, &err);
                self.report(node, Severity::Error, ExpertGroup::Malformed, message, None);
            }
            Err(DecodeError::WrongLength { expected, actual }) => {
                self.nodes[node.index()].value = FieldValue::Missing;
                self.report(
                    node,
                    Severity::Error,
                    ExpertGroup::Malformed,
                    format!(
                        "Malformed: field {} needs {expected} bytes, got {actual}",
                        desc.filter
                    ),
                    None,
                );
            }
        }
        node
    }

    /// Attach a value with no backing bytes.
    pub fn add_generated(&mut self, parent: NodeId, field: FieldId, value: FieldValue) -> NodeId {
        let node = self.push(parent, NodeKind::Field(field));
        let entry = &mut self.nodes[node.index()];
        entry.value = value;
        entry.generated = true;
        node
    }

    /// Free-text node covering `length` bytes at `offset` of `view`.
    pub fn add_text(
        &mut self,
        parent: NodeId,
        view: &BufferView,
        offset: usize,
        length: usize,
        text: impl Into<String>,
    ) -> NodeId {
        let node = self.push(parent, NodeKind::Text);
        let source = self.source_for(view);
        let entry = &mut self.nodes[node.index()];
        entry.label = Some(text.into());
        entry.range = Some(ByteRange {
            source,
            offset: view.source_offset() + offset,
            length,
        });
        node
    }

    /// Free-text node with no byte range.
    pub fn add_generated_text(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        let node = self.push(parent, NodeKind::Text);
        let entry = &mut self.nodes[node.index()];
        entry.label = Some(text.into());
        entry.generated = true;
        node
    }

    /// Mark `node` as the head of a subtree and return it for use as a parent.
    pub fn start_subtree(&mut self, node: NodeId, subtree: SubtreeId) -> NodeId {
        if let Some(entry) = self.nodes.get_mut(node.index()) {
            entry.subtree = Some(subtree);
        }
        node
    }

    pub fn append_text(&mut self, node: NodeId, text: &str) {
        if let Some(entry) = self.nodes.get_mut(node.index()) {
            entry.appended.push_str(text);
        }
    }

    /// Replace the rendered label of `node`.
    pub fn set_label(&mut self, node: NodeId, text: impl Into<String>) {
        if let Some(entry) = self.nodes.get_mut(node.index()) {
            entry.label = Some(text.into());
        }
    }

    pub fn set_hidden(&mut self, node: NodeId) {
        if let Some(entry) = self.nodes.get_mut(node.index()) {
            entry.hidden = true;
        }
    }

    pub fn set_generated(&mut self, node: NodeId) {
        if let Some(entry) = self.nodes.get_mut(node.index()) {
            entry.generated = true;
        }
    }

    /// Shrink or grow the byte range once the real length is known.
    pub fn set_length(&mut self, node: NodeId, length: usize) {
        if let Some(range) = self
            .nodes
            .get_mut(node.index())
            .and_then(|entry| entry.range.as_mut())
        {
            range.length = length;
        }
    }

    pub fn report(
        &mut self,
        anchor: NodeId,
        severity: Severity,
        group: ExpertGroup,
        message: impl Into<String>,
        expert: Option<ExpertId>,
    ) {
        let anchor = if anchor.index() < self.nodes.len() {
            anchor
        } else {
            NodeId::ROOT
        };
        self.notes.push(Note {
            anchor,
            severity,
            group,
            message: message.into(),
            expert,
        });
    }

    /// Record a placeholder for a decoder that ran off the end of its view.
    pub fn report_bounds(&mut self, parent: NodeId, protocol: &str, err: &BufferError) -> NodeId {
        let text = if err.is_malformed() {
            format!("[Malformed Packet: {protocol}]")
        } else {
            format!("[Packet size limited during capture: {protocol} truncated]")
        };
        let node = self.add_generated_text(parent, text);
        self.report(
            node,
            Severity::Error,
            ExpertGroup::Malformed,
            bounds_message(protocol, err),
            None,
        );
        node
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Notes anchored exactly at `node`.
    pub fn notes_for(&self, node: NodeId) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |note| note.anchor == node)
    }

    pub fn max_severity(&self) -> Option<Severity> {
        crate::expert::max_severity(&self.notes)
    }

    /// Highest severity among notes anchored at `node` or below it.
    pub fn max_severity_under(&self, node: NodeId) -> Option<Severity> {
        self.notes
            .iter()
            .filter(|note| self.is_descendant(note.anchor, node))
            .map(|note| note.severity)
            .max()
    }

    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    /// First node for `field` in pre-order.
    pub fn find_first(&self, field: FieldId) -> Option<NodeId> {
        self.preorder(NodeId::ROOT)
            .into_iter()
            .find(|id| self.nodes[id.index()].field() == Some(field))
    }

    /// Every node for `field` in pre-order.
    pub fn find_all(&self, field: FieldId) -> Vec<NodeId> {
        self.preorder(NodeId::ROOT)
            .into_iter()
            .filter(|id| self.nodes[id.index()].field() == Some(field))
            .collect()
    }

    /// Value of the first node for `field`.
    pub fn value_of(&self, field: FieldId) -> Option<&FieldValue> {
        self.find_first(field).map(|id| &self.nodes[id.index()].value)
    }

    /// Direct child of `parent` for `field`.
    pub fn child_with(&self, parent: NodeId, field: FieldId) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|id| self.nodes[id.index()].field() == Some(field))
    }

    /// Node ids under `start` (inclusive) in pre-order.
    pub fn preorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Human-readable label of a node.
    pub fn label(&self, catalog: &Catalog, id: NodeId) -> String {
        let Some(node) = self.node(id) else {
            return String::new();
        };
        let mut text = match (node.kind, node.label.as_ref()) {
            (NodeKind::Root, _) => String::new(),
            (_, Some(label)) => label.clone(),
            (NodeKind::Text, None) => String::new(),
            (NodeKind::Field(field), None) => match catalog.field(field) {
                Some(desc) => {
                    let width = node
                        .range
                        .map(|r| r.length)
                        .or(desc.ftype.fixed_width())
                        .unwrap_or(1);
                    let prefix = match node.raw {
                        Some(raw) if desc.bitmask != 0 => {
                            format!("{} = ", bit_pattern(desc.bitmask, raw, width))
                        }
                        _ => String::new(),
                    };
                    match desc.ftype {
                        FieldType::None | FieldType::Protocol => format!("{prefix}{}", desc.name),
                        _ => format!(
                            "{prefix}{}: {}",
                            desc.name,
                            format_value(desc, &node.value, width)
                        ),
                    }
                }
                None => String::from("<unknown field>"),
            },
        };
        text.push_str(&node.appended);
        text
    }

    pub fn checkpoint(&self) -> TreeMark {
        TreeMark {
            nodes: self.nodes.len(),
            notes: self.notes.len(),
            sources: self.sources.len(),
        }
    }

    /// Drop every node, note and data source added since `mark`.
    pub fn rollback(&mut self, mark: TreeMark) {
        while self.nodes.len() > mark.nodes.max(1) {
            let Some(node) = self.nodes.pop() else {
                break;
            };
            if let Some(parent) = node.parent {
                if parent.index() < mark.nodes {
                    self.nodes[parent.index()].children.pop();
                }
            }
        }
        self.notes.truncate(mark.notes);
        self.sources.truncate(mark.sources.max(1));
    }

    /// Same nodes, notes and data source names.
    pub fn same_structure(&self, other: &ProtocolTree) -> bool {
        self.nodes == other.nodes
            && self.notes == other.notes
            && self
                .sources
                .iter()
                .map(|s| s.name.as_str())
                .eq(other.sources.iter().map(|s| s.name.as_str()))
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let parent = if parent.index() < self.nodes.len() {
            parent
        } else {
            NodeId::ROOT
        };
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, Some(parent)));
        self.nodes[parent.index()].children.push(id);
        id
    }

    fn source_index(&self, view: &BufferView) -> Option<usize> {
        self.sources
            .iter()
            .position(|source| source.view.same_source(view))
    }

    fn source_for(&mut self, view: &BufferView) -> usize {
        match self.source_index(view) {
            Some(index) => index,
            None => self.add_data_source("Composite", view),
        }
    }
}

fn bounds_message(what: &str, err: &BufferError) -> String {
    let &BufferError::BoundsExceeded {
        offset,
        length,
        captured,
        reported,
    } = err
    else {
        return format!("Dissector bug: {what}: {err}");
    };
    if err.is_malformed() {
        format!(
            "Malformed: {what} needs {length} bytes at offset {offset}, only {reported} on the wire"
        )
    } else {
        format!(
            "Truncated capture: {what} needs {length} bytes at offset {offset}, only {captured} captured"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldValue, NodeId, ProtocolTree};
    use crate::buffer::{BufferView, Endianness};
    use crate::catalog::{Catalog, CatalogBuilder, FieldDisplay, FieldId, FieldSpec, FieldType};
    use crate::expert::Severity;

    fn catalog() -> (Catalog, FieldId, FieldId, FieldId) {
        let mut builder = CatalogBuilder::new();
        let kind = builder
            .register_field(None, FieldSpec::new("Kind", "t.kind", FieldType::UInt8))
            .unwrap();
        let length = builder
            .register_field(
                None,
                FieldSpec::new("Length", "t.len", FieldType::UInt32).display(FieldDisplay::Dec),
            )
            .unwrap();
        let flag = builder
            .register_field(
                None,
                FieldSpec::new("Flag", "t.flag", FieldType::UInt8)
                    .display(FieldDisplay::Dec)
                    .bitmask(0x08),
            )
            .unwrap();
        (builder.build(), kind, length, flag)
    }

    #[test]
    fn bounds_failure_keeps_siblings_intact() {
        let (catalog, kind, length, _) = catalog();
        let view = BufferView::from_bytes(vec![0x01, 0x00, 0x00]);
        let mut tree = ProtocolTree::new("Frame", &view);
        let first = tree.add_item(&catalog, NodeId::ROOT, kind, &view, 0, 1, Endianness::Big);
        let bad = tree.add_item(&catalog, NodeId::ROOT, length, &view, 1, 4, Endianness::Big);
        let after = tree.add_item(&catalog, NodeId::ROOT, kind, &view, 2, 1, Endianness::Big);

        assert_eq!(tree.children(NodeId::ROOT), &[first, bad, after]);
        assert_eq!(tree.value(first), &FieldValue::UInt(1));
        assert!(tree.value(bad).is_missing());
        assert_eq!(tree.value(after), &FieldValue::UInt(0));
        assert_eq!(tree.max_severity(), Some(Severity::Error));
        assert_eq!(tree.notes_for(bad).count(), 1);
        assert!(tree.notes()[0].message.starts_with("Malformed"));
    }

    #[test]
    fn truncated_capture_is_distinguished() {
        let (catalog, _, length, _) = catalog();
        let view = BufferView::new(vec![0x00, 0x00], 8);
        let mut tree = ProtocolTree::new("Frame", &view);
        tree.add_item(&catalog, NodeId::ROOT, length, &view, 0, 4, Endianness::Big);
        assert!(tree.notes()[0].message.starts_with("Truncated capture"));
    }

    #[test]
    fn rollback_discards_nodes_and_notes() {
        let (catalog, kind, length, _) = catalog();
        let view = BufferView::from_bytes(vec![0x01]);
        let mut tree = ProtocolTree::new("Frame", &view);
        let keep = tree.add_item(&catalog, NodeId::ROOT, kind, &view, 0, 1, Endianness::Big);
        let mark = tree.checkpoint();
        let sub = tree.add_item(&catalog, keep, kind, &view, 0, 1, Endianness::Big);
        tree.add_item(&catalog, sub, length, &view, 0, 4, Endianness::Big);
        tree.rollback(mark);

        assert_eq!(tree.len(), 2);
        assert!(tree.children(keep).is_empty());
        assert!(tree.notes().is_empty());
    }

    #[test]
    fn max_severity_under_respects_subtrees() {
        let (catalog, kind, length, _) = catalog();
        let view = BufferView::from_bytes(vec![0x01]);
        let mut tree = ProtocolTree::new("Frame", &view);
        let left = tree.add_item(&catalog, NodeId::ROOT, kind, &view, 0, 1, Endianness::Big);
        let right = tree.add_item(&catalog, NodeId::ROOT, kind, &view, 0, 1, Endianness::Big);
        tree.add_item(&catalog, right, length, &view, 0, 4, Endianness::Big);

        assert_eq!(tree.max_severity_under(left), None);
        assert_eq!(tree.max_severity_under(right), Some(Severity::Error));
    }

    #[test]
    fn masked_field_label_shows_bit_pattern() {
        let (catalog, _, _, flag) = catalog();
        let view = BufferView::from_bytes(vec![0x08]);
        let mut tree = ProtocolTree::new("Frame", &view);
        let node = tree.add_item(&catalog, NodeId::ROOT, flag, &view, 0, 1, Endianness::Big);
        assert_eq!(tree.label(&catalog, node), ".... 1... = Flag: 1");
    }

    #[test]
    fn find_all_is_preorder() {
        let (catalog, kind, _, _) = catalog();
        let view = BufferView::from_bytes(vec![0x01, 0x02, 0x03]);
        let mut tree = ProtocolTree::new("Frame", &view);
        let a = tree.add_item(&catalog, NodeId::ROOT, kind, &view, 0, 1, Endianness::Big);
        let b = tree.add_item(&catalog, a, kind, &view, 1, 1, Endianness::Big);
        let c = tree.add_item(&catalog, NodeId::ROOT, kind, &view, 2, 1, Endianness::Big);
        assert_eq!(tree.find_all(kind), vec![a, b, c]);
        assert_eq!(tree.find_first(kind), Some(a));
    }
}
