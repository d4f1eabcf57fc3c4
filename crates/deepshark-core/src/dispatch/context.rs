use std::sync::Arc;

use crate::buffer::{BufferView, Endianness};
use crate::catalog::{Catalog, ExpertId, FieldId, ProtocolId, SubtreeId};
use crate::engine::Engine;
use crate::expert::{ExpertGroup, Severity};
use crate::frame::{Columns, FrameContext};
use crate::prefs::Preferences;
use crate::scope::CaptureScope;
use crate::tree::{FieldValue, NodeId, ProtocolTree};

use super::decode_as::DecodeAsStore;
use super::table::{DissectorKey, DissectorTable, MatchKind};
use super::{DissectorHandle, Outcome};

enum Invocation {
    Accepted(usize),
    Rejected,
}

/// Everything a decoder may touch while dissecting one frame.
pub struct DissectCx<'a> {
    engine: &'a Engine,
    capture: &'a CaptureScope,
    overrides: &'a DecodeAsStore,
    frame: &'a mut FrameContext,
    tree: &'a mut ProtocolTree,
}

impl<'a> DissectCx<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        capture: &'a CaptureScope,
        overrides: &'a DecodeAsStore,
        frame: &'a mut FrameContext,
        tree: &'a mut ProtocolTree,
    ) -> Self {
        Self {
            engine,
            capture,
            overrides,
            frame,
            tree,
        }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.engine.catalog()
    }

    pub fn prefs(&self) -> &'a Preferences {
        self.engine.prefs()
    }

    pub fn capture(&self) -> &'a CaptureScope {
        self.capture
    }

    pub fn frame(&self) -> &FrameContext {
        self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FrameContext {
        self.frame
    }

    pub fn visited(&self) -> bool {
        self.frame.visited()
    }

    pub fn columns(&mut self) -> &mut Columns {
        &mut self.frame.columns
    }

    pub fn tree(&self) -> &ProtocolTree {
        self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ProtocolTree {
        self.tree
    }

    pub fn find_dissector(&self, name: &str) -> Option<DissectorHandle> {
        self.engine.registry().find_dissector(name).ok()
    }

    pub fn add_item(
        &mut self,
        parent: NodeId,
        field: FieldId,
        view: &BufferView,
        offset: usize,
        length: usize,
        endianness: Endianness,
    ) -> NodeId {
        let catalog = self.engine.catalog();
        self.tree
            .add_item(catalog, parent, field, view, offset, length, endianness)
    }

    /// Add an integer item and hand back its (masked) value.
    pub fn add_uint(
        &mut self,
        parent: NodeId,
        field: FieldId,
        view: &BufferView,
        offset: usize,
        length: usize,
        endianness: Endianness,
    ) -> (NodeId, Option<u64>) {
        let node = self.add_item(parent, field, view, offset, length, endianness);
        (node, self.tree.value(node).as_uint())
    }

    pub fn add_generated(&mut self, parent: NodeId, field: FieldId, value: FieldValue) -> NodeId {
        self.tree.add_generated(parent, field, value)
    }

    pub fn add_text(
        &mut self,
        parent: NodeId,
        view: &BufferView,
        offset: usize,
        length: usize,
        text: impl Into<String>,
    ) -> NodeId {
        self.tree.add_text(parent, view, offset, length, text)
    }

    /// Protocol item for `protocol` covering `length` bytes, opened as a
    /// subtree.
    pub fn add_protocol(
        &mut self,
        parent: NodeId,
        protocol: ProtocolId,
        view: &BufferView,
        offset: usize,
        length: usize,
        subtree: SubtreeId,
    ) -> NodeId {
        let field = self
            .engine
            .catalog()
            .protocol(protocol)
            .map(|info| info.field);
        let node = match field {
            Some(field) => self.add_item(parent, field, view, offset, length, Endianness::Big),
            None => self.tree.add_text(parent, view, offset, length, "<unknown protocol>"),
        };
        self.tree.start_subtree(node, subtree)
    }

    pub fn start_subtree(&mut self, node: NodeId, subtree: SubtreeId) -> NodeId {
        self.tree.start_subtree(node, subtree)
    }

    pub fn append_text(&mut self, node: NodeId, text: &str) {
        self.tree.append_text(node, text);
    }

    pub fn report(&mut self, node: NodeId, severity: Severity, message: impl Into<String>) {
        self.tree
            .report(node, severity, ExpertGroup::Protocol, message, None);
    }

    pub fn report_group(
        &mut self,
        node: NodeId,
        severity: Severity,
        group: ExpertGroup,
        message: impl Into<String>,
    ) {
        self.tree.report(node, severity, group, message, None);
    }

    /// Raise a registered expert info with its summary as message.
    pub fn report_expert(&mut self, node: NodeId, expert: ExpertId) {
        let summary = self
            .engine
            .catalog()
            .expert(expert)
            .map(|e| e.summary.clone())
            .unwrap_or_default();
        self.report_expert_with(node, expert, summary);
    }

    pub fn report_expert_with(&mut self, node: NodeId, expert: ExpertId, message: impl Into<String>) {
        match self.engine.catalog().expert(expert) {
            Some(desc) => {
                self.tree
                    .report(node, desc.severity, desc.group, message, Some(expert));
            }
            None => {
                self.tree
                    .report(node, Severity::Error, ExpertGroup::Debug, message, None);
            }
        }
    }

    /// Full dispatch through `table`: override, static entry, heuristics,
    /// fallback, then `data`. Returns the bytes consumed.
    pub fn call_table(
        &mut self,
        table: &str,
        key: impl Into<DissectorKey>,
        view: &BufferView,
        parent: NodeId,
    ) -> usize {
        let key = key.into();
        let Some(found) = self.engine.registry().table(table) else {
            tracing::warn!(table, "dispatch through unregistered table");
            self.report_group(
                parent,
                Severity::Error,
                ExpertGroup::Debug,
                format!("Dissector bug: unknown dissector table '{table}'"),
            );
            return self.call_data(view, parent);
        };
        if let Some(consumed) = self.try_keyed(found, &key, view, parent) {
            return consumed;
        }
        if let Some(consumed) = self.try_heuristic_chain(found, view, parent) {
            return consumed;
        }
        if let Some(fallback) = found.fallback() {
            if let Invocation::Accepted(consumed) =
                self.invoke(fallback, view, parent, MatchKind::Fallback)
            {
                return consumed;
            }
        }
        self.call_data(view, parent)
    }

    /// Override or static entry for `key` only; `None` when nothing matched
    /// or the matched decoder declined.
    pub fn try_table(
        &mut self,
        table: &str,
        key: impl Into<DissectorKey>,
        view: &BufferView,
        parent: NodeId,
    ) -> Option<usize> {
        let found = self.engine.registry().table(table)?;
        self.try_keyed(found, &key.into(), view, parent)
    }

    /// Heuristic chain of `table` only.
    pub fn try_heuristics(&mut self, table: &str, view: &BufferView, parent: NodeId) -> Option<usize> {
        let found = self.engine.registry().table(table)?;
        self.try_heuristic_chain(found, view, parent)
    }

    /// Invoke `handle` directly; a decline falls back to `data`.
    pub fn call_dissector(&mut self, handle: &DissectorHandle, view: &BufferView, parent: NodeId) -> usize {
        match self.invoke(handle, view, parent, MatchKind::Exact) {
            Invocation::Accepted(consumed) => consumed,
            Invocation::Rejected => self.call_data(view, parent),
        }
    }

    pub fn call_data(&mut self, view: &BufferView, parent: NodeId) -> usize {
        let data = self.engine.registry().data().clone();
        match self.invoke(&data, view, parent, MatchKind::Fallback) {
            Invocation::Accepted(consumed) => consumed,
            Invocation::Rejected => 0,
        }
    }

    /// Record bytes after `consumed` that no decoder accounted for.
    pub fn flag_unconsumed(&mut self, parent: NodeId, view: &BufferView, consumed: usize) -> Option<NodeId> {
        let total = view.reported_len();
        if consumed >= total {
            return None;
        }
        let extra = total - consumed;
        let node = self.tree.add_text(
            parent,
            view,
            consumed,
            extra,
            format!("Trailing data: {extra} bytes"),
        );
        self.tree.report(
            node,
            Severity::Note,
            ExpertGroup::Undecoded,
            format!("{extra} bytes after the last decoded layer"),
            None,
        );
        Some(node)
    }

    fn try_keyed(
        &mut self,
        table: &'a DissectorTable,
        key: &DissectorKey,
        view: &BufferView,
        parent: NodeId,
    ) -> Option<usize> {
        if table.check_key(key).is_err() {
            tracing::warn!(table = table.name(), %key, "key kind does not match table");
            return None;
        }
        let layer = u8::try_from(self.frame.layers().depth()).unwrap_or(u8::MAX);
        let (kind, handle) = match self.overrides.lookup(table.name(), key, layer) {
            Some(handle) => (MatchKind::Override, handle),
            None => table.lookup(key)?,
        };
        tracing::debug!(
            table = table.name(),
            %key,
            layer,
            dissector = handle.name(),
            matched = ?kind,
            "dispatch"
        );
        match self.invoke(handle, view, parent, kind) {
            Invocation::Accepted(consumed) => Some(consumed),
            Invocation::Rejected => None,
        }
    }

    fn try_heuristic_chain(
        &mut self,
        table: &'a DissectorTable,
        view: &BufferView,
        parent: NodeId,
    ) -> Option<usize> {
        for entry in table.heuristics() {
            if let Invocation::Accepted(consumed) =
                self.invoke(&entry.handle, view, parent, MatchKind::Heuristic)
            {
                tracing::debug!(
                    table = table.name(),
                    dissector = entry.handle.name(),
                    "heuristic accepted"
                );
                return Some(consumed);
            }
        }
        None
    }

    fn layer_name(&self, handle: &DissectorHandle) -> Arc<str> {
        handle
            .protocol()
            .and_then(|id| self.engine.catalog().protocol(id))
            .map(|info| Arc::from(info.filter.as_str()))
            .unwrap_or_else(|| Arc::from(handle.name()))
    }

    fn invoke(
        &mut self,
        handle: &DissectorHandle,
        view: &BufferView,
        parent: NodeId,
        kind: MatchKind,
    ) -> Invocation {
        if self.frame.depth() >= self.engine.max_depth() {
            tracing::warn!(
                frame = self.frame.number,
                dissector = handle.name(),
                max_depth = self.engine.max_depth(),
                "recursion limit exceeded"
            );
            let node = self
                .tree
                .add_generated_text(parent, "[Dissection depth limit exceeded]");
            self.tree.report(
                node,
                Severity::Error,
                ExpertGroup::Malformed,
                format!(
                    "Recursion limit exceeded: more than {} nested layers",
                    self.engine.max_depth()
                ),
                None,
            );
            return Invocation::Accepted(0);
        }

        let layer = self.layer_name(handle);
        let mark = self.tree.checkpoint();
        let columns = self.frame.columns.clone();
        self.frame.layers_mut().push(Arc::clone(&layer));
        self.frame.enter();
        let result = handle.dissector().dissect(self, view, parent);
        self.frame.leave();

        match result {
            Ok(Outcome::Accepted(consumed)) => {
                Invocation::Accepted(consumed.min(view.reported_len()))
            }
            Ok(Outcome::Rejected) => {
                if kind != MatchKind::Heuristic {
                    tracing::debug!(dissector = handle.name(), "dissector declined payload");
                }
                self.frame.layers_mut().pop();
                self.tree.rollback(mark);
                self.frame.columns = columns;
                Invocation::Rejected
            }
            Err(err) => {
                let name = handle
                    .protocol()
                    .and_then(|id| self.engine.catalog().protocol(id))
                    .map(|info| info.short_name.clone())
                    .unwrap_or_else(|| layer.to_string());
                self.tree.report_bounds(parent, &name, &err);
                let marker = if err.is_malformed() {
                    "[Malformed Packet]"
                } else {
                    "[Packet size limited during capture]"
                };
                self.frame.columns.append_sep_info(" ", marker);
                Invocation::Accepted(view.reported_len())
            }
        }
    }
}
