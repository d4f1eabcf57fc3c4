use crate::buffer::{BufferView, Endianness};
use crate::catalog::FieldId;
use crate::dispatch::DissectCx;

use super::NodeId;

/// Adds consecutive items from a view, advancing past each one.
///
/// # Examples
/// This helper needs a live dissection context, so the example is marked as
/// text example.
/// ```text
/// let mut cursor = TreeCursor::new(view, 0, header);
/// cursor.add(cx, fields.dst, 6, Endianness::Big);
/// cursor.add(cx, fields.src, 6, Endianness::Big);
/// let ethertype = cursor.add_uint(cx, fields.ethertype, 2, Endianness::Big);
/// ```
#[derive(Debug)]
pub struct TreeCursor<'v> {
    view: &'v BufferView,
    offset: usize,
    parent: NodeId,
}

impl<'v> TreeCursor<'v> {
    pub fn new(view: &'v BufferView, offset: usize, parent: NodeId) -> Self {
        Self {
            view,
            offset,
            parent,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn set_parent(&mut self, parent: NodeId) {
        self.parent = parent;
    }

    pub fn advance(&mut self, length: usize) {
        self.offset += length;
    }

    pub fn add(
        &mut self,
        cx: &mut DissectCx<'_>,
        field: FieldId,
        length: usize,
        endianness: Endianness,
    ) -> NodeId {
        let node = cx.add_item(self.parent, field, self.view, self.offset, length, endianness);
        self.offset += length;
        node
    }

    /// Add without advancing, for several masked fields over the same bytes.
    pub fn add_no_advance(
        &mut self,
        cx: &mut DissectCx<'_>,
        field: FieldId,
        length: usize,
        endianness: Endianness,
    ) -> NodeId {
        cx.add_item(self.parent, field, self.view, self.offset, length, endianness)
    }

    pub fn add_uint(
        &mut self,
        cx: &mut DissectCx<'_>,
        field: FieldId,
        length: usize,
        endianness: Endianness,
    ) -> Option<u64> {
        let node = self.add(cx, field, length, endianness);
        cx.tree().value(node).as_uint()
    }
}
