use std::borrow::Cow;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use super::error::BufferError;

/// Byte order used by multi-byte reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

#[derive(Debug)]
struct Backing {
    segments: Vec<Bytes>,
    captured: usize,
}

/// Read-only window over captured bytes.
///
/// # Examples
/// ```
/// use deepshark_core::buffer::{BufferView, Endianness};
///
/// let view = BufferView::new(vec![0x12, 0x34, 0x56], 8);
/// assert_eq!(view.captured_len(), 3);
/// assert_eq!(view.reported_len(), 8);
/// assert_eq!(view.u16(0, Endianness::Big)?, 0x1234);
///
/// // Slicing into the uncaptured tail is allowed; reading there is not.
/// let tail = view.slice(2, 4)?;
/// assert_eq!(tail.u8(0)?, 0x56);
/// assert!(tail.u8(1).is_err());
/// # Ok::<(), deepshark_core::buffer::BufferError>(())
/// ```
#[derive(Debug, Clone)]
pub struct BufferView {
    backing: Arc<Backing>,
    offset: usize,
    reported: usize,
}

impl BufferView {
    /// Build a view over captured bytes whose on-wire length was
    /// `reported_len`. A reported length shorter than the data is raised to
    /// the captured length.
    pub fn new(data: impl Into<Bytes>, reported_len: usize) -> Self {
        let data: Bytes = data.into();
        let captured = data.len();
        let reported = reported_len.max(captured);
        let segments = if data.is_empty() { Vec::new() } else { vec![data] };
        Self {
            backing: Arc::new(Backing { segments, captured }),
            offset: 0,
            reported,
        }
    }

    /// View whose reported length equals its captured length.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let len = data.len();
        Self::new(data, len)
    }

    /// Composite view spanning `first` followed by `second`.
    ///
    /// No bytes are copied. When `first` is truncated the composite's
    /// captured bytes stop where `first`'s do, since nothing after the gap
    /// can be placed.
    pub fn concat(first: &BufferView, second: &BufferView) -> BufferView {
        let mut segments = first.captured_segments();
        let mut captured = first.captured_len();
        if !first.is_truncated() {
            segments.extend(second.captured_segments());
            captured += second.captured_len();
        }
        let reported = first.reported_len() + second.reported_len();
        Self {
            backing: Arc::new(Backing { segments, captured }),
            offset: 0,
            reported,
        }
    }

    pub fn reported_len(&self) -> usize {
        self.reported
    }

    pub fn captured_len(&self) -> usize {
        self.backing
            .captured
            .saturating_sub(self.offset)
            .min(self.reported)
    }

    pub fn is_truncated(&self) -> bool {
        self.captured_len() < self.reported
    }

    pub fn is_empty(&self) -> bool {
        self.reported == 0
    }

    /// Offset of this view's first byte within its data source.
    pub fn source_offset(&self) -> usize {
        self.offset
    }

    /// Whether both views were derived from the same data source.
    pub fn same_source(&self, other: &BufferView) -> bool {
        Arc::ptr_eq(&self.backing, &other.backing)
    }

    /// Reported bytes left after `offset`.
    pub fn remaining_reported(&self, offset: usize) -> Result<usize, BufferError> {
        if offset > self.reported {
            return Err(self.bounds_error(offset, 0));
        }
        Ok(self.reported - offset)
    }

    /// Captured bytes left after `offset`; zero past the captured end.
    pub fn remaining_captured(&self, offset: usize) -> usize {
        self.captured_len().saturating_sub(offset)
    }

    /// Derive a sub-view. Checked against the reported length only.
    ///
    /// # Errors
    /// Returns `BufferError::BoundsExceeded` when `offset + length` runs past
    /// the reported length of this view.
    pub fn slice(&self, offset: usize, length: usize) -> Result<BufferView, BufferError> {
        match offset.checked_add(length) {
            Some(end) if end <= self.reported => Ok(Self {
                backing: Arc::clone(&self.backing),
                offset: self.offset + offset,
                reported: length,
            }),
            _ => Err(self.bounds_error(offset, length)),
        }
    }

    /// Derive a sub-view from `offset` to the reported end.
    pub fn slice_to_end(&self, offset: usize) -> Result<BufferView, BufferError> {
        let length = self.remaining_reported(offset)?;
        self.slice(offset, length)
    }

    /// Borrow `length` bytes at `offset`, copying only when the range
    /// straddles a composite join.
    pub fn bytes(&self, offset: usize, length: usize) -> Result<Cow<'_, [u8]>, BufferError> {
        self.check_captured(offset, length)?;
        if length == 0 {
            return Ok(Cow::Borrowed(&[]));
        }
        let start = self.offset + offset;
        if let Some(slice) = self.contiguous(start, length) {
            return Ok(Cow::Borrowed(slice));
        }
        Ok(Cow::Owned(self.materialize(start, length).to_vec()))
    }

    /// Shared handle to `length` bytes at `offset`.
    pub fn to_bytes(&self, offset: usize, length: usize) -> Result<Bytes, BufferError> {
        self.check_captured(offset, length)?;
        if length == 0 {
            return Ok(Bytes::new());
        }
        let start = self.offset + offset;
        let mut base = 0usize;
        for segment in &self.backing.segments {
            let end = base + segment.len();
            if start >= base && start + length <= end {
                return Ok(segment.slice(start - base..start - base + length));
            }
            base = end;
        }
        Ok(self.materialize(start, length).freeze())
    }

    /// Unsigned integer of `width` bytes.
    ///
    /// # Errors
    /// `BufferError::InvalidWidth` unless `width` is in `1..=8`, otherwise
    /// `BufferError::BoundsExceeded` when the bytes were not captured.
    pub fn uint(
        &self,
        offset: usize,
        width: usize,
        endianness: Endianness,
    ) -> Result<u64, BufferError> {
        if !(1..=8).contains(&width) {
            return Err(BufferError::InvalidWidth { width });
        }
        let raw = self.bytes(offset, width)?;
        let value = match endianness {
            Endianness::Big => raw.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64),
            Endianness::Little => raw.iter().rev().fold(0u64, |acc, b| (acc << 8) | *b as u64),
        };
        Ok(value)
    }

    /// Signed integer of `width` bytes (1..=8), sign-extended.
    pub fn int(&self, offset: usize, width: usize, endianness: Endianness) -> Result<i64, BufferError> {
        let raw = self.uint(offset, width, endianness)?;
        let shift = 64 - (width as u32 * 8);
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn u8(&self, offset: usize) -> Result<u8, BufferError> {
        Ok(self.uint(offset, 1, Endianness::Big)? as u8)
    }

    pub fn u16(&self, offset: usize, endianness: Endianness) -> Result<u16, BufferError> {
        Ok(self.uint(offset, 2, endianness)? as u16)
    }

    pub fn u24(&self, offset: usize, endianness: Endianness) -> Result<u32, BufferError> {
        Ok(self.uint(offset, 3, endianness)? as u32)
    }

    pub fn u32(&self, offset: usize, endianness: Endianness) -> Result<u32, BufferError> {
        Ok(self.uint(offset, 4, endianness)? as u32)
    }

    pub fn u40(&self, offset: usize, endianness: Endianness) -> Result<u64, BufferError> {
        self.uint(offset, 5, endianness)
    }

    pub fn u48(&self, offset: usize, endianness: Endianness) -> Result<u64, BufferError> {
        self.uint(offset, 6, endianness)
    }

    pub fn u64(&self, offset: usize, endianness: Endianness) -> Result<u64, BufferError> {
        self.uint(offset, 8, endianness)
    }

    pub fn i8(&self, offset: usize) -> Result<i8, BufferError> {
        Ok(self.int(offset, 1, Endianness::Big)? as i8)
    }

    pub fn i16(&self, offset: usize, endianness: Endianness) -> Result<i16, BufferError> {
        Ok(self.int(offset, 2, endianness)? as i16)
    }

    pub fn i32(&self, offset: usize, endianness: Endianness) -> Result<i32, BufferError> {
        Ok(self.int(offset, 4, endianness)? as i32)
    }

    pub fn i64(&self, offset: usize, endianness: Endianness) -> Result<i64, BufferError> {
        self.int(offset, 8, endianness)
    }

    pub fn f32(&self, offset: usize, endianness: Endianness) -> Result<f32, BufferError> {
        Ok(f32::from_bits(self.u32(offset, endianness)?))
    }

    pub fn f64(&self, offset: usize, endianness: Endianness) -> Result<f64, BufferError> {
        Ok(f64::from_bits(self.u64(offset, endianness)?))
    }

    fn check_captured(&self, offset: usize, length: usize) -> Result<(), BufferError> {
        match offset.checked_add(length) {
            Some(end) if end <= self.captured_len() => Ok(()),
            _ => Err(self.bounds_error(offset, length)),
        }
    }

    fn bounds_error(&self, offset: usize, length: usize) -> BufferError {
        BufferError::BoundsExceeded {
            offset,
            length,
            captured: self.captured_len(),
            reported: self.reported,
        }
    }

    fn contiguous(&self, start: usize, length: usize) -> Option<&[u8]> {
        let mut base = 0usize;
        for segment in &self.backing.segments {
            let end = base + segment.len();
            if start >= base && start + length <= end {
                return Some(&segment[start - base..start - base + length]);
            }
            if start < end {
                return None;
            }
            base = end;
        }
        None
    }

    fn materialize(&self, start: usize, length: usize) -> BytesMut {
        let mut out = BytesMut::with_capacity(length);
        let stop = start + length;
        let mut base = 0usize;
        for segment in &self.backing.segments {
            let end = base + segment.len();
            if end > start && base < stop {
                let from = start.max(base) - base;
                let to = stop.min(end) - base;
                out.extend_from_slice(&segment[from..to]);
            }
            if end >= stop {
                break;
            }
            base = end;
        }
        out
    }

    fn captured_segments(&self) -> Vec<Bytes> {
        let start = self.offset;
        let stop = self.offset + self.captured_len();
        let mut out = Vec::new();
        let mut base = 0usize;
        for segment in &self.backing.segments {
            let end = base + segment.len();
            if end > start && base < stop {
                let from = start.max(base) - base;
                let to = stop.min(end) - base;
                out.push(segment.slice(from..to));
            }
            base = end;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferView, Endianness};
    use crate::buffer::BufferError;
    use std::borrow::Cow;

    #[test]
    fn reads_big_and_little_endian() {
        let view = BufferView::from_bytes(vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(view.u16(0, Endianness::Big).unwrap(), 0x0102);
        assert_eq!(view.u16(0, Endianness::Little).unwrap(), 0x0201);
        assert_eq!(view.u24(1, Endianness::Big).unwrap(), 0x020304);
        assert_eq!(view.u32(0, Endianness::Little).unwrap(), 0x04030201);
    }

    #[test]
    fn signed_reads_sign_extend() {
        let view = BufferView::from_bytes(vec![0xff, 0xfe]);
        assert_eq!(view.i8(0).unwrap(), -1);
        assert_eq!(view.i16(0, Endianness::Big).unwrap(), -2);
    }

    #[test]
    fn slice_past_reported_fails() {
        let view = BufferView::new(vec![0u8; 4], 10);
        assert!(view.slice(8, 2).is_ok());
        let err = view.slice(8, 3).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn read_past_captured_is_truncation_not_malformed() {
        let view = BufferView::new(vec![0u8; 4], 10);
        let err = view.u32(2, Endianness::Big).unwrap_err();
        assert_eq!(
            err,
            BufferError::BoundsExceeded {
                offset: 2,
                length: 4,
                captured: 4,
                reported: 10,
            }
        );
        assert!(!err.is_malformed());
    }

    #[test]
    fn sub_view_reports_source_offset() {
        let view = BufferView::from_bytes(vec![0u8; 32]);
        let inner = view.slice(14, 10).unwrap().slice(4, 2).unwrap();
        assert_eq!(inner.source_offset(), 18);
        assert!(inner.same_source(&view));
    }

    #[test]
    fn concat_borrows_within_segment_and_copies_across_join() {
        let a = BufferView::from_bytes(vec![1u8, 2, 3]);
        let b = BufferView::from_bytes(vec![4u8, 5]);
        let joined = BufferView::concat(&a, &b);
        assert_eq!(joined.reported_len(), 5);
        assert!(matches!(joined.bytes(0, 2).unwrap(), Cow::Borrowed(_)));
        let straddle = joined.bytes(2, 2).unwrap();
        assert!(matches!(straddle, Cow::Owned(_)));
        assert_eq!(&*straddle, &[3, 4]);
        assert_eq!(joined.u16(3, Endianness::Big).unwrap(), 0x0405);
    }

    #[test]
    fn concat_after_truncated_view_stops_captured_bytes() {
        let a = BufferView::new(vec![1u8, 2], 4);
        let b = BufferView::from_bytes(vec![9u8, 9]);
        let joined = BufferView::concat(&a, &b);
        assert_eq!(joined.captured_len(), 2);
        assert_eq!(joined.reported_len(), 6);
        assert!(joined.u8(4).is_err());
    }

    #[test]
    fn to_bytes_shares_segment() {
        let view = BufferView::from_bytes(vec![7u8; 16]);
        let bytes = view.to_bytes(4, 8).unwrap();
        assert_eq!(bytes.len(), 8);
        assert!(view.to_bytes(12, 8).is_err());
    }

    #[test]
    fn integer_width_outside_one_to_eight_is_an_error() {
        let view = BufferView::from_bytes(vec![0xffu8; 16]);
        assert_eq!(
            view.uint(0, 0, Endianness::Big),
            Err(BufferError::InvalidWidth { width: 0 })
        );
        assert_eq!(
            view.uint(0, 9, Endianness::Little),
            Err(BufferError::InvalidWidth { width: 9 })
        );
        assert_eq!(
            view.int(0, 0, Endianness::Big),
            Err(BufferError::InvalidWidth { width: 0 })
        );
        assert_eq!(view.uint(0, 8, Endianness::Big), Ok(u64::MAX));
        assert!(BufferError::InvalidWidth { width: 0 }.is_malformed());
    }
}
