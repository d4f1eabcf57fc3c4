//! Bounds-checked views over captured frame bytes.
//!
//! A `BufferView` is a window onto a shared byte source. Every view knows two
//! lengths: the *captured* length (bytes actually present) and the *reported*
//! length (bytes that were on the wire). Slicing is checked against the
//! reported length so decoders can describe structures that extend past a
//! snapshot limit; reading is checked against the captured length and fails
//! lazily with `BufferError::BoundsExceeded`.
//!
//! Views are cheap to clone and derive (`bytes::Bytes` handles underneath) and
//! may be composed with `BufferView::concat` without copying. Only a read that
//! straddles the join of a composite materializes a contiguous copy.

pub mod error;
pub mod view;

pub use error::BufferError;
pub use view::{BufferView, Endianness};
