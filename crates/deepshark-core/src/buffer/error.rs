use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error(
        "bounds exceeded: {length} bytes at offset {offset} (captured {captured}, reported {reported})"
    )]
    BoundsExceeded {
        offset: usize,
        length: usize,
        captured: usize,
        reported: usize,
    },
    #[error("integer reads take 1 to 8 bytes, not {width}")]
    InvalidWidth { width: usize },
}

impl BufferError {
    /// True when the access runs past the on-wire length, not just the
    /// snapshot length. An invalid integer width is always malformed.
    ///
    /// # Examples
    /// ```
    /// use deepshark_core::buffer::BufferError;
    ///
    /// let err = BufferError::BoundsExceeded { offset: 8, length: 4, captured: 10, reported: 20 };
    /// assert!(!err.is_malformed());
    /// ```
    pub fn is_malformed(&self) -> bool {
        match self {
            BufferError::BoundsExceeded {
                offset,
                length,
                reported,
                ..
            } => offset.saturating_add(*length) > *reported,
            BufferError::InvalidWidth { .. } => true,
        }
    }
}
