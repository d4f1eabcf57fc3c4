//! Frame sources: where captured bytes come from.
//!
//! A source yields `FrameRecord`s in capture order, numbered from 1. The
//! engine never reads files itself; everything capture-format specific stays
//! behind `FrameSource`.

pub mod pcap;

pub use pcap::PcapFileSource;

use thiserror::Error;

use crate::frame::FrameRecord;

pub trait FrameSource {
    /// Next frame, or `None` at end of capture.
    fn next_frame(&mut self) -> Result<Option<FrameRecord>, SourceError>;
}

/// In-memory source, mostly for tests and replays.
impl FrameSource for std::vec::IntoIter<FrameRecord> {
    fn next_frame(&mut self) -> Result<Option<FrameRecord>, SourceError> {
        Ok(self.next())
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture parse error: {0}")]
    Pcap(String),
}

impl From<pcap::error::PcapSourceError> for SourceError {
    fn from(value: pcap::error::PcapSourceError) -> Self {
        match value {
            pcap::error::PcapSourceError::Io(err) => SourceError::Io(err),
            pcap::error::PcapSourceError::Format { context, message } => {
                SourceError::Pcap(format!("{context}: {message}"))
            }
            pcap::error::PcapSourceError::UnknownInterface { frame, if_id } => {
                SourceError::Pcap(format!("frame {frame} references undeclared interface {if_id}"))
            }
        }
    }
}
