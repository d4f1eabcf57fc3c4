//! PCAP/PCAPNG frame source.
//!
//! Reads legacy pcap and pcapng files with `pcap-parser` and turns every
//! packet record into a `FrameRecord`: captured bytes, on-wire length,
//! timestamp and the link type of the interface it was captured on.

pub mod error;
pub mod parser;
pub mod reader;

pub use parser::PcapFileSource;
