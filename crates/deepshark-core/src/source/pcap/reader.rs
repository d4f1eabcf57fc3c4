use std::io::{Read, Seek, SeekFrom};

use pcap_parser::Linktype;

use super::error::PcapSourceError;

/// Size of the streaming buffer handed to the pcap-parser readers.
pub const READER_BUFFER_SIZE: usize = 65_536;

const PCAPNG_SHB_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Legacy,
    Ng,
}

/// Peek the first four bytes to pick a reader, then rewind.
///
/// # Examples
/// This helper is part of an internal module, so the example is marked as
/// text example.
/// ```text
/// use std::io::Cursor;
///
/// let mut cursor = Cursor::new([0x0a, 0x0d, 0x0d, 0x0a, 0x1c]);
/// assert_eq!(sniff_format(&mut cursor).unwrap(), CaptureFormat::Ng);
/// assert_eq!(cursor.position(), 0);
/// ```
///
/// # Errors
/// Returns `PcapSourceError::Io` when fewer than four bytes are available or
/// the reader cannot be rewound.
pub fn sniff_format<R: Read + Seek>(reader: &mut R) -> Result<CaptureFormat, PcapSourceError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(if magic == PCAPNG_SHB_MAGIC {
        CaptureFormat::Ng
    } else {
        CaptureFormat::Legacy
    })
}

/// Link type of the pcapng interface `if_id`, if it was declared.
pub fn interface_linktype(linktypes: &[Linktype], if_id: u32) -> Option<Linktype> {
    linktypes.get(if_id as usize).copied()
}

/// Seconds since the epoch from a pcapng 64-bit microsecond timestamp.
///
/// # Examples
/// This helper is part of an internal module, so the example is marked as
/// text example.
/// ```text
/// let seconds = ng_timestamp(0, 1_500_000);
/// assert!((seconds - 1.5).abs() < f64::EPSILON);
/// ```
pub fn ng_timestamp(ts_high: u32, ts_low: u32) -> f64 {
    let micros = ((ts_high as u64) << 32) | (ts_low as u64);
    micros as f64 * 1e-6
}

pub fn legacy_timestamp(ts_sec: u32, ts_usec: u32) -> f64 {
    ts_sec as f64 + ts_usec as f64 * 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn sniff_detects_pcapng_and_rewinds() {
        let mut cursor = Cursor::new([0x0a, 0x0d, 0x0d, 0x0a, 0x01]);
        assert_eq!(sniff_format(&mut cursor).unwrap(), CaptureFormat::Ng);
        let mut buf = [0u8; 1];
        cursor.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], 0x0a);
    }

    #[test]
    fn sniff_treats_other_magic_as_legacy() {
        let mut cursor = Cursor::new([0xd4, 0xc3, 0xb2, 0xa1, 0x02, 0x00]);
        assert_eq!(sniff_format(&mut cursor).unwrap(), CaptureFormat::Legacy);
    }

    #[test]
    fn sniff_rejects_short_input() {
        let mut cursor = Cursor::new([0x0a, 0x0d, 0x0d]);
        let err = sniff_format(&mut cursor).unwrap_err();
        assert!(matches!(err, PcapSourceError::Io(_)));
    }

    #[test]
    fn undeclared_interface_has_no_linktype() {
        let linktypes = [Linktype::RAW];
        assert_eq!(interface_linktype(&linktypes, 0), Some(Linktype::RAW));
        assert_eq!(interface_linktype(&linktypes, 1), None);
    }

    #[test]
    fn timestamps_convert_microseconds() {
        assert!((ng_timestamp(0, 1_500_000) - 1.5).abs() < f64::EPSILON);
        assert!((legacy_timestamp(2, 250_000) - 2.25).abs() < f64::EPSILON);
    }
}
