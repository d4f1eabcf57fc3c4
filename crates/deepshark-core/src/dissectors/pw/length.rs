//! Payload length arbitration for TDM pseudowires.
//!
//! The control word may carry the size of the PW packet (encapsulation plus
//! payload) when that is below 64 bytes, and must carry 0 otherwise. Anything
//! the packet holds beyond that size is padding added by the PSN.

use std::fmt;

/// Control word length values are only meaningful below this packet size.
pub const SHORT_PACKET_LIMIT: usize = 64;

/// Why the control word length could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthProblem {
    /// The length is smaller than the encapsulation itself.
    TooSmall { header_size: usize },
    /// The length claims more payload than the packet holds.
    ExceedsPacket { packet_size: usize },
    /// Non-zero length on a packet too large to need one.
    MustBeZero { packet_size: usize },
}

impl fmt::Display for LengthProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthProblem::TooSmall { header_size } => {
                write!(f, "Malformed: length too small, must be > {header_size}")
            }
            LengthProblem::ExceedsPacket { packet_size } => {
                write!(f, "Malformed: length exceeds packet size ({packet_size})")
            }
            LengthProblem::MustBeZero { packet_size } => write!(
                f,
                "Malformed: length must be 0 if packet size ({packet_size}) is >= {SHORT_PACKET_LIMIT}"
            ),
        }
    }
}

/// Split of a PW packet after the encapsulation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLayout {
    pub payload: usize,
    pub padding: usize,
    pub problem: Option<LengthProblem>,
}

/// Decide payload and padding sizes from the packet size and the control
/// word length field.
///
/// On any problem the whole packet after the header is taken as payload.
///
/// # Examples
/// ```
/// use deepshark_core::dissectors::pw::{arbitrate, LengthProblem};
///
/// let layout = arbitrate(4, 50, 20);
/// assert_eq!((layout.payload, layout.padding), (16, 30));
///
/// let layout = arbitrate(4, 50, 60);
/// assert_eq!(layout.payload, 46);
/// assert_eq!(layout.problem, Some(LengthProblem::ExceedsPacket { packet_size: 50 }));
/// ```
pub fn arbitrate(header_size: usize, packet_size: usize, length_field: usize) -> PayloadLayout {
    let from_packet = packet_size.saturating_sub(header_size);
    let fallback = |problem| PayloadLayout {
        payload: from_packet,
        padding: 0,
        problem: Some(problem),
    };
    if length_field == 0 {
        return PayloadLayout {
            payload: from_packet,
            padding: 0,
            problem: None,
        };
    }
    let Some(from_length) = length_field.checked_sub(header_size) else {
        return fallback(LengthProblem::TooSmall { header_size });
    };
    if from_length > from_packet {
        return fallback(LengthProblem::ExceedsPacket { packet_size });
    }
    if from_packet >= SHORT_PACKET_LIMIT {
        return fallback(LengthProblem::MustBeZero { packet_size });
    }
    PayloadLayout {
        payload: from_length,
        padding: from_packet - from_length,
        problem: None,
    }
}

/// Guess at the TDM circuit from the payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    E1,
    T1,
    E3T3,
    OctetAlignedT1,
    Unknown,
}

impl PayloadShape {
    pub fn classify(payload_size: usize) -> Self {
        match payload_size {
            256 => PayloadShape::E1,
            192 => PayloadShape::T1,
            1024 => PayloadShape::E3T3,
            n if n != 0 && n % 25 == 0 => PayloadShape::OctetAlignedT1,
            _ => PayloadShape::Unknown,
        }
    }

    /// Suffix for the payload item label; empty when unknown.
    pub fn label(self) -> &'static str {
        match self {
            PayloadShape::E1 => " (looks like E1)",
            PayloadShape::T1 => " (looks like T1)",
            PayloadShape::E3T3 => " (looks like E3/T3)",
            PayloadShape::OctetAlignedT1 => " (looks like octet-aligned T1)",
            PayloadShape::Unknown => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_packet_uses_length_field() {
        let layout = arbitrate(4, 50, 20);
        assert_eq!(
            layout,
            PayloadLayout {
                payload: 16,
                padding: 30,
                problem: None
            }
        );
    }

    #[test]
    fn length_beyond_packet_falls_back() {
        let layout = arbitrate(4, 50, 60);
        assert_eq!(layout.payload, 46);
        assert_eq!(layout.padding, 0);
        let problem = layout.problem.map(|p| p.to_string()).unwrap_or_default();
        assert!(problem.contains("Malformed: length exceeds packet size"));
    }

    #[test]
    fn length_below_header_falls_back() {
        let layout = arbitrate(16, 40, 10);
        assert_eq!(layout.payload, 24);
        assert_eq!(layout.problem, Some(LengthProblem::TooSmall { header_size: 16 }));
    }

    #[test]
    fn large_packet_requires_zero_length() {
        let layout = arbitrate(4, 200, 30);
        assert_eq!(layout.payload, 196);
        assert_eq!(layout.problem, Some(LengthProblem::MustBeZero { packet_size: 200 }));
    }

    #[test]
    fn zero_length_takes_whole_packet() {
        let layout = arbitrate(4, 260, 0);
        assert_eq!((layout.payload, layout.padding, layout.problem), (256, 0, None));
    }

    #[test]
    fn classifies_payload_shapes() {
        assert_eq!(PayloadShape::classify(256), PayloadShape::E1);
        assert_eq!(PayloadShape::classify(192), PayloadShape::T1);
        assert_eq!(PayloadShape::classify(1024), PayloadShape::E3T3);
        assert_eq!(PayloadShape::classify(100), PayloadShape::OctetAlignedT1);
        assert_eq!(PayloadShape::classify(0), PayloadShape::Unknown);
        assert_eq!(PayloadShape::classify(37), PayloadShape::Unknown);
        assert_eq!(PayloadShape::E1.label(), " (looks like E1)");
    }
}
