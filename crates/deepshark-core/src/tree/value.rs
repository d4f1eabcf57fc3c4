use std::fmt::Write as _;
use std::net::Ipv4Addr;

use bytes::Bytes;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::buffer::{BufferError, BufferView, Endianness};
use crate::catalog::{FieldDescriptor, FieldDisplay, FieldType};

/// Decoded value carried by a tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    None,
    Boolean(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Time { secs: i64, nanos: u32 },
    Bytes(Bytes),
    String(String),
    FrameNum(u32),
    Ipv4(Ipv4Addr),
    Ether([u8; 6]),
    /// Placeholder for a value that could not be read.
    Missing,
}

impl FieldValue {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(v) => Some(*v),
            FieldValue::FrameNum(v) => Some(*v as u64),
            FieldValue::Boolean(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_frame_num(&self) -> Option<u32> {
        match self {
            FieldValue::FrameNum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

pub(crate) enum DecodeError {
    Buffer(BufferError),
    WrongLength { expected: usize, actual: usize },
}

impl From<BufferError> for DecodeError {
    fn from(value: BufferError) -> Self {
        DecodeError::Buffer(value)
    }
}

/// Decode `length` bytes at `offset` according to the field's type.
pub(crate) fn decode(
    field: &FieldDescriptor,
    view: &BufferView,
    offset: usize,
    length: usize,
    endianness: Endianness,
) -> Result<FieldValue, DecodeError> {
    if let Some(expected) = field.ftype.fixed_width() {
        if length != expected {
            return Err(DecodeError::WrongLength {
                expected,
                actual: length,
            });
        }
    }
    let value = match field.ftype {
        FieldType::None | FieldType::Protocol => {
            view.slice(offset, length)?;
            FieldValue::None
        }
        FieldType::Boolean => {
            if length == 0 || length > 8 {
                return Err(DecodeError::WrongLength {
                    expected: 1,
                    actual: length,
                });
            }
            let raw = view.uint(offset, length, endianness)?;
            let bits = if field.bitmask == 0 { raw } else { raw & field.bitmask };
            FieldValue::Boolean(bits != 0)
        }
        ftype if ftype.is_unsigned() => {
            let raw = view.uint(offset, length, endianness)?;
            FieldValue::UInt(field.mask_value(raw))
        }
        ftype if ftype.is_signed() => {
            if field.bitmask == 0 {
                FieldValue::Int(view.int(offset, length, endianness)?)
            } else {
                let raw = view.uint(offset, length, endianness)?;
                let masked = field.mask_value(raw);
                let bits = 64 - (field.bitmask >> field.shift()).leading_zeros();
                let shift = 64 - bits.clamp(1, 64);
                FieldValue::Int(((masked << shift) as i64) >> shift)
            }
        }
        FieldType::Float => FieldValue::Float(view.f32(offset, endianness)? as f64),
        FieldType::Double => FieldValue::Float(view.f64(offset, endianness)?),
        FieldType::AbsoluteTime => {
            let secs = view.u32(offset, endianness)? as i64;
            let nanos = view.u32(offset + 4, endianness)?;
            FieldValue::Time { secs, nanos }
        }
        FieldType::Bytes => FieldValue::Bytes(view.to_bytes(offset, length)?),
        FieldType::String => {
            let raw = view.bytes(offset, length)?;
            let text = String::from_utf8_lossy(&raw);
            FieldValue::String(text.trim_end_matches('\0').to_string())
        }
        FieldType::FrameNum(_) => FieldValue::FrameNum(view.u32(offset, endianness)?),
        FieldType::Ipv4 => FieldValue::Ipv4(Ipv4Addr::from(view.u32(offset, Endianness::Big)?)),
        FieldType::Ether => {
            let raw = view.bytes(offset, 6)?;
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&raw);
            FieldValue::Ether(mac)
        }
        _ => FieldValue::None,
    };
    Ok(value)
}

/// Render `value` the way the field's display settings ask for.
///
/// # Examples
/// This helper is part of an internal module, so the example is marked as
/// text example.
/// ```text
/// // UInt8, Hex, values [(0x41, "B_status")] with value 0x41
/// assert_eq!(format_value(&field, &FieldValue::UInt(0x41), 1), "B_status (0x41)");
/// ```
pub(crate) fn format_value(field: &FieldDescriptor, value: &FieldValue, width: usize) -> String {
    match value {
        FieldValue::UInt(v) => {
            let number = format_integer(field, *v, width);
            match field.values.and_then(|map| map.label(*v)) {
                Some(label) => format!("{label} ({number})"),
                None => number,
            }
        }
        FieldValue::Int(v) => {
            let number = match field.display {
                FieldDisplay::Hex | FieldDisplay::HexDec => format!("0x{:x}", v),
                _ => v.to_string(),
            };
            match field.values.and_then(|map| map.label(*v as u64)) {
                Some(label) => format!("{label} ({number})"),
                None => number,
            }
        }
        FieldValue::Boolean(v) => field
            .values
            .and_then(|map| map.label(*v as u64))
            .unwrap_or(if *v { "True" } else { "False" })
            .to_string(),
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Time { secs, nanos } => format_time(*secs, *nanos),
        FieldValue::Bytes(bytes) => {
            if bytes.is_empty() {
                "<empty>".to_string()
            } else {
                hex_string(bytes)
            }
        }
        FieldValue::String(text) => format!("\"{text}\""),
        FieldValue::FrameNum(v) => v.to_string(),
        FieldValue::Ipv4(addr) => addr.to_string(),
        FieldValue::Ether(mac) => ether_string(mac),
        FieldValue::None => String::new(),
        FieldValue::Missing => "<missing>".to_string(),
    }
}

fn format_integer(field: &FieldDescriptor, value: u64, width: usize) -> String {
    let digits = if field.bitmask != 0 {
        let bits = 64 - (field.bitmask >> field.shift()).leading_zeros() as usize;
        bits.div_ceil(4).max(1)
    } else {
        (width * 2).max(1)
    };
    match field.display {
        FieldDisplay::Hex => format!("0x{value:0digits$x}"),
        FieldDisplay::DecHex => format!("{value} (0x{value:0digits$x})"),
        FieldDisplay::HexDec => format!("0x{value:0digits$x} ({value})"),
        FieldDisplay::Dec | FieldDisplay::None => value.to_string(),
    }
}

/// Bit pattern for masked fields, e.g. `.... 1... ` for mask 0x08.
pub(crate) fn bit_pattern(bitmask: u64, raw: u64, width: usize) -> String {
    let bits = (width.clamp(1, 8)) * 8;
    let mut out = String::with_capacity(bits + bits / 4);
    for bit in (0..bits).rev() {
        let mask = 1u64 << bit;
        if bitmask & mask == 0 {
            out.push('.');
        } else if raw & mask != 0 {
            out.push('1');
        } else {
            out.push('0');
        }
        if bit % 4 == 0 && bit != 0 {
            out.push(' ');
        }
    }
    out
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub(crate) fn ether_string(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn format_time(secs: i64, nanos: u32) -> String {
    let total = secs as i128 * 1_000_000_000 + nanos as i128;
    OffsetDateTime::from_unix_timestamp_nanos(total)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("{secs}.{nanos:09}"))
}

#[cfg(test)]
mod tests {
    use super::{FieldValue, bit_pattern, decode, format_value};
    use crate::buffer::{BufferView, Endianness};
    use crate::catalog::{FieldDescriptor, FieldDisplay, FieldId, FieldType, ValueMap};

    fn field(ftype: FieldType, display: FieldDisplay, bitmask: u64) -> FieldDescriptor {
        FieldDescriptor {
            id: FieldId(0),
            protocol: None,
            name: "Test".to_string(),
            filter: "test".to_string(),
            ftype,
            display,
            values: None,
            bitmask,
            blurb: None,
        }
    }

    #[test]
    fn bit_pattern_marks_masked_bits() {
        assert_eq!(bit_pattern(0x08, 0x08, 1), ".... 1...");
        assert_eq!(bit_pattern(0xf0, 0x40, 1), "0100 ....");
    }

    #[test]
    fn decodes_masked_unsigned() {
        let view = BufferView::from_bytes(vec![0x45]);
        let version = field(FieldType::UInt8, FieldDisplay::Dec, 0xf0);
        assert!(matches!(
            decode(&version, &view, 0, 1, Endianness::Big),
            Ok(FieldValue::UInt(4))
        ));
    }

    #[test]
    fn decode_rejects_wrong_width() {
        let view = BufferView::from_bytes(vec![0x00, 0x01, 0x02]);
        let port = field(FieldType::UInt16, FieldDisplay::Dec, 0);
        assert!(decode(&port, &view, 0, 3, Endianness::Big).is_err());
    }

    #[test]
    fn formats_hex_with_value_label() {
        const REGS: &[(u64, &str)] = &[(0x41, "B_status")];
        let mut reg = field(FieldType::UInt8, FieldDisplay::Hex, 0);
        reg.values = Some(ValueMap::Values(REGS));
        assert_eq!(format_value(&reg, &FieldValue::UInt(0x41), 1), "B_status (0x41)");
        assert_eq!(format_value(&reg, &FieldValue::UInt(0x42), 1), "0x42");
    }

    #[test]
    fn masked_signed_value_sign_extends() {
        let view = BufferView::from_bytes(vec![0x0f]);
        let nibble = field(FieldType::Int8, FieldDisplay::Dec, 0x0f);
        assert!(matches!(
            decode(&nibble, &view, 0, 1, Endianness::Big),
            Ok(FieldValue::Int(-1))
        ));
    }
}
