use serde::Serialize;

use super::{FieldId, ProtocolId};

/// Kind of frame a frame-number field points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameNumKind {
    None,
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Label-only node with no value.
    None,
    Protocol,
    Boolean,
    UInt8,
    UInt16,
    UInt24,
    UInt32,
    UInt40,
    UInt48,
    UInt64,
    Int8,
    Int16,
    Int24,
    Int32,
    Int64,
    Float,
    Double,
    /// Seconds and nanoseconds, 4 bytes each.
    AbsoluteTime,
    Bytes,
    String,
    FrameNum(FrameNumKind),
    Ipv4,
    Ether,
}

impl FieldType {
    /// Encoded width for fixed-size types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            FieldType::UInt8 | FieldType::Int8 => Some(1),
            FieldType::UInt16 | FieldType::Int16 => Some(2),
            FieldType::UInt24 | FieldType::Int24 => Some(3),
            FieldType::UInt32 | FieldType::Int32 | FieldType::Float | FieldType::Ipv4 => Some(4),
            FieldType::FrameNum(_) => Some(4),
            FieldType::UInt40 => Some(5),
            FieldType::UInt48 | FieldType::Ether => Some(6),
            FieldType::UInt64 | FieldType::Int64 | FieldType::Double => Some(8),
            FieldType::AbsoluteTime => Some(8),
            FieldType::None
            | FieldType::Protocol
            | FieldType::Boolean
            | FieldType::Bytes
            | FieldType::String => None,
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            FieldType::UInt8
                | FieldType::UInt16
                | FieldType::UInt24
                | FieldType::UInt32
                | FieldType::UInt40
                | FieldType::UInt48
                | FieldType::UInt64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int24 | FieldType::Int32 | FieldType::Int64
        )
    }

    /// Types that may carry a bitmask.
    pub fn accepts_bitmask(self) -> bool {
        self.is_unsigned() || self.is_signed() || self == FieldType::Boolean
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::None => "none",
            FieldType::Protocol => "protocol",
            FieldType::Boolean => "boolean",
            FieldType::UInt8 => "uint8",
            FieldType::UInt16 => "uint16",
            FieldType::UInt24 => "uint24",
            FieldType::UInt32 => "uint32",
            FieldType::UInt40 => "uint40",
            FieldType::UInt48 => "uint48",
            FieldType::UInt64 => "uint64",
            FieldType::Int8 => "int8",
            FieldType::Int16 => "int16",
            FieldType::Int24 => "int24",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::AbsoluteTime => "absolute_time",
            FieldType::Bytes => "bytes",
            FieldType::String => "string",
            FieldType::FrameNum(_) => "framenum",
            FieldType::Ipv4 => "ipv4",
            FieldType::Ether => "ether",
        }
    }
}

/// Base used when rendering integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDisplay {
    #[default]
    None,
    Dec,
    Hex,
    DecHex,
    HexDec,
}

/// Label tables for integer and boolean fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueMap {
    Values(&'static [(u64, &'static str)]),
    Ranges(&'static [(u64, u64, &'static str)]),
    TrueFalse(&'static str, &'static str),
}

impl ValueMap {
    /// # Examples
    /// ```
    /// use deepshark_core::catalog::ValueMap;
    ///
    /// const KINDS: &[(u64, &str)] = &[(0, "zero"), (1, "one")];
    /// assert_eq!(ValueMap::Values(KINDS).label(1), Some("one"));
    /// assert_eq!(ValueMap::TrueFalse("Set", "Not set").label(0), Some("Not set"));
    /// ```
    pub fn label(&self, value: u64) -> Option<&'static str> {
        match self {
            ValueMap::Values(entries) => entries
                .iter()
                .find(|(key, _)| *key == value)
                .map(|(_, label)| *label),
            ValueMap::Ranges(entries) => entries
                .iter()
                .find(|(low, high, _)| (*low..=*high).contains(&value))
                .map(|(_, _, label)| *label),
            ValueMap::TrueFalse(yes, no) => Some(if value != 0 { yes } else { no }),
        }
    }
}

/// Registration request for a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub filter: String,
    pub ftype: FieldType,
    pub display: FieldDisplay,
    pub values: Option<ValueMap>,
    pub bitmask: u64,
    pub blurb: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, filter: impl Into<String>, ftype: FieldType) -> Self {
        Self {
            name: name.into(),
            filter: filter.into(),
            ftype,
            display: FieldDisplay::None,
            values: None,
            bitmask: 0,
            blurb: None,
        }
    }

    pub fn display(mut self, display: FieldDisplay) -> Self {
        self.display = display;
        self
    }

    pub fn values(mut self, values: ValueMap) -> Self {
        self.values = Some(values);
        self
    }

    pub fn bitmask(mut self, bitmask: u64) -> Self {
        self.bitmask = bitmask;
        self
    }

    pub fn blurb(mut self, blurb: impl Into<String>) -> Self {
        self.blurb = Some(blurb.into());
        self
    }
}

/// Registered, immutable field metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub id: FieldId,
    pub protocol: Option<ProtocolId>,
    pub name: String,
    pub filter: String,
    pub ftype: FieldType,
    pub display: FieldDisplay,
    pub values: Option<ValueMap>,
    pub bitmask: u64,
    pub blurb: Option<String>,
}

impl FieldDescriptor {
    /// Right shift applied after masking.
    pub fn shift(&self) -> u32 {
        if self.bitmask == 0 {
            0
        } else {
            self.bitmask.trailing_zeros()
        }
    }

    /// Apply the bitmask (if any) to a raw integer.
    pub fn mask_value(&self, raw: u64) -> u64 {
        if self.bitmask == 0 {
            raw
        } else {
            (raw & self.bitmask) >> self.shift()
        }
    }
}
