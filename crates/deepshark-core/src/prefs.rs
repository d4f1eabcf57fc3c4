//! Named, typed preferences registered by decoders.
//!
//! Decoders register preferences with defaults during registration; the
//! configuration layer overrides them by name from text before the engine is
//! built. Values are immutable afterwards.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefError {
    #[error("preference '{name}' is already registered")]
    Duplicate { name: String },
    #[error("unknown preference '{name}'")]
    Unknown { name: String },
    #[error("invalid value '{value}' for preference '{name}': expected {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefValue {
    Bool(bool),
    UInt(u64),
    Enum(String),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefKind {
    Bool,
    UInt,
    Enum(Vec<String>),
    Str,
}

/// Registration record for one preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefSpec {
    /// `protocol.option`, e.g. `pwsatopcw.rtp_header`.
    pub name: String,
    pub title: String,
    pub kind: PrefKind,
    pub default: PrefValue,
}

impl PrefSpec {
    pub fn bool(name: &str, title: &str, default: bool) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            kind: PrefKind::Bool,
            default: PrefValue::Bool(default),
        }
    }

    pub fn uint(name: &str, title: &str, default: u64) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            kind: PrefKind::UInt,
            default: PrefValue::UInt(default),
        }
    }

    pub fn choice(name: &str, title: &str, choices: &[&str], default: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            kind: PrefKind::Enum(choices.iter().map(|c| c.to_string()).collect()),
            default: PrefValue::Enum(default.to_string()),
        }
    }

    pub fn string(name: &str, title: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            kind: PrefKind::Str,
            default: PrefValue::Str(default.to_string()),
        }
    }

    fn parse(&self, raw: &str) -> Result<PrefValue, PrefError> {
        let invalid = |expected: &str| PrefError::InvalidValue {
            name: self.name.clone(),
            value: raw.to_string(),
            expected: expected.to_string(),
        };
        match &self.kind {
            PrefKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(PrefValue::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(PrefValue::Bool(false)),
                _ => Err(invalid("true or false")),
            },
            PrefKind::UInt => {
                let trimmed = raw.trim();
                let parsed = match trimmed.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => trimmed.parse::<u64>(),
                };
                parsed
                    .map(PrefValue::UInt)
                    .map_err(|_| invalid("an unsigned integer"))
            }
            PrefKind::Enum(choices) => choices
                .iter()
                .find(|c| c.eq_ignore_ascii_case(raw.trim()))
                .map(|c| PrefValue::Enum(c.clone()))
                .ok_or_else(|| invalid(&format!("one of {}", choices.join(", ")))),
            PrefKind::Str => Ok(PrefValue::Str(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct PrefEntry {
    spec: PrefSpec,
    value: PrefValue,
}

#[derive(Debug, Clone, Default)]
pub struct Preferences {
    entries: BTreeMap<String, PrefEntry>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: PrefSpec) -> Result<(), PrefError> {
        if self.entries.contains_key(&spec.name) {
            return Err(PrefError::Duplicate { name: spec.name });
        }
        let value = spec.default.clone();
        self.entries.insert(spec.name.clone(), PrefEntry { spec, value });
        Ok(())
    }

    /// Parse `raw` according to the preference's kind and store it.
    ///
    /// # Examples
    /// ```
    /// use deepshark_core::prefs::{PrefSpec, Preferences};
    ///
    /// let mut prefs = Preferences::new();
    /// prefs.register(PrefSpec::bool("demo.flag", "Flag", false))?;
    /// prefs.set("demo.flag", "TRUE")?;
    /// assert_eq!(prefs.get_bool("demo.flag"), Some(true));
    /// assert!(prefs.set("demo.flag", "maybe").is_err());
    /// # Ok::<(), deepshark_core::prefs::PrefError>(())
    /// ```
    pub fn set(&mut self, name: &str, raw: &str) -> Result<(), PrefError> {
        let entry = self.entries.get_mut(name).ok_or_else(|| PrefError::Unknown {
            name: name.to_string(),
        })?;
        entry.value = entry.spec.parse(raw)?;
        Ok(())
    }

    /// Split `name=value` and apply it.
    pub fn set_assignment(&mut self, assignment: &str) -> Result<(), PrefError> {
        match assignment.split_once('=') {
            Some((name, value)) => self.set(name.trim(), value),
            None => Err(PrefError::InvalidValue {
                name: assignment.to_string(),
                value: String::new(),
                expected: "name=value".to_string(),
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PrefValue> {
        self.entries.get(name).map(|entry| &entry.value)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            PrefValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_uint(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            PrefValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            PrefValue::Enum(v) | PrefValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn specs(&self) -> impl Iterator<Item = &PrefSpec> {
        self.entries.values().map(|entry| &entry.spec)
    }
}
