//! Diagnostic notes attached to tree nodes.
//!
//! Decoders report problems without changing control flow: a note carries a
//! severity, a group and a message, and is anchored to the node it describes.
//! Frequently raised notes are registered once as `ExpertSpec`s so they have
//! a stable filter name (e.g. `udp.length.bad`).

use serde::{Deserialize, Serialize};

use crate::catalog::ExpertId;
use crate::tree::NodeId;

/// Ordered so that `Error` is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Chat,
    Note,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Chat => "chat",
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertGroup {
    Checksum,
    Sequence,
    ResponseCode,
    RequestCode,
    Undecoded,
    Reassemble,
    Malformed,
    Debug,
    Protocol,
    Security,
    Comment,
    Decryption,
    Assumption,
    Deprecated,
}

/// Registration record for a named diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpertSpec {
    pub name: String,
    pub group: ExpertGroup,
    pub severity: Severity,
    pub summary: String,
}

impl ExpertSpec {
    pub fn new(
        name: impl Into<String>,
        group: ExpertGroup,
        severity: Severity,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group,
            severity,
            summary: summary.into(),
        }
    }
}

/// A diagnostic raised during one dissection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub anchor: NodeId,
    pub severity: Severity,
    pub group: ExpertGroup,
    pub message: String,
    pub expert: Option<ExpertId>,
}

/// Highest severity among `notes`, if any.
///
/// # Examples
/// ```
/// use deepshark_core::expert::{ExpertGroup, Note, Severity, max_severity};
/// use deepshark_core::tree::NodeId;
///
/// let notes = [
///     Note { anchor: NodeId::ROOT, severity: Severity::Note, group: ExpertGroup::Protocol, message: "a".into(), expert: None },
///     Note { anchor: NodeId::ROOT, severity: Severity::Error, group: ExpertGroup::Malformed, message: "b".into(), expert: None },
/// ];
/// assert_eq!(max_severity(&notes), Some(Severity::Error));
/// ```
pub fn max_severity<'a>(notes: impl IntoIterator<Item = &'a Note>) -> Option<Severity> {
    notes.into_iter().map(|note| note.severity).max()
}
