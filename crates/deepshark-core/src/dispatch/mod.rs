//! Dissector tables and the dispatcher.
//!
//! Decoders are registered as `DissectorHandle`s and hooked into named
//! tables keyed by a discriminator (an EtherType, a port, a register) or
//! into a table's heuristic chain. At dissection time `DissectCx` resolves a
//! (table, key) pair in a fixed order: user override, exact entry, range
//! entry, heuristics, fallback, and finally the `data` dissector.
//!
//! A decoder returns how many bytes it consumed, or `Outcome::Rejected` when
//! the payload is not its protocol. A rejected call leaves no trace: the
//! dispatcher rolls back its nodes, notes, columns and layer entry.

mod context;
pub mod decode_as;
pub mod error;
pub mod registry;
pub mod table;

use std::fmt;
use std::sync::Arc;

pub use context::DissectCx;
pub use decode_as::DecodeAsStore;
pub use error::DispatchError;
pub use registry::DissectorRegistry;
pub use table::{DissectorKey, DissectorTable, HeuristicOrder, KeyKind, MatchKind};

use crate::buffer::{BufferError, BufferView};
use crate::catalog::ProtocolId;
use crate::tree::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Bytes of the view this decoder accounted for.
    Accepted(usize),
    Rejected,
}

/// Result of one decoder call. `Err` ends that decoder's work on the frame;
/// the dispatcher turns it into a placeholder node and an Error note.
pub type DissectResult = Result<Outcome, BufferError>;

pub trait Dissector: Send + Sync {
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult;
}

struct FnDissector<F>(F);

impl<F> Dissector for FnDissector<F>
where
    F: Fn(&mut DissectCx<'_>, &BufferView, NodeId) -> DissectResult + Send + Sync,
{
    fn dissect(&self, cx: &mut DissectCx<'_>, view: &BufferView, parent: NodeId) -> DissectResult {
        (self.0)(cx, view, parent)
    }
}

/// Named, shareable reference to a decoder.
///
/// # Examples
/// ```
/// use deepshark_core::dispatch::{DissectorHandle, Outcome};
///
/// let handle = DissectorHandle::from_fn("noop", None, |_cx, view, _parent| {
///     Ok(Outcome::Accepted(view.reported_len()))
/// });
/// assert_eq!(handle.name(), "noop");
/// ```
#[derive(Clone)]
pub struct DissectorHandle {
    name: Arc<str>,
    protocol: Option<ProtocolId>,
    dissector: Arc<dyn Dissector>,
}

impl DissectorHandle {
    pub fn new(name: &str, protocol: Option<ProtocolId>, dissector: impl Dissector + 'static) -> Self {
        Self {
            name: Arc::from(name),
            protocol,
            dissector: Arc::new(dissector),
        }
    }

    pub fn from_fn<F>(name: &str, protocol: Option<ProtocolId>, f: F) -> Self
    where
        F: Fn(&mut DissectCx<'_>, &BufferView, NodeId) -> DissectResult + Send + Sync + 'static,
    {
        Self::new(name, protocol, FnDissector(f))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> Option<ProtocolId> {
        self.protocol
    }

    pub(crate) fn dissector(&self) -> &dyn Dissector {
        self.dissector.as_ref()
    }

    pub fn same_as(&self, other: &DissectorHandle) -> bool {
        Arc::ptr_eq(&self.dissector, &other.dissector)
    }
}

impl fmt::Debug for DissectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DissectorHandle")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .finish()
    }
}
