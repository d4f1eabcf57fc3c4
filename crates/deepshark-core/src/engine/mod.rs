//! Engine construction and the per-frame entry point.
//!
//! An `EngineBuilder` collects protocols, runs every `Protocol::register`,
//! applies preference overrides, runs every `Protocol::handoff`, and freezes
//! the result into an `Engine`. The engine is immutable afterwards apart from
//! the decode-as store, so one engine can be shared across threads and
//! captures.
//!
//! `Engine::dissect` builds a fresh `FrameContext` and `ProtocolTree` for one
//! frame, adds the `frame` pseudo-protocol, dispatches through the
//! `wtap_encap` table by link type, and records the frame as visited in its
//! `Capture`.

mod capture;
mod dissection;
mod error;
mod registrar;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{PoisonError, RwLock};

pub use capture::{Capture, FrameState};
pub use dissection::{Dissection, FrameSummary};
pub use error::EngineError;
pub use registrar::Registrar;

use crate::buffer::BufferView;
use crate::catalog::Catalog;
use crate::dispatch::{DecodeAsStore, DispatchError, DissectCx, DissectorKey, DissectorRegistry};
use crate::dissectors::frame::{self, FrameFields};
use crate::expert::{ExpertGroup, Severity};
use crate::frame::{FrameContext, FrameRecord};
use crate::prefs::Preferences;
use crate::tree::ProtocolTree;

/// Nesting limit used unless the builder says otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// A pluggable protocol: registration first, then handoff once every
/// protocol has registered its tables and dissectors.
pub trait Protocol {
    fn register(&mut self, reg: &mut Registrar) -> Result<(), EngineError>;

    fn handoff(&mut self, _reg: &mut Registrar) -> Result<(), EngineError> {
        Ok(())
    }
}

pub struct EngineBuilder {
    protocols: Vec<Box<dyn Protocol>>,
    prefs: Vec<(String, String)>,
    max_depth: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Builder with only the engine's own `frame` and `data` protocols.
    pub fn new() -> Self {
        Self {
            protocols: Vec::new(),
            prefs: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Builder preloaded with the bundled decoders.
    pub fn with_builtin_dissectors() -> Self {
        let mut builder = Self::new();
        for protocol in crate::dissectors::builtin() {
            builder.protocols.push(protocol);
        }
        builder
    }

    pub fn protocol(mut self, protocol: impl Protocol + 'static) -> Self {
        self.protocols.push(Box::new(protocol));
        self
    }

    /// Preference override applied between registration and handoff.
    pub fn pref(mut self, name: &str, value: &str) -> Self {
        self.prefs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// # Errors
    /// Any registration conflict (duplicate field, unknown table, bad
    /// preference value) aborts the build.
    pub fn build(mut self) -> Result<Engine, EngineError> {
        let mut reg = Registrar::new()?;
        for protocol in self.protocols.iter_mut() {
            protocol.register(&mut reg)?;
        }
        for (name, value) in &self.prefs {
            reg.prefs.set(name, value)?;
        }
        for protocol in self.protocols.iter_mut() {
            protocol.handoff(&mut reg)?;
        }
        let catalog = reg.catalog.build();
        tracing::debug!(
            fields = catalog.len(),
            tables = reg.registry.tables().count(),
            "engine built"
        );
        Ok(Engine {
            catalog,
            registry: reg.registry,
            prefs: reg.prefs,
            frame_fields: reg.frame_fields,
            decode_as: RwLock::new(DecodeAsStore::new()),
            max_depth: self.max_depth,
        })
    }
}

/// Immutable dissection engine.
///
/// # Examples
/// ```
/// use deepshark_core::engine::{Capture, EngineBuilder};
/// use deepshark_core::frame::FrameRecord;
/// use pcap_parser::Linktype;
///
/// let engine = EngineBuilder::with_builtin_dissectors().build()?;
/// let capture = Capture::new();
/// let record = FrameRecord::new(1, Linktype(147), vec![0xde, 0xad]);
/// let dissection = engine.dissect(&capture, &record);
/// assert_eq!(dissection.summary.protocols, "frame:data");
/// # Ok::<(), deepshark_core::engine::EngineError>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    catalog: Catalog,
    registry: DissectorRegistry,
    prefs: Preferences,
    frame_fields: FrameFields,
    decode_as: RwLock<DecodeAsStore>,
    max_depth: usize,
}

impl Engine {
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &DissectorRegistry {
        &self.registry
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decode every `key` of `table` with `dissector`, in every layer.
    /// Frames already dissected keep their trees until re-dissected.
    pub fn set_override(
        &self,
        table: &str,
        key: impl Into<DissectorKey>,
        dissector: &str,
    ) -> Result<(), DispatchError> {
        self.store_override(table, key.into(), None, dissector)
    }

    /// Like `set_override`, limited to the given layer number.
    pub fn set_override_at(
        &self,
        table: &str,
        key: impl Into<DissectorKey>,
        layer: u8,
        dissector: &str,
    ) -> Result<(), DispatchError> {
        self.store_override(table, key.into(), Some(layer), dissector)
    }

    pub fn clear_override(&self, table: &str, key: impl Into<DissectorKey>, layer: Option<u8>) -> bool {
        self.decode_as
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear(table, &key.into(), layer)
    }

    pub fn clear_overrides(&self) {
        self.decode_as
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear_all();
    }

    fn store_override(
        &self,
        table: &str,
        key: DissectorKey,
        layer: Option<u8>,
        dissector: &str,
    ) -> Result<(), DispatchError> {
        let handle = self.registry.resolve_choice(table, &key, dissector)?;
        tracing::info!(table, %key, ?layer, dissector, "decode-as override set");
        self.decode_as
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(table, key, layer, handle);
        Ok(())
    }

    /// Dissect one frame of `capture`.
    pub fn dissect(&self, capture: &Capture, record: &FrameRecord) -> Dissection {
        let visited = capture.begin(record.number);
        let view = BufferView::new(record.data.clone(), record.reported_len);
        let mut frame = FrameContext::new(record, visited);
        let mut tree = ProtocolTree::new("Frame", &view);
        {
            let overrides = self.decode_as.read().unwrap_or_else(PoisonError::into_inner);
            let mut cx = DissectCx::new(self, capture.scope(), &overrides, &mut frame, &mut tree);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                frame::dissect_frame(&mut cx, &self.frame_fields, &view)
            }));
            if let Err(payload) = outcome {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(frame = record.number, error = %message, "dissector panicked");
                let root = cx.tree().root();
                let node = cx
                    .tree_mut()
                    .add_generated_text(root, format!("[Dissector bug: {message}]"));
                cx.report_group(
                    node,
                    Severity::Error,
                    ExpertGroup::Malformed,
                    format!("Dissector bug: {message}"),
                );
            }
        }
        capture.finish(record.number);
        Dissection::new(record, &frame, tree)
    }
}
