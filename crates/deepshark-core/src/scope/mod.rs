//! Frame-scope and capture-scope state.
//!
//! `FrameScope` lives inside a `FrameContext` and is dropped when the
//! dissection call returns. `CaptureScope` outlives frames: decoders keep
//! correlation tables there and reach them through short `with` critical
//! sections, so frames of one capture may be dissected from several threads.
//! `CaptureScope::reset` needs `&mut self`, which rules out a reset racing an
//! in-flight dissection.

mod frame_map;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Mutex;

pub use frame_map::FrameMap;

type SlotKey = (&'static str, TypeId);

/// Typed per-frame storage.
#[derive(Debug, Default)]
pub struct FrameScope {
    slots: HashMap<SlotKey, Box<dyn Any + Send>>,
}

impl FrameScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send>(&mut self, key: &'static str, value: T) {
        self.slots.insert((key, TypeId::of::<T>()), Box::new(value));
    }

    pub fn get<T: Any + Send>(&self, key: &'static str) -> Option<&T> {
        self.slots
            .get(&(key, TypeId::of::<T>()))
            .and_then(|slot| slot.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send>(&mut self, key: &'static str) -> Option<&mut T> {
        self.slots
            .get_mut(&(key, TypeId::of::<T>()))
            .and_then(|slot| slot.downcast_mut::<T>())
    }

    pub fn get_or_default<T: Any + Send + Default>(&mut self, key: &'static str) -> &mut T {
        let slot = self
            .slots
            .entry((key, TypeId::of::<T>()))
            .or_insert_with(|| Box::new(T::default()));
        match slot.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("slot key includes the value type"),
        }
    }

    pub fn remove<T: Any + Send>(&mut self, key: &'static str) -> Option<T> {
        self.slots
            .remove(&(key, TypeId::of::<T>()))
            .and_then(|slot| slot.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Typed storage valid while one capture is loaded.
#[derive(Debug, Default)]
pub struct CaptureScope {
    slots: Mutex<HashMap<SlotKey, Box<dyn Any + Send>>>,
    generation: u64,
}

impl CaptureScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the slot for `key`, creating it with `T::default()` on
    /// first use.
    ///
    /// # Examples
    /// ```
    /// use deepshark_core::scope::{CaptureScope, FrameMap};
    ///
    /// let scope = CaptureScope::new();
    /// scope.with("demo.requests", |map: &mut FrameMap<u8>| map.insert(5, 0x41));
    /// let seen = scope.with("demo.requests", |map: &mut FrameMap<u8>| map.get(5).copied());
    /// assert_eq!(seen, Some(0x41));
    /// ```
    pub fn with<T, R>(&self, key: &'static str, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Default,
    {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = slots
            .entry((key, TypeId::of::<T>()))
            .or_insert_with(|| Box::new(T::default()));
        match slot.downcast_mut::<T>() {
            Some(value) => f(value),
            None => unreachable!("slot key includes the value type"),
        }
    }

    /// Whether a slot exists without creating it.
    pub fn contains<T: Any + Send>(&self, key: &'static str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&(key, TypeId::of::<T>()))
    }

    /// Drop every slot. Called when the capture is closed or reloaded.
    pub fn reset(&mut self) {
        self.slots
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.generation += 1;
        tracing::info!(generation = self.generation, "capture scope reset");
    }

    /// Number of resets so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
