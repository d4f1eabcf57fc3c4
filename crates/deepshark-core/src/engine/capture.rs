use std::collections::HashMap;
use std::sync::Mutex;

use crate::scope::CaptureScope;

/// Where a frame is in its dissection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Unvisited,
    Dissecting,
    Visited,
}

/// State of one loaded capture: capture-scope storage plus the visited
/// state of every frame seen so far.
#[derive(Debug, Default)]
pub struct Capture {
    scope: CaptureScope,
    states: Mutex<HashMap<u32, FrameState>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> &CaptureScope {
        &self.scope
    }

    pub fn state(&self, frame: u32) -> FrameState {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&frame)
            .copied()
            .unwrap_or(FrameState::Unvisited)
    }

    /// Mark `frame` as being dissected; returns whether it was visited before.
    pub(crate) fn begin(&self, frame: u32) -> bool {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = states.insert(frame, FrameState::Dissecting);
        if previous == Some(FrameState::Dissecting) {
            tracing::warn!(frame, "frame dissected concurrently with itself");
        }
        previous == Some(FrameState::Visited)
    }

    pub(crate) fn finish(&self, frame: u32) {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(frame, FrameState::Visited);
    }

    /// Number of frames dissected at least once.
    pub fn visited_frames(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|state| **state == FrameState::Visited)
            .count()
    }

    /// Forget every frame and drop capture-scope state (close/reload).
    pub fn reset(&mut self) {
        self.scope.reset();
        self.states
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{Capture, FrameState};

    #[test]
    fn lifecycle_moves_to_visited() {
        let mut capture = Capture::new();
        assert_eq!(capture.state(3), FrameState::Unvisited);
        assert!(!capture.begin(3));
        assert_eq!(capture.state(3), FrameState::Dissecting);
        capture.finish(3);
        assert_eq!(capture.state(3), FrameState::Visited);
        assert!(capture.begin(3));
        capture.finish(3);
        assert_eq!(capture.visited_frames(), 1);

        capture.reset();
        assert_eq!(capture.state(3), FrameState::Unvisited);
    }
}
