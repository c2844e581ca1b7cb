//! Foreground-window identity.
//!
//! Destructive edits (backspaces) are only allowed while the window that was
//! focused at session start is still in the foreground.  The handle is
//! opaque and compared for equality only; the concrete platform tracker is
//! an integration point supplied by the embedding application.

#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// WindowHandle
// ---------------------------------------------------------------------------

/// Opaque identifier for an application window.
///
/// Only equality is meaningful; the raw value has no semantics inside this
/// crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(u64);

impl WindowHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// WindowTracker
// ---------------------------------------------------------------------------

/// Source of the current foreground-window handle.
///
/// Implementations may be called from any task; they must not block.
pub trait WindowTracker: Send + Sync {
    /// Handle of the currently focused window, or `None` when the platform
    /// cannot report one.
    fn foreground_window(&self) -> Option<WindowHandle>;
}

/// Tracker that always reports the same handle.
///
/// Used on platforms where no real tracker has been wired up; with a fixed
/// handle the target-window gate never trips, so the reconciler behaves as
/// if focus never changes.
pub struct FixedWindowTracker(WindowHandle);

impl FixedWindowTracker {
    pub fn new(handle: WindowHandle) -> Self {
        Self(handle)
    }
}

impl WindowTracker for FixedWindowTracker {
    fn foreground_window(&self) -> Option<WindowHandle> {
        Some(self.0)
    }
}

// ---------------------------------------------------------------------------
// Test tracker
// ---------------------------------------------------------------------------

/// Tracker whose reported handle can be swapped mid-test.
#[cfg(test)]
pub struct SwitchableWindowTracker(AtomicU64);

#[cfg(test)]
impl SwitchableWindowTracker {
    pub fn new(handle: WindowHandle) -> Self {
        Self(AtomicU64::new(handle.0))
    }

    pub fn switch_to(&self, handle: WindowHandle) {
        self.0.store(handle.0, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl WindowTracker for SwitchableWindowTracker {
    fn foreground_window(&self) -> Option<WindowHandle> {
        Some(WindowHandle(self.0.load(Ordering::SeqCst)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
