//! Session lifecycle state machine.
//!
//! ```text
//! Idle ──toggle──▶ Starting ──connected + device open──▶ Streaming
//!   ▲                  │                                     │
//!   │            start failed                      toggle / error /
//!   │                  │                        silence / disconnect
//!   └──── teardown ────┴──────────◀── Stopping ◀──────────────┘
//! ```
//!
//! Transitions only move forward along this cycle.  A toggle arriving while
//! the machine is in Starting or Stopping is ignored (and logged); this is
//! what makes rapid start/stop hammering safe.

use std::sync::Mutex;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Phase of the dictation session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; a toggle starts one.
    Idle,
    /// Connecting to the recognizer and opening the capture device.
    Starting,
    /// Audio is flowing and transcripts are being reconciled.
    Streaming,
    /// Draining, waiting for the final transcript, tearing down.
    Stopping,
}

impl SessionState {
    /// Short label for logs and status displays.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

// ---------------------------------------------------------------------------
// StateCell
// ---------------------------------------------------------------------------

/// Mutex-guarded state holder shared between the control loop, the session
/// task and its callbacks.
///
/// All reads and transitions take the lock for the duration of the call
/// only; the lock is never held across an await point.
#[derive(Debug, Default)]
pub struct StateCell(Mutex<SessionState>);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Compare-and-swap transition.  Returns `false` (and logs) when the
    /// current state is not `from`, leaving the state untouched.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            log::debug!(
                "state: refused {} -> {} (currently {})",
                from.label(),
                to.label(),
                state.label()
            );
            return false;
        }
        log::debug!("state: {} -> {}", from.label(), to.label());
        *state = to;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
