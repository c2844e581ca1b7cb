//! Text emission into the focused window.
//!
//! Two routes, chosen per edit by the reconciler:
//!
//! * **paste** — clipboard save → set → ⌘V / Ctrl+V → restore.  One round
//!   trip regardless of length, so it is used for long inserts.
//! * **type_text** — direct key simulation.  Cheaper for short suffixes and
//!   does not disturb the clipboard.
//!
//! Deletion is a batched run of Backspace presses.
//!
//! # Control characters
//!
//! `type_text` escapes its input before simulation: `\n` and `\t` pass
//! through (they map to real keys), every other control character is
//! stripped.  `paste` transfers text verbatim; the target application
//! decides what a pasted control character means.

use arboard::Clipboard;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use thiserror::Error;

// ---------------------------------------------------------------------------
// EmitError
// ---------------------------------------------------------------------------

/// Errors that can surface while emitting text.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The OS clipboard could not be opened or read.
    #[error("cannot access clipboard: {0}")]
    ClipboardAccess(String),

    /// Writing text to the OS clipboard failed.
    #[error("cannot set clipboard text: {0}")]
    ClipboardSet(String),

    /// A simulated key event could not be delivered.
    #[error("cannot simulate key event: {0}")]
    KeySimulation(String),
}

// ---------------------------------------------------------------------------
// TextEmitter
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for keystroke/paste emission.
///
/// Implementations must be `Send + Sync` so the emitter can be held behind
/// an `Arc<dyn TextEmitter>` and called from the session event task.
pub trait TextEmitter: Send + Sync {
    /// Paste `text` into the focused window via the clipboard.
    fn paste(&self, text: &str) -> Result<(), EmitError>;

    /// Type `text` via direct key simulation, after control-character
    /// escaping (see module docs).
    fn type_text(&self, text: &str) -> Result<(), EmitError>;

    /// Press Backspace `count` times as one batched operation.
    fn backspace(&self, count: usize) -> Result<(), EmitError>;
}

// Compile-time assertion: the trait must stay object-safe.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn TextEmitter>) {}
};

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Apply the `type_text` escaping contract: keep `\n` and `\t`, drop every
/// other control character.
pub fn escape_for_typing(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

// ---------------------------------------------------------------------------
// ClipboardEmitter
// ---------------------------------------------------------------------------

/// Production emitter backed by `arboard` (clipboard) and `enigo` (keys).
///
/// A fresh `Enigo`/`Clipboard` handle is created per call: neither type is
/// `Send` on every platform and both are cheap to construct.
#[derive(Debug, Clone)]
pub struct ClipboardEmitter {
    /// Milliseconds to wait after setting the clipboard before the paste
    /// chord, letting the clipboard manager flush.
    pub paste_delay_ms: u64,
    /// Milliseconds to wait after the paste chord before restoring the
    /// previous clipboard content.
    pub restore_delay_ms: u64,
}

impl Default for ClipboardEmitter {
    fn default() -> Self {
        Self {
            paste_delay_ms: 50,
            restore_delay_ms: 100,
        }
    }
}

impl ClipboardEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_clipboard() -> Result<Clipboard, EmitError> {
        Clipboard::new().map_err(|e| EmitError::ClipboardAccess(e.to_string()))
    }

    fn open_enigo() -> Result<Enigo, EmitError> {
        Enigo::new(&Settings::default()).map_err(|e| EmitError::KeySimulation(e.to_string()))
    }

    /// Send the platform paste chord to the focused window.
    fn paste_chord(enigo: &mut Enigo) -> Result<(), EmitError> {
        let key = |e: &mut Enigo, k: Key, d: Direction| {
            e.key(k, d)
                .map_err(|err| EmitError::KeySimulation(err.to_string()))
        };

        #[cfg(target_os = "macos")]
        {
            key(enigo, Key::Meta, Direction::Press)?;
            key(enigo, Key::Unicode('v'), Direction::Click)?;
            key(enigo, Key::Meta, Direction::Release)?;
        }

        #[cfg(not(target_os = "macos"))]
        {
            key(enigo, Key::Control, Direction::Press)?;
            key(enigo, Key::Unicode('v'), Direction::Click)?;
            key(enigo, Key::Control, Direction::Release)?;
        }

        Ok(())
    }
}

impl TextEmitter for ClipboardEmitter {
    fn paste(&self, text: &str) -> Result<(), EmitError> {
        let mut clipboard = Self::open_clipboard()?;

        // Preserve whatever the user had on the clipboard.  Empty or
        // non-text content saves as None and is left untouched afterwards.
        let saved = clipboard.get_text().ok();

        clipboard
            .set_text(text)
            .map_err(|e| EmitError::ClipboardSet(e.to_string()))?;
        std::thread::sleep(std::time::Duration::from_millis(self.paste_delay_ms));

        let mut enigo = Self::open_enigo()?;
        Self::paste_chord(&mut enigo)?;

        // Let the target application finish reading before restoring.
        std::thread::sleep(std::time::Duration::from_millis(self.restore_delay_ms));
        if let Some(previous) = saved {
            // Best-effort restore.
            let _ = clipboard.set_text(previous);
        }
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), EmitError> {
        let escaped = escape_for_typing(text);
        if escaped.is_empty() {
            return Ok(());
        }
        let mut enigo = Self::open_enigo()?;
        enigo
            .text(&escaped)
            .map_err(|e| EmitError::KeySimulation(e.to_string()))
    }

    fn backspace(&self, count: usize) -> Result<(), EmitError> {
        if count == 0 {
            return Ok(());
        }
        let mut enigo = Self::open_enigo()?;
        for _ in 0..count {
            enigo
                .key(Key::Backspace, Direction::Click)
                .map_err(|e| EmitError::KeySimulation(e.to_string()))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingEmitter  (test-only)
// ---------------------------------------------------------------------------

/// One recorded emission operation.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitOp {
    Paste(String),
    Type(String),
    Backspace(usize),
}

/// Test double that records every operation and can replay them onto a
/// simulated screen, so tests assert on the net visible result rather than
/// on call sequences alone.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingEmitter {
    ops: std::sync::Mutex<Vec<EmitOp>>,
    fail_inserts: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `paste`/`type_text` calls fail (backspaces still
    /// succeed), for exercising partial-emission recovery.
    pub fn fail_inserts(&self) {
        self.fail_inserts
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<EmitOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn total_backspaces(&self) -> usize {
        self.ops()
            .iter()
            .map(|op| match op {
                EmitOp::Backspace(n) => *n,
                _ => 0,
            })
            .sum()
    }

    /// Replay all recorded operations onto an empty screen.
    pub fn screen(&self) -> String {
        let mut screen = String::new();
        for op in self.ops() {
            match op {
                EmitOp::Paste(t) | EmitOp::Type(t) => screen.push_str(&t),
                EmitOp::Backspace(n) => {
                    let keep = screen.chars().count().saturating_sub(n);
                    screen = screen.chars().take(keep).collect();
                }
            }
        }
        screen
    }

    fn record(&self, op: EmitOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn insert_allowed(&self) -> Result<(), EmitError> {
        if self.fail_inserts.load(std::sync::atomic::Ordering::SeqCst) {
            Err(EmitError::KeySimulation("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
impl TextEmitter for RecordingEmitter {
    fn paste(&self, text: &str) -> Result<(), EmitError> {
        self.insert_allowed()?;
        self.record(EmitOp::Paste(text.to_string()));
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), EmitError> {
        self.insert_allowed()?;
        self.record(EmitOp::Type(escape_for_typing(text)));
        Ok(())
    }

    fn backspace(&self, count: usize) -> Result<(), EmitError> {
        if count > 0 {
            self.record(EmitOp::Backspace(count));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
