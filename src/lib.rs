//! Real-time voice dictation pipeline.
//!
//! Captures microphone audio, detects speech boundaries with VAD, streams
//! audio to a remote recognizer over a persistent websocket, and converges
//! the text on screen to each new hypothesis with minimal backspace+insert
//! edits — all coordinated by a session state machine that stays consistent
//! under cancellation, errors, disconnects and rapid start/stop toggling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   chunks   ┌─────────────────────┐
//! │ CaptureLoop  │───────────▶│ DictationController │
//! │  pool + VAD  │  silence/  │   state machine     │
//! └──────────────┘  timeouts  └──────┬──────┬───────┘
//!                              audio │      │ transcripts
//!                                    ▼      ▼
//!                    ┌────────────────┐   ┌───────────────┐
//!                    │ Transcription  │   │ TextReconciler│
//!                    │ Channel (ws)   │   │  → TextEmitter│
//!                    └────────────────┘   └───────────────┘
//! ```
//!
//! The tray/settings GUI, hotkey registration and the platform foreground-
//! window tracker are external collaborators; they talk to the controller
//! through [`session::ControlEvent`]s and the seams in [`window`] and
//! [`text`].

pub mod audio;
pub mod channel;
pub mod config;
pub mod session;
pub mod text;
pub mod window;
