//! Audio pipeline — device capture → buffer pool → capture loop → VAD.
//!
//! ```text
//! Microphone → cpal callback → downmix/resample/quantize → BufferPool
//!            → CaptureLoop (poll, drain, resubmit) → AudioChunk events
//!                                     └─▶ VAD → SilenceTracker
//! ```
//!
//! The device writes into submitted pool slots from its own thread; the
//! capture loop polls completions from a tokio task.  The pool is the only
//! thing they share.

pub mod capture;
pub mod device;
pub mod pool;
pub mod resample;
pub mod vad;

pub use capture::{AudioChunk, CaptureError, CaptureEvent, CaptureLoop, RecordingStats};
pub use device::{AudioDeviceSource, CpalDeviceSource, DeviceError};
pub use pool::{BufferPool, SlotState};
pub use resample::{downmix_to_mono, f32_to_pcm16, pcm16_to_i16, resample_to_16k};
pub use vad::{build_detector, FrameVad, RmsVad, SilenceTracker, VoiceActivityDetector};
