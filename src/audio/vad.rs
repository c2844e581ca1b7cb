//! Voice-activity detection.
//!
//! Two interchangeable strategies, selected by configuration:
//!
//! * [`RmsVad`] — buffer-level RMS energy with hysteresis.  The activation
//!   threshold is higher than the sustain threshold, so brief dips below
//!   speaking level do not flap the detector between speech and silence.
//! * [`FrameVad`] — splits the buffer into exact 10/20/30 ms frames and
//!   classifies each frame from energy plus zero-crossing rate; the buffer
//!   is speech when enough frames vote speech.  A trailing partial frame is
//!   classified when at least half a frame of samples remains, otherwise
//!   ignored.
//!
//! Both strategies report one boolean per capture buffer.  All silence
//! accounting happens in [`SilenceTracker`] and is time-based (milliseconds
//! of buffer duration), so the two backends never diverge in units.

use crate::config::{VadBackend, VadConfig};

// ---------------------------------------------------------------------------
// VoiceActivityDetector
// ---------------------------------------------------------------------------

/// Classifies one capture buffer as speech or silence.
///
/// Implementations may keep internal state (hysteresis) and are driven from
/// the capture loop only.  `Sync` is required because the detector lives,
/// transitively, inside the session task future that the controller spawns.
pub trait VoiceActivityDetector: Send + Sync {
    /// `true` when `samples` (16 kHz mono PCM) contain speech.
    fn is_speech(&mut self, samples: &[i16]) -> bool;
}

/// Build the configured detector.
pub fn build_detector(config: &VadConfig) -> Box<dyn VoiceActivityDetector> {
    match config.backend {
        VadBackend::Rms => Box::new(RmsVad::new(
            config.activation_threshold,
            config.sustain_threshold,
        )),
        VadBackend::Frame => Box::new(FrameVad::new(config.frame_ms, config.activation_threshold)),
    }
}

/// Normalized RMS amplitude of 16-bit samples, in `[0.0, 1.0]`.
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

// ---------------------------------------------------------------------------
// RmsVad
// ---------------------------------------------------------------------------

/// Energy detector with activation/sustain hysteresis.
///
/// While inactive, a buffer must reach `activation` to count as speech.
/// Once active, the lower `sustain` level keeps the detector active, so a
/// speaker trailing off does not register as silence one buffer too early.
pub struct RmsVad {
    activation: f32,
    sustain: f32,
    active: bool,
}

impl RmsVad {
    /// `sustain` is clamped to at most `activation`; a sustain above the
    /// activation level would invert the hysteresis.
    pub fn new(activation: f32, sustain: f32) -> Self {
        Self {
            activation,
            sustain: sustain.min(activation),
            active: false,
        }
    }
}

impl VoiceActivityDetector for RmsVad {
    fn is_speech(&mut self, samples: &[i16]) -> bool {
        let level = rms(samples);
        let threshold = if self.active {
            self.sustain
        } else {
            self.activation
        };
        self.active = level >= threshold;
        self.active
    }
}

// ---------------------------------------------------------------------------
// FrameVad
// ---------------------------------------------------------------------------

/// Fixed-frame binary classifier.
///
/// Works on exact 10/20/30 ms frames at 16 kHz.  A frame votes speech when
/// its energy clears the threshold and its zero-crossing rate is above the
/// near-DC floor (rejects rumble and constant offset).  The buffer is
/// speech when at least a third of its frames vote speech.
pub struct FrameVad {
    frame_samples: usize,
    energy_threshold: f32,
}

/// Minimum zero-crossing rate for a voiced frame.
const MIN_ZERO_CROSSING_RATE: f32 = 0.005;

impl FrameVad {
    /// # Panics
    ///
    /// Panics when `frame_ms` is not 10, 20 or 30.
    pub fn new(frame_ms: u32, energy_threshold: f32) -> Self {
        assert!(
            matches!(frame_ms, 10 | 20 | 30),
            "FrameVad frame length must be 10, 20 or 30 ms"
        );
        Self {
            frame_samples: (frame_ms as usize) * 16, // at 16 kHz
            energy_threshold,
        }
    }

    fn classify_frame(&self, frame: &[i16]) -> bool {
        if rms(frame) < self.energy_threshold {
            return false;
        }
        let crossings = frame
            .windows(2)
            .filter(|w| (w[0] >= 0) != (w[1] >= 0))
            .count();
        let zcr = crossings as f32 / frame.len().max(1) as f32;
        zcr >= MIN_ZERO_CROSSING_RATE
    }
}

impl VoiceActivityDetector for FrameVad {
    fn is_speech(&mut self, samples: &[i16]) -> bool {
        let mut frames = 0usize;
        let mut voiced = 0usize;

        for frame in samples.chunks(self.frame_samples) {
            if frame.len() < self.frame_samples && frame.len() < self.frame_samples / 2 {
                // Too little trailing data to classify meaningfully.
                continue;
            }
            frames += 1;
            if self.classify_frame(frame) {
                voiced += 1;
            }
        }

        frames > 0 && voiced * 3 >= frames
    }
}

// ---------------------------------------------------------------------------
// SilenceTracker
// ---------------------------------------------------------------------------

/// Time-based silence accounting shared by both VAD backends.
///
/// Silence accumulates only after speech has been observed at least once;
/// a session where the user never speaks is handled by the separate
/// no-speech timeout, not by this tracker.
pub struct SilenceTracker {
    threshold_ms: u64,
    accumulated_ms: u64,
    speech_seen: bool,
}

impl SilenceTracker {
    pub fn new(threshold_ms: u64) -> Self {
        Self {
            threshold_ms,
            accumulated_ms: 0,
            speech_seen: false,
        }
    }

    /// Record one classified buffer of `buffer_ms` duration.
    ///
    /// Returns `true` exactly when accumulated trailing silence reaches the
    /// threshold.
    pub fn observe(&mut self, is_speech: bool, buffer_ms: u64) -> bool {
        if is_speech {
            self.speech_seen = true;
            self.accumulated_ms = 0;
            return false;
        }
        if !self.speech_seen {
            return false;
        }
        self.accumulated_ms += buffer_ms;
        self.accumulated_ms >= self.threshold_ms
    }

    pub fn speech_seen(&self) -> bool {
        self.speech_seen
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
