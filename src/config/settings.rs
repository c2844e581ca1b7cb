//! Dictation settings: structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they round-trip through `settings.toml` and can be shared across
//! tasks.  Validation happens upstream in the settings GUI; this crate
//! still re-clamps the dangerous values in [`DictationConfig::normalized`]
//! before a session consumes them.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// VadBackend
// ---------------------------------------------------------------------------

/// Which voice-activity detector classifies capture buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadBackend {
    /// RMS energy with activation/sustain hysteresis.
    Rms,
    /// Fixed-frame binary classifier (10/20/30 ms frames).
    Frame,
}

impl Default for VadBackend {
    fn default() -> Self {
        Self::Rms
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture-device and buffer-pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// PCM rate delivered to the recognizer.  Reference: 16 000 Hz.
    pub sample_rate: u32,
    /// Slots in the reusable buffer pool.  Reference: 8.
    pub buffer_count: u32,
    /// Audio per slot in milliseconds.  Reference: ~200 ms.
    pub buffer_ms: u32,
    /// Sleep between buffer-completion polls.
    pub poll_interval_ms: u32,
    /// Hard cap on recording length; capture stops by itself at this point.
    pub max_recording_secs: f32,
    /// Recordings shorter than this are abandoned without transcription.
    pub min_recording_ms: u32,
    /// Index into the input-device list; `None` = system default.
    pub preferred_device: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            buffer_count: 8,
            buffer_ms: 200,
            poll_interval_ms: 20,
            max_recording_secs: 120.0,
            min_recording_ms: 500,
            preferred_device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// VadConfig
// ---------------------------------------------------------------------------

/// Voice-activity detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Disabling VAD also disables the silence and no-speech stops.
    pub enabled: bool,
    /// Detector strategy.
    pub backend: VadBackend,
    /// Normalized RMS level that activates speech (0.0 – 1.0).
    pub activation_threshold: f32,
    /// Lower level that keeps speech active once detected; must not exceed
    /// the activation threshold.
    pub sustain_threshold: f32,
    /// Trailing silence that ends the recording, in milliseconds.
    /// Clamped to 100 – 5000.
    pub silence_threshold_ms: u32,
    /// Frame length for the frame classifier: 10, 20 or 30 ms.
    pub frame_ms: u32,
    /// Seconds without any speech before the session gives up.
    /// Reference: 30 s.
    pub no_speech_timeout_secs: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: VadBackend::default(),
            activation_threshold: 0.035,
            sustain_threshold: 0.02,
            silence_threshold_ms: 1_200,
            frame_ms: 30,
            no_speech_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// RecognizerConfig
// ---------------------------------------------------------------------------

/// Remote recognizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Batch endpoint URL; the streaming websocket URL is derived from it
    /// (scheme rewrite plus a `stream` path segment).
    pub endpoint: String,
    /// Audio is aggregated into sends of at least this much, bounding the
    /// message rate.  Reference: 500 ms.
    pub aggregate_ms: u32,
    /// How long to wait after end-of-input for the final transcript before
    /// tearing down anyway.  Reference: 10 s (inference latency exceeds
    /// round-trip time).
    pub stop_flush_timeout_secs: u32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9090/api/transcribe".into(),
            aggregate_ms: 500,
            stop_flush_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// EmitConfig
// ---------------------------------------------------------------------------

/// Text-emission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitConfig {
    /// Allow long inserts to go through the clipboard.  When off, every
    /// insert is typed key by key.
    pub auto_paste: bool,
    /// Inserts longer than this many characters use paste.
    pub paste_threshold_chars: usize,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            auto_paste: true,
            paste_threshold_chars: 24,
        }
    }
}

// ---------------------------------------------------------------------------
// DictationConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use dictate::config::DictationConfig;
///
/// // Load (returns Default when the file is missing)
/// let config = DictationConfig::load().unwrap().normalized();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictationConfig {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub recognizer: RecognizerConfig,
    pub emit: EmitConfig,
}

impl DictationConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(Default)` when the file does not exist yet, so callers
    /// never special-case a first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save to the platform-appropriate `settings.toml`, creating parent
    /// directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Re-clamp values a hand-edited (or out-of-date) settings file could
    /// push out of range.
    pub fn normalized(mut self) -> Self {
        self.vad.silence_threshold_ms = self.vad.silence_threshold_ms.clamp(100, 5_000);
        self.vad.sustain_threshold = self
            .vad
            .sustain_threshold
            .min(self.vad.activation_threshold);
        if !matches!(self.vad.frame_ms, 10 | 20 | 30) {
            log::warn!(
                "config: frame_ms {} is not 10/20/30, using 30",
                self.vad.frame_ms
            );
            self.vad.frame_ms = 30;
        }
        self.audio.buffer_count = self.audio.buffer_count.max(2);
        self.audio.buffer_ms = self.audio.buffer_ms.max(10);
        self.audio.poll_interval_ms = self.audio.poll_interval_ms.max(1);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
