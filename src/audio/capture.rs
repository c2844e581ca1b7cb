//! The capture loop: buffer lifecycle, VAD, and recording controls.
//!
//! [`CaptureLoop`] polls the [`BufferPool`] on its own task with a bounded
//! sleep between polls, drains completed slots into [`AudioChunk`]s, feeds
//! each chunk to the configured VAD, and forwards it to the session over an
//! mpsc channel.  It enforces the recording controls:
//!
//! * **cancellation** — checked every poll; routes through the normal drain
//!   path, never an abrupt abort.
//! * **silence timeout** — trailing silence after speech has been observed.
//! * **no-speech timeout** — nothing recognizable was ever said.
//! * **max duration** — hard cap on session length.
//!
//! After the loop ends, the device is stopped, already-filled buffers are
//! flushed without resubmission, and the loop waits (bounded) until every
//! slot is reclaimed before returning its [`RecordingStats`].
//!
//! Per-buffer processing problems are logged and skipped; only device
//! startup failures abort a session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{AudioConfig, VadConfig};

use super::device::{AudioDeviceSource, DeviceError};
use super::pool::BufferPool;
use super::resample::pcm16_to_i16;
use super::vad::{build_detector, SilenceTracker, VoiceActivityDetector};

// ---------------------------------------------------------------------------
// AudioChunk / RecordingStats / CaptureEvent
// ---------------------------------------------------------------------------

/// One drained capture buffer: 16 kHz, 16-bit, mono PCM.
///
/// Chunks are transient; they flow to the transcription channel and are
/// never persisted.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Little-endian `i16` PCM bytes.
    pub bytes: Vec<u8>,
    /// Sample count (mono, so frames == samples).
    pub frames: usize,
}

/// Summary of one recording, produced by the capture loop and immutable
/// once returned.
#[derive(Debug, Clone, Default)]
pub struct RecordingStats {
    pub duration_ms: u64,
    pub bytes_recorded: u64,
    pub silence_detected: bool,
}

/// Events emitted by the capture loop toward the session controller.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A drained buffer, in capture order.
    Chunk(AudioChunk),
    /// Trailing silence reached the configured threshold.
    SilenceDetected,
    /// No speech was ever observed within the timeout.
    NoSpeechTimeout,
}

/// Errors that abort a capture session before it produces audio.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] DeviceError),
}

// ---------------------------------------------------------------------------
// CaptureLoop
// ---------------------------------------------------------------------------

/// Owns the buffer pool, the device, the VAD and the recording controls for
/// one session.
pub struct CaptureLoop {
    pool: Arc<Mutex<BufferPool>>,
    device: Box<dyn AudioDeviceSource>,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    silence: SilenceTracker,
    cancel: Arc<AtomicBool>,
    events: mpsc::Sender<CaptureEvent>,
    sample_rate: u32,
    poll_interval: Duration,
    max_duration: Duration,
    no_speech_timeout: Duration,
    reclaim_timeout: Duration,
    stats: RecordingStats,
}

impl CaptureLoop {
    pub fn new(
        audio: &AudioConfig,
        vad: &VadConfig,
        device: Box<dyn AudioDeviceSource>,
        events: mpsc::Sender<CaptureEvent>,
    ) -> Self {
        // 16-bit mono: 2 bytes per frame.
        let slot_bytes = (audio.sample_rate as usize * 2 * audio.buffer_ms as usize) / 1000;
        let pool = Arc::new(Mutex::new(BufferPool::new(
            audio.buffer_count as usize,
            slot_bytes.max(2),
        )));

        Self {
            pool,
            device,
            vad: vad.enabled.then(|| build_detector(vad)),
            silence: SilenceTracker::new(u64::from(vad.silence_threshold_ms)),
            cancel: Arc::new(AtomicBool::new(false)),
            events,
            sample_rate: audio.sample_rate,
            poll_interval: Duration::from_millis(u64::from(audio.poll_interval_ms)),
            max_duration: Duration::from_secs_f32(audio.max_recording_secs),
            no_speech_timeout: Duration::from_secs(u64::from(vad.no_speech_timeout_secs)),
            reclaim_timeout: Duration::from_secs(2),
            stats: RecordingStats::default(),
        }
    }

    /// Flag that ends the record loop at its next poll.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Open and start the capture device.
    ///
    /// Must be called (and succeed) before [`run`](Self::run); failures here
    /// are fatal for the session and nothing has been captured yet.
    pub fn open(&mut self) -> Result<(), CaptureError> {
        self.device.open(Arc::clone(&self.pool))?;
        Ok(())
    }

    /// Drive the record loop to completion and return the final stats.
    ///
    /// Ends on cancellation, silence detection, no-speech timeout or max
    /// duration; all exits run the same drain-and-reclaim path.
    pub async fn run(mut self) -> RecordingStats {
        let started = Instant::now();

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                log::debug!("capture: cancellation requested");
                break;
            }

            if self.drain_completed(true).await {
                break;
            }

            if started.elapsed() >= self.max_duration {
                log::info!("capture: max recording duration reached");
                break;
            }

            if self.vad.is_some()
                && !self.silence.speech_seen()
                && started.elapsed() >= self.no_speech_timeout
            {
                log::info!("capture: no speech observed within timeout");
                let _ = self.events.send(CaptureEvent::NoSpeechTimeout).await;
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        // Stop the device first so no further writes race the final drain.
        self.device.stop();
        self.drain_completed(false).await;
        let partial = self
            .pool
            .lock()
            .map(|mut p| p.drain_partial())
            .ok()
            .flatten();
        if let Some(bytes) = partial {
            self.process_buffer(bytes).await;
        }
        self.await_reclamation().await;

        self.stats.duration_ms = started.elapsed().as_millis() as u64;
        let (written, overrun) = self
            .pool
            .lock()
            .map(|p| (p.bytes_written(), p.overrun_bytes()))
            .unwrap_or_default();
        if overrun > 0 {
            log::warn!("capture: dropped {overrun} bytes to pool overrun");
        }
        log::debug!(
            "capture: finished after {} ms ({} bytes pooled)",
            self.stats.duration_ms,
            written
        );
        self.stats
    }

    /// Drain every completed slot.
    ///
    /// While `streaming`, drained slots are resubmitted and a crossed
    /// silence threshold signals and returns `true`.  During the final
    /// drain (`streaming == false`), everything is flushed without
    /// resubmission and silence no longer signals; the recording is already
    /// over.
    async fn drain_completed(&mut self, streaming: bool) -> bool {
        loop {
            let popped = match self.pool.lock() {
                Ok(mut pool) => pool.pop_done(),
                Err(_) => return false,
            };
            let Some((slot, bytes)) = popped else {
                return false;
            };

            let silence_hit = self.process_buffer(bytes).await;

            if streaming {
                if let Ok(mut pool) = self.pool.lock() {
                    pool.resubmit(slot);
                }
                if silence_hit {
                    log::info!("capture: silence threshold reached");
                    let _ = self.events.send(CaptureEvent::SilenceDetected).await;
                    return true;
                }
            }
        }
    }

    /// Classify and forward one buffer.  Returns `true` on silence trigger.
    ///
    /// Processing problems are logged and the buffer skipped; the loop
    /// keeps running.
    async fn process_buffer(&mut self, bytes: Vec<u8>) -> bool {
        self.stats.bytes_recorded += bytes.len() as u64;

        let samples = pcm16_to_i16(&bytes);
        let frames = samples.len();
        let buffer_ms = (frames as u64 * 1000) / u64::from(self.sample_rate.max(1));

        let silence_hit = match self.vad.as_mut() {
            Some(vad) => {
                let is_speech = vad.is_speech(&samples);
                self.silence.observe(is_speech, buffer_ms)
            }
            None => false,
        };
        if silence_hit {
            self.stats.silence_detected = true;
        }

        let chunk = AudioChunk { bytes, frames };
        if let Err(e) = self.events.send(CaptureEvent::Chunk(chunk)).await {
            // Receiver already torn down; the chunk is dropped but the loop
            // still drains and reclaims normally.
            log::warn!("capture: chunk receiver gone ({e}), dropping buffer");
        }

        silence_hit
    }

    /// Poll (bounded) until every pool slot is back to `Free`.
    async fn await_reclamation(&mut self) {
        let deadline = Instant::now() + self.reclaim_timeout;
        loop {
            let reclaimed = self.pool.lock().map(|p| p.all_reclaimed()).unwrap_or(true);
            if reclaimed {
                return;
            }
            if Instant::now() >= deadline {
                log::warn!("capture: buffer reclamation timed out");
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::ScriptedDevice;
    use crate::config::VadBackend;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// PCM bytes for `ms` milliseconds of audible square wave at 16 kHz.
    fn speech_pcm(ms: usize) -> Vec<u8> {
        let samples = ms * 16;
        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let v: i16 = if (i / 8) % 2 == 0 { 12_000 } else { -12_000 };
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn test_audio_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 16_000,
            buffer_count: 4,
            buffer_ms: 25,
            poll_interval_ms: 5,
            max_recording_secs: 10.0,
            min_recording_ms: 500,
            preferred_device: None,
        }
    }

    fn test_vad_config(silence_ms: u32, no_speech_secs: u32) -> VadConfig {
        VadConfig {
            enabled: true,
            backend: VadBackend::Rms,
            activation_threshold: 0.05,
            sustain_threshold: 0.02,
            silence_threshold_ms: silence_ms,
            frame_ms: 30,
            no_speech_timeout_secs: no_speech_secs,
        }
    }

    fn drain_events(rx: &mut mpsc::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn open_failure_is_fatal_before_any_audio() {
        let (tx, _rx) = mpsc::channel(16);
        let mut capture = CaptureLoop::new(
            &test_audio_config(),
            &test_vad_config(500, 30),
            Box::new(ScriptedDevice::failing()),
            tx,
        );

        let err = capture.open().expect_err("device open must fail");
        assert!(matches!(err, CaptureError::Device(DeviceError::NoDevice)));
    }

    #[tokio::test]
    async fn silence_after_speech_ends_the_loop() {
        let (tx, mut rx) = mpsc::channel(256);
        // 200 ms of speech, then the scripted device emits silence forever.
        let device = ScriptedDevice::new(speech_pcm(200), 800);
        let mut capture = CaptureLoop::new(
            &test_audio_config(),
            &test_vad_config(100, 30),
            Box::new(device),
            tx,
        );

        capture.open().unwrap();
        let stats = capture.run().await;

        assert!(stats.silence_detected);
        assert!(stats.bytes_recorded > 0);

        let events = drain_events(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, CaptureEvent::SilenceDetected)));
        // Silence must come after at least one chunk of real audio.
        assert!(events.iter().any(|e| matches!(e, CaptureEvent::Chunk(_))));
    }

    #[tokio::test]
    async fn cancellation_drains_and_returns_stats() {
        let (tx, mut rx) = mpsc::channel(256);
        let device = ScriptedDevice::new(speech_pcm(5_000), 800);
        let mut capture = CaptureLoop::new(
            &test_audio_config(),
            // Long silence threshold: only the cancel flag can end this.
            &test_vad_config(5_000, 30),
            Box::new(device),
            tx,
        );

        capture.open().unwrap();
        let cancel = capture.cancel_handle();
        let task = tokio::spawn(capture.run());

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.store(true, Ordering::SeqCst);
        let stats = task.await.unwrap();

        assert!(!stats.silence_detected);
        assert!(stats.bytes_recorded > 0);
        assert!(stats.duration_ms >= 50);

        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(e, CaptureEvent::Chunk(_))));
    }

    #[tokio::test]
    async fn no_speech_timeout_fires_without_speech() {
        let (tx, mut rx) = mpsc::channel(256);
        // Script is empty: the device produces silence from the start.
        let device = ScriptedDevice::new(Vec::new(), 800);
        let mut audio = test_audio_config();
        audio.max_recording_secs = 30.0;
        let mut capture = CaptureLoop::new(
            &audio,
            // 0-second timeout elapses on the first poll.
            &test_vad_config(5_000, 0),
            Box::new(device),
            tx,
        );

        capture.open().unwrap();
        let stats = capture.run().await;

        assert!(!stats.silence_detected);
        let events = drain_events(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, CaptureEvent::NoSpeechTimeout)));
    }

    #[tokio::test]
    async fn max_duration_caps_the_recording() {
        let (tx, _rx) = mpsc::channel(4096);
        let device = ScriptedDevice::new(speech_pcm(10_000), 800);
        let mut audio = test_audio_config();
        audio.max_recording_secs = 0.05;
        let mut capture = CaptureLoop::new(
            &audio,
            &test_vad_config(60_000, 30),
            Box::new(device),
            tx,
        );

        capture.open().unwrap();
        let stats = capture.run().await;
        // Generous upper bound: the point is that it stopped on its own.
        assert!(stats.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn chunks_arrive_in_capture_order() {
        let (tx, mut rx) = mpsc::channel(4096);
        // A script with a strictly increasing byte pattern.
        let script: Vec<u8> = (0..4_000u32).map(|i| (i % 251) as u8).collect();
        let device = ScriptedDevice::new(script.clone(), 400);
        let mut vad = test_vad_config(5_000, 30);
        vad.enabled = false;
        let mut audio = test_audio_config();
        audio.max_recording_secs = 0.2;
        let mut capture = CaptureLoop::new(&audio, &vad, Box::new(device), tx);

        capture.open().unwrap();
        let _ = capture.run().await;

        let mut received = Vec::new();
        for ev in drain_events(&mut rx) {
            if let CaptureEvent::Chunk(chunk) = ev {
                received.extend(chunk.bytes);
            }
        }
        // Whatever arrived must be a prefix of the script (plus trailing
        // scripted silence), in order and without holes.
        let compare = received.len().min(script.len());
        assert!(compare > 0, "no audio made it through");
        assert_eq!(&received[..compare], &script[..compare]);
    }

    #[tokio::test]
    async fn vad_disabled_never_signals_silence() {
        let (tx, mut rx) = mpsc::channel(4096);
        let device = ScriptedDevice::new(Vec::new(), 800);
        let mut vad = test_vad_config(100, 0);
        vad.enabled = false;
        let mut audio = test_audio_config();
        audio.max_recording_secs = 0.08;
        let mut capture = CaptureLoop::new(&audio, &vad, Box::new(device), tx);

        capture.open().unwrap();
        let stats = capture.run().await;

        assert!(!stats.silence_detected);
        let events = drain_events(&mut rx);
        assert!(!events.iter().any(|e| {
            matches!(
                e,
                CaptureEvent::SilenceDetected | CaptureEvent::NoSpeechTimeout
            )
        }));
    }
}
