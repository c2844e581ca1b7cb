//! Microphone access via `cpal`, behind the [`AudioDeviceSource`] seam.
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream lives on a
//! dedicated thread for its whole lifetime (open → callbacks → stop).  The
//! callback converts whatever format the device delivers into the
//! recognizer's reference PCM and appends it to the shared [`BufferPool`];
//! everything else in the crate only ever sees pool slots.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::pool::BufferPool;
use super::resample::{downmix_to_mono, f32_to_pcm16, resample_to_16k};

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Errors raised while opening or starting the capture device.
///
/// All of these are fatal for the session: they happen before any audio has
/// flowed, so the controller reports them and returns to idle.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to enumerate input devices: {0}")]
    Enumeration(String),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio device thread exited before confirming startup")]
    ThreadStartup,
}

// ---------------------------------------------------------------------------
// AudioDeviceSource
// ---------------------------------------------------------------------------

/// A source of capture audio that fills submitted pool slots.
///
/// `open` must not return until the device is actually producing (or has
/// failed); `stop` ceases all pool writes before returning, so callers may
/// drain and reclaim the pool afterwards without racing the callback.
pub trait AudioDeviceSource: Send + Sync {
    fn open(&mut self, pool: Arc<Mutex<BufferPool>>) -> Result<(), DeviceError>;
    fn stop(&mut self);
}

// ---------------------------------------------------------------------------
// CpalDeviceSource
// ---------------------------------------------------------------------------

/// Production device source backed by the default `cpal` host.
pub struct CpalDeviceSource {
    /// Index into the host's input-device list; `None` = system default.
    preferred_device: Option<usize>,
    worker: Option<DeviceWorker>,
}

struct DeviceWorker {
    stop_tx: std_mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

impl CpalDeviceSource {
    pub fn new(preferred_device: Option<usize>) -> Self {
        Self {
            preferred_device,
            worker: None,
        }
    }

    fn select_device(preferred: Option<usize>) -> Result<cpal::Device, DeviceError> {
        let host = cpal::default_host();

        if let Some(index) = preferred {
            let mut devices = host
                .input_devices()
                .map_err(|e| DeviceError::Enumeration(e.to_string()))?;
            if let Some(device) = devices.nth(index) {
                return Ok(device);
            }
            log::warn!("device: preferred input #{index} not found, falling back to default");
        }

        host.default_input_device().ok_or(DeviceError::NoDevice)
    }

    /// Build and start the stream.  Runs on the device thread.
    fn start_stream(
        preferred: Option<usize>,
        pool: Arc<Mutex<BufferPool>>,
    ) -> Result<cpal::Stream, DeviceError> {
        let device = Self::select_device(preferred)?;
        let supported = device.default_input_config()?;
        let channels = supported.channels();
        let source_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        log::debug!("device: opening input at {source_rate} Hz, {channels} ch");

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix_to_mono(data, channels);
                let pcm = f32_to_pcm16(&resample_to_16k(&mono, source_rate));
                // Overruns are counted by the pool; the callback never
                // blocks and never panics.
                if let Ok(mut pool) = pool.lock() {
                    pool.write(&pcm);
                }
            },
            |err: cpal::StreamError| {
                log::error!("device: stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(stream)
    }
}

impl AudioDeviceSource for CpalDeviceSource {
    fn open(&mut self, pool: Arc<Mutex<BufferPool>>) -> Result<(), DeviceError> {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), DeviceError>>();
        let preferred = self.preferred_device;

        let handle = std::thread::Builder::new()
            .name("audio-device".into())
            .spawn(move || {
                let stream = match Self::start_stream(preferred, pool) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Keep the stream alive until stop is requested (or the
                // source is dropped, which closes the channel).
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|_| DeviceError::ThreadStartup)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(DeviceWorker { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(DeviceError::ThreadStartup),
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                log::warn!("device: capture thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CpalDeviceSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// ScriptedDevice  (test-only)
// ---------------------------------------------------------------------------

/// Test double that plays a PCM script into the pool from its own thread,
/// then endless silence, until stopped.
///
/// Mirrors the real source's threading: pool writes happen off the test
/// task, so capture-loop tests exercise the same poll/drain races.
#[cfg(test)]
pub struct ScriptedDevice {
    script: Vec<u8>,
    piece_bytes: usize,
    interval: std::time::Duration,
    fail_open: bool,
    stop_flag: Option<Arc<std::sync::atomic::AtomicBool>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

#[cfg(test)]
impl ScriptedDevice {
    pub fn new(script: Vec<u8>, piece_bytes: usize) -> Self {
        Self {
            script,
            piece_bytes,
            interval: std::time::Duration::from_millis(2),
            fail_open: false,
            stop_flag: None,
            handle: None,
        }
    }

    /// A device whose `open` always fails.
    pub fn failing() -> Self {
        let mut device = Self::new(Vec::new(), 64);
        device.fail_open = true;
        device
    }
}

#[cfg(test)]
impl AudioDeviceSource for ScriptedDevice {
    fn open(&mut self, pool: Arc<Mutex<BufferPool>>) -> Result<(), DeviceError> {
        use std::sync::atomic::{AtomicBool, Ordering};

        if self.fail_open {
            return Err(DeviceError::NoDevice);
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let script = self.script.clone();
        let piece = self.piece_bytes;
        let interval = self.interval;

        self.stop_flag = Some(stop);
        self.handle = Some(std::thread::spawn(move || {
            let mut offset = 0usize;
            while !stop_thread.load(Ordering::SeqCst) {
                let bytes: Vec<u8> = if offset < script.len() {
                    let end = (offset + piece).min(script.len());
                    let out = script[offset..end].to_vec();
                    offset = end;
                    out
                } else {
                    vec![0u8; piece] // endless silence after the script
                };
                if let Ok(mut pool) = pool.lock() {
                    pool.write(&bytes);
                }
                std::thread::sleep(interval);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        use std::sync::atomic::Ordering;

        if let Some(flag) = self.stop_flag.take() {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
