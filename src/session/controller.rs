//! Session orchestrator — wires capture → channel → reconciler and drives
//! the lifecycle state machine.
//!
//! [`DictationController::run`] consumes [`ControlEvent`]s from a
//! `tokio::sync::mpsc` channel (the hotkey/tray layer lives outside this
//! crate and only ever sends toggles).
//!
//! # Session flow
//!
//! ```text
//! Toggle (Idle)
//!   └─▶ Starting: connect channel → open device → capture target window
//!         └─▶ Streaming: select! over
//!               capture events ──▶ batch ──▶ channel.send_audio
//!               channel events ──▶ reconciler (single-flight gate)
//!               stop requests
//!         └─▶ Stopping: cancel capture → drain tail → flush batcher
//!               → channel.stop() → bounded wait for final transcript
//!         └─▶ teardown (exactly once): close receivers, dispose channel,
//!               flush un-reconciled text, reset state, publish Idle,
//!               one terminal notification
//! ```
//!
//! Errors and disconnects during Streaming funnel through the same Stopping
//! path as a user-initiated stop, so there is a single teardown code path
//! regardless of trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::audio::{AudioDeviceSource, CaptureEvent, CaptureLoop, RecordingStats};
use crate::channel::{AudioBatcher, ChannelEvent, TranscriptionChannel};
use crate::config::DictationConfig;
use crate::text::{TextEmitter, TextReconciler};
use crate::window::WindowTracker;

use super::state::{SessionState, StateCell};

/// Queue depth for capture events; sized for several seconds of buffers so
/// the capture loop never stalls on a briefly busy event task.
const CAPTURE_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// ControlEvent / SessionNotification
// ---------------------------------------------------------------------------

/// Commands accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Start when idle, stop when streaming, otherwise a logged no-op.
    Toggle,
    /// Stop any active session and exit the control loop.
    Shutdown,
}

/// User-facing session outcomes.  Exactly one terminal notification
/// (`Stopped`, `TooShort` or `Error`) is raised per session.
#[derive(Debug, Clone)]
pub enum SessionNotification {
    /// The session reached Streaming; dictation is live.
    Started,
    /// Normal end of session.
    Stopped {
        transcript: String,
        stats: RecordingStats,
    },
    /// The recording was shorter than the configured minimum; nothing was
    /// sent to the recognizer and no transcript exists.
    TooShort,
    /// The session ended abnormally (or never started).
    Error(String),
}

// ---------------------------------------------------------------------------
// Collaborator factories
// ---------------------------------------------------------------------------

/// Creates one [`TranscriptionChannel`] per session.
pub trait ChannelFactory: Send + Sync {
    fn create(&self) -> Box<dyn TranscriptionChannel>;
}

impl<F> ChannelFactory for F
where
    F: Fn() -> Box<dyn TranscriptionChannel> + Send + Sync,
{
    fn create(&self) -> Box<dyn TranscriptionChannel> {
        self()
    }
}

/// Creates one [`AudioDeviceSource`] per session.
pub trait DeviceFactory: Send + Sync {
    fn create(&self) -> Box<dyn AudioDeviceSource>;
}

impl<F> DeviceFactory for F
where
    F: Fn() -> Box<dyn AudioDeviceSource> + Send + Sync,
{
    fn create(&self) -> Box<dyn AudioDeviceSource> {
        self()
    }
}

// ---------------------------------------------------------------------------
// DictationController
// ---------------------------------------------------------------------------

/// Top-level orchestrator.  Owns the state machine; at most one session is
/// active at a time.
pub struct DictationController {
    config: DictationConfig,
    state: Arc<StateCell>,
    channels: Arc<dyn ChannelFactory>,
    devices: Arc<dyn DeviceFactory>,
    emitter: Arc<dyn TextEmitter>,
    windows: Arc<dyn WindowTracker>,
    notify: mpsc::Sender<SessionNotification>,
    session: Option<SessionHandle>,
}

struct SessionHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl DictationController {
    pub fn new(
        config: DictationConfig,
        channels: Arc<dyn ChannelFactory>,
        devices: Arc<dyn DeviceFactory>,
        emitter: Arc<dyn TextEmitter>,
        windows: Arc<dyn WindowTracker>,
        notify: mpsc::Sender<SessionNotification>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(StateCell::new()),
            channels,
            devices,
            emitter,
            windows,
            notify,
            session: None,
        }
    }

    /// Shared view of the session state (status displays, tests).
    pub fn state_handle(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    /// Run until the control channel closes or `Shutdown` arrives.
    pub async fn run(mut self, mut control_rx: mpsc::Receiver<ControlEvent>) {
        while let Some(event) = control_rx.recv().await {
            match event {
                ControlEvent::Toggle => self.handle_toggle().await,
                ControlEvent::Shutdown => break,
            }
        }
        self.stop_active_session().await;
        log::info!("controller: shut down");
    }

    async fn handle_toggle(&mut self) {
        match self.state.get() {
            SessionState::Idle => self.start_session().await,
            SessionState::Streaming => {
                log::info!("controller: stop requested");
                if let Some(session) = &self.session {
                    // try_send: a stop already queued means stopping is
                    // underway, and the control loop must never block on a
                    // session that has moved past its event loop.
                    let _ = session.stop_tx.try_send(());
                }
            }
            other => {
                // Rapid toggling during a transition must not change state.
                log::debug!("controller: toggle ignored while {}", other.label());
            }
        }
    }

    async fn start_session(&mut self) {
        if !self.state.transition(SessionState::Idle, SessionState::Starting) {
            return;
        }
        log::info!("controller: start requested");

        // Reap the previous session task, if any (it has already finished,
        // since the state was Idle).
        if let Some(old) = self.session.take() {
            let _ = old.task.await;
        }

        let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_QUEUE);
        let capture = CaptureLoop::new(
            &self.config.audio,
            &self.config.vad,
            self.devices.create(),
            capture_tx,
        );

        let paste_threshold = if self.config.emit.auto_paste {
            self.config.emit.paste_threshold_chars
        } else {
            usize::MAX // never paste: type everything
        };

        let session = SessionTask {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            channel: self.channels.create(),
            capture: Some(capture),
            capture_rx,
            emitter: Arc::clone(&self.emitter),
            windows: Arc::clone(&self.windows),
            notify: self.notify.clone(),
            reconciler: AsyncMutex::new(TextReconciler::new(paste_threshold)),
            teardown_done: AtomicBool::new(false),
        };

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(session.run(stop_rx));
        self.session = Some(SessionHandle { stop_tx, task });
    }

    async fn stop_active_session(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.stop_tx.try_send(());
            let _ = session.task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// SessionTask
// ---------------------------------------------------------------------------

/// What ended the Streaming phase.
#[derive(Debug)]
enum StopTrigger {
    User,
    SilenceDetected,
    NoSpeechTimeout,
    /// The capture loop finished on its own (max duration).
    CaptureEnded,
    ChannelFailed(String),
    Disconnected,
}

impl StopTrigger {
    fn label(&self) -> &'static str {
        match self {
            StopTrigger::User => "user toggle",
            StopTrigger::SilenceDetected => "silence detected",
            StopTrigger::NoSpeechTimeout => "no speech observed",
            StopTrigger::CaptureEnded => "capture ended",
            StopTrigger::ChannelFailed(_) => "channel error",
            StopTrigger::Disconnected => "channel disconnected",
        }
    }
}

/// Terminal outcome reported by teardown.
enum Outcome {
    Stopped,
    TooShort,
    Error(String),
}

/// One dictation session, from Starting through teardown.
struct SessionTask {
    config: DictationConfig,
    state: Arc<StateCell>,
    channel: Box<dyn TranscriptionChannel>,
    capture: Option<CaptureLoop>,
    capture_rx: mpsc::Receiver<CaptureEvent>,
    emitter: Arc<dyn TextEmitter>,
    windows: Arc<dyn WindowTracker>,
    notify: mpsc::Sender<SessionNotification>,
    /// Single-flight gate: serializes hypothesis application and the
    /// teardown flush.  Never held across channel/capture awaits.
    reconciler: AsyncMutex<TextReconciler>,
    /// Idempotency guard; a second teardown attempt is a no-op.
    teardown_done: AtomicBool,
}

impl SessionTask {
    async fn run(mut self, mut stop_rx: mpsc::Receiver<()>) {
        // ── Starting ─────────────────────────────────────────────────────
        let mut channel_rx = match self.channel.connect().await {
            Ok(rx) => rx,
            Err(e) => {
                self.fail_start(format!("could not reach the recognizer: {e}"))
                    .await;
                return;
            }
        };

        let Some(mut capture) = self.capture.take() else {
            return;
        };
        if let Err(e) = capture.open() {
            self.channel.close().await;
            self.fail_start(format!("could not open the microphone: {e}"))
                .await;
            return;
        }

        // The window focused now is the only one destructive edits may
        // touch for the rest of the session.
        let target = self.windows.foreground_window();
        self.reconciler.lock().await.begin_session(target);

        if !self
            .state
            .transition(SessionState::Starting, SessionState::Streaming)
        {
            // State was forced elsewhere; dispose quietly.
            capture.cancel_handle().store(true, Ordering::SeqCst);
            self.channel.close().await;
            return;
        }

        let cancel = capture.cancel_handle();
        let capture_task = tokio::spawn(capture.run());
        let _ = self.notify.send(SessionNotification::Started).await;
        log::info!("session: streaming");

        // ── Streaming ────────────────────────────────────────────────────
        let mut batcher = AudioBatcher::for_window(
            self.config.recognizer.aggregate_ms,
            self.config.audio.sample_rate,
        );

        // Resolve the wake reason first, then act on it with `self` free of
        // branch borrows.
        enum Wake {
            StopRequest,
            Capture(Option<CaptureEvent>),
            Channel(Option<ChannelEvent>),
        }

        let trigger = loop {
            let wake = tokio::select! {
                _ = stop_rx.recv() => Wake::StopRequest,
                event = self.capture_rx.recv() => Wake::Capture(event),
                event = channel_rx.recv() => Wake::Channel(event),
            };

            match wake {
                Wake::StopRequest => break StopTrigger::User,

                Wake::Capture(Some(CaptureEvent::Chunk(chunk))) => {
                    if self.state.get() != SessionState::Streaming {
                        continue; // late buffer after a forced transition
                    }
                    if let Some(batch) = batcher.push(&chunk.bytes) {
                        if let Err(e) = self.channel.send_audio(batch).await {
                            break StopTrigger::ChannelFailed(e.to_string());
                        }
                    }
                }
                Wake::Capture(Some(CaptureEvent::SilenceDetected)) => {
                    break StopTrigger::SilenceDetected
                }
                Wake::Capture(Some(CaptureEvent::NoSpeechTimeout)) => {
                    break StopTrigger::NoSpeechTimeout
                }
                Wake::Capture(None) => break StopTrigger::CaptureEnded,

                Wake::Channel(Some(ChannelEvent::Transcript(t))) => {
                    self.reconcile(&t.text, t.is_final).await;
                }
                Wake::Channel(Some(ChannelEvent::Error(message))) => {
                    break StopTrigger::ChannelFailed(message)
                }
                Wake::Channel(Some(ChannelEvent::Disconnected)) | Wake::Channel(None) => {
                    break StopTrigger::Disconnected
                }
            }
        };

        // ── Stopping ─────────────────────────────────────────────────────
        self.state
            .transition(SessionState::Streaming, SessionState::Stopping);
        log::info!("session: stopping ({})", trigger.label());

        // Cancel routes the capture loop through its normal drain path.
        cancel.store(true, Ordering::SeqCst);

        let mut channel_ok = !matches!(
            trigger,
            StopTrigger::ChannelFailed(_) | StopTrigger::Disconnected
        );

        // Consume the capture tail so buffered-but-unsent audio reaches the
        // recognizer.  Ends when the capture task drops its sender.
        while let Some(event) = self.capture_rx.recv().await {
            if let CaptureEvent::Chunk(chunk) = event {
                if channel_ok {
                    if let Some(batch) = batcher.push(&chunk.bytes) {
                        if let Err(e) = self.channel.send_audio(batch).await {
                            log::warn!("session: tail send failed: {e}");
                            channel_ok = false;
                        }
                    }
                }
            }
        }

        let stats = match capture_task.await {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("session: capture task failed: {e}");
                RecordingStats::default()
            }
        };

        // A recording shorter than the minimum never produced a send (the
        // batcher holds less than one aggregate window): abandon it before
        // asking the recognizer for anything.
        let min_ms = u64::from(self.config.audio.min_recording_ms);
        if stats.duration_ms < min_ms && batcher.dispatched_bytes() == 0 {
            log::info!(
                "session: recording too short ({} ms < {} ms), abandoning",
                stats.duration_ms,
                min_ms
            );
            self.teardown(channel_rx, Outcome::TooShort, stats).await;
            return;
        }

        if channel_ok {
            if let Some(rest) = batcher.flush() {
                if let Err(e) = self.channel.send_audio(rest).await {
                    log::warn!("session: final audio flush failed: {e}");
                }
            }
            if let Err(e) = self.channel.stop().await {
                log::warn!("session: end-of-input signal failed: {e}");
            }
            self.await_final_transcript(&mut channel_rx).await;
        }

        let outcome = match trigger {
            StopTrigger::ChannelFailed(message) => {
                Outcome::Error(format!("recognizer error: {message}"))
            }
            StopTrigger::Disconnected => {
                Outcome::Error("recognizer disconnected unexpectedly".into())
            }
            _ => Outcome::Stopped,
        };
        self.teardown(channel_rx, outcome, stats).await;
    }

    /// A fatal error during Starting: one notification, back to Idle.
    /// Streaming was never published, so there is nothing to tear down.
    async fn fail_start(&mut self, message: String) {
        log::error!("session: {message}");
        self.state
            .transition(SessionState::Starting, SessionState::Idle);
        let _ = self.notify.send(SessionNotification::Error(message)).await;
    }

    /// Apply one hypothesis under the single-flight gate.  Emission
    /// problems are logged and the hypothesis skipped.
    async fn reconcile(&self, text: &str, is_final: bool) {
        let mut reconciler = self.reconciler.lock().await;
        if let Err(e) = reconciler.apply(text, is_final, self.emitter.as_ref(), self.windows.as_ref())
        {
            log::warn!("session: emission failed, hypothesis skipped: {e}");
        }
    }

    /// Bounded wait for the recognizer's last word after end-of-input.
    /// Transcripts arriving during the wait are still reconciled; a
    /// disconnect here is expected and absorbed.
    async fn await_final_transcript(&mut self, events: &mut mpsc::Receiver<ChannelEvent>) {
        let wait = Duration::from_secs(u64::from(self.config.recognizer.stop_flush_timeout_secs));
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(ChannelEvent::Transcript(t))) => {
                    let is_final = t.is_final;
                    self.reconcile(&t.text, is_final).await;
                    if is_final {
                        log::debug!("session: final transcript received");
                        return;
                    }
                }
                Ok(Some(ChannelEvent::Error(message))) => {
                    log::warn!("session: channel error while stopping: {message}");
                }
                Ok(Some(ChannelEvent::Disconnected)) | Ok(None) => {
                    log::debug!("session: channel closed while stopping");
                    return;
                }
                Err(_) => {
                    log::warn!("session: timed out waiting for the final transcript");
                    return;
                }
            }
        }
    }

    /// Dispose of everything exactly once and publish Idle.
    async fn teardown(
        &mut self,
        channel_rx: mpsc::Receiver<ChannelEvent>,
        outcome: Outcome,
        stats: RecordingStats,
    ) {
        if self.teardown_done.swap(true, Ordering::SeqCst) {
            log::debug!("session: teardown already ran");
            return;
        }

        // Unsubscribe before disposing: once the receivers are gone, no
        // late event can touch disposed state.
        drop(channel_rx);
        self.capture_rx.close();
        self.channel.close().await;

        // Flush whatever hypothesis text never made it to the screen, then
        // reset the emission state.  Same gate as live reconciliation.
        let transcript = {
            let mut reconciler = self.reconciler.lock().await;
            if let Err(e) = reconciler.flush(self.emitter.as_ref()) {
                log::warn!("session: teardown flush failed: {e}");
            }
            reconciler.take_transcript()
        };

        self.state
            .transition(SessionState::Stopping, SessionState::Idle);

        let notification = match outcome {
            Outcome::Stopped => SessionNotification::Stopped { transcript, stats },
            Outcome::TooShort => SessionNotification::TooShort,
            Outcome::Error(message) => SessionNotification::Error(message),
        };
        let _ = self.notify.send(notification).await;
        log::info!("session: idle");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
