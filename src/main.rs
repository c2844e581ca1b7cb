//! Application entry point.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`DictationConfig`] from disk (default on first run) and
//!    normalize it.
//! 3. Create the tokio runtime (multi-thread, 2 workers).
//! 4. Build the production collaborators: cpal device source, websocket
//!    transcription channel, clipboard/keystroke emitter.
//! 5. Spawn the [`DictationController`] and a notification logger.
//! 6. Read stdin: Enter toggles dictation, `q` quits.  (Global hotkeys and
//!    the tray UI live in the embedding application, which sends the same
//!    [`ControlEvent`]s.)

use std::sync::Arc;

use tokio::sync::mpsc;

use dictate::audio::{AudioDeviceSource, CpalDeviceSource};
use dictate::channel::{TranscriptionChannel, WsTranscriptionChannel};
use dictate::config::DictationConfig;
use dictate::session::{
    ChannelFactory, ControlEvent, DeviceFactory, DictationController, SessionNotification,
};
use dictate::text::{ClipboardEmitter, TextEmitter};
use dictate::window::{FixedWindowTracker, WindowHandle, WindowTracker};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("dictate starting up");

    // 2. Configuration
    let config = DictationConfig::load()
        .unwrap_or_else(|e| {
            log::warn!("failed to load config ({e}); using defaults");
            DictationConfig::default()
        })
        .normalized();

    // 3. Runtime (2 workers: session task + channel receive task)
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let (control_tx, control_rx) = mpsc::channel::<ControlEvent>(16);
        let (notify_tx, mut notify_rx) = mpsc::channel::<SessionNotification>(16);

        // 4. Production collaborators
        let endpoint = config.recognizer.endpoint.clone();
        let channels: Arc<dyn ChannelFactory> = Arc::new(move || {
            Box::new(WsTranscriptionChannel::new(endpoint.clone()))
                as Box<dyn TranscriptionChannel>
        });

        let preferred = config.audio.preferred_device;
        let devices: Arc<dyn DeviceFactory> = Arc::new(move || {
            Box::new(CpalDeviceSource::new(preferred)) as Box<dyn AudioDeviceSource>
        });

        let emitter: Arc<dyn TextEmitter> = Arc::new(ClipboardEmitter::new());

        // The platform foreground-window tracker is wired by the embedding
        // application; the fixed tracker leaves the focus gate open.
        let windows: Arc<dyn WindowTracker> =
            Arc::new(FixedWindowTracker::new(WindowHandle::new(0)));

        // 5. Controller + notification logger
        let controller =
            DictationController::new(config, channels, devices, emitter, windows, notify_tx);
        let controller_task = tokio::spawn(controller.run(control_rx));

        tokio::spawn(async move {
            while let Some(notification) = notify_rx.recv().await {
                match notification {
                    SessionNotification::Started => log::info!("dictation started"),
                    SessionNotification::Stopped { transcript, stats } => log::info!(
                        "dictation stopped after {} ms ({} bytes): {transcript:?}",
                        stats.duration_ms,
                        stats.bytes_recorded
                    ),
                    SessionNotification::TooShort => {
                        log::warn!("recording too short, nothing transcribed")
                    }
                    SessionNotification::Error(message) => log::error!("{message}"),
                }
            }
        });

        // 6. Stdin control loop on its own thread (read_line blocks).
        println!("dictate ready: Enter toggles dictation, q quits");
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                let read = stdin.read_line(&mut line).unwrap_or(0);
                if read == 0 || line.trim().eq_ignore_ascii_case("q") {
                    break;
                }
                if control_tx.blocking_send(ControlEvent::Toggle).is_err() {
                    return;
                }
            }
            let _ = control_tx.blocking_send(ControlEvent::Shutdown);
        });

        let _ = controller_task.await;
        Ok::<(), anyhow::Error>(())
    })?;

    log::info!("dictate exited");
    Ok(())
}
