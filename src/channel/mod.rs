//! Streaming connection to the remote speech recognizer.
//!
//! The recognizer exposes a batch HTTP endpoint; its streaming interface
//! lives at the same host behind a websocket, reached by rewriting the
//! scheme (`http→ws`, `https→wss`) and appending a `stream` path segment
//! ([`streaming_url`]).  Everything beyond connect / send-bytes /
//! receive-transcript / close is opaque to this crate.
//!
//! Inference latency exceeds round-trip time: after signalling end-of-input
//! with [`TranscriptionChannel::stop`], callers wait a bounded time for a
//! final transcript or a disconnect before tearing down.
//!
//! Senders must aggregate capture buffers into larger messages (reference
//! ≥500 ms) to bound message rate; [`AudioBatcher`] does the bookkeeping.

pub mod ws;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use ws::WsTranscriptionChannel;

// ---------------------------------------------------------------------------
// Transcript / ChannelEvent
// ---------------------------------------------------------------------------

/// One recognizer hypothesis: server-authoritative cumulative text.
///
/// Each newer hypothesis supersedes the previous one; a final hypothesis
/// closes the current segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

/// Events delivered by the channel's receive side.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Transcript(Transcript),
    /// The connection failed mid-stream; a `Disconnected` follows.
    Error(String),
    /// The connection is gone (server close, network drop, or after stop).
    Disconnected,
}

// ---------------------------------------------------------------------------
// ChannelError
// ---------------------------------------------------------------------------

/// Errors raised by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The configured endpoint is not an http(s) URL.
    #[error("recognizer endpoint is not an http(s) URL: {0}")]
    InvalidEndpoint(String),

    #[error("failed to connect to recognizer: {0}")]
    Connect(String),

    #[error("failed to send to recognizer: {0}")]
    Send(String),

    /// An operation was attempted before `connect` succeeded.
    #[error("channel is not connected")]
    NotConnected,
}

// ---------------------------------------------------------------------------
// TranscriptionChannel
// ---------------------------------------------------------------------------

/// Persistent bidirectional connection to the recognizer.
///
/// Implementations must be `Send` so a session task can own one; events
/// arrive on the receiver returned by `connect` and may be concurrent with
/// audio submission.
#[async_trait]
pub trait TranscriptionChannel: Send + Sync {
    /// Open the connection and return the event stream.
    async fn connect(&mut self) -> Result<mpsc::Receiver<ChannelEvent>, ChannelError>;

    /// Transmit one aggregated audio message, in capture order.
    async fn send_audio(&mut self, bytes: Vec<u8>) -> Result<(), ChannelError>;

    /// Signal end-of-input.  The connection stays up so the recognizer can
    /// deliver its final transcript.
    async fn stop(&mut self) -> Result<(), ChannelError>;

    /// Dispose of the connection.  Idempotent.
    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// streaming_url
// ---------------------------------------------------------------------------

/// Derive the websocket streaming URL from the batch endpoint.
pub fn streaming_url(endpoint: &str) -> Result<String, ChannelError> {
    let rewritten = if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ChannelError::InvalidEndpoint(endpoint.to_string()));
    };
    Ok(format!("{}/stream", rewritten.trim_end_matches('/')))
}

// ---------------------------------------------------------------------------
// AudioBatcher
// ---------------------------------------------------------------------------

/// Aggregates capture buffers into recognizer-sized messages.
///
/// [`push`](Self::push) returns a batch once at least `min_bytes` have
/// accumulated; [`flush`](Self::flush) hands back whatever remains for the
/// stop path.
pub struct AudioBatcher {
    pending: Vec<u8>,
    min_bytes: usize,
    dispatched_bytes: u64,
}

impl AudioBatcher {
    pub fn new(min_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            min_bytes: min_bytes.max(1),
            dispatched_bytes: 0,
        }
    }

    /// Batcher sized for `aggregate_ms` of 16-bit mono PCM at `sample_rate`.
    pub fn for_window(aggregate_ms: u32, sample_rate: u32) -> Self {
        let min_bytes = (sample_rate as usize * 2 * aggregate_ms as usize) / 1000;
        Self::new(min_bytes)
    }

    /// Add a capture buffer; returns a full batch when the threshold is met.
    pub fn push(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() >= self.min_bytes {
            let batch = std::mem::take(&mut self.pending);
            self.dispatched_bytes += batch.len() as u64;
            Some(batch)
        } else {
            None
        }
    }

    /// Take any buffered remainder (stop path).
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        self.dispatched_bytes += batch.len() as u64;
        Some(batch)
    }

    /// Total bytes handed out so far; zero means nothing was ever sent.
    pub fn dispatched_bytes(&self) -> u64 {
        self.dispatched_bytes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
