//! Websocket implementation of [`TranscriptionChannel`].
//!
//! Audio goes out as binary frames; the recognizer answers with one-line
//! JSON text frames (`{"text": "...", "is_final": bool}`).  A spawned
//! receive task parses frames into [`ChannelEvent`]s; whatever ends the
//! read side (server close, network error, local close) is terminated by a
//! single `Disconnected` event.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{streaming_url, ChannelError, ChannelEvent, Transcript, TranscriptionChannel};

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    Message,
>;
type WsSource = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Queue depth for decoded events; the reconciler consumes far faster than
/// the recognizer produces.
const EVENT_QUEUE: usize = 64;

// ---------------------------------------------------------------------------
// Wire frames
// ---------------------------------------------------------------------------

/// Incoming transcript frame.
#[derive(Debug, Deserialize)]
struct TranscriptFrame {
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_final: bool,
}

/// End-of-input marker sent by `stop`.
const END_OF_STREAM_FRAME: &str = r#"{"type":"end_of_stream"}"#;

// ---------------------------------------------------------------------------
// WsTranscriptionChannel
// ---------------------------------------------------------------------------

/// Persistent websocket channel to the recognizer.
pub struct WsTranscriptionChannel {
    endpoint: String,
    sink: Option<WsSink>,
    recv_task: Option<tokio::task::JoinHandle<()>>,
}

impl WsTranscriptionChannel {
    /// `endpoint` is the recognizer's batch URL; the streaming URL is
    /// derived on connect.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            sink: None,
            recv_task: None,
        }
    }

    async fn receive_loop(mut source: WsSource, events: mpsc::Sender<ChannelEvent>) {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(raw)) => {
                    match serde_json::from_str::<TranscriptFrame>(raw.as_str()) {
                        Ok(frame) => {
                            let transcript = Transcript {
                                text: frame.text,
                                is_final: frame.is_final,
                            };
                            if events
                                .send(ChannelEvent::Transcript(transcript))
                                .await
                                .is_err()
                            {
                                return; // session torn down
                            }
                        }
                        Err(e) => {
                            log::warn!("channel: unparseable frame skipped: {e}");
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong/binary from the server: ignored
                Err(e) => {
                    log::warn!("channel: read error: {e}");
                    let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                    break;
                }
            }
        }
        let _ = events.send(ChannelEvent::Disconnected).await;
    }
}

#[async_trait::async_trait]
impl TranscriptionChannel for WsTranscriptionChannel {
    async fn connect(&mut self) -> Result<mpsc::Receiver<ChannelEvent>, ChannelError> {
        let url = streaming_url(&self.endpoint)?;
        log::debug!("channel: connecting to {url}");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (sink, source) = stream.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        self.sink = Some(sink);
        self.recv_task = Some(tokio::spawn(Self::receive_loop(source, event_tx)));

        log::info!("channel: connected");
        Ok(event_rx)
    }

    async fn send_audio(&mut self, bytes: Vec<u8>) -> Result<(), ChannelError> {
        let sink = self.sink.as_mut().ok_or(ChannelError::NotConnected)?;
        sink.send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn stop(&mut self) -> Result<(), ChannelError> {
        let sink = self.sink.as_mut().ok_or(ChannelError::NotConnected)?;
        log::debug!("channel: signalling end of input");
        sink.send(Message::Text(END_OF_STREAM_FRAME.to_string().into()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        if let Some(task) = self.recv_task.take() {
            // The read side ends on close; abort covers a hung peer.
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    // ---- frame parsing -----------------------------------------------------

    #[test]
    fn transcript_frame_parses_both_fields() {
        let frame: TranscriptFrame =
            serde_json::from_str(r#"{"text":"hello","is_final":true}"#).unwrap();
        assert_eq!(frame.text, "hello");
        assert!(frame.is_final);
    }

    #[test]
    fn transcript_frame_defaults_missing_fields() {
        let frame: TranscriptFrame = serde_json::from_str(r#"{"text":"partial"}"#).unwrap();
        assert!(!frame.is_final);
        let frame: TranscriptFrame = serde_json::from_str("{}").unwrap();
        assert_eq!(frame.text, "");
    }

    // ---- loopback ----------------------------------------------------------

    /// In-process recognizer stand-in: echoes a hypothesis per audio frame
    /// and a final transcript after end-of-input.
    async fn spawn_echo_recognizer() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Binary(audio) => {
                        let reply = format!(
                            r#"{{"text":"heard {} bytes","is_final":false}}"#,
                            audio.len()
                        );
                        ws.send(Message::Text(reply.into())).await.unwrap();
                    }
                    Message::Text(_) => {
                        // End-of-input: final transcript, then close.
                        ws.send(Message::Text(
                            r#"{"text":"final transcript","is_final":true}"#.to_string().into(),
                        ))
                        .await
                        .unwrap();
                        let _ = ws.close(None).await;
                        break;
                    }
                    _ => {}
                }
            }
        });

        (addr, task)
    }

    #[tokio::test]
    async fn round_trip_audio_stop_final_disconnect() {
        let (addr, server) = spawn_echo_recognizer().await;
        let mut channel = WsTranscriptionChannel::new(format!("http://{addr}/api/transcribe"));

        let mut events = channel.connect().await.expect("connect");

        channel.send_audio(vec![0u8; 320]).await.expect("send");
        let ev = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        match ev {
            ChannelEvent::Transcript(t) => {
                assert_eq!(t.text, "heard 320 bytes");
                assert!(!t.is_final);
            }
            other => panic!("expected transcript, got {other:?}"),
        }

        channel.stop().await.expect("stop");
        let ev = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        match ev {
            ChannelEvent::Transcript(t) => {
                assert_eq!(t.text, "final transcript");
                assert!(t.is_final);
            }
            other => panic!("expected final transcript, got {other:?}"),
        }

        // Server closed after the final: the channel reports disconnection.
        let ev = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(ev, ChannelEvent::Disconnected));

        channel.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn abrupt_server_close_yields_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws); // vanish without a close handshake
        });

        let mut channel = WsTranscriptionChannel::new(format!("http://{addr}/api"));
        let mut events = channel.connect().await.expect("connect");
        server.await.unwrap();

        // Either an error-then-disconnected or a bare disconnected is fine;
        // the terminal event must be Disconnected.
        let mut last = None;
        while let Ok(Some(ev)) = timeout(WAIT, events.recv()).await {
            last = Some(ev);
        }
        assert!(matches!(last, Some(ChannelEvent::Disconnected)));

        channel.close().await;
    }

    #[tokio::test]
    async fn operations_before_connect_are_rejected() {
        let mut channel = WsTranscriptionChannel::new("http://localhost:1/api");
        assert!(matches!(
            channel.send_audio(vec![0u8; 4]).await,
            Err(ChannelError::NotConnected)
        ));
        assert!(matches!(
            channel.stop().await,
            Err(ChannelError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_connect_error() {
        // Port 1 is never listening.
        let mut channel = WsTranscriptionChannel::new("http://127.0.0.1:1/api");
        assert!(matches!(
            channel.connect().await,
            Err(ChannelError::Connect(_))
        ));
    }
}
