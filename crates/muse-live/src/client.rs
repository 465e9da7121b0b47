//! Streaming session client: owns the bidirectional connection.
//!
//! `open` returns a handle immediately while the connection establishes in
//! the background. Outbound media enqueued before the server acknowledges
//! setup stays buffered and is flushed in submission order once it does —
//! never dropped, never reordered. Inbound messages are demultiplexed into
//! [`LiveEvent`]s; unknown kinds are ignored, malformed ones are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::SessionOptions;
use crate::error::{LiveError, LiveResult};
use crate::wire::{MediaBlob, RealtimeInputEnvelope, ServerMessage, SetupEnvelope};

/// Inbound server events, one per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Synthesized audio chunk (base64 PCM) with its receipt-order sequence
    /// number.
    AudioDelta { data: String, seq: u64 },
    /// The user started speaking over an in-progress response.
    Interrupted,
    /// Transcript delta of the user's speech.
    InputTranscript(String),
    /// Transcript delta of the model's speech.
    OutputTranscript(String),
    /// Server or transport error.
    Error(String),
    /// The connection ended.
    Closed,
}

/// Handle to the bidirectional live connection.
#[derive(Clone)]
pub struct LiveClient {
    outbound_tx: mpsc::Sender<MediaBlob>,
    ready_rx: watch::Receiver<bool>,
    closed: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
    conn_error: Arc<Mutex<Option<String>>>,
}

impl LiveClient {
    /// Start establishing the connection and return a pending handle plus
    /// the inbound event stream.
    pub fn open(api_key: String, options: &SessionOptions) -> (Self, mpsc::Receiver<LiveEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(64);
        let closed = Arc::new(AtomicBool::new(false));
        let close_notify = Arc::new(Notify::new());
        let conn_error = Arc::new(Mutex::new(None));

        let setup = SetupEnvelope::from_options(options);
        let url = format!("{}?key={}", options.endpoint, api_key);

        let client = Self {
            outbound_tx,
            ready_rx,
            closed: closed.clone(),
            close_notify: close_notify.clone(),
            conn_error: conn_error.clone(),
        };

        tokio::spawn(run_connection(
            url,
            setup,
            ready_tx,
            outbound_rx,
            event_tx,
            closed,
            close_notify,
            conn_error,
        ));

        (client, event_rx)
    }

    /// Enqueue outbound media. Ordering between calls from the same producer
    /// is preserved; chunks enqueued before the connection is ready are
    /// buffered until it is.
    pub async fn send(&self, blob: MediaBlob) -> LiveResult<()> {
        self.outbound_tx
            .send(blob)
            .await
            .map_err(|_| LiveError::ChannelClosed("outbound queue closed".into()))
    }

    /// Direct handle to the outbound queue for timer-driven producers.
    pub fn media_sender(&self) -> mpsc::Sender<MediaBlob> {
        self.outbound_tx.clone()
    }

    /// Wait until the server has acknowledged setup. Errors if the
    /// connection dies (or is closed) first.
    pub async fn ready(&self) -> LiveResult<()> {
        let mut rx = self.ready_rx.clone();
        loop {
            if *rx.borrow() {
                return Ok(());
            }
            if self.closed.load(Ordering::SeqCst) || rx.changed().await.is_err() {
                let detail = self
                    .conn_error
                    .lock()
                    .ok()
                    .and_then(|slot| slot.clone())
                    .unwrap_or_else(|| "connection closed before setup completed".to_string());
                return Err(LiveError::ConnectionFailed(detail));
            }
        }
    }

    /// Close the connection. Idempotent; safe to call before the connection
    /// is ready and after the transport already died.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_notify.notify_one();
            info!("live connection close requested");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_connection(
    url: String,
    setup: SetupEnvelope,
    ready_tx: watch::Sender<bool>,
    outbound_rx: mpsc::Receiver<MediaBlob>,
    event_tx: mpsc::Sender<LiveEvent>,
    closed: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
    conn_error: Arc<Mutex<Option<String>>>,
) {
    let ws = tokio::select! {
        _ = close_notify.notified() => {
            debug!("closed before the connection was established");
            return;
        }
        result = connect_async(url.as_str()) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!("live connection failed: {e}");
                if let Ok(mut slot) = conn_error.lock() {
                    *slot = Some(e.to_string());
                }
                closed.store(true, Ordering::SeqCst);
                let _ = event_tx.send(LiveEvent::Error(e.to_string())).await;
                return;
            }
        },
    };
    debug!("transport connected; sending setup");

    let (ws_sink, ws_stream) = ws.split();
    let ready_watch = ready_tx.subscribe();
    let reader = tokio::spawn(run_reader(ws_stream, ready_tx, event_tx));

    let exit = run_writer(ws_sink, setup, ready_watch, outbound_rx, close_notify).await;
    match exit {
        WriterExit::LocalClose | WriterExit::QueueClosed => {
            closed.store(true, Ordering::SeqCst);
            reader.abort();
        }
        WriterExit::Transport => {
            // Let the reader drain the death of the stream so the session
            // observes the close event.
            closed.store(true, Ordering::SeqCst);
            let _ = reader.await;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum WriterExit {
    LocalClose,
    QueueClosed,
    Transport,
}

/// Outbound half: setup first, then hold every queued chunk until the
/// server acknowledges setup, then drain in submission order.
async fn run_writer<S>(
    mut sink: S,
    setup: SetupEnvelope,
    mut ready: watch::Receiver<bool>,
    mut outbound: mpsc::Receiver<MediaBlob>,
    close_notify: Arc<Notify>,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let setup_json = match serde_json::to_string(&setup) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to serialize setup: {e}");
            return WriterExit::Transport;
        }
    };
    if let Err(e) = sink.send(Message::Text(setup_json)).await {
        warn!("failed to send setup: {e}");
        return WriterExit::Transport;
    }

    while !*ready.borrow_and_update() {
        tokio::select! {
            _ = close_notify.notified() => {
                let _ = sink.send(Message::Close(None)).await;
                return WriterExit::LocalClose;
            }
            changed = ready.changed() => {
                if changed.is_err() {
                    return WriterExit::Transport;
                }
            }
        }
    }
    debug!("setup acknowledged; draining outbound queue");

    loop {
        tokio::select! {
            _ = close_notify.notified() => {
                let _ = sink.send(Message::Close(None)).await;
                return WriterExit::LocalClose;
            }
            blob = outbound.recv() => match blob {
                Some(blob) => {
                    let envelope = RealtimeInputEnvelope::single(blob);
                    let json = match serde_json::to_string(&envelope) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("failed to serialize media chunk: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        warn!("outbound send failed: {e}");
                        return WriterExit::Transport;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return WriterExit::QueueClosed;
                }
            }
        }
    }
}

/// Inbound half: parse each frame and dispatch exactly one handler per
/// event kind.
async fn run_reader<S>(
    mut stream: S,
    ready_tx: watch::Sender<bool>,
    event_tx: mpsc::Sender<LiveEvent>,
) where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut seq = 0u64;
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatch_server_message(&text, &mut seq, &ready_tx, &event_tx).await;
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => dispatch_server_message(&text, &mut seq, &ready_tx, &event_tx).await,
                Err(_) => warn!("non-UTF8 binary frame dropped"),
            },
            Ok(Message::Close(frame)) => {
                info!("server closed the session: {frame:?}");
                break;
            }
            Ok(_) => {} // ping/pong are handled by the transport
            Err(e) => {
                warn!("live stream error: {e}");
                let _ = event_tx.send(LiveEvent::Error(e.to_string())).await;
                break;
            }
        }
    }
    let _ = event_tx.send(LiveEvent::Closed).await;
}

async fn dispatch_server_message(
    text: &str,
    seq: &mut u64,
    ready_tx: &watch::Sender<bool>,
    event_tx: &mpsc::Sender<LiveEvent>,
) {
    let (setup_complete, events) = parse_server_message(text, seq);
    if setup_complete {
        debug!("setup complete; connection ready");
        let _ = ready_tx.send(true);
    }
    for event in events {
        if event_tx.send(event).await.is_err() {
            return;
        }
    }
}

/// Map one server message to events. Malformed messages are dropped (the
/// session continues); unknown kinds map to nothing.
fn parse_server_message(text: &str, seq: &mut u64) -> (bool, Vec<LiveEvent>) {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("malformed server message dropped: {e}");
            return (false, Vec::new());
        }
    };

    let mut events = Vec::new();
    if let Some(err) = message.error {
        events.push(LiveEvent::Error(format!(
            "server error {}: {}",
            err.code, err.message
        )));
    }
    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    if blob.mime_type.contains("pcm") {
                        *seq += 1;
                        events.push(LiveEvent::AudioDelta {
                            data: blob.data,
                            seq: *seq,
                        });
                    }
                }
            }
        }
        if content.interrupted {
            events.push(LiveEvent::Interrupted);
        }
        if let Some(t) = content.input_transcription {
            if !t.text.is_empty() {
                events.push(LiveEvent::InputTranscript(t.text));
            }
        }
        if let Some(t) = content.output_transcription {
            if !t.text.is_empty() {
                events.push(LiveEvent::OutputTranscript(t.text));
            }
        }
    }
    (message.setup_complete.is_some(), events)
}
