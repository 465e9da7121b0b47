//! End-to-end lifecycle tests against a local mock live endpoint.
//!
//! A tiny WebSocket server stands in for the remote service so the full
//! path — connect, setup handshake, inbound demux, playback scheduling,
//! interruption, teardown — runs without hardware or network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use muse_live::pcm;
use muse_live::{
    AudioChunk, CaptureBackend, LiveError, LiveResult, LiveSession, OutputClock,
    PlaybackScheduler, PlaybackSink, SessionOptions, SessionState, Speaker,
};

/// Scripted behavior of the mock endpoint.
#[derive(Clone, Copy)]
enum ServerScript {
    /// Acknowledge setup, then relay pushed messages to the client.
    Ready,
    /// Accept the socket but never acknowledge setup.
    Silent,
}

struct MockServer {
    url: String,
    connections: Arc<AtomicUsize>,
    /// Push inbound messages to the connected client. Dropping this ends
    /// the connection from the server side.
    push_tx: Option<mpsc::UnboundedSender<Message>>,
}

impl MockServer {
    fn push(&self, message: Message) {
        self.push_tx
            .as_ref()
            .expect("server push channel taken")
            .send(message)
            .expect("mock server gone");
    }

    fn close_from_remote(&mut self) {
        self.push_tx.take();
    }
}

async fn spawn_server(script: ServerScript) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let (push_tx, push_rx) = mpsc::unbounded_channel::<Message>();
    let push_rx = Arc::new(tokio::sync::Mutex::new(push_rx));

    let conn_count = connections.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            conn_count.fetch_add(1, Ordering::SeqCst);
            let push_rx = push_rx.clone();
            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut stream) = ws.split();
                match script {
                    ServerScript::Silent => {
                        while let Some(Ok(msg)) = stream.next().await {
                            if matches!(msg, Message::Close(_)) {
                                break;
                            }
                        }
                    }
                    ServerScript::Ready => {
                        // First inbound message is the setup envelope.
                        let _ = stream.next().await;
                        let _ = sink
                            .send(Message::Text(r#"{"setupComplete":{}}"#.to_string()))
                            .await;
                        let mut push_rx = push_rx.lock().await;
                        loop {
                            tokio::select! {
                                pushed = push_rx.recv() => match pushed {
                                    Some(msg) => {
                                        if sink.send(msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    None => break,
                                },
                                inbound = stream.next() => match inbound {
                                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                },
                            }
                        }
                        let _ = sink.send(Message::Close(None)).await;
                    }
                }
            });
        }
    });

    MockServer {
        url: format!("ws://{addr}/"),
        connections,
        push_tx: Some(push_tx),
    }
}

struct TestCapture {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    feed: Arc<StdMutex<Option<mpsc::Sender<AudioChunk>>>>,
}

impl TestCapture {
    fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        (
            Self {
                starts: starts.clone(),
                stops: stops.clone(),
                feed: Arc::new(StdMutex::new(None)),
            },
            starts,
            stops,
        )
    }
}

impl CaptureBackend for TestCapture {
    fn start(&mut self) -> LiveResult<mpsc::Receiver<AudioChunk>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(8);
        *self.feed.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        if self.feed.lock().unwrap().take().is_some() {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_capturing(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }

    fn name(&self) -> &str {
        "test-capture"
    }
}

#[derive(Clone, Default)]
struct ManualClock(Arc<StdMutex<f64>>);

impl ManualClock {
    fn set(&self, t: f64) {
        *self.0.lock().unwrap() = t;
    }
}

impl OutputClock for ManualClock {
    fn now_secs(&self) -> f64 {
        *self.0.lock().unwrap()
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    scheduled: Arc<StdMutex<Vec<(f64, f64)>>>,
    halts: Arc<AtomicUsize>,
}

impl RecordingSink {
    fn starts(&self) -> Vec<f64> {
        self.scheduled.lock().unwrap().iter().map(|s| s.0).collect()
    }
}

impl PlaybackSink for RecordingSink {
    fn schedule(&self, samples: Vec<f32>, sample_rate: u32, start_at: f64) -> LiveResult<()> {
        let duration = samples.len() as f64 / sample_rate as f64;
        self.scheduled.lock().unwrap().push((start_at, duration));
        Ok(())
    }

    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }
}

fn audio_delta_message(ms: u64) -> Message {
    let samples = vec![0i16; (24_000 * ms / 1000) as usize];
    let data = pcm::encode_base64(&pcm::to_le_bytes(&samples));
    Message::Text(format!(
        r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{data}"}}}}]}}}}}}"#
    ))
}

fn session_against(
    url: &str,
    capture: TestCapture,
    sink: RecordingSink,
    clock: ManualClock,
) -> LiveSession {
    let options = SessionOptions {
        endpoint: url.to_string(),
        ..Default::default()
    };
    let scheduler = PlaybackScheduler::new(Box::new(sink), Box::new(clock), 24_000);
    LiveSession::with_components(options, Box::new(capture), None, scheduler)
}

async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn start_while_active_is_a_no_op() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let server = spawn_server(ServerScript::Ready).await;
    let (capture, starts, _stops) = TestCapture::new();
    let session = session_against(
        &server.url,
        capture,
        RecordingSink::default(),
        ManualClock::default(),
    );

    session.start("test-key").await.unwrap();
    session.wait_until_active().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);

    // A second start request opens no second connection and no second
    // capture loop.
    session.start("test-key").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    session.stop();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn stop_while_connecting_releases_devices() {
    let server = spawn_server(ServerScript::Silent).await;
    let (capture, starts, stops) = TestCapture::new();
    let session = session_against(
        &server.url,
        capture,
        RecordingSink::default(),
        ManualClock::default(),
    );

    session.start("test-key").await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(session.state(), SessionState::Connecting);
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    session.stop();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inbound_audio_schedules_gaplessly_and_interruption_flushes() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut server = spawn_server(ServerScript::Ready).await;
    let (capture, _starts, _stops) = TestCapture::new();
    let sink = RecordingSink::default();
    let clock = ManualClock::default();
    let session = session_against(&server.url, capture, sink.clone(), clock.clone());

    session.start("test-key").await.unwrap();
    session.wait_until_active().await.unwrap();

    server.push(audio_delta_message(100));
    server.push(audio_delta_message(250));
    server.push(audio_delta_message(80));
    wait_for(|| sink.scheduled.lock().unwrap().len() == 3, "3 scheduled chunks").await;

    let starts = sink.starts();
    assert!((starts[0] - 0.0).abs() < 1e-9);
    assert!((starts[1] - 0.100).abs() < 1e-9);
    assert!((starts[2] - 0.350).abs() < 1e-9);

    // Barge-in: everything pending is flushed, and the next chunk starts at
    // the device's current time rather than the stale cursor.
    server.push(Message::Text(
        r#"{"serverContent":{"interrupted":true}}"#.to_string(),
    ));
    wait_for(|| sink.halts.load(Ordering::SeqCst) >= 1, "interruption flush").await;

    clock.set(0.5);
    server.push(audio_delta_message(200));
    wait_for(|| sink.scheduled.lock().unwrap().len() == 4, "post-interruption chunk").await;
    let starts = sink.starts();
    assert!((starts[3] - 0.5).abs() < 1e-9, "stale cursor reused: {}", starts[3]);

    server.close_from_remote();
    session.stop();
}

#[tokio::test]
async fn transcripts_flow_into_the_bounded_log() {
    let server = spawn_server(ServerScript::Ready).await;
    let (capture, _starts, _stops) = TestCapture::new();
    let session = session_against(
        &server.url,
        capture,
        RecordingSink::default(),
        ManualClock::default(),
    );

    session.start("test-key").await.unwrap();
    session.wait_until_active().await.unwrap();

    server.push(Message::Text(
        r#"{"serverContent":{"inputTranscription":{"text":"tell me a story"}}}"#.to_string(),
    ));
    server.push(Message::Text(
        r#"{"serverContent":{"outputTranscription":{"text":"Once upon a time"}}}"#.to_string(),
    ));
    wait_for(|| session.transcript_lines().len() == 2, "2 transcript lines").await;

    let lines = session.transcript_lines();
    assert_eq!(lines[0].speaker, Speaker::User);
    assert_eq!(lines[0].text, "tell me a story");
    assert_eq!(lines[1].speaker, Speaker::Model);
    assert_eq!(lines[1].text, "Once upon a time");

    session.stop();
}

#[tokio::test]
async fn remote_close_runs_the_same_teardown_as_stop() {
    let mut server = spawn_server(ServerScript::Ready).await;
    let (capture, _starts, stops) = TestCapture::new();
    let session = session_against(
        &server.url,
        capture,
        RecordingSink::default(),
        ManualClock::default(),
    );

    session.start("test-key").await.unwrap();
    session.wait_until_active().await.unwrap();

    server.close_from_remote();
    wait_for(|| session.state() == SessionState::Closed, "remote close teardown").await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    // A later local stop is a no-op.
    session.stop();
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_endpoint_fails_without_leaking_devices() {
    let (capture, starts, stops) = TestCapture::new();
    let session = session_against(
        "ws://127.0.0.1:1",
        capture,
        RecordingSink::default(),
        ManualClock::default(),
    );

    session.start("test-key").await.unwrap();
    let result = session.wait_until_active().await;
    assert!(matches!(result, Err(LiveError::ConnectionFailed(_))));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}
