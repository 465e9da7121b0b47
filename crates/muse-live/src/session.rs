//! Session lifecycle: one live conversation from device acquisition to
//! idempotent teardown.
//!
//! Startup ordering: acquire devices, open the connection, wait for the
//! ready signal, and only then start the capture forwarding loop and (in
//! vision mode) the frame timer. Teardown ordering: cancel timers and loops,
//! close the connection, halt playback, release the devices — best-effort
//! and exhaustive, never short-circuiting on a failed step.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::{AudioChunk, CaptureBackend, MicBackend, MicConfig};
use crate::client::{LiveClient, LiveEvent};
use crate::config::SessionOptions;
use crate::error::{LiveError, LiveResult};
use crate::frame::{FrameSample, FrameSampler, FrameSource};
use crate::playback::PlaybackScheduler;
use crate::transcript::{Speaker, TranscriptLine, TranscriptLog};

/// Lifecycle states of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

/// Events surfaced to the embedding shell.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Transcript(TranscriptLine),
    Error(String),
}

/// State shared between the session handle and its tasks.
struct SessionShared {
    state_tx: watch::Sender<SessionState>,
    scheduler: PlaybackScheduler,
    transcript: Mutex<TranscriptLog>,
    events_tx: mpsc::Sender<SessionEvent>,
    client: Mutex<Option<LiveClient>>,
    capture: Mutex<Box<dyn CaptureBackend>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("session state -> {next:?}");
            let _ = self.events_tx.try_send(SessionEvent::StateChanged(next));
        }
    }

    /// Connecting -> Active, unless teardown won the race.
    fn try_activate(&self) -> bool {
        let activated = self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Active;
                true
            } else {
                false
            }
        });
        if activated {
            debug!("session state -> Active");
            let _ = self
                .events_tx
                .try_send(SessionEvent::StateChanged(SessionState::Active));
        }
        activated
    }

    fn push_transcript(&self, speaker: Speaker, text: String) {
        let line = match self.transcript.lock() {
            Ok(mut log) => log.push(speaker, text),
            Err(_) => return,
        };
        let _ = self.events_tx.try_send(SessionEvent::Transcript(line));
    }

    fn emit_error(&self, message: impl Into<String>) {
        let _ = self.events_tx.try_send(SessionEvent::Error(message.into()));
    }

    /// Track a task for teardown; aborts it right away if teardown already
    /// ran.
    fn register_task(&self, handle: JoinHandle<()>) {
        if matches!(
            self.state(),
            SessionState::Closing | SessionState::Closed | SessionState::Failed
        ) {
            handle.abort();
            return;
        }
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(handle),
            Err(_) => handle.abort(),
        }
    }

    /// Teardown: cancel timers and loops, close the connection, halt
    /// playback, release the devices. Safe to call from any task, any
    /// number of times.
    fn teardown(&self, target: SessionState) {
        match self.state() {
            SessionState::Closed | SessionState::Failed | SessionState::Idle => return,
            _ => {}
        }
        self.set_state(SessionState::Closing);

        let drained: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in drained {
            task.abort();
        }

        if let Ok(mut slot) = self.client.lock() {
            if let Some(client) = slot.take() {
                client.close();
            }
        }

        self.scheduler.halt();

        if let Ok(mut backend) = self.capture.lock() {
            backend.stop();
        }

        self.set_state(target);
        info!("session teardown complete ({target:?})");
    }
}

/// Lets the frame timer borrow the camera source while the session keeps
/// ownership across restarts.
struct SharedFrameSource(Arc<Mutex<Box<dyn FrameSource>>>);

impl FrameSource for SharedFrameSource {
    fn grab(&mut self) -> Option<FrameSample> {
        self.0.lock().ok().and_then(|mut source| source.grab())
    }
}

/// A single live conversation.
///
/// Owns exactly one streaming client, one capture pipeline, and one playback
/// pipeline. `stop` is idempotent and releases every owned device and timer
/// exactly once; dropping the session does the same.
pub struct LiveSession {
    id: Uuid,
    options: SessionOptions,
    shared: Arc<SessionShared>,
    state_rx: watch::Receiver<SessionState>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    frame_source: Option<Arc<Mutex<Box<dyn FrameSource>>>>,
}

impl LiveSession {
    /// Build a session on the default microphone and output device.
    pub fn new(options: SessionOptions) -> LiveResult<Self> {
        let mic = MicBackend::new(MicConfig {
            sample_rate: options.input_sample_rate,
            window: options.capture_window,
            ..Default::default()
        });
        let scheduler = PlaybackScheduler::with_default_device(options.output_sample_rate)?;
        Ok(Self::with_components(options, Box::new(mic), None, scheduler))
    }

    /// Build a session from explicit components (custom devices, tests).
    pub fn with_components(
        options: SessionOptions,
        capture: Box<dyn CaptureBackend>,
        frame_source: Option<Box<dyn FrameSource>>,
        scheduler: PlaybackScheduler,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (events_tx, events_rx) = mpsc::channel(64);
        let shared = Arc::new(SessionShared {
            state_tx,
            scheduler,
            transcript: Mutex::new(TranscriptLog::default()),
            events_tx,
            client: Mutex::new(None),
            capture: Mutex::new(capture),
            tasks: Mutex::new(Vec::new()),
        });
        Self {
            id: Uuid::new_v4(),
            options,
            shared,
            state_rx,
            events_rx: Some(events_rx),
            frame_source: frame_source.map(|source| Arc::new(Mutex::new(source))),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch for state changes (e.g. to drive a shell's connect spinner).
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Take the session event receiver. Returns `None` after the first call.
    pub fn take_events_receiver(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Snapshot of the recent transcript window, oldest first.
    pub fn transcript_lines(&self) -> Vec<TranscriptLine> {
        self.shared
            .transcript
            .lock()
            .map(|log| log.lines().cloned().collect())
            .unwrap_or_default()
    }

    /// Start the session: acquire devices, then connect. A start request
    /// while the session is already starting or active is a no-op.
    pub async fn start(&self, api_key: &str) -> LiveResult<()> {
        match self.state() {
            SessionState::Idle | SessionState::Closed | SessionState::Failed => {}
            other => {
                warn!("start requested while {other:?}; ignoring");
                return Ok(());
            }
        }
        info!("starting live session {}", self.id);
        self.shared.set_state(SessionState::Connecting);

        // Devices first: a failed acquisition must not open a connection.
        let chunk_rx = {
            let mut backend = self
                .shared
                .capture
                .lock()
                .map_err(|_| LiveError::CaptureFailed("capture backend lock poisoned".into()))?;
            match backend.start() {
                Ok(rx) => rx,
                Err(e) => {
                    error!("device acquisition failed: {e}");
                    self.shared.teardown(SessionState::Failed);
                    return Err(e);
                }
            }
        };

        let (client, live_events) = LiveClient::open(api_key.to_string(), &self.options);
        if let Ok(mut slot) = self.shared.client.lock() {
            *slot = Some(client.clone());
        }

        // A stop that raced device acquisition has already drained the
        // client slot; don't leave this connection behind.
        if matches!(
            self.state(),
            SessionState::Closing | SessionState::Closed | SessionState::Failed
        ) {
            if let Ok(mut slot) = self.shared.client.lock() {
                slot.take();
            }
            client.close();
            return Ok(());
        }

        // Inbound demux runs from the first moment; producers wait for the
        // ready signal inside the driver.
        let event_loop = tokio::spawn(run_event_loop(live_events, self.shared.clone()));
        self.shared.register_task(event_loop);

        let frame_source = self
            .options
            .wants_frames()
            .then(|| self.frame_source.clone())
            .flatten();
        let driver = tokio::spawn(run_driver(
            client,
            chunk_rx,
            frame_source,
            self.options.clone(),
            self.shared.clone(),
        ));
        self.shared.register_task(driver);
        Ok(())
    }

    /// Wait until the session is active, or fail with the reason it never
    /// got there.
    pub async fn wait_until_active(&self) -> LiveResult<()> {
        let mut rx = self.state_rx.clone();
        loop {
            match *rx.borrow_and_update() {
                SessionState::Active => return Ok(()),
                SessionState::Failed => {
                    return Err(LiveError::ConnectionFailed(
                        "session failed before becoming active".into(),
                    ))
                }
                SessionState::Closed => {
                    return Err(LiveError::ConnectionFailed(
                        "session closed before becoming active".into(),
                    ))
                }
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(LiveError::ChannelClosed("session state watch closed".into()));
            }
        }
    }

    /// Stop the session. Idempotent; safe to call from any thread and at
    /// any lifecycle stage, including while still connecting.
    pub fn stop(&self) {
        info!("stopping live session {}", self.id);
        self.shared.teardown(SessionState::Closed);
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shared.teardown(SessionState::Closed);
    }
}

/// Waits for the connection to become ready, then starts the producers and
/// flips the session to Active.
async fn run_driver(
    client: LiveClient,
    chunk_rx: mpsc::Receiver<AudioChunk>,
    frame_source: Option<Arc<Mutex<Box<dyn FrameSource>>>>,
    options: SessionOptions,
    shared: Arc<SessionShared>,
) {
    if let Err(e) = client.ready().await {
        warn!("connection failed: {e}");
        shared.emit_error(e.to_string());
        shared.teardown(SessionState::Failed);
        return;
    }

    let forwarder = tokio::spawn(run_forwarder(chunk_rx, client.clone(), shared.clone()));
    shared.register_task(forwarder);

    if options.wants_frames() {
        match frame_source {
            Some(source) => {
                let sampler = FrameSampler::new(options.frame_interval);
                let handle = sampler.spawn(
                    Box::new(SharedFrameSource(source)),
                    client.media_sender(),
                );
                shared.register_task(handle);
            }
            None => warn!("vision mode requested but no camera source wired; audio only"),
        }
    }

    if shared.try_activate() {
        info!("live session active");
    }
}

/// Encodes captured windows and hands them to the client. Fire-and-forget
/// from the capture thread's perspective; the device callback never waits
/// on network I/O.
async fn run_forwarder(
    mut chunk_rx: mpsc::Receiver<AudioChunk>,
    client: LiveClient,
    shared: Arc<SessionShared>,
) {
    while let Some(chunk) = chunk_rx.recv().await {
        let blob = chunk.encode();
        if client.send(blob).await.is_err() {
            debug!("outbound queue closed; capture forwarding ends");
            return;
        }
    }
    // The chunk stream ended. Expected during teardown; mid-session it
    // means the capture device died.
    if shared.state() == SessionState::Active {
        error!("capture stream ended unexpectedly");
        shared.emit_error("audio capture failed: device stream ended");
        shared.teardown(SessionState::Failed);
    }
}

/// Dispatches each inbound event to exactly one handler.
async fn run_event_loop(mut events: mpsc::Receiver<LiveEvent>, shared: Arc<SessionShared>) {
    let mut saw_error = false;
    while let Some(event) = events.recv().await {
        match event {
            LiveEvent::AudioDelta { data, seq } => {
                if let Err(e) = shared.scheduler.on_audio_delta(&data, seq) {
                    warn!("dropping audio delta: {e}");
                }
            }
            LiveEvent::Interrupted => shared.scheduler.on_interrupted(),
            LiveEvent::InputTranscript(text) => shared.push_transcript(Speaker::User, text),
            LiveEvent::OutputTranscript(text) => shared.push_transcript(Speaker::Model, text),
            LiveEvent::Error(message) => {
                warn!("live session error event: {message}");
                shared.emit_error(message);
                saw_error = true;
            }
            LiveEvent::Closed => {
                info!("session closed by remote");
                let target = if saw_error {
                    SessionState::Failed
                } else {
                    SessionState::Closed
                };
                shared.teardown(target);
                return;
            }
        }
    }
}
