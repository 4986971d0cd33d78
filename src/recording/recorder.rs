// src/recording/recorder.rs
//! Screen recorder state machine
//!
//! ```text
//! idle ──prepare()──► prepared ──begin()──► recording ──stop()──► stopping ──► idle
//!   └────────────────────start()──────────────►┘
//! ```
//!
//! `prepare()` resolves the permission dialog and builds the encoder
//! without starting it, so a caller can run a countdown or reload content
//! and only then `begin()`. Finalization (explicit `stop()` or the capture
//! stream ending on its own) goes through one path that always releases
//! the stream and cancels the compositor, and emits exactly one
//! [`RecorderEvent::Completed`] per session.

use crate::capture::compositor::CroppedStreamCompositor;
use crate::capture::crop::CropConfig;
use crate::capture::session::{CaptureSession, DisplayCapture, DisplayMediaRequest};
use crate::capture::stream::{EndReason, Frame, MediaStream};
use crate::observability::names;
use crate::recording::artifact::RecordingArtifact;
use crate::recording::encoder::{
    select_mime_type, EncoderFactory, EncoderOptions, FrameEncoder, RecorderOptions,
};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex as SyncMutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

/// Recorder lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Prepared,
    Recording,
    Stopping,
}

/// Notifications emitted by the recorder
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    Prepared { session_id: Ulid },
    Started { session_id: Ulid },
    Paused { session_id: Ulid },
    Resumed { session_id: Ulid },
    Completed {
        session_id: Ulid,
        result: Result<RecordingArtifact>,
    },
}

/// Point-in-time view of the recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderStatus {
    pub state: RecorderState,
    pub session_id: Option<Ulid>,
    pub paused: bool,
    /// Elapsed recording time excluding pauses
    pub elapsed: Duration,
    pub chunks_buffered: usize,
}

/// Elapsed-time accounting with pause subtraction
#[derive(Debug, Default)]
struct SessionClock {
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl SessionClock {
    fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.paused_at = None;
        self.paused_total = Duration::ZERO;
    }

    fn pause(&mut self, now: Instant) -> bool {
        if self.started_at.is_none() || self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(now);
        true
    }

    fn resume(&mut self, now: Instant) -> bool {
        match self.paused_at.take() {
            Some(paused_at) => {
                self.paused_total += now.saturating_duration_since(paused_at);
                true
            }
            None => false,
        }
    }

    fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    fn elapsed(&self, now: Instant) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let current_pause = self
            .paused_at
            .map(|p| now.saturating_duration_since(p))
            .unwrap_or_default();
        now.saturating_duration_since(started_at)
            .saturating_sub(self.paused_total)
            .saturating_sub(current_pause)
    }
}

/// Everything owned by one prepare()..stop() cycle
///
/// Field order matters for drop: the compositor goes before the capture.
struct ActiveSession {
    id: Ulid,
    compositor: Option<CroppedStreamCompositor>,
    capture: CaptureSession,
    encode_stream: MediaStream,
    encoder: Option<Box<dyn FrameEncoder>>,
    encode_task: Option<JoinHandle<Result<()>>>,
    encode_cancel: CancellationToken,
    watch_cancel: CancellationToken,
    paused: watch::Sender<bool>,
    chunks: Arc<SyncMutex<Vec<Bytes>>>,
    clock: SessionClock,
    mime_type: String,
    width: u32,
    height: u32,
}

impl ActiveSession {
    /// Cancel loops, shut down the compositor, then release the capture
    async fn release(&mut self) {
        self.watch_cancel.cancel();
        self.encode_cancel.cancel();
        if let Some(handle) = self.encode_task.take() {
            handle.abort();
        }
        if let Some(mut compositor) = self.compositor.take() {
            compositor.shutdown().await;
        }
        self.capture.release();
        debug!("Session {} resources released", self.id);
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.watch_cancel.cancel();
        self.encode_cancel.cancel();
        if let Some(handle) = self.encode_task.take() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    Requested,
    EndedExternally,
}

struct RecorderInner {
    state: RecorderState,
    session: Option<ActiveSession>,
    ended_while_prepared: bool,
}

struct Shared {
    inner: Mutex<RecorderInner>,
    state: watch::Sender<RecorderState>,
    events: broadcast::Sender<RecorderEvent>,
}

impl Shared {
    fn set_state(&self, inner: &mut RecorderInner, state: RecorderState) {
        inner.state = state;
        self.state.send_replace(state);
    }

    fn emit(&self, event: RecorderEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Screen recorder owning at most one session at a time
pub struct ScreenRecorder {
    capture: Arc<dyn DisplayCapture>,
    encoders: Arc<dyn EncoderFactory>,
    request: DisplayMediaRequest,
    options: RecorderOptions,
    refresh_interval: Duration,
    shared: Arc<Shared>,
}

impl ScreenRecorder {
    /// Create a recorder with default settings
    pub fn new(capture: Arc<dyn DisplayCapture>, encoders: Arc<dyn EncoderFactory>) -> Self {
        Self::with_config(capture, encoders, &EngineConfig::default())
    }

    /// Create a recorder from engine configuration
    pub fn with_config(
        capture: Arc<dyn DisplayCapture>,
        encoders: Arc<dyn EncoderFactory>,
        config: &EngineConfig,
    ) -> Self {
        let (state, _) = watch::channel(RecorderState::Idle);
        let (events, _) = broadcast::channel(64);

        Self {
            capture,
            encoders,
            request: DisplayMediaRequest::from(&config.capture),
            options: RecorderOptions::from(&config.recorder),
            refresh_interval: config.capture.refresh_interval(),
            shared: Arc::new(Shared {
                inner: Mutex::new(RecorderInner {
                    state: RecorderState::Idle,
                    session: None,
                    ended_while_prepared: false,
                }),
                state,
                events,
            }),
        }
    }

    /// Subscribe to recorder notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.shared.events.subscribe()
    }

    /// Current state without waiting on an in-flight operation
    pub fn state(&self) -> RecorderState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<RecorderState> {
        self.shared.state.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Detailed status; waits for any in-flight lifecycle operation
    pub async fn status(&self) -> RecorderStatus {
        let inner = self.shared.inner.lock().await;
        let now = Instant::now();
        match inner.session.as_ref() {
            Some(session) => RecorderStatus {
                state: inner.state,
                session_id: Some(session.id),
                paused: session.clock.is_paused(),
                elapsed: session.clock.elapsed(now),
                chunks_buffered: session.chunks.lock().len(),
            },
            None => RecorderStatus {
                state: inner.state,
                session_id: None,
                paused: false,
                elapsed: Duration::ZERO,
                chunks_buffered: 0,
            },
        }
    }

    /// Acquire the capture stream (and compositor) and build the encoder
    ///
    /// This is where the platform permission dialog is shown. Encoding does
    /// not start until [`begin`](Self::begin).
    pub async fn prepare(&self, crop: Option<CropConfig>) -> Result<Ulid> {
        let mut inner = self.shared.inner.lock().await;

        if inner.state != RecorderState::Idle {
            warn!("prepare() called while {:?}", inner.state);
            return Err(EngineError::InvalidState(format!(
                "cannot prepare while {:?}",
                inner.state
            )));
        }
        inner.ended_while_prepared = false;

        // validate the codec before bothering the user with a dialog
        let mime_type = select_mime_type(self.encoders.as_ref(), &self.options.mime_preferences)?;

        let capture = CaptureSession::acquire(self.capture.as_ref(), &self.request).await?;

        let compositor = crop.map(|crop| {
            CroppedStreamCompositor::start(capture.stream(), crop, self.refresh_interval)
        });
        let encode_stream = match compositor.as_ref() {
            Some(compositor) => compositor.output().clone(),
            None => capture.stream().clone(),
        };
        let settings = encode_stream.settings();

        let encoder_options = EncoderOptions {
            mime_type: mime_type.clone(),
            video_bits_per_second: self.options.video_bits_per_second,
        };

        let id = Ulid::new();
        let (paused, _) = watch::channel(false);
        let mut session = ActiveSession {
            id,
            compositor,
            capture,
            encode_stream,
            encoder: None,
            encode_task: None,
            encode_cancel: CancellationToken::new(),
            watch_cancel: CancellationToken::new(),
            paused,
            chunks: Arc::new(SyncMutex::new(Vec::new())),
            clock: SessionClock::default(),
            mime_type,
            width: settings.width,
            height: settings.height,
        };

        match self.encoders.create(&settings, &encoder_options) {
            Ok(encoder) => session.encoder = Some(encoder),
            Err(e) => {
                error!("Failed to create encoder: {}", e);
                session.release().await;
                return Err(e);
            }
        }

        tokio::spawn(watch_external_end(
            Arc::downgrade(&self.shared),
            id,
            session.capture.stream().clone(),
            session.watch_cancel.clone(),
        ));

        info!(
            "Recording session {} prepared ({}x{}, {})",
            id, session.width, session.height, session.mime_type
        );

        inner.session = Some(session);
        self.shared.set_state(&mut inner, RecorderState::Prepared);
        self.shared.emit(RecorderEvent::Prepared { session_id: id });

        Ok(id)
    }

    /// Start encoding on the prepared session
    pub async fn begin(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;

        if inner.state != RecorderState::Prepared {
            if inner.state == RecorderState::Idle && inner.ended_while_prepared {
                inner.ended_while_prepared = false;
                warn!("begin() called after the prepared stream ended externally");
                return Err(EngineError::StreamEndedExternally);
            }
            warn!("begin() called without a prepared session ({:?})", inner.state);
            return Err(EngineError::InvalidState(format!(
                "cannot begin while {:?}",
                inner.state
            )));
        }

        let Some(session) = inner.session.as_mut() else {
            return Err(EngineError::InvalidState("prepared state without session".into()));
        };
        let Some(mut encoder) = session.encoder.take() else {
            return Err(EngineError::InvalidState("session has no encoder".into()));
        };

        if let Err(e) = encoder.start() {
            error!("Encoder failed to start: {}", e);
            if let Some(mut session) = inner.session.take() {
                session.release().await;
            }
            self.shared.set_state(&mut inner, RecorderState::Idle);
            metrics::counter!(names::RECORDINGS_FAILED).increment(1);
            return Err(e);
        }

        let handle = tokio::spawn(encode_loop(
            encoder,
            session.encode_stream.frames(),
            session.paused.subscribe(),
            Arc::clone(&session.chunks),
            self.options.chunk_interval,
            session.encode_cancel.clone(),
        ));
        session.encode_task = Some(handle);
        session.clock.start(Instant::now());

        let id = session.id;
        self.shared.set_state(&mut inner, RecorderState::Recording);
        self.shared.emit(RecorderEvent::Started { session_id: id });
        metrics::counter!(names::RECORDINGS_STARTED).increment(1);
        info!("Recording session {} started", id);

        Ok(())
    }

    /// prepare() and begin() in one call
    pub async fn start(&self, crop: Option<CropConfig>) -> Result<Ulid> {
        let id = self.prepare(crop).await?;
        self.begin().await?;
        Ok(id)
    }

    /// Finalize the encoder and return the artifact
    ///
    /// Returns `Ok(None)` when there is nothing to stop (already idle).
    pub async fn stop(&self) -> Result<Option<RecordingArtifact>> {
        match finalize(&self.shared, StopCause::Requested, None).await {
            Some(result) => result.map(Some),
            None => {
                debug!("stop() called with no active session");
                Ok(None)
            }
        }
    }

    /// Pause encoding; returns false if not recording or already paused
    pub async fn pause(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != RecorderState::Recording {
            return false;
        }
        let Some(session) = inner.session.as_mut() else {
            return false;
        };
        if !session.clock.pause(Instant::now()) {
            return false;
        }
        session.paused.send_replace(true);
        let id = session.id;
        self.shared.emit(RecorderEvent::Paused { session_id: id });
        debug!("Recording session {} paused", id);
        true
    }

    /// Resume encoding; returns false if not paused
    pub async fn resume(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != RecorderState::Recording {
            return false;
        }
        let Some(session) = inner.session.as_mut() else {
            return false;
        };
        if !session.clock.resume(Instant::now()) {
            return false;
        }
        session.paused.send_replace(false);
        let id = session.id;
        self.shared.emit(RecorderEvent::Resumed { session_id: id });
        debug!("Recording session {} resumed", id);
        true
    }

    /// Tear down any session without producing an artifact
    ///
    /// A prepared-but-never-begun session is released without the encoder
    /// ever being started. No completion event is emitted.
    pub async fn discard(&self) {
        let mut inner = self.shared.inner.lock().await;
        inner.ended_while_prepared = false;
        if let Some(mut session) = inner.session.take() {
            info!("Discarding recording session {} ({:?})", session.id, inner.state);
            session.release().await;
        }
        self.shared.set_state(&mut inner, RecorderState::Idle);
    }
}

/// Single finalize path shared by stop() and external stream end
///
/// Returns `None` if there was nothing to finalize (idle, or the session
/// is not the one the caller expected).
async fn finalize(
    shared: &Shared,
    cause: StopCause,
    expected: Option<Ulid>,
) -> Option<Result<RecordingArtifact>> {
    let mut inner = shared.inner.lock().await;

    let current = inner.session.as_ref()?.id;
    if expected.is_some_and(|id| id != current) {
        return None;
    }

    let previous_state = inner.state;
    let mut session = inner.session.take()?;

    if previous_state == RecorderState::Prepared {
        session.release().await;
        shared.set_state(&mut inner, RecorderState::Idle);

        let result = match cause {
            StopCause::EndedExternally => {
                inner.ended_while_prepared = true;
                warn!("Capture stream ended before recording began");
                Err(EngineError::StreamEndedExternally)
            }
            StopCause::Requested => Err(EngineError::NoDataRecorded),
        };
        shared.emit(RecorderEvent::Completed {
            session_id: session.id,
            result: result.clone(),
        });
        return Some(result);
    }

    shared.set_state(&mut inner, RecorderState::Stopping);
    let duration = session.clock.elapsed(Instant::now());

    session.encode_cancel.cancel();
    if let Some(handle) = session.encode_task.take() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Encoder reported an error while finalizing: {}", e),
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("Encoder task failed: {}", e),
        }
    }

    session.release().await;

    let chunks = std::mem::take(&mut *session.chunks.lock());
    let result = if chunks.is_empty() {
        warn!("Recording session {} produced no data", session.id);
        metrics::counter!(names::RECORDINGS_FAILED).increment(1);
        Err(EngineError::NoDataRecorded)
    } else {
        let mut data = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in &chunks {
            data.extend_from_slice(chunk);
        }
        let artifact = RecordingArtifact {
            data: data.freeze(),
            mime_type: session.mime_type.clone(),
            width: session.width,
            height: session.height,
            duration,
            chunk_count: chunks.len(),
            recorded_at: chrono::Utc::now(),
            ended_externally: cause == StopCause::EndedExternally,
        };
        metrics::counter!(names::RECORDINGS_COMPLETED).increment(1);
        metrics::histogram!(names::RECORDING_BYTES).record(artifact.data.len() as f64);
        info!(
            "Recording session {} finalized: {} bytes in {} chunks, {:?}",
            session.id,
            artifact.data.len(),
            artifact.chunk_count,
            duration
        );
        Ok(artifact)
    };

    shared.set_state(&mut inner, RecorderState::Idle);
    shared.emit(RecorderEvent::Completed {
        session_id: session.id,
        result: result.clone(),
    });

    Some(result)
}

/// Treat the platform ending the capture as an implicit stop
async fn watch_external_end(
    shared: Weak<Shared>,
    session_id: Ulid,
    stream: MediaStream,
    cancel: CancellationToken,
) {
    let reason = tokio::select! {
        _ = cancel.cancelled() => return,
        reason = stream.wait_ended() => reason,
    };

    if reason != EndReason::EndedExternally {
        return;
    }

    let Some(shared) = shared.upgrade() else {
        return;
    };

    info!("Capture stream for session {} ended externally, finalizing", session_id);
    if let Some(Err(e)) = finalize(&shared, StopCause::EndedExternally, Some(session_id)).await {
        warn!("Implicit stop of session {} failed: {}", session_id, e);
    }
}

/// Feed frames to the encoder and collect chunks on a fixed interval
async fn encode_loop(
    mut encoder: Box<dyn FrameEncoder>,
    mut frames: watch::Receiver<Option<Frame>>,
    paused: watch::Receiver<bool>,
    chunks: Arc<SyncMutex<Vec<Bytes>>>,
    chunk_interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(chunk_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut frames_open = true;

    let outcome: Result<()> = async {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = frames.changed(), if frames_open => {
                    if changed.is_err() {
                        frames_open = false;
                        continue;
                    }
                    // mark seen before the pause check or changed() fires again at once
                    let frame = frames.borrow_and_update().clone();
                    if *paused.borrow() {
                        continue;
                    }
                    if let Some(frame) = frame {
                        encoder.encode(&frame)?;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(chunk) = encoder.take_chunk()? {
                        chunks.lock().push(chunk);
                    }
                }
            }
        }
        Ok::<(), EngineError>(())
    }
    .await;

    // always flush so an abrupt stop keeps what was buffered
    match encoder.finish() {
        Ok(Some(chunk)) => chunks.lock().push(chunk),
        Ok(None) => {}
        Err(e) => {
            warn!("Encoder finish failed: {}", e);
            return outcome.and(Err(e));
        }
    }

    outcome
}
