// src/replay/replayer.rs
//! Time-faithful event replayer
//!
//! A single cooperative loop ticks at the display-refresh cadence. On each
//! tick it dispatches every event whose offset has elapsed, so a burst of
//! events recorded within one frame is replayed within one frame, in the
//! original order.

use crate::interaction::trace::{InteractionEvent, InteractionKind, InteractionTrace};
use crate::observability::names;
use crate::replay::target::{synthesize, ContentDocument, ElementHandle, ReplayTarget};
use crate::utils::config::ReplaySettings;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Replay notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEvent {
    /// Sent after each batch of dispatched events
    Progress { dispatched: usize, total: usize },

    /// Every event has been dispatched; sent exactly once
    Completed,
}

/// Position in a sorted event list
#[derive(Debug)]
pub struct ReplayCursor {
    events: Arc<[InteractionEvent]>,
    next: usize,
}

impl ReplayCursor {
    pub fn new(events: Arc<[InteractionEvent]>) -> Self {
        Self { events, next: 0 }
    }

    /// Events due at `elapsed` that have not been returned yet
    pub fn advance(&mut self, elapsed: Duration) -> &[InteractionEvent] {
        let start = self.next;
        while self.next < self.events.len()
            && Duration::from_millis(self.events[self.next].timestamp) <= elapsed
        {
            self.next += 1;
        }
        &self.events[start..self.next]
    }

    pub fn dispatched(&self) -> usize {
        self.next
    }

    pub fn total(&self) -> usize {
        self.events.len()
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.events.len()
    }
}

#[derive(Default)]
struct ReplayerInner {
    events: Option<Arc<[InteractionEvent]>>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
    /// Per-run flag so a finishing old loop cannot clear a newer run
    playing: Arc<AtomicBool>,
}

/// Replays an interaction trace against fresh content
pub struct EventReplayer {
    frame_interval: Duration,
    inner: Mutex<ReplayerInner>,
}

impl EventReplayer {
    pub fn new(settings: &ReplaySettings) -> Self {
        Self {
            frame_interval: settings.frame_interval(),
            inner: Mutex::new(ReplayerInner::default()),
        }
    }

    /// Load a trace; events are sorted by timestamp
    pub fn load_trace(&self, trace: &InteractionTrace) {
        let mut events = trace.events.clone();
        events.sort_by_key(|e| e.timestamp);
        debug!("Loaded trace with {} events", events.len());
        self.inner.lock().events = Some(events.into());
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing.load(Ordering::SeqCst)
    }

    /// Start replaying the loaded trace against `target`
    ///
    /// Fails with `ReplayTargetUnavailable` before dispatching anything when
    /// the target's content cannot be accessed. Must be called from within a
    /// tokio runtime.
    pub fn play(
        &self,
        target: &dyn ReplayTarget,
        progress: mpsc::Sender<ReplayEvent>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        // a stopped loop may still be unwinding and holding its document
        let loop_alive = inner.handle.as_ref().is_some_and(|h| !h.is_finished());
        if inner.playing.load(Ordering::SeqCst) || loop_alive {
            return Err(EngineError::InvalidState("replay already in progress".to_string()));
        }
        let events = inner
            .events
            .clone()
            .ok_or_else(|| EngineError::InvalidState("no trace loaded".to_string()))?;

        let document = target.content().ok_or_else(|| {
            warn!("Replay target content is not accessible");
            EngineError::ReplayTargetUnavailable(
                "content document is cross-origin or not loaded".to_string(),
            )
        })?;

        info!("Starting replay of {} events", events.len());

        let cancel = CancellationToken::new();
        let playing = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(dispatch_loop(
            ReplayCursor::new(events),
            document,
            self.frame_interval,
            progress,
            cancel.clone(),
            Arc::clone(&playing),
        ));

        inner.playing = playing;
        inner.cancel = Some(cancel);
        inner.handle = Some(handle);
        Ok(())
    }

    /// Cancel the dispatch loop; safe to call at any time
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(cancel) = inner.cancel.take() {
            if !cancel.is_cancelled() {
                debug!("Stopping replay");
            }
            cancel.cancel();
        }
        inner.playing.store(false, Ordering::SeqCst);
    }

    /// Wait for the current dispatch loop to exit
    pub async fn finished(&self) {
        let handle = self.inner.lock().handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Replay loop ended abnormally: {}", e);
                }
            }
        }
    }
}

impl Drop for EventReplayer {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
    }
}

async fn dispatch_loop(
    mut cursor: ReplayCursor,
    document: Arc<dyn ContentDocument>,
    frame_interval: Duration,
    progress: mpsc::Sender<ReplayEvent>,
    cancel: CancellationToken,
    playing: Arc<AtomicBool>,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Replay cancelled after {} of {} events", cursor.dispatched(), cursor.total());
                break;
            }
            _ = ticker.tick() => {}
        }

        let elapsed = started.elapsed();
        let batch = cursor.advance(elapsed);
        if !batch.is_empty() {
            for event in batch {
                dispatch_event(document.as_ref(), event);
            }
            metrics::counter!(names::REPLAY_EVENTS_DISPATCHED).increment(batch.len() as u64);
            let update = ReplayEvent::Progress {
                dispatched: cursor.dispatched(),
                total: cursor.total(),
            };
            if !notify(&progress, &cancel, update).await {
                debug!("Replay cancelled while reporting progress");
                break;
            }
        }

        if cursor.is_done() {
            info!("Replay completed: {} events", cursor.total());
            notify(&progress, &cancel, ReplayEvent::Completed).await;
            break;
        }
    }

    cancel.cancel();
    playing.store(false, Ordering::SeqCst);
}

/// Send a notification unless cancelled first; false when cancelled
async fn notify(
    progress: &mpsc::Sender<ReplayEvent>,
    cancel: &CancellationToken,
    event: ReplayEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        // a dropped receiver is not a reason to stop dispatching
        _ = progress.send(event) => true,
    }
}

fn resolve_target(document: &dyn ContentDocument, event: &InteractionEvent) -> ElementHandle {
    event
        .target
        .as_deref()
        .and_then(|locator| document.query_locator(locator))
        .or_else(|| document.element_from_point(event.x, event.y))
        .unwrap_or_else(|| document.root())
}

fn dispatch_event(document: &dyn ContentDocument, event: &InteractionEvent) {
    let target = resolve_target(document, event);
    trace!("Dispatching {} at {}ms to {:?}", event.kind, event.timestamp, target);

    if event.kind == InteractionKind::Scroll {
        document.scroll_to(
            event.scroll_top.unwrap_or(0.0),
            event.scroll_left.unwrap_or(0.0),
        );
    }

    for synthetic in synthesize(event) {
        document.dispatch(target, synthetic);
    }
}
