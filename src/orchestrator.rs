// src/orchestrator.rs
//! Reload-and-record orchestration
//!
//! Records an ad from its very first frame:
//!
//! ```text
//! ready? ─► prepare() ─► countdown (N × 1s) ─► reload content ─► begin()
//!            (permission                                          (encoding
//!             dialog)                                               starts)
//! ```
//!
//! Permission is obtained before the reload, so however long the user takes
//! with the dialog, the recording still starts in step with the fresh load.
//! Each step gates the next; a failure stops the sequence where it is.

use crate::capture::crop::CropConfig;
use crate::recording::recorder::ScreenRecorder;
use crate::utils::config::OrchestratorSettings;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

/// The ad-rendering collaborator
#[async_trait]
pub trait AdContentHost: Send + Sync {
    /// Whether the ad is loaded and viewable
    fn is_ready(&self) -> bool;

    /// Load a fresh instance of the ad content
    async fn reload(&self) -> Result<()>;
}

/// Orchestration progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// Permission dialog is up
    AwaitingPermission,

    /// Countdown tick; `remaining` seconds before the reload
    Countdown { remaining: u32 },

    Reloading,

    /// Encoding has begun
    Recording,
}

/// Sequences permission, countdown, reload, and recording start
pub struct ReloadAndRecord {
    recorder: Arc<ScreenRecorder>,
    content: Arc<dyn AdContentHost>,
    countdown_ticks: u32,
    tick: Duration,
    cancel: Mutex<CancellationToken>,
}

impl ReloadAndRecord {
    pub fn new(
        recorder: Arc<ScreenRecorder>,
        content: Arc<dyn AdContentHost>,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            recorder,
            content,
            countdown_ticks: settings.countdown_ticks,
            tick: Duration::from_secs(1),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn recorder(&self) -> &Arc<ScreenRecorder> {
        &self.recorder
    }

    /// Abort a sequence that has not started reloading yet
    ///
    /// A cancel issued while the permission dialog is open takes effect
    /// once the dialog resolves; the granted session is then discarded.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Run the sequence; returns the id of the recording session
    pub async fn run(
        &self,
        crop: Option<CropConfig>,
        progress: mpsc::Sender<OrchestratorEvent>,
    ) -> Result<Ulid> {
        if !self.content.is_ready() {
            warn!("Reload-and-record requested before content is ready");
            return Err(EngineError::ContentNotReady);
        }

        let cancel = {
            let mut current = self.cancel.lock();
            *current = CancellationToken::new();
            current.clone()
        };

        let _ = progress.send(OrchestratorEvent::AwaitingPermission).await;
        let session_id = match self.recorder.prepare(crop).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Reload-and-record aborted before countdown: {}", e);
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            info!("Reload-and-record cancelled during the permission dialog");
            self.recorder.discard().await;
            return Err(EngineError::InvalidState(
                "reload-and-record cancelled".to_string(),
            ));
        }

        for remaining in (1..=self.countdown_ticks).rev() {
            let _ = progress.send(OrchestratorEvent::Countdown { remaining }).await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Reload-and-record cancelled during countdown");
                    self.recorder.discard().await;
                    return Err(EngineError::InvalidState(
                        "reload-and-record cancelled".to_string(),
                    ));
                }
                _ = tokio::time::sleep(self.tick) => {}
            }
        }

        let _ = progress.send(OrchestratorEvent::Reloading).await;
        debug!("Reloading ad content for session {}", session_id);
        if let Err(e) = self.content.reload().await {
            error!("Content reload failed, discarding session {}: {}", session_id, e);
            self.recorder.discard().await;
            return Err(e);
        }

        self.recorder.begin().await?;
        let _ = progress.send(OrchestratorEvent::Recording).await;
        info!("Reload-and-record session {} is recording", session_id);

        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::stream::StreamSettings;
    use crate::platform::memory::{
        MemoryAdContent, MemoryDisplayCapture, MemoryEncoderFactory, PermissionScript,
    };
    use crate::recording::recorder::RecorderState;
    use tokio::time::Instant;

    struct Harness {
        capture: Arc<MemoryDisplayCapture>,
        encoders: Arc<MemoryEncoderFactory>,
        content: Arc<MemoryAdContent>,
        orchestrator: Arc<ReloadAndRecord>,
    }

    fn harness(ready: bool) -> Harness {
        let capture = Arc::new(MemoryDisplayCapture::new(StreamSettings {
            width: 64,
            height: 48,
            frame_rate: 30,
        }));
        let encoders = Arc::new(MemoryEncoderFactory::new(&["video/webm"]));
        let recorder = Arc::new(ScreenRecorder::new(capture.clone(), encoders.clone()));
        let content = Arc::new(MemoryAdContent::new(ready));
        let orchestrator = Arc::new(ReloadAndRecord::new(
            recorder,
            content.clone(),
            &OrchestratorSettings::default(),
        ));
        Harness {
            capture,
            encoders,
            content,
            orchestrator,
        }
    }

    fn collect(rx: &mut mpsc::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sequence() {
        let h = harness(true);
        h.capture
            .script(PermissionScript::GrantAfter(Duration::from_secs(7)));
        let (tx, mut rx) = mpsc::channel(16);

        let t0 = Instant::now();
        h.orchestrator.run(None, tx).await.unwrap();

        assert_eq!(
            collect(&mut rx),
            vec![
                OrchestratorEvent::AwaitingPermission,
                OrchestratorEvent::Countdown { remaining: 3 },
                OrchestratorEvent::Countdown { remaining: 2 },
                OrchestratorEvent::Countdown { remaining: 1 },
                OrchestratorEvent::Reloading,
                OrchestratorEvent::Recording,
            ]
        );

        // reload happens after the permission delay plus the full countdown
        let reloads = h.content.reload_times();
        assert_eq!(reloads.len(), 1);
        assert_eq!(reloads[0] - t0, Duration::from_secs(10));

        assert!(h.orchestrator.recorder().is_recording());
        assert_eq!(h.encoders.started(), 1);
        h.orchestrator.recorder().discard().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_refused() {
        let h = harness(false);
        let (tx, mut rx) = mpsc::channel(16);

        let result = h.orchestrator.run(None, tx).await;
        assert_eq!(result.unwrap_err(), EngineError::ContentNotReady);
        assert!(collect(&mut rx).is_empty());
        assert!(h.capture.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_aborts_before_countdown() {
        let h = harness(true);
        h.capture.script(PermissionScript::Decline);
        let (tx, mut rx) = mpsc::channel(16);

        let result = h.orchestrator.run(None, tx).await;
        assert_eq!(result.unwrap_err(), EngineError::PermissionDenied);
        assert_eq!(collect(&mut rx), vec![OrchestratorEvent::AwaitingPermission]);
        assert_eq!(h.content.reload_count(), 0);
        assert_eq!(h.orchestrator.recorder().state(), RecorderState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_failure_discards_session() {
        let h = harness(true);
        h.content.fail_next_reload("renderer crashed");
        let (tx, _rx) = mpsc::channel(16);

        let result = h.orchestrator.run(None, tx).await;
        assert!(result.is_err());
        assert_eq!(h.orchestrator.recorder().state(), RecorderState::Idle);
        assert_eq!(h.encoders.started(), 0);
        assert!(!h.capture.last_stream().unwrap().is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_countdown() {
        let h = harness(true);
        let (tx, mut rx) = mpsc::channel(16);

        let orchestrator = h.orchestrator.clone();
        let run = tokio::spawn(async move { orchestrator.run(None, tx).await });

        // wait until the first countdown tick has been announced
        loop {
            if let Some(OrchestratorEvent::Countdown { .. }) = rx.recv().await {
                break;
            }
        }
        h.orchestrator.cancel();

        let result = run.await.unwrap();
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert_eq!(h.content.reload_count(), 0);
        assert_eq!(h.encoders.started(), 0);
        assert!(!h.capture.last_stream().unwrap().is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_awaiting_permission() {
        let h = harness(true);
        h.capture
            .script(PermissionScript::GrantAfter(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::channel(16);

        let orchestrator = h.orchestrator.clone();
        let run = tokio::spawn(async move { orchestrator.run(None, tx).await });

        assert_eq!(rx.recv().await, Some(OrchestratorEvent::AwaitingPermission));
        h.orchestrator.cancel();

        let result = run.await.unwrap();
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert!(collect(&mut rx).is_empty());
        assert_eq!(h.content.reload_count(), 0);
        assert_eq!(h.encoders.started(), 0);
        assert_eq!(h.orchestrator.recorder().state(), RecorderState::Idle);
        assert!(!h.capture.last_stream().unwrap().is_live());
    }
}
