// src/interaction/recorder.rs
//! Best-effort interaction recorder
//!
//! The ad usually lives behind an isolated content boundary (an embedded,
//! possibly cross-origin frame) that cannot be instrumented. The recorder
//! therefore works from what the host window can observe:
//!
//! - **Clicks** are inferred: the host tracks the last pointer position, and
//!   when the host window loses focus while the pointer was over the content
//!   area, a click is recorded at that position. Focus is handed back to the
//!   host shortly afterwards so the next click can be observed too.
//! - **Touch starts** are visible at the container level and recorded
//!   directly, with every simultaneous touch point.
//! - **Scroll** and direct mouse events are only recorded for same-origin
//!   content, where the host can observe them.
//!
//! Known limitations of the click heuristic: a focus loss that is not a
//! click (switching applications) is recorded as a click, and a click that
//! does not move focus is missed.
//!
//! The visual overlay never intercepts input.

use crate::capture::crop::Rect;
use crate::interaction::locator::{build_locator, PathSegment};
use crate::interaction::trace::{AdSize, InteractionEvent, InteractionKind, InteractionTrace, TouchPoint};
use crate::observability::names;
use crate::utils::config::InteractionSettings;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Host window capabilities used while recording
pub trait InteractionHost: Send + Sync {
    /// Show the recording indicator over `bounds`; must not capture input
    fn show_overlay(&self, bounds: Rect);

    fn hide_overlay(&self);

    /// Give input focus back to the host window
    fn focus_window(&self);
}

/// Touch phase reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Start,
    Move,
    End,
}

/// A point in page coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagePoint {
    pub identifier: i64,
    pub x: f64,
    pub y: f64,
}

/// Observations delivered by the host environment
#[derive(Debug, Clone, PartialEq)]
pub enum HostSignal {
    /// Pointer position over the host page
    PointerMove { x: f64, y: f64 },

    /// Pointer left the host page
    PointerLeave,

    /// The host window lost input focus
    WindowBlur,

    /// The host window regained input focus
    WindowFocus,

    /// Touch activity on the content container
    Touch {
        phase: TouchPhase,
        touches: Vec<PagePoint>,
    },

    /// Mouse event observed inside same-origin content
    ///
    /// `x`/`y` are page coordinates like every other signal; the recorder
    /// maps them into content space. A listener inside the content frame
    /// must add the frame's page offset to its client coordinates first.
    ContentMouse {
        kind: InteractionKind,
        x: f64,
        y: f64,
        button: Option<u8>,
        path: Option<Vec<PathSegment>>,
    },

    /// Scroll position of same-origin content
    ContentScroll { top: f64, left: f64 },
}

/// The area occupied by the ad content
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentArea {
    /// Bounds in page coordinates
    pub bounds: Rect,

    /// Content is directly observable (not behind a cross-origin boundary)
    pub same_origin: bool,
}

/// Running counters while recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InteractionProgress {
    pub count: usize,
    pub elapsed: Duration,
}

struct ActiveCapture {
    area: ContentArea,
    ad_size: AdSize,
    started_at: Instant,
    recorded_at: DateTime<Utc>,
    events: Vec<InteractionEvent>,
    last_pointer: Option<(f64, f64)>,
    last_mousemove: Option<u64>,
    refocus: Option<JoinHandle<()>>,
}

impl ActiveCapture {
    fn timestamp(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn relative(&self, x: f64, y: f64) -> (f64, f64) {
        (x - self.area.bounds.x, y - self.area.bounds.y)
    }

    fn pointer_over_content(&self) -> Option<(f64, f64)> {
        self.last_pointer
            .filter(|&(x, y)| self.area.bounds.contains(x, y))
    }
}

/// Records a trace of user interaction with the ad
pub struct InteractionRecorder {
    host: Arc<dyn InteractionHost>,
    settings: InteractionSettings,
    active: Mutex<Option<ActiveCapture>>,
    progress: watch::Sender<InteractionProgress>,
}

impl InteractionRecorder {
    pub fn new(host: Arc<dyn InteractionHost>, settings: InteractionSettings) -> Self {
        let (progress, _) = watch::channel(InteractionProgress::default());
        Self {
            host,
            settings,
            active: Mutex::new(None),
            progress,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Begin observing interaction with the content in `area`
    pub fn start(&self, area: ContentArea, ad_size: AdSize) -> Result<()> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(EngineError::InvalidState(
                "interaction recording already active".to_string(),
            ));
        }

        if self.settings.show_overlay {
            self.host.show_overlay(area.bounds);
        }

        *active = Some(ActiveCapture {
            area,
            ad_size,
            started_at: Instant::now(),
            recorded_at: Utc::now(),
            events: Vec::new(),
            last_pointer: None,
            last_mousemove: None,
            refocus: None,
        });
        self.progress.send_replace(InteractionProgress::default());

        info!(
            "Interaction recording started for {} ad (same_origin={})",
            ad_size, area.same_origin
        );
        Ok(())
    }

    /// Current count and elapsed time
    pub fn progress(&self) -> InteractionProgress {
        match self.active.lock().as_ref() {
            Some(capture) => InteractionProgress {
                count: capture.events.len(),
                elapsed: capture.started_at.elapsed(),
            },
            None => *self.progress.borrow(),
        }
    }

    /// Watch the event count as it changes
    pub fn watch_progress(&self) -> watch::Receiver<InteractionProgress> {
        self.progress.subscribe()
    }

    /// Feed one host observation; ignored when not recording
    ///
    /// Must be called from within a tokio runtime (focus restoration is
    /// scheduled as a task).
    pub fn handle(&self, signal: HostSignal) {
        let mut guard = self.active.lock();
        let Some(capture) = guard.as_mut() else {
            return;
        };

        let recorded = match signal {
            HostSignal::PointerMove { x, y } => {
                capture.last_pointer = Some((x, y));
                None
            }
            HostSignal::PointerLeave => {
                capture.last_pointer = None;
                None
            }
            HostSignal::WindowBlur => self.infer_click(capture),
            HostSignal::WindowFocus => {
                trace!("Host window focused");
                None
            }
            HostSignal::Touch { phase, touches } => Self::touch_event(capture, phase, touches),
            HostSignal::ContentMouse {
                kind,
                x,
                y,
                button,
                path,
            } => self.content_mouse_event(capture, kind, x, y, button, path),
            HostSignal::ContentScroll { top, left } => {
                if capture.area.same_origin {
                    Some(InteractionEvent::scroll(capture.timestamp(), top, left))
                } else {
                    None
                }
            }
        };

        if let Some(event) = recorded {
            debug!("Recorded {} at {}ms", event.kind, event.timestamp);
            capture.events.push(event);
            metrics::counter!(names::INTERACTIONS_RECORDED).increment(1);
            self.progress.send_replace(InteractionProgress {
                count: capture.events.len(),
                elapsed: capture.started_at.elapsed(),
            });
        }
    }

    fn infer_click(&self, capture: &mut ActiveCapture) -> Option<InteractionEvent> {
        let Some((px, py)) = capture.pointer_over_content() else {
            trace!("Window blur with pointer outside content, ignoring");
            return None;
        };

        let (x, y) = capture.relative(px, py);
        let event = InteractionEvent::click(capture.timestamp(), x, y);

        if let Some(previous) = capture.refocus.take() {
            previous.abort();
        }
        let host = Arc::clone(&self.host);
        let delay = Duration::from_millis(self.settings.focus_restore_delay_ms);
        capture.refocus = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            host.focus_window();
        }));

        Some(event)
    }

    fn touch_event(
        capture: &mut ActiveCapture,
        phase: TouchPhase,
        touches: Vec<PagePoint>,
    ) -> Option<InteractionEvent> {
        let kind = match phase {
            TouchPhase::Start => InteractionKind::Touchstart,
            // only touch starts reach the container across the boundary
            TouchPhase::Move if capture.area.same_origin => InteractionKind::Touchmove,
            TouchPhase::End if capture.area.same_origin => InteractionKind::Touchend,
            _ => return None,
        };

        let points: Vec<TouchPoint> = touches
            .iter()
            .map(|p| {
                let (x, y) = capture.relative(p.x, p.y);
                TouchPoint {
                    identifier: p.identifier,
                    x,
                    y,
                }
            })
            .collect();

        if points.is_empty() && kind != InteractionKind::Touchend {
            return None;
        }

        Some(InteractionEvent::touch(kind, capture.timestamp(), points))
    }

    fn content_mouse_event(
        &self,
        capture: &mut ActiveCapture,
        kind: InteractionKind,
        x: f64,
        y: f64,
        button: Option<u8>,
        path: Option<Vec<PathSegment>>,
    ) -> Option<InteractionEvent> {
        if !capture.area.same_origin || !kind.is_mouse() {
            return None;
        }

        let timestamp = capture.timestamp();
        if kind == InteractionKind::Mousemove {
            let min_gap = self.settings.mousemove_sample_ms;
            if let Some(last) = capture.last_mousemove {
                if timestamp.saturating_sub(last) < min_gap {
                    return None;
                }
            }
            capture.last_mousemove = Some(timestamp);
        }

        let (rx, ry) = capture.relative(x, y);
        let mut event = InteractionEvent::pointer(kind, timestamp, rx, ry);
        event.button = button;
        event.target = path.as_deref().and_then(build_locator);
        Some(event)
    }

    /// Stop recording and return the finished trace
    pub fn stop(&self) -> Result<InteractionTrace> {
        let capture = self.active.lock().take().ok_or_else(|| {
            EngineError::InvalidState("interaction recording is not active".to_string())
        })?;

        if let Some(refocus) = capture.refocus {
            if !refocus.is_finished() {
                refocus.abort();
                self.host.focus_window();
            }
        }
        if self.settings.show_overlay {
            self.host.hide_overlay();
        }

        let elapsed = capture.started_at.elapsed();
        let mut trace = InteractionTrace::new(
            capture.events,
            elapsed.as_millis() as u64,
            capture.ad_size,
        );
        trace.recorded_at = capture.recorded_at;

        self.progress.send_replace(InteractionProgress {
            count: trace.len(),
            elapsed,
        });

        info!(
            "Interaction recording stopped: {} events over {}ms",
            trace.len(),
            trace.duration
        );
        Ok(trace)
    }
}
