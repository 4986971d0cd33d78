// src/platform/memory.rs
//! In-memory loopback platform
//!
//! Deterministic implementations of every host capability. Frames are
//! pushed by hand through the stream feeder, permission outcomes are
//! scripted, and every call into the platform is recorded for inspection.

use crate::capture::crop::Rect;
use crate::capture::session::{CaptureDenial, DisplayCapture, DisplayMediaRequest};
use crate::capture::stream::{Frame, MediaStream, StreamFeeder, StreamSettings};
use crate::interaction::recorder::InteractionHost;
use crate::orchestrator::AdContentHost;
use crate::recording::encoder::{EncoderFactory, EncoderOptions, FrameEncoder};
use crate::replay::target::{ContentDocument, ElementHandle, ReplayTarget, SyntheticEvent};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Scripted outcome of the next permission dialogs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionScript {
    Grant,

    /// Grant after the user hesitates
    GrantAfter(Duration),

    Decline,

    /// The platform fails to start capture
    Fail(String),
}

/// Display capture backed by hand-fed streams
pub struct MemoryDisplayCapture {
    settings: StreamSettings,
    supported: bool,
    script: Mutex<PermissionScript>,
    requests: Mutex<Vec<DisplayMediaRequest>>,
    feeders: Mutex<Vec<StreamFeeder>>,
    next_id: AtomicU64,
}

impl MemoryDisplayCapture {
    /// Grants every request with streams of the given shape
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings,
            supported: true,
            script: Mutex::new(PermissionScript::Grant),
            requests: Mutex::new(Vec::new()),
            feeders: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// An environment without screen capture
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(StreamSettings {
                width: 0,
                height: 0,
                frame_rate: 0,
            })
        }
    }

    /// Set the outcome of subsequent requests
    pub fn script(&self, script: PermissionScript) {
        *self.script.lock() = script;
    }

    /// Every request made so far
    pub fn requests(&self) -> Vec<DisplayMediaRequest> {
        self.requests.lock().clone()
    }

    /// Producer side of the most recently granted stream
    pub fn last_feeder(&self) -> Option<StreamFeeder> {
        self.feeders.lock().last().cloned()
    }

    /// Consumer side of the most recently granted stream
    pub fn last_stream(&self) -> Option<MediaStream> {
        self.feeders.lock().last().map(StreamFeeder::stream)
    }
}

#[async_trait]
impl DisplayCapture for MemoryDisplayCapture {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn request_display_media(
        &self,
        request: &DisplayMediaRequest,
    ) -> std::result::Result<MediaStream, CaptureDenial> {
        self.requests.lock().push(*request);
        let script = self.script.lock().clone();

        match script {
            PermissionScript::Grant => {}
            PermissionScript::GrantAfter(delay) => tokio::time::sleep(delay).await,
            PermissionScript::Decline => return Err(CaptureDenial::Declined),
            PermissionScript::Fail(reason) => return Err(CaptureDenial::Failed(reason)),
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (feeder, stream) = MediaStream::channel(
            format!("display-{}", id),
            self.settings,
            request.capture_audio,
        );
        self.feeders.lock().push(feeder);
        debug!("Granted display stream display-{}", id);
        Ok(stream)
    }
}

/// Size of one record written by [`MemoryEncoder`]
pub const RECORD_LEN: usize = 16;

/// Encoder that writes a fixed-size index record per frame
///
/// Record layout (little endian): sequence `u64`, width `u32`, height `u32`.
pub struct MemoryEncoder {
    started: bool,
    finished: bool,
    buffer: BytesMut,
    started_counter: Arc<AtomicUsize>,
}

impl FrameEncoder for MemoryEncoder {
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(EngineError::InvalidState("encoder already started".into()));
        }
        self.started = true;
        self.started_counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn encode(&mut self, frame: &Frame) -> Result<()> {
        if !self.started || self.finished {
            return Err(EngineError::EncodingFailed("encoder is not running".into()));
        }
        self.buffer.reserve(RECORD_LEN);
        self.buffer.put_u64_le(frame.sequence);
        self.buffer.put_u32_le(frame.width);
        self.buffer.put_u32_le(frame.height);
        Ok(())
    }

    fn take_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.buffer.split().freeze()))
    }

    fn finish(&mut self) -> Result<Option<Bytes>> {
        self.finished = true;
        self.take_chunk()
    }
}

/// Encoder factory with a fixed set of supported mime types
pub struct MemoryEncoderFactory {
    supported: Vec<String>,
    created: AtomicUsize,
    started: Arc<AtomicUsize>,
    options: Mutex<Vec<EncoderOptions>>,
}

impl MemoryEncoderFactory {
    pub fn new(supported: &[&str]) -> Self {
        Self {
            supported: supported.iter().map(|s| s.to_string()).collect(),
            created: AtomicUsize::new(0),
            started: Arc::new(AtomicUsize::new(0)),
            options: Mutex::new(Vec::new()),
        }
    }

    /// Encoders constructed so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Encoders that were actually started
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Options passed to each `create` call
    pub fn options(&self) -> Vec<EncoderOptions> {
        self.options.lock().clone()
    }
}

impl EncoderFactory for MemoryEncoderFactory {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|s| s == mime_type)
    }

    fn create(
        &self,
        stream: &StreamSettings,
        options: &EncoderOptions,
    ) -> Result<Box<dyn FrameEncoder>> {
        if !self.is_type_supported(&options.mime_type) {
            return Err(EngineError::UnsupportedEnvironment(format!(
                "unsupported mime type {}",
                options.mime_type
            )));
        }
        if stream.width == 0 || stream.height == 0 {
            return Err(EngineError::EncodingFailed(format!(
                "cannot encode a {}x{} stream",
                stream.width, stream.height
            )));
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        self.options.lock().push(options.clone());
        Ok(Box::new(MemoryEncoder {
            started: false,
            finished: false,
            buffer: BytesMut::new(),
            started_counter: Arc::clone(&self.started),
        }))
    }
}

/// One event delivered to a [`MemoryContentDocument`]
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub target: ElementHandle,
    pub event: SyntheticEvent,
    pub at: Instant,
}

#[derive(Debug, Clone)]
struct MemoryElement {
    handle: ElementHandle,
    locator: String,
    bounds: Rect,
}

/// Content document with rectangular elements addressed by locator
pub struct MemoryContentDocument {
    bounds: Rect,
    elements: Mutex<Vec<MemoryElement>>,
    dispatched: Mutex<Vec<DispatchRecord>>,
    scroll: Mutex<(f64, f64)>,
    next_handle: AtomicU64,
}

impl MemoryContentDocument {
    const ROOT: ElementHandle = ElementHandle(0);

    pub fn new(width: f64, height: f64) -> Self {
        Self {
            bounds: Rect::new(0.0, 0.0, width, height),
            elements: Mutex::new(Vec::new()),
            dispatched: Mutex::new(Vec::new()),
            scroll: Mutex::new((0.0, 0.0)),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Add an element on top of existing ones
    pub fn add_element(
        &self,
        locator: impl Into<String>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> ElementHandle {
        let handle = ElementHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.elements.lock().push(MemoryElement {
            handle,
            locator: locator.into(),
            bounds: Rect::new(x, y, width, height),
        });
        handle
    }

    /// Everything dispatched so far, in order
    pub fn dispatched(&self) -> Vec<DispatchRecord> {
        self.dispatched.lock().clone()
    }

    /// Current `(top, left)` scroll offset
    pub fn scroll_position(&self) -> (f64, f64) {
        *self.scroll.lock()
    }
}

impl ContentDocument for MemoryContentDocument {
    fn query_locator(&self, locator: &str) -> Option<ElementHandle> {
        self.elements
            .lock()
            .iter()
            .find(|e| e.locator == locator)
            .map(|e| e.handle)
    }

    fn element_from_point(&self, x: f64, y: f64) -> Option<ElementHandle> {
        if !self.bounds.contains(x, y) {
            return None;
        }
        let topmost = self
            .elements
            .lock()
            .iter()
            .rev()
            .find(|e| e.bounds.contains(x, y))
            .map(|e| e.handle);
        Some(topmost.unwrap_or(Self::ROOT))
    }

    fn root(&self) -> ElementHandle {
        Self::ROOT
    }

    fn dispatch(&self, target: ElementHandle, event: SyntheticEvent) {
        self.dispatched.lock().push(DispatchRecord {
            target,
            event,
            at: Instant::now(),
        });
    }

    fn scroll_to(&self, top: f64, left: f64) {
        *self.scroll.lock() = (top.max(0.0), left.max(0.0));
    }
}

/// Replay target whose document may be inaccessible
pub struct MemoryReplayTarget {
    document: Option<Arc<MemoryContentDocument>>,
    accessible: bool,
}

impl MemoryReplayTarget {
    pub fn same_origin(document: Arc<MemoryContentDocument>) -> Self {
        Self {
            document: Some(document),
            accessible: true,
        }
    }

    pub fn cross_origin(document: Arc<MemoryContentDocument>) -> Self {
        Self {
            document: Some(document),
            accessible: false,
        }
    }

    /// Content that has not loaded yet
    pub fn unloaded() -> Self {
        Self {
            document: None,
            accessible: true,
        }
    }
}

impl ReplayTarget for MemoryReplayTarget {
    fn content(&self) -> Option<Arc<dyn ContentDocument>> {
        if !self.accessible {
            return None;
        }
        self.document
            .as_ref()
            .map(|d| Arc::clone(d) as Arc<dyn ContentDocument>)
    }
}

/// Host window that counts overlay and focus calls
#[derive(Debug, Default)]
pub struct MemoryInteractionHost {
    overlay_shown: AtomicUsize,
    overlay_hidden: AtomicUsize,
    focus_calls: AtomicUsize,
    overlay_bounds: Mutex<Option<Rect>>,
}

impl MemoryInteractionHost {
    pub fn overlay_shown(&self) -> usize {
        self.overlay_shown.load(Ordering::SeqCst)
    }

    pub fn overlay_hidden(&self) -> usize {
        self.overlay_hidden.load(Ordering::SeqCst)
    }

    pub fn focus_calls(&self) -> usize {
        self.focus_calls.load(Ordering::SeqCst)
    }

    /// Bounds of the currently shown overlay
    pub fn overlay_bounds(&self) -> Option<Rect> {
        *self.overlay_bounds.lock()
    }
}

impl InteractionHost for MemoryInteractionHost {
    fn show_overlay(&self, bounds: Rect) {
        self.overlay_shown.fetch_add(1, Ordering::SeqCst);
        *self.overlay_bounds.lock() = Some(bounds);
    }

    fn hide_overlay(&self) {
        self.overlay_hidden.fetch_add(1, Ordering::SeqCst);
        *self.overlay_bounds.lock() = None;
    }

    fn focus_window(&self) {
        self.focus_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Ad content with a ready flag and scriptable reloads
#[derive(Debug)]
pub struct MemoryAdContent {
    ready: AtomicBool,
    reload_failure: Mutex<Option<String>>,
    reloads: Mutex<Vec<Instant>>,
}

impl MemoryAdContent {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            reload_failure: Mutex::new(None),
            reloads: Mutex::new(Vec::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make the next reload fail with `reason`
    pub fn fail_next_reload(&self, reason: impl Into<String>) {
        *self.reload_failure.lock() = Some(reason.into());
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.lock().len()
    }

    /// When each reload was triggered
    pub fn reload_times(&self) -> Vec<Instant> {
        self.reloads.lock().clone()
    }
}

#[async_trait]
impl AdContentHost for MemoryAdContent {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn reload(&self) -> Result<()> {
        self.reloads.lock().push(Instant::now());
        match self.reload_failure.lock().take() {
            Some(reason) => Err(EngineError::InvalidState(format!("reload failed: {}", reason))),
            None => Ok(()),
        }
    }
}
