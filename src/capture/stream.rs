// src/capture/stream.rs
//! Media stream primitives
//!
//! A [`MediaStream`] is a latest-frame video sink plus a set of tracks and
//! an end signal. The producing side holds a [`StreamFeeder`]. Both are
//! cheap to clone and share the same underlying state.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// A single RGBA8 video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Monotonic sequence number assigned by the feeder
    pub sequence: u64,

    /// Row-major RGBA8 pixels (`width * height * 4` bytes)
    pub data: Bytes,
}

impl Frame {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Create a frame, checking the buffer size
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Option<Self> {
        let data = data.into();
        if data.len() != width as usize * height as usize * Self::BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            sequence: 0,
            data,
        })
    }

    /// Frame filled with a single colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * Self::BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            sequence: 0,
            data: Bytes::from(data),
        }
    }

    /// RGBA value at (x, y), if inside the frame
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        let px = &self.data[offset..offset + Self::BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Track kinds carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// A stream track; stopping is idempotent
#[derive(Debug)]
pub struct MediaTrack {
    kind: TrackKind,
    live: AtomicBool,
}

impl MediaTrack {
    fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            live: AtomicBool::new(true),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Stop the track, returning true if it was live
    fn stop(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }
}

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Tracks were stopped by this engine
    Stopped,

    /// The platform ended the stream (e.g. the user revoked sharing)
    EndedExternally,
}

/// Negotiated stream properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

struct StreamShared {
    id: String,
    settings: StreamSettings,
    tracks: Vec<MediaTrack>,
    frames: watch::Sender<Option<Frame>>,
    ended: watch::Sender<Option<EndReason>>,
    sequence: AtomicU64,
    stopped_tracks: Mutex<usize>,
}

impl StreamShared {
    fn end(&self, reason: EndReason) -> bool {
        let mut stopped = self.stopped_tracks.lock();
        for track in &self.tracks {
            if track.stop() {
                *stopped += 1;
            }
        }
        drop(stopped);

        let mut first = false;
        self.ended.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                first = true;
                true
            } else {
                false
            }
        });
        first
    }
}

/// Consumer handle to a media stream
#[derive(Clone)]
pub struct MediaStream {
    shared: Arc<StreamShared>,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.shared.id)
            .field("settings", &self.shared.settings)
            .field("ended", &self.end_reason())
            .finish()
    }
}

impl MediaStream {
    /// Create a stream and the feeder that produces its frames
    pub fn channel(
        id: impl Into<String>,
        settings: StreamSettings,
        with_audio: bool,
    ) -> (StreamFeeder, MediaStream) {
        let mut tracks = vec![MediaTrack::new(TrackKind::Video)];
        if with_audio {
            tracks.push(MediaTrack::new(TrackKind::Audio));
        }

        let (frames, _) = watch::channel(None);
        let (ended, _) = watch::channel(None);

        let shared = Arc::new(StreamShared {
            id: id.into(),
            settings,
            tracks,
            frames,
            ended,
            sequence: AtomicU64::new(0),
            stopped_tracks: Mutex::new(0),
        });

        (
            StreamFeeder {
                shared: Arc::clone(&shared),
            },
            MediaStream { shared },
        )
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn settings(&self) -> StreamSettings {
        self.shared.settings
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.shared.tracks
    }

    pub fn has_audio(&self) -> bool {
        self.shared
            .tracks
            .iter()
            .any(|t| t.kind() == TrackKind::Audio)
    }

    /// Latest frame pushed by the producer
    pub fn current_frame(&self) -> Option<Frame> {
        self.shared.frames.borrow().clone()
    }

    /// Subscribe to frame updates
    pub fn frames(&self) -> watch::Receiver<Option<Frame>> {
        self.shared.frames.subscribe()
    }

    /// Subscribe to the end signal
    pub fn ended(&self) -> watch::Receiver<Option<EndReason>> {
        self.shared.ended.subscribe()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        *self.shared.ended.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.end_reason().is_none()
    }

    /// Number of track stop operations actually performed
    pub fn stopped_track_count(&self) -> usize {
        *self.shared.stopped_tracks.lock()
    }

    /// Stop every track; repeated calls are no-ops
    pub fn stop(&self) {
        if self.shared.end(EndReason::Stopped) {
            debug!("Stopped all tracks of stream {}", self.shared.id);
        }
    }

    /// Wait until the stream ends and report why
    pub async fn wait_ended(&self) -> EndReason {
        let mut rx = self.ended();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // sender lives inside `shared`, which we hold
                return EndReason::Stopped;
            }
        }
    }
}

/// Producer handle for a media stream
#[derive(Clone)]
pub struct StreamFeeder {
    shared: Arc<StreamShared>,
}

impl StreamFeeder {
    /// Publish a frame; ignored once the stream has ended
    pub fn push(&self, mut frame: Frame) -> bool {
        if self.shared.ended.borrow().is_some() {
            return false;
        }
        frame.sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.frames.send_replace(Some(frame));
        true
    }

    /// End the stream from the platform side
    pub fn end_externally(&self) -> bool {
        let first = self.shared.end(EndReason::EndedExternally);
        if first {
            debug!("Stream {} ended externally", self.shared.id);
        }
        first
    }

    pub fn is_live(&self) -> bool {
        self.shared.ended.borrow().is_none()
    }

    /// Number of frames published so far
    pub fn frames_pushed(&self) -> u64 {
        self.shared.sequence.load(Ordering::Relaxed)
    }

    /// Consumer handle for the same stream
    pub fn stream(&self) -> MediaStream {
        MediaStream {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StreamSettings {
        StreamSettings {
            width: 4,
            height: 2,
            frame_rate: 30,
        }
    }

    #[test]
    fn test_frame_size_checked() {
        assert!(Frame::new(2, 2, vec![0u8; 16]).is_some());
        assert!(Frame::new(2, 2, vec![0u8; 15]).is_none());
    }

    #[test]
    fn test_pixel_lookup() {
        let frame = Frame::solid(3, 3, [1, 2, 3, 255]);
        assert_eq!(frame.pixel(2, 2), Some([1, 2, 3, 255]));
        assert_eq!(frame.pixel(3, 0), None);
    }

    #[test]
    fn test_push_assigns_sequence() {
        let (feeder, stream) = MediaStream::channel("s1", settings(), false);
        assert!(stream.current_frame().is_none());

        feeder.push(Frame::solid(4, 2, [0; 4]));
        feeder.push(Frame::solid(4, 2, [0; 4]));

        assert_eq!(stream.current_frame().unwrap().sequence, 2);
        assert_eq!(feeder.frames_pushed(), 2);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_feeder, stream) = MediaStream::channel("s1", settings(), true);
        assert_eq!(stream.tracks().len(), 2);
        assert!(stream.has_audio());

        stream.stop();
        stream.stop();

        assert_eq!(stream.stopped_track_count(), 2);
        assert_eq!(stream.end_reason(), Some(EndReason::Stopped));
        assert!(stream.tracks().iter().all(|t| !t.is_live()));
    }

    #[test]
    fn test_external_end_keeps_first_reason() {
        let (feeder, stream) = MediaStream::channel("s1", settings(), false);
        assert!(feeder.end_externally());
        stream.stop();

        assert_eq!(stream.end_reason(), Some(EndReason::EndedExternally));
        assert!(!feeder.push(Frame::solid(4, 2, [0; 4])));
    }

    #[tokio::test]
    async fn test_wait_ended() {
        let (feeder, stream) = MediaStream::channel("s1", settings(), false);
        let waiter = tokio::spawn({
            let stream = stream.clone();
            async move { stream.wait_ended().await }
        });

        tokio::task::yield_now().await;
        feeder.end_externally();

        assert_eq!(waiter.await.unwrap(), EndReason::EndedExternally);
    }
}
