// src/capture/compositor.rs
//! Cropped-stream compositor
//!
//! Plays the raw capture into a video sink and, on every display-refresh
//! tick, draws the ad's rectangle onto a fixed-size surface. The surface
//! is exposed as a second stream at exactly the ad's target size.
//!
//! ```text
//! raw stream → VideoSink → [tick] resolve target → crop → surface → derived stream
//! ```

use crate::capture::crop::{compute_source_rect, draw_cropped, CropConfig};
use crate::capture::stream::{MediaStream, StreamFeeder, StreamSettings};
use crate::observability::names;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Off-screen sink the raw stream plays into
#[derive(Clone, Default)]
struct VideoSink {
    source: Arc<Mutex<Option<MediaStream>>>,
}

impl VideoSink {
    fn attach(stream: &MediaStream) -> Self {
        Self {
            source: Arc::new(Mutex::new(Some(stream.clone()))),
        }
    }

    fn source(&self) -> Option<MediaStream> {
        self.source.lock().clone()
    }

    fn detach(&self) -> bool {
        self.source.lock().take().is_some()
    }
}

/// Draw loop counters
#[derive(Debug, Default)]
pub struct CompositorStats {
    frames_drawn: AtomicU64,
    unresolved_ticks: AtomicU64,
    empty_ticks: AtomicU64,
}

impl CompositorStats {
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn.load(Ordering::Relaxed)
    }

    /// Ticks skipped because the crop target could not be resolved
    pub fn unresolved_ticks(&self) -> u64 {
        self.unresolved_ticks.load(Ordering::Relaxed)
    }

    /// Ticks skipped because no raw frame was available yet
    pub fn empty_ticks(&self) -> u64 {
        self.empty_ticks.load(Ordering::Relaxed)
    }
}

/// Derives a target-sized stream from a larger capture
pub struct CroppedStreamCompositor {
    output: MediaStream,
    sink: VideoSink,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    stats: Arc<CompositorStats>,
}

impl CroppedStreamCompositor {
    /// Start compositing `raw` according to `crop`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(raw: &MediaStream, crop: CropConfig, refresh_interval: Duration) -> Self {
        let refresh_hz = (1_000_000 / refresh_interval.as_micros().max(1)) as u32;
        let (feeder, output) = MediaStream::channel(
            format!("{}-cropped", raw.id()),
            StreamSettings {
                width: crop.width,
                height: crop.height,
                frame_rate: refresh_hz.max(1),
            },
            false,
        );

        let sink = VideoSink::attach(raw);
        let cancel = CancellationToken::new();
        let stats = Arc::new(CompositorStats::default());

        info!(
            "Starting compositor for {} → {}x{}",
            raw.id(),
            crop.width,
            crop.height
        );

        let handle = tokio::spawn(draw_loop(
            sink.clone(),
            feeder,
            crop,
            refresh_interval,
            cancel.clone(),
            Arc::clone(&stats),
        ));

        Self {
            output,
            sink,
            cancel,
            handle: Some(handle),
            stats,
        }
    }

    /// The derived, cropped stream
    pub fn output(&self) -> &MediaStream {
        &self.output
    }

    pub fn stats(&self) -> &CompositorStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the draw loop, then detach the sink from its source
    ///
    /// The raw stream itself is not touched; its owner releases it after
    /// this returns.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    debug!("Compositor draw loop ended abnormally: {}", e);
                }
            }
        }
        if self.sink.detach() {
            debug!("Compositor sink detached");
        }
        self.output.stop();
    }
}

impl Drop for CroppedStreamCompositor {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.sink.detach();
        self.output.stop();
    }
}

async fn draw_loop(
    sink: VideoSink,
    feeder: StreamFeeder,
    crop: CropConfig,
    refresh_interval: Duration,
    cancel: CancellationToken,
    stats: Arc<CompositorStats>,
) {
    let mut ticker = tokio::time::interval(refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(source) = sink.source() else {
            break;
        };

        let Some(frame) = source.current_frame() else {
            stats.empty_ticks.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        // the element may be mid-replacement; try again next tick
        let Some(geometry) = crop.target.resolve() else {
            stats.unresolved_ticks.fetch_add(1, Ordering::Relaxed);
            trace!("Crop target unresolved, skipping tick");
            continue;
        };

        let rect = compute_source_rect(frame.width, frame.height, &geometry, crop.width, crop.height);
        if let Some(out) = draw_cropped(&frame, rect, crop.width, crop.height) {
            feeder.push(out);
            stats.frames_drawn.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(names::FRAMES_COMPOSITED).increment(1);
        } else {
            metrics::counter!(names::COMPOSITOR_SKIPPED_TICKS).increment(1);
        }
    }

    debug!("Compositor draw loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::crop::{ElementGeometry, ElementResolver, Rect, Size};
    use crate::capture::stream::Frame;
    use std::sync::atomic::AtomicBool;

    const TICK: Duration = Duration::from_millis(16);

    fn raw_stream() -> (StreamFeeder, MediaStream) {
        MediaStream::channel(
            "raw",
            StreamSettings {
                width: 8,
                height: 8,
                frame_rate: 30,
            },
            false,
        )
    }

    fn geometry() -> ElementGeometry {
        ElementGeometry {
            bounds: Rect::new(2.0, 2.0, 4.0, 4.0),
            viewport: Size::new(8.0, 8.0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_has_target_size() {
        let (feeder, raw) = raw_stream();
        feeder.push(Frame::solid(8, 8, [10, 20, 30, 255]));

        let crop = CropConfig::new(4, 4, ElementResolver::fixed(geometry()));
        let mut compositor = CroppedStreamCompositor::start(&raw, crop, TICK);

        tokio::time::sleep(TICK * 3).await;

        let out = compositor.output().current_frame().unwrap();
        assert_eq!((out.width, out.height), (4, 4));
        assert_eq!(out.pixel(0, 0), Some([10, 20, 30, 255]));
        assert!(compositor.stats().frames_drawn() >= 1);
        assert_eq!(compositor.output().settings().width, 4);

        compositor.shutdown().await;
        assert!(!compositor.is_running());
        assert!(!compositor.output().is_live());
        // the raw stream belongs to the capture session
        assert!(raw.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_target_skips_without_error() {
        let (feeder, raw) = raw_stream();
        feeder.push(Frame::solid(8, 8, [1, 1, 1, 255]));

        let available = Arc::new(AtomicBool::new(false));
        let resolver = ElementResolver::from_fn({
            let available = Arc::clone(&available);
            move || available.load(Ordering::SeqCst).then(geometry)
        });

        let mut compositor =
            CroppedStreamCompositor::start(&raw, CropConfig::new(4, 4, resolver), TICK);

        tokio::time::sleep(TICK * 3).await;
        assert!(compositor.output().current_frame().is_none());
        assert!(compositor.stats().unresolved_ticks() >= 1);
        assert!(compositor.is_running());

        available.store(true, Ordering::SeqCst);
        tokio::time::sleep(TICK * 3).await;
        assert!(compositor.output().current_frame().is_some());

        compositor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_first_frame() {
        let (_feeder, raw) = raw_stream();
        let crop = CropConfig::new(4, 4, ElementResolver::fixed(geometry()));
        let mut compositor = CroppedStreamCompositor::start(&raw, crop, TICK);

        tokio::time::sleep(TICK * 2).await;
        assert!(compositor.stats().empty_ticks() >= 1);
        assert_eq!(compositor.stats().frames_drawn(), 0);

        compositor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finishes_before_raw_release() {
        let (feeder, raw) = raw_stream();
        feeder.push(Frame::solid(8, 8, [5, 5, 5, 255]));

        let seen_live = Arc::new(Mutex::new(Vec::new()));
        let resolver = ElementResolver::from_fn({
            let raw = raw.clone();
            let seen_live = Arc::clone(&seen_live);
            move || {
                seen_live.lock().push(raw.is_live());
                Some(geometry())
            }
        });

        let mut compositor =
            CroppedStreamCompositor::start(&raw, CropConfig::new(4, 4, resolver), TICK);
        tokio::time::sleep(TICK * 4).await;
        assert!(compositor.sink.source().is_some());

        compositor.shutdown().await;
        assert!(!compositor.is_running());
        assert!(compositor.sink.source().is_none());
        assert!(raw.is_live());

        let ticks = seen_live.lock().len();
        raw.stop();
        tokio::time::sleep(TICK * 4).await;

        // no tick ran after shutdown, and every tick saw a live source
        let seen_live = seen_live.lock();
        assert!(ticks >= 1);
        assert_eq!(seen_live.len(), ticks);
        assert!(seen_live.iter().all(|live| *live));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_repeatable() {
        let (_feeder, raw) = raw_stream();
        let crop = CropConfig::new(4, 4, ElementResolver::fixed(geometry()));
        let mut compositor = CroppedStreamCompositor::start(&raw, crop, TICK);

        compositor.shutdown().await;
        compositor.shutdown().await;
        assert!(!compositor.is_running());
    }
}
