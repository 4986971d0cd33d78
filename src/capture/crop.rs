// src/capture/crop.rs
//! Crop geometry
//!
//! The ad's bounds are reported in page (CSS pixel) space, but the crop is
//! applied to raw captured frames whose resolution usually differs from the
//! viewport (device pixel ratio, scaled sharing). Every rectangle handed to
//! the drawing code is in raw-frame coordinates and lies inside the frame.

use crate::capture::stream::Frame;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Width/height pair in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Where the crop target currently sits on the page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementGeometry {
    /// Bounding box of the target element
    pub bounds: Rect,

    /// Size of the viewport the bounds are relative to
    pub viewport: Size,
}

/// Re-resolves the crop target on every composited frame
///
/// The element may be replaced (e.g. on content reload), so the compositor
/// never keeps a direct reference. `None` means "not resolvable right now".
#[derive(Clone)]
pub struct ElementResolver {
    resolve: Arc<dyn Fn() -> Option<ElementGeometry> + Send + Sync>,
}

impl ElementResolver {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Option<ElementGeometry> + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(f),
        }
    }

    /// Resolver for an element that never moves
    pub fn fixed(geometry: ElementGeometry) -> Self {
        Self::from_fn(move || Some(geometry))
    }

    pub fn resolve(&self) -> Option<ElementGeometry> {
        (self.resolve)()
    }
}

impl fmt::Debug for ElementResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ElementResolver(..)")
    }
}

/// Crop configuration: the ad's exact pixel size and how to find it
#[derive(Debug, Clone)]
pub struct CropConfig {
    /// Target (output) width in pixels
    pub width: u32,

    /// Target (output) height in pixels
    pub height: u32,

    /// Resolver for the element whose rectangle defines the source area
    pub target: ElementResolver,
}

impl CropConfig {
    pub fn new(width: u32, height: u32, target: ElementResolver) -> Self {
        Self {
            width,
            height,
            target,
        }
    }
}

/// Source rectangle in raw-frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceRect {
    pub sx: u32,
    pub sy: u32,
    pub sw: u32,
    pub sh: u32,
}

impl SourceRect {
    pub fn is_empty(&self) -> bool {
        self.sw == 0 || self.sh == 0
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn scale_for(frame_extent: u32, viewport_extent: f64) -> f64 {
    let viewport_extent = sanitize(viewport_extent);
    if viewport_extent == 0.0 {
        1.0
    } else {
        f64::from(frame_extent) / viewport_extent
    }
}

/// Clamp one axis: returns (origin, extent) within `0..frame_extent`
fn clamp_axis(origin: f64, extent: f64, frame_extent: u32) -> (u32, u32) {
    if frame_extent == 0 {
        return (0, 0);
    }
    let extent = (sanitize(extent).round() as u64).clamp(1, u64::from(frame_extent)) as u32;
    let max_origin = frame_extent - extent;
    let origin = (sanitize(origin).round() as u64).min(u64::from(max_origin)) as u32;
    (origin, extent)
}

/// Map the ad's on-page area into raw-frame coordinates
///
/// The element's box may include padding around the exact ad pixels, so
/// the `target` area is centered inside it. Out-of-range inputs are clamped.
pub fn compute_source_rect(
    frame_width: u32,
    frame_height: u32,
    geometry: &ElementGeometry,
    target_width: u32,
    target_height: u32,
) -> SourceRect {
    let scale_x = scale_for(frame_width, geometry.viewport.width);
    let scale_y = scale_for(frame_height, geometry.viewport.height);

    let bounds = &geometry.bounds;
    let pad_x = (sanitize(bounds.width) - f64::from(target_width)).max(0.0) / 2.0;
    let pad_y = (sanitize(bounds.height) - f64::from(target_height)).max(0.0) / 2.0;

    let crop_x = sanitize(bounds.x) + pad_x;
    let crop_y = sanitize(bounds.y) + pad_y;

    let (sx, sw) = clamp_axis(crop_x * scale_x, f64::from(target_width) * scale_x, frame_width);
    let (sy, sh) = clamp_axis(crop_y * scale_y, f64::from(target_height) * scale_y, frame_height);

    SourceRect { sx, sy, sw, sh }
}

/// Copy `src` out of `frame` into a `width` x `height` frame
///
/// When the source rectangle already has the target size the copy is
/// pixel-exact; otherwise nearest-neighbour sampling is used.
pub fn draw_cropped(frame: &Frame, src: SourceRect, width: u32, height: u32) -> Option<Frame> {
    if src.is_empty() || width == 0 || height == 0 {
        return None;
    }
    if src.sx + src.sw > frame.width || src.sy + src.sh > frame.height {
        return None;
    }

    let bpp = Frame::BYTES_PER_PIXEL;
    let frame_stride = frame.width as usize * bpp;
    let mut out = vec![0u8; width as usize * height as usize * bpp];

    if src.sw == width && src.sh == height {
        let row_len = width as usize * bpp;
        for row in 0..height as usize {
            let start = (src.sy as usize + row) * frame_stride + src.sx as usize * bpp;
            out[row * row_len..(row + 1) * row_len]
                .copy_from_slice(&frame.data[start..start + row_len]);
        }
    } else {
        for dy in 0..height as usize {
            let sy = src.sy as usize + dy * src.sh as usize / height as usize;
            for dx in 0..width as usize {
                let sx = src.sx as usize + dx * src.sw as usize / width as usize;
                let from = sy * frame_stride + sx * bpp;
                let to = (dy * width as usize + dx) * bpp;
                out[to..to + bpp].copy_from_slice(&frame.data[from..from + bpp]);
            }
        }
    }

    Some(Frame {
        width,
        height,
        sequence: frame.sequence,
        data: Bytes::from(out),
    })
}
