//! Capture regions and the samplers that turn them into pixels.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use capturer_common::error::{CapturerError, CapturerResult};

use crate::frame::{Frame, BYTES_PER_PIXEL};

/// A rectangle in virtual-desktop coordinates, fixed for one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    /// Create a region, rejecting empty rectangles.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> CapturerResult<Self> {
        if width == 0 || height == 0 {
            return Err(CapturerError::capture(format!(
                "Invalid capture region {width}x{height} at ({x},{y})"
            )));
        }
        i32::try_from(width)
            .ok()
            .and_then(|w| x.checked_add(w))
            .ok_or_else(|| CapturerError::capture("Capture region x-range overflow"))?;
        i32::try_from(height)
            .ok()
            .and_then(|h| y.checked_add(h))
            .ok_or_else(|| CapturerError::capture("Capture region y-range overflow"))?;
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// The same region shrunk to even dimensions, as 4:2:0 encoders require.
    pub fn aligned_for_encoding(&self) -> CapturerResult<Self> {
        let width = self.width & !1;
        let height = self.height & !1;
        if width == 0 || height == 0 {
            return Err(CapturerError::capture(format!(
                "Capture region {}x{} is too small to encode",
                self.width, self.height
            )));
        }
        Ok(Self {
            width,
            height,
            ..*self
        })
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Intersection with another rectangle, if they overlap.
    pub fn intersect(&self, other: &CaptureRegion) -> Option<CaptureRegion> {
        let left = (self.x as i64).max(other.x as i64);
        let top = (self.y as i64).max(other.y as i64);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(CaptureRegion {
            x: left as i32,
            y: top as i32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }

    /// Size of one RGBA frame of this region.
    pub fn frame_len(&self) -> usize {
        Frame::rgba_buffer_size(self.width, self.height)
    }
}

impl fmt::Display for CaptureRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

impl FromStr for CaptureRegion {
    type Err = CapturerError;

    /// Parses `x,y,width,height`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, w, h] = parts.as_slice() else {
            return Err(CapturerError::config(format!(
                "Expected region as x,y,width,height, got {s:?}"
            )));
        };
        let bad = |field: &str| CapturerError::config(format!("Invalid region {field} in {s:?}"));
        CaptureRegion::new(
            x.parse().map_err(|_| bad("x"))?,
            y.parse().map_err(|_| bad("y"))?,
            w.parse().map_err(|_| bad("width"))?,
            h.parse().map_err(|_| bad("height"))?,
        )
    }
}

/// Information about a connected monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorInfo {
    /// Monitor name/identifier.
    pub name: String,
    /// Resolution in pixels.
    pub width: u32,
    pub height: u32,
    /// Position in the virtual desktop (pixels).
    pub x: i32,
    pub y: i32,
    /// Scale factor (for example 1.0, 1.25, 2.0).
    pub scale_factor: f64,
    /// Whether this monitor is primary.
    pub primary: bool,
}

impl MonitorInfo {
    /// The monitor's rectangle in virtual-desktop coordinates.
    pub fn bounds(&self) -> CaptureRegion {
        CaptureRegion {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Compute virtual desktop bounds that include all connected monitors.
pub fn virtual_desktop_bounds(monitors: &[MonitorInfo]) -> Option<CaptureRegion> {
    let min_x = monitors.iter().map(|m| m.x as i64).min()?;
    let min_y = monitors.iter().map(|m| m.y as i64).min()?;
    let max_x = monitors.iter().map(|m| m.bounds().right()).max()?;
    let max_y = monitors.iter().map(|m| m.bounds().bottom()).max()?;
    Some(CaptureRegion {
        x: min_x as i32,
        y: min_y as i32,
        width: (max_x - min_x) as u32,
        height: (max_y - min_y) as u32,
    })
}

/// Detect connected monitors.
pub fn detect_monitors() -> CapturerResult<Vec<MonitorInfo>> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| CapturerError::capture(format!("Failed to enumerate monitors: {e}")))?;
    Ok(monitors
        .iter()
        .map(|m| MonitorInfo {
            name: m.name().to_string(),
            width: m.width(),
            height: m.height(),
            x: m.x(),
            y: m.y(),
            scale_factor: m.scale_factor() as f64,
            primary: m.is_primary(),
        })
        .collect())
}

/// Produces one RGBA frame of a region per call.
pub trait RegionSampler {
    /// Capture the region. The returned buffer is exactly `region.frame_len()` bytes.
    fn sample(&mut self, region: &CaptureRegion) -> CapturerResult<Bytes>;

    /// Sampler name for logs.
    fn name(&self) -> &str;
}

/// Where the capture worker gets its pixels from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplerSource {
    /// The real screen.
    #[default]
    Screen,
    /// A generated moving pattern (headless runs and tests).
    Pattern,
}

/// Build the sampler for a source.
pub fn build_sampler(source: SamplerSource) -> CapturerResult<Box<dyn RegionSampler>> {
    match source {
        SamplerSource::Screen => Ok(Box::new(ScreenRegionSampler::new()?)),
        SamplerSource::Pattern => Ok(Box::new(PatternRegionSampler::new())),
    }
}

/// Samples the screen through the platform capture API.
///
/// Every monitor that overlaps the region is captured and its overlap is
/// copied into a region-sized buffer. Pixels not covered by any monitor
/// stay black.
pub struct ScreenRegionSampler {
    monitors: Vec<xcap::Monitor>,
}

impl ScreenRegionSampler {
    pub fn new() -> CapturerResult<Self> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| CapturerError::capture(format!("Failed to enumerate monitors: {e}")))?;
        if monitors.is_empty() {
            return Err(CapturerError::capture("No monitors available for capture"));
        }
        Ok(Self { monitors })
    }
}

impl RegionSampler for ScreenRegionSampler {
    fn sample(&mut self, region: &CaptureRegion) -> CapturerResult<Bytes> {
        let mut out = black_rgba(region.frame_len());
        let mut covered = false;

        for monitor in &self.monitors {
            let bounds = CaptureRegion {
                x: monitor.x(),
                y: monitor.y(),
                width: monitor.width(),
                height: monitor.height(),
            };
            let Some(overlap) = region.intersect(&bounds) else {
                continue;
            };

            let image = monitor.capture_image().map_err(|e| {
                CapturerError::capture(format!("Failed to capture {}: {e}", monitor.name()))
            })?;
            blit(
                image.as_raw(),
                image.width(),
                image.height(),
                &bounds,
                &mut out,
                region,
                &overlap,
            );
            covered = true;
        }

        if !covered {
            return Err(CapturerError::capture(format!(
                "Capture region {region} does not intersect any monitor"
            )));
        }
        Ok(Bytes::from(out))
    }

    fn name(&self) -> &str {
        "screen"
    }
}

/// Copy `overlap` from a source image positioned at `src_bounds` into a
/// destination buffer of `dst_region`. Rows or columns that fall outside the
/// source image (scaled outputs) are skipped.
fn blit(
    src: &[u8],
    src_width: u32,
    src_height: u32,
    src_bounds: &CaptureRegion,
    dst: &mut [u8],
    dst_region: &CaptureRegion,
    overlap: &CaptureRegion,
) {
    let src_x = (overlap.x - src_bounds.x) as usize;
    let dst_x = (overlap.x - dst_region.x) as usize;
    if src_x >= src_width as usize {
        return;
    }
    let columns = (overlap.width as usize).min(src_width as usize - src_x);
    let src_stride = src_width as usize * BYTES_PER_PIXEL;
    let dst_stride = dst_region.width as usize * BYTES_PER_PIXEL;

    for row in 0..overlap.height as usize {
        let src_y = (overlap.y - src_bounds.y) as usize + row;
        if src_y >= src_height as usize {
            break;
        }
        let dst_y = (overlap.y - dst_region.y) as usize + row;
        let src_start = src_y * src_stride + src_x * BYTES_PER_PIXEL;
        let dst_start = dst_y * dst_stride + dst_x * BYTES_PER_PIXEL;
        let len = columns * BYTES_PER_PIXEL;
        dst[dst_start..dst_start + len].copy_from_slice(&src[src_start..src_start + len]);
    }
}

fn black_rgba(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    for pixel in buf.chunks_exact_mut(BYTES_PER_PIXEL) {
        pixel[3] = 255;
    }
    buf
}

/// Generates a moving gradient, one step per call.
#[derive(Debug, Default)]
pub struct PatternRegionSampler {
    tick: u64,
}

impl PatternRegionSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegionSampler for PatternRegionSampler {
    fn sample(&mut self, region: &CaptureRegion) -> CapturerResult<Bytes> {
        let shift = (self.tick % 256) as usize;
        self.tick += 1;
        let mut buf = Vec::with_capacity(region.frame_len());
        for y in 0..region.height as usize {
            for x in 0..region.width as usize {
                buf.extend_from_slice(&[
                    ((x + shift) % 256) as u8,
                    ((y + shift) % 256) as u8,
                    shift as u8,
                    255,
                ]);
            }
        }
        Ok(Bytes::from(buf))
    }

    fn name(&self) -> &str {
        "pattern"
    }
}
