//! Captured frame types.

use bytes::Bytes;

/// Bytes per pixel of the RGBA8 layout every frame uses.
pub const BYTES_PER_PIXEL: usize = 4;

/// A captured video frame: tightly packed RGBA8 rows, top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Pixel data. Cloning a frame shares this buffer.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Monotonically increasing sequence number assigned by the producer.
    pub sequence: u64,

    /// Capture time in nanoseconds since the producer started.
    pub captured_at_ns: u64,
}

impl Frame {
    /// Create a new frame.
    pub fn new(data: Bytes, width: u32, height: u32, sequence: u64, captured_at_ns: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
            captured_at_ns,
        }
    }

    /// Expected RGBA buffer size for given dimensions.
    pub fn rgba_buffer_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Validate that the frame data matches its dimensions.
    pub fn is_valid(&self) -> bool {
        self.data.len() == Self::rgba_buffer_size(self.width, self.height)
    }

    /// Whether this frame has the given pixel dimensions.
    pub fn has_dimensions(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}
