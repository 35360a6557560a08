//! Uncompressed YUV4MPEG2 intermediate.
//!
//! Frames are stored as full-resolution 4:4:4 planes, so any region size
//! works. ffmpeg reads the format natively.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use capturer_common::error::{CapturerError, CapturerResult};

use crate::consumer::FrameSink;
use crate::frame::{Frame, BYTES_PER_PIXEL};

const FRAME_MARKER: &[u8] = b"FRAME\n";

/// Stream header of a y4m file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Y4mInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Number of complete frames in the file.
    pub frames: u64,
}

pub struct Y4mFrameSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    width: u32,
    height: u32,
    planes: Vec<u8>,
}

impl Y4mFrameSink {
    /// Create the file and write the stream header.
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> CapturerResult<Self> {
        let file = File::create(path).map_err(|e| {
            CapturerError::encode(format!("Failed to create {}: {e}", path.display()))
        })?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "YUV4MPEG2 W{width} H{height} F{}:1 Ip A1:1 C444",
            fps.max(1)
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            width,
            height,
            planes: vec![0u8; width as usize * height as usize * 3],
        })
    }
}

impl FrameSink for Y4mFrameSink {
    fn write_frame(&mut self, frame: &Frame) -> CapturerResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CapturerError::encode("y4m sink already finished"))?;
        if !frame.has_dimensions(self.width, self.height) {
            return Err(CapturerError::encode(format!(
                "Frame is {}x{}, stream is {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        rgba_to_yuv444(&frame.data, &mut self.planes);
        writer.write_all(FRAME_MARKER)?;
        writer.write_all(&self.planes)?;
        Ok(())
    }

    fn finish(&mut self) -> CapturerResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| {
                CapturerError::encode(format!("Failed to flush {}: {e}", self.path.display()))
            })?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "y4m"
    }
}

/// Convert packed RGBA into consecutive Y, U and V planes (BT.601, studio range).
pub fn rgba_to_yuv444(rgba: &[u8], planes: &mut [u8]) {
    let pixels = rgba.len() / BYTES_PER_PIXEL;
    let (y_plane, rest) = planes.split_at_mut(pixels);
    let (u_plane, v_plane) = rest.split_at_mut(pixels);

    for (i, px) in rgba.chunks_exact(BYTES_PER_PIXEL).enumerate() {
        let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
        y_plane[i] = clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);
        u_plane[i] = clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
        v_plane[i] = clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
    }
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Read the header of a y4m file written by [`Y4mFrameSink`] and count its
/// complete frames.
pub fn probe_y4m(path: &Path) -> CapturerResult<Y4mInfo> {
    let file = File::open(path).map_err(|_| CapturerError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let total_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut header = String::new();
    reader.read_line(&mut header)?;

    let mut fields = header.split_whitespace();
    if fields.next() != Some("YUV4MPEG2") {
        return Err(CapturerError::encode(format!(
            "{} is not a y4m file",
            path.display()
        )));
    }

    let (mut width, mut height, mut fps) = (0u32, 0u32, 0u32);
    for field in fields {
        let mut chars = field.chars();
        let key = chars.next();
        let value = chars.as_str();
        match key {
            Some('W') => width = value.parse().unwrap_or(0),
            Some('H') => height = value.parse().unwrap_or(0),
            Some('F') => {
                let mut parts = value.split(':');
                let num: u32 = parts.next().and_then(|n| n.parse().ok()).unwrap_or(0);
                let den: u32 = parts.next().and_then(|d| d.parse().ok()).unwrap_or(1);
                fps = if den == 0 { 0 } else { num / den };
            }
            _ => {}
        }
    }
    if width == 0 || height == 0 {
        return Err(CapturerError::encode("y4m header has no frame size"));
    }

    let frame_len = FRAME_MARKER.len() as u64 + width as u64 * height as u64 * 3;
    let body = total_len.saturating_sub(header.len() as u64);
    Ok(Y4mInfo {
        width,
        height,
        fps,
        frames: body / frame_len,
    })
}
