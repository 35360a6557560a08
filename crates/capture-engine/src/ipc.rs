//! Typed messages exchanged with worker processes over their stdio pipes.
//!
//! Wire format, little endian:
//!
//! ```text
//! frame:   0x01 | seq u64 | captured_at_ns u64 | width u32 | height u32 | len u32 | pixels
//! event:   0x02 | len u32 | JSON WorkerEvent
//! control: 0x03 | len u32 | JSON ControlMessage
//! ```
//!
//! A clean end of stream between two messages reads as `None`.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use capturer_common::error::{CapturerError, CapturerResult};

use crate::frame::Frame;

const TAG_FRAME: u8 = 0x01;
const TAG_EVENT: u8 = 0x02;
const TAG_CONTROL: u8 = 0x03;

/// Largest accepted frame payload (an 8K RGBA frame is ~133 MB).
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Largest accepted JSON payload.
pub const MAX_JSON_BYTES: usize = 1024 * 1024;

/// The job a worker process performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Capture,
    Encode,
    Audio,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Encode => "encode",
            Self::Audio => "audio",
        }
    }
}

/// Status reported by a worker to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// The worker initialized its device or sink.
    Ready { role: WorkerRole, detail: String },
    /// Running total of frames appended to the video file.
    FramesWritten { total: u64 },
    /// The audio file was written.
    AudioSaved { path: PathBuf, seconds: f64 },
    /// No usable audio input exists; no audio file will be written.
    NoAudioDevice,
    /// The worker hit an error and is exiting.
    Failed { message: String },
    /// The encode worker closed the video file.
    Finished { frames: u64 },
}

/// Commands sent from the orchestrator to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlMessage {
    Stop,
}

/// One unit on a worker pipe.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Frame(Frame),
    Event(WorkerEvent),
    Control(ControlMessage),
}

/// Write one message. The caller decides when to flush.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> CapturerResult<()> {
    match message {
        Message::Frame(frame) => {
            let len = u32::try_from(frame.data.len())
                .ok()
                .filter(|len| *len as usize <= MAX_FRAME_BYTES)
                .ok_or_else(|| {
                    CapturerError::ipc(format!("Frame of {} bytes is too large", frame.data.len()))
                })?;
            let mut header = [0u8; 29];
            header[0] = TAG_FRAME;
            header[1..9].copy_from_slice(&frame.sequence.to_le_bytes());
            header[9..17].copy_from_slice(&frame.captured_at_ns.to_le_bytes());
            header[17..21].copy_from_slice(&frame.width.to_le_bytes());
            header[21..25].copy_from_slice(&frame.height.to_le_bytes());
            header[25..29].copy_from_slice(&len.to_le_bytes());
            writer.write_all(&header)?;
            writer.write_all(&frame.data)?;
        }
        Message::Event(event) => write_json(writer, TAG_EVENT, event)?,
        Message::Control(control) => write_json(writer, TAG_CONTROL, control)?,
    }
    Ok(())
}

fn write_json<W: Write, T: Serialize>(writer: &mut W, tag: u8, value: &T) -> CapturerResult<()> {
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_JSON_BYTES {
        return Err(CapturerError::ipc("JSON message too large"));
    }
    writer.write_all(&[tag])?;
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    Ok(())
}

/// Read the next message, or `None` on a clean end of stream.
pub fn read_message<R: Read>(reader: &mut R) -> CapturerResult<Option<Message>> {
    let mut tag = [0u8; 1];
    loop {
        match reader.read(&mut tag) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match tag[0] {
        TAG_FRAME => {
            let mut header = [0u8; 28];
            read_exact(reader, &mut header)?;
            let sequence = u64::from_le_bytes(header[0..8].try_into().unwrap_or_default());
            let captured_at_ns = u64::from_le_bytes(header[8..16].try_into().unwrap_or_default());
            let width = u32::from_le_bytes(header[16..20].try_into().unwrap_or_default());
            let height = u32::from_le_bytes(header[20..24].try_into().unwrap_or_default());
            let len = u32::from_le_bytes(header[24..28].try_into().unwrap_or_default()) as usize;
            if len > MAX_FRAME_BYTES {
                return Err(CapturerError::ipc(format!(
                    "Frame payload of {len} bytes exceeds limit"
                )));
            }
            let mut data = vec![0u8; len];
            read_exact(reader, &mut data)?;
            Ok(Some(Message::Frame(Frame::new(
                Bytes::from(data),
                width,
                height,
                sequence,
                captured_at_ns,
            ))))
        }
        TAG_EVENT => Ok(Some(Message::Event(read_json(reader)?))),
        TAG_CONTROL => Ok(Some(Message::Control(read_json(reader)?))),
        other => Err(CapturerError::ipc(format!(
            "Unknown message tag 0x{other:02x}"
        ))),
    }
}

fn read_json<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> CapturerResult<T> {
    let mut len = [0u8; 4];
    read_exact(reader, &mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_JSON_BYTES {
        return Err(CapturerError::ipc(format!(
            "JSON payload of {len} bytes exceeds limit"
        )));
    }
    let mut body = vec![0u8; len];
    read_exact(reader, &mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> CapturerResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            CapturerError::ipc("Stream ended in the middle of a message")
        } else {
            CapturerError::Io(e)
        }
    })
}

/// Iterate over the frames on a stream, stopping at end of stream.
///
/// Non-frame messages are skipped. A read error is yielded once and ends
/// the iteration.
pub fn frames<R: Read>(reader: R) -> FrameStream<R> {
    FrameStream {
        reader,
        done: false,
    }
}

pub struct FrameStream<R> {
    reader: R,
    done: bool,
}

impl<R: Read> Iterator for FrameStream<R> {
    type Item = CapturerResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match read_message(&mut self.reader) {
                Ok(Some(Message::Frame(frame))) => return Some(Ok(frame)),
                Ok(Some(_)) => continue,
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
