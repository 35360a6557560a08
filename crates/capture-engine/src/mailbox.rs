//! Latest-frame mailbox and the state shared by one recording's loops.
//!
//! Each field has a single writer: the capture reader stores frames, the
//! sampler counts enqueued frames, the encode side reports written frames
//! and only the orchestrator flips `active`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::frame::Frame;

/// A single-slot, most-recent-wins frame cell.
///
/// Storing replaces whatever was there; nothing is queued, so memory stays
/// at one frame no matter how far capture outruns the reader.
#[derive(Debug, Default)]
pub struct LatestFrameSlot {
    slot: Mutex<Option<Frame>>,
    stores: AtomicU64,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot with a newer frame.
    pub fn store(&self, frame: Frame) {
        *self.slot.lock() = Some(frame);
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// The most recent frame, if any was ever stored.
    pub fn latest(&self) -> Option<Frame> {
        self.slot.lock().clone()
    }

    /// Sequence number of the most recent frame.
    pub fn latest_sequence(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|f| f.sequence)
    }

    /// How many frames have been stored, including overwritten ones.
    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }
}

/// State shared by the capture, sampling and encode sides of one recording.
#[derive(Debug)]
pub struct SharedRecordingState {
    active: AtomicBool,
    frames_enqueued: AtomicU64,
    frames_written: AtomicU64,
    mailbox: LatestFrameSlot,
}

impl SharedRecordingState {
    /// New state with the active flag set.
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            frames_enqueued: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            mailbox: LatestFrameSlot::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Clear the active flag. Every loop observes this and winds down.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn mailbox(&self) -> &LatestFrameSlot {
        &self.mailbox
    }

    pub fn record_enqueued(&self) -> u64 {
        self.frames_enqueued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn frames_enqueued(&self) -> u64 {
        self.frames_enqueued.load(Ordering::SeqCst)
    }

    /// Publish the encoder's running total of written frames.
    pub fn set_frames_written(&self, total: u64) {
        self.frames_written.fetch_max(total, Ordering::SeqCst);
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }
}

impl Default for SharedRecordingState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(sequence: u64) -> Frame {
        Frame::new(Bytes::from(vec![0u8; 4 * 8 * 8]), 8, 8, sequence, sequence * 1000)
    }

    #[test]
    fn test_slot_starts_empty() {
        let slot = LatestFrameSlot::new();
        assert!(slot.latest().is_none());
        assert_eq!(slot.stores(), 0);
    }

    #[test]
    fn test_slot_keeps_only_most_recent() {
        let slot = LatestFrameSlot::new();
        for seq in 0..10_000 {
            slot.store(frame(seq));
        }
        assert_eq!(slot.latest_sequence(), Some(9_999));
        assert_eq!(slot.stores(), 10_000);
    }

    #[test]
    fn test_overrun_does_not_retain_old_buffers() {
        let slot = LatestFrameSlot::new();
        let first = frame(0);
        let first_buffer = first.data.clone();
        slot.store(first);
        for seq in 1..100 {
            slot.store(frame(seq));
        }
        // Only this handle still references the first buffer.
        assert!(first_buffer.is_unique());
    }

    #[test]
    fn test_written_counter_is_monotonic() {
        let state = SharedRecordingState::new();
        state.set_frames_written(5);
        state.set_frames_written(3);
        assert_eq!(state.frames_written(), 5);
        assert_eq!(state.record_enqueued(), 1);
        assert!(state.is_active());
        state.deactivate();
        assert!(!state.is_active());
    }
}
