//! Lock-free control plane
//!
//! Scalar state shared between the control thread and the audio callback.
//! The control thread writes requests (gain, tempo, direction, loop range,
//! play/stop, seek); the callback reads them once per block and publishes
//! position and run state back. Everything is a plain atomic: no locks, and
//! eventual consistency within one block is acceptable.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use thiserror::Error;

/// Sentinel for "no seek pending"
const NO_SEEK: u64 = u64::MAX;

/// Errors from loop/seek mutations. The previous state is always kept.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    #[error("No track loaded")]
    NoTrack,

    #[error("Frame {frame} is outside the track ({frames} frames)")]
    OutOfRange { frame: usize, frames: usize },

    #[error("Loop left {left} must be below loop right {right}")]
    Inverted { left: usize, right: usize },
}

/// Playback direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    pub fn toggled(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn is_backward(self) -> bool {
        self == Direction::Backward
    }
}

/// The `[left, right]` frame window the transport cycles within.
///
/// Invariant: `left < right`. Bounds are kept below `u32::MAX` so the pair
/// packs into one `AtomicU64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRange {
    pub left: usize,
    pub right: usize,
}

impl LoopRange {
    /// Validated range within a track of `frames` frames
    pub fn new(left: usize, right: usize, frames: usize) -> Result<Self, BoundsError> {
        if right > frames {
            return Err(BoundsError::OutOfRange { frame: right, frames });
        }
        if left >= right {
            return Err(BoundsError::Inverted { left, right });
        }
        Ok(Self { left, right })
    }

    /// The whole track
    pub fn full(frames: usize) -> Self {
        Self {
            left: 0,
            right: frames.max(1),
        }
    }

    /// Range from stored playlist bounds; `None` or out-of-range right means
    /// "end of track", an unusable left falls back to the track start.
    pub fn from_bounds(left: usize, right: Option<usize>, frames: usize) -> Self {
        let right = right.unwrap_or(frames).min(frames);
        Self::new(left, right, frames).unwrap_or_else(|_| Self::full(frames))
    }

    pub fn len(&self) -> usize {
        self.right - self.left
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left
    }

    pub fn contains(&self, position: usize) -> bool {
        self.left <= position && position <= self.right
    }

    /// Clamp to a track of `frames` frames, falling back to the full track
    /// when nothing valid remains.
    pub fn fit_to(self, frames: usize) -> Self {
        let right = self.right.min(frames);
        if self.left < right {
            Self {
                left: self.left,
                right,
            }
        } else {
            Self::full(frames)
        }
    }

    /// Move the left bound. A left bound past the playhead is clamped to the
    /// playhead so the editable bound never crosses live playback.
    pub fn with_left(self, left: usize, position: usize, frames: usize) -> Result<Self, BoundsError> {
        if left >= frames {
            return Err(BoundsError::OutOfRange { frame: left, frames });
        }
        let left = left.min(position);
        if left >= self.right {
            return Err(BoundsError::Inverted {
                left,
                right: self.right,
            });
        }
        Ok(Self {
            left,
            right: self.right,
        })
    }

    /// Move the right bound; mirror image of [`with_left`](Self::with_left).
    pub fn with_right(self, right: usize, position: usize, frames: usize) -> Result<Self, BoundsError> {
        if right > frames {
            return Err(BoundsError::OutOfRange { frame: right, frames });
        }
        let right = right.max(position);
        if self.left >= right {
            return Err(BoundsError::Inverted {
                left: self.left,
                right,
            });
        }
        Ok(Self {
            left: self.left,
            right,
        })
    }

    fn pack(self) -> u64 {
        ((self.left as u64) << 32) | (self.right as u64 & 0xFFFF_FFFF)
    }

    fn unpack(bits: u64) -> Self {
        Self {
            left: (bits >> 32) as usize,
            right: (bits & 0xFFFF_FFFF) as usize,
        }
    }
}

/// Atomics shared by the control thread and the audio callback
#[derive(Debug)]
pub struct SharedControls {
    // Written by the control thread
    /// Master gain (f32 bits)
    gain: AtomicU32,
    /// Tempo multiplier (f64 bits)
    time_ratio: AtomicU64,
    /// Pitch multiplier (f64 bits)
    pitch_scale: AtomicU64,
    backwards: AtomicBool,
    play_requested: AtomicBool,
    /// Packed [`LoopRange`]
    loop_range: AtomicU64,
    seek: AtomicU64,
    /// Park silently at the next wrap instead of looping
    hold_at_boundary: AtomicBool,
    /// One-shot: leave a parked boundary and keep looping
    resume: AtomicBool,

    // Published by the audio callback
    position: AtomicU64,
    running: AtomicBool,
    frame_count: AtomicU64,
    generation: AtomicU64,
}

impl SharedControls {
    pub fn new(play_requested: bool) -> Self {
        Self {
            gain: AtomicU32::new(1.0_f32.to_bits()),
            time_ratio: AtomicU64::new(1.0_f64.to_bits()),
            pitch_scale: AtomicU64::new(1.0_f64.to_bits()),
            backwards: AtomicBool::new(false),
            play_requested: AtomicBool::new(play_requested),
            loop_range: AtomicU64::new(LoopRange::full(1).pack()),
            seek: AtomicU64::new(NO_SEEK),
            hold_at_boundary: AtomicBool::new(false),
            resume: AtomicBool::new(false),
            position: AtomicU64::new(0),
            running: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn time_ratio(&self) -> f64 {
        f64::from_bits(self.time_ratio.load(Ordering::Relaxed))
    }

    pub fn set_time_ratio(&self, ratio: f64) {
        self.time_ratio.store(ratio.to_bits(), Ordering::Relaxed);
    }

    pub fn pitch_scale(&self) -> f64 {
        f64::from_bits(self.pitch_scale.load(Ordering::Relaxed))
    }

    pub fn set_pitch_scale(&self, scale: f64) {
        self.pitch_scale.store(scale.to_bits(), Ordering::Relaxed);
    }

    pub fn direction(&self) -> Direction {
        if self.backwards.load(Ordering::Relaxed) {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    pub fn set_direction(&self, direction: Direction) {
        self.backwards
            .store(direction.is_backward(), Ordering::Relaxed);
    }

    pub fn play_requested(&self) -> bool {
        self.play_requested.load(Ordering::Relaxed)
    }

    pub fn set_play_requested(&self, play: bool) {
        self.play_requested.store(play, Ordering::Relaxed);
    }

    pub fn loop_range(&self) -> LoopRange {
        LoopRange::unpack(self.loop_range.load(Ordering::Acquire))
    }

    pub fn store_loop_range(&self, range: LoopRange) {
        self.loop_range.store(range.pack(), Ordering::Release);
    }

    pub fn request_seek(&self, frame: usize) {
        self.seek.store(frame as u64, Ordering::Release);
    }

    /// Consume a pending seek (audio thread)
    pub fn take_seek(&self) -> Option<usize> {
        match self.seek.swap(NO_SEEK, Ordering::Acquire) {
            NO_SEEK => None,
            frame => Some(frame as usize),
        }
    }

    pub fn hold_at_boundary(&self) -> bool {
        self.hold_at_boundary.load(Ordering::Relaxed)
    }

    pub fn set_hold_at_boundary(&self, hold: bool) {
        self.hold_at_boundary.store(hold, Ordering::Relaxed);
    }

    pub fn request_resume(&self) {
        self.resume.store(true, Ordering::Release);
    }

    /// Consume a pending resume (audio thread)
    pub fn take_resume(&self) -> bool {
        self.resume.swap(false, Ordering::Acquire)
    }

    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed) as usize
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count.load(Ordering::Acquire) as usize
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Publish transport state (audio thread, once per block)
    pub fn publish(&self, position: usize, running: bool) {
        self.position.store(position as u64, Ordering::Relaxed);
        self.running.store(running, Ordering::Relaxed);
    }

    /// Publish a newly started track (audio thread)
    pub fn publish_track(&self, generation: u64, frames: usize, range: LoopRange) {
        self.store_loop_range(range);
        self.frame_count.store(frames as u64, Ordering::Release);
        self.generation.store(generation, Ordering::Release);
    }
}

impl Default for SharedControls {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        assert!(LoopRange::new(0, 100, 100).is_ok());
        assert_eq!(
            LoopRange::new(50, 50, 100),
            Err(BoundsError::Inverted { left: 50, right: 50 })
        );
        assert_eq!(
            LoopRange::new(0, 101, 100),
            Err(BoundsError::OutOfRange { frame: 101, frames: 100 })
        );
    }

    #[test]
    fn test_pack_roundtrip_extremes() {
        let range = LoopRange {
            left: u32::MAX as usize - 1,
            right: u32::MAX as usize,
        };
        assert_eq!(LoopRange::unpack(range.pack()), range);
    }

    #[test]
    fn test_left_clamped_to_playhead() {
        let range = LoopRange::full(10_000);
        let edited = range.with_left(6000, 4000, 10_000).unwrap();
        assert_eq!(edited.left, 4000);
        assert_eq!(edited.right, 10_000);
    }

    #[test]
    fn test_right_clamped_to_playhead() {
        let range = LoopRange::full(10_000);
        let edited = range.with_right(2000, 4000, 10_000).unwrap();
        assert_eq!(edited.right, 4000);
    }

    #[test]
    fn test_edit_rejects_inversion() {
        let range = LoopRange::new(100, 200, 1000).unwrap();
        let err = range.with_right(50, 0, 1000).unwrap_err();
        assert_eq!(err, BoundsError::Inverted { left: 100, right: 50 });
    }

    #[test]
    fn test_from_bounds_falls_back() {
        assert_eq!(LoopRange::from_bounds(0, None, 500), LoopRange::full(500));
        assert_eq!(
            LoopRange::from_bounds(100, Some(u32::MAX as usize), 500),
            LoopRange { left: 100, right: 500 }
        );
        assert_eq!(LoopRange::from_bounds(600, None, 500), LoopRange::full(500));
    }

    #[test]
    fn test_fit_to_shorter_track() {
        let range = LoopRange { left: 100, right: 9000 };
        assert_eq!(range.fit_to(5000), LoopRange { left: 100, right: 5000 });
        assert_eq!(range.fit_to(50), LoopRange::full(50));
    }

    #[test]
    fn test_seek_is_consumed_once() {
        let controls = SharedControls::default();
        assert_eq!(controls.take_seek(), None);
        controls.request_seek(1234);
        assert_eq!(controls.take_seek(), Some(1234));
        assert_eq!(controls.take_seek(), None);
    }

    #[test]
    fn test_resume_is_consumed_once() {
        let controls = SharedControls::default();
        assert!(!controls.take_resume());
        controls.request_resume();
        assert!(controls.take_resume());
        assert!(!controls.take_resume());
    }

    #[test]
    fn test_gain_bits() {
        let controls = SharedControls::default();
        controls.set_gain(0.5);
        assert_eq!(controls.gain(), 0.5);
        controls.set_gain(-1.0);
        assert_eq!(controls.gain(), 0.0);
    }
}
