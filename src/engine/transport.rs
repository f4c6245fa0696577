//! Loop transport state machine
//!
//! Owns the playhead, direction, loop range and both fade ramps. Output is
//! produced one frame at a time: the loop ramp shapes frames read from the
//! track around the wrap point, the transport ramp shapes the final output
//! around play/pause, and a one-pole smoother follows the master gain.
//!
//! With hold-at-boundary set, a wrap parks the playhead on the wrap target
//! instead of looping. The loop ramp is already at zero there, so the
//! transport stays silent until a new track is loaded or it is resumed.
//!
//! With unity tempo and pitch the transport reads the track straight into
//! the output ([`render`](LoopTransport::render)). Otherwise it runs the
//! draw-down loop against a [`TimeStretchEngine`]
//! ([`render_stretched`](LoopTransport::render_stretched)), reading track
//! frames only as the stretcher asks for them.

use super::arena::ScratchArena;
use super::controls::{Direction, LoopRange};
use super::ramp::FadeRamp;
use super::stretch::TimeStretchEngine;
use crate::audio::Track;

/// Consecutive empty stretch passes before a block gives up and pads silence
const MAX_STRETCH_STALLS: usize = 8;

/// Gain smoother pole, per frame
const GAIN_SMOOTHING: f32 = 0.999;

/// Fade and pause lengths, in frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Fade around loop wraps
    pub loop_fade_frames: usize,
    /// Fade on play and pause
    pub transport_fade_frames: usize,
    /// How far the playhead steps back once a pause completes
    pub pause_rewind_frames: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            loop_fade_frames: 256,
            transport_fade_frames: 2048,
            pause_rewind_frames: 0,
        }
    }
}

/// What happened during one rendered block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockReport {
    /// Loop wraps taken
    pub crossings: u32,
    /// Playback resumed from stopped
    pub started: bool,
    /// The stop fade reached zero
    pub stopped: bool,
}

pub struct LoopTransport {
    config: TransportConfig,
    position: usize,
    direction: Direction,
    range: LoopRange,
    loop_ramp: FadeRamp,
    transport_ramp: FadeRamp,
    running: bool,
    play_requested: bool,
    /// Generation of the track the playhead belongs to
    generation: Option<u64>,
    hold_at_boundary: bool,
    /// Stopped on the wrap target by hold-at-boundary
    parked: bool,
    crossings: u32,
    target_gain: f32,
    smoothed_gain: f32,
    /// Stretch input, filled from the track
    source: ScratchArena,
    /// Stretch output, drained from the engine
    drained: ScratchArena,
}

impl LoopTransport {
    /// `max_block` bounds both a stretch input pass and a drained chunk.
    pub fn new(config: TransportConfig, max_block: usize, autoplay: bool) -> Self {
        let max_block = max_block.max(1);
        let transport_ramp = if autoplay {
            FadeRamp::full(config.transport_fade_frames)
        } else {
            FadeRamp::silent(config.transport_fade_frames)
        };
        Self {
            config,
            position: 0,
            direction: Direction::Forward,
            range: LoopRange::full(1),
            loop_ramp: FadeRamp::silent(config.loop_fade_frames),
            transport_ramp,
            running: autoplay,
            play_requested: autoplay,
            generation: None,
            hold_at_boundary: false,
            parked: false,
            crossings: 0,
            target_gain: 1.0,
            smoothed_gain: 1.0,
            source: ScratchArena::new(2, max_block),
            drained: ScratchArena::new(2, max_block),
        }
    }

    pub fn config(&self) -> TransportConfig {
        self.config
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn range(&self) -> LoopRange {
        self.range
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn loop_ramp(&self) -> FadeRamp {
        self.loop_ramp
    }

    pub fn transport_ramp(&self) -> FadeRamp {
        self.transport_ramp
    }

    /// Reset for a newly handed-off track
    pub fn load(&mut self, range: LoopRange, generation: u64) {
        self.range = range;
        self.generation = Some(generation);
        self.position = self.start_position();
        self.loop_ramp = FadeRamp::silent(self.loop_fade_step());
        self.parked = false;
        self.crossings = 0;
        self.smoothed_gain = self.target_gain;
    }

    /// Take a new range; the playhead is pulled inside it if needed.
    pub fn set_range(&mut self, range: LoopRange) {
        if range == self.range {
            return;
        }
        self.range = range;
        self.loop_ramp.set_step(self.loop_fade_step());
        self.position = self.clamp_position(self.position);
    }

    /// Flip the sign of advance; the playhead stays where it is.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Park at the next wrap. Clearing the hold also leaves a parked wrap.
    pub fn set_hold_at_boundary(&mut self, hold: bool) {
        self.hold_at_boundary = hold;
        if !hold {
            self.parked = false;
        }
    }

    /// Leave a parked wrap; the loop fades back in from the wrap target.
    pub fn resume(&mut self) {
        self.parked = false;
    }

    pub fn set_play_requested(&mut self, play: bool) {
        self.play_requested = play;
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.target_gain = gain;
    }

    /// Move the playhead, clamped into the loop range
    pub fn seek(&mut self, frame: usize) {
        self.position = self.clamp_position(frame);
    }

    /// First frame played in the current direction
    pub fn start_position(&self) -> usize {
        match self.direction {
            Direction::Forward => self.range.left,
            Direction::Backward => self.range.right - 1,
        }
    }

    /// Step the playhead `frames` frames through the loop without producing
    /// output. Returns the frames consumed: zero with no track.
    pub fn advance(&mut self, track: Option<&Track>, frames: usize) -> usize {
        let Some(track) = track else {
            return 0;
        };
        for _ in 0..frames {
            self.step(track);
        }
        frames
    }

    /// Render `frames` stereo frames into `out` reading the track directly.
    pub fn render(
        &mut self,
        track: Option<&Track>,
        out: &mut [f32],
        frames: usize,
    ) -> BlockReport {
        let mut report = BlockReport::default();
        let Some(track) = track else {
            silence(out, 0, frames);
            return report;
        };

        for i in 0..frames {
            let Some(gain) = self.transport_gain(&mut report) else {
                silence(out, i, frames);
                break;
            };
            let frame = self.step(track);
            out[i * 2] = frame[0] * gain;
            out[i * 2 + 1] = frame[1] * gain;
        }

        report.crossings = self.take_crossings();
        report
    }

    /// Render `frames` stereo frames through the stretch engine.
    ///
    /// Draw-down: drain what the engine has ready, and when it runs dry feed
    /// it just enough track frames for the rest of the block.
    pub fn render_stretched(
        &mut self,
        track: Option<&Track>,
        stretch: &mut TimeStretchEngine,
        out: &mut [f32],
        frames: usize,
    ) -> BlockReport {
        let mut report = BlockReport::default();
        let Some(track) = track else {
            silence(out, 0, frames);
            return report;
        };
        if !self.running && !self.play_requested {
            silence(out, 0, frames);
            return report;
        }

        let max_input = stretch.max_process_size().min(self.source.capacity());
        let mut written = 0;
        let mut stalls = 0;

        'block: while written < frames {
            if stretch.available() == 0 {
                let wanted = stretch
                    .input_frames_for(frames - written)
                    .clamp(1, max_input);
                for i in 0..wanted {
                    let frame = self.step(track);
                    self.source.set_frame(i, frame);
                }
                stretch.process(&self.source, wanted, false);

                if stretch.available() == 0 {
                    stalls += 1;
                    if stalls >= MAX_STRETCH_STALLS {
                        break;
                    }
                    continue;
                }
            }
            stalls = 0;

            let got = stretch.retrieve(&mut self.drained, frames - written);
            for j in 0..got {
                let Some(gain) = self.transport_gain(&mut report) else {
                    break 'block;
                };
                let frame = self.drained.frame(j);
                out[written * 2] = frame[0] * gain;
                out[written * 2 + 1] = frame[1] * gain;
                written += 1;
            }
        }

        // Anything not written (stop, stall) is silence
        silence(out, written, frames);

        report.crossings = self.take_crossings();
        report
    }

    /// Wraps since the last call
    pub fn take_crossings(&mut self) -> u32 {
        std::mem::take(&mut self.crossings)
    }

    /// Read one frame under the loop ramp and move the playhead.
    #[inline]
    fn step(&mut self, track: &Track) -> [f32; 2] {
        if self.parked {
            return [0.0, 0.0];
        }
        if self.position >= track.frames() || !self.range.contains(self.position) {
            self.position = self.start_position().min(track.frames() - 1);
        }

        let p = self.position;
        let remaining = match self.direction {
            Direction::Forward => self.range.right.saturating_sub(p),
            Direction::Backward => p + 1 - self.range.left.min(p),
        };
        if remaining <= self.loop_ramp.step() {
            self.loop_ramp.fall_within(remaining.saturating_sub(1));
        } else {
            self.loop_ramp.rise();
        }

        let frame = track.frame(p);
        let gain = self.loop_ramp.gain();

        match self.direction {
            Direction::Forward => {
                let next = p + 1;
                if next >= self.range.right {
                    self.position = self.range.left + (next - self.range.right);
                    self.crossings += 1;
                    self.parked = self.hold_at_boundary;
                } else {
                    self.position = next;
                }
            }
            Direction::Backward => {
                if p <= self.range.left {
                    self.position = self.range.right - 1;
                    self.crossings += 1;
                    self.parked = self.hold_at_boundary;
                } else {
                    self.position = p - 1;
                }
            }
        }

        [frame[0] * gain, frame[1] * gain]
    }

    /// Advance the play/pause fade and the gain smoother for one output
    /// frame. `None` means the frame is silent and nothing should be read.
    #[inline]
    fn transport_gain(&mut self, report: &mut BlockReport) -> Option<f32> {
        if self.play_requested {
            if !self.running {
                self.running = true;
                report.started = true;
            }
            self.transport_ramp.rise();
        } else if self.running {
            self.transport_ramp.fall();
            if self.transport_ramp.is_silent() {
                self.running = false;
                report.stopped = true;
                self.rewind_after_pause();
                return None;
            }
        } else {
            return None;
        }

        self.smoothed_gain =
            (1.0 - GAIN_SMOOTHING) * self.target_gain + GAIN_SMOOTHING * self.smoothed_gain;
        Some(self.transport_ramp.gain() * self.smoothed_gain)
    }

    fn rewind_after_pause(&mut self) {
        let back = self.config.pause_rewind_frames;
        if back == 0 {
            return;
        }
        self.position = match self.direction {
            Direction::Forward => self.position.saturating_sub(back).max(self.range.left),
            Direction::Backward => (self.position + back).min(self.range.right - 1),
        };
    }

    /// Loop fade length, shortened so it never covers more than half a loop
    fn loop_fade_step(&self) -> usize {
        self.config
            .loop_fade_frames
            .min(self.range.len() / 2)
            .max(1)
    }

    fn clamp_position(&self, frame: usize) -> usize {
        frame.clamp(self.range.left, self.range.right - 1)
    }
}

fn silence(out: &mut [f32], from: usize, frames: usize) {
    if from < frames {
        out[from * 2..frames * 2].fill(0.0);
    }
}
