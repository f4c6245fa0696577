//! Time-stretching and pitch shifting
//!
//! [`TimeStretchEngine`] turns input frames at the track's tempo into output
//! frames at `time_ratio` (tempo) and `pitch_scale` (pitch). It is
//! block-pull: callers feed input with [`process`](TimeStretchEngine::process)
//! and drain finished output with [`retrieve`](TimeStretchEngine::retrieve),
//! checking [`available`](TimeStretchEngine::available) in between. All
//! buffers are allocated in [`new`](TimeStretchEngine::new); nothing on the
//! audio path allocates.
//!
//! The actual DSP sits behind [`StretchBackend`]. The backends work on
//! interleaved blocks where the ratio is implied by the input/output sizes,
//! which is how signalsmith-stretch is driven.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use signalsmith_stretch::Stretch;

use super::arena::ScratchArena;
use super::EngineError;
use crate::audio::MAX_CHANNELS;

/// Slowest tempo multiplier accepted
pub const MIN_TIME_RATIO: f64 = 0.25;
/// Fastest tempo multiplier accepted
pub const MAX_TIME_RATIO: f64 = 4.0;
/// Pitch multiplier range (two octaves either way)
pub const MIN_PITCH_SCALE: f64 = 0.25;
pub const MAX_PITCH_SCALE: f64 = 4.0;

/// Channel count the stretcher is built with
const STRETCH_CHANNELS: usize = MAX_CHANNELS;

/// Which stretch algorithm to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchQuality {
    /// signalsmith-stretch default preset
    #[default]
    Standard,
    /// signalsmith-stretch cheaper preset (less CPU)
    Cheaper,
    /// Varispeed: tempo and pitch move together, pitch scale is ignored
    Tape,
}

impl FromStr for StretchQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "cheaper" => Ok(Self::Cheaper),
            "tape" => Ok(Self::Tape),
            other => Err(format!("unknown stretch quality '{}'", other)),
        }
    }
}

/// Per-block stretch parameters, snapshotted from the control atomics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchRequest {
    pub time_ratio: f64,
    pub pitch_scale: f64,
    pub frames_needed: usize,
}

/// Block DSP behind the stretch engine.
///
/// `process` consumes every input frame and writes exactly
/// `output.len() / channels` frames; the ratio of the two lengths is the
/// tempo change.
pub trait StretchBackend: Send {
    fn process(&mut self, input: &[f32], output: &mut [f32]);

    /// Write out whatever is still buffered internally
    fn flush(&mut self, output: &mut [f32]);

    fn set_pitch_scale(&mut self, scale: f64);

    fn reset(&mut self);

    /// Frames of delay between input and output
    fn output_latency(&self) -> usize;
}

/// signalsmith-stretch backend
pub struct SignalsmithBackend {
    stretch: Stretch,
}

impl SignalsmithBackend {
    pub fn new(sample_rate: u32, cheaper: bool) -> Self {
        let channels = STRETCH_CHANNELS as u32;
        let stretch = if cheaper {
            Stretch::preset_cheaper(channels, sample_rate)
        } else {
            Stretch::preset_default(channels, sample_rate)
        };
        Self { stretch }
    }
}

impl StretchBackend for SignalsmithBackend {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        self.stretch.process(input, output);
    }

    fn flush(&mut self, output: &mut [f32]) {
        self.stretch.flush(output);
    }

    fn set_pitch_scale(&mut self, scale: f64) {
        let semitones = 12.0 * scale.log2();
        self.stretch
            .set_transpose_factor_semitones(semitones as f32, None);
    }

    fn reset(&mut self) {
        self.stretch.reset();
    }

    fn output_latency(&self) -> usize {
        self.stretch.output_latency()
    }
}

/// Linear-interpolating varispeed. No latency, no pitch preservation.
#[derive(Debug, Default)]
pub struct TapeBackend {
    /// Last input frame of the previous block, for continuity
    last: [f32; STRETCH_CHANNELS],
}

impl StretchBackend for TapeBackend {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let ch = STRETCH_CHANNELS;
        let in_frames = input.len() / ch;
        let out_frames = output.len() / ch;
        if in_frames == 0 {
            output.fill(0.0);
            return;
        }

        // Source index -1 is the previous block's last frame
        let sample = |index: isize, c: usize| -> f32 {
            if index < 0 {
                self.last[c]
            } else {
                input[(index as usize).min(in_frames - 1) * ch + c]
            }
        };

        let step = in_frames as f64 / out_frames.max(1) as f64;
        for j in 0..out_frames {
            let t = (j + 1) as f64 * step - 1.0;
            let base = t.floor();
            let frac = (t - base) as f32;
            let base = base as isize;
            for c in 0..ch {
                let a = sample(base, c);
                let b = sample(base + 1, c);
                output[j * ch + c] = a + (b - a) * frac;
            }
        }

        let tail = (in_frames - 1) * ch;
        self.last.copy_from_slice(&input[tail..tail + ch]);
    }

    fn flush(&mut self, output: &mut [f32]) {
        output.fill(0.0);
    }

    fn set_pitch_scale(&mut self, _scale: f64) {}

    fn reset(&mut self) {
        self.last = [0.0; STRETCH_CHANNELS];
    }

    fn output_latency(&self) -> usize {
        0
    }
}

/// Block-pull time-stretch engine with a fixed-size output FIFO
pub struct TimeStretchEngine {
    backend: Box<dyn StretchBackend>,
    /// Allocated input capacity per `process` call
    capacity: usize,
    max_process: usize,
    time_ratio: f64,
    pitch_scale: f64,
    /// Fractional output frame carried between calls
    fraction: f64,

    interleaved_in: Vec<f32>,
    interleaved_out: Vec<f32>,

    /// Ready output, ring-indexed by `head`/`len`
    fifo: ScratchArena,
    head: usize,
    len: usize,
}

impl TimeStretchEngine {
    /// Build an engine for `sample_rate` that accepts up to `max_process`
    /// input frames per call.
    pub fn new(
        quality: StretchQuality,
        sample_rate: u32,
        max_process: usize,
    ) -> Result<Self, EngineError> {
        if sample_rate == 0 {
            return Err(EngineError::StretchInit("sample rate is zero".to_string()));
        }
        let backend: Box<dyn StretchBackend> = match quality {
            StretchQuality::Standard => Box::new(SignalsmithBackend::new(sample_rate, false)),
            StretchQuality::Cheaper => Box::new(SignalsmithBackend::new(sample_rate, true)),
            StretchQuality::Tape => Box::new(TapeBackend::default()),
        };
        Self::with_backend(backend, max_process)
    }

    pub fn with_backend(
        backend: Box<dyn StretchBackend>,
        max_process: usize,
    ) -> Result<Self, EngineError> {
        if max_process == 0 {
            return Err(EngineError::StretchInit(
                "max process size is zero".to_string(),
            ));
        }

        // Slowest tempo emits 1/MIN_TIME_RATIO output frames per input frame,
        // plus the flushed tail on a final block
        let max_out = (max_process as f64 / MIN_TIME_RATIO).ceil() as usize
            + backend.output_latency()
            + 1;
        let fifo_frames = max_out + max_process;

        Ok(Self {
            backend,
            capacity: max_process,
            max_process,
            time_ratio: 1.0,
            pitch_scale: 1.0,
            fraction: 0.0,
            interleaved_in: vec![0.0; max_process * STRETCH_CHANNELS],
            interleaved_out: vec![0.0; max_out * STRETCH_CHANNELS],
            fifo: ScratchArena::new(STRETCH_CHANNELS, fifo_frames),
            head: 0,
            len: 0,
        })
    }

    pub fn channel_count(&self) -> usize {
        STRETCH_CHANNELS
    }

    pub fn max_process_size(&self) -> usize {
        self.max_process
    }

    /// Limit input per call; capped at the capacity allocated in `new`.
    pub fn set_max_process_size(&mut self, frames: usize) -> usize {
        self.max_process = frames.clamp(1, self.capacity);
        self.max_process
    }

    pub fn time_ratio(&self) -> f64 {
        self.time_ratio
    }

    pub fn set_time_ratio(&mut self, ratio: f64) {
        self.time_ratio = ratio.clamp(MIN_TIME_RATIO, MAX_TIME_RATIO);
    }

    pub fn pitch_scale(&self) -> f64 {
        self.pitch_scale
    }

    pub fn set_pitch_scale(&mut self, scale: f64) {
        let scale = scale.clamp(MIN_PITCH_SCALE, MAX_PITCH_SCALE);
        if scale != self.pitch_scale {
            self.pitch_scale = scale;
            self.backend.set_pitch_scale(scale);
        }
    }

    /// Take a block's parameters; returns true when no stretching is needed
    pub fn apply(&mut self, request: &StretchRequest) -> bool {
        self.set_time_ratio(request.time_ratio);
        self.set_pitch_scale(request.pitch_scale);
        self.is_unity()
    }

    pub fn is_unity(&self) -> bool {
        self.time_ratio == 1.0 && self.pitch_scale == 1.0
    }

    /// Input frames needed to produce `output_frames` more output
    pub fn input_frames_for(&self, output_frames: usize) -> usize {
        (output_frames as f64 * self.time_ratio).ceil() as usize
    }

    /// Feed up to `max_process_size()` frames from `input`.
    ///
    /// With `is_final` the backend's tail is flushed into the FIFO as well.
    /// Output that does not fit in the FIFO is dropped, never reallocated.
    pub fn process(&mut self, input: &ScratchArena, frames: usize, is_final: bool) {
        let ch = STRETCH_CHANNELS;
        let frames = frames.min(self.max_process).min(input.capacity());

        if frames > 0 {
            let exact = frames as f64 / self.time_ratio + self.fraction;
            let mut out_frames = exact.floor() as usize;
            self.fraction = exact - out_frames as f64;
            out_frames = out_frames
                .min(self.free())
                .min(self.interleaved_out.len() / ch);

            for i in 0..frames {
                let frame = input.frame(i);
                self.interleaved_in[i * ch..i * ch + ch].copy_from_slice(&frame);
            }

            self.backend.process(
                &self.interleaved_in[..frames * ch],
                &mut self.interleaved_out[..out_frames * ch],
            );
            self.push_output(out_frames);
        }

        if is_final {
            let tail = self
                .backend
                .output_latency()
                .min(self.free())
                .min(self.interleaved_out.len() / ch);
            self.backend.flush(&mut self.interleaved_out[..tail * ch]);
            self.push_output(tail);
        }
    }

    /// Output frames ready to retrieve
    pub fn available(&self) -> usize {
        self.len
    }

    /// Drain up to `max_frames` ready frames into `output`
    pub fn retrieve(&mut self, output: &mut ScratchArena, max_frames: usize) -> usize {
        let got = self.len.min(max_frames).min(output.capacity());
        let cap = self.fifo.capacity();
        for i in 0..got {
            output.set_frame(i, self.fifo.frame((self.head + i) % cap));
        }
        self.head = (self.head + got) % cap;
        self.len -= got;
        got
    }

    /// Drop buffered output and the backend's history
    pub fn reset(&mut self) {
        self.backend.reset();
        self.head = 0;
        self.len = 0;
        self.fraction = 0.0;
    }

    fn free(&self) -> usize {
        self.fifo.capacity() - self.len
    }

    fn push_output(&mut self, frames: usize) {
        let ch = STRETCH_CHANNELS;
        let cap = self.fifo.capacity();
        for i in 0..frames {
            let idx = (self.head + self.len + i) % cap;
            let frame = [self.interleaved_out[i * ch], self.interleaved_out[i * ch + 1]];
            self.fifo.set_frame(idx, frame);
        }
        self.len += frames;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_input(frames: usize, offset: usize) -> ScratchArena {
        let mut arena = ScratchArena::new(2, frames);
        for i in 0..frames {
            let v = (offset + i) as f32;
            arena.set_frame(i, [v, -v]);
        }
        arena
    }

    fn tape(max_process: usize) -> TimeStretchEngine {
        TimeStretchEngine::with_backend(Box::new(TapeBackend::default()), max_process).unwrap()
    }

    #[test]
    fn test_rejects_zero_process_size() {
        let result = TimeStretchEngine::with_backend(Box::new(TapeBackend::default()), 0);
        assert!(matches!(result, Err(EngineError::StretchInit(_))));
    }

    #[test]
    fn test_unity_tape_is_identity() {
        let mut engine = tape(64);
        let input = ramp_input(64, 0);
        engine.process(&input, 64, false);
        assert_eq!(engine.available(), 64);

        let mut out = ScratchArena::new(2, 64);
        assert_eq!(engine.retrieve(&mut out, 64), 64);
        for i in 0..64 {
            assert_eq!(out.frame(i), input.frame(i));
        }
    }

    #[test]
    fn test_conservation_over_many_blocks() {
        let mut engine = tape(512);
        engine.set_time_ratio(1.5);
        let mut out = ScratchArena::new(2, 256);

        let mut fed = 0;
        let mut retrieved = 0;
        for block in 0..100 {
            let input = ramp_input(512, block * 512);
            engine.process(&input, 512, false);
            fed += 512;

            while engine.available() > 0 {
                let before = engine.available();
                let got = engine.retrieve(&mut out, 100);
                assert!(got <= before);
                assert!(got <= 100);
                retrieved += got;
            }
        }

        let expected = fed as f64 / 1.5;
        assert!((retrieved as f64 - expected).abs() <= 1.0);
    }

    #[test]
    fn test_slow_tempo_fills_more_output() {
        let mut engine = tape(128);
        engine.set_time_ratio(0.5);
        engine.process(&ramp_input(128, 0), 128, false);
        assert_eq!(engine.available(), 256);
    }

    #[test]
    fn test_process_caps_at_max_size() {
        let mut engine = tape(256);
        engine.set_max_process_size(100);
        engine.process(&ramp_input(256, 0), 256, false);
        assert_eq!(engine.available(), 100);
    }

    #[test]
    fn test_set_max_process_size_cannot_grow() {
        let mut engine = tape(256);
        assert_eq!(engine.set_max_process_size(10_000), 256);
        assert_eq!(engine.set_max_process_size(0), 1);
    }

    #[test]
    fn test_reset_discards_output() {
        let mut engine = tape(64);
        engine.process(&ramp_input(64, 0), 64, false);
        assert!(engine.available() > 0);
        engine.reset();
        assert_eq!(engine.available(), 0);
    }

    #[test]
    fn test_ratio_and_pitch_are_clamped() {
        let mut engine = tape(64);
        engine.set_time_ratio(100.0);
        engine.set_pitch_scale(0.001);
        assert_eq!(engine.time_ratio(), MAX_TIME_RATIO);
        assert_eq!(engine.pitch_scale(), MIN_PITCH_SCALE);
        assert!(!engine.is_unity());
    }

    #[test]
    fn test_apply_reports_unity() {
        let mut engine = tape(64);
        let request = StretchRequest {
            time_ratio: 1.0,
            pitch_scale: 1.0,
            frames_needed: 64,
        };
        assert!(engine.apply(&request));
        let pitched = StretchRequest {
            pitch_scale: 2.0,
            ..request
        };
        assert!(!engine.apply(&pitched));
    }

    #[test]
    fn test_signalsmith_frame_counts() {
        let mut engine = TimeStretchEngine::new(StretchQuality::Standard, 48000, 1024).unwrap();
        engine.set_time_ratio(2.0);
        engine.process(&ramp_input(1024, 0), 1024, false);
        assert_eq!(engine.available(), 512);

        engine.process(&ramp_input(10, 0), 10, true);
        assert!(engine.available() > 517);
    }

    #[test]
    fn test_quality_from_str() {
        assert_eq!("Tape".parse::<StretchQuality>(), Ok(StretchQuality::Tape));
        assert!("rubber".parse::<StretchQuality>().is_err());
    }
}
