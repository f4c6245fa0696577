//! Real-time loop engine
//!
//! This module provides:
//! - [`EngineProcessor`]: owned by the audio callback, renders blocks
//! - [`EngineHandle`]: owned by the control side, edits atomics and reads
//!   transport events
//! - [`Prefetcher`]: background loading into the [`SyncBarrier`]
//!
//! [`build_engine`] creates a connected handle/processor pair.

mod arena;
mod controls;
mod events;
mod prefetch;
mod ramp;
mod stretch;
mod sync;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use arena::ScratchArena;
pub use controls::{BoundsError, Direction, LoopRange, SharedControls};
pub use events::{event_channel, EventConsumer, EventProducer, TransportEvent};
pub use prefetch::{LoadRequest, PrefetchEvent, Prefetcher};
pub use ramp::FadeRamp;
pub use stretch::{
    SignalsmithBackend, StretchBackend, StretchQuality, StretchRequest, TapeBackend,
    TimeStretchEngine, MAX_PITCH_SCALE, MAX_TIME_RATIO, MIN_PITCH_SCALE, MIN_TIME_RATIO,
};
pub use sync::{LoadedTrack, SyncBarrier, SyncError, DEFAULT_HANDOFF_TIMEOUT};
pub use transport::{BlockReport, LoopTransport, TransportConfig};

/// Errors raised while building the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to initialise time stretcher: {0}")]
    StretchInit(String),

    #[error(transparent)]
    Bounds(#[from] BoundsError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Output rate; tracks are resampled to it before handoff
    pub sample_rate: u32,
    /// Largest block rendered or stretched in one pass
    pub max_process_size: usize,
    pub transport: TransportConfig,
    pub stretch_quality: StretchQuality,
    /// Transport events buffered between polls
    pub event_capacity: usize,
    /// Start playing as soon as a track arrives
    pub autoplay: bool,
    pub handoff_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            max_process_size: 4096,
            transport: TransportConfig::default(),
            stretch_quality: StretchQuality::default(),
            event_capacity: 64,
            autoplay: true,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
        }
    }
}

/// Result of one audio callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Audio was produced
    Playing,
    /// A track is loaded but the transport is paused
    Stopped,
    /// No track, or a swap was in flight
    Silent,
}

/// Create a connected control handle and audio processor
pub fn build_engine(config: EngineConfig) -> Result<(EngineHandle, EngineProcessor), EngineError> {
    if config.max_process_size == 0 {
        return Err(EngineError::StretchInit(
            "max process size is zero".to_string(),
        ));
    }
    let stretch = TimeStretchEngine::new(
        config.stretch_quality,
        config.sample_rate,
        config.max_process_size,
    )?;

    let controls = Arc::new(SharedControls::new(config.autoplay));
    let barrier = Arc::new(SyncBarrier::with_timeout(config.handoff_timeout));
    let (producer, consumer) = event_channel(config.event_capacity);

    let processor = EngineProcessor {
        controls: Arc::clone(&controls),
        barrier: Arc::clone(&barrier),
        transport: LoopTransport::new(config.transport, config.max_process_size, config.autoplay),
        stretch,
        events: producer,
        stretching: false,
        max_block: config.max_process_size,
    };

    let handle = EngineHandle {
        controls,
        barrier,
        events: consumer,
        config,
    };

    Ok((handle, processor))
}

/// Audio-thread half of the engine
pub struct EngineProcessor {
    controls: Arc<SharedControls>,
    barrier: Arc<SyncBarrier>,
    transport: LoopTransport,
    stretch: TimeStretchEngine,
    events: EventProducer,
    /// The previous block went through the stretcher
    stretching: bool,
    max_block: usize,
}

impl EngineProcessor {
    /// Render `frames` interleaved stereo frames into `out`.
    ///
    /// `out` is always fully written; anything that cannot be played is
    /// silence. Never blocks or allocates.
    pub fn process(&mut self, out: &mut [f32], frames: usize) -> ProcessStatus {
        let frames = frames.min(out.len() / 2);
        let Self {
            controls,
            barrier,
            transport,
            stretch,
            events,
            stretching,
            max_block,
        } = self;

        let guard = barrier.acquire();
        let loaded = guard.as_ref().and_then(|slot| slot.as_ref());

        let status = match loaded {
            None => {
                out[..frames * 2].fill(0.0);
                ProcessStatus::Silent
            }
            Some(loaded) => {
                let track = &loaded.track;

                if transport.generation() != Some(loaded.generation) {
                    transport.set_direction(controls.direction());
                    transport.load(loaded.range, loaded.generation);
                    controls.publish_track(loaded.generation, track.frames(), loaded.range);
                    stretch.reset();
                    events.push(TransportEvent::TrackStarted {
                        generation: loaded.generation,
                        frames: track.frames(),
                    });
                }

                transport.set_range(controls.loop_range().fit_to(track.frames()));
                transport.set_direction(controls.direction());
                transport.set_gain(controls.gain());
                transport.set_play_requested(controls.play_requested());
                transport.set_hold_at_boundary(controls.hold_at_boundary());
                if controls.take_resume() {
                    transport.resume();
                }
                if let Some(frame) = controls.take_seek() {
                    transport.seek(frame);
                    stretch.reset();
                }

                let request = StretchRequest {
                    time_ratio: controls.time_ratio(),
                    pitch_scale: controls.pitch_scale(),
                    frames_needed: frames,
                };
                let unity = stretch.apply(&request);
                if !unity && !*stretching {
                    stretch.reset();
                }
                *stretching = !unity;

                let mut offset = 0;
                while offset < frames {
                    let n = (frames - offset).min(*max_block);
                    let block = &mut out[offset * 2..(offset + n) * 2];
                    let report = if unity {
                        transport.render(Some(track), block, n)
                    } else {
                        transport.render_stretched(Some(track), stretch, block, n)
                    };

                    for _ in 0..report.crossings {
                        events.push(TransportEvent::BoundaryCrossed {
                            generation: loaded.generation,
                            direction: transport.direction(),
                        });
                    }
                    if report.started {
                        events.push(TransportEvent::Started);
                    }
                    if report.stopped {
                        stretch.reset();
                        events.push(TransportEvent::Stopped {
                            position: transport.position(),
                        });
                    }
                    offset += n;
                }

                if transport.is_running() {
                    ProcessStatus::Playing
                } else {
                    ProcessStatus::Stopped
                }
            }
        };

        controls.publish(transport.position(), transport.is_running());
        drop(guard);
        barrier.block_complete();
        status
    }
}

/// Control-side half of the engine
pub struct EngineHandle {
    controls: Arc<SharedControls>,
    barrier: Arc<SyncBarrier>,
    events: EventConsumer,
    config: EngineConfig,
}

impl EngineHandle {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Barrier the prefetcher hands tracks to
    pub fn barrier(&self) -> Arc<SyncBarrier> {
        Arc::clone(&self.barrier)
    }

    pub fn play(&self) {
        self.controls.set_play_requested(true);
    }

    /// Fade out and stop
    pub fn pause(&self) {
        self.controls.set_play_requested(false);
    }

    /// Returns whether playback is now requested
    pub fn toggle_play(&self) -> bool {
        let play = !self.controls.play_requested();
        self.controls.set_play_requested(play);
        play
    }

    pub fn is_play_requested(&self) -> bool {
        self.controls.play_requested()
    }

    /// Whether the transport is producing sound (includes a stop fade)
    pub fn is_running(&self) -> bool {
        self.controls.is_running()
    }

    pub fn direction(&self) -> Direction {
        self.controls.direction()
    }

    pub fn set_direction(&self, direction: Direction) {
        self.controls.set_direction(direction);
    }

    pub fn toggle_direction(&self) -> Direction {
        let direction = self.controls.direction().toggled();
        self.controls.set_direction(direction);
        direction
    }

    /// Park silently at the next loop wrap until the next track starts.
    /// Used when a playlist advance will follow the wrap.
    pub fn set_hold_at_boundary(&self, hold: bool) {
        self.controls.set_hold_at_boundary(hold);
    }

    pub fn hold_at_boundary(&self) -> bool {
        self.controls.hold_at_boundary()
    }

    /// Keep looping the current track after a parked wrap
    pub fn resume_from_boundary(&self) {
        self.controls.request_resume();
    }

    /// Master volume in dB
    pub fn set_volume_db(&self, db: f32) {
        self.controls.set_gain(10f32.powf(0.05 * db));
    }

    pub fn volume_db(&self) -> f32 {
        let gain = self.controls.gain();
        if gain <= 0.0 {
            f32::NEG_INFINITY
        } else {
            20.0 * gain.log10()
        }
    }

    pub fn set_gain(&self, gain: f32) {
        self.controls.set_gain(gain);
    }

    /// Tempo multiplier; returns the clamped value
    pub fn set_time_ratio(&self, ratio: f64) -> f64 {
        let ratio = ratio.clamp(MIN_TIME_RATIO, MAX_TIME_RATIO);
        self.controls.set_time_ratio(ratio);
        ratio
    }

    pub fn time_ratio(&self) -> f64 {
        self.controls.time_ratio()
    }

    /// Pitch multiplier; returns the clamped value
    pub fn set_pitch_scale(&self, scale: f64) -> f64 {
        let scale = scale.clamp(MIN_PITCH_SCALE, MAX_PITCH_SCALE);
        self.controls.set_pitch_scale(scale);
        scale
    }

    pub fn pitch_scale(&self) -> f64 {
        self.controls.pitch_scale()
    }

    /// Move the loop start. Past the playhead it is clamped to the playhead.
    pub fn set_loop_left(&self, frame: usize) -> Result<LoopRange, BoundsError> {
        let frames = self.loaded_frames()?;
        let range = self
            .controls
            .loop_range()
            .with_left(frame, self.controls.position(), frames)?;
        self.controls.store_loop_range(range);
        Ok(range)
    }

    /// Move the loop end. Before the playhead it is clamped to the playhead.
    pub fn set_loop_right(&self, frame: usize) -> Result<LoopRange, BoundsError> {
        let frames = self.loaded_frames()?;
        let range = self
            .controls
            .loop_range()
            .with_right(frame, self.controls.position(), frames)?;
        self.controls.store_loop_range(range);
        Ok(range)
    }

    /// Replace both bounds; the transport pulls the playhead inside.
    pub fn set_loop_range(&self, left: usize, right: usize) -> Result<LoopRange, BoundsError> {
        let frames = self.loaded_frames()?;
        let range = LoopRange::new(left, right, frames)?;
        self.controls.store_loop_range(range);
        Ok(range)
    }

    /// Request a playhead move; the frame is clamped into the loop range.
    pub fn seek(&self, frame: usize) -> Result<usize, BoundsError> {
        let frames = self.loaded_frames()?;
        if frame >= frames {
            return Err(BoundsError::OutOfRange { frame, frames });
        }
        let range = self.controls.loop_range();
        let frame = frame.clamp(range.left, range.right - 1);
        self.controls.request_seek(frame);
        Ok(frame)
    }

    /// Back to the loop start for the current direction
    pub fn rewind(&self) -> Result<usize, BoundsError> {
        let range = self.controls.loop_range();
        match self.direction() {
            Direction::Forward => self.seek(range.left),
            Direction::Backward => self.seek(range.right - 1),
        }
    }

    pub fn position(&self) -> usize {
        self.controls.position()
    }

    pub fn loop_range(&self) -> LoopRange {
        self.controls.loop_range()
    }

    /// Frames in the live track, 0 before the first load
    pub fn frame_count(&self) -> usize {
        self.controls.frame_count()
    }

    /// Generation of the track the audio thread is playing
    pub fn generation(&self) -> u64 {
        self.controls.generation()
    }

    pub fn is_ready(&self) -> bool {
        self.barrier.is_ready()
    }

    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop()
    }

    pub fn drain_events(&mut self) -> Vec<TransportEvent> {
        self.events.drain()
    }

    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    fn loaded_frames(&self) -> Result<usize, BoundsError> {
        let frames = self.controls.frame_count();
        if frames == 0 || !self.barrier.is_ready() {
            return Err(BoundsError::NoTrack);
        }
        Ok(frames)
    }
}
