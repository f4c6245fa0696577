//! Audio device output
//!
//! Opens a cpal output stream and drives an [`EngineProcessor`] from its
//! callback. The engine always renders stereo; this module maps that onto
//! whatever channel count the device has.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use thiserror::Error;

use crate::engine::EngineProcessor;

/// Largest block rendered in one engine call; bigger device buffers are split
const MAX_CALLBACK_FRAMES: usize = 4096;

/// Errors that can occur while opening the output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    Config(String),

    #[error("Device offers no f32 output at {0} Hz")]
    UnsupportedFormat(u32),

    #[error("Failed to build output stream: {0}")]
    BuildStream(String),

    #[error("Failed to start output stream: {0}")]
    PlayStream(String),
}

/// Names of all output devices on the default host
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// A selected output device and the stream config it will run with
pub struct OutputDevice {
    device: cpal::Device,
    config: StreamConfig,
    name: String,
}

impl OutputDevice {
    /// Open the named device, or the host default when `name` is `None`
    pub fn open(name: Option<&str>) -> Result<Self, OutputError> {
        let host = cpal::default_host();

        let device = match name {
            Some(wanted) => host
                .output_devices()
                .map_err(|e| OutputError::Config(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| OutputError::DeviceNotFound(wanted.to_string()))?,
            None => host.default_output_device().ok_or(OutputError::NoDevice)?,
        };

        let default = device
            .default_output_config()
            .map_err(|e| OutputError::Config(e.to_string()))?;
        let rate = default.sample_rate();

        let supported = if default.sample_format() == SampleFormat::F32 {
            default
        } else {
            // Look for an f32 variant at the same rate
            device
                .supported_output_configs()
                .map_err(|e| OutputError::Config(e.to_string()))?
                .find(|range| {
                    range.sample_format() == SampleFormat::F32
                        && range.min_sample_rate() <= rate
                        && range.max_sample_rate() >= rate
                })
                .map(|range| range.with_sample_rate(rate))
                .ok_or(OutputError::UnsupportedFormat(rate.0))?
        };

        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        log::info!(
            "Output device: {} ({} ch, {} Hz)",
            name,
            supported.channels(),
            rate.0
        );

        Ok(Self {
            device,
            config: supported.into(),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> usize {
        self.config.channels as usize
    }

    /// Build and start the stream; audio runs until the returned handle drops
    pub fn start(self, mut processor: EngineProcessor) -> Result<AudioOutput, OutputError> {
        let channels = self.channels();
        let sample_rate = self.sample_rate();
        let mut stereo = vec![0.0f32; MAX_CALLBACK_FRAMES * 2];

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for chunk in data.chunks_mut(MAX_CALLBACK_FRAMES * channels) {
                        let frames = chunk.len() / channels;
                        let block = &mut stereo[..frames * 2];
                        processor.process(block, frames);

                        for (frame, pair) in chunk.chunks_mut(channels).zip(block.chunks_exact(2)) {
                            if channels >= 2 {
                                frame[0] = pair[0];
                                frame[1] = pair[1];
                                for ch in frame.iter_mut().skip(2) {
                                    *ch = 0.0;
                                }
                            } else {
                                frame[0] = (pair[0] + pair[1]) * 0.5;
                            }
                        }
                    }
                },
                |err| log::error!("Audio output error: {}", err),
                None,
            )
            .map_err(|e| OutputError::BuildStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| OutputError::PlayStream(e.to_string()))?;

        Ok(AudioOutput {
            _stream: stream,
            sample_rate,
            channels,
        })
    }
}

/// Running output stream. Drop this to stop audio.
pub struct AudioOutput {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: usize,
}

impl AudioOutput {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}
