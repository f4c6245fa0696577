//! Audio file loading
//!
//! This module decodes whole files into memory using symphonia, converting
//! to interleaved f32 at the output device's sample rate. The channel limit
//! is not enforced here; [`Track::from_decoded`](super::Track::from_decoded)
//! rejects what the engine cannot play.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::resample::resample_interleaved;

/// File extensions accepted by [`is_supported`]
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "wav", "wave", "flac", "mp3", "ogg", "oga", "aif", "aiff", "aifc", "m4a", "mp4", "caf", "mkv",
    "webm",
];

/// Errors that can occur while loading a track
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to open file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to probe audio format: {0}")]
    ProbeError(String),

    #[error("No audio tracks found")]
    NoTracks,

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Decoder error: {0}")]
    DecoderError(String),

    #[error("File contains no audio frames")]
    Empty,

    #[error("Only two channels maximum are supported (file has {0})")]
    UnsupportedChannels(usize),

    #[error("File is too long to loop ({0} frames)")]
    TooLong(usize),

    #[error("Could not resample file: {0}")]
    Resample(String),
}

/// Interleaved decoder output
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub channels: usize,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

/// Source of decoded audio for the prefetcher
pub trait Loader: Send + 'static {
    /// Decode `path` and convert it to `target_rate`
    fn load(&self, path: &Path, target_rate: u32) -> Result<DecodedAudio, LoadError>;
}

/// Check the file extension against the formats symphonia is built with
pub fn is_supported(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Loader backed by symphonia and rubato
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaLoader;

impl Loader for SymphoniaLoader {
    fn load(&self, path: &Path, target_rate: u32) -> Result<DecodedAudio, LoadError> {
        let decoded = decode_file(path)?;
        if target_rate == 0 || decoded.sample_rate == target_rate {
            return Ok(decoded);
        }

        log::debug!(
            "Resampling {:?} from {} Hz to {} Hz",
            path,
            decoded.sample_rate,
            target_rate
        );
        let samples = resample_interleaved(
            &decoded.samples,
            decoded.channels,
            decoded.sample_rate,
            target_rate,
        )?;

        Ok(DecodedAudio {
            channels: decoded.channels,
            sample_rate: target_rate,
            samples,
        })
    }
}

/// Decode a whole file to interleaved f32 at its native rate
pub fn decode_file(path: &Path) -> Result<DecodedAudio, LoadError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // Create hint from file extension
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| LoadError::ProbeError(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(LoadError::NoTracks)?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let capacity = track
        .codec_params
        .n_frames
        .map(|n| n as usize * channels.max(1))
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::UnsupportedCodec(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::with_capacity(capacity);
    let mut convert: Option<SampleBuffer<f32>> = None;
    let mut convert_frames = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(LoadError::DecoderError(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();

                // Reallocate only when a packet outgrows the conversion buffer
                if convert.is_none() || decoded.capacity() > convert_frames {
                    convert_frames = decoded.capacity();
                    convert = Some(SampleBuffer::new(convert_frames as u64, spec));
                }
                if let Some(buf) = convert.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // Corrupt packet: skip it and keep going
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping undecodable packet in {:?}: {}", path, e);
                continue;
            }
            Err(e) => return Err(LoadError::DecoderError(e.to_string())),
        }
    }

    if samples.is_empty() || channels == 0 {
        return Err(LoadError::Empty);
    }

    log::info!(
        "Decoded {:?}: {} ch, {} Hz, {} frames",
        path,
        channels,
        sample_rate,
        samples.len() / channels
    );

    Ok(DecodedAudio {
        channels,
        sample_rate,
        samples,
    })
}
