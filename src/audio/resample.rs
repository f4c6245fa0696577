//! Sample rate conversion using rubato
//!
//! Files are converted once, on the loader thread, to the output device's
//! rate so the transport can index frames directly.

use rubato::{FftFixedIn, Resampler};

use super::loader::LoadError;

/// Input chunk size fed to the FFT resampler
const CHUNK_SIZE: usize = 1024;

/// FFT sub-chunks per chunk (trades latency for quality)
const SUB_CHUNKS: usize = 2;

/// Resample interleaved audio from `source_rate` to `target_rate`.
///
/// The output is trimmed to `frames * target_rate / source_rate` frames and
/// compensated for the resampler's own delay, so loop points keep their
/// relative position in the file.
pub fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, LoadError> {
    if source_rate == target_rate || channels == 0 || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let frames = samples.len() / channels;
    let input: Vec<Vec<f32>> = (0..channels)
        .map(|c| samples.iter().skip(c).step_by(channels).copied().collect())
        .collect();

    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        CHUNK_SIZE,
        SUB_CHUNKS,
        channels,
    )
    .map_err(|e| LoadError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected =
        (frames as f64 * target_rate as f64 / source_rate as f64).round() as usize;

    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay + CHUNK_SIZE); channels];
    let mut chunk: Vec<Vec<f32>> = vec![Vec::with_capacity(CHUNK_SIZE); channels];
    let mut pos = 0;

    // Keep feeding (zero-padded past the end) until the delayed tail is out
    while output[0].len() < expected + delay {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(frames);

        for (dst, src) in chunk.iter_mut().zip(&input) {
            dst.clear();
            if pos < end {
                dst.extend_from_slice(&src[pos..end]);
            }
            dst.resize(needed, 0.0);
        }
        pos += needed;

        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        for (dst, src) in output.iter_mut().zip(processed) {
            dst.extend_from_slice(&src);
        }
    }

    let mut interleaved = Vec::with_capacity(expected * channels);
    for i in delay..delay + expected {
        for channel in &output {
            interleaved.push(channel[i]);
        }
    }

    Ok(interleaved)
}
