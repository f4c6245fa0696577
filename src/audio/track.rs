//! Decoded track storage
//!
//! A [`Track`] owns one file's PCM after decoding. Samples are kept
//! de-interleaved (one contiguous run per channel) because the stretch
//! engine feeds channels separately, and the transport reads single frames
//! by index.

use super::loader::{DecodedAudio, LoadError};

/// Highest channel count the engine plays back
pub const MAX_CHANNELS: usize = 2;

/// One decoded track, immutable once built
#[derive(Debug)]
pub struct Track {
    /// Channel-major samples: `data[c * frames + i]`
    data: Vec<f32>,
    channels: usize,
    frames: usize,
    sample_rate: u32,
}

impl Track {
    /// Build a track from interleaved decoder output.
    ///
    /// Rejects more than [`MAX_CHANNELS`] channels, empty files and files
    /// longer than `u32::MAX` frames (loop points are stored as `u32`).
    pub fn from_decoded(decoded: DecodedAudio) -> Result<Self, LoadError> {
        let channels = decoded.channels;
        Self::check_shape(channels, decoded.samples.len() / channels.max(1))?;

        let frames = decoded.samples.len() / channels;
        let mut data = vec![0.0; frames * channels];
        for (i, frame) in decoded.samples.chunks_exact(channels).enumerate() {
            for (c, &sample) in frame.iter().enumerate() {
                data[c * frames + i] = sample;
            }
        }

        Ok(Self {
            data,
            channels,
            frames,
            sample_rate: decoded.sample_rate,
        })
    }

    /// Build a track from per-channel sample vectors
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, LoadError> {
        let count = channels.len();
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        Self::check_shape(count, frames)?;

        let mut data = Vec::with_capacity(count * frames);
        for channel in &channels {
            data.extend_from_slice(&channel[..frames]);
        }

        Ok(Self {
            data,
            channels: count,
            frames,
            sample_rate,
        })
    }

    fn check_shape(channels: usize, frames: usize) -> Result<(), LoadError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(LoadError::UnsupportedChannels(channels));
        }
        if frames == 0 {
            return Err(LoadError::Empty);
        }
        if frames > u32::MAX as usize {
            return Err(LoadError::TooLong(frames));
        }
        Ok(())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples of one channel
    pub fn channel(&self, channel: usize) -> &[f32] {
        let start = channel * self.frames;
        &self.data[start..start + self.frames]
    }

    /// Stereo frame at `index`; mono tracks are duplicated to both sides.
    #[inline]
    pub fn frame(&self, index: usize) -> [f32; 2] {
        let left = self.data[index];
        let right = if self.channels > 1 {
            self.data[self.frames + index]
        } else {
            left
        };
        [left, right]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(channels: usize, samples: Vec<f32>) -> DecodedAudio {
        DecodedAudio {
            channels,
            sample_rate: 48000,
            samples,
        }
    }

    #[test]
    fn test_deinterleaves_stereo() {
        let track = Track::from_decoded(decoded(2, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0])).unwrap();

        assert_eq!(track.frames(), 3);
        assert_eq!(track.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(track.channel(1), &[-1.0, -2.0, -3.0]);
        assert_eq!(track.frame(1), [2.0, -2.0]);
    }

    #[test]
    fn test_mono_frame_duplicates() {
        let track = Track::from_decoded(decoded(1, vec![0.5, 0.25])).unwrap();
        assert_eq!(track.frame(1), [0.25, 0.25]);
    }

    #[test]
    fn test_rejects_more_than_two_channels() {
        let err = Track::from_decoded(decoded(6, vec![0.0; 12])).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedChannels(6)));
    }

    #[test]
    fn test_rejects_empty() {
        let err = Track::from_decoded(decoded(2, Vec::new())).unwrap_err();
        assert!(matches!(err, LoadError::Empty));
    }

    #[test]
    fn test_from_channels_truncates_to_shortest() {
        let track = Track::from_channels(vec![vec![1.0; 10], vec![2.0; 8]], 44100).unwrap();
        assert_eq!(track.frames(), 8);
        assert_eq!(track.frame(7), [1.0, 2.0]);
    }
}
