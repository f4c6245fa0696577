//! Fixed-capacity de-interleaved scratch storage
//!
//! Allocated once when the engine is built, sized `channels * capacity`,
//! and never resized on the audio thread.

#[derive(Debug, Clone)]
pub struct ScratchArena {
    data: Vec<f32>,
    channels: usize,
    capacity: usize,
}

impl ScratchArena {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            data: vec![0.0; channels * capacity],
            channels,
            capacity,
        }
    }

    /// Frames per channel
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn set_frame(&mut self, index: usize, frame: [f32; 2]) {
        for c in 0..self.channels.min(2) {
            self.data[c * self.capacity + index] = frame[c];
        }
    }

    /// Stereo view of one frame; a mono arena reads the same sample twice
    #[inline]
    pub fn frame(&self, index: usize) -> [f32; 2] {
        let left = self.data[index];
        let right = if self.channels > 1 {
            self.data[self.capacity + index]
        } else {
            left
        };
        [left, right]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_are_contiguous() {
        let mut arena = ScratchArena::new(2, 4);
        arena.set_frame(1, [0.5, -0.5]);

        assert_eq!(arena.data, [0.0, 0.5, 0.0, 0.0, 0.0, -0.5, 0.0, 0.0]);
        assert_eq!(arena.frame(1), [0.5, -0.5]);
    }

    #[test]
    fn test_mono_frame_reads_twice() {
        let mut arena = ScratchArena::new(1, 3);
        arena.set_frame(2, [0.25, 0.75]);
        assert_eq!(arena.frame(2), [0.25, 0.25]);
        assert_eq!(arena.data.len(), 3);
    }
}
