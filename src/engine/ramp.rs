//! Linear gain ramps for click-free loop wraps and play/pause

/// Frame counter in `[0, step]`; gain is `value / step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeRamp {
    value: usize,
    step: usize,
}

impl FadeRamp {
    /// Ramp at rest, gain 1.0
    pub fn full(step: usize) -> Self {
        let step = step.max(1);
        Self { value: step, step }
    }

    /// Ramp at zero, gain 0.0
    pub fn silent(step: usize) -> Self {
        Self {
            value: 0,
            step: step.max(1),
        }
    }

    pub fn value(&self) -> usize {
        self.value
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn is_silent(&self) -> bool {
        self.value == 0
    }

    pub fn is_full(&self) -> bool {
        self.value == self.step
    }

    /// Change the ramp length, keeping the value inside the new bounds
    pub fn set_step(&mut self, step: usize) {
        self.step = step.max(1);
        self.value = self.value.min(self.step);
    }

    #[inline]
    pub fn rise(&mut self) {
        if self.value < self.step {
            self.value += 1;
        }
    }

    #[inline]
    pub fn fall(&mut self) {
        self.value = self.value.saturating_sub(1);
    }

    /// Fall, and never stay above `remaining` so the ramp is at zero by the
    /// time the remaining frames run out.
    #[inline]
    pub fn fall_within(&mut self, remaining: usize) {
        self.value = self.value.saturating_sub(1).min(remaining);
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.value as f32 / self.step as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rise_saturates_at_step() {
        let mut ramp = FadeRamp::silent(4);
        for _ in 0..10 {
            ramp.rise();
            assert!(ramp.value() <= 4);
        }
        assert!(ramp.is_full());
        assert_eq!(ramp.gain(), 1.0);
    }

    #[test]
    fn test_fall_saturates_at_zero() {
        let mut ramp = FadeRamp::full(3);
        for _ in 0..5 {
            ramp.fall();
        }
        assert!(ramp.is_silent());
        assert_eq!(ramp.gain(), 0.0);
    }

    #[test]
    fn test_fall_within_reaches_zero_in_time() {
        let mut ramp = FadeRamp::full(256);
        for remaining in (0..10).rev() {
            ramp.fall_within(remaining);
        }
        assert!(ramp.is_silent());
    }

    #[test]
    fn test_set_step_clamps_value() {
        let mut ramp = FadeRamp::full(256);
        ramp.set_step(16);
        assert_eq!(ramp.value(), 16);
        assert!(ramp.is_full());
    }

    #[test]
    fn test_zero_step_is_promoted() {
        let ramp = FadeRamp::full(0);
        assert_eq!(ramp.step(), 1);
        assert_eq!(ramp.gain(), 1.0);
    }
}
