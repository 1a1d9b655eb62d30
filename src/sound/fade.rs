//! Fade envelope
//!
//! A gain level that walks linearly toward a target, one `step` per tick.
//! The level never overshoots its target. A level at or below zero means the
//! object should fall silent and stop its source.

/// Level change per tick used when the configuration does not set one
pub const DEFAULT_FADE_STEP: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeEnvelope {
    level: f32,
    target: f32,
    step: f32,
    default_level: f32,
}

impl FadeEnvelope {
    pub fn new(step: f32) -> Self {
        Self {
            level: 1.0,
            target: 1.0,
            step: step.abs(),
            default_level: 1.0,
        }
    }

    /// Envelope resting at `level`, which is also its fade-in target
    pub fn with_default_level(step: f32, level: f32) -> Self {
        let mut env = Self::new(step);
        env.set_default_level(level);
        env.set_level(env.default_level);
        env
    }

    /// Advance one step toward the target and return the new level
    pub fn tick(&mut self) -> f32 {
        if self.level < self.target {
            self.level = (self.level + self.step).min(self.target);
        } else if self.level > self.target {
            self.level = (self.level - self.step).max(self.target);
        }
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn default_level(&self) -> f32 {
        self.default_level
    }

    /// Levels above 1.0 are clamped; negative targets are allowed
    pub fn set_target(&mut self, level: f32) {
        self.target = level.min(1.0);
    }

    /// Jump to `level` without fading
    pub fn set_level(&mut self, level: f32) {
        self.level = level.min(1.0);
        self.target = self.level;
    }

    pub fn set_step(&mut self, step: f32) {
        self.step = step.abs();
    }

    pub fn set_default_level(&mut self, level: f32) {
        self.default_level = level.clamp(0.0, 1.0);
    }

    pub fn fade_in(&mut self) {
        self.target = self.default_level;
    }

    pub fn fade_out(&mut self) {
        self.target = 0.0;
    }

    pub fn is_fading(&self) -> bool {
        self.level != self.target
    }

    /// True when the envelope asks for silence
    pub fn is_silent(&self) -> bool {
        self.level <= 0.0
    }
}

impl Default for FadeEnvelope {
    fn default() -> Self {
        Self::new(DEFAULT_FADE_STEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_starts_at_full_level() {
        let env = FadeEnvelope::default();
        assert_eq!(env.level(), 1.0);
        assert!(!env.is_fading());
        assert!(!env.is_silent());
    }

    #[test]
    fn test_fade_out_reaches_silence() {
        let mut env = FadeEnvelope::new(0.25);
        env.fade_out();
        assert!(env.is_fading());
        assert_eq!(env.tick(), 0.75);
        assert_eq!(env.tick(), 0.5);
        assert_eq!(env.tick(), 0.25);
        assert_eq!(env.tick(), 0.0);
        assert!(env.is_silent());
        assert!(!env.is_fading());
        assert_eq!(env.tick(), 0.0);
    }

    #[test]
    fn test_fade_in_targets_default_level() {
        let mut env = FadeEnvelope::with_default_level(0.5, 0.6);
        assert_eq!(env.level(), 0.6);
        env.set_level(0.0);
        env.fade_in();
        assert_eq!(env.tick(), 0.5);
        assert_eq!(env.tick(), 0.6);
        assert!(!env.is_fading());
    }

    #[test]
    fn test_negative_target_goes_silent() {
        let mut env = FadeEnvelope::new(0.5);
        env.set_target(-1.0);
        env.tick();
        env.tick();
        assert_eq!(env.level(), 0.0);
        assert!(env.is_silent());
        env.tick();
        assert_eq!(env.level(), -0.5);
    }

    #[test]
    fn test_set_level_is_immediate() {
        let mut env = FadeEnvelope::default();
        env.set_level(0.3);
        assert_eq!(env.level(), 0.3);
        assert!(!env.is_fading());
        env.set_level(4.0);
        assert_eq!(env.level(), 1.0);
    }

    #[test]
    fn test_step_is_absolute() {
        let mut env = FadeEnvelope::new(-0.1);
        assert_eq!(env.step(), 0.1);
        env.set_step(-0.2);
        assert_eq!(env.step(), 0.2);
    }

    proptest! {
        #[test]
        fn prop_converges_without_overshoot(
            start in -1.0f32..=1.0,
            target in -1.0f32..=1.0,
            step in 0.001f32..=0.5,
        ) {
            let mut env = FadeEnvelope::new(step);
            env.set_level(start);
            env.set_target(target);

            let max_ticks = ((start - target).abs() / step).ceil() as usize + 1;
            let mut previous = env.level();
            for _ in 0..max_ticks {
                let level = env.tick();
                if start <= target {
                    prop_assert!(level >= previous && level <= target);
                } else {
                    prop_assert!(level <= previous && level >= target);
                }
                previous = level;
            }
            prop_assert_eq!(env.level(), target);
        }
    }
}
