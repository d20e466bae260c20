//! Fixed-step simulation clock

use crate::util::time::FIXED_STEP;

/// Largest real frame delta accepted, in seconds
pub const MAX_FRAME_DT: f32 = 0.1;
/// Steps run per frame at most; leftover time is dropped
pub const MAX_STEPS_PER_FRAME: u32 = 5;

/// Turns variable real frame time into a whole number of fixed steps
#[derive(Debug, Clone)]
pub struct FixedStepClock {
    step: f32,
    accumulator: f32,
}

impl FixedStepClock {
    pub fn new(step: f32) -> Self {
        Self {
            step,
            accumulator: 0.0,
        }
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    /// Cap a raw frame delta. Negative or non-finite input counts as no time.
    pub fn cap(real_dt: f32) -> f32 {
        if real_dt.is_finite() && real_dt > 0.0 {
            real_dt.min(MAX_FRAME_DT)
        } else {
            0.0
        }
    }

    /// Feed one frame and get how many fixed steps to run
    pub fn advance(&mut self, real_dt: f32, time_scale: f32) -> u32 {
        self.accumulator += Self::cap(real_dt) * time_scale.clamp(0.0, 1.0);

        let mut steps = 0;
        while self.accumulator >= self.step && steps < MAX_STEPS_PER_FRAME {
            self.accumulator -= self.step;
            steps += 1;
        }
        if steps == MAX_STEPS_PER_FRAME {
            self.accumulator = self.accumulator.min(self.step);
        }
        steps
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

impl Default for FixedStepClock {
    fn default() -> Self {
        Self::new(FIXED_STEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_partial_frames() {
        let mut clock = FixedStepClock::new(0.01);
        assert_eq!(clock.advance(0.004, 1.0), 0);
        assert_eq!(clock.advance(0.004, 1.0), 0);
        assert_eq!(clock.advance(0.004, 1.0), 1);
    }

    #[test]
    fn long_frames_are_capped() {
        let mut clock = FixedStepClock::new(1.0 / 60.0);
        // A 2 second hitch becomes at most one capped frame worth of steps.
        let steps = clock.advance(2.0, 1.0);
        assert_eq!(steps, MAX_STEPS_PER_FRAME);
        assert!(clock.advance(0.0, 1.0) <= 1);
    }

    #[test]
    fn time_scale_slows_the_simulation() {
        let mut clock = FixedStepClock::new(0.01);
        let mut steps = 0;
        for _ in 0..100 {
            steps += clock.advance(0.01, 0.1);
        }
        assert!((9..=10).contains(&steps));
    }

    #[test]
    fn bad_deltas_are_ignored() {
        let mut clock = FixedStepClock::new(0.01);
        assert_eq!(clock.advance(f32::NAN, 1.0), 0);
        assert_eq!(clock.advance(-1.0, 1.0), 0);
    }
}
