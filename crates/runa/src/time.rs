//! Frame timing, fixed-step accumulation and a wall clock for real-time loops.
//!
//! The scene advances [`Time`] by whatever `dt` it is handed, so headless
//! runs and tests are deterministic. [`FrameClock`] measures that `dt` from
//! the wall clock when running for real.

use std::time::{Duration, Instant};

use log::debug;

/// Frame timing seen by systems and scripts.
#[derive(Clone, Copy, Debug)]
pub struct Time {
    delta: Duration,
    elapsed: Duration,
    frame_count: u64,
    fixed_step: Duration,
}

impl Time {
    pub fn new(fixed_step: Duration) -> Self {
        Self {
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
            fixed_step,
        }
    }

    /// Starts a new frame that took `dt`.
    pub(crate) fn advance(&mut self, dt: Duration) {
        self.delta = dt;
        self.elapsed += dt;
        self.frame_count += 1;
    }

    /// Duration of the current frame.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Sum of every frame's delta so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Step used by every `fixed_update` call.
    pub fn fixed_step(&self) -> Duration {
        self.fixed_step
    }

    pub fn fixed_step_secs(&self) -> f32 {
        self.fixed_step.as_secs_f32()
    }

    /// Estimated FPS based on the current frame's delta.
    pub fn fps(&self) -> f32 {
        if self.delta.as_secs_f32() > 0.0 {
            1.0 / self.delta.as_secs_f32()
        } else {
            0.0
        }
    }
}

/// Turns variable frame deltas into a whole number of fixed steps.
///
/// ```text
/// step = 10ms, dt = 25ms  -> 2 steps, 5ms carried over
/// next dt = 7ms           -> 1 step,  2ms carried over
/// ```
///
/// At most `max_steps` are returned per frame; time beyond that is dropped
/// so a slow frame cannot snowball into ever slower ones.
#[derive(Clone, Debug)]
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
    max_steps: u32,
}

impl FixedTimestep {
    /// # Panics
    ///
    /// Panics if `step` is zero.
    pub fn new(step: Duration, max_steps: u32) -> Self {
        assert!(!step.is_zero(), "fixed timestep must be longer than zero");
        Self {
            step,
            accumulator: Duration::ZERO,
            max_steps,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Time carried over to the next frame.
    pub fn pending(&self) -> Duration {
        self.accumulator
    }

    /// Adds `dt` and returns how many fixed steps are due.
    pub fn accumulate(&mut self, dt: Duration) -> u32 {
        self.accumulator += dt;
        let mut steps = 0;
        while self.accumulator >= self.step && steps < self.max_steps {
            self.accumulator -= self.step;
            steps += 1;
        }
        if self.accumulator >= self.step {
            let dropped = self.accumulator;
            let remainder = dropped.as_nanos() % self.step.as_nanos();
            self.accumulator = Duration::from_nanos(remainder as u64);
            debug!(
                "fixed step capped at {} per frame; dropped {:?}",
                self.max_steps,
                dropped - self.accumulator
            );
        }
        steps
    }
}

/// Wall-clock source of frame deltas.
#[derive(Debug)]
pub struct FrameClock {
    last: Instant,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self { last: Instant::now() }
    }

    /// Time since the previous tick (or since construction).
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now - self.last;
        self.last = now;
        dt
    }

    /// Time since the previous tick, without starting a new one.
    pub fn peek(&self) -> Duration {
        self.last.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn time_accumulates() {
        let mut time = Time::new(ms(10));
        time.advance(ms(16));
        time.advance(ms(20));
        assert_eq!(time.delta(), ms(20));
        assert_eq!(time.elapsed(), ms(36));
        assert_eq!(time.frame_count(), 2);
        assert!((time.fps() - 50.0).abs() < 1e-3);
        assert_eq!(time.fixed_step(), ms(10));
    }

    #[test]
    fn carries_remainder() {
        let mut fixed = FixedTimestep::new(ms(10), 8);
        assert_eq!(fixed.accumulate(ms(25)), 2);
        assert_eq!(fixed.pending(), ms(5));
        assert_eq!(fixed.accumulate(ms(7)), 1);
        assert_eq!(fixed.pending(), ms(2));
        assert_eq!(fixed.accumulate(ms(3)), 0);
    }

    #[test]
    fn caps_steps_and_drops_surplus() {
        let mut fixed = FixedTimestep::new(ms(10), 3);
        assert_eq!(fixed.accumulate(ms(95)), 3);
        assert_eq!(fixed.pending(), ms(5));
    }

    #[test]
    #[should_panic(expected = "longer than zero")]
    fn zero_step_panics() {
        FixedTimestep::new(Duration::ZERO, 1);
    }
}
