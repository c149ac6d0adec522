//! Frame timing.

use std::time::{Duration, Instant};

/// Timing of a single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    /// Seconds since the previous tick.
    pub delta: f32,
    /// Seconds since the timer started.
    pub total: f32,
}

/// Wall-clock source for per-tick deltas and total run time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    ticks: u64,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            ticks: 0,
        }
    }

    /// Closes the current tick and returns its timing.
    pub fn tick(&mut self) -> FrameTime {
        let now = Instant::now();
        let delta = now.duration_since(self.last_tick);
        self.last_tick = now;
        self.ticks += 1;
        FrameTime {
            delta: delta.as_secs_f32(),
            total: now.duration_since(self.start).as_secs_f32(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Average ticks per second since start, or zero before the first tick.
    pub fn average_rate(&self) -> f32 {
        let secs = self.elapsed().as_secs_f32();
        if self.ticks == 0 || secs <= f32::EPSILON {
            0.0
        } else {
            self.ticks as f32 / secs
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_reports_delta_and_total() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        let first = timer.tick();
        assert!(first.delta >= 0.002);
        assert!(first.total >= first.delta);

        let second = timer.tick();
        assert!(second.total >= first.total);
        assert_eq!(timer.ticks(), 2);
    }

    #[test]
    fn test_average_rate_is_zero_before_first_tick() {
        let timer = Timer::new();
        assert_eq!(timer.average_rate(), 0.0);
    }
}
