//! Virtual time and the fixed-timestep accumulator.

use crate::main_schedule::First;
use crate::{App, Plugin};
use std::time::{Duration, Instant};
use verse_ecs::prelude::*;

/// Wall-clock driven virtual time. `delta` is the time between the last two
/// updates; `elapsed` accumulates it.
#[derive(Resource, Debug)]
pub struct Time {
    delta: Duration,
    elapsed: Duration,
    last_update: Option<Instant>,
}

impl Default for Time {
    fn default() -> Self {
        Self {
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            last_update: None,
        }
    }
}

impl Time {
    #[inline]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    #[inline]
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Advances by an explicit delta. Useful for tests and fixed-rate
    /// simulations.
    pub fn advance_by(&mut self, delta: Duration) {
        self.delta = delta;
        self.elapsed += delta;
    }

    fn update(&mut self, now: Instant) {
        let delta = match self.last_update {
            Some(last_update) => now - last_update,
            None => Duration::ZERO,
        };
        self.last_update = Some(now);
        self.advance_by(delta);
    }
}

/// The fixed-timestep accumulator driving
/// [`FixedMain`](crate::main_schedule::FixedMain). Virtual time deposits its
/// delta as overstep; each fixed tick withdraws one period.
#[derive(Resource, Debug)]
pub struct FixedTime {
    period: Duration,
    overstep: Duration,
}

impl Default for FixedTime {
    fn default() -> Self {
        // 64 Hz
        Self::from_period(Duration::from_micros(15_625))
    }
}

impl FixedTime {
    pub fn from_period(period: Duration) -> Self {
        assert!(!period.is_zero(), "fixed timestep period must be non-zero");
        Self {
            period,
            overstep: Duration::ZERO,
        }
    }

    pub fn from_hz(hz: f64) -> Self {
        Self::from_period(Duration::from_secs_f64(1.0 / hz))
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Unspent accumulated time.
    #[inline]
    pub fn overstep(&self) -> Duration {
        self.overstep
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.overstep += delta;
    }

    /// Withdraws one period if enough overstep has accumulated.
    pub fn expend(&mut self) -> bool {
        if let Some(remaining) = self.overstep.checked_sub(self.period) {
            self.overstep = remaining;
            true
        } else {
            false
        }
    }
}

/// Updates [`Time`] from the wall clock.
pub fn update_time(mut time: ResMut<Time>) {
    time.update(Instant::now());
}

/// Inserts the time resources and the per-frame clock update.
pub struct TimePlugin;

impl Plugin for TimePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<Time>()
            .init_resource::<FixedTime>()
            .add_systems(First, update_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overstep_accumulates_and_expends() {
        let mut fixed = FixedTime::from_period(Duration::from_millis(10));
        fixed.accumulate(Duration::from_millis(25));
        assert!(fixed.expend());
        assert!(fixed.expend());
        assert!(!fixed.expend());
        assert_eq!(fixed.overstep(), Duration::from_millis(5));
    }

    #[test]
    fn advance_by_updates_elapsed() {
        let mut time = Time::default();
        time.advance_by(Duration::from_millis(16));
        time.advance_by(Duration::from_millis(16));
        assert_eq!(time.delta(), Duration::from_millis(16));
        assert_eq!(time.elapsed(), Duration::from_millis(32));
    }
}
