//! Timing primitives for the transport.
//!
//! - [`TickClock`] - Wall-clock pacing used when the engine drives itself
//! - [`FrameAccumulator`] - Frame-to-tick conversion for an external clock
//!
//! Ticks are pulses at a fixed resolution (PPQN, pulses per quarter note).

use std::time::Instant;

/// Default resolution in pulses per quarter note.
pub const DEFAULT_PPQN: u32 = 192;

/// Default tempo.
pub const DEFAULT_BPM: f64 = 120.0;

/// Slowest accepted tempo.
pub const MIN_BPM: f64 = 1.0;

/// Fastest accepted tempo.
pub const MAX_BPM: f64 = 600.0;

/// Clamp a tempo into the accepted range. NaN falls back to the default.
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return DEFAULT_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// Number of ticks that elapse in one second at the given tempo.
#[inline]
pub fn ticks_per_second(bpm: f64, ppqn: u32) -> f64 {
    bpm / 60.0 * ppqn as f64
}

/// Transport-aware clock converting wall-clock time to ticks.
///
/// The clock keeps an anchor (tick position at a specific instant) and
/// derives later positions from the tempo. Tempo changes re-anchor so the
/// current position is preserved.
#[derive(Clone, Debug)]
pub struct TickClock {
    bpm: f64,
    ppqn: u32,
    running: bool,
    anchor_instant: Instant,
    anchor_tick: f64,
}

impl TickClock {
    /// Create a stopped clock at tick 0.
    pub fn new(ppqn: u32, bpm: f64) -> Self {
        Self {
            bpm: clamp_bpm(bpm),
            ppqn: ppqn.max(1),
            running: false,
            anchor_instant: Instant::now(),
            anchor_tick: 0.0,
        }
    }

    /// Set the tempo, preserving the current tick position.
    pub fn set_bpm(&mut self, bpm: f64, now: Instant) {
        let bpm = clamp_bpm(bpm);
        if (bpm - self.bpm).abs() < f64::EPSILON {
            return;
        }
        self.anchor_tick = self.position_at(now);
        self.anchor_instant = now;
        self.bpm = bpm;
    }

    /// Get the current tempo.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Start the clock at `tick`.
    pub fn start(&mut self, tick: i64, now: Instant) {
        self.rebase(tick, now);
        self.running = true;
    }

    /// Stop the clock, returning the tick it stopped on.
    pub fn stop(&mut self, now: Instant) -> i64 {
        self.anchor_tick = self.position_at(now);
        self.anchor_instant = now;
        self.running = false;
        self.anchor_tick.floor() as i64
    }

    /// Move the anchor to `tick` without changing the running state.
    pub fn rebase(&mut self, tick: i64, now: Instant) {
        self.anchor_tick = tick as f64;
        self.anchor_instant = now;
    }

    /// Tick position at a given instant.
    pub fn tick_at(&self, now: Instant) -> i64 {
        self.position_at(now).floor() as i64
    }

    fn position_at(&self, now: Instant) -> f64 {
        if !self.running || now <= self.anchor_instant {
            return self.anchor_tick;
        }
        let elapsed = now.duration_since(self.anchor_instant).as_secs_f64();
        self.anchor_tick + elapsed * ticks_per_second(self.bpm, self.ppqn)
    }

    /// Check if the clock is running.
    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Converts elapsed audio frames into whole ticks, carrying the remainder.
///
/// Used when an external transport paces the engine: the real-time side
/// only reports frame counts and this accumulator turns them into tick
/// deltas on the scheduler thread.
#[derive(Clone, Debug, Default)]
pub struct FrameAccumulator {
    remainder: f64,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert `frames` at `sample_rate` into a whole tick delta.
    pub fn advance(&mut self, frames: u64, sample_rate: u32, bpm: f64, ppqn: u32) -> i64 {
        if frames == 0 || sample_rate == 0 {
            return 0;
        }
        let seconds = frames as f64 / sample_rate as f64;
        let exact = seconds * ticks_per_second(bpm, ppqn) + self.remainder;
        let whole = exact.floor();
        self.remainder = exact - whole;
        whole as i64
    }

    /// Drop any carried fraction (after a relocation).
    pub fn reset(&mut self) {
        self.remainder = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tick_clock_rate() {
        // 120 bpm at 192 ppqn = 384 ticks per second
        let mut clock = TickClock::new(192, 120.0);
        let now = Instant::now();
        clock.start(0, now);
        let tick = clock.tick_at(now + Duration::from_millis(500));
        assert!((tick - 192).abs() <= 1);
    }

    #[test]
    fn test_stopped_clock_holds_position() {
        let mut clock = TickClock::new(192, 120.0);
        let now = Instant::now();
        clock.start(100, now);
        let stopped = clock.stop(now + Duration::from_secs(1));
        assert!((stopped - 484).abs() <= 1);
        assert_eq!(clock.tick_at(now + Duration::from_secs(5)), stopped);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_bpm_change_preserves_position() {
        let mut clock = TickClock::new(192, 120.0);
        let now = Instant::now();
        clock.start(0, now);
        let later = now + Duration::from_secs(1);
        let before = clock.tick_at(later);
        clock.set_bpm(60.0, later);
        assert_eq!(clock.tick_at(later), before);
        // Half the speed afterwards
        let after = clock.tick_at(later + Duration::from_secs(1));
        assert!((after - before - 192).abs() <= 1);
    }

    #[test]
    fn test_bpm_clamping() {
        assert_eq!(clamp_bpm(0.0), MIN_BPM);
        assert_eq!(clamp_bpm(10_000.0), MAX_BPM);
        assert_eq!(clamp_bpm(f64::NAN), DEFAULT_BPM);
    }

    #[test]
    fn test_frame_accumulator_carries_remainder() {
        let mut acc = FrameAccumulator::new();
        // 48000 Hz, 120 bpm, 192 ppqn: 384 ticks per 48000 frames = 125 frames per tick
        let mut total = 0;
        for _ in 0..100 {
            total += acc.advance(64, 48_000, 120.0, 192);
        }
        // 6400 frames = 51.2 ticks
        assert_eq!(total, 51);
        assert_eq!(acc.advance(0, 48_000, 120.0, 192), 0);
    }
}
