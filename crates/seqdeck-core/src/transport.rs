//! Transport state and the external-clock handoff.
//!
//! [`ExternalClock`] is the only state shared with a real-time audio
//! callback. Every field is an atomic: the callback publishes elapsed
//! frames, relocations and start/stop requests, and the scheduler thread
//! consumes them on its next cycle.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use crate::timing::{clamp_bpm, ticks_per_second};

/// Transport lifecycle.
///
/// `Starting` and `Stopping` are transitional: commands that change the
/// transport while it is in one of them are rejected as busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl TransportState {
    pub fn is_transitioning(self) -> bool {
        matches!(self, TransportState::Starting | TransportState::Stopping)
    }
}

const NO_RELOCATION: i64 = i64::MIN;

/// Lock-free mailbox between an external transport callback and the scheduler.
#[derive(Debug)]
pub struct ExternalClock {
    enabled: AtomicBool,
    sample_rate: AtomicU32,
    bpm_bits: AtomicU64,
    ppqn: u32,
    pending_frames: AtomicU64,
    relocation: AtomicI64,
    start_requested: AtomicBool,
    stop_requested: AtomicBool,
}

impl ExternalClock {
    pub fn new(ppqn: u32, bpm: f64) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sample_rate: AtomicU32::new(0),
            bpm_bits: AtomicU64::new(clamp_bpm(bpm).to_bits()),
            ppqn: ppqn.max(1),
            pending_frames: AtomicU64::new(0),
            relocation: AtomicI64::new(NO_RELOCATION),
            start_requested: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Hand tick pacing to the external source.
    pub fn enable(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.pending_frames.store(0, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
    }

    /// Return pacing to the internal clock. The tick is left where it is.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.pending_frames.store(0, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn ppqn(&self) -> u32 {
        self.ppqn
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.bpm_bits.store(clamp_bpm(bpm).to_bits(), Ordering::Release);
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::Acquire))
    }

    /// Convert an absolute frame position to a tick.
    pub fn frame_to_tick(&self, frame: u64) -> i64 {
        let rate = self.sample_rate();
        if rate == 0 {
            return 0;
        }
        (frame as f64 / rate as f64 * ticks_per_second(self.bpm(), self.ppqn)).floor() as i64
    }

    // Real-time side. None of these block or allocate.

    /// Publish `frames` elapsed while the external transport was rolling.
    pub fn process(&self, frames: u32) {
        if self.is_enabled() {
            self.pending_frames.fetch_add(frames as u64, Ordering::AcqRel);
        }
    }

    /// The external transport started rolling.
    pub fn on_start(&self) {
        self.stop_requested.store(false, Ordering::Release);
        self.start_requested.store(true, Ordering::Release);
    }

    /// The external transport stopped.
    pub fn on_stop(&self) {
        self.start_requested.store(false, Ordering::Release);
        self.stop_requested.store(true, Ordering::Release);
    }

    /// The external transport jumped to `tick`. The value is authoritative.
    pub fn on_position(&self, tick: i64) {
        self.relocation.store(tick.max(0), Ordering::Release);
        self.pending_frames.store(0, Ordering::Release);
    }

    // Scheduler side.

    pub fn take_frames(&self) -> u64 {
        self.pending_frames.swap(0, Ordering::AcqRel)
    }

    pub fn take_relocation(&self) -> Option<i64> {
        match self.relocation.swap(NO_RELOCATION, Ordering::AcqRel) {
            NO_RELOCATION => None,
            tick => Some(tick),
        }
    }

    pub fn take_start_request(&self) -> bool {
        self.start_requested.swap(false, Ordering::AcqRel)
    }

    pub fn take_stop_request(&self) -> bool {
        self.stop_requested.swap(false, Ordering::AcqRel)
    }
}

/// Commands the engine sends back to an external transport so that local
/// start/stop keep it in step.
pub trait TransportControl: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn locate(&self, tick: i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_only_accumulate_when_enabled() {
        let clock = ExternalClock::new(192, 120.0);
        clock.process(256);
        assert_eq!(clock.take_frames(), 0);
        clock.enable(48_000);
        clock.process(256);
        clock.process(256);
        assert_eq!(clock.take_frames(), 512);
        assert_eq!(clock.take_frames(), 0);
    }

    #[test]
    fn test_relocation_is_taken_once() {
        let clock = ExternalClock::new(192, 120.0);
        assert_eq!(clock.take_relocation(), None);
        clock.enable(48_000);
        clock.process(128);
        clock.on_position(768);
        assert_eq!(clock.take_frames(), 0);
        assert_eq!(clock.take_relocation(), Some(768));
        assert_eq!(clock.take_relocation(), None);
    }

    #[test]
    fn test_start_stop_requests() {
        let clock = ExternalClock::new(192, 120.0);
        clock.on_start();
        clock.on_stop();
        assert!(!clock.take_start_request());
        assert!(clock.take_stop_request());
        assert!(!clock.take_stop_request());
    }

    #[test]
    fn test_frame_to_tick() {
        let clock = ExternalClock::new(192, 120.0);
        clock.enable(48_000);
        // One second at 120 bpm, 192 ppqn
        assert_eq!(clock.frame_to_tick(48_000), 384);
        clock.disable();
        assert!(!clock.is_enabled());
    }

    #[test]
    fn test_transitioning_states() {
        assert!(TransportState::Starting.is_transitioning());
        assert!(TransportState::Stopping.is_transitioning());
        assert!(!TransportState::Running.is_transitioning());
    }
}
