//! Output device bus.
//!
//! The scheduler hands every rendered event to a [`DeviceBus`]. Backends
//! decide how to deliver them (JACK MIDI port, log sink, test capture).

use std::sync::{Arc, Mutex};

use crate::midi::MidiEvent;

/// An event produced by one slot at an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedEvent {
    pub slot: usize,
    pub tick: i64,
    pub event: MidiEvent,
}

/// Sink for rendered output.
pub trait DeviceBus: Send + Sync {
    /// Deliver a batch of events in tick order.
    fn send(&self, events: &[RenderedEvent]);

    /// Silence every channel.
    fn all_notes_off(&self);
}

/// All-notes-off (CC 123) for every channel.
pub fn all_notes_off_events() -> impl Iterator<Item = MidiEvent> {
    (0..16u8).map(|channel| MidiEvent::ControlChange {
        channel,
        controller: 123,
        value: 0,
    })
}

/// Bus that writes events to the log at debug level.
#[derive(Debug, Default)]
pub struct LogBus;

impl DeviceBus for LogBus {
    fn send(&self, events: &[RenderedEvent]) {
        for e in events {
            log::debug!("[{}] slot {} {:?}", e.tick, e.slot, e.event);
        }
    }

    fn all_notes_off(&self) {
        log::debug!("all notes off");
    }
}

/// Bus that records everything it receives. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureBus {
    events: Arc<Mutex<Vec<RenderedEvent>>>,
    panics: Arc<Mutex<usize>>,
}

impl CaptureBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything captured so far.
    pub fn take(&self) -> Vec<RenderedEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Number of all-notes-off requests seen.
    pub fn all_notes_off_count(&self) -> usize {
        *self.panics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceBus for CaptureBus {
    fn send(&self, events: &[RenderedEvent]) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(events);
    }

    fn all_notes_off(&self) {
        *self.panics.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_bus_shares_buffer() {
        let bus = CaptureBus::new();
        let clone = bus.clone();
        clone.send(&[RenderedEvent {
            slot: 1,
            tick: 10,
            event: MidiEvent::Clock,
        }]);
        clone.all_notes_off();
        assert_eq!(bus.take().len(), 1);
        assert!(bus.take().is_empty());
        assert_eq!(bus.all_notes_off_count(), 1);
    }

    #[test]
    fn test_all_notes_off_events() {
        let events: Vec<_> = all_notes_off_events().collect();
        assert_eq!(events.len(), 16);
        assert_eq!(events[15].to_bytes(), vec![0xBF, 123, 0]);
    }
}
