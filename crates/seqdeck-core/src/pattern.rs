//! The pattern contract and a reference looping implementation.
//!
//! The engine treats a pattern as an opaque unit: it can be armed, queued
//! to flip at its next loop boundary, asked to render everything due up to
//! a tick, repositioned, and fed live input while recording. Event storage
//! and editing belong to whoever implements [`Pattern`].

use crate::midi::MidiEvent;

/// A MIDI event at an absolute transport tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub tick: i64,
    pub event: MidiEvent,
}

impl TimedEvent {
    pub fn new(tick: i64, event: MidiEvent) -> Self {
        Self { tick, event }
    }
}

/// One playable unit held by a slot.
pub trait Pattern: Send {
    /// Display name, also used by name selectors.
    fn name(&self) -> &str;

    /// Loop length in ticks.
    fn length(&self) -> i64;

    /// Number of stored events.
    fn event_count(&self) -> usize;

    fn is_armed(&self) -> bool;

    /// Arm or disarm. Disarming releases sounding notes on the next render.
    fn set_armed(&mut self, armed: bool);

    fn is_queued(&self) -> bool;

    /// Queue (or cancel) a flip of the armed state at the next loop boundary.
    fn set_queued_trigger(&mut self, queued: bool);

    fn is_recording(&self) -> bool;

    fn set_recording(&mut self, recording: bool);

    /// Render every event due from the last rendered position up to and
    /// including `upto_tick`. Rendering the same tick twice yields nothing
    /// the second time.
    fn render(&mut self, upto_tick: i64) -> Vec<TimedEvent>;

    /// Reposition playback at `tick`, returning note-offs for anything still
    /// sounding.
    fn reset(&mut self, tick: i64) -> Vec<TimedEvent>;

    /// Capture a live input event at transport `tick` (only while recording).
    fn record(&mut self, tick: i64, event: MidiEvent);

    /// Erase all stored events, keeping name, length and armed state.
    fn clear(&mut self);

    /// Independent copy of the pattern content with playback state reset.
    fn duplicate(&self) -> Box<dyn Pattern>;

    /// Playing state for a performance snapshot.
    fn snapshot(&self) -> bool {
        self.is_armed()
    }

    /// Restore playing state from a performance snapshot.
    fn restore(&mut self, armed: bool) {
        self.set_armed(armed)
    }
}

/// A named, fixed-length loop of MIDI events.
///
/// Event offsets are relative to the loop start and kept sorted. Rendering
/// walks every loop iteration that intersects the requested window, never
/// more than one loop length behind the target tick, so a large jump does
/// not burst a backlog of events.
#[derive(Debug, Clone)]
pub struct LoopPattern {
    name: String,
    length: i64,
    events: Vec<(i64, MidiEvent)>,
    armed: bool,
    queued: bool,
    queued_tick: i64,
    recording: bool,
    /// Next tick to render (inclusive lower bound of the next window).
    next_tick: i64,
    sounding: Vec<(u8, u8)>,
    pending_offs: Vec<MidiEvent>,
}

impl LoopPattern {
    /// Create an empty loop. Length is clamped to at least one tick.
    pub fn new(name: impl Into<String>, length: i64) -> Self {
        Self {
            name: name.into(),
            length: length.max(1),
            events: Vec::new(),
            armed: false,
            queued: false,
            queued_tick: 0,
            recording: false,
            next_tick: 0,
            sounding: Vec::new(),
            pending_offs: Vec::new(),
        }
    }

    /// Add an event at `offset` (wrapped into the loop).
    pub fn with_event(mut self, offset: i64, event: MidiEvent) -> Self {
        self.insert(offset, event);
        self
    }

    /// Add a note of `duration` ticks starting at `offset`.
    pub fn with_note(mut self, offset: i64, duration: i64, channel: u8, note: u8, velocity: u8) -> Self {
        self.insert(
            offset,
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            },
        );
        self.insert(
            offset + duration.max(1),
            MidiEvent::NoteOff {
                channel,
                note,
                velocity: 0,
            },
        );
        self
    }

    /// Stored events as (offset, event) pairs in playback order.
    pub fn events(&self) -> &[(i64, MidiEvent)] {
        &self.events
    }

    /// Keep events ordered by offset, note-offs first within an offset so a
    /// note ending where another (or itself) begins is not cut short.
    fn insert(&mut self, offset: i64, event: MidiEvent) {
        let offset = offset.rem_euclid(self.length);
        let key = (offset, !is_note_off(&event));
        let at = self.events.partition_point(|(o, e)| (*o, !is_note_off(e)) <= key);
        self.events.insert(at, (offset, event));
    }

    fn release_sounding(&mut self) {
        for (channel, note) in self.sounding.drain(..) {
            self.pending_offs.push(MidiEvent::NoteOff {
                channel,
                note,
                velocity: 0,
            });
        }
    }

    fn track(&mut self, event: &MidiEvent) {
        match *event {
            MidiEvent::NoteOn { channel, note, .. } => {
                if !self.sounding.contains(&(channel, note)) {
                    self.sounding.push((channel, note));
                }
            }
            MidiEvent::NoteOff { channel, note, .. } => {
                self.sounding.retain(|&n| n != (channel, note));
            }
            _ => {}
        }
    }

    fn emit_range(&mut self, start: i64, end: i64, out: &mut Vec<TimedEvent>) {
        if !self.armed || start > end || self.events.is_empty() {
            return;
        }
        let start = start.max(end - self.length + 1);
        let mut base = start.div_euclid(self.length) * self.length;
        while base <= end {
            for i in 0..self.events.len() {
                let (offset, event) = self.events[i];
                let Some(tick) = base.checked_add(offset) else {
                    break;
                };
                if tick < start {
                    continue;
                }
                if tick > end {
                    break;
                }
                self.track(&event);
                out.push(TimedEvent::new(tick, event));
            }
            match base.checked_add(self.length) {
                Some(next) => base = next,
                None => break,
            }
        }
    }

    fn flush_offs(&mut self, tick: i64, out: &mut Vec<TimedEvent>) {
        out.extend(self.pending_offs.drain(..).map(|e| TimedEvent::new(tick, e)));
    }
}

fn is_note_off(event: &MidiEvent) -> bool {
    matches!(event, MidiEvent::NoteOff { .. })
}

impl Pattern for LoopPattern {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> i64 {
        self.length
    }

    fn event_count(&self) -> usize {
        self.events.len()
    }

    fn is_armed(&self) -> bool {
        self.armed
    }

    fn set_armed(&mut self, armed: bool) {
        if self.armed && !armed {
            self.release_sounding();
        }
        self.armed = armed;
    }

    fn is_queued(&self) -> bool {
        self.queued
    }

    fn set_queued_trigger(&mut self, queued: bool) {
        self.queued = queued;
        if queued {
            self.queued_tick = (self.next_tick - self.next_tick.rem_euclid(self.length)).saturating_add(self.length);
        }
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    fn render(&mut self, upto_tick: i64) -> Vec<TimedEvent> {
        let mut out = Vec::new();
        if upto_tick < self.next_tick {
            self.flush_offs(self.next_tick.saturating_sub(1).max(0), &mut out);
            return out;
        }
        self.flush_offs(self.next_tick, &mut out);

        let mut start = self.next_tick;
        if self.queued && self.queued_tick <= upto_tick {
            let flip_at = self.queued_tick.max(start);
            self.emit_range(start, flip_at - 1, &mut out);
            let armed = !self.armed;
            self.set_armed(armed);
            self.queued = false;
            self.flush_offs(flip_at, &mut out);
            start = flip_at;
        }
        self.emit_range(start, upto_tick, &mut out);
        self.next_tick = upto_tick.saturating_add(1);
        out
    }

    fn reset(&mut self, tick: i64) -> Vec<TimedEvent> {
        self.release_sounding();
        let mut out = Vec::new();
        self.flush_offs(tick, &mut out);
        self.next_tick = tick.max(0);
        self.queued = false;
        out
    }

    fn record(&mut self, tick: i64, event: MidiEvent) {
        if !self.recording || !event.is_note() {
            return;
        }
        self.insert(tick, event);
    }

    fn clear(&mut self) {
        self.events.clear();
        self.release_sounding();
    }

    fn duplicate(&self) -> Box<dyn Pattern> {
        let mut copy = LoopPattern::new(self.name.clone(), self.length);
        copy.events = self.events.clone();
        copy.next_tick = self.next_tick;
        Box::new(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on(note: u8) -> MidiEvent {
        MidiEvent::NoteOn {
            channel: 0,
            note,
            velocity: 100,
        }
    }

    fn four_on_the_floor() -> LoopPattern {
        LoopPattern::new("kick", 768)
            .with_note(0, 48, 9, 36, 110)
            .with_note(192, 48, 9, 36, 110)
            .with_note(384, 48, 9, 36, 110)
            .with_note(576, 48, 9, 36, 110)
    }

    #[test]
    fn test_disarmed_renders_nothing() {
        let mut pattern = four_on_the_floor();
        assert!(pattern.render(1000).is_empty());
    }

    #[test]
    fn test_render_window_is_inclusive() {
        let mut pattern = four_on_the_floor();
        pattern.set_armed(true);
        let events = pattern.render(192);
        let ticks: Vec<i64> = events.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![0, 48, 192]);
    }

    #[test]
    fn test_render_is_idempotent() {
        let mut pattern = four_on_the_floor();
        pattern.set_armed(true);
        assert_eq!(pattern.render(100).len(), 2);
        assert!(pattern.render(100).is_empty());
        assert!(pattern.render(50).is_empty());
    }

    #[test]
    fn test_render_wraps_loop() {
        let mut pattern = LoopPattern::new("hit", 100).with_event(10, on(60));
        pattern.set_armed(true);
        let ticks: Vec<i64> = pattern.render(250).iter().map(|e| e.tick).collect();
        // Only the last loop length of the window is rendered: 151..=250
        assert_eq!(ticks, vec![210]);
        let ticks: Vec<i64> = pattern.render(320).iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![310]);
    }

    #[test]
    fn test_disarm_releases_sounding_notes() {
        let mut pattern = four_on_the_floor();
        pattern.set_armed(true);
        pattern.render(10);
        pattern.set_armed(false);
        let events = pattern.render(20);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].event, MidiEvent::NoteOff { note: 36, .. }));
        assert_eq!(events[0].tick, 11);
    }

    #[test]
    fn test_queued_flip_at_loop_boundary() {
        let mut pattern = LoopPattern::new("hit", 100).with_event(0, on(60));
        pattern.render(40);
        pattern.set_queued_trigger(true);
        assert!(pattern.is_queued());
        assert!(pattern.render(99).is_empty());
        let events = pattern.render(150);
        assert!(pattern.is_armed());
        assert!(!pattern.is_queued());
        assert_eq!(events, vec![TimedEvent::new(100, on(60))]);
    }

    #[test]
    fn test_record_only_while_recording() {
        let mut pattern = LoopPattern::new("rec", 100);
        pattern.record(5, on(60));
        assert_eq!(pattern.event_count(), 0);
        pattern.set_recording(true);
        pattern.record(205, on(62));
        pattern.record(210, MidiEvent::Clock);
        assert_eq!(pattern.events(), &[(5, on(62))]);
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut original = four_on_the_floor();
        original.set_armed(true);
        let mut copy = original.duplicate();
        assert!(!copy.is_armed());
        assert_eq!(copy.event_count(), original.event_count());
        copy.clear();
        assert_eq!(copy.event_count(), 0);
        assert_eq!(original.event_count(), 8);
    }

    #[test]
    fn test_full_length_note_keeps_sounding() {
        let mut pattern = LoopPattern::new("pad", 768).with_note(0, 768, 0, 60, 100);
        assert!(matches!(pattern.events()[0].1, MidiEvent::NoteOff { note: 60, .. }));
        assert!(matches!(pattern.events()[1].1, MidiEvent::NoteOn { note: 60, .. }));

        pattern.set_armed(true);
        let events = pattern.render(10);
        assert!(matches!(events.last().map(|e| e.event), Some(MidiEvent::NoteOn { note: 60, .. })));

        // Still sounding: disarming owes a note-off.
        pattern.set_armed(false);
        let offs = pattern.render(20);
        assert_eq!(offs.len(), 1);
        assert!(matches!(offs[0].event, MidiEvent::NoteOff { note: 60, .. }));
    }

    #[test]
    fn test_note_ending_on_next_start() {
        let pattern = LoopPattern::new("legato", 96)
            .with_note(0, 48, 0, 60, 100)
            .with_note(48, 48, 0, 62, 100);
        let kinds: Vec<(i64, bool)> = pattern.events().iter().map(|(o, e)| (*o, is_note_off(e))).collect();
        assert_eq!(kinds, vec![(0, true), (0, false), (48, true), (48, false)]);
    }

    #[test]
    fn test_render_at_max_tick() {
        let mut pattern = four_on_the_floor();
        pattern.set_armed(true);
        pattern.reset(i64::MAX - 1000);
        assert!(!pattern.render(i64::MAX).is_empty());
        assert!(pattern.render(i64::MAX).is_empty());
        pattern.set_queued_trigger(true);
        assert!(pattern.is_queued());
    }

    #[test]
    fn test_reset_repositions_and_releases() {
        let mut pattern = four_on_the_floor();
        pattern.set_armed(true);
        pattern.render(10);
        let offs = pattern.reset(0);
        assert_eq!(offs.len(), 1);
        assert_eq!(pattern.render(0).len(), 1);
    }
}
