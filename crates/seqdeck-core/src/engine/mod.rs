//! The performance engine.
//!
//! [`Engine`] owns two worker threads:
//! - the output loop, which owns the transport tick and renders armed slots
//!   to the device bus
//! - the input loop, which feeds live MIDI into recording slots
//!
//! [`EngineHandle`] is the cloneable, thread-safe interface every control
//! surface uses. Lock order: `screen_sets` before `slots` before
//! `transport`; the real-time side only touches [`ExternalClock`] atomics.

mod dispatch;
mod input;
mod output;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::bus::{DeviceBus, RenderedEvent};
use crate::config::EngineConfig;
use crate::context::AppContext;
use crate::error::{EngineError, Result};
use crate::midi::MidiEvent;
use crate::pattern::{Pattern, TimedEvent};
use crate::screenset::ScreenSets;
use crate::slots::{Observer, SlotTable};
use crate::status::StatusEvent;
use crate::timing::clamp_bpm;
use crate::transport::{ExternalClock, TransportControl, TransportState};

/// How long `stop()` waits between checks that the output thread is alive.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Live input events buffered ahead of the input loop. Senders on a
/// real-time thread use `try_send` and drop when full.
pub const INPUT_QUEUE: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Transport fields guarded together.
#[derive(Debug)]
struct Transport {
    state: TransportState,
    tick: i64,
    looping: bool,
    loop_anchor: i64,
    bpm: f64,
}

/// State shared between the handle, the worker threads and callbacks.
struct Shared {
    ppqn: u32,
    transport: Mutex<Transport>,
    /// Signalled when the transport should start (or on shutdown).
    start_signal: Condvar,
    /// Signalled when the output loop has completed a stop.
    stop_ack: Condvar,
    /// Last rendered tick, readable without locking.
    published_tick: AtomicI64,
    slots: Mutex<SlotTable>,
    screen_sets: RwLock<ScreenSets>,
    snapshot: Mutex<Option<Vec<bool>>>,
    clock: Arc<ExternalClock>,
    control: RwLock<Option<Arc<dyn TransportControl>>>,
    bus: Arc<dyn DeviceBus>,
    status_tx: Sender<StatusEvent>,
    status_rx: Receiver<StatusEvent>,
    input_tx: Sender<MidiEvent>,
    context: Mutex<AppContext>,
    output_alive: AtomicBool,
    shutdown: AtomicBool,
}

impl Shared {
    fn publish(&self, event: StatusEvent) {
        // A full channel means nobody is listening; drop.
        let _ = self.status_tx.try_send(event);
    }

    fn set_modified(&self) {
        lock(&self.context).set_modified(true);
    }

    /// Render every armed slot up to `tick` and hand the events to the bus.
    fn render(&self, tick: i64) -> bool {
        if tick < 0 {
            log::warn!("[TRANSPORT] Rejected render at negative tick {}", tick);
            return false;
        }
        let mut events = Vec::new();
        {
            let mut slots = lock(&self.slots);
            let mut flipped = Vec::new();
            for (slot, pattern) in slots.iter_mut() {
                let was_armed = pattern.is_armed();
                events.extend(tagged(slot, pattern.render(tick)));
                if was_armed != pattern.is_armed() {
                    flipped.push(slot);
                }
            }
            for slot in flipped {
                slots.mark_dirty(slot);
            }
        }
        if !events.is_empty() {
            log::trace!("[TRANSPORT] tick {}: {} events", tick, events.len());
            self.bus.send(&events);
        }
        let mut transport = lock(&self.transport);
        if tick > transport.tick {
            transport.tick = tick;
        }
        self.published_tick.store(transport.tick, Ordering::Release);
        true
    }

    /// Reposition every pattern at `tick`, sending owed note-offs.
    fn reposition(&self, tick: i64) {
        let mut offs = Vec::new();
        {
            let mut slots = lock(&self.slots);
            for (slot, pattern) in slots.iter_mut() {
                offs.extend(tagged(slot, pattern.reset(tick)));
            }
        }
        if !offs.is_empty() {
            self.bus.send(&offs);
        }
    }

    /// Complete a stop on the calling thread.
    fn finish_stop(&self, tick: i64) {
        let final_tick = {
            let transport = lock(&self.transport);
            if transport.looping {
                transport.loop_anchor
            } else {
                tick.max(transport.tick)
            }
        };
        self.reposition(final_tick);
        self.bus.all_notes_off();
        // Requests that arrived for the run that just ended are stale.
        self.clock.take_start_request();
        self.clock.take_stop_request();
        self.clock.take_relocation();
        {
            let mut transport = lock(&self.transport);
            transport.tick = final_tick;
            transport.state = TransportState::Stopped;
            self.published_tick.store(final_tick, Ordering::Release);
        }
        self.stop_ack.notify_all();
        self.publish(StatusEvent::TransportChanged(TransportState::Stopped));
        log::info!("[TRANSPORT] Stopped at tick {}", final_tick);
    }

    fn capture(&self, event: MidiEvent) {
        let tick = self.published_tick.load(Ordering::Acquire);
        let mut captured = false;
        {
            let mut slots = lock(&self.slots);
            let recording: Vec<usize> = slots
                .iter()
                .filter(|(_, p)| p.is_recording())
                .map(|(i, _)| i)
                .collect();
            for slot in recording {
                if let Ok(pattern) = slots.get_mut(slot) {
                    pattern.record(tick, event);
                    captured = true;
                }
            }
        }
        if captured {
            self.set_modified();
        }
    }
}

fn tagged(slot: usize, events: Vec<TimedEvent>) -> impl Iterator<Item = RenderedEvent> {
    events.into_iter().map(move |e| RenderedEvent {
        slot,
        tick: e.tick,
        event: e.event,
    })
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    // ---- transport ----

    /// Start the transport. Returns once the request is recorded; the
    /// output loop begins rendering on its next wake-up.
    pub fn start(&self) -> Result<()> {
        {
            let mut transport = lock(&self.shared.transport);
            match transport.state {
                TransportState::Stopping => return Err(EngineError::TransportBusy),
                TransportState::Starting | TransportState::Running => return Ok(()),
                TransportState::Stopped if self.shared.output_alive.load(Ordering::Acquire) => {
                    transport.state = TransportState::Starting;
                }
                // Without an output loop the caller drives rendering.
                TransportState::Stopped => transport.state = TransportState::Running,
            }
        }
        self.shared.start_signal.notify_all();
        if self.shared.clock.is_enabled() {
            if let Some(control) = read(&self.shared.control).as_ref() {
                control.start();
            }
        }
        log::info!("[TRANSPORT] Start requested");
        Ok(())
    }

    /// Stop the transport, blocking until the output loop has acknowledged.
    /// No device bus writes from rendering happen after this returns.
    /// Stopping a stopped transport does nothing.
    pub fn stop(&self) {
        let mut transport = lock(&self.shared.transport);
        match transport.state {
            TransportState::Stopped => return,
            TransportState::Starting => {
                // The output loop never picked it up.
                transport.state = TransportState::Stopped;
                drop(transport);
                self.stop_external();
                return;
            }
            TransportState::Running | TransportState::Stopping => {}
        }
        transport.state = TransportState::Stopping;
        self.shared.start_signal.notify_all();
        loop {
            if transport.state == TransportState::Stopped {
                break;
            }
            if !self.shared.output_alive.load(Ordering::Acquire) {
                let tick = transport.tick;
                drop(transport);
                self.shared.finish_stop(tick);
                break;
            }
            transport = self
                .shared
                .stop_ack
                .wait_timeout(transport, STOP_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        self.stop_external();
    }

    fn stop_external(&self) {
        if self.shared.clock.is_enabled() {
            if let Some(control) = read(&self.shared.control).as_ref() {
                control.stop();
            }
        }
    }

    /// Start if stopped, stop if running.
    pub fn toggle_play(&self) -> Result<()> {
        match self.transport_state() {
            TransportState::Stopped => self.start(),
            TransportState::Running | TransportState::Starting => {
                self.stop();
                Ok(())
            }
            TransportState::Stopping => Err(EngineError::TransportBusy),
        }
    }

    pub fn transport_state(&self) -> TransportState {
        lock(&self.shared.transport).state
    }

    pub fn is_running(&self) -> bool {
        self.transport_state() == TransportState::Running
    }

    /// Current transport position.
    pub fn current_tick(&self) -> i64 {
        self.shared.published_tick.load(Ordering::Acquire)
    }

    /// Render all armed slots up to `tick`. A negative tick is logged and
    /// ignored; the tick does not move.
    pub fn render(&self, tick: i64) {
        self.shared.render(tick);
    }

    /// Silence every channel now. Tick and armed state are untouched.
    pub fn panic(&self) {
        log::info!("[TRANSPORT] Panic");
        self.shared.bus.all_notes_off();
    }

    /// Whether stop returns to the loop anchor.
    pub fn set_looping(&self, looping: bool) {
        lock(&self.shared.transport).looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        lock(&self.shared.transport).looping
    }

    pub fn set_loop_anchor(&self, tick: i64) {
        lock(&self.shared.transport).loop_anchor = tick.max(0);
    }

    pub fn bpm(&self) -> f64 {
        lock(&self.shared.transport).bpm
    }

    /// Set the tempo (clamped). The output loop re-anchors on its next cycle.
    pub fn set_bpm(&self, bpm: f64) -> f64 {
        let bpm = clamp_bpm(bpm);
        lock(&self.shared.transport).bpm = bpm;
        self.shared.clock.set_bpm(bpm);
        log::debug!("[TRANSPORT] bpm {}", bpm);
        bpm
    }

    pub fn adjust_bpm(&self, delta: f64) -> f64 {
        let bpm = self.bpm() + delta;
        self.set_bpm(bpm)
    }

    /// Jump to `tick`. While the transport runs the output loop picks the
    /// new position up on its next cycle; otherwise patterns are
    /// repositioned immediately.
    pub fn relocate(&self, tick: i64) {
        let tick = tick.max(0);
        let running = {
            let mut transport = lock(&self.shared.transport);
            if transport.state == TransportState::Stopped {
                // A local jump overrides any external position not yet applied.
                self.shared.clock.take_relocation();
                transport.tick = tick;
                self.shared.published_tick.store(tick, Ordering::Release);
                false
            } else {
                true
            }
        };
        if running && self.shared.output_alive.load(Ordering::Acquire) {
            self.shared.clock.on_position(tick);
        } else {
            self.shared.reposition(tick);
        }
        if self.shared.clock.is_enabled() {
            if let Some(control) = read(&self.shared.control).as_ref() {
                control.locate(tick);
            }
        }
    }

    // ---- external clock ----

    /// The mailbox an external transport callback writes into.
    pub fn external_clock(&self) -> Arc<ExternalClock> {
        self.shared.clock.clone()
    }

    /// Let an external transport pace the tick.
    pub fn enable_external_clock(&self, sample_rate: u32) {
        self.shared.clock.enable(sample_rate);
        log::info!("[TRANSPORT] External clock enabled ({} Hz)", sample_rate);
    }

    /// Return to internal pacing, keeping the current tick.
    pub fn disable_external_clock(&self) {
        self.shared.clock.disable();
        log::info!("[TRANSPORT] External clock disabled");
    }

    /// Register the external transport so local start/stop/locate follow it.
    pub fn set_transport_control(&self, control: Option<Arc<dyn TransportControl>>) {
        *write(&self.shared.control) = control;
    }

    // ---- slots ----

    /// Place `pattern` into an empty slot.
    pub fn add(&self, slot: usize, pattern: Box<dyn Pattern>) -> Result<()> {
        lock(&self.shared.slots).add(slot, pattern)?;
        self.shared.set_modified();
        Ok(())
    }

    /// Remove a slot's pattern, silencing anything it was playing.
    pub fn delete(&self, slot: usize) -> Result<Box<dyn Pattern>> {
        let tick = self.current_tick();
        let (pattern, offs) = {
            let mut slots = lock(&self.shared.slots);
            let mut pattern = slots.delete(slot)?;
            let offs: Vec<RenderedEvent> = tagged(slot, pattern.reset(tick)).collect();
            (pattern, offs)
        };
        self.send(&offs);
        self.shared.set_modified();
        Ok(pattern)
    }

    pub fn copy(&self, slot: usize) -> Result<()> {
        lock(&self.shared.slots).copy(slot)
    }

    pub fn cut(&self, slot: usize) -> Result<()> {
        let tick = self.current_tick();
        let offs = lock(&self.shared.slots).cut(slot, tick)?;
        self.send(&tagged(slot, offs).collect::<Vec<_>>());
        self.shared.set_modified();
        Ok(())
    }

    /// Paste the clipboard into an empty slot. Occupied targets are rejected.
    pub fn paste(&self, slot: usize) -> Result<()> {
        lock(&self.shared.slots).paste(slot)?;
        self.shared.set_modified();
        Ok(())
    }

    pub fn move_slot(&self, from: usize, to: usize) -> Result<()> {
        lock(&self.shared.slots).move_slot(from, to)?;
        self.shared.set_modified();
        Ok(())
    }

    /// Erase a pattern's events, keeping the slot occupied.
    pub fn clear(&self, slot: usize) -> Result<()> {
        self.with_pattern_mut(slot, |p| p.clear())?;
        self.shared.set_modified();
        Ok(())
    }

    pub fn is_active(&self, slot: usize) -> bool {
        lock(&self.shared.slots).is_active(slot)
    }

    /// Check and clear one observer's dirty flag for a slot.
    pub fn is_dirty(&self, slot: usize, observer: Observer) -> bool {
        lock(&self.shared.slots).is_dirty(slot, observer)
    }

    pub fn slot_capacity(&self) -> usize {
        lock(&self.shared.slots).capacity()
    }

    /// Read a slot's pattern.
    pub fn with_pattern<R>(&self, slot: usize, f: impl FnOnce(&dyn Pattern) -> R) -> Result<R> {
        let slots = lock(&self.shared.slots);
        Ok(f(slots.get(slot)?))
    }

    /// Modify a slot's pattern; marks the slot dirty for every observer.
    pub fn with_pattern_mut<R>(&self, slot: usize, f: impl FnOnce(&mut dyn Pattern) -> R) -> Result<R> {
        let mut slots = lock(&self.shared.slots);
        Ok(f(slots.get_mut(slot)?))
    }

    pub fn set_armed(&self, slot: usize, armed: bool) -> Result<()> {
        self.with_pattern_mut(slot, |p| p.set_armed(armed))
    }

    pub fn set_recording(&self, slot: usize, recording: bool) -> Result<()> {
        self.with_pattern_mut(slot, |p| p.set_recording(recording))
    }

    /// Disarm every slot.
    pub fn off_all(&self) {
        let mut slots = lock(&self.shared.slots);
        let armed: Vec<usize> = slots.iter().filter(|(_, p)| p.is_armed()).map(|(i, _)| i).collect();
        for slot in armed {
            if let Ok(pattern) = slots.get_mut(slot) {
                pattern.set_armed(false);
            }
        }
    }

    /// Reposition every pattern at the current tick.
    pub fn reset_patterns(&self) {
        self.shared.reposition(self.current_tick());
    }

    /// Empty every slot, notepad, the snapshot and the clipboard.
    pub fn clear_all(&self) {
        let tick = self.current_tick();
        let mut offs = Vec::new();
        {
            let mut sets = write(&self.shared.screen_sets);
            for set in 0..sets.count() {
                let _ = sets.set_notepad(set, "");
            }
            let mut slots = lock(&self.shared.slots);
            for (slot, mut pattern) in slots.clear_all() {
                pattern.set_armed(false);
                offs.extend(tagged(slot, pattern.reset(tick)));
            }
        }
        *lock(&self.shared.snapshot) = None;
        self.send(&offs);
        self.shared.set_modified();
        log::info!("[ENGINE] Cleared all slots");
    }

    fn send(&self, events: &[RenderedEvent]) {
        if !events.is_empty() {
            self.shared.bus.send(events);
        }
    }

    // ---- snapshot ----

    /// Capture every slot's playing state. Replaces any earlier snapshot.
    pub fn save_snapshot(&self) {
        let slots = lock(&self.shared.slots);
        let mut states = vec![false; slots.capacity()];
        for (slot, pattern) in slots.iter() {
            states[slot] = pattern.snapshot();
        }
        drop(slots);
        *lock(&self.shared.snapshot) = Some(states);
        log::debug!("[ENGINE] Snapshot saved");
    }

    /// Restore the captured playing state. Without a snapshot nothing changes.
    pub fn restore_snapshot(&self) {
        let Some(states) = lock(&self.shared.snapshot).clone() else {
            log::debug!("[ENGINE] No snapshot to restore");
            return;
        };
        let mut slots = lock(&self.shared.slots);
        for (slot, armed) in states.into_iter().enumerate() {
            if let Ok(pattern) = slots.get_mut(slot) {
                pattern.restore(armed);
            }
        }
        log::debug!("[ENGINE] Snapshot restored");
    }

    pub fn has_snapshot(&self) -> bool {
        lock(&self.shared.snapshot).is_some()
    }

    // ---- screen sets ----

    pub fn screen_set(&self) -> usize {
        read(&self.shared.screen_sets).active()
    }

    pub fn screen_set_count(&self) -> usize {
        read(&self.shared.screen_sets).count()
    }

    /// Switch the active screen set. Armed state is untouched.
    pub fn set_screen_set(&self, index: i64) -> Result<usize> {
        let active = write(&self.shared.screen_sets).set_active(index)?;
        self.shared.publish(StatusEvent::ScreenSetChanged(active));
        log::info!("[ENGINE] Screen set {}", active);
        Ok(active)
    }

    /// Step the active screen set, wrapping at both ends.
    pub fn shift_screen_set(&self, delta: i64) -> usize {
        let active = write(&self.shared.screen_sets).shift(delta);
        self.shared.publish(StatusEvent::ScreenSetChanged(active));
        log::info!("[ENGINE] Screen set {}", active);
        active
    }

    pub fn notepad(&self, index: usize) -> Result<String> {
        let sets = read(&self.shared.screen_sets);
        sets.notepad(index)
            .map(str::to_string)
            .ok_or_else(|| EngineError::screen_set_range(index as i64, sets.count()))
    }

    pub fn set_notepad(&self, index: usize, text: impl Into<String>) -> Result<()> {
        write(&self.shared.screen_sets).set_notepad(index, text)?;
        self.shared.set_modified();
        Ok(())
    }

    // ---- context and events ----

    pub fn with_context<R>(&self, f: impl FnOnce(&mut AppContext) -> R) -> R {
        f(&mut lock(&self.shared.context))
    }

    /// Receiver for status events. All receivers share one queue.
    pub fn status_events(&self) -> Receiver<StatusEvent> {
        self.shared.status_rx.clone()
    }

    /// Sender for live MIDI input (drained by the input loop).
    pub fn input_sender(&self) -> Sender<MidiEvent> {
        self.shared.input_tx.clone()
    }

    pub fn ppqn(&self) -> u32 {
        self.shared.ppqn
    }

    /// Ask the worker threads to exit.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.start_signal.notify_all();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("transport", &self.transport_state())
            .field("tick", &self.current_tick())
            .finish_non_exhaustive()
    }
}

/// The running engine. Dropping it stops the transport and joins both
/// worker threads.
pub struct Engine {
    handle: EngineHandle,
    output_thread: Option<JoinHandle<()>>,
    input_thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build the engine and launch its output and input threads.
    pub fn new(config: &EngineConfig, bus: Arc<dyn DeviceBus>) -> Self {
        let clock = Arc::new(ExternalClock::new(config.ppqn.max(1), config.bpm()));
        Self::with_clock(config, bus, clock)
    }

    /// Like [`new`](Self::new), around an external-clock mailbox that a
    /// transport callback was already given.
    pub fn with_clock(config: &EngineConfig, bus: Arc<dyn DeviceBus>, clock: Arc<ExternalClock>) -> Self {
        let layout = config.layout();
        let bpm = config.bpm();
        clock.set_bpm(bpm);
        let (status_tx, status_rx) = bounded(config.status_capacity.max(1));
        let (input_tx, input_rx) = bounded(INPUT_QUEUE);

        let shared = Arc::new(Shared {
            ppqn: config.ppqn.max(1),
            transport: Mutex::new(Transport {
                state: TransportState::Stopped,
                tick: 0,
                looping: config.looping,
                loop_anchor: 0,
                bpm,
            }),
            start_signal: Condvar::new(),
            stop_ack: Condvar::new(),
            published_tick: AtomicI64::new(0),
            slots: Mutex::new(SlotTable::new(layout.capacity())),
            screen_sets: RwLock::new(ScreenSets::new(layout)),
            snapshot: Mutex::new(None),
            clock,
            control: RwLock::new(None),
            bus,
            status_tx,
            status_rx,
            input_tx,
            context: Mutex::new(AppContext::new()),
            output_alive: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        let output_shared = shared.clone();
        shared.output_alive.store(true, Ordering::Release);
        let output_thread = thread::Builder::new()
            .name("seqdeck-output".into())
            .spawn(move || output::run(output_shared))
            .map_err(|e| {
                shared.output_alive.store(false, Ordering::Release);
                log::error!("[TRANSPORT] Failed to launch output thread: {}", e);
            })
            .ok();

        let input_shared = shared.clone();
        let input_thread = thread::Builder::new()
            .name("seqdeck-input".into())
            .spawn(move || input::run(input_shared, input_rx))
            .map_err(|e| log::error!("[INPUT] Failed to launch input thread: {}", e))
            .ok();

        log::info!(
            "[ENGINE] Started: {} screen sets x {} slots, {} bpm, {} ppqn",
            layout.screen_sets,
            layout.per_bank(),
            bpm,
            config.ppqn
        );

        Self {
            handle: EngineHandle { shared },
            output_thread,
            input_thread,
        }
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Stop the transport and join the worker threads.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.handle.stop();
        self.handle.shutdown();
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.input_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.join();
    }
}
