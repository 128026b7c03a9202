//! Output loop: owns the tick while the transport runs.

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::{lock, Shared};
use crate::status::StatusEvent;
use crate::timing::{FrameAccumulator, TickClock};
use crate::transport::TransportState;

/// Render cadence while running.
const INTERVAL: Duration = Duration::from_millis(1);

/// Idle wake-up period, so external start requests are noticed.
const IDLE_POLL: Duration = Duration::from_millis(10);

pub(super) fn run(shared: Arc<Shared>) {
    log::debug!("[TRANSPORT] Output thread running");
    let mut clock = TickClock::new(shared.ppqn, shared.clock.bpm());
    let mut frames = FrameAccumulator::new();

    while let Some(start_tick) = wait_for_start(&shared) {
        play(&shared, start_tick, &mut clock, &mut frames);
    }

    shared.output_alive.store(false, Ordering::Release);
    shared.stop_ack.notify_all();
    log::debug!("[TRANSPORT] Output thread exiting");
}

/// Block until the transport should run. Returns the tick to start from,
/// or `None` on shutdown.
fn wait_for_start(shared: &Shared) -> Option<i64> {
    let mut transport = lock(&shared.transport);
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return None;
        }
        match transport.state {
            TransportState::Starting | TransportState::Running => break,
            TransportState::Stopped if shared.clock.take_start_request() => break,
            TransportState::Stopping => {
                transport.state = TransportState::Stopped;
                shared.stop_ack.notify_all();
            }
            TransportState::Stopped => {}
        }
        if transport.state == TransportState::Stopped {
            if let Some(target) = shared.clock.take_relocation() {
                log::debug!("[TRANSPORT] Relocated {} -> {} while stopped", transport.tick, target);
                transport.tick = target;
                shared.published_tick.store(target, Ordering::Release);
                // Slots are locked before the transport.
                drop(transport);
                shared.reposition(target);
                transport = lock(&shared.transport);
                continue;
            }
        }
        transport = shared
            .start_signal
            .wait_timeout(transport, IDLE_POLL)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
    transport.state = TransportState::Running;
    Some(transport.tick)
}

fn play(shared: &Shared, start_tick: i64, clock: &mut TickClock, frames: &mut FrameAccumulator) {
    shared.clock.take_stop_request();
    shared.reposition(start_tick);

    let mut bpm = lock(&shared.transport).bpm;
    let now = Instant::now();
    clock.set_bpm(bpm, now);
    clock.start(start_tick, now);
    frames.reset();

    let mut tick = start_tick;
    let mut external = shared.clock.is_enabled();
    let mut rendered = false;

    shared.publish(StatusEvent::TransportChanged(TransportState::Running));
    log::info!("[TRANSPORT] Running from tick {}", start_tick);

    loop {
        let (stopping, current_bpm) = {
            let mut transport = lock(&shared.transport);
            if shared.clock.take_stop_request() && transport.state == TransportState::Running {
                transport.state = TransportState::Stopping;
            }
            let stopping = transport.state == TransportState::Stopping || shared.shutdown.load(Ordering::Acquire);
            (stopping, transport.bpm)
        };
        if stopping {
            break;
        }

        let now = Instant::now();
        if current_bpm != bpm {
            bpm = current_bpm;
            clock.set_bpm(bpm, now);
        }

        if let Some(target) = shared.clock.take_relocation() {
            log::debug!("[TRANSPORT] Relocated {} -> {}", tick, target);
            shared.reposition(target);
            {
                let mut transport = lock(&shared.transport);
                transport.tick = target;
                shared.published_tick.store(target, Ordering::Release);
            }
            tick = target;
            clock.rebase(target, now);
            frames.reset();
            rendered = false;
        }

        let now_external = shared.clock.is_enabled();
        if now_external != external {
            external = now_external;
            clock.rebase(tick, now);
            frames.reset();
        }

        let target = if external {
            let elapsed = shared.clock.take_frames();
            tick + frames.advance(elapsed, shared.clock.sample_rate(), bpm, shared.ppqn)
        } else {
            clock.tick_at(now)
        };

        if target > tick || !rendered {
            shared.render(target);
            tick = target;
            rendered = true;
        }

        thread::sleep(INTERVAL);
    }

    shared.finish_stop(tick);
}
