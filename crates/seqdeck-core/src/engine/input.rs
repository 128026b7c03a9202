//! Input loop: forwards live MIDI into recording slots.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::Shared;
use crate::midi::MidiEvent;

const POLL: Duration = Duration::from_millis(10);

pub(super) fn run(shared: Arc<Shared>, rx: Receiver<MidiEvent>) {
    log::debug!("[INPUT] Input thread running");
    loop {
        match rx.recv_timeout(POLL) {
            Ok(event) => handle(&shared, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if shared.shutdown.load(Ordering::Acquire) {
            // Deliver whatever is already queued before leaving.
            for event in rx.try_iter() {
                shared.capture(event);
            }
            break;
        }
    }
    log::debug!("[INPUT] Input thread exiting");
}

fn handle(shared: &Shared, event: MidiEvent) {
    match event {
        MidiEvent::Start | MidiEvent::Continue => {
            shared.clock.on_start();
            shared.start_signal.notify_all();
        }
        MidiEvent::Stop => shared.clock.on_stop(),
        MidiEvent::Clock => {}
        _ => shared.capture(event),
    }
}
