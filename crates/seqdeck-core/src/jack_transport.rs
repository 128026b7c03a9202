//! JACK client: MIDI output bus and transport follower.
//!
//! One JACK client carries the engine's MIDI output port. When transport
//! sync is requested, its process callback also watches the JACK transport
//! and feeds the engine's [`ExternalClock`]: elapsed frames while rolling,
//! start/stop edges, and relocations (a frame position that differs from
//! where the previous cycle ended).
//!
//! The process callback only touches atomics and a lock-free channel.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use jack::{Client, ClientOptions, MidiOut, Port, ProcessScope};

use crate::bus::{all_notes_off_events, DeviceBus, RenderedEvent};
use crate::midi::MidiEvent;
use crate::timing::ticks_per_second;
use crate::transport::{ExternalClock, TransportControl};

/// Events queued for the next JACK cycle before new ones are dropped.
const OUTPUT_QUEUE: usize = 4096;

/// JACK notification handler.
pub struct JackNotifications;

impl jack::NotificationHandler for JackNotifications {
    unsafe fn shutdown(&mut self, status: jack::ClientStatus, reason: &str) {
        log::warn!("[JACK] Client shutdown: {:?} - {}", status, reason);
    }
}

/// Check whether a JACK server is reachable.
pub fn is_jack_running() -> bool {
    Client::new("seqdeck-probe", ClientOptions::NO_START_SERVER).is_ok()
}

/// A short MIDI message that can cross into the real-time thread without
/// allocating.
#[derive(Debug, Clone, Copy)]
struct RawEvent {
    len: u8,
    data: [u8; 3],
}

impl From<&MidiEvent> for RawEvent {
    fn from(event: &MidiEvent) -> Self {
        let bytes = event.to_bytes();
        let mut data = [0u8; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { len: len as u8, data }
    }
}

/// Runs in the JACK realtime thread.
pub struct JackProcessor {
    midi_out: Port<MidiOut>,
    event_rx: Receiver<RawEvent>,
    clock: Option<Arc<ExternalClock>>,
    rolling: bool,
    expected_frame: Option<u32>,
}

impl JackProcessor {
    fn follow_transport(&mut self, client: &Client, clock: &ExternalClock, n_frames: u32) {
        let Ok(status) = client.transport().query() else {
            return;
        };
        let rolling = matches!(status.state, jack::TransportState::Rolling);
        let frame = status.pos.frame();

        if let Some(expected) = self.expected_frame {
            if frame != expected {
                clock.on_position(clock.frame_to_tick(frame as u64));
            }
        }
        if rolling != self.rolling {
            self.rolling = rolling;
            if rolling {
                clock.on_start();
            } else {
                clock.on_stop();
            }
        }
        if rolling {
            clock.process(n_frames);
            self.expected_frame = Some(frame.wrapping_add(n_frames));
        } else {
            self.expected_frame = Some(frame);
        }
    }
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, client: &Client, ps: &ProcessScope) -> jack::Control {
        let mut writer = self.midi_out.writer(ps);
        while let Ok(event) = self.event_rx.try_recv() {
            let raw = jack::RawMidi {
                time: 0,
                bytes: &event.data[..event.len as usize],
            };
            let _ = writer.write(&raw);
        }

        if let Some(clock) = self.clock.clone() {
            self.follow_transport(client, &clock, ps.n_frames());
        }
        jack::Control::Continue
    }
}

/// Device bus writing to the JACK MIDI output port.
#[derive(Clone)]
pub struct JackMidiBus {
    event_tx: Sender<RawEvent>,
}

impl JackMidiBus {
    fn queue(&self, event: &MidiEvent) {
        match self.event_tx.try_send(RawEvent::from(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::warn!("[JACK] Output queue full, dropping {:?}", event),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl DeviceBus for JackMidiBus {
    fn send(&self, events: &[RenderedEvent]) {
        for e in events {
            self.queue(&e.event);
        }
    }

    fn all_notes_off(&self) {
        for event in all_notes_off_events() {
            self.queue(&event);
        }
    }
}

/// Drives the JACK transport from local start/stop/locate.
pub struct JackTransportControl {
    transport: jack::Transport,
    clock: Arc<ExternalClock>,
}

impl TransportControl for JackTransportControl {
    fn start(&self) {
        if let Err(e) = self.transport.start() {
            log::warn!("[JACK] Transport start failed: {}", e);
        }
    }

    fn stop(&self) {
        if let Err(e) = self.transport.stop() {
            log::warn!("[JACK] Transport stop failed: {}", e);
        }
    }

    fn locate(&self, tick: i64) {
        let rate = self.clock.sample_rate() as f64;
        let per_second = ticks_per_second(self.clock.bpm(), self.clock.ppqn());
        let frame = (tick.max(0) as f64 / per_second * rate) as u32;
        if let Err(e) = self.transport.locate(frame) {
            log::warn!("[JACK] Transport locate failed: {}", e);
        }
    }
}

/// The engine's JACK client.
pub struct JackClient {
    async_client: jack::AsyncClient<JackNotifications, JackProcessor>,
    sample_rate: u32,
    port_name: String,
}

impl JackClient {
    /// Create and activate the client with one MIDI output port. Pass the
    /// engine's external clock to follow the JACK transport.
    pub fn new(client_name: &str, clock: Option<Arc<ExternalClock>>) -> Result<(Self, JackMidiBus), String> {
        let (client, _status) = Client::new(client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| format!("Failed to create JACK client: {}", e))?;

        let midi_out = client
            .register_port("midi_out", MidiOut::default())
            .map_err(|e| format!("Failed to register JACK MIDI output port: {}", e))?;

        let port_name = format!("{}:midi_out", client.name());
        let sample_rate = client.sample_rate() as u32;
        let (event_tx, event_rx) = bounded(OUTPUT_QUEUE);

        let processor = JackProcessor {
            midi_out,
            event_rx,
            clock,
            rolling: false,
            expected_frame: None,
        };

        let async_client = client
            .activate_async(JackNotifications, processor)
            .map_err(|e| format!("Failed to activate JACK client: {}", e))?;

        log::info!("[JACK] MIDI output ready - connect '{}'", port_name);

        Ok((
            Self {
                async_client,
                sample_rate,
                port_name,
            },
            JackMidiBus { event_tx },
        ))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Handle for steering the JACK transport from the engine.
    pub fn transport_control(&self, clock: Arc<ExternalClock>) -> JackTransportControl {
        JackTransportControl {
            transport: self.async_client.as_client().transport(),
            clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_from_midi() {
        let raw = RawEvent::from(&MidiEvent::NoteOn {
            channel: 2,
            note: 64,
            velocity: 90,
        });
        assert_eq!(raw.len, 3);
        assert_eq!(raw.data, [0x92, 64, 90]);

        let raw = RawEvent::from(&MidiEvent::Clock);
        assert_eq!(raw.len, 1);
        assert_eq!(raw.data[0], 0xF8);
    }
}
