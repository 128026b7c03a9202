//! MIDI events and input plumbing.
//!
//! This module provides:
//! - [`MidiEvent`] parsing from and encoding to raw bytes
//! - [`MidiInputManager`] for ALSA (via midir) and JACK MIDI input (native only)
//!
//! Input devices push parsed events into a channel that the engine's input
//! loop drains.

#[cfg(feature = "native")]
use crossbeam_channel::Sender;
#[cfg(feature = "native")]
use jack::{Client, ClientOptions, MidiIn, Port, ProcessScope};
#[cfg(feature = "native")]
use midir::{MidiInput, MidiInputConnection};

/// A channel or realtime MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiEvent {
    /// Note on event (channel 0-15, note 0-127, velocity 1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note off event
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Control change
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Program change
    ProgramChange { channel: u8, program: u8 },
    /// Pitch bend (14-bit value, 8192 = center)
    PitchBend { channel: u8, value: u16 },
    /// Channel aftertouch
    ChannelAftertouch { channel: u8, pressure: u8 },
    /// MIDI clock tick (24 per quarter note)
    Clock,
    /// Start playback
    Start,
    /// Continue playback
    Continue,
    /// Stop playback
    Stop,
}

impl MidiEvent {
    /// Parse raw MIDI bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;

        // System real-time messages (single byte, can appear anywhere)
        match status {
            0xF8 => return Some(MidiEvent::Clock),
            0xFA => return Some(MidiEvent::Start),
            0xFB => return Some(MidiEvent::Continue),
            0xFC => return Some(MidiEvent::Stop),
            _ => {}
        }

        let channel = status & 0x0F;
        let data1 = bytes.get(1).map(|b| b & 0x7F);
        let data2 = bytes.get(2).map(|b| b & 0x7F);

        match (status & 0xF0, data1, data2) {
            (0x90, Some(note), Some(0)) => Some(MidiEvent::NoteOff {
                channel,
                note,
                velocity: 0,
            }),
            (0x90, Some(note), Some(velocity)) => Some(MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            }),
            (0x80, Some(note), Some(velocity)) => Some(MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            }),
            (0xB0, Some(controller), Some(value)) => Some(MidiEvent::ControlChange {
                channel,
                controller,
                value,
            }),
            (0xC0, Some(program), _) => Some(MidiEvent::ProgramChange { channel, program }),
            (0xD0, Some(pressure), _) => Some(MidiEvent::ChannelAftertouch { channel, pressure }),
            (0xE0, Some(lsb), Some(msb)) => Some(MidiEvent::PitchBend {
                channel,
                value: ((msb as u16) << 7) | lsb as u16,
            }),
            _ => None,
        }
    }

    /// Encode into raw MIDI bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            } => vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
            MidiEvent::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiEvent::ChannelAftertouch { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiEvent::PitchBend { channel, value } => vec![
                0xE0 | (channel & 0x0F),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
            MidiEvent::Clock => vec![0xF8],
            MidiEvent::Start => vec![0xFA],
            MidiEvent::Continue => vec![0xFB],
            MidiEvent::Stop => vec![0xFC],
        }
    }

    /// Channel of a channel message, `None` for realtime messages.
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ChannelAftertouch { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// True for note on/off, the events live recording captures.
    pub fn is_note(&self) -> bool {
        matches!(self, MidiEvent::NoteOn { .. } | MidiEvent::NoteOff { .. })
    }
}

/// MIDI backend type.
#[cfg(feature = "native")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiBackend {
    /// ALSA MIDI (via midir)
    Alsa,
    /// JACK MIDI
    Jack,
}

#[cfg(feature = "native")]
impl std::fmt::Display for MidiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MidiBackend::Alsa => write!(f, "ALSA"),
            MidiBackend::Jack => write!(f, "JACK"),
        }
    }
}

/// Information about a connected MIDI device.
#[cfg(feature = "native")]
#[derive(Debug, Clone)]
pub struct MidiDeviceInfo {
    /// Device name (as reported by the system)
    pub name: String,
    /// Port index (for opening)
    pub port_index: usize,
    /// MIDI backend (ALSA or JACK)
    pub backend: MidiBackend,
}

/// MIDI input manager.
///
/// Owns the open input connections and forwards every parsed event into
/// one channel, normally the engine's input sender.
#[cfg(feature = "native")]
pub struct MidiInputManager {
    event_tx: Sender<MidiEvent>,
    alsa_connections: Vec<MidiInputConnection<()>>,
    jack_client: Option<JackMidiInput>,
    connected_devices: Vec<MidiDeviceInfo>,
}

#[cfg(feature = "native")]
impl MidiInputManager {
    /// Create an input manager that forwards events into `event_tx`.
    pub fn new(event_tx: Sender<MidiEvent>) -> Self {
        Self {
            event_tx,
            alsa_connections: Vec::new(),
            jack_client: None,
            connected_devices: Vec::new(),
        }
    }

    /// List available ALSA MIDI input devices.
    pub fn list_devices() -> Result<Vec<MidiDeviceInfo>, String> {
        let midi_in = MidiInput::new("seqdeck-probe")
            .map_err(|e| format!("Failed to create MIDI input: {}", e))?;

        let devices = midi_in
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| MidiDeviceInfo {
                name: midi_in
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Device {}", index)),
                port_index: index,
                backend: MidiBackend::Alsa,
            })
            .collect();

        Ok(devices)
    }

    /// Open an ALSA MIDI input device by name (partial match, case-insensitive).
    pub fn open_by_name(&mut self, name: &str) -> Result<MidiDeviceInfo, String> {
        let name_lower = name.to_lowercase();
        let device = Self::list_devices()?
            .into_iter()
            .find(|d| d.name.to_lowercase().contains(&name_lower))
            .ok_or_else(|| format!("No MIDI device found matching '{}'", name))?;

        self.open_by_index(device.port_index)
    }

    /// Open an ALSA MIDI input device by port index.
    pub fn open_by_index(&mut self, port_index: usize) -> Result<MidiDeviceInfo, String> {
        let midi_in = MidiInput::new("seqdeck")
            .map_err(|e| format!("Failed to create MIDI input: {}", e))?;

        let ports = midi_in.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| format!("Invalid MIDI port index: {}", port_index))?;

        let name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| format!("Unknown Device {}", port_index));

        let tx = self.event_tx.clone();
        let connection = midi_in
            .connect(
                port,
                "seqdeck-input",
                move |_timestamp, bytes, _| {
                    if let Some(event) = MidiEvent::from_bytes(bytes) {
                        let _ = tx.try_send(event);
                    }
                },
                (),
            )
            .map_err(|e| format!("Failed to connect to MIDI device: {}", e))?;

        let device_info = MidiDeviceInfo {
            name: name.clone(),
            port_index,
            backend: MidiBackend::Alsa,
        };
        self.alsa_connections.push(connection);
        self.connected_devices.push(device_info.clone());

        log::info!("[INPUT] Connected to ALSA MIDI device: {} (port {})", name, port_index);

        Ok(device_info)
    }

    /// Open a JACK MIDI input port named `<client_name>:midi_in`.
    pub fn open_jack(&mut self, client_name: &str) -> Result<MidiDeviceInfo, String> {
        if self.jack_client.is_some() {
            return Err("JACK MIDI client already open".to_string());
        }

        let client = JackMidiInput::new(client_name, "midi_in", self.event_tx.clone())?;
        let device_info = client.device_info().clone();

        self.jack_client = Some(client);
        self.connected_devices.push(device_info.clone());

        Ok(device_info)
    }

    /// Get list of currently connected devices.
    pub fn connected_devices(&self) -> &[MidiDeviceInfo] {
        &self.connected_devices
    }

    /// Close all connections (both ALSA and JACK).
    pub fn close_all(&mut self) {
        self.alsa_connections.clear();
        self.jack_client = None;
        self.connected_devices.clear();
    }
}

/// JACK client with one MIDI input port.
#[cfg(feature = "native")]
pub struct JackMidiInput {
    _async_client: jack::AsyncClient<crate::jack_transport::JackNotifications, JackMidiInputProcessor>,
    device_info: MidiDeviceInfo,
}

/// Runs in the JACK realtime thread.
#[cfg(feature = "native")]
pub struct JackMidiInputProcessor {
    midi_in: Port<MidiIn>,
    tx: Sender<MidiEvent>,
}

#[cfg(feature = "native")]
impl jack::ProcessHandler for JackMidiInputProcessor {
    fn process(&mut self, _client: &jack::Client, ps: &ProcessScope) -> jack::Control {
        for raw in self.midi_in.iter(ps) {
            if let Some(event) = MidiEvent::from_bytes(raw.bytes) {
                // Bounded queue; a full queue drops rather than allocate here.
                let _ = self.tx.try_send(event);
            }
        }
        jack::Control::Continue
    }
}

#[cfg(feature = "native")]
impl JackMidiInput {
    /// Create and activate a JACK client with a MIDI input port.
    pub fn new(client_name: &str, port_name: &str, tx: Sender<MidiEvent>) -> Result<Self, String> {
        let (client, _status) = Client::new(client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| format!("Failed to create JACK client: {}", e))?;

        let midi_in = client
            .register_port(port_name, MidiIn::default())
            .map_err(|e| format!("Failed to register JACK MIDI port: {}", e))?;

        let device_info = MidiDeviceInfo {
            name: format!("{}:{}", client_name, port_name),
            port_index: 0,
            backend: MidiBackend::Jack,
        };

        let async_client = client
            .activate_async(crate::jack_transport::JackNotifications, JackMidiInputProcessor { midi_in, tx })
            .map_err(|e| format!("Failed to activate JACK client: {}", e))?;

        log::info!("[JACK] MIDI input '{}' ready", device_info.name);

        Ok(Self {
            _async_client: async_client,
            device_info,
        })
    }

    /// Get the device info for this JACK MIDI client.
    pub fn device_info(&self) -> &MidiDeviceInfo {
        &self.device_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_on() {
        let event = MidiEvent::from_bytes(&[0x91, 60, 100]).unwrap();
        assert_eq!(
            event,
            MidiEvent::NoteOn {
                channel: 1,
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(event.channel(), Some(1));
        assert!(event.is_note());
    }

    #[test]
    fn test_parse_note_on_velocity_zero() {
        let event = MidiEvent::from_bytes(&[0x90, 60, 0]).unwrap();
        assert!(matches!(event, MidiEvent::NoteOff { note: 60, .. }));
    }

    #[test]
    fn test_parse_realtime_and_short() {
        assert_eq!(MidiEvent::from_bytes(&[0xFA]), Some(MidiEvent::Start));
        assert_eq!(MidiEvent::from_bytes(&[0xFC]), Some(MidiEvent::Stop));
        assert_eq!(MidiEvent::from_bytes(&[]), None);
        assert_eq!(MidiEvent::from_bytes(&[0x90, 60]), None);
        assert_eq!(MidiEvent::Clock.channel(), None);
    }

    #[test]
    fn test_pitch_bend_bytes() {
        let bend = MidiEvent::PitchBend {
            channel: 2,
            value: 8192,
        };
        assert_eq!(bend.to_bytes(), vec![0xE2, 0, 64]);
        assert_eq!(MidiEvent::from_bytes(&bend.to_bytes()), Some(bend));
    }

    #[test]
    fn test_encode_channel_messages() {
        let off = MidiEvent::NoteOff {
            channel: 1,
            note: 48,
            velocity: 0,
        };
        assert_eq!(off.to_bytes(), vec![0x81, 48, 0]);
        let cc = MidiEvent::ControlChange {
            channel: 0,
            controller: 123,
            value: 0,
        };
        assert_eq!(cc.to_bytes(), vec![0xB0, 123, 0]);
    }
}
