//! SeqDeck Core - live MIDI performance engine.
//!
//! This crate provides the building blocks of a pattern-bank sequencer:
//!
//! - **Slots** - Fixed table of pattern slots with a clipboard and per-view dirty flags
//! - **Screen sets** - Banks of slots addressed by grid position or bank-relative index
//! - **Transport** - Tick clock, start/stop/relocate, external (JACK) clock adapter
//! - **Engine** - Output and input threads behind a cloneable handle
//! - **Commands** - One command model shared by OSC and the keyboard
//! - **OSC** - Address/verb router for remote control
//! - **Keys** - Bidirectional key binding tables and modifier state
//!
//! # Architecture
//!
//! Every control surface turns its input into a [`Command`] and applies it
//! through [`EngineHandle::dispatch`]. The output thread owns the transport
//! tick and renders armed patterns to a [`DeviceBus`]; the input thread
//! feeds live MIDI into recording slots. Rejected commands are logged and
//! published as [`StatusEvent::Rejected`].
//!
//! # Feature Flags
//!
//! - `native` (default) - JACK MIDI output/transport and ALSA/JACK MIDI input

pub mod bus;
pub mod command;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod keys;
pub mod midi;
pub mod osc;
pub mod pattern;
pub mod screenset;
pub mod slots;
pub mod status;
pub mod timing;
pub mod transport;

// Native-only modules (require system dependencies)
#[cfg(feature = "native")]
pub mod jack_transport;

pub use bus::{CaptureBus, DeviceBus, LogBus, RenderedEvent};
pub use command::{Command, GlobalCommand, Outcome, SlotAction, SlotCommand, SlotSelector, Timing};
pub use config::{Config, EngineConfig};
pub use context::AppContext;
pub use engine::{Engine, EngineHandle};
pub use error::{ConfigError, EngineError, Result};
pub use keys::{ControlAction, KeyBindings, KeyCode, KeyMap, KeyState};
pub use midi::MidiEvent;
pub use osc::OscRouter;
pub use pattern::{LoopPattern, Pattern, TimedEvent};
pub use screenset::{GridLayout, ScreenSets};
pub use slots::{Observer, SlotTable};
pub use status::{SlotStatus, StatusEvent, StatusReport};
pub use timing::{TickClock, DEFAULT_BPM, DEFAULT_PPQN};
pub use transport::{ExternalClock, TransportControl, TransportState};

// Native-only re-exports
#[cfg(feature = "native")]
pub use jack_transport::{JackClient, JackMidiBus};
#[cfg(feature = "native")]
pub use midi::{MidiBackend, MidiDeviceInfo, MidiInputManager};
