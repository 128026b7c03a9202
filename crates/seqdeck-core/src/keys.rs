//! Key-binding tables and keyboard dispatch.
//!
//! Keys are identified by X11-style keysyms: printable ASCII characters map
//! to their code point, special keys to the `0xff00` range. Each table is a
//! [`KeyMap`], a bimap that keeps key→target and target→key consistent on
//! every rebind.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::command::{Command, GlobalCommand, SlotAction, SlotCommand, SlotSelector, Timing};
use crate::error::ConfigError;

/// A keyboard key code.
pub type KeyCode = u32;

/// Keysyms for the named keys.
pub mod keysym {
    use super::KeyCode;

    pub const SPACE: KeyCode = 0x0020;
    pub const BACKSPACE: KeyCode = 0xff08;
    pub const TAB: KeyCode = 0xff09;
    pub const RETURN: KeyCode = 0xff0d;
    pub const ESCAPE: KeyCode = 0xff1b;
    pub const HOME: KeyCode = 0xff50;
    pub const LEFT: KeyCode = 0xff51;
    pub const UP: KeyCode = 0xff52;
    pub const RIGHT: KeyCode = 0xff53;
    pub const DOWN: KeyCode = 0xff54;
    pub const PAGE_UP: KeyCode = 0xff55;
    pub const PAGE_DOWN: KeyCode = 0xff56;
    pub const END: KeyCode = 0xff57;
    pub const INSERT: KeyCode = 0xff63;
    pub const F1: KeyCode = 0xffbe;
    pub const F12: KeyCode = 0xffc9;
    pub const SHIFT_L: KeyCode = 0xffe1;
    pub const SHIFT_R: KeyCode = 0xffe2;
    pub const CTRL_L: KeyCode = 0xffe3;
    pub const CTRL_R: KeyCode = 0xffe4;
    pub const ALT_L: KeyCode = 0xffe9;
    pub const ALT_R: KeyCode = 0xffea;
    pub const DELETE: KeyCode = 0xffff;
}

const NAMED_KEYS: &[(&str, KeyCode)] = &[
    ("space", keysym::SPACE),
    ("backspace", keysym::BACKSPACE),
    ("tab", keysym::TAB),
    ("return", keysym::RETURN),
    ("escape", keysym::ESCAPE),
    ("home", keysym::HOME),
    ("left", keysym::LEFT),
    ("up", keysym::UP),
    ("right", keysym::RIGHT),
    ("down", keysym::DOWN),
    ("page_up", keysym::PAGE_UP),
    ("page_down", keysym::PAGE_DOWN),
    ("end", keysym::END),
    ("insert", keysym::INSERT),
    ("shift_l", keysym::SHIFT_L),
    ("shift_r", keysym::SHIFT_R),
    ("ctrl_l", keysym::CTRL_L),
    ("ctrl_r", keysym::CTRL_R),
    ("alt_l", keysym::ALT_L),
    ("alt_r", keysym::ALT_R),
    ("delete", keysym::DELETE),
];

/// Parse a key name (`"space"`, `"f5"`, `"ctrl_l"`, or a single character).
pub fn parse_key_name(name: &str) -> Option<KeyCode> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(c as KeyCode);
    }
    let lower = name.to_ascii_lowercase();
    if let Some(&(_, code)) = NAMED_KEYS.iter().find(|(n, _)| *n == lower) {
        return Some(code);
    }
    let n: u32 = lower.strip_prefix('f')?.parse().ok()?;
    (1..=12).contains(&n).then(|| keysym::F1 + n - 1)
}

/// Readable name for a key code, the inverse of [`parse_key_name`].
pub fn key_name(code: KeyCode) -> String {
    if let Some(&(name, _)) = NAMED_KEYS.iter().find(|(_, c)| *c == code) {
        return name.to_string();
    }
    if (keysym::F1..=keysym::F12).contains(&code) {
        return format!("f{}", code - keysym::F1 + 1);
    }
    match char::from_u32(code) {
        Some(c) if !c.is_control() => c.to_string(),
        _ => format!("0x{code:04x}"),
    }
}

/// Bidirectional key table. Each key maps to at most one target and each
/// target to at most one key.
#[derive(Debug, Clone)]
pub struct KeyMap<T> {
    forward: HashMap<KeyCode, T>,
    reverse: HashMap<T, KeyCode>,
}

impl<T> Default for KeyMap<T> {
    fn default() -> Self {
        Self {
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> KeyMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `target`, dropping any previous binding of either.
    pub fn bind(&mut self, key: KeyCode, target: T) {
        if let Some(old_target) = self.forward.remove(&key) {
            self.reverse.remove(&old_target);
        }
        if let Some(old_key) = self.reverse.remove(&target) {
            self.forward.remove(&old_key);
        }
        self.forward.insert(key, target);
        self.reverse.insert(target, key);
    }

    /// Remove a key's binding, returning its target.
    pub fn unbind(&mut self, key: KeyCode) -> Option<T> {
        let target = self.forward.remove(&key)?;
        self.reverse.remove(&target);
        Some(target)
    }

    pub fn target(&self, key: KeyCode) -> Option<T> {
        self.forward.get(&key).copied()
    }

    pub fn key(&self, target: T) -> Option<KeyCode> {
        self.reverse.get(&target).copied()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyCode, T)> + '_ {
        self.forward.iter().map(|(k, t)| (*k, *t))
    }
}

/// Non-slot actions reachable from the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Start,
    Stop,
    BpmUp,
    BpmDown,
    ScreenSetUp,
    ScreenSetDown,
    /// Held: slot keys solo instead of toggle.
    Replace,
    /// Held: slot keys queue their toggle to the next loop boundary.
    Queue,
    /// Latches queue mode until pressed again.
    KeepQueue,
    /// Press saves the playing-state snapshot, release restores it.
    Snapshot1,
    Snapshot2,
}

/// Key names for the control actions, as stored in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlKeyNames {
    pub start: String,
    pub stop: String,
    pub bpm_up: String,
    pub bpm_down: String,
    pub screen_set_up: String,
    pub screen_set_down: String,
    pub replace: String,
    pub queue: String,
    pub keep_queue: String,
    pub snapshot_1: String,
    pub snapshot_2: String,
}

impl Default for ControlKeyNames {
    fn default() -> Self {
        Self {
            start: "space".to_string(),
            stop: "escape".to_string(),
            bpm_up: "'".to_string(),
            bpm_down: ";".to_string(),
            screen_set_up: "]".to_string(),
            screen_set_down: "[".to_string(),
            replace: "ctrl_l".to_string(),
            queue: "ctrl_r".to_string(),
            keep_queue: "\\".to_string(),
            snapshot_1: "alt_l".to_string(),
            snapshot_2: "alt_r".to_string(),
        }
    }
}

/// `[keys]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// One character per bank-relative slot, column-major.
    pub sequence_keys: String,
    /// One character per screen set.
    pub group_keys: String,
    /// Tempo step for the bpm keys.
    pub bpm_step: u32,
    pub control: ControlKeyNames,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            sequence_keys: "1qaz2wsx3edc4rfv5tgb6yhn7ujm8ik,".to_string(),
            group_keys: "!QAZ@WSX#EDC$RFV%TGB^YHN&UJM*IK<".to_string(),
            bpm_step: 1,
            control: ControlKeyNames::default(),
        }
    }
}

/// The three binding tables.
#[derive(Debug, Clone, Default)]
pub struct KeyBindings {
    /// Key → bank-relative slot.
    pub events: KeyMap<usize>,
    /// Key → screen set.
    pub groups: KeyMap<usize>,
    pub control: KeyMap<ControlAction>,
    pub bpm_step: f64,
}

impl KeyBindings {
    /// Build tables from config, rejecting unknown key names.
    pub fn from_config(config: &KeyConfig) -> Result<Self, ConfigError> {
        let mut bindings = KeyBindings {
            bpm_step: config.bpm_step.max(1) as f64,
            ..Default::default()
        };
        for (i, c) in config.sequence_keys.chars().enumerate() {
            bindings.events.bind(c as KeyCode, i);
        }
        for (i, c) in config.group_keys.chars().enumerate() {
            bindings.groups.bind(c as KeyCode, i);
        }
        let names = &config.control;
        let controls = [
            (&names.start, ControlAction::Start),
            (&names.stop, ControlAction::Stop),
            (&names.bpm_up, ControlAction::BpmUp),
            (&names.bpm_down, ControlAction::BpmDown),
            (&names.screen_set_up, ControlAction::ScreenSetUp),
            (&names.screen_set_down, ControlAction::ScreenSetDown),
            (&names.replace, ControlAction::Replace),
            (&names.queue, ControlAction::Queue),
            (&names.keep_queue, ControlAction::KeepQueue),
            (&names.snapshot_1, ControlAction::Snapshot1),
            (&names.snapshot_2, ControlAction::Snapshot2),
        ];
        for (name, action) in controls {
            let key = parse_key_name(name)
                .ok_or_else(|| ConfigError::Config(format!("unknown key name '{}' for {:?}", name, action)))?;
            bindings.control.bind(key, action);
        }
        Ok(bindings)
    }

    pub fn defaults() -> Self {
        // The default config only uses known key names.
        Self::from_config(&KeyConfig::default()).unwrap_or_default()
    }
}

/// Modifier state of the keyboard surface.
#[derive(Debug, Clone, Default)]
pub struct KeyState {
    replace: bool,
    queue: bool,
    keep_queue: bool,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_queueing(&self) -> bool {
        self.queue || self.keep_queue
    }

    /// Resolve a key press. Modifier keys update state and yield nothing.
    pub fn press(&mut self, bindings: &KeyBindings, key: KeyCode) -> Option<Command> {
        if let Some(action) = bindings.control.target(key) {
            return self.control_press(bindings, action);
        }
        if let Some(slot) = bindings.events.target(key) {
            let (action, timing) = match (self.replace, self.is_queueing()) {
                (true, true) => (SlotAction::Solo, Timing::Queued),
                (true, false) => (SlotAction::Solo, Timing::Immediate),
                (false, true) => (SlotAction::Toggle, Timing::Queued),
                (false, false) => (SlotAction::Toggle, Timing::Immediate),
            };
            return Some(SlotCommand::new(SlotSelector::Relative(slot), action).with_timing(timing).into());
        }
        if let Some(set) = bindings.groups.target(key) {
            return Some(GlobalCommand::SelectScreenSet(set as i64).into());
        }
        None
    }

    /// Resolve a key release.
    pub fn release(&mut self, bindings: &KeyBindings, key: KeyCode) -> Option<Command> {
        match bindings.control.target(key)? {
            ControlAction::Replace => {
                self.replace = false;
                None
            }
            ControlAction::Queue => {
                self.queue = false;
                None
            }
            ControlAction::Snapshot1 | ControlAction::Snapshot2 => Some(GlobalCommand::RestoreSnapshot.into()),
            _ => None,
        }
    }

    fn control_press(&mut self, bindings: &KeyBindings, action: ControlAction) -> Option<Command> {
        let cmd = match action {
            ControlAction::Start => GlobalCommand::Play,
            ControlAction::Stop => GlobalCommand::Stop,
            ControlAction::BpmUp => GlobalCommand::AdjustBpm(bindings.bpm_step),
            ControlAction::BpmDown => GlobalCommand::AdjustBpm(-bindings.bpm_step),
            ControlAction::ScreenSetUp => GlobalCommand::ShiftScreenSet(1),
            ControlAction::ScreenSetDown => GlobalCommand::ShiftScreenSet(-1),
            ControlAction::Snapshot1 | ControlAction::Snapshot2 => GlobalCommand::SaveSnapshot,
            ControlAction::Replace => {
                self.replace = true;
                return None;
            }
            ControlAction::Queue => {
                self.queue = true;
                return None;
            }
            ControlAction::KeepQueue => {
                self.keep_queue = !self.keep_queue;
                return None;
            }
        };
        Some(cmd.into())
    }
}
