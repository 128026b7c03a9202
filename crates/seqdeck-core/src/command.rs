//! Engine commands shared by the OSC router and keyboard dispatch.
//!
//! Both control surfaces decode their input into a [`Command`] and hand it
//! to [`EngineHandle::apply`](crate::engine::EngineHandle::apply), so remote
//! and local control behave identically.

use std::fmt;

use crate::status::StatusReport;

/// Which slots a slot command addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotSelector {
    /// Flat index into the global slot array.
    Absolute(usize),
    /// Index within the active screen set.
    Relative(usize),
    /// Grid cell within the active screen set.
    Cell { column: usize, row: usize },
    /// Every occupied slot of the active screen set.
    AllInScreenSet,
    /// Occupied slots of the active screen set whose name matches a regex.
    Name(String),
}

/// Per-slot operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotAction {
    /// Arm this slot and disarm every other slot in its screen set.
    Solo,
    On,
    Off,
    Toggle,
    /// Toggle live capture.
    Record,
    RecordOn,
    RecordOff,
    Copy,
    Cut,
    Paste,
    Delete,
    /// Erase the pattern's events, keeping the slot occupied.
    Clear,
}

impl SlotAction {
    pub const ALL: [SlotAction; 12] = [
        SlotAction::Solo,
        SlotAction::On,
        SlotAction::Off,
        SlotAction::Toggle,
        SlotAction::Record,
        SlotAction::RecordOn,
        SlotAction::RecordOff,
        SlotAction::Copy,
        SlotAction::Cut,
        SlotAction::Paste,
        SlotAction::Delete,
        SlotAction::Clear,
    ];

    /// Verb used on the wire.
    pub fn verb(self) -> &'static str {
        match self {
            SlotAction::Solo => "solo",
            SlotAction::On => "on",
            SlotAction::Off => "off",
            SlotAction::Toggle => "toggle",
            SlotAction::Record => "record",
            SlotAction::RecordOn => "record_on",
            SlotAction::RecordOff => "record_off",
            SlotAction::Copy => "copy",
            SlotAction::Cut => "cut",
            SlotAction::Paste => "paste",
            SlotAction::Delete => "delete",
            SlotAction::Clear => "clear",
        }
    }

    /// Whether the action changes armed state (and so can be queued).
    pub fn is_arming(self) -> bool {
        matches!(
            self,
            SlotAction::Solo | SlotAction::On | SlotAction::Off | SlotAction::Toggle
        )
    }
}

/// When a slot command takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timing {
    /// Apply now.
    #[default]
    Immediate,
    /// Apply now, then start the transport if it is stopped.
    Trigger,
    /// Arming changes flip at each pattern's next loop boundary.
    Queued,
}

/// A slot command.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotCommand {
    pub selector: SlotSelector,
    pub action: SlotAction,
    pub timing: Timing,
}

impl SlotCommand {
    pub fn new(selector: SlotSelector, action: SlotAction) -> Self {
        Self {
            selector,
            action,
            timing: Timing::Immediate,
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}

/// Commands addressed to the engine as a whole.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalCommand {
    Play,
    Stop,
    TogglePlay,
    Panic,
    SetBpm(f64),
    AdjustBpm(f64),
    SelectScreenSet(i64),
    ShiftScreenSet(i64),
    SaveSnapshot,
    RestoreSnapshot,
    OffAll,
    Status { extended: bool },
}

/// Anything the control surfaces can ask of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Global(GlobalCommand),
    Slot(SlotCommand),
}

impl From<GlobalCommand> for Command {
    fn from(cmd: GlobalCommand) -> Self {
        Command::Global(cmd)
    }
}

impl From<SlotCommand> for Command {
    fn from(cmd: SlotCommand) -> Self {
        Command::Slot(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Global(GlobalCommand::SetBpm(bpm)) => write!(f, "bpm {bpm}"),
            Command::Global(GlobalCommand::AdjustBpm(delta)) => write!(f, "bpm {delta:+}"),
            Command::Global(GlobalCommand::SelectScreenSet(n)) => write!(f, "screenset {n}"),
            Command::Global(GlobalCommand::ShiftScreenSet(n)) => write!(f, "screenset {n:+}"),
            Command::Global(GlobalCommand::Status { extended: true }) => write!(f, "status extended"),
            Command::Global(GlobalCommand::Status { extended: false }) => write!(f, "status"),
            Command::Global(cmd) => write!(f, "{}", format!("{cmd:?}").to_lowercase()),
            Command::Slot(cmd) => {
                write!(f, "sequence {} ", cmd.action.verb())?;
                match &cmd.selector {
                    SlotSelector::Absolute(i) => write!(f, "#{i}"),
                    SlotSelector::Relative(i) => write!(f, "{i}"),
                    SlotSelector::Cell { column, row } => write!(f, "{column},{row}"),
                    SlotSelector::AllInScreenSet => write!(f, "*"),
                    SlotSelector::Name(pattern) => write!(f, "/{pattern}/"),
                }
            }
        }
    }
}

/// Result of a successfully applied command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Status(StatusReport),
}
