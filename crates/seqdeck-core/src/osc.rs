//! OSC command router.
//!
//! Maps decoded OSC messages onto engine [`Command`]s. Two read-only
//! tables drive it: address path → command kind, and verb → slot action
//! for the `/sequence` family. The socket itself lives in the binary.
//!
//! | Address | Arguments |
//! |---------|-----------|
//! | `/play`, `/stop`, `/panic` | none |
//! | `/bpm` | float or int |
//! | `/screenset` | int |
//! | `/sequence`, `/sequence/trig`, `/sequence/queue` | verb, optional selector |
//! | `/status`, `/status/extended` | none |
//!
//! The verb is whichever string argument names a known action, so
//! `/sequence 5 solo` and `/sequence solo 5` are the same command. The
//! remaining arguments select slots in the active screen set: none = all,
//! one int = index, two ints = column and row, one string = name regex.

use std::collections::HashMap;

use rosc::{OscMessage, OscPacket, OscType};

use crate::command::{Command, GlobalCommand, Outcome, SlotAction, SlotCommand, SlotSelector, Timing};
use crate::engine::EngineHandle;
use crate::error::{EngineError, Result};
use crate::screenset::GridLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Play,
    Stop,
    Panic,
    Bpm,
    ScreenSet,
    Sequence(Timing),
    Status { extended: bool },
}

const ROUTES: &[(&str, Route)] = &[
    ("/play", Route::Play),
    ("/stop", Route::Stop),
    ("/panic", Route::Panic),
    ("/bpm", Route::Bpm),
    ("/screenset", Route::ScreenSet),
    ("/sequence", Route::Sequence(Timing::Immediate)),
    ("/sequence/trig", Route::Sequence(Timing::Trigger)),
    ("/sequence/queue", Route::Sequence(Timing::Queued)),
    ("/status", Route::Status { extended: false }),
    ("/status/extended", Route::Status { extended: true }),
];

/// Translates OSC messages into engine commands.
#[derive(Debug, Clone)]
pub struct OscRouter {
    routes: HashMap<&'static str, Route>,
    verbs: HashMap<&'static str, SlotAction>,
    layout: GridLayout,
}

impl OscRouter {
    pub fn new(layout: GridLayout) -> Self {
        Self {
            routes: ROUTES.iter().copied().collect(),
            verbs: SlotAction::ALL.iter().map(|a| (a.verb(), *a)).collect(),
            layout,
        }
    }

    /// Every routed address path.
    pub fn addresses(&self) -> impl Iterator<Item = &'static str> {
        ROUTES.iter().map(|(path, _)| *path)
    }

    /// Decode a message into a command.
    pub fn route(&self, addr: &str, args: &[OscType]) -> Result<Command> {
        let route = self
            .routes
            .get(addr)
            .ok_or_else(|| EngineError::UnknownCommand(addr.to_string()))?;

        let cmd = match *route {
            Route::Play => GlobalCommand::Play.into(),
            Route::Stop => GlobalCommand::Stop.into(),
            Route::Panic => GlobalCommand::Panic.into(),
            Route::Status { extended } => GlobalCommand::Status { extended }.into(),
            Route::Bpm => match args {
                [arg] => GlobalCommand::SetBpm(number(arg).ok_or_else(|| bad_args(addr, args))?).into(),
                _ => return Err(bad_args(addr, args)),
            },
            Route::ScreenSet => match args {
                [arg] => GlobalCommand::SelectScreenSet(integer(arg).ok_or_else(|| bad_args(addr, args))?).into(),
                _ => return Err(bad_args(addr, args)),
            },
            Route::Sequence(timing) => self.sequence(addr, args, timing)?.into(),
        };
        Ok(cmd)
    }

    fn sequence(&self, addr: &str, args: &[OscType], timing: Timing) -> Result<SlotCommand> {
        let mut action = None;
        let mut ints = Vec::new();
        let mut names = Vec::new();

        for arg in args {
            if let OscType::String(s) = arg {
                match self.verbs.get(s.as_str()) {
                    Some(verb) if action.is_none() => action = Some(*verb),
                    _ => names.push(s.as_str()),
                }
            } else {
                ints.push(integer(arg).ok_or_else(|| bad_args(addr, args))?);
            }
        }

        let action = match action {
            Some(action) => action,
            None => {
                let verb = names.first().copied().unwrap_or("");
                return Err(EngineError::UnknownCommand(format!("{addr} {verb}").trim_end().to_string()));
            }
        };

        let selector = match (ints.as_slice(), names.as_slice()) {
            ([], []) => SlotSelector::AllInScreenSet,
            ([index], []) => {
                let per_bank = self.layout.per_bank();
                if *index < 0 || *index as usize >= per_bank {
                    return Err(EngineError::OutOfRange {
                        what: "slot",
                        index: *index,
                        limit: per_bank,
                    });
                }
                SlotSelector::Relative(*index as usize)
            }
            ([column, row], []) => {
                let column = grid_index("column", *column, self.layout.columns)?;
                let row = grid_index("row", *row, self.layout.rows)?;
                SlotSelector::Cell { column, row }
            }
            ([], [name]) => SlotSelector::Name(name.to_string()),
            _ => return Err(bad_args(addr, args)),
        };

        Ok(SlotCommand::new(selector, action).with_timing(timing))
    }

    /// Route and apply one message. Failures are logged and published on
    /// the engine's status channel.
    pub fn handle(&self, engine: &EngineHandle, msg: &OscMessage) -> Option<Outcome> {
        log::debug!("[OSC] {} {:?}", msg.addr, msg.args);
        match self.route(&msg.addr, &msg.args) {
            Ok(cmd) => engine.dispatch(&cmd).ok(),
            Err(error) => {
                engine.reject(describe(msg), error);
                None
            }
        }
    }

    /// Apply every message in a packet, bundles included, returning the
    /// outcomes that carry a reply.
    pub fn handle_packet(&self, engine: &EngineHandle, packet: &OscPacket) -> Vec<Outcome> {
        let mut replies = Vec::new();
        self.collect(engine, packet, &mut replies);
        replies
    }

    fn collect(&self, engine: &EngineHandle, packet: &OscPacket, replies: &mut Vec<Outcome>) {
        match packet {
            OscPacket::Message(msg) => {
                if let Some(outcome @ Outcome::Status(_)) = self.handle(engine, msg) {
                    replies.push(outcome);
                }
            }
            OscPacket::Bundle(bundle) => {
                for inner in &bundle.content {
                    self.collect(engine, inner, replies);
                }
            }
        }
    }
}

fn describe(msg: &OscMessage) -> String {
    if msg.args.is_empty() {
        msg.addr.clone()
    } else {
        format!("{} {:?}", msg.addr, msg.args)
    }
}

fn bad_args(addr: &str, args: &[OscType]) -> EngineError {
    EngineError::InvalidArgument(format!("{addr} {args:?}"))
}

fn grid_index(what: &'static str, value: i64, limit: usize) -> Result<usize> {
    if value < 0 || value as usize >= limit {
        return Err(EngineError::OutOfRange {
            what,
            index: value,
            limit,
        });
    }
    Ok(value as usize)
}

fn integer(arg: &OscType) -> Option<i64> {
    match *arg {
        OscType::Int(v) => Some(v as i64),
        OscType::Long(v) => Some(v),
        _ => None,
    }
}

fn number(arg: &OscType) -> Option<f64> {
    match *arg {
        OscType::Int(v) => Some(v as f64),
        OscType::Long(v) => Some(v as f64),
        OscType::Float(v) => Some(v as f64),
        OscType::Double(v) => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> OscRouter {
        OscRouter::new(GridLayout::default())
    }

    fn s(v: &str) -> OscType {
        OscType::String(v.to_string())
    }

    #[test]
    fn test_verb_position_independent() {
        let r = router();
        let a = r.route("/sequence", &[OscType::Int(5), s("solo")]).unwrap();
        let b = r.route("/sequence", &[s("solo"), OscType::Int(5)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a,
            Command::Slot(SlotCommand::new(SlotSelector::Relative(5), SlotAction::Solo))
        );
    }

    #[test]
    fn test_selectors() {
        let r = router();
        let all = r.route("/sequence", &[s("off")]).unwrap();
        assert_eq!(
            all,
            Command::Slot(SlotCommand::new(SlotSelector::AllInScreenSet, SlotAction::Off))
        );
        let cell = r.route("/sequence", &[s("on"), OscType::Int(2), OscType::Int(3)]).unwrap();
        assert_eq!(
            cell,
            Command::Slot(SlotCommand::new(SlotSelector::Cell { column: 2, row: 3 }, SlotAction::On))
        );
        let named = r.route("/sequence/queue", &[s("toggle"), s("^bass")]).unwrap();
        assert_eq!(
            named,
            Command::Slot(
                SlotCommand::new(SlotSelector::Name("^bass".into()), SlotAction::Toggle).with_timing(Timing::Queued)
            )
        );
    }

    #[test]
    fn test_name_equal_to_verb() {
        // The first verb-like string is the verb; a second one is a name.
        let r = router();
        let cmd = r.route("/sequence", &[s("on"), s("clear")]).unwrap();
        assert_eq!(
            cmd,
            Command::Slot(SlotCommand::new(SlotSelector::Name("clear".into()), SlotAction::On))
        );
    }

    #[test]
    fn test_global_routes() {
        let r = router();
        assert_eq!(r.route("/play", &[]).unwrap(), GlobalCommand::Play.into());
        assert_eq!(
            r.route("/bpm", &[OscType::Float(98.5)]).unwrap(),
            GlobalCommand::SetBpm(98.5).into()
        );
        assert_eq!(r.route("/bpm", &[OscType::Int(140)]).unwrap(), GlobalCommand::SetBpm(140.0).into());
        assert_eq!(
            r.route("/screenset", &[OscType::Int(3)]).unwrap(),
            GlobalCommand::SelectScreenSet(3).into()
        );
        assert_eq!(
            r.route("/status/extended", &[]).unwrap(),
            GlobalCommand::Status { extended: true }.into()
        );
    }

    #[test]
    fn test_errors() {
        let r = router();
        assert_eq!(
            r.route("/nope", &[]),
            Err(EngineError::UnknownCommand("/nope".into()))
        );
        assert_eq!(
            r.route("/sequence", &[s("explode"), OscType::Int(1)]),
            Err(EngineError::UnknownCommand("/sequence explode".into()))
        );
        assert!(matches!(
            r.route("/sequence", &[s("on"), OscType::Int(32)]),
            Err(EngineError::OutOfRange { what: "slot", index: 32, limit: 32 })
        ));
        assert!(matches!(
            r.route("/sequence", &[s("on"), OscType::Int(8), OscType::Int(0)]),
            Err(EngineError::OutOfRange { what: "column", .. })
        ));
        assert!(matches!(r.route("/bpm", &[s("fast")]), Err(EngineError::InvalidArgument(_))));
        assert!(matches!(r.route("/screenset", &[]), Err(EngineError::InvalidArgument(_))));
        assert!(matches!(
            r.route("/sequence", &[s("on"), OscType::Float(1.0)]),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_address_table() {
        let r = router();
        assert_eq!(r.addresses().count(), ROUTES.len());
        assert!(r.addresses().any(|a| a == "/sequence/trig"));
    }
}
