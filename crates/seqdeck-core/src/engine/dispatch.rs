//! Command application and status reports.

use regex::Regex;

use super::{lock, read, EngineHandle};
use crate::command::{Command, GlobalCommand, Outcome, SlotAction, SlotCommand, SlotSelector, Timing};
use crate::error::{EngineError, Result};
use crate::pattern::Pattern;
use crate::status::{SlotStatus, StatusEvent, StatusReport};
use crate::transport::TransportState;

impl EngineHandle {
    /// Apply a command from any control surface.
    pub fn apply(&self, command: &Command) -> Result<Outcome> {
        match command {
            Command::Global(cmd) => self.apply_global(cmd),
            Command::Slot(cmd) => {
                self.apply_slot(cmd)?;
                Ok(Outcome::Done)
            }
        }
    }

    /// Apply a command; a rejection is logged and published on the status
    /// channel as well as returned.
    pub fn dispatch(&self, command: &Command) -> Result<Outcome> {
        let result = self.apply(command);
        if let Err(error) = &result {
            self.reject(command.to_string(), error.clone());
        }
        result
    }

    /// Report a command that never made it to [`apply`](Self::apply).
    pub fn reject(&self, command: String, error: EngineError) {
        log::warn!("[ENGINE] Rejected '{}': {}", command, error);
        self.shared.publish(StatusEvent::Rejected { command, error });
    }

    fn apply_global(&self, cmd: &GlobalCommand) -> Result<Outcome> {
        match *cmd {
            GlobalCommand::Play => self.start()?,
            GlobalCommand::Stop => self.stop(),
            GlobalCommand::TogglePlay => self.toggle_play()?,
            GlobalCommand::Panic => self.panic(),
            GlobalCommand::SetBpm(bpm) => {
                if !bpm.is_finite() {
                    return Err(EngineError::InvalidArgument(format!("bpm {bpm}")));
                }
                self.set_bpm(bpm);
            }
            GlobalCommand::AdjustBpm(delta) => {
                self.adjust_bpm(delta);
            }
            GlobalCommand::SelectScreenSet(index) => {
                self.set_screen_set(index)?;
            }
            GlobalCommand::ShiftScreenSet(delta) => {
                self.shift_screen_set(delta);
            }
            GlobalCommand::SaveSnapshot => self.save_snapshot(),
            GlobalCommand::RestoreSnapshot => self.restore_snapshot(),
            GlobalCommand::OffAll => self.off_all(),
            GlobalCommand::Status { extended } => return Ok(Outcome::Status(self.status(extended))),
        }
        Ok(Outcome::Done)
    }

    /// Resolve a selector to absolute slot indices in ascending order.
    pub fn resolve(&self, selector: &SlotSelector) -> Result<Vec<usize>> {
        let sets = read(&self.shared.screen_sets);
        let range = sets.range(sets.active());
        match selector {
            SlotSelector::Absolute(slot) => {
                let capacity = sets.layout().capacity();
                if *slot >= capacity {
                    return Err(EngineError::slot_range(*slot, capacity));
                }
                Ok(vec![*slot])
            }
            SlotSelector::Relative(index) => Ok(vec![sets.resolve(*index as i64)?]),
            SlotSelector::Cell { column, row } => Ok(vec![range.start + sets.layout().cell_offset(*column, *row)?]),
            SlotSelector::AllInScreenSet => {
                let slots = lock(&self.shared.slots);
                Ok(range.filter(|&i| slots.is_active(i)).collect())
            }
            SlotSelector::Name(pattern) => {
                let re = Regex::new(pattern)
                    .map_err(|e| EngineError::InvalidArgument(format!("name pattern '{pattern}': {e}")))?;
                let slots = lock(&self.shared.slots);
                Ok(slots
                    .find(|name| re.is_match(name))
                    .into_iter()
                    .filter(|i| range.contains(i))
                    .collect())
            }
        }
    }

    fn apply_slot(&self, cmd: &SlotCommand) -> Result<()> {
        let targets = self.resolve(&cmd.selector)?;
        let queued = cmd.timing == Timing::Queued && cmd.action.is_arming();

        match cmd.action {
            SlotAction::Solo => self.solo(&targets, queued)?,
            SlotAction::On => self.each(&targets, |p| arm_to(p, true, queued))?,
            SlotAction::Off => self.each(&targets, |p| arm_to(p, false, queued))?,
            SlotAction::Toggle => self.each(&targets, |p| {
                if queued {
                    let q = p.is_queued();
                    p.set_queued_trigger(!q);
                } else {
                    let armed = p.is_armed();
                    p.set_armed(!armed);
                }
            })?,
            SlotAction::Record => self.each(&targets, |p| {
                let recording = p.is_recording();
                p.set_recording(!recording);
            })?,
            SlotAction::RecordOn => self.each(&targets, |p| p.set_recording(true))?,
            SlotAction::RecordOff => self.each(&targets, |p| p.set_recording(false))?,
            SlotAction::Copy => targets.iter().try_for_each(|&slot| self.copy(slot))?,
            SlotAction::Cut => targets.iter().try_for_each(|&slot| self.cut(slot))?,
            SlotAction::Paste => targets.iter().try_for_each(|&slot| self.paste(slot))?,
            SlotAction::Delete => targets.iter().try_for_each(|&slot| self.delete(slot).map(drop))?,
            SlotAction::Clear => targets.iter().try_for_each(|&slot| self.clear(slot))?,
        }

        if cmd.timing == Timing::Trigger && self.transport_state() == TransportState::Stopped {
            self.start()?;
        }
        Ok(())
    }

    /// Run `f` on every target; an empty target fails before anything changes.
    fn each(&self, targets: &[usize], mut f: impl FnMut(&mut dyn Pattern)) -> Result<()> {
        let mut slots = lock(&self.shared.slots);
        if let Some(&empty) = targets.iter().find(|&&slot| !slots.is_active(slot)) {
            return Err(EngineError::SlotEmpty(empty));
        }
        for &slot in targets {
            f(slots.get_mut(slot)?);
        }
        Ok(())
    }

    /// Arm the targets and disarm every other slot in their screen sets.
    fn solo(&self, targets: &[usize], queued: bool) -> Result<()> {
        let per_bank = read(&self.shared.screen_sets).per_bank();
        let mut slots = lock(&self.shared.slots);
        if let Some(&empty) = targets.iter().find(|&&slot| !slots.is_active(slot)) {
            return Err(EngineError::SlotEmpty(empty));
        }
        let mut banks: Vec<usize> = targets.iter().map(|slot| slot / per_bank).collect();
        banks.dedup();
        for bank in banks {
            for slot in bank * per_bank..(bank + 1) * per_bank {
                let Ok(pattern) = slots.get_mut(slot) else {
                    continue;
                };
                arm_to(pattern, targets.contains(&slot), queued);
            }
        }
        Ok(())
    }

    /// Build a status report: the active screen set, or every set when
    /// `extended`. Slots are listed in ascending order.
    pub fn status(&self, extended: bool) -> StatusReport {
        let (transport, tick, bpm) = {
            let t = lock(&self.shared.transport);
            (t.state, t.tick, t.bpm)
        };
        let sets = read(&self.shared.screen_sets);
        let active = sets.active();
        let per_bank = sets.per_bank();
        let notepad = sets.notepad(active).unwrap_or_default().to_string();
        let range = if extended {
            0..sets.layout().capacity()
        } else {
            sets.range(active)
        };

        let slots = lock(&self.shared.slots);
        let mut armed_per_bank = vec![0usize; sets.count()];
        for (slot, pattern) in slots.iter() {
            if pattern.is_armed() {
                armed_per_bank[slot / per_bank] += 1;
            }
        }
        let records = slots
            .iter()
            .filter(|(slot, _)| range.contains(slot))
            .map(|(slot, pattern)| {
                let bank = slot / per_bank;
                SlotStatus {
                    slot,
                    screen_set: bank,
                    index_in_set: slot % per_bank,
                    name: pattern.name().to_string(),
                    armed: pattern.is_armed(),
                    solo: pattern.is_armed() && armed_per_bank[bank] == 1,
                    queued: pattern.is_queued(),
                    recording: pattern.is_recording(),
                    length: extended.then(|| pattern.length()),
                }
            })
            .collect();

        StatusReport {
            screen_set: active,
            notepad,
            bpm,
            transport,
            tick,
            slots: records,
        }
    }
}

/// Move a pattern toward `armed`, now or at its next loop boundary.
fn arm_to(pattern: &mut dyn Pattern, armed: bool, queued: bool) {
    if queued {
        pattern.set_queued_trigger(pattern.is_armed() != armed);
    } else {
        pattern.set_queued_trigger(false);
        pattern.set_armed(armed);
    }
}
