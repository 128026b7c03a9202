//! Slot table: a fixed arena of pattern slots plus the clipboard.
//!
//! Slots are addressed by a flat index. Each occupied slot carries one dirty
//! flag per observer so that several views can each notice a change once.

use crate::error::{EngineError, Result};
use crate::pattern::Pattern;

/// Views that poll slots for changes independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Observer {
    Main,
    Edit,
    Perf,
    Names,
}

impl Observer {
    pub const ALL: [Observer; 4] = [Observer::Main, Observer::Edit, Observer::Perf, Observer::Names];

    fn bit(self) -> u8 {
        match self {
            Observer::Main => 1,
            Observer::Edit => 1 << 1,
            Observer::Perf => 1 << 2,
            Observer::Names => 1 << 3,
        }
    }
}

const ALL_DIRTY: u8 = 0b1111;

enum Slot {
    Empty,
    Occupied { pattern: Box<dyn Pattern>, dirty: u8 },
}

/// Fixed-capacity pattern storage.
pub struct SlotTable {
    slots: Vec<Slot>,
    clipboard: Option<Box<dyn Pattern>>,
}

impl SlotTable {
    /// Create a table with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Empty);
        Self {
            slots,
            clipboard: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.slots.len() {
            return Err(EngineError::slot_range(index, self.slots.len()));
        }
        Ok(())
    }

    /// Check whether a slot holds a pattern. Out-of-range slots are never active.
    pub fn is_active(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Slot::Occupied { .. }))
    }

    /// Place a pattern in an empty slot.
    pub fn add(&mut self, index: usize, pattern: Box<dyn Pattern>) -> Result<()> {
        self.check(index)?;
        if self.is_active(index) {
            return Err(EngineError::SlotOccupied(index));
        }
        self.slots[index] = Slot::Occupied {
            pattern,
            dirty: ALL_DIRTY,
        };
        Ok(())
    }

    /// Remove and return the pattern in a slot, disarmed.
    pub fn delete(&mut self, index: usize) -> Result<Box<dyn Pattern>> {
        self.check(index)?;
        match std::mem::replace(&mut self.slots[index], Slot::Empty) {
            Slot::Occupied { mut pattern, .. } => {
                pattern.set_armed(false);
                Ok(pattern)
            }
            Slot::Empty => Err(EngineError::SlotEmpty(index)),
        }
    }

    /// Copy a slot's pattern into the clipboard.
    pub fn copy(&mut self, index: usize) -> Result<()> {
        let duplicate = self.get(index)?.duplicate();
        self.clipboard = Some(duplicate);
        Ok(())
    }

    /// Move a slot's pattern into the clipboard, leaving the slot empty.
    ///
    /// Returns note-offs the removed pattern still owed, released at `tick`.
    pub fn cut(&mut self, index: usize, tick: i64) -> Result<Vec<crate::pattern::TimedEvent>> {
        let mut pattern = self.delete(index)?;
        let offs = pattern.reset(tick);
        self.clipboard = Some(pattern);
        Ok(offs)
    }

    /// Paste an independent copy of the clipboard into an empty slot.
    pub fn paste(&mut self, index: usize) -> Result<()> {
        self.check(index)?;
        if self.is_active(index) {
            return Err(EngineError::SlotOccupied(index));
        }
        let duplicate = match &self.clipboard {
            Some(pattern) => pattern.duplicate(),
            None => return Err(EngineError::ClipboardEmpty),
        };
        self.add(index, duplicate)
    }

    /// Move a pattern from one slot to another empty slot.
    pub fn move_slot(&mut self, from: usize, to: usize) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        if from == to {
            return if self.is_active(from) {
                Ok(())
            } else {
                Err(EngineError::SlotEmpty(from))
            };
        }
        if !self.is_active(from) {
            return Err(EngineError::SlotEmpty(from));
        }
        if self.is_active(to) {
            return Err(EngineError::SlotOccupied(to));
        }
        self.slots.swap(from, to);
        self.mark_dirty(to);
        Ok(())
    }

    /// Empty every slot and the clipboard, returning what was removed.
    pub fn clear_all(&mut self) -> Vec<(usize, Box<dyn Pattern>)> {
        self.clipboard = None;
        let mut removed = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Occupied { pattern, .. } = std::mem::replace(slot, Slot::Empty) {
                removed.push((i, pattern));
            }
        }
        removed
    }

    pub fn has_clipboard(&self) -> bool {
        self.clipboard.is_some()
    }

    /// Borrow the pattern in a slot.
    pub fn get(&self, index: usize) -> Result<&dyn Pattern> {
        self.check(index)?;
        match &self.slots[index] {
            Slot::Occupied { pattern, .. } => Ok(pattern.as_ref()),
            Slot::Empty => Err(EngineError::SlotEmpty(index)),
        }
    }

    /// Mutably borrow the pattern in a slot, marking it dirty for every observer.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut dyn Pattern> {
        self.check(index)?;
        match &mut self.slots[index] {
            Slot::Occupied { pattern, dirty } => {
                *dirty = ALL_DIRTY;
                Ok(pattern.as_mut())
            }
            Slot::Empty => Err(EngineError::SlotEmpty(index)),
        }
    }

    /// Mark a slot changed for every observer.
    pub fn mark_dirty(&mut self, index: usize) {
        if let Some(Slot::Occupied { dirty, .. }) = self.slots.get_mut(index) {
            *dirty = ALL_DIRTY;
        }
    }

    /// Check whether a slot changed since `observer` last asked, clearing only
    /// that observer's flag.
    pub fn is_dirty(&mut self, index: usize, observer: Observer) -> bool {
        match self.slots.get_mut(index) {
            Some(Slot::Occupied { dirty, .. }) => {
                let set = *dirty & observer.bit() != 0;
                *dirty &= !observer.bit();
                set
            }
            _ => false,
        }
    }

    /// Iterate occupied slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn Pattern)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { pattern, .. } => Some((i, pattern.as_ref())),
            Slot::Empty => None,
        })
    }

    /// Iterate occupied slots mutably in ascending order.
    ///
    /// Does not touch dirty flags; callers mark slots whose visible state changed.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut dyn Pattern)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { pattern, .. } => Some((i, pattern.as_mut() as &mut dyn Pattern)),
            Slot::Empty => None,
        })
    }

    /// Indices of occupied slots whose name matches `pred`.
    pub fn find(&self, mut pred: impl FnMut(&str) -> bool) -> Vec<usize> {
        self.iter()
            .filter(|(_, p)| pred(p.name()))
            .map(|(i, _)| i)
            .collect()
    }
}

impl std::fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.capacity())
            .field("occupied", &self.iter().count())
            .field("clipboard", &self.has_clipboard())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiEvent;
    use crate::pattern::LoopPattern;

    fn pattern(name: &str) -> Box<dyn Pattern> {
        Box::new(LoopPattern::new(name, 192).with_note(0, 24, 0, 60, 100))
    }

    #[test]
    fn test_add_and_occupied() {
        let mut table = SlotTable::new(8);
        table.add(2, pattern("a")).unwrap();
        assert!(table.is_active(2));
        assert_eq!(table.add(2, pattern("b")), Err(EngineError::SlotOccupied(2)));
        assert_eq!(table.get(2).unwrap().name(), "a");
    }

    #[test]
    fn test_out_of_range() {
        let mut table = SlotTable::new(4);
        assert!(matches!(
            table.add(4, pattern("a")),
            Err(EngineError::OutOfRange { what: "slot", index: 4, limit: 4 })
        ));
        assert!(!table.is_active(100));
    }

    #[test]
    fn test_delete_empty() {
        let mut table = SlotTable::new(4);
        assert_eq!(table.delete(1).err(), Some(EngineError::SlotEmpty(1)));
    }

    #[test]
    fn test_copy_paste_independent() {
        let mut table = SlotTable::new(8);
        table.add(3, pattern("lead")).unwrap();
        table.copy(3).unwrap();
        table.paste(7).unwrap();
        assert_eq!(table.get(7).unwrap().name(), "lead");
        assert_eq!(table.get(7).unwrap().event_count(), 2);

        table.get_mut(7).unwrap().clear();
        assert_eq!(table.get(7).unwrap().event_count(), 0);
        assert_eq!(table.get(3).unwrap().event_count(), 2);
    }

    #[test]
    fn test_paste_rules() {
        let mut table = SlotTable::new(8);
        assert_eq!(table.paste(0), Err(EngineError::ClipboardEmpty));
        table.add(0, pattern("a")).unwrap();
        table.copy(0).unwrap();
        assert_eq!(table.paste(0), Err(EngineError::SlotOccupied(0)));
        // Clipboard survives repeated pastes
        table.paste(1).unwrap();
        table.paste(2).unwrap();
        assert!(table.has_clipboard());
    }

    #[test]
    fn test_cut_empties_slot_and_releases_notes() {
        let mut table = SlotTable::new(4);
        table.add(0, pattern("a")).unwrap();
        {
            let p = table.get_mut(0).unwrap();
            p.set_armed(true);
            p.render(10);
        }
        let offs = table.cut(0, 11).unwrap();
        assert!(!table.is_active(0));
        assert_eq!(offs.len(), 1);
        assert!(matches!(offs[0].event, MidiEvent::NoteOff { note: 60, .. }));
        table.paste(1).unwrap();
        assert!(!table.get(1).unwrap().is_armed());
    }

    #[test]
    fn test_move_slot() {
        let mut table = SlotTable::new(4);
        table.add(0, pattern("a")).unwrap();
        table.add(1, pattern("b")).unwrap();
        assert_eq!(table.move_slot(0, 1), Err(EngineError::SlotOccupied(1)));
        assert_eq!(table.move_slot(2, 3), Err(EngineError::SlotEmpty(2)));
        table.move_slot(0, 3).unwrap();
        assert!(!table.is_active(0));
        assert_eq!(table.get(3).unwrap().name(), "a");
    }

    #[test]
    fn test_dirty_flags_per_observer() {
        let mut table = SlotTable::new(4);
        table.add(0, pattern("a")).unwrap();
        assert!(table.is_dirty(0, Observer::Main));
        assert!(!table.is_dirty(0, Observer::Main));
        assert!(table.is_dirty(0, Observer::Names));
        table.mark_dirty(0);
        for observer in Observer::ALL {
            assert!(table.is_dirty(0, observer));
        }
        assert!(!table.is_dirty(1, Observer::Edit));
    }

    #[test]
    fn test_iter_ascending() {
        let mut table = SlotTable::new(8);
        table.add(5, pattern("e")).unwrap();
        table.add(1, pattern("b")).unwrap();
        let order: Vec<usize> = table.iter().map(|(i, _)| i).collect();
        assert_eq!(order, vec![1, 5]);
        assert_eq!(table.find(|n| n == "e"), vec![5]);
    }
}
