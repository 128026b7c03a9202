//! Screen sets: banks of slots shown and triggered together.
//!
//! Screen set `n` owns the contiguous slot range
//! `n * per_bank .. (n + 1) * per_bank` where `per_bank = rows * columns`.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Grid shape and bank count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridLayout {
    pub rows: usize,
    pub columns: usize,
    pub screen_sets: usize,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            rows: 4,
            columns: 8,
            screen_sets: 32,
        }
    }
}

impl GridLayout {
    /// Slots per screen set.
    pub fn per_bank(&self) -> usize {
        self.rows * self.columns
    }

    /// Total slot capacity.
    pub fn capacity(&self) -> usize {
        self.per_bank() * self.screen_sets
    }

    /// Position within a bank for a grid cell (column-major, like the grid view).
    pub fn cell_offset(&self, column: usize, row: usize) -> Result<usize> {
        if column >= self.columns {
            return Err(EngineError::OutOfRange {
                what: "column",
                index: column as i64,
                limit: self.columns,
            });
        }
        if row >= self.rows {
            return Err(EngineError::OutOfRange {
                what: "row",
                index: row as i64,
                limit: self.rows,
            });
        }
        Ok(column * self.rows + row)
    }
}

/// The active screen set and per-set notepad text.
#[derive(Debug, Clone)]
pub struct ScreenSets {
    layout: GridLayout,
    active: usize,
    notepads: Vec<String>,
}

impl ScreenSets {
    pub fn new(layout: GridLayout) -> Self {
        let layout = GridLayout {
            rows: layout.rows.max(1),
            columns: layout.columns.max(1),
            screen_sets: layout.screen_sets.max(1),
        };
        Self {
            layout,
            active: 0,
            notepads: vec![String::new(); layout.screen_sets],
        }
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn count(&self) -> usize {
        self.layout.screen_sets
    }

    pub fn per_bank(&self) -> usize {
        self.layout.per_bank()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Make `index` the active screen set.
    pub fn set_active(&mut self, index: i64) -> Result<usize> {
        let count = self.count();
        if index < 0 || index as usize >= count {
            return Err(EngineError::screen_set_range(index, count));
        }
        self.active = index as usize;
        Ok(self.active)
    }

    /// Step the active set by `delta`, wrapping at both ends.
    pub fn shift(&mut self, delta: i64) -> usize {
        let count = self.count() as i64;
        self.active = (self.active as i64 + delta).rem_euclid(count) as usize;
        self.active
    }

    /// First slot of a screen set.
    pub fn offset(&self, index: usize) -> usize {
        index * self.per_bank()
    }

    /// Slot range of a screen set.
    pub fn range(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.offset(index);
        start..start + self.per_bank()
    }

    /// Screen set a slot belongs to.
    pub fn bank_of(&self, slot: usize) -> usize {
        slot / self.per_bank()
    }

    /// Absolute slot for a position relative to the active set.
    pub fn resolve(&self, relative: i64) -> Result<usize> {
        let per_bank = self.per_bank();
        if relative < 0 || relative as usize >= per_bank {
            return Err(EngineError::OutOfRange {
                what: "slot",
                index: relative,
                limit: per_bank,
            });
        }
        Ok(self.offset(self.active) + relative as usize)
    }

    pub fn notepad(&self, index: usize) -> Option<&str> {
        self.notepads.get(index).map(String::as_str)
    }

    pub fn set_notepad(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        let count = self.count();
        match self.notepads.get_mut(index) {
            Some(note) => {
                *note = text.into();
                Ok(())
            }
            None => Err(EngineError::screen_set_range(index as i64, count)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sets() -> ScreenSets {
        ScreenSets::new(GridLayout::default())
    }

    #[test]
    fn test_layout() {
        let layout = GridLayout::default();
        assert_eq!(layout.per_bank(), 32);
        assert_eq!(layout.capacity(), 1024);
        assert_eq!(layout.cell_offset(2, 1).unwrap(), 9);
        assert!(layout.cell_offset(8, 0).is_err());
        assert!(layout.cell_offset(0, 4).is_err());
    }

    #[test]
    fn test_set_active_range() {
        let mut s = sets();
        assert_eq!(s.set_active(2).unwrap(), 2);
        assert_eq!(s.offset(s.active()), 64);
        assert_eq!(s.set_active(32), Err(EngineError::screen_set_range(32, 32)));
        assert_eq!(s.set_active(-1), Err(EngineError::screen_set_range(-1, 32)));
        assert_eq!(s.active(), 2);
    }

    #[test]
    fn test_shift_wraps() {
        let mut s = sets();
        assert_eq!(s.shift(-1), 31);
        assert_eq!(s.shift(1), 0);
        assert_eq!(s.shift(33), 1);
    }

    #[test]
    fn test_resolve_relative() {
        let mut s = sets();
        s.set_active(1).unwrap();
        assert_eq!(s.resolve(5).unwrap(), 37);
        assert!(s.resolve(32).is_err());
        assert_eq!(s.bank_of(37), 1);
        assert_eq!(s.range(1), 32..64);
    }

    #[test]
    fn test_notepad() {
        let mut s = sets();
        s.set_notepad(3, "verse").unwrap();
        assert_eq!(s.notepad(3), Some("verse"));
        assert!(s.set_notepad(99, "x").is_err());
    }
}
