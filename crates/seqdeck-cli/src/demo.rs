//! A small demo set so the engine has something to play without an editor.

use anyhow::{Context, Result};
use seqdeck_core::{EngineHandle, LoopPattern, Pattern};

const DRUMS: u8 = 9;

/// Seed screen set 0 with drums, bass and a pad; kick and hats start armed.
pub fn seed(engine: &EngineHandle) -> Result<()> {
    let q = engine.ppqn() as i64;
    let bar = 4 * q;

    let mut kick = LoopPattern::new("kick", bar);
    for beat in 0..4 {
        kick = kick.with_note(beat * q, q / 4, DRUMS, 36, 110);
    }

    let mut hats = LoopPattern::new("hats", bar);
    for eighth in 0..8 {
        let velocity = if eighth % 2 == 0 { 90 } else { 60 };
        hats = hats.with_note(eighth * q / 2, q / 8, DRUMS, 42, velocity);
    }

    let snare = LoopPattern::new("snare", bar)
        .with_note(q, q / 4, DRUMS, 38, 100)
        .with_note(3 * q, q / 4, DRUMS, 38, 100);

    let mut bass = LoopPattern::new("bass", 2 * bar);
    for (i, note) in [36u8, 36, 43, 41, 36, 36, 39, 41].into_iter().enumerate() {
        bass = bass.with_note(i as i64 * q, q * 3 / 4, 0, note, 100);
    }

    let pad = LoopPattern::new("pad", 2 * bar)
        .with_note(0, bar, 1, 60, 70)
        .with_note(0, bar, 1, 63, 70)
        .with_note(0, bar, 1, 67, 70)
        .with_note(bar, bar, 1, 58, 70)
        .with_note(bar, bar, 1, 62, 70)
        .with_note(bar, bar, 1, 65, 70);

    // Column-major: slot 0, 1, 2 share column 0; 4 and 8 start columns 1 and 2.
    let seeds: [(usize, LoopPattern, bool); 5] = [
        (0, kick, true),
        (1, snare, false),
        (2, hats, true),
        (4, bass, false),
        (8, pad, false),
    ];
    for (slot, pattern, armed) in seeds {
        let name = pattern.name().to_string();
        engine
            .add(slot, Box::new(pattern))
            .with_context(|| format!("Failed to seed '{name}' into slot {slot}"))?;
        engine.set_armed(slot, armed)?;
    }
    engine.set_notepad(0, "demo")?;
    engine.with_context(|c| c.set_modified(false));

    log::info!("[ENGINE] Demo set loaded into screen set 0");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqdeck_core::{Engine, EngineConfig, LogBus};
    use std::sync::Arc;

    #[test]
    fn test_seed() {
        let engine = Engine::new(&EngineConfig::default(), Arc::new(LogBus));
        let handle = engine.handle();
        seed(handle).unwrap();

        let report = handle.status(false);
        let names: Vec<&str> = report.slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["kick", "snare", "hats", "bass", "pad"]);
        assert_eq!(report.slots.iter().filter(|s| s.armed).count(), 2);
        assert_eq!(report.notepad, "demo");
        assert!(!handle.with_context(|c| c.is_modified()));

        // Seeding twice collides with the occupied slots.
        assert!(seed(handle).is_err());
    }
}
