//! Terminal key control.
//!
//! Reads key events from the terminal with crossterm, translates them to
//! keysyms and runs them through the engine's key tables. Terminals that
//! report key releases and bare modifier presses (the kitty keyboard
//! protocol) get the full modifier behavior; elsewhere a Ctrl-held slot
//! key is treated as a replace (solo) press.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{
    self, Event, KeyCode as TermKey, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    ModifierKeyCode, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use seqdeck_core::keys::keysym;
use seqdeck_core::{Command, EngineHandle, KeyBindings, KeyCode, KeyState};

const POLL: Duration = Duration::from_millis(50);

/// Map a terminal key to its keysym.
pub fn to_keysym(key: TermKey) -> Option<KeyCode> {
    let code = match key {
        TermKey::Char(c) => c as KeyCode,
        TermKey::Esc => keysym::ESCAPE,
        TermKey::Enter => keysym::RETURN,
        TermKey::Tab => keysym::TAB,
        TermKey::Backspace => keysym::BACKSPACE,
        TermKey::Home => keysym::HOME,
        TermKey::End => keysym::END,
        TermKey::Insert => keysym::INSERT,
        TermKey::Delete => keysym::DELETE,
        TermKey::Left => keysym::LEFT,
        TermKey::Right => keysym::RIGHT,
        TermKey::Up => keysym::UP,
        TermKey::Down => keysym::DOWN,
        TermKey::PageUp => keysym::PAGE_UP,
        TermKey::PageDown => keysym::PAGE_DOWN,
        TermKey::F(n @ 1..=12) => keysym::F1 + n as KeyCode - 1,
        TermKey::Modifier(m) => match m {
            ModifierKeyCode::LeftControl => keysym::CTRL_L,
            ModifierKeyCode::RightControl => keysym::CTRL_R,
            ModifierKeyCode::LeftAlt => keysym::ALT_L,
            ModifierKeyCode::RightAlt => keysym::ALT_R,
            ModifierKeyCode::LeftShift => keysym::SHIFT_L,
            ModifierKeyCode::RightShift => keysym::SHIFT_R,
            _ => return None,
        },
        _ => return None,
    };
    Some(code)
}

/// The keyboard control surface.
pub struct KeyboardSurface {
    bindings: KeyBindings,
    state: KeyState,
    engine: EngineHandle,
    /// Whether the terminal reports releases and bare modifiers.
    enhanced: bool,
}

impl KeyboardSurface {
    pub fn new(bindings: KeyBindings, engine: EngineHandle) -> Self {
        Self {
            bindings,
            state: KeyState::new(),
            engine,
            enhanced: false,
        }
    }

    /// Feed one key event. Returns `false` when the user asked to quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl && key.code == TermKey::Char('c') {
            return false;
        }
        let Some(code) = to_keysym(key.code) else {
            return true;
        };

        match key.kind {
            KeyEventKind::Press if ctrl && !self.enhanced => {
                // No modifier events from this terminal: emulate the hold.
                self.press(keysym::CTRL_L);
                self.press(code);
                self.release(keysym::CTRL_L);
            }
            KeyEventKind::Press => self.press(code),
            KeyEventKind::Release => self.release(code),
            KeyEventKind::Repeat => {}
        }
        true
    }

    fn press(&mut self, code: KeyCode) {
        if let Some(cmd) = self.state.press(&self.bindings, code) {
            self.apply(cmd);
        }
    }

    fn release(&mut self, code: KeyCode) {
        if let Some(cmd) = self.state.release(&self.bindings, code) {
            self.apply(cmd);
        }
    }

    fn apply(&self, cmd: Command) {
        log::debug!("[KEYS] {}", cmd);
        // Rejections are logged and published by dispatch.
        let _ = self.engine.dispatch(&cmd);
    }

    /// Read the terminal until quit or `shutdown` is set.
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        self.enhanced = supports_keyboard_enhancement().unwrap_or(false);
        if self.enhanced {
            execute!(
                stdout,
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                        | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
                )
            )?;
        }
        log::info!("[KEYS] Keyboard control active (Ctrl+C to quit)");

        let result = self.event_loop(shutdown);

        if self.enhanced {
            let _ = execute!(stdout, PopKeyboardEnhancementFlags);
        }
        disable_raw_mode()?;
        result
    }

    fn event_loop(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            if !event::poll(POLL)? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if !self.handle_key(key) {
                    shutdown.store(true, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqdeck_core::{Engine, EngineConfig, LogBus, LoopPattern};
    use std::sync::Arc;

    fn surface() -> (Engine, KeyboardSurface) {
        let engine = Engine::new(&EngineConfig::default(), Arc::new(LogBus));
        let surface = KeyboardSurface::new(KeyBindings::defaults(), engine.handle().clone());
        (engine, surface)
    }

    fn armed(engine: &Engine, slot: usize) -> bool {
        engine.handle().with_pattern(slot, |p| p.is_armed()).unwrap()
    }

    #[test]
    fn test_keysym_mapping() {
        assert_eq!(to_keysym(TermKey::Char('q')), Some('q' as KeyCode));
        assert_eq!(to_keysym(TermKey::Esc), Some(keysym::ESCAPE));
        assert_eq!(to_keysym(TermKey::F(3)), Some(keysym::F1 + 2));
        assert_eq!(to_keysym(TermKey::F(13)), None);
        assert_eq!(
            to_keysym(TermKey::Modifier(ModifierKeyCode::RightControl)),
            Some(keysym::CTRL_R)
        );
    }

    #[test]
    fn test_slot_key_toggles() {
        let (engine, mut surface) = surface();
        engine.handle().add(1, Box::new(LoopPattern::new("q", 768))).unwrap();

        assert!(surface.handle_key(KeyEvent::new(TermKey::Char('q'), KeyModifiers::NONE)));
        assert!(armed(&engine, 1));
        surface.handle_key(KeyEvent::new(TermKey::Char('q'), KeyModifiers::NONE));
        assert!(!armed(&engine, 1));
    }

    #[test]
    fn test_ctrl_key_solos_without_enhancement() {
        let (engine, mut surface) = surface();
        let h = engine.handle();
        h.add(0, Box::new(LoopPattern::new("a", 768))).unwrap();
        h.add(1, Box::new(LoopPattern::new("b", 768))).unwrap();
        h.set_armed(0, true).unwrap();

        surface.handle_key(KeyEvent::new(TermKey::Char('q'), KeyModifiers::CONTROL));
        assert!(!armed(&engine, 0));
        assert!(armed(&engine, 1));
    }

    #[test]
    fn test_quit_keys() {
        let (_engine, mut surface) = surface();
        assert!(!surface.handle_key(KeyEvent::new(TermKey::Char('c'), KeyModifiers::CONTROL)));
        assert!(surface.handle_key(KeyEvent::new(TermKey::Null, KeyModifiers::NONE)));
    }
}
