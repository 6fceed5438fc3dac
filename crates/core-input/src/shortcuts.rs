//! App shortcut table: `shortcut_mod` chords intercepted ahead of the
//! browser. Resolution is pure and deterministic; re-registering a chord
//! replaces the previous mapping.

use std::collections::HashMap;

use core_events::{BaseKey, ModMask, NamedKey, NormalizedKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Quit,
    FocusAddressBar,
    Reload,
    Back,
    Forward,
    Stop,
    TabPicker,
    NewTab,
    CloseTab,
    Copy,
    Cut,
    Paste,
    SelectAll,
    EnterHintMode,
    ScrollDown,
    ScrollUp,
    DevConsole,
}

impl Action {
    /// `Quit` must work even when every other shortcut is disabled.
    pub fn always_enabled(&self) -> bool {
        matches!(self, Action::Quit)
    }
}

/// Chord key: base key with the char lowercased plus the shift flag. All
/// entries implicitly require the platform shortcut modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Chord {
    base: BaseKey,
    shift: bool,
}

#[derive(Debug, Clone)]
pub struct ShortcutTable {
    map: HashMap<Chord, Action>,
}

impl Default for ShortcutTable {
    fn default() -> Self {
        let mut t = Self {
            map: HashMap::new(),
        };
        t.bind_char('q', false, Action::Quit);
        t.bind_char('l', false, Action::FocusAddressBar);
        t.bind_char('r', false, Action::Reload);
        t.bind_char('[', false, Action::Back);
        t.bind_char(']', false, Action::Forward);
        t.bind_char('.', false, Action::Stop);
        t.bind_char('t', false, Action::TabPicker);
        t.bind_char('n', false, Action::NewTab);
        t.bind_char('w', false, Action::CloseTab);
        t.bind_char('c', false, Action::Copy);
        t.bind_char('x', false, Action::Cut);
        t.bind_char('v', false, Action::Paste);
        t.bind_char('a', false, Action::SelectAll);
        t.bind_char('h', false, Action::EnterHintMode);
        t.bind_char('j', false, Action::ScrollDown);
        t.bind_char('k', false, Action::ScrollUp);
        t.bind_named(NamedKey::F(12), false, Action::DevConsole);
        t
    }
}

impl ShortcutTable {
    pub fn bind_char(&mut self, c: char, shift: bool, action: Action) {
        self.map.insert(
            Chord {
                base: BaseKey::Char(c.to_ascii_lowercase()),
                shift,
            },
            action,
        );
    }

    pub fn bind_named(&mut self, key: NamedKey, shift: bool, action: Action) {
        self.map.insert(
            Chord {
                base: BaseKey::Named(key),
                shift,
            },
            action,
        );
    }

    /// Resolve a normalized keystroke against the table. Only chords carrying
    /// the platform shortcut modifier are considered.
    pub fn lookup(&self, key: &NormalizedKey) -> Option<Action> {
        if !key.shortcut_mod {
            return None;
        }
        let base = match key.base {
            BaseKey::Char(c) => BaseKey::Char(c.to_ascii_lowercase()),
            named => named,
        };
        let chord = Chord {
            base,
            shift: key.mods.contains(ModMask::SHIFT),
        };
        let action = self.map.get(&chord).copied();
        if let Some(a) = action {
            tracing::trace!(target: "input.shortcut", ?a, "chord matched");
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(c: char, extra: ModMask) -> NormalizedKey {
        NormalizedKey::new(BaseKey::Char(c), ModMask::shortcut_mod() | extra)
    }

    #[test]
    fn default_table_matches_core_chords() {
        let t = ShortcutTable::default();
        assert_eq!(t.lookup(&chord('q', ModMask::empty())), Some(Action::Quit));
        assert_eq!(
            t.lookup(&chord('l', ModMask::empty())),
            Some(Action::FocusAddressBar)
        );
        assert_eq!(t.lookup(&chord('[', ModMask::empty())), Some(Action::Back));
        assert_eq!(t.lookup(&chord(']', ModMask::empty())), Some(Action::Forward));
        assert_eq!(t.lookup(&chord('.', ModMask::empty())), Some(Action::Stop));
        assert_eq!(
            t.lookup(&chord('j', ModMask::empty())),
            Some(Action::ScrollDown)
        );
        let f12 = NormalizedKey::new(BaseKey::Named(NamedKey::F(12)), ModMask::shortcut_mod());
        assert_eq!(t.lookup(&f12), Some(Action::DevConsole));
    }

    #[test]
    fn chords_without_shortcut_mod_fall_through() {
        let t = ShortcutTable::default();
        let plain = NormalizedKey::new(BaseKey::Char('q'), ModMask::empty());
        assert_eq!(t.lookup(&plain), None);
        let alt = NormalizedKey::new(BaseKey::Char('q'), ModMask::ALT);
        assert_eq!(t.lookup(&alt), None);
    }

    #[test]
    fn uppercase_char_resolves_case_insensitively() {
        let t = ShortcutTable::default();
        // Terminals report shift+r as 'R' with the shift flag; a bare
        // capital (caps lock) still resolves the unshifted chord.
        let caps = NormalizedKey::new(BaseKey::Char('R'), ModMask::shortcut_mod());
        assert_eq!(t.lookup(&caps), Some(Action::Reload));
    }

    #[test]
    fn rebinding_is_deterministic() {
        let mut t = ShortcutTable::default();
        t.bind_char('z', false, Action::Reload);
        t.bind_char('z', false, Action::Reload);
        assert_eq!(t.lookup(&chord('z', ModMask::empty())), Some(Action::Reload));
        t.bind_char('z', false, Action::Stop);
        assert_eq!(t.lookup(&chord('z', ModMask::empty())), Some(Action::Stop));
    }

    #[test]
    fn shifted_chord_is_distinct() {
        let mut t = ShortcutTable::default();
        t.bind_char('p', true, Action::DevConsole);
        assert_eq!(t.lookup(&chord('p', ModMask::empty())), None);
        assert_eq!(
            t.lookup(&chord('p', ModMask::SHIFT)),
            Some(Action::DevConsole)
        );
    }
}
