use core_events::{BaseKey, ModMask, MouseButton, MouseInput, MouseKind, NamedKey, NormalizedKey};
use crossterm::event::{
    KeyCode as CKeyCode, KeyEvent as CKeyEvent, KeyEventKind as CKeyEventKind,
    KeyModifiers as CKeyModifiers, MouseButton as CMouseButton, MouseEvent as CMouseEvent,
    MouseEventKind as CMouseEventKind,
};

/// Map a crossterm key event into the normalized model.
///
/// Returns `None` for release events and for key codes with no logical
/// mapping (media keys, lock keys).
pub fn map_key_event(event: &CKeyEvent) -> Option<NormalizedKey> {
    if !matches!(event.kind, CKeyEventKind::Press | CKeyEventKind::Repeat) {
        return None;
    }
    let mut mods = map_mod_mask(event.modifiers);
    let base = match event.code {
        CKeyCode::Char(c) => BaseKey::Char(c),
        CKeyCode::Enter => BaseKey::Named(NamedKey::Enter),
        CKeyCode::Esc => BaseKey::Named(NamedKey::Escape),
        CKeyCode::Backspace => BaseKey::Named(NamedKey::Backspace),
        CKeyCode::Tab => BaseKey::Named(NamedKey::Tab),
        CKeyCode::BackTab => {
            mods |= ModMask::SHIFT;
            BaseKey::Named(NamedKey::Tab)
        }
        CKeyCode::Delete => BaseKey::Named(NamedKey::Delete),
        CKeyCode::Left => BaseKey::Named(NamedKey::Left),
        CKeyCode::Right => BaseKey::Named(NamedKey::Right),
        CKeyCode::Up => BaseKey::Named(NamedKey::Up),
        CKeyCode::Down => BaseKey::Named(NamedKey::Down),
        CKeyCode::Home => BaseKey::Named(NamedKey::Home),
        CKeyCode::End => BaseKey::Named(NamedKey::End),
        CKeyCode::PageUp => BaseKey::Named(NamedKey::PageUp),
        CKeyCode::PageDown => BaseKey::Named(NamedKey::PageDown),
        CKeyCode::Insert => BaseKey::Named(NamedKey::Insert),
        CKeyCode::F(n) => BaseKey::Named(NamedKey::F(n)),
        CKeyCode::Null
        | CKeyCode::CapsLock
        | CKeyCode::ScrollLock
        | CKeyCode::NumLock
        | CKeyCode::PrintScreen
        | CKeyCode::Pause
        | CKeyCode::Menu
        | CKeyCode::KeypadBegin
        | CKeyCode::Media(_)
        | CKeyCode::Modifier(_) => return None,
    };
    Some(NormalizedKey::new(base, mods))
}

/// Convert crossterm modifier flags into the wire-layout mask.
pub fn map_mod_mask(mods: CKeyModifiers) -> ModMask {
    let mut out = ModMask::empty();
    if mods.contains(CKeyModifiers::ALT) {
        out |= ModMask::ALT;
    }
    if mods.contains(CKeyModifiers::CONTROL) {
        out |= ModMask::CTRL;
    }
    if mods.contains(CKeyModifiers::SUPER) || mods.contains(CKeyModifiers::META) {
        out |= ModMask::META;
    }
    if mods.contains(CKeyModifiers::SHIFT) {
        out |= ModMask::SHIFT;
    }
    out
}

/// Map a crossterm mouse event. Coordinates pass through untouched: they are
/// cells under SGR-1006 and pixels under SGR-1016; the coordinate mapper
/// resolves them against the negotiated reporting mode.
pub fn map_mouse_event(event: &CMouseEvent) -> Option<MouseInput> {
    let (kind, button, wheel_x, wheel_y) = match event.kind {
        CMouseEventKind::Down(b) => (MouseKind::Press, map_button(b), 0, 0),
        CMouseEventKind::Up(b) => (MouseKind::Release, map_button(b), 0, 0),
        CMouseEventKind::Drag(b) => (MouseKind::Drag, map_button(b), 0, 0),
        CMouseEventKind::Moved => (MouseKind::Move, MouseButton::None, 0, 0),
        CMouseEventKind::ScrollDown => (MouseKind::Wheel, MouseButton::None, 0, 1),
        CMouseEventKind::ScrollUp => (MouseKind::Wheel, MouseButton::None, 0, -1),
        CMouseEventKind::ScrollLeft => (MouseKind::Wheel, MouseButton::None, -1, 0),
        CMouseEventKind::ScrollRight => (MouseKind::Wheel, MouseButton::None, 1, 0),
    };
    Some(MouseInput {
        kind,
        button,
        x: event.column as u32,
        y: event.row as u32,
        wheel_x,
        wheel_y,
        mods: map_mod_mask(event.modifiers),
    })
}

fn map_button(b: CMouseButton) -> MouseButton {
    match b {
        CMouseButton::Left => MouseButton::Left,
        CMouseButton::Middle => MouseButton::Middle,
        CMouseButton::Right => MouseButton::Right,
    }
}

/// Wire key identifiers for named keys, as expected by the browser's
/// key-event dispatch (`key` / `code` fields).
pub fn named_key_wire(name: NamedKey) -> (&'static str, &'static str) {
    match name {
        NamedKey::Escape => ("Escape", "Escape"),
        NamedKey::Enter => ("Enter", "Enter"),
        NamedKey::Backspace => ("Backspace", "Backspace"),
        NamedKey::Tab => ("Tab", "Tab"),
        NamedKey::Delete => ("Delete", "Delete"),
        NamedKey::Left => ("ArrowLeft", "ArrowLeft"),
        NamedKey::Right => ("ArrowRight", "ArrowRight"),
        NamedKey::Up => ("ArrowUp", "ArrowUp"),
        NamedKey::Down => ("ArrowDown", "ArrowDown"),
        NamedKey::Home => ("Home", "Home"),
        NamedKey::End => ("End", "End"),
        NamedKey::PageUp => ("PageUp", "PageUp"),
        NamedKey::PageDown => ("PageDown", "PageDown"),
        NamedKey::Insert => ("Insert", "Insert"),
        NamedKey::F(1) => ("F1", "F1"),
        NamedKey::F(2) => ("F2", "F2"),
        NamedKey::F(3) => ("F3", "F3"),
        NamedKey::F(4) => ("F4", "F4"),
        NamedKey::F(5) => ("F5", "F5"),
        NamedKey::F(6) => ("F6", "F6"),
        NamedKey::F(7) => ("F7", "F7"),
        NamedKey::F(8) => ("F8", "F8"),
        NamedKey::F(9) => ("F9", "F9"),
        NamedKey::F(10) => ("F10", "F10"),
        NamedKey::F(11) => ("F11", "F11"),
        NamedKey::F(12) => ("F12", "F12"),
        NamedKey::F(_) => ("Unidentified", "Unidentified"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState as CKeyEventState;

    fn key(code: CKeyCode, modifiers: CKeyModifiers) -> CKeyEvent {
        CKeyEvent {
            code,
            modifiers,
            kind: CKeyEventKind::Press,
            state: CKeyEventState::empty(),
        }
    }

    #[test]
    fn maps_plain_char() {
        let n = map_key_event(&key(CKeyCode::Char('a'), CKeyModifiers::NONE)).expect("mapped");
        assert_eq!(n.base, BaseKey::Char('a'));
        assert!(n.mods.is_empty());
        assert!(!n.shortcut_mod);
    }

    #[test]
    fn release_events_are_dropped() {
        let ev = CKeyEvent {
            code: CKeyCode::Char('a'),
            modifiers: CKeyModifiers::NONE,
            kind: CKeyEventKind::Release,
            state: CKeyEventState::empty(),
        };
        assert!(map_key_event(&ev).is_none());
    }

    #[test]
    fn backtab_normalizes_to_shift_tab() {
        let n = map_key_event(&key(CKeyCode::BackTab, CKeyModifiers::NONE)).expect("mapped");
        assert_eq!(n.base, BaseKey::Named(NamedKey::Tab));
        assert!(n.mods.contains(ModMask::SHIFT));
    }

    #[test]
    fn ctrl_shift_chord_carries_both_flags() {
        let n = map_key_event(&key(
            CKeyCode::Char('p'),
            CKeyModifiers::CONTROL | CKeyModifiers::SHIFT,
        ))
        .expect("mapped");
        assert_eq!(n.base, BaseKey::Char('p'));
        assert_eq!(n.mods, ModMask::CTRL | ModMask::SHIFT);
        assert_eq!(n.wire_modifiers(), 10);
    }

    #[test]
    fn scroll_maps_to_wheel_steps() {
        let ev = CMouseEvent {
            kind: CMouseEventKind::ScrollDown,
            column: 40,
            row: 12,
            modifiers: CKeyModifiers::NONE,
        };
        let m = map_mouse_event(&ev).expect("mapped");
        assert_eq!(m.kind, MouseKind::Wheel);
        assert_eq!((m.wheel_x, m.wheel_y), (0, 1));
        assert_eq!((m.x, m.y), (40, 12));
    }

    #[test]
    fn unmappable_keys_return_none() {
        assert!(map_key_event(&key(CKeyCode::CapsLock, CKeyModifiers::NONE)).is_none());
    }
}
