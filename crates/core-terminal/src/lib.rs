//! Terminal backend abstraction and crossterm implementation.
//!
//! The backend owns the raw-mode / alternate-screen lifecycle, the mouse
//! reporting modes, and bracketed paste. Restoration is guaranteed by an
//! RAII guard so a panic or early return never leaves the terminal wedged.

use anyhow::Result;
use crossterm::{
    cursor::{Hide, Show},
    event::{
        DisableBracketedPaste, DisableFocusChange, DisableMouseCapture, EnableBracketedPaste,
        EnableFocusChange, EnableMouseCapture, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{
        EnterAlternateScreen, LeaveAlternateScreen, SetTitle, disable_raw_mode, enable_raw_mode,
    },
};
use std::io::{Write, stdout};

pub mod capabilities;
pub use capabilities::TerminalCapabilities;

/// SGR pixel-position mouse reporting (mode 1016). Enabled on top of the
/// cell-mode capture crossterm negotiates; terminals that do not understand
/// the mode keep reporting cells.
const PIXEL_MOUSE_ENABLE: &str = "\x1b[?1016h";
const PIXEL_MOUSE_DISABLE: &str = "\x1b[?1016l";

#[derive(Debug, Clone, Copy, Default)]
pub struct BackendOptions {
    /// Request pixel-precision mouse reporting.
    pub pixel_mouse: bool,
    /// Push CSI-u keyboard enhancement for unambiguous modifier reporting.
    pub enhanced_keys: bool,
}

pub trait TerminalBackend {
    fn enter(&mut self) -> Result<()>;
    fn leave(&mut self) -> Result<()>;
    fn set_title(&mut self, title: &str) -> Result<()>;
}

pub struct CrosstermBackend {
    entered: bool,
    options: BackendOptions,
    pushed_enhancement: bool,
}

/// RAII guard ensuring terminal state restoration even if the caller
/// early-returns or panics.
pub struct TerminalGuard<'a> {
    backend: &'a mut CrosstermBackend,
    active: bool,
}

impl CrosstermBackend {
    pub fn new(options: BackendOptions) -> Self {
        Self {
            entered: false,
            options,
            pushed_enhancement: false,
        }
    }

    /// Enter and return a guard that will leave on drop.
    pub fn enter_guard(&mut self) -> Result<TerminalGuard<'_>> {
        self.enter()?;
        Ok(TerminalGuard {
            backend: self,
            active: true,
        })
    }

    /// Terminal geometry: cells plus pixel extent when the emulator reports
    /// it (zeros otherwise).
    pub fn extent() -> Result<(u16, u16, u32, u32)> {
        match crossterm::terminal::window_size() {
            Ok(ws) => Ok((ws.columns, ws.rows, ws.width as u32, ws.height as u32)),
            Err(_) => {
                let (cols, rows) = crossterm::terminal::size()?;
                Ok((cols, rows, 0, 0))
            }
        }
    }
}

impl TerminalBackend for CrosstermBackend {
    fn enter(&mut self) -> Result<()> {
        if self.entered {
            return Ok(());
        }
        enable_raw_mode()?;
        execute!(
            stdout(),
            EnterAlternateScreen,
            Hide,
            EnableMouseCapture,
            EnableBracketedPaste,
            EnableFocusChange,
        )?;
        if self.options.pixel_mouse {
            let mut out = stdout();
            out.write_all(PIXEL_MOUSE_ENABLE.as_bytes())?;
            out.flush()?;
        }
        if self.options.enhanced_keys {
            // Best effort: not every emulator implements the protocol.
            match execute!(
                stdout(),
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                )
            ) {
                Ok(()) => self.pushed_enhancement = true,
                Err(e) => {
                    tracing::debug!(target: "terminal", error = %e, "keyboard enhancement rejected")
                }
            }
        }
        self.entered = true;
        Ok(())
    }

    fn leave(&mut self) -> Result<()> {
        if !self.entered {
            return Ok(());
        }
        if self.pushed_enhancement {
            let _ = execute!(stdout(), PopKeyboardEnhancementFlags);
            self.pushed_enhancement = false;
        }
        if self.options.pixel_mouse {
            let mut out = stdout();
            let _ = out.write_all(PIXEL_MOUSE_DISABLE.as_bytes());
            let _ = out.flush();
        }
        execute!(
            stdout(),
            DisableFocusChange,
            DisableBracketedPaste,
            DisableMouseCapture,
            Show,
            LeaveAlternateScreen,
        )?;
        disable_raw_mode()?;
        self.entered = false;
        Ok(())
    }

    fn set_title(&mut self, title: &str) -> Result<()> {
        execute!(stdout(), SetTitle(title))?;
        Ok(())
    }
}

impl Drop for CrosstermBackend {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}

impl<'a> Drop for TerminalGuard<'a> {
    fn drop(&mut self) {
        if self.active {
            let _ = self.backend.leave();
        }
    }
}
