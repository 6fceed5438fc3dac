//! Terminal capability probing.
//!
//! Detection runs once at startup from environment identification; there is
//! no escape-sequence round trip. `TERM`, `TERM_PROGRAM`, and `COLORTERM`
//! are the identification sources the doctor command also reports.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct TerminalCapabilities {
    /// In-band bitmap image protocol (kitty graphics).
    pub supports_images: bool,
    /// 24-bit color escape sequences.
    pub supports_truecolor: bool,
    /// SGR-1016 pixel-position mouse reporting.
    pub supports_pixel_mouse: bool,
    /// The emulator runs on this host, so a shared-memory file reference in
    /// the image protocol can resolve.
    pub same_host: bool,
}

impl TerminalCapabilities {
    pub fn detect() -> Self {
        Self::from_env(
            std::env::var("TERM").ok().as_deref(),
            std::env::var("TERM_PROGRAM").ok().as_deref(),
            std::env::var("COLORTERM").ok().as_deref(),
            std::env::var("SSH_CONNECTION").is_ok(),
            std::env::var("KITTY_WINDOW_ID").is_ok(),
        )
    }

    fn from_env(
        term: Option<&str>,
        term_program: Option<&str>,
        colorterm: Option<&str>,
        over_ssh: bool,
        kitty_window: bool,
    ) -> Self {
        let term = term.unwrap_or("");
        let program = term_program.unwrap_or("");
        let graphics_emulator = kitty_window
            || term.contains("kitty")
            || term.contains("ghostty")
            || matches!(program, "WezTerm" | "ghostty" | "kitty");
        let truecolor = colorterm
            .map(|v| v.contains("truecolor") || v.contains("24bit"))
            .unwrap_or(false)
            || graphics_emulator;
        Self {
            supports_images: graphics_emulator,
            supports_truecolor: truecolor,
            // The emulators that implement the graphics protocol all
            // implement pixel mouse reporting as well.
            supports_pixel_mouse: graphics_emulator,
            same_host: !over_ssh,
        }
    }
}
