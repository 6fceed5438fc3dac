//! Navigation state and address normalization.

use std::time::{Duration, Instant};

use core_chrome::HistoryState;

/// The load event is authoritative; the deadline is a defensive upper bound
/// so a missed event cannot wedge the stop/reload toolbar state.
pub const LOAD_DEADLINE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Default)]
pub struct NavState {
    pub can_go_back: bool,
    pub can_go_forward: bool,
    pub is_loading: bool,
    loading_started_at: Option<Instant>,
}

impl NavState {
    pub fn begin_loading(&mut self) {
        self.is_loading = true;
        self.loading_started_at = Some(Instant::now());
    }

    pub fn finish_loading(&mut self) {
        self.is_loading = false;
        self.loading_started_at = None;
    }

    /// Clear a stuck loading flag once the deadline passes. Returns true
    /// when the state changed.
    pub fn check_deadline(&mut self, now: Instant) -> bool {
        if !self.is_loading {
            return false;
        }
        let expired = self
            .loading_started_at
            .is_some_and(|start| now.duration_since(start) >= LOAD_DEADLINE);
        if expired {
            self.finish_loading();
        }
        expired
    }

    pub fn apply_history(&mut self, history: HistoryState) -> bool {
        let changed =
            self.can_go_back != history.can_go_back || self.can_go_forward != history.can_go_forward;
        self.can_go_back = history.can_go_back;
        self.can_go_forward = history.can_go_forward;
        changed
    }
}

/// URLs that show the shortcut-legend placeholder instead of a screencast.
pub fn is_blank_url(url: &str) -> bool {
    url.is_empty() || url == "about:blank" || url == "about:newtab"
}

/// Turn address-bar input into a navigable URL: keep schemed input, add
/// `https://` to host-shaped input, send everything else to a search URL.
pub fn normalize_address(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "about:blank".to_string();
    }
    if let Ok(parsed) = url::Url::parse(trimmed) {
        // `Url::parse` accepts things like "example.com:8080" by treating
        // the host as a scheme; require a known scheme.
        if matches!(parsed.scheme(), "http" | "https" | "file" | "about" | "data") {
            return trimmed.to_string();
        }
    }
    let host_like = !trimmed.contains(char::is_whitespace)
        && (trimmed.contains('.') || trimmed.starts_with("localhost"));
    if host_like {
        return format!("https://{trimmed}");
    }
    let encoded: String = url::form_urlencoded::byte_serialize(trimmed.as_bytes()).collect();
    format!("https://duckduckgo.com/?q={encoded}")
}
