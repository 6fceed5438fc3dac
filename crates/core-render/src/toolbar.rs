//! Toolbar row composition.
//!
//! A two-stage pipeline: `compose_toolbar` produces ordered segments,
//! `format_toolbar` renders them into one styled line padded to the
//! terminal width. Splitting the stages keeps truncation and styling
//! testable without a terminal.

use unicode_width::UnicodeWidthStr;

/// Prompt editing state shown inside the URL field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptView<'a> {
    pub text: &'a str,
    /// Char index of the caret.
    pub cursor: usize,
    /// Inclusive-exclusive char range of the selection.
    pub selection: Option<(usize, usize)>,
}

/// Everything the toolbar needs to render one state.
#[derive(Debug, Clone, Copy)]
pub struct ToolbarContext<'a> {
    pub url: &'a str,
    pub prompt: Option<PromptView<'a>>,
    pub is_loading: bool,
    pub can_go_back: bool,
    pub can_go_forward: bool,
    pub tab_index: usize,
    pub tab_count: usize,
    /// Transient note (download progress), replaces the tab indicator.
    pub note: Option<&'a str>,
    /// Tab picker entries; when present they replace the URL field.
    pub picker: Option<&'a [String]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolbarSegment<'a> {
    Back { enabled: bool },
    Forward { enabled: bool },
    /// Reload normally, stop while loading.
    LoadControl { is_loading: bool },
    Url(&'a str),
    Prompt(PromptView<'a>),
    Picker(&'a [String]),
    Tabs { index: usize, count: usize },
    Note(&'a str),
}

pub fn compose_toolbar<'a>(ctx: &ToolbarContext<'a>) -> Vec<ToolbarSegment<'a>> {
    let mut out = Vec::with_capacity(6);
    out.push(ToolbarSegment::Back {
        enabled: ctx.can_go_back,
    });
    out.push(ToolbarSegment::Forward {
        enabled: ctx.can_go_forward,
    });
    out.push(ToolbarSegment::LoadControl {
        is_loading: ctx.is_loading,
    });
    if let Some(entries) = ctx.picker {
        out.push(ToolbarSegment::Picker(entries));
    } else if let Some(prompt) = ctx.prompt {
        out.push(ToolbarSegment::Prompt(prompt));
    } else {
        out.push(ToolbarSegment::Url(ctx.url));
    }
    if let Some(note) = ctx.note {
        out.push(ToolbarSegment::Note(note));
    } else if ctx.tab_count > 1 {
        out.push(ToolbarSegment::Tabs {
            index: ctx.tab_index,
            count: ctx.tab_count,
        });
    }
    out
}

const BG: &str = "\x1b[48;2;32;33;36m";
const BG_256: &str = "\x1b[48;5;236m";
const FG: &str = "\x1b[38;2;232;234;237m";
const FG_256: &str = "\x1b[38;5;253m";
const DIM: &str = "\x1b[2m";
const REVERSE: &str = "\x1b[7m";
const RESET_ATTRS: &str = "\x1b[22;27m";
const RESET: &str = "\x1b[0m";

/// Render segments into one line exactly `cols` cells wide.
pub fn format_toolbar(segments: &[ToolbarSegment<'_>], cols: u16, truecolor: bool) -> String {
    let (bg, fg) = if truecolor { (BG, FG) } else { (BG_256, FG_256) };
    let mut line = String::with_capacity(cols as usize + 64);
    line.push_str(bg);
    line.push_str(fg);

    let mut used = 0usize;
    let max_cells = cols as usize;
    let mut push_plain = |line: &mut String, used: &mut usize, s: &str| {
        let w = UnicodeWidthStr::width(s);
        if *used + w <= max_cells {
            line.push_str(s);
            *used += w;
        }
    };

    for seg in segments {
        match seg {
            ToolbarSegment::Back { enabled } => {
                if !enabled {
                    line.push_str(DIM);
                }
                push_plain(&mut line, &mut used, " ‹ ");
                if !enabled {
                    line.push_str(RESET_ATTRS);
                }
            }
            ToolbarSegment::Forward { enabled } => {
                if !enabled {
                    line.push_str(DIM);
                }
                push_plain(&mut line, &mut used, "› ");
                if !enabled {
                    line.push_str(RESET_ATTRS);
                }
            }
            ToolbarSegment::LoadControl { is_loading } => {
                push_plain(&mut line, &mut used, if *is_loading { "✕ " } else { "⟳ " });
            }
            ToolbarSegment::Url(url) => {
                let field = truncate_to(url, max_cells.saturating_sub(used + 8));
                push_plain(&mut line, &mut used, &field);
            }
            ToolbarSegment::Prompt(view) => {
                format_prompt(&mut line, &mut used, max_cells, view);
            }
            ToolbarSegment::Picker(entries) => {
                for (i, title) in entries.iter().enumerate() {
                    let label = format!("[{}] {}  ", i + 1, truncate_to(title, 20));
                    push_plain(&mut line, &mut used, &label);
                }
            }
            ToolbarSegment::Tabs { index, count } => {
                let label = format!(" [{}/{}]", index + 1, count);
                push_plain(&mut line, &mut used, &label);
            }
            ToolbarSegment::Note(note) => {
                let label = format!(" {}", truncate_to(note, 32));
                push_plain(&mut line, &mut used, &label);
            }
        }
    }

    for _ in used..max_cells {
        line.push(' ');
    }
    line.push_str(RESET);
    line
}

/// Prompt field with caret (reverse video on one cell) and selection
/// (reverse video across the range).
fn format_prompt(line: &mut String, used: &mut usize, max_cells: usize, view: &PromptView<'_>) {
    let chars: Vec<char> = view.text.chars().collect();
    let avail = max_cells.saturating_sub(*used + 2);
    let (sel_start, sel_end) = view.selection.unwrap_or((0, 0));
    let has_selection = view.selection.is_some() && sel_start < sel_end;

    for (i, ch) in chars.iter().enumerate().take(avail) {
        let selected = has_selection && i >= sel_start && i < sel_end;
        let caret = !has_selection && i == view.cursor;
        if selected || caret {
            line.push_str(REVERSE);
        }
        line.push(*ch);
        if selected || caret {
            line.push_str(RESET_ATTRS);
        }
        *used += 1;
    }
    // Caret sits past the end of the text.
    if !has_selection && view.cursor >= chars.len() && *used < max_cells {
        line.push_str(REVERSE);
        line.push(' ');
        line.push_str(RESET_ATTRS);
        *used += 1;
    }
}

fn truncate_to(s: &str, max_cells: usize) -> String {
    if UnicodeWidthStr::width(s) <= max_cells {
        return s.to_string();
    }
    let mut out = String::new();
    let mut w = 0;
    for ch in s.chars() {
        let cw = UnicodeWidthStr::width(ch.to_string().as_str());
        if w + cw + 1 > max_cells {
            break;
        }
        out.push(ch);
        w += cw;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(url: &'a str) -> ToolbarContext<'a> {
        ToolbarContext {
            url,
            prompt: None,
            is_loading: false,
            can_go_back: false,
            can_go_forward: false,
            tab_index: 0,
            tab_count: 1,
            note: None,
            picker: None,
        }
    }

    fn visible_width(s: &str) -> usize {
        // Strip SGR sequences, then measure.
        let mut out = String::new();
        let mut in_escape = false;
        for ch in s.chars() {
            match (in_escape, ch) {
                (false, '\x1b') => in_escape = true,
                (false, c) => out.push(c),
                (true, 'm') => in_escape = false,
                (true, _) => {}
            }
        }
        UnicodeWidthStr::width(out.as_str())
    }

    #[test]
    fn url_mode_shows_address_and_reload_glyph() {
        let segs = compose_toolbar(&ctx("https://example.com"));
        let line = format_toolbar(&segs, 80, true);
        assert!(line.contains("https://example.com"));
        assert!(line.contains('⟳'));
        assert_eq!(visible_width(&line), 80);
    }

    #[test]
    fn loading_swaps_reload_for_stop() {
        let mut c = ctx("https://example.com");
        c.is_loading = true;
        let line = format_toolbar(&compose_toolbar(&c), 80, true);
        assert!(line.contains('✕'));
        assert!(!line.contains('⟳'));
    }

    #[test]
    fn prompt_replaces_url_and_marks_caret() {
        let mut c = ctx("https://old.example");
        let view = PromptView {
            text: "https://new",
            cursor: 11,
            selection: None,
        };
        c.prompt = Some(view);
        let line = format_toolbar(&compose_toolbar(&c), 80, true);
        assert!(line.contains("https://new"));
        assert!(!line.contains("old.example"));
        assert!(line.contains(REVERSE), "caret rendered in reverse video");
    }

    #[test]
    fn long_url_truncates_with_ellipsis() {
        let long = "https://example.com/".repeat(12);
        let line = format_toolbar(&compose_toolbar(&ctx(&long)), 40, false);
        assert!(line.contains('…'));
        assert_eq!(visible_width(&line), 40);
    }

    #[test]
    fn tab_indicator_appears_with_multiple_tabs() {
        let mut c = ctx("https://example.com");
        c.tab_index = 1;
        c.tab_count = 3;
        let line = format_toolbar(&compose_toolbar(&c), 80, true);
        assert!(line.contains("[2/3]"));
    }

    #[test]
    fn picker_lists_numbered_tabs() {
        let entries = vec!["Example".to_string(), "Docs".to_string()];
        let mut c = ctx("https://example.com");
        c.picker = Some(&entries);
        let line = format_toolbar(&compose_toolbar(&c), 80, true);
        assert!(line.contains("[1] Example"));
        assert!(line.contains("[2] Docs"));
        assert!(!line.contains("https://example.com"));
    }
}
