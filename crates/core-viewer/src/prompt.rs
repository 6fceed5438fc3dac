//! URL prompt editing buffer.
//!
//! Standard single-line editing over chars with a selection model: the
//! anchor pins one end while the cursor moves. Cursor and selection are
//! always within bounds; pasted text is filtered to printable characters
//! before insertion.

#[derive(Debug, Clone, Default)]
pub struct PromptBuffer {
    chars: Vec<char>,
    cursor: usize,
    /// Selection anchor; selection spans `anchor..cursor` in either order.
    anchor: Option<usize>,
}

impl PromptBuffer {
    pub fn from_text(text: &str) -> Self {
        let chars: Vec<char> = text.chars().filter(|c| !c.is_control()).collect();
        let cursor = chars.len();
        Self {
            chars,
            cursor,
            anchor: None,
        }
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Normalized inclusive-exclusive selection range, if non-empty.
    pub fn selection(&self) -> Option<(usize, usize)> {
        let anchor = self.anchor?;
        if anchor == self.cursor {
            return None;
        }
        Some((anchor.min(self.cursor), anchor.max(self.cursor)))
    }

    pub fn selected_text(&self) -> String {
        match self.selection() {
            Some((a, b)) => self.chars[a..b].iter().collect(),
            None => String::new(),
        }
    }

    pub fn select_all(&mut self) {
        self.anchor = Some(0);
        self.cursor = self.chars.len();
    }

    fn delete_selection(&mut self) -> bool {
        let Some((a, b)) = self.selection() else {
            self.anchor = None;
            return false;
        };
        self.chars.drain(a..b);
        self.cursor = a;
        self.anchor = None;
        true
    }

    pub fn insert_char(&mut self, c: char) {
        if c.is_control() {
            return;
        }
        self.delete_selection();
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
    }

    /// Insert a string, dropping control characters (paste path).
    pub fn insert_str(&mut self, s: &str) {
        self.delete_selection();
        for c in s.chars().filter(|c| !c.is_control()) {
            self.chars.insert(self.cursor, c);
            self.cursor += 1;
        }
    }

    pub fn backspace(&mut self) {
        if self.delete_selection() {
            return;
        }
        if self.cursor > 0 {
            self.cursor -= 1;
            self.chars.remove(self.cursor);
        }
    }

    pub fn delete(&mut self) {
        if self.delete_selection() {
            return;
        }
        if self.cursor < self.chars.len() {
            self.chars.remove(self.cursor);
        }
    }

    fn update_anchor(&mut self, select: bool) {
        if select {
            if self.anchor.is_none() {
                self.anchor = Some(self.cursor);
            }
        } else {
            self.anchor = None;
        }
    }

    pub fn left(&mut self, select: bool) {
        self.update_anchor(select);
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self, select: bool) {
        self.update_anchor(select);
        self.cursor = (self.cursor + 1).min(self.chars.len());
    }

    pub fn home(&mut self, select: bool) {
        self.update_anchor(select);
        self.cursor = 0;
    }

    pub fn end(&mut self, select: bool) {
        self.update_anchor(select);
        self.cursor = self.chars.len();
    }

    /// Jump to the start of the previous word (alphanumeric runs).
    pub fn word_left(&mut self, select: bool) {
        self.update_anchor(select);
        let mut i = self.cursor;
        while i > 0 && !self.chars[i - 1].is_alphanumeric() {
            i -= 1;
        }
        while i > 0 && self.chars[i - 1].is_alphanumeric() {
            i -= 1;
        }
        self.cursor = i;
    }

    /// Jump past the end of the next word.
    pub fn word_right(&mut self, select: bool) {
        self.update_anchor(select);
        let n = self.chars.len();
        let mut i = self.cursor;
        while i < n && !self.chars[i].is_alphanumeric() {
            i += 1;
        }
        while i < n && self.chars[i].is_alphanumeric() {
            i += 1;
        }
        self.cursor = i;
    }

    /// Delete and return the selection (cut). Empty when nothing selected.
    pub fn cut_selection(&mut self) -> String {
        let text = self.selected_text();
        self.delete_selection();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_builds_text() {
        let mut p = PromptBuffer::default();
        for c in "https://example.com".chars() {
            p.insert_char(c);
        }
        assert_eq!(p.text(), "https://example.com");
        assert_eq!(p.cursor(), 19);
    }

    #[test]
    fn from_text_places_cursor_at_end() {
        let p = PromptBuffer::from_text("abc");
        assert_eq!(p.cursor(), 3);
        assert_eq!(p.selection(), None);
    }

    #[test]
    fn backspace_and_delete_edit_around_cursor() {
        let mut p = PromptBuffer::from_text("abcd");
        p.left(false);
        p.left(false);
        p.backspace();
        assert_eq!(p.text(), "acd");
        p.delete();
        assert_eq!(p.text(), "ad");
    }

    #[test]
    fn selection_spans_in_either_direction() {
        let mut p = PromptBuffer::from_text("abcdef");
        p.home(false);
        p.right(true);
        p.right(true);
        assert_eq!(p.selection(), Some((0, 2)));
        assert_eq!(p.selected_text(), "ab");

        let mut p = PromptBuffer::from_text("abcdef");
        p.left(true);
        p.left(true);
        assert_eq!(p.selection(), Some((4, 6)));
        assert_eq!(p.selected_text(), "ef");
    }

    #[test]
    fn typing_replaces_selection() {
        let mut p = PromptBuffer::from_text("hello world");
        p.select_all();
        p.insert_char('x');
        assert_eq!(p.text(), "x");
        assert_eq!(p.cursor(), 1);
    }

    #[test]
    fn word_motion_skips_separators() {
        let mut p = PromptBuffer::from_text("https://example.com/path");
        p.home(false);
        p.word_right(false);
        assert_eq!(p.cursor(), 5, "past 'https'");
        p.word_right(false);
        assert_eq!(p.cursor(), 15, "past 'example'");
        p.end(false);
        p.word_left(false);
        assert_eq!(p.cursor(), 20, "start of 'path'");
    }

    #[test]
    fn paste_filters_control_characters() {
        let mut p = PromptBuffer::default();
        p.insert_str("https://exam\x1b[200~ple.com\r\n\t");
        let text = p.text();
        assert!(!text.chars().any(|c| c.is_control()), "no control chars: {text:?}");
        assert!(text.starts_with("https://exam"));
        assert!(text.contains("ple.com"));
    }

    #[test]
    fn cursor_and_selection_stay_in_bounds() {
        let mut p = PromptBuffer::from_text("ab");
        for _ in 0..5 {
            p.right(false);
        }
        assert_eq!(p.cursor(), 2);
        for _ in 0..5 {
            p.left(true);
        }
        assert_eq!(p.cursor(), 0);
        assert_eq!(p.selection(), Some((0, 2)));
    }

    #[test]
    fn cut_returns_and_removes_selection() {
        let mut p = PromptBuffer::from_text("abcdef");
        p.home(false);
        p.right(true);
        p.right(true);
        p.right(true);
        assert_eq!(p.cut_selection(), "abc");
        assert_eq!(p.text(), "def");
        assert_eq!(p.cursor(), 0);
    }
}
