//! Coordinate mapping between terminal space and browser space.
//!
//! A [`Layout`] is a pure function of the terminal extent, the current frame
//! dimensions, the browser's logical viewport, and the toolbar height. It is
//! recomputed per frame and on resize; nothing in it mutates independently.

/// Terminal geometry plus the negotiated mouse reporting mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermExtent {
    pub cols: u16,
    pub rows: u16,
    pub width_px: u32,
    pub height_px: u32,
    /// Mouse positions arrive in pixels (SGR-1016) instead of cells.
    pub pixel_mouse: bool,
}

impl TermExtent {
    /// Fallback cell metrics for emulators that do not report pixels.
    const FALLBACK_CELL_W: f64 = 8.0;
    const FALLBACK_CELL_H: f64 = 16.0;

    pub fn cell_w(&self) -> f64 {
        if self.width_px == 0 || self.cols == 0 {
            Self::FALLBACK_CELL_W
        } else {
            self.width_px as f64 / self.cols as f64
        }
    }

    pub fn cell_h(&self) -> f64 {
        if self.height_px == 0 || self.rows == 0 {
            Self::FALLBACK_CELL_H
        } else {
            self.height_px as f64 / self.rows as f64
        }
    }

    pub fn width_px_or_derived(&self) -> f64 {
        if self.width_px > 0 {
            self.width_px as f64
        } else {
            self.cols as f64 * Self::FALLBACK_CELL_W
        }
    }

    pub fn height_px_or_derived(&self) -> f64 {
        if self.height_px > 0 {
            self.height_px as f64
        } else {
            self.rows as f64 * Self::FALLBACK_CELL_H
        }
    }
}

/// Derived layout for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub cell_w: f64,
    pub cell_h: f64,
    /// Toolbar height in pixels; the content's top edge.
    pub toolbar_px: f64,
    /// On-screen image extent in pixels.
    pub display_w: f64,
    pub display_h: f64,
    /// Cells covered by the content image.
    pub display_cols: u16,
    pub display_rows: u16,
    /// Frame dimensions the layout was computed for.
    pub frame_w: u32,
    pub frame_h: u32,
    /// Browser logical viewport the mapping targets.
    pub chrome_w: f64,
    pub chrome_h: f64,
    /// Vertical draw offset keeping content stable when a download bar
    /// shrinks the frame against its recorded baseline.
    pub y_offset: f64,
    pub pixel_mouse: bool,
}

impl Layout {
    /// Compute the layout. `chrome` falls back to the frame extent when the
    /// browser's inner viewport is unknown; `baseline_frame_h` is the frame
    /// height recorded before a download bar appeared.
    pub fn compute(
        term: TermExtent,
        frame_w: u32,
        frame_h: u32,
        chrome: Option<(u32, u32)>,
        toolbar_rows: u16,
        baseline_frame_h: Option<u32>,
    ) -> Self {
        let cell_w = term.cell_w();
        let cell_h = term.cell_h();
        let toolbar_px = toolbar_rows as f64 * cell_h;
        let avail_w = term.width_px_or_derived();
        let avail_h = (term.height_px_or_derived() - toolbar_px).max(0.0);

        // Aspect-preserving fit, width-first, capped by the space under the
        // toolbar. Letterboxing happens on the right edge.
        let (display_w, display_h) = if frame_w == 0 || frame_h == 0 {
            (avail_w, avail_h)
        } else {
            let scaled_h = avail_w * frame_h as f64 / frame_w as f64;
            if scaled_h <= avail_h {
                (avail_w, scaled_h)
            } else {
                (avail_h * frame_w as f64 / frame_h as f64, avail_h)
            }
        };

        let display_cols = if cell_w > 0.0 {
            ((display_w / cell_w).ceil() as u16).min(term.cols)
        } else {
            term.cols
        };
        let display_rows = if cell_h > 0.0 {
            ((display_h / cell_h).ceil() as u16).min(term.rows.saturating_sub(toolbar_rows))
        } else {
            term.rows.saturating_sub(toolbar_rows)
        };

        let (chrome_w, chrome_h) = match chrome {
            Some((w, h)) if w > 0 && h > 0 => (w as f64, h as f64),
            _ => (frame_w.max(1) as f64, frame_h.max(1) as f64),
        };

        let y_offset = baseline_frame_h
            .filter(|&baseline| baseline > frame_h && frame_h > 0)
            .map(|baseline| (baseline - frame_h) as f64)
            .unwrap_or(0.0);

        Self {
            cell_w,
            cell_h,
            toolbar_px,
            display_w,
            display_h,
            display_cols,
            display_rows,
            frame_w,
            frame_h,
            chrome_w,
            chrome_h,
            y_offset,
            pixel_mouse: term.pixel_mouse,
        }
    }

    /// Center of a terminal cell in pixels.
    pub fn cell_to_pixel(&self, col: u16, row: u16) -> (f64, f64) {
        (
            col as f64 * self.cell_w + self.cell_w / 2.0,
            row as f64 * self.cell_h + self.cell_h / 2.0,
        )
    }

    pub fn pixel_to_cell(&self, px: f64, py: f64) -> (u16, u16) {
        let col = if self.cell_w > 0.0 { (px / self.cell_w) as u16 } else { 0 };
        let row = if self.cell_h > 0.0 { (py / self.cell_h) as u16 } else { 0 };
        (col, row)
    }

    /// Map a raw terminal mouse position (cells or pixels, per the
    /// negotiated mode) to browser viewport coordinates. `None` outside the
    /// displayed content rectangle (toolbar, letterbox).
    pub fn terminal_to_browser(&self, x: u32, y: u32) -> Option<(f64, f64)> {
        let (px, py) = if self.pixel_mouse {
            (x as f64, y as f64)
        } else {
            self.cell_to_pixel(x as u16, y as u16)
        };
        if px < 0.0 || px >= self.display_w {
            return None;
        }
        if py < self.toolbar_px || py >= self.toolbar_px + self.display_h {
            return None;
        }
        let bx = px * self.chrome_w / self.display_w;
        let by = (py - self.toolbar_px) * self.chrome_h / self.display_h;
        Some((
            bx.clamp(0.0, self.chrome_w - 1.0),
            by.clamp(0.0, self.chrome_h - 1.0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_term() -> TermExtent {
        // The cold-open scenario: 80×24 cells, 1120×720 pixels, pixel mouse.
        TermExtent {
            cols: 80,
            rows: 24,
            width_px: 1120,
            height_px: 720,
            pixel_mouse: true,
        }
    }

    #[test]
    fn cold_open_layout_fills_rows_below_toolbar() {
        // 1120×690 available under a one-row toolbar; a 1120×690 frame fits
        // exactly.
        let layout = Layout::compute(base_term(), 1120, 690, Some((1120, 690)), 1, None);
        assert_eq!(layout.cell_w, 14.0);
        assert_eq!(layout.cell_h, 30.0);
        assert_eq!(layout.toolbar_px, 30.0);
        assert_eq!(layout.display_w, 1120.0);
        assert_eq!(layout.display_h, 690.0);
        assert_eq!(layout.display_rows, 23);
        assert_eq!(layout.display_cols, 80);
    }

    #[test]
    fn toolbar_pixels_map_to_none() {
        let layout = Layout::compute(base_term(), 1120, 690, Some((1120, 690)), 1, None);
        assert_eq!(layout.terminal_to_browser(10, 0), None);
        assert_eq!(layout.terminal_to_browser(10, 29), None);
        assert!(layout.terminal_to_browser(10, 30).is_some());
    }

    #[test]
    fn letterbox_maps_to_none() {
        // Tall narrow frame: display shrinks horizontally, right side empty.
        let layout = Layout::compute(base_term(), 400, 800, Some((400, 800)), 1, None);
        assert!(layout.display_w < 1120.0);
        let inside = layout.terminal_to_browser(10, 100);
        assert!(inside.is_some());
        let outside = layout.terminal_to_browser(1100, 100);
        assert_eq!(outside, None);
    }

    #[test]
    fn inside_points_stay_within_chrome_bounds() {
        let layout = Layout::compute(base_term(), 1120, 690, Some((1118, 688)), 1, None);
        for (x, y) in [(0, 30), (559, 300), (1119, 719)] {
            if let Some((bx, by)) = layout.terminal_to_browser(x, y) {
                assert!(bx >= 0.0 && bx < layout.chrome_w, "bx {bx} out of range");
                assert!(by >= 0.0 && by < layout.chrome_h, "by {by} out of range");
            }
        }
    }

    #[test]
    fn cell_mode_maps_through_cell_centers() {
        let mut term = base_term();
        term.pixel_mouse = false;
        let layout = Layout::compute(term, 1120, 690, Some((1120, 690)), 1, None);
        // Cell (0, 0) is the toolbar row.
        assert_eq!(layout.terminal_to_browser(0, 0), None);
        // Cell (0, 1) centers at (7, 45): inside content.
        let (bx, by) = layout.terminal_to_browser(0, 1).expect("inside");
        assert!((bx - 7.0).abs() < 0.01);
        assert!((by - 15.0).abs() < 0.01);
    }

    #[test]
    fn cell_pixel_round_trip() {
        let layout = Layout::compute(base_term(), 1120, 690, None, 1, None);
        let (px, py) = layout.cell_to_pixel(10, 5);
        assert_eq!(layout.pixel_to_cell(px, py), (10, 5));
    }

    #[test]
    fn chrome_falls_back_to_frame_extent() {
        let layout = Layout::compute(base_term(), 800, 600, None, 1, None);
        assert_eq!(layout.chrome_w, 800.0);
        assert_eq!(layout.chrome_h, 600.0);
    }

    #[test]
    fn download_bar_shrink_yields_offset() {
        let layout = Layout::compute(base_term(), 1120, 640, Some((1120, 640)), 1, Some(690));
        assert_eq!(layout.y_offset, 50.0);
        // Growth or equality yields none.
        let layout = Layout::compute(base_term(), 1120, 690, Some((1120, 690)), 1, Some(690));
        assert_eq!(layout.y_offset, 0.0);
    }

    #[test]
    fn zero_pixel_report_uses_fallback_metrics() {
        let term = TermExtent {
            cols: 80,
            rows: 24,
            width_px: 0,
            height_px: 0,
            pixel_mouse: false,
        };
        let layout = Layout::compute(term, 640, 368, None, 1, None);
        assert!(layout.cell_w > 0.0);
        assert!(layout.cell_h > 0.0);
        assert!(layout.display_w > 0.0);
    }
}
