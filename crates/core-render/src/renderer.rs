//! Render pass orchestration.
//!
//! The renderer owns what goes onto the byte stream: the content image
//! (fixed id, replaced in place), the cursor overlay sprite, the toolbar
//! row, and the blank-page placeholder. Methods only queue bytes into the
//! caller's buffered writer; the main loop flushes exactly once per pass.

use std::io::{self, Write};
use std::time::Instant;

use crossterm::{
    cursor::MoveTo,
    queue,
    style::Print,
};

use core_frame::FrameHandle;

use crate::coord::Layout;
use crate::cursor::{CURSOR_H, CURSOR_W, sprite_rgba};
use crate::kitty::{self, DrawCommand, Payload, PixelFormat};
use crate::toolbar::{ToolbarContext, compose_toolbar, format_toolbar};

pub const CONTENT_IMAGE_ID: u32 = 100;
pub const CURSOR_IMAGE_ID: u32 = 101;
const CONTENT_PLACEMENT_ID: u32 = 1;
const CURSOR_PLACEMENT_ID: u32 = 1;

/// Shared-memory object name the terminal reads content frames from.
#[cfg(unix)]
const FRAME_SHM_NAME: &str = "/termweb-frame";

/// How content frames travel to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTransmission {
    /// Chunked base64 over the tty.
    Inline,
    /// Named shared-memory object referenced from the draw command.
    #[cfg(unix)]
    SharedMem,
}

/// Cursor overlay position: cell plus sub-cell pixel offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPos {
    pub col: u16,
    pub row: u16,
    pub x_off_px: u32,
    pub y_off_px: u32,
}

const BLANK_LEGEND: &[&str] = &[
    "termweb",
    "",
    "mod+l   address bar",
    "mod+t   tab picker",
    "mod+h   hint mode",
    "mod+j/k scroll",
    "mod+q   quit",
];

pub struct Renderer {
    transmission: ContentTransmission,
    truecolor: bool,
    last_frame_dims: Option<(u32, u32)>,
    sprite_transmitted: bool,
    cursor_visible: bool,
    ui_dirty: bool,
    showing_blank_placeholder: bool,
    last_blit_ms: f64,
}

impl Renderer {
    pub fn new(transmission: ContentTransmission, truecolor: bool) -> Self {
        Self {
            transmission,
            truecolor,
            last_frame_dims: None,
            sprite_transmitted: false,
            cursor_visible: false,
            ui_dirty: true,
            showing_blank_placeholder: false,
            last_blit_ms: 0.0,
        }
    }

    pub fn mark_ui_dirty(&mut self) {
        self.ui_dirty = true;
    }

    pub fn ui_dirty(&self) -> bool {
        self.ui_dirty
    }

    pub fn showing_blank_placeholder(&self) -> bool {
        self.showing_blank_placeholder
    }

    /// Cost of the previous content blit, fed into the adaptive controller.
    pub fn last_blit_ms(&self) -> f64 {
        self.last_blit_ms
    }

    /// Draw (or replace) the content image from a pooled frame.
    ///
    /// The screencast delivers JPEG; the image protocol accepts PNG or raw
    /// pixels, so the frame is transcoded on the way out. The cost lands in
    /// `last_blit_ms`, which the adaptive controller folds into its latency
    /// signal.
    ///
    /// This is the single place the blank-placeholder gate is cleared: the
    /// caller only gets here once a real frame for a non-blank page exists.
    pub fn draw_content(
        &mut self,
        out: &mut impl Write,
        frame: &FrameHandle,
        layout: &Layout,
        hint_mode: bool,
    ) -> io::Result<()> {
        let started = Instant::now();
        let Some(png) = jpeg_to_png(frame.data()) else {
            tracing::debug!(
                target: "render.pass",
                generation = frame.generation,
                len = frame.len,
                "frame payload not decodable; dropped"
            );
            return Ok(());
        };
        self.showing_blank_placeholder = false;

        let dims = (frame.device_width, frame.device_height);
        if self.last_frame_dims.is_some_and(|d| d != dims) {
            // Stale placements at the old size leave artifacts.
            kitty::delete_image(out, CONTENT_IMAGE_ID)?;
        }
        self.last_frame_dims = Some(dims);

        queue!(out, MoveTo(0, 1))?;
        let y_offset = ((layout.toolbar_px - layout.cell_h).max(0.0) + layout.y_offset) as u32;
        let cmd = DrawCommand {
            image_id: CONTENT_IMAGE_ID,
            placement_id: CONTENT_PLACEMENT_ID,
            format: PixelFormat::Png,
            payload: self.content_payload(&png),
            cols: layout.display_cols,
            rows: layout.display_rows,
            x_offset_px: 0,
            y_offset_px: y_offset,
            z_index: if hint_mode { -1 } else { 0 },
        };
        kitty::draw(out, &cmd)?;
        self.last_blit_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::trace!(
            target: "render.pass",
            generation = frame.generation,
            blit_ms = self.last_blit_ms,
            "content drawn"
        );
        Ok(())
    }

    #[cfg(unix)]
    fn content_payload<'a>(&self, png: &'a [u8]) -> Payload<'a> {
        if self.transmission == ContentTransmission::SharedMem {
            match core_frame::shm::publish_named(FRAME_SHM_NAME, png) {
                Ok(()) => {
                    return Payload::SharedMem {
                        name: FRAME_SHM_NAME,
                        size: png.len(),
                    };
                }
                Err(e) => {
                    tracing::debug!(target: "render.pass", error = %e, "shm publish failed; inline fallback");
                }
            }
        }
        Payload::Inline(png)
    }

    #[cfg(not(unix))]
    fn content_payload<'a>(&self, png: &'a [u8]) -> Payload<'a> {
        Payload::Inline(png)
    }

    /// Remove the content image (tab switch, blank page).
    pub fn clear_content(&mut self, out: &mut impl Write) -> io::Result<()> {
        kitty::delete_image(out, CONTENT_IMAGE_ID)?;
        self.last_frame_dims = None;
        Ok(())
    }

    /// Overlay the cursor sprite at its cell with sub-cell precision.
    pub fn draw_cursor(&mut self, out: &mut impl Write, pos: CursorPos) -> io::Result<()> {
        if !self.sprite_transmitted {
            kitty::transmit(
                out,
                CURSOR_IMAGE_ID,
                PixelFormat::Rgba {
                    width: CURSOR_W,
                    height: CURSOR_H,
                },
                &sprite_rgba(),
            )?;
            self.sprite_transmitted = true;
        }
        queue!(out, MoveTo(pos.col, pos.row))?;
        kitty::place(
            out,
            CURSOR_IMAGE_ID,
            CURSOR_PLACEMENT_ID,
            pos.x_off_px,
            pos.y_off_px,
            2,
        )?;
        self.cursor_visible = true;
        Ok(())
    }

    pub fn hide_cursor_overlay(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.cursor_visible {
            kitty::delete_image(out, CURSOR_IMAGE_ID)?;
            self.cursor_visible = false;
            self.sprite_transmitted = false;
        }
        Ok(())
    }

    /// Re-emit the toolbar row when dirty.
    pub fn draw_toolbar(
        &mut self,
        out: &mut impl Write,
        ctx: &ToolbarContext<'_>,
        cols: u16,
    ) -> io::Result<()> {
        if !self.ui_dirty {
            return Ok(());
        }
        let segments = compose_toolbar(ctx);
        let line = format_toolbar(&segments, cols, self.truecolor);
        queue!(out, MoveTo(0, 0), Print(line))?;
        self.ui_dirty = false;
        Ok(())
    }

    /// Dark background with a centered shortcut legend, shown for
    /// about:blank-like pages. Gates further screencast draws until the
    /// caller routes a real frame through [`Renderer::draw_content`].
    pub fn draw_blank_placeholder(
        &mut self,
        out: &mut impl Write,
        cols: u16,
        rows: u16,
    ) -> io::Result<()> {
        if self.showing_blank_placeholder {
            return Ok(());
        }
        self.clear_content(out)?;
        let bg = if self.truecolor {
            "\x1b[48;2;24;25;30m\x1b[38;2;170;175;190m"
        } else {
            "\x1b[48;5;234m\x1b[38;5;250m"
        };
        let content_rows = rows.saturating_sub(1);
        let legend_top = content_rows.saturating_sub(BLANK_LEGEND.len() as u16) / 2 + 1;
        for row in 1..rows {
            queue!(out, MoveTo(0, row), Print(bg))?;
            let line_idx = row.checked_sub(legend_top).map(usize::from);
            let legend = line_idx.and_then(|i| BLANK_LEGEND.get(i)).copied().unwrap_or("");
            let pad_left = (cols as usize).saturating_sub(legend.len()) / 2;
            let mut line = String::with_capacity(cols as usize);
            for _ in 0..pad_left {
                line.push(' ');
            }
            line.push_str(legend);
            while line.len() < cols as usize {
                line.push(' ');
            }
            queue!(out, Print(line), Print("\x1b[0m"))?;
        }
        self.showing_blank_placeholder = true;
        Ok(())
    }

    /// Deregister every image placement; called on shutdown before the
    /// terminal guard restores the screen.
    pub fn teardown(&mut self, out: &mut impl Write) -> io::Result<()> {
        kitty::clear_all(out)?;
        Ok(())
    }
}

fn jpeg_to_png(bytes: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg).ok()?;
    let mut out = Vec::with_capacity(bytes.len() * 2);
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TermExtent;
    use core_frame::{FrameInfo, FramePool};

    fn test_layout() -> Layout {
        let term = TermExtent {
            cols: 80,
            rows: 24,
            width_px: 1120,
            height_px: 720,
            pixel_mouse: true,
        };
        Layout::compute(term, 1120, 690, Some((1120, 690)), 1, None)
    }

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([90, 120, 150]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
            .expect("encode");
        out
    }

    fn pooled_frame(w: u32, h: u32) -> core_frame::FrameHandle {
        let pool = FramePool::heap_with_geometry(2, 16 * 1024).expect("pool");
        pool.push_frame(
            &tiny_jpeg(),
            FrameInfo {
                session_id: 1,
                device_width: w,
                device_height: h,
                browser_ts_ms: 0,
            },
        )
        .expect("push");
        pool.acquire_latest().expect("frame")
    }

    fn renderer() -> Renderer {
        Renderer::new(ContentTransmission::Inline, true)
    }

    #[test]
    fn content_draw_replaces_in_place() {
        let mut r = renderer();
        let mut out = Vec::new();
        let frame = pooled_frame(1120, 690);
        r.draw_content(&mut out, &frame, &test_layout(), false)
            .expect("draw");
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("i=100"));
        assert!(s.contains("p=1"));
        // No delete on the first draw.
        assert!(!s.contains("a=d"));
    }

    #[test]
    fn dimension_change_deletes_before_redraw() {
        let mut r = renderer();
        let mut out = Vec::new();
        let frame = pooled_frame(1120, 690);
        r.draw_content(&mut out, &frame, &test_layout(), false)
            .expect("draw");
        out.clear();
        let shrunk = pooled_frame(1120, 640);
        r.draw_content(&mut out, &shrunk, &test_layout(), false)
            .expect("draw");
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("a=d,d=I,q=2,i=100;"), "stale placement must be deleted");
    }

    #[test]
    fn hint_mode_pushes_content_below_text() {
        let mut r = renderer();
        let mut out = Vec::new();
        let frame = pooled_frame(1120, 690);
        r.draw_content(&mut out, &frame, &test_layout(), true)
            .expect("draw");
        assert!(String::from_utf8_lossy(&out).contains("z=-1"));
    }

    #[test]
    fn toolbar_draw_respects_dirty_flag() {
        let mut r = renderer();
        let ctx = ToolbarContext {
            url: "https://example.com",
            prompt: None,
            is_loading: false,
            can_go_back: false,
            can_go_forward: false,
            tab_index: 0,
            tab_count: 1,
            note: None,
            picker: None,
        };
        let mut out = Vec::new();
        r.draw_toolbar(&mut out, &ctx, 80).expect("draw");
        assert!(!out.is_empty(), "first draw emits (initially dirty)");
        out.clear();
        r.draw_toolbar(&mut out, &ctx, 80).expect("draw");
        assert!(out.is_empty(), "clean toolbar is not re-emitted");
        r.mark_ui_dirty();
        r.draw_toolbar(&mut out, &ctx, 80).expect("draw");
        assert!(!out.is_empty());
    }

    #[test]
    fn blank_placeholder_gates_until_content_draw() {
        let mut r = renderer();
        let mut out = Vec::new();
        r.draw_blank_placeholder(&mut out, 80, 24).expect("draw");
        assert!(r.showing_blank_placeholder());
        let first_len = out.len();
        r.draw_blank_placeholder(&mut out, 80, 24).expect("draw");
        assert_eq!(out.len(), first_len, "placeholder is not redrawn while shown");

        let frame = pooled_frame(1120, 690);
        r.draw_content(&mut out, &frame, &test_layout(), false)
            .expect("draw");
        assert!(!r.showing_blank_placeholder(), "content draw clears the gate");
    }

    #[test]
    fn cursor_sprite_transmits_once_then_places() {
        let mut r = renderer();
        let mut out = Vec::new();
        let pos = CursorPos {
            col: 10,
            row: 5,
            x_off_px: 3,
            y_off_px: 7,
        };
        r.draw_cursor(&mut out, pos).expect("draw");
        let first = String::from_utf8_lossy(&out).into_owned();
        assert!(first.contains("a=t"), "first draw transmits the sprite");
        assert!(first.contains("a=p"), "and places it");
        out.clear();
        r.draw_cursor(&mut out, pos).expect("draw");
        let second = String::from_utf8_lossy(&out).into_owned();
        assert!(!second.contains("a=t"), "subsequent draws only re-place");
        assert!(second.contains("a=p"));
    }
}
