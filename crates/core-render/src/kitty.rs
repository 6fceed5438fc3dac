//! Terminal image-protocol writer (kitty graphics).
//!
//! Commands are emitted as APC sequences into the render pass's buffered
//! writer; nothing here flushes. Payloads go inline as chunked base64, or by
//! shared-memory object name on the zero-inflation fast path. A fixed image
//! id plus placement id makes repeated draws replace in place.

use std::io::{self, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

const APC_START: &[u8] = b"\x1b_G";
const APC_END: &[u8] = b"\x1b\\";
/// Base64 payload bytes per chunk; the protocol caps chunks at 4096.
const CHUNK: usize = 4096;

/// Pixel format of a transmitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Png,
    /// 32-bit RGBA with explicit dimensions.
    Rgba { width: u32, height: u32 },
}

impl PixelFormat {
    fn code(&self) -> u32 {
        match self {
            PixelFormat::Png => 100,
            PixelFormat::Rgba { .. } => 32,
        }
    }
}

/// How the payload reaches the terminal.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// Chunked base64 over the tty.
    Inline(&'a [u8]),
    /// Name of a POSIX shared-memory object the terminal reads (and then
    /// unlinks) itself.
    SharedMem { name: &'a str, size: usize },
}

/// One draw (transmit + display) command. The image is scaled to the given
/// cell rectangle at the current cursor position.
#[derive(Debug, Clone, Copy)]
pub struct DrawCommand<'a> {
    pub image_id: u32,
    pub placement_id: u32,
    pub format: PixelFormat,
    pub payload: Payload<'a>,
    pub cols: u16,
    pub rows: u16,
    /// Pixel offset inside the first cell.
    pub x_offset_px: u32,
    pub y_offset_px: u32,
    pub z_index: i32,
}

fn control_pairs(cmd: &DrawCommand<'_>) -> String {
    let mut ctrl = format!(
        "a=T,q=2,f={},i={},p={},c={},r={}",
        cmd.format.code(),
        cmd.image_id,
        cmd.placement_id,
        cmd.cols,
        cmd.rows
    );
    if let PixelFormat::Rgba { width, height } = cmd.format {
        ctrl.push_str(&format!(",s={width},v={height}"));
    }
    if cmd.x_offset_px > 0 {
        ctrl.push_str(&format!(",X={}", cmd.x_offset_px));
    }
    if cmd.y_offset_px > 0 {
        ctrl.push_str(&format!(",Y={}", cmd.y_offset_px));
    }
    if cmd.z_index != 0 {
        ctrl.push_str(&format!(",z={}", cmd.z_index));
    }
    ctrl
}

/// Emit a draw command at the current cursor cell.
pub fn draw(out: &mut impl Write, cmd: &DrawCommand<'_>) -> io::Result<()> {
    let ctrl = control_pairs(cmd);
    match cmd.payload {
        Payload::Inline(bytes) => {
            let encoded = BASE64.encode(bytes);
            let mut chunks = encoded.as_bytes().chunks(CHUNK).peekable();
            let mut first = true;
            // An empty payload still needs one terminating command.
            if chunks.peek().is_none() {
                out.write_all(APC_START)?;
                write!(out, "{ctrl},t=d,m=0;")?;
                out.write_all(APC_END)?;
                return Ok(());
            }
            while let Some(chunk) = chunks.next() {
                let more = if chunks.peek().is_some() { 1 } else { 0 };
                out.write_all(APC_START)?;
                if first {
                    write!(out, "{ctrl},t=d,m={more};")?;
                    first = false;
                } else {
                    write!(out, "m={more};")?;
                }
                out.write_all(chunk)?;
                out.write_all(APC_END)?;
            }
            Ok(())
        }
        Payload::SharedMem { name, size } => {
            out.write_all(APC_START)?;
            write!(out, "{ctrl},t=s,S={size};")?;
            out.write_all(BASE64.encode(name).as_bytes())?;
            out.write_all(APC_END)?;
            Ok(())
        }
    }
}

/// Transmit image data only (no placement), for sprites placed repeatedly.
pub fn transmit(
    out: &mut impl Write,
    image_id: u32,
    format: PixelFormat,
    bytes: &[u8],
) -> io::Result<()> {
    let mut ctrl = format!("a=t,q=2,f={},i={}", format.code(), image_id);
    if let PixelFormat::Rgba { width, height } = format {
        ctrl.push_str(&format!(",s={width},v={height}"));
    }
    let encoded = BASE64.encode(bytes);
    let mut chunks = encoded.as_bytes().chunks(CHUNK).peekable();
    let mut first = true;
    while let Some(chunk) = chunks.next() {
        let more = if chunks.peek().is_some() { 1 } else { 0 };
        out.write_all(APC_START)?;
        if first {
            write!(out, "{ctrl},t=d,m={more};")?;
            first = false;
        } else {
            write!(out, "m={more};")?;
        }
        out.write_all(chunk)?;
        out.write_all(APC_END)?;
    }
    Ok(())
}

/// Place previously transmitted data at the current cursor cell.
pub fn place(
    out: &mut impl Write,
    image_id: u32,
    placement_id: u32,
    x_offset_px: u32,
    y_offset_px: u32,
    z_index: i32,
) -> io::Result<()> {
    out.write_all(APC_START)?;
    write!(out, "a=p,q=2,i={image_id},p={placement_id}")?;
    if x_offset_px > 0 {
        write!(out, ",X={x_offset_px}")?;
    }
    if y_offset_px > 0 {
        write!(out, ",Y={y_offset_px}")?;
    }
    if z_index != 0 {
        write!(out, ",z={z_index}")?;
    }
    write!(out, ";")?;
    out.write_all(APC_END)?;
    Ok(())
}

/// Remove every placement of `image_id` and free its data.
pub fn delete_image(out: &mut impl Write, image_id: u32) -> io::Result<()> {
    out.write_all(APC_START)?;
    write!(out, "a=d,d=I,q=2,i={image_id};")?;
    out.write_all(APC_END)?;
    Ok(())
}

/// Remove all images.
pub fn clear_all(out: &mut impl Write) -> io::Result<()> {
    out.write_all(APC_START)?;
    write!(out, "a=d,d=A,q=2;")?;
    out.write_all(APC_END)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(cmd: &DrawCommand<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        draw(&mut out, cmd).expect("write");
        out
    }

    fn base_cmd<'a>(payload: Payload<'a>) -> DrawCommand<'a> {
        DrawCommand {
            image_id: 100,
            placement_id: 1,
            format: PixelFormat::Png,
            payload,
            cols: 80,
            rows: 23,
            x_offset_px: 0,
            y_offset_px: 0,
            z_index: 0,
        }
    }

    #[test]
    fn small_inline_draw_is_one_apc() {
        let out = render(&base_cmd(Payload::Inline(b"png-bytes")));
        let s = String::from_utf8_lossy(&out);
        assert!(s.starts_with("\x1b_G"));
        assert!(s.ends_with("\x1b\\"));
        assert_eq!(s.matches("\x1b_G").count(), 1);
        assert!(s.contains("a=T"));
        assert!(s.contains("f=100"));
        assert!(s.contains("i=100"));
        assert!(s.contains("p=1"));
        assert!(s.contains("c=80"));
        assert!(s.contains("r=23"));
        assert!(s.contains("m=0;"));
    }

    #[test]
    fn large_inline_payload_chunks_with_continuations() {
        let payload = vec![0u8; 9000];
        let out = render(&base_cmd(Payload::Inline(&payload)));
        let s = String::from_utf8_lossy(&out);
        let apcs = s.matches("\x1b_G").count();
        assert!(apcs >= 3, "9000 raw bytes must exceed two 4096 chunks");
        assert_eq!(s.matches("m=1").count(), apcs - 1);
        assert_eq!(s.matches("m=0").count(), 1);
        // Control pairs only on the first chunk.
        assert_eq!(s.matches("a=T").count(), 1);
    }

    #[test]
    fn shared_mem_reference_encodes_name() {
        let out = render(&base_cmd(Payload::SharedMem {
            name: "/termweb-1",
            size: 12345,
        }));
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("t=s"));
        assert!(s.contains("S=12345"));
        assert!(s.contains(&BASE64.encode("/termweb-1")));
    }

    #[test]
    fn z_index_and_offsets_appear_when_nonzero() {
        let mut cmd = base_cmd(Payload::Inline(b"x"));
        cmd.z_index = -1;
        cmd.y_offset_px = 14;
        let s = String::from_utf8_lossy(&render(&cmd)).into_owned();
        assert!(s.contains("z=-1"));
        assert!(s.contains("Y=14"));
        assert!(!s.contains("X="));
    }

    #[test]
    fn delete_and_clear_commands() {
        let mut out = Vec::new();
        delete_image(&mut out, 100).expect("write");
        clear_all(&mut out).expect("write");
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("a=d,d=I,q=2,i=100;"));
        assert!(s.contains("a=d,d=A,q=2;"));
    }

    #[test]
    fn rgba_transmit_carries_dimensions() {
        let mut out = Vec::new();
        transmit(
            &mut out,
            101,
            PixelFormat::Rgba {
                width: 12,
                height: 18,
            },
            &[0u8; 12 * 18 * 4],
        )
        .expect("write");
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("f=32"));
        assert!(s.contains("s=12,v=18"));
        assert!(s.contains("a=t"));
    }
}
