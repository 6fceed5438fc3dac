//! Procedural cursor sprite.
//!
//! A 12×18 arrow with a dark outline, generated once as raw RGBA and
//! transmitted under its own image id. Per-move updates are placement
//! commands only.

pub const CURSOR_W: u32 = 12;
pub const CURSOR_H: u32 = 18;

// '#' outline, '.' fill, anything else transparent.
const ARROW: [&str; 18] = [
    "#           ",
    "##          ",
    "#.#         ",
    "#..#        ",
    "#...#       ",
    "#....#      ",
    "#.....#     ",
    "#......#    ",
    "#.......#   ",
    "#........#  ",
    "#.....##### ",
    "#..#..#     ",
    "#.# #..#    ",
    "##  #..#    ",
    "#    #..#   ",
    "     #..#   ",
    "      ##    ",
    "            ",
];

const OUTLINE: [u8; 4] = [20, 20, 25, 255];
const FILL: [u8; 4] = [245, 245, 245, 255];

/// Raw RGBA bytes for the sprite, row-major.
pub fn sprite_rgba() -> Vec<u8> {
    let mut out = Vec::with_capacity((CURSOR_W * CURSOR_H * 4) as usize);
    for row in ARROW {
        let mut cols = 0;
        for ch in row.chars().take(CURSOR_W as usize) {
            let px = match ch {
                '#' => OUTLINE,
                '.' => FILL,
                _ => [0, 0, 0, 0],
            };
            out.extend_from_slice(&px);
            cols += 1;
        }
        for _ in cols..CURSOR_W as usize {
            out.extend_from_slice(&[0, 0, 0, 0]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_has_exact_dimensions() {
        assert_eq!(sprite_rgba().len(), (CURSOR_W * CURSOR_H * 4) as usize);
    }

    #[test]
    fn sprite_tip_is_outlined_and_body_filled() {
        let rgba = sprite_rgba();
        // (0, 0) is outline.
        assert_eq!(&rgba[0..4], &OUTLINE);
        // Row 5, col 2 is fill.
        let idx = ((5 * CURSOR_W + 2) * 4) as usize;
        assert_eq!(&rgba[idx..idx + 4], &FILL);
        // Top-right corner is transparent.
        let idx = ((CURSOR_W - 1) * 4) as usize;
        assert_eq!(rgba[idx + 3], 0);
    }
}
