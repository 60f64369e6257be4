//! Immutable tables referenced by generated code through absolute addresses.
//!
//! These are `static` so their addresses are stable for the process lifetime;
//! compiled functions bake the addresses in as 64-bit immediates.

use crate::env::{Vec8f, Vec8i};

/// Lane validity masks for partial pixel groups: row `n` has the first `n`
/// lanes set. Generated tails index this with the remaining pixel count.
pub static TAIL_MASK: [Vec8i; 9] = {
    let mut rows = [Vec8i([0; 8]); 9];
    let mut n = 1;
    while n < 9 {
        let mut lane = 0;
        while lane < n {
            rows[n].0[lane] = -1;
            lane += 1;
        }
        n += 1;
    }
    rows
};

/// Lane index offsets 0..7, used to fan a scalar start coordinate out into
/// per-lane values.
pub static LANE_OFFSETS: Vec8i = Vec8i([0, 1, 2, 3, 4, 5, 6, 7]);

/// Sign bias for unsigned 32-bit compares via signed `pcmpgtd`.
pub static SIGN_BIAS: Vec8i = Vec8i::splat(i32::MIN);

/// Low-byte channel mask.
pub static BYTE_MASK: Vec8i = Vec8i::splat(0xFF);

/// RGB-only byte mask for 32-bit pixels (alpha byte clear).
pub static RGB_MASK: Vec8i = Vec8i::splat(0x00FF_FFFF);

/// Alpha-byte mask for 32-bit pixels.
pub static ALPHA_MASK: Vec8i = Vec8i::splat(0xFF00_0000u32 as i32);

/// Alpha (MSB) bit of a 16-bit pixel.
pub static ALPHA_BIT_C16: Vec8i = Vec8i::splat(0x8000);

/// Low 16 bits, for Z16 depth lanes.
pub static WORD_MAX: Vec8i = Vec8i::splat(0xFFFF);

/// Low 5 bits, for unpacking 1555 frame-buffer channels.
pub static MASK_5BIT: Vec8i = Vec8i::splat(0x1F);

/// Channel maximum for clamping combined colors.
pub static CHAN_MAX: Vec8i = Vec8i::splat(255);

/// Per-pixel blend threshold: alpha MSB set means blend.
pub static PABE_THRESHOLD: Vec8i = Vec8i::splat(127);

/// Perspective coordinates are scaled to 16.16 texels after the q divide.
pub static TEX_SCALE: Vec8f = Vec8f::splat(65536.0);

/// Default 4x4 ordered dither matrix, signed offsets centered on zero.
/// Row r of the env's per-draw table is built from row `y&3` here unless the
/// application overrides it.
pub static DITHER_DEFAULT: [[i32; 4]; 4] = [
    [-3, 1, -1, 3],
    [3, -1, 1, -3],
    [-1, 3, -3, 1],
    [1, -3, 3, -1],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_mask_shape() {
        assert_eq!(TAIL_MASK[0].0, [0; 8]);
        assert_eq!(TAIL_MASK[4].0, [-1, -1, -1, -1, 0, 0, 0, 0]);
        assert_eq!(TAIL_MASK[8].0, [-1; 8]);
    }

    #[test]
    fn dither_rows_are_zero_mean() {
        for row in DITHER_DEFAULT {
            assert_eq!(row.iter().sum::<i32>(), 0);
        }
    }
}
