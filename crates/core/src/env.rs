//! Data records shared between the host and generated code.
//!
//! Everything here is `#[repr(C)]`; generated code addresses fields through
//! `core::mem::offset_of!` on these exact definitions, so layout changes are
//! automatically picked up by the generators. Vector fields are 32-byte
//! aligned and 8 lanes wide: the 4-lane SSE generator reads the low half,
//! the 8-lane AVX2 generator reads all of it.

/// Eight 32-bit integer lanes, aligned for both XMM and YMM loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, align(32))]
pub struct Vec8i(pub [i32; 8]);

/// Eight single-precision lanes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C, align(32))]
pub struct Vec8f(pub [f32; 8]);

impl Vec8i {
    pub const fn splat(value: i32) -> Vec8i {
        Vec8i([value; 8])
    }
}

impl Vec8f {
    pub const fn splat(value: f32) -> Vec8f {
        Vec8f([value; 8])
    }
}

/// One mip level of the bound texture.
///
/// Sized and aligned to 64 bytes so generated code reaches level `n` with a
/// single shift (`n << 6`) off the array base. The wrap parameters encode
/// both addressing shapes: Repeat/RegionRepeat use the and/or pair,
/// Clamp/RegionClamp use the min/max pair; the generator picks the pair the
/// selector calls for.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C, align(64))]
pub struct TexLevel {
    /// Texel base address.
    pub base: i64,
    /// Row stride in bytes.
    pub stride: i64,
    pub u_and: i32,
    pub u_or: i32,
    pub v_and: i32,
    pub v_or: i32,
    pub u_min: i32,
    pub u_max: i32,
    pub v_min: i32,
    pub v_max: i32,
    pub _reserved: [i32; 4],
}

pub const MAX_MIP_LEVELS: usize = 7;

/// Read-only per-draw environment. Built once per primitive batch and shared
/// by every scanline call; generated code only ever reads it.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PipelineEnv {
    /// Frame buffer base address.
    pub fb_base: i64,
    /// Frame buffer row stride in bytes.
    pub fb_stride: i64,
    /// Depth buffer base address.
    pub zb_base: i64,
    /// Depth buffer row stride in bytes.
    pub zb_stride: i64,
    /// Palette base for indexed textures (32-bit entries).
    pub palette: i64,
    /// Constant LOD when the selector says the q exponent is not used.
    pub lod: i32,
    pub _pad: i32,

    /// Mip level descriptors, level 0 first.
    pub tex: [TexLevel; MAX_MIP_LEVELS],

    /// Alpha test reference, splatted.
    pub aref: Vec8i,
    /// Fixed blend alpha, splatted.
    pub afix: Vec8i,
    /// Fog color red/green/blue channels, splatted 0..255 values. Only the
    /// per-pixel fog factor is 16.16.
    pub fog_r: Vec8i,
    pub fog_g: Vec8i,
    pub fog_b: Vec8i,
    /// Alpha-MSB force mask (FBA), splatted.
    pub fba_mask: Vec8i,
    /// Dither matrix, one row per scanline y&3, lane n = column (x+n)&3.
    pub dither: [Vec8i; 4],
}

impl Default for PipelineEnv {
    fn default() -> PipelineEnv {
        PipelineEnv {
            fb_base: 0,
            fb_stride: 0,
            zb_base: 0,
            zb_stride: 0,
            palette: 0,
            lod: 0,
            _pad: 0,
            tex: [TexLevel::default(); MAX_MIP_LEVELS],
            aref: Vec8i::default(),
            afix: Vec8i::default(),
            fog_r: Vec8i::default(),
            fog_g: Vec8i::default(),
            fog_b: Vec8i::default(),
            fba_mask: Vec8i::default(),
            dither: [Vec8i::default(); 4],
        }
    }
}

/// Per-scanline interpolation state.
///
/// `*_start` vectors hold the attribute value of the first `width` pixels
/// (lane n = pixel `left + n`); `*_step` vectors hold the splatted advance
/// for one whole pixel group. The dispatch helper fills both from the
/// primitive's per-pixel deltas.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct ScanlineSpan {
    /// Depth, unsigned 32-bit.
    pub z: Vec8i,
    pub z_step: Vec8i,

    /// Perspective texture coordinates (float s/t/q)...
    pub s: Vec8f,
    pub t: Vec8f,
    pub q: Vec8f,
    pub s_step: Vec8f,
    pub t_step: Vec8f,
    pub q_step: Vec8f,

    /// ...or direct 16.16 u/v, selected by the coordinate mode.
    pub u: Vec8i,
    pub v: Vec8i,
    pub u_step: Vec8i,
    pub v_step: Vec8i,

    /// Vertex color in 16.16, one vector per channel.
    pub r: Vec8i,
    pub g: Vec8i,
    pub b: Vec8i,
    pub a: Vec8i,
    pub r_step: Vec8i,
    pub g_step: Vec8i,
    pub b_step: Vec8i,
    pub a_step: Vec8i,

    /// Fog factor in 16.16 (0 = full fog color, 1.0 = vertex color).
    pub fog: Vec8i,
    pub fog_step: Vec8i,

    /// Edge coverage in 16.16 for antialiased edges.
    pub cov: Vec8i,
    pub cov_step: Vec8i,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};

    #[test]
    fn tex_level_is_shift_indexable() {
        assert_eq!(size_of::<TexLevel>(), 64);
        assert_eq!(align_of::<TexLevel>(), 64);
        assert_eq!(
            offset_of!(PipelineEnv, tex) % 64,
            0,
            "level array must start aligned"
        );
    }

    #[test]
    fn vectors_are_ymm_aligned() {
        assert_eq!(align_of::<Vec8i>(), 32);
        assert_eq!(size_of::<Vec8i>(), 32);
        assert_eq!(offset_of!(ScanlineSpan, z) % 32, 0);
        assert_eq!(offset_of!(PipelineEnv, aref) % 32, 0);
    }
}
