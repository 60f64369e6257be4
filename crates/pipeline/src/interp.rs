//! Scalar reference pipeline.
//!
//! Runs the same stage sequence as the generated code, one pixel at a
//! time, with the same fixed-point contracts (16.16 coordinates, `>>7`
//! combine and blend scales, `>>8` bilinear weights). Cross-check tests
//! run a span through both and compare the touched buffers.
//!
//! The only deliberate divergence is perspective division: the generators
//! use the hardware reciprocal approximation, this module divides exactly.
//! Tests that sample textures drive the direct coordinate path to stay
//! bit-exact.

use scanjit_core::env::{PipelineEnv, ScanlineSpan, TexLevel};
use scanjit_core::selector::{
    AlphaCompare, AlphaFail, BlendAlpha, BlendInput, CoordMode, DepthCompare, DepthFormat,
    FbFormat, MipMode, PipelineSelector, TexFunction, WrapMode,
};

/// Run one span through the reference pipeline.
///
/// `width` is the group width of the generated code being mirrored, which
/// fixes the group boundaries for level selection and dither lanes.
///
/// # Safety
/// Same contract as the generated code: `env` buffers must cover the span
/// with rows padded to a whole group.
pub unsafe fn run_scanline(
    sel: PipelineSelector,
    env: &PipelineEnv,
    span: &ScanlineSpan,
    left: i32,
    right: i32,
    top: i32,
    width: usize,
) {
    let count = right - left;
    if count <= 0 {
        return;
    }

    for i in 0..count as usize {
        let lane = i % width;
        let group = (i / width) as i32;
        // Flat-shaded pipelines never step the color registers.
        let cgroup = if sel.iip() { group } else { 0 };
        let p = Pixel {
            sel,
            env,
            x: left + i as i32,
            y: top,
            lane,
            z: att_u32(&span.z, &span.z_step, lane, group),
            s: att_f32(&span.s, &span.s_step, lane, group),
            t: att_f32(&span.t, &span.t_step, lane, group),
            q: att_f32(&span.q, &span.q_step, lane, group),
            u: att_i32(&span.u, &span.u_step, lane, group),
            v: att_i32(&span.v, &span.v_step, lane, group),
            r: att_i32(&span.r, &span.r_step, lane, cgroup),
            g: att_i32(&span.g, &span.g_step, lane, cgroup),
            b: att_i32(&span.b, &span.b_step, lane, cgroup),
            a: att_i32(&span.a, &span.a_step, lane, cgroup),
            fog: att_i32(&span.fog, &span.fog_step, lane, group),
            cov: att_i32(&span.cov, &span.cov_step, lane, group),
            // Lane 0 of the group fixes the level, like the generators.
            group_q: att_f32(&span.q, &span.q_step, 0, group),
        };
        unsafe { p.shade() };
    }
}

fn att_i32(
    start: &scanjit_core::env::Vec8i,
    step: &scanjit_core::env::Vec8i,
    lane: usize,
    group: i32,
) -> i32 {
    start.0[lane].wrapping_add(step.0[lane].wrapping_mul(group))
}

fn att_u32(
    start: &scanjit_core::env::Vec8i,
    step: &scanjit_core::env::Vec8i,
    lane: usize,
    group: i32,
) -> u32 {
    att_i32(start, step, lane, group) as u32
}

fn att_f32(
    start: &scanjit_core::env::Vec8f,
    step: &scanjit_core::env::Vec8f,
    lane: usize,
    group: i32,
) -> f32 {
    start.0[lane] + step.0[lane] * group as f32
}

struct Pixel<'a> {
    sel: PipelineSelector,
    env: &'a PipelineEnv,
    x: i32,
    y: i32,
    lane: usize,
    z: u32,
    s: f32,
    t: f32,
    q: f32,
    u: i32,
    v: i32,
    r: i32,
    g: i32,
    b: i32,
    a: i32,
    fog: i32,
    cov: i32,
    group_q: f32,
}

impl Pixel<'_> {
    unsafe fn shade(&self) {
        let sel = self.sel;
        let env = self.env;

        let zb = (env.zb_base
            + self.y as i64 * env.zb_stride
            + self.x as i64 * zb_bpp(sel.depth_format())) as *mut u8;
        let fb = (env.fb_base
            + self.y as i64 * env.fb_stride
            + self.x as i64 * fb_bpp(sel.fb_format())) as *mut u8;

        // Depth test.
        if sel.ztest() {
            let buf = unsafe { read_depth(zb, sel.depth_format()) };
            let src = mask_depth(self.z, sel.depth_format());
            let (src, buf) = if sel.z_overflow() {
                (src >> 1, buf >> 1)
            } else {
                (src, buf)
            };
            let pass = match sel.depth_compare() {
                DepthCompare::GEqual => src >= buf,
                DepthCompare::Greater => src > buf,
            };
            if !pass {
                return;
            }
        }

        // Texture sample and combine.
        let (mut cr, mut cg, mut cb, mut ca) = if sel.tex_enabled() {
            let level = self.select_level();
            let (mut tr, mut tg, mut tb, mut ta) = unsafe { self.sample(level) };
            if sel.mip_mode() == MipMode::Trilinear {
                let fx = self.lod_fixed();
                let far = &self.env.tex[((fx >> 7) + 1).min(6) as usize];
                let frac = fx & 0x7F;
                let (fr, fg, fb2, fa) = unsafe { self.sample(far) };
                tr += (fr - tr) * frac >> 7;
                tg += (fg - tg) * frac >> 7;
                tb += (fb2 - tb) * frac >> 7;
                ta += (fa - ta) * frac >> 7;
            }
            self.combine(tr, tg, tb, ta)
        } else {
            (self.r >> 16, self.g >> 16, self.b >> 16, self.a >> 16)
        };

        if sel.edge() || sel.aa1() {
            ca = (ca * self.cov) >> 16;
        }

        // Alpha test.
        let mut zpass = true;
        let mut apass = true;
        if sel.alpha_test_effective() {
            let aref = env.aref.0[0];
            let pass = match sel.alpha_compare() {
                AlphaCompare::Always => true,
                AlphaCompare::Never => false,
                AlphaCompare::Less => ca < aref,
                AlphaCompare::LEqual => ca <= aref,
                AlphaCompare::Equal => ca == aref,
                AlphaCompare::GEqual => ca >= aref,
                AlphaCompare::Greater => ca > aref,
                AlphaCompare::NotEqual => ca != aref,
            };
            if !pass {
                match sel.alpha_fail() {
                    AlphaFail::Keep => return,
                    AlphaFail::FbOnly => zpass = false,
                    AlphaFail::ZbOnly => apass = false,
                    AlphaFail::RgbOnly => {
                        zpass = false;
                        apass = false;
                    }
                }
            }
        }

        // Fog.
        if sel.fog() {
            cr = fog_mix(cr, env.fog_r.0[0], self.fog);
            cg = fog_mix(cg, env.fog_g.0[0], self.fog);
            cb = fog_mix(cb, env.fog_b.0[0], self.fog);
        }

        // Frame buffer read.
        let (fr, fg, fbb, fa) = if sel.needs_fb_read() {
            unsafe { read_fb(fb, sel.fb_format()) }
        } else {
            (0, 0, 0, 0)
        };

        // Destination alpha test.
        if sel.dest_alpha_test() {
            let set = fa > 127;
            if set != sel.dest_alpha_mode() {
                return;
            }
        }

        // Depth write.
        if sel.zwrite() && zpass {
            unsafe { write_depth(zb, sel.depth_format(), self.z) };
        }

        if !sel.fwrite() {
            return;
        }

        // Blend.
        if sel.blend_enabled() {
            let blend_on = !sel.pabe() || ca > 127;
            if blend_on {
                let pick = |input: BlendInput, src: i32, dst: i32| match input {
                    BlendInput::Src => src,
                    BlendInput::Fb => dst,
                    BlendInput::Zero => 0,
                };
                let c = match sel.blend_c() {
                    BlendAlpha::SrcAlpha => ca,
                    BlendAlpha::FbAlpha => fa,
                    BlendAlpha::Fixed => env.afix.0[0],
                };
                let mix = |src: i32, dst: i32| {
                    let v = ((pick(sel.blend_a(), src, dst) - pick(sel.blend_b(), src, dst)) * c
                        >> 7)
                        + pick(sel.blend_d(), src, dst);
                    if sel.color_clamp() {
                        v.clamp(0, 255)
                    } else {
                        v & 0xFF
                    }
                };
                cr = mix(cr, fr);
                cg = mix(cg, fg);
                cb = mix(cb, fbb);
            }
        }

        // Alpha routing for RGB-only alpha fail.
        if sel.alpha_test() && sel.alpha_fail() == AlphaFail::RgbOnly && !apass {
            ca = fa;
        }
        if sel.fba() {
            ca |= env.fba_mask.0[0];
        }
        if sel.alpha_test() && sel.alpha_fail() == AlphaFail::ZbOnly && !apass {
            return;
        }

        unsafe { self.write_fb(fb, cr, cg, cb, ca) };
    }

    /// 8.7 fixed-point group LOD from the first lane's q.
    fn lod_fixed(&self) -> i32 {
        let qf = (self.group_q.to_bits() >> 16 & 0x7FFF) as i32;
        let fx = ((self.env.lod + 127) << 7) - qf;
        fx.clamp(0, 6 << 7)
    }

    fn select_level(&self) -> &TexLevel {
        let sel = self.sel;
        if sel.mip_mode() == MipMode::Off {
            return &self.env.tex[0];
        }
        if sel.mip_mode() == MipMode::Trilinear {
            return &self.env.tex[(self.lod_fixed() >> 7) as usize];
        }
        let level = if sel.mip_const_lod() {
            self.env.lod
        } else {
            let exp = (self.group_q.to_bits() >> 23 & 0xFF) as i32;
            self.env.lod + 127 - exp
        };
        &self.env.tex[level.clamp(0, 6) as usize]
    }

    /// Texel coordinates in 16.16.
    fn tex_uv(&self) -> (i32, i32) {
        match self.sel.coord_mode() {
            CoordMode::Uv => (self.u, self.v),
            CoordMode::Stq => {
                let rq = 1.0 / self.q;
                (
                    (self.s * rq * 65536.0) as i32,
                    (self.t * rq * 65536.0) as i32,
                )
            }
        }
    }

    unsafe fn sample(&self, level: &TexLevel) -> (i32, i32, i32, i32) {
        let (u, v) = self.tex_uv();
        if !self.sel.bilinear() {
            let texel = unsafe {
                self.fetch(
                    level,
                    wrap(u >> 16, self.sel.wrap_u(), level, false),
                    wrap(v >> 16, self.sel.wrap_v(), level, true),
                )
            };
            return unpack32(texel);
        }

        let uf = u.wrapping_sub(0x8000);
        let vf = v.wrapping_sub(0x8000);
        let fu = (uf >> 8) & 0xFF;
        let fv = (vf >> 8) & 0xFF;
        let u0 = wrap(uf >> 16, self.sel.wrap_u(), level, false);
        let u1 = wrap((uf >> 16) + 1, self.sel.wrap_u(), level, false);
        let v0 = wrap(vf >> 16, self.sel.wrap_v(), level, true);
        let v1 = wrap((vf >> 16) + 1, self.sel.wrap_v(), level, true);

        let c00 = unpack32(unsafe { self.fetch(level, u0, v0) });
        let c01 = unpack32(unsafe { self.fetch(level, u1, v0) });
        let c10 = unpack32(unsafe { self.fetch(level, u0, v1) });
        let c11 = unpack32(unsafe { self.fetch(level, u1, v1) });

        let lerp = |a: i32, b: i32, f: i32| a + ((b - a) * f >> 8);
        let chan = |a: i32, b: i32, c: i32, d: i32| lerp(lerp(a, b, fu), lerp(c, d, fu), fv);
        (
            chan(c00.0, c01.0, c10.0, c11.0),
            chan(c00.1, c01.1, c10.1, c11.1),
            chan(c00.2, c01.2, c10.2, c11.2),
            chan(c00.3, c01.3, c10.3, c11.3),
        )
    }

    unsafe fn fetch(&self, level: &TexLevel, u: i32, v: i32) -> u32 {
        let row = level.base + v as i64 * level.stride;
        if self.sel.indexed() {
            let idx = unsafe { *((row + u as i64) as *const u8) };
            unsafe { *((self.env.palette + idx as i64 * 4) as *const u32) }
        } else {
            unsafe { *((row + u as i64 * 4) as *const u32) }
        }
    }

    fn combine(&self, tr: i32, tg: i32, tb: i32, ta: i32) -> (i32, i32, i32, i32) {
        let sel = self.sel;
        let (vr, vg, vb, va) = (self.r >> 16, self.g >> 16, self.b >> 16, self.a >> 16);
        let modulate = |t: i32, v: i32| (t * v >> 7).min(255);
        match sel.tex_function() {
            TexFunction::Decal => (tr, tg, tb, if sel.tcc() { ta } else { va }),
            TexFunction::Modulate => (
                modulate(tr, vr),
                modulate(tg, vg),
                modulate(tb, vb),
                if sel.tcc() { modulate(ta, va) } else { va },
            ),
            TexFunction::Highlight => (
                (modulate(tr, vr) + va).min(255),
                (modulate(tg, vg) + va).min(255),
                (modulate(tb, vb) + va).min(255),
                if sel.tcc() { (ta + va).min(255) } else { va },
            ),
            TexFunction::HighlightA => (
                (modulate(tr, vr) + va).min(255),
                (modulate(tg, vg) + va).min(255),
                (modulate(tb, vb) + va).min(255),
                if sel.tcc() { ta } else { va },
            ),
        }
    }

    unsafe fn write_fb(&self, fb: *mut u8, cr: i32, cg: i32, cb: i32, ca: i32) {
        match self.sel.fb_format() {
            FbFormat::C32 => {
                let pix = (cr as u32 & 0xFF)
                    | (cg as u32 & 0xFF) << 8
                    | (cb as u32 & 0xFF) << 16
                    | (ca as u32 & 0xFF) << 24;
                unsafe { *(fb as *mut u32) = pix };
            }
            FbFormat::C24 => {
                let keep = unsafe { *(fb as *mut u32) } & 0xFF00_0000;
                let pix = (cr as u32 & 0xFF) | (cg as u32 & 0xFF) << 8 | (cb as u32 & 0xFF) << 16;
                unsafe { *(fb as *mut u32) = keep | pix };
            }
            FbFormat::C16 => {
                let (mut r, mut g, mut b) = (cr, cg, cb);
                if self.sel.dither() {
                    let d = self.env.dither[(self.y & 3) as usize].0[self.lane];
                    r = (r + d).clamp(0, 255);
                    g = (g + d).clamp(0, 255);
                    b = (b + d).clamp(0, 255);
                }
                let pix = (r as u16 >> 3)
                    | (g as u16 >> 3) << 5
                    | (b as u16 >> 3) << 10
                    | (((ca as u16) << 8) & 0x8000);
                unsafe { *(fb as *mut u16) = pix };
            }
        }
    }
}

fn fb_bpp(fmt: FbFormat) -> i64 {
    match fmt {
        FbFormat::C16 => 2,
        _ => 4,
    }
}

fn zb_bpp(fmt: DepthFormat) -> i64 {
    match fmt {
        DepthFormat::Z16 => 2,
        _ => 4,
    }
}

fn mask_depth(z: u32, fmt: DepthFormat) -> u32 {
    match fmt {
        DepthFormat::Z32 => z,
        DepthFormat::Z24 => z & 0x00FF_FFFF,
        DepthFormat::Z16 => z & 0xFFFF,
    }
}

unsafe fn read_depth(zb: *const u8, fmt: DepthFormat) -> u32 {
    match fmt {
        DepthFormat::Z32 => unsafe { *(zb as *const u32) },
        DepthFormat::Z24 => (unsafe { *(zb as *const u32) }) & 0x00FF_FFFF,
        DepthFormat::Z16 => (unsafe { *(zb as *const u16) }) as u32,
    }
}

unsafe fn write_depth(zb: *mut u8, fmt: DepthFormat, z: u32) {
    match fmt {
        DepthFormat::Z32 => unsafe { *(zb as *mut u32) = z },
        DepthFormat::Z24 => {
            let keep = unsafe { *(zb as *mut u32) } & 0xFF00_0000;
            unsafe { *(zb as *mut u32) = keep | (z & 0x00FF_FFFF) };
        }
        DepthFormat::Z16 => unsafe { *(zb as *mut u16) = (z & 0xFFFF) as u16 },
    }
}

unsafe fn read_fb(fb: *const u8, fmt: FbFormat) -> (i32, i32, i32, i32) {
    match fmt {
        FbFormat::C32 => unpack32_i(unsafe { *(fb as *const u32) }),
        FbFormat::C24 => {
            let (r, g, b, _) = unpack32_i(unsafe { *(fb as *const u32) });
            // No stored alpha; read back as opaque 0x80.
            (r, g, b, 0x80)
        }
        FbFormat::C16 => {
            let p = unsafe { *(fb as *const u16) } as i32;
            (
                (p & 0x1F) << 3,
                (p >> 5 & 0x1F) << 3,
                (p >> 10 & 0x1F) << 3,
                (p >> 15) << 7,
            )
        }
    }
}

fn unpack32(texel: u32) -> (i32, i32, i32, i32) {
    unpack32_i(texel)
}

fn unpack32_i(p: u32) -> (i32, i32, i32, i32) {
    (
        (p & 0xFF) as i32,
        (p >> 8 & 0xFF) as i32,
        (p >> 16 & 0xFF) as i32,
        (p >> 24) as i32,
    )
}

fn wrap(c: i32, mode: WrapMode, level: &TexLevel, vertical: bool) -> i32 {
    let (and, or, min, max) = if vertical {
        (level.v_and, level.v_or, level.v_min, level.v_max)
    } else {
        (level.u_and, level.u_or, level.u_min, level.u_max)
    };
    match mode {
        WrapMode::Repeat | WrapMode::RegionRepeat => (c & and) | or,
        WrapMode::Clamp | WrapMode::RegionClamp => c.clamp(min, max),
    }
}

fn fog_mix(c: i32, fogc: i32, f: i32) -> i32 {
    fogc + ((c - fogc) * f >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_repeat_masks_and_ors() {
        let level = TexLevel {
            u_and: 0x3F,
            u_or: 0,
            ..TexLevel::default()
        };
        assert_eq!(wrap(0x47, WrapMode::Repeat, &level, false), 7);
        assert_eq!(wrap(-1, WrapMode::Repeat, &level, false), 0x3F);
    }

    #[test]
    fn wrap_clamp_pins_to_bounds() {
        let level = TexLevel {
            u_min: 2,
            u_max: 61,
            ..TexLevel::default()
        };
        assert_eq!(wrap(-5, WrapMode::Clamp, &level, false), 2);
        assert_eq!(wrap(100, WrapMode::Clamp, &level, false), 61);
        assert_eq!(wrap(30, WrapMode::Clamp, &level, false), 30);
    }

    #[test]
    fn fog_mix_endpoints() {
        assert_eq!(fog_mix(200, 50, 0), 50);
        assert_eq!(fog_mix(200, 50, 1 << 16), 200);
    }

    #[test]
    fn bilinear_weight_midpoint() {
        // Texel-center offset puts fu/fv at 0 on exact centers.
        let uf = (5 << 16) + 0x8000_i32;
        assert_eq!((uf - 0x8000) >> 8 & 0xFF, 0);

        // Halfway between centers lands on the midpoint weight.
        let mid = 5 << 16;
        assert_eq!((mid - 0x8000) >> 8 & 0xFF, 0x80);
    }
}
