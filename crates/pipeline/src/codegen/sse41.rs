//! 4-pixel SSE4.1 scanline generator.
//!
//! The generated function processes one scanline in groups of four pixels.
//! Configuration is baked in: stages the selector turns off are simply not
//! emitted, and the remaining stages contain no configuration branches.
//!
//! ABI (`sysv64`): `fn(left: i32, right: i32, top: i32,
//! span: *const ScanlineSpan, env: *const PipelineEnv)`. `right` is
//! exclusive. `span` and `env` must be 32-byte aligned. Rows must be padded
//! to a whole group so masked read-modify-write of the last group stays in
//! bounds.
//!
//! Register map. Persistent across the loop:
//! - xmm2: lane validity mask (-1 = pixel alive)
//! - xmm3: z; xmm4-6: s/t/q (or u/v); xmm7-10: rgba in 16.16; xmm11: fog
//! - rcx: span, r8: env, r9: fb row cursor, r10: zb row cursor,
//!   r11d: remaining pixels, r14: tail mask table
//! - xmm0/1 and xmm12-15 are scratch; xmm12-15 carry the combined pixel
//!   color (0..255 per 32-bit lane) from the texture stage onward.

use core::mem::offset_of;

use scanjit_asm::{AsmError, CodeBuffer, Cond, Gpr, Label, Mem, Xmm};
use scanjit_core::consts;
use scanjit_core::env::{PipelineEnv, ScanlineSpan, TexLevel, Vec8f, Vec8i};
use scanjit_core::selector::{
    AlphaCompare, AlphaFail, BlendAlpha, BlendInput, CoordMode, DepthCompare, DepthFormat,
    FbFormat, MipMode, PipelineSelector, TexFunction, WrapMode,
};

use super::ScanlineCodeGen;

pub struct Sse41Generator;

impl ScanlineCodeGen for Sse41Generator {
    fn width(&self) -> usize {
        4
    }

    fn generate(&self, sel: PipelineSelector, buf: &mut CodeBuffer) -> Result<(), AsmError> {
        Session::new(sel, buf)?.run()
    }
}

// Scalar registers.
const SPAN: Gpr = Gpr::RCX;
const ENV: Gpr = Gpr::R8;
const FB: Gpr = Gpr::R9;
const ZB: Gpr = Gpr::R10;
const COUNT: Gpr = Gpr::R11;
const TAIL: Gpr = Gpr::R14;
const LVL: Gpr = Gpr::R12;

// Vector registers.
const T0: Xmm = Xmm(0);
const T1: Xmm = Xmm(1);
const VALID: Xmm = Xmm(2);
const Z: Xmm = Xmm(3);
const S: Xmm = Xmm(4); // u in direct coordinate mode
const T: Xmm = Xmm(5); // v in direct coordinate mode
const Q: Xmm = Xmm(6);
const VR: Xmm = Xmm(7);
const VG: Xmm = Xmm(8);
const VB: Xmm = Xmm(9);
const VA: Xmm = Xmm(10);
const FOG: Xmm = Xmm(11);
const CR: Xmm = Xmm(12);
const CG: Xmm = Xmm(13);
const CB: Xmm = Xmm(14);
const CA: Xmm = Xmm(15);

// Stack frame: 16-byte spill slots, frame is 16-byte aligned after the
// prologue pushes.
const FRAME: i32 = 0x150;
const SLOT_U0: i32 = 0x00;
const SLOT_U1: i32 = 0x10;
const SLOT_V0: i32 = 0x20;
const SLOT_V1: i32 = 0x30;
const SLOT_FU: i32 = 0x40;
const SLOT_FV: i32 = 0x50;
// The texel corner slots double as the frame-buffer channel spill; the
// texture stage is finished before the frame buffer is read.
const SLOT_T00: i32 = 0x60;
const SLOT_T01: i32 = 0x70;
const SLOT_T10: i32 = 0x80;
const SLOT_T11: i32 = 0x90;
const SLOT_FB_R: i32 = 0x60;
const SLOT_FB_G: i32 = 0x70;
const SLOT_FB_B: i32 = 0x80;
const SLOT_FB_A: i32 = 0x90;
const SLOT_ZPASS: i32 = 0xA0;
const SLOT_APASS: i32 = 0xB0;
const SLOT_COV: i32 = 0xC0;
const SLOT_SPARE: i32 = 0xD0;
const SLOT_DROW: i32 = 0xE0;

// Trilinear spill area: the near-level sample, the splatted mip fraction
// and the far-level descriptor pointer.
const SLOT_L0R: i32 = 0xF0;
const SLOT_L0G: i32 = 0x100;
const SLOT_L0B: i32 = 0x110;
const SLOT_L0A: i32 = 0x120;
const SLOT_LFRAC: i32 = 0x130;
const SLOT_LVL1: i32 = 0x140;

fn addr_i(table: &'static Vec8i) -> u64 {
    table as *const Vec8i as u64
}

fn addr_f(table: &'static Vec8f) -> u64 {
    table as *const Vec8f as u64
}

fn env_mem(off: usize) -> Mem {
    Mem::base(ENV).disp(off as i32)
}

fn span_mem(off: usize) -> Mem {
    Mem::base(SPAN).disp(off as i32)
}

fn slot(disp: i32) -> Mem {
    Mem::base(Gpr::RSP).disp(disp)
}

fn lvl_mem(off: usize) -> Mem {
    Mem::base(LVL).disp(off as i32)
}

struct Session<'a> {
    sel: PipelineSelector,
    b: &'a mut CodeBuffer,
    loop_top: Label,
    group_done: Label,
    ret: Label,
}

impl<'a> Session<'a> {
    fn new(sel: PipelineSelector, b: &'a mut CodeBuffer) -> Result<Session<'a>, AsmError> {
        let loop_top = b.new_label();
        let group_done = b.new_label();
        let ret = b.new_label();
        Ok(Session {
            sel,
            b,
            loop_top,
            group_done,
            ret,
        })
    }

    fn uses_z(&self) -> bool {
        self.sel.ztest() || self.sel.zwrite()
    }

    fn uses_cov(&self) -> bool {
        self.sel.edge() || self.sel.aa1()
    }

    /// The q attribute feeds the computed LOD even in direct coordinate mode.
    fn uses_group_q(&self) -> bool {
        self.sel.tex_enabled()
            && self.sel.mip_mode() != MipMode::Off
            && !self.sel.mip_const_lod()
    }

    fn uses_zpass(&self) -> bool {
        self.sel.alpha_test()
            && matches!(self.sel.alpha_fail(), AlphaFail::FbOnly | AlphaFail::RgbOnly)
    }

    fn uses_apass(&self) -> bool {
        self.sel.alpha_test()
            && matches!(self.sel.alpha_fail(), AlphaFail::ZbOnly | AlphaFail::RgbOnly)
    }

    fn fb_shift(&self) -> u8 {
        match self.sel.fb_format() {
            FbFormat::C16 => 1,
            _ => 2,
        }
    }

    fn zb_shift(&self) -> u8 {
        match self.sel.depth_format() {
            DepthFormat::Z16 => 1,
            _ => 2,
        }
    }

    /// Address a static table through rax.
    fn table(&mut self, addr: u64) -> Result<Mem, AsmError> {
        self.b.mov_ri(Gpr::RAX, addr)?;
        Ok(Mem::base(Gpr::RAX))
    }

    /// Splat a 32-bit scalar from memory into all lanes of `dst`.
    fn splat_from(&mut self, dst: Xmm, src: Mem) -> Result<(), AsmError> {
        self.b.movd_load(dst, src)?;
        self.b.pshufd(dst, dst, 0x00)
    }

    fn run(mut self) -> Result<(), AsmError> {
        self.prologue()?;

        let loop_top = self.loop_top;
        self.b.define_label(loop_top)?;
        self.group_mask()?;

        if self.sel.ztest() {
            self.depth_test()?;
        }
        if self.sel.tex_enabled() {
            self.texture()?;
        } else {
            self.flat_color()?;
        }
        self.combine()?;
        if self.uses_cov() {
            self.coverage_alpha()?;
        }
        if self.sel.alpha_test_effective() {
            self.alpha_test()?;
        }
        if self.sel.fog() {
            self.fog()?;
        }
        if self.sel.needs_fb_read() {
            self.fb_read()?;
        }
        if self.sel.dest_alpha_test() {
            self.dest_alpha_test()?;
        }
        if self.sel.zwrite() {
            self.depth_write()?;
        }
        if self.sel.fwrite() {
            if self.sel.blend_enabled() {
                self.blend()?;
            }
            self.fb_write()?;
        }

        let group_done = self.group_done;
        self.b.define_label(group_done)?;
        self.step()?;
        self.epilogue()
    }

    // ── prologue / epilogue ───────────────────────────────────────────────

    fn prologue(&mut self) -> Result<(), AsmError> {
        // Pixel count; nothing to do for empty spans.
        self.b.mov32_rr(COUNT, Gpr::RSI)?;
        self.b.sub32_rr(COUNT, Gpr::RDI)?;
        let ret = self.ret;
        self.b.jcc(Cond::Le, ret)?;

        self.b.push_r(Gpr::RBX)?;
        self.b.push_r(Gpr::R12)?;
        self.b.push_r(Gpr::R13)?;
        self.b.push_r(Gpr::R14)?;
        self.b.push_r(Gpr::R15)?;
        self.b.sub_ri(Gpr::RSP, FRAME)?;

        self.b.mov_ri(TAIL, consts::TAIL_MASK.as_ptr() as u64)?;

        // Frame buffer row cursor.
        if self.sel.fwrite() || self.sel.needs_fb_read() {
            self.b.mov_rm(FB, env_mem(offset_of!(PipelineEnv, fb_base)))?;
            self.b.movsxd(Gpr::RAX, Gpr::RDX)?;
            self.b
                .imul_rm(Gpr::RAX, env_mem(offset_of!(PipelineEnv, fb_stride)))?;
            self.b.add_rr(FB, Gpr::RAX)?;
            self.b.movsxd(Gpr::RAX, Gpr::RDI)?;
            self.b.shl_ri(Gpr::RAX, self.fb_shift())?;
            self.b.add_rr(FB, Gpr::RAX)?;
        }

        // Depth buffer row cursor.
        if self.uses_z() {
            self.b.mov_rm(ZB, env_mem(offset_of!(PipelineEnv, zb_base)))?;
            self.b.movsxd(Gpr::RAX, Gpr::RDX)?;
            self.b
                .imul_rm(Gpr::RAX, env_mem(offset_of!(PipelineEnv, zb_stride)))?;
            self.b.add_rr(ZB, Gpr::RAX)?;
            self.b.movsxd(Gpr::RAX, Gpr::RDI)?;
            self.b.shl_ri(Gpr::RAX, self.zb_shift())?;
            self.b.add_rr(ZB, Gpr::RAX)?;
        }

        // Dither row for this scanline.
        if self.sel.dither() {
            self.b.mov32_rr(Gpr::RAX, Gpr::RDX)?;
            self.b.and32_ri(Gpr::RAX, 3)?;
            self.b.shl_ri(Gpr::RAX, 5)?;
            let row = Mem::base(ENV)
                .index(Gpr::RAX, 1)?
                .disp(offset_of!(PipelineEnv, dither) as i32);
            self.b.lea(Gpr::RAX, row)?;
            self.b.mov_mr(slot(SLOT_DROW), Gpr::RAX)?;
        }

        // Interpolator start values.
        if self.uses_z() {
            self.b.movdqa(Z, span_mem(offset_of!(ScanlineSpan, z)))?;
        }
        if self.sel.tex_enabled() {
            match self.sel.coord_mode() {
                CoordMode::Stq => {
                    self.b.movaps(S, span_mem(offset_of!(ScanlineSpan, s)))?;
                    self.b.movaps(T, span_mem(offset_of!(ScanlineSpan, t)))?;
                    self.b.movaps(Q, span_mem(offset_of!(ScanlineSpan, q)))?;
                }
                CoordMode::Uv => {
                    self.b.movdqa(S, span_mem(offset_of!(ScanlineSpan, u)))?;
                    self.b.movdqa(T, span_mem(offset_of!(ScanlineSpan, v)))?;
                    if self.uses_group_q() {
                        self.b.movaps(Q, span_mem(offset_of!(ScanlineSpan, q)))?;
                    }
                }
            }
        }
        self.b.movdqa(VR, span_mem(offset_of!(ScanlineSpan, r)))?;
        self.b.movdqa(VG, span_mem(offset_of!(ScanlineSpan, g)))?;
        self.b.movdqa(VB, span_mem(offset_of!(ScanlineSpan, b)))?;
        self.b.movdqa(VA, span_mem(offset_of!(ScanlineSpan, a)))?;
        if self.sel.fog() {
            self.b.movdqa(FOG, span_mem(offset_of!(ScanlineSpan, fog)))?;
        }
        if self.uses_cov() {
            self.b.movdqa(T0, span_mem(offset_of!(ScanlineSpan, cov)))?;
            self.b.movdqa_store(slot(SLOT_COV), T0)?;
        }
        Ok(())
    }

    fn epilogue(&mut self) -> Result<(), AsmError> {
        self.b.add_ri(Gpr::RSP, FRAME)?;
        self.b.pop_r(Gpr::R15)?;
        self.b.pop_r(Gpr::R14)?;
        self.b.pop_r(Gpr::R13)?;
        self.b.pop_r(Gpr::R12)?;
        self.b.pop_r(Gpr::RBX)?;
        let ret = self.ret;
        self.b.define_label(ret)?;
        self.b.ret()
    }

    // ── per-group stages ──────────────────────────────────────────────────

    /// `VALID = TAIL_MASK[min(count, 4)]`, plus per-group mask slot resets.
    fn group_mask(&mut self) -> Result<(), AsmError> {
        self.b.mov32_rr(Gpr::RAX, COUNT)?;
        self.b.mov32_ri(Gpr::RBX, 4)?;
        self.b.cmp32_rr(Gpr::RAX, Gpr::RBX)?;
        self.b.cmov32(Cond::G, Gpr::RAX, Gpr::RBX)?;
        self.b.shl32_ri(Gpr::RAX, 5)?;
        self.b.movdqa(VALID, Mem::base(TAIL).index(Gpr::RAX, 1)?)?;

        if self.uses_zpass() {
            self.b.pcmpeqd(T0, T0)?;
            self.b.movdqa_store(slot(SLOT_ZPASS), T0)?;
        }
        if self.uses_apass() {
            self.b.pcmpeqd(T0, T0)?;
            self.b.movdqa_store(slot(SLOT_APASS), T0)?;
        }
        Ok(())
    }

    /// Load the depth-buffer group widened to 32-bit lanes into `dst`.
    fn load_zbuf(&mut self, dst: Xmm) -> Result<(), AsmError> {
        match self.sel.depth_format() {
            DepthFormat::Z32 => self.b.movdqu(dst, Mem::base(ZB)),
            DepthFormat::Z24 => {
                self.b.movdqu(dst, Mem::base(ZB))?;
                let mask = self.table(addr_i(&consts::RGB_MASK))?;
                self.b.pand(dst, mask)
            }
            DepthFormat::Z16 => {
                self.b.movq_load(dst, Mem::base(ZB))?;
                self.b.pmovzxwd(dst, dst)
            }
        }
    }

    /// Copy of the source z masked to the depth format's width.
    fn src_z(&mut self, dst: Xmm) -> Result<(), AsmError> {
        self.b.movdqa(dst, Z)?;
        match self.sel.depth_format() {
            DepthFormat::Z32 => Ok(()),
            DepthFormat::Z24 => {
                let mask = self.table(addr_i(&consts::RGB_MASK))?;
                self.b.pand(dst, mask)
            }
            DepthFormat::Z16 => {
                let mask = self.table(addr_i(&consts::WORD_MAX))?;
                self.b.pand(dst, mask)
            }
        }
    }

    fn depth_test(&mut self) -> Result<(), AsmError> {
        // T0 = buffer, T1 = source.
        self.load_zbuf(T0)?;
        self.src_z(T1)?;

        if self.sel.z_overflow() {
            // 33-bit source range: compare on halved values so the sign
            // trick below still orders correctly.
            self.b.psrld_ri(T0, 1)?;
            self.b.psrld_ri(T1, 1)?;
        } else if self.sel.depth_format() == DepthFormat::Z32 {
            // Unsigned compare via signed pcmpgtd needs the sign bias; the
            // narrower formats never reach the sign bit.
            let bias = self.table(addr_i(&consts::SIGN_BIAS))?;
            self.b.pxor(T0, bias)?;
            self.b.pxor(T1, bias)?;
        }

        match self.sel.depth_compare() {
            DepthCompare::GEqual => {
                // fail where buffer > source
                self.b.pcmpgtd(T0, T1)?;
                self.b.pandn(T0, VALID)?;
                self.b.movdqa(VALID, T0)?;
            }
            DepthCompare::Greater => {
                // pass where source > buffer
                self.b.pcmpgtd(T1, T0)?;
                self.b.pand(VALID, T1)?;
            }
        }

        // Whole group rejected: skip to stepping.
        self.b.movmskps(Gpr::RAX, VALID)?;
        self.b.test32_rr(Gpr::RAX, Gpr::RAX)?;
        let done = self.group_done;
        self.b.jcc(Cond::E, done)
    }

    // ── texture sampling ──────────────────────────────────────────────────

    /// Point the level register at the mip level for this group.
    fn select_level(&mut self) -> Result<(), AsmError> {
        let tex_off = offset_of!(PipelineEnv, tex) as i32;
        if self.sel.mip_mode() == MipMode::Off {
            self.b.lea(LVL, Mem::base(ENV).disp(tex_off))?;
            return Ok(());
        }

        if self.sel.mip_mode() == MipMode::Trilinear {
            // 8.7 fixed-point group LOD from the first lane's q:
            // lod_fx = ((lod + 127) << 7) - (exponent(q0) << 7 | mant7(q0)).
            self.b.pextrd(Gpr::RBX, Q, 0)?;
            self.b.shr32_ri(Gpr::RBX, 16)?;
            self.b.and32_ri(Gpr::RBX, 0x7FFF)?;
            self.b
                .mov32_rm(Gpr::RAX, env_mem(offset_of!(PipelineEnv, lod)))?;
            self.b.add32_ri(Gpr::RAX, 127)?;
            self.b.shl32_ri(Gpr::RAX, 7)?;
            self.b.sub32_rr(Gpr::RAX, Gpr::RBX)?;

            self.b.mov32_ri(Gpr::RBX, 0)?;
            self.b.cmp32_ri(Gpr::RAX, 0)?;
            self.b.cmov32(Cond::L, Gpr::RAX, Gpr::RBX)?;
            self.b.mov32_ri(Gpr::RBX, 6 << 7)?;
            self.b.cmp32_ri(Gpr::RAX, 6 << 7)?;
            self.b.cmov32(Cond::G, Gpr::RAX, Gpr::RBX)?;

            // Splat the fraction for the level lerp.
            self.b.mov32_rr(Gpr::RDX, Gpr::RAX)?;
            self.b.and32_ri(Gpr::RDX, 0x7F)?;
            self.b.movd_load(T0, Gpr::RDX)?;
            self.b.pshufd(T0, T0, 0)?;
            self.b.movdqa_store(slot(SLOT_LFRAC), T0)?;

            // Near level in LVL, far level pointer spilled for the second
            // sampling pass.
            self.b.shr32_ri(Gpr::RAX, 7)?;
            self.b.lea32(Gpr::RBX, Mem::base(Gpr::RAX).disp(1))?;
            self.b.mov32_ri(Gpr::RDX, 6)?;
            self.b.cmp32_ri(Gpr::RBX, 6)?;
            self.b.cmov32(Cond::G, Gpr::RBX, Gpr::RDX)?;
            self.b.shl32_ri(Gpr::RAX, 6)?;
            self.b
                .lea(LVL, Mem::base(ENV).index(Gpr::RAX, 1)?.disp(tex_off))?;
            self.b.shl32_ri(Gpr::RBX, 6)?;
            self.b
                .lea(Gpr::RAX, Mem::base(ENV).index(Gpr::RBX, 1)?.disp(tex_off))?;
            return self.b.mov_mr(slot(SLOT_LVL1), Gpr::RAX);
        }

        if self.sel.mip_const_lod() {
            self.b
                .mov32_rm(Gpr::RAX, env_mem(offset_of!(PipelineEnv, lod)))?;
        } else {
            // Group LOD from the first lane's q exponent:
            // level = lod + 127 - exponent(q0).
            self.b.pextrd(Gpr::RBX, Q, 0)?;
            self.b.shr32_ri(Gpr::RBX, 23)?;
            self.b.and32_ri(Gpr::RBX, 0xFF)?;
            self.b
                .mov32_rm(Gpr::RAX, env_mem(offset_of!(PipelineEnv, lod)))?;
            self.b.add32_ri(Gpr::RAX, 127)?;
            self.b.sub32_rr(Gpr::RAX, Gpr::RBX)?;
        }

        // Clamp to the available levels.
        self.b.mov32_ri(Gpr::RBX, 0)?;
        self.b.cmp32_ri(Gpr::RAX, 0)?;
        self.b.cmov32(Cond::L, Gpr::RAX, Gpr::RBX)?;
        self.b.mov32_ri(Gpr::RBX, 6)?;
        self.b.cmp32_ri(Gpr::RAX, 6)?;
        self.b.cmov32(Cond::G, Gpr::RAX, Gpr::RBX)?;
        self.b.shl32_ri(Gpr::RAX, 6)?;
        self.b
            .lea(LVL, Mem::base(ENV).index(Gpr::RAX, 1)?.disp(tex_off))
    }

    /// Produce 16.16 texel coordinates in CR (u) and CG (v).
    fn tex_coords(&mut self) -> Result<(), AsmError> {
        match self.sel.coord_mode() {
            CoordMode::Uv => {
                self.b.movdqa(CR, S)?;
                self.b.movdqa(CG, T)?;
                Ok(())
            }
            CoordMode::Stq => {
                self.b.rcpps(T0, Q)?;
                let scale = self.table(addr_f(&consts::TEX_SCALE))?;
                self.b.movaps(T1, S)?;
                self.b.mulps(T1, T0)?;
                self.b.mulps(T1, scale)?;
                self.b.cvttps2dq(CR, T1)?;
                self.b.movaps(T1, T)?;
                self.b.mulps(T1, T0)?;
                self.b.mulps(T1, scale)?;
                self.b.cvttps2dq(CG, T1)
            }
        }
    }

    /// Apply one axis' addressing mode to integer texel coordinates in
    /// `reg`. Repeat shapes use the and/or pair, clamp shapes min/max.
    fn wrap_axis(&mut self, reg: Xmm, mode: WrapMode, vertical: bool) -> Result<(), AsmError> {
        let (and_off, or_off, min_off, max_off) = if vertical {
            (
                offset_of!(TexLevel, v_and),
                offset_of!(TexLevel, v_or),
                offset_of!(TexLevel, v_min),
                offset_of!(TexLevel, v_max),
            )
        } else {
            (
                offset_of!(TexLevel, u_and),
                offset_of!(TexLevel, u_or),
                offset_of!(TexLevel, u_min),
                offset_of!(TexLevel, u_max),
            )
        };
        match mode {
            WrapMode::Repeat | WrapMode::RegionRepeat => {
                self.splat_from(T1, lvl_mem(and_off))?;
                self.b.pand(reg, T1)?;
                self.splat_from(T1, lvl_mem(or_off))?;
                self.b.por(reg, T1)
            }
            WrapMode::Clamp | WrapMode::RegionClamp => {
                self.splat_from(T1, lvl_mem(min_off))?;
                self.b.pmaxsd(reg, T1)?;
                self.splat_from(T1, lvl_mem(max_off))?;
                self.b.pminsd(reg, T1)
            }
        }
    }

    /// Fetch one texel per lane at integer coordinates (u, v) into `dst`.
    /// Clobbers rax/rbx/rdx/r13/r15.
    fn fetch_texels(&mut self, dst: Xmm, u: Xmm, v: Xmm) -> Result<(), AsmError> {
        self.b
            .mov_rm(Gpr::RDX, lvl_mem(offset_of!(TexLevel, base)))?;
        if self.sel.indexed() {
            self.b
                .mov_rm(Gpr::R13, env_mem(offset_of!(PipelineEnv, palette)))?;
        }
        for lane in 0..4 {
            self.b.pextrd(Gpr::RAX, v, lane)?;
            self.b.movsxd(Gpr::R15, Gpr::RAX)?;
            self.b
                .imul_rm(Gpr::R15, lvl_mem(offset_of!(TexLevel, stride)))?;
            self.b.add_rr(Gpr::R15, Gpr::RDX)?;
            self.b.pextrd(Gpr::RBX, u, lane)?;
            self.b.movsxd(Gpr::RBX, Gpr::RBX)?;
            if self.sel.indexed() {
                self.b
                    .movzx32_rm8(Gpr::RAX, Mem::base(Gpr::R15).index(Gpr::RBX, 1)?)?;
                self.b
                    .mov32_rm(Gpr::RAX, Mem::base(Gpr::R13).index(Gpr::RAX, 4)?)?;
            } else {
                self.b
                    .mov32_rm(Gpr::RAX, Mem::base(Gpr::R15).index(Gpr::RBX, 4)?)?;
            }
            self.b.pinsrd(dst, Gpr::RAX, lane)?;
        }
        Ok(())
    }

    /// Split a packed RGBA32 lane vector into four channel vectors written
    /// to the given slots (values 0..255 in 32-bit lanes).
    fn deswizzle_to_slots(
        &mut self,
        src: Xmm,
        slots: [i32; 4],
    ) -> Result<(), AsmError> {
        let mask = self.table(addr_i(&consts::BYTE_MASK))?;
        for (i, dst) in slots.into_iter().enumerate() {
            self.b.movdqa(T1, src)?;
            if i > 0 {
                self.b.psrld_ri(T1, (i * 8) as u8)?;
            }
            if i < 3 {
                self.b.pand(T1, mask)?;
            }
            self.b.movdqa_store(slot(dst), T1)?;
        }
        Ok(())
    }

    fn texture(&mut self) -> Result<(), AsmError> {
        self.select_level()?;
        self.tex_coords()?;

        if self.sel.bilinear() {
            self.bilinear_sample()?;
        } else {
            self.point_sample()?;
        }

        if self.sel.mip_mode() == MipMode::Trilinear {
            self.far_level_lerp()?;
        }
        Ok(())
    }

    /// Sample the far mip level and lerp toward it by the spilled fraction.
    fn far_level_lerp(&mut self) -> Result<(), AsmError> {
        let near = [
            (CR, SLOT_L0R),
            (CG, SLOT_L0G),
            (CB, SLOT_L0B),
            (CA, SLOT_L0A),
        ];
        for (c, sl) in near {
            self.b.movdqa_store(slot(sl), c)?;
        }

        self.b.mov_rm(LVL, slot(SLOT_LVL1))?;
        self.tex_coords()?;
        if self.sel.bilinear() {
            self.bilinear_sample()?;
        } else {
            self.point_sample()?;
        }

        // c = near + ((far - near) * frac >> 7), per channel.
        for (c, sl) in near {
            self.b.psubd(c, slot(sl))?;
            self.b.pmulld(c, slot(SLOT_LFRAC))?;
            self.b.psrad_ri(c, 7)?;
            self.b.paddd(c, slot(sl))?;
        }
        Ok(())
    }

    fn point_sample(&mut self) -> Result<(), AsmError> {
        self.b.psrad_ri(CR, 16)?;
        self.b.psrad_ri(CG, 16)?;
        self.wrap_axis(CR, self.sel.wrap_u(), false)?;
        self.wrap_axis(CG, self.sel.wrap_v(), true)?;
        self.fetch_texels(T0, CR, CG)?;

        // Deswizzle straight into the pixel color registers.
        let mask = self.table(addr_i(&consts::BYTE_MASK))?;
        self.b.movdqa(CR, T0)?;
        self.b.pand(CR, mask)?;
        self.b.movdqa(CG, T0)?;
        self.b.psrld_ri(CG, 8)?;
        self.b.pand(CG, mask)?;
        self.b.movdqa(CB, T0)?;
        self.b.psrld_ri(CB, 16)?;
        self.b.pand(CB, mask)?;
        self.b.movdqa(CA, T0)?;
        self.b.psrld_ri(CA, 24)
    }

    fn bilinear_sample(&mut self) -> Result<(), AsmError> {
        // Half-texel center offset, then split into integer corner
        // coordinates and 8-bit interpolation weights.
        let half = self.table(addr_i(&consts::ALPHA_BIT_C16))?; // 0x8000
        self.b.psubd(CR, half)?;
        self.b.psubd(CG, half)?;

        let byte = self.table(addr_i(&consts::BYTE_MASK))?;
        self.b.movdqa(T0, CR)?;
        self.b.psrad_ri(T0, 8)?;
        self.b.pand(T0, byte)?;
        self.b.movdqa_store(slot(SLOT_FU), T0)?;
        self.b.movdqa(T0, CG)?;
        self.b.psrad_ri(T0, 8)?;
        self.b.pand(T0, byte)?;
        self.b.movdqa_store(slot(SLOT_FV), T0)?;

        self.b.psrad_ri(CR, 16)?;
        self.b.psrad_ri(CG, 16)?;

        // u0/u1 and v0/v1, each wrapped independently. `x + 1` is built by
        // subtracting all-ones.
        self.b.pcmpeqd(T1, T1)?;
        self.b.movdqa(T0, CR)?;
        self.b.psubd(T0, T1)?;
        self.b.movdqa_store(slot(SLOT_U1), T0)?;
        self.b.movdqa(T0, CG)?;
        self.b.psubd(T0, T1)?;
        self.b.movdqa_store(slot(SLOT_V1), T0)?;

        self.wrap_axis(CR, self.sel.wrap_u(), false)?;
        self.b.movdqa_store(slot(SLOT_U0), CR)?;
        self.wrap_axis(CG, self.sel.wrap_v(), true)?;
        self.b.movdqa_store(slot(SLOT_V0), CG)?;
        self.b.movdqa(T0, slot(SLOT_U1))?;
        self.wrap_axis(T0, self.sel.wrap_u(), false)?;
        self.b.movdqa_store(slot(SLOT_U1), T0)?;
        self.b.movdqa(T0, slot(SLOT_V1))?;
        self.wrap_axis(T0, self.sel.wrap_v(), true)?;
        self.b.movdqa_store(slot(SLOT_V1), T0)?;

        // Four corner fetches.
        for (u_slot, v_slot, out) in [
            (SLOT_U0, SLOT_V0, SLOT_T00),
            (SLOT_U1, SLOT_V0, SLOT_T01),
            (SLOT_U0, SLOT_V1, SLOT_T10),
            (SLOT_U1, SLOT_V1, SLOT_T11),
        ] {
            self.b.movdqa(CR, slot(u_slot))?;
            self.b.movdqa(CG, slot(v_slot))?;
            self.fetch_texels(T0, CR, CG)?;
            self.b.movdqa_store(slot(out), T0)?;
        }

        // Per-channel bilinear lerp in 32-bit lanes:
        // top = c00 + ((c01-c00)*fu >> 8), bottom likewise,
        // out = top + ((bottom-top)*fv >> 8).
        // All intermediates stay far below 2^31.
        for (ch, out) in [(0u8, SLOT_U0), (1, SLOT_U1), (2, SLOT_V0), (3, SLOT_V1)] {
            self.extract_channel(T0, SLOT_T00, ch)?;
            self.extract_channel(T1, SLOT_T01, ch)?;
            self.b.psubd(T1, T0)?;
            self.b.pmulld(T1, slot(SLOT_FU))?;
            self.b.psrad_ri(T1, 8)?;
            self.b.paddd(T0, T1)?;
            self.b.movdqa(CB, T0)?; // top row

            self.extract_channel(T0, SLOT_T10, ch)?;
            self.extract_channel(T1, SLOT_T11, ch)?;
            self.b.psubd(T1, T0)?;
            self.b.pmulld(T1, slot(SLOT_FU))?;
            self.b.psrad_ri(T1, 8)?;
            self.b.paddd(T0, T1)?;

            self.b.psubd(T0, CB)?;
            self.b.pmulld(T0, slot(SLOT_FV))?;
            self.b.psrad_ri(T0, 8)?;
            self.b.paddd(T0, CB)?;
            self.b.movdqa_store(slot(out), T0)?;
        }

        // The corner slots were consumed above; the channel results reuse
        // the coordinate slots.
        self.b.movdqa(CR, slot(SLOT_U0))?;
        self.b.movdqa(CG, slot(SLOT_U1))?;
        self.b.movdqa(CB, slot(SLOT_V0))?;
        self.b.movdqa(CA, slot(SLOT_V1))
    }

    /// Channel `ch` of the packed corner spilled at `src_slot`, into `dst`.
    fn extract_channel(&mut self, dst: Xmm, src_slot: i32, ch: u8) -> Result<(), AsmError> {
        self.b.movdqa(dst, slot(src_slot))?;
        if ch > 0 {
            self.b.psrld_ri(dst, ch * 8)?;
        }
        if ch < 3 {
            let mask = self.table(addr_i(&consts::BYTE_MASK))?;
            self.b.pand(dst, mask)?;
        }
        Ok(())
    }

    /// No texture: pixel color is the interpolated vertex color.
    fn flat_color(&mut self) -> Result<(), AsmError> {
        for (dst, src) in [(CR, VR), (CG, VG), (CB, VB), (CA, VA)] {
            self.b.movdqa(dst, src)?;
            self.b.psrad_ri(dst, 16)?;
        }
        Ok(())
    }

    /// Combine the sampled texel with the vertex color.
    fn combine(&mut self) -> Result<(), AsmError> {
        if !self.sel.tex_enabled() {
            return Ok(());
        }
        let tfx = self.sel.tex_function();
        let tcc = self.sel.tcc();

        match tfx {
            TexFunction::Decal => {
                if !tcc {
                    self.b.movdqa(CA, VA)?;
                    self.b.psrad_ri(CA, 16)?;
                }
                Ok(())
            }
            TexFunction::Modulate => {
                let max = self.table(addr_i(&consts::CHAN_MAX))?;
                for (c, v) in [(CR, VR), (CG, VG), (CB, VB)] {
                    self.b.movdqa(T1, v)?;
                    self.b.psrad_ri(T1, 16)?;
                    self.b.pmulld(c, T1)?;
                    self.b.psrad_ri(c, 7)?;
                    self.b.pminsd(c, max)?;
                }
                if tcc {
                    self.b.movdqa(T1, VA)?;
                    self.b.psrad_ri(T1, 16)?;
                    self.b.pmulld(CA, T1)?;
                    self.b.psrad_ri(CA, 7)?;
                    self.b.pminsd(CA, max)?;
                } else {
                    self.b.movdqa(CA, VA)?;
                    self.b.psrad_ri(CA, 16)?;
                }
                Ok(())
            }
            TexFunction::Highlight | TexFunction::HighlightA => {
                let max = self.table(addr_i(&consts::CHAN_MAX))?;
                // T0 = vertex alpha, used as the highlight addend.
                self.b.movdqa(T0, VA)?;
                self.b.psrad_ri(T0, 16)?;
                for (c, v) in [(CR, VR), (CG, VG), (CB, VB)] {
                    self.b.movdqa(T1, v)?;
                    self.b.psrad_ri(T1, 16)?;
                    self.b.pmulld(c, T1)?;
                    self.b.psrad_ri(c, 7)?;
                    self.b.paddd(c, T0)?;
                    self.b.pminsd(c, max)?;
                }
                if !tcc {
                    self.b.movdqa(CA, T0)?;
                } else if tfx == TexFunction::Highlight {
                    self.b.paddd(CA, T0)?;
                    self.b.pminsd(CA, max)?;
                }
                // HighlightA with tcc keeps the texel alpha as-is.
                Ok(())
            }
        }
    }

    /// Edge coverage scales alpha: a = (a * cov) >> 16.
    fn coverage_alpha(&mut self) -> Result<(), AsmError> {
        self.b.movdqa(T0, CA)?;
        self.b.pmulld(T0, slot(SLOT_COV))?;
        self.b.psrad_ri(T0, 16)?;
        self.b.movdqa(CA, T0)
    }

    fn alpha_test(&mut self) -> Result<(), AsmError> {
        let aref = env_mem(offset_of!(PipelineEnv, aref));
        // Pass mask into T0.
        match self.sel.alpha_compare() {
            AlphaCompare::Always => unreachable!("canonicalized out by the selector builder"),
            AlphaCompare::Never => self.b.pxor(T0, T0)?,
            AlphaCompare::Less => {
                self.b.movdqa(T0, aref)?;
                self.b.pcmpgtd(T0, CA)?;
            }
            AlphaCompare::LEqual => {
                self.b.movdqa(T0, CA)?;
                self.b.pcmpgtd(T0, aref)?;
                self.b.pcmpeqd(T1, T1)?;
                self.b.pxor(T0, T1)?;
            }
            AlphaCompare::Equal => {
                self.b.movdqa(T0, CA)?;
                self.b.pcmpeqd(T0, aref)?;
            }
            AlphaCompare::GEqual => {
                self.b.movdqa(T0, aref)?;
                self.b.pcmpgtd(T0, CA)?;
                self.b.pcmpeqd(T1, T1)?;
                self.b.pxor(T0, T1)?;
            }
            AlphaCompare::Greater => {
                self.b.movdqa(T0, CA)?;
                self.b.pcmpgtd(T0, aref)?;
            }
            AlphaCompare::NotEqual => {
                self.b.movdqa(T0, CA)?;
                self.b.pcmpeqd(T0, aref)?;
                self.b.pcmpeqd(T1, T1)?;
                self.b.pxor(T0, T1)?;
            }
        }

        match self.sel.alpha_fail() {
            AlphaFail::Keep => {
                self.b.pand(VALID, T0)?;
                self.b.movmskps(Gpr::RAX, VALID)?;
                self.b.test32_rr(Gpr::RAX, Gpr::RAX)?;
                let done = self.group_done;
                self.b.jcc(Cond::E, done)
            }
            AlphaFail::FbOnly => {
                self.b.movdqa(T1, slot(SLOT_ZPASS))?;
                self.b.pand(T1, T0)?;
                self.b.movdqa_store(slot(SLOT_ZPASS), T1)
            }
            AlphaFail::ZbOnly => {
                self.b.movdqa(T1, slot(SLOT_APASS))?;
                self.b.pand(T1, T0)?;
                self.b.movdqa_store(slot(SLOT_APASS), T1)
            }
            AlphaFail::RgbOnly => {
                self.b.movdqa(T1, slot(SLOT_ZPASS))?;
                self.b.pand(T1, T0)?;
                self.b.movdqa_store(slot(SLOT_ZPASS), T1)?;
                self.b.movdqa(T1, slot(SLOT_APASS))?;
                self.b.pand(T1, T0)?;
                self.b.movdqa_store(slot(SLOT_APASS), T1)
            }
        }
    }

    /// c = fog_color + ((c - fog_color) * f >> 16), rgb only.
    fn fog(&mut self) -> Result<(), AsmError> {
        for (c, color_off) in [
            (CR, offset_of!(PipelineEnv, fog_r)),
            (CG, offset_of!(PipelineEnv, fog_g)),
            (CB, offset_of!(PipelineEnv, fog_b)),
        ] {
            self.b.movdqa(T0, c)?;
            self.b.psubd(T0, env_mem(color_off))?;
            self.b.pmulld(T0, FOG)?;
            self.b.psrad_ri(T0, 16)?;
            self.b.paddd(T0, env_mem(color_off))?;
            self.b.movdqa(c, T0)?;
        }
        Ok(())
    }

    /// Load the current frame-buffer group and spill its channels.
    fn fb_read(&mut self) -> Result<(), AsmError> {
        match self.sel.fb_format() {
            FbFormat::C32 => {
                self.b.movdqu(T0, Mem::base(FB))?;
                self.deswizzle_to_slots(T0, [SLOT_FB_R, SLOT_FB_G, SLOT_FB_B, SLOT_FB_A])
            }
            FbFormat::C24 => {
                self.b.movdqu(T0, Mem::base(FB))?;
                self.deswizzle_to_slots(T0, [SLOT_FB_R, SLOT_FB_G, SLOT_FB_B, SLOT_FB_A])?;
                // No destination alpha channel; treat it as opaque 0x80.
                self.b.mov32_ri(Gpr::RAX, 0x80)?;
                self.b.movd_load(T1, Gpr::RAX)?;
                self.b.pshufd(T1, T1, 0x00)?;
                self.b.movdqa_store(slot(SLOT_FB_A), T1)
            }
            FbFormat::C16 => {
                self.b.movq_load(T0, Mem::base(FB))?;
                self.b.pmovzxwd(T0, T0)?;
                // 1555 -> channel vectors, expanded to 8-bit range.
                let five = self.table(addr_i(&consts::MASK_5BIT))?;
                for (shift, out) in [(0u8, SLOT_FB_R), (5, SLOT_FB_G), (10, SLOT_FB_B)] {
                    self.b.movdqa(T1, T0)?;
                    if shift > 0 {
                        self.b.psrld_ri(T1, shift)?;
                    }
                    self.b.pand(T1, five)?;
                    self.b.pslld_ri(T1, 3)?;
                    self.b.movdqa_store(slot(out), T1)?;
                }
                self.b.movdqa(T1, T0)?;
                self.b.psrld_ri(T1, 15)?;
                self.b.pslld_ri(T1, 7)?;
                self.b.movdqa_store(slot(SLOT_FB_A), T1)
            }
        }
    }

    fn dest_alpha_test(&mut self) -> Result<(), AsmError> {
        let threshold = self.table(addr_i(&consts::PABE_THRESHOLD))?;
        self.b.movdqa(T0, slot(SLOT_FB_A))?;
        self.b.pcmpgtd(T0, threshold)?;
        if !self.sel.dest_alpha_mode() {
            // Pass on clear.
            self.b.pcmpeqd(T1, T1)?;
            self.b.pxor(T0, T1)?;
        }
        self.b.pand(VALID, T0)?;
        self.b.movmskps(Gpr::RAX, VALID)?;
        self.b.test32_rr(Gpr::RAX, Gpr::RAX)?;
        let done = self.group_done;
        self.b.jcc(Cond::E, done)
    }

    fn depth_write(&mut self) -> Result<(), AsmError> {
        // Write mask.
        self.b.movdqa(T0, VALID)?;
        if self.uses_zpass() {
            self.b.pand(T0, slot(SLOT_ZPASS))?;
        }

        match self.sel.depth_format() {
            DepthFormat::Z32 | DepthFormat::Z24 => {
                if self.sel.depth_format() == DepthFormat::Z24 {
                    // Keep the byte above the 24-bit depth untouched.
                    let mask = self.table(addr_i(&consts::RGB_MASK))?;
                    self.b.pand(T0, mask)?;
                }
                self.b.movdqu(T1, Mem::base(ZB))?;
                self.b.movdqa_store(slot(SLOT_SPARE), T1)?;
                self.b.pxor(T1, Z)?;
                self.b.pand(T0, T1)?;
                self.b.pxor(T0, slot(SLOT_SPARE))?;
                self.b.movdqu_store(Mem::base(ZB), T0)
            }
            DepthFormat::Z16 => {
                self.b.movq_load(T1, Mem::base(ZB))?;
                self.b.pmovzxwd(T1, T1)?;
                self.b.movdqa_store(slot(SLOT_SPARE), T1)?;
                self.src_z(T1)?;
                self.b.pxor(T1, slot(SLOT_SPARE))?;
                self.b.pand(T0, T1)?;
                self.b.pxor(T0, slot(SLOT_SPARE))?;
                self.b.packusdw(T0, T0)?;
                self.b.movq_store(Mem::base(ZB), T0)
            }
        }
    }

    // ── blending and frame-buffer write ───────────────────────────────────

    /// `((a - b) * c >> 7) + d` per rgb channel over 32-bit lanes, with the
    /// optional per-pixel enable and the clamp/wrap policy.
    fn blend(&mut self) -> Result<(), AsmError> {
        let a = self.sel.blend_a();
        let bsel = self.sel.blend_b();
        let c = self.sel.blend_c();
        let d = self.sel.blend_d();

        for (creg, fb_slot) in [(CR, SLOT_FB_R), (CG, SLOT_FB_G), (CB, SLOT_FB_B)] {
            match a {
                BlendInput::Src => self.b.movdqa(T0, creg)?,
                BlendInput::Fb => self.b.movdqa(T0, slot(fb_slot))?,
                BlendInput::Zero => self.b.pxor(T0, T0)?,
            }
            match bsel {
                BlendInput::Src => self.b.psubd(T0, creg)?,
                BlendInput::Fb => self.b.psubd(T0, slot(fb_slot))?,
                BlendInput::Zero => {}
            }
            match c {
                BlendAlpha::SrcAlpha => self.b.pmulld(T0, CA)?,
                BlendAlpha::FbAlpha => self.b.pmulld(T0, slot(SLOT_FB_A))?,
                BlendAlpha::Fixed => {
                    self.b
                        .pmulld(T0, env_mem(offset_of!(PipelineEnv, afix)))?
                }
            }
            self.b.psrad_ri(T0, 7)?;
            match d {
                BlendInput::Src => self.b.paddd(T0, creg)?,
                BlendInput::Fb => self.b.paddd(T0, slot(fb_slot))?,
                BlendInput::Zero => {}
            }

            if self.sel.color_clamp() {
                self.b.pxor(T1, T1)?;
                self.b.pmaxsd(T0, T1)?;
                let max = self.table(addr_i(&consts::CHAN_MAX))?;
                self.b.pminsd(T0, max)?;
            } else {
                let mask = self.table(addr_i(&consts::BYTE_MASK))?;
                self.b.pand(T0, mask)?;
            }

            if self.sel.pabe() {
                // Blend only lanes whose source alpha has the MSB set.
                let threshold = self.table(addr_i(&consts::PABE_THRESHOLD))?;
                self.b.movdqa(T1, CA)?;
                self.b.pcmpgtd(T1, threshold)?;
                self.b.pxor(T0, creg)?;
                self.b.pand(T0, T1)?;
                self.b.pxor(T0, creg)?;
            }
            self.b.movdqa(creg, T0)?;
        }
        Ok(())
    }

    fn fb_write(&mut self) -> Result<(), AsmError> {
        // Alpha routing for RGB-only alpha fail: failed lanes keep the
        // destination alpha.
        if self.sel.alpha_test() && self.sel.alpha_fail() == AlphaFail::RgbOnly {
            self.b.movdqa(T1, slot(SLOT_APASS))?;
            self.b.movdqa(T0, CA)?;
            self.b.pxor(T0, slot(SLOT_FB_A))?;
            self.b.pand(T0, T1)?;
            self.b.pxor(T0, slot(SLOT_FB_A))?;
            self.b.movdqa(CA, T0)?;
        }
        if self.sel.fba() {
            self.b
                .por(CA, env_mem(offset_of!(PipelineEnv, fba_mask)))?;
        }

        match self.sel.fb_format() {
            FbFormat::C32 => self.fb_write_c32(),
            FbFormat::C24 => self.fb_write_c24(),
            FbFormat::C16 => self.fb_write_c16(),
        }
    }

    /// Pack CR/CG/CB/CA into 32-bit pixels in T0.
    fn pack_c32(&mut self) -> Result<(), AsmError> {
        self.b.movdqa(T0, CR)?;
        self.b.movdqa(T1, CG)?;
        self.b.pslld_ri(T1, 8)?;
        self.b.por(T0, T1)?;
        self.b.movdqa(T1, CB)?;
        self.b.pslld_ri(T1, 16)?;
        self.b.por(T0, T1)?;
        self.b.movdqa(T1, CA)?;
        self.b.pslld_ri(T1, 24)?;
        self.b.por(T0, T1)
    }

    /// Write mask (valid lanes, minus a ZbOnly alpha fail) into T1.
    fn write_mask(&mut self) -> Result<(), AsmError> {
        self.b.movdqa(T1, VALID)?;
        if self.sel.alpha_test() && self.sel.alpha_fail() == AlphaFail::ZbOnly {
            self.b.pand(T1, slot(SLOT_APASS))?;
        }
        Ok(())
    }

    fn fb_write_c32(&mut self) -> Result<(), AsmError> {
        self.pack_c32()?;
        self.write_mask()?;

        // Whole group alive: straight store. Otherwise merge with the
        // destination under the mask.
        self.b.movmskps(Gpr::RAX, T1)?;
        self.b.cmp32_ri(Gpr::RAX, 0xF)?;
        let slow = self.b.new_label();
        let done = self.b.new_label();
        self.b.jcc_short(Cond::Ne, slow)?;
        self.b.movdqu_store(Mem::base(FB), T0)?;
        self.b.jmp_short(done)?;
        self.b.define_label(slow)?;
        self.b.movdqu(CG, Mem::base(FB))?;
        self.b.pxor(T0, CG)?;
        self.b.pand(T0, T1)?;
        self.b.pxor(T0, CG)?;
        self.b.movdqu_store(Mem::base(FB), T0)?;
        self.b.define_label(done)
    }

    fn fb_write_c24(&mut self) -> Result<(), AsmError> {
        self.pack_c32()?;
        self.write_mask()?;
        // Only the low three bytes of each written lane change.
        let mask = self.table(addr_i(&consts::RGB_MASK))?;
        self.b.pand(T1, mask)?;
        self.b.movdqu(CG, Mem::base(FB))?;
        self.b.pxor(T0, CG)?;
        self.b.pand(T0, T1)?;
        self.b.pxor(T0, CG)?;
        self.b.movdqu_store(Mem::base(FB), T0)
    }

    fn fb_write_c16(&mut self) -> Result<(), AsmError> {
        if self.sel.dither() {
            self.b.mov_rm(Gpr::RAX, slot(SLOT_DROW))?;
            for c in [CR, CG, CB] {
                self.b.paddd(c, Mem::base(Gpr::RAX))?;
            }
            self.b.pxor(T1, T1)?;
            let max = self.table(addr_i(&consts::CHAN_MAX))?;
            for c in [CR, CG, CB] {
                self.b.pmaxsd(c, T1)?;
                self.b.pminsd(c, max)?;
            }
        }

        // Pack 8888 -> 1555.
        self.b.movdqa(T0, CR)?;
        self.b.psrld_ri(T0, 3)?;
        self.b.movdqa(T1, CG)?;
        self.b.psrld_ri(T1, 3)?;
        self.b.pslld_ri(T1, 5)?;
        self.b.por(T0, T1)?;
        self.b.movdqa(T1, CB)?;
        self.b.psrld_ri(T1, 3)?;
        self.b.pslld_ri(T1, 10)?;
        self.b.por(T0, T1)?;
        self.b.movdqa(T1, CA)?;
        self.b.pslld_ri(T1, 8)?;
        let bit = self.table(addr_i(&consts::ALPHA_BIT_C16))?;
        self.b.pand(T1, bit)?;
        self.b.por(T0, T1)?;

        self.write_mask()?;
        self.b.movq_load(CG, Mem::base(FB))?;
        self.b.pmovzxwd(CG, CG)?;
        self.b.pxor(T0, CG)?;
        self.b.pand(T0, T1)?;
        self.b.pxor(T0, CG)?;
        self.b.packusdw(T0, T0)?;
        self.b.movq_store(Mem::base(FB), T0)
    }

    // ── stepping ──────────────────────────────────────────────────────────

    fn step(&mut self) -> Result<(), AsmError> {
        if self.sel.fwrite() || self.sel.needs_fb_read() {
            self.b.add_ri(FB, 4 << self.fb_shift())?;
        }
        if self.uses_z() {
            self.b.add_ri(ZB, 4 << self.zb_shift())?;
        }
        if self.uses_z() && !self.sel.sprite() {
            self.b
                .paddd(Z, span_mem(offset_of!(ScanlineSpan, z_step)))?;
        }
        if self.sel.tex_enabled() {
            match self.sel.coord_mode() {
                CoordMode::Stq => {
                    self.b
                        .addps(S, span_mem(offset_of!(ScanlineSpan, s_step)))?;
                    self.b
                        .addps(T, span_mem(offset_of!(ScanlineSpan, t_step)))?;
                    self.b
                        .addps(Q, span_mem(offset_of!(ScanlineSpan, q_step)))?;
                }
                CoordMode::Uv => {
                    self.b
                        .paddd(S, span_mem(offset_of!(ScanlineSpan, u_step)))?;
                    self.b
                        .paddd(T, span_mem(offset_of!(ScanlineSpan, v_step)))?;
                    if self.uses_group_q() {
                        self.b
                            .addps(Q, span_mem(offset_of!(ScanlineSpan, q_step)))?;
                    }
                }
            }
        }
        if self.sel.iip() {
            self.b
                .paddd(VR, span_mem(offset_of!(ScanlineSpan, r_step)))?;
            self.b
                .paddd(VG, span_mem(offset_of!(ScanlineSpan, g_step)))?;
            self.b
                .paddd(VB, span_mem(offset_of!(ScanlineSpan, b_step)))?;
            self.b
                .paddd(VA, span_mem(offset_of!(ScanlineSpan, a_step)))?;
        }
        if self.sel.fog() {
            self.b
                .paddd(FOG, span_mem(offset_of!(ScanlineSpan, fog_step)))?;
        }
        if self.uses_cov() {
            self.b.movdqa(T0, slot(SLOT_COV))?;
            self.b
                .paddd(T0, span_mem(offset_of!(ScanlineSpan, cov_step)))?;
            self.b.movdqa_store(slot(SLOT_COV), T0)?;
        }

        self.b.sub32_ri(COUNT, 4)?;
        let top = self.loop_top;
        self.b.jcc(Cond::G, top)
    }
}
