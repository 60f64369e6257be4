//! 8-pixel AVX2 scanline generator.
//!
//! Same stage structure and numeric behavior as the SSE4.1 generator, at
//! twice the group width. Texels come in through `vpgatherdd`, and partial
//! groups go out through `vpmaskmovd` for the 32-bit frame-buffer formats,
//! so only 16-bit rows rely on group padding.
//!
//! The register roles mirror the 4-wide generator, widened to ymm.

use core::mem::offset_of;

use scanjit_asm::{AsmError, CodeBuffer, Cond, Gpr, Label, Mem, Scale, Ymm};
use scanjit_core::consts;
use scanjit_core::env::{PipelineEnv, ScanlineSpan, TexLevel, Vec8f, Vec8i};
use scanjit_core::selector::{
    AlphaCompare, AlphaFail, BlendAlpha, BlendInput, CoordMode, DepthCompare, DepthFormat,
    FbFormat, MipMode, PipelineSelector, TexFunction, WrapMode,
};

use super::ScanlineCodeGen;

pub struct Avx2Generator;

impl ScanlineCodeGen for Avx2Generator {
    fn width(&self) -> usize {
        8
    }

    fn generate(&self, sel: PipelineSelector, buf: &mut CodeBuffer) -> Result<(), AsmError> {
        Session::new(sel, buf)?.run()
    }
}

const SPAN: Gpr = Gpr::RCX;
const ENV: Gpr = Gpr::R8;
const FB: Gpr = Gpr::R9;
const ZB: Gpr = Gpr::R10;
const COUNT: Gpr = Gpr::R11;
const TAIL: Gpr = Gpr::R14;
const LVL: Gpr = Gpr::R12;

const T0: Ymm = Ymm(0);
const T1: Ymm = Ymm(1);
const VALID: Ymm = Ymm(2);
const Z: Ymm = Ymm(3);
const S: Ymm = Ymm(4);
const T: Ymm = Ymm(5);
const Q: Ymm = Ymm(6);
const VR: Ymm = Ymm(7);
const VG: Ymm = Ymm(8);
const VB: Ymm = Ymm(9);
const VA: Ymm = Ymm(10);
const FOG: Ymm = Ymm(11);
const CR: Ymm = Ymm(12);
const CG: Ymm = Ymm(13);
const CB: Ymm = Ymm(14);
const CA: Ymm = Ymm(15);

// 32-byte spill slots. The frame keeps rsp 16-byte aligned; slots are not
// guaranteed 32-byte aligned, so all slot traffic is unaligned.
const FRAME: i32 = 0x300;
const SLOT_U0: i32 = 0x00;
const SLOT_U1: i32 = 0x20;
const SLOT_V0: i32 = 0x40;
const SLOT_V1: i32 = 0x60;
const SLOT_FU: i32 = 0x80;
const SLOT_FV: i32 = 0xA0;
const SLOT_T00: i32 = 0xC0;
const SLOT_T01: i32 = 0xE0;
const SLOT_T10: i32 = 0x100;
const SLOT_T11: i32 = 0x120;
const SLOT_FB_R: i32 = 0xC0;
const SLOT_FB_G: i32 = 0xE0;
const SLOT_FB_B: i32 = 0x100;
const SLOT_FB_A: i32 = 0x120;
const SLOT_ZPASS: i32 = 0x140;
const SLOT_APASS: i32 = 0x160;
const SLOT_COV: i32 = 0x180;
const SLOT_SPARE: i32 = 0x1A0;
// Coordinate scratch for the scalar indexed-texture fetch.
const SLOT_SCR_U: i32 = 0x1C0;
const SLOT_SCR_V: i32 = 0x1E0;
const SLOT_SCR_T: i32 = 0x200;
const SLOT_DROW: i32 = 0x220;

// Trilinear spill area: the near-level sample, the splatted mip fraction
// and the far-level descriptor pointer.
const SLOT_L0R: i32 = 0x240;
const SLOT_L0G: i32 = 0x260;
const SLOT_L0B: i32 = 0x280;
const SLOT_L0A: i32 = 0x2A0;
const SLOT_LFRAC: i32 = 0x2C0;
const SLOT_LVL1: i32 = 0x2E0;

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

    fn table(&mut self, addr: u64) -> Result<Mem, AsmError> {
        self.b.mov_ri(Gpr::RAX, addr)?;
        Ok(Mem::base(Gpr::RAX))
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

    fn prologue(&mut self) -> Result<(), AsmError> {
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

        if self.uses_z() {
            self.b.vmovdqa(Z, span_mem(offset_of!(ScanlineSpan, z)))?;
        }
        if self.sel.tex_enabled() {
            match self.sel.coord_mode() {
                CoordMode::Stq => {
                    self.b.vmovdqa(S, span_mem(offset_of!(ScanlineSpan, s)))?;
                    self.b.vmovdqa(T, span_mem(offset_of!(ScanlineSpan, t)))?;
                    self.b.vmovdqa(Q, span_mem(offset_of!(ScanlineSpan, q)))?;
                }
                CoordMode::Uv => {
                    self.b.vmovdqa(S, span_mem(offset_of!(ScanlineSpan, u)))?;
                    self.b.vmovdqa(T, span_mem(offset_of!(ScanlineSpan, v)))?;
                    if self.uses_group_q() {
                        self.b.vmovdqa(Q, span_mem(offset_of!(ScanlineSpan, q)))?;
                    }
                }
            }
        }
        self.b.vmovdqa(VR, span_mem(offset_of!(ScanlineSpan, r)))?;
        self.b.vmovdqa(VG, span_mem(offset_of!(ScanlineSpan, g)))?;
        self.b.vmovdqa(VB, span_mem(offset_of!(ScanlineSpan, b)))?;
        self.b.vmovdqa(VA, span_mem(offset_of!(ScanlineSpan, a)))?;
        if self.sel.fog() {
            self.b.vmovdqa(FOG, span_mem(offset_of!(ScanlineSpan, fog)))?;
        }
        if self.uses_cov() {
            self.b.vmovdqa(T0, span_mem(offset_of!(ScanlineSpan, cov)))?;
            self.b.vmovdqu_store(slot(SLOT_COV), T0)?;
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
        self.b.vzeroupper()?;
        self.b.ret()
    }

    fn group_mask(&mut self) -> Result<(), AsmError> {
        self.b.mov32_rr(Gpr::RAX, COUNT)?;
        self.b.mov32_ri(Gpr::RBX, 8)?;
        self.b.cmp32_rr(Gpr::RAX, Gpr::RBX)?;
        self.b.cmov32(Cond::G, Gpr::RAX, Gpr::RBX)?;
        self.b.shl32_ri(Gpr::RAX, 5)?;
        self.b.vmovdqa(VALID, Mem::base(TAIL).index(Gpr::RAX, 1)?)?;

        if self.uses_zpass() {
            self.b.vpcmpeqd(T0, T0, T0)?;
            self.b.vmovdqu_store(slot(SLOT_ZPASS), T0)?;
        }
        if self.uses_apass() {
            self.b.vpcmpeqd(T0, T0, T0)?;
            self.b.vmovdqu_store(slot(SLOT_APASS), T0)?;
        }
        Ok(())
    }

    fn load_zbuf(&mut self, dst: Ymm) -> Result<(), AsmError> {
        match self.sel.depth_format() {
            DepthFormat::Z32 => self.b.vpmaskmovd_load(dst, VALID, Mem::base(ZB)),
            DepthFormat::Z24 => {
                self.b.vpmaskmovd_load(dst, VALID, Mem::base(ZB))?;
                let mask = self.table(addr_i(&consts::RGB_MASK))?;
                self.b.vpand(dst, dst, mask)
            }
            DepthFormat::Z16 => self.b.vpmovzxwd(dst, Mem::base(ZB)),
        }
    }

    fn src_z(&mut self, dst: Ymm) -> Result<(), AsmError> {
        match self.sel.depth_format() {
            DepthFormat::Z32 => {
                if dst.0 != Z.0 {
                    self.b.vmovdqa(dst, Z)?;
                }
                Ok(())
            }
            DepthFormat::Z24 => {
                let mask = self.table(addr_i(&consts::RGB_MASK))?;
                self.b.vpand(dst, Z, mask)
            }
            DepthFormat::Z16 => {
                let mask = self.table(addr_i(&consts::WORD_MAX))?;
                self.b.vpand(dst, Z, mask)
            }
        }
    }

    fn depth_test(&mut self) -> Result<(), AsmError> {
        self.load_zbuf(T0)?;
        self.src_z(T1)?;

        if self.sel.z_overflow() {
            self.b.vpsrld_ri(T0, T0, 1)?;
            self.b.vpsrld_ri(T1, T1, 1)?;
        } else if self.sel.depth_format() == DepthFormat::Z32 {
            let bias = self.table(addr_i(&consts::SIGN_BIAS))?;
            self.b.vpxor(T0, T0, bias)?;
            self.b.vpxor(T1, T1, bias)?;
        }

        match self.sel.depth_compare() {
            DepthCompare::GEqual => {
                self.b.vpcmpgtd(T0, T0, T1)?;
                self.b.vpandn(VALID, T0, VALID)?;
            }
            DepthCompare::Greater => {
                self.b.vpcmpgtd(T1, T1, T0)?;
                self.b.vpand(VALID, VALID, T1)?;
            }
        }

        self.b.vmovmskps(Gpr::RAX, VALID)?;
        self.b.test32_rr(Gpr::RAX, Gpr::RAX)?;
        let done = self.group_done;
        self.b.jcc(Cond::E, done)
    }

    fn select_level(&mut self) -> Result<(), AsmError> {
        let tex_off = offset_of!(PipelineEnv, tex) as i32;
        if self.sel.mip_mode() == MipMode::Off {
            self.b.lea(LVL, Mem::base(ENV).disp(tex_off))?;
            return Ok(());
        }

        if self.sel.mip_mode() == MipMode::Trilinear {
            // 8.7 fixed-point group LOD from the first lane's q:
            // lod_fx = ((lod + 127) << 7) - (exponent(q0) << 7 | mant7(q0)).
            self.b.vmovd_store(Gpr::RBX, Q.xmm())?;
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
            self.b.vmovd_load(T0.xmm(), Gpr::RDX)?;
            self.b.vpbroadcastd(T0, T0.xmm())?;
            self.b.vmovdqu_store(slot(SLOT_LFRAC), T0)?;

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
            self.b.vmovd_store(Gpr::RBX, Q.xmm())?;
            self.b.shr32_ri(Gpr::RBX, 23)?;
            self.b.and32_ri(Gpr::RBX, 0xFF)?;
            self.b
                .mov32_rm(Gpr::RAX, env_mem(offset_of!(PipelineEnv, lod)))?;
            self.b.add32_ri(Gpr::RAX, 127)?;
            self.b.sub32_rr(Gpr::RAX, Gpr::RBX)?;
        }

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

    fn tex_coords(&mut self) -> Result<(), AsmError> {
        match self.sel.coord_mode() {
            CoordMode::Uv => {
                self.b.vmovdqa(CR, S)?;
                self.b.vmovdqa(CG, T)
            }
            CoordMode::Stq => {
                self.b.vrcpps(T0, Q)?;
                let scale = self.table(addr_f(&consts::TEX_SCALE))?;
                self.b.vmulps(T1, S, T0)?;
                self.b.vmulps(T1, T1, scale)?;
                self.b.vcvttps2dq(CR, T1)?;
                self.b.vmulps(T1, T, T0)?;
                self.b.vmulps(T1, T1, scale)?;
                self.b.vcvttps2dq(CG, T1)
            }
        }
    }

    fn wrap_axis(&mut self, reg: Ymm, mode: WrapMode, vertical: bool) -> Result<(), AsmError> {
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
                self.b.vpbroadcastd(T1, lvl_mem(and_off))?;
                self.b.vpand(reg, reg, T1)?;
                self.b.vpbroadcastd(T1, lvl_mem(or_off))?;
                self.b.vpor(reg, reg, T1)
            }
            WrapMode::Clamp | WrapMode::RegionClamp => {
                self.b.vpbroadcastd(T1, lvl_mem(min_off))?;
                self.b.vpmaxsd(reg, reg, T1)?;
                self.b.vpbroadcastd(T1, lvl_mem(max_off))?;
                self.b.vpminsd(reg, reg, T1)
            }
        }
    }

    /// Fetch one texel per lane at integer coordinates (u, v) into `dst`.
    /// Direct textures gather; indexed textures go through a scalar loop.
    /// Clobbers T1 and CB, plus rax/rbx/rdx/r13/r15.
    fn fetch_texels(&mut self, dst: Ymm, u: Ymm, v: Ymm) -> Result<(), AsmError> {
        self.b
            .mov_rm(Gpr::RDX, lvl_mem(offset_of!(TexLevel, base)))?;

        if !self.sel.indexed() {
            // Byte offset per lane: v * stride + u * 4. Wrapped coordinates
            // are in range for every lane, dead ones included, so gathering
            // with a full mask is safe.
            self.b
                .vpbroadcastd(T1, lvl_mem(offset_of!(TexLevel, stride)))?;
            self.b.vpmulld(T1, v, T1)?;
            self.b.vpslld_ri(CB, u, 2)?;
            self.b.vpaddd(T1, T1, CB)?;
            self.b.vpcmpeqd(CB, CB, CB)?;
            return self.b.vpgatherdd(dst, Gpr::RDX, T1, Scale::X1, 0, CB);
        }

        self.b
            .mov_rm(Gpr::R13, env_mem(offset_of!(PipelineEnv, palette)))?;
        self.b.vmovdqu_store(slot(SLOT_SCR_U), u)?;
        self.b.vmovdqu_store(slot(SLOT_SCR_V), v)?;
        for lane in 0..8 {
            self.b
                .mov32_rm(Gpr::R15, slot(SLOT_SCR_V + 4 * lane))?;
            self.b
                .imul_rm(Gpr::R15, lvl_mem(offset_of!(TexLevel, stride)))?;
            self.b.add_rr(Gpr::R15, Gpr::RDX)?;
            self.b.mov32_rm(Gpr::RBX, slot(SLOT_SCR_U + 4 * lane))?;
            self.b
                .movzx32_rm8(Gpr::RAX, Mem::base(Gpr::R15).index(Gpr::RBX, 1)?)?;
            self.b
                .mov32_rm(Gpr::RAX, Mem::base(Gpr::R13).index(Gpr::RAX, 4)?)?;
            self.b
                .mov32_mr(slot(SLOT_SCR_T + 4 * lane), Gpr::RAX)?;
        }
        self.b.vmovdqu(dst, slot(SLOT_SCR_T))
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
            self.b.vmovdqu_store(slot(sl), c)?;
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
            self.b.vmovdqu(T0, slot(sl))?;
            self.b.vpsubd(c, c, T0)?;
            self.b.vmovdqu(T1, slot(SLOT_LFRAC))?;
            self.b.vpmulld(c, c, T1)?;
            self.b.vpsrad_ri(c, c, 7)?;
            self.b.vpaddd(c, c, T0)?;
        }
        Ok(())
    }

    fn point_sample(&mut self) -> Result<(), AsmError> {
        self.b.vpsrad_ri(CR, CR, 16)?;
        self.b.vpsrad_ri(CG, CG, 16)?;
        self.wrap_axis(CR, self.sel.wrap_u(), false)?;
        self.wrap_axis(CG, self.sel.wrap_v(), true)?;
        self.fetch_texels(T0, CR, CG)?;

        let mask = self.table(addr_i(&consts::BYTE_MASK))?;
        self.b.vpand(CR, T0, mask)?;
        self.b.vpsrld_ri(CG, T0, 8)?;
        self.b.vpand(CG, CG, mask)?;
        self.b.vpsrld_ri(CB, T0, 16)?;
        self.b.vpand(CB, CB, mask)?;
        self.b.vpsrld_ri(CA, T0, 24)
    }

    fn bilinear_sample(&mut self) -> Result<(), AsmError> {
        let half = self.table(addr_i(&consts::ALPHA_BIT_C16))?; // 0x8000
        self.b.vpsubd(CR, CR, half)?;
        self.b.vpsubd(CG, CG, half)?;

        let byte = self.table(addr_i(&consts::BYTE_MASK))?;
        self.b.vpsrad_ri(T0, CR, 8)?;
        self.b.vpand(T0, T0, byte)?;
        self.b.vmovdqu_store(slot(SLOT_FU), T0)?;
        self.b.vpsrad_ri(T0, CG, 8)?;
        self.b.vpand(T0, T0, byte)?;
        self.b.vmovdqu_store(slot(SLOT_FV), T0)?;

        self.b.vpsrad_ri(CR, CR, 16)?;
        self.b.vpsrad_ri(CG, CG, 16)?;

        self.b.vpcmpeqd(T1, T1, T1)?;
        self.b.vpsubd(T0, CR, T1)?;
        self.b.vmovdqu_store(slot(SLOT_U1), T0)?;
        self.b.vpsubd(T0, CG, T1)?;
        self.b.vmovdqu_store(slot(SLOT_V1), T0)?;

        self.wrap_axis(CR, self.sel.wrap_u(), false)?;
        self.b.vmovdqu_store(slot(SLOT_U0), CR)?;
        self.wrap_axis(CG, self.sel.wrap_v(), true)?;
        self.b.vmovdqu_store(slot(SLOT_V0), CG)?;
        self.b.vmovdqu(T0, slot(SLOT_U1))?;
        self.wrap_axis(T0, self.sel.wrap_u(), false)?;
        self.b.vmovdqu_store(slot(SLOT_U1), T0)?;
        self.b.vmovdqu(T0, slot(SLOT_V1))?;
        self.wrap_axis(T0, self.sel.wrap_v(), true)?;
        self.b.vmovdqu_store(slot(SLOT_V1), T0)?;

        for (u_slot, v_slot, out) in [
            (SLOT_U0, SLOT_V0, SLOT_T00),
            (SLOT_U1, SLOT_V0, SLOT_T01),
            (SLOT_U0, SLOT_V1, SLOT_T10),
            (SLOT_U1, SLOT_V1, SLOT_T11),
        ] {
            self.b.vmovdqu(CR, slot(u_slot))?;
            self.b.vmovdqu(CG, slot(v_slot))?;
            self.fetch_texels(T0, CR, CG)?;
            self.b.vmovdqu_store(slot(out), T0)?;
        }

        // Horizontal then vertical lerp per channel, 32-bit lanes.
        for (ch, out) in [(0u8, SLOT_U0), (1, SLOT_U1), (2, SLOT_V0), (3, SLOT_V1)] {
            self.extract_channel(T0, SLOT_T00, ch)?;
            self.extract_channel(T1, SLOT_T01, ch)?;
            self.b.vpsubd(T1, T1, T0)?;
            self.b.vpmulld(T1, T1, slot(SLOT_FU))?;
            self.b.vpsrad_ri(T1, T1, 8)?;
            self.b.vpaddd(CB, T0, T1)?; // top row

            self.extract_channel(T0, SLOT_T10, ch)?;
            self.extract_channel(T1, SLOT_T11, ch)?;
            self.b.vpsubd(T1, T1, T0)?;
            self.b.vpmulld(T1, T1, slot(SLOT_FU))?;
            self.b.vpsrad_ri(T1, T1, 8)?;
            self.b.vpaddd(T0, T0, T1)?;

            self.b.vpsubd(T0, T0, CB)?;
            self.b.vpmulld(T0, T0, slot(SLOT_FV))?;
            self.b.vpsrad_ri(T0, T0, 8)?;
            self.b.vpaddd(T0, T0, CB)?;
            self.b.vmovdqu_store(slot(out), T0)?;
        }

        self.b.vmovdqu(CR, slot(SLOT_U0))?;
        self.b.vmovdqu(CG, slot(SLOT_U1))?;
        self.b.vmovdqu(CB, slot(SLOT_V0))?;
        self.b.vmovdqu(CA, slot(SLOT_V1))
    }

    fn extract_channel(&mut self, dst: Ymm, src_slot: i32, ch: u8) -> Result<(), AsmError> {
        self.b.vmovdqu(dst, slot(src_slot))?;
        if ch > 0 {
            self.b.vpsrld_ri(dst, dst, ch * 8)?;
        }
        if ch < 3 {
            let mask = self.table(addr_i(&consts::BYTE_MASK))?;
            self.b.vpand(dst, dst, mask)?;
        }
        Ok(())
    }

    fn flat_color(&mut self) -> Result<(), AsmError> {
        for (dst, src) in [(CR, VR), (CG, VG), (CB, VB), (CA, VA)] {
            self.b.vpsrad_ri(dst, src, 16)?;
        }
        Ok(())
    }

    fn combine(&mut self) -> Result<(), AsmError> {
        if !self.sel.tex_enabled() {
            return Ok(());
        }
        let tfx = self.sel.tex_function();
        let tcc = self.sel.tcc();

        match tfx {
            TexFunction::Decal => {
                if !tcc {
                    self.b.vpsrad_ri(CA, VA, 16)?;
                }
                Ok(())
            }
            TexFunction::Modulate => {
                let max = self.table(addr_i(&consts::CHAN_MAX))?;
                for (c, v) in [(CR, VR), (CG, VG), (CB, VB)] {
                    self.b.vpsrad_ri(T1, v, 16)?;
                    self.b.vpmulld(c, c, T1)?;
                    self.b.vpsrad_ri(c, c, 7)?;
                    self.b.vpminsd(c, c, max)?;
                }
                if tcc {
                    self.b.vpsrad_ri(T1, VA, 16)?;
                    self.b.vpmulld(CA, CA, T1)?;
                    self.b.vpsrad_ri(CA, CA, 7)?;
                    self.b.vpminsd(CA, CA, max)?;
                } else {
                    self.b.vpsrad_ri(CA, VA, 16)?;
                }
                Ok(())
            }
            TexFunction::Highlight | TexFunction::HighlightA => {
                let max = self.table(addr_i(&consts::CHAN_MAX))?;
                self.b.vpsrad_ri(T0, VA, 16)?;
                for (c, v) in [(CR, VR), (CG, VG), (CB, VB)] {
                    self.b.vpsrad_ri(T1, v, 16)?;
                    self.b.vpmulld(c, c, T1)?;
                    self.b.vpsrad_ri(c, c, 7)?;
                    self.b.vpaddd(c, c, T0)?;
                    self.b.vpminsd(c, c, max)?;
                }
                if !tcc {
                    self.b.vmovdqa(CA, T0)?;
                } else if tfx == TexFunction::Highlight {
                    self.b.vpaddd(CA, CA, T0)?;
                    self.b.vpminsd(CA, CA, max)?;
                }
                // HighlightA with tcc keeps the texel alpha as-is.
                Ok(())
            }
        }
    }

    fn coverage_alpha(&mut self) -> Result<(), AsmError> {
        self.b.vpmulld(T0, CA, slot(SLOT_COV))?;
        self.b.vpsrad_ri(CA, T0, 16)
    }

    fn alpha_test(&mut self) -> Result<(), AsmError> {
        let aref = env_mem(offset_of!(PipelineEnv, aref));
        match self.sel.alpha_compare() {
            AlphaCompare::Always => unreachable!("canonicalized out by the selector builder"),
            AlphaCompare::Never => self.b.vpxor(T0, T0, T0)?,
            AlphaCompare::Less => {
                self.b.vmovdqa(T0, aref)?;
                self.b.vpcmpgtd(T0, T0, CA)?;
            }
            AlphaCompare::LEqual => {
                self.b.vpcmpgtd(T0, CA, aref)?;
                self.b.vpcmpeqd(T1, T1, T1)?;
                self.b.vpxor(T0, T0, T1)?;
            }
            AlphaCompare::Equal => {
                self.b.vpcmpeqd(T0, CA, aref)?;
            }
            AlphaCompare::GEqual => {
                self.b.vmovdqa(T0, aref)?;
                self.b.vpcmpgtd(T0, T0, CA)?;
                self.b.vpcmpeqd(T1, T1, T1)?;
                self.b.vpxor(T0, T0, T1)?;
            }
            AlphaCompare::Greater => {
                self.b.vpcmpgtd(T0, CA, aref)?;
            }
            AlphaCompare::NotEqual => {
                self.b.vpcmpeqd(T0, CA, aref)?;
                self.b.vpcmpeqd(T1, T1, T1)?;
                self.b.vpxor(T0, T0, T1)?;
            }
        }

        match self.sel.alpha_fail() {
            AlphaFail::Keep => {
                self.b.vpand(VALID, VALID, T0)?;
                self.b.vmovmskps(Gpr::RAX, VALID)?;
                self.b.test32_rr(Gpr::RAX, Gpr::RAX)?;
                let done = self.group_done;
                self.b.jcc(Cond::E, done)
            }
            AlphaFail::FbOnly => {
                self.b.vmovdqu(T1, slot(SLOT_ZPASS))?;
                self.b.vpand(T1, T1, T0)?;
                self.b.vmovdqu_store(slot(SLOT_ZPASS), T1)
            }
            AlphaFail::ZbOnly => {
                self.b.vmovdqu(T1, slot(SLOT_APASS))?;
                self.b.vpand(T1, T1, T0)?;
                self.b.vmovdqu_store(slot(SLOT_APASS), T1)
            }
            AlphaFail::RgbOnly => {
                self.b.vmovdqu(T1, slot(SLOT_ZPASS))?;
                self.b.vpand(T1, T1, T0)?;
                self.b.vmovdqu_store(slot(SLOT_ZPASS), T1)?;
                self.b.vmovdqu(T1, slot(SLOT_APASS))?;
                self.b.vpand(T1, T1, T0)?;
                self.b.vmovdqu_store(slot(SLOT_APASS), T1)
            }
        }
    }

    fn fog(&mut self) -> Result<(), AsmError> {
        for (c, color_off) in [
            (CR, offset_of!(PipelineEnv, fog_r)),
            (CG, offset_of!(PipelineEnv, fog_g)),
            (CB, offset_of!(PipelineEnv, fog_b)),
        ] {
            self.b.vpsubd(T0, c, env_mem(color_off))?;
            self.b.vpmulld(T0, T0, FOG)?;
            self.b.vpsrad_ri(T0, T0, 16)?;
            self.b.vpaddd(c, T0, env_mem(color_off))?;
        }
        Ok(())
    }

    fn fb_read(&mut self) -> Result<(), AsmError> {
        match self.sel.fb_format() {
            FbFormat::C32 | FbFormat::C24 => {
                self.b.vpmaskmovd_load(T0, VALID, Mem::base(FB))?;
                let mask = self.table(addr_i(&consts::BYTE_MASK))?;
                for (ch, out) in [
                    (0u8, SLOT_FB_R),
                    (1, SLOT_FB_G),
                    (2, SLOT_FB_B),
                    (3, SLOT_FB_A),
                ] {
                    if ch > 0 {
                        self.b.vpsrld_ri(T1, T0, ch * 8)?;
                    } else {
                        self.b.vmovdqa(T1, T0)?;
                    }
                    if ch < 3 {
                        self.b.vpand(T1, T1, mask)?;
                    }
                    self.b.vmovdqu_store(slot(out), T1)?;
                }
                if self.sel.fb_format() == FbFormat::C24 {
                    // No stored alpha; read back as opaque 0x80.
                    self.b.mov32_ri(Gpr::RAX, 0x80)?;
                    self.b.vmovd_load(T1.xmm(), Gpr::RAX)?;
                    self.b.vpbroadcastd(T1, T1.xmm())?;
                    self.b.vmovdqu_store(slot(SLOT_FB_A), T1)?;
                }
                Ok(())
            }
            FbFormat::C16 => {
                self.b.vpmovzxwd(T0, Mem::base(FB))?;
                let five = self.table(addr_i(&consts::MASK_5BIT))?;
                for (shift, out) in [(0u8, SLOT_FB_R), (5, SLOT_FB_G), (10, SLOT_FB_B)] {
                    if shift > 0 {
                        self.b.vpsrld_ri(T1, T0, shift)?;
                    } else {
                        self.b.vmovdqa(T1, T0)?;
                    }
                    self.b.vpand(T1, T1, five)?;
                    self.b.vpslld_ri(T1, T1, 3)?;
                    self.b.vmovdqu_store(slot(out), T1)?;
                }
                self.b.vpsrld_ri(T1, T0, 15)?;
                self.b.vpslld_ri(T1, T1, 7)?;
                self.b.vmovdqu_store(slot(SLOT_FB_A), T1)
            }
        }
    }

    fn dest_alpha_test(&mut self) -> Result<(), AsmError> {
        let threshold = self.table(addr_i(&consts::PABE_THRESHOLD))?;
        self.b.vmovdqu(T0, slot(SLOT_FB_A))?;
        self.b.vpcmpgtd(T0, T0, threshold)?;
        if !self.sel.dest_alpha_mode() {
            self.b.vpcmpeqd(T1, T1, T1)?;
            self.b.vpxor(T0, T0, T1)?;
        }
        self.b.vpand(VALID, VALID, T0)?;
        self.b.vmovmskps(Gpr::RAX, VALID)?;
        self.b.test32_rr(Gpr::RAX, Gpr::RAX)?;
        let done = self.group_done;
        self.b.jcc(Cond::E, done)
    }

    fn depth_write(&mut self) -> Result<(), AsmError> {
        self.b.vmovdqa(T0, VALID)?;
        if self.uses_zpass() {
            self.b.vpand(T0, T0, slot(SLOT_ZPASS))?;
        }

        match self.sel.depth_format() {
            DepthFormat::Z32 => self.b.vpmaskmovd_store(Mem::base(ZB), T0, Z),
            DepthFormat::Z24 => {
                // Written lanes keep the byte above the depth. Masking the
                // xor difference narrows the merge to the low three bytes.
                self.b.vpmaskmovd_load(T1, T0, Mem::base(ZB))?;
                self.b.vmovdqu_store(slot(SLOT_SPARE), T1)?;
                self.b.vpxor(T1, T1, Z)?;
                let mask = self.table(addr_i(&consts::RGB_MASK))?;
                self.b.vpand(T1, T1, mask)?;
                self.b.vpand(T1, T1, T0)?;
                self.b.vpxor(T1, T1, slot(SLOT_SPARE))?;
                self.b.vpmaskmovd_store(Mem::base(ZB), T0, T1)
            }
            DepthFormat::Z16 => {
                // buf fits 16 bits, so (z ^ buf) & 0xFFFF equals
                // (z & 0xFFFF) ^ buf.
                self.b.vpmovzxwd(T1, Mem::base(ZB))?;
                self.b.vmovdqu_store(slot(SLOT_SPARE), T1)?;
                self.b.vpxor(T1, T1, Z)?;
                let mask = self.table(addr_i(&consts::WORD_MAX))?;
                self.b.vpand(T1, T1, mask)?;
                self.b.vpand(T1, T1, T0)?;
                self.b.vpxor(T1, T1, slot(SLOT_SPARE))?;
                // In-lane word pack, then fix the quadword order.
                self.b.vpackusdw(T1, T1, T1)?;
                self.b.vpermq(T1, T1, 0xD8)?;
                self.b.vextracti128(Mem::base(ZB), T1, 0)
            }
        }
    }

    fn blend(&mut self) -> Result<(), AsmError> {
        let a = self.sel.blend_a();
        let bsel = self.sel.blend_b();
        let c = self.sel.blend_c();
        let d = self.sel.blend_d();

        for (creg, fb_slot) in [(CR, SLOT_FB_R), (CG, SLOT_FB_G), (CB, SLOT_FB_B)] {
            match a {
                BlendInput::Src => self.b.vmovdqa(T0, creg)?,
                BlendInput::Fb => self.b.vmovdqu(T0, slot(fb_slot))?,
                BlendInput::Zero => self.b.vpxor(T0, T0, T0)?,
            }
            match bsel {
                BlendInput::Src => self.b.vpsubd(T0, T0, creg)?,
                BlendInput::Fb => self.b.vpsubd(T0, T0, slot(fb_slot))?,
                BlendInput::Zero => {}
            }
            match c {
                BlendAlpha::SrcAlpha => self.b.vpmulld(T0, T0, CA)?,
                BlendAlpha::FbAlpha => self.b.vpmulld(T0, T0, slot(SLOT_FB_A))?,
                BlendAlpha::Fixed => {
                    self.b
                        .vpmulld(T0, T0, env_mem(offset_of!(PipelineEnv, afix)))?
                }
            }
            self.b.vpsrad_ri(T0, T0, 7)?;
            match d {
                BlendInput::Src => self.b.vpaddd(T0, T0, creg)?,
                BlendInput::Fb => self.b.vpaddd(T0, T0, slot(fb_slot))?,
                BlendInput::Zero => {}
            }

            if self.sel.color_clamp() {
                self.b.vpxor(T1, T1, T1)?;
                self.b.vpmaxsd(T0, T0, T1)?;
                let max = self.table(addr_i(&consts::CHAN_MAX))?;
                self.b.vpminsd(T0, T0, max)?;
            } else {
                let mask = self.table(addr_i(&consts::BYTE_MASK))?;
                self.b.vpand(T0, T0, mask)?;
            }

            if self.sel.pabe() {
                let threshold = self.table(addr_i(&consts::PABE_THRESHOLD))?;
                self.b.vpcmpgtd(T1, CA, threshold)?;
                self.b.vpxor(T0, T0, creg)?;
                self.b.vpand(T0, T0, T1)?;
                self.b.vpxor(T0, T0, creg)?;
            }
            self.b.vmovdqa(creg, T0)?;
        }
        Ok(())
    }

    fn fb_write(&mut self) -> Result<(), AsmError> {
        if self.sel.alpha_test() && self.sel.alpha_fail() == AlphaFail::RgbOnly {
            self.b.vmovdqu(T1, slot(SLOT_APASS))?;
            self.b.vpxor(T0, CA, slot(SLOT_FB_A))?;
            self.b.vpand(T0, T0, T1)?;
            self.b.vpxor(CA, T0, slot(SLOT_FB_A))?;
        }
        if self.sel.fba() {
            self.b
                .vpor(CA, CA, env_mem(offset_of!(PipelineEnv, fba_mask)))?;
        }

        match self.sel.fb_format() {
            FbFormat::C32 => self.fb_write_c32(),
            FbFormat::C24 => self.fb_write_c24(),
            FbFormat::C16 => self.fb_write_c16(),
        }
    }

    /// Pack CR/CG/CB/CA into 32-bit pixels in T0.
    fn pack_c32(&mut self) -> Result<(), AsmError> {
        self.b.vpslld_ri(T1, CG, 8)?;
        self.b.vpor(T0, CR, T1)?;
        self.b.vpslld_ri(T1, CB, 16)?;
        self.b.vpor(T0, T0, T1)?;
        self.b.vpslld_ri(T1, CA, 24)?;
        self.b.vpor(T0, T0, T1)
    }

    fn write_mask(&mut self) -> Result<(), AsmError> {
        self.b.vmovdqa(T1, VALID)?;
        if self.sel.alpha_test() && self.sel.alpha_fail() == AlphaFail::ZbOnly {
            self.b.vpand(T1, T1, slot(SLOT_APASS))?;
        }
        Ok(())
    }

    fn fb_write_c32(&mut self) -> Result<(), AsmError> {
        self.pack_c32()?;
        self.write_mask()?;
        self.b.vpmaskmovd_store(Mem::base(FB), T1, T0)
    }

    fn fb_write_c24(&mut self) -> Result<(), AsmError> {
        self.pack_c32()?;
        self.write_mask()?;
        // Written lanes keep the destination's top byte.
        self.b.vpmaskmovd_load(CG, T1, Mem::base(FB))?;
        self.b.vpxor(T0, T0, CG)?;
        let mask = self.table(addr_i(&consts::RGB_MASK))?;
        self.b.vpand(T0, T0, mask)?;
        self.b.vpxor(T0, T0, CG)?;
        self.b.vpmaskmovd_store(Mem::base(FB), T1, T0)
    }

    fn fb_write_c16(&mut self) -> Result<(), AsmError> {
        if self.sel.dither() {
            self.b.mov_rm(Gpr::RBX, slot(SLOT_DROW))?;
            // Each env row carries the 4-column pattern repeated across
            // all eight lanes.
            self.b.vmovdqu(T1, Mem::base(Gpr::RBX))?;
            for c in [CR, CG, CB] {
                self.b.vpaddd(c, c, T1)?;
            }
            self.b.vpxor(T1, T1, T1)?;
            let max = self.table(addr_i(&consts::CHAN_MAX))?;
            for c in [CR, CG, CB] {
                self.b.vpmaxsd(c, c, T1)?;
                self.b.vpminsd(c, c, max)?;
            }
        }

        // Pack 8888 -> 1555.
        self.b.vpsrld_ri(T0, CR, 3)?;
        self.b.vpsrld_ri(T1, CG, 3)?;
        self.b.vpslld_ri(T1, T1, 5)?;
        self.b.vpor(T0, T0, T1)?;
        self.b.vpsrld_ri(T1, CB, 3)?;
        self.b.vpslld_ri(T1, T1, 10)?;
        self.b.vpor(T0, T0, T1)?;
        self.b.vpslld_ri(T1, CA, 8)?;
        let bit = self.table(addr_i(&consts::ALPHA_BIT_C16))?;
        self.b.vpand(T1, T1, bit)?;
        self.b.vpor(T0, T0, T1)?;

        self.write_mask()?;
        self.b.vpmovzxwd(CG, Mem::base(FB))?;
        self.b.vpxor(T0, T0, CG)?;
        self.b.vpand(T0, T0, T1)?;
        self.b.vpxor(T0, T0, CG)?;
        self.b.vpackusdw(T0, T0, T0)?;
        self.b.vpermq(T0, T0, 0xD8)?;
        self.b.vextracti128(Mem::base(FB), T0, 0)
    }

    fn step(&mut self) -> Result<(), AsmError> {
        if self.sel.fwrite() || self.sel.needs_fb_read() {
            self.b.add_ri(FB, 8 << self.fb_shift())?;
        }
        if self.uses_z() {
            self.b.add_ri(ZB, 8 << self.zb_shift())?;
        }
        if self.uses_z() && !self.sel.sprite() {
            self.b
                .vpaddd(Z, Z, span_mem(offset_of!(ScanlineSpan, z_step)))?;
        }
        if self.sel.tex_enabled() {
            match self.sel.coord_mode() {
                CoordMode::Stq => {
                    self.b
                        .vaddps(S, S, span_mem(offset_of!(ScanlineSpan, s_step)))?;
                    self.b
                        .vaddps(T, T, span_mem(offset_of!(ScanlineSpan, t_step)))?;
                    self.b
                        .vaddps(Q, Q, span_mem(offset_of!(ScanlineSpan, q_step)))?;
                }
                CoordMode::Uv => {
                    self.b
                        .vpaddd(S, S, span_mem(offset_of!(ScanlineSpan, u_step)))?;
                    self.b
                        .vpaddd(T, T, span_mem(offset_of!(ScanlineSpan, v_step)))?;
                    if self.uses_group_q() {
                        self.b
                            .vaddps(Q, Q, span_mem(offset_of!(ScanlineSpan, q_step)))?;
                    }
                }
            }
        }
        if self.sel.iip() {
            self.b
                .vpaddd(VR, VR, span_mem(offset_of!(ScanlineSpan, r_step)))?;
            self.b
                .vpaddd(VG, VG, span_mem(offset_of!(ScanlineSpan, g_step)))?;
            self.b
                .vpaddd(VB, VB, span_mem(offset_of!(ScanlineSpan, b_step)))?;
            self.b
                .vpaddd(VA, VA, span_mem(offset_of!(ScanlineSpan, a_step)))?;
        }
        if self.sel.fog() {
            self.b
                .vpaddd(FOG, FOG, span_mem(offset_of!(ScanlineSpan, fog_step)))?;
        }
        if self.uses_cov() {
            self.b.vmovdqu(T0, slot(SLOT_COV))?;
            self.b
                .vpaddd(T0, T0, span_mem(offset_of!(ScanlineSpan, cov_step)))?;
            self.b.vmovdqu_store(slot(SLOT_COV), T0)?;
        }

        self.b.sub32_ri(COUNT, 8)?;
        let top = self.loop_top;
        self.b.jcc(Cond::G, top)
    }
}
