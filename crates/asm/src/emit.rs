//! Instruction emission over [`CodeBuffer`].
//!
//! Encoding goes through two generic routines: one for legacy-prefixed
//! instructions and one for VEX-prefixed ones. Each mnemonic is a single
//! table row `(mandatory prefix, opcode-map escape, opcode)` consumed by
//! those routines, so adding an instruction is adding a row rather than
//! hand-rolling bytes.

use crate::{AsmError, CodeBuffer, FixupKind, Gpr, Label, Mem, RmG, RmX, RmY, Scale, Xmm, Ymm};

/// Condition codes for `jcc`/`cmovcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

/// Opcode map escape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Esc {
    M0F,
    M0F38,
    M0F3A,
}

/// One instruction-table row.
#[derive(Debug, Clone, Copy)]
struct Op {
    /// Mandatory prefix: 0, 0x66, 0xF2 or 0xF3.
    prefix: u8,
    esc: Option<Esc>,
    op: u8,
}

const fn row(prefix: u8, esc: Esc, op: u8) -> Op {
    Op {
        prefix,
        esc: Some(esc),
        op,
    }
}

const fn row0(op: u8) -> Op {
    Op {
        prefix: 0,
        esc: None,
        op,
    }
}

// SIMD instruction table. Column order matches the manual: mandatory prefix,
// opcode map, opcode byte.
const MOVDQA_LOAD: Op = row(0x66, Esc::M0F, 0x6F);
const MOVDQA_STORE: Op = row(0x66, Esc::M0F, 0x7F);
const MOVDQU_LOAD: Op = row(0xF3, Esc::M0F, 0x6F);
const MOVDQU_STORE: Op = row(0xF3, Esc::M0F, 0x7F);
const MOVAPS_LOAD: Op = row(0, Esc::M0F, 0x28);
const MOVAPS_STORE: Op = row(0, Esc::M0F, 0x29);
const MOVUPS_LOAD: Op = row(0, Esc::M0F, 0x10);
const MOVUPS_STORE: Op = row(0, Esc::M0F, 0x11);
const MOVD_LOAD: Op = row(0x66, Esc::M0F, 0x6E);
const MOVD_STORE: Op = row(0x66, Esc::M0F, 0x7E);
const MOVQ_LOAD: Op = row(0xF3, Esc::M0F, 0x7E);
const MOVQ_STORE: Op = row(0x66, Esc::M0F, 0xD6);
const PADDB: Op = row(0x66, Esc::M0F, 0xFC);
const PADDD: Op = row(0x66, Esc::M0F, 0xFE);
const PADDW: Op = row(0x66, Esc::M0F, 0xFD);
const PADDUSB: Op = row(0x66, Esc::M0F, 0xDC);
const PSUBB: Op = row(0x66, Esc::M0F, 0xF8);
const PSUBD: Op = row(0x66, Esc::M0F, 0xFA);
const PSUBW: Op = row(0x66, Esc::M0F, 0xF9);
const PSUBUSB: Op = row(0x66, Esc::M0F, 0xD8);
const PMULLW: Op = row(0x66, Esc::M0F, 0xD5);
const PMULHW: Op = row(0x66, Esc::M0F, 0xE5);
const PMULHUW: Op = row(0x66, Esc::M0F, 0xE4);
const PMULLD: Op = row(0x66, Esc::M0F38, 0x40);
const PAND: Op = row(0x66, Esc::M0F, 0xDB);
const PANDN: Op = row(0x66, Esc::M0F, 0xDF);
const POR: Op = row(0x66, Esc::M0F, 0xEB);
const PXOR: Op = row(0x66, Esc::M0F, 0xEF);
const PCMPEQB: Op = row(0x66, Esc::M0F, 0x74);
const PCMPEQW: Op = row(0x66, Esc::M0F, 0x75);
const PCMPEQD: Op = row(0x66, Esc::M0F, 0x76);
const PCMPGTB: Op = row(0x66, Esc::M0F, 0x64);
const PCMPGTW: Op = row(0x66, Esc::M0F, 0x65);
const PCMPGTD: Op = row(0x66, Esc::M0F, 0x66);
const PMAXSD: Op = row(0x66, Esc::M0F38, 0x3D);
const PMINSD: Op = row(0x66, Esc::M0F38, 0x39);
const PMAXUD: Op = row(0x66, Esc::M0F38, 0x3F);
const PMINUD: Op = row(0x66, Esc::M0F38, 0x3B);
const PMAXSW: Op = row(0x66, Esc::M0F, 0xEE);
const PMINSW: Op = row(0x66, Esc::M0F, 0xEA);
const PMAXUB: Op = row(0x66, Esc::M0F, 0xDE);
const PMINUB: Op = row(0x66, Esc::M0F, 0xDA);
const PACKSSDW: Op = row(0x66, Esc::M0F, 0x6B);
const PACKUSDW: Op = row(0x66, Esc::M0F38, 0x2B);
const PACKUSWB: Op = row(0x66, Esc::M0F, 0x67);
const PUNPCKLBW: Op = row(0x66, Esc::M0F, 0x60);
const PUNPCKLWD: Op = row(0x66, Esc::M0F, 0x61);
const PUNPCKLDQ: Op = row(0x66, Esc::M0F, 0x62);
const PUNPCKLQDQ: Op = row(0x66, Esc::M0F, 0x6C);
const PUNPCKHBW: Op = row(0x66, Esc::M0F, 0x68);
const PUNPCKHWD: Op = row(0x66, Esc::M0F, 0x69);
const PUNPCKHDQ: Op = row(0x66, Esc::M0F, 0x6A);
const PSHUFD: Op = row(0x66, Esc::M0F, 0x70);
const PSHUFLW: Op = row(0xF2, Esc::M0F, 0x70);
const PSHUFHW: Op = row(0xF3, Esc::M0F, 0x70);
const PSHIFT_D: Op = row(0x66, Esc::M0F, 0x72);
const PSHIFT_W: Op = row(0x66, Esc::M0F, 0x71);
const PSHIFT_DQ: Op = row(0x66, Esc::M0F, 0x73);
const PMOVMSKB: Op = row(0x66, Esc::M0F, 0xD7);
const MOVMSKPS: Op = row(0, Esc::M0F, 0x50);
const PTEST: Op = row(0x66, Esc::M0F38, 0x17);
const PEXTRB: Op = row(0x66, Esc::M0F3A, 0x14);
const PEXTRW: Op = row(0x66, Esc::M0F3A, 0x15);
const PEXTRD: Op = row(0x66, Esc::M0F3A, 0x16);
const PINSRB: Op = row(0x66, Esc::M0F3A, 0x20);
const PINSRW: Op = row(0x66, Esc::M0F, 0xC4);
const PINSRD: Op = row(0x66, Esc::M0F3A, 0x22);
const PMOVZXBW: Op = row(0x66, Esc::M0F38, 0x30);
const PMOVZXBD: Op = row(0x66, Esc::M0F38, 0x31);
const PMOVZXWD: Op = row(0x66, Esc::M0F38, 0x33);
const ADDPS: Op = row(0, Esc::M0F, 0x58);
const SUBPS: Op = row(0, Esc::M0F, 0x5C);
const MULPS: Op = row(0, Esc::M0F, 0x59);
const DIVPS: Op = row(0, Esc::M0F, 0x5E);
const MINPS: Op = row(0, Esc::M0F, 0x5D);
const MAXPS: Op = row(0, Esc::M0F, 0x5F);
const RCPPS: Op = row(0, Esc::M0F, 0x53);
const SQRTPS: Op = row(0, Esc::M0F, 0x51);
const UNPCKLPS: Op = row(0, Esc::M0F, 0x14);
const UNPCKHPS: Op = row(0, Esc::M0F, 0x15);
const CVTDQ2PS: Op = row(0, Esc::M0F, 0x5B);
const CVTPS2DQ: Op = row(0x66, Esc::M0F, 0x5B);
const CVTTPS2DQ: Op = row(0xF3, Esc::M0F, 0x5B);
const SHUFPS: Op = row(0, Esc::M0F, 0xC6);
const CMPPS: Op = row(0, Esc::M0F, 0xC2);
const VPBROADCASTD: Op = row(0x66, Esc::M0F38, 0x58);
const VPBROADCASTW: Op = row(0x66, Esc::M0F38, 0x79);
const VBROADCASTSS: Op = row(0x66, Esc::M0F38, 0x18);
const VBROADCASTI128: Op = row(0x66, Esc::M0F38, 0x5A);
const VPGATHERDD: Op = row(0x66, Esc::M0F38, 0x90);
const VPMASKMOVD_LOAD: Op = row(0x66, Esc::M0F38, 0x8C);
const VPMASKMOVD_STORE: Op = row(0x66, Esc::M0F38, 0x8E);
const VEXTRACTI128: Op = row(0x66, Esc::M0F3A, 0x39);
const VINSERTI128: Op = row(0x66, Esc::M0F3A, 0x38);
const VPERM2I128: Op = row(0x66, Esc::M0F3A, 0x46);
const VPERMQ: Op = row(0x66, Esc::M0F3A, 0x00);

/// Normalized register-or-memory operand.
#[derive(Clone, Copy)]
enum Rm {
    Reg { low: u8, ext: u8 },
    Mem(Mem),
}

impl From<RmG> for Rm {
    fn from(rm: RmG) -> Rm {
        match rm {
            RmG::Reg(r) => r.into(),
            RmG::Mem(m) => Rm::Mem(m),
        }
    }
}

impl From<RmX> for Rm {
    fn from(rm: RmX) -> Rm {
        match rm {
            RmX::Reg(r) => r.into(),
            RmX::Mem(m) => Rm::Mem(m),
        }
    }
}

impl From<RmY> for Rm {
    fn from(rm: RmY) -> Rm {
        match rm {
            RmY::Reg(r) => r.into(),
            RmY::Mem(m) => Rm::Mem(m),
        }
    }
}

impl From<Gpr> for Rm {
    fn from(r: Gpr) -> Rm {
        Rm::Reg {
            low: r.low(),
            ext: r.ext(),
        }
    }
}

impl From<Xmm> for Rm {
    fn from(r: Xmm) -> Rm {
        Rm::Reg {
            low: r.low(),
            ext: r.ext(),
        }
    }
}

impl From<Ymm> for Rm {
    fn from(r: Ymm) -> Rm {
        Rm::Reg {
            low: r.low(),
            ext: r.ext(),
        }
    }
}

impl From<Mem> for Rm {
    fn from(m: Mem) -> Rm {
        Rm::Mem(m)
    }
}

impl Rm {
    fn ext_bits(&self) -> (u8, u8) {
        match self {
            Rm::Reg { ext, .. } => (0, *ext),
            Rm::Mem(mem) => (
                mem.index.map(|(index, _)| index.ext()).unwrap_or(0),
                mem.base.ext(),
            ),
        }
    }
}

impl CodeBuffer {
    // ── encoding primitives ───────────────────────────────────────────────

    fn rex(&mut self, w: bool, reg_ext: u8, x: u8, b: u8) -> Result<(), AsmError> {
        let rex = 0x40 | (w as u8) << 3 | reg_ext << 2 | x << 1 | b;
        if rex != 0x40 {
            self.push(rex)?;
        }
        Ok(())
    }

    fn esc(&mut self, esc: Esc) -> Result<(), AsmError> {
        match esc {
            Esc::M0F => self.push(0x0F),
            Esc::M0F38 => {
                self.push(0x0F)?;
                self.push(0x38)
            }
            Esc::M0F3A => {
                self.push(0x0F)?;
                self.push(0x3A)
            }
        }
    }

    /// ModRM (+ SIB + displacement) for `reg_low` against `rm`, choosing the
    /// shortest displacement encoding.
    fn modrm(&mut self, reg_low: u8, rm: Rm) -> Result<(), AsmError> {
        match rm {
            Rm::Reg { low, .. } => self.push(0xC0 | reg_low << 3 | low),
            Rm::Mem(mem) => {
                let base = mem.base;
                let disp = mem.disp;

                // rbp/r13 as base cannot use mod=00; everything else can when
                // the displacement is zero.
                let (modbits, disp_width) = if disp == 0 && base.low() != 5 {
                    (0u8, 0u8)
                } else if i8::try_from(disp).is_ok() {
                    (1, 1)
                } else {
                    (2, 4)
                };

                match mem.index {
                    Some((index, scale)) => {
                        self.push(modbits << 6 | reg_low << 3 | 4)?;
                        self.push(scale.bits() << 6 | index.low() << 3 | base.low())?;
                    }
                    None if base.low() == 4 => {
                        // rsp/r12 base needs a SIB with no index.
                        self.push(modbits << 6 | reg_low << 3 | 4)?;
                        self.push(4 << 3 | base.low())?;
                    }
                    None => {
                        self.push(modbits << 6 | reg_low << 3 | base.low())?;
                    }
                }

                match disp_width {
                    1 => self.push(disp as i8 as u8),
                    4 => self.extend(&disp.to_le_bytes()),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Legacy-encoded instruction: `[prefix] [REX] [escape] opcode modrm...`.
    fn legacy(&mut self, op: Op, w: bool, reg: u8, rm: Rm) -> Result<(), AsmError> {
        if op.prefix != 0 {
            self.push(op.prefix)?;
        }
        let (x, b) = rm.ext_bits();
        self.rex(w, reg >> 3, x, b)?;
        if let Some(esc) = op.esc {
            self.esc(esc)?;
        }
        self.push(op.op)?;
        self.modrm(reg & 7, rm)
    }

    /// VEX-encoded instruction, preferring the 2-byte form when legal.
    fn vex(
        &mut self,
        op: Op,
        w: bool,
        l256: bool,
        reg: u8,
        vvvv: u8,
        rm: Rm,
    ) -> Result<(), AsmError> {
        let pp = match op.prefix {
            0 => 0u8,
            0x66 => 1,
            0xF3 => 2,
            0xF2 => 3,
            _ => return Err(AsmError::BadCombination("invalid mandatory prefix")),
        };
        let mmmmm = match op.esc {
            Some(Esc::M0F) => 1u8,
            Some(Esc::M0F38) => 2,
            Some(Esc::M0F3A) => 3,
            None => return Err(AsmError::BadCombination("vex requires an opcode map")),
        };
        let (x, b) = rm.ext_bits();
        let r = reg >> 3;

        if !w && x == 0 && b == 0 && mmmmm == 1 {
            self.push(0xC5)?;
            self.push((!r & 1) << 7 | (!vvvv & 0xF) << 3 | (l256 as u8) << 2 | pp)?;
        } else {
            self.push(0xC4)?;
            self.push((!r & 1) << 7 | (!x & 1) << 6 | (!b & 1) << 5 | mmmmm)?;
            self.push((w as u8) << 7 | (!vvvv & 0xF) << 3 | (l256 as u8) << 2 | pp)?;
        }
        self.push(op.op)?;
        self.modrm(reg & 7, rm)
    }

    // ── general-purpose: moves and address math ───────────────────────────

    pub fn mov_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.legacy(row0(0x89), true, src.index(), dst.into())
    }

    pub fn mov32_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.legacy(row0(0x89), false, src.index(), dst.into())
    }

    pub fn mov_rm(&mut self, dst: Gpr, src: Mem) -> Result<(), AsmError> {
        self.legacy(row0(0x8B), true, dst.index(), src.into())
    }

    pub fn mov32_rm(&mut self, dst: Gpr, src: Mem) -> Result<(), AsmError> {
        self.legacy(row0(0x8B), false, dst.index(), src.into())
    }

    pub fn mov_mr(&mut self, dst: Mem, src: Gpr) -> Result<(), AsmError> {
        self.legacy(row0(0x89), true, src.index(), dst.into())
    }

    pub fn mov32_mr(&mut self, dst: Mem, src: Gpr) -> Result<(), AsmError> {
        self.legacy(row0(0x89), false, src.index(), dst.into())
    }

    pub fn mov16_mr(&mut self, dst: Mem, src: Gpr) -> Result<(), AsmError> {
        self.push(0x66)?;
        self.legacy(row0(0x89), false, src.index(), dst.into())
    }

    pub fn mov_ri(&mut self, dst: Gpr, imm: u64) -> Result<(), AsmError> {
        // always the 10-byte form so callers can rely on the layout
        self.push(0x48 | dst.ext())?;
        self.push(0xB8 + dst.low())?;
        self.push_u64(imm)
    }

    pub fn mov32_ri(&mut self, dst: Gpr, imm: u32) -> Result<(), AsmError> {
        self.rex(false, 0, 0, dst.ext())?;
        self.push(0xB8 + dst.low())?;
        self.push_u32(imm)
    }

    /// `mov r64, imm64` where the immediate is the runtime address of a
    /// label in this buffer, resolved at finalization.
    pub fn mov_ri_label(&mut self, dst: Gpr, label: Label) -> Result<(), AsmError> {
        self.push(0x48 | dst.ext())?;
        self.push(0xB8 + dst.low())?;
        self.emit_ref(label, FixupKind::Abs64)
    }

    pub fn movzx32_rm8(&mut self, dst: Gpr, src: Mem) -> Result<(), AsmError> {
        self.legacy(row(0, Esc::M0F, 0xB6), false, dst.index(), src.into())
    }

    pub fn movzx32_rm16(&mut self, dst: Gpr, src: Mem) -> Result<(), AsmError> {
        self.legacy(row(0, Esc::M0F, 0xB7), false, dst.index(), src.into())
    }

    pub fn movsxd(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.legacy(row0(0x63), true, dst.index(), src.into())
    }

    pub fn lea(&mut self, dst: Gpr, src: Mem) -> Result<(), AsmError> {
        self.legacy(row0(0x8D), true, dst.index(), src.into())
    }

    pub fn lea32(&mut self, dst: Gpr, src: Mem) -> Result<(), AsmError> {
        self.legacy(row0(0x8D), false, dst.index(), src.into())
    }

    // ── general-purpose: ALU ──────────────────────────────────────────────

    fn alu_rr(&mut self, opcode: u8, w: bool, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        // store form: src lives in the reg field
        self.legacy(row0(opcode), w, src.index(), dst.into())
    }

    fn alu_ri(&mut self, ext: u8, w: bool, dst: Gpr, imm: i32) -> Result<(), AsmError> {
        let short = i8::try_from(imm).is_ok();
        self.legacy(row0(if short { 0x83 } else { 0x81 }), w, ext, dst.into())?;
        if short {
            self.push(imm as i8 as u8)
        } else {
            self.extend(&imm.to_le_bytes())
        }
    }

    pub fn add_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x01, true, dst, src)
    }

    pub fn add32_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x01, false, dst, src)
    }

    pub fn add_ri(&mut self, dst: Gpr, imm: i32) -> Result<(), AsmError> {
        self.alu_ri(0, true, dst, imm)
    }

    pub fn add32_ri(&mut self, dst: Gpr, imm: i32) -> Result<(), AsmError> {
        self.alu_ri(0, false, dst, imm)
    }

    pub fn sub_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x29, true, dst, src)
    }

    pub fn sub32_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x29, false, dst, src)
    }

    pub fn sub_ri(&mut self, dst: Gpr, imm: i32) -> Result<(), AsmError> {
        self.alu_ri(5, true, dst, imm)
    }

    pub fn sub32_ri(&mut self, dst: Gpr, imm: i32) -> Result<(), AsmError> {
        self.alu_ri(5, false, dst, imm)
    }

    pub fn and_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x21, true, dst, src)
    }

    pub fn and32_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x21, false, dst, src)
    }

    pub fn and32_ri(&mut self, dst: Gpr, imm: i32) -> Result<(), AsmError> {
        self.alu_ri(4, false, dst, imm)
    }

    pub fn or32_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x09, false, dst, src)
    }

    pub fn or32_ri(&mut self, dst: Gpr, imm: i32) -> Result<(), AsmError> {
        self.alu_ri(1, false, dst, imm)
    }

    pub fn xor32_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x31, false, dst, src)
    }

    pub fn cmp_rr(&mut self, a: Gpr, b: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x39, true, a, b)
    }

    pub fn cmp32_rr(&mut self, a: Gpr, b: Gpr) -> Result<(), AsmError> {
        self.alu_rr(0x39, false, a, b)
    }

    pub fn cmp32_ri(&mut self, a: Gpr, imm: i32) -> Result<(), AsmError> {
        self.alu_ri(7, false, a, imm)
    }

    pub fn test32_rr(&mut self, a: Gpr, b: Gpr) -> Result<(), AsmError> {
        self.legacy(row0(0x85), false, b.index(), a.into())
    }

    pub fn imul_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.legacy(row(0, Esc::M0F, 0xAF), true, dst.index(), src.into())
    }

    pub fn imul32_rr(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.legacy(row(0, Esc::M0F, 0xAF), false, dst.index(), src.into())
    }

    pub fn imul_rm(&mut self, dst: Gpr, src: Mem) -> Result<(), AsmError> {
        self.legacy(row(0, Esc::M0F, 0xAF), true, dst.index(), src.into())
    }

    fn shift_ri(&mut self, ext: u8, w: bool, dst: Gpr, imm: u8) -> Result<(), AsmError> {
        self.legacy(row0(0xC1), w, ext, dst.into())?;
        self.push(imm)
    }

    pub fn shl_ri(&mut self, dst: Gpr, imm: u8) -> Result<(), AsmError> {
        self.shift_ri(4, true, dst, imm)
    }

    pub fn shl32_ri(&mut self, dst: Gpr, imm: u8) -> Result<(), AsmError> {
        self.shift_ri(4, false, dst, imm)
    }

    pub fn shr_ri(&mut self, dst: Gpr, imm: u8) -> Result<(), AsmError> {
        self.shift_ri(5, true, dst, imm)
    }

    pub fn shr32_ri(&mut self, dst: Gpr, imm: u8) -> Result<(), AsmError> {
        self.shift_ri(5, false, dst, imm)
    }

    pub fn sar32_ri(&mut self, dst: Gpr, imm: u8) -> Result<(), AsmError> {
        self.shift_ri(7, false, dst, imm)
    }

    pub fn cmov32(&mut self, cond: Cond, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.legacy(
            row(0, Esc::M0F, 0x40 | cond as u8),
            false,
            dst.index(),
            src.into(),
        )
    }

    pub fn bsr32(&mut self, dst: Gpr, src: Gpr) -> Result<(), AsmError> {
        self.legacy(row(0, Esc::M0F, 0xBD), false, dst.index(), src.into())
    }

    // ── stack and control flow ────────────────────────────────────────────

    pub fn push_r(&mut self, reg: Gpr) -> Result<(), AsmError> {
        self.rex(false, 0, 0, reg.ext())?;
        self.push(0x50 + reg.low())
    }

    pub fn pop_r(&mut self, reg: Gpr) -> Result<(), AsmError> {
        self.rex(false, 0, 0, reg.ext())?;
        self.push(0x58 + reg.low())
    }

    pub fn ret(&mut self) -> Result<(), AsmError> {
        self.push(0xC3)
    }

    /// Clears the upper ymm halves before returning to SSE code.
    pub fn vzeroupper(&mut self) -> Result<(), AsmError> {
        self.push(0xC5)?;
        self.push(0xF8)?;
        self.push(0x77)
    }

    pub fn jmp(&mut self, target: Label) -> Result<(), AsmError> {
        self.push(0xE9)?;
        self.emit_ref(target, FixupKind::Rel32)
    }

    pub fn jmp_short(&mut self, target: Label) -> Result<(), AsmError> {
        self.push(0xEB)?;
        self.emit_ref(target, FixupKind::Rel8)
    }

    pub fn jcc(&mut self, cond: Cond, target: Label) -> Result<(), AsmError> {
        self.push(0x0F)?;
        self.push(0x80 | cond as u8)?;
        self.emit_ref(target, FixupKind::Rel32)
    }

    pub fn jcc_short(&mut self, cond: Cond, target: Label) -> Result<(), AsmError> {
        self.push(0x70 | cond as u8)?;
        self.emit_ref(target, FixupKind::Rel8)
    }

    // ── SSE: moves ────────────────────────────────────────────────────────

    pub fn movdqa(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(MOVDQA_LOAD, false, dst.index(), src.into().into())
    }

    pub fn movdqa_store(&mut self, dst: Mem, src: Xmm) -> Result<(), AsmError> {
        self.legacy(MOVDQA_STORE, false, src.index(), dst.into())
    }

    pub fn movdqu(&mut self, dst: Xmm, src: Mem) -> Result<(), AsmError> {
        self.legacy(MOVDQU_LOAD, false, dst.index(), src.into())
    }

    pub fn movdqu_store(&mut self, dst: Mem, src: Xmm) -> Result<(), AsmError> {
        self.legacy(MOVDQU_STORE, false, src.index(), dst.into())
    }

    pub fn movaps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(MOVAPS_LOAD, false, dst.index(), src.into().into())
    }

    pub fn movaps_store(&mut self, dst: Mem, src: Xmm) -> Result<(), AsmError> {
        self.legacy(MOVAPS_STORE, false, src.index(), dst.into())
    }

    pub fn movups(&mut self, dst: Xmm, src: Mem) -> Result<(), AsmError> {
        self.legacy(MOVUPS_LOAD, false, dst.index(), src.into())
    }

    pub fn movups_store(&mut self, dst: Mem, src: Xmm) -> Result<(), AsmError> {
        self.legacy(MOVUPS_STORE, false, src.index(), dst.into())
    }

    /// `movq xmm, xmm/m64` (upper lanes zeroed).
    pub fn movq_load(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(MOVQ_LOAD, false, dst.index(), src.into().into())
    }

    pub fn movq_store(&mut self, dst: Mem, src: Xmm) -> Result<(), AsmError> {
        self.legacy(MOVQ_STORE, false, src.index(), dst.into())
    }

    /// `movd xmm, r32` / `movd xmm, m32`.
    pub fn movd_load(&mut self, dst: Xmm, src: impl Into<RmG>) -> Result<(), AsmError> {
        self.legacy(MOVD_LOAD, false, dst.index(), src.into().into())
    }

    /// `movd r32, xmm` / `movd m32, xmm`.
    pub fn movd_store(&mut self, dst: impl Into<RmG>, src: Xmm) -> Result<(), AsmError> {
        self.legacy(MOVD_STORE, false, src.index(), dst.into().into())
    }

    // ── SSE: packed integer and float ops ─────────────────────────────────

    pub fn paddb(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PADDB, false, dst.index(), src.into().into())
    }

    pub fn paddd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PADDD, false, dst.index(), src.into().into())
    }

    pub fn paddw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PADDW, false, dst.index(), src.into().into())
    }

    pub fn paddusb(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PADDUSB, false, dst.index(), src.into().into())
    }

    pub fn psubb(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PSUBB, false, dst.index(), src.into().into())
    }

    pub fn psubd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PSUBD, false, dst.index(), src.into().into())
    }

    pub fn psubw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PSUBW, false, dst.index(), src.into().into())
    }

    pub fn psubusb(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PSUBUSB, false, dst.index(), src.into().into())
    }

    pub fn pmullw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMULLW, false, dst.index(), src.into().into())
    }

    pub fn pmulhw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMULHW, false, dst.index(), src.into().into())
    }

    pub fn pmulhuw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMULHUW, false, dst.index(), src.into().into())
    }

    pub fn pmulld(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMULLD, false, dst.index(), src.into().into())
    }

    pub fn pand(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PAND, false, dst.index(), src.into().into())
    }

    pub fn pandn(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PANDN, false, dst.index(), src.into().into())
    }

    pub fn por(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(POR, false, dst.index(), src.into().into())
    }

    pub fn pxor(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PXOR, false, dst.index(), src.into().into())
    }

    pub fn pcmpeqb(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PCMPEQB, false, dst.index(), src.into().into())
    }

    pub fn pcmpeqw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PCMPEQW, false, dst.index(), src.into().into())
    }

    pub fn pcmpeqd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PCMPEQD, false, dst.index(), src.into().into())
    }

    pub fn pcmpgtb(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PCMPGTB, false, dst.index(), src.into().into())
    }

    pub fn pcmpgtw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PCMPGTW, false, dst.index(), src.into().into())
    }

    pub fn pcmpgtd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PCMPGTD, false, dst.index(), src.into().into())
    }

    pub fn pmaxsd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMAXSD, false, dst.index(), src.into().into())
    }

    pub fn pminsd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMINSD, false, dst.index(), src.into().into())
    }

    pub fn pmaxud(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMAXUD, false, dst.index(), src.into().into())
    }

    pub fn pminud(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMINUD, false, dst.index(), src.into().into())
    }

    pub fn pmaxsw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMAXSW, false, dst.index(), src.into().into())
    }

    pub fn pminsw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMINSW, false, dst.index(), src.into().into())
    }

    pub fn pmaxub(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMAXUB, false, dst.index(), src.into().into())
    }

    pub fn pminub(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMINUB, false, dst.index(), src.into().into())
    }

    pub fn packssdw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PACKSSDW, false, dst.index(), src.into().into())
    }

    pub fn packusdw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PACKUSDW, false, dst.index(), src.into().into())
    }

    pub fn packuswb(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PACKUSWB, false, dst.index(), src.into().into())
    }

    pub fn punpcklbw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PUNPCKLBW, false, dst.index(), src.into().into())
    }

    pub fn punpcklwd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PUNPCKLWD, false, dst.index(), src.into().into())
    }

    pub fn punpckldq(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PUNPCKLDQ, false, dst.index(), src.into().into())
    }

    pub fn punpcklqdq(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PUNPCKLQDQ, false, dst.index(), src.into().into())
    }

    pub fn punpckhbw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PUNPCKHBW, false, dst.index(), src.into().into())
    }

    pub fn punpckhwd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PUNPCKHWD, false, dst.index(), src.into().into())
    }

    pub fn punpckhdq(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PUNPCKHDQ, false, dst.index(), src.into().into())
    }

    pub fn addps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(ADDPS, false, dst.index(), src.into().into())
    }

    pub fn subps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(SUBPS, false, dst.index(), src.into().into())
    }

    pub fn mulps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(MULPS, false, dst.index(), src.into().into())
    }

    pub fn divps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(DIVPS, false, dst.index(), src.into().into())
    }

    pub fn sqrtps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(SQRTPS, false, dst.index(), src.into().into())
    }

    pub fn unpcklps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(UNPCKLPS, false, dst.index(), src.into().into())
    }

    pub fn unpckhps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(UNPCKHPS, false, dst.index(), src.into().into())
    }

    pub fn minps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(MINPS, false, dst.index(), src.into().into())
    }

    pub fn maxps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(MAXPS, false, dst.index(), src.into().into())
    }

    pub fn rcpps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(RCPPS, false, dst.index(), src.into().into())
    }

    pub fn cvtdq2ps(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(CVTDQ2PS, false, dst.index(), src.into().into())
    }

    pub fn cvtps2dq(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(CVTPS2DQ, false, dst.index(), src.into().into())
    }

    pub fn cvttps2dq(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(CVTTPS2DQ, false, dst.index(), src.into().into())
    }

    // ── SSE: shuffles, shifts, extract/insert ─────────────────────────────

    pub fn pshufd(&mut self, dst: Xmm, src: impl Into<RmX>, order: u8) -> Result<(), AsmError> {
        self.legacy(PSHUFD, false, dst.index(), src.into().into())?;
        self.push(order)
    }

    pub fn pshuflw(&mut self, dst: Xmm, src: impl Into<RmX>, order: u8) -> Result<(), AsmError> {
        self.legacy(PSHUFLW, false, dst.index(), src.into().into())?;
        self.push(order)
    }

    pub fn pshufhw(&mut self, dst: Xmm, src: impl Into<RmX>, order: u8) -> Result<(), AsmError> {
        self.legacy(PSHUFHW, false, dst.index(), src.into().into())?;
        self.push(order)
    }

    pub fn shufps(&mut self, dst: Xmm, src: impl Into<RmX>, order: u8) -> Result<(), AsmError> {
        self.legacy(SHUFPS, false, dst.index(), src.into().into())?;
        self.push(order)
    }

    pub fn cmpps(&mut self, dst: Xmm, src: impl Into<RmX>, pred: u8) -> Result<(), AsmError> {
        self.legacy(CMPPS, false, dst.index(), src.into().into())?;
        self.push(pred)
    }

    fn pshift_ri(&mut self, group: Op, ext: u8, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.legacy(group, false, ext, Rm::from(dst))?;
        self.push(imm)
    }

    pub fn pslld_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_D, 6, dst, imm)
    }

    pub fn psrld_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_D, 2, dst, imm)
    }

    pub fn psrad_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_D, 4, dst, imm)
    }

    pub fn psllw_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_W, 6, dst, imm)
    }

    pub fn psrlw_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_W, 2, dst, imm)
    }

    pub fn psraw_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_W, 4, dst, imm)
    }

    pub fn psllq_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_DQ, 6, dst, imm)
    }

    pub fn psrlq_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_DQ, 2, dst, imm)
    }

    pub fn pslldq_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_DQ, 7, dst, imm)
    }

    pub fn psrldq_ri(&mut self, dst: Xmm, imm: u8) -> Result<(), AsmError> {
        self.pshift_ri(PSHIFT_DQ, 3, dst, imm)
    }

    pub fn pmovmskb(&mut self, dst: Gpr, src: Xmm) -> Result<(), AsmError> {
        self.legacy(PMOVMSKB, false, dst.index(), src.into())
    }

    pub fn movmskps(&mut self, dst: Gpr, src: Xmm) -> Result<(), AsmError> {
        self.legacy(MOVMSKPS, false, dst.index(), src.into())
    }

    pub fn ptest(&mut self, a: Xmm, b: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PTEST, false, a.index(), b.into().into())
    }

    /// `pextrd r32/m32, xmm, imm8`. The xmm source rides in the reg field.
    pub fn pextrd(&mut self, dst: impl Into<RmG>, src: Xmm, lane: u8) -> Result<(), AsmError> {
        self.legacy(PEXTRD, false, src.index(), dst.into().into())?;
        self.push(lane)
    }

    pub fn pextrw_mem(&mut self, dst: Mem, src: Xmm, lane: u8) -> Result<(), AsmError> {
        self.legacy(PEXTRW, false, src.index(), dst.into())?;
        self.push(lane)
    }

    pub fn pextrb_mem(&mut self, dst: Mem, src: Xmm, lane: u8) -> Result<(), AsmError> {
        self.legacy(PEXTRB, false, src.index(), dst.into())?;
        self.push(lane)
    }

    pub fn pinsrd(&mut self, dst: Xmm, src: impl Into<RmG>, lane: u8) -> Result<(), AsmError> {
        self.legacy(PINSRD, false, dst.index(), src.into().into())?;
        self.push(lane)
    }

    pub fn pinsrw(&mut self, dst: Xmm, src: impl Into<RmG>, lane: u8) -> Result<(), AsmError> {
        self.legacy(PINSRW, false, dst.index(), src.into().into())?;
        self.push(lane)
    }

    pub fn pinsrb(&mut self, dst: Xmm, src: impl Into<RmG>, lane: u8) -> Result<(), AsmError> {
        self.legacy(PINSRB, false, dst.index(), src.into().into())?;
        self.push(lane)
    }

    pub fn pmovzxbw(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMOVZXBW, false, dst.index(), src.into().into())
    }

    pub fn pmovzxbd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMOVZXBD, false, dst.index(), src.into().into())
    }

    pub fn pmovzxwd(&mut self, dst: Xmm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.legacy(PMOVZXWD, false, dst.index(), src.into().into())
    }

    // ── AVX ───────────────────────────────────────────────────────────────

    fn v3(&mut self, op: Op, dst: Ymm, a: Ymm, b: RmY) -> Result<(), AsmError> {
        self.vex(op, false, true, dst.index(), a.index(), b.into())
    }

    pub fn vmovdqa(&mut self, dst: Ymm, src: impl Into<RmY>) -> Result<(), AsmError> {
        self.vex(MOVDQA_LOAD, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vmovdqa_store(&mut self, dst: Mem, src: Ymm) -> Result<(), AsmError> {
        self.vex(MOVDQA_STORE, false, true, src.index(), 0, dst.into())
    }

    pub fn vmovdqu(&mut self, dst: Ymm, src: Mem) -> Result<(), AsmError> {
        self.vex(MOVDQU_LOAD, false, true, dst.index(), 0, src.into())
    }

    pub fn vmovdqu_store(&mut self, dst: Mem, src: Ymm) -> Result<(), AsmError> {
        self.vex(MOVDQU_STORE, false, true, src.index(), 0, dst.into())
    }

    pub fn vmovd_load(&mut self, dst: Xmm, src: impl Into<RmG>) -> Result<(), AsmError> {
        self.vex(MOVD_LOAD, false, false, dst.index(), 0, src.into().into())
    }

    pub fn vmovd_store(&mut self, dst: impl Into<RmG>, src: Xmm) -> Result<(), AsmError> {
        self.vex(MOVD_STORE, false, false, src.index(), 0, dst.into().into())
    }

    pub fn vpaddd(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PADDD, dst, a, b.into())
    }

    pub fn vpaddw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PADDW, dst, a, b.into())
    }

    pub fn vpaddusb(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PADDUSB, dst, a, b.into())
    }

    pub fn vpsubd(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PSUBD, dst, a, b.into())
    }

    pub fn vpsubw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PSUBW, dst, a, b.into())
    }

    pub fn vpsubusb(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PSUBUSB, dst, a, b.into())
    }

    pub fn vpmullw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMULLW, dst, a, b.into())
    }

    pub fn vpmulhw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMULHW, dst, a, b.into())
    }

    pub fn vpmulld(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMULLD, dst, a, b.into())
    }

    pub fn vpand(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PAND, dst, a, b.into())
    }

    pub fn vpandn(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PANDN, dst, a, b.into())
    }

    pub fn vpor(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(POR, dst, a, b.into())
    }

    pub fn vpxor(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PXOR, dst, a, b.into())
    }

    pub fn vpcmpeqb(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PCMPEQB, dst, a, b.into())
    }

    pub fn vpcmpeqd(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PCMPEQD, dst, a, b.into())
    }

    pub fn vpcmpgtw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PCMPGTW, dst, a, b.into())
    }

    pub fn vpcmpgtd(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PCMPGTD, dst, a, b.into())
    }

    pub fn vpmaxsd(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMAXSD, dst, a, b.into())
    }

    pub fn vpminsd(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMINSD, dst, a, b.into())
    }

    pub fn vpmaxud(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMAXUD, dst, a, b.into())
    }

    pub fn vpminud(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMINUD, dst, a, b.into())
    }

    pub fn vpmaxsw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMAXSW, dst, a, b.into())
    }

    pub fn vpminsw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PMINSW, dst, a, b.into())
    }

    pub fn vpackssdw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PACKSSDW, dst, a, b.into())
    }

    pub fn vpackusdw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PACKUSDW, dst, a, b.into())
    }

    pub fn vpackuswb(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PACKUSWB, dst, a, b.into())
    }

    pub fn vpunpcklbw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PUNPCKLBW, dst, a, b.into())
    }

    pub fn vpunpcklwd(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PUNPCKLWD, dst, a, b.into())
    }

    pub fn vpunpckldq(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PUNPCKLDQ, dst, a, b.into())
    }

    pub fn vpunpckhbw(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PUNPCKHBW, dst, a, b.into())
    }

    pub fn vpunpckhwd(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PUNPCKHWD, dst, a, b.into())
    }

    pub fn vpunpckhdq(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(PUNPCKHDQ, dst, a, b.into())
    }

    pub fn vaddps(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(ADDPS, dst, a, b.into())
    }

    pub fn vsubps(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(SUBPS, dst, a, b.into())
    }

    pub fn vmulps(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(MULPS, dst, a, b.into())
    }

    pub fn vminps(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(MINPS, dst, a, b.into())
    }

    pub fn vmaxps(&mut self, dst: Ymm, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.v3(MAXPS, dst, a, b.into())
    }

    pub fn vrcpps(&mut self, dst: Ymm, src: impl Into<RmY>) -> Result<(), AsmError> {
        self.vex(RCPPS, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vcvtdq2ps(&mut self, dst: Ymm, src: impl Into<RmY>) -> Result<(), AsmError> {
        self.vex(CVTDQ2PS, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vcvtps2dq(&mut self, dst: Ymm, src: impl Into<RmY>) -> Result<(), AsmError> {
        self.vex(CVTPS2DQ, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vcvttps2dq(&mut self, dst: Ymm, src: impl Into<RmY>) -> Result<(), AsmError> {
        self.vex(CVTTPS2DQ, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vpshufd(&mut self, dst: Ymm, src: impl Into<RmY>, order: u8) -> Result<(), AsmError> {
        self.vex(PSHUFD, false, true, dst.index(), 0, src.into().into())?;
        self.push(order)
    }

    pub fn vpshuflw(&mut self, dst: Ymm, src: impl Into<RmY>, order: u8) -> Result<(), AsmError> {
        self.vex(PSHUFLW, false, true, dst.index(), 0, src.into().into())?;
        self.push(order)
    }

    pub fn vpshufhw(&mut self, dst: Ymm, src: impl Into<RmY>, order: u8) -> Result<(), AsmError> {
        self.vex(PSHUFHW, false, true, dst.index(), 0, src.into().into())?;
        self.push(order)
    }

    pub fn vcmpps(
        &mut self,
        dst: Ymm,
        a: Ymm,
        b: impl Into<RmY>,
        pred: u8,
    ) -> Result<(), AsmError> {
        self.v3(CMPPS, dst, a, b.into())?;
        self.push(pred)
    }

    /// VEX shift-by-immediate: the destination rides in vvvv, the opcode
    /// extension in the reg field and the source in r/m.
    fn vpshift_ri(
        &mut self,
        group: Op,
        ext: u8,
        dst: Ymm,
        src: Ymm,
        imm: u8,
    ) -> Result<(), AsmError> {
        self.vex(group, false, true, ext, dst.index(), src.into())?;
        self.push(imm)
    }

    pub fn vpslld_ri(&mut self, dst: Ymm, src: Ymm, imm: u8) -> Result<(), AsmError> {
        self.vpshift_ri(PSHIFT_D, 6, dst, src, imm)
    }

    pub fn vpsrld_ri(&mut self, dst: Ymm, src: Ymm, imm: u8) -> Result<(), AsmError> {
        self.vpshift_ri(PSHIFT_D, 2, dst, src, imm)
    }

    pub fn vpsrad_ri(&mut self, dst: Ymm, src: Ymm, imm: u8) -> Result<(), AsmError> {
        self.vpshift_ri(PSHIFT_D, 4, dst, src, imm)
    }

    pub fn vpsllw_ri(&mut self, dst: Ymm, src: Ymm, imm: u8) -> Result<(), AsmError> {
        self.vpshift_ri(PSHIFT_W, 6, dst, src, imm)
    }

    pub fn vpsrlw_ri(&mut self, dst: Ymm, src: Ymm, imm: u8) -> Result<(), AsmError> {
        self.vpshift_ri(PSHIFT_W, 2, dst, src, imm)
    }

    pub fn vpsraw_ri(&mut self, dst: Ymm, src: Ymm, imm: u8) -> Result<(), AsmError> {
        self.vpshift_ri(PSHIFT_W, 4, dst, src, imm)
    }

    pub fn vpmovmskb(&mut self, dst: Gpr, src: Ymm) -> Result<(), AsmError> {
        self.vex(PMOVMSKB, false, true, dst.index(), 0, src.into())
    }

    pub fn vmovmskps(&mut self, dst: Gpr, src: Ymm) -> Result<(), AsmError> {
        self.vex(MOVMSKPS, false, true, dst.index(), 0, src.into())
    }

    pub fn vptest(&mut self, a: Ymm, b: impl Into<RmY>) -> Result<(), AsmError> {
        self.vex(PTEST, false, true, a.index(), 0, b.into().into())
    }

    /// Widens 16 bytes to 16 words; the source stays 128-bit.
    pub fn vpmovzxbw(&mut self, dst: Ymm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.vex(PMOVZXBW, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vpmovzxbd(&mut self, dst: Ymm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.vex(PMOVZXBD, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vpmovzxwd(&mut self, dst: Ymm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.vex(PMOVZXWD, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vpbroadcastd(&mut self, dst: Ymm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.vex(VPBROADCASTD, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vpbroadcastw(&mut self, dst: Ymm, src: impl Into<RmX>) -> Result<(), AsmError> {
        self.vex(VPBROADCASTW, false, true, dst.index(), 0, src.into().into())
    }

    pub fn vbroadcastss(&mut self, dst: Ymm, src: Mem) -> Result<(), AsmError> {
        self.vex(VBROADCASTSS, false, true, dst.index(), 0, src.into())
    }

    pub fn vbroadcasti128(&mut self, dst: Ymm, src: Mem) -> Result<(), AsmError> {
        self.vex(VBROADCASTI128, false, true, dst.index(), 0, src.into())
    }

    /// `vpgatherdd dst, [base + index*scale + disp], mask`. The index is a
    /// vector register (VSIB); the mask is consumed and must be distinct
    /// from both `dst` and `index`.
    pub fn vpgatherdd(
        &mut self,
        dst: Ymm,
        base: Gpr,
        index: Ymm,
        scale: Scale,
        disp: i32,
        mask: Ymm,
    ) -> Result<(), AsmError> {
        if dst.0 == index.0 || dst.0 == mask.0 || index.0 == mask.0 {
            return Err(AsmError::BadCombination("gather operands must be distinct"));
        }
        // VSIB has no SIB-less form and mod=00 with base rbp/r13 is
        // unavailable just like plain SIB.
        self.push(0xC4)?;
        self.push((!dst.ext() & 1) << 7 | (!index.ext() & 1) << 6 | (!base.ext() & 1) << 5 | 2)?;
        self.push((!mask.index() & 0xF) << 3 | 1 << 2 | 1)?;
        self.push(VPGATHERDD.op)?;

        let (modbits, disp_width) = if disp == 0 && base.low() != 5 {
            (0u8, 0u8)
        } else if i8::try_from(disp).is_ok() {
            (1, 1)
        } else {
            (2, 4)
        };
        self.push(modbits << 6 | dst.low() << 3 | 4)?;
        self.push(scale.bits() << 6 | index.low() << 3 | base.low())?;
        match disp_width {
            1 => self.push(disp as i8 as u8),
            4 => self.extend(&disp.to_le_bytes()),
            _ => Ok(()),
        }
    }

    /// Masked 32-bit store: lanes whose mask sign bit is set are written.
    pub fn vpmaskmovd_store(&mut self, dst: Mem, mask: Ymm, src: Ymm) -> Result<(), AsmError> {
        self.vex(
            VPMASKMOVD_STORE,
            false,
            true,
            src.index(),
            mask.index(),
            dst.into(),
        )
    }

    pub fn vpmaskmovd_load(&mut self, dst: Ymm, mask: Ymm, src: Mem) -> Result<(), AsmError> {
        self.vex(
            VPMASKMOVD_LOAD,
            false,
            true,
            dst.index(),
            mask.index(),
            src.into(),
        )
    }

    pub fn vextracti128(
        &mut self,
        dst: impl Into<RmX>,
        src: Ymm,
        half: u8,
    ) -> Result<(), AsmError> {
        self.vex(VEXTRACTI128, false, true, src.index(), 0, dst.into().into())?;
        self.push(half)
    }

    pub fn vinserti128(
        &mut self,
        dst: Ymm,
        a: Ymm,
        src: impl Into<RmX>,
        half: u8,
    ) -> Result<(), AsmError> {
        self.vex(
            VINSERTI128,
            false,
            true,
            dst.index(),
            a.index(),
            src.into().into(),
        )?;
        self.push(half)
    }

    pub fn vperm2i128(
        &mut self,
        dst: Ymm,
        a: Ymm,
        b: impl Into<RmY>,
        control: u8,
    ) -> Result<(), AsmError> {
        self.v3(VPERM2I128, dst, a, b.into())?;
        self.push(control)
    }

    pub fn vpermq(&mut self, dst: Ymm, src: impl Into<RmY>, order: u8) -> Result<(), AsmError> {
        self.vex(VPERMQ, true, true, dst.index(), 0, src.into().into())?;
        self.push(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CodeBuffer, Gpr, Mem, Scale, Xmm, Ymm};

    fn buf() -> CodeBuffer {
        CodeBuffer::new(4096).unwrap()
    }

    #[test]
    fn gpr_moves() {
        let mut b = buf();
        b.mov_rr(Gpr::RAX, Gpr::RBX).unwrap();
        b.mov32_rr(Gpr::RCX, Gpr::R9).unwrap();
        b.mov_ri(Gpr::RAX, 0x1122334455667788).unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0x48, 0x89, 0xD8, // mov rax, rbx
                0x44, 0x89, 0xC9, // mov ecx, r9d
                0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11,
            ]
        );
    }

    #[test]
    fn memory_forms_pick_shortest_disp() {
        let mut b = buf();
        b.mov_rm(Gpr::RAX, Mem::base(Gpr::RCX)).unwrap();
        b.mov_rm(Gpr::RAX, Mem::base(Gpr::RCX).offset(0x10)).unwrap();
        b.mov_rm(Gpr::RAX, Mem::base(Gpr::RCX).offset(0x1000)).unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0x48, 0x8B, 0x01, // mov rax, [rcx]
                0x48, 0x8B, 0x41, 0x10, // mov rax, [rcx+0x10]
                0x48, 0x8B, 0x81, 0x00, 0x10, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn rsp_and_rbp_special_cases() {
        let mut b = buf();
        b.mov_rm(Gpr::RAX, Mem::base(Gpr::RSP)).unwrap();
        b.mov_rm(Gpr::RAX, Mem::base(Gpr::RBP)).unwrap();
        b.mov_rm(Gpr::RAX, Mem::base(Gpr::R13)).unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0x48, 0x8B, 0x04, 0x24, // [rsp] forces a SIB
                0x48, 0x8B, 0x45, 0x00, // [rbp] forces disp8
                0x49, 0x8B, 0x45, 0x00, // [r13] likewise
            ]
        );
    }

    #[test]
    fn sib_with_index() {
        let mut b = buf();
        let mem = Mem::base(Gpr::RDI).index(Gpr::RSI, 4).unwrap().offset(8);
        b.lea(Gpr::RAX, mem).unwrap();
        assert_eq!(b.as_slice(), [0x48, 0x8D, 0x44, 0xB7, 0x08]);
    }

    #[test]
    fn alu_imm_width_selection() {
        let mut b = buf();
        b.add_ri(Gpr::RSP, 0x28).unwrap();
        b.sub_ri(Gpr::RSP, 0x1000).unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0x48, 0x83, 0xC4, 0x28, // add rsp, 0x28
                0x48, 0x81, 0xEC, 0x00, 0x10, 0x00, 0x00, // sub rsp, 0x1000
            ]
        );
    }

    #[test]
    fn sse_reg_and_mem() {
        let mut b = buf();
        b.paddd(Xmm(2), Xmm(9)).unwrap();
        b.movdqa(Xmm(1), Mem::base(Gpr::R8).offset(0x10)).unwrap();
        b.pshufd(Xmm(0), Xmm(1), 0).unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0x66, 0x41, 0x0F, 0xFE, 0xD1, // paddd xmm2, xmm9
                0x66, 0x41, 0x0F, 0x6F, 0x48, 0x10, // movdqa xmm1, [r8+0x10]
                0x66, 0x0F, 0x70, 0xC1, 0x00, // pshufd xmm0, xmm1, 0
            ]
        );
    }

    #[test]
    fn sse_shift_group_uses_opcode_extension() {
        let mut b = buf();
        b.psrld_ri(Xmm(3), 8).unwrap();
        b.pslld_ri(Xmm(10), 16).unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0x66, 0x0F, 0x72, 0xD3, 0x08, // psrld xmm3, 8
                0x66, 0x41, 0x0F, 0x72, 0xF2, 0x10, // pslld xmm10, 16
            ]
        );
    }

    #[test]
    fn sse41_three_byte_map() {
        let mut b = buf();
        b.pmulld(Xmm(4), Xmm(5)).unwrap();
        b.pextrd(Gpr::RAX, Xmm(3), 1).unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0x66, 0x0F, 0x38, 0x40, 0xE5, // pmulld xmm4, xmm5
                0x66, 0x0F, 0x3A, 0x16, 0xD8, 0x01, // pextrd eax, xmm3, 1
            ]
        );
    }

    #[test]
    fn vex_two_byte_when_possible() {
        let mut b = buf();
        b.vpaddd(Ymm(1), Ymm(2), Ymm(3)).unwrap();
        assert_eq!(b.as_slice(), [0xC5, 0xED, 0xFE, 0xCB]);
    }

    #[test]
    fn vex_three_byte_for_0f38_and_high_regs() {
        let mut b = buf();
        b.vpmulld(Ymm(0), Ymm(1), Ymm(2)).unwrap();
        b.vpaddd(Ymm(0), Ymm(1), Ymm(10)).unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0xC4, 0xE2, 0x75, 0x40, 0xC2, // vpmulld ymm0, ymm1, ymm2
                0xC4, 0xC1, 0x75, 0xFE, 0xC2, // vpaddd ymm0, ymm1, ymm10
            ]
        );
    }

    #[test]
    fn gather_encodes_vsib() {
        let mut b = buf();
        b.vpgatherdd(Ymm(1), Gpr::RSI, Ymm(2), Scale::X4, 0, Ymm(3))
            .unwrap();
        assert_eq!(b.as_slice(), [0xC4, 0xE2, 0x65, 0x90, 0x0C, 0x96]);
    }

    #[test]
    fn gather_rejects_aliased_operands() {
        let mut b = buf();
        assert_eq!(
            b.vpgatherdd(Ymm(1), Gpr::RSI, Ymm(1), Scale::X4, 0, Ymm(3)),
            Err(AsmError::BadCombination("gather operands must be distinct"))
        );
    }

    #[test]
    fn masked_store() {
        let mut b = buf();
        b.vpmaskmovd_store(Mem::base(Gpr::RDI), Ymm(2), Ymm(4))
            .unwrap();
        assert_eq!(b.as_slice(), [0xC4, 0xE2, 0x6D, 0x8E, 0x27]);
    }

    #[test]
    fn control_flow_short_and_near() {
        let mut b = buf();
        let top = b.new_label();
        b.define_label(top).unwrap();
        b.sub32_ri(Gpr::RCX, 1).unwrap();
        b.jcc_short(Cond::Ne, top).unwrap();
        b.ret().unwrap();
        assert_eq!(
            b.as_slice(),
            [
                0x83, 0xE9, 0x01, // sub ecx, 1
                0x75, 0xFB, // jne top
                0xC3,
            ]
        );
    }
}
