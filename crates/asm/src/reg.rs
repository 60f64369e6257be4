use crate::AsmError;

/// A 64-bit general-purpose register. 32-bit forms are selected by the
/// instruction, not the handle; the handle only carries the register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gpr(u8);

impl Gpr {
    pub const RAX: Gpr = Gpr(0);
    pub const RCX: Gpr = Gpr(1);
    pub const RDX: Gpr = Gpr(2);
    pub const RBX: Gpr = Gpr(3);
    pub const RSP: Gpr = Gpr(4);
    pub const RBP: Gpr = Gpr(5);
    pub const RSI: Gpr = Gpr(6);
    pub const RDI: Gpr = Gpr(7);
    pub const R8: Gpr = Gpr(8);
    pub const R9: Gpr = Gpr(9);
    pub const R10: Gpr = Gpr(10);
    pub const R11: Gpr = Gpr(11);
    pub const R12: Gpr = Gpr(12);
    pub const R13: Gpr = Gpr(13);
    pub const R14: Gpr = Gpr(14);
    pub const R15: Gpr = Gpr(15);

    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// High bit of the index, carried in a REX prefix.
    #[inline]
    pub(crate) const fn ext(self) -> u8 {
        self.0 >> 3
    }

    #[inline]
    pub(crate) const fn low(self) -> u8 {
        self.0 & 7
    }
}

/// A 128-bit vector register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xmm(pub u8);

/// A 256-bit vector register. Shares the register file with [`Xmm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ymm(pub u8);

impl Xmm {
    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }

    #[inline]
    pub(crate) const fn ext(self) -> u8 {
        self.0 >> 3
    }

    #[inline]
    pub(crate) const fn low(self) -> u8 {
        self.0 & 7
    }
}

impl Ymm {
    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }

    #[inline]
    pub(crate) const fn ext(self) -> u8 {
        self.0 >> 3
    }

    #[inline]
    pub(crate) const fn low(self) -> u8 {
        self.0 & 7
    }

    /// The 128-bit view of the same register.
    #[inline]
    pub const fn xmm(self) -> Xmm {
        Xmm(self.0)
    }
}

/// Index scale factor of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    X1 = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
}

impl Scale {
    pub fn from_u8(scale: u8) -> Result<Scale, AsmError> {
        match scale {
            1 => Ok(Scale::X1),
            2 => Ok(Scale::X2),
            4 => Ok(Scale::X4),
            8 => Ok(Scale::X8),
            other => Err(AsmError::BadScale(other)),
        }
    }

    #[inline]
    pub(crate) const fn bits(self) -> u8 {
        self as u8
    }
}

/// A `[base + index * scale + disp]` memory operand.
///
/// Validated at construction: RSP cannot be used as an index register, and the
/// scale must be one of 1/2/4/8. Wrong shapes fail here with a descriptive
/// error instead of encoding garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub(crate) base: Gpr,
    pub(crate) index: Option<(Gpr, Scale)>,
    pub(crate) disp: i32,
}

impl Mem {
    pub fn base(base: Gpr) -> Mem {
        Mem {
            base,
            index: None,
            disp: 0,
        }
    }

    pub fn index(mut self, index: Gpr, scale: u8) -> Result<Mem, AsmError> {
        if index == Gpr::RSP {
            return Err(AsmError::BadAddressing("rsp cannot be an index register"));
        }
        self.index = Some((index, Scale::from_u8(scale)?));
        Ok(self)
    }

    pub fn disp(mut self, disp: i32) -> Mem {
        self.disp = disp;
        self
    }

    pub fn offset(mut self, disp: i32) -> Mem {
        self.disp = self.disp.wrapping_add(disp);
        self
    }
}

/// Register-or-memory source operand for GPR instructions.
#[derive(Debug, Clone, Copy)]
pub enum RmG {
    Reg(Gpr),
    Mem(Mem),
}

/// Register-or-memory source operand for XMM instructions.
#[derive(Debug, Clone, Copy)]
pub enum RmX {
    Reg(Xmm),
    Mem(Mem),
}

/// Register-or-memory source operand for YMM instructions.
#[derive(Debug, Clone, Copy)]
pub enum RmY {
    Reg(Ymm),
    Mem(Mem),
}

impl From<Gpr> for RmG {
    fn from(reg: Gpr) -> RmG {
        RmG::Reg(reg)
    }
}

impl From<Mem> for RmG {
    fn from(mem: Mem) -> RmG {
        RmG::Mem(mem)
    }
}

impl From<Xmm> for RmX {
    fn from(reg: Xmm) -> RmX {
        RmX::Reg(reg)
    }
}

impl From<Mem> for RmX {
    fn from(mem: Mem) -> RmX {
        RmX::Mem(mem)
    }
}

impl From<Ymm> for RmY {
    fn from(reg: Ymm) -> RmY {
        RmY::Reg(reg)
    }
}

impl From<Mem> for RmY {
    fn from(mem: Mem) -> RmY {
        RmY::Mem(mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_rsp_index() {
        let err = Mem::base(Gpr::RAX).index(Gpr::RSP, 4).unwrap_err();
        assert!(matches!(err, AsmError::BadAddressing(_)));
    }

    #[test]
    fn rejects_bad_scale() {
        let err = Mem::base(Gpr::RAX).index(Gpr::RCX, 3).unwrap_err();
        assert_eq!(err, AsmError::BadScale(3));
    }

    #[test]
    fn disp_accumulates() {
        let mem = Mem::base(Gpr::R8).disp(16).offset(8);
        assert_eq!(mem.disp, 24);
    }
}
