//! Pipeline configuration packed into a single `u64`.
//!
//! The selector plays two roles at once: it is the cache key for compiled
//! scanline functions (hash/compare the raw bits) and the complete input to
//! the code generator. Two selectors with equal bits must always produce
//! byte-identical code, so every field that influences generation lives here
//! and nothing else does.

/// Depth buffer element format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DepthFormat {
    Z32 = 0,
    Z24 = 1,
    Z16 = 2,
}

/// Depth comparator. `GEqual` and `Greater` are distinct pipelines; they are
/// never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DepthCompare {
    GEqual = 0,
    Greater = 1,
}

/// How the sampled texel combines with the interpolated vertex color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TexFunction {
    Decal = 0,
    Modulate = 1,
    Highlight = 2,
    HighlightA = 3,
}

/// Texture coordinate source: perspective `s/t/q` or direct 16.16 `u/v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoordMode {
    Stq = 0,
    Uv = 1,
}

/// Per-axis texture addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WrapMode {
    Repeat = 0,
    Clamp = 1,
    RegionRepeat = 2,
    RegionClamp = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MipMode {
    Off = 0,
    Nearest = 1,
    Trilinear = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlphaCompare {
    Never = 0,
    Always = 1,
    Less = 2,
    LEqual = 3,
    Equal = 4,
    GEqual = 5,
    Greater = 6,
    NotEqual = 7,
}

/// What a failed alpha test does instead of discarding outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlphaFail {
    /// Discard the pixel entirely.
    Keep = 0,
    /// Write color, skip the depth update.
    FbOnly = 1,
    /// Update depth, skip the color write.
    ZbOnly = 2,
    /// Write RGB but preserve destination alpha; skip the depth update.
    RgbOnly = 3,
}

/// Frame buffer pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FbFormat {
    C32 = 0,
    C24 = 1,
    C16 = 2,
}

/// Color-side blend operand (the `a`, `b` and `d` slots).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlendInput {
    Src = 0,
    Fb = 1,
    Zero = 2,
}

/// Alpha-side blend operand (the `c` slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlendAlpha {
    SrcAlpha = 0,
    FbAlpha = 1,
    Fixed = 2,
}

// Bit layout. Single-bit flags unless a width is noted.
const FWRITE: u32 = 0;
const ZWRITE: u32 = 1;
const ZTEST: u32 = 2;
const ZFMT: u32 = 3; // 2 bits
const ZCMP: u32 = 5;
const ZOVERFLOW: u32 = 6;
const TEX: u32 = 7;
const TFX: u32 = 8; // 2 bits
const TCC: u32 = 10;
const COORD: u32 = 11;
const BILINEAR: u32 = 12;
const WRAP_U: u32 = 13; // 2 bits
const WRAP_V: u32 = 15; // 2 bits
const INDEXED: u32 = 17;
const MIP: u32 = 18; // 2 bits
const MIP_CONST: u32 = 20;
const ATEST: u32 = 21;
const ACMP: u32 = 22; // 3 bits
const AFAIL: u32 = 25; // 2 bits
const DATE: u32 = 27;
const DATM: u32 = 28;
const BLEND: u32 = 29;
const BLEND_A: u32 = 30; // 2 bits
const BLEND_B: u32 = 32; // 2 bits
const BLEND_C: u32 = 34; // 2 bits
const BLEND_D: u32 = 36; // 2 bits
const PABE: u32 = 38;
const AA1: u32 = 39;
const FBFMT: u32 = 40; // 2 bits
const COLCLAMP: u32 = 42;
const FBA: u32 = 43;
const DITHER: u32 = 44;
const SPRITE: u32 = 45;
const IIP: u32 = 46;
const EDGE: u32 = 47;
const AREF: u32 = 48; // 8 bits
const FOG: u32 = 56;
const FB_READ: u32 = 57; // derived, set by the builder

/// Packed pipeline configuration. See the builder for field semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PipelineSelector(u64);

impl PipelineSelector {
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Rebuild from raw bits. The caller is responsible for the bits having
    /// come from `bits()`; round-trips are exact.
    pub const fn from_bits(bits: u64) -> PipelineSelector {
        PipelineSelector(bits)
    }

    #[inline]
    const fn get(self, shift: u32, mask: u64) -> u64 {
        (self.0 >> shift) & mask
    }

    #[inline]
    const fn flag(self, shift: u32) -> bool {
        self.get(shift, 1) != 0
    }

    pub const fn fwrite(self) -> bool {
        self.flag(FWRITE)
    }

    pub const fn zwrite(self) -> bool {
        self.flag(ZWRITE)
    }

    pub const fn ztest(self) -> bool {
        self.flag(ZTEST)
    }

    pub fn depth_format(self) -> DepthFormat {
        match self.get(ZFMT, 3) {
            0 => DepthFormat::Z32,
            1 => DepthFormat::Z24,
            _ => DepthFormat::Z16,
        }
    }

    pub fn depth_compare(self) -> DepthCompare {
        if self.flag(ZCMP) {
            DepthCompare::Greater
        } else {
            DepthCompare::GEqual
        }
    }

    pub const fn z_overflow(self) -> bool {
        self.flag(ZOVERFLOW)
    }

    pub const fn tex_enabled(self) -> bool {
        self.flag(TEX)
    }

    pub fn tex_function(self) -> TexFunction {
        match self.get(TFX, 3) {
            0 => TexFunction::Decal,
            1 => TexFunction::Modulate,
            2 => TexFunction::Highlight,
            _ => TexFunction::HighlightA,
        }
    }

    /// Texture alpha replaces vertex alpha.
    pub const fn tcc(self) -> bool {
        self.flag(TCC)
    }

    pub fn coord_mode(self) -> CoordMode {
        if self.flag(COORD) {
            CoordMode::Uv
        } else {
            CoordMode::Stq
        }
    }

    pub const fn bilinear(self) -> bool {
        self.flag(BILINEAR)
    }

    pub fn wrap_u(self) -> WrapMode {
        wrap_from(self.get(WRAP_U, 3))
    }

    pub fn wrap_v(self) -> WrapMode {
        wrap_from(self.get(WRAP_V, 3))
    }

    pub const fn indexed(self) -> bool {
        self.flag(INDEXED)
    }

    pub fn mip_mode(self) -> MipMode {
        match self.get(MIP, 3) {
            0 => MipMode::Off,
            1 => MipMode::Nearest,
            _ => MipMode::Trilinear,
        }
    }

    pub const fn mip_const_lod(self) -> bool {
        self.flag(MIP_CONST)
    }

    pub const fn alpha_test(self) -> bool {
        self.flag(ATEST)
    }

    pub fn alpha_compare(self) -> AlphaCompare {
        match self.get(ACMP, 7) {
            0 => AlphaCompare::Never,
            1 => AlphaCompare::Always,
            2 => AlphaCompare::Less,
            3 => AlphaCompare::LEqual,
            4 => AlphaCompare::Equal,
            5 => AlphaCompare::GEqual,
            6 => AlphaCompare::Greater,
            _ => AlphaCompare::NotEqual,
        }
    }

    pub fn alpha_fail(self) -> AlphaFail {
        match self.get(AFAIL, 3) {
            0 => AlphaFail::Keep,
            1 => AlphaFail::FbOnly,
            2 => AlphaFail::ZbOnly,
            _ => AlphaFail::RgbOnly,
        }
    }

    pub const fn alpha_ref(self) -> u8 {
        self.get(AREF, 0xFF) as u8
    }

    pub const fn dest_alpha_test(self) -> bool {
        self.flag(DATE)
    }

    /// Pass on destination alpha bit set (true) or clear (false).
    pub const fn dest_alpha_mode(self) -> bool {
        self.flag(DATM)
    }

    pub const fn blend_enabled(self) -> bool {
        self.flag(BLEND)
    }

    pub fn blend_a(self) -> BlendInput {
        blend_input_from(self.get(BLEND_A, 3))
    }

    pub fn blend_b(self) -> BlendInput {
        blend_input_from(self.get(BLEND_B, 3))
    }

    pub fn blend_c(self) -> BlendAlpha {
        match self.get(BLEND_C, 3) {
            0 => BlendAlpha::SrcAlpha,
            1 => BlendAlpha::FbAlpha,
            _ => BlendAlpha::Fixed,
        }
    }

    pub fn blend_d(self) -> BlendInput {
        blend_input_from(self.get(BLEND_D, 3))
    }

    /// Per-pixel blend enable from the source alpha MSB.
    pub const fn pabe(self) -> bool {
        self.flag(PABE)
    }

    /// Antialiased edge: coverage modulates alpha and forces blending on
    /// edge pixels.
    pub const fn aa1(self) -> bool {
        self.flag(AA1)
    }

    pub fn fb_format(self) -> FbFormat {
        match self.get(FBFMT, 3) {
            0 => FbFormat::C32,
            1 => FbFormat::C24,
            _ => FbFormat::C16,
        }
    }

    pub const fn color_clamp(self) -> bool {
        self.flag(COLCLAMP)
    }

    /// Force the destination alpha MSB on write.
    pub const fn fba(self) -> bool {
        self.flag(FBA)
    }

    pub const fn dither(self) -> bool {
        self.flag(DITHER)
    }

    pub const fn sprite(self) -> bool {
        self.flag(SPRITE)
    }

    /// Per-pixel (gouraud) color interpolation; flat otherwise.
    pub const fn iip(self) -> bool {
        self.flag(IIP)
    }

    pub const fn edge(self) -> bool {
        self.flag(EDGE)
    }

    pub const fn fog(self) -> bool {
        self.flag(FOG)
    }

    // ── derived predicates ────────────────────────────────────────────────

    /// C24 has no destination alpha; stages that read it are dead.
    pub fn dest_alpha_usable(self) -> bool {
        self.fb_format() != FbFormat::C24
    }

    /// Whether the pipeline must load the existing frame buffer contents.
    /// Stored by the builder so the generator and the predicates cannot
    /// drift apart.
    pub const fn needs_fb_read(self) -> bool {
        self.flag(FB_READ)
    }

    pub fn needs_texture(self) -> bool {
        self.tex_enabled()
    }

    /// The alpha test stage is dead when it can never reject anything.
    pub fn alpha_test_effective(self) -> bool {
        self.alpha_test() && self.alpha_compare() != AlphaCompare::Always
    }
}

fn wrap_from(bits: u64) -> WrapMode {
    match bits {
        0 => WrapMode::Repeat,
        1 => WrapMode::Clamp,
        2 => WrapMode::RegionRepeat,
        _ => WrapMode::RegionClamp,
    }
}

fn blend_input_from(bits: u64) -> BlendInput {
    match bits {
        0 => BlendInput::Src,
        1 => BlendInput::Fb,
        _ => BlendInput::Zero,
    }
}

/// Builder for [`PipelineSelector`]. All fields default to off/zero; `build`
/// fills in the derived bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorBuilder(u64);

impl SelectorBuilder {
    pub fn new() -> SelectorBuilder {
        SelectorBuilder(0)
    }

    fn set(mut self, shift: u32, mask: u64, value: u64) -> SelectorBuilder {
        self.0 = (self.0 & !(mask << shift)) | ((value & mask) << shift);
        self
    }

    fn set_flag(self, shift: u32, on: bool) -> SelectorBuilder {
        self.set(shift, 1, on as u64)
    }

    pub fn fwrite(self, on: bool) -> SelectorBuilder {
        self.set_flag(FWRITE, on)
    }

    pub fn zwrite(self, on: bool) -> SelectorBuilder {
        self.set_flag(ZWRITE, on)
    }

    pub fn ztest(self, on: bool) -> SelectorBuilder {
        self.set_flag(ZTEST, on)
    }

    pub fn depth_format(self, fmt: DepthFormat) -> SelectorBuilder {
        self.set(ZFMT, 3, fmt as u64)
    }

    pub fn depth_compare(self, cmp: DepthCompare) -> SelectorBuilder {
        self.set_flag(ZCMP, cmp == DepthCompare::Greater)
    }

    pub fn z_overflow(self, on: bool) -> SelectorBuilder {
        self.set_flag(ZOVERFLOW, on)
    }

    pub fn texture(self, on: bool) -> SelectorBuilder {
        self.set_flag(TEX, on)
    }

    pub fn tex_function(self, tfx: TexFunction) -> SelectorBuilder {
        self.set(TFX, 3, tfx as u64)
    }

    pub fn tcc(self, on: bool) -> SelectorBuilder {
        self.set_flag(TCC, on)
    }

    pub fn coord_mode(self, mode: CoordMode) -> SelectorBuilder {
        self.set_flag(COORD, mode == CoordMode::Uv)
    }

    pub fn bilinear(self, on: bool) -> SelectorBuilder {
        self.set_flag(BILINEAR, on)
    }

    pub fn wrap_u(self, mode: WrapMode) -> SelectorBuilder {
        self.set(WRAP_U, 3, mode as u64)
    }

    pub fn wrap_v(self, mode: WrapMode) -> SelectorBuilder {
        self.set(WRAP_V, 3, mode as u64)
    }

    pub fn indexed(self, on: bool) -> SelectorBuilder {
        self.set_flag(INDEXED, on)
    }

    pub fn mip_mode(self, mode: MipMode) -> SelectorBuilder {
        self.set(MIP, 3, mode as u64)
    }

    pub fn mip_const_lod(self, on: bool) -> SelectorBuilder {
        self.set_flag(MIP_CONST, on)
    }

    pub fn alpha_test(self, cmp: AlphaCompare, reference: u8, fail: AlphaFail) -> SelectorBuilder {
        self.set_flag(ATEST, true)
            .set(ACMP, 7, cmp as u64)
            .set(AREF, 0xFF, reference as u64)
            .set(AFAIL, 3, fail as u64)
    }

    pub fn dest_alpha_test(self, pass_on_set: bool) -> SelectorBuilder {
        self.set_flag(DATE, true).set_flag(DATM, pass_on_set)
    }

    pub fn blend(
        self,
        a: BlendInput,
        b: BlendInput,
        c: BlendAlpha,
        d: BlendInput,
    ) -> SelectorBuilder {
        self.set_flag(BLEND, true)
            .set(BLEND_A, 3, a as u64)
            .set(BLEND_B, 3, b as u64)
            .set(BLEND_C, 3, c as u64)
            .set(BLEND_D, 3, d as u64)
    }

    pub fn pabe(self, on: bool) -> SelectorBuilder {
        self.set_flag(PABE, on)
    }

    pub fn aa1(self, on: bool) -> SelectorBuilder {
        self.set_flag(AA1, on)
    }

    pub fn fb_format(self, fmt: FbFormat) -> SelectorBuilder {
        self.set(FBFMT, 3, fmt as u64)
    }

    pub fn color_clamp(self, on: bool) -> SelectorBuilder {
        self.set_flag(COLCLAMP, on)
    }

    pub fn fba(self, on: bool) -> SelectorBuilder {
        self.set_flag(FBA, on)
    }

    pub fn dither(self, on: bool) -> SelectorBuilder {
        self.set_flag(DITHER, on)
    }

    pub fn sprite(self, on: bool) -> SelectorBuilder {
        self.set_flag(SPRITE, on)
    }

    pub fn iip(self, on: bool) -> SelectorBuilder {
        self.set_flag(IIP, on)
    }

    pub fn edge(self, on: bool) -> SelectorBuilder {
        self.set_flag(EDGE, on)
    }

    pub fn fog(self, on: bool) -> SelectorBuilder {
        self.set_flag(FOG, on)
    }

    /// Finalize, computing the derived bits. Configuration that cannot
    /// influence the output is canonicalized away here so equivalent
    /// pipelines share one cache entry and one compilation.
    pub fn build(self) -> PipelineSelector {
        let mut sel = PipelineSelector(self.0);

        // Dest alpha is meaningless without an alpha channel.
        if !sel.dest_alpha_usable() && sel.dest_alpha_test() {
            sel.0 &= !(1 << DATE);
            sel.0 &= !(1 << DATM);
        }
        // Dithering only applies to 16-bit writes that happen.
        if !sel.fwrite() || sel.fb_format() != FbFormat::C16 {
            sel.0 &= !(1 << DITHER);
        }
        // An always-pass alpha test with no fail routing is a no-op.
        if sel.alpha_test() && sel.alpha_compare() == AlphaCompare::Always {
            sel.0 &= !(1 << ATEST);
            sel.0 &= !(7 << ACMP);
            sel.0 &= !(3 << AFAIL);
            sel.0 &= !(0xFF << AREF);
        }
        // Texture sub-fields are dead without texturing.
        if !sel.tex_enabled() {
            let tex_fields = (3u64 << TFX)
                | (1 << TCC)
                | (1 << COORD)
                | (1 << BILINEAR)
                | (3 << WRAP_U)
                | (3 << WRAP_V)
                | (1 << INDEXED)
                | (3 << MIP)
                | (1 << MIP_CONST);
            sel.0 &= !tex_fields;
        }
        // A constant LOD is an integer level: the mip fraction is zero and
        // trilinear degenerates to nearest-level.
        if sel.mip_mode() == MipMode::Off {
            sel.0 &= !(1 << MIP_CONST);
        } else if sel.mip_const_lod() && sel.mip_mode() == MipMode::Trilinear {
            sel.0 = (sel.0 & !(3 << MIP)) | (1 << MIP);
        }
        // Blend operand selectors are dead without blending.
        if !sel.blend_enabled() {
            sel.0 &= !((3u64 << BLEND_A) | (3 << BLEND_B) | (3 << BLEND_C) | (3 << BLEND_D));
        }

        let fb_read = sel.fwrite()
            && (sel.fb_format() == FbFormat::C24
                || (sel.blend_enabled()
                    && (sel.blend_a() == BlendInput::Fb
                        || sel.blend_b() == BlendInput::Fb
                        || sel.blend_d() == BlendInput::Fb
                        || sel.blend_c() == BlendAlpha::FbAlpha))
                || sel.dest_alpha_test()
                || (sel.alpha_test() && sel.alpha_fail() == AlphaFail::RgbOnly));
        sel.0 = (sel.0 & !(1 << FB_READ)) | ((fb_read as u64) << FB_READ);

        sel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip() {
        let sel = SelectorBuilder::new()
            .fwrite(true)
            .zwrite(true)
            .ztest(true)
            .depth_format(DepthFormat::Z24)
            .depth_compare(DepthCompare::Greater)
            .texture(true)
            .tex_function(TexFunction::Modulate)
            .bilinear(true)
            .wrap_u(WrapMode::RegionClamp)
            .wrap_v(WrapMode::Repeat)
            .alpha_test(AlphaCompare::GEqual, 0x80, AlphaFail::RgbOnly)
            .blend(BlendInput::Src, BlendInput::Fb, BlendAlpha::SrcAlpha, BlendInput::Fb)
            .fb_format(FbFormat::C32)
            .dither(true)
            .build();

        let back = PipelineSelector::from_bits(sel.bits());
        assert_eq!(sel, back);
        assert_eq!(back.depth_compare(), DepthCompare::Greater);
        assert_eq!(back.wrap_u(), WrapMode::RegionClamp);
        assert_eq!(back.alpha_ref(), 0x80);
        assert_eq!(back.blend_b(), BlendInput::Fb);
    }

    #[test]
    fn ge_and_gt_are_distinct() {
        let ge = SelectorBuilder::new()
            .ztest(true)
            .depth_compare(DepthCompare::GEqual)
            .build();
        let gt = SelectorBuilder::new()
            .ztest(true)
            .depth_compare(DepthCompare::Greater)
            .build();
        assert_ne!(ge.bits(), gt.bits());
    }

    #[test]
    fn c24_cancels_dest_alpha_test() {
        let sel = SelectorBuilder::new()
            .fwrite(true)
            .fb_format(FbFormat::C24)
            .dest_alpha_test(true)
            .build();
        assert!(!sel.dest_alpha_test());

        let same = SelectorBuilder::new()
            .fwrite(true)
            .fb_format(FbFormat::C24)
            .build();
        assert_eq!(sel.bits(), same.bits());
    }

    #[test]
    fn dither_requires_c16_write() {
        let no_write = SelectorBuilder::new()
            .fb_format(FbFormat::C16)
            .dither(true)
            .build();
        assert!(!no_write.dither());

        let c32 = SelectorBuilder::new()
            .fwrite(true)
            .fb_format(FbFormat::C32)
            .dither(true)
            .build();
        assert!(!c32.dither());

        let c16 = SelectorBuilder::new()
            .fwrite(true)
            .fb_format(FbFormat::C16)
            .dither(true)
            .build();
        assert!(c16.dither());
    }

    #[test]
    fn constant_lod_trilinear_degenerates_to_nearest() {
        let sel = SelectorBuilder::new()
            .texture(true)
            .mip_mode(MipMode::Trilinear)
            .mip_const_lod(true)
            .build();
        assert_eq!(sel.mip_mode(), MipMode::Nearest);
        assert!(sel.mip_const_lod());

        let no_mip = SelectorBuilder::new()
            .texture(true)
            .mip_const_lod(true)
            .build();
        assert_eq!(no_mip.mip_mode(), MipMode::Off);
        assert!(!no_mip.mip_const_lod());
    }

    #[test]
    fn fb_read_derivation() {
        let flat = SelectorBuilder::new().fwrite(true).build();
        assert!(!flat.needs_fb_read());

        let blend = SelectorBuilder::new()
            .fwrite(true)
            .blend(BlendInput::Src, BlendInput::Fb, BlendAlpha::SrcAlpha, BlendInput::Fb)
            .build();
        assert!(blend.needs_fb_read());

        let c24 = SelectorBuilder::new()
            .fwrite(true)
            .fb_format(FbFormat::C24)
            .build();
        assert!(c24.needs_fb_read());

        let rgb_only = SelectorBuilder::new()
            .fwrite(true)
            .alpha_test(AlphaCompare::Greater, 10, AlphaFail::RgbOnly)
            .build();
        assert!(rgb_only.needs_fb_read());
    }

    #[test]
    fn always_pass_alpha_test_is_canonicalized_out() {
        let on = SelectorBuilder::new()
            .fwrite(true)
            .alpha_test(AlphaCompare::Always, 0x55, AlphaFail::Keep)
            .build();
        let off = SelectorBuilder::new().fwrite(true).build();
        assert_eq!(on.bits(), off.bits());
    }
}
