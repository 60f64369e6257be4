//! Just-in-time scanline pipeline compiler for software rasterization.
//!
//! A fixed-function pixel pipeline configuration is packed into a
//! [`PipelineSelector`]; [`build_scanline_function`] compiles it into a
//! branch-free x86-64 loop that shades one span per call, and
//! [`Dispatcher`] caches compiled pipelines and walks primitive spans
//! through them. The [`asm`] module exposes the underlying encoder for
//! code that wants to generate its own kernels.

pub use scanjit_asm as asm;

pub use scanjit_core::env::{PipelineEnv, ScanlineSpan, TexLevel, Vec8f, Vec8i, MAX_MIP_LEVELS};
pub use scanjit_core::selector::{
    AlphaCompare, AlphaFail, BlendAlpha, BlendInput, CoordMode, DepthCompare, DepthFormat,
    FbFormat, MipMode, PipelineSelector, SelectorBuilder, TexFunction, WrapMode,
};
pub use scanjit_core::{consts, CpuFeatures};

pub use scanjit_pipeline::{
    build_scanline_function, fan_out, interp, Dispatcher, FunctionCache, Gradients,
    PipelineError, ScanlineFn, ScanlineFunction, Span,
};
