//! Shared vocabulary of the scanjit pipeline compiler: the packed pipeline
//! selector, the environment records generated code reads, constant tables
//! and the CPU feature probe.

pub mod consts;
pub mod cpu;
pub mod env;
pub mod selector;

pub use cpu::CpuFeatures;
pub use env::{MAX_MIP_LEVELS, PipelineEnv, ScanlineSpan, TexLevel, Vec8f, Vec8i};
pub use selector::{
    AlphaCompare, AlphaFail, BlendAlpha, BlendInput, CoordMode, DepthCompare, DepthFormat,
    FbFormat, MipMode, PipelineSelector, SelectorBuilder, TexFunction, WrapMode,
};
