//! Pipeline compiler: turns a [`PipelineSelector`] into executable x86-64
//! scanline code, caches the results, and dispatches rasterizer spans.
//!
//! [`PipelineSelector`]: scanjit_core::selector::PipelineSelector

use scanjit_asm::AsmError;
use thiserror::Error;

pub mod build;
pub mod cache;
pub mod dispatch;
pub mod codegen;
pub mod interp;

pub use build::{build_scanline_function, ScanlineFn, ScanlineFunction};
pub use cache::FunctionCache;
pub use dispatch::{fan_out, Dispatcher, Gradients, Span};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The host is missing SSE4.1, the baseline for generated code.
    #[error("cpu does not support the baseline instruction set")]
    UnsupportedCpu,

    #[error("code generation failed: {0}")]
    Asm(#[from] AsmError),
}
