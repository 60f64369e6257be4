//! Scanline code generators.
//!
//! One generator exists per SIMD width; both produce functions with the same
//! ABI and the same pixel results, differing only in how many pixels a group
//! covers. Variant choice happens once at runtime from the CPU probe, not
//! per call.

mod avx2;
mod sse41;

pub use avx2::Avx2Generator;
pub use sse41::Sse41Generator;

use scanjit_asm::{AsmError, CodeBuffer};
use scanjit_core::{CpuFeatures, PipelineSelector};

/// A configurable scanline pipeline compiler for one SIMD width.
pub trait ScanlineCodeGen: Sync {
    /// Pixels per group.
    fn width(&self) -> usize;

    /// Emit the complete scanline function for `sel` into `buf`. On failure
    /// the buffer contents are unspecified and must be discarded.
    fn generate(&self, sel: PipelineSelector, buf: &mut CodeBuffer) -> Result<(), AsmError>;
}

static SSE41: Sse41Generator = Sse41Generator;
static AVX2: Avx2Generator = Avx2Generator;

/// Pick the widest generator the CPU supports. SSE4.1 is the floor; the
/// build entry point checks for it before getting here.
pub fn generator_for(features: CpuFeatures) -> &'static dyn ScanlineCodeGen {
    if features.has(CpuFeatures::AVX2) {
        &AVX2
    } else {
        &SSE41
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widest_supported_wins() {
        let avx2 = CpuFeatures::SSE2 | CpuFeatures::SSE41 | CpuFeatures::AVX | CpuFeatures::AVX2;
        assert_eq!(generator_for(avx2).width(), 8);

        let sse = CpuFeatures::SSE2 | CpuFeatures::SSE41;
        assert_eq!(generator_for(sse).width(), 4);
    }
}
