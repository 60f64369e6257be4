//! Compiles a selector into an executable scanline function.

use scanjit_asm::{CodeBuffer, ExecBlock};
use scanjit_core::env::{PipelineEnv, ScanlineSpan};
use scanjit_core::selector::PipelineSelector;
use scanjit_core::CpuFeatures;
use tracing::debug;

use crate::codegen::{generator_for, ScanlineCodeGen};
use crate::PipelineError;

/// Signature of every generated scanline function. `right` is exclusive;
/// `span` and `env` must be 32-byte aligned and outlive the call.
pub type ScanlineFn =
    unsafe extern "sysv64" fn(i32, i32, i32, *const ScanlineSpan, *const PipelineEnv);

/// A compiled pixel pipeline for one selector.
pub struct ScanlineFunction {
    sel: PipelineSelector,
    width: usize,
    block: ExecBlock,
}

impl ScanlineFunction {
    pub fn selector(&self) -> PipelineSelector {
        self.sel
    }

    /// Pixels per generated loop iteration. Rows must be padded so a full
    /// group at the end of a span stays in bounds.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The finalized machine code, for inspection and byte-compare tests.
    pub fn code(&self) -> &[u8] {
        self.block.as_slice()
    }

    pub fn entry(&self) -> ScanlineFn {
        // The block was generated for this exact signature and is mapped
        // read-execute.
        unsafe { core::mem::transmute::<*const u8, ScanlineFn>(self.block.entry()) }
    }

    /// Rasterize one span.
    ///
    /// # Safety
    /// All buffers named by `env` must be valid for the span, with rows
    /// padded to a whole group, and `span`/`env` must be 32-byte aligned.
    pub unsafe fn run(
        &self,
        left: i32,
        right: i32,
        top: i32,
        span: &ScanlineSpan,
        env: &PipelineEnv,
    ) {
        unsafe { (self.entry())(left, right, top, span, env) }
    }
}

const INITIAL_CAPACITY: usize = 16 * 1024;

/// Compile `sel` with the widest generator the host supports.
pub fn build_scanline_function(
    sel: PipelineSelector,
) -> Result<ScanlineFunction, PipelineError> {
    let features = CpuFeatures::get();
    if !features.contains(CpuFeatures::SSE41) {
        return Err(PipelineError::UnsupportedCpu);
    }
    build_with(generator_for(features), sel)
}

/// Compile `sel` with a specific generator, regardless of the host.
/// Running the result still requires the matching CPU features.
pub fn build_with(
    generator: &dyn ScanlineCodeGen,
    sel: PipelineSelector,
) -> Result<ScanlineFunction, PipelineError> {
    let mut buf = CodeBuffer::new(INITIAL_CAPACITY)?;
    generator.generate(sel, &mut buf)?;
    let block = buf.finalize()?;
    debug!(
        selector = format_args!("{:#018x}", sel.bits()),
        bytes = block.len(),
        width = generator.width(),
        "compiled scanline function"
    );
    Ok(ScanlineFunction {
        sel,
        width: generator.width(),
        block,
    })
}

#[cfg(test)]
mod tests {
    use scanjit_core::selector::SelectorBuilder;

    use super::*;
    use crate::codegen::{Avx2Generator, Sse41Generator};

    fn flat_write() -> PipelineSelector {
        SelectorBuilder::new().fwrite(true).build()
    }

    #[test]
    fn same_selector_compiles_to_identical_code() {
        for generator in [&Sse41Generator as &dyn ScanlineCodeGen, &Avx2Generator] {
            let a = build_with(generator, flat_write()).unwrap();
            let b = build_with(generator, flat_write()).unwrap();
            assert!(!a.code().is_empty());
            assert_eq!(a.code(), b.code());
        }
    }

    #[test]
    fn distinct_selectors_compile_to_distinct_code() {
        let base = SelectorBuilder::new().fwrite(true).zwrite(true).ztest(true);
        let ge = build_with(&Sse41Generator, base.build()).unwrap();
        let gt = base
            .depth_compare(scanjit_core::selector::DepthCompare::Greater)
            .build();
        let gt = build_with(&Sse41Generator, gt).unwrap();
        assert_ne!(ge.code(), gt.code());
    }
}
