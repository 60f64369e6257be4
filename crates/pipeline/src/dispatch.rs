//! Walks primitive spans and feeds them to compiled scanline functions.
//!
//! A draw hands over a selector, a pipeline environment, and the spans the
//! rasterizer produced for one primitive. Per-lane start vectors are fanned
//! out from the scalar span starts into arena-backed [`ScanlineSpan`]
//! blocks, grouped so the generated loop can step whole vectors at a time.

use bumpalo::Bump;
use scanjit_core::env::{PipelineEnv, ScanlineSpan};
use scanjit_core::selector::PipelineSelector;
use tracing::trace;

use crate::cache::FunctionCache;
use crate::PipelineError;

/// One horizontal span with interpolant values at its left edge.
/// `x1` is exclusive. Fixed-point values are 16.16.
#[derive(Debug, Clone, Copy, Default)]
pub struct Span {
    pub y: i32,
    pub x0: i32,
    pub x1: i32,
    pub z: u32,
    pub s: f32,
    pub t: f32,
    pub q: f32,
    pub u: i32,
    pub v: i32,
    pub r: i32,
    pub g: i32,
    pub b: i32,
    pub a: i32,
    pub fog: i32,
    pub cov: i32,
}

/// Per-pixel interpolant steps along x, shared by every span of a
/// primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gradients {
    pub dz: i32,
    pub ds: f32,
    pub dt: f32,
    pub dq: f32,
    pub du: i32,
    pub dv: i32,
    pub dr: i32,
    pub dg: i32,
    pub db: i32,
    pub da: i32,
    pub dfog: i32,
    pub dcov: i32,
}

#[derive(Default)]
pub struct Dispatcher {
    cache: FunctionCache,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher {
            cache: FunctionCache::new(),
        }
    }

    pub fn cache(&self) -> &FunctionCache {
        &self.cache
    }

    /// Rasterize all spans of one primitive.
    ///
    /// # Safety
    /// The buffers named by `env` must cover every span, with rows padded
    /// to a whole group of the compiled width, and `env` must stay valid
    /// for the whole call.
    pub unsafe fn draw_spans(
        &self,
        sel: PipelineSelector,
        env: &PipelineEnv,
        spans: &[Span],
        grad: &Gradients,
    ) -> Result<(), PipelineError> {
        let func = self.cache.get_or_build(sel)?;
        let width = func.width();
        trace!(
            selector = format_args!("{:#018x}", sel.bits()),
            spans = spans.len(),
            "dispatching spans"
        );

        let arena = Bump::new();
        for span in spans {
            if span.x1 <= span.x0 {
                continue;
            }
            let lanes = arena.alloc(fan_out(span, grad, width));
            unsafe { func.run(span.x0, span.x1, span.y, lanes, env) };
        }
        Ok(())
    }
}

/// Spread scalar span starts across vector lanes and scale the steps to
/// the group width. All eight lanes are filled; the 4-wide generator reads
/// the low half.
pub fn fan_out(span: &Span, g: &Gradients, width: usize) -> ScanlineSpan {
    let w = width as i32;
    let mut out = ScanlineSpan::default();
    for l in 0..8 {
        let li = l as i32;
        out.z.0[l] = (span.z as i32).wrapping_add(g.dz.wrapping_mul(li));
        out.z_step.0[l] = g.dz.wrapping_mul(w);
        out.s.0[l] = span.s + g.ds * li as f32;
        out.s_step.0[l] = g.ds * w as f32;
        out.t.0[l] = span.t + g.dt * li as f32;
        out.t_step.0[l] = g.dt * w as f32;
        out.q.0[l] = span.q + g.dq * li as f32;
        out.q_step.0[l] = g.dq * w as f32;
        out.u.0[l] = span.u.wrapping_add(g.du.wrapping_mul(li));
        out.u_step.0[l] = g.du.wrapping_mul(w);
        out.v.0[l] = span.v.wrapping_add(g.dv.wrapping_mul(li));
        out.v_step.0[l] = g.dv.wrapping_mul(w);
        out.r.0[l] = span.r.wrapping_add(g.dr.wrapping_mul(li));
        out.r_step.0[l] = g.dr.wrapping_mul(w);
        out.g.0[l] = span.g.wrapping_add(g.dg.wrapping_mul(li));
        out.g_step.0[l] = g.dg.wrapping_mul(w);
        out.b.0[l] = span.b.wrapping_add(g.db.wrapping_mul(li));
        out.b_step.0[l] = g.db.wrapping_mul(w);
        out.a.0[l] = span.a.wrapping_add(g.da.wrapping_mul(li));
        out.a_step.0[l] = g.da.wrapping_mul(w);
        out.fog.0[l] = span.fog.wrapping_add(g.dfog.wrapping_mul(li));
        out.fog_step.0[l] = g.dfog.wrapping_mul(w);
        out.cov.0[l] = span.cov.wrapping_add(g.dcov.wrapping_mul(li));
        out.cov_step.0[l] = g.dcov.wrapping_mul(w);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_spreads_starts_and_scales_steps() {
        let span = Span {
            z: 100,
            r: 10 << 16,
            ..Span::default()
        };
        let grad = Gradients {
            dz: 3,
            dr: 1 << 16,
            ..Gradients::default()
        };
        let lanes = fan_out(&span, &grad, 4);
        assert_eq!(lanes.z.0[0], 100);
        assert_eq!(lanes.z.0[3], 109);
        assert_eq!(lanes.z_step.0[0], 12);
        assert_eq!(lanes.r.0[2], 12 << 16);
        assert_eq!(lanes.r_step.0[1], 4 << 16);
    }
}
