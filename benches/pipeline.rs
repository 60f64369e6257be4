use criterion::{criterion_group, criterion_main, Criterion};
use scanjit::*;
use std::hint::black_box;

const ROW: usize = 1024;
const ROWS: usize = 8;

fn textured_selector() -> PipelineSelector {
    SelectorBuilder::new()
        .fwrite(true)
        .ztest(true)
        .zwrite(true)
        .texture(true)
        .coord_mode(CoordMode::Uv)
        .bilinear(true)
        .blend(
            BlendInput::Src,
            BlendInput::Fb,
            BlendAlpha::SrcAlpha,
            BlendInput::Fb,
        )
        .build()
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("compile (flat)", |b| {
        let sel = SelectorBuilder::new().fwrite(true).build();
        b.iter(|| build_scanline_function(black_box(sel)).unwrap())
    });

    c.bench_function("compile (textured blend)", |b| {
        let sel = textured_selector();
        b.iter(|| build_scanline_function(black_box(sel)).unwrap())
    });

    c.bench_function("fill (flat 1k span)", |b| {
        let sel = SelectorBuilder::new().fwrite(true).build();
        let func = build_scanline_function(sel).unwrap();
        let mut fb = vec![0u32; ROW * ROWS];
        let mut zb = vec![0u32; ROW * ROWS];
        let env = PipelineEnv {
            fb_base: fb.as_mut_ptr() as i64,
            fb_stride: (ROW * 4) as i64,
            zb_base: zb.as_mut_ptr() as i64,
            zb_stride: (ROW * 4) as i64,
            ..PipelineEnv::default()
        };
        let span = Span {
            x1: (ROW - 8) as i32,
            r: 0x80 << 16,
            a: 0xFF << 16,
            ..Span::default()
        };
        let lanes = fan_out(&span, &Gradients::default(), func.width());
        b.iter(|| unsafe { func.run(span.x0, span.x1, span.y, black_box(&lanes), &env) })
    });

    c.bench_function("fill (depth tested 1k span)", |b| {
        let sel = SelectorBuilder::new()
            .fwrite(true)
            .ztest(true)
            .zwrite(true)
            .build();
        let func = build_scanline_function(sel).unwrap();
        let mut fb = vec![0u32; ROW * ROWS];
        let mut zb = vec![100u32; ROW * ROWS];
        let env = PipelineEnv {
            fb_base: fb.as_mut_ptr() as i64,
            fb_stride: (ROW * 4) as i64,
            zb_base: zb.as_mut_ptr() as i64,
            zb_stride: (ROW * 4) as i64,
            ..PipelineEnv::default()
        };
        let span = Span {
            x1: (ROW - 8) as i32,
            z: 500,
            r: 0x80 << 16,
            ..Span::default()
        };
        let lanes = fan_out(&span, &Gradients::default(), func.width());
        b.iter(|| unsafe { func.run(span.x0, span.x1, span.y, black_box(&lanes), &env) })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
