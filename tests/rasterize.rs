//! Facade-level smoke test: compile, dispatch, and check a small draw.

#![cfg(target_arch = "x86_64")]

use scanjit::*;

const ROW: usize = 64;
const ROWS: usize = 16;

#[test]
fn textured_depth_tested_triangle_half() {
    // A right-triangle span set over a 4x4 texture, depth tested against a
    // cleared buffer.
    let texels: Vec<u32> = (0..16).map(|i| 0xFF00_0000 | i * 0x11).collect();

    let sel = SelectorBuilder::new()
        .fwrite(true)
        .ztest(true)
        .zwrite(true)
        .texture(true)
        .coord_mode(CoordMode::Uv)
        .wrap_u(WrapMode::Repeat)
        .wrap_v(WrapMode::Repeat)
        .build();

    let mut fb = vec![0u32; ROW * ROWS];
    let mut zb = vec![0u32; ROW * ROWS];
    let mut env = PipelineEnv {
        fb_base: fb.as_mut_ptr() as i64,
        fb_stride: (ROW * 4) as i64,
        zb_base: zb.as_mut_ptr() as i64,
        zb_stride: (ROW * 4) as i64,
        ..PipelineEnv::default()
    };
    env.tex[0] = TexLevel {
        base: texels.as_ptr() as i64,
        stride: 16,
        u_and: 3,
        v_and: 3,
        ..TexLevel::default()
    };

    let spans: Vec<Span> = (0..8)
        .map(|y| Span {
            y,
            x0: 0,
            x1: 8 - y,
            z: 100,
            u: 0x8000,
            v: (y << 16) + 0x8000,
            a: 0xFF << 16,
            ..Span::default()
        })
        .collect();

    let dispatcher = Dispatcher::new();
    unsafe {
        dispatcher
            .draw_spans(sel, &env, &spans, &Gradients { du: 1 << 16, ..Gradients::default() })
            .unwrap();
    }

    for y in 0..8 {
        for x in 0..ROW {
            let inside = (x as i32) < 8 - y as i32;
            let got = fb[y * ROW + x];
            if inside {
                let texel = texels[(y & 3) * 4 + (x & 3)];
                assert_eq!(got, texel, "({x}, {y})");
                assert_eq!(zb[y * ROW + x], 100, "depth at ({x}, {y})");
            } else {
                assert_eq!(got, 0, "({x}, {y}) outside");
                assert_eq!(zb[y * ROW + x], 0, "depth at ({x}, {y}) outside");
            }
        }
    }
}

#[test]
fn cpu_probe_reports_baseline_on_x86_64() {
    // Anything new enough to run the test suite has SSE4.1.
    assert!(CpuFeatures::get().contains(CpuFeatures::SSE41));
}
