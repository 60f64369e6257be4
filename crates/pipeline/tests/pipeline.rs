//! End-to-end tests: compile a pipeline, run it over real buffers, and
//! compare against the scalar reference.

#![cfg(target_arch = "x86_64")]

use scanjit_core::env::{PipelineEnv, TexLevel, Vec8i};
use scanjit_core::consts::DITHER_DEFAULT;
use scanjit_core::selector::{
    AlphaCompare, AlphaFail, BlendAlpha, BlendInput, CoordMode, DepthCompare, DepthFormat,
    FbFormat, MipMode, PipelineSelector, SelectorBuilder, WrapMode,
};
use scanjit_pipeline::{build_scanline_function, fan_out, interp, Dispatcher, Gradients, Span};

// Rows padded well past a full 8-wide group.
const ROW: usize = 32;
const ROWS: usize = 4;

fn env_with(fb: *mut u8, fb_stride: i64, zb: *mut u8, zb_stride: i64) -> PipelineEnv {
    PipelineEnv {
        fb_base: fb as i64,
        fb_stride,
        zb_base: zb as i64,
        zb_stride,
        aref: Vec8i::splat(128),
        afix: Vec8i::splat(128),
        ..PipelineEnv::default()
    }
}

/// Run `sel` over one span with the jit and the reference, each on its own
/// copy of the buffers, and require identical results.
fn cross_check(
    sel: PipelineSelector,
    env_of: impl Fn(*mut u8, *mut u8) -> PipelineEnv,
    fb_seed: &[u32],
    zb_seed: &[u32],
    span: Span,
    grad: Gradients,
) -> (Vec<u32>, Vec<u32>) {
    let func = build_scanline_function(sel).unwrap();
    let lanes = fan_out(&span, &grad, func.width());

    let mut fb_jit = fb_seed.to_vec();
    let mut zb_jit = zb_seed.to_vec();
    let env = env_of(fb_jit.as_mut_ptr() as *mut u8, zb_jit.as_mut_ptr() as *mut u8);
    unsafe { func.run(span.x0, span.x1, span.y, &lanes, &env) };

    let mut fb_ref = fb_seed.to_vec();
    let mut zb_ref = zb_seed.to_vec();
    let env = env_of(fb_ref.as_mut_ptr() as *mut u8, zb_ref.as_mut_ptr() as *mut u8);
    unsafe {
        interp::run_scanline(
            sel,
            &env,
            &lanes,
            span.x0,
            span.x1,
            span.y,
            func.width(),
        )
    };

    assert_eq!(fb_jit, fb_ref, "frame buffer diverged from the reference");
    assert_eq!(zb_jit, zb_ref, "depth buffer diverged from the reference");
    (fb_jit, zb_jit)
}

#[test]
fn flat_color_write() {
    let sel = SelectorBuilder::new().fwrite(true).build();
    let span = Span {
        y: 1,
        x0: 2,
        x1: 13,
        r: 10 << 16,
        g: 20 << 16,
        b: 30 << 16,
        a: 40 << 16,
        ..Span::default()
    };
    let (fb, _) = cross_check(
        sel,
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64),
        &vec![0u32; ROW * ROWS],
        &vec![0u32; ROW * ROWS],
        span,
        Gradients::default(),
    );

    let expected = 10 | 20 << 8 | 30 << 16 | 40 << 24;
    for x in 0..ROW {
        let got = fb[ROW + x];
        if (2..13).contains(&(x as i32)) {
            assert_eq!(got, expected, "pixel {x}");
        } else {
            assert_eq!(got, 0, "pixel {x} outside the span");
        }
    }
}

#[test]
fn gouraud_colors_step_along_the_span() {
    let sel = SelectorBuilder::new().fwrite(true).iip(true).build();
    let span = Span {
        x0: 0,
        x1: 16,
        r: 0,
        a: 255 << 16,
        ..Span::default()
    };
    let grad = Gradients {
        dr: 1 << 16,
        ..Gradients::default()
    };
    let (fb, _) = cross_check(
        sel,
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64),
        &vec![0u32; ROW * ROWS],
        &vec![0u32; ROW * ROWS],
        span,
        grad,
    );
    for x in 0..16u32 {
        assert_eq!(fb[x as usize], x | 255 << 24, "pixel {x}");
    }
}

#[test]
fn flat_shading_ignores_color_gradients() {
    // Same gradient as the gouraud test, but flat: the color registers
    // never step, so every group repeats the first group's colors.
    let sel = SelectorBuilder::new().fwrite(true).build();
    let width = build_scanline_function(sel).unwrap().width();
    let span = Span {
        x0: 0,
        x1: 16,
        r: 7 << 16,
        a: 255 << 16,
        ..Span::default()
    };
    let grad = Gradients {
        dr: 1 << 16,
        ..Gradients::default()
    };
    let (fb, _) = cross_check(
        sel,
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64),
        &vec![0u32; ROW * ROWS],
        &vec![0u32; ROW * ROWS],
        span,
        grad,
    );
    for x in 0..16 {
        assert_eq!(fb[x], fb[x % width], "pixel {x}");
    }
}

#[test]
fn greater_equal_depth_test_writes_passing_pixels() {
    let sel = SelectorBuilder::new()
        .fwrite(true)
        .ztest(true)
        .zwrite(true)
        .depth_compare(DepthCompare::GEqual)
        .build();

    // Source depth 500; buffer holds 400 for even pixels, 600 for odd.
    let mut zb_seed = vec![0u32; ROW * ROWS];
    for (x, z) in zb_seed[..ROW].iter_mut().enumerate() {
        *z = if x % 2 == 0 { 400 } else { 600 };
    }
    let span = Span {
        x0: 0,
        x1: 8,
        z: 500,
        r: 0xEE << 16,
        a: 0xFF << 16,
        ..Span::default()
    };
    let (fb, zb) = cross_check(
        sel,
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64),
        &vec![0u32; ROW * ROWS],
        &zb_seed,
        span,
        Gradients::default(),
    );

    for x in 0..8 {
        if x % 2 == 0 {
            assert_eq!(zb[x], 500, "depth updated at {x}");
            assert_eq!(fb[x], 0xEE | 0xFF << 24, "color written at {x}");
        } else {
            assert_eq!(zb[x], 600, "depth kept at {x}");
            assert_eq!(fb[x], 0, "color kept at {x}");
        }
    }
}

#[test]
fn greater_and_gequal_differ_on_equal_depth() {
    let base = SelectorBuilder::new().fwrite(true).ztest(true);
    let zb_seed = vec![500u32; ROW * ROWS];
    let span = Span {
        x0: 0,
        x1: 4,
        z: 500,
        r: 1 << 16,
        ..Span::default()
    };

    let (fb_ge, _) = cross_check(
        base.depth_compare(DepthCompare::GEqual).build(),
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64),
        &vec![0u32; ROW * ROWS],
        &zb_seed,
        span,
        Gradients::default(),
    );
    let (fb_gt, _) = cross_check(
        base.depth_compare(DepthCompare::Greater).build(),
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64),
        &vec![0u32; ROW * ROWS],
        &zb_seed,
        span,
        Gradients::default(),
    );

    assert_eq!(fb_ge[0], 1, "ties pass under greater-or-equal");
    assert_eq!(fb_gt[0], 0, "ties fail under strictly-greater");
}

#[test]
fn bilinear_between_texels_averages_within_one() {
    // 2x2 texture, two gray levels per row.
    let texels: Vec<u32> = vec![
        100 | 100 << 8 | 100 << 16 | 0xFF << 24,
        200 | 200 << 8 | 200 << 16 | 0xFF << 24,
        40 | 40 << 8 | 40 << 16 | 0xFF << 24,
        80 | 80 << 8 | 80 << 16 | 0xFF << 24,
    ];
    let sel = SelectorBuilder::new()
        .fwrite(true)
        .texture(true)
        .coord_mode(CoordMode::Uv)
        .bilinear(true)
        .wrap_u(WrapMode::Repeat)
        .wrap_v(WrapMode::Repeat)
        .build();

    // Sample at (1.0, 0.5) texels: horizontally midway between the two
    // texels of row 0, vertically on center.
    let span = Span {
        x0: 0,
        x1: 4,
        u: 1 << 16,
        v: 0x8000,
        a: 0xFF << 16,
        ..Span::default()
    };
    let env_of = |fb: *mut u8, zb: *mut u8| {
        let mut env = env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64);
        env.tex[0] = TexLevel {
            base: texels.as_ptr() as i64,
            stride: 8,
            u_and: 1,
            v_and: 1,
            ..TexLevel::default()
        };
        env
    };
    let (fb, _) = cross_check(
        sel,
        env_of,
        &vec![0u32; ROW * ROWS],
        &vec![0u32; ROW * ROWS],
        span,
        Gradients::default(),
    );

    let gray = (fb[0] & 0xFF) as i32;
    assert!((gray - 150).abs() <= 1, "midpoint sample came out {gray}");
}

#[test]
fn trilinear_lerps_between_mip_levels() {
    // Two 1x1 levels; q = 0.75 puts the group LOD halfway between them.
    let near: Vec<u32> = vec![100 | 100 << 8 | 100 << 16 | 0xFF << 24];
    let far: Vec<u32> = vec![200 | 200 << 8 | 200 << 16 | 0xFF << 24];
    let sel = SelectorBuilder::new()
        .fwrite(true)
        .texture(true)
        .coord_mode(CoordMode::Uv)
        .mip_mode(MipMode::Trilinear)
        .wrap_u(WrapMode::Repeat)
        .wrap_v(WrapMode::Repeat)
        .build();

    let span = Span {
        x0: 0,
        x1: 4,
        q: 0.75,
        a: 0xFF << 16,
        ..Span::default()
    };
    let env_of = |fb: *mut u8, zb: *mut u8| {
        let mut env = env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64);
        env.tex[0] = TexLevel {
            base: near.as_ptr() as i64,
            stride: 4,
            ..TexLevel::default()
        };
        env.tex[1] = TexLevel {
            base: far.as_ptr() as i64,
            stride: 4,
            ..TexLevel::default()
        };
        env
    };
    let (fb, _) = cross_check(
        sel,
        env_of,
        &vec![0u32; ROW * ROWS],
        &vec![0u32; ROW * ROWS],
        span,
        Gradients::default(),
    );

    // 100 + ((200 - 100) * 64 >> 7).
    assert_eq!(fb[0] & 0xFF, 150, "half-fraction level lerp");
}

#[test]
fn alpha_fail_rgb_only_keeps_alpha_and_depth() {
    let sel = SelectorBuilder::new()
        .fwrite(true)
        .zwrite(true)
        .alpha_test(AlphaCompare::Greater, 128, AlphaFail::RgbOnly)
        .build();

    // Source alpha 0x40 fails `> 128`.
    let fb_seed = vec![0x11 | 0x22 << 8 | 0x33 << 16 | 0xAB << 24; ROW * ROWS];
    let zb_seed = vec![777u32; ROW * ROWS];
    let span = Span {
        x0: 0,
        x1: 6,
        z: 1234,
        r: 0x50 << 16,
        g: 0x60 << 16,
        b: 0x70 << 16,
        a: 0x40 << 16,
        ..Span::default()
    };
    let (fb, zb) = cross_check(
        sel,
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64),
        &fb_seed,
        &zb_seed,
        span,
        Gradients::default(),
    );

    for x in 0..6 {
        assert_eq!(fb[x], 0x50 | 0x60 << 8 | 0x70 << 16 | 0xAB << 24, "pixel {x}");
        assert_eq!(zb[x], 777, "depth untouched at {x}");
    }
}

#[test]
fn alpha_blend_matches_reference() {
    let sel = SelectorBuilder::new()
        .fwrite(true)
        .blend(
            BlendInput::Src,
            BlendInput::Fb,
            BlendAlpha::SrcAlpha,
            BlendInput::Fb,
        )
        .build();

    let fb_seed = vec![0x40 | 0x40 << 8 | 0x40 << 16; ROW * ROWS];
    let span = Span {
        x0: 0,
        x1: 9,
        r: 0xC0 << 16,
        g: 0x80 << 16,
        b: 0x20 << 16,
        a: 0x40 << 16,
        ..Span::default()
    };
    let (fb, _) = cross_check(
        sel,
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64),
        &fb_seed,
        &vec![0u32; ROW * ROWS],
        span,
        Gradients::default(),
    );

    // (src - dst) * 64 >> 7 + dst at half alpha is the average.
    assert_eq!(fb[0] & 0xFF, 0x80);
    assert_eq!(fb[0] >> 8 & 0xFF, 0x60);
    assert_eq!(fb[0] >> 16 & 0xFF, 0x30);
}

#[test]
fn dispatcher_rasterizes_multiple_spans() {
    let sel = SelectorBuilder::new().fwrite(true).build();
    let mut fb = vec![0u32; ROW * ROWS];
    let mut zb = vec![0u32; ROW * ROWS];
    let env = env_with(
        fb.as_mut_ptr() as *mut u8,
        (ROW * 4) as i64,
        zb.as_mut_ptr() as *mut u8,
        (ROW * 4) as i64,
    );

    let spans: Vec<Span> = (0..3)
        .map(|y| Span {
            y,
            x0: y,
            x1: 10 - y,
            r: 0x7F << 16,
            a: 0xFF << 16,
            ..Span::default()
        })
        .collect();

    let dispatcher = Dispatcher::new();
    unsafe {
        dispatcher
            .draw_spans(sel, &env, &spans, &Gradients::default())
            .unwrap();
    }
    assert_eq!(dispatcher.cache().len(), 1);

    for y in 0..3usize {
        for x in 0..ROW {
            let inside = (x as i32) >= y as i32 && (x as i32) < 10 - y as i32;
            let got = fb[y * ROW + x];
            if inside {
                assert_eq!(got, 0x7F | 0xFF << 24, "({x}, {y})");
            } else {
                assert_eq!(got, 0, "({x}, {y})");
            }
        }
    }
}

#[test]
fn c16_write_packs_1555_with_dither() {
    let sel = SelectorBuilder::new()
        .fwrite(true)
        .fb_format(FbFormat::C16)
        .dither(true)
        .build();
    let span = Span {
        x0: 0,
        x1: 8,
        r: 100 << 16,
        g: 50 << 16,
        b: 200 << 16,
        a: 0xFF << 16,
        ..Span::default()
    };
    let env_of = |fb: *mut u8, zb: *mut u8| {
        let mut env = env_with(fb, (ROW * 2) as i64, zb, (ROW * 4) as i64);
        for (r, row) in DITHER_DEFAULT.iter().enumerate() {
            for lane in 0..8 {
                env.dither[r].0[lane] = row[lane & 3];
            }
        }
        env
    };
    let (fb, _) = cross_check(
        sel,
        env_of,
        &vec![0u32; ROW * ROWS],
        &vec![0u32; ROW * ROWS],
        span,
        Gradients::default(),
    );

    // Column 0 gets offset -3: (97>>3, 47>>3, 197>>3) plus the alpha MSB.
    assert_eq!(fb[0] & 0xFFFF, 12 | 5 << 5 | 24 << 10 | 0x8000);
    // Column 1 gets offset +1.
    assert_eq!(fb[0] >> 16, 12 | 6 << 5 | 25 << 10 | 0x8000);
}

#[test]
fn z16_depth_masks_to_16_bits() {
    let sel = SelectorBuilder::new()
        .fwrite(true)
        .ztest(true)
        .zwrite(true)
        .depth_compare(DepthCompare::GEqual)
        .depth_format(DepthFormat::Z16)
        .build();

    // Two 16-bit depth entries per u32: 400 for even pixels, 600 for odd.
    let zb_seed = vec![400 | 600 << 16; ROW * ROWS];
    let span = Span {
        x0: 0,
        x1: 8,
        z: 500,
        r: 0xEE << 16,
        a: 0xFF << 16,
        ..Span::default()
    };
    let (fb, zb) = cross_check(
        sel,
        |fb, zb| env_with(fb, (ROW * 4) as i64, zb, (ROW * 2) as i64),
        &vec![0u32; ROW * ROWS],
        &zb_seed,
        span,
        Gradients::default(),
    );

    // Even pixels pass and update depth; odd pixels keep both buffers.
    assert_eq!(zb[0] & 0xFFFF, 500);
    assert_eq!(zb[0] >> 16, 600);
    assert_eq!(fb[0], 0xEE | 0xFF << 24);
    assert_eq!(fb[1], 0);
}

#[test]
fn indexed_texture_reads_through_the_palette() {
    let indices: Vec<u8> = (0..8).collect();
    let palette: Vec<u32> = (0..8u32).map(|i| 0xFF00_0000 | (10 + 20 * i)).collect();
    let sel = SelectorBuilder::new()
        .fwrite(true)
        .texture(true)
        .coord_mode(CoordMode::Uv)
        .indexed(true)
        .wrap_u(WrapMode::Repeat)
        .wrap_v(WrapMode::Repeat)
        .build();

    let span = Span {
        x0: 0,
        x1: 8,
        a: 0xFF << 16,
        ..Span::default()
    };
    let grad = Gradients {
        du: 1 << 16,
        ..Gradients::default()
    };
    let env_of = |fb: *mut u8, zb: *mut u8| {
        let mut env = env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64);
        env.tex[0] = TexLevel {
            base: indices.as_ptr() as i64,
            stride: 8,
            u_and: 7,
            ..TexLevel::default()
        };
        env.palette = palette.as_ptr() as i64;
        env
    };
    let (fb, _) = cross_check(
        sel,
        env_of,
        &vec![0u32; ROW * ROWS],
        &vec![0u32; ROW * ROWS],
        span,
        grad,
    );

    for (x, want) in palette.iter().enumerate() {
        assert_eq!(fb[x], *want, "pixel {x}");
    }
}

#[test]
fn fog_blends_toward_the_fog_color() {
    let sel = SelectorBuilder::new().fwrite(true).fog(true).build();
    let span = Span {
        x0: 0,
        x1: 8,
        r: 200 << 16,
        g: 200 << 16,
        b: 200 << 16,
        a: 0xFF << 16,
        fog: 0x8000,
        ..Span::default()
    };
    let env_of = |fb: *mut u8, zb: *mut u8| {
        let mut env = env_with(fb, (ROW * 4) as i64, zb, (ROW * 4) as i64);
        env.fog_r = Vec8i::splat(100);
        env.fog_g = Vec8i::splat(60);
        env.fog_b = Vec8i::splat(20);
        env
    };
    let (fb, _) = cross_check(
        sel,
        env_of,
        &vec![0u32; ROW * ROWS],
        &vec![0u32; ROW * ROWS],
        span,
        Gradients::default(),
    );

    // fogc + ((c - fogc) * f >> 16) at half factor is the midpoint.
    assert_eq!(fb[0], 150 | 130 << 8 | 110 << 16 | 0xFF << 24);
}

#[test]
fn canonicalization_makes_dead_stages_share_code() {
    // Dest-alpha test is meaningless without a stored alpha channel.
    let c24_date = SelectorBuilder::new()
        .fwrite(true)
        .fb_format(scanjit_core::selector::FbFormat::C24)
        .dest_alpha_test(true)
        .build();
    let c24_plain = SelectorBuilder::new()
        .fwrite(true)
        .fb_format(scanjit_core::selector::FbFormat::C24)
        .build();
    assert_eq!(c24_date.bits(), c24_plain.bits());

    // Dither only exists for 16-bit color writes.
    let dith = SelectorBuilder::new().zwrite(true).dither(true).build();
    let plain = SelectorBuilder::new().zwrite(true).build();
    assert_eq!(dith.bits(), plain.bits());

    let a = build_scanline_function(c24_date).unwrap();
    let b = build_scanline_function(c24_plain).unwrap();
    assert_eq!(a.code(), b.code());
}
