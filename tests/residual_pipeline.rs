//! End-to-end coding of transform units through `quantize_tr_residual`.

use std::cell::Cell;

use zenhevc::encoder::quantize::quant_scalar;
use zenhevc::encoder::{rdpcm, CoeffCost, QuantBlock, QuantParams, Rdoq, RdpcmMode};
use zenhevc::{
    quantize_tr_residual, BlockSize, Coeff, Color, CuType, Pixel, QuantConfig, ResidualBlock, ResidualContext,
    Samples, SamplesMut, ScalingList, ScanOrder, SelectorOptions, Strategies, TransformKind,
};

fn block(size: BlockSize, color: Color, cu_type: CuType) -> ResidualBlock {
    ResidualBlock::new(QuantBlock::new(size, color, ScanOrder::Diagonal, cu_type))
}

fn texture(width: usize, stride: usize, seed: u32, max: u32) -> Vec<Pixel> {
    let mut state = seed | 1;
    (0..stride * width)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % (max + 1)) as Pixel
        })
        .collect()
}

fn kernel_table(bitdepth: u8) -> Strategies {
    Strategies::select(&SelectorOptions::new(bitdepth).with_env(false)).expect("generic backend always registers")
}

#[test]
fn all_zero_4x4_produces_nothing() {
    let kernels = zenhevc::strategy::get();
    let zeros = [0i16; 16];
    let mut out = [7i16; 16];
    for kind in [TransformKind::Dst4, TransformKind::Dct(BlockSize::B4)] {
        (kernels.forward(kind))(8, &zeros, &mut out);
        assert_eq!(out, [0; 16]);
        (kernels.inverse(kind))(8, &zeros, &mut out);
        assert_eq!(out, [0; 16]);
    }

    let lists = ScalingList::flat(8);
    let config = QuantConfig::new();
    let params = QuantParams::new(&config, &lists);
    let qb = QuantBlock::new(BlockSize::B4, Color::Y, ScanOrder::Diagonal, CuType::Intra);
    quant_scalar(&params, &zeros, &mut out, &qb);
    assert_eq!(out, [0; 16]);

    let ctx = ResidualContext::new(&config, &lists, kernels);
    let reference = [0 as Pixel; 16];
    let mut pred_rec = [0 as Pixel; 16];
    let outcome = quantize_tr_residual(
        &ctx,
        &ResidualBlock::new(qb),
        Samples::new(&reference, 4),
        SamplesMut::new(&mut pred_rec, 4),
        &mut out,
    );
    assert!(!outcome.has_coeffs);
    assert_eq!(pred_rec, [0; 16]);
}

#[test]
fn equal_reference_and_prediction_leave_the_prediction() {
    for bitdepth in [8u8, 10] {
        let kernels = &kernel_table(bitdepth);
        let max = (1u32 << bitdepth) - 1;
        let lists = ScalingList::hevc_default(bitdepth);
        for transform_skip in [false, true] {
            let config = QuantConfig::new()
                .with_bitdepth(bitdepth)
                .with_qp(12)
                .with_transform_skip(transform_skip);
            let ctx = ResidualContext::new(&config, &lists, kernels);
            for size in BlockSize::ALL {
                for (color, cu_type) in [(Color::Y, CuType::Intra), (Color::U, CuType::Inter)] {
                    if size == BlockSize::B32 && color != Color::Y {
                        continue;
                    }
                    let width = size.width();
                    let stride = width + 5;
                    let source = texture(width, stride, width as u32 * 11 + u32::from(bitdepth), max);
                    let mut pred_rec = source.clone();
                    let mut coeffs = vec![3 as Coeff; size.area()];
                    let outcome = quantize_tr_residual(
                        &ctx,
                        &block(size, color, cu_type),
                        Samples::new(&source, stride),
                        SamplesMut::new(&mut pred_rec, stride),
                        &mut coeffs,
                    );
                    assert!(!outcome.has_coeffs, "{size:?} {color:?}");
                    assert!(coeffs.iter().all(|&c| c == 0));
                    assert_eq!(pred_rec, source);
                }
            }
        }
    }
}

#[test]
fn reconstruction_approaches_the_source_at_low_qp() {
    let kernels = &kernel_table(8);
    let lists = ScalingList::flat(8);
    for qp in [0, 10, 20] {
        let ctx = ResidualContext::new(&QuantConfig::new().with_qp(qp), &lists, kernels);
        for size in BlockSize::ALL {
            let width = size.width();
            let source = texture(width, width, 77, 255);
            let mut pred_rec = vec![128 as Pixel; width * width];
            let mut coeffs = vec![0 as Coeff; size.area()];
            let outcome = quantize_tr_residual(
                &ctx,
                &block(size, Color::Y, CuType::Intra),
                Samples::new(&source, width),
                SamplesMut::new(&mut pred_rec, width),
                &mut coeffs,
            );
            assert!(outcome.has_coeffs);
            let sad: u32 = pred_rec.iter().zip(&source).map(|(a, b)| u32::from(a.abs_diff(*b))).sum();
            let mean = sad as f64 / size.area() as f64;
            // Noise at 0..=255 around a flat prediction.
            let bound = 2.0 + f64::from(qp) * 2.0;
            assert!(mean < bound, "qp {qp} {size:?}: mean error {mean}");
        }
    }
}

#[test]
fn lossless_reconstructs_exactly_and_rdpcm_inverts() {
    let kernels = &kernel_table(10);
    let lists = ScalingList::flat(10);
    let config = QuantConfig::new().with_bitdepth(10).with_lossless(true, true);
    let ctx = ResidualContext::new(&config, &lists, kernels);
    for size in BlockSize::ALL {
        let width = size.width();
        let source = texture(width, width, 5, 1023);
        let pred = texture(width, width, 9, 1023);
        for (mode, direction) in [(10, Some(RdpcmMode::Horizontal)), (26, Some(RdpcmMode::Vertical)), (1, None)] {
            let mut pred_rec = pred.clone();
            let mut coeffs = vec![0 as Coeff; size.area()];
            let mut b = block(size, Color::Y, CuType::Intra);
            b.intra_mode = mode;
            let outcome = quantize_tr_residual(
                &ctx,
                &b,
                Samples::new(&source, width),
                SamplesMut::new(&mut pred_rec, width),
                &mut coeffs,
            );
            assert!(outcome.has_coeffs);
            assert!(!outcome.transform_skip);
            assert_eq!(pred_rec, source);

            let mut expected: Vec<Coeff> = source.iter().zip(&pred).map(|(&s, &p)| s as Coeff - p as Coeff).collect();
            if let Some(direction) = direction {
                rdpcm(size, direction, &mut expected);
            }
            assert_eq!(coeffs, expected, "{size:?} mode {mode}");
        }
    }
}

#[test]
fn lossless_inter_blocks_skip_rdpcm() {
    let kernels = &kernel_table(8);
    let lists = ScalingList::flat(8);
    let config = QuantConfig::new().with_lossless(true, true);
    let ctx = ResidualContext::new(&config, &lists, kernels);
    let source = texture(8, 8, 3, 255);
    let mut pred_rec = vec![100 as Pixel; 64];
    let mut coeffs = [0 as Coeff; 64];
    let mut b = block(BlockSize::B8, Color::Y, CuType::Inter);
    b.intra_mode = 10;
    quantize_tr_residual(
        &ctx,
        &b,
        Samples::new(&source, 8),
        SamplesMut::new(&mut pred_rec, 8),
        &mut coeffs,
    );
    for (c, s) in coeffs.iter().zip(&source) {
        assert_eq!(i32::from(*c), i32::from(*s) - 100);
    }
}

#[test]
fn early_skip_keeps_levels_but_not_the_reconstruction() {
    let kernels = &kernel_table(8);
    let lists = ScalingList::flat(8);
    let ctx = ResidualContext::new(&QuantConfig::new().with_qp(10), &lists, kernels);
    let source = texture(16, 16, 21, 255);
    let pred = vec![60 as Pixel; 256];
    let mut pred_rec = pred.clone();
    let mut coeffs = vec![0 as Coeff; 256];
    let mut b = block(BlockSize::B16, Color::Y, CuType::Inter);
    b.early_skip = true;
    let outcome = quantize_tr_residual(
        &ctx,
        &b,
        Samples::new(&source, 16),
        SamplesMut::new(&mut pred_rec, 16),
        &mut coeffs,
    );
    assert!(outcome.has_coeffs);
    assert!(coeffs.iter().any(|&c| c != 0));
    assert_eq!(pred_rec, pred);
}

#[test]
fn transform_skip_decision_reports_its_choice() {
    let kernels = &kernel_table(8);
    let lists = ScalingList::flat(8);
    // Sharp edges favour transform skip, smooth ramps the DST.
    let edge: Vec<Pixel> = (0..16).map(|i| if i % 4 == 1 { 250 } else { 10 }).collect();
    let ramp: Vec<Pixel> = (0..16).map(|i| 100 + (i % 4) as Pixel + (i / 4) as Pixel).collect();
    for lambda in [0.0, 30.0, 400.0] {
        let config = QuantConfig::new().with_qp(30).with_transform_skip(true).with_lambda(lambda);
        let ctx = ResidualContext::new(&config, &lists, kernels);
        for source in [&edge, &ramp] {
            let mut pred_rec = vec![100 as Pixel; 16];
            let mut coeffs = [0 as Coeff; 16];
            let outcome = quantize_tr_residual(
                &ctx,
                &block(BlockSize::B4, Color::Y, CuType::Intra),
                Samples::new(source, 4),
                SamplesMut::new(&mut pred_rec, 4),
                &mut coeffs,
            );
            assert_eq!(outcome.has_coeffs, coeffs.iter().any(|&c| c != 0));

            // The reported variant reproduces the reconstruction.
            let mut b = block(BlockSize::B4, Color::Y, CuType::Intra);
            b.transform_skip = outcome.transform_skip;
            let mut rec = vec![0 as Pixel; 16];
            let mut again = [0 as Coeff; 16];
            let pred = vec![100 as Pixel; 16];
            (kernels.quantize_residual)(
                &ctx,
                &b,
                Samples::new(source, 4),
                Samples::new(&pred, 4),
                SamplesMut::new(&mut rec, 4),
                &mut again,
            );
            assert_eq!(rec, pred_rec);
            assert_eq!(again, coeffs);
        }
    }
}

#[test]
fn chroma_never_tries_transform_skip() {
    let kernels = &kernel_table(8);
    let lists = ScalingList::flat(8);
    let config = QuantConfig::new().with_qp(30).with_transform_skip(true).with_lambda(1000.0);
    let ctx = ResidualContext::new(&config, &lists, kernels);
    let source: Vec<Pixel> = (0..16).map(|i| if i % 4 == 1 { 250 } else { 10 }).collect();
    let mut pred_rec = vec![100 as Pixel; 16];
    let mut coeffs = [0 as Coeff; 16];
    let outcome = quantize_tr_residual(
        &ctx,
        &block(BlockSize::B4, Color::U, CuType::Intra),
        Samples::new(&source, 4),
        SamplesMut::new(&mut pred_rec, 4),
        &mut coeffs,
    );
    assert!(!outcome.transform_skip);
}

/// Counts calls and quantizes every level to zero.
struct CountingRdoq(Cell<u32>);

impl Rdoq for CountingRdoq {
    fn quantize(&self, _params: &QuantParams<'_>, _coeff: &[Coeff], q: &mut [Coeff], block: &QuantBlock, _tr_depth: u8) {
        self.0.set(self.0.get() + 1);
        q[..block.size.area()].fill(0);
    }
}

#[test]
fn rdoq_collaborator_replaces_the_quantizer() {
    let kernels = &kernel_table(8);
    let lists = ScalingList::flat(8);
    let rdoq = CountingRdoq(Cell::new(0));
    let config = QuantConfig::new().with_qp(10).with_rdoq(true, true);
    let ctx = ResidualContext::new(&config, &lists, kernels).with_rdoq(&rdoq);

    for (size, expect_rdoq) in [(BlockSize::B4, false), (BlockSize::B8, true), (BlockSize::B32, true)] {
        let width = size.width();
        let source = texture(width, width, 13, 255);
        let mut pred_rec = vec![0 as Pixel; size.area()];
        let mut coeffs = vec![0 as Coeff; size.area()];
        let before = rdoq.0.get();
        let outcome = quantize_tr_residual(
            &ctx,
            &block(size, Color::Y, CuType::Inter),
            Samples::new(&source, width),
            SamplesMut::new(&mut pred_rec, width),
            &mut coeffs,
        );
        assert_eq!(rdoq.0.get() > before, expect_rdoq, "{size:?}");
        assert_eq!(outcome.has_coeffs, !expect_rdoq, "{size:?}");
    }

    // Without the 4x4 exclusion every size goes through it.
    let config = config.with_rdoq(true, false);
    let ctx = ResidualContext::new(&config, &lists, kernels).with_rdoq(&rdoq);
    let source = texture(4, 4, 13, 255);
    let mut pred_rec = vec![0 as Pixel; 16];
    let mut coeffs = [0 as Coeff; 16];
    let before = rdoq.0.get();
    quantize_tr_residual(
        &ctx,
        &block(BlockSize::B4, Color::Y, CuType::Inter),
        Samples::new(&source, 4),
        SamplesMut::new(&mut pred_rec, 4),
        &mut coeffs,
    );
    assert_eq!(rdoq.0.get(), before + 1);
}

/// Charges a fixed price per non-zero level.
struct PerLevel(u32);

impl CoeffCost for PerLevel {
    fn cost(&self, coeffs: &[Coeff], block: &QuantBlock) -> u32 {
        coeffs[..block.size.area()].iter().filter(|&&c| c != 0).count() as u32 * self.0
    }
}

#[test]
fn installed_cost_estimator_drives_the_skip_decision() {
    let lists = ScalingList::flat(8);
    let kernels = Strategies::generic(8);
    let config = QuantConfig::new().with_qp(22).with_transform_skip(true).with_lambda(1.0);
    let free = PerLevel(0);
    let ctx = ResidualContext::new(&config, &lists, &kernels).with_coeff_cost(&free);
    let qb = QuantBlock::new(BlockSize::B4, Color::Y, ScanOrder::Diagonal, CuType::Intra);
    assert_eq!(ctx.coeff_cost(&[1, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], &qb), 0);

    let priced = PerLevel(5);
    let ctx = ctx.with_coeff_cost(&priced);
    assert_eq!(ctx.coeff_cost(&[1, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], &qb), 10);

    let fallback = ResidualContext::new(&config, &lists, &kernels);
    let levels = [1 as Coeff; 16];
    assert_eq!(fallback.coeff_cost(&levels, &qb), (kernels.fast_coeff_cost)(&levels, BlockSize::B4, 22));
}

#[test]
#[should_panic(expected = "another bit depth")]
fn kernel_table_must_match_the_bitdepth() {
    let lists = ScalingList::flat(10);
    let kernels = kernel_table(8);
    let _ = ResidualContext::new(&QuantConfig::new().with_bitdepth(10), &lists, &kernels);
}

#[test]
fn ten_bit_coding_goes_through_a_ten_bit_table() {
    let kernels = kernel_table(10);
    assert_eq!(kernels.bitdepth(), 10);
    let lists = ScalingList::flat(10);
    let ctx = ResidualContext::new(&QuantConfig::new().with_bitdepth(10).with_qp(4), &lists, &kernels);
    let source = texture(8, 8, 41, 1023);
    let mut pred_rec = vec![512 as Pixel; 64];
    let mut coeffs = [0 as Coeff; 64];
    let outcome = quantize_tr_residual(
        &ctx,
        &block(BlockSize::B8, Color::Y, CuType::Inter),
        Samples::new(&source, 8),
        SamplesMut::new(&mut pred_rec, 8),
        &mut coeffs,
    );
    assert!(outcome.has_coeffs);
    assert!(pred_rec.iter().all(|&p| p <= 1023));
}
