//! The selected kernel table must reproduce the reference kernels exactly.
//!
//! On hosts without AVX2 (or without the `simd` feature) selection returns the
//! reference kernels and these tests compare them with themselves.

use zenhevc::encoder::QuantBlock;
use zenhevc::strategy::{Op, SelectorOptions};
use zenhevc::{
    BlockSize, Coeff, Color, CuType, Pixel, QuantConfig, ResidualBlock, ResidualContext, Samples, SamplesMut,
    ScalingList, ScanOrder, SliceType, Strategies, TransformKind,
};

struct Rng(u32);

impl Rng {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }

    fn range(&mut self, lo: i32, hi: i32) -> i32 {
        lo + (self.next() % (hi - lo + 1) as u32) as i32
    }
}

fn pair(bitdepth: u8) -> (Strategies, Strategies) {
    let options = SelectorOptions::new(bitdepth).with_env(false);
    let selected = Strategies::select(&options).expect("generic backend always registers");
    (Strategies::generic(bitdepth), selected)
}

/// Store with every weight set to `weight`; small weights overflow 32-bit products.
fn uniform_lists(weight: u32, bitdepth: u8) -> ScalingList {
    let mut text = String::new();
    for (size, count) in [("4X4", 16), ("8X8", 64), ("16X16", 64), ("32X32", 64)] {
        for kind in ["INTRA", "INTER"] {
            for comp in ["LUMA", "CHROMAU", "CHROMAV"] {
                let row = vec![weight.to_string(); count].join(" ");
                text.push_str(&format!("{kind}{size}_{comp}\n{row}\n{kind}{size}_{comp}_DC\n{weight}\n"));
            }
        }
    }
    ScalingList::from_text(&text, bitdepth).expect("uniform file parses")
}

fn kinds() -> Vec<TransformKind> {
    let mut kinds = vec![TransformKind::Dst4];
    kinds.extend(BlockSize::ALL.iter().map(|&s| TransformKind::Dct(s)));
    kinds
}

#[test]
fn transforms_match_reference() {
    for bitdepth in [8u8, 10] {
        let (generic, selected) = pair(bitdepth);
        let max = (1i32 << bitdepth) - 1;
        let mut rng = Rng(0x1234_5678 ^ u32::from(bitdepth));
        for kind in kinds() {
            let n = kind.size().area();
            for round in 0..20 {
                let input: Vec<i16> = (0..n)
                    .map(|i| match round {
                        0 => max as i16,
                        1 => if i % 2 == 0 { max as i16 } else { -max as i16 },
                        _ => rng.range(-max, max) as i16,
                    })
                    .collect();
                let mut a = vec![0i16; n];
                let mut b = vec![0i16; n];
                (generic.forward(kind))(bitdepth, &input, &mut a);
                (selected.forward(kind))(bitdepth, &input, &mut b);
                assert_eq!(a, b, "forward {kind:?} bd {bitdepth} round {round}");

                let coeffs: Vec<i16> = (0..n).map(|_| rng.range(-32768, 32767) as i16).collect();
                (generic.inverse(kind))(bitdepth, &coeffs, &mut a);
                (selected.inverse(kind))(bitdepth, &coeffs, &mut b);
                assert_eq!(a, b, "inverse {kind:?} bd {bitdepth} round {round}");
            }
        }
    }
}

#[test]
fn quantization_matches_reference() {
    for bitdepth in [8u8, 10] {
        let (generic, selected) = pair(bitdepth);
        let mut rng = Rng(0xdead_beef);
        for lists in [
            ScalingList::flat(bitdepth),
            ScalingList::hevc_default(bitdepth),
            uniform_lists(1, bitdepth),
        ] {
            for qp in [0, 7, 22, 37, 51] {
                for slice_type in [SliceType::I, SliceType::B] {
                    let config = QuantConfig::new()
                        .with_bitdepth(bitdepth)
                        .with_qp(qp)
                        .with_slice_type(slice_type);
                    let params = zenhevc::encoder::QuantParams::new(&config, &lists);
                    for size in BlockSize::ALL {
                        for color in [Color::Y, Color::U, Color::V] {
                            if size == BlockSize::B32 && color != Color::Y {
                                continue;
                            }
                            let n = size.area();
                            let spread = rng.range(16, 32767);
                            let coeff: Vec<Coeff> = (0..n).map(|_| rng.range(-spread, spread) as Coeff).collect();
                            let block = QuantBlock::new(size, color, ScanOrder::Diagonal, CuType::Intra);

                            let mut qa = vec![0 as Coeff; n];
                            let mut qb = vec![0 as Coeff; n];
                            (generic.quant)(&params, &coeff, &mut qa, &block);
                            (selected.quant)(&params, &coeff, &mut qb, &block);
                            assert_eq!(qa, qb, "quant bd {bitdepth} qp {qp} {size:?} {color:?}");

                            let mut da = vec![0 as Coeff; n];
                            let mut db = vec![0 as Coeff; n];
                            (generic.dequant)(&params, &qa, &mut da, &block);
                            (selected.dequant)(&params, &qa, &mut db, &block);
                            assert_eq!(da, db, "dequant bd {bitdepth} qp {qp} {size:?} {color:?}");

                            assert_eq!((generic.coeff_abs_sum)(&coeff), (selected.coeff_abs_sum)(&coeff));
                            assert_eq!(
                                (generic.fast_coeff_cost)(&qa, size, qp),
                                (selected.fast_coeff_cost)(&qa, size, qp)
                            );
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn extreme_coefficients_match_reference() {
    let (generic, selected) = pair(8);
    let lists = ScalingList::flat(8);
    let params = zenhevc::encoder::QuantParams::new(&QuantConfig::new().with_qp(0), &lists);
    for size in BlockSize::ALL {
        let n = size.area();
        let coeff: Vec<Coeff> = (0..n).map(|i| if i % 3 == 0 { i16::MIN } else { i16::MAX }).collect();
        let block = QuantBlock::new(size, Color::Y, ScanOrder::Diagonal, CuType::Inter);
        let mut qa = vec![0 as Coeff; n];
        let mut qb = vec![0 as Coeff; n];
        (generic.quant)(&params, &coeff, &mut qa, &block);
        (selected.quant)(&params, &coeff, &mut qb, &block);
        assert_eq!(qa, qb, "{size:?}");
        assert_eq!((generic.coeff_abs_sum)(&coeff), (selected.coeff_abs_sum)(&coeff));
        assert_eq!((generic.fast_coeff_cost)(&coeff, size, 30), (selected.fast_coeff_cost)(&coeff, size, 30));
    }
}

#[test]
fn residual_pipeline_matches_reference() {
    for bitdepth in [8u8, 10] {
        let (generic, selected) = pair(bitdepth);
        let lists = ScalingList::flat(bitdepth);
        let max = (1i32 << bitdepth) - 1;
        let mut rng = Rng(0x0bad_cafe);
        for qp in [4, 22, 40] {
            let config = QuantConfig::new().with_bitdepth(bitdepth).with_qp(qp);
            for size in BlockSize::ALL {
                let width = size.width();
                let stride = width + 8;
                let reference: Vec<Pixel> = (0..stride * width).map(|_| rng.range(0, max) as Pixel).collect();
                let pred: Vec<Pixel> = (0..stride * width).map(|_| rng.range(0, max) as Pixel).collect();
                let block = ResidualBlock::new(QuantBlock::new(size, Color::Y, ScanOrder::Diagonal, CuType::Intra));

                let mut outputs = Vec::new();
                for kernels in [&generic, &selected] {
                    let ctx = ResidualContext::new(&config, &lists, kernels);
                    let mut rec = vec![0 as Pixel; stride * width];
                    let mut coeffs = vec![0 as Coeff; size.area()];
                    let has = (kernels.quantize_residual)(
                        &ctx,
                        &block,
                        Samples::new(&reference, stride),
                        Samples::new(&pred, stride),
                        SamplesMut::new(&mut rec, stride),
                        &mut coeffs,
                    );
                    assert!(rec.iter().all(|&p| i32::from(p) <= max));
                    outputs.push((has, rec, coeffs));
                }
                assert_eq!(outputs[0], outputs[1], "bd {bitdepth} qp {qp} {size:?}");
            }
        }
    }
}

#[test]
fn reconstruction_saturates_at_both_ends() {
    for bitdepth in [8u8, 10] {
        let (generic, selected) = pair(bitdepth);
        let lists = ScalingList::flat(bitdepth);
        let max = ((1u32 << bitdepth) - 1) as Pixel;
        let config = QuantConfig::new().with_bitdepth(bitdepth).with_qp(4);
        let block = ResidualBlock::new(QuantBlock::new(BlockSize::B8, Color::Y, ScanOrder::Diagonal, CuType::Inter));
        // Checkerboard of extremes with a prediction at the opposite extreme
        // makes the reconstruction overshoot in both directions.
        let reference: Vec<Pixel> = (0..64).map(|i| if (i / 8 + i) % 2 == 0 { max } else { 0 }).collect();
        let pred: Vec<Pixel> = reference.iter().map(|&p| max - p).collect();
        for kernels in [&generic, &selected] {
            let ctx = ResidualContext::new(&config, &lists, kernels);
            let mut rec = vec![0 as Pixel; 64];
            let mut coeffs = [0 as Coeff; 64];
            (kernels.quantize_residual)(
                &ctx,
                &block,
                Samples::new(&reference, 8),
                Samples::new(&pred, 8),
                SamplesMut::new(&mut rec, 8),
                &mut coeffs,
            );
            assert!(rec.iter().all(|&p| p <= max));
            let close = rec.iter().zip(&reference).filter(|(r, o)| r.abs_diff(**o) <= max / 8).count();
            assert!(close > 48, "{close} of 64 samples near the source");
        }
    }
}

#[test]
fn selection_reports_a_backend_for_every_op() {
    let (_, selected) = pair(8);
    for op in Op::ALL {
        let name = selected.backend(op);
        assert!(name == "generic" || name == "avx2", "{op:?} -> {name}");
    }
}
