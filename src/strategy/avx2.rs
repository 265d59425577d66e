//! AVX2 kernels.
//!
//! Transforms, quantization and the cost estimate are exact at every bit
//! depth. Dequantization and the residual kernel are registered at 8-bit
//! only.

use archmage::{SimdToken, X64V3Token};

use super::{Backend, Kernel, Op, Registry, TransformFn};
use crate::common::transform_simd_intrinsics::{forward_avx2, inverse_avx2};
use crate::common::types::{BlockSize, TransformKind};
use crate::encoder::quantize::{coeff_abs_sum_avx2, dequant_avx2, fast_coeff_cost_avx2, quant_avx2};
use crate::encoder::residual::quantize_residual_avx2;

/// Priority of the vector kernels over the generic ones.
const PRIORITY: u32 = 40;

macro_rules! transform_kernel {
    ($name:ident, $dispatch:ident, $kind:expr) => {
        fn $name(bitdepth: u8, input: &[i16], output: &mut [i16]) {
            $dispatch($kind, bitdepth, input, output)
        }
    };
}

transform_kernel!(dct_4x4, forward_avx2, TransformKind::Dct(BlockSize::B4));
transform_kernel!(dct_8x8, forward_avx2, TransformKind::Dct(BlockSize::B8));
transform_kernel!(dct_16x16, forward_avx2, TransformKind::Dct(BlockSize::B16));
transform_kernel!(dct_32x32, forward_avx2, TransformKind::Dct(BlockSize::B32));
transform_kernel!(idct_4x4, inverse_avx2, TransformKind::Dct(BlockSize::B4));
transform_kernel!(idct_8x8, inverse_avx2, TransformKind::Dct(BlockSize::B8));
transform_kernel!(idct_16x16, inverse_avx2, TransformKind::Dct(BlockSize::B16));
transform_kernel!(idct_32x32, inverse_avx2, TransformKind::Dct(BlockSize::B32));
transform_kernel!(fast_forward_dst_4x4, forward_avx2, TransformKind::Dst4);
transform_kernel!(fast_inverse_dst_4x4, inverse_avx2, TransformKind::Dst4);

/// x86-64-v3 (AVX2 + FMA + BMI) kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Avx2;

impl Backend for Avx2 {
    fn name(&self) -> &'static str {
        "avx2"
    }

    fn is_available(&self) -> bool {
        X64V3Token::summon().is_some()
    }

    fn register(&self, bitdepth: u8, registry: &mut Registry) {
        let name = self.name();
        let transforms: [(Op, TransformFn); 10] = [
            (Op::Dct4x4, dct_4x4),
            (Op::Dct8x8, dct_8x8),
            (Op::Dct16x16, dct_16x16),
            (Op::Dct32x32, dct_32x32),
            (Op::Idct4x4, idct_4x4),
            (Op::Idct8x8, idct_8x8),
            (Op::Idct16x16, idct_16x16),
            (Op::Idct32x32, idct_32x32),
            (Op::FastForwardDst4x4, fast_forward_dst_4x4),
            (Op::FastInverseDst4x4, fast_inverse_dst_4x4),
        ];
        for (op, f) in transforms {
            registry.register(op, name, PRIORITY, Kernel::Transform(f));
        }
        registry.register(Op::Quant, name, PRIORITY, Kernel::Quant(quant_avx2));
        if bitdepth == 8 {
            registry.register(Op::Dequant, name, PRIORITY, Kernel::Dequant(dequant_avx2));
            registry.register(Op::QuantizeResidual, name, PRIORITY, Kernel::QuantizeResidual(quantize_residual_avx2));
        }
        // Same priority as generic; registered later, so it is preferred.
        registry.register(Op::CoeffAbsSum, name, 0, Kernel::CoeffAbsSum(coeff_abs_sum_avx2));
        registry.register(Op::FastCoeffCost, name, PRIORITY, Kernel::FastCoeffCost(fast_coeff_cost_avx2));
    }
}
