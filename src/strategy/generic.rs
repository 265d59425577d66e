//! Portable reference kernels.

use super::{Backend, Kernel, Op, Registry};
use crate::common::transform::{
    dct_16x16_scalar, dct_32x32_scalar, dct_4x4_scalar, dct_8x8_scalar, fast_forward_dst_4x4_scalar,
    fast_inverse_dst_4x4_scalar, idct_16x16_scalar, idct_32x32_scalar, idct_4x4_scalar, idct_8x8_scalar,
};
use crate::encoder::quantize::{coeff_abs_sum_scalar, dequant_scalar, fast_coeff_cost_scalar, quant_scalar};
use crate::encoder::residual::quantize_residual_generic;

/// Scalar kernels, exact at every bit depth and always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generic;

impl Backend for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn register(&self, _bitdepth: u8, registry: &mut Registry) {
        let name = self.name();
        let transforms: [(Op, super::TransformFn); 10] = [
            (Op::Dct4x4, dct_4x4_scalar),
            (Op::Dct8x8, dct_8x8_scalar),
            (Op::Dct16x16, dct_16x16_scalar),
            (Op::Dct32x32, dct_32x32_scalar),
            (Op::Idct4x4, idct_4x4_scalar),
            (Op::Idct8x8, idct_8x8_scalar),
            (Op::Idct16x16, idct_16x16_scalar),
            (Op::Idct32x32, idct_32x32_scalar),
            (Op::FastForwardDst4x4, fast_forward_dst_4x4_scalar),
            (Op::FastInverseDst4x4, fast_inverse_dst_4x4_scalar),
        ];
        for (op, f) in transforms {
            registry.register(op, name, 0, Kernel::Transform(f));
        }
        registry.register(Op::Quant, name, 0, Kernel::Quant(quant_scalar));
        registry.register(Op::Dequant, name, 0, Kernel::Dequant(dequant_scalar));
        registry.register(Op::QuantizeResidual, name, 0, Kernel::QuantizeResidual(quantize_residual_generic));
        registry.register(Op::CoeffAbsSum, name, 0, Kernel::CoeffAbsSum(coeff_abs_sum_scalar));
        registry.register(Op::FastCoeffCost, name, 0, Kernel::FastCoeffCost(fast_coeff_cost_scalar));
    }
}
