//! Coefficient quantization, sign-data hiding and inverse quantization.
//!
//! Scalar kernels are the reference. The AVX2 kernels (x86-64, `simd` feature)
//! produce bit-identical output and fall back to the scalar code when the host
//! lacks AVX2.

#![allow(clippy::needless_range_loop)]

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
use archmage::{arcane, SimdToken, X64V3Token};
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
use core::arch::x86_64::*;
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
use safe_unaligned_simd::x86_64 as simd_mem;

use super::config::QuantConfig;
use super::scaling_list::{list_id, ScalingList};
use crate::common::scan::{coeff_scan, CG_SIZE};
use crate::common::tables::{CHROMA_SCALE, INV_QUANT_SCALES, MAX_TR_DYNAMIC_RANGE, QUANT_SHIFT};
use crate::common::transform::clip16;
use crate::common::types::{BlockSize, Coeff, Color, CuType, ScanOrder, SliceType};

/// Description of the block being quantized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantBlock {
    /// Block size.
    pub size: BlockSize,
    /// Colour component.
    pub color: Color,
    /// Coefficient scan used by sign-data hiding.
    pub scan: ScanOrder,
    /// Prediction type of the owning coding unit.
    pub cu_type: CuType,
}

impl QuantBlock {
    /// Describe a block.
    pub fn new(size: BlockSize, color: Color, scan: ScanOrder, cu_type: CuType) -> Self {
        Self {
            size,
            color,
            scan,
            cu_type,
        }
    }

    /// Scaling-list type index of the block.
    #[inline]
    pub fn list_id(&self) -> usize {
        list_id(self.color, self.cu_type)
    }
}

/// Per-slice quantizer state shared by all blocks.
#[derive(Debug, Clone, Copy)]
pub struct QuantParams<'a> {
    /// Sample bit depth.
    pub bitdepth: u8,
    /// Quantization parameter before bit-depth scaling.
    pub qp: i32,
    /// Slice type; selects the rounding offset.
    pub slice_type: SliceType,
    /// Whether sign-data hiding runs after quantization.
    pub sign_hiding: bool,
    /// Quant/dequant tables.
    pub scaling_list: &'a ScalingList,
}

impl<'a> QuantParams<'a> {
    /// Parameters from a configuration and its scaling-list store.
    pub fn new(config: &QuantConfig, scaling_list: &'a ScalingList) -> Self {
        Self {
            bitdepth: config.bitdepth,
            qp: config.qp,
            slice_type: config.slice_type,
            sign_hiding: config.sign_hiding,
            scaling_list,
        }
    }

    /// Same parameters at another QP.
    #[must_use]
    pub fn with_qp(mut self, qp: i32) -> Self {
        self.qp = qp;
        self
    }
}

/// QP offset for high bit depths, `6 * (bitdepth - 8)`.
#[inline]
pub fn qp_bitdepth_offset(bitdepth: u8) -> i32 {
    6 * (i32::from(bitdepth) - 8)
}

/// QP of a component after chroma mapping and bit-depth offset.
pub fn scaled_qp(color: Color, qp: i32, qp_offset: i32) -> i32 {
    if color == Color::Y {
        return qp + qp_offset;
    }
    let qp = qp.clamp(-qp_offset, 57);
    if qp < 0 {
        qp + qp_offset
    } else {
        i32::from(CHROMA_SCALE[qp as usize]) + qp_offset
    }
}

/// Derived shift and rounding values for one block.
#[derive(Debug, Clone, Copy)]
struct Scaling {
    qp_rem: usize,
    qp_per: i32,
    transform_shift: i32,
    q_bits: i32,
    add: i32,
    list: usize,
}

impl Scaling {
    fn new(params: &QuantParams<'_>, block: &QuantBlock) -> Self {
        assert!(
            block.size != BlockSize::B32 || block.color == Color::Y,
            "32x32 blocks have luma scaling lists only"
        );
        let qp_scaled = scaled_qp(block.color, params.qp, qp_bitdepth_offset(params.bitdepth));
        assert!(qp_scaled >= 0, "negative scaled qp {qp_scaled}");
        let transform_shift = MAX_TR_DYNAMIC_RANGE - i32::from(params.bitdepth) - block.size.log2() as i32;
        let qp_per = qp_scaled / 6;
        let q_bits = QUANT_SHIFT + qp_per + transform_shift;
        let base = if params.slice_type == SliceType::I { 171 } else { 85 };
        Self {
            qp_rem: (qp_scaled % 6) as usize,
            qp_per,
            transform_shift,
            q_bits,
            add: base << (q_bits - 9),
            list: block.list_id(),
        }
    }
}

/// True if any of the first `n` coefficients is non-zero.
#[inline]
pub fn has_nonzero(coeffs: &[Coeff]) -> bool {
    coeffs.iter().any(|&c| c != 0)
}

//------------------------------------------------------------------------------
// Forward quantization

/// `|c| * m`, rounded and shifted.
#[inline(always)]
fn level_of(c: Coeff, m: i32, add: i32, q_bits: i32) -> i64 {
    (i64::from(c.unsigned_abs()) * i64::from(m) + i64::from(add)) >> q_bits
}

#[inline(always)]
fn clip16_wide(v: i64) -> Coeff {
    v.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as Coeff
}

/// Quantize a block and apply sign-data hiding.
pub fn quant_scalar(params: &QuantParams<'_>, coeff: &[Coeff], q: &mut [Coeff], block: &QuantBlock) {
    let n = block.size.area();
    assert!(coeff.len() >= n && q.len() >= n, "block buffers shorter than {n}");
    let s = Scaling::new(params, block);
    let quant = params.scaling_list.quant_coeffs(block.size, s.list, s.qp_rem);

    let mut ac_sum = 0u32;
    for i in 0..n {
        let c = coeff[i];
        let level = level_of(c, quant[i], s.add, s.q_bits);
        ac_sum = ac_sum.wrapping_add(level as u32);
        q[i] = clip16_wide(if c < 0 { -level } else { level });
    }

    if params.sign_hiding && ac_sum >= 2 {
        hide_signs(&coeff[..n], &mut q[..n], quant, block, s.q_bits, s.add);
    }
}

/// Apply sign-data hiding to levels `q` quantized from `coeff`.
///
/// Runs unconditionally; [`quant_scalar`] calls it only when hiding is
/// enabled and the level sum is at least 2. Levels that already carry their
/// signs are left unchanged.
pub fn sign_data_hiding(params: &QuantParams<'_>, coeff: &[Coeff], q: &mut [Coeff], block: &QuantBlock) {
    let n = block.size.area();
    assert!(coeff.len() >= n && q.len() >= n, "block buffers shorter than {n}");
    let s = Scaling::new(params, block);
    let quant = params.scaling_list.quant_coeffs(block.size, s.list, s.qp_rem);
    hide_signs(&coeff[..n], &mut q[..n], quant, block, s.q_bits, s.add);
}

/// Sign-data hiding over every coefficient group, last group first.
///
/// For each group whose first and last non-zero levels are at least four scan
/// positions apart, the sign of the first non-zero level is carried by the
/// parity of the group's level sum. When the parity is wrong the cheapest
/// single +-1 change, measured by the rounding error `delta_u`, is applied.
fn hide_signs(coeff: &[Coeff], q: &mut [Coeff], quant: &[i32], block: &QuantBlock, q_bits: i32, add: i32) {
    let scan = coeff_scan(block.scan, block.size);
    let q_bits8 = q_bits - 8;
    let mut seen_last_cg = false;

    for cg in (0..scan.len() / CG_SIZE).rev() {
        let pos = &scan[cg * CG_SIZE..(cg + 1) * CG_SIZE];
        let mut levels = [0 as Coeff; CG_SIZE];
        for (l, &p) in levels.iter_mut().zip(pos) {
            *l = q[p as usize];
        }
        let (Some(first), Some(last)) = (
            levels.iter().position(|&l| l != 0),
            levels.iter().rposition(|&l| l != 0),
        ) else {
            continue;
        };
        // The group holding the last non-zero level of the block only
        // considers positions up to that level.
        let is_last_cg = !seen_last_cg;
        seen_last_cg = true;

        if last - first < 4 {
            continue;
        }
        let sum: i32 = levels.iter().map(|&l| i32::from(l)).sum();
        let sign_bit = i32::from(levels[first] < 0);
        if sign_bit == sum & 1 {
            continue;
        }

        let mask_max = if is_last_cg { last } else { CG_SIZE - 1 };
        let mut costs = [i64::MAX; CG_SIZE];
        let mut changes = [0i16; CG_SIZE];
        for k in 0..=mask_max {
            let p = pos[k] as usize;
            let c = coeff[p];
            let m = quant[p];
            let level = level_of(c, m, add, q_bits).min(i64::from(i16::MAX));
            let delta_u = (i64::from(c.unsigned_abs()) * i64::from(m) - (level << q_bits)) >> q_bits8;

            let l = levels[k];
            let (cost, change) = if l != 0 {
                if delta_u > 0 {
                    (-delta_u, 1)
                } else if k == first && l.unsigned_abs() == 1 {
                    (i64::MAX, 0)
                } else {
                    (delta_u, -1)
                }
            } else if k < first && i32::from(c < 0) != sign_bit {
                (i64::MAX, 0)
            } else {
                (-delta_u, 1)
            };
            costs[k] = cost;
            changes[k] = change;
        }

        // Strict comparison walking down: ties keep the highest position.
        let mut best = CG_SIZE - 1;
        for k in (0..CG_SIZE - 1).rev() {
            if costs[k] < costs[best] {
                best = k;
            }
        }

        let p = pos[best] as usize;
        let current = q[p];
        let change = if current == i16::MAX || current == i16::MIN { -1 } else { changes[best] };
        let adjusted = if coeff[p] >= 0 {
            i32::from(current) + i32::from(change)
        } else {
            i32::from(current) - i32::from(change)
        };
        q[p] = clip16(adjusted);
    }
}

//------------------------------------------------------------------------------
// Inverse quantization

/// Scale quantized levels back to transform coefficients.
pub fn dequant_scalar(params: &QuantParams<'_>, q: &[Coeff], coeff: &mut [Coeff], block: &QuantBlock) {
    let n = block.size.area();
    assert!(coeff.len() >= n && q.len() >= n, "block buffers shorter than {n}");
    let s = Scaling::new(params, block);
    let shift = 20 - QUANT_SHIFT - s.transform_shift;
    let clip = |v: i64| v.clamp(i64::from(i16::MIN), i64::from(i16::MAX));

    if params.scaling_list.enabled() {
        let dequant = params.scaling_list.dequant_coeffs(block.size, s.list, s.qp_rem);
        let shift = shift + 4;
        if shift > s.qp_per {
            let down = shift - s.qp_per;
            let add = 1i64 << (down - 1);
            for i in 0..n {
                let v = i64::from(q[i]) * i64::from(dequant[i]);
                coeff[i] = clip((v + add) >> down) as i16;
            }
        } else {
            let up = s.qp_per - shift;
            for i in 0..n {
                let v = clip(i64::from(q[i]) * i64::from(dequant[i]));
                coeff[i] = clip(v << up) as i16;
            }
        }
    } else {
        let scale = i64::from(INV_QUANT_SCALES[s.qp_rem]) << s.qp_per;
        let add = 1i64 << (shift - 1);
        for i in 0..n {
            coeff[i] = clip((i64::from(q[i]) * scale + add) >> shift) as i16;
        }
    }
}

//------------------------------------------------------------------------------
// Coefficient statistics

/// Sum of absolute coefficient values.
pub fn coeff_abs_sum_scalar(coeffs: &[Coeff]) -> u32 {
    coeffs
        .iter()
        .fold(0u32, |acc, &c| acc.wrapping_add(u32::from(c.unsigned_abs())))
}

const fn to_q88(f: f64) -> i16 {
    (f * 256.0) as i16
}

/// Per-QP slope of the bit estimate for |c| = 0, 1, 2, >=3 and the per-width term.
const COST_WT_M: [i16; 5] = [
    to_q88(-0.004916),
    to_q88(0.010806),
    to_q88(0.055562),
    to_q88(0.033436),
    to_q88(-0.007690),
];

/// Intercepts matching [`COST_WT_M`].
const COST_WT_C: [i16; 5] = [
    to_q88(0.172024),
    to_q88(3.421462),
    to_q88(2.879506),
    to_q88(5.585471),
    to_q88(0.256772),
];

#[inline]
fn cost_weights(qp: i32) -> [i16; 4] {
    core::array::from_fn(|i| (i32::from(COST_WT_M[i]) * qp + i32::from(COST_WT_C[i])) as i16)
}

#[inline]
fn cost_width_term(size: BlockSize, qp: i32) -> u32 {
    (size.width() as i32 * (i32::from(COST_WT_M[4]) * qp + i32::from(COST_WT_C[4]))) as u32
}

/// Fast bit-cost estimate of a coefficient block in whole bits.
///
/// Each coefficient contributes a Q8.8 weight chosen by `min(|c|, 3)`, linear
/// in QP; a per-width term is added before dropping the fraction.
pub fn fast_coeff_cost_scalar(coeffs: &[Coeff], size: BlockSize, qp: i32) -> u32 {
    let n = size.area();
    assert!(coeffs.len() >= n, "coefficient buffer shorter than {n}");
    let wt = cost_weights(qp);
    let sum = coeffs[..n].iter().fold(0i32, |acc, &c| {
        // |i16::MIN| stays negative and falls in no bucket.
        let w = match c.wrapping_abs().min(3) {
            b @ 0..=3 => i32::from(wt[b as usize]),
            _ => 0,
        };
        acc.wrapping_add(w)
    });
    (sum as u32).wrapping_add(cost_width_term(size, qp)) >> 8
}

//------------------------------------------------------------------------------
// AVX2

/// True if `|c| * m + add` fits an `i32` lane for every 16-bit `c`.
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[inline]
fn product_fits_i32(m: i32, add: i32) -> bool {
    i64::from(m) * 32768 + i64::from(add) <= i64::from(i32::MAX)
}

/// AVX2 quantization. Sign-data hiding runs on the vector output.
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
pub fn quant_avx2(params: &QuantParams<'_>, coeff: &[Coeff], q: &mut [Coeff], block: &QuantBlock) {
    if let Some(token) = X64V3Token::summon() {
        quant_entry(token, params, coeff, q, block);
    } else {
        quant_scalar(params, coeff, q, block);
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[arcane]
fn quant_entry(_token: X64V3Token, params: &QuantParams<'_>, coeff: &[Coeff], q: &mut [Coeff], block: &QuantBlock) {
    let n = block.size.area();
    assert!(coeff.len() >= n && q.len() >= n, "block buffers shorter than {n}");
    let s = Scaling::new(params, block);
    let quant = params.scaling_list.quant_coeffs(block.size, s.list, s.qp_rem);
    let weighted = params.scaling_list.enabled();
    // Weights below 16 can push `|c| * m` past the 32-bit lanes.
    if weighted && quant[..n].iter().any(|&m| !product_fits_i32(m, s.add)) {
        quant_scalar(params, coeff, q, block);
        return;
    }

    let v_add = _mm256_set1_epi32(s.add);
    let count = _mm_cvtsi32_si128(s.q_bits);
    let zero = _mm256_setzero_si256();
    // The flat table holds one value; load it once.
    let mut low_b = _mm256_set1_epi32(quant[0]);
    let mut high_b = low_b;
    let mut v_ac_sum = zero;

    let (coeff_chunks, _) = coeff[..n].as_chunks::<16>();
    let (q_chunks, _) = q[..n].as_chunks_mut::<16>();
    let (quant_chunks, _) = quant.as_chunks::<8>();

    for (k, (src, dst)) in coeff_chunks.iter().zip(q_chunks.iter_mut()).enumerate() {
        if weighted {
            let lo = simd_mem::_mm256_loadu_si256(&quant_chunks[2 * k]);
            let hi = simd_mem::_mm256_loadu_si256(&quant_chunks[2 * k + 1]);
            // Match the per-lane order of unpacklo/unpackhi below.
            low_b = _mm256_permute2x128_si256(lo, hi, 0x20);
            high_b = _mm256_permute2x128_si256(lo, hi, 0x31);
        }
        let v = simd_mem::_mm256_loadu_si256(src);
        let abs = _mm256_abs_epi16(v);
        let level_a = _mm256_mullo_epi32(_mm256_unpacklo_epi16(abs, zero), low_b);
        let level_b = _mm256_mullo_epi32(_mm256_unpackhi_epi16(abs, zero), high_b);
        let level_a = _mm256_sra_epi32(_mm256_add_epi32(level_a, v_add), count);
        let level_b = _mm256_sra_epi32(_mm256_add_epi32(level_b, v_add), count);
        v_ac_sum = _mm256_add_epi32(v_ac_sum, _mm256_add_epi32(level_a, level_b));

        // Sign-extended inputs in the same lane order, then sign before clamping.
        let sign_a = _mm256_srai_epi32(_mm256_unpacklo_epi16(v, v), 16);
        let sign_b = _mm256_srai_epi32(_mm256_unpackhi_epi16(v, v), 16);
        let signed_a = _mm256_sign_epi32(level_a, sign_a);
        let signed_b = _mm256_sign_epi32(level_b, sign_b);
        simd_mem::_mm256_storeu_si256(dst, _mm256_packs_epi32(signed_a, signed_b));
    }

    let sum128 = _mm_add_epi32(_mm256_castsi256_si128(v_ac_sum), _mm256_extracti128_si256(v_ac_sum, 1));
    let sum128 = _mm_add_epi32(sum128, _mm_shuffle_epi32(sum128, 0x4E));
    let sum128 = _mm_add_epi32(sum128, _mm_shuffle_epi32(sum128, 0xB1));
    let ac_sum = _mm_cvtsi128_si32(sum128) as u32;

    if params.sign_hiding && ac_sum >= 2 {
        hide_signs(&coeff[..n], &mut q[..n], quant, block, s.q_bits, s.add);
    }
}

/// AVX2 inverse quantization of the flat path at 8-bit depth.
///
/// Wider depths and the matrix path use the scalar kernel, since their
/// products do not fit the 32-bit lanes.
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
pub fn dequant_avx2(params: &QuantParams<'_>, q: &[Coeff], coeff: &mut [Coeff], block: &QuantBlock) {
    if params.bitdepth == 8 && !params.scaling_list.enabled() {
        if let Some(token) = X64V3Token::summon() {
            dequant_flat_entry(token, params, q, coeff, block);
            return;
        }
    }
    dequant_scalar(params, q, coeff, block);
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[arcane]
fn dequant_flat_entry(_token: X64V3Token, params: &QuantParams<'_>, q: &[Coeff], coeff: &mut [Coeff], block: &QuantBlock) {
    let n = block.size.area();
    assert!(coeff.len() >= n && q.len() >= n, "block buffers shorter than {n}");
    let s = Scaling::new(params, block);
    let shift = 20 - QUANT_SHIFT - s.transform_shift;
    let v_scale = _mm256_set1_epi32(INV_QUANT_SCALES[s.qp_rem] << s.qp_per);
    let v_add = _mm256_set1_epi32(1 << (shift - 1));
    let count = _mm_cvtsi32_si128(shift);

    let (q_chunks, _) = q[..n].as_chunks::<16>();
    let (out_chunks, _) = coeff[..n].as_chunks_mut::<16>();
    for (src, dst) in q_chunks.iter().zip(out_chunks.iter_mut()) {
        let v = simd_mem::_mm256_loadu_si256(src);
        let lo = _mm256_cvtepi16_epi32(_mm256_castsi256_si128(v));
        let hi = _mm256_cvtepi16_epi32(_mm256_extracti128_si256(v, 1));
        let lo = _mm256_sra_epi32(_mm256_add_epi32(_mm256_mullo_epi32(lo, v_scale), v_add), count);
        let hi = _mm256_sra_epi32(_mm256_add_epi32(_mm256_mullo_epi32(hi, v_scale), v_add), count);
        let packed = _mm256_packs_epi32(lo, hi);
        simd_mem::_mm256_storeu_si256(dst, _mm256_permute4x64_epi64(packed, 0xD8));
    }
}

/// AVX2 sum of absolute coefficient values.
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
pub fn coeff_abs_sum_avx2(coeffs: &[Coeff]) -> u32 {
    if let Some(token) = X64V3Token::summon() {
        coeff_abs_sum_entry(token, coeffs)
    } else {
        coeff_abs_sum_scalar(coeffs)
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[arcane]
fn coeff_abs_sum_entry(_token: X64V3Token, coeffs: &[Coeff]) -> u32 {
    let (chunks, tail) = coeffs.as_chunks::<8>();
    let mut total = _mm256_setzero_si256();
    for chunk in chunks {
        let v = _mm256_cvtepi16_epi32(simd_mem::_mm_loadu_si128(chunk));
        total = _mm256_add_epi32(total, _mm256_abs_epi32(v));
    }
    let sum128 = _mm_add_epi32(_mm256_castsi256_si128(total), _mm256_extracti128_si256(total, 1));
    let mut parts = [0u32; 4];
    simd_mem::_mm_storeu_si128(&mut parts, sum128);
    parts
        .iter()
        .fold(coeff_abs_sum_scalar(tail), |acc, &p| acc.wrapping_add(p))
}

/// AVX2 fast bit-cost estimate.
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
pub fn fast_coeff_cost_avx2(coeffs: &[Coeff], size: BlockSize, qp: i32) -> u32 {
    if let Some(token) = X64V3Token::summon() {
        fast_coeff_cost_entry(token, coeffs, size, qp)
    } else {
        fast_coeff_cost_scalar(coeffs, size, qp)
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[arcane]
fn fast_coeff_cost_entry(_token: X64V3Token, coeffs: &[Coeff], size: BlockSize, qp: i32) -> u32 {
    let n = size.area();
    assert!(coeffs.len() >= n, "coefficient buffer shorter than {n}");
    let wt = cost_weights(qp);
    let zero = _mm256_setzero_si256();
    let ones = _mm256_set1_epi16(1);
    let twos = _mm256_set1_epi16(2);
    let threes = _mm256_set1_epi16(3);
    let weights = [
        _mm256_set1_epi16(wt[0]),
        _mm256_set1_epi16(wt[1]),
        _mm256_set1_epi16(wt[2]),
        _mm256_set1_epi16(wt[3]),
    ];

    let (chunks, _) = coeffs[..n].as_chunks::<16>();
    let mut acc = zero;
    for chunk in chunks {
        let bucket = _mm256_min_epi16(_mm256_abs_epi16(simd_mem::_mm256_loadu_si256(chunk)), threes);
        let w0 = _mm256_and_si256(_mm256_cmpeq_epi16(bucket, zero), weights[0]);
        let w1 = _mm256_and_si256(_mm256_cmpeq_epi16(bucket, ones), weights[1]);
        let w2 = _mm256_and_si256(_mm256_cmpeq_epi16(bucket, twos), weights[2]);
        let w3 = _mm256_and_si256(_mm256_cmpeq_epi16(bucket, threes), weights[3]);
        // madd against ones widens the 16-bit weights into 32-bit pair sums.
        let w01 = _mm256_add_epi32(_mm256_madd_epi16(w0, ones), _mm256_madd_epi16(w1, ones));
        let w23 = _mm256_add_epi32(_mm256_madd_epi16(w2, ones), _mm256_madd_epi16(w3, ones));
        acc = _mm256_add_epi32(acc, _mm256_add_epi32(w01, w23));
    }
    let sum128 = _mm_add_epi32(_mm256_castsi256_si128(acc), _mm256_extracti128_si256(acc, 1));
    let sum128 = _mm_add_epi32(sum128, _mm_shuffle_epi32(sum128, 0x4E));
    let sum128 = _mm_add_epi32(sum128, _mm_shuffle_epi32(sum128, 0xB1));
    let sum = _mm_cvtsi128_si32(sum128) as u32;
    sum.wrapping_add(cost_width_term(size, qp)) >> 8
}
