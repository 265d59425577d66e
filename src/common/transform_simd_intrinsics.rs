//! AVX2 transforms as clipped matrix products.
//!
//! Each 1-D stage is `dst = clip16((left * right + round) >> shift)` with
//! 32-bit accumulation. Operands are ordered so no transpose is needed:
//! forward is `(X * Mt)` then `(M * tmp)`, inverse is `(Mt * C)` then
//! `(tmp * M)`. That is the same arithmetic as the partial butterflies, so
//! results are bit-exact with [`super::transform`].

use archmage::{arcane, rite, SimdToken, X64V3Token};
use core::arch::x86_64::*;
use safe_unaligned_simd::x86_64 as simd_mem;

use super::tables::{matrix, DCT4, DCT4_T, DST4, DST4_T};
use super::transform::{forward_scalar, forward_shifts, inverse_scalar, inverse_shifts, MAX_TR_AREA};
use super::types::{BlockSize, TransformKind};

const fn flatten4(m: &[[i16; 4]; 4]) -> [i16; 16] {
    let mut out = [0i16; 16];
    let mut i = 0;
    while i < 16 {
        out[i] = m[i / 4][i % 4];
        i += 1;
    }
    out
}

const DST4_FLAT: [i16; 16] = flatten4(&DST4);
const DST4_T_FLAT: [i16; 16] = flatten4(&DST4_T);
const DCT4_FLAT: [i16; 16] = flatten4(&DCT4);
const DCT4_T_FLAT: [i16; 16] = flatten4(&DCT4_T);

// =============================================================================
// Public dispatch functions
// =============================================================================

/// Forward 2-D transform, AVX2 when the host supports it.
pub fn forward_avx2(kind: TransformKind, bitdepth: u8, input: &[i16], output: &mut [i16]) {
    if let Some(token) = X64V3Token::summon() {
        forward_entry(token, kind, bitdepth, input, output);
    } else {
        forward_scalar(kind, bitdepth, input, output);
    }
}

/// Inverse 2-D transform, AVX2 when the host supports it.
pub fn inverse_avx2(kind: TransformKind, bitdepth: u8, input: &[i16], output: &mut [i16]) {
    if let Some(token) = X64V3Token::summon() {
        inverse_entry(token, kind, bitdepth, input, output);
    } else {
        inverse_scalar(kind, bitdepth, input, output);
    }
}

// =============================================================================
// Entry shims
// =============================================================================

#[arcane]
fn forward_entry(_token: X64V3Token, kind: TransformKind, bitdepth: u8, input: &[i16], output: &mut [i16]) {
    let size = kind.size();
    let n = size.area();
    assert!(input.len() >= n && output.len() >= n, "block buffers shorter than {n}");
    let (shift1, shift2) = forward_shifts(size, bitdepth);

    if size == BlockSize::B4 {
        let (m, mt) = small_matrices(kind);
        let mut x = [0i16; 16];
        x.copy_from_slice(&input[..16]);
        let mut tmp = [0i16; 16];
        let mut out = [0i16; 16];
        mul_clip_4x4(_token, &x, mt, &mut tmp, shift1);
        mul_clip_4x4(_token, m, &tmp, &mut out, shift2);
        output[..16].copy_from_slice(&out);
        return;
    }

    let width = size.width();
    let mut tmp = [0i16; MAX_TR_AREA];
    mul_clip_wide(_token, &input[..n], matrix(kind, true), &mut tmp[..n], width, shift1);
    mul_clip_wide(_token, matrix(kind, false), &tmp[..n], &mut output[..n], width, shift2);
}

#[arcane]
fn inverse_entry(_token: X64V3Token, kind: TransformKind, bitdepth: u8, input: &[i16], output: &mut [i16]) {
    let size = kind.size();
    let n = size.area();
    assert!(input.len() >= n && output.len() >= n, "block buffers shorter than {n}");
    let (shift1, shift2) = inverse_shifts(bitdepth);

    if size == BlockSize::B4 {
        let (m, mt) = small_matrices(kind);
        let mut c = [0i16; 16];
        c.copy_from_slice(&input[..16]);
        let mut tmp = [0i16; 16];
        let mut out = [0i16; 16];
        mul_clip_4x4(_token, mt, &c, &mut tmp, shift1);
        mul_clip_4x4(_token, &tmp, m, &mut out, shift2);
        output[..16].copy_from_slice(&out);
        return;
    }

    let width = size.width();
    let mut tmp = [0i16; MAX_TR_AREA];
    mul_clip_wide(_token, matrix(kind, true), &input[..n], &mut tmp[..n], width, shift1);
    mul_clip_wide(_token, &tmp[..n], matrix(kind, false), &mut output[..n], width, shift2);
}

fn small_matrices(kind: TransformKind) -> (&'static [i16; 16], &'static [i16; 16]) {
    match kind {
        TransformKind::Dst4 => (&DST4_FLAT, &DST4_T_FLAT),
        _ => (&DCT4_FLAT, &DCT4_T_FLAT),
    }
}

// =============================================================================
// Kernels
// =============================================================================

/// 4x4 product with both operands and the result held in single 256-bit registers.
///
/// Two output rows are computed per accumulator: the low lane holds row `2p`,
/// the high lane row `2p + 1`.
#[rite]
fn mul_clip_4x4(_token: X64V3Token, left: &[i16; 16], right: &[i16; 16], dst: &mut [i16; 16], shift: u32) {
    let rnd = _mm256_set1_epi32(1 << (shift - 1));
    let count = _mm_cvtsi32_si128(shift as i32);

    let b = simd_mem::_mm256_loadu_si256(right);
    let b01 = _mm256_cvtepi16_epi32(_mm256_castsi256_si128(b));
    let b23 = _mm256_cvtepi16_epi32(_mm256_extracti128_si256(b, 1));
    // Row k of `right`, widened and duplicated into both lanes.
    let rows = [
        _mm256_permute2x128_si256(b01, b01, 0x00),
        _mm256_permute2x128_si256(b01, b01, 0x11),
        _mm256_permute2x128_si256(b23, b23, 0x00),
        _mm256_permute2x128_si256(b23, b23, 0x11),
    ];

    let mut halves = [_mm256_setzero_si256(); 2];
    for (pair, acc) in halves.iter_mut().enumerate() {
        let top = &left[pair * 8..pair * 8 + 4];
        let bottom = &left[pair * 8 + 4..pair * 8 + 8];
        for k in 0..4 {
            let t = i32::from(top[k]);
            let u = i32::from(bottom[k]);
            let a = _mm256_setr_epi32(t, t, t, t, u, u, u, u);
            *acc = _mm256_add_epi32(*acc, _mm256_mullo_epi32(a, rows[k]));
        }
        *acc = _mm256_sra_epi32(_mm256_add_epi32(*acc, rnd), count);
    }

    // packs interleaves lanes as rows (0, 2 | 1, 3); restore row order.
    let packed = _mm256_packs_epi32(halves[0], halves[1]);
    simd_mem::_mm256_storeu_si256(dst, _mm256_permute4x64_epi64(packed, 0xD8));
}

/// `n`x`n` product for `n` in {8, 16, 32}, eight output columns at a time.
#[rite]
fn mul_clip_wide(_token: X64V3Token, left: &[i16], right: &[i16], dst: &mut [i16], n: usize, shift: u32) {
    let rnd = _mm256_set1_epi32(1 << (shift - 1));
    let count = _mm_cvtsi32_si128(shift as i32);
    let per_row = n / 8;
    let (right_chunks, _) = right.as_chunks::<8>();
    let (dst_chunks, _) = dst.as_chunks_mut::<8>();

    for i in 0..n {
        let lrow = &left[i * n..(i + 1) * n];
        for c in 0..per_row {
            let mut acc = _mm256_setzero_si256();
            for (k, &a) in lrow.iter().enumerate() {
                let b = _mm256_cvtepi16_epi32(simd_mem::_mm_loadu_si128(&right_chunks[k * per_row + c]));
                acc = _mm256_add_epi32(acc, _mm256_mullo_epi32(_mm256_set1_epi32(i32::from(a)), b));
            }
            let v = _mm256_sra_epi32(_mm256_add_epi32(acc, rnd), count);
            let packed = _mm_packs_epi32(_mm256_castsi256_si128(v), _mm256_extracti128_si256(v, 1));
            simd_mem::_mm_storeu_si128(&mut dst_chunks[i * per_row + c], packed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(n: usize, seed: u32, range: i32) -> Vec<i16> {
        let mut state = seed.wrapping_mul(0x9E37_79B9) | 1;
        (0..n)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                ((state % (2 * range as u32 + 1)) as i32 - range) as i16
            })
            .collect()
    }

    const KINDS: [TransformKind; 5] = [
        TransformKind::Dst4,
        TransformKind::Dct(BlockSize::B4),
        TransformKind::Dct(BlockSize::B8),
        TransformKind::Dct(BlockSize::B16),
        TransformKind::Dct(BlockSize::B32),
    ];

    #[test]
    fn avx2_matches_scalar() {
        if X64V3Token::summon().is_none() {
            return;
        }
        for bitdepth in [8u8, 10] {
            for kind in KINDS {
                let n = kind.size().area();
                for seed in 1..6 {
                    let input = noise(n, seed, (1 << bitdepth) - 1);
                    let mut fast = vec![0i16; n];
                    let mut reference = vec![0i16; n];
                    forward_avx2(kind, bitdepth, &input, &mut fast);
                    forward_scalar(kind, bitdepth, &input, &mut reference);
                    assert_eq!(fast, reference, "forward {kind:?} at {bitdepth} bits");

                    // Full-range coefficients exercise the saturating pack.
                    let coeffs = noise(n, seed + 50, i32::from(i16::MAX));
                    inverse_avx2(kind, bitdepth, &coeffs, &mut fast);
                    inverse_scalar(kind, bitdepth, &coeffs, &mut reference);
                    assert_eq!(fast, reference, "inverse {kind:?} at {bitdepth} bits");
                }
            }
        }
    }
}
