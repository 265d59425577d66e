//! Reference integer transforms.
//!
//! Every 2-D transform is two 1-D partial-butterfly passes. A pass reads rows
//! and writes its result transposed, so running the same pass twice yields a
//! row-major output. Each matrix product is rounded, shifted and saturated to
//! 16 bits; the SIMD kernels reproduce this bit for bit.

#![allow(clippy::needless_range_loop)]

#[cfg(feature = "multiverse")]
use multiversed::multiversed;

use super::tables::{DCT16, DCT32, DCT4, DCT8, MAX_TR_DYNAMIC_RANGE};
use super::types::{BlockSize, TransformKind};

/// Largest block area handled by the transforms.
pub const MAX_TR_AREA: usize = 32 * 32;

/// Saturate to the coefficient range.
#[inline(always)]
pub(crate) fn clip16(v: i32) -> i16 {
    v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

#[inline(always)]
fn descale(sum: i32, shift: u32) -> i16 {
    clip16((sum + (1 << (shift - 1))) >> shift)
}

#[inline(always)]
fn dot(coeffs: &[i16], v: &[i32]) -> i32 {
    coeffs.iter().zip(v).map(|(&c, &x)| i32::from(c) * x).sum()
}

/// Sum of `m[r][k] * c[r]` over `r = first, first + step, ...`.
#[inline(always)]
fn column_sum<const N: usize>(m: &[[i16; N]; N], c: &[i32; N], k: usize, first: usize, step: usize) -> i32 {
    (first..N).step_by(step).map(|r| i32::from(m[r][k]) * c[r]).sum()
}

#[inline(always)]
fn load_column<const N: usize>(src: &[i16], j: usize) -> [i32; N] {
    let mut c = [0i32; N];
    for r in 0..N {
        c[r] = i32::from(src[r * N + j]);
    }
    c
}

/// `(shift1, shift2)` of the forward transform.
#[inline]
pub fn forward_shifts(size: BlockSize, bitdepth: u8) -> (u32, u32) {
    let log2 = size.log2();
    (log2 - 1 + (u32::from(bitdepth) - 8), log2 + 6)
}

/// `(shift1, shift2)` of the inverse transform.
#[inline]
pub fn inverse_shifts(bitdepth: u8) -> (u32, u32) {
    (7, 12 - (u32::from(bitdepth) - 8))
}

//------------------------------------------------------------------------------
// 1-D passes

#[cfg_attr(feature = "multiverse", multiversed)]
fn fast_forward_dst_4(src: &[i16], dst: &mut [i16], shift: u32) {
    for i in 0..4 {
        let b = |k: usize| i32::from(src[4 * i + k]);
        let c0 = b(0) + b(3);
        let c1 = b(1) + b(3);
        let c2 = b(0) - b(1);
        let c3 = 74 * b(2);

        dst[i] = descale(29 * c0 + 55 * c1 + c3, shift);
        dst[4 + i] = descale(74 * (b(0) + b(1) - b(3)), shift);
        dst[8 + i] = descale(29 * c2 + 55 * c0 - c3, shift);
        dst[12 + i] = descale(55 * c2 - 29 * c1 + c3, shift);
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn fast_inverse_dst_4(src: &[i16], dst: &mut [i16], shift: u32) {
    for i in 0..4 {
        let t = |k: usize| i32::from(src[k + i]);
        let c0 = t(0) + t(8);
        let c1 = t(8) + t(12);
        let c2 = t(0) - t(12);
        let c3 = 74 * t(4);

        dst[4 * i] = descale(29 * c0 + 55 * c1 + c3, shift);
        dst[4 * i + 1] = descale(55 * c2 - 29 * c1 + c3, shift);
        dst[4 * i + 2] = descale(74 * (t(0) - t(8) + t(12)), shift);
        dst[4 * i + 3] = descale(55 * c0 + 29 * c2 - c3, shift);
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn partial_butterfly_4(src: &[i16], dst: &mut [i16], shift: u32) {
    const LINE: usize = 4;
    let m = &DCT4;
    for (j, row) in src.chunks_exact(LINE).enumerate() {
        let x = |k: usize| i32::from(row[k]);
        let e = [x(0) + x(3), x(1) + x(2)];
        let o = [x(0) - x(3), x(1) - x(2)];

        dst[j] = descale(dot(&m[0][..2], &e), shift);
        dst[2 * LINE + j] = descale(dot(&m[2][..2], &e), shift);
        dst[LINE + j] = descale(dot(&m[1][..2], &o), shift);
        dst[3 * LINE + j] = descale(dot(&m[3][..2], &o), shift);
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn partial_butterfly_inverse_4(src: &[i16], dst: &mut [i16], shift: u32) {
    const LINE: usize = 4;
    let m = &DCT4;
    for j in 0..LINE {
        let c = load_column::<LINE>(src, j);
        let o = [column_sum(m, &c, 0, 1, 2), column_sum(m, &c, 1, 1, 2)];
        let e = [column_sum(m, &c, 0, 0, 2), column_sum(m, &c, 1, 0, 2)];

        let out = &mut dst[j * LINE..(j + 1) * LINE];
        out[0] = descale(e[0] + o[0], shift);
        out[1] = descale(e[1] + o[1], shift);
        out[2] = descale(e[1] - o[1], shift);
        out[3] = descale(e[0] - o[0], shift);
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn partial_butterfly_8(src: &[i16], dst: &mut [i16], shift: u32) {
    const LINE: usize = 8;
    let m = &DCT8;
    for (j, row) in src.chunks_exact(LINE).enumerate() {
        let mut e = [0i32; 4];
        let mut o = [0i32; 4];
        for k in 0..4 {
            e[k] = i32::from(row[k]) + i32::from(row[7 - k]);
            o[k] = i32::from(row[k]) - i32::from(row[7 - k]);
        }
        let ee = [e[0] + e[3], e[1] + e[2]];
        let eo = [e[0] - e[3], e[1] - e[2]];

        dst[j] = descale(dot(&m[0][..2], &ee), shift);
        dst[4 * LINE + j] = descale(dot(&m[4][..2], &ee), shift);
        dst[2 * LINE + j] = descale(dot(&m[2][..2], &eo), shift);
        dst[6 * LINE + j] = descale(dot(&m[6][..2], &eo), shift);
        for k in (1..8).step_by(2) {
            dst[k * LINE + j] = descale(dot(&m[k][..4], &o), shift);
        }
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn partial_butterfly_inverse_8(src: &[i16], dst: &mut [i16], shift: u32) {
    const LINE: usize = 8;
    let m = &DCT8;
    for j in 0..LINE {
        let c = load_column::<LINE>(src, j);
        let mut o = [0i32; 4];
        for k in 0..4 {
            o[k] = column_sum(m, &c, k, 1, 2);
        }
        let eo = [column_sum(m, &c, 0, 2, 4), column_sum(m, &c, 1, 2, 4)];
        let ee = [column_sum(m, &c, 0, 0, 4), column_sum(m, &c, 1, 0, 4)];

        let e = [ee[0] + eo[0], ee[1] + eo[1], ee[1] - eo[1], ee[0] - eo[0]];
        let out = &mut dst[j * LINE..(j + 1) * LINE];
        for k in 0..4 {
            out[k] = descale(e[k] + o[k], shift);
            out[k + 4] = descale(e[3 - k] - o[3 - k], shift);
        }
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn partial_butterfly_16(src: &[i16], dst: &mut [i16], shift: u32) {
    const LINE: usize = 16;
    let m = &DCT16;
    for (j, row) in src.chunks_exact(LINE).enumerate() {
        let mut e = [0i32; 8];
        let mut o = [0i32; 8];
        for k in 0..8 {
            e[k] = i32::from(row[k]) + i32::from(row[15 - k]);
            o[k] = i32::from(row[k]) - i32::from(row[15 - k]);
        }
        let mut ee = [0i32; 4];
        let mut eo = [0i32; 4];
        for k in 0..4 {
            ee[k] = e[k] + e[7 - k];
            eo[k] = e[k] - e[7 - k];
        }
        let eee = [ee[0] + ee[3], ee[1] + ee[2]];
        let eeo = [ee[0] - ee[3], ee[1] - ee[2]];

        dst[j] = descale(dot(&m[0][..2], &eee), shift);
        dst[8 * LINE + j] = descale(dot(&m[8][..2], &eee), shift);
        dst[4 * LINE + j] = descale(dot(&m[4][..2], &eeo), shift);
        dst[12 * LINE + j] = descale(dot(&m[12][..2], &eeo), shift);
        for k in (2..16).step_by(4) {
            dst[k * LINE + j] = descale(dot(&m[k][..4], &eo), shift);
        }
        for k in (1..16).step_by(2) {
            dst[k * LINE + j] = descale(dot(&m[k][..8], &o), shift);
        }
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn partial_butterfly_inverse_16(src: &[i16], dst: &mut [i16], shift: u32) {
    const LINE: usize = 16;
    let m = &DCT16;
    for j in 0..LINE {
        let c = load_column::<LINE>(src, j);
        let mut o = [0i32; 8];
        for k in 0..8 {
            o[k] = column_sum(m, &c, k, 1, 2);
        }
        let mut eo = [0i32; 4];
        for k in 0..4 {
            eo[k] = column_sum(m, &c, k, 2, 4);
        }
        let eeo = [column_sum(m, &c, 0, 4, 8), column_sum(m, &c, 1, 4, 8)];
        let eee = [column_sum(m, &c, 0, 0, 8), column_sum(m, &c, 1, 0, 8)];

        let mut ee = [0i32; 4];
        for k in 0..2 {
            ee[k] = eee[k] + eeo[k];
            ee[k + 2] = eee[1 - k] - eeo[1 - k];
        }
        let mut e = [0i32; 8];
        for k in 0..4 {
            e[k] = ee[k] + eo[k];
            e[k + 4] = ee[3 - k] - eo[3 - k];
        }
        let out = &mut dst[j * LINE..(j + 1) * LINE];
        for k in 0..8 {
            out[k] = descale(e[k] + o[k], shift);
            out[k + 8] = descale(e[7 - k] - o[7 - k], shift);
        }
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn partial_butterfly_32(src: &[i16], dst: &mut [i16], shift: u32) {
    const LINE: usize = 32;
    let m = &DCT32;
    for (j, row) in src.chunks_exact(LINE).enumerate() {
        let mut e = [0i32; 16];
        let mut o = [0i32; 16];
        for k in 0..16 {
            e[k] = i32::from(row[k]) + i32::from(row[31 - k]);
            o[k] = i32::from(row[k]) - i32::from(row[31 - k]);
        }
        let mut ee = [0i32; 8];
        let mut eo = [0i32; 8];
        for k in 0..8 {
            ee[k] = e[k] + e[15 - k];
            eo[k] = e[k] - e[15 - k];
        }
        let mut eee = [0i32; 4];
        let mut eeo = [0i32; 4];
        for k in 0..4 {
            eee[k] = ee[k] + ee[7 - k];
            eeo[k] = ee[k] - ee[7 - k];
        }
        let eeee = [eee[0] + eee[3], eee[1] + eee[2]];
        let eeeo = [eee[0] - eee[3], eee[1] - eee[2]];

        dst[j] = descale(dot(&m[0][..2], &eeee), shift);
        dst[16 * LINE + j] = descale(dot(&m[16][..2], &eeee), shift);
        dst[8 * LINE + j] = descale(dot(&m[8][..2], &eeeo), shift);
        dst[24 * LINE + j] = descale(dot(&m[24][..2], &eeeo), shift);
        for k in (4..32).step_by(8) {
            dst[k * LINE + j] = descale(dot(&m[k][..4], &eeo), shift);
        }
        for k in (2..32).step_by(4) {
            dst[k * LINE + j] = descale(dot(&m[k][..8], &eo), shift);
        }
        for k in (1..32).step_by(2) {
            dst[k * LINE + j] = descale(dot(&m[k][..16], &o), shift);
        }
    }
}

#[cfg_attr(feature = "multiverse", multiversed)]
fn partial_butterfly_inverse_32(src: &[i16], dst: &mut [i16], shift: u32) {
    const LINE: usize = 32;
    let m = &DCT32;
    for j in 0..LINE {
        let c = load_column::<LINE>(src, j);
        let mut o = [0i32; 16];
        for k in 0..16 {
            o[k] = column_sum(m, &c, k, 1, 2);
        }
        let mut eo = [0i32; 8];
        for k in 0..8 {
            eo[k] = column_sum(m, &c, k, 2, 4);
        }
        let mut eeo = [0i32; 4];
        for k in 0..4 {
            eeo[k] = column_sum(m, &c, k, 4, 8);
        }
        let eeeo = [column_sum(m, &c, 0, 8, 16), column_sum(m, &c, 1, 8, 16)];
        let eeee = [column_sum(m, &c, 0, 0, 16), column_sum(m, &c, 1, 0, 16)];

        let eee = [eeee[0] + eeeo[0], eeee[1] + eeeo[1], eeee[1] - eeeo[1], eeee[0] - eeeo[0]];
        let mut ee = [0i32; 8];
        for k in 0..4 {
            ee[k] = eee[k] + eeo[k];
            ee[k + 4] = eee[3 - k] - eeo[3 - k];
        }
        let mut e = [0i32; 16];
        for k in 0..8 {
            e[k] = ee[k] + eo[k];
            e[k + 8] = ee[7 - k] - eo[7 - k];
        }
        let out = &mut dst[j * LINE..(j + 1) * LINE];
        for k in 0..16 {
            out[k] = descale(e[k] + o[k], shift);
            out[k + 16] = descale(e[15 - k] - o[15 - k], shift);
        }
    }
}

//------------------------------------------------------------------------------
// 2-D transforms

type Pass = fn(&[i16], &mut [i16], u32);

fn two_pass(pass: Pass, size: BlockSize, shifts: (u32, u32), input: &[i16], output: &mut [i16]) {
    let n = size.area();
    assert!(input.len() >= n && output.len() >= n, "block buffers shorter than {n}");
    let mut tmp = [0i16; MAX_TR_AREA];
    pass(&input[..n], &mut tmp[..n], shifts.0);
    pass(&tmp[..n], &mut output[..n], shifts.1);
}

/// Forward 4x4 DST.
pub fn fast_forward_dst_4x4_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    let shifts = forward_shifts(BlockSize::B4, bitdepth);
    two_pass(fast_forward_dst_4, BlockSize::B4, shifts, input, output);
}

/// Inverse 4x4 DST.
pub fn fast_inverse_dst_4x4_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    two_pass(fast_inverse_dst_4, BlockSize::B4, inverse_shifts(bitdepth), input, output);
}

/// Forward 4x4 DCT.
pub fn dct_4x4_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    let shifts = forward_shifts(BlockSize::B4, bitdepth);
    two_pass(partial_butterfly_4, BlockSize::B4, shifts, input, output);
}

/// Forward 8x8 DCT.
pub fn dct_8x8_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    let shifts = forward_shifts(BlockSize::B8, bitdepth);
    two_pass(partial_butterfly_8, BlockSize::B8, shifts, input, output);
}

/// Forward 16x16 DCT.
pub fn dct_16x16_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    let shifts = forward_shifts(BlockSize::B16, bitdepth);
    two_pass(partial_butterfly_16, BlockSize::B16, shifts, input, output);
}

/// Forward 32x32 DCT.
pub fn dct_32x32_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    let shifts = forward_shifts(BlockSize::B32, bitdepth);
    two_pass(partial_butterfly_32, BlockSize::B32, shifts, input, output);
}

/// Inverse 4x4 DCT.
pub fn idct_4x4_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    two_pass(partial_butterfly_inverse_4, BlockSize::B4, inverse_shifts(bitdepth), input, output);
}

/// Inverse 8x8 DCT.
pub fn idct_8x8_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    two_pass(partial_butterfly_inverse_8, BlockSize::B8, inverse_shifts(bitdepth), input, output);
}

/// Inverse 16x16 DCT.
pub fn idct_16x16_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    two_pass(partial_butterfly_inverse_16, BlockSize::B16, inverse_shifts(bitdepth), input, output);
}

/// Inverse 32x32 DCT.
pub fn idct_32x32_scalar(bitdepth: u8, input: &[i16], output: &mut [i16]) {
    two_pass(partial_butterfly_inverse_32, BlockSize::B32, inverse_shifts(bitdepth), input, output);
}

/// Forward transform of any kind with the reference kernels.
pub fn forward_scalar(kind: TransformKind, bitdepth: u8, input: &[i16], output: &mut [i16]) {
    match kind {
        TransformKind::Dst4 => fast_forward_dst_4x4_scalar(bitdepth, input, output),
        TransformKind::Dct(BlockSize::B4) => dct_4x4_scalar(bitdepth, input, output),
        TransformKind::Dct(BlockSize::B8) => dct_8x8_scalar(bitdepth, input, output),
        TransformKind::Dct(BlockSize::B16) => dct_16x16_scalar(bitdepth, input, output),
        TransformKind::Dct(BlockSize::B32) => dct_32x32_scalar(bitdepth, input, output),
    }
}

/// Inverse transform of any kind with the reference kernels.
pub fn inverse_scalar(kind: TransformKind, bitdepth: u8, input: &[i16], output: &mut [i16]) {
    match kind {
        TransformKind::Dst4 => fast_inverse_dst_4x4_scalar(bitdepth, input, output),
        TransformKind::Dct(BlockSize::B4) => idct_4x4_scalar(bitdepth, input, output),
        TransformKind::Dct(BlockSize::B8) => idct_8x8_scalar(bitdepth, input, output),
        TransformKind::Dct(BlockSize::B16) => idct_16x16_scalar(bitdepth, input, output),
        TransformKind::Dct(BlockSize::B32) => idct_32x32_scalar(bitdepth, input, output),
    }
}

//------------------------------------------------------------------------------
// Transform skip

/// Scaling applied by transform skip, `15 - bitdepth - log2(N)`.
#[inline]
pub fn transform_skip_shift(size: BlockSize, bitdepth: u8) -> u32 {
    let shift = MAX_TR_DYNAMIC_RANGE - i32::from(bitdepth) - size.log2() as i32;
    assert!(shift >= 0, "transform skip undefined for {size:?} at {bitdepth} bits");
    shift as u32
}

/// Identity transform: scale the residual up to the coefficient domain.
///
/// Wraps in 16 bits like the bitstream's two's-complement arithmetic.
pub fn transform_skip(size: BlockSize, bitdepth: u8, residual: &[i16], coeff: &mut [i16]) {
    let n = size.area();
    let shift = transform_skip_shift(size, bitdepth);
    for (c, &r) in coeff[..n].iter_mut().zip(&residual[..n]) {
        *c = ((r as u16) << shift) as i16;
    }
}

/// Inverse of [`transform_skip`] with rounding.
pub fn inverse_transform_skip(size: BlockSize, bitdepth: u8, coeff: &[i16], residual: &mut [i16]) {
    let n = size.area();
    let shift = transform_skip_shift(size, bitdepth);
    let offset = if shift > 0 { 1i32 << (shift - 1) } else { 0 };
    for (r, &c) in residual[..n].iter_mut().zip(&coeff[..n]) {
        *r = ((i32::from(c) + offset) >> shift) as i16;
    }
}
