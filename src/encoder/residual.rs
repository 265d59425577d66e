//! Residual pipeline: residual, transform, quantization and reconstruction.
//!
//! [`quantize_residual_generic`] is the reference kernel. For one square block
//! it forms `reference - prediction`, transforms (or transform-skips) it,
//! quantizes, and, when any level is non-zero, dequantizes and inverse
//! transforms to write the reconstruction. Blocks without coefficients
//! reconstruct to the prediction.
//!
//! [`quantize_tr_residual`] is the per-transform-unit entry point. It chooses
//! between lossless bypass, the transform-skip decision and the plain kernel.

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
use archmage::{arcane, rite, SimdToken, X64V3Token};
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
use core::arch::x86_64::*;
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
use safe_unaligned_simd::x86_64 as simd_mem;

use super::config::QuantConfig;
use super::quantize::{has_nonzero, QuantBlock, QuantParams};
use super::scaling_list::ScalingList;
use crate::common::transform::{clip16, inverse_transform_skip, transform_skip, MAX_TR_AREA};
use crate::common::types::{BlockSize, Coeff, Color, CuType, Pixel, TransformKind};
use crate::strategy::Strategies;

/// Read-only view of a block of samples inside a larger plane.
#[derive(Debug, Clone, Copy)]
pub struct Samples<'a> {
    data: &'a [Pixel],
    stride: usize,
}

impl<'a> Samples<'a> {
    /// View `data` with rows `stride` samples apart.
    pub fn new(data: &'a [Pixel], stride: usize) -> Self {
        Self { data, stride }
    }

    /// Row stride in samples.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The first `width` samples of row `y`.
    #[inline]
    pub fn row(&self, y: usize, width: usize) -> &'a [Pixel] {
        &self.data[y * self.stride..][..width]
    }

    fn check(&self, width: usize) {
        assert!(
            self.stride >= width && self.data.len() >= self.stride * (width - 1) + width,
            "sample buffer too small for a {width}x{width} block"
        );
    }
}

/// Writable view of a block of samples inside a larger plane.
#[derive(Debug)]
pub struct SamplesMut<'a> {
    data: &'a mut [Pixel],
    stride: usize,
}

impl<'a> SamplesMut<'a> {
    /// View `data` with rows `stride` samples apart.
    pub fn new(data: &'a mut [Pixel], stride: usize) -> Self {
        Self { data, stride }
    }

    /// Row stride in samples.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Shorter-lived view of the same samples.
    #[inline]
    pub fn reborrow(&mut self) -> SamplesMut<'_> {
        SamplesMut {
            data: &mut *self.data,
            stride: self.stride,
        }
    }

    /// Read-only view of the same samples.
    #[inline]
    pub fn as_samples(&self) -> Samples<'_> {
        Samples {
            data: &*self.data,
            stride: self.stride,
        }
    }

    /// The first `width` samples of row `y`.
    #[inline]
    pub fn row_mut(&mut self, y: usize, width: usize) -> &mut [Pixel] {
        &mut self.data[y * self.stride..][..width]
    }

    fn check(&self, width: usize) {
        self.as_samples().check(width);
    }
}

/// Rate-distortion optimized quantization, provided by the caller.
///
/// Replaces the plain quantizer for a block; must fill `q` with `N*N` levels.
pub trait Rdoq {
    /// Quantize `coeff` into `q`. `tr_depth` is the transform depth inside the
    /// coding unit.
    fn quantize(&self, params: &QuantParams<'_>, coeff: &[Coeff], q: &mut [Coeff], block: &QuantBlock, tr_depth: u8);
}

/// Bit-cost estimate of a quantized block, provided by the caller.
pub trait CoeffCost {
    /// Estimated bits to code `coeffs`.
    fn cost(&self, coeffs: &[Coeff], block: &QuantBlock) -> u32;
}

/// Shared state of the residual pipeline.
#[derive(Clone, Copy)]
pub struct ResidualContext<'a> {
    /// Quantizer parameters.
    pub params: QuantParams<'a>,
    /// Kernel table the pipeline calls into.
    pub kernels: &'a Strategies,
    /// Optional RDOQ collaborator.
    pub rdoq: Option<&'a dyn Rdoq>,
    /// Use RDOQ when a collaborator is installed.
    pub use_rdoq: bool,
    /// Keep 4x4 blocks on the plain quantizer even with RDOQ on.
    pub rdoq_skip: bool,
    /// Try transform skip on 4x4 luma.
    pub transform_skip: bool,
    /// Bypass transform and quantization.
    pub lossless: bool,
    /// Implicit RDPCM for lossless intra blocks.
    pub implicit_rdpcm: bool,
    /// Lagrangian multiplier of the transform-skip decision.
    pub lambda: f64,
    /// Optional bit-cost estimator; defaults to the fast kernel.
    pub coeff_cost: Option<&'a dyn CoeffCost>,
}

impl<'a> ResidualContext<'a> {
    /// Context from a configuration, its scaling lists and a kernel table.
    ///
    /// Panics if `kernels` was selected for a bit depth other than the
    /// configuration's.
    pub fn new(config: &QuantConfig, scaling_list: &'a ScalingList, kernels: &'a Strategies) -> Self {
        assert_eq!(
            kernels.bitdepth(),
            config.bitdepth,
            "kernel table selected for another bit depth"
        );
        Self {
            params: QuantParams::new(config, scaling_list),
            kernels,
            rdoq: None,
            use_rdoq: config.rdoq,
            rdoq_skip: config.rdoq_skip,
            transform_skip: config.transform_skip,
            lossless: config.lossless,
            implicit_rdpcm: config.implicit_rdpcm,
            lambda: config.lambda,
            coeff_cost: None,
        }
    }

    /// Install an RDOQ collaborator.
    #[must_use]
    pub fn with_rdoq(mut self, rdoq: &'a dyn Rdoq) -> Self {
        self.rdoq = Some(rdoq);
        self
    }

    /// Install a bit-cost estimator.
    #[must_use]
    pub fn with_coeff_cost(mut self, cost: &'a dyn CoeffCost) -> Self {
        self.coeff_cost = Some(cost);
        self
    }

    /// Bit cost of a quantized block.
    pub fn coeff_cost(&self, coeffs: &[Coeff], block: &QuantBlock) -> u32 {
        match self.coeff_cost {
            Some(cost) => cost.cost(coeffs, block),
            None => (self.kernels.fast_coeff_cost)(coeffs, block.size, self.params.qp),
        }
    }
}

/// One transform block handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidualBlock {
    /// Quantization description of the block.
    pub quant: QuantBlock,
    /// Use transform skip instead of the DCT/DST.
    pub transform_skip: bool,
    /// Transform depth, forwarded to RDOQ.
    pub tr_depth: u8,
    /// Stop after quantization; the reconstruction is the prediction.
    pub early_skip: bool,
    /// Intra prediction mode; selects implicit RDPCM in lossless mode.
    pub intra_mode: u8,
}

impl ResidualBlock {
    /// Block with no transform skip, depth 0 and planar intra mode.
    pub fn new(quant: QuantBlock) -> Self {
        Self {
            quant,
            transform_skip: false,
            tr_depth: 0,
            early_skip: false,
            intra_mode: 0,
        }
    }
}

/// Result of coding one transform unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResidualOutcome {
    /// At least one coefficient is non-zero.
    pub has_coeffs: bool,
    /// The coefficients are transform-skipped.
    pub transform_skip: bool,
}

//------------------------------------------------------------------------------
// Shared stages

fn transform_kind(block: &QuantBlock) -> TransformKind {
    TransformKind::for_block(block.size, block.color, block.cu_type)
}

/// Transform, quantize, and report whether any level is non-zero.
fn transform_and_quantize(
    ctx: &ResidualContext<'_>,
    block: &ResidualBlock,
    residual: &[Coeff],
    coeff: &mut [Coeff],
    q: &mut [Coeff],
) -> bool {
    let qb = &block.quant;
    let bitdepth = ctx.params.bitdepth;
    if block.transform_skip {
        transform_skip(qb.size, bitdepth, residual, coeff);
    } else {
        (ctx.kernels.forward(transform_kind(qb)))(bitdepth, residual, coeff);
    }

    let use_rdoq = ctx.use_rdoq && (qb.size.width() > 4 || !ctx.rdoq_skip);
    match ctx.rdoq {
        Some(rdoq) if use_rdoq => rdoq.quantize(&ctx.params, coeff, q, qb, block.tr_depth),
        _ => (ctx.kernels.quant)(&ctx.params, coeff, q, qb),
    }
    has_nonzero(q)
}

/// Dequantize and inverse transform back to a residual.
fn dequantize_and_invert(ctx: &ResidualContext<'_>, block: &ResidualBlock, q: &[Coeff], coeff: &mut [Coeff], residual: &mut [Coeff]) {
    let qb = &block.quant;
    let bitdepth = ctx.params.bitdepth;
    (ctx.kernels.dequant)(&ctx.params, q, coeff, qb);
    if block.transform_skip {
        inverse_transform_skip(qb.size, bitdepth, coeff, residual);
    } else {
        (ctx.kernels.inverse(transform_kind(qb)))(bitdepth, coeff, residual);
    }
}

fn copy_block(src: Samples<'_>, mut dst: SamplesMut<'_>, width: usize) {
    for y in 0..width {
        dst.row_mut(y, width).copy_from_slice(src.row(y, width));
    }
}

#[inline]
fn max_pixel(bitdepth: u8) -> i32 {
    (1 << bitdepth) - 1
}

//------------------------------------------------------------------------------
// Generic kernel

/// Code one block with the scalar residual and reconstruction loops.
///
/// `coeff_out` receives the `N*N` quantized levels. Returns whether any of
/// them is non-zero.
pub fn quantize_residual_generic(
    ctx: &ResidualContext<'_>,
    block: &ResidualBlock,
    reference: Samples<'_>,
    pred: Samples<'_>,
    mut rec: SamplesMut<'_>,
    coeff_out: &mut [Coeff],
) -> bool {
    let size = block.quant.size;
    let width = size.width();
    let n = size.area();
    reference.check(width);
    pred.check(width);
    rec.check(width);
    assert!(coeff_out.len() >= n, "coefficient buffer shorter than {n}");

    let mut residual = [0 as Coeff; MAX_TR_AREA];
    for y in 0..width {
        let r = reference.row(y, width);
        let p = pred.row(y, width);
        for ((d, &r), &p) in residual[y * width..][..width].iter_mut().zip(r).zip(p) {
            *d = clip16(i32::from(r) - i32::from(p));
        }
    }

    let mut coeff = [0 as Coeff; MAX_TR_AREA];
    let q = &mut coeff_out[..n];
    let has_coeffs = transform_and_quantize(ctx, block, &residual[..n], &mut coeff[..n], q);

    if has_coeffs && !block.early_skip {
        dequantize_and_invert(ctx, block, q, &mut coeff[..n], &mut residual[..n]);
        let max = max_pixel(ctx.params.bitdepth);
        for y in 0..width {
            let p = pred.row(y, width);
            let res = &residual[y * width..][..width];
            for ((o, &p), &r) in rec.row_mut(y, width).iter_mut().zip(p).zip(res) {
                *o = (i32::from(p) + i32::from(r)).clamp(0, max) as Pixel;
            }
        }
    } else {
        copy_block(pred, rec, width);
    }
    has_coeffs
}

//------------------------------------------------------------------------------
// AVX2 kernel

/// Code one block with vector residual and reconstruction loops.
///
/// Quantization and transforms go through the kernel table, so the output
/// is identical to [`quantize_residual_generic`].
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
pub fn quantize_residual_avx2(
    ctx: &ResidualContext<'_>,
    block: &ResidualBlock,
    reference: Samples<'_>,
    pred: Samples<'_>,
    rec: SamplesMut<'_>,
    coeff_out: &mut [Coeff],
) -> bool {
    if let Some(token) = X64V3Token::summon() {
        quantize_residual_entry(token, ctx, block, reference, pred, rec, coeff_out)
    } else {
        quantize_residual_generic(ctx, block, reference, pred, rec, coeff_out)
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[arcane]
fn quantize_residual_entry(
    _token: X64V3Token,
    ctx: &ResidualContext<'_>,
    block: &ResidualBlock,
    reference: Samples<'_>,
    pred: Samples<'_>,
    rec: SamplesMut<'_>,
    coeff_out: &mut [Coeff],
) -> bool {
    let size = block.quant.size;
    let width = size.width();
    let n = size.area();
    reference.check(width);
    pred.check(width);
    rec.check(width);
    assert!(coeff_out.len() >= n, "coefficient buffer shorter than {n}");
    let mut rec = rec;

    let mut residual = [0 as Coeff; MAX_TR_AREA];
    residual_rows(_token, reference, pred, &mut residual[..n], width);

    let mut coeff = [0 as Coeff; MAX_TR_AREA];
    let q = &mut coeff_out[..n];
    let has_coeffs = transform_and_quantize(ctx, block, &residual[..n], &mut coeff[..n], q);

    if has_coeffs && !block.early_skip {
        dequantize_and_invert(ctx, block, q, &mut coeff[..n], &mut residual[..n]);
        recon_rows(_token, pred, &residual[..n], &mut rec, width, ctx.params.bitdepth);
    } else {
        copy_block(pred, rec, width);
    }
    has_coeffs
}

/// `reference - pred` into a packed `width * width` block.
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[rite]
fn residual_rows(_token: X64V3Token, reference: Samples<'_>, pred: Samples<'_>, out: &mut [Coeff], width: usize) {
    if width == 4 {
        let (rows, _) = out.as_chunks_mut::<4>();
        for (y, dst) in rows.iter_mut().enumerate() {
            let (r, _) = reference.row(y, 4).as_chunks::<4>();
            let (p, _) = pred.row(y, 4).as_chunks::<4>();
            let diff = _mm_sub_epi16(simd_mem::_mm_loadu_si64(&r[0]), simd_mem::_mm_loadu_si64(&p[0]));
            let mut lanes = [0 as Coeff; 8];
            simd_mem::_mm_storeu_si128(&mut lanes, diff);
            dst.copy_from_slice(&lanes[..4]);
        }
        return;
    }
    for y in 0..width {
        let (r, _) = reference.row(y, width).as_chunks::<8>();
        let (p, _) = pred.row(y, width).as_chunks::<8>();
        let (d, _) = out[y * width..][..width].as_chunks_mut::<8>();
        for ((dst, r), p) in d.iter_mut().zip(r).zip(p) {
            let diff = _mm_sub_epi16(simd_mem::_mm_loadu_si128(r), simd_mem::_mm_loadu_si128(p));
            simd_mem::_mm_storeu_si128(dst, diff);
        }
    }
}

/// `clamp(pred + residual, 0, max)` into the reconstruction.
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[rite]
fn recon_rows(_token: X64V3Token, pred: Samples<'_>, residual: &[Coeff], rec: &mut SamplesMut<'_>, width: usize, bitdepth: u8) {
    let max = _mm_set1_epi16(max_pixel(bitdepth) as i16);

    if width == 4 {
        let (res, _) = residual.as_chunks::<4>();
        for (y, r) in res.iter().enumerate() {
            let (p, _) = pred.row(y, 4).as_chunks::<4>();
            let v = add_clamp(_token, simd_mem::_mm_loadu_si64(&p[0]), simd_mem::_mm_loadu_si64(r), max);
            let mut lanes = [0 as Pixel; 8];
            simd_mem::_mm_storeu_si128(&mut lanes, v);
            rec.row_mut(y, 4).copy_from_slice(&lanes[..4]);
        }
        return;
    }
    for y in 0..width {
        let (p, _) = pred.row(y, width).as_chunks::<8>();
        let (r, _) = residual[y * width..][..width].as_chunks::<8>();
        let (dst, _) = rec.row_mut(y, width).as_chunks_mut::<8>();
        for ((dst, p), r) in dst.iter_mut().zip(p).zip(r) {
            let v = add_clamp(_token, simd_mem::_mm_loadu_si128(p), simd_mem::_mm_loadu_si128(r), max);
            simd_mem::_mm_storeu_si128(dst, v);
        }
    }
}

/// Saturating add, then clamp to `0..=max`; equal to the 32-bit sum clamped.
#[cfg(all(feature = "simd", target_arch = "x86_64"))]
#[rite]
fn add_clamp(_token: X64V3Token, pred: __m128i, residual: __m128i, max: __m128i) -> __m128i {
    _mm_min_epi16(_mm_max_epi16(_mm_adds_epi16(pred, residual), _mm_setzero_si128()), max)
}

//------------------------------------------------------------------------------
// Transform-skip decision

/// Sum of squared differences over a 4x4 block.
fn ssd_4x4(reference: Samples<'_>, rec: &[Pixel; 16]) -> u64 {
    let mut ssd = 0u64;
    for y in 0..4 {
        for (&r, &c) in reference.row(y, 4).iter().zip(&rec[y * 4..][..4]) {
            let d = i64::from(r) - i64::from(c);
            ssd += (d * d) as u64;
        }
    }
    ssd
}

struct Candidate {
    rec: [Pixel; 16],
    coeff: [Coeff; 16],
    has_coeffs: bool,
    cost: u64,
}

fn trskip_candidate(
    ctx: &ResidualContext<'_>,
    block: &ResidualBlock,
    transform_skip: bool,
    reference: Samples<'_>,
    pred: Samples<'_>,
    bit_cost: u64,
) -> Candidate {
    let block = ResidualBlock {
        transform_skip,
        early_skip: false,
        ..*block
    };
    let mut rec = [0 as Pixel; 16];
    let mut coeff = [0 as Coeff; 16];
    let has_coeffs = (ctx.kernels.quantize_residual)(ctx, &block, reference, pred, SamplesMut::new(&mut rec, 4), &mut coeff);
    let cost = ssd_4x4(reference, &rec) + u64::from(ctx.coeff_cost(&coeff, &block.quant)) * bit_cost;
    Candidate {
        rec,
        coeff,
        has_coeffs,
        cost,
    }
}

/// Code a 4x4 block both with and without transform skip and keep the one
/// with the lower `SSD + bits * round(lambda)`. Ties keep the transform.
pub fn quantize_residual_trskip(
    ctx: &ResidualContext<'_>,
    block: &ResidualBlock,
    reference: Samples<'_>,
    pred: Samples<'_>,
    mut rec: SamplesMut<'_>,
    coeff_out: &mut [Coeff],
) -> ResidualOutcome {
    assert_eq!(block.quant.size, BlockSize::B4, "transform skip is only tried on 4x4 blocks");
    assert!(coeff_out.len() >= 16, "coefficient buffer shorter than 16");
    rec.check(4);
    let bit_cost = (ctx.lambda + 0.5) as u64;

    let noskip = trskip_candidate(ctx, block, false, reference, pred, bit_cost);
    let skip = trskip_candidate(ctx, block, true, reference, pred, bit_cost);
    let (best, transform_skip) = if noskip.cost <= skip.cost { (noskip, false) } else { (skip, true) };

    for y in 0..4 {
        rec.row_mut(y, 4).copy_from_slice(&best.rec[y * 4..][..4]);
    }
    coeff_out[..16].copy_from_slice(&best.coeff);
    ResidualOutcome {
        has_coeffs: best.has_coeffs,
        transform_skip,
    }
}

//------------------------------------------------------------------------------
// Lossless coding

/// Residual DPCM direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdpcmMode {
    /// Each sample minus its left neighbour.
    Horizontal,
    /// Each sample minus the one above.
    Vertical,
}

impl RdpcmMode {
    /// Implicit RDPCM direction of an intra mode: 10 is horizontal, 26 vertical.
    pub fn for_intra_mode(mode: u8) -> Option<Self> {
        match mode {
            10 => Some(RdpcmMode::Horizontal),
            26 => Some(RdpcmMode::Vertical),
            _ => None,
        }
    }
}

/// Apply residual DPCM in place, bottom-right first.
pub fn rdpcm(size: BlockSize, mode: RdpcmMode, coeff: &mut [Coeff]) {
    let width = size.width();
    assert!(coeff.len() >= size.area(), "coefficient buffer shorter than {}", size.area());
    let (offset, min_x, min_y) = match mode {
        RdpcmMode::Horizontal => (1, 1, 0),
        RdpcmMode::Vertical => (width, 0, 1),
    };
    for y in (min_y..width).rev() {
        for x in (min_x..width).rev() {
            let i = y * width + x;
            coeff[i] = coeff[i].wrapping_sub(coeff[i - offset]);
        }
    }
}

/// Lossless coding: the residual becomes the coefficients and the
/// reconstruction is the reference. Returns whether any residual is non-zero.
pub fn bypass_transquant(
    size: BlockSize,
    reference: Samples<'_>,
    pred: Samples<'_>,
    mut rec: SamplesMut<'_>,
    coeff_out: &mut [Coeff],
) -> bool {
    let width = size.width();
    reference.check(width);
    pred.check(width);
    rec.check(width);
    assert!(coeff_out.len() >= size.area(), "coefficient buffer shorter than {}", size.area());

    let mut nonzero = false;
    for y in 0..width {
        let r = reference.row(y, width);
        let p = pred.row(y, width);
        for ((c, &r), &p) in coeff_out[y * width..][..width].iter_mut().zip(r).zip(p) {
            *c = clip16(i32::from(r) - i32::from(p));
            nonzero |= *c != 0;
        }
        rec.row_mut(y, width).copy_from_slice(r);
    }
    nonzero
}

//------------------------------------------------------------------------------
// Transform-unit entry point

/// Code one transform unit.
///
/// `pred_rec` holds the prediction on entry and the reconstruction on exit.
/// Lossless contexts bypass transform and quantization (with implicit RDPCM
/// for horizontal and vertical intra modes). 4x4 luma with transform skip
/// enabled runs the skip decision. Everything else uses the selected
/// residual kernel.
pub fn quantize_tr_residual(
    ctx: &ResidualContext<'_>,
    block: &ResidualBlock,
    reference: Samples<'_>,
    pred_rec: SamplesMut<'_>,
    coeff_out: &mut [Coeff],
) -> ResidualOutcome {
    let size = block.quant.size;
    let width = size.width();
    pred_rec.check(width);

    let mut pred_buf = [0 as Pixel; MAX_TR_AREA];
    for y in 0..width {
        pred_buf[y * width..][..width].copy_from_slice(pred_rec.as_samples().row(y, width));
    }
    let pred = Samples::new(&pred_buf[..size.area()], width);

    if ctx.lossless {
        let has_coeffs = bypass_transquant(size, reference, pred, pred_rec, coeff_out);
        if ctx.implicit_rdpcm && block.quant.cu_type == CuType::Intra {
            if let Some(mode) = RdpcmMode::for_intra_mode(block.intra_mode) {
                rdpcm(size, mode, coeff_out);
            }
        }
        return ResidualOutcome {
            has_coeffs,
            transform_skip: false,
        };
    }

    if ctx.transform_skip && size == BlockSize::B4 && block.quant.color == Color::Y {
        return quantize_residual_trskip(ctx, block, reference, pred, pred_rec, coeff_out);
    }

    let block = ResidualBlock {
        transform_skip: false,
        ..*block
    };
    ResidualOutcome {
        has_coeffs: (ctx.kernels.quantize_residual)(ctx, &block, reference, pred, pred_rec, coeff_out),
        transform_skip: false,
    }
}
