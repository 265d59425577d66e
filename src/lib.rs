//! HEVC transform and quantization core
//!
//! This crate provides the residual coding stage of an HEVC encoder: the
//! integer DCT/DST at 4x4 through 32x32, uniform and scaling-list
//! quantization with sign-data hiding, inverse quantization, and the residual
//! pipeline that ties them to reconstruction. Every kernel has a portable
//! reference implementation; with the `simd` feature an AVX2 backend is
//! selected at runtime when the host supports it, producing bit-identical
//! output.
//!
//! # Features
//!
//! - `simd` (default): AVX2 kernels on x86-64, chosen at runtime.
//! - `multiverse`: compile the scalar transforms for several target levels.
//!
//! # Quantizing a block
//!
//! ```rust
//! use zenhevc::{QuantConfig, ResidualBlock, ResidualContext, Samples, SamplesMut, SelectorOptions};
//! use zenhevc::encoder::QuantBlock;
//! use zenhevc::common::types::{BlockSize, Color, CuType, ScanOrder};
//!
//! let config = QuantConfig::new().with_qp(27);
//! let lists = config.build_scaling_list()?;
//! // Kernels are selected once per process, for the configured bit depth.
//! let kernels = zenhevc::strategy::init(&SelectorOptions::new(config.bitdepth))?;
//! let ctx = ResidualContext::new(&config, &lists, kernels);
//!
//! let reference = [120u16; 64];
//! let mut pred_rec = [100u16; 64];
//! let mut coeffs = [0i16; 64];
//! let block = ResidualBlock::new(QuantBlock::new(BlockSize::B8, Color::Y, ScanOrder::Diagonal, CuType::Inter));
//! let outcome = zenhevc::quantize_tr_residual(
//!     &ctx,
//!     &block,
//!     Samples::new(&reference, 8),
//!     SamplesMut::new(&mut pred_rec, 8),
//!     &mut coeffs,
//! );
//! assert!(outcome.has_coeffs);
//! # Ok::<(), zenhevc::TqError>(())
//! ```
//!
//! # Safety
//!
//! This crate uses `#![forbid(unsafe_code)]` to prevent direct unsafe usage in source.
//! However, when the `simd` feature is enabled, we rely on the [`archmage`] crate for
//! safe SIMD intrinsics. The `#[arcane]` proc macro generates unsafe blocks internally
//! (which bypass the `forbid` lint due to proc-macro span handling). The soundness of
//! our SIMD code depends on archmage's token-based safety model being correct.
//!
//! Without the `simd` feature, this crate contains no unsafe code whatsoever.
//!
//! [`archmage`]: https://docs.rs/archmage

// Forbid unsafe unless the "unchecked" feature enables it for performance
#![cfg_attr(not(feature = "unchecked"), forbid(unsafe_code))]
#![deny(missing_docs)]

// Core modules
pub mod common;
pub mod encoder;
pub mod error;
pub mod strategy;

// Re-export public API
pub use common::types::{BlockSize, Coeff, Color, CuType, Pixel, ScanOrder, SliceType, TransformKind};
pub use encoder::{
    quantize_tr_residual, QuantConfig, ResidualBlock, ResidualContext, ResidualOutcome, Samples, SamplesMut,
    ScalingList, ScalingListMode,
};
pub use error::{ScalingListError, TqError};
pub use strategy::{SelectorOptions, Strategies};
