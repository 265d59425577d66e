//! Quantizer configuration.
//!
//! ```rust
//! use zenhevc::{QuantConfig, ScalingListMode, SliceType};
//!
//! let config = QuantConfig::new()
//!     .with_qp(32)
//!     .with_slice_type(SliceType::P)
//!     .with_scaling_list(ScalingListMode::Default);
//! config.validate()?;
//! let lists = config.build_scaling_list()?;
//! assert!(lists.enabled());
//! # Ok::<(), zenhevc::TqError>(())
//! ```

use std::path::PathBuf;

use super::scaling_list::ScalingList;
use crate::common::types::SliceType;
use crate::error::TqError;

/// Lowest supported sample bit depth.
pub const MIN_BITDEPTH: u8 = 8;

/// Highest supported sample bit depth.
pub const MAX_BITDEPTH: u8 = 10;

/// Source of the scaling lists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ScalingListMode {
    /// No scaling lists: flat quantization.
    #[default]
    Off,
    /// HEVC default matrices.
    Default,
    /// Matrices read from a text file.
    Custom(PathBuf),
}

/// Parameters of the transform and quantization stage.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct QuantConfig {
    /// Sample bit depth (8..=10). Default: 8.
    pub bitdepth: u8,
    /// Frame quantization parameter. Default: 22.
    pub qp: i32,
    /// Slice type; picks the rounding offset. Default: I.
    pub slice_type: SliceType,
    /// Sign-data hiding. Default: true.
    pub sign_hiding: bool,
    /// Hand quantization to the RDOQ collaborator when one is installed. Default: false.
    pub rdoq: bool,
    /// Never use RDOQ on 4x4 blocks. Default: true.
    pub rdoq_skip: bool,
    /// Try transform skip on 4x4 luma. Default: false.
    pub transform_skip: bool,
    /// Lossless coding (transform and quantization bypass). Default: false.
    pub lossless: bool,
    /// Implicit residual DPCM for lossless intra blocks. Default: false.
    pub implicit_rdpcm: bool,
    /// Lagrangian multiplier for the transform-skip decision. Default: 0.0.
    pub lambda: f64,
    /// Scaling-list source. Default: off.
    pub scaling_list: ScalingListMode,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl QuantConfig {
    /// Configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bitdepth: 8,
            qp: 22,
            slice_type: SliceType::I,
            sign_hiding: true,
            rdoq: false,
            rdoq_skip: true,
            transform_skip: false,
            lossless: false,
            implicit_rdpcm: false,
            lambda: 0.0,
            scaling_list: ScalingListMode::Off,
        }
    }

    /// Set the sample bit depth.
    #[must_use]
    pub fn with_bitdepth(mut self, bitdepth: u8) -> Self {
        self.bitdepth = bitdepth;
        self
    }

    /// Set the quantization parameter.
    #[must_use]
    pub fn with_qp(mut self, qp: i32) -> Self {
        self.qp = qp;
        self
    }

    /// Set the slice type.
    #[must_use]
    pub fn with_slice_type(mut self, slice_type: SliceType) -> Self {
        self.slice_type = slice_type;
        self
    }

    /// Enable or disable sign-data hiding.
    #[must_use]
    pub fn with_sign_hiding(mut self, enable: bool) -> Self {
        self.sign_hiding = enable;
        self
    }

    /// Enable RDOQ, optionally also on 4x4 blocks.
    #[must_use]
    pub fn with_rdoq(mut self, enable: bool, skip_4x4: bool) -> Self {
        self.rdoq = enable;
        self.rdoq_skip = skip_4x4;
        self
    }

    /// Enable the transform-skip decision on 4x4 luma.
    #[must_use]
    pub fn with_transform_skip(mut self, enable: bool) -> Self {
        self.transform_skip = enable;
        self
    }

    /// Enable lossless coding, optionally with implicit RDPCM.
    #[must_use]
    pub fn with_lossless(mut self, enable: bool, implicit_rdpcm: bool) -> Self {
        self.lossless = enable;
        self.implicit_rdpcm = implicit_rdpcm;
        self
    }

    /// Set the Lagrangian multiplier.
    #[must_use]
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Select the scaling-list source.
    #[must_use]
    pub fn with_scaling_list(mut self, mode: ScalingListMode) -> Self {
        self.scaling_list = mode;
        self
    }

    /// Largest legal QP for the bit depth.
    #[inline]
    pub fn max_qp(&self) -> i32 {
        51 + 6 * (i32::from(self.bitdepth) - 8)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TqError> {
        if !(MIN_BITDEPTH..=MAX_BITDEPTH).contains(&self.bitdepth) {
            return Err(TqError::InvalidConfig(format!(
                "bitdepth {} outside {MIN_BITDEPTH}..={MAX_BITDEPTH}",
                self.bitdepth
            )));
        }
        if !(0..=self.max_qp()).contains(&self.qp) {
            return Err(TqError::InvalidConfig(format!(
                "qp {} outside 0..={}",
                self.qp,
                self.max_qp()
            )));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(TqError::InvalidConfig(format!("lambda {} is not a finite non-negative number", self.lambda)));
        }
        Ok(())
    }

    /// Build the scaling-list store for this configuration.
    pub fn build_scaling_list(&self) -> Result<ScalingList, TqError> {
        self.validate()?;
        Ok(match &self.scaling_list {
            ScalingListMode::Off => ScalingList::flat(self.bitdepth),
            ScalingListMode::Default => ScalingList::hevc_default(self.bitdepth),
            ScalingListMode::Custom(path) => ScalingList::load_file(path, self.bitdepth)?,
        })
    }
}
