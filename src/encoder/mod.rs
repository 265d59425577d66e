//! Quantization, scaling lists and the residual pipeline

/// Quantizer configuration builder
pub mod config;
/// Coefficient quantization, sign-data hiding and dequantization
pub mod quantize;
pub mod residual;
/// Scaling lists and derived quant/dequant tables
pub mod scaling_list;

// Re-export public API
pub use config::{QuantConfig, ScalingListMode, MAX_BITDEPTH, MIN_BITDEPTH};
pub use quantize::{scaled_qp, QuantBlock, QuantParams};
pub use residual::{
    bypass_transquant, quantize_residual_trskip, quantize_tr_residual, rdpcm, CoeffCost, Rdoq, RdpcmMode,
    ResidualBlock, ResidualContext, ResidualOutcome, Samples, SamplesMut,
};
pub use scaling_list::ScalingList;
