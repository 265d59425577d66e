//! Block types, transform matrices, scans and the transform kernels.

/// Coefficient scan orders.
pub mod scan;
pub mod tables;
/// Integer DCT/DST transforms and transform skip.
pub mod transform;
pub mod types;

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
pub mod transform_simd_intrinsics;
