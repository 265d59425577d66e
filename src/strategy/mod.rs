//! Kernel selection.
//!
//! Every backend registers its kernels with a priority. For each operation
//! the selector keeps the highest-priority registration of an available
//! backend; on equal priority the later registration wins. The generic
//! backend registers everything at priority 0, so selection is total.
//!
//! An override forces a named backend for one operation. Overrides come from
//! [`SelectorOptions::with_override`] or from `ZENHEVC_OVERRIDE_<op>`
//! environment variables, e.g. `ZENHEVC_OVERRIDE_dct_8x8=generic`.
//!
//! ```rust
//! use zenhevc::strategy::{Op, SelectorOptions, Strategies};
//!
//! let options = SelectorOptions::new(8).with_env(false).with_override(Op::Quant, "generic");
//! let kernels = Strategies::select(&options)?;
//! assert_eq!(kernels.backend(Op::Quant), "generic");
//! # Ok::<(), zenhevc::TqError>(())
//! ```

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
mod avx2;
mod generic;

use std::sync::OnceLock;

use tracing::{debug, info, warn};

use crate::common::transform::{
    dct_16x16_scalar, dct_32x32_scalar, dct_4x4_scalar, dct_8x8_scalar, fast_forward_dst_4x4_scalar,
    fast_inverse_dst_4x4_scalar, idct_16x16_scalar, idct_32x32_scalar, idct_4x4_scalar, idct_8x8_scalar,
};
use crate::common::types::{BlockSize, Coeff, TransformKind};
use crate::encoder::quantize::{
    coeff_abs_sum_scalar, dequant_scalar, fast_coeff_cost_scalar, quant_scalar, QuantBlock, QuantParams,
};
use crate::encoder::residual::{quantize_residual_generic, ResidualBlock, ResidualContext, Samples, SamplesMut};
use crate::error::TqError;

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
pub use avx2::Avx2;
pub use generic::Generic;

/// 2-D transform of one block: `(bitdepth, input, output)`.
pub type TransformFn = fn(u8, &[i16], &mut [i16]);
/// Forward quantization: `(params, coefficients, levels, block)`.
pub type QuantFn = fn(&QuantParams<'_>, &[Coeff], &mut [Coeff], &QuantBlock);
/// Inverse quantization: `(params, levels, coefficients, block)`.
pub type DequantFn = fn(&QuantParams<'_>, &[Coeff], &mut [Coeff], &QuantBlock);
/// Residual pipeline: `(context, block, reference, prediction, reconstruction, levels)`.
pub type QuantizeResidualFn =
    fn(&ResidualContext<'_>, &ResidualBlock, Samples<'_>, Samples<'_>, SamplesMut<'_>, &mut [Coeff]) -> bool;
/// Sum of absolute coefficient values.
pub type CoeffAbsSumFn = fn(&[Coeff]) -> u32;
/// Fast bit-cost estimate: `(levels, block size, qp)`.
pub type FastCoeffCostFn = fn(&[Coeff], BlockSize, i32) -> u32;

/// Operations served by the kernel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Op {
    Dct4x4,
    Dct8x8,
    Dct16x16,
    Dct32x32,
    Idct4x4,
    Idct8x8,
    Idct16x16,
    Idct32x32,
    FastForwardDst4x4,
    FastInverseDst4x4,
    Quant,
    Dequant,
    QuantizeResidual,
    CoeffAbsSum,
    FastCoeffCost,
}

impl Op {
    /// Every operation.
    pub const ALL: [Op; 15] = [
        Op::Dct4x4,
        Op::Dct8x8,
        Op::Dct16x16,
        Op::Dct32x32,
        Op::Idct4x4,
        Op::Idct8x8,
        Op::Idct16x16,
        Op::Idct32x32,
        Op::FastForwardDst4x4,
        Op::FastInverseDst4x4,
        Op::Quant,
        Op::Dequant,
        Op::QuantizeResidual,
        Op::CoeffAbsSum,
        Op::FastCoeffCost,
    ];

    /// External name of the operation.
    pub const fn name(self) -> &'static str {
        match self {
            Op::Dct4x4 => "dct_4x4",
            Op::Dct8x8 => "dct_8x8",
            Op::Dct16x16 => "dct_16x16",
            Op::Dct32x32 => "dct_32x32",
            Op::Idct4x4 => "idct_4x4",
            Op::Idct8x8 => "idct_8x8",
            Op::Idct16x16 => "idct_16x16",
            Op::Idct32x32 => "idct_32x32",
            Op::FastForwardDst4x4 => "fast_forward_dst_4x4",
            Op::FastInverseDst4x4 => "fast_inverse_dst_4x4",
            Op::Quant => "quant",
            Op::Dequant => "dequant",
            Op::QuantizeResidual => "quantize_residual",
            Op::CoeffAbsSum => "coeff_abs_sum",
            Op::FastCoeffCost => "fast_coeff_cost",
        }
    }

    /// Operation with the given external name.
    pub fn from_name(name: &str) -> Option<Op> {
        Op::ALL.into_iter().find(|op| op.name() == name)
    }

    fn accepts(self, kernel: &Kernel) -> bool {
        matches!(
            (self, kernel),
            (
                Op::Dct4x4
                    | Op::Dct8x8
                    | Op::Dct16x16
                    | Op::Dct32x32
                    | Op::Idct4x4
                    | Op::Idct8x8
                    | Op::Idct16x16
                    | Op::Idct32x32
                    | Op::FastForwardDst4x4
                    | Op::FastInverseDst4x4,
                Kernel::Transform(_)
            ) | (Op::Quant, Kernel::Quant(_))
                | (Op::Dequant, Kernel::Dequant(_))
                | (Op::QuantizeResidual, Kernel::QuantizeResidual(_))
                | (Op::CoeffAbsSum, Kernel::CoeffAbsSum(_))
                | (Op::FastCoeffCost, Kernel::FastCoeffCost(_))
        )
    }
}

/// A registered function pointer.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub enum Kernel {
    Transform(TransformFn),
    Quant(QuantFn),
    Dequant(DequantFn),
    QuantizeResidual(QuantizeResidualFn),
    CoeffAbsSum(CoeffAbsSumFn),
    FastCoeffCost(FastCoeffCostFn),
}

/// One backend's offer for one operation.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    /// Operation served.
    pub op: Op,
    /// Backend name.
    pub backend: &'static str,
    /// Higher wins.
    pub priority: u32,
    /// Function pointer.
    pub kernel: Kernel,
}

/// Append-only list of registrations.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration.
    ///
    /// # Panics
    /// If the kernel's signature does not fit the operation.
    pub fn register(&mut self, op: Op, backend: &'static str, priority: u32, kernel: Kernel) {
        assert!(op.accepts(&kernel), "kernel {kernel:?} does not implement {}", op.name());
        self.entries.push(Registration {
            op,
            backend,
            priority,
            kernel,
        });
    }

    /// All registrations in order.
    pub fn entries(&self) -> &[Registration] {
        &self.entries
    }

    /// Pick the registration for `op`.
    ///
    /// A matching `preferred` backend wins outright. Otherwise the highest
    /// priority wins, later registrations breaking ties.
    pub fn choose(&self, op: Op, preferred: Option<&str>) -> Option<&Registration> {
        let mut candidates = self.entries.iter().filter(|r| r.op == op);
        if let Some(name) = preferred {
            if let Some(forced) = candidates.clone().find(|r| r.backend == name) {
                return Some(forced);
            }
            warn!(op = op.name(), backend = name, "override names no registered backend, ignoring it");
        }
        let first = candidates.next()?;
        Some(candidates.fold(first, |best, r| if r.priority >= best.priority { r } else { best }))
    }
}

/// A family of kernels built for one instruction set.
pub trait Backend {
    /// Name used in overrides and logs.
    fn name(&self) -> &'static str;

    /// Whether the host can run the kernels.
    fn is_available(&self) -> bool;

    /// Register the kernels that are exact at `bitdepth`.
    fn register(&self, bitdepth: u8, registry: &mut Registry);
}

/// Backends compiled into this build, lowest tier first.
pub fn backends() -> Vec<&'static dyn Backend> {
    let mut list: Vec<&'static dyn Backend> = vec![&Generic];
    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    list.push(&Avx2);
    list
}

/// Options of [`Strategies::select`].
#[derive(Debug, Clone)]
pub struct SelectorOptions {
    bitdepth: u8,
    overrides: Vec<(Op, String)>,
    read_env: bool,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self::new(8)
    }
}

impl SelectorOptions {
    /// Options for `bitdepth`, reading `ZENHEVC_OVERRIDE_*` variables.
    pub fn new(bitdepth: u8) -> Self {
        Self {
            bitdepth,
            overrides: Vec::new(),
            read_env: true,
        }
    }

    /// Force `backend` for `op`. Takes precedence over the environment.
    #[must_use]
    pub fn with_override(mut self, op: Op, backend: impl Into<String>) -> Self {
        self.overrides.retain(|(o, _)| *o != op);
        self.overrides.push((op, backend.into()));
        self
    }

    /// Enable or disable environment overrides.
    #[must_use]
    pub fn with_env(mut self, read_env: bool) -> Self {
        self.read_env = read_env;
        self
    }

    /// Target bit depth.
    pub fn bitdepth(&self) -> u8 {
        self.bitdepth
    }

    fn override_for(&self, op: Op) -> Option<String> {
        if let Some((_, name)) = self.overrides.iter().find(|(o, _)| *o == op) {
            return Some(name.clone());
        }
        if self.read_env {
            let var = format!("ZENHEVC_OVERRIDE_{}", op.name());
            if let Ok(name) = std::env::var(&var) {
                info!(var = %var, backend = %name, "kernel override from environment");
                return Some(name);
            }
        }
        None
    }
}

/// The selected kernel of every operation.
#[derive(Debug, Clone)]
pub struct Strategies {
    bitdepth: u8,
    /// Forward DCT by size id.
    pub dct: [TransformFn; 4],
    /// Inverse DCT by size id.
    pub idct: [TransformFn; 4],
    /// Forward 4x4 DST.
    pub fast_forward_dst_4x4: TransformFn,
    /// Inverse 4x4 DST.
    pub fast_inverse_dst_4x4: TransformFn,
    /// Forward quantization with sign-data hiding.
    pub quant: QuantFn,
    /// Inverse quantization.
    pub dequant: DequantFn,
    /// Residual pipeline.
    pub quantize_residual: QuantizeResidualFn,
    /// Sum of absolute values.
    pub coeff_abs_sum: CoeffAbsSumFn,
    /// Fast bit-cost estimate.
    pub fast_coeff_cost: FastCoeffCostFn,
    selected: Vec<(Op, &'static str)>,
}

impl Strategies {
    /// Reference kernels only.
    pub fn generic(bitdepth: u8) -> Self {
        Self {
            bitdepth,
            dct: [dct_4x4_scalar, dct_8x8_scalar, dct_16x16_scalar, dct_32x32_scalar],
            idct: [idct_4x4_scalar, idct_8x8_scalar, idct_16x16_scalar, idct_32x32_scalar],
            fast_forward_dst_4x4: fast_forward_dst_4x4_scalar,
            fast_inverse_dst_4x4: fast_inverse_dst_4x4_scalar,
            quant: quant_scalar,
            dequant: dequant_scalar,
            quantize_residual: quantize_residual_generic,
            coeff_abs_sum: coeff_abs_sum_scalar,
            fast_coeff_cost: fast_coeff_cost_scalar,
            selected: Op::ALL.iter().map(|&op| (op, Generic.name())).collect(),
        }
    }

    /// Register every available backend and pick one kernel per operation.
    pub fn select(options: &SelectorOptions) -> Result<Self, TqError> {
        let mut registry = Registry::new();
        let mut available = Vec::new();
        for backend in backends() {
            if backend.is_available() {
                backend.register(options.bitdepth, &mut registry);
                available.push(backend.name());
            }
        }
        let strategies = Self::from_registry(&registry, options)?;
        let mut in_use: Vec<&str> = strategies.selected.iter().map(|&(_, b)| b).collect();
        in_use.sort_unstable();
        in_use.dedup();
        info!(bitdepth = options.bitdepth, ?available, ?in_use, "kernel strategies selected");
        Ok(strategies)
    }

    /// Pick one kernel per operation from an explicit registry.
    pub fn from_registry(registry: &Registry, options: &SelectorOptions) -> Result<Self, TqError> {
        let mut selected = Vec::with_capacity(Op::ALL.len());
        let mut pick = |op: Op| -> Result<Kernel, TqError> {
            let preferred = options.override_for(op);
            let reg = registry
                .choose(op, preferred.as_deref())
                .ok_or(TqError::NoImplementation(op.name()))?;
            debug!(op = op.name(), backend = reg.backend, priority = reg.priority, "selected kernel");
            selected.push((op, reg.backend));
            Ok(reg.kernel)
        };

        let mut transform = |op: Op| -> Result<TransformFn, TqError> {
            match pick(op)? {
                Kernel::Transform(f) => Ok(f),
                _ => Err(TqError::NoImplementation(op.name())),
            }
        };
        let dct = [
            transform(Op::Dct4x4)?,
            transform(Op::Dct8x8)?,
            transform(Op::Dct16x16)?,
            transform(Op::Dct32x32)?,
        ];
        let idct = [
            transform(Op::Idct4x4)?,
            transform(Op::Idct8x8)?,
            transform(Op::Idct16x16)?,
            transform(Op::Idct32x32)?,
        ];
        let fast_forward_dst_4x4 = transform(Op::FastForwardDst4x4)?;
        let fast_inverse_dst_4x4 = transform(Op::FastInverseDst4x4)?;

        let Kernel::Quant(quant) = pick(Op::Quant)? else {
            return Err(TqError::NoImplementation(Op::Quant.name()));
        };
        let Kernel::Dequant(dequant) = pick(Op::Dequant)? else {
            return Err(TqError::NoImplementation(Op::Dequant.name()));
        };
        let Kernel::QuantizeResidual(quantize_residual) = pick(Op::QuantizeResidual)? else {
            return Err(TqError::NoImplementation(Op::QuantizeResidual.name()));
        };
        let Kernel::CoeffAbsSum(coeff_abs_sum) = pick(Op::CoeffAbsSum)? else {
            return Err(TqError::NoImplementation(Op::CoeffAbsSum.name()));
        };
        let Kernel::FastCoeffCost(fast_coeff_cost) = pick(Op::FastCoeffCost)? else {
            return Err(TqError::NoImplementation(Op::FastCoeffCost.name()));
        };

        Ok(Self {
            bitdepth: options.bitdepth,
            dct,
            idct,
            fast_forward_dst_4x4,
            fast_inverse_dst_4x4,
            quant,
            dequant,
            quantize_residual,
            coeff_abs_sum,
            fast_coeff_cost,
            selected,
        })
    }

    /// Bit depth the table was selected for.
    #[inline]
    pub fn bitdepth(&self) -> u8 {
        self.bitdepth
    }

    /// Forward transform kernel for `kind`.
    #[inline]
    pub fn forward(&self, kind: TransformKind) -> TransformFn {
        match kind {
            TransformKind::Dst4 => self.fast_forward_dst_4x4,
            TransformKind::Dct(size) => self.dct[size.size_id()],
        }
    }

    /// Inverse transform kernel for `kind`.
    #[inline]
    pub fn inverse(&self, kind: TransformKind) -> TransformFn {
        match kind {
            TransformKind::Dst4 => self.fast_inverse_dst_4x4,
            TransformKind::Dct(size) => self.idct[size.size_id()],
        }
    }

    /// Backend serving `op`.
    pub fn backend(&self, op: Op) -> &'static str {
        self.selected
            .iter()
            .find(|(o, _)| *o == op)
            .map_or(Generic.name(), |&(_, b)| b)
    }
}

static STRATEGIES: OnceLock<Strategies> = OnceLock::new();

/// Select the process-wide kernel table.
///
/// Repeated calls return the installed table as long as the bit depth
/// matches; a different bit depth is an error.
pub fn init(options: &SelectorOptions) -> Result<&'static Strategies, TqError> {
    let installed = match STRATEGIES.get() {
        Some(installed) => installed,
        None => {
            let selected = Strategies::select(options)?;
            STRATEGIES.get_or_init(|| selected)
        }
    };
    if installed.bitdepth != options.bitdepth {
        return Err(TqError::AlreadyInitialized(installed.bitdepth));
    }
    Ok(installed)
}

/// The process-wide kernel table.
///
/// Returns the table installed by [`init`], or selects one for 8-bit
/// samples on first use. Callers coding other bit depths must call [`init`]
/// before the first `get`.
pub fn get() -> &'static Strategies {
    STRATEGIES.get_or_init(|| {
        Strategies::select(&SelectorOptions::default()).unwrap_or_else(|err| {
            warn!(%err, "kernel selection failed, using generic kernels");
            Strategies::generic(8)
        })
    })
}
