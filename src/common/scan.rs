//! Coefficient scan tables.
//!
//! A block scan visits 4x4 coefficient groups in the CG-level order of the
//! same pattern and, inside each group, the sixteen positions in 4x4 order.
//! Every table maps a sequential scan index to a raster position (`x + y * N`).
//! All tables are built at compile time.

use super::types::{BlockSize, ScanOrder};

/// Coefficients per coefficient group.
pub const CG_SIZE: usize = 16;

/// Raster positions of a `side`x`side` grid in the given scan order.
/// Only the first `side * side` entries of the result are meaningful.
const fn grid_scan<const LEN: usize>(order: ScanOrder, side: usize) -> [u16; LEN] {
    let mut out = [0u16; LEN];
    match order {
        ScanOrder::Diagonal => {
            let mut i = 0;
            let mut line = 0;
            while i < side * side {
                // Walk each anti-diagonal from bottom-left to top-right.
                let mut y = line as isize;
                let mut x = 0usize;
                while y >= 0 {
                    if x < side && (y as usize) < side {
                        out[i] = (x + y as usize * side) as u16;
                        i += 1;
                    }
                    y -= 1;
                    x += 1;
                }
                line += 1;
            }
        }
        ScanOrder::Horizontal => {
            let mut i = 0;
            while i < side * side {
                out[i] = i as u16;
                i += 1;
            }
        }
        ScanOrder::Vertical => {
            let mut i = 0;
            while i < side * side {
                out[i] = ((i % side) * side + i / side) as u16;
                i += 1;
            }
        }
    }
    out
}

/// Full-block scan: CGs in CG-level order, positions in 4x4 order within each CG.
const fn block_scan<const LEN: usize>(order: ScanOrder, log2: u32) -> [u16; LEN] {
    let side = 1usize << log2;
    let cgs = side / 4;
    let cg_order = grid_scan::<64>(order, cgs);
    let sub = grid_scan::<16>(order, 4);
    let mut out = [0u16; LEN];
    let mut cg = 0;
    while cg < cgs * cgs {
        let cg_x = cg_order[cg] as usize % cgs;
        let cg_y = cg_order[cg] as usize / cgs;
        let mut p = 0;
        while p < CG_SIZE {
            let x = cg_x * 4 + sub[p] as usize % 4;
            let y = cg_y * 4 + sub[p] as usize / 4;
            out[cg * CG_SIZE + p] = (x + y * side) as u16;
            p += 1;
        }
        cg += 1;
    }
    out
}

const fn cg_grid<const LEN: usize>(order: ScanOrder, log2: u32) -> [u16; LEN] {
    grid_scan::<LEN>(order, (1usize << log2) / 4)
}

static DIAG_4: [u16; 16] = block_scan::<16>(ScanOrder::Diagonal, 2);
static DIAG_8: [u16; 64] = block_scan::<64>(ScanOrder::Diagonal, 3);
static DIAG_16: [u16; 256] = block_scan::<256>(ScanOrder::Diagonal, 4);
static DIAG_32: [u16; 1024] = block_scan::<1024>(ScanOrder::Diagonal, 5);
static HOR_4: [u16; 16] = block_scan::<16>(ScanOrder::Horizontal, 2);
static HOR_8: [u16; 64] = block_scan::<64>(ScanOrder::Horizontal, 3);
static HOR_16: [u16; 256] = block_scan::<256>(ScanOrder::Horizontal, 4);
static HOR_32: [u16; 1024] = block_scan::<1024>(ScanOrder::Horizontal, 5);
static VER_4: [u16; 16] = block_scan::<16>(ScanOrder::Vertical, 2);
static VER_8: [u16; 64] = block_scan::<64>(ScanOrder::Vertical, 3);
static VER_16: [u16; 256] = block_scan::<256>(ScanOrder::Vertical, 4);
static VER_32: [u16; 1024] = block_scan::<1024>(ScanOrder::Vertical, 5);

static CG_DIAG_8: [u16; 4] = cg_grid::<4>(ScanOrder::Diagonal, 3);
static CG_DIAG_16: [u16; 16] = cg_grid::<16>(ScanOrder::Diagonal, 4);
static CG_DIAG_32: [u16; 64] = cg_grid::<64>(ScanOrder::Diagonal, 5);
static CG_HOR_8: [u16; 4] = cg_grid::<4>(ScanOrder::Horizontal, 3);
static CG_HOR_16: [u16; 16] = cg_grid::<16>(ScanOrder::Horizontal, 4);
static CG_HOR_32: [u16; 64] = cg_grid::<64>(ScanOrder::Horizontal, 5);
static CG_VER_8: [u16; 4] = cg_grid::<4>(ScanOrder::Vertical, 3);
static CG_VER_16: [u16; 16] = cg_grid::<16>(ScanOrder::Vertical, 4);
static CG_VER_32: [u16; 64] = cg_grid::<64>(ScanOrder::Vertical, 5);
static CG_SINGLE: [u16; 1] = [0];

/// Up-right diagonal over a plain 4x4 grid (scaling-list coefficient order).
pub static DIAG_4X4_RAW: [u16; 16] = grid_scan::<16>(ScanOrder::Diagonal, 4);

/// Up-right diagonal over a plain 8x8 grid (scaling-list coefficient order).
pub static DIAG_8X8_RAW: [u16; 64] = grid_scan::<64>(ScanOrder::Diagonal, 8);

/// Scan index to raster position for a whole block, grouped by CG.
pub fn coeff_scan(order: ScanOrder, size: BlockSize) -> &'static [u16] {
    match (order, size) {
        (ScanOrder::Diagonal, BlockSize::B4) => &DIAG_4,
        (ScanOrder::Diagonal, BlockSize::B8) => &DIAG_8,
        (ScanOrder::Diagonal, BlockSize::B16) => &DIAG_16,
        (ScanOrder::Diagonal, BlockSize::B32) => &DIAG_32,
        (ScanOrder::Horizontal, BlockSize::B4) => &HOR_4,
        (ScanOrder::Horizontal, BlockSize::B8) => &HOR_8,
        (ScanOrder::Horizontal, BlockSize::B16) => &HOR_16,
        (ScanOrder::Horizontal, BlockSize::B32) => &HOR_32,
        (ScanOrder::Vertical, BlockSize::B4) => &VER_4,
        (ScanOrder::Vertical, BlockSize::B8) => &VER_8,
        (ScanOrder::Vertical, BlockSize::B16) => &VER_16,
        (ScanOrder::Vertical, BlockSize::B32) => &VER_32,
    }
}

/// CG-level scan: index to raster position in the `(N/4)`x`(N/4)` CG grid.
pub fn cg_scan(order: ScanOrder, size: BlockSize) -> &'static [u16] {
    match (order, size) {
        (_, BlockSize::B4) => &CG_SINGLE,
        (ScanOrder::Diagonal, BlockSize::B8) => &CG_DIAG_8,
        (ScanOrder::Diagonal, BlockSize::B16) => &CG_DIAG_16,
        (ScanOrder::Diagonal, BlockSize::B32) => &CG_DIAG_32,
        (ScanOrder::Horizontal, BlockSize::B8) => &CG_HOR_8,
        (ScanOrder::Horizontal, BlockSize::B16) => &CG_HOR_16,
        (ScanOrder::Horizontal, BlockSize::B32) => &CG_HOR_32,
        (ScanOrder::Vertical, BlockSize::B8) => &CG_VER_8,
        (ScanOrder::Vertical, BlockSize::B16) => &CG_VER_16,
        (ScanOrder::Vertical, BlockSize::B32) => &CG_VER_32,
    }
}
