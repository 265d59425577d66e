//! Scaling lists: per-position quantizer weights and the tables derived from them.
//!
//! A store holds one user pattern (at most 8x8) per `(size_id, list_id)` and,
//! for every `qp % 6`, the quant, dequant and error-scale tables the kernels
//! read. With scaling lists disabled the tables are flat.
//!
//! `list_id` is `(intra ? 0 : 3) + color_index`. At 32x32 only luma exists:
//! list 0 is intra and list 1 inter, and list 3 is redirected to list 1.

use std::fmt::Write as _;
use std::path::Path;

use tracing::info;

use crate::common::scan::{DIAG_4X4_RAW, DIAG_8X8_RAW};
use crate::common::tables::{CTX_FRAC_BITS, INV_QUANT_SCALES, MAX_TR_DYNAMIC_RANGE, QUANT_SCALES};
use crate::common::types::{BlockSize, Color, CuType};
use crate::error::ScalingListError;

/// Number of stored lists per size id.
pub const LIST_COUNT: [usize; 4] = [6, 6, 6, 2];

/// Distinct `(size_id, list_id)` slots with storage.
const SLOT_COUNT: usize = 6 + 6 + 6 + 2;

/// Largest pattern: 8x8.
const MAX_PATTERN: usize = 64;

/// Weight of a flat list.
const FLAT_WEIGHT: i32 = 16;

/// Default 8x8 intra weights, raster order.
#[rustfmt::skip]
pub const DEFAULT_INTRA_8X8: [i32; 64] = [
    16, 16, 16, 16, 17, 18,  21,  24,
    16, 16, 16, 16, 17, 19,  22,  25,
    16, 16, 17, 18, 20, 22,  25,  29,
    16, 16, 18, 21, 24, 27,  31,  36,
    17, 17, 20, 24, 30, 35,  41,  47,
    18, 19, 22, 27, 35, 44,  54,  65,
    21, 22, 25, 31, 41, 54,  70,  88,
    24, 25, 29, 36, 47, 65,  88, 115,
];

/// Default 8x8 inter weights, raster order.
#[rustfmt::skip]
pub const DEFAULT_INTER_8X8: [i32; 64] = [
    16, 16, 16, 16, 17, 18, 20, 24,
    16, 16, 16, 17, 18, 20, 24, 25,
    16, 16, 17, 18, 20, 24, 25, 28,
    16, 17, 18, 20, 24, 25, 28, 33,
    17, 18, 20, 24, 25, 28, 33, 41,
    18, 20, 24, 25, 28, 33, 41, 54,
    20, 24, 25, 28, 33, 41, 54, 71,
    24, 25, 28, 33, 41, 54, 71, 91,
];

/// Section names, indexed by `[size_id][list_id]`.
const SECTION_NAMES: [&[&str]; 4] = [
    &[
        "INTRA4X4_LUMA",
        "INTRA4X4_CHROMAU",
        "INTRA4X4_CHROMAV",
        "INTER4X4_LUMA",
        "INTER4X4_CHROMAU",
        "INTER4X4_CHROMAV",
    ],
    &[
        "INTRA8X8_LUMA",
        "INTRA8X8_CHROMAU",
        "INTRA8X8_CHROMAV",
        "INTER8X8_LUMA",
        "INTER8X8_CHROMAU",
        "INTER8X8_CHROMAV",
    ],
    &[
        "INTRA16X16_LUMA",
        "INTRA16X16_CHROMAU",
        "INTRA16X16_CHROMAV",
        "INTER16X16_LUMA",
        "INTER16X16_CHROMAU",
        "INTER16X16_CHROMAV",
    ],
    &["INTRA32X32_LUMA", "INTER32X32_LUMA"],
];

const DC_SUFFIX: &str = "_DC";

/// Scaling-list type index of a block.
#[inline]
pub fn list_id(color: Color, cu_type: CuType) -> usize {
    let base = if cu_type == CuType::Intra { 0 } else { 3 };
    base + color.index()
}

/// Storage slot of a `(size_id, list_id)` pair.
///
/// # Panics
/// If the pair has no table (32x32 chroma).
fn slot(size_id: usize, list: usize) -> usize {
    match (size_id, list) {
        (0..=2, 0..=5) => size_id * 6 + list,
        (3, 0) => 18,
        (3, 1) | (3, 3) => 19,
        _ => panic!("no scaling list for size id {size_id}, list {list}"),
    }
}

#[inline]
fn pattern_len(size_id: usize) -> usize {
    if size_id == 0 {
        16
    } else {
        MAX_PATTERN
    }
}

/// Scan from pattern index to raster position for the serialised form.
fn pattern_scan(size_id: usize) -> &'static [u16] {
    if size_id == 0 {
        &DIAG_4X4_RAW
    } else {
        &DIAG_8X8_RAW
    }
}

/// Per-slot tables for every `qp % 6`.
#[derive(Clone, Debug, PartialEq)]
struct SlotTables {
    quant: [Vec<i32>; 6],
    dequant: [Vec<i32>; 6],
    err_scale: [Vec<f64>; 6],
}

/// User patterns and DC values for every list.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Patterns {
    /// Raster-order weights per `(size_id, list_id)` slot.
    coeffs: [[i32; MAX_PATTERN]; SLOT_COUNT],
    /// DC override per slot; zero means "use 16".
    dc: [i32; SLOT_COUNT],
}

impl Patterns {
    fn flat() -> Self {
        Self {
            coeffs: [[FLAT_WEIGHT; MAX_PATTERN]; SLOT_COUNT],
            dc: [0; SLOT_COUNT],
        }
    }

    fn hevc_default() -> Self {
        let mut p = Self::flat();
        for (size_id, &lists) in LIST_COUNT.iter().enumerate() {
            for list in 0..lists {
                let s = slot(size_id, list);
                p.dc[s] = FLAT_WEIGHT;
                if size_id > 0 {
                    let inter = if size_id == 3 { list == 1 } else { list >= 3 };
                    p.coeffs[s] = if inter { DEFAULT_INTER_8X8 } else { DEFAULT_INTRA_8X8 };
                }
            }
        }
        p
    }
}

/// Scaling-list store.
///
/// Built once and read-only afterwards, so it can be shared freely between
/// threads.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalingList {
    enabled: bool,
    bitdepth: u8,
    patterns: Patterns,
    tables: Vec<SlotTables>,
}

impl ScalingList {
    /// Flat store: every quant entry is `Q[qp % 6]`, every dequant `D[qp % 6] << 4`.
    pub fn flat(bitdepth: u8) -> Self {
        Self::build(false, bitdepth, Patterns::flat())
    }

    /// HEVC default matrices (flat 4x4, default intra/inter 8x8 upsampled, DC 16).
    pub fn hevc_default(bitdepth: u8) -> Self {
        info!(bitdepth, "using default scaling lists");
        Self::build(true, bitdepth, Patterns::hevc_default())
    }

    /// Parse a scaling-list description.
    pub fn from_text(text: &str, bitdepth: u8) -> Result<Self, ScalingListError> {
        let patterns = parse(text)?;
        Ok(Self::build(true, bitdepth, patterns))
    }

    /// Read and parse a scaling-list file.
    pub fn load_file(path: impl AsRef<Path>, bitdepth: u8) -> Result<Self, ScalingListError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let list = Self::from_text(&text, bitdepth)?;
        info!(path = %path.display(), bitdepth, "loaded scaling lists");
        Ok(list)
    }

    /// Replace the patterns with a parsed description.
    ///
    /// On error the store is left untouched.
    pub fn load_str(&mut self, text: &str) -> Result<(), ScalingListError> {
        let patterns = parse(text)?;
        *self = Self::build(true, self.bitdepth, patterns);
        Ok(())
    }

    fn build(enabled: bool, bitdepth: u8, patterns: Patterns) -> Self {
        let mut tables = Vec::with_capacity(SLOT_COUNT);
        for (size_id, &lists) in LIST_COUNT.iter().enumerate() {
            let Some(size) = BlockSize::from_size_id(size_id) else {
                continue;
            };
            for list in 0..lists {
                let s = slot(size_id, list);
                let coeffs = &patterns.coeffs[s];
                let dc = patterns.dc[s];
                let derive = |qp_rem: usize| {
                    let (quant, dequant) = if enabled {
                        weighted_tables(size, coeffs, dc, qp_rem)
                    } else {
                        flat_tables(size, qp_rem)
                    };
                    let err = error_scales(size, bitdepth, &quant);
                    (quant, dequant, err)
                };
                let mut slot_tables = SlotTables {
                    quant: Default::default(),
                    dequant: Default::default(),
                    err_scale: Default::default(),
                };
                for qp_rem in 0..6 {
                    let (q, d, e) = derive(qp_rem);
                    slot_tables.quant[qp_rem] = q;
                    slot_tables.dequant[qp_rem] = d;
                    slot_tables.err_scale[qp_rem] = e;
                }
                debug_assert_eq!(tables.len(), s);
                tables.push(slot_tables);
            }
        }
        Self {
            enabled,
            bitdepth,
            patterns,
            tables,
        }
    }

    /// Whether the matrix path is active.
    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Bit depth the error scales were derived for.
    #[inline]
    pub fn bitdepth(&self) -> u8 {
        self.bitdepth
    }

    /// Forward quantizer multipliers, `N*N` entries in raster order.
    #[inline]
    pub fn quant_coeffs(&self, size: BlockSize, list: usize, qp_rem: usize) -> &[i32] {
        &self.tables[slot(size.size_id(), list)].quant[qp_rem]
    }

    /// Inverse quantizer multipliers, `N*N` entries in raster order.
    #[inline]
    pub fn dequant_coeffs(&self, size: BlockSize, list: usize, qp_rem: usize) -> &[i32] {
        &self.tables[slot(size.size_id(), list)].dequant[qp_rem]
    }

    /// Distortion weights used by rate-distortion quantization.
    #[inline]
    pub fn err_scales(&self, size: BlockSize, list: usize, qp_rem: usize) -> &[f64] {
        &self.tables[slot(size.size_id(), list)].err_scale[qp_rem]
    }

    /// User pattern of a list in raster order (16 or 64 weights).
    pub fn pattern(&self, size: BlockSize, list: usize) -> &[i32] {
        let size_id = size.size_id();
        &self.patterns.coeffs[slot(size_id, list)][..pattern_len(size_id)]
    }

    /// DC weight of a list (0 when not set).
    pub fn dc(&self, size: BlockSize, list: usize) -> i32 {
        self.patterns.dc[slot(size.size_id(), list)]
    }

    /// Serialise the patterns in the text format [`ScalingList::from_text`] reads.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (size_id, names) in SECTION_NAMES.iter().enumerate() {
            let scan = pattern_scan(size_id);
            for (list, name) in names.iter().enumerate() {
                let coeffs = &self.patterns.coeffs[slot(size_id, list)];
                let _ = writeln!(out, "{name}");
                for row in scan[..pattern_len(size_id)].chunks(8) {
                    let line: Vec<String> = row.iter().map(|&pos| coeffs[pos as usize].to_string()).collect();
                    let _ = writeln!(out, "{},", line.join(","));
                }
            }
        }
        for (size_id, names) in SECTION_NAMES.iter().enumerate().skip(2) {
            for (list, name) in names.iter().enumerate() {
                let _ = writeln!(out, "{name}{DC_SUFFIX}");
                let _ = writeln!(out, "{}", self.patterns.dc[slot(size_id, list)]);
            }
        }
        out
    }
}

fn flat_tables(size: BlockSize, qp_rem: usize) -> (Vec<i32>, Vec<i32>) {
    let n = size.area();
    (vec![QUANT_SCALES[qp_rem]; n], vec![INV_QUANT_SCALES[qp_rem] << 4; n])
}

/// Nearest-neighbour upsampling of the pattern to `N*N`, with the DC override
/// for 16x16 and 32x32.
fn weighted_tables(size: BlockSize, coeffs: &[i32; MAX_PATTERN], dc: i32, qp_rem: usize) -> (Vec<i32>, Vec<i32>) {
    let n = size.width();
    let base = n.min(8);
    let ratio = n / base;
    let q = QUANT_SCALES[qp_rem] << 4;
    let d = INV_QUANT_SCALES[qp_rem];

    let mut quant = vec![0; n * n];
    let mut dequant = vec![0; n * n];
    for j in 0..n {
        for i in 0..n {
            let w = coeffs[base * (j / ratio) + i / ratio];
            quant[j * n + i] = q / w;
            dequant[j * n + i] = d * w;
        }
    }
    if ratio > 1 {
        let w = if dc == 0 { FLAT_WEIGHT } else { dc };
        quant[0] = q / w;
        dequant[0] = d * w;
    }
    (quant, dequant)
}

fn error_scales(size: BlockSize, bitdepth: u8, quant: &[i32]) -> Vec<f64> {
    let transform_shift = MAX_TR_DYNAMIC_RANGE - i32::from(bitdepth) - size.log2() as i32;
    let scale = f64::from(1 << CTX_FRAC_BITS) * 2f64.powi(-2 * transform_shift);
    let depth_scale = 2f64.powi(2 * (i32::from(bitdepth) - 8));
    quant
        .iter()
        .map(|&q| {
            let q = f64::from(q);
            scale / q / q / depth_scale
        })
        .collect()
}

//------------------------------------------------------------------------------
// Text format

/// Byte offset just past the header line of `name`, searching from the start.
///
/// A plain section name also occurs inside its `_DC` header, so matches that
/// continue with the suffix are skipped unless the DC section is wanted.
fn find_section(text: &str, name: &str, dc: bool) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let end = offset + line.len();
        let mut from = 0;
        while let Some(at) = line[from..].find(name) {
            let rest = &line[from + at + name.len()..];
            if rest.starts_with(DC_SUFFIX) == dc {
                return Some(end);
            }
            from += at + name.len();
        }
        offset = end;
    }
    None
}

/// Read `count` integers in 1..=255 following the header of `section`.
fn read_values(text: &str, section: &str, dc: bool, count: usize) -> Result<Vec<i32>, ScalingListError> {
    let header = if dc { format!("{section}{DC_SUFFIX}") } else { section.to_owned() };
    let start = find_section(text, section, dc).ok_or_else(|| ScalingListError::MissingSection(header.clone()))?;

    let mut values = Vec::with_capacity(count);
    let tokens = text[start..]
        .split(|c: char| c == ',' || c.is_ascii_whitespace())
        .filter(|t| !t.is_empty());
    for token in tokens.take(count) {
        let value: i64 = token.parse().map_err(|_| ScalingListError::Malformed {
            section: header.clone(),
            value: token.to_owned(),
        })?;
        if !(1..=255).contains(&value) {
            return Err(ScalingListError::OutOfRange { section: header, value });
        }
        values.push(value as i32);
    }
    if values.len() < count {
        return Err(ScalingListError::Truncated {
            section: header,
            found: values.len(),
            expected: count,
        });
    }
    Ok(values)
}

fn parse(text: &str) -> Result<Patterns, ScalingListError> {
    let mut patterns = Patterns::flat();
    for (size_id, names) in SECTION_NAMES.iter().enumerate() {
        let scan = pattern_scan(size_id);
        let len = pattern_len(size_id);
        for (list, name) in names.iter().enumerate() {
            let s = slot(size_id, list);
            let values = read_values(text, name, false, len)?;
            for (&pos, value) in scan[..len].iter().zip(values) {
                patterns.coeffs[s][pos as usize] = value;
            }
            patterns.dc[s] = if size_id > 1 {
                read_values(text, name, true, 1)?[0]
            } else {
                patterns.coeffs[s][0]
            };
        }
    }
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_sixteen() -> String {
        let mut text = String::new();
        for (size_id, names) in SECTION_NAMES.iter().enumerate() {
            for name in names.iter() {
                text.push_str(name);
                text.push('\n');
                let values = vec!["16"; pattern_len(size_id)];
                text.push_str(&values.join(", "));
                text.push('\n');
                if size_id > 1 {
                    text.push_str(&format!("{name}_DC\n16\n"));
                }
            }
        }
        text
    }

    #[test]
    fn flat_tables_use_base_scales() {
        let list = ScalingList::flat(8);
        assert!(!list.enabled());
        for size in BlockSize::ALL {
            for qp_rem in 0..6 {
                let q = list.quant_coeffs(size, 0, qp_rem);
                assert_eq!(q.len(), size.area());
                assert!(q.iter().all(|&v| v == QUANT_SCALES[qp_rem]));
                let d = list.dequant_coeffs(size, 0, qp_rem);
                assert!(d.iter().all(|&v| v == INV_QUANT_SCALES[qp_rem] << 4));
            }
        }
    }

    #[test]
    fn all_sixteen_file_matches_flat_tables() {
        let parsed = ScalingList::from_text(&all_sixteen(), 8).expect("valid file");
        let flat = ScalingList::flat(8);
        assert!(parsed.enabled());
        for size in BlockSize::ALL {
            for list in 0..6 {
                if size == BlockSize::B32 && ![0, 1, 3].contains(&list) {
                    continue;
                }
                for qp_rem in 0..6 {
                    assert_eq!(parsed.quant_coeffs(size, list, qp_rem), flat.quant_coeffs(size, list, qp_rem));
                    assert_eq!(parsed.dequant_coeffs(size, list, qp_rem), flat.dequant_coeffs(size, list, qp_rem));
                    assert_eq!(parsed.err_scales(size, list, qp_rem), flat.err_scales(size, list, qp_rem));
                }
            }
        }
    }

    #[test]
    fn dc_header_does_not_shadow_matrix_section() {
        // DC section first: matching it as the matrix header would read the
        // next section name as a value.
        let mut text = String::from("INTRA16X16_LUMA_DC\n16\n");
        text.push_str(&all_sixteen());
        assert!(ScalingList::from_text(&text, 8).is_ok());
        assert_eq!(find_section("A_DC\nA\n", "A", false), Some(7));
        assert_eq!(find_section("A_DC\nA\n", "A", true), Some(5));
    }

    #[test]
    fn out_of_range_value_fails_without_mutation() {
        let mut list = ScalingList::hevc_default(8);
        let before = list.clone();
        let text = all_sixteen().replacen("16", "256", 1);
        assert!(matches!(list.load_str(&text), Err(ScalingListError::OutOfRange { value: 256, .. })));
        assert_eq!(list, before);

        let text = all_sixteen().replacen("16", "x7", 1);
        assert!(matches!(list.load_str(&text), Err(ScalingListError::Malformed { .. })));
        assert!(matches!(
            list.load_str("INTRA4X4_LUMA\n16,16\n"),
            Err(ScalingListError::Truncated { found: 2, expected: 16, .. })
        ));
        assert!(matches!(list.load_str(""), Err(ScalingListError::MissingSection(_))));
        assert_eq!(list, before);
    }

    #[test]
    fn dump_parses_back_to_the_same_store() {
        let defaults = ScalingList::hevc_default(8);
        let reparsed = ScalingList::from_text(&defaults.dump(), 8).expect("dump is parseable");
        assert_eq!(reparsed, defaults);
    }

    #[test]
    fn inter_32x32_is_aliased() {
        let list = ScalingList::hevc_default(10);
        for qp_rem in 0..6 {
            let a = list.quant_coeffs(BlockSize::B32, 3, qp_rem);
            let b = list.quant_coeffs(BlockSize::B32, 1, qp_rem);
            assert!(core::ptr::eq(a, b));
            assert!(core::ptr::eq(
                list.dequant_coeffs(BlockSize::B32, 3, qp_rem),
                list.dequant_coeffs(BlockSize::B32, 1, qp_rem)
            ));
            assert!(core::ptr::eq(
                list.err_scales(BlockSize::B32, 3, qp_rem),
                list.err_scales(BlockSize::B32, 1, qp_rem)
            ));
        }
        assert_eq!(slot(3, 3), slot(3, 1));
        assert_ne!(slot(2, 3), slot(2, 1));
    }

    #[test]
    fn default_matrices_upsample_with_dc_override() {
        let list = ScalingList::hevc_default(8);
        // 16x16 intra: ratio 2, bottom-right weight 115.
        let q = list.quant_coeffs(BlockSize::B16, 0, 0);
        assert_eq!(q[255], (26214 << 4) / 115);
        assert_eq!(q[0], (26214 << 4) / 16);
        let d = list.dequant_coeffs(BlockSize::B16, 3, 4);
        assert_eq!(d[15 * 16 + 15], 64 * 91);
        assert_eq!(d[1], 64 * 16);
        // 4x4 lists are flat in the defaults.
        assert!(list.quant_coeffs(BlockSize::B4, 0, 2).iter().all(|&v| v == 20560));
    }

    #[test]
    fn list_ids() {
        assert_eq!(list_id(Color::Y, CuType::Intra), 0);
        assert_eq!(list_id(Color::V, CuType::Intra), 2);
        assert_eq!(list_id(Color::Y, CuType::Inter), 3);
        assert_eq!(list_id(Color::U, CuType::Inter), 4);
    }
}
