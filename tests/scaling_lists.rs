//! Scaling-list files: parsing, dumping, loading through the configuration.

use std::path::PathBuf;

use zenhevc::{BlockSize, QuantConfig, ScalingList, ScalingListError, ScalingListMode, TqError};

const QUANT_SCALES: [i32; 6] = [26214, 23302, 20560, 18396, 16384, 14564];
const INV_QUANT_SCALES: [i32; 6] = [40, 45, 51, 57, 64, 72];

/// Scaling-list file with every weight set to 16, except `INTRA4X4_LUMA`.
fn uniform_file(intra_4x4_luma: u32) -> String {
    let mut text = String::new();
    for (size, count) in [("4X4", 16), ("8X8", 64), ("16X16", 64), ("32X32", 64)] {
        let comps: &[&str] = if size == "32X32" { &["LUMA"] } else { &["LUMA", "CHROMAU", "CHROMAV"] };
        for kind in ["INTRA", "INTER"] {
            for comp in comps {
                let name = format!("{kind}{size}_{comp}");
                let weight = if name == "INTRA4X4_LUMA" { intra_4x4_luma } else { 16 };
                text.push_str(&name);
                text.push('\n');
                for row in vec![weight.to_string(); count].chunks(8) {
                    text.push_str(&row.join(", "));
                    text.push('\n');
                }
                if size == "16X16" || size == "32X32" {
                    text.push_str(&format!("{name}_DC\n16\n"));
                }
            }
        }
    }
    text
}

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("zenhevc-{}-{name}", std::process::id()));
    std::fs::write(&path, contents).expect("temp dir is writable");
    path
}

#[test]
fn all_sixteen_file_reproduces_the_flat_tables() {
    let list = ScalingList::from_text(&uniform_file(16), 8).expect("valid file");
    for size in BlockSize::ALL {
        for qp_rem in 0..6 {
            assert!(list.quant_coeffs(size, 0, qp_rem).iter().all(|&v| v == QUANT_SCALES[qp_rem]));
            assert!(list
                .dequant_coeffs(size, 3, qp_rem)
                .iter()
                .all(|&v| v == INV_QUANT_SCALES[qp_rem] << 4));
        }
    }
}

#[test]
fn custom_weight_scales_one_list() {
    let list = ScalingList::from_text(&uniform_file(32), 8).expect("valid file");
    for qp_rem in 0..6 {
        assert!(list.quant_coeffs(BlockSize::B4, 0, qp_rem).iter().all(|&v| v == (QUANT_SCALES[qp_rem] << 4) / 32));
        assert!(list.dequant_coeffs(BlockSize::B4, 0, qp_rem).iter().all(|&v| v == INV_QUANT_SCALES[qp_rem] * 32));
        assert!(list.quant_coeffs(BlockSize::B4, 1, qp_rem).iter().all(|&v| v == QUANT_SCALES[qp_rem]));
    }
    assert_eq!(list.dc(BlockSize::B4, 0), 32);
}

#[test]
fn dump_round_trips() {
    for list in [
        ScalingList::hevc_default(8),
        ScalingList::from_text(&uniform_file(48), 10).expect("valid file"),
    ] {
        let again = ScalingList::from_text(&list.dump(), list.bitdepth()).expect("dump parses");
        assert_eq!(again, list);
        assert_eq!(again.dump(), list.dump());
    }
}

#[test]
fn inter_32x32_shares_storage_with_list_one() {
    let list = ScalingList::from_text(&uniform_file(20), 8).expect("valid file");
    for qp_rem in 0..6 {
        assert!(std::ptr::eq(
            list.quant_coeffs(BlockSize::B32, 3, qp_rem),
            list.quant_coeffs(BlockSize::B32, 1, qp_rem)
        ));
        assert!(std::ptr::eq(
            list.err_scales(BlockSize::B32, 3, qp_rem),
            list.err_scales(BlockSize::B32, 1, qp_rem)
        ));
    }
}

#[test]
fn configuration_loads_a_custom_file() {
    let path = temp_file("custom.txt", &uniform_file(24));
    let config = QuantConfig::new().with_scaling_list(ScalingListMode::Custom(path.clone()));
    let list = config.build_scaling_list().expect("file loads");
    let _ = std::fs::remove_file(&path);
    assert!(list.enabled());
    assert_eq!(list.pattern(BlockSize::B4, 0), &[24; 16][..]);
    assert_eq!(list, ScalingList::from_text(&uniform_file(24), 8).expect("valid file"));

    let defaults = QuantConfig::new().with_scaling_list(ScalingListMode::Default);
    assert_eq!(defaults.build_scaling_list().expect("defaults build"), ScalingList::hevc_default(8));
    let off = QuantConfig::new().build_scaling_list().expect("flat lists build");
    assert!(!off.enabled());
}

#[test]
fn broken_files_are_reported() {
    let text = uniform_file(16);

    let missing = text.replace("INTER8X8_CHROMAV", "INTER8X8_CHROMAW");
    assert!(matches!(
        ScalingList::from_text(&missing, 8),
        Err(ScalingListError::MissingSection(name)) if name == "INTER8X8_CHROMAV"
    ));

    let zero = text.replacen("16", "0", 1);
    assert!(matches!(
        ScalingList::from_text(&zero, 8),
        Err(ScalingListError::OutOfRange { value: 0, .. })
    ));

    let word = text.replacen("16", "sixteen", 1);
    assert!(matches!(ScalingList::from_text(&word, 8), Err(ScalingListError::Malformed { .. })));

    let cut = &text[..text.len() - 8];
    assert!(matches!(
        ScalingList::from_text(cut, 8),
        Err(ScalingListError::Truncated { .. }) | Err(ScalingListError::MissingSection(_))
    ));

    let path = std::env::temp_dir().join("zenhevc-no-such-dir").join("lists.txt");
    let config = QuantConfig::new().with_scaling_list(ScalingListMode::Custom(path));
    assert!(matches!(config.build_scaling_list(), Err(TqError::ScalingList(ScalingListError::Io(_)))));
}

#[test]
fn failed_reload_keeps_the_previous_tables() {
    let mut list = ScalingList::hevc_default(8);
    let before = list.clone();
    assert!(list.load_str("INTRA4X4_LUMA\n1, 2, 3\n").is_err());
    assert_eq!(list, before);

    list.load_str(&uniform_file(16)).expect("valid file");
    assert_ne!(list, before);
    assert_eq!(list.quant_coeffs(BlockSize::B8, 2, 0), ScalingList::flat(8).quant_coeffs(BlockSize::B8, 2, 0));
}
