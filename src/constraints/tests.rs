//! Tests for constraint parsing and size selection.

use rstest::rstest;

use super::{ConstraintError, parse_size, solve};
use crate::catalog::SizeCatalog;
use crate::provider::{RegionRecord, SizeRecord};

fn size(id: &str, memory_mb: u64, cpus: u64, disk_gb: u64, transfer: u64, price: f64) -> SizeRecord {
    SizeRecord {
        id: id.to_owned(),
        name: id.to_owned(),
        memory_mb,
        cpus,
        disk_gb,
        transfer,
        price_monthly: price,
    }
}

fn region(slug: &str, name: &str, aliases: &[&str]) -> RegionRecord {
    RegionRecord {
        id: slug.to_owned(),
        name: name.to_owned(),
        slug: slug.to_owned(),
        aliases: aliases.iter().map(|alias| (*alias).to_owned()).collect(),
    }
}

/// Catalog mirroring a classic droplet lineup, priced ascending.
fn catalog() -> SizeCatalog {
    SizeCatalog::from_parts(
        vec![
            size("512mb", 512, 1, 20, 1, 5.0),
            size("1gb", 1024, 1, 30, 2, 10.0),
            size("2gb", 2048, 2, 40, 3, 20.0),
            size("4gb", 4096, 2, 60, 4, 40.0),
            size("8gb-nyc1", 8192, 4, 80, 5, 80.0),
            size("16gb", 16384, 8, 160, 6, 160.0),
        ],
        vec![
            region("nyc1", "New York 1", &["nyc"]),
            region("nyc3", "New York 3", &[]),
            region("lon1", "London 1", &["lon", "london"]),
        ],
        Vec::new(),
    )
}

#[rstest]
#[case("2048", Some(2048))]
#[case("2g", Some(2048))]
#[case("2G", Some(2048))]
#[case("1t", Some(1024 * 1024))]
#[case("3p", Some(3 * 1024 * 1024 * 1024))]
#[case("512m", Some(512))]
#[case("2x", None)]
#[case("g", None)]
#[case("-5", None)]
#[case("four", None)]
fn size_suffixes(#[case] input: &str, #[case] expected: Option<u64>) {
    assert_eq!(parse_size(input), expected);
}

#[test]
fn empty_constraints_pick_cheapest_size_and_default_region() {
    let placement = solve("", &catalog()).unwrap_or_else(|err| panic!("solve failed: {err}"));
    assert_eq!(placement.size_id, "512mb");
    assert_eq!(placement.region_id, "nyc3");
}

#[test]
fn example_from_the_field_selects_the_8gb_size() {
    let placement = solve("region=nyc1, cpu-cores=4, mem=2048", &catalog())
        .unwrap_or_else(|err| panic!("solve failed: {err}"));
    assert_eq!(placement.size_id, "8gb-nyc1");
    assert_eq!(placement.region_id, "nyc1");
}

#[test]
fn returns_the_cheapest_size_meeting_every_minimum() {
    let placement =
        solve("mem=1g", &catalog()).unwrap_or_else(|err| panic!("solve failed: {err}"));
    assert_eq!(placement.size_id, "1gb");

    let with_transfer = solve("mem=1g, transfer=4", &catalog())
        .unwrap_or_else(|err| panic!("solve failed: {err}"));
    assert_eq!(with_transfer.size_id, "4gb");
}

#[test]
fn root_disk_constraints_compare_in_megabytes() {
    // 100g = 102400 MB; the first size with disk >= that is 160 GB.
    let placement = solve("root-disk=100g", &catalog())
        .unwrap_or_else(|err| panic!("solve failed: {err}"));
    assert_eq!(placement.size_id, "16gb");
}

#[test]
fn region_aliases_resolve() {
    let placement =
        solve("region=london", &catalog()).unwrap_or_else(|err| panic!("solve failed: {err}"));
    assert_eq!(placement.region_id, "lon1");
}

#[test]
fn unknown_keys_are_reported_together() {
    let result = solve("colour=red, mem=1g, shape=round", &catalog());
    assert_eq!(
        result,
        Err(ConstraintError::UnknownConstraint {
            keys: vec![String::from("colour"), String::from("shape")],
        })
    );
}

#[rstest]
#[case("mem=2x")]
#[case("root-disk=big")]
#[case("cpu-cores=-1")]
#[case("transfer=lots")]
fn malformed_values_are_rejected(#[case] input: &str) {
    let result = solve(input, &catalog());
    assert!(
        matches!(result, Err(ConstraintError::InvalidValue { .. })),
        "unexpected outcome for {input}: {result:?}"
    );
}

#[test]
fn pair_without_equals_is_rejected() {
    let result = solve("mem", &catalog());
    assert!(
        matches!(result, Err(ConstraintError::MalformedPair { ref pair }) if pair == "mem"),
        "unexpected outcome: {result:?}"
    );
}

#[test]
fn unsupported_arch_is_rejected() {
    let result = solve("arch=sparc", &catalog());
    assert_eq!(
        result,
        Err(ConstraintError::UnsupportedArch {
            arch: String::from("sparc"),
        })
    );
}

#[test]
fn amd64_arch_is_accepted() {
    let placement =
        solve("arch=amd64", &catalog()).unwrap_or_else(|err| panic!("solve failed: {err}"));
    assert_eq!(placement.size_id, "512mb");
}

#[test]
fn unknown_region_is_rejected() {
    let result = solve("region=atlantis", &catalog());
    assert_eq!(
        result,
        Err(ConstraintError::UnknownRegion {
            region: String::from("atlantis"),
        })
    );
}

#[test]
fn unsatisfiable_constraints_name_the_unmet_keys() {
    let result = solve("mem=1p, cpu-cores=4", &catalog());
    assert_eq!(
        result,
        Err(ConstraintError::Unsatisfiable {
            keys: vec![String::from("mem")],
        })
    );
}

#[test]
fn combination_failures_name_every_requested_key() {
    // A catalog where memory and cpu minimums are each met somewhere but
    // never together.
    let lopsided = SizeCatalog::from_parts(
        vec![
            size("mem-heavy", 8192, 1, 80, 5, 10.0),
            size("cpu-heavy", 512, 8, 80, 5, 20.0),
        ],
        Vec::new(),
        Vec::new(),
    );
    let result = solve("mem=4g, cpu-cores=4", &lopsided);
    assert_eq!(
        result,
        Err(ConstraintError::Unsatisfiable {
            keys: vec![String::from("mem"), String::from("cpu-cores")],
        })
    );
}
