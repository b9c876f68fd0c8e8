//! Constraint parsing and size/region selection.
//!
//! A constraint string is a comma-separated list of `key=value` pairs
//! expressing minimum resource requirements. Solving maps the parsed set onto
//! the cheapest catalog size that satisfies every requested minimum, plus a
//! resolved region. Solving is pure: the same input and catalog always yield
//! the same placement.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::catalog::{DEFAULT_REGION, SizeCatalog, SizeSpec};

/// Architectures the provider offers.
const SUPPORTED_ARCHES: [&str; 1] = ["amd64"];

const SIZE_KEYS: [&str; 6] = ["region", "mem", "root-disk", "cpu-cores", "transfer", "arch"];

/// Outcome of a successful solve.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Placement {
    /// Size identifier to request from the provider.
    pub size_id: String,
    /// Region identifier to request from the provider.
    pub region_id: String,
}

/// Errors raised while parsing or solving constraints.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConstraintError {
    /// Raised when the input contains keys outside the supported set.
    #[error("unknown constraints: {}", keys.join(" "))]
    UnknownConstraint {
        /// The unrecognised keys, in input order.
        keys: Vec<String>,
    },
    /// Raised when a pair lacks the `key=value` shape.
    #[error("constraint is not a key=value pair: {pair}")]
    MalformedPair {
        /// The offending fragment.
        pair: String,
    },
    /// Raised when a value cannot be parsed for its key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Constraint key whose value was rejected.
        key: String,
        /// The rejected value.
        value: String,
    },
    /// Raised when the requested architecture is not offered.
    #[error("unsupported arch {arch}")]
    UnsupportedArch {
        /// The rejected architecture.
        arch: String,
    },
    /// Raised when the region matches no catalog name, slug, or alias.
    #[error("unknown region {region}")]
    UnknownRegion {
        /// The rejected region value.
        region: String,
    },
    /// Raised when no catalog size satisfies every requested minimum.
    #[error("no size satisfies constraints: {}", keys.join(", "))]
    Unsatisfiable {
        /// The constraint keys that could not be met.
        keys: Vec<String>,
    },
}

/// Parsed constraint set. Built fresh per solve call and never mutated after
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct ConstraintSet {
    memory_mb: Option<u64>,
    disk_mb: Option<u64>,
    cpus: Option<u64>,
    transfer: Option<u64>,
    region: Option<String>,
}

/// Parses a size magnitude with an optional unit suffix.
///
/// Suffixes scale megabytes: `m` (x1), `g` (x1024), `t` (x1024^2),
/// `p` (x1024^3). A bare integer is already in megabytes.
fn parse_size(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    let mut chars = trimmed.chars();
    let last = chars.next_back()?;
    let factor = match last.to_ascii_lowercase() {
        'm' => Some(1),
        'g' => Some(1024),
        't' => Some(1024 * 1024),
        'p' => Some(1024 * 1024 * 1024),
        _ => None,
    };
    match factor {
        Some(scale) => chars.as_str().parse::<u64>().ok()?.checked_mul(scale),
        None => trimmed.parse::<u64>().ok(),
    }
}

fn parse_count(key: &str, value: &str) -> Result<u64, ConstraintError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConstraintError::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
        })
}

fn split_pairs(input: &str) -> Result<Vec<(&str, &str)>, ConstraintError> {
    let mut pairs = Vec::new();
    let mut unknown = Vec::new();
    for part in input.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let Some((raw_key, value)) = part.split_once('=') else {
            return Err(ConstraintError::MalformedPair {
                pair: part.to_owned(),
            });
        };
        let key = raw_key.trim();
        if SIZE_KEYS.contains(&key) {
            pairs.push((key, value.trim()));
        } else {
            unknown.push(key.to_owned());
        }
    }
    if unknown.is_empty() {
        Ok(pairs)
    } else {
        Err(ConstraintError::UnknownConstraint { keys: unknown })
    }
}

fn parse(input: &str) -> Result<ConstraintSet, ConstraintError> {
    let mut set = ConstraintSet::default();
    for (key, value) in split_pairs(input)? {
        match key {
            "mem" => {
                set.memory_mb =
                    Some(parse_size(value).ok_or_else(|| ConstraintError::InvalidValue {
                        key: key.to_owned(),
                        value: value.to_owned(),
                    })?);
            }
            "root-disk" => {
                set.disk_mb =
                    Some(parse_size(value).ok_or_else(|| ConstraintError::InvalidValue {
                        key: key.to_owned(),
                        value: value.to_owned(),
                    })?);
            }
            "cpu-cores" => set.cpus = Some(parse_count(key, value)?),
            "transfer" => set.transfer = Some(parse_count(key, value)?),
            "arch" => {
                if !SUPPORTED_ARCHES.contains(&value) {
                    return Err(ConstraintError::UnsupportedArch {
                        arch: value.to_owned(),
                    });
                }
            }
            "region" => set.region = Some(value.to_owned()),
            _ => {}
        }
    }
    Ok(set)
}

type Accessor = fn(&SizeSpec) -> u64;

fn requested_minimums(set: &ConstraintSet) -> Vec<(&'static str, u64, Accessor)> {
    let mut minimums: Vec<(&'static str, u64, Accessor)> = Vec::new();
    if let Some(memory_mb) = set.memory_mb {
        minimums.push(("mem", memory_mb, |size| size.memory_mb));
    }
    if let Some(disk_mb) = set.disk_mb {
        minimums.push(("root-disk", disk_mb, |size| size.disk_mb));
    }
    if let Some(cpus) = set.cpus {
        minimums.push(("cpu-cores", cpus, |size| size.cpus));
    }
    if let Some(transfer) = set.transfer {
        minimums.push(("transfer", transfer, |size| size.transfer));
    }
    minimums
}

/// Solves a constraint string against the catalog.
///
/// Returns the cheapest size whose every requested numeric attribute is
/// greater than or equal to the constraint, with the resolved (or default)
/// region.
///
/// # Errors
///
/// Returns [`ConstraintError`] for unknown keys, malformed values,
/// unsupported architectures, unknown regions, and unsatisfiable minimums.
pub fn solve(input: &str, catalog: &SizeCatalog) -> Result<Placement, ConstraintError> {
    let set = parse(input)?;

    let region_id = match set.region.as_deref() {
        Some(name) => catalog
            .resolve_region(name)
            .map(|region| region.id.clone())
            .ok_or_else(|| ConstraintError::UnknownRegion {
                region: name.to_owned(),
            })?,
        // The default region is a fixed slug; catalogs without it (offline
        // fixtures) still produce a deterministic placement.
        None => catalog
            .resolve_region(DEFAULT_REGION)
            .map_or_else(|| DEFAULT_REGION.to_owned(), |region| region.id.clone()),
    };

    let minimums = requested_minimums(&set);
    let mut never_met: Option<BTreeSet<&'static str>> = None;

    for size in catalog.sizes() {
        let unmet: BTreeSet<&'static str> = minimums
            .iter()
            .filter(|(_, minimum, attribute)| attribute(size) < *minimum)
            .map(|(key, _, _)| *key)
            .collect();
        if unmet.is_empty() {
            return Ok(Placement {
                size_id: size.id.clone(),
                region_id,
            });
        }
        never_met = Some(match never_met {
            Some(previous) => previous.intersection(&unmet).copied().collect(),
            None => unmet,
        });
    }

    // Name the keys no size could meet; when only the combination failed,
    // name every requested key.
    let mut keys: Vec<String> = never_met
        .unwrap_or_default()
        .into_iter()
        .map(str::to_owned)
        .collect();
    if keys.is_empty() {
        keys = minimums.iter().map(|(key, _, _)| (*key).to_owned()).collect();
    }
    Err(ConstraintError::Unsatisfiable { keys })
}

#[cfg(test)]
mod tests;
