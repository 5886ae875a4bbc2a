// src/resolver/pins.rs

//! Pinning run requirements to the versions found at build time
//!
//! A variant's `pin_run_as_build` table lists packages whose run
//! requirement must be compatible with the version the output was built
//! against. `x.x` style expressions say how many version places the lower
//! and upper bounds keep.

use crate::error::{Error, Result};
use crate::matchspec::{RequirementSpec, package_name};
use crate::solver::DENY_LIST;
use rattler_conda_types::{Component, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Places kept by the lower bound when none is given
pub const DEFAULT_MIN_PIN: &str = "x.x.x.x.x.x.x";

/// Places kept by the upper bound when none is given
pub const DEFAULT_MAX_PIN: &str = "x";

/// How to derive bounds from a version
///
/// Written either as a mapping (`{min_pin: x.x, max_pin: x}`) or as a bare
/// string, which sets the upper bound only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PinSyntax")]
pub struct PinExpression {
    pub min_pin: Option<String>,
    pub max_pin: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PinSyntax {
    Max(String),
    Table {
        #[serde(default)]
        min_pin: Option<String>,
        #[serde(default)]
        max_pin: Option<String>,
    },
}

impl From<PinSyntax> for PinExpression {
    fn from(syntax: PinSyntax) -> Self {
        match syntax {
            PinSyntax::Max(max_pin) => Self {
                min_pin: None,
                max_pin: Some(max_pin),
            },
            PinSyntax::Table { min_pin, max_pin } => Self { min_pin, max_pin },
        }
    }
}

impl Default for PinExpression {
    fn default() -> Self {
        Self {
            min_pin: Some(DEFAULT_MIN_PIN.to_string()),
            max_pin: Some(DEFAULT_MAX_PIN.to_string()),
        }
    }
}

impl PinExpression {
    pub fn new(min_pin: Option<&str>, max_pin: Option<&str>) -> Self {
        Self {
            min_pin: min_pin.map(str::to_string),
            max_pin: max_pin.map(str::to_string),
        }
    }

    /// Bounds for `version`, e.g. `>=1.2.3,<1.3.0a0`
    pub fn apply(&self, version: &str) -> Result<String> {
        apply_pin_expressions(version, self.min_pin.as_deref(), self.max_pin.as_deref())
    }
}

/// One place of a version: `12`, `b`, `rc`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Place {
    text: String,
    /// Whether a `.` separates this place from the next one
    dotted: bool,
}

/// Break a version into places
///
/// Each component of each version segment is a place. Places within one
/// segment are written back without a dot (`1.1.1a` has the places `1`,
/// `1`, `1`, `a`). Epoch and local parts do not take part in pinning.
fn places(version: &str) -> Result<Vec<Place>> {
    let version = version.trim().trim_end_matches('*').trim_end_matches('.');
    let parsed: Version = version
        .parse()
        .map_err(|e| Error::PinError(format!("malformed version '{version}': {e}")))?;

    let mut out = Vec::new();
    for segment in parsed.segments() {
        // `2.a` parses as `2.0a`; the `0` was never written
        let implicit = usize::from(segment.has_implicit_default());
        let components: Vec<&Component> = segment.components().skip(implicit).collect();
        let last = components.len().saturating_sub(1);
        out.extend(components.into_iter().enumerate().map(|(idx, component)| Place {
            text: component.to_string(),
            dotted: idx == last,
        }));
    }
    if out.is_empty() {
        return Err(Error::PinError(format!("malformed version '{version}'")));
    }
    Ok(out)
}

fn pin_width(expression: Option<&str>) -> Option<usize> {
    expression
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.split('.').count())
}

fn join_places(places: &[Place]) -> String {
    let mut out = String::new();
    for (idx, place) in places.iter().enumerate() {
        out.push_str(&place.text);
        if place.dotted && idx + 1 < places.len() {
            out.push('.');
        }
    }
    out
}

/// Advance one place: numbers count up, letters move to the next letter
fn increment(place: &str) -> Result<String> {
    if place.chars().all(|c| c.is_ascii_digit()) {
        let n: u64 = place
            .parse()
            .map_err(|e| Error::PinError(format!("cannot increment '{place}': {e}")))?;
        return Ok((n + 1).to_string());
    }
    let mut chars: Vec<char> = place.chars().collect();
    match chars.last_mut() {
        Some(last) if last.is_ascii_alphabetic() && !matches!(last, 'z' | 'Z') => {
            *last = (*last as u8 + 1) as char;
            Ok(chars.into_iter().collect())
        }
        _ => Err(Error::PinError(format!("cannot increment '{place}'"))),
    }
}

/// Turn a version and `x.x` pin expressions into a requirement range
///
/// The lower bound keeps the first `len(min_pin)` places. The upper bound
/// keeps the first `len(max_pin)` places with the last one incremented and
/// an `a0` suffix so pre-releases of the next version are excluded.
pub fn apply_pin_expressions(
    version: &str,
    min_pin: Option<&str>,
    max_pin: Option<&str>,
) -> Result<String> {
    let all = places(version)?;
    let mut bounds = Vec::with_capacity(2);

    if let Some(width) = pin_width(min_pin) {
        let kept = &all[..width.min(all.len())];
        // A dropped alphabetic place marks a pre-release, which sorts below
        // the truncated version; fall back to the version itself
        let pre_release = all
            .get(kept.len())
            .is_some_and(|p| p.text.chars().all(|c| c.is_ascii_alphabetic()));
        if pre_release {
            bounds.push(format!(">={}", join_places(&all)));
        } else {
            bounds.push(format!(">={}", join_places(kept)));
        }
    }

    if let Some(width) = pin_width(max_pin) {
        let mut kept = all[..width.min(all.len())].to_vec();
        if let Some(last) = kept.last_mut() {
            last.text = increment(&last.text)?;
        }
        bounds.push(format!("<{}a0", join_places(&kept)));
    }

    Ok(bounds.join(","))
}

/// Pin one run requirement against the resolved build/host versions
///
/// Only bare requirements (a name alone) whose name is both resolved and
/// listed in `pins` are rewritten. `python` is left alone for noarch
/// outputs.
pub fn pin_from_build(
    requirement: &str,
    resolved: &HashMap<String, String>,
    pins: &BTreeMap<String, PinExpression>,
    noarch: bool,
) -> Result<String> {
    let spec = RequirementSpec::parse(requirement)?;
    if !spec.is_bare() || (noarch && spec.name == "python") {
        return Ok(requirement.to_string());
    }
    let (Some(expression), Some(version)) = (pins.get(&spec.name), resolved.get(&spec.name)) else {
        return Ok(requirement.to_string());
    };

    let bounds = expression.apply(version)?;
    if bounds.is_empty() {
        return Ok(requirement.to_string());
    }
    debug!("Pinned {} to {} (built against {})", spec.name, bounds, version);
    Ok(format!("{} {}", spec.name, bounds))
}

/// `name -> version` from concrete `name version build` specs
fn resolved_versions(specs: &[String], outnames: &BTreeSet<String>) -> HashMap<String, String> {
    specs
        .iter()
        .filter_map(|spec| {
            let mut parts = spec.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            (!outnames.contains(name)).then(|| (name.to_string(), version.to_string()))
        })
        .collect()
}

/// Apply `pin_run_as_build` to a run requirement set
///
/// Versions come from the host resolution when cross-compiling and from
/// the build resolution otherwise; names missing there are looked up in
/// the other one. A requirement that cannot be pinned is kept as is.
/// Deny-listed packages are removed from the result.
pub fn apply_pins(
    run: &[String],
    host_specs: &[String],
    build_specs: &[String],
    is_cross: bool,
    noarch: bool,
    outnames: &BTreeSet<String>,
    pins: &BTreeMap<String, PinExpression>,
) -> Vec<String> {
    let (primary, secondary) = if is_cross {
        (host_specs, build_specs)
    } else {
        (build_specs, host_specs)
    };
    let mut resolved = resolved_versions(secondary, outnames);
    resolved.extend(resolved_versions(primary, outnames));

    run.iter()
        .map(|req| match pin_from_build(req, &resolved, pins, noarch) {
            Ok(pinned) => pinned,
            Err(e) => {
                debug!("Could not pin {}: {}", req, e);
                req.clone()
            }
        })
        .filter(|req| !DENY_LIST.contains(&package_name(req).as_str()))
        .collect()
}
