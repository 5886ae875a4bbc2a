// src/matchspec.rs

//! Requirement strings (conda match specs)
//!
//! Parsing is delegated to `rattler_conda_types::MatchSpec` in lenient
//! mode, so every form conda accepts comes through: `name 1.2 h1234_0`,
//! `name >= 1.2, <2`, `name=1.2=h1234_0`, `channel::name`,
//! `name[version='>=1.2,<2', build='h*']` and so on. On top of that this
//! module keeps what the solver needs: the package name, a version
//! matcher, a build matcher, and the prefix broadening of bare versions.

use crate::error::{Error, Result};
use rattler_conda_types::version_spec::{EqualityOperator, LogicalOperator, StrictRangeOperator};
use rattler_conda_types::{MatchSpec, ParseStrictness, Version, VersionSpec};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Version prefixes that already constrain the version on their own and
/// must not be widened to a prefix match
pub const REQ_START: [&str; 7] = ["!=", "==", ">", "<", ">=", "<=", "~="];

/// `==1.2` written out; lenient parsing folds it into a bare `1.2`
static EXPLICIT_EQUALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"==\s*([0-9A-Za-z!._+]+)").expect("static regex"));

/// A parsed requirement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequirementSpec {
    pub name: String,
    /// Version matcher as written back by the parser, e.g. `>=1.2,<2`
    pub version: Option<String>,
    pub build: Option<String>,
    constraint: Option<VersionSpec>,
    /// Exact versions that carried an explicit `==`
    explicit: BTreeSet<String>,
}

impl RequirementSpec {
    /// Parse a requirement string
    ///
    /// Rejects empty names and build matchers without a version matcher.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidSpec {
            spec: spec.to_string(),
            reason,
        };

        let parsed = MatchSpec::from_str(spec.trim(), ParseStrictness::Lenient)
            .map_err(|e| invalid(e.to_string()))?;
        let name = parsed
            .name
            .as_ref()
            .map(|name| name.as_normalized().to_string())
            .ok_or_else(|| invalid("missing package name".to_string()))?;

        let constraint = parsed.version.filter(|v| !matches!(v, VersionSpec::None));
        let build = parsed.build.map(|b| b.to_string());
        if build.is_some() && constraint.is_none() {
            return Err(invalid("has build but not version".to_string()));
        }

        let explicit = explicit_equals(spec);
        Ok(Self {
            name,
            version: constraint.as_ref().map(|v| render(v, false, &explicit)),
            build,
            constraint,
            explicit,
        })
    }

    /// The form sent to the solver: `name [broadened-version] [build]`
    pub fn normalized(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if let Some(constraint) = &self.constraint {
            parts.push(render(constraint, true, &self.explicit));
        }
        if let Some(build) = &self.build {
            parts.push(build.clone());
        }
        parts.join(" ")
    }

    /// Whether the requirement carries no version or build constraint
    pub fn is_bare(&self) -> bool {
        self.constraint.is_none() && self.build.is_none()
    }
}

impl fmt::Display for RequirementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }
        if let Some(build) = &self.build {
            write!(f, " {build}")?;
        }
        Ok(())
    }
}

/// Versions written with an explicit `==` in `text`
fn explicit_equals(text: &str) -> BTreeSet<String> {
    EXPLICIT_EQUALS
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<Version>().ok())
        .map(|version| version.to_string())
        .collect()
}

/// Write a version matcher back out
///
/// Exact versions come out bare (`1.2`), or as a prefix match (`1.2.*`)
/// when `broaden` is set. Versions listed in `explicit` keep their `==`.
/// Everything else keeps its operator.
fn render(spec: &VersionSpec, broaden: bool, explicit: &BTreeSet<String>) -> String {
    let mut out = String::new();
    write_spec(&mut out, spec, broaden, explicit, None);
    out
}

fn write_spec(
    out: &mut String,
    spec: &VersionSpec,
    broaden: bool,
    explicit: &BTreeSet<String>,
    parent: Option<LogicalOperator>,
) {
    use std::fmt::Write as _;

    // Writing into a String never fails
    let _ = match spec {
        VersionSpec::Exact(EqualityOperator::Equals, version) if explicit.contains(&version.to_string()) => {
            write!(out, "=={version}")
        }
        VersionSpec::Exact(EqualityOperator::Equals, version) if broaden => write!(out, "{version}.*"),
        VersionSpec::Exact(EqualityOperator::Equals, version) => write!(out, "{version}"),
        VersionSpec::StrictRange(StrictRangeOperator::StartsWith, version) => write!(out, "{version}.*"),
        VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, version) => {
            write!(out, "!={version}.*")
        }
        VersionSpec::Group(op, members) => {
            let parens = matches!((op, parent), (LogicalOperator::Or, Some(LogicalOperator::And)));
            if parens {
                out.push('(');
            }
            for (idx, member) in members.iter().enumerate() {
                if idx > 0 {
                    out.push_str(&op.to_string());
                }
                write_spec(out, member, broaden, explicit, Some(*op));
            }
            if parens {
                out.push(')');
            }
            Ok(())
        }
        other => write!(out, "{other}"),
    };
}

/// Widen bare versions to prefix matches
///
/// `1.1` becomes `1.1.*`, `=1.1` becomes `1.1.*`, `==1.1` stays.
/// Alternatives joined by `|` and `,` are handled one by one. Anything
/// carrying a comparator, or already a wildcard, is left alone.
pub fn broaden_version(version: &str) -> Result<String> {
    let spec = VersionSpec::from_str(version.trim(), ParseStrictness::Lenient).map_err(|e| {
        Error::InvalidSpec {
            spec: version.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(render(&spec, true, &explicit_equals(version)))
}

/// Normalize a requirement string for the solver
pub fn normalize_spec(spec: &str) -> Result<String> {
    Ok(RequirementSpec::parse(spec)?.normalized())
}

/// Package name of a requirement string
///
/// Falls back to the first whitespace-separated token for strings that do
/// not parse, so that filtering by name still works on odd inputs.
pub fn package_name(spec: &str) -> String {
    MatchSpec::from_str(spec.trim(), ParseStrictness::Lenient)
        .ok()
        .and_then(|parsed| parsed.name.map(|name| name.as_normalized().to_string()))
        .unwrap_or_else(|| spec.split_whitespace().next().unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_forms() {
        let s = RequirementSpec::parse("numpy").unwrap();
        assert_eq!(s.name, "numpy");
        assert!(s.is_bare());

        let s = RequirementSpec::parse("numpy 1.22 py310h1234_0").unwrap();
        assert_eq!(s.version.as_deref(), Some("1.22"));
        assert_eq!(s.build.as_deref(), Some("py310h1234_0"));

        let s = RequirementSpec::parse("python >=3.8, <3.12").unwrap();
        assert_eq!(s.version.as_deref(), Some(">=3.8,<3.12"));

        let s = RequirementSpec::parse("libzlib>=1.2.13").unwrap();
        assert_eq!(s.name, "libzlib");
        assert_eq!(s.version.as_deref(), Some(">=1.2.13"));

        let s = RequirementSpec::parse("openssl=3.1=h0").unwrap();
        assert_eq!(s.version.as_deref(), Some("3.1"));
        assert_eq!(s.build.as_deref(), Some("h0"));

        let s = RequirementSpec::parse("conda-forge::zlib 1.2").unwrap();
        assert_eq!(s.name, "zlib");

        let s = RequirementSpec::parse("blas[version='>=2', build=\"*mkl\"]").unwrap();
        assert_eq!(s.name, "blas");
        assert_eq!(s.version.as_deref(), Some(">=2"));
        assert_eq!(s.build.as_deref(), Some("*mkl"));
    }

    #[test]
    fn test_spaced_operator_with_build() {
        let s = RequirementSpec::parse("numpy >= 1.20 py_0").unwrap();
        assert_eq!(s.name, "numpy");
        assert_eq!(s.version.as_deref(), Some(">=1.20"));
        assert_eq!(s.build.as_deref(), Some("py_0"));
        assert_eq!(s.normalized(), "numpy >=1.20 py_0");
    }

    #[test]
    fn test_quoted_bracket_keeps_commas() {
        assert_eq!(normalize_spec("blas[version='>=2,<3']").unwrap(), "blas >=2,<3");
        let s = RequirementSpec::parse("blas[version=\">=2,<3\", build='*mkl']").unwrap();
        assert_eq!(s.version.as_deref(), Some(">=2,<3"));
        assert_eq!(s.build.as_deref(), Some("*mkl"));
    }

    #[test]
    fn test_build_without_version_rejected() {
        let err = RequirementSpec::parse("foo[build=h1]").unwrap_err();
        assert!(err.to_string().contains("has build but not version"));
        assert!(RequirementSpec::parse("   ").is_err());
    }

    #[test]
    fn test_normalized() {
        assert_eq!(normalize_spec("xtensor 0.18").unwrap(), "xtensor 0.18.*");
        assert_eq!(normalize_spec("xtensor=0.18").unwrap(), "xtensor 0.18.*");
        assert_eq!(normalize_spec("xtensor ==0.18").unwrap(), "xtensor ==0.18");
        assert_eq!(normalize_spec("xtensor==0.18 h1_0").unwrap(), "xtensor ==0.18 h1_0");
        assert_eq!(normalize_spec("foo 1.0 h1_0").unwrap(), "foo 1.0.* h1_0");
        assert_eq!(normalize_spec("foo >=1.0").unwrap(), "foo >=1.0");
        assert_eq!(normalize_spec("foo").unwrap(), "foo");
    }

    #[test]
    fn test_broaden_alternatives() {
        assert_eq!(broaden_version("1.1|1.2").unwrap(), "1.1.*|1.2.*");
        assert_eq!(broaden_version(">=1,<2|3").unwrap(), ">=1,<2|3.*");
        assert_eq!(broaden_version("1.2.*").unwrap(), "1.2.*");
        assert_eq!(broaden_version("~=1.4").unwrap(), "~=1.4");
        assert_eq!(broaden_version("!=1.4").unwrap(), "!=1.4");
    }

    #[test]
    fn test_package_name_fallback() {
        assert_eq!(package_name("foo >=1"), "foo");
        assert_eq!(package_name("bar[build=x]"), "bar");
        assert_eq!(package_name("conda-forge::zlib"), "zlib");
        assert_eq!(package_name("ba$d >=1"), "ba$d");
    }

    // Numerals without leading zeros, since versions are written back from
    // their parsed components
    const NUMERAL: &str = "(0|[1-9][0-9]{0,2})";

    proptest! {
        #[test]
        fn broadening_keeps_comparators(
            op in prop::sample::select(REQ_START.to_vec()),
            version in proptest::string::string_regex(&format!("{NUMERAL}(\\.{NUMERAL}){{1,3}}")).unwrap(),
        ) {
            let spec = format!("{op}{version}");
            prop_assert_eq!(broaden_version(&spec).unwrap(), spec);
        }

        #[test]
        fn broadening_keeps_wildcards(version in proptest::string::string_regex(&format!("{NUMERAL}(\\.{NUMERAL}){{0,2}}\\.\\*")).unwrap()) {
            prop_assert_eq!(broaden_version(&version).unwrap(), version);
        }

        #[test]
        fn broadening_appends_star_to_bare_versions(version in proptest::string::string_regex(&format!("{NUMERAL}(\\.{NUMERAL}){{0,3}}")).unwrap()) {
            prop_assert_eq!(broaden_version(&version).unwrap(), format!("{version}.*"));
        }

        #[test]
        fn broadening_is_per_alternative(
            versions in prop::collection::vec(proptest::string::string_regex(&format!("{NUMERAL}\\.{NUMERAL}")).unwrap(), 2..5),
            sep in prop::sample::select(vec!["|", ","]),
        ) {
            let joined = versions.join(sep);
            let expected = versions
                .iter()
                .map(|v| format!("{v}.*"))
                .collect::<Vec<_>>()
                .join(sep);
            prop_assert_eq!(broaden_version(&joined).unwrap(), expected);
        }
    }
}
