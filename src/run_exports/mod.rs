// src/run_exports/mod.rs

//! Run exports: constraints a package forces onto its consumers
//!
//! A package may declare `weak` exports (applied from the host environment
//! to the run requirements), `strong` exports (applied from the build
//! environment further downstream) and `noarch` exports (applied to
//! platform-independent consumers).

mod artifact;
mod cache;

pub use artifact::{RUN_EXPORTS_MEMBER, read_run_exports};
pub use cache::{CacheStats, DEFAULT_METADATA_SERVICE, RUN_EXPORT_CACHE_SIZE, RunExportCache};

use crate::matchspec::package_name;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// The three run-export buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportKind {
    Weak,
    Strong,
    Noarch,
}

impl ExportKind {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "weak" => Some(Self::Weak),
            "strong" => Some(Self::Strong),
            "noarch" => Some(Self::Noarch),
            _ => None,
        }
    }
}

/// Run exports of one or more packages, by bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunExportBundle {
    #[serde(default)]
    pub weak: BTreeSet<String>,
    #[serde(default)]
    pub strong: BTreeSet<String>,
    #[serde(default)]
    pub noarch: BTreeSet<String>,
}

impl RunExportBundle {
    /// Normalize a raw `run_exports` declaration
    ///
    /// - a string is a single weak export
    /// - a list holds weak exports
    /// - a mapping unions the known buckets; any other key is itself
    ///   exported as weak
    pub fn from_declaration(declaration: &Value) -> Self {
        let mut bundle = Self::default();
        match declaration {
            Value::String(token) => {
                bundle.weak.insert(token.clone());
            }
            Value::Array(items) => {
                bundle.weak.extend(items.iter().filter_map(token_of));
            }
            Value::Object(map) => {
                for (key, value) in map {
                    match ExportKind::from_key(key) {
                        Some(kind) => {
                            let tokens: Vec<String> = match value {
                                Value::Array(items) => items.iter().filter_map(token_of).collect(),
                                other => token_of(other).into_iter().collect(),
                            };
                            debug!("RUN EXPORT: {} {:?}", key, tokens);
                            bundle.bucket_mut(kind).extend(tokens);
                        }
                        None => {
                            debug!("RUN EXPORT: weak [{}]", key);
                            bundle.weak.insert(key.clone());
                        }
                    }
                }
            }
            _ => {}
        }
        bundle
    }

    pub fn bucket(&self, kind: ExportKind) -> &BTreeSet<String> {
        match kind {
            ExportKind::Weak => &self.weak,
            ExportKind::Strong => &self.strong,
            ExportKind::Noarch => &self.noarch,
        }
    }

    fn bucket_mut(&mut self, kind: ExportKind) -> &mut BTreeSet<String> {
        match kind {
            ExportKind::Weak => &mut self.weak,
            ExportKind::Strong => &mut self.strong,
            ExportKind::Noarch => &mut self.noarch,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.weak.is_empty() && self.strong.is_empty() && self.noarch.is_empty()
    }

    /// Union another bundle into this one, bucket by bucket
    pub fn merge(&mut self, other: &Self) {
        self.weak.extend(other.weak.iter().cloned());
        self.strong.extend(other.strong.iter().cloned());
        self.noarch.extend(other.noarch.iter().cloned());
    }

    /// Drop every export whose package name is in `ignored`
    pub fn without_names(&self, ignored: &BTreeSet<String>) -> Self {
        if ignored.is_empty() {
            return self.clone();
        }
        let keep = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter()
                .filter(|token| !ignored.contains(&package_name(token)))
                .cloned()
                .collect()
        };
        Self {
            weak: keep(&self.weak),
            strong: keep(&self.strong),
            noarch: keep(&self.noarch),
        }
    }
}

fn token_of(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Whether a raw declaration carries any data at all
///
/// `{"weak": []}` counts as data: the source answered, it just exports
/// nothing.
pub fn is_declared(declaration: &Value) -> bool {
    match declaration {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_declaration_is_weak() {
        let bundle = RunExportBundle::from_declaration(&json!("pyqt >=5.15,<5.16"));
        assert_eq!(bundle.weak.len(), 1);
        assert!(bundle.weak.contains("pyqt >=5.15,<5.16"));
        assert!(bundle.strong.is_empty());
    }

    #[test]
    fn test_list_declaration_is_weak() {
        let bundle = RunExportBundle::from_declaration(&json!(["libzlib >=1.3", "libfoo"]));
        assert_eq!(bundle.weak.len(), 2);
    }

    #[test]
    fn test_mapping_declaration() {
        let bundle = RunExportBundle::from_declaration(&json!({
            "weak": ["libpng >=1.6"],
            "strong": ["libgcc >=13"],
            "noarch": "python",
            "libstdcxx": ["ignored-value"],
        }));
        assert!(bundle.weak.contains("libpng >=1.6"));
        assert!(bundle.weak.contains("libstdcxx"));
        assert!(bundle.strong.contains("libgcc >=13"));
        assert!(bundle.noarch.contains("python"));
        assert!(!bundle.weak.contains("ignored-value"));
    }

    #[test]
    fn test_without_names_matches_package_names() {
        let bundle = RunExportBundle::from_declaration(&json!({
            "weak": ["libpng >=1.6", "zlib"],
            "strong": ["libgcc >=13"],
        }));
        let ignored: BTreeSet<String> = ["libpng".to_string(), "libgcc".to_string()].into();
        let filtered = bundle.without_names(&ignored);
        assert_eq!(filtered.weak, BTreeSet::from(["zlib".to_string()]));
        assert!(filtered.strong.is_empty());
    }

    #[test]
    fn test_merge_and_is_declared() {
        let mut a = RunExportBundle::from_declaration(&json!({"weak": ["a"]}));
        let b = RunExportBundle::from_declaration(&json!({"strong": ["b"]}));
        a.merge(&b);
        assert!(a.weak.contains("a") && a.strong.contains("b"));

        assert!(!is_declared(&Value::Null));
        assert!(!is_declared(&json!({})));
        assert!(is_declared(&json!({"weak": []})));
        assert!(is_declared(&json!("x")));
    }
}
