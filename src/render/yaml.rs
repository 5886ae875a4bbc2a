// src/render/yaml.rs

//! `meta.yaml` rendering
//!
//! Jinja runs first, then `# [selector]` lines are filtered, then the
//! remaining text is parsed as YAML. Parsing follows the layout conda-build
//! accepts: a top-level package, optionally split into `outputs`.

use super::jinja::Template;
use super::selectors::{SelectorNamespace, evaluate_selector};
use super::{
    BUILD_REQUIREMENTS, HOST_REQUIREMENTS, IGNORE_RUN_EXPORTS, IGNORE_RUN_EXPORTS_FROM,
    RUN_REQUIREMENTS, RecipeRenderer, RenderedOutput, TEST_REQUIREMENTS, TEST_REQUIRES,
};
use crate::channel::PlatformTarget;
use crate::config::VariantConfig;
use crate::error::{Error, Result};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, trace};

pub const RECIPE_FILE: &str = "meta.yaml";

/// `content  # [selector]`, tolerating free text between `#` and `[`
static SELECTOR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<content>.*?)\s*#[^#\[]*\[(?P<selector>[^\[\]]+)\]\s*$").expect("static regex")
});

/// Drop lines whose selector is false and strip the selector comment from the rest
pub(crate) fn select_lines(text: &str, ns: &SelectorNamespace) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        match SELECTOR_LINE.captures(line) {
            Some(caps) => {
                let selector = &caps["selector"];
                if evaluate_selector(selector, ns)? {
                    out.push_str(&caps["content"]);
                } else {
                    trace!("selector [{}] drops '{}'", selector, line.trim());
                }
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    Ok(out)
}

/// Renders `recipe/meta.yaml`
#[derive(Debug, Clone, Default)]
pub struct YamlRenderer;

impl YamlRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render recipe text directly
    pub fn render_str(
        &self,
        source: &str,
        host_target: &PlatformTarget,
        build_target: &PlatformTarget,
        variant: &VariantConfig,
    ) -> Result<Vec<RenderedOutput>> {
        let mut template = Template::new(host_target, build_target, variant);
        let text = template.render(source)?;
        let ns = SelectorNamespace::for_targets(host_target, build_target, variant);
        let selected = select_lines(&text, &ns)?;

        let document: Value = serde_yaml::from_str(&selected)
            .map_err(|e| Error::RenderError(format!("invalid recipe YAML: {e}")))?;
        let Value::Mapping(root) = document else {
            return Err(Error::RenderError("recipe is not a mapping".to_string()));
        };

        let facts = TargetFacts {
            cross_platform: host_target.subdir() != build_target.subdir(),
            uses_compiler: template.uses_compiler(),
        };
        let mut outputs = outputs_from_document(&root, &facts)?;
        for output in &mut outputs {
            output.pin_run_as_build = variant.pin_run_as_build().clone();
        }
        debug!(
            "rendered {} output(s) for {}: {:?}",
            outputs.len(),
            host_target,
            outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
        );
        Ok(outputs)
    }
}

impl RecipeRenderer for YamlRenderer {
    fn render(
        &self,
        recipe_dir: &Path,
        host_target: &PlatformTarget,
        build_target: &PlatformTarget,
        variant: &VariantConfig,
    ) -> Result<Vec<RenderedOutput>> {
        let path = recipe_dir.join(RECIPE_FILE);
        let source = std::fs::read_to_string(&path)
            .map_err(|e| Error::RenderError(format!("cannot read {}: {e}", path.display())))?;
        self.render_str(&source, host_target, build_target, variant)
    }
}

struct TargetFacts {
    cross_platform: bool,
    uses_compiler: bool,
}

fn section<'a>(map: &'a Mapping, key: &str) -> Option<&'a Mapping> {
    map.get(key).and_then(Value::as_mapping)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

/// A list of requirement strings; a lone scalar counts as one entry
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Sequence(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(other) => scalar_text(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn flag(map: Option<&Mapping>, key: &str) -> Option<bool> {
    match map?.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn outputs_from_document(root: &Mapping, facts: &TargetFacts) -> Result<Vec<RenderedOutput>> {
    let top_name = section(root, "package").and_then(|p| p.get("name")).and_then(scalar_text);

    if let Some(Value::Sequence(entries)) = root.get("outputs")
        && !entries.is_empty()
    {
        let mut outputs = Vec::new();
        for entry in entries {
            let Some(entry) = entry.as_mapping() else {
                debug!("skipping non-mapping output entry");
                continue;
            };
            let Some(name) = entry.get("name").and_then(scalar_text) else {
                debug!("skipping output without a name");
                continue;
            };
            // An output named after the package without its own requirements
            // carries the top-level ones
            let requirements = match entry.get("requirements") {
                Some(reqs) => Some(reqs),
                None if top_name.as_deref() == Some(name.as_str()) => root.get("requirements"),
                None => None,
            };
            outputs.push(build_output(
                name,
                requirements,
                section(entry, "build"),
                section(entry, "test"),
                facts,
            ));
        }
        return Ok(outputs);
    }

    let name = top_name.ok_or_else(|| Error::RenderError("recipe has no package name".to_string()))?;
    Ok(vec![build_output(
        name,
        root.get("requirements"),
        section(root, "build"),
        section(root, "test"),
        facts,
    )])
}

fn build_output(
    name: String,
    requirements: Option<&Value>,
    build: Option<&Mapping>,
    test: Option<&Mapping>,
    facts: &TargetFacts,
) -> RenderedOutput {
    let mut output = RenderedOutput::new(name);

    let has_host_section = match requirements {
        // Output shorthand: a bare list means run requirements
        Some(Value::Sequence(_)) => {
            output.set_value(RUN_REQUIREMENTS, string_list(requirements));
            false
        }
        Some(Value::Mapping(reqs)) => {
            output.set_value(BUILD_REQUIREMENTS, string_list(reqs.get("build")));
            output.set_value(HOST_REQUIREMENTS, string_list(reqs.get("host")));
            output.set_value(RUN_REQUIREMENTS, string_list(reqs.get("run")));
            reqs.contains_key("host")
        }
        _ => false,
    };

    if let Some(build) = build {
        output.set_value(IGNORE_RUN_EXPORTS, string_list(build.get("ignore_run_exports")));
        output.set_value(IGNORE_RUN_EXPORTS_FROM, string_list(build.get("ignore_run_exports_from")));

        let noarch = build.get("noarch").and_then(scalar_text);
        output.noarch = noarch.as_deref().is_some_and(|n| n != "false");
        output.noarch_python = noarch.as_deref() == Some("python") || flag(Some(build), "noarch_python") == Some(true);
    }
    if let Some(test) = test {
        output.set_value(TEST_REQUIRES, string_list(test.get("requires")));
        output.set_value(TEST_REQUIREMENTS, string_list(test.get("requirements")));
    }

    let merge_build_host = flag(build, "merge_build_host");
    output.is_cross = has_host_section || facts.cross_platform;
    output.build_is_host = merge_build_host == Some(true)
        || (!facts.cross_platform
            && merge_build_host != Some(false)
            && !has_host_section
            && !facts.uses_compiler);

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> PlatformTarget {
        PlatformTarget::new("linux", "64")
    }

    fn render(source: &str, host: &PlatformTarget, variant: &VariantConfig) -> Vec<RenderedOutput> {
        YamlRenderer::new().render_str(source, host, &linux(), variant).unwrap()
    }

    const SIMPLE: &str = r#"{% set version = "2.1.0" %}
package:
  name: foo
  version: {{ version }}
build:
  number: 0
  ignore_run_exports:
    - libzlib
requirements:
  build:
    - {{ compiler('c') }}
    - make  # [unix]
    - m2-make  # [win]
  host:
    - python
    - zlib
  run:
    - python
    - __osx >={{ MACOSX_DEPLOYMENT_TARGET|default('10.13') }}  # [osx]
test:
  requires:
    - pytest
"#;

    #[test]
    fn test_simple_recipe() {
        let variant = VariantConfig::default().with_value("c_compiler_version", ["13"]);
        let outputs = render(SIMPLE, &linux(), &variant);
        assert_eq!(outputs.len(), 1);
        let out = &outputs[0];
        assert_eq!(out.name, "foo");
        assert_eq!(out.get_value(BUILD_REQUIREMENTS), ["gcc_linux-64 13", "make"]);
        assert_eq!(out.get_value(HOST_REQUIREMENTS), ["python", "zlib"]);
        assert_eq!(out.get_value(RUN_REQUIREMENTS), ["python"]);
        assert_eq!(out.get_value(IGNORE_RUN_EXPORTS), ["libzlib"]);
        assert_eq!(out.get_value(TEST_REQUIRES), ["pytest"]);
        assert!(out.is_cross);
        assert!(!out.build_is_host);
        assert!(!out.is_noarch());
    }

    #[test]
    fn test_selectors_follow_host_platform() {
        let osx = PlatformTarget::new("osx", "arm64");
        let outputs = render(SIMPLE, &osx, &VariantConfig::default());
        let out = &outputs[0];
        assert_eq!(out.get_value(BUILD_REQUIREMENTS), ["clang_osx-arm64", "make"]);
        assert_eq!(out.get_value(RUN_REQUIREMENTS), ["python", "__osx >=10.13"]);
        assert!(out.is_cross);
    }

    #[test]
    fn test_noarch_python_without_host_section() {
        let source = r#"
package:
  name: purepy
build:
  noarch: python
requirements:
  run:
    - python >=3.8
"#;
        let outputs = render(source, &linux(), &VariantConfig::default());
        let out = &outputs[0];
        assert!(out.noarch && out.noarch_python);
        assert!(!out.is_cross);
        assert!(out.build_is_host);

        let legacy = "package:\n  name: old\nbuild:\n  noarch_python: true\n";
        let out = &render(legacy, &linux(), &VariantConfig::default())[0];
        assert!(!out.noarch && out.noarch_python);
    }

    #[test]
    fn test_merge_build_host_and_cross_platform() {
        let source = "package:\n  name: m\nbuild:\n  merge_build_host: true\nrequirements:\n  host:\n    - zlib\n";
        let out = &render(source, &linux(), &VariantConfig::default())[0];
        assert!(out.build_is_host);
        assert!(out.is_cross);

        let plain = "package:\n  name: p\nrequirements:\n  build:\n    - cmake\n";
        let aarch = PlatformTarget::new("linux", "aarch64");
        let out = &render(plain, &aarch, &VariantConfig::default())[0];
        assert!(out.is_cross);
        assert!(!out.build_is_host);
    }

    #[test]
    fn test_outputs_replace_top_level() {
        let source = r#"
package:
  name: split
requirements:
  host:
    - zlib
outputs:
  - name: libsplit
    requirements:
      host:
        - openssl
      run:
        - openssl
  - name: split-tools
    requirements:
      - {{ pin_subpackage('libsplit', exact=True) }}
  - name: split
"#;
        let outputs = render(source, &linux(), &VariantConfig::default());
        let names: Vec<&str> = outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["libsplit", "split-tools", "split"]);
        assert_eq!(outputs[0].get_value(HOST_REQUIREMENTS), ["openssl"]);
        assert_eq!(outputs[1].get_value(RUN_REQUIREMENTS), ["libsplit"]);
        assert!(outputs[1].get_value(HOST_REQUIREMENTS).is_empty());
        assert_eq!(outputs[2].get_value(HOST_REQUIREMENTS), ["zlib"]);
    }

    #[test]
    fn test_pin_run_as_build_attached() {
        let variant = VariantConfig::default().with_pin("openssl", crate::resolver::PinExpression::new(None, Some("x")));
        let source = "package:\n  name: p\n";
        let out = &render(source, &linux(), &variant)[0];
        assert!(out.pin_run_as_build.contains_key("openssl"));
    }

    #[test]
    fn test_render_errors() {
        let renderer = YamlRenderer::new();
        let variant = VariantConfig::default();
        assert!(renderer.render_str("- just\n- a list\n", &linux(), &linux(), &variant).is_err());
        assert!(renderer.render_str("build:\n  number: 0\n", &linux(), &linux(), &variant).is_err());
        assert!(renderer.render_str("package: [unclosed\n", &linux(), &linux(), &variant).is_err());

        let dir = tempfile::tempdir().unwrap();
        assert!(renderer.render(dir.path(), &linux(), &linux(), &variant).is_err());
    }

    #[test]
    fn test_select_lines() {
        let ns = SelectorNamespace::for_targets(&linux(), &linux(), &VariantConfig::default());
        let text = "a: 1  # [linux]\nb: 2  # [win]\nc: 3  # comment [not osx]\nd: 4 # plain\n";
        assert_eq!(select_lines(text, &ns).unwrap(), "a: 1\nc: 3\nd: 4 # plain\n");
    }
}
