// src/render/jinja.rs

//! The Jinja subset found in `meta.yaml` files
//!
//! Supported:
//! - `{% set name = expr %}`, `{% if %}` / `{% elif %}` / `{% else %}` /
//!   `{% endif %}` (conditions use the selector language)
//! - `{{ expr }}` with string and number literals, variables, `~` and `+`,
//!   indexing, string methods and common filters
//! - the conda-build helpers `compiler()`, `stdlib()`, `cdt()`,
//!   `pin_subpackage()` and `pin_compatible()`
//!
//! Undefined names evaluate to nothing instead of failing, so recipes that
//! read `environ` or load setup.py data still render.

use super::selectors::{SelectorNamespace, SelectorValue, evaluate_selector};
use crate::channel::PlatformTarget;
use crate::config::VariantConfig;
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{%-?(.*?)-?%\}|\{\{-?(.*?)-?\}\}|\{#.*?#\}").expect("static regex")
});

/// A template value
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JValue {
    None,
    Bool(bool),
    Str(String),
    List(Vec<JValue>),
}

impl JValue {
    fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    fn render(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Str(s) => s.clone(),
            Self::List(items) => items.iter().map(Self::render).collect::<Vec<_>>().join(", "),
        }
    }

    fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Default compiler package per language and platform
fn default_compiler(language: &str, host: &PlatformTarget) -> String {
    let name = match (language, host.platform.as_str()) {
        ("c", "linux") => "gcc",
        ("c", "osx") => "clang",
        ("cxx", "linux") => "gxx",
        ("cxx", "osx") => "clangxx",
        ("c" | "cxx", "win") => "vs2019",
        ("fortran", "win") => "flang",
        ("fortran", _) => "gfortran",
        ("cuda", _) => "nvcc",
        (other, _) => other,
    };
    name.to_string()
}

fn default_stdlib(host: &PlatformTarget) -> &'static str {
    match host.platform.as_str() {
        "osx" => "macosx_deployment_target",
        "win" => "vs",
        _ => "sysroot",
    }
}

fn cdt_arch(host: &PlatformTarget) -> &'static str {
    match host.arch.as_str() {
        "aarch64" => "aarch64",
        "ppc64le" => "ppc64le",
        "32" => "i686",
        _ => "x86_64",
    }
}

#[derive(Debug)]
struct Frame {
    parent_active: bool,
    taken: bool,
    active: bool,
}

/// Renders one template for one (host, build, variant)
pub(crate) struct Template<'a> {
    host: &'a PlatformTarget,
    build: &'a PlatformTarget,
    variant: &'a VariantConfig,
    namespace: SelectorNamespace,
    vars: HashMap<String, JValue>,
    uses_compiler: bool,
}

impl<'a> Template<'a> {
    pub(crate) fn new(host: &'a PlatformTarget, build: &'a PlatformTarget, variant: &'a VariantConfig) -> Self {
        Self {
            host,
            build,
            variant,
            namespace: SelectorNamespace::for_targets(host, build, variant),
            vars: HashMap::new(),
            uses_compiler: false,
        }
    }

    /// Whether `compiler()` was called while rendering
    pub(crate) fn uses_compiler(&self) -> bool {
        self.uses_compiler
    }

    pub(crate) fn render(&mut self, source: &str) -> Result<String> {
        let mut out = String::with_capacity(source.len());
        let mut stack: Vec<Frame> = Vec::new();
        let mut last = 0;

        for caps in TAGS.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            let active = stack.last().is_none_or(|f| f.active);
            if active {
                out.push_str(&source[last..whole.start()]);
            }
            last = whole.end();

            if let Some(statement) = caps.get(1) {
                self.statement(statement.as_str().trim(), &mut stack)?;
            } else if let Some(expr) = caps.get(2)
                && active
            {
                out.push_str(&self.eval(expr.as_str().trim())?.render());
            }
        }

        if !stack.is_empty() {
            return Err(Error::RenderError("unclosed {% if %} block".to_string()));
        }
        if stack.last().is_none_or(|f| f.active) {
            out.push_str(&source[last..]);
        }
        Ok(out)
    }

    fn statement(&mut self, statement: &str, stack: &mut Vec<Frame>) -> Result<()> {
        let (keyword, rest) = statement
            .split_once(char::is_whitespace)
            .map_or((statement, ""), |(k, r)| (k, r.trim()));
        let active = stack.last().is_none_or(|f| f.active);

        match keyword {
            "set" => {
                if active {
                    let (name, expr) = rest
                        .split_once('=')
                        .ok_or_else(|| Error::RenderError(format!("malformed '{{% {statement} %}}'")))?;
                    let value = self.eval(expr.trim())?;
                    let name = name.trim().to_string();
                    debug!("jinja set {} = {:?}", name, value);
                    self.vars.insert(name, value);
                }
            }
            "if" => {
                let taken = active && self.condition(rest)?;
                stack.push(Frame {
                    parent_active: active,
                    taken,
                    active: taken,
                });
            }
            "elif" => {
                let frame = stack
                    .last()
                    .ok_or_else(|| Error::RenderError("{% elif %} without {% if %}".to_string()))?;
                let take = frame.parent_active && !frame.taken && self.condition(rest)?;
                if let Some(frame) = stack.last_mut() {
                    frame.active = take;
                    frame.taken |= take;
                }
            }
            "else" => {
                let frame = stack
                    .last_mut()
                    .ok_or_else(|| Error::RenderError("{% else %} without {% if %}".to_string()))?;
                frame.active = frame.parent_active && !frame.taken;
                frame.taken = true;
            }
            "endif" => {
                stack
                    .pop()
                    .ok_or_else(|| Error::RenderError("{% endif %} without {% if %}".to_string()))?;
            }
            other => {
                return Err(Error::RenderError(format!("unsupported statement '{other}'")));
            }
        }
        Ok(())
    }

    /// Evaluate an `{% if %}` condition with set variables in scope
    fn condition(&self, expr: &str) -> Result<bool> {
        let mut ns = self.namespace.clone();
        for (name, value) in &self.vars {
            let value = match value {
                JValue::None => continue,
                JValue::Bool(b) => SelectorValue::Bool(*b),
                other => SelectorValue::Str(other.render()),
            };
            ns.insert(name, value);
        }
        evaluate_selector(expr, &ns)
    }

    fn lookup(&self, name: &str) -> JValue {
        if let Some(value) = self.vars.get(name) {
            return value.clone();
        }
        if let Some(value) = self.variant.get(name) {
            return JValue::str(value);
        }
        match self.namespace.get(name) {
            Some(SelectorValue::Bool(b)) => JValue::Bool(*b),
            Some(SelectorValue::Int(i)) => JValue::str(i.to_string()),
            Some(SelectorValue::Str(s)) => JValue::str(s.clone()),
            None => JValue::None,
        }
    }

    pub(crate) fn eval(&mut self, expr: &str) -> Result<JValue> {
        let tokens = tokenize(expr)?;
        let mut parser = ExprParser {
            tokens,
            pos: 0,
            expr,
        };
        let ast = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing tokens"));
        }
        self.evaluate(&ast)
    }

    fn evaluate(&mut self, node: &Node) -> Result<JValue> {
        Ok(match node {
            Node::Literal(value) => value.clone(),
            Node::Name(name) => self.lookup(name),
            Node::List(items) => JValue::List(
                items
                    .iter()
                    .map(|item| self.evaluate(item))
                    .collect::<Result<_>>()?,
            ),
            Node::Concat(lhs, rhs, plus) => {
                let lhs = self.evaluate(lhs)?.render();
                let rhs = self.evaluate(rhs)?.render();
                match (*plus, lhs.parse::<i64>(), rhs.parse::<i64>()) {
                    (true, Ok(a), Ok(b)) => JValue::str((a + b).to_string()),
                    _ => JValue::str(lhs + &rhs),
                }
            }
            Node::Call(name, args) => {
                let args = self.arguments(args)?;
                self.call(name, &args)
            }
            Node::Method(target, method, args) => {
                let target = self.evaluate(target)?;
                let args = self.arguments(args)?;
                call_method(target, method, &args.positional)
            }
            Node::Attribute(target, _) => {
                // Only `environ`-like objects are dotted into; they are undefined
                self.evaluate(target)?;
                JValue::None
            }
            Node::Index(target, index) => {
                let target = self.evaluate(target)?;
                let index = self.evaluate(index)?;
                index_value(&target, &index)
            }
            Node::Filter(target, filter, args) => {
                let target = self.evaluate(target)?;
                let args = self.arguments(args)?;
                apply_filter(target, filter, &args.positional)
            }
        })
    }

    fn arguments(&mut self, args: &[Arg]) -> Result<Arguments> {
        let mut out = Arguments::default();
        for arg in args {
            let value = self.evaluate(&arg.value)?;
            match &arg.name {
                Some(name) => {
                    out.keyword.insert(name.clone(), value);
                }
                None => out.positional.push(value),
            }
        }
        Ok(out)
    }

    fn call(&mut self, function: &str, args: &Arguments) -> JValue {
        let first = args.positional.first().map(JValue::render).unwrap_or_default();
        let subdir = self.host.subdir();
        match function {
            "compiler" => {
                self.uses_compiler = true;
                let compiler = self
                    .variant
                    .get(&format!("{first}_compiler"))
                    .map(str::to_string)
                    .unwrap_or_else(|| default_compiler(&first, self.host));
                match self.variant.get(&format!("{first}_compiler_version")) {
                    Some(version) => JValue::str(format!("{compiler}_{subdir} {version}")),
                    None => JValue::str(format!("{compiler}_{subdir}")),
                }
            }
            "stdlib" => {
                let stdlib = self
                    .variant
                    .get(&format!("{first}_stdlib"))
                    .unwrap_or_else(|| default_stdlib(self.host));
                match self.variant.get(&format!("{first}_stdlib_version")) {
                    Some(version) => JValue::str(format!("{stdlib}_{subdir} {version}")),
                    None => JValue::str(format!("{stdlib}_{subdir}")),
                }
            }
            "cdt" => {
                let cdt_name = self.variant.get("cdt_name").unwrap_or("conda");
                JValue::str(format!("{first}-{cdt_name}-{}", cdt_arch(self.host)))
            }
            "pin_subpackage" => JValue::str(first),
            "pin_compatible" => {
                let bound = |key: &str| {
                    args.keyword
                        .get(key)
                        .map(JValue::render)
                        .filter(|b| !b.is_empty() && b != "None")
                };
                let bounds: Vec<String> = [
                    bound("lower_bound").map(|b| format!(">={b}")),
                    bound("upper_bound").map(|b| format!("<{b}")),
                ]
                .into_iter()
                .flatten()
                .collect();
                if bounds.is_empty() {
                    JValue::str(first)
                } else {
                    JValue::str(format!("{first} {}", bounds.join(",")))
                }
            }
            _ => {
                debug!("jinja: undefined function {}() on {}", function, self.build);
                JValue::None
            }
        }
    }
}

#[derive(Debug, Default)]
struct Arguments {
    positional: Vec<JValue>,
    keyword: HashMap<String, JValue>,
}

fn index_value(target: &JValue, index: &JValue) -> JValue {
    let Ok(idx) = index.render().parse::<i64>() else {
        return JValue::None;
    };
    let pick = |len: usize| -> Option<usize> {
        let len = len as i64;
        let idx = if idx < 0 { len + idx } else { idx };
        (0..len).contains(&idx).then_some(idx as usize)
    };
    match target {
        JValue::List(items) => pick(items.len()).map_or(JValue::None, |i| items[i].clone()),
        JValue::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            pick(chars.len()).map_or(JValue::None, |i| JValue::str(chars[i].to_string()))
        }
        _ => JValue::None,
    }
}

fn call_method(target: JValue, method: &str, args: &[JValue]) -> JValue {
    let arg = |i: usize| args.get(i).map(JValue::render).unwrap_or_default();
    match (&target, method) {
        (JValue::None, "get") => args.get(1).cloned().unwrap_or(JValue::None),
        (JValue::Str(s), "lower") => JValue::str(s.to_lowercase()),
        (JValue::Str(s), "upper") => JValue::str(s.to_uppercase()),
        (JValue::Str(s), "strip") => JValue::str(s.trim()),
        (JValue::Str(s), "replace") => JValue::str(s.replace(&arg(0), &arg(1))),
        (JValue::Str(s), "startswith") => JValue::Bool(s.starts_with(&arg(0))),
        (JValue::Str(s), "endswith") => JValue::Bool(s.ends_with(&arg(0))),
        (JValue::Str(s), "split") => {
            let parts: Vec<JValue> = if args.is_empty() {
                s.split_whitespace().map(JValue::str).collect()
            } else {
                s.split(arg(0).as_str()).map(JValue::str).collect()
            };
            JValue::List(parts)
        }
        (JValue::Str(s), "join") => match args.first() {
            Some(JValue::List(items)) => {
                JValue::str(items.iter().map(JValue::render).collect::<Vec<_>>().join(s))
            }
            _ => JValue::None,
        },
        _ => JValue::None,
    }
}

fn apply_filter(target: JValue, filter: &str, args: &[JValue]) -> JValue {
    match filter {
        "lower" => JValue::str(target.render().to_lowercase()),
        "upper" => JValue::str(target.render().to_uppercase()),
        "trim" => JValue::str(target.render().trim()),
        "string" => JValue::str(target.render()),
        "replace" => call_method(JValue::str(target.render()), "replace", args),
        "default" | "d" if target.is_none() => args.first().cloned().unwrap_or(JValue::None),
        "join" => match target {
            JValue::List(items) => {
                let sep = args.first().map(JValue::render).unwrap_or_default();
                JValue::str(items.iter().map(JValue::render).collect::<Vec<_>>().join(&sep))
            }
            other => other,
        },
        "first" => index_value(&target, &JValue::str("0")),
        "last" => index_value(&target, &JValue::str("-1")),
        _ => target,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Str(String),
    Num(String),
    Punct(char),
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' || c == '"' {
            let end = chars[i + 1..].iter().position(|&q| q == c).ok_or_else(|| {
                Error::RenderError(format!("unterminated string in '{{{{ {expr} }}}}'"))
            })?;
            tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
            i += end + 2;
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Num(chars[start..i].iter().collect()));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Name(chars[start..i].iter().collect()));
        } else if "()[],.|~+=".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
        } else {
            return Err(Error::RenderError(format!(
                "unexpected '{c}' in '{{{{ {expr} }}}}'"
            )));
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
struct Arg {
    name: Option<String>,
    value: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Literal(JValue),
    Name(String),
    List(Vec<Node>),
    /// `a ~ b` (false) or `a + b` (true)
    Concat(Box<Node>, Box<Node>, bool),
    Call(String, Vec<Arg>),
    Method(Box<Node>, String, Vec<Arg>),
    Attribute(Box<Node>, String),
    Index(Box<Node>, Box<Node>),
    Filter(Box<Node>, String, Vec<Arg>),
}

struct ExprParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    expr: &'a str,
}

impl ExprParser<'_> {
    fn error(&self, why: &str) -> Error {
        Error::RenderError(format!("cannot evaluate '{{{{ {} }}}}': {why}", self.expr))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, punct: char) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{punct}'")))
        }
    }

    fn name(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Name(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn expression(&mut self) -> Result<Node> {
        let mut node = self.filtered()?;
        loop {
            let plus = if self.eat('~') {
                false
            } else if self.eat('+') {
                true
            } else {
                return Ok(node);
            };
            let rhs = self.filtered()?;
            node = Node::Concat(Box::new(node), Box::new(rhs), plus);
        }
    }

    fn filtered(&mut self) -> Result<Node> {
        let mut node = self.postfix()?;
        while self.eat('|') {
            let filter = self.name()?;
            let args = if self.eat('(') { self.arguments()? } else { Vec::new() };
            node = Node::Filter(Box::new(node), filter, args);
        }
        Ok(node)
    }

    fn postfix(&mut self) -> Result<Node> {
        let mut node = self.primary()?;
        loop {
            if self.eat('.') {
                let attr = self.name()?;
                node = if self.eat('(') {
                    Node::Method(Box::new(node), attr, self.arguments()?)
                } else {
                    Node::Attribute(Box::new(node), attr)
                };
            } else if self.eat('[') {
                let index = self.expression()?;
                self.expect(']')?;
                node = Node::Index(Box::new(node), Box::new(index));
            } else {
                return Ok(node);
            }
        }
    }

    fn primary(&mut self) -> Result<Node> {
        let token = self.peek().cloned().ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;
        match token {
            Token::Str(s) => Ok(Node::Literal(JValue::Str(s))),
            Token::Num(n) => Ok(Node::Literal(JValue::Str(n))),
            Token::Name(name) => match name.as_str() {
                "True" | "true" => Ok(Node::Literal(JValue::Bool(true))),
                "False" | "false" => Ok(Node::Literal(JValue::Bool(false))),
                "None" | "none" => Ok(Node::Literal(JValue::None)),
                _ if self.eat('(') => Ok(Node::Call(name, self.arguments()?)),
                _ => Ok(Node::Name(name)),
            },
            Token::Punct('(') => {
                let node = self.expression()?;
                self.expect(')')?;
                Ok(node)
            }
            Token::Punct('[') => {
                let mut items = Vec::new();
                while !self.eat(']') {
                    items.push(self.expression()?);
                    if !self.eat(',') {
                        self.expect(']')?;
                        break;
                    }
                }
                Ok(Node::List(items))
            }
            Token::Punct(c) => Err(self.error(&format!("unexpected '{c}'"))),
        }
    }

    /// Arguments after an opening parenthesis, up to and including `)`
    fn arguments(&mut self) -> Result<Vec<Arg>> {
        let mut args = Vec::new();
        while !self.eat(')') {
            let keyword = match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
                (Some(Token::Name(name)), Some(Token::Punct('='))) => {
                    let name = name.clone();
                    self.pos += 2;
                    Some(name)
                }
                _ => None,
            };
            args.push(Arg {
                name: keyword,
                value: self.expression()?,
            });
            if !self.eat(',') {
                self.expect(')')?;
                break;
            }
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str, platform: &str, variant: &VariantConfig) -> String {
        let target = PlatformTarget::new(platform, "64");
        Template::new(&target, &target, variant).render(source).unwrap()
    }

    #[test]
    fn test_set_and_expressions() {
        let source = r#"{% set name = "Foo-Bar" %}
{% set version = "1.2.3" %}
package:
  name: {{ name|lower }}
  version: {{ version }}
source:
  url: https://example.com/{{ name }}-{{ version.replace('.', '_') }}.tar.gz
  major: {{ version.split('.')[0] ~ "x" }}
"#;
        let out = render(source, "linux", &VariantConfig::default());
        assert!(out.contains("name: foo-bar"));
        assert!(out.contains("version: 1.2.3"));
        assert!(out.contains("Foo-Bar-1_2_3.tar.gz"));
        assert!(out.contains("major: 1x"));
    }

    #[test]
    fn test_compiler_and_stdlib() {
        let variant = VariantConfig::default()
            .with_value("c_compiler", ["gcc"])
            .with_value("c_compiler_version", ["13"])
            .with_value("c_stdlib_version", ["2.17"]);
        let target = PlatformTarget::new("linux", "aarch64");
        let mut template = Template::new(&target, &target, &variant);
        let out = template
            .render("- {{ compiler('c') }}\n- {{ stdlib('c') }}\n- {{ compiler('cxx') }}\n")
            .unwrap();
        assert_eq!(
            out,
            "- gcc_linux-aarch64 13\n- sysroot_linux-aarch64 2.17\n- gxx_linux-aarch64\n"
        );
        assert!(template.uses_compiler());
    }

    #[test]
    fn test_pin_helpers() {
        let out = render(
            "- {{ pin_subpackage('libfoo', max_pin='x.x') }}\n- {{ pin_compatible('numpy', lower_bound='1.22') }}\n- {{ pin_compatible('python') }}\n",
            "osx",
            &VariantConfig::default(),
        );
        assert_eq!(out, "- libfoo\n- numpy >=1.22\n- python\n");
    }

    #[test]
    fn test_if_blocks() {
        let variant = VariantConfig::default().with_value("cuda_compiler_version", ["None"]);
        let source = "{% if cuda_compiler_version != \"None\" %}cuda{% elif win %}win{% else %}plain{% endif %}\n";
        assert_eq!(render(source, "linux", &variant), "plain\n");
        assert_eq!(render(source, "win", &variant), "win\n");

        let nested = "{% set flag = True %}{% if flag %}{% if osx %}a{% else %}b{% endif %}{% endif %}";
        assert_eq!(render(nested, "linux", &variant), "b");
    }

    #[test]
    fn test_undefined_names_render_empty() {
        let out = render(
            "v: {{ environ.get('GIT_DESCRIBE_TAG', 'dev') }}{{ undefined_thing }}{{ load_setup_py_data().version }}\n",
            "linux",
            &VariantConfig::default(),
        );
        assert_eq!(out, "v: dev\n");
    }

    #[test]
    fn test_template_errors() {
        let variant = VariantConfig::default();
        let target = PlatformTarget::new("linux", "64");
        let mut template = Template::new(&target, &target, &variant);
        assert!(template.render("{% if linux %}never closed").is_err());
        assert!(template.render("{% endif %}").is_err());
        assert!(template.render("{% for x in y %}{% endfor %}").is_err());
        assert!(template.render("{{ 'unterminated }}").is_err());
    }
}
