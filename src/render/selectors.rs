// src/render/selectors.rs

//! Line selectors (`# [linux and not aarch64]`)
//!
//! The expression language is the Python subset recipes use in practice:
//! names, integers, quoted strings, comparisons, `not`, `and`, `or` and
//! parentheses. Names nobody defined are false.

use crate::channel::PlatformTarget;
use crate::config::VariantConfig;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Architectures that get a selector of their own on linux
const LINUX_MACHINES: [&str; 5] = ["armv6l", "armv7l", "aarch64", "ppc64le", "s390x"];

/// A value selectors can look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl SelectorValue {
    fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Str(s) => !s.is_empty(),
        }
    }

    fn as_text(&self) -> String {
        match self {
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            Self::Str(s) => s.parse().ok(),
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self.as_int(), other.as_int()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.as_text().cmp(&other.as_text()),
        }
    }
}

/// Names visible to selectors
#[derive(Debug, Clone, Default)]
pub struct SelectorNamespace {
    values: HashMap<String, SelectorValue>,
}

/// `3.11.* *_cpython` -> 311
fn compact_version(version: &str) -> Option<i64> {
    let mut parts = version.split(|c: char| !c.is_ascii_digit()).filter(|p| !p.is_empty());
    let major = parts.next()?;
    let minor = parts.next().unwrap_or("0");
    format!("{major}{minor}").parse().ok()
}

impl SelectorNamespace {
    /// Namespace for rendering on `host`, built on `build`
    pub fn for_targets(host: &PlatformTarget, build: &PlatformTarget, variant: &VariantConfig) -> Self {
        let mut ns = Self::default();

        for key in variant.keys() {
            if let Some(value) = variant.get(key) {
                ns.insert(key, SelectorValue::Str(value.to_string()));
            }
        }

        let linux = host.is_linux();
        let osx = host.is_osx();
        let win = host.is_windows();
        let arch = host.arch.as_str();
        ns.insert("linux", SelectorValue::Bool(linux));
        ns.insert("osx", SelectorValue::Bool(osx));
        ns.insert("win", SelectorValue::Bool(win));
        ns.insert("unix", SelectorValue::Bool(!win));
        ns.insert("linux32", SelectorValue::Bool(linux && arch == "32"));
        ns.insert("linux64", SelectorValue::Bool(linux && arch == "64"));
        ns.insert("win32", SelectorValue::Bool(win && arch == "32"));
        ns.insert("win64", SelectorValue::Bool(win && arch == "64"));
        ns.insert("x86", SelectorValue::Bool(arch == "32" || arch == "64"));
        ns.insert("x86_64", SelectorValue::Bool(arch == "64"));
        ns.insert("arm64", SelectorValue::Bool(arch == "arm64"));
        for machine in LINUX_MACHINES {
            ns.insert(machine, SelectorValue::Bool(linux && arch == machine));
        }
        ns.insert("target_platform", SelectorValue::Str(host.subdir()));
        ns.insert("build_platform", SelectorValue::Str(build.subdir()));

        if let Some(py) = variant.get("python").and_then(compact_version) {
            ns.insert("py", SelectorValue::Int(py));
            ns.insert("py3k", SelectorValue::Bool(py >= 30));
            ns.insert("py2k", SelectorValue::Bool(py < 30));
        }
        if let Some(np) = variant.get("numpy").and_then(compact_version) {
            ns.insert("np", SelectorValue::Int(np));
        }
        ns
    }

    pub fn insert(&mut self, name: &str, value: SelectorValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&SelectorValue> {
        self.values.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let invalid = |why: String| Error::RenderError(format!("bad selector '{expr}': {why}"));
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == '\'' || c == '"' {
            let end = chars[i + 1..]
                .iter()
                .position(|&q| q == c)
                .ok_or_else(|| invalid("unterminated string".to_string()))?;
            tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
            i += end + 2;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token::Int(text.parse().map_err(|e| invalid(format!("{e}")))?));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let op = ["==", "!=", "<=", ">="]
                .into_iter()
                .find(|op| *op == two)
                .or_else(|| ["<", ">"].into_iter().find(|op| op.starts_with(c)))
                .ok_or_else(|| invalid(format!("unexpected '{c}'")))?;
            tokens.push(Token::Op(op));
            i += op.len();
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    ns: &'a SelectorNamespace,
    expr: &'a str,
}

impl Parser<'_> {
    fn error(&self, why: &str) -> Error {
        Error::RenderError(format!("bad selector '{}': {why}", self.expr))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn or_expr(&mut self) -> Result<SelectorValue> {
        let mut value = self.and_expr()?;
        while self.keyword("or") {
            let rhs = self.and_expr()?;
            value = SelectorValue::Bool(value.truthy() || rhs.truthy());
        }
        Ok(value)
    }

    fn and_expr(&mut self) -> Result<SelectorValue> {
        let mut value = self.not_expr()?;
        while self.keyword("and") {
            let rhs = self.not_expr()?;
            value = SelectorValue::Bool(value.truthy() && rhs.truthy());
        }
        Ok(value)
    }

    fn not_expr(&mut self) -> Result<SelectorValue> {
        if self.keyword("not") {
            let value = self.not_expr()?;
            return Ok(SelectorValue::Bool(!value.truthy()));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<SelectorValue> {
        let lhs = self.primary()?;
        let Some(Token::Op(op)) = self.peek().cloned() else {
            return Ok(lhs);
        };
        self.pos += 1;
        let rhs = self.primary()?;
        let ord = lhs.compare(&rhs);
        let result = match op {
            "==" => lhs.as_text() == rhs.as_text() || ord == Ordering::Equal && lhs.as_int().is_some(),
            "!=" => !(lhs.as_text() == rhs.as_text() || ord == Ordering::Equal && lhs.as_int().is_some()),
            "<" => ord == Ordering::Less,
            ">" => ord == Ordering::Greater,
            "<=" => ord != Ordering::Greater,
            ">=" => ord != Ordering::Less,
            _ => return Err(self.error("unknown operator")),
        };
        Ok(SelectorValue::Bool(result))
    }

    fn primary(&mut self) -> Result<SelectorValue> {
        let token = self.peek().cloned().ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;
        match token {
            Token::LParen => {
                let value = self.or_expr()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            Token::Int(i) => Ok(SelectorValue::Int(i)),
            Token::Str(s) => Ok(SelectorValue::Str(s)),
            Token::Ident(name) => Ok(match name.as_str() {
                "True" | "true" => SelectorValue::Bool(true),
                "False" | "false" => SelectorValue::Bool(false),
                _ => self.ns.get(&name).cloned().unwrap_or(SelectorValue::Bool(false)),
            }),
            Token::RParen | Token::Op(_) => Err(self.error("unexpected token")),
        }
    }
}

/// Evaluate a selector expression
pub fn evaluate_selector(expr: &str, ns: &SelectorNamespace) -> Result<bool> {
    let mut parser = Parser {
        tokens: tokenize(expr)?,
        pos: 0,
        ns,
        expr,
    };
    let value = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing tokens"));
    }
    Ok(value.truthy())
}
