//! Environment markers (`python_version >= "3.8" and extra == "test"`).
//!
//! A marker decides whether a requirement applies to the target
//! environment. Markers are parsed when the requirement is parsed and
//! evaluated against a [`MarkerEnvironment`] plus the extras the parent
//! requirement asked for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::name::CanonicalName;
use super::specifier::Specifier;
use super::version::Version;
use crate::consts::DEFAULT_PYTHON_VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid marker '{marker}': {message}")]
pub struct InvalidMarker {
  pub marker: String,
  pub message: String,
}

const VARIABLES: &[&str] = &[
  "python_version",
  "python_full_version",
  "implementation_name",
  "implementation_version",
  "platform_python_implementation",
  "os_name",
  "sys_platform",
  "platform_system",
  "platform_machine",
  "platform_release",
  "platform_version",
  "extra",
];

/// Variables compared as versions when both sides parse.
const VERSION_VARIABLES: &[&str] = &["python_version", "python_full_version", "implementation_version"];

/// The interpreter and platform that built wheels target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerEnvironment {
  pub python_version: String,
  pub python_full_version: String,
  pub implementation_name: String,
  pub implementation_version: String,
  pub platform_python_implementation: String,
  pub os_name: String,
  pub sys_platform: String,
  pub platform_system: String,
  pub platform_machine: String,
  #[serde(default)]
  pub platform_release: String,
  #[serde(default)]
  pub platform_version: String,
}

impl Default for MarkerEnvironment {
  fn default() -> Self {
    Self::host()
  }
}

impl MarkerEnvironment {
  /// CPython on the platform this process runs on.
  pub fn host() -> Self {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let (sys_platform, platform_system) = match os {
      "linux" => ("linux", "Linux"),
      "macos" => ("darwin", "Darwin"),
      "windows" => ("win32", "Windows"),
      other => (other, other),
    };
    let platform_machine = match (os, arch) {
      ("macos", "aarch64") => "arm64",
      ("windows", "x86_64") => "AMD64",
      (_, arch) => arch,
    };

    Self {
      python_version: String::new(),
      python_full_version: String::new(),
      implementation_name: "cpython".to_string(),
      implementation_version: String::new(),
      platform_python_implementation: "CPython".to_string(),
      os_name: if os == "windows" { "nt" } else { "posix" }.to_string(),
      sys_platform: sys_platform.to_string(),
      platform_system: platform_system.to_string(),
      platform_machine: platform_machine.to_string(),
      platform_release: String::new(),
      platform_version: String::new(),
    }
    .with_python_version(DEFAULT_PYTHON_VERSION)
  }

  /// Target another interpreter version. `3.11` and `3.11.4` are both accepted.
  pub fn with_python_version(mut self, version: &str) -> Self {
    let parts: Vec<&str> = version.trim().split('.').collect();
    self.python_version = parts.iter().take(2).copied().collect::<Vec<_>>().join(".");
    self.python_full_version = if parts.len() >= 3 {
      version.trim().to_string()
    } else {
      format!("{}.0", self.python_version)
    };
    self.implementation_version = self.python_full_version.clone();
    self
  }

  fn get(&self, variable: &str) -> &str {
    match variable {
      "python_version" => &self.python_version,
      "python_full_version" => &self.python_full_version,
      "implementation_name" => &self.implementation_name,
      "implementation_version" => &self.implementation_version,
      "platform_python_implementation" => &self.platform_python_implementation,
      "os_name" => &self.os_name,
      "sys_platform" => &self.sys_platform,
      "platform_system" => &self.platform_system,
      "platform_machine" => &self.platform_machine,
      "platform_release" => &self.platform_release,
      "platform_version" => &self.platform_version,
      _ => "",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MarkerOp {
  Equal,
  NotEqual,
  Less,
  LessEqual,
  Greater,
  GreaterEqual,
  Compatible,
  Arbitrary,
  In,
  NotIn,
}

impl MarkerOp {
  fn as_str(self) -> &'static str {
    match self {
      MarkerOp::Equal => "==",
      MarkerOp::NotEqual => "!=",
      MarkerOp::Less => "<",
      MarkerOp::LessEqual => "<=",
      MarkerOp::Greater => ">",
      MarkerOp::GreaterEqual => ">=",
      MarkerOp::Compatible => "~=",
      MarkerOp::Arbitrary => "===",
      MarkerOp::In => "in",
      MarkerOp::NotIn => "not in",
    }
  }

  /// The operator with its operands swapped: `a < b` is `b > a`.
  fn flipped(self) -> Option<Self> {
    Some(match self {
      MarkerOp::Less => MarkerOp::Greater,
      MarkerOp::LessEqual => MarkerOp::GreaterEqual,
      MarkerOp::Greater => MarkerOp::Less,
      MarkerOp::GreaterEqual => MarkerOp::LessEqual,
      MarkerOp::Equal | MarkerOp::NotEqual | MarkerOp::Arbitrary => self,
      MarkerOp::Compatible | MarkerOp::In | MarkerOp::NotIn => return None,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Operand {
  Variable(String),
  Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Expr {
  And(Box<Expr>, Box<Expr>),
  Or(Box<Expr>, Box<Expr>),
  Compare { lhs: Operand, op: MarkerOp, rhs: Operand },
}

/// A parsed marker expression. Displays as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Marker {
  raw: String,
  expr: Expr,
}

impl Marker {
  pub fn as_str(&self) -> &str {
    &self.raw
  }

  /// Evaluate with `extra` bound to one requested extra, or to `""`.
  pub fn evaluate(&self, env: &MarkerEnvironment, extra: Option<&str>) -> bool {
    let extra = extra.map(|e| CanonicalName::new(e).to_string()).unwrap_or_default();
    eval(&self.expr, env, &extra)
  }

  /// True when the marker holds for `env` and any of `extras`, or for no extra
  /// at all when `extras` is empty.
  pub fn evaluate_any<'a>(&self, env: &MarkerEnvironment, extras: impl IntoIterator<Item = &'a String>) -> bool {
    let mut extras = extras.into_iter().peekable();
    if extras.peek().is_none() {
      return self.evaluate(env, None);
    }
    extras.any(|extra| self.evaluate(env, Some(extra)))
  }
}

impl fmt::Display for Marker {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

impl FromStr for Marker {
  type Err = InvalidMarker;

  fn from_str(input: &str) -> Result<Self, Self::Err> {
    let raw = input.trim();
    let invalid = |message: String| InvalidMarker {
      marker: raw.to_string(),
      message,
    };

    let tokens = tokenize(raw).map_err(invalid)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr().map_err(invalid)?;
    if let Some(token) = parser.peek() {
      return Err(invalid(format!("unexpected {token}")));
    }
    Ok(Self {
      raw: raw.to_string(),
      expr,
    })
  }
}

fn eval(expr: &Expr, env: &MarkerEnvironment, extra: &str) -> bool {
  match expr {
    Expr::And(a, b) => eval(a, env, extra) && eval(b, env, extra),
    Expr::Or(a, b) => eval(a, env, extra) || eval(b, env, extra),
    Expr::Compare { lhs, op, rhs } => compare(lhs, *op, rhs, env, extra),
  }
}

fn compare(lhs: &Operand, op: MarkerOp, rhs: &Operand, env: &MarkerEnvironment, extra: &str) -> bool {
  let resolve = |operand: &Operand| -> (String, Option<&'static str>) {
    match operand {
      Operand::Literal(value) => (value.clone(), None),
      Operand::Variable(name) if name == "extra" => (extra.to_string(), Some("extra")),
      Operand::Variable(name) => {
        let var = VARIABLES.iter().copied().find(|v| *v == name).unwrap_or("");
        (env.get(name).to_string(), Some(var))
      }
    }
  };
  let (mut left, left_var) = resolve(lhs);
  let (mut right, right_var) = resolve(rhs);
  let var = left_var.or(right_var).unwrap_or("");

  if var == "extra" {
    left = CanonicalName::new(&left).to_string();
    right = CanonicalName::new(&right).to_string();
  }

  match op {
    MarkerOp::In => return right.contains(left.as_str()),
    MarkerOp::NotIn => return !right.contains(left.as_str()),
    _ => {}
  }

  if VERSION_VARIABLES.contains(&var)
    && let Some(result) = compare_versions(&left, op, &right, left_var.is_some())
  {
    return result;
  }

  match op {
    MarkerOp::Equal | MarkerOp::Arbitrary => left == right,
    MarkerOp::NotEqual => left != right,
    MarkerOp::Less => left < right,
    MarkerOp::LessEqual => left <= right,
    MarkerOp::Greater => left > right,
    MarkerOp::GreaterEqual => left >= right,
    MarkerOp::Compatible | MarkerOp::In | MarkerOp::NotIn => false,
  }
}

/// Compare as PEP 440 versions. `None` when either side is not a version.
fn compare_versions(left: &str, op: MarkerOp, right: &str, variable_on_left: bool) -> Option<bool> {
  let (value, literal, op) = if variable_on_left {
    (left, right, op)
  } else {
    (right, left, op.flipped()?)
  };
  let version = Version::parse(value).ok()?;
  let spec: Specifier = format!("{}{}", op.as_str(), literal).parse().ok()?;
  Some(spec.contains(&version))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Open,
  Close,
  Str(String),
  Ident(String),
  Op(MarkerOp),
  And,
  Or,
  Not,
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Token::Open => f.write_str("'('"),
      Token::Close => f.write_str("')'"),
      Token::Str(s) => write!(f, "string '{s}'"),
      Token::Ident(s) => write!(f, "'{s}'"),
      Token::Op(op) => write!(f, "'{}'", op.as_str()),
      Token::And => f.write_str("'and'"),
      Token::Or => f.write_str("'or'"),
      Token::Not => f.write_str("'not'"),
    }
  }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
  let mut tokens = Vec::new();
  let mut chars = input.char_indices().peekable();

  while let Some(&(start, c)) = chars.peek() {
    match c {
      c if c.is_whitespace() => {
        chars.next();
      }
      '(' => {
        chars.next();
        tokens.push(Token::Open);
      }
      ')' => {
        chars.next();
        tokens.push(Token::Close);
      }
      '\'' | '"' => {
        chars.next();
        let mut value = String::new();
        loop {
          match chars.next() {
            Some((_, ch)) if ch == c => break,
            Some((_, ch)) => value.push(ch),
            None => return Err(format!("unterminated string at offset {start}")),
          }
        }
        tokens.push(Token::Str(value));
      }
      '=' | '!' | '<' | '>' | '~' => {
        let rest = &input[start..];
        let (op, len) = [
          ("===", MarkerOp::Arbitrary),
          ("==", MarkerOp::Equal),
          ("!=", MarkerOp::NotEqual),
          ("<=", MarkerOp::LessEqual),
          (">=", MarkerOp::GreaterEqual),
          ("~=", MarkerOp::Compatible),
          ("<", MarkerOp::Less),
          (">", MarkerOp::Greater),
        ]
        .iter()
        .find(|(text, _)| rest.starts_with(text))
        .map(|(text, op)| (*op, text.len()))
        .ok_or_else(|| format!("unknown operator at offset {start}"))?;
        for _ in 0..len {
          chars.next();
        }
        tokens.push(Token::Op(op));
      }
      c if c.is_ascii_alphanumeric() || c == '_' => {
        let mut word = String::new();
        while let Some(&(_, ch)) = chars.peek() {
          if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            word.push(ch);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push(match word.as_str() {
          "and" => Token::And,
          "or" => Token::Or,
          "not" => Token::Not,
          "in" => Token::Op(MarkerOp::In),
          _ => Token::Ident(word),
        });
      }
      other => return Err(format!("unexpected character '{other}' at offset {start}")),
    }
  }
  Ok(tokens)
}

struct Parser {
  tokens: Vec<Token>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn or_expr(&mut self) -> Result<Expr, String> {
    let mut expr = self.and_expr()?;
    while self.peek() == Some(&Token::Or) {
      self.pos += 1;
      expr = Expr::Or(Box::new(expr), Box::new(self.and_expr()?));
    }
    Ok(expr)
  }

  fn and_expr(&mut self) -> Result<Expr, String> {
    let mut expr = self.atom()?;
    while self.peek() == Some(&Token::And) {
      self.pos += 1;
      expr = Expr::And(Box::new(expr), Box::new(self.atom()?));
    }
    Ok(expr)
  }

  fn atom(&mut self) -> Result<Expr, String> {
    if self.peek() == Some(&Token::Open) {
      self.pos += 1;
      let expr = self.or_expr()?;
      return match self.next() {
        Some(Token::Close) => Ok(expr),
        _ => Err("missing ')'".to_string()),
      };
    }

    let lhs = self.operand()?;
    let op = match self.next() {
      Some(Token::Op(op)) => op,
      Some(Token::Not) => match self.next() {
        Some(Token::Op(MarkerOp::In)) => MarkerOp::NotIn,
        _ => return Err("expected 'in' after 'not'".to_string()),
      },
      Some(token) => return Err(format!("expected an operator, found {token}")),
      None => return Err("expected an operator".to_string()),
    };
    let rhs = self.operand()?;
    Ok(Expr::Compare { lhs, op, rhs })
  }

  fn operand(&mut self) -> Result<Operand, String> {
    match self.next() {
      Some(Token::Str(value)) => Ok(Operand::Literal(value)),
      Some(Token::Ident(name)) if VARIABLES.contains(&name.as_str()) => Ok(Operand::Variable(name)),
      Some(Token::Ident(name)) => Err(format!("unknown variable '{name}'")),
      Some(token) => Err(format!("expected a variable or string, found {token}")),
      None => Err("unexpected end of marker".to_string()),
    }
  }
}
