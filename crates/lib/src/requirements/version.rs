//! Package versions.
//!
//! Implements the subset of PEP 440 needed for ordering, specifier matching and
//! patch-directory lookup: epochs, release segments, pre/post/dev releases and
//! local labels.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{0}'")]
pub struct InvalidVersion(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreKind {
  Alpha,
  Beta,
  Rc,
}

impl PreKind {
  fn label(self) -> &'static str {
    match self {
      PreKind::Alpha => "a",
      PreKind::Beta => "b",
      PreKind::Rc => "rc",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum LocalSegment {
  Text(String),
  Number(u64),
}

// Declaration order is the PEP 440 sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum PreKey {
  DevOnly,
  Pre(PreKind, u64),
  Final,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum DevKey {
  Dev(u64),
  Released,
}

/// A parsed package version.
#[derive(Debug, Clone)]
pub struct Version {
  epoch: u64,
  release: Vec<u64>,
  pre: Option<(PreKind, u64)>,
  post: Option<u64>,
  dev: Option<u64>,
  local: Option<String>,
}

impl Version {
  /// Parse a version string.
  pub fn parse(input: &str) -> Result<Self, InvalidVersion> {
    Parser::new(input).parse().ok_or_else(|| InvalidVersion(input.to_string()))
  }

  pub fn release(&self) -> &[u64] {
    &self.release
  }

  pub fn epoch(&self) -> u64 {
    self.epoch
  }

  pub fn local(&self) -> Option<&str> {
    self.local.as_deref()
  }

  /// The version without its local label (`1.0.3+local.suffix` -> `1.0.3`).
  pub fn public(&self) -> Version {
    Version {
      local: None,
      ..self.clone()
    }
  }

  /// Pre-release or development release.
  pub fn is_prerelease(&self) -> bool {
    self.pre.is_some() || self.dev.is_some()
  }

  pub fn is_postrelease(&self) -> bool {
    self.post.is_some()
  }

  fn trimmed_release(&self) -> &[u64] {
    let len = self.release.iter().rposition(|&n| n != 0).map_or(0, |i| i + 1);
    &self.release[..len]
  }

  fn pre_key(&self) -> PreKey {
    match (self.pre, self.post, self.dev) {
      (None, None, Some(_)) => PreKey::DevOnly,
      (Some((kind, n)), _, _) => PreKey::Pre(kind, n),
      _ => PreKey::Final,
    }
  }

  fn dev_key(&self) -> DevKey {
    self.dev.map_or(DevKey::Released, DevKey::Dev)
  }

  fn local_key(&self) -> Option<Vec<LocalSegment>> {
    self.local.as_ref().map(|local| {
      local
        .split('.')
        .map(|seg| match seg.parse::<u64>() {
          Ok(n) => LocalSegment::Number(n),
          Err(_) => LocalSegment::Text(seg.to_string()),
        })
        .collect()
    })
  }
}

impl Ord for Version {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .epoch
      .cmp(&other.epoch)
      .then_with(|| self.trimmed_release().cmp(other.trimmed_release()))
      .then_with(|| self.pre_key().cmp(&other.pre_key()))
      .then_with(|| self.post.cmp(&other.post))
      .then_with(|| self.dev_key().cmp(&other.dev_key()))
      .then_with(|| self.local_key().cmp(&other.local_key()))
  }
}

impl PartialOrd for Version {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for Version {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Version {}

impl Hash for Version {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.epoch.hash(state);
    self.trimmed_release().hash(state);
    self.pre_key().hash(state);
    self.post.hash(state);
    self.dev_key().hash(state);
    self.local_key().hash(state);
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.epoch != 0 {
      write!(f, "{}!", self.epoch)?;
    }
    let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
    f.write_str(&release.join("."))?;
    if let Some((kind, n)) = self.pre {
      write!(f, "{}{}", kind.label(), n)?;
    }
    if let Some(n) = self.post {
      write!(f, ".post{}", n)?;
    }
    if let Some(n) = self.dev {
      write!(f, ".dev{}", n)?;
    }
    if let Some(local) = &self.local {
      write!(f, "+{}", local)?;
    }
    Ok(())
  }
}

impl FromStr for Version {
  type Err = InvalidVersion;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Version::parse(s)
  }
}

impl Serialize for Version {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Version {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Version::parse(&raw).map_err(serde::de::Error::custom)
  }
}

/// Cursor over a lower-cased version string.
struct Parser {
  chars: Vec<char>,
  pos: usize,
}

impl Parser {
  fn new(input: &str) -> Self {
    let normalized = input.trim().to_lowercase();
    let normalized = normalized.strip_prefix('v').unwrap_or(&normalized).to_string();
    Self {
      chars: normalized.chars().collect(),
      pos: 0,
    }
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn rest_starts_with(&self, word: &str) -> bool {
    let word: Vec<char> = word.chars().collect();
    self.chars.len() >= self.pos + word.len() && self.chars[self.pos..self.pos + word.len()] == word[..]
  }

  fn number(&mut self) -> Option<u64> {
    let start = self.pos;
    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
      self.pos += 1;
    }
    if start == self.pos {
      return None;
    }
    self.chars[start..self.pos].iter().collect::<String>().parse().ok()
  }

  fn skip_separator(&mut self) -> bool {
    if matches!(self.peek(), Some('.' | '-' | '_')) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  /// Try to consume one of `labels` (optionally preceded by a separator).
  fn label(&mut self, labels: &[&str]) -> Option<String> {
    let checkpoint = self.pos;
    self.skip_separator();
    for label in labels {
      if self.rest_starts_with(label) {
        self.pos += label.chars().count();
        return Some((*label).to_string());
      }
    }
    self.pos = checkpoint;
    None
  }

  /// Number following a label, defaulting to zero when absent.
  fn label_number(&mut self) -> u64 {
    let checkpoint = self.pos;
    self.skip_separator();
    match self.number() {
      Some(n) => n,
      None => {
        self.pos = checkpoint;
        0
      }
    }
  }

  fn parse(mut self) -> Option<Version> {
    let (public, local) = {
      let text: String = self.chars.iter().collect();
      match text.split_once('+') {
        Some((public, local)) => {
          if local.is_empty() || !local.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')) {
            return None;
          }
          (public.to_string(), Some(local.replace(['-', '_'], ".")))
        }
        None => (text, None),
      }
    };
    self.chars = public.chars().collect();

    let mut epoch = 0;
    if let Some(bang) = self.chars.iter().position(|&c| c == '!') {
      epoch = self.number()?;
      if self.pos != bang {
        return None;
      }
      self.pos += 1;
    }

    let mut release = vec![self.number()?];
    while self.peek() == Some('.') && self.chars.get(self.pos + 1).is_some_and(char::is_ascii_digit) {
      self.pos += 1;
      release.push(self.number()?);
    }

    let pre = self
      .label(&["alpha", "beta", "preview", "pre", "rc", "a", "b", "c"])
      .map(|label| {
        let kind = match label.as_str() {
          "alpha" | "a" => PreKind::Alpha,
          "beta" | "b" => PreKind::Beta,
          _ => PreKind::Rc,
        };
        (kind, self.label_number())
      });

    let mut post = self.label(&["post", "rev", "r"]).map(|_| self.label_number());
    if post.is_none() && self.peek() == Some('-') {
      let checkpoint = self.pos;
      self.pos += 1;
      post = self.number();
      if post.is_none() {
        self.pos = checkpoint;
      }
    }

    let dev = self.label(&["dev"]).map(|_| self.label_number());

    if self.pos != self.chars.len() {
      return None;
    }

    Some(Version {
      epoch,
      release,
      pre,
      post,
      dev,
      local,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
  }

  #[test]
  fn parses_common_forms() {
    assert_eq!(v("1.0.2").to_string(), "1.0.2");
    assert_eq!(v("v2.1").to_string(), "2.1");
    assert_eq!(v("1.0rc1").to_string(), "1.0rc1");
    assert_eq!(v("1.0-alpha.2").to_string(), "1.0a2");
    assert_eq!(v("1.0.post3").to_string(), "1.0.post3");
    assert_eq!(v("1.0-3").to_string(), "1.0.post3");
    assert_eq!(v("1.0.dev4").to_string(), "1.0.dev4");
    assert_eq!(v("2!1.0").to_string(), "2!1.0");
    assert_eq!(v("1.0.3+local.suffix").to_string(), "1.0.3+local.suffix");
  }

  #[test]
  fn rejects_garbage() {
    assert!(Version::parse("").is_err());
    assert!(Version::parse("abc").is_err());
    assert!(Version::parse("1.0+").is_err());
    assert!(Version::parse("1.0 junk").is_err());
  }

  #[test]
  fn public_strips_local_label() {
    let version = v("1.0.3+local.suffix");
    assert_eq!(version.local(), Some("local.suffix"));
    assert_eq!(version.public().to_string(), "1.0.3");
  }

  #[test]
  fn ordering_follows_release_phases() {
    let ordered = [
      "1.0.dev1", "1.0a1", "1.0a2.dev1", "1.0b1", "1.0rc1", "1.0", "1.0+local", "1.0.post1", "1.1", "2!0.1",
    ];
    for pair in ordered.windows(2) {
      assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
    }
  }

  #[test]
  fn trailing_zeros_are_equal() {
    assert_eq!(v("1.0"), v("1.0.0"));
    assert!(v("1.10") > v("1.9"));
  }

  #[test]
  fn prerelease_detection() {
    assert!(v("1.0rc1").is_prerelease());
    assert!(v("1.0.dev0").is_prerelease());
    assert!(!v("1.0.post1").is_prerelease());
  }
}
