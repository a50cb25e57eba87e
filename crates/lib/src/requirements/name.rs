//! Package name normalization.
//!
//! Two normalized forms are used throughout the crate:
//! - [`CanonicalName`]: `-`, `_` and `.` runs collapse to a single `-`, lower-cased.
//!   Used for graph identity and general lookups.
//! - [`OverrideName`]: the canonical name with `-` replaced by `_`. Used as the
//!   key for settings files and patch directories.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A canonicalized package name (`Foo.Bar_baz` -> `foo-bar-baz`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalName(String);

impl CanonicalName {
  /// Canonicalize a raw package name.
  pub fn new(raw: &str) -> Self {
    let mut out = String::with_capacity(raw.len());
    let mut in_separator_run = false;

    for ch in raw.trim().chars() {
      if matches!(ch, '-' | '_' | '.') {
        if !in_separator_run {
          out.push('-');
        }
        in_separator_run = true;
      } else {
        out.extend(ch.to_lowercase());
        in_separator_run = false;
      }
    }

    Self(out)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The settings/patch lookup key for this name.
  pub fn override_name(&self) -> OverrideName {
    OverrideName(self.0.replace('-', "_"))
  }
}

impl fmt::Display for CanonicalName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for CanonicalName {
  fn from(raw: &str) -> Self {
    Self::new(raw)
  }
}

impl Serialize for CanonicalName {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.0)
  }
}

impl<'de> Deserialize<'de> for CanonicalName {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(Self::new(&raw))
  }
}

/// Settings and patch-directory key (`foo-bar` -> `foo_bar`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverrideName(String);

impl OverrideName {
  /// Derive the override name from any raw or canonical package name.
  pub fn new(raw: &str) -> Self {
    CanonicalName::new(raw).override_name()
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for OverrideName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn collapses_separator_runs() {
    assert_eq!(CanonicalName::new("Foo.Bar__baz").as_str(), "foo-bar-baz");
    assert_eq!(CanonicalName::new("a-_.b").as_str(), "a-b");
    assert_eq!(CanonicalName::new("  Django ").as_str(), "django");
  }

  #[test]
  fn override_name_uses_underscores() {
    assert_eq!(CanonicalName::new("test-pkg").override_name().as_str(), "test_pkg");
    assert_eq!(OverrideName::new("Test.Pkg").as_str(), "test_pkg");
  }

  #[test]
  fn equivalent_spellings_are_equal() {
    assert_eq!(CanonicalName::new("ruamel.yaml"), CanonicalName::new("Ruamel_YAML"));
  }

  #[test]
  fn deserialize_canonicalizes() {
    let name: CanonicalName = serde_json::from_str(r#""Flit_Core""#).unwrap();
    assert_eq!(name.as_str(), "flit-core");
  }
}
