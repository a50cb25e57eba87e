//! Requirements, package names and versions.
//!
//! A [`Requirement`] is what a user writes on the command line or in a
//! requirements file, or what a package declares as a dependency:
//!
//! ```
//! use fromsource_lib::requirements::Requirement;
//!
//! let req: Requirement = "Flit_Core[extra] >=3.2, <4; python_version >= '3.8'".parse().unwrap();
//! assert_eq!(req.name().as_str(), "flit-core");
//! assert_eq!(req.to_string(), "flit-core[extra]>=3.2,<4; python_version >= '3.8'");
//! ```

mod marker;
mod name;
mod specifier;
mod version;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use marker::{InvalidMarker, Marker, MarkerEnvironment};
pub use name::{CanonicalName, OverrideName};
pub use specifier::{InvalidSpecifier, Operator, Specifier, SpecifierSet};
pub use version::{InvalidVersion, PreKind, Version};

/// Errors that can occur while parsing requirement strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementParseError {
  #[error("empty requirement")]
  Empty,

  #[error("invalid package name in '{0}'")]
  InvalidName(String),

  #[error("unclosed extras in '{0}'")]
  UnclosedExtras(String),

  #[error("invalid requirement '{input}': {source}")]
  Specifier {
    input: String,
    #[source]
    source: InvalidSpecifier,
  },

  #[error("invalid requirement '{input}': {source}")]
  Marker {
    input: String,
    #[source]
    source: InvalidMarker,
  },

  #[error("failed to read requirements file {path}: {message}")]
  File { path: String, message: String },
}

/// A package requirement: name, optional constraint, extras and marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
  name: CanonicalName,
  extras: BTreeSet<String>,
  specifier: SpecifierSet,
  marker: Option<Marker>,
}

impl Requirement {
  /// Build a requirement for `name` with a constraint.
  pub fn new(name: &str, specifier: SpecifierSet) -> Self {
    Self {
      name: CanonicalName::new(name),
      extras: BTreeSet::new(),
      specifier,
      marker: None,
    }
  }

  pub fn name(&self) -> &CanonicalName {
    &self.name
  }

  pub fn override_name(&self) -> OverrideName {
    self.name.override_name()
  }

  pub fn extras(&self) -> &BTreeSet<String> {
    &self.extras
  }

  pub fn specifier(&self) -> &SpecifierSet {
    &self.specifier
  }

  /// Environment marker as written, if any.
  pub fn marker(&self) -> Option<&str> {
    self.marker.as_ref().map(Marker::as_str)
  }

  /// Whether this requirement applies to `env` when requested with `extras`.
  ///
  /// A requirement without a marker always applies. With extras, the marker
  /// must hold for at least one of them; without, `extra` is empty.
  pub fn is_active(&self, env: &MarkerEnvironment, extras: &BTreeSet<String>) -> bool {
    self.marker.as_ref().is_none_or(|m| m.evaluate_any(env, extras))
  }

  /// Copy of this requirement with a different constraint.
  pub fn with_specifier(&self, specifier: SpecifierSet) -> Self {
    Self {
      specifier,
      ..self.clone()
    }
  }
}

fn is_name_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

impl FromStr for Requirement {
  type Err = RequirementParseError;

  fn from_str(input: &str) -> Result<Self, Self::Err> {
    let (body, marker) = match input.split_once(';') {
      Some((body, marker)) => (body.trim(), Some(marker.trim()).filter(|m| !m.is_empty())),
      None => (input.trim(), None),
    };
    let marker = marker
      .map(str::parse::<Marker>)
      .transpose()
      .map_err(|source| RequirementParseError::Marker {
        input: input.to_string(),
        source,
      })?;
    if body.is_empty() {
      return Err(RequirementParseError::Empty);
    }

    let name_end = body.find(|c: char| !is_name_char(c)).unwrap_or(body.len());
    let raw_name = &body[..name_end];
    if raw_name.is_empty()
      || !raw_name.starts_with(|c: char| c.is_ascii_alphanumeric())
      || !raw_name.ends_with(|c: char| c.is_ascii_alphanumeric())
    {
      return Err(RequirementParseError::InvalidName(input.to_string()));
    }

    let mut rest = body[name_end..].trim_start();
    let mut extras = BTreeSet::new();
    if let Some(after) = rest.strip_prefix('[') {
      let (inner, tail) = after
        .split_once(']')
        .ok_or_else(|| RequirementParseError::UnclosedExtras(input.to_string()))?;
      extras = inner
        .split(',')
        .map(|e| CanonicalName::new(e).to_string())
        .filter(|e| !e.is_empty())
        .collect();
      rest = tail.trim_start();
    }

    let rest = rest.trim_start_matches('(').trim_end_matches(')');
    let specifier = rest.parse().map_err(|source| RequirementParseError::Specifier {
      input: input.to_string(),
      source,
    })?;

    Ok(Self {
      name: CanonicalName::new(raw_name),
      extras,
      specifier,
      marker,
    })
  }
}

impl fmt::Display for Requirement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name.as_str())?;
    if !self.extras.is_empty() {
      let extras: Vec<&str> = self.extras.iter().map(String::as_str).collect();
      write!(f, "[{}]", extras.join(","))?;
    }
    write!(f, "{}", self.specifier)?;
    if let Some(marker) = &self.marker {
      write!(f, "; {}", marker)?;
    }
    Ok(())
  }
}

impl Serialize for Requirement {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Requirement {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

/// Parse a pip-style requirements file.
///
/// Blank lines, `#` comments and trailing comments are skipped. Option lines
/// (`-r`, `--index-url`, ...) are not supported and are ignored.
pub fn parse_requirements_file(path: &Path) -> Result<Vec<Requirement>, RequirementParseError> {
  let content = fs::read_to_string(path).map_err(|e| RequirementParseError::File {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  content
    .lines()
    .map(|line| line.split(" #").next().unwrap_or("").trim())
    .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
    .map(Requirement::from_str)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bare_name() {
    let req: Requirement = "setuptools".parse().unwrap();
    assert_eq!(req.name().as_str(), "setuptools");
    assert!(req.specifier().is_empty());
    assert!(req.extras().is_empty());
    assert_eq!(req.marker(), None);
  }

  #[test]
  fn full_form() {
    let req: Requirement = "Test_Req[Foo, bar] >1.0.0 ; sys_platform == 'linux'".parse().unwrap();
    assert_eq!(req.name().as_str(), "test-req");
    assert_eq!(req.override_name().as_str(), "test_req");
    assert_eq!(req.extras().iter().collect::<Vec<_>>(), ["bar", "foo"]);
    assert_eq!(req.specifier().to_string(), ">1.0.0");
    assert_eq!(req.marker(), Some("sys_platform == 'linux'"));
  }

  #[test]
  fn parenthesized_constraint() {
    let req: Requirement = "six (>=1.10)".parse().unwrap();
    assert_eq!(req.to_string(), "six>=1.10");
  }

  #[test]
  fn errors() {
    assert_eq!("".parse::<Requirement>(), Err(RequirementParseError::Empty));
    assert!(matches!(
      ">=1.0".parse::<Requirement>(),
      Err(RequirementParseError::InvalidName(_))
    ));
    assert!(matches!(
      "pkg[extra".parse::<Requirement>(),
      Err(RequirementParseError::UnclosedExtras(_))
    ));
    assert!(matches!(
      "pkg >=".parse::<Requirement>(),
      Err(RequirementParseError::Specifier { .. })
    ));
  }

  #[test]
  fn markers_gate_requirements() {
    let env = MarkerEnvironment::host().with_python_version("3.12");
    let none = BTreeSet::new();
    let test: BTreeSet<String> = ["test".to_string()].into();

    let plain: Requirement = "six".parse().unwrap();
    assert!(plain.is_active(&env, &none));

    let extra: Requirement = "pytest; extra == 'test'".parse().unwrap();
    assert!(!extra.is_active(&env, &none));
    assert!(extra.is_active(&env, &test));

    let old: Requirement = "tomli; python_version < '3.11'".parse().unwrap();
    assert!(!old.is_active(&env, &test));
    assert!(old.is_active(&env.clone().with_python_version("3.10"), &none));
  }

  #[test]
  fn invalid_marker_is_an_error() {
    assert!(matches!(
      "six; pyver > '3'".parse::<Requirement>(),
      Err(RequirementParseError::Marker { .. })
    ));
  }

  #[test]
  fn requirements_file_skips_comments() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("requirements.txt");
    fs::write(
      &path,
      "# top level\nflit_core>=3\n\n--index-url https://example.test\nwheel # inline\n",
    )
    .unwrap();

    let reqs = parse_requirements_file(&path).unwrap();
    let names: Vec<&str> = reqs.iter().map(|r| r.name().as_str()).collect();
    assert_eq!(names, ["flit-core", "wheel"]);
  }
}
