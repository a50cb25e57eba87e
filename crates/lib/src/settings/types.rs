//! Settings file data model.
//!
//! Per-package files look like:
//!
//! ```yaml
//! build_dir: python
//! changelog:
//!   "1.0.1":
//!     - fixed bug
//! env:
//!   EGG: spam
//! download_source:
//!   url: https://egg.test/${canonicalized_name}-${version}.tar.gz
//!   destination_filename: ${canonicalized_name}-${version}.tar.gz
//! resolver_dist:
//!   sdist_server_url: https://sdist.test/egg
//!   include_sdists: true
//!   include_wheels: false
//! git_options:
//!   submodule_paths: [vendor/lib]
//! project_override:
//!   remove_build_requires: [cmake]
//!   update_build_requires: ["setuptools>=68"]
//! variants:
//!   cpu:
//!     env:
//!       EGG: spamalot
//!   rocm:
//!     pre_built: true
//!     wheel_server_url: https://wheel.test/simple
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::requirements::{CanonicalName, Requirement, Version};

/// Ordered environment variables.
///
/// Definition order matters: later entries may reference earlier ones.
/// Booleans become `1`/`0`, numbers their decimal text, strings are trimmed.
/// `$(...)` subshells are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars(Vec<(String, String)>);

impl EnvVars {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
  }

  /// Insert or replace a value, keeping the original position of an existing key.
  pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
    let key = key.into();
    let value = value.into();
    match self.0.iter_mut().find(|(k, _)| *k == key) {
      Some(entry) => entry.1 = value,
      None => self.0.push((key, value)),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn as_slice(&self) -> &[(String, String)] {
    &self.0
  }
}

impl FromIterator<(String, String)> for EnvVars {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    let mut vars = EnvVars::new();
    for (k, v) in iter {
      vars.set(k, v);
    }
    vars
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
}

impl Serialize for EnvVars {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
  }
}

impl<'de> Deserialize<'de> for EnvVars {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct EnvVisitor;

    impl<'de> Visitor<'de> for EnvVisitor {
      type Value = EnvVars;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of environment variables")
      }

      fn visit_unit<E: de::Error>(self) -> Result<EnvVars, E> {
        Ok(EnvVars::new())
      }

      fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<EnvVars, A::Error> {
        let mut vars = EnvVars::new();
        while let Some((key, value)) = map.next_entry::<String, EnvValue>()? {
          let value = match value {
            EnvValue::Bool(b) => u8::from(b).to_string(),
            EnvValue::Int(n) => n.to_string(),
            EnvValue::Float(n) => n.to_string(),
            EnvValue::Str(s) => {
              if s.contains("$(") {
                return Err(de::Error::custom(format!("{key}: subshell '$(' is not supported")));
              }
              s.trim().to_string()
            }
          };
          vars.set(key, value);
        }
        Ok(vars)
      }
    }

    deserializer.deserialize_any(EnvVisitor)
  }
}

/// Alternative source download location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadSource {
  /// URL template; `${canonicalized_name}` and `${version}` are available.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  /// File name template for the downloaded archive.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub destination_filename: Option<String>,
}

/// Resolution strategy used for a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
  /// Pick versions from a package index.
  #[default]
  Index,
  /// Derive versions from release tags.
  Tags,
}

fn default_true() -> bool {
  true
}

/// How versions of a package are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverDist {
  /// Index URL; the default index when unset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sdist_server_url: Option<String>,

  #[serde(default = "default_true")]
  pub include_sdists: bool,

  #[serde(default)]
  pub include_wheels: bool,

  #[serde(default)]
  pub provider: ProviderKind,
}

impl Default for ResolverDist {
  fn default() -> Self {
    Self {
      sdist_server_url: None,
      include_sdists: true,
      include_wheels: false,
      provider: ProviderKind::Index,
    }
  }
}

/// Git checkout options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitOptions {
  #[serde(default)]
  pub submodules: bool,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub submodule_paths: Vec<String>,
}

/// Edits applied to a package's declared build-system requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectOverride {
  /// Requirements dropped by name.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub remove_build_requires: Vec<CanonicalName>,

  /// Requirements replaced by name, or added when absent.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub update_build_requires: Vec<Requirement>,
}

impl ProjectOverride {
  pub fn is_empty(&self) -> bool {
    self.remove_build_requires.is_empty() && self.update_build_requires.is_empty()
  }

  /// Apply the edits to a list of build-system requirements.
  pub fn apply(&self, reqs: Vec<Requirement>) -> Vec<Requirement> {
    let mut out: Vec<Requirement> = reqs
      .into_iter()
      .filter(|r| !self.remove_build_requires.contains(r.name()))
      .collect();

    for update in &self.update_build_requires {
      match out.iter_mut().find(|r| r.name() == update.name()) {
        Some(existing) => *existing = update.clone(),
        None => out.push(update.clone()),
      }
    }
    out
  }
}

/// Variant-specific overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantInfo {
  #[serde(default, skip_serializing_if = "EnvVars::is_empty")]
  pub env: EnvVars,

  /// Use a prebuilt wheel instead of building from source.
  #[serde(default)]
  pub pre_built: bool,

  /// Wheel index for prebuilt wheels. Kept but unused while `pre_built` is false.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub wheel_server_url: Option<String>,
}

/// Settings for one package, merged from all of its settings files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSettings {
  pub name: CanonicalName,

  /// Whether at least one settings file exists for the package.
  pub has_config: bool,

  /// Sub-directory holding the build configuration. Always relative.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub build_dir: Option<PathBuf>,

  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub changelog: BTreeMap<Version, Vec<String>>,

  #[serde(skip_serializing_if = "EnvVars::is_empty")]
  pub env: EnvVars,

  pub download_source: DownloadSource,

  pub resolver_dist: ResolverDist,

  pub git_options: GitOptions,

  pub project_override: ProjectOverride,

  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub variants: BTreeMap<String, VariantInfo>,
}

impl PackageSettings {
  /// Settings for a package without any settings file.
  pub fn default_for(name: CanonicalName) -> Self {
    Self {
      name,
      has_config: false,
      build_dir: None,
      changelog: BTreeMap::new(),
      env: EnvVars::new(),
      download_source: DownloadSource::default(),
      resolver_dist: ResolverDist::default(),
      git_options: GitOptions::default(),
      project_override: ProjectOverride::default(),
      variants: BTreeMap::new(),
    }
  }

  pub fn variant(&self, variant: &str) -> Option<&VariantInfo> {
    self.variants.get(variant)
  }
}

/// The global `settings.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
  /// Changelog entries per variant; each entry bumps every build tag.
  #[serde(default)]
  pub changelog: BTreeMap<String, Vec<String>>,

  /// Variables available to every package's env templates.
  #[serde(default)]
  pub env: EnvVars,

  /// Known variant names. Empty accepts any variant.
  #[serde(default)]
  pub variants: Vec<String>,
}

impl GlobalSettings {
  pub fn variant_changelog(&self, variant: &str) -> &[String] {
    self.changelog.get(variant).map(Vec::as_slice).unwrap_or(&[])
  }
}
