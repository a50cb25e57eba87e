//! Offline package catalog.
//!
//! A catalog describes package indexes and release tags together with the
//! requirements each release declares. It backs both resolution strategies and
//! acts as the [`MetadataSource`] for the engine.
//!
//! ```yaml
//! indexes:
//!   https://pypi.org/simple:
//!     setuptools:
//!       - version: "69.0.0"
//!         wheel: true
//!     flit-core:
//!       - version: "3.9.0"
//!         install: []
//!     my-app:
//!       - version: "1.0"
//!         build_system: ["setuptools>=60", "wheel"]
//!         install: ["requests>=2"]
//! tags:
//!   my-lib:
//!     - tag: v2.1.0
//!       build_system: [flit-core]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ArtifactKinds, IndexConfig, MetadataSource, ProviderError};
use crate::graph::ResolvedPackage;
use crate::requirements::{CanonicalName, Requirement, Version};
use crate::settings::EffectiveConfig;

/// Requirements a release declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredRequirements {
  #[serde(default)]
  pub build_system: Vec<Requirement>,
  #[serde(default)]
  pub build_backend: Vec<Requirement>,
  #[serde(default)]
  pub install: Vec<Requirement>,
}

fn default_true() -> bool {
  true
}

/// One version of a package on an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
  pub version: Version,
  #[serde(default = "default_true")]
  pub sdist: bool,
  #[serde(default)]
  pub wheel: bool,
  /// Artifact URL; derived from the index URL when unset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(flatten)]
  pub requires: DeclaredRequirements,
}

impl Release {
  pub fn kinds(&self) -> ArtifactKinds {
    ArtifactKinds {
      sdist: self.sdist,
      wheel: self.wheel,
    }
  }
}

/// A release identified by a source-control tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedRelease {
  pub tag: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(flatten)]
  pub requires: DeclaredRequirements,
}

impl TaggedRelease {
  /// Version named by the tag: `v1.2.3`, `1.2.3`, `my-pkg-1.2.3` or `my_pkg-1.2.3`.
  pub fn version(&self, name: &CanonicalName) -> Option<Version> {
    let prefixes = [format!("{}-", name), format!("{}-", name.override_name())];
    let raw = prefixes
      .iter()
      .find_map(|p| self.tag.strip_prefix(p.as_str()))
      .unwrap_or(&self.tag);
    Version::parse(raw).ok()
  }
}

/// Indexes and tags of known packages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
  /// Index URL -> package -> releases.
  #[serde(default)]
  pub indexes: BTreeMap<String, BTreeMap<CanonicalName, Vec<Release>>>,
  /// Package -> tagged releases.
  #[serde(default)]
  pub tags: BTreeMap<CanonicalName, Vec<TaggedRelease>>,
}

impl Catalog {
  /// Load a catalog from a `.json`, `.yaml` or `.yml` file.
  pub fn load(path: &Path) -> Result<Self, ProviderError> {
    let raw = fs::read_to_string(path).map_err(|e| ProviderError::Io {
      path: path.to_path_buf(),
      source: Arc::new(e),
    })?;
    let parse_err = |message: String| ProviderError::Parse {
      path: path.to_path_buf(),
      message,
    };

    let catalog: Catalog = if path.extension().is_some_and(|e| e == "json") {
      serde_json::from_str(&raw).map_err(|e| parse_err(e.to_string()))?
    } else {
      serde_yaml::from_str(&raw).map_err(|e| parse_err(e.to_string()))?
    };
    debug!(
      path = %path.display(),
      indexes = catalog.indexes.len(),
      tagged = catalog.tags.len(),
      "loaded catalog"
    );
    Ok(catalog)
  }

  /// Releases of `name` on the index at `index_url`. Trailing slashes are ignored.
  pub fn releases(&self, index_url: &str, name: &CanonicalName) -> &[Release] {
    let wanted = index_url.trim_end_matches('/');
    self
      .indexes
      .iter()
      .find(|(url, _)| url.trim_end_matches('/') == wanted)
      .and_then(|(_, packages)| packages.get(name))
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  pub fn tagged(&self, name: &CanonicalName) -> &[TaggedRelease] {
    self.tags.get(name).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Declared requirements of a release, looking at `preferred_index` first,
  /// then every other index, then tags.
  pub fn declared(&self, name: &CanonicalName, version: &Version, preferred_index: &str) -> Option<&DeclaredRequirements> {
    let matches = |r: &&Release| r.version == *version;

    self
      .releases(preferred_index, name)
      .iter()
      .find(matches)
      .or_else(|| {
        self
          .indexes
          .values()
          .filter_map(|packages| packages.get(name))
          .flatten()
          .find(matches)
      })
      .map(|r| &r.requires)
      .or_else(|| {
        self
          .tagged(name)
          .iter()
          .find(|t| t.version(name).is_some_and(|v| v == *version))
          .map(|t| &t.requires)
      })
  }

  fn declared_for(&self, pkg: &ResolvedPackage, cfg: &EffectiveConfig) -> Result<&DeclaredRequirements, ProviderError> {
    let index = if cfg.pre_built {
      IndexConfig::prebuilt(cfg)
    } else {
      IndexConfig::for_package(cfg)
    };
    self
      .declared(pkg.name(), pkg.version(), &index.index_url)
      .ok_or_else(|| ProviderError::Metadata {
        package: pkg.name().to_string(),
        version: pkg.version().to_string(),
        message: "release not found in catalog".to_string(),
      })
  }
}

#[async_trait]
impl MetadataSource for Catalog {
  async fn build_system_requirements(
    &self,
    pkg: &ResolvedPackage,
    cfg: &EffectiveConfig,
  ) -> Result<Vec<Requirement>, ProviderError> {
    Ok(self.declared_for(pkg, cfg)?.build_system.clone())
  }

  async fn build_backend_requirements(
    &self,
    pkg: &ResolvedPackage,
    cfg: &EffectiveConfig,
  ) -> Result<Vec<Requirement>, ProviderError> {
    Ok(self.declared_for(pkg, cfg)?.build_backend.clone())
  }

  async fn install_requirements(
    &self,
    pkg: &ResolvedPackage,
    cfg: &EffectiveConfig,
  ) -> Result<Vec<Requirement>, ProviderError> {
    Ok(self.declared_for(pkg, cfg)?.install.clone())
  }
}
