//! Version resolution and dependency metadata.
//!
//! The bootstrap engine talks to two narrow interfaces:
//!
//! - [`ResolutionProvider`] pins a requirement to a concrete version
//! - [`MetadataSource`] reports the requirements a resolved package declares
//!
//! Both are async and object safe; the engine holds them as `Arc<dyn ...>`.
//! [`ProviderRegistry`] picks the resolution strategy per package from its
//! `resolver_dist.provider` setting.

mod catalog;
mod index;
mod tags;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_INDEX;
use crate::graph::ResolvedPackage;
use crate::requirements::{Requirement, Version};
use crate::settings::{EffectiveConfig, ProviderKind};

pub use catalog::{Catalog, DeclaredRequirements, Release, TaggedRelease};
pub use index::IndexProvider;
pub use tags::TagProvider;

/// Artifact kinds available for a version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKinds {
  pub sdist: bool,
  pub wheel: bool,
}

impl ArtifactKinds {
  pub const SDIST: ArtifactKinds = ArtifactKinds {
    sdist: true,
    wheel: false,
  };
  pub const WHEEL: ArtifactKinds = ArtifactKinds {
    sdist: false,
    wheel: true,
  };
}

/// Where and how to look for candidate versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexConfig {
  pub index_url: String,
  pub include_sdists: bool,
  pub include_wheels: bool,
}

impl IndexConfig {
  /// Index settings of a package built from source.
  pub fn for_package(cfg: &EffectiveConfig) -> Self {
    let rd = &cfg.resolver_dist;
    Self {
      index_url: rd.sdist_server_url.clone().unwrap_or_else(|| DEFAULT_INDEX.to_string()),
      include_sdists: rd.include_sdists,
      include_wheels: rd.include_wheels,
    }
  }

  /// Wheel-only lookup on the variant's wheel server.
  pub fn prebuilt(cfg: &EffectiveConfig) -> Self {
    Self {
      index_url: cfg
        .wheel_server_url
        .clone()
        .or_else(|| cfg.resolver_dist.sdist_server_url.clone())
        .unwrap_or_else(|| DEFAULT_INDEX.to_string()),
      include_sdists: false,
      include_wheels: true,
    }
  }

  /// Whether a release with `kinds` is eligible under this config.
  pub fn accepts(&self, kinds: ArtifactKinds) -> bool {
    (self.include_sdists && kinds.sdist) || (self.include_wheels && kinds.wheel)
  }
}

/// A requirement pinned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
  pub version: Version,
  pub kinds: ArtifactKinds,
  pub url: String,
}

/// Errors reported by providers and metadata sources.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
  /// No candidate satisfies the requirement.
  #[error("no version of '{requirement}' found on {index}")]
  NoMatch { requirement: String, index: String },

  /// Dependency metadata for a package is missing or unusable.
  #[error("no metadata for {package}=={version}: {message}")]
  Metadata {
    package: String,
    version: String,
    message: String,
  },

  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: Arc<io::Error>,
  },

  #[error("failed to parse {path}: {message}")]
  Parse { path: PathBuf, message: String },
}

/// Pins requirements to concrete versions.
#[async_trait]
pub trait ResolutionProvider: Send + Sync {
  async fn resolve(&self, req: &Requirement, index: &IndexConfig) -> Result<Resolution, ProviderError>;
}

/// Reports what a resolved package needs.
#[async_trait]
pub trait MetadataSource: Send + Sync {
  /// Static build-system requirements (`[build-system].requires`).
  async fn build_system_requirements(
    &self,
    pkg: &ResolvedPackage,
    cfg: &EffectiveConfig,
  ) -> Result<Vec<Requirement>, ProviderError>;

  /// Extra requirements the build backend asks for.
  async fn build_backend_requirements(
    &self,
    pkg: &ResolvedPackage,
    cfg: &EffectiveConfig,
  ) -> Result<Vec<Requirement>, ProviderError>;

  /// Install-time requirements of the built package.
  async fn install_requirements(
    &self,
    pkg: &ResolvedPackage,
    cfg: &EffectiveConfig,
  ) -> Result<Vec<Requirement>, ProviderError>;
}

/// Resolution strategies by [`ProviderKind`].
#[derive(Clone)]
pub struct ProviderRegistry {
  default: Arc<dyn ResolutionProvider>,
  by_kind: HashMap<ProviderKind, Arc<dyn ResolutionProvider>>,
}

impl ProviderRegistry {
  /// Registry using `default` for every kind without its own provider.
  pub fn new(default: Arc<dyn ResolutionProvider>) -> Self {
    Self {
      default,
      by_kind: HashMap::new(),
    }
  }

  /// Registry with the index and tag strategies over one catalog.
  pub fn from_catalog(catalog: Arc<Catalog>) -> Self {
    Self::new(Arc::new(IndexProvider::new(catalog.clone()))).with(ProviderKind::Tags, Arc::new(TagProvider::new(catalog)))
  }

  pub fn with(mut self, kind: ProviderKind, provider: Arc<dyn ResolutionProvider>) -> Self {
    self.by_kind.insert(kind, provider);
    self
  }

  /// Provider for a package. Prebuilt packages always use the default provider.
  pub fn for_config(&self, cfg: &EffectiveConfig) -> Arc<dyn ResolutionProvider> {
    if cfg.pre_built {
      return self.default.clone();
    }
    self
      .by_kind
      .get(&cfg.resolver_dist.provider)
      .cloned()
      .unwrap_or_else(|| self.default.clone())
  }
}
