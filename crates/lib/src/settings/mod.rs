//! Per-package and per-variant settings.
//!
//! Settings live in YAML files named after the package (`{settings_dir}/{name}.yaml`)
//! plus an optional global `settings.yaml`. [`SettingsStore::load`] reads and
//! merges a package's files; [`SettingsStore::resolve`] turns them into the
//! [`EffectiveConfig`] for one variant.

mod effective;
mod store;
mod types;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::template::TemplateError;

pub use effective::{EffectiveConfig, SubmodulePolicy};
pub use store::SettingsStore;
pub use types::{
  DownloadSource, EnvVars, GitOptions, GlobalSettings, PackageSettings, ProjectOverride, ProviderKind, ResolverDist,
  VariantInfo,
};

/// Errors raised while loading or resolving settings.
#[derive(Debug, Clone, Error)]
pub enum SettingsError {
  /// A settings file is malformed.
  #[error("{package}: invalid settings in {file}, field '{field}': {message}")]
  Parse {
    package: String,
    file: PathBuf,
    field: String,
    message: String,
  },

  /// An env value is not a valid template.
  #[error("{package}: invalid template in '{field}': {source}")]
  Template {
    package: String,
    field: String,
    #[source]
    source: TemplateError,
  },

  /// Conflicting or unknown variant configuration.
  #[error("{package}: variant '{variant}': {message}")]
  Variant {
    package: String,
    variant: String,
    message: String,
  },

  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: Arc<io::Error>,
  },
}

impl SettingsError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    SettingsError::Io {
      path: path.into(),
      source: Arc::new(source),
    }
  }
}
