//! Bootstrap configuration, results and errors.

use std::num::NonZeroUsize;
use std::sync::Arc;

use thiserror::Error;

use crate::build_order::BuildOrder;
use crate::graph::{DependencyGraph, GraphError};
use crate::patches::PatchDiscoveryError;
use crate::provider::ProviderError;
use crate::settings::SettingsError;

/// Tunables of a bootstrap run.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
  /// Maximum number of concurrent provider and metadata calls.
  pub parallelism: usize,

  /// Build order of an earlier run. Packages listed there are
  /// `already-satisfied`: their build dependencies are not followed.
  pub previous: Option<Arc<BuildOrder>>,
}

impl Default for BootstrapConfig {
  fn default() -> Self {
    Self {
      parallelism: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
      previous: None,
    }
  }
}

/// A completed bootstrap: the dependency graph and its build order.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
  pub graph: DependencyGraph,
  pub build_order: BuildOrder,
}

fn describe_chain(chain: &[String]) -> String {
  if chain.is_empty() {
    "top-level requirement".to_string()
  } else {
    format!("required by {}", chain.join(" -> "))
  }
}

/// Fatal errors of a bootstrap run.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
  /// No candidate satisfies a requirement.
  #[error("unable to resolve '{requirement}' ({}): {source}", describe_chain(.chain))]
  UnresolvableRequirement {
    requirement: String,
    /// Packages that pulled the requirement in, outermost first.
    chain: Vec<String>,
    #[source]
    source: ProviderError,
  },

  /// A package depends on itself, directly or transitively.
  #[error("dependency cycle: {}", .witness.join(" -> "))]
  CyclicDependency {
    /// The cycle, starting and ending with the same package.
    witness: Vec<String>,
  },

  #[error(transparent)]
  Settings(#[from] SettingsError),

  #[error(transparent)]
  PatchDiscovery(#[from] PatchDiscoveryError),

  /// A provider failed for a reason other than a missing candidate.
  #[error("failed to resolve '{requirement}': {source}")]
  Provider {
    requirement: String,
    #[source]
    source: ProviderError,
  },

  /// Dependency metadata could not be read.
  #[error("failed to read dependencies of {package}: {source}")]
  Metadata {
    package: String,
    #[source]
    source: ProviderError,
  },

  #[error(transparent)]
  Graph(#[from] GraphError),

  /// A worker task panicked or was cancelled.
  #[error("bootstrap task failed: {0}")]
  Task(String),
}
