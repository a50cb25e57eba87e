//! Build order computation and persistence.
//!
//! The build order lists every resolved package so that dependencies come
//! before their dependents. Ties are broken by (name, version), so the same
//! graph always produces the same order.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "variant": "cpu",
//!   "entries": [
//!     {
//!       "name": "setuptools",
//!       "version": "69.0.0",
//!       "variant": "cpu",
//!       "source": "from-source",
//!       "url": "https://pypi.org/simple/setuptools/setuptools-69.0.0.tar.gz",
//!       "dependencies": []
//!     }
//!   ]
//! }
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::BUILD_ORDER_VERSION;
use crate::graph::{DependencyGraph, EdgeKind, NodeKey, SourceKind};
use crate::requirements::{CanonicalName, Version};

/// A dependency of a build order entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryDependency {
  pub name: CanonicalName,
  pub version: Version,
  pub kind: EdgeKind,
}

/// One package in the build order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOrderEntry {
  pub name: CanonicalName,
  pub version: Version,
  pub variant: String,
  pub source: SourceKind,
  pub url: String,
  #[serde(default)]
  pub dependencies: Vec<EntryDependency>,
}

impl BuildOrderEntry {
  pub fn key(&self) -> NodeKey {
    NodeKey::new(self.name.clone(), self.version.clone(), self.variant.clone())
  }
}

/// Errors raised while computing, reading or writing a build order.
#[derive(Debug, Clone, Error)]
pub enum BuildOrderError {
  /// The graph has a cycle; the witness starts and ends with the same package.
  #[error("dependency cycle: {}", .0.join(" -> "))]
  Cycle(Vec<String>),

  #[error("failed to read build order {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: Arc<io::Error>,
  },

  #[error("failed to write build order {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: Arc<io::Error>,
  },

  #[error("failed to parse build order {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("failed to serialize build order: {0}")]
  Serialize(String),

  #[error("unsupported build order version {0}, expected {BUILD_ORDER_VERSION}")]
  UnsupportedVersion(u32),
}

/// The persisted, ordered list of packages to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOrder {
  pub version: u32,
  pub variant: String,
  pub entries: Vec<BuildOrderEntry>,
}

impl BuildOrder {
  pub fn new(variant: impl Into<String>) -> Self {
    Self {
      version: BUILD_ORDER_VERSION,
      variant: variant.into(),
      entries: Vec::new(),
    }
  }

  /// Topologically sort a completed graph.
  ///
  /// # Errors
  ///
  /// Returns [`BuildOrderError::Cycle`] if any node can never become ready.
  pub fn from_graph(graph: &DependencyGraph, variant: &str) -> Result<Self, BuildOrderError> {
    let nodes = graph.nodes();
    let mut remaining: HashMap<&NodeKey, usize> = HashMap::new();
    let mut dependents: HashMap<NodeKey, Vec<NodeKey>> = HashMap::new();
    let mut ready: BinaryHeap<Reverse<&NodeKey>> = BinaryHeap::new();

    for pkg in &nodes {
      let deps = graph.dependency_keys(&pkg.key);
      for dep in &deps {
        dependents.entry(dep.clone()).or_default().push(pkg.key.clone());
      }
      if deps.is_empty() {
        ready.push(Reverse(&pkg.key));
      }
      remaining.insert(&pkg.key, deps.len());
    }

    let mut order = BuildOrder::new(variant);
    while let Some(Reverse(key)) = ready.pop() {
      let Some(pkg) = graph.get(key) else {
        continue;
      };

      let mut dependencies: Vec<EntryDependency> = graph
        .dependencies(key)
        .into_iter()
        .map(|(dep, edge)| EntryDependency {
          name: dep.key.name.clone(),
          version: dep.key.version.clone(),
          kind: edge.kind,
        })
        .collect();
      dependencies.sort();

      order.entries.push(BuildOrderEntry {
        name: pkg.key.name.clone(),
        version: pkg.key.version.clone(),
        variant: pkg.key.variant.clone(),
        source: pkg.source,
        url: pkg.url.clone(),
        dependencies,
      });

      for dependent in dependents.get(key).map(Vec::as_slice).unwrap_or(&[]) {
        if let Some((k, count)) = remaining.get_key_value(dependent).map(|(k, c)| (*k, *c)) {
          remaining.insert(k, count - 1);
          if count == 1 {
            ready.push(Reverse(k));
          }
        }
      }
    }

    if order.entries.len() != nodes.len() {
      let witness = graph
        .find_cycle()
        .unwrap_or_default()
        .iter()
        .map(ToString::to_string)
        .collect();
      return Err(BuildOrderError::Cycle(witness));
    }

    debug!(entries = order.entries.len(), variant, "computed build order");
    Ok(order)
  }

  /// Load a build order file.
  pub fn load(path: &Path) -> Result<Self, BuildOrderError> {
    let content = fs::read_to_string(path).map_err(|e| BuildOrderError::Read {
      path: path.to_path_buf(),
      source: Arc::new(e),
    })?;
    let order: BuildOrder = serde_json::from_str(&content).map_err(|e| BuildOrderError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;

    if order.version != BUILD_ORDER_VERSION {
      return Err(BuildOrderError::UnsupportedVersion(order.version));
    }
    Ok(order)
  }

  /// Write the build order as pretty-printed JSON.
  pub fn save(&self, path: &Path) -> Result<(), BuildOrderError> {
    let write_err = |e: io::Error| BuildOrderError::Write {
      path: path.to_path_buf(),
      source: Arc::new(e),
    };
    let mut content = serde_json::to_string_pretty(self).map_err(|e| BuildOrderError::Serialize(e.to_string()))?;
    content.push('\n');
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, content).map_err(write_err)
  }

  /// Entry for a package version, any variant.
  pub fn find(&self, name: &CanonicalName, version: &Version) -> Option<&BuildOrderEntry> {
    self.entries.iter().find(|e| e.name == *name && e.version == *version)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// `name==version` constraint lines, one per distinct pin, in build order.
  pub fn constraints(&self) -> String {
    let mut seen = BTreeSet::new();
    let mut out = String::new();
    for entry in &self.entries {
      if seen.insert((&entry.name, &entry.version)) {
        out.push_str(&format!("{}=={}\n", entry.name, entry.version));
      }
    }
    out
  }
}
