//! Patch discovery.
//!
//! Patches for a package live under the patches root in up to four
//! directories:
//!
//! ```text
//! {root}/{name}/                      all versions, all variants
//! {root}/{name}/{variant}/            all versions, one variant
//! {root}/{name}-{version}/            one version, all variants
//! {root}/{name}-{version}/{variant}/  one version, one variant
//! ```
//!
//! Every `*.patch` file in these directories applies, ordered by file name
//! alone. The directory a patch comes from decides whether it applies, never
//! where it goes in the order, so maintainers interleave patches with numeric
//! prefixes (`001-`, `010-`, ...).

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::consts::PATCH_EXTENSION;
use crate::requirements::{OverrideName, Version};

/// Errors raised while discovering patches.
#[derive(Debug, Clone, Error)]
pub enum PatchDiscoveryError {
  #[error("cannot read patch directory {path}: {source}")]
  Unreadable {
    path: PathBuf,
    #[source]
    source: Arc<io::Error>,
  },

  #[error("patch '{name}' exists in both {} and {}", first.display(), second.display())]
  DuplicateBasename { name: String, first: PathBuf, second: PathBuf },
}

fn unreadable(path: &Path, err: walkdir::Error) -> PatchDiscoveryError {
  let source = err.into_io_error().unwrap_or_else(|| io::Error::other("filesystem loop"));
  PatchDiscoveryError::Unreadable {
    path: path.to_path_buf(),
    source: Arc::new(source),
  }
}

/// Immediate entries of `dir` that satisfy `keep`, sorted by name.
fn list_dir(dir: &Path, keep: impl Fn(&walkdir::DirEntry) -> bool) -> Result<Vec<PathBuf>, PatchDiscoveryError> {
  let mut out = Vec::new();
  for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| unreadable(dir, e))?;
    if keep(&entry) {
      out.push(entry.into_path());
    }
  }
  Ok(out)
}

/// Version-specific directories (`{name}-{version}`) matching `version`.
fn versioned_dirs(root: &Path, name: &OverrideName, version: &Version) -> Result<Vec<PathBuf>, PatchDiscoveryError> {
  if !root.is_dir() {
    return Ok(Vec::new());
  }
  let prefix = format!("{}-", name);
  list_dir(root, |entry| {
    entry.file_type().is_dir()
      && entry
        .file_name()
        .to_str()
        .and_then(|n| n.strip_prefix(&prefix))
        .and_then(|v| Version::parse(v).ok())
        .is_some_and(|v| v == *version)
  })
}

/// Ordered patch files for a package version and variant.
///
/// The local label of `version` is ignored: `1.0.3+local` uses the `1.0.3`
/// directories.
///
/// # Errors
///
/// - [`PatchDiscoveryError::Unreadable`] when a candidate directory exists but
///   cannot be listed
/// - [`PatchDiscoveryError::DuplicateBasename`] when two candidate directories
///   contain a patch with the same file name
pub fn select(
  name: &OverrideName,
  version: &Version,
  variant: &str,
  root: &Path,
) -> Result<Vec<PathBuf>, PatchDiscoveryError> {
  let stripped = version.public();

  let unversioned = root.join(name.as_str());
  let mut candidates = vec![unversioned.clone(), unversioned.join(variant)];
  for dir in versioned_dirs(root, name, &stripped)? {
    candidates.push(dir.join(variant));
    candidates.push(dir);
  }

  let mut pool: BTreeMap<String, PathBuf> = BTreeMap::new();
  for dir in candidates.iter().filter(|d| d.is_dir()) {
    let patches = list_dir(dir, |entry| {
      entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == PATCH_EXTENSION)
    })?;
    for patch in patches {
      let Some(basename) = patch.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
        continue;
      };
      trace!(package = %name, patch = %patch.display(), "found patch");
      if let Some(first) = pool.get(&basename) {
        return Err(PatchDiscoveryError::DuplicateBasename {
          name: basename,
          first: first.clone(),
          second: patch,
        });
      }
      pool.insert(basename, patch);
    }
  }

  debug!(package = %name, version = %version, variant, count = pool.len(), "selected patches");
  Ok(pool.into_values().collect())
}

/// Override names owning at least one patch directory under `root`.
pub fn patched_packages(root: &Path) -> Result<Vec<OverrideName>, PatchDiscoveryError> {
  if !root.is_dir() {
    return Ok(Vec::new());
  }
  let mut names: Vec<OverrideName> = list_dir(root, |entry| entry.file_type().is_dir())?
    .iter()
    .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()))
    .map(|dir_name| match dir_name.split_once('-') {
      Some((name, version)) if Version::parse(version).is_ok() => OverrideName::new(name),
      _ => OverrideName::new(dir_name),
    })
    .collect();
  names.sort();
  names.dedup();
  Ok(names)
}
