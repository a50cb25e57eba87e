//! Per-run state shared by the engine and the build planner.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::patches::{self, PatchDiscoveryError};
use crate::requirements::{CanonicalName, MarkerEnvironment, Requirement, Version};
use crate::settings::{EffectiveConfig, SettingsError, SettingsStore};

/// Everything one run needs: active variant, target environment, settings
/// and patch locations.
///
/// A context owns its caches, so separate runs never share state.
#[derive(Debug)]
pub struct RunContext {
  variant: String,
  patches_dir: PathBuf,
  settings: SettingsStore,
  markers: MarkerEnvironment,
}

impl RunContext {
  pub fn new(variant: impl Into<String>, patches_dir: impl Into<PathBuf>, settings: SettingsStore) -> Self {
    Self {
      variant: variant.into(),
      patches_dir: patches_dir.into(),
      settings,
      markers: MarkerEnvironment::host(),
    }
  }

  /// Evaluate requirement markers against `markers` instead of the host.
  pub fn with_markers(mut self, markers: MarkerEnvironment) -> Self {
    self.markers = markers;
    self
  }

  /// Build a context from on-disk locations, snapshotting the process environment.
  ///
  /// Fails early when the variant is not in the global `variants` list.
  pub fn from_dirs(
    settings_file: &Path,
    settings_dir: &Path,
    patches_dir: &Path,
    variant: &str,
  ) -> Result<Self, SettingsError> {
    let environment: BTreeMap<String, String> = std::env::vars().collect();
    let settings = SettingsStore::open(settings_file, settings_dir, environment)?;

    let known = &settings.global().variants;
    if !known.is_empty() && !known.iter().any(|v| v == variant) {
      return Err(SettingsError::Variant {
        package: settings_file.display().to_string(),
        variant: variant.to_string(),
        message: format!("unknown variant, expected one of: {}", known.join(", ")),
      });
    }

    info!(
      variant,
      settings_dir = %settings_dir.display(),
      patches_dir = %patches_dir.display(),
      "run context ready"
    );
    Ok(Self::new(variant, patches_dir, settings))
  }

  pub fn variant(&self) -> &str {
    &self.variant
  }

  pub fn patches_dir(&self) -> &Path {
    &self.patches_dir
  }

  pub fn settings(&self) -> &SettingsStore {
    &self.settings
  }

  pub fn markers(&self) -> &MarkerEnvironment {
    &self.markers
  }

  /// Whether `req` applies to the target environment when requested with `extras`.
  pub fn applies(&self, req: &Requirement, extras: &BTreeSet<String>) -> bool {
    req.is_active(&self.markers, extras)
  }

  /// Effective configuration of a package for the active variant.
  pub fn effective(&self, name: &CanonicalName) -> Result<EffectiveConfig, SettingsError> {
    self.settings.effective(name, &self.variant)
  }

  /// Ordered patches of a package version for the active variant.
  pub fn patches(&self, name: &CanonicalName, version: &Version) -> Result<Vec<PathBuf>, PatchDiscoveryError> {
    patches::select(&name.override_name(), version, &self.variant, &self.patches_dir)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use std::fs;
  use tempfile::TempDir;

  #[test]
  #[serial]
  fn from_dirs_snapshots_environment() {
    let temp = TempDir::new().unwrap();
    let settings_dir = temp.path().join("settings");
    fs::create_dir_all(&settings_dir).unwrap();
    fs::write(settings_dir.join("pkg.yaml"), "env:\n  OPT: ${FROMSOURCE_TEST_OPT:-none}\n").unwrap();

    let ctx = temp_env::with_var("FROMSOURCE_TEST_OPT", Some("-O3"), || {
      RunContext::from_dirs(
        &temp.path().join("settings.yaml"),
        &settings_dir,
        &temp.path().join("patches"),
        "cpu",
      )
      .unwrap()
    });

    // The snapshot outlives the variable.
    let cfg = ctx.effective(&CanonicalName::new("pkg")).unwrap();
    assert_eq!(cfg.env.get("OPT"), Some("-O3"));
    assert_eq!(ctx.variant(), "cpu");
  }

  #[test]
  #[serial]
  fn from_dirs_rejects_unknown_variant() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("settings.yaml"), "variants: [cpu, cuda]\n").unwrap();
    let err = RunContext::from_dirs(
      &temp.path().join("settings.yaml"),
      &temp.path().join("settings"),
      &temp.path().join("patches"),
      "rocm",
    )
    .unwrap_err();
    assert!(matches!(err, SettingsError::Variant { .. }));
  }

  #[test]
  fn markers_follow_target_environment() {
    let ctx = RunContext::new("cpu", "patches", SettingsStore::empty(BTreeMap::new()))
      .with_markers(MarkerEnvironment::host().with_python_version("3.9"));
    let req: Requirement = "tomli; python_version < '3.11'".parse().unwrap();

    assert_eq!(ctx.markers().python_version, "3.9");
    assert!(ctx.applies(&req, &BTreeSet::new()));
  }

  #[test]
  fn patches_use_active_variant() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("patches/pkg_name/cuda");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("001-gpu.patch"), "").unwrap();

    let version = Version::parse("1.0").unwrap();
    let name = CanonicalName::new("pkg-name");
    let store = || SettingsStore::empty(BTreeMap::new());
    let cuda = RunContext::new("cuda", temp.path().join("patches"), store());
    let cpu = RunContext::new("cpu", temp.path().join("patches"), store());

    assert_eq!(cuda.patches(&name, &version).unwrap().len(), 1);
    assert!(cpu.patches(&name, &version).unwrap().is_empty());
  }
}
