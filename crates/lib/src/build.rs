//! Build planning and the source backend interface.
//!
//! A [`BuildOrder`] is turned into [`BuildStep`]s: one per entry, carrying the
//! patches, environment and build tag the package is built with. Compiling
//! is left to a [`SourceBackend`]; [`run_steps`] only sequences the backend
//! and notifies hooks once each artifact exists.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::build_order::{BuildOrder, BuildOrderEntry};
use crate::context::RunContext;
use crate::graph::{ResolvedPackage, SourceKind};
use crate::hooks::Hooks;
use crate::patches::PatchDiscoveryError;
use crate::provider::ArtifactKinds;
use crate::settings::{EnvVars, SettingsError, SubmodulePolicy};
use crate::template::TemplateError;

/// Error type returned by backends.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("build order targets variant '{order}' but the run uses '{context}'")]
  VariantMismatch { order: String, context: String },

  #[error(transparent)]
  Settings(#[from] SettingsError),

  #[error(transparent)]
  Patches(#[from] PatchDiscoveryError),

  #[error("invalid download_source for {package}: {source}")]
  Template {
    package: String,
    #[source]
    source: TemplateError,
  },

  #[error("{stage} failed for {package}: {source}")]
  Backend {
    package: String,
    stage: &'static str,
    #[source]
    source: BackendError,
  },
}

/// Everything needed to produce one entry of a build order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStep {
  pub entry: BuildOrderEntry,
  /// Patches to apply, in order. Empty unless built from source.
  pub patches: Vec<PathBuf>,
  pub env: EnvVars,
  /// Zero means untagged.
  pub build_tag: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub build_dir: Option<PathBuf>,
  /// Archive URL, after `download_source` overrides.
  pub download_url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub download_filename: Option<String>,
  pub submodules: SubmodulePolicy,
}

impl BuildStep {
  /// The package as seen by hooks.
  pub fn package(&self) -> ResolvedPackage {
    let kinds = match self.entry.source {
      SourceKind::Prebuilt => ArtifactKinds::WHEEL,
      _ => ArtifactKinds::SDIST,
    };
    ResolvedPackage {
      key: self.entry.key(),
      source: self.entry.source,
      url: self.entry.url.clone(),
      kinds,
    }
  }
}

/// Produces artifacts for build steps.
#[async_trait]
pub trait SourceBackend: Send + Sync {
  /// Fetch the source archive of `step`.
  async fn download_source(&self, step: &BuildStep) -> Result<PathBuf, BackendError>;

  /// Unpack `archive` and apply the step's patches; returns the source tree.
  async fn prepare_source(&self, step: &BuildStep, archive: &Path) -> Result<PathBuf, BackendError>;

  /// Build a wheel from a prepared source tree.
  async fn build_wheel(&self, step: &BuildStep, source_tree: &Path) -> Result<PathBuf, BackendError>;

  /// Fetch the prebuilt wheel of `step`.
  async fn download_wheel(&self, step: &BuildStep) -> Result<PathBuf, BackendError>;
}

/// Artifacts produced for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
  pub package: ResolvedPackage,
  pub sdist: Option<PathBuf>,
  pub wheel: PathBuf,
}

/// Derive one step per entry of `order`.
pub fn plan_steps(order: &BuildOrder, ctx: &RunContext) -> Result<Vec<BuildStep>, BuildError> {
  if order.variant != ctx.variant() {
    return Err(BuildError::VariantMismatch {
      order: order.variant.clone(),
      context: ctx.variant().to_string(),
    });
  }

  order
    .entries
    .iter()
    .map(|entry| -> Result<BuildStep, BuildError> {
      let cfg = ctx.effective(&entry.name)?;
      let template_err = |source| BuildError::Template {
        package: entry.name.to_string(),
        source,
      };

      let patches = match entry.source {
        SourceKind::FromSource => ctx.patches(&entry.name, &entry.version)?,
        _ => Vec::new(),
      };
      let download_url = cfg
        .download_url(&entry.version)
        .map_err(template_err)?
        .unwrap_or_else(|| entry.url.clone());
      let download_filename = cfg.download_filename(&entry.version).map_err(template_err)?;

      debug!(
        package = %entry.name,
        version = %entry.version,
        patches = patches.len(),
        "planned build step"
      );
      Ok(BuildStep {
        patches,
        build_tag: cfg.build_tag(&entry.version),
        build_dir: cfg.build_dir.clone(),
        download_url,
        download_filename,
        submodules: cfg.submodules.clone(),
        env: cfg.env,
        entry: entry.clone(),
      })
    })
    .collect()
}

/// Drive `backend` over `steps` in order.
///
/// `already-satisfied` entries are skipped. The first backend failure stops
/// the run.
pub async fn run_steps(
  steps: &[BuildStep],
  backend: &dyn SourceBackend,
  hooks: &Hooks,
) -> Result<Vec<BuiltArtifact>, BuildError> {
  let mut built = Vec::with_capacity(steps.len());

  for step in steps {
    let package = step.package();
    let fail = |stage: &'static str| {
      let name = package.key.to_string();
      move |source: BackendError| BuildError::Backend {
        package: name,
        stage,
        source,
      }
    };

    match step.entry.source {
      SourceKind::AlreadySatisfied => {
        debug!(package = %package.key, "already built, skipping");
      }
      SourceKind::Prebuilt => {
        let wheel = backend.download_wheel(step).await.map_err(fail("download_wheel"))?;
        hooks.prebuilt_wheel(&package, &wheel);
        hooks.inspect_wheel(&package, &wheel);
        info!(package = %package.key, wheel = %wheel.display(), "downloaded prebuilt wheel");
        built.push(BuiltArtifact {
          package,
          sdist: None,
          wheel,
        });
      }
      SourceKind::FromSource => {
        let sdist = backend.download_source(step).await.map_err(fail("download_source"))?;
        let tree = backend
          .prepare_source(step, &sdist)
          .await
          .map_err(fail("prepare_source"))?;
        let wheel = backend.build_wheel(step, &tree).await.map_err(fail("build_wheel"))?;
        hooks.post_build(&package, &sdist, &wheel);
        hooks.inspect_wheel(&package, &wheel);
        info!(package = %package.key, wheel = %wheel.display(), "built wheel");
        built.push(BuiltArtifact {
          package,
          sdist: Some(sdist),
          wheel,
        });
      }
    }
  }

  Ok(built)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::DependencyGraph;
  use crate::graph::tests::package;
  use crate::hooks::tests::Recorder;
  use crate::settings::SettingsStore;
  use std::collections::BTreeMap;
  use std::fs;
  use std::sync::{Arc, Mutex};
  use tempfile::TempDir;

  struct Fixture {
    temp: TempDir,
  }

  impl Fixture {
    fn new() -> Self {
      let temp = TempDir::new().unwrap();
      fs::create_dir_all(temp.path().join("settings")).unwrap();
      Self { temp }
    }

    fn write(&self, rel: &str, content: &str) -> &Self {
      let path = self.temp.path().join(rel);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, content).unwrap();
      self
    }

    fn context(&self, variant: &str) -> RunContext {
      let root = self.temp.path();
      let env = BTreeMap::from([("HOME".to_string(), "/home/builder".to_string())]);
      let store = SettingsStore::open(&root.join("settings.yaml"), &root.join("settings"), env).unwrap();
      RunContext::new(variant, root.join("patches"), store)
    }
  }

  fn order(packages: Vec<ResolvedPackage>) -> BuildOrder {
    let mut graph = DependencyGraph::new();
    for pkg in packages {
      graph.add_node(pkg);
    }
    BuildOrder::from_graph(&graph, "cpu").unwrap()
  }

  fn with_source(mut pkg: ResolvedPackage, source: SourceKind) -> ResolvedPackage {
    pkg.source = source;
    pkg
  }

  mod planning {
    use super::*;

    #[test]
    fn steps_carry_settings_and_patches() {
      let fx = Fixture::new();
      fx.write(
        "settings/app.yaml",
        r#"
changelog:
  "1.0": [rebuild for new compiler]
env:
  CACHE: ${HOME}/.cache
download_source:
  url: https://src.test/${canonicalized_name}/v${version}.tar.gz
  destination_filename: ${canonicalized_name}-${version}.tar.gz
git_options:
  submodules: true
"#,
      )
      .write("patches/app/001-first.patch", "")
      .write("patches/app-1.0/002-second.patch", "");

      let steps = plan_steps(&order(vec![package("app", "1.0")]), &fx.context("cpu")).unwrap();
      assert_eq!(steps.len(), 1);

      let step = &steps[0];
      let names: Vec<_> = step.patches.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
      assert_eq!(names, ["001-first.patch", "002-second.patch"]);
      assert_eq!(step.env.get("CACHE"), Some("/home/builder/.cache"));
      assert_eq!(step.build_tag, 1);
      assert_eq!(step.download_url, "https://src.test/app/v1.0.tar.gz");
      assert_eq!(step.download_filename.as_deref(), Some("app-1.0.tar.gz"));
      assert_eq!(step.submodules, SubmodulePolicy::All);
    }

    #[test]
    fn unconfigured_packages_use_order_url() {
      let fx = Fixture::new();
      fx.write("patches/lib/001.patch", "");
      let prebuilt = with_source(package("lib", "2.0"), SourceKind::Prebuilt);
      let steps = plan_steps(&order(vec![prebuilt.clone()]), &fx.context("cpu")).unwrap();

      assert_eq!(steps[0].download_url, prebuilt.url);
      assert!(steps[0].patches.is_empty());
      assert_eq!(steps[0].build_tag, 0);
      assert_eq!(steps[0].package().kinds, ArtifactKinds::WHEEL);
    }

    #[test]
    fn variant_must_match() {
      let fx = Fixture::new();
      let err = plan_steps(&order(vec![package("app", "1.0")]), &fx.context("cuda")).unwrap_err();
      assert!(matches!(err, BuildError::VariantMismatch { .. }));
    }
  }

  /// Writes placeholder files and records the calls it receives.
  struct FakeBackend {
    out: PathBuf,
    calls: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
  }

  impl FakeBackend {
    fn new(out: &Path) -> Self {
      Self {
        out: out.to_path_buf(),
        calls: Mutex::new(Vec::new()),
        fail_on: None,
      }
    }

    fn produce(&self, stage: &str, step: &BuildStep, file: String) -> Result<PathBuf, BackendError> {
      self.calls.lock().unwrap().push(format!("{stage} {}", step.entry.name));
      if self.fail_on == Some(step.entry.name.as_str()) {
        return Err(format!("{stage} exploded").into());
      }
      let path = self.out.join(file);
      fs::write(&path, "")?;
      Ok(path)
    }
  }

  #[async_trait]
  impl SourceBackend for FakeBackend {
    async fn download_source(&self, step: &BuildStep) -> Result<PathBuf, BackendError> {
      let e = &step.entry;
      self.produce("download_source", step, format!("{}-{}.tar.gz", e.name, e.version))
    }

    async fn prepare_source(&self, step: &BuildStep, _archive: &Path) -> Result<PathBuf, BackendError> {
      self.calls.lock().unwrap().push(format!("prepare_source {}", step.entry.name));
      Ok(self.out.clone())
    }

    async fn build_wheel(&self, step: &BuildStep, _tree: &Path) -> Result<PathBuf, BackendError> {
      let e = &step.entry;
      self.produce("build_wheel", step, format!("{}-{}-py3-none-any.whl", e.name, e.version))
    }

    async fn download_wheel(&self, step: &BuildStep) -> Result<PathBuf, BackendError> {
      let e = &step.entry;
      self.produce("download_wheel", step, format!("{}-{}-py3-none-any.whl", e.name, e.version))
    }
  }

  mod running {
    use super::*;

    fn steps(fx: &Fixture) -> Vec<BuildStep> {
      let packages = vec![
        package("app", "1.0"),
        with_source(package("done", "1.0"), SourceKind::AlreadySatisfied),
        with_source(package("tool", "3.0"), SourceKind::Prebuilt),
      ];
      plan_steps(&order(packages), &fx.context("cpu")).unwrap()
    }

    #[tokio::test]
    async fn drives_backend_and_hooks_in_order() {
      let fx = Fixture::new();
      let out = TempDir::new().unwrap();
      let backend = FakeBackend::new(out.path());
      let recorder = Arc::new(Recorder::default());
      let mut hooks = Hooks::new();
      hooks.register(recorder.clone());

      let built = run_steps(&steps(&fx), &backend, &hooks).await.unwrap();

      assert_eq!(
        *backend.calls.lock().unwrap(),
        [
          "download_source app",
          "prepare_source app",
          "build_wheel app",
          "download_wheel tool"
        ]
      );
      assert_eq!(
        recorder.events(),
        [
          "post_build app",
          "inspect_wheel app",
          "prebuilt_wheel tool",
          "inspect_wheel tool"
        ]
      );
      assert_eq!(built.len(), 2);
      // Hooks see the final location; nothing moves afterwards.
      assert!(built.iter().all(|a| a.wheel.exists()));
      assert!(built[1].sdist.is_none());
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
      let fx = Fixture::new();
      let out = TempDir::new().unwrap();
      let backend = FakeBackend {
        fail_on: Some("app"),
        ..FakeBackend::new(out.path())
      };

      let err = run_steps(&steps(&fx), &backend, &Hooks::new()).await.unwrap_err();
      match err {
        BuildError::Backend { package, stage, .. } => {
          assert!(package.starts_with("app==1.0"));
          assert_eq!(stage, "download_source");
        }
        other => panic!("unexpected error: {other}"),
      }
      assert_eq!(backend.calls.lock().unwrap().len(), 1);
    }
  }
}
