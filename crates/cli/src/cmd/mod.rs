mod bootstrap;
mod build_order;
mod overrides;
mod plan;
mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use fromsource_lib::consts::{DEFAULT_VARIANT, GLOBAL_SETTINGS_FILENAME};
use fromsource_lib::context::RunContext;

pub use bootstrap::{BootstrapArgs, cmd_bootstrap};
pub use build_order::{BuildOrderCommand, cmd_build_order};
pub use overrides::cmd_list_overrides;
pub use plan::cmd_plan;
pub use settings::{SettingsCommand, cmd_settings};

/// Where settings and patches live, and which variant to use.
#[derive(Args, Debug, Clone)]
pub struct ContextArgs {
  /// Directory of per-package settings files
  #[arg(long, default_value = "overrides/settings")]
  pub settings_dir: PathBuf,

  /// Global settings file (default: settings.yaml next to the settings directory)
  #[arg(long)]
  pub settings_file: Option<PathBuf>,

  /// Directory of per-package patch directories
  #[arg(long, default_value = "overrides/patches")]
  pub patches_dir: PathBuf,

  /// Build variant
  #[arg(long, default_value = DEFAULT_VARIANT)]
  pub variant: String,
}

impl ContextArgs {
  fn global_settings(&self) -> PathBuf {
    if let Some(file) = &self.settings_file {
      return file.clone();
    }
    let dir = dunce::canonicalize(&self.settings_dir).unwrap_or_else(|_| self.settings_dir.clone());
    dir
      .parent()
      .map(|p| p.join(GLOBAL_SETTINGS_FILENAME))
      .unwrap_or_else(|| PathBuf::from(GLOBAL_SETTINGS_FILENAME))
  }

  pub fn open(&self) -> Result<RunContext> {
    let settings_file = self.global_settings();
    RunContext::from_dirs(&settings_file, &self.settings_dir, &self.patches_dir, &self.variant)
      .with_context(|| format!("Failed to load settings from {}", self.settings_dir.display()))
  }
}
