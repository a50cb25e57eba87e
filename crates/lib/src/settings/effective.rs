//! Settings resolved for one package and variant.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::SettingsError;
use super::types::{DownloadSource, EnvVars, GitOptions, GlobalSettings, PackageSettings, ProjectOverride, ResolverDist};
use crate::requirements::{CanonicalName, Version};
use crate::template::{LookupChain, TemplateError, expand};

/// Which git submodules to check out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "paths", rename_all = "kebab-case")]
pub enum SubmodulePolicy {
  None,
  All,
  Paths(Vec<String>),
}

impl From<&GitOptions> for SubmodulePolicy {
  fn from(opts: &GitOptions) -> Self {
    if !opts.submodule_paths.is_empty() {
      SubmodulePolicy::Paths(opts.submodule_paths.clone())
    } else if opts.submodules {
      SubmodulePolicy::All
    } else {
      SubmodulePolicy::None
    }
  }
}

/// Configuration of one package for the active variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
  pub package: CanonicalName,
  pub variant: String,
  pub has_config: bool,

  /// Expanded environment, global entries first, variant overrides in place.
  pub env: EnvVars,

  pub submodules: SubmodulePolicy,
  pub pre_built: bool,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub wheel_server_url: Option<String>,

  pub resolver_dist: ResolverDist,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub build_dir: Option<PathBuf>,

  pub project_override: ProjectOverride,
  pub download_source: DownloadSource,

  #[serde(skip)]
  changelog: BTreeMap<Version, Vec<String>>,
  #[serde(skip)]
  variant_changelog_len: usize,
}

impl EffectiveConfig {
  /// Build tag for `version`: package changelog entries for the version plus
  /// the global changelog entries of the variant. Zero means untagged.
  pub fn build_tag(&self, version: &Version) -> u32 {
    let package = self.changelog.get(version).map_or(0, Vec::len);
    u32::try_from(package + self.variant_changelog_len).unwrap_or(u32::MAX)
  }

  /// Download URL for `version`, if the package overrides it.
  pub fn download_url(&self, version: &Version) -> Result<Option<String>, TemplateError> {
    self.download_template(self.download_source.url.as_deref(), version)
  }

  /// Archive file name for `version`, if the package overrides it.
  pub fn download_filename(&self, version: &Version) -> Result<Option<String>, TemplateError> {
    self.download_template(self.download_source.destination_filename.as_deref(), version)
  }

  fn download_template(&self, template: Option<&str>, version: &Version) -> Result<Option<String>, TemplateError> {
    let Some(template) = template else {
      return Ok(None);
    };
    let values = [
      ("canonicalized_name".to_string(), self.package.to_string()),
      ("version".to_string(), version.to_string()),
    ];
    expand(template, &LookupChain::default().local(&values)).map(Some)
  }
}

/// Resolve `settings` for `variant`.
pub(crate) fn resolve(
  settings: &PackageSettings,
  global: &GlobalSettings,
  environment: &BTreeMap<String, String>,
  variant: &str,
) -> Result<EffectiveConfig, SettingsError> {
  let package = settings.name.to_string();

  if !global.variants.is_empty() && !global.variants.iter().any(|v| v == variant) {
    return Err(SettingsError::Variant {
      package,
      variant: variant.to_string(),
      message: format!("unknown variant, expected one of: {}", global.variants.join(", ")),
    });
  }

  let info = settings.variant(variant);
  let pre_built = info.is_some_and(|i| i.pre_built);
  let wheel_server_url = info.and_then(|i| i.wheel_server_url.clone());

  let mut env = EnvVars::new();
  let global_entries = settings.env.iter().map(|(k, v)| (format!("env.{k}"), k, v));
  let variant_entries = info
    .into_iter()
    .flat_map(|i| i.env.iter())
    .map(|(k, v)| (format!("variants.{variant}.env.{k}"), k, v));

  for (field, key, raw) in global_entries.chain(variant_entries) {
    let chain = LookupChain::default()
      .local(env.as_slice())
      .global(global.env.as_slice())
      .environment(environment);
    let value = expand(raw, &chain).map_err(|source| SettingsError::Template {
      package: package.clone(),
      field,
      source,
    })?;
    env.set(key, value);
  }

  Ok(EffectiveConfig {
    package: settings.name.clone(),
    variant: variant.to_string(),
    has_config: settings.has_config,
    env,
    submodules: SubmodulePolicy::from(&settings.git_options),
    pre_built,
    wheel_server_url,
    resolver_dist: settings.resolver_dist.clone(),
    build_dir: settings.build_dir.clone(),
    project_override: settings.project_override.clone(),
    download_source: settings.download_source.clone(),
    changelog: settings.changelog.clone(),
    variant_changelog_len: global.variant_changelog(variant).len(),
  })
}
