//! Loading and caching of settings files.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use tracing::{debug, trace};
use walkdir::WalkDir;

use super::SettingsError;
use super::effective::{self, EffectiveConfig};
use super::types::{DownloadSource, EnvVars, GlobalSettings, PackageSettings, VariantInfo};
use crate::consts::SETTINGS_EXTENSIONS;
use crate::patches;
use crate::requirements::{CanonicalName, OverrideName};
use crate::template::{LookupChain, expand};

/// Read-through store of package settings for one run.
#[derive(Debug)]
pub struct SettingsStore {
  settings_dir: PathBuf,
  global: GlobalSettings,
  environment: BTreeMap<String, String>,
  files: BTreeMap<OverrideName, Vec<PathBuf>>,
  cache: Mutex<HashMap<CanonicalName, Arc<PackageSettings>>>,
}

impl SettingsStore {
  /// Open a store over `settings_dir`, reading the global settings file if it exists.
  ///
  /// Global env values are expanded once here, against `environment`.
  pub fn open(
    global_file: &Path,
    settings_dir: &Path,
    environment: BTreeMap<String, String>,
  ) -> Result<Self, SettingsError> {
    let mut global = load_global(global_file)?;
    global.env = expand_global_env(&global, &environment, global_file)?;
    let files = index_settings_dir(settings_dir)?;
    debug!(
      settings_dir = %settings_dir.display(),
      packages = files.len(),
      "indexed settings files"
    );

    Ok(Self {
      settings_dir: settings_dir.to_path_buf(),
      global,
      environment,
      files,
      cache: Mutex::new(HashMap::new()),
    })
  }

  /// Store with no files, used when no settings directory exists.
  pub fn empty(environment: BTreeMap<String, String>) -> Self {
    Self {
      settings_dir: PathBuf::new(),
      global: GlobalSettings::default(),
      environment,
      files: BTreeMap::new(),
      cache: Mutex::new(HashMap::new()),
    }
  }

  pub fn settings_dir(&self) -> &Path {
    &self.settings_dir
  }

  pub fn global(&self) -> &GlobalSettings {
    &self.global
  }

  pub fn environment(&self) -> &BTreeMap<String, String> {
    &self.environment
  }

  /// Load the merged settings of a package.
  ///
  /// Files are merged in file-name order; later files override earlier ones
  /// field by field. A package without files gets default settings.
  pub fn load(&self, name: &CanonicalName) -> Result<Arc<PackageSettings>, SettingsError> {
    if let Some(hit) = self.cache_get(name) {
      trace!(package = %name, "settings cache hit");
      return Ok(hit);
    }

    let sources = self.files.get(&name.override_name()).map(Vec::as_slice).unwrap_or(&[]);
    let settings = Arc::new(parse_package(name, sources)?);

    let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
    Ok(cache.entry(name.clone()).or_insert(settings).clone())
  }

  fn cache_get(&self, name: &CanonicalName) -> Option<Arc<PackageSettings>> {
    let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
    cache.get(name).cloned()
  }

  /// Resolve a package's settings for `variant`.
  pub fn resolve(&self, settings: &PackageSettings, variant: &str) -> Result<EffectiveConfig, SettingsError> {
    effective::resolve(settings, &self.global, &self.environment, variant)
  }

  /// Load and resolve in one step.
  pub fn effective(&self, name: &CanonicalName, variant: &str) -> Result<EffectiveConfig, SettingsError> {
    let settings = self.load(name)?;
    self.resolve(&settings, variant)
  }

  /// Packages that have a settings file or a patch directory under `patches_root`.
  pub fn list_overrides(&self, patches_root: &Path) -> Result<Vec<OverrideName>, SettingsError> {
    let mut names: BTreeSet<OverrideName> = self.files.keys().cloned().collect();
    let patched =
      patches::patched_packages(patches_root).map_err(|e| SettingsError::io(patches_root, io::Error::other(e)))?;
    names.extend(patched);
    Ok(names.into_iter().collect())
  }

  /// Packages configured to use prebuilt wheels for `variant`.
  pub fn list_pre_built(&self, variant: &str) -> Result<Vec<CanonicalName>, SettingsError> {
    let mut out = Vec::new();
    for ov in self.files.keys() {
      let settings = self.load(&CanonicalName::new(ov.as_str()))?;
      if settings.variant(variant).is_some_and(|v| v.pre_built) {
        out.push(settings.name.clone());
      }
    }
    Ok(out)
  }
}

fn load_global(path: &Path) -> Result<GlobalSettings, SettingsError> {
  let raw = match fs::read_to_string(path) {
    Ok(raw) => raw,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(GlobalSettings::default()),
    Err(e) => return Err(SettingsError::io(path, e)),
  };
  let parse_err = |message: String| SettingsError::Parse {
    package: "<global>".to_string(),
    file: path.to_path_buf(),
    field: "<root>".to_string(),
    message,
  };

  match serde_yaml::from_str::<Value>(&raw).map_err(|e| parse_err(e.to_string()))? {
    Value::Null => Ok(GlobalSettings::default()),
    value => serde_yaml::from_value(value).map_err(|e| parse_err(e.to_string())),
  }
}

fn expand_global_env(
  global: &GlobalSettings,
  environment: &BTreeMap<String, String>,
  path: &Path,
) -> Result<EnvVars, SettingsError> {
  let mut resolved = EnvVars::new();
  for (key, raw) in global.env.iter() {
    let chain = LookupChain::default().local(resolved.as_slice()).environment(environment);
    let value = expand(raw, &chain).map_err(|source| SettingsError::Template {
      package: path.display().to_string(),
      field: format!("env.{key}"),
      source,
    })?;
    resolved.set(key, value);
  }
  Ok(resolved)
}

/// Group per-package settings files by override name, in file-name order.
fn index_settings_dir(dir: &Path) -> Result<BTreeMap<OverrideName, Vec<PathBuf>>, SettingsError> {
  let mut files: BTreeMap<OverrideName, Vec<PathBuf>> = BTreeMap::new();
  if !dir.is_dir() {
    return Ok(files);
  }

  for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| SettingsError::io(dir, io::Error::other(e)))?;
    let path = entry.path();
    let is_settings = entry.file_type().is_file()
      && path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SETTINGS_EXTENSIONS.contains(&e));
    if !is_settings {
      continue;
    }
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
      continue;
    };
    files.entry(OverrideName::new(stem)).or_default().push(path.to_path_buf());
  }

  Ok(files)
}

/// Parse and merge all settings files of one package.
fn parse_package(name: &CanonicalName, sources: &[PathBuf]) -> Result<PackageSettings, SettingsError> {
  let mut merged = Mapping::new();
  let mut origin: HashMap<String, PathBuf> = HashMap::new();

  for path in sources {
    debug!(package = %name, file = %path.display(), "loading settings file");
    let raw = fs::read_to_string(path).map_err(|e| SettingsError::io(path, e))?;
    let doc: Value = serde_yaml::from_str(&raw).map_err(|e| SettingsError::Parse {
      package: name.to_string(),
      file: path.clone(),
      field: "<root>".to_string(),
      message: e.to_string(),
    })?;
    let doc = match doc {
      Value::Null => Mapping::new(),
      Value::Mapping(map) => map,
      other => {
        return Err(SettingsError::Parse {
          package: name.to_string(),
          file: path.clone(),
          field: "<root>".to_string(),
          message: format!("expected a mapping, found {}", value_kind(&other)),
        });
      }
    };

    for (key, value) in doc {
      if let Some(k) = key.as_str() {
        origin.insert(k.to_string(), path.clone());
      }
      match merged.get_mut(&key) {
        Some(existing) => merge_values(existing, value),
        None => {
          merged.insert(key, value);
        }
      }
    }
  }

  let mut settings = PackageSettings::default_for(name.clone());
  settings.has_config = !sources.is_empty();

  for (key, value) in merged {
    let Some(field) = key.as_str().map(str::to_string) else {
      debug!(package = %name, "ignoring non-string settings key");
      continue;
    };
    let file = origin.get(&field).cloned().unwrap_or_default();
    let err = |field: String, message: String| SettingsError::Parse {
      package: name.to_string(),
      file: file.clone(),
      field: nested_field(&field, &message),
      message,
    };

    match field.as_str() {
      "build_dir" => {
        let dir: Option<PathBuf> = section(value).map_err(|m| err(field.clone(), m))?;
        if let Some(dir) = &dir
          && dir.is_absolute()
        {
          return Err(err(field.clone(), format!("'{}' is not a relative path", dir.display())));
        }
        settings.build_dir = dir;
      }
      "changelog" => settings.changelog = section(value).map_err(|m| err(field.clone(), m))?,
      "env" => settings.env = section(value).map_err(|m| err(field.clone(), m))?,
      "download_source" => {
        let ds: DownloadSource = section(value).map_err(|m| err(field.clone(), m))?;
        if ds.destination_filename.as_deref().is_some_and(|f| f.contains('/')) {
          return Err(err(
            "download_source.destination_filename".to_string(),
            "must not contain a path separator".to_string(),
          ));
        }
        settings.download_source = ds;
      }
      "resolver_dist" | "resolve_source" => {
        settings.resolver_dist = section(value).map_err(|m| err(field.clone(), m))?;
      }
      "git_options" => settings.git_options = section(value).map_err(|m| err(field.clone(), m))?,
      "project_override" => settings.project_override = section(value).map_err(|m| err(field.clone(), m))?,
      "variants" => {
        let variants: Mapping = section(value).map_err(|m| err(field.clone(), m))?;
        for (variant, info) in variants {
          let variant_name = variant
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| err(field.clone(), "variant names must be strings".to_string()))?;
          let info: VariantInfo = section(info).map_err(|m| err(format!("variants.{variant_name}"), m))?;
          settings.variants.insert(variant_name, info);
        }
      }
      _ => debug!(package = %name, field = %field, "ignoring unknown settings field"),
    }
  }

  Ok(settings)
}

/// Deserialize one section, treating `null` as the default value.
fn section<T: DeserializeOwned + Default>(value: Value) -> Result<T, String> {
  match value {
    Value::Null => Ok(T::default()),
    value => serde_yaml::from_value(value).map_err(|e| e.to_string()),
  }
}

/// `section.key` when `message` reports an unknown key, else `section`.
fn nested_field(section: &str, message: &str) -> String {
  message
    .split_once("unknown field `")
    .and_then(|(_, rest)| rest.split_once('`'))
    .map_or_else(|| section.to_string(), |(key, _)| format!("{section}.{key}"))
}

/// Recursively merge `overlay` into `base`. Mappings merge, anything else is replaced.
fn merge_values(base: &mut Value, overlay: Value) {
  match (base, overlay) {
    (Value::Mapping(base), Value::Mapping(overlay)) => {
      for (key, value) in overlay {
        match base.get_mut(&key) {
          Some(existing) => merge_values(existing, value),
          None => {
            base.insert(key, value);
          }
        }
      }
    }
    (base, overlay) => *base = overlay,
  }
}

fn value_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Sequence(_) => "a sequence",
    Value::Mapping(_) => "a mapping",
    Value::Tagged(_) => "a tagged value",
  }
}
