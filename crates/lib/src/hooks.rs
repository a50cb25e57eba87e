//! Observer callbacks fired around bootstrap and build steps.
//!
//! Hooks are notified; they never change resolution or build results. Files
//! handed to a hook are not moved or renamed afterwards.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use crate::graph::ResolvedPackage;
use crate::settings::EffectiveConfig;

/// A set of optional callbacks. Every method defaults to doing nothing.
pub trait Hook: Send + Sync {
  /// Name used in logs.
  fn name(&self) -> &str;

  /// A package has been resolved and its dependencies discovered.
  fn post_bootstrap(&self, _pkg: &ResolvedPackage, _cfg: &EffectiveConfig) {}

  /// A wheel has been built from source.
  fn post_build(&self, _pkg: &ResolvedPackage, _sdist: &Path, _wheel: &Path) {}

  /// A prebuilt wheel has been downloaded.
  fn prebuilt_wheel(&self, _pkg: &ResolvedPackage, _wheel: &Path) {}

  /// Any wheel, built or downloaded, is ready for inspection.
  fn inspect_wheel(&self, _pkg: &ResolvedPackage, _wheel: &Path) {}
}

/// Registered hooks, called in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
  hooks: Vec<Arc<dyn Hook>>,
}

impl fmt::Debug for Hooks {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.hooks.iter().map(|h| h.name())).finish()
  }
}

impl Hooks {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, hook: Arc<dyn Hook>) {
    self.hooks.push(hook);
  }

  pub fn is_empty(&self) -> bool {
    self.hooks.is_empty()
  }

  pub fn post_bootstrap(&self, pkg: &ResolvedPackage, cfg: &EffectiveConfig) {
    for hook in &self.hooks {
      trace!(hook = hook.name(), package = %pkg.key, "post_bootstrap");
      hook.post_bootstrap(pkg, cfg);
    }
  }

  pub fn post_build(&self, pkg: &ResolvedPackage, sdist: &Path, wheel: &Path) {
    for hook in &self.hooks {
      trace!(hook = hook.name(), package = %pkg.key, "post_build");
      hook.post_build(pkg, sdist, wheel);
    }
  }

  pub fn prebuilt_wheel(&self, pkg: &ResolvedPackage, wheel: &Path) {
    for hook in &self.hooks {
      trace!(hook = hook.name(), package = %pkg.key, "prebuilt_wheel");
      hook.prebuilt_wheel(pkg, wheel);
    }
  }

  pub fn inspect_wheel(&self, pkg: &ResolvedPackage, wheel: &Path) {
    for hook in &self.hooks {
      trace!(hook = hook.name(), package = %pkg.key, "inspect_wheel");
      hook.inspect_wheel(pkg, wheel);
    }
  }
}
