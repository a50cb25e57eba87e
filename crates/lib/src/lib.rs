//! fromsource-lib: bootstrap resolver and build-order scheduler
//!
//! Rebuilds a tree of Python wheels from source. Starting from top-level
//! requirements, the crate discovers build and install dependencies,
//! resolves them to concrete versions and emits a build order in which
//! every package follows its dependencies.
//!
//! - `bootstrap`: recursive, concurrent dependency discovery
//! - `build_order`: topological ordering and the persisted `build-order.json`
//! - `settings`: per-package, per-variant overrides with `${VAR}` expansion
//! - `patches`: ordered patch selection per package version and variant
//! - `provider`: version resolution and dependency metadata interfaces
//! - `build`: build steps and the backend that turns them into wheels

pub mod bootstrap;
pub mod build;
pub mod build_order;
pub mod consts;
pub mod context;
pub mod graph;
pub mod hooks;
pub mod patches;
pub mod provider;
pub mod requirements;
pub mod settings;
pub mod template;
