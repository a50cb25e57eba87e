//! CLI smoke tests for fromsource.
//!
//! These tests run the binary against small on-disk fixtures and check exit
//! codes and the files and text it produces.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the fromsource binary.
fn fromsource_cmd() -> Command {
  cargo_bin_cmd!("fromsource")
}

const CATALOG: &str = r#"
indexes:
  https://pypi.org/simple:
    my-app:
      - version: "1.0"
        build_system: ["setuptools>=60"]
        install: ["requests>=2"]
    setuptools:
      - version: "69.0.0"
      - version: "70.1.0"
    requests:
      - version: "2.32.3"
        install: [idna]
    idna:
      - version: "3.7"
    legacy-shim:
      - version: "1.0"
        install: ["idna; python_version < '3.0'"]
    loop-a:
      - version: "1.0"
        build_system: [loop-b]
    loop-b:
      - version: "1.0"
        build_system: [loop-a]
"#;

/// A workspace with a catalog, settings and patches.
struct Workspace {
  temp: TempDir,
}

impl Workspace {
  fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let ws = Self { temp };
    ws.write("catalog.yaml", CATALOG)
      .write("overrides/settings.yaml", "variants: [cpu, cuda]\n")
      .write(
        "overrides/settings/my_app.yaml",
        "changelog:\n  \"1.0\": [first rebuild]\nenv:\n  OPT_LEVEL: \"${OPT_LEVEL:-2}\"\n",
      )
      .write("overrides/patches/my_app/001-fix-build.patch", "--- a\n+++ b\n")
      .write("requirements.txt", "# top level\nmy-app>=1\n");
    ws
  }

  fn write(&self, rel: &str, content: &str) -> &Self {
    let path = self.temp.path().join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    self
  }

  fn path(&self, rel: &str) -> PathBuf {
    self.temp.path().join(rel)
  }

  fn cmd(&self) -> Command {
    let mut cmd = fromsource_cmd();
    cmd.current_dir(self.temp.path()).env_remove("RUST_LOG");
    cmd
  }

  fn bootstrap(&self) -> PathBuf {
    self
      .cmd()
      .args(["bootstrap", "-r", "requirements.txt", "--catalog", "catalog.yaml"])
      .assert()
      .success();
    self.path("build-order.json")
  }
}

fn read(path: &Path) -> String {
  fs::read_to_string(path).unwrap()
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  fromsource_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  fromsource_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("fromsource"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["bootstrap", "build-order", "plan", "list-overrides", "settings"] {
    fromsource_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// bootstrap
// =============================================================================

#[test]
fn bootstrap_writes_build_order() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["bootstrap", "-r", "requirements.txt", "--catalog", "catalog.yaml"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Resolved 4 packages"));

  let order = read(&ws.path("build-order.json"));
  let pos = |name: &str| order.find(&format!("\"name\": \"{name}\"")).unwrap();
  assert!(pos("setuptools") < pos("my-app"));
  assert!(pos("idna") < pos("requests"));
  assert!(order.contains("\"version\": \"70.1.0\""));
}

#[test]
fn bootstrap_json_summary() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["--format", "json", "bootstrap", "my-app", "--catalog", "catalog.yaml", "-o", "out.json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"packages\": 4"))
    .stdout(predicate::str::contains("\"from_source\": 4"));
  assert!(ws.path("out.json").exists());
}

#[test]
fn bootstrap_with_previous_order_skips_build_dependencies() {
  let ws = Workspace::new();
  ws.bootstrap();
  ws.cmd()
    .args([
      "--format",
      "json",
      "bootstrap",
      "my-app",
      "--catalog",
      "catalog.yaml",
      "--previous",
      "build-order.json",
      "-o",
      "second.json",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"packages\": 3"))
    .stdout(predicate::str::contains("\"already_satisfied\": 3"));
}

#[test]
fn bootstrap_evaluates_markers_for_target_python() {
  let ws = Workspace::new();
  let run = |python: &str| {
    ws.cmd()
      .args(["--format", "json", "bootstrap", "legacy-shim", "--catalog", "catalog.yaml"])
      .args(["--python-version", python])
      .assert()
      .success()
  };
  run("3.12").stdout(predicate::str::contains("\"packages\": 1,"));
  run("2.7").stdout(predicate::str::contains("\"packages\": 2,"));
}

#[test]
fn bootstrap_reports_unresolvable_requirement() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["bootstrap", "missing-pkg>=1", "--catalog", "catalog.yaml"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unable to resolve 'missing-pkg>=1'"));
  assert!(!ws.path("build-order.json").exists());
}

#[test]
fn bootstrap_reports_cycles() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["bootstrap", "loop-a", "--catalog", "catalog.yaml"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn bootstrap_rejects_unknown_variant() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["bootstrap", "my-app", "--catalog", "catalog.yaml", "--variant", "rocm"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown variant"));
}

#[test]
fn bootstrap_requires_requirements() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["bootstrap", "--catalog", "catalog.yaml"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("No requirements given"));
}

// =============================================================================
// build-order, plan
// =============================================================================

#[test]
fn build_order_show_lists_entries() {
  let ws = Workspace::new();
  ws.bootstrap();
  ws.cmd()
    .args(["build-order", "show", "build-order.json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("my-app==1.0 [from-source]"));
}

#[test]
fn build_order_show_constraints() {
  let ws = Workspace::new();
  ws.bootstrap();
  ws.cmd()
    .args(["build-order", "show", "build-order.json", "--constraints"])
    .assert()
    .success()
    .stdout(predicate::str::contains("idna==3.7\n"))
    .stdout(predicate::str::contains("setuptools==70.1.0\n"));
}

#[test]
fn build_order_show_missing_file_fails() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["build-order", "show", "nope.json"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load build order"));
}

#[test]
fn plan_shows_patches_env_and_build_tag() {
  let ws = Workspace::new();
  ws.bootstrap();
  ws.cmd()
    .args(["plan", "build-order.json"])
    .env("OPT_LEVEL", "3")
    .assert()
    .success()
    .stdout(predicate::str::contains("001-fix-build.patch"))
    .stdout(predicate::str::contains("OPT_LEVEL=3"))
    .stdout(predicate::str::contains("Build tag: 1"));
}

// =============================================================================
// list-overrides, settings
// =============================================================================

#[test]
fn list_overrides_names_configured_packages() {
  let ws = Workspace::new();
  ws.write("overrides/patches/numpy/001.patch", "");
  ws.cmd()
    .arg("list-overrides")
    .assert()
    .success()
    .stdout(predicate::str::contains("my_app"))
    .stdout(predicate::str::contains("numpy"));
}

#[test]
fn list_overrides_prebuilt() {
  let ws = Workspace::new();
  ws.write(
    "overrides/settings/torch.yaml",
    "variants:\n  cuda:\n    pre_built: true\n",
  );
  ws.cmd()
    .args(["list-overrides", "--prebuilt", "--variant", "cuda"])
    .assert()
    .success()
    .stdout(predicate::str::contains("torch"))
    .stdout(predicate::str::contains("my-app").not());
}

#[test]
fn settings_show_prints_effective_config() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["--format", "json", "settings", "show", "My.App"])
    .env_remove("OPT_LEVEL")
    .assert()
    .success()
    .stdout(predicate::str::contains("\"package\": \"my-app\""))
    .stdout(predicate::str::contains("\"OPT_LEVEL\": \"2\""));
}

#[test]
fn settings_show_reports_bad_settings() {
  let ws = Workspace::new();
  ws.write("overrides/settings/broken.yaml", "env:\n  X: ${OOPS\n");
  ws.cmd()
    .args(["settings", "show", "broken"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("broken"));
}
