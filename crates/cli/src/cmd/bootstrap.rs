//! Implementation of the `fromsource bootstrap` command.
//!
//! Resolves the given requirements against a catalog, discovers every build
//! and install dependency and writes the resulting build order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;
use tracing::info;

use fromsource_lib::bootstrap::{BootstrapConfig, Bootstrapper};
use fromsource_lib::build_order::BuildOrder;
use fromsource_lib::consts::{BUILD_ORDER_FILENAME, DEFAULT_PYTHON_VERSION};
use fromsource_lib::graph::SourceKind;
use fromsource_lib::hooks::Hooks;
use fromsource_lib::provider::{Catalog, ProviderRegistry};
use fromsource_lib::requirements::{MarkerEnvironment, Requirement, parse_requirements_file};

use super::ContextArgs;
use crate::output::{OutputFormat, format_duration, plural, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct BootstrapArgs {
  /// Top-level requirements, e.g. `numpy>=2`
  pub requirements: Vec<String>,

  /// Read requirements from a file (repeatable)
  #[arg(short = 'r', long = "requirements-file")]
  pub requirement_files: Vec<PathBuf>,

  /// Package catalog (YAML or JSON) describing indexes and release tags
  #[arg(long)]
  pub catalog: PathBuf,

  #[command(flatten)]
  pub context: ContextArgs,

  /// Python version the wheels target, used when evaluating markers
  #[arg(long, value_name = "VERSION", default_value = DEFAULT_PYTHON_VERSION)]
  pub python_version: String,

  /// Where to write the build order
  #[arg(short, long, default_value = BUILD_ORDER_FILENAME)]
  pub output: PathBuf,

  /// Build order of an earlier run; its packages are not rebuilt
  #[arg(long)]
  pub previous: Option<PathBuf>,

  /// Maximum concurrent lookups (default: number of CPUs)
  #[arg(short = 'j', long)]
  pub jobs: Option<usize>,

  /// Give up after this long (e.g., "90s", "10m")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub timeout: Option<Duration>,
}

#[derive(Serialize)]
struct Summary<'a> {
  output: &'a PathBuf,
  variant: &'a str,
  packages: usize,
  edges: usize,
  from_source: usize,
  prebuilt: usize,
  already_satisfied: usize,
  elapsed_ms: u128,
}

fn collect_requirements(args: &BootstrapArgs) -> Result<Vec<Requirement>> {
  let mut reqs = Vec::new();
  for raw in &args.requirements {
    reqs.push(raw.parse().with_context(|| format!("Invalid requirement: {raw}"))?);
  }
  for file in &args.requirement_files {
    reqs.extend(parse_requirements_file(file).with_context(|| format!("Failed to read {}", file.display()))?);
  }
  if reqs.is_empty() {
    bail!("No requirements given; pass them as arguments or with -r FILE");
  }
  Ok(reqs)
}

pub fn cmd_bootstrap(args: BootstrapArgs, format: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let reqs = collect_requirements(&args)?;
  let ctx = args
    .context
    .open()?
    .with_markers(MarkerEnvironment::host().with_python_version(&args.python_version));

  let catalog = Arc::new(
    Catalog::load(&args.catalog).with_context(|| format!("Failed to load catalog: {}", args.catalog.display()))?,
  );

  let previous = match &args.previous {
    Some(path) => Some(Arc::new(
      BuildOrder::load(path).with_context(|| format!("Failed to load previous build order: {}", path.display()))?,
    )),
    None => None,
  };

  let mut config = BootstrapConfig {
    previous,
    ..Default::default()
  };
  if let Some(jobs) = args.jobs {
    config.parallelism = jobs.max(1);
  }

  let variant = ctx.variant().to_string();
  let engine = Bootstrapper::new(
    Arc::new(ctx),
    ProviderRegistry::from_catalog(catalog.clone()),
    catalog,
    Hooks::new(),
  )
  .with_config(config);

  info!(requirements = reqs.len(), variant = %variant, "starting bootstrap");
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let finished = rt.block_on(async {
    match args.timeout {
      Some(limit) => tokio::time::timeout(limit, engine.bootstrap(&reqs)).await.ok(),
      None => Some(engine.bootstrap(&reqs).await),
    }
  });
  let outcome = match (finished, args.timeout) {
    (Some(result), _) => result.context("Bootstrap failed")?,
    (None, limit) => bail!(
      "Bootstrap timed out after {}",
      humantime::format_duration(limit.unwrap_or_default())
    ),
  };

  let order = &outcome.build_order;
  order
    .save(&args.output)
    .with_context(|| format!("Failed to write build order: {}", args.output.display()))?;

  let count = |kind: SourceKind| order.entries.iter().filter(|e| e.source == kind).count();
  let summary = Summary {
    output: &args.output,
    variant: &variant,
    packages: order.len(),
    edges: outcome.graph.edge_count(),
    from_source: count(SourceKind::FromSource),
    prebuilt: count(SourceKind::Prebuilt),
    already_satisfied: count(SourceKind::AlreadySatisfied),
    elapsed_ms: start.elapsed().as_millis(),
  };

  if format.is_json() {
    print_json(&summary)?;
  } else {
    print_success(&format!(
      "Resolved {} in {}",
      plural(summary.packages, "package"),
      format_duration(start.elapsed())
    ));
    print_stat("Build order", &args.output.display().to_string());
    print_stat("Variant", &variant);
    print_stat("From source", &summary.from_source.to_string());
    print_stat("Prebuilt", &summary.prebuilt.to_string());
    print_stat("Already built", &summary.already_satisfied.to_string());
  }

  Ok(())
}
