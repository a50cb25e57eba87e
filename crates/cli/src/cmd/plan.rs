//! Implementation of the `fromsource plan` command.
//!
//! Expands a build order into build steps and prints what each package
//! would be built with: patches, environment and build tag.

use std::path::Path;

use anyhow::{Context, Result};

use fromsource_lib::build::plan_steps;
use fromsource_lib::build_order::BuildOrder;
use fromsource_lib::settings::SubmodulePolicy;

use super::ContextArgs;
use crate::output::{OutputFormat, plural, print_info, print_json, print_stat, symbols};

pub fn cmd_plan(file: &Path, context: &ContextArgs, format: OutputFormat) -> Result<()> {
  let order = BuildOrder::load(file).with_context(|| format!("Failed to load build order: {}", file.display()))?;
  let ctx = context.open()?;
  let steps = plan_steps(&order, &ctx).context("Failed to plan build steps")?;

  if format.is_json() {
    return print_json(&steps);
  }

  print_info(&format!("{} for variant {}", plural(steps.len(), "step"), ctx.variant()));
  for step in &steps {
    let entry = &step.entry;
    println!();
    println!("{}=={} [{}]", entry.name, entry.version, entry.source);
    print_stat("Source", &step.download_url);
    if let Some(name) = &step.download_filename {
      print_stat("Archive", name);
    }
    if step.build_tag > 0 {
      print_stat("Build tag", &step.build_tag.to_string());
    }
    if let Some(dir) = &step.build_dir {
      print_stat("Build dir", &dir.display().to_string());
    }
    match &step.submodules {
      SubmodulePolicy::None => {}
      SubmodulePolicy::All => print_stat("Submodules", "all"),
      SubmodulePolicy::Paths(paths) => print_stat("Submodules", &paths.join(", ")),
    }
    for patch in &step.patches {
      println!("    {} {}", symbols::ARROW, patch.display());
    }
    for (key, value) in step.env.iter() {
      println!("    {key}={value}");
    }
  }
  Ok(())
}
