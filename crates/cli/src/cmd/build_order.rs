use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use fromsource_lib::build_order::BuildOrder;

use crate::output::{OutputFormat, plural, print_info, print_json, symbols};

#[derive(Subcommand, Debug)]
pub enum BuildOrderCommand {
  /// Print a build order file
  Show {
    /// Build order file
    file: PathBuf,

    /// Print `name==version` constraint lines instead
    #[arg(long)]
    constraints: bool,
  },
}

pub fn cmd_build_order(command: BuildOrderCommand, format: OutputFormat, verbose: bool) -> Result<()> {
  match command {
    BuildOrderCommand::Show { file, constraints } => show(&file, constraints, format, verbose),
  }
}

fn show(file: &Path, constraints: bool, format: OutputFormat, verbose: bool) -> Result<()> {
  let order = BuildOrder::load(file).with_context(|| format!("Failed to load build order: {}", file.display()))?;

  if constraints {
    print!("{}", order.constraints());
    return Ok(());
  }
  if format.is_json() {
    return print_json(&order);
  }

  if order.is_empty() {
    print_info("Build order is empty");
    return Ok(());
  }

  print_info(&format!("{} for variant {}", plural(order.len(), "package"), order.variant));
  for (idx, entry) in order.entries.iter().enumerate() {
    println!("{:>4}. {}=={} [{}]", idx + 1, entry.name, entry.version, entry.source);
    if verbose {
      for dep in &entry.dependencies {
        println!("        {} {}=={} ({})", symbols::ARROW, dep.name, dep.version, dep.kind);
      }
    }
  }
  Ok(())
}
