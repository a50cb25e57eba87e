use anyhow::{Context, Result};
use serde_json::json;

use super::ContextArgs;
use crate::output::{OutputFormat, print_info, print_json};

/// List packages with a settings file or patches; with `prebuilt`, list the
/// packages that use prebuilt wheels for the active variant instead.
pub fn cmd_list_overrides(context: &ContextArgs, prebuilt: bool, format: OutputFormat) -> Result<()> {
  let ctx = context.open()?;
  let settings = ctx.settings();

  let names: Vec<String> = if prebuilt {
    settings
      .list_pre_built(ctx.variant())
      .context("Failed to list prebuilt packages")?
      .iter()
      .map(ToString::to_string)
      .collect()
  } else {
    settings
      .list_overrides(ctx.patches_dir())
      .context("Failed to list overrides")?
      .iter()
      .map(ToString::to_string)
      .collect()
  };

  if format.is_json() {
    return print_json(&json!({ "variant": ctx.variant(), "packages": names }));
  }
  if names.is_empty() {
    print_info("No overrides found");
  }
  for name in &names {
    println!("{name}");
  }
  Ok(())
}
