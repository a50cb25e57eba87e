use anyhow::{Context, Result};
use clap::Subcommand;

use fromsource_lib::requirements::CanonicalName;

use super::ContextArgs;
use crate::output::{OutputFormat, print_json};

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
  /// Print the effective configuration of a package
  Show {
    /// Package name
    package: String,

    #[command(flatten)]
    context: ContextArgs,
  },
}

pub fn cmd_settings(command: SettingsCommand, format: OutputFormat) -> Result<()> {
  match command {
    SettingsCommand::Show { package, context } => {
      let ctx = context.open()?;
      let name = CanonicalName::new(&package);
      let cfg = ctx
        .effective(&name)
        .with_context(|| format!("Failed to resolve settings for {package}"))?;

      if format.is_json() {
        print_json(&cfg)
      } else {
        let yaml = serde_yaml::to_string(&cfg).context("Failed to serialize settings")?;
        print!("{yaml}");
        Ok(())
      }
    }
  }
}
