mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BootstrapArgs, BuildOrderCommand, ContextArgs, SettingsCommand};
use output::OutputFormat;

/// fromsource - rebuild Python wheel dependency trees from source
#[derive(Parser)]
#[command(name = "fromsource")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, value_enum, default_value = "text", global = true)]
  format: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve requirements and write a build order
  Bootstrap(BootstrapArgs),

  /// Inspect build order files
  #[command(subcommand)]
  BuildOrder(BuildOrderCommand),

  /// Show the build steps of a build order
  Plan {
    /// Build order file
    file: PathBuf,

    #[command(flatten)]
    context: ContextArgs,
  },

  /// List packages with settings or patches
  ListOverrides {
    #[command(flatten)]
    context: ContextArgs,

    /// List packages using prebuilt wheels for the variant instead
    #[arg(long)]
    prebuilt: bool,
  },

  /// Inspect package settings
  #[command(subcommand)]
  Settings(SettingsCommand),
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Bootstrap(args) => cmd::cmd_bootstrap(args, cli.format),
    Commands::BuildOrder(command) => cmd::cmd_build_order(command, cli.format, cli.verbose),
    Commands::Plan { file, context } => cmd::cmd_plan(&file, &context, cli.format),
    Commands::ListOverrides { context, prebuilt } => cmd::cmd_list_overrides(&context, prebuilt, cli.format),
    Commands::Settings(command) => cmd::cmd_settings(command, cli.format),
  };

  if let Err(err) = result {
    output::print_error(&format!("{err:#}"));
    std::process::exit(1);
  }
}
