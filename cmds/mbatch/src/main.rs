use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::util::BrokenPipeGuard;
use config::MbatchConfig;
use tracing::Level;

mod commands;
mod config;
mod telemetry;

#[derive(Parser)]
#[command(name = "mbatch")]
#[command(about = "Render and apply batches of Kubernetes manifests under a shared owner", long_about = None)]
#[command(version)]
struct Cli {
	/// Log level (trace, debug, info, warn, error). Overrides RUST_LOG
	#[arg(long, global = true)]
	log_level: Option<Level>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Render the manifests and apply them to the cluster
	Apply(commands::apply::ApplyArgs),

	/// Render the manifests and print them as a YAML stream
	Render(commands::render::RenderArgs),
}

fn run(cli: Cli) -> Result<()> {
	let cwd = std::env::current_dir().context("reading working directory")?;
	let config = MbatchConfig::load_from_directory(&cwd)?.unwrap_or_default();

	match cli.command {
		Commands::Apply(args) => commands::apply::run(args, config),
		Commands::Render(args) => {
			let stdout = BrokenPipeGuard::new(std::io::stdout());
			commands::render::run(args, config, stdout)
		}
	}
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	telemetry::init(cli.log_level);

	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("error: {e:#}");
			ExitCode::FAILURE
		}
	}
}
