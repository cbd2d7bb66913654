use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use yumbootstrap::commands;
use yumbootstrap::pipeline::BootstrapPlan;
use yumbootstrap::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins, e.g. RUST_LOG=yumbootstrap=debug
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    // Completions don't need a target.
    if let Commands::Completions(args) = &cli.command {
        return commands::completions::run(args);
    }

    let plan = BootstrapPlan::from_cli(&cli)?;
    tracing::debug!(plan = ?plan, "Bootstrap plan created");

    match cli.command {
        Commands::Bootstrap(args) => commands::bootstrap::run(args, &plan),
        Commands::Install(args) => commands::install::run_install(args, &plan),
        Commands::GroupInstall(args) => commands::install::run_group_install(args, &plan),
        Commands::FixReleasever => commands::install::run_fix_releasever(&plan),
        Commands::FixRpmdb(args) => commands::rpmdb::run(args, &plan),
        Commands::Clean => commands::clean::run(&plan),
        Commands::Config => commands::config::run(&plan),
        Commands::Completions(args) => commands::completions::run(&args),
    }
}
