//! CLI argument definitions for yumbootstrap.
//!
//! Separated from `main.rs` so that library code (`pipeline::BootstrapPlan::from_cli`)
//! and shell completion generation can reference these types.

use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

#[derive(Debug, Parser)]
#[command(name = "yumbootstrap")]
#[command(about = "Bootstrap an RPM-based system into a directory")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory to bootstrap into
    #[arg(short, long, global = true, env = "TARGET")]
    pub target: Option<PathBuf>,

    /// Log progress (info level) to stderr
    #[arg(
        short,
        long,
        global = true,
        env = "VERBOSE",
        value_parser = FalseyValueParser::new()
    )]
    pub verbose: bool,

    /// Suite manifest (JSON) with repositories, keys and packages
    #[arg(long, global = true)]
    pub suite: Option<PathBuf>,

    /// Release version ($releasever) of the guest
    #[arg(long, global = true)]
    pub release: Option<String>,

    /// Repository as NAME=URL (repeatable; overrides the suite)
    #[arg(long = "repo", value_name = "NAME=URL", global = true, value_parser = parse_key_val)]
    pub repos: Vec<(String, String)>,

    /// GPG key file to add to the chroot's key bundle (repeatable)
    #[arg(long = "gpg-key", value_name = "PATH", global = true)]
    pub gpg_keys: Vec<PathBuf>,

    /// Enable signature checking even though keys are installed later
    #[arg(long, global = true)]
    pub pretend_keys: bool,

    /// Environment variable for every subprocess as KEY=VALUE (repeatable)
    #[arg(long = "setenv", value_name = "KEY=VALUE", global = true, value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Host dnf binary
    #[arg(long, global = true, default_value = crate::dnf::DEFAULT_DNF)]
    pub dnf: String,

    /// Show dnf's per-package progress
    #[arg(long, global = true)]
    pub interactive: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a whole bootstrap: install, fix up and clean the chroot
    Bootstrap(commands::bootstrap::BootstrapArgs),

    /// Install packages into the chroot
    Install(commands::install::InstallArgs),

    /// Install package groups into the chroot
    #[command(alias = "groupinstall")]
    GroupInstall(commands::install::InstallArgs),

    /// Install the guest's release package
    FixReleasever,

    /// Convert the chroot's RPM database for the guest's rpm
    ///
    /// Must be the last package operation: dnf on the host can't install
    /// anything into the chroot afterwards.
    FixRpmdb(commands::rpmdb::FixRpmdbArgs),

    /// Remove yumbootstrap's working directory from the chroot
    Clean,

    /// Print the dnf.conf that would be used
    Config,

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}

/// Parse `KEY=VALUE`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
