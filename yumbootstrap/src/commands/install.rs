//! `install`, `group-install` and `fix-releasever`.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::commands::merge_names;
use crate::output::Output;
use crate::pipeline::BootstrapPlan;

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Packages (or groups, for group-install) to install
    #[arg(required = true)]
    pub packages: Vec<String>,

    /// Package to exclude from the transaction (repeatable)
    #[arg(long, value_name = "PACKAGE")]
    pub exclude: Vec<String>,
}

impl InstallArgs {
    fn excludes(&self, plan: &BootstrapPlan) -> Vec<String> {
        let suite = plan.suite.as_ref().map(|s| s.exclude.as_slice()).unwrap_or_default();
        merge_names(&self.exclude, suite)
    }
}

pub fn run_install(args: InstallArgs, plan: &BootstrapPlan) -> Result<()> {
    let exclude = args.excludes(plan);
    let dnf = plan.session()?;

    Output::info(format!(
        "Installing {} package(s) into {}...",
        args.packages.len(),
        plan.target.display()
    ));
    info!(packages = ?args.packages, exclude = ?exclude, "dnf install");
    dnf.install(&refs(&args.packages), &refs(&exclude))
        .context("Package installation failed")?;

    Output::success(format!("Installed {}", args.packages.join(", ")));
    Ok(())
}

pub fn run_group_install(args: InstallArgs, plan: &BootstrapPlan) -> Result<()> {
    let exclude = args.excludes(plan);
    let dnf = plan.session()?;

    Output::info(format!(
        "Installing {} package group(s) into {}...",
        args.packages.len(),
        plan.target.display()
    ));
    info!(groups = ?args.packages, exclude = ?exclude, "dnf groupinstall");
    dnf.group_install(&refs(&args.packages), &refs(&exclude))
        .context("Group installation failed")?;

    Output::success(format!("Installed group(s) {}", args.packages.join(", ")));
    Ok(())
}

pub fn run_fix_releasever(plan: &BootstrapPlan) -> Result<()> {
    let dnf = plan.session()?;
    Output::info("Installing the guest's release package...");
    dnf.fix_release_version()
        .context("Failed to install the release package")?;
    Output::success("releasever fixed");
    Ok(())
}

pub(crate) fn refs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}
