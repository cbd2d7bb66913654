//! `bootstrap`: the whole run against one chroot.
//!
//! Packages first, then groups, then the optional fix-ups. The RPM database
//! repair seals the session, so nothing that needs dnf may follow it; only
//! `clean` does, and that is a plain directory removal.

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use crate::commands::install::refs;
use crate::commands::merge_names;
use crate::commands::rpmdb::{FixRpmdbArgs, print_report};
use crate::output::Output;
use crate::pipeline::BootstrapPlan;
use crate::rpmdb::{RepairOptions, RepairReport};

#[derive(Debug, Args)]
pub struct BootstrapArgs {
    /// Packages to install in addition to the suite's
    pub packages: Vec<String>,

    /// Package group to install (repeatable)
    #[arg(long = "group", value_name = "GROUP")]
    pub groups: Vec<String>,

    /// Package to exclude from every transaction (repeatable)
    #[arg(long, value_name = "PACKAGE")]
    pub exclude: Vec<String>,

    /// Install the guest's release package after the packages
    #[arg(long)]
    pub fix_releasever: bool,

    /// Convert the RPM database for the guest's rpm at the end
    #[arg(long)]
    pub fix_rpmdb: bool,

    #[command(flatten)]
    pub rpmdb: FixRpmdbArgs,

    /// Remove yumbootstrap's working directory when done
    #[arg(long)]
    pub clean: bool,
}

/// The resolved sequence of steps for one bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapSteps {
    pub packages: Vec<String>,
    pub groups: Vec<String>,
    pub exclude: Vec<String>,
    pub fix_releasever: bool,
    pub repair: Option<RepairOptions>,
    pub clean: bool,
}

impl BootstrapSteps {
    /// Combine the command line with the plan's suite.
    pub fn resolve(args: &BootstrapArgs, plan: &BootstrapPlan) -> Self {
        let suite = plan.suite.clone().unwrap_or_default();
        let repair = args.fix_rpmdb || suite.rpmdb.repair;
        Self {
            packages: merge_names(&args.packages, &suite.packages),
            groups: merge_names(&args.groups, &suite.groups),
            exclude: merge_names(&args.exclude, &suite.exclude),
            fix_releasever: args.fix_releasever || suite.fix_releasever,
            repair: repair.then(|| args.rpmdb.repair_options(plan)),
            clean: args.clean || suite.clean,
        }
    }
}

pub fn run(args: BootstrapArgs, plan: &BootstrapPlan) -> Result<()> {
    let steps = BootstrapSteps::resolve(&args, plan);
    Output::header(format!("Bootstrapping {}", plan.target.display()));
    if let Some(report) = execute(&steps, plan)? {
        print_report(&report);
    }
    Output::success(format!("Bootstrapped {}", plan.target.display()));
    Ok(())
}

/// Run `steps` against the plan's target.
pub fn execute(steps: &BootstrapSteps, plan: &BootstrapPlan) -> Result<Option<RepairReport>> {
    if steps.packages.is_empty() && steps.groups.is_empty() {
        bail!("Nothing to install; list packages or groups in the suite or on the command line");
    }

    let mut dnf = plan.session()?;
    let exclude = refs(&steps.exclude);

    if !steps.packages.is_empty() {
        Output::step(format!("Installing {} package(s)", steps.packages.len()));
        info!(packages = ?steps.packages, "dnf install");
        dnf.install(&refs(&steps.packages), &exclude)
            .context("Package installation failed")?;
    }

    if !steps.groups.is_empty() {
        Output::step(format!("Installing {} group(s)", steps.groups.len()));
        info!(groups = ?steps.groups, "dnf groupinstall");
        dnf.group_install(&refs(&steps.groups), &exclude)
            .context("Group installation failed")?;
    }

    if steps.fix_releasever {
        Output::step("Installing the release package");
        dnf.fix_release_version()
            .context("Failed to install the release package")?;
    }

    let report = match &steps.repair {
        Some(options) => {
            Output::step("Converting the RPM database");
            Some(
                dnf.repair_database(options)
                    .context("Failed to fix the RPM database")?,
            )
        }
        None => None,
    };

    if steps.clean {
        Output::step("Cleaning up");
        dnf.clean()?;
    }

    Ok(report)
}
