//! `fix-rpmdb`: convert the chroot's RPM database for the guest's rpm.

use anyhow::{Context, Result};
use clap::Args;

use crate::output::Output;
use crate::pipeline::BootstrapPlan;
use crate::rpmdb::{RepairOptions, RepairReport};

#[derive(Debug, Clone, Default, Args)]
pub struct FixRpmdbArgs {
    /// Guest database directory, when the guest can't report it
    #[arg(long, value_name = "DIR")]
    pub expected_rpmdb_dir: Option<String>,

    /// db_load inside the chroot [default: db_load]
    #[arg(long, value_name = "PROGRAM")]
    pub db_load: Option<String>,

    /// rpm inside the chroot [default: rpm]
    #[arg(long, value_name = "PROGRAM")]
    pub rpm: Option<String>,
}

impl FixRpmdbArgs {
    /// Repair options from these arguments, falling back to the suite's.
    pub fn repair_options(&self, plan: &BootstrapPlan) -> RepairOptions {
        let base = plan
            .suite
            .as_ref()
            .map(|suite| suite.rpmdb.repair_options())
            .unwrap_or_default();
        RepairOptions {
            expected_rpmdb_dir: self.expected_rpmdb_dir.clone().or(base.expected_rpmdb_dir),
            db_load: self.db_load.clone().unwrap_or(base.db_load),
            rpm: self.rpm.clone().unwrap_or(base.rpm),
            ..base
        }
    }
}

pub fn run(args: FixRpmdbArgs, plan: &BootstrapPlan) -> Result<()> {
    let mut dnf = plan.session_without_keys()?;
    Output::info("Converting RPM database for the guest...");
    let report = dnf
        .repair_database(&args.repair_options(plan))
        .context("Failed to fix the RPM database")?;
    print_report(&report);
    Ok(())
}

pub(crate) fn print_report(report: &RepairReport) {
    Output::success("RPM database converted");
    Output::kv("Host dbpath", &report.current_rpmdb_dir);
    Output::kv("Guest dbpath", &report.expected_rpmdb_dir);
    if !report.removed_files.is_empty() {
        Output::kv("Removed", report.removed_files.join(", "));
    }
    if report.removed_original_dir {
        Output::step(format!("Removed {}", report.current_rpmdb_dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BootstrapPlanBuilder;
    use crate::suite::{RpmDbSettings, Suite};

    #[test]
    fn test_cli_options_override_suite() {
        let mut plan = BootstrapPlanBuilder::new("/srv/guest").build();
        plan.suite = Some(Suite {
            rpmdb: RpmDbSettings {
                repair: true,
                expected_dir: Some("/var/lib/rpm".to_string()),
                db_load: Some("/usr/bin/db_load".to_string()),
                rpm: None,
            },
            ..Suite::default()
        });
        let args = FixRpmdbArgs {
            rpm: Some("/bin/rpm".to_string()),
            ..FixRpmdbArgs::default()
        };

        let options = args.repair_options(&plan);
        assert_eq!(options.expected_rpmdb_dir.as_deref(), Some("/var/lib/rpm"));
        assert_eq!(options.db_load, "/usr/bin/db_load");
        assert_eq!(options.rpm, "/bin/rpm");
    }

    #[test]
    fn test_defaults_without_suite() {
        let plan = BootstrapPlanBuilder::new("/srv/guest").build();
        assert_eq!(FixRpmdbArgs::default().repair_options(&plan), RepairOptions::default());
    }
}
