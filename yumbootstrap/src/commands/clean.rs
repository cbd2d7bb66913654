//! `clean`: remove yumbootstrap's working directory from the chroot.

use anyhow::Result;

use crate::output::Output;
use crate::pipeline::BootstrapPlan;

pub fn run(plan: &BootstrapPlan) -> Result<()> {
    let dnf = plan.session_without_keys()?;
    let root = dnf.config().root_dir();
    let existed = root.exists();
    dnf.clean()?;

    if existed {
        Output::success(format!("Removed {}", root.display()));
    } else {
        Output::info(format!("{} doesn't exist, nothing to clean", root.display()));
    }
    Ok(())
}
