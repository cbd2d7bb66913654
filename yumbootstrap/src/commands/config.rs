//! `config`: print the dnf.conf a session would write.

use anyhow::Result;

use crate::pipeline::BootstrapPlan;

pub fn run(plan: &BootstrapPlan) -> Result<()> {
    print!("{}", plan.config()?.render());
    Ok(())
}
