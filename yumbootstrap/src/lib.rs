//! yumbootstrap: bootstrap an RPM-based system into a directory.
//!
//! The host's dnf installs packages into a chroot, driven by a `dnf.conf`
//! generated from a handful of repositories, a release version and an
//! optional GPG key bundle. Once everything is installed the chroot's RPM
//! database can be converted to the format the guest's own rpm expects.
//!
//! # Layout
//!
//! - [`dnf::DnfConfig`]: repositories, release and keys, rendered into `dnf.conf`
//! - [`dnf::Dnf`]: a session that runs dnf against the chroot and knows
//!   when it must stop (after the database repair)
//! - [`rpmdb::RpmDbRepairer`]: the `db_dump | db_load` conversion
//! - [`suite::Suite`]: JSON description of a whole bootstrap
//!
//! Subprocesses go through [`command_runner::CommandRunner`] and progress
//! messages through [`diagnostics::Diagnostics`], so both can be replaced in
//! tests.

pub mod cli;
pub mod command_runner;
pub mod commands;
pub mod diagnostics;
pub mod dnf;
pub mod error;
pub mod fsutil;
pub mod output;
pub mod pipeline;
pub mod rpmdb;
pub mod suite;

pub use cli::{Cli, Commands};
pub use error::{BootstrapError, Result};
