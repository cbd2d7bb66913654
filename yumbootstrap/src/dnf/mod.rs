//! Host-side dnf driving for the guest chroot.

mod config;
mod session;

pub use config::{DnfConfig, STATE_DIR};
pub use session::{DEFAULT_DNF, Dnf, SessionState};
