//! Suite manifest: a JSON description of one bootstrap.
//!
//! ```json
//! {
//!   "release": "9",
//!   "repositories": {
//!     "baseos": "https://dl.rockylinux.org/pub/rocky/$releasever/BaseOS/$basearch/os/"
//!   },
//!   "gpg_keys": ["keys/RPM-GPG-KEY-Rocky-9"],
//!   "packages": ["bash", "coreutils", "dnf"],
//!   "groups": [],
//!   "exclude": ["kernel"],
//!   "fix_releasever": false,
//!   "rpmdb": { "repair": true },
//!   "clean": true
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, Result};
use crate::rpmdb::RepairOptions;

/// RPM database repair settings of a suite.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RpmDbSettings {
    /// Repair the database once all packages are installed.
    #[serde(default)]
    pub repair: bool,
    /// Guest database directory, for guests that can't report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_dir: Option<String>,
    /// Guest `db_load` if not `db_load` on the guest's `PATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_load: Option<String>,
    /// Guest `rpm` if not `rpm` on the guest's `PATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<String>,
}

impl RpmDbSettings {
    pub fn repair_options(&self) -> RepairOptions {
        let defaults = RepairOptions::default();
        RepairOptions {
            expected_rpmdb_dir: self.expected_dir.clone(),
            db_load: self.db_load.clone().unwrap_or(defaults.db_load),
            rpm: self.rpm.clone().unwrap_or(defaults.rpm),
            ..RepairOptions::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Suite {
    #[serde(default)]
    pub release: String,

    /// Repository name to base URL. `$releasever` and `$basearch` are expanded
    /// once the release is final, see [`expand_repo_url`].
    #[serde(default)]
    pub repositories: BTreeMap<String, String>,

    /// Key files appended to the chroot's key bundle. Relative paths are
    /// relative to the suite file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpg_keys: Vec<PathBuf>,

    /// Treat keys as present even though none are installed yet.
    #[serde(default)]
    pub pretend_keys: bool,

    #[serde(default)]
    pub packages: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Packages excluded from every install.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Environment for every subprocess.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub fix_releasever: bool,

    #[serde(default)]
    pub rpmdb: RpmDbSettings,

    /// Remove dnf's working directory from the chroot at the end.
    #[serde(default)]
    pub clean: bool,
}

impl Suite {
    /// Load a suite from a path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BootstrapError::io(format!("Failed to read suite {}", path.display()), e))?;
        let mut suite: Self = serde_json::from_str(&content).map_err(|e| BootstrapError::Suite {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(base) = path.parent() {
            for key in &mut suite.gpg_keys {
                if key.is_relative() {
                    *key = base.join(&*key);
                }
            }
        }
        Ok(suite)
    }
}

/// Expand `$releasever` and `$basearch` in a repository URL.
///
/// With an empty release `$releasever` is left for dnf to expand.
pub fn expand_repo_url(url: &str, release: &str) -> String {
    let url = url.replace("$basearch", basearch());
    if release.is_empty() {
        url
    } else {
        url.replace("$releasever", release)
    }
}

/// dnf's name for the host architecture.
fn basearch() -> &'static str {
    match std::env::consts::ARCH {
        "arm" => "armhfp",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}
