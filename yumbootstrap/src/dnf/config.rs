//! dnf configuration for a bootstrap chroot.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::diagnostics::Diagnostics;
use crate::error::{BootstrapError, Result};
use crate::fsutil;

/// Directory inside the chroot that holds everything yumbootstrap owns.
pub const STATE_DIR: &str = "yumbootstrap";

/// Repositories, release and signing state, rendered into `dnf.conf` on demand.
///
/// The rendered text is a pure function of the fields; nothing is cached, so
/// adding a repository or a key after a render changes the next render.
pub struct DnfConfig {
    chroot: PathBuf,
    repositories: BTreeMap<String, String>,
    release: String,
    pretend_has_keys: bool,
    env: Vec<(String, String)>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl DnfConfig {
    /// Create an empty configuration for `chroot`.
    ///
    /// A relative `chroot` is resolved against the current directory.
    pub fn new(chroot: impl AsRef<Path>, diagnostics: Arc<dyn Diagnostics>) -> Result<Self> {
        let chroot = chroot.as_ref();
        let chroot = std::path::absolute(chroot)
            .map_err(|e| BootstrapError::io(format!("Failed to resolve {}", chroot.display()), e))?;
        Ok(Self {
            chroot,
            repositories: BTreeMap::new(),
            release: String::new(),
            pretend_has_keys: false,
            env: Vec::new(),
            diagnostics,
        })
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Add or replace a repository. The URL is not validated.
    pub fn add_repository(&mut self, name: impl Into<String>, url: impl Into<String>) {
        self.repositories.insert(name.into(), url.into());
    }

    /// Register a GPG key.
    ///
    /// With `pretend`, only records that keys will be present by the time dnf
    /// runs. Otherwise appends `source` to the key bundle in the chroot.
    pub fn add_key(&mut self, source: &Path, pretend: bool) -> Result<()> {
        if pretend {
            self.pretend_keys();
            return Ok(());
        }
        fsutil::append_file(source, &self.gpg_key_path())
    }

    /// Count keys as present without touching the filesystem.
    pub fn pretend_keys(&mut self) {
        self.pretend_has_keys = true;
    }

    pub fn has_keys(&self) -> bool {
        self.pretend_has_keys || self.gpg_key_path().exists()
    }

    pub fn chroot(&self) -> &Path {
        &self.chroot
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn repositories(&self) -> &BTreeMap<String, String> {
        &self.repositories
    }

    pub fn diagnostics(&self) -> &Arc<dyn Diagnostics> {
        &self.diagnostics
    }

    pub fn root_dir(&self) -> PathBuf {
        self.chroot.join(STATE_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root_dir().join("dnf.conf")
    }

    pub fn gpg_key_path(&self) -> PathBuf {
        self.root_dir().join("RPM-GPG-KEYS")
    }

    /// Render `dnf.conf`.
    ///
    /// Without keys, signature checking is turned off and a warning goes to
    /// the diagnostics sink.
    pub fn render(&self) -> String {
        let gpg_keys = self.gpg_key_path();
        let gpgcheck = if self.has_keys() {
            self.diagnostics
                .info("GPG keys defined, adding them to repository configs");
            1
        } else {
            self.diagnostics
                .warn("no GPG keys defined, RPM signature verification disabled");
            0
        };
        self.diagnostics.info(&format!("release = {}", self.release));

        let mut text = String::from(
            "[main]\n\
             exactarch = 1\n\
             obsoletes = 1\n\
             cachedir = /yumbootstrap/cache\n\
             logfile  = /yumbootstrap/log/dnf.log\n",
        );
        text.push_str(&format!("gpgcheck = {gpgcheck}\n"));
        // NOTE: historical format; the gpgcheck value lands in the path prefix.
        text.push_str(&format!("reposdir = {gpgcheck}/yumbootstrap/dnf.repos.d\n"));

        for (name, url) in &self.repositories {
            text.push_str(&format!(
                "\n[{name}]\nname = {name}\nbaseurl = {url}\nreleasever = {}\n",
                self.release
            ));
            if gpgcheck == 1 {
                text.push_str(&format!("gpgkey = file://{}\n", gpg_keys.display()));
            }
        }
        text
    }

    /// Write `dnf.conf` unless it already exists. Returns `true` if written.
    pub fn materialize(&self) -> Result<bool> {
        let path = self.config_file();
        if path.exists() {
            return Ok(false);
        }
        self.diagnostics
            .info(&format!("{} doesn't exist, creating one", path.display()));
        fsutil::touch_with_text(&path, &self.render())
    }
}

impl fmt::Debug for DnfConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnfConfig")
            .field("chroot", &self.chroot)
            .field("repositories", &self.repositories)
            .field("release", &self.release)
            .field("pretend_has_keys", &self.pretend_has_keys)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}
