//! Bootstrap plan: global options and suite settings resolved into the
//! pieces a command needs to build a dnf session.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::Cli;
use crate::command_runner::{CommandRunner, RealCommandRunner};
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::dnf::{DEFAULT_DNF, Dnf, DnfConfig};
use crate::suite::{Suite, expand_repo_url};

/// Everything needed to drive dnf against one chroot.
#[derive(Clone)]
pub struct BootstrapPlan {
    pub target: PathBuf,
    pub release: String,
    pub repositories: BTreeMap<String, String>,
    pub gpg_keys: Vec<PathBuf>,
    pub pretend_keys: bool,
    pub env: Vec<(String, String)>,
    pub dnf: String,
    pub interactive: bool,
    /// The suite the plan was built from, if any.
    pub suite: Option<Suite>,
    runner: Arc<dyn CommandRunner>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl BootstrapPlan {
    /// Create a plan from CLI arguments, loading `--suite` if given.
    ///
    /// Command-line values win over the suite's.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let suite = cli
            .suite
            .as_deref()
            .map(Suite::load)
            .transpose()
            .context("Failed to load suite")?;

        let Some(target) = cli.target.clone() else {
            bail!("No target directory given; pass --target or set TARGET");
        };

        let mut builder = BootstrapPlanBuilder::new(target)
            .dnf(cli.dnf.clone())
            .interactive(cli.interactive);

        if let Some(suite) = &suite {
            builder = builder.release(suite.release.clone());
            for (name, url) in &suite.repositories {
                builder = builder.repository(name.clone(), url.clone());
            }
            for key in &suite.gpg_keys {
                builder = builder.gpg_key(key.clone());
            }
            for (key, value) in &suite.env {
                builder = builder.env(key.clone(), value.clone());
            }
            builder = builder.pretend_keys(suite.pretend_keys);
        }

        if let Some(release) = &cli.release {
            builder = builder.release(release.clone());
        }
        for (name, url) in &cli.repos {
            builder = builder.repository(name.clone(), url.clone());
        }
        for key in &cli.gpg_keys {
            builder = builder.gpg_key(key.clone());
        }
        for (key, value) in &cli.env {
            builder = builder.env(key.clone(), value.clone());
        }
        if cli.pretend_keys {
            builder = builder.pretend_keys(true);
        }

        let mut plan = builder.build();
        // Expanded only now so that --release also applies to suite URLs.
        for url in plan.repositories.values_mut() {
            *url = expand_repo_url(url, &plan.release);
        }
        plan.suite = suite;
        Ok(plan)
    }

    fn base_config(&self) -> Result<DnfConfig> {
        let mut config = DnfConfig::new(&self.target, self.diagnostics.clone())
            .with_context(|| format!("Invalid target {}", self.target.display()))?
            .with_release(self.release.clone())
            .with_env(self.env.clone());
        for (name, url) in &self.repositories {
            config.add_repository(name.clone(), url.clone());
        }
        Ok(config)
    }

    fn open(&self, config: DnfConfig) -> Dnf {
        Dnf::new(config, self.runner.clone())
            .with_dnf(self.dnf.clone())
            .with_interactive(self.interactive)
    }

    /// Configuration for the target, without installing any key.
    ///
    /// Configured keys count as present, so this renders what [`Self::session`]
    /// will write.
    pub fn config(&self) -> Result<DnfConfig> {
        let mut config = self.base_config()?;
        if self.pretend_keys || !self.gpg_keys.is_empty() {
            config.pretend_keys();
        }
        Ok(config)
    }

    /// Open a dnf session for the target, installing the configured keys.
    ///
    /// Keys are appended only when the chroot has no key bundle yet, so
    /// running several commands against one target installs them once.
    pub fn session(&self) -> Result<Dnf> {
        let mut config = self.base_config()?;
        if !config.gpg_key_path().exists() {
            for key in &self.gpg_keys {
                config
                    .add_key(key, false)
                    .with_context(|| format!("Failed to add GPG key {}", key.display()))?;
            }
        }
        if self.pretend_keys {
            config.pretend_keys();
        }
        Ok(self.open(config))
    }

    /// Open a dnf session that leaves the key bundle alone.
    pub fn session_without_keys(&self) -> Result<Dnf> {
        Ok(self.open(self.config()?))
    }
}

impl std::fmt::Debug for BootstrapPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapPlan")
            .field("target", &self.target)
            .field("release", &self.release)
            .field("repositories", &self.repositories)
            .field("gpg_keys", &self.gpg_keys)
            .field("pretend_keys", &self.pretend_keys)
            .field("env", &self.env)
            .field("dnf", &self.dnf)
            .field("interactive", &self.interactive)
            .finish_non_exhaustive()
    }
}

/// Builder for creating bootstrap plans in tests or programmatically.
pub struct BootstrapPlanBuilder {
    target: PathBuf,
    release: String,
    repositories: BTreeMap<String, String>,
    gpg_keys: Vec<PathBuf>,
    pretend_keys: bool,
    env: Vec<(String, String)>,
    dnf: String,
    interactive: bool,
    runner: Option<Arc<dyn CommandRunner>>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
}

impl BootstrapPlanBuilder {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            release: String::new(),
            repositories: BTreeMap::new(),
            gpg_keys: Vec::new(),
            pretend_keys: false,
            env: Vec::new(),
            dnf: DEFAULT_DNF.to_string(),
            interactive: false,
            runner: None,
            diagnostics: None,
        }
    }

    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }

    pub fn repository(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.repositories.insert(name.into(), url.into());
        self
    }

    pub fn gpg_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.gpg_keys.push(path.into());
        self
    }

    pub fn pretend_keys(mut self, pretend: bool) -> Self {
        self.pretend_keys = pretend;
        self
    }

    /// Set an environment variable; a later value for the same key wins.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
        self
    }

    pub fn dnf(mut self, dnf: impl Into<String>) -> Self {
        self.dnf = dnf.into();
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn build(self) -> BootstrapPlan {
        BootstrapPlan {
            target: self.target,
            release: self.release,
            repositories: self.repositories,
            gpg_keys: self.gpg_keys,
            pretend_keys: self.pretend_keys,
            env: self.env,
            dnf: self.dnf,
            interactive: self.interactive,
            suite: None,
            runner: self.runner.unwrap_or_else(|| Arc::new(RealCommandRunner)),
            diagnostics: self
                .diagnostics
                .unwrap_or_else(|| Arc::new(TracingDiagnostics)),
        }
    }
}
