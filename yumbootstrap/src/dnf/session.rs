//! The dnf session: every package operation against one chroot goes
//! through here.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::command_runner::{CommandOptions, CommandRunner, display_command};
use crate::dnf::DnfConfig;
use crate::error::{BootstrapError, Result};
use crate::fsutil;
use crate::rpmdb::{RepairOptions, RepairReport, RpmDbRepairer};

/// Host dnf binary used when none is configured.
pub const DEFAULT_DNF: &str = "/usr/bin/dnf";

/// Package that carries the guest's release metadata.
const RELEASE_PACKAGE: &str = "system-release";

/// Lifecycle of a session.
///
/// `Installable -> Sealed` happens once, when the RPM database has been
/// repaired for the guest. There is no way back: the host dnf can no longer
/// read the converted database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Installable,
    Sealed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Installable => write!(f, "installable"),
            SessionState::Sealed => write!(f, "sealed"),
        }
    }
}

pub struct Dnf {
    config: DnfConfig,
    dnf: String,
    interactive: bool,
    state: SessionState,
    runner: Arc<dyn CommandRunner>,
}

impl Dnf {
    pub fn new(config: DnfConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            dnf: DEFAULT_DNF.to_string(),
            interactive: false,
            state: SessionState::Installable,
            runner,
        }
    }

    /// Use a different host dnf binary.
    pub fn with_dnf(mut self, dnf: impl Into<String>) -> Self {
        self.dnf = dnf.into();
        self
    }

    /// Raise dnf's debug level so the operator sees per-package progress.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn config(&self) -> &DnfConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DnfConfig {
        &mut self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Build the full dnf argument vector (without the program name) for
    /// `verb` applied to `names`.
    pub fn command_args(&self, verb: &str, names: &[&str], exclude: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.config.config_file().to_string_lossy().into_owned(),
            "--installroot".to_string(),
            self.config.chroot().to_string_lossy().into_owned(),
            "-y".to_string(),
        ];
        if !self.config.release().is_empty() {
            args.push(format!("--releasever={}", self.config.release()));
        }
        let debuglevel = if self.interactive { "2" } else { "1" };
        args.extend(["-e", "1", "-d", debuglevel].map(String::from));
        args.extend(exclude.iter().map(|pkg| format!("--exclude={pkg}")));
        args.push(verb.to_string());
        args.extend(names.iter().map(|name| name.to_string()));
        args
    }

    /// Install packages into the chroot.
    pub fn install(&self, packages: &[&str], exclude: &[&str]) -> Result<()> {
        self.run_dnf("install", packages, exclude)
    }

    /// Install package groups into the chroot.
    pub fn group_install(&self, groups: &[&str], exclude: &[&str]) -> Result<()> {
        self.run_dnf("groupinstall", groups, exclude)
    }

    /// Install the guest's release package so dnf stops guessing `$releasever`.
    pub fn fix_release_version(&self) -> Result<()> {
        self.config.diagnostics().info("Fixing releasever for dnf");
        self.run_dnf("install", &[RELEASE_PACKAGE], &[])
    }

    /// Remove dnf's working directory (config, cache, logs, keys) from the chroot.
    pub fn clean(&self) -> Result<()> {
        let root = self.config.root_dir();
        self.config
            .diagnostics()
            .info(&format!("removing directory {}", root.display()));
        fsutil::remove_dir_all_if_exists(&root)
    }

    /// Convert the RPM database for the guest and seal the session.
    ///
    /// The session stays installable if the repair fails; the chroot is left
    /// in whatever state the failed step produced.
    pub fn repair_database(&mut self, options: &RepairOptions) -> Result<RepairReport> {
        self.ensure_installable()?;
        let repairer = RpmDbRepairer::new(
            self.config.chroot(),
            self.config.env(),
            self.runner.as_ref(),
            self.config.diagnostics().as_ref(),
        );
        let report = repairer.repair(options)?;
        self.state = SessionState::Sealed;
        debug!(state = %self.state, "RPM database repaired");
        Ok(report)
    }

    fn ensure_installable(&self) -> Result<()> {
        match self.state {
            SessionState::Installable => Ok(()),
            SessionState::Sealed => Err(BootstrapError::InvalidState),
        }
    }

    fn run_dnf(&self, verb: &str, names: &[&str], exclude: &[&str]) -> Result<()> {
        self.ensure_installable()?;
        self.config.materialize()?;

        let args = self.command_args(verb, names, exclude);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = display_command(&self.dnf, &args);
        info!(command = %command, "Running dnf");

        let status = self
            .runner
            .run_status(&self.dnf, &args, &CommandOptions::host(self.config.env()))
            .map_err(|e| BootstrapError::io(format!("Failed to run '{}'", self.dnf), e))?;
        if !status.success() {
            return Err(BootstrapError::SubprocessFailure {
                command,
                status,
                output: String::new(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Dnf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dnf")
            .field("config", &self.config)
            .field("dnf", &self.dnf)
            .field("interactive", &self.interactive)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::{MockCommandRunner, MockResponse};
    use crate::diagnostics::RecordingDiagnostics;
    use std::path::Path;
    use tempfile::TempDir;

    fn session(temp: &TempDir) -> (Dnf, Arc<MockCommandRunner>) {
        let config = DnfConfig::new(temp.path(), RecordingDiagnostics::new())
            .unwrap()
            .with_release("9");
        let runner = Arc::new(MockCommandRunner::new());
        (Dnf::new(config, runner.clone()), runner)
    }

    /// A chroot whose database is already where the guest expects it.
    fn seed_rpmdb(temp: &TempDir) {
        let dir = temp.path().join("var/lib/rpm");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Packages"), "old").unwrap();
    }

    fn repair_options() -> RepairOptions {
        RepairOptions {
            expected_rpmdb_dir: Some("/var/lib/rpm".to_string()),
            host_interpreter: Some("python3".to_string()),
            ..RepairOptions::default()
        }
    }

    fn seal(dnf: &mut Dnf, runner: &MockCommandRunner, temp: &TempDir) {
        seed_rpmdb(temp);
        runner.respond("python3", MockResponse::ok("/var/lib/rpm\n"));
        runner.on_run("db_load", |call| {
            let root = call.options.chroot.clone().unwrap();
            std::fs::write(root.join(call.args[0].trim_start_matches('/')), &call.stdin).unwrap();
        });
        dnf.repair_database(&repair_options()).unwrap();
    }

    #[test]
    fn test_install_command_line() {
        let temp = TempDir::new().unwrap();
        let (dnf, runner) = session(&temp);

        dnf.install(&["bash", "coreutils"], &["kernel", "grub2"]).unwrap();

        let calls = runner.calls_to(DEFAULT_DNF);
        assert_eq!(calls.len(), 1);
        let conf = temp.path().join("yumbootstrap/dnf.conf");
        let expected: Vec<String> = [
            "-c",
            conf.to_str().unwrap(),
            "--installroot",
            temp.path().to_str().unwrap(),
            "-y",
            "--releasever=9",
            "-e",
            "1",
            "-d",
            "1",
            "--exclude=kernel",
            "--exclude=grub2",
            "install",
            "bash",
            "coreutils",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(calls[0].args, expected);
        assert!(calls[0].options.chroot.is_none());
    }

    #[test]
    fn test_group_install_interactive() {
        let temp = TempDir::new().unwrap();
        let (dnf, runner) = session(&temp);
        let dnf = dnf.with_interactive(true).with_dnf("/opt/dnf");

        dnf.group_install(&["Core"], &[]).unwrap();

        let args = &runner.calls_to("/opt/dnf")[0].args;
        let tail: Vec<&str> = args[args.len() - 4..].iter().map(String::as_str).collect();
        assert_eq!(tail, ["-d", "2", "groupinstall", "Core"]);
    }

    #[test]
    fn test_first_install_materializes_config() {
        let temp = TempDir::new().unwrap();
        let (mut dnf, _) = session(&temp);
        dnf.config_mut().add_repository("base", "http://h/os");

        assert!(!dnf.config().config_file().exists());
        dnf.install(&["bash"], &[]).unwrap();

        let written = std::fs::read_to_string(dnf.config().config_file()).unwrap();
        assert_eq!(written, dnf.config().render());
    }

    #[test]
    fn test_install_failure_is_fatal() {
        let temp = TempDir::new().unwrap();
        let (dnf, runner) = session(&temp);
        runner.respond(DEFAULT_DNF, MockResponse::fail(1, ""));

        let err = dnf.install(&["no-such-package"], &[]).unwrap_err();
        match err {
            BootstrapError::SubprocessFailure { command, status, .. } => {
                assert!(command.starts_with("/usr/bin/dnf -c"));
                assert_eq!(status.code(), Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fix_release_version_installs_release_package() {
        let temp = TempDir::new().unwrap();
        let (dnf, runner) = session(&temp);

        dnf.fix_release_version().unwrap();

        let args = &runner.calls_to(DEFAULT_DNF)[0].args;
        assert_eq!(args[args.len() - 2..], ["install", "system-release"]);
    }

    #[test]
    fn test_installs_rejected_after_repair() {
        let temp = TempDir::new().unwrap();
        let (mut dnf, runner) = session(&temp);
        dnf.install(&["bash"], &[]).unwrap();

        seal(&mut dnf, &runner, &temp);

        assert_eq!(dnf.state(), SessionState::Sealed);
        assert!(matches!(dnf.install(&["vim"], &[]), Err(BootstrapError::InvalidState)));
        assert!(matches!(
            dnf.group_install(&["Base"], &["kernel"]),
            Err(BootstrapError::InvalidState)
        ));
        assert!(matches!(dnf.fix_release_version(), Err(BootstrapError::InvalidState)));
        assert!(matches!(
            dnf.repair_database(&repair_options()),
            Err(BootstrapError::InvalidState)
        ));
        assert_eq!(runner.calls_to(DEFAULT_DNF).len(), 1);
    }

    #[test]
    fn test_failed_repair_keeps_session_installable() {
        let temp = TempDir::new().unwrap();
        let (mut dnf, runner) = session(&temp);
        runner.respond("python3", MockResponse::fail(1, "No module named 'rpm'"));

        let err = dnf.repair_database(&repair_options()).unwrap_err();

        assert!(matches!(err, BootstrapError::Discovery { .. }));
        assert_eq!(dnf.state(), SessionState::Installable);
        dnf.install(&["bash"], &[]).unwrap();
    }

    #[test]
    fn test_clean_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let (dnf, _) = session(&temp);
        dnf.install(&["bash"], &[]).unwrap();
        assert!(Path::new(&dnf.config().root_dir()).exists());

        dnf.clean().unwrap();
        dnf.clean().unwrap();

        assert!(!dnf.config().root_dir().exists());
    }

    #[test]
    fn test_env_is_forwarded() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(MockCommandRunner::new());
        let env = vec![("LANG".to_string(), "C".to_string())];
        let config = DnfConfig::new(temp.path(), RecordingDiagnostics::new())
            .unwrap()
            .with_env(env.clone());
        let dnf = Dnf::new(config, runner.clone());

        dnf.install(&["bash"], &[]).unwrap();

        assert_eq!(runner.calls()[0].options.env, env);
    }

    #[test]
    fn test_no_releasever_flag_without_release() {
        let temp = TempDir::new().unwrap();
        let config = DnfConfig::new(temp.path(), RecordingDiagnostics::new()).unwrap();
        let dnf = Dnf::new(config, Arc::new(MockCommandRunner::new()));

        let args = dnf.command_args("install", &["bash"], &[]);
        assert!(!args.iter().any(|a| a.starts_with("--releasever")));
    }
}
