//! RPM database conversion for the guest.
//!
//! dnf on the host writes the guest's RPM database with the host's rpm
//! library: wherever the host thinks `%{_dbpath}` is, in whatever Berkeley DB
//! format the host uses. The guest's own `rpm` may expect another location
//! and may not be able to open that format at all.
//!
//! The repair never runs guest binaries before the data is in a format the
//! guest can read:
//!
//! 1. ask the host rpm where it put the database (`current`)
//! 2. ask the guest rpm where it wants it (`expected`), unless told
//! 3. `db_dump` the host-written `Packages` table to a portable stream and
//!    feed it to the guest's `db_load`, writing `<expected>/Packages.tmp`
//! 4. rename it over `<expected>/Packages`
//! 5. drop every index next to the original `Packages`
//! 6. let the guest's `rpm --rebuilddb` regenerate the indices
//! 7. remove the original directory if it is not the expected one
//!
//! Any failure aborts the repair where it stands. Nothing is rolled back.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::command_runner::{CommandOptions, CommandRunner, Invocation, display_command};
use crate::diagnostics::Diagnostics;
use crate::error::{BootstrapError, Result};
use crate::fsutil;

/// Python snippet printing the rpm database directory.
pub const DBPATH_SCRIPT: &str = r#"import rpm; print(rpm.expandMacro("%{_dbpath}"))"#;

/// Interpreter shipped with RHEL-family rpm bindings.
pub const PLATFORM_PYTHON: &str = "/usr/libexec/platform-python";

/// Host interpreter used when platform-python is not installed.
pub const FALLBACK_PYTHON: &str = "python3";

const PACKAGES: &str = "Packages";
const PACKAGES_TMP: &str = "Packages.tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOptions {
    /// Where the guest wants its database. Queried from the guest if unset;
    /// very old guests (RHEL/CentOS <= 5.2) lack `rpm.expandMacro()` and need
    /// this set explicitly.
    pub expected_rpmdb_dir: Option<String>,
    /// Guest `db_load`.
    pub db_load: String,
    /// Guest `rpm`.
    pub rpm: String,
    /// Host interpreter for the `%{_dbpath}` query. Detected if unset.
    pub host_interpreter: Option<String>,
    /// Guest interpreter for the `%{_dbpath}` query.
    pub guest_interpreter: String,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            expected_rpmdb_dir: None,
            db_load: "db_load".to_string(),
            rpm: "rpm".to_string(),
            host_interpreter: None,
            guest_interpreter: PLATFORM_PYTHON.to_string(),
        }
    }
}

/// What a successful repair did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub current_rpmdb_dir: String,
    pub expected_rpmdb_dir: String,
    /// Entries removed from the original database directory.
    pub removed_files: Vec<String>,
    /// Whether the original directory was removed as a whole.
    pub removed_original_dir: bool,
}

/// Prefer platform-python when the host has it.
pub fn detect_host_interpreter() -> String {
    if Path::new(PLATFORM_PYTHON).exists() {
        PLATFORM_PYTHON.to_string()
    } else {
        FALLBACK_PYTHON.to_string()
    }
}

/// A database directory must be a non-empty absolute path with no macro left in it.
fn check_dbpath(dbpath: &str) -> std::result::Result<(), String> {
    if dbpath.is_empty() {
        Err("empty path".to_string())
    } else if dbpath.contains("%{") {
        Err(format!("macro not expanded: {dbpath}"))
    } else if !dbpath.starts_with('/') {
        Err(format!("not an absolute path: {dbpath}"))
    } else {
        Ok(())
    }
}

pub struct RpmDbRepairer<'a> {
    chroot: &'a Path,
    env: &'a [(String, String)],
    runner: &'a dyn CommandRunner,
    diagnostics: &'a dyn Diagnostics,
}

impl<'a> RpmDbRepairer<'a> {
    pub fn new(
        chroot: &'a Path,
        env: &'a [(String, String)],
        runner: &'a dyn CommandRunner,
        diagnostics: &'a dyn Diagnostics,
    ) -> Self {
        Self {
            chroot,
            env,
            runner,
            diagnostics,
        }
    }

    pub fn repair(&self, options: &RepairOptions) -> Result<RepairReport> {
        self.diagnostics.info("fixing RPM database for guest");

        let host_interpreter = options
            .host_interpreter
            .clone()
            .unwrap_or_else(detect_host_interpreter);
        let current = self.query_dbpath(&host_interpreter, &self.host_options(), "host")?;
        let expected = match &options.expected_rpmdb_dir {
            Some(dir) => {
                check_dbpath(dir).map_err(|reason| BootstrapError::Discovery {
                    context: "expected RPM database directory".to_string(),
                    reason,
                })?;
                dir.clone()
            }
            None => self.query_dbpath(&options.guest_interpreter, &self.guest_options(), "guest")?,
        };
        debug!(current = %current, expected = %expected, "RPM database locations");

        let rpmdb_dir = self.host_path(&current);
        let expected_dir = self.host_path(&expected);

        self.diagnostics.info("converting \"Packages\" file");
        self.pre_rebuild();

        let in_pkg_db = rpmdb_dir.join(PACKAGES);
        if !in_pkg_db.is_file() {
            return Err(BootstrapError::MissingPackagesTable { path: in_pkg_db });
        }
        fs::create_dir_all(&expected_dir).map_err(|e| {
            BootstrapError::io(format!("Failed to create {}", expected_dir.display()), e)
        })?;

        let guest_tmp = Path::new(&expected).join(PACKAGES_TMP);
        self.transfer(&in_pkg_db, &guest_tmp, &options.db_load)?;

        let tmp_pkg_db = expected_dir.join(PACKAGES_TMP);
        let out_pkg_db = expected_dir.join(PACKAGES);
        fs::rename(&tmp_pkg_db, &out_pkg_db).map_err(|e| {
            BootstrapError::io(
                format!("Failed to rename {} to {}", tmp_pkg_db.display(), out_pkg_db.display()),
                e,
            )
        })?;
        info!(path = %out_pkg_db.display(), "Installed converted Packages table");

        self.diagnostics
            .info("removing all the files except \"Packages\"");
        let removed_files = fsutil::remove_all_except(&rpmdb_dir, &[PACKAGES])?;

        self.diagnostics
            .info(&format!("running `{} --rebuilddb'", options.rpm));
        self.run_checked(&options.rpm, &["--rebuilddb"], &self.guest_options())?;

        let removed_original_dir = rpmdb_dir != expected_dir;
        if removed_original_dir {
            self.diagnostics
                .info(&format!("removing old RPM DB directory: $TARGET{current}"));
            fsutil::remove_dir_all_if_exists(&rpmdb_dir)?;
        }

        Ok(RepairReport {
            current_rpmdb_dir: current,
            expected_rpmdb_dir: expected,
            removed_files,
            removed_original_dir,
        })
    }

    /// Evaluate `%{_dbpath}` with `interpreter`.
    fn query_dbpath(&self, interpreter: &str, options: &CommandOptions, side: &str) -> Result<String> {
        let discovery = |reason: String| BootstrapError::Discovery {
            context: format!("{side} interpreter {interpreter}"),
            reason,
        };

        let output = self
            .runner
            .run_output(interpreter, &["-c", DBPATH_SCRIPT], options)
            .map_err(|e| discovery(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(discovery(if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr.to_string()
            }));
        }

        let dbpath = String::from_utf8_lossy(&output.stdout).trim().to_string();
        check_dbpath(&dbpath).map_err(discovery)?;
        Ok(dbpath)
    }

    /// Let the guest rpm try a rebuild on the host-written database. Old
    /// formats commonly refuse; the output is only logged.
    fn pre_rebuild(&self) {
        let args = ["--rebuilddb"];
        match self.runner.run_output("rpmdb", &args, &self.guest_options()) {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if !stdout.trim().is_empty() {
                    self.diagnostics.info(stdout.trim());
                }
            }
            Ok(output) => {
                let err = BootstrapError::subprocess(
                    display_command("rpmdb", &args),
                    output.status,
                    &output.stdout,
                    &output.stderr,
                );
                self.diagnostics.warn(&err.to_string());
            }
            Err(e) => self.diagnostics.warn(&format!("Failed to run 'rpmdb': {e}")),
        }
    }

    /// Stream the host `Packages` through `db_dump | db_load` into the guest.
    fn transfer(&self, in_pkg_db: &Path, guest_tmp: &Path, db_load: &str) -> Result<()> {
        let source = in_pkg_db.to_string_lossy();
        let target = guest_tmp.to_string_lossy();
        let dump_args = [&*source];
        let load_args = [&*target];
        let host = self.host_options();
        let guest = self.guest_options();
        let dump = Invocation::new("db_dump", &dump_args, &host);
        let load = Invocation::new(db_load, &load_args, &guest);
        info!(dump = %dump.display(), load = %load.display(), "Converting Packages table");

        let out = self
            .runner
            .run_piped(&dump, &load)
            .map_err(|e| BootstrapError::io(format!("Failed to run '{}'", dump.display()), e))?;

        if !out.producer.status.success() {
            return Err(BootstrapError::subprocess(
                dump.display(),
                out.producer.status,
                &out.producer.stdout,
                &out.producer.stderr,
            ));
        }
        if !out.consumer.status.success() {
            return Err(BootstrapError::subprocess(
                load.display(),
                out.consumer.status,
                &out.consumer.stdout,
                &out.consumer.stderr,
            ));
        }
        Ok(())
    }

    fn run_checked(&self, program: &str, args: &[&str], options: &CommandOptions) -> Result<()> {
        let output = self
            .runner
            .run_output(program, args, options)
            .map_err(|e| BootstrapError::io(format!("Failed to run '{program}'"), e))?;
        if !output.status.success() {
            return Err(BootstrapError::subprocess(
                display_command(program, args),
                output.status,
                &output.stdout,
                &output.stderr,
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            self.diagnostics.info(stdout.trim());
        }
        Ok(())
    }

    /// Host-side path of a directory as seen from inside the chroot.
    fn host_path(&self, guest_dir: &str) -> PathBuf {
        self.chroot.join(guest_dir.trim_start_matches('/'))
    }

    fn host_options(&self) -> CommandOptions {
        CommandOptions::host(self.env)
    }

    fn guest_options(&self) -> CommandOptions {
        CommandOptions::in_chroot(self.chroot, self.env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::{MockCommandRunner, MockResponse};
    use crate::diagnostics::RecordingDiagnostics;
    use tempfile::TempDir;

    const DUMP: &[u8] = b"VERSION=3\nformat=bytevalue\ntype=hash\nHEADER=END\n 01000000\n 8eade801\nDATA=END\n";

    struct Fixture {
        temp: TempDir,
        runner: MockCommandRunner,
        diag: std::sync::Arc<RecordingDiagnostics>,
    }

    impl Fixture {
        /// A chroot with a host-written database at `current`.
        fn new(current: &str) -> Self {
            let temp = TempDir::new().unwrap();
            let dir = temp.path().join(current.trim_start_matches('/'));
            fs::create_dir_all(&dir).unwrap();
            for name in ["Packages", "Name", "Sha1header", "__db.001"] {
                fs::write(dir.join(name), format!("host {name}")).unwrap();
            }

            let runner = MockCommandRunner::new();
            runner.respond("python3", MockResponse::ok(format!("{current}\n")));
            runner.respond("db_dump", MockResponse::ok(DUMP));
            // db_load writes stdin to its argument, resolved inside the chroot.
            runner.on_run("db_load", |call| {
                let root = call.options.chroot.clone().unwrap();
                fs::write(root.join(call.args[0].trim_start_matches('/')), &call.stdin).unwrap();
            });

            Self {
                temp,
                runner,
                diag: RecordingDiagnostics::new(),
            }
        }

        fn repair(&self, options: RepairOptions) -> Result<RepairReport> {
            let options = RepairOptions {
                host_interpreter: Some("python3".to_string()),
                ..options
            };
            RpmDbRepairer::new(self.temp.path(), &[], &self.runner, self.diag.as_ref()).repair(&options)
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.temp.path().join(rel)
        }

        fn programs(&self) -> Vec<String> {
            self.runner.calls().into_iter().map(|c| c.program).collect()
        }
    }

    fn expecting(dir: &str) -> RepairOptions {
        RepairOptions {
            expected_rpmdb_dir: Some(dir.to_string()),
            ..RepairOptions::default()
        }
    }

    #[test]
    fn test_repair_in_place() {
        let fx = Fixture::new("/var/lib/rpm");

        let report = fx.repair(expecting("/var/lib/rpm")).unwrap();

        assert!(!report.removed_original_dir);
        assert_eq!(report.removed_files, vec!["Name", "Sha1header", "__db.001"]);
        assert_eq!(fs::read(fx.path("var/lib/rpm/Packages")).unwrap(), DUMP);
        let left: Vec<_> = fs::read_dir(fx.path("var/lib/rpm"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(left, vec!["Packages"]);
    }

    #[test]
    fn test_repair_moves_database() {
        let fx = Fixture::new("/var/lib/rpm");

        let report = fx.repair(expecting("/usr/lib/sysimage/rpm")).unwrap();

        assert!(report.removed_original_dir);
        assert!(!fx.path("var/lib/rpm").exists());
        assert_eq!(fs::read(fx.path("usr/lib/sysimage/rpm/Packages")).unwrap(), DUMP);
        assert!(!fx.path("usr/lib/sysimage/rpm/Packages.tmp").exists());
    }

    #[test]
    fn test_trailing_slash_is_same_directory() {
        let fx = Fixture::new("/var/lib/rpm");

        let report = fx.repair(expecting("/var/lib/rpm/")).unwrap();

        assert!(!report.removed_original_dir);
        assert!(fx.path("var/lib/rpm/Packages").exists());
    }

    #[test]
    fn test_relative_override_is_rejected() {
        let fx = Fixture::new("/var/lib/rpm");

        let err = fx.repair(expecting("var/lib/rpm")).unwrap_err();

        assert!(matches!(err, BootstrapError::Discovery { .. }));
        assert!(err.to_string().contains("not an absolute path"));
        assert_eq!(fs::read_to_string(fx.path("var/lib/rpm/Packages")).unwrap(), "host Packages");
        assert!(!fx.programs().iter().any(|p| p == "db_dump"));
    }

    #[test]
    fn test_tool_invocations() {
        let fx = Fixture::new("/var/lib/rpm");
        fx.runner.respond(PLATFORM_PYTHON, MockResponse::ok("/usr/lib/sysimage/rpm\n"));

        let options = RepairOptions {
            db_load: "/usr/bin/db_load".to_string(),
            rpm: "/bin/rpm".to_string(),
            ..RepairOptions::default()
        };
        fx.runner.on_run("/usr/bin/db_load", |call| {
            let root = call.options.chroot.clone().unwrap();
            fs::write(root.join(call.args[0].trim_start_matches('/')), &call.stdin).unwrap();
        });
        let report = fx.repair(options).unwrap();

        assert_eq!(report.expected_rpmdb_dir, "/usr/lib/sysimage/rpm");
        assert_eq!(
            fx.programs(),
            vec!["python3", PLATFORM_PYTHON, "rpmdb", "db_dump", "/usr/bin/db_load", "/bin/rpm"]
        );

        let calls = fx.runner.calls();
        let root = Some(fx.temp.path().to_path_buf());
        assert_eq!(calls[0].args, vec!["-c", DBPATH_SCRIPT]);
        assert!(calls[0].options.chroot.is_none());
        assert_eq!(calls[1].options.chroot, root);
        assert_eq!(calls[2].options.chroot, root);
        assert_eq!(
            calls[3].args,
            vec![fx.path("var/lib/rpm/Packages").to_string_lossy().into_owned()]
        );
        assert!(calls[3].options.chroot.is_none());
        assert_eq!(calls[4].args, vec!["/usr/lib/sysimage/rpm/Packages.tmp"]);
        assert_eq!(calls[4].options.chroot, root);
        assert_eq!(calls[4].stdin, DUMP);
        assert_eq!(calls[5].args, vec!["--rebuilddb"]);
        assert_eq!(calls[5].options.chroot, root);
    }

    #[test]
    fn test_dump_failure_aborts_before_rename() {
        let fx = Fixture::new("/var/lib/rpm");
        fs::create_dir_all(fx.path("usr/lib/sysimage/rpm")).unwrap();
        fs::write(fx.path("usr/lib/sysimage/rpm/Packages"), "previous").unwrap();
        fx.runner
            .reset("db_dump")
            .respond("db_dump", MockResponse::fail(1, "db_dump: Invalid argument"));

        let err = fx.repair(expecting("/usr/lib/sysimage/rpm")).unwrap_err();

        match err {
            BootstrapError::SubprocessFailure { command, output, .. } => {
                assert!(command.starts_with("db_dump "));
                assert!(output.contains("Invalid argument"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            fs::read_to_string(fx.path("usr/lib/sysimage/rpm/Packages")).unwrap(),
            "previous"
        );
        assert!(fx.path("var/lib/rpm/Name").exists());
        assert!(!fx.programs().contains(&"rpm".to_string()));
    }

    #[test]
    fn test_load_failure_is_fatal() {
        let fx = Fixture::new("/var/lib/rpm");
        fx.runner.respond("db_load", MockResponse::fail(2, "db_load: unexpected format"));

        let err = fx.repair(expecting("/var/lib/rpm")).unwrap_err();

        assert!(matches!(err, BootstrapError::SubprocessFailure { .. }));
        assert_eq!(fs::read_to_string(fx.path("var/lib/rpm/Packages")).unwrap(), "host Packages");
    }

    #[test]
    fn test_pre_rebuild_failure_is_tolerated() {
        let fx = Fixture::new("/var/lib/rpm");
        fx.runner
            .respond("rpmdb", MockResponse::fail(1, "error: cannot open Packages index"));

        fx.repair(expecting("/var/lib/rpm")).unwrap();

        let warnings = fx.diag.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("cannot open Packages index"));
    }

    #[test]
    fn test_final_rebuild_failure_is_fatal() {
        let fx = Fixture::new("/var/lib/rpm");
        fx.runner.respond("rpm", MockResponse::fail(1, "error: rebuild failed"));

        let err = fx.repair(expecting("/usr/lib/sysimage/rpm")).unwrap_err();

        assert!(err.to_string().contains("rebuild failed"));
        // The original directory is only removed after a successful rebuild.
        assert!(fx.path("var/lib/rpm/Packages").exists());
    }

    #[test]
    fn test_host_discovery_failure() {
        let fx = Fixture::new("/var/lib/rpm");
        fx.runner
            .reset("python3")
            .respond("python3", MockResponse::fail(1, "ModuleNotFoundError: No module named 'rpm'"));

        let err = fx.repair(expecting("/var/lib/rpm")).unwrap_err();

        match err {
            BootstrapError::Discovery { context, reason } => {
                assert_eq!(context, "host interpreter python3");
                assert!(reason.contains("No module named 'rpm'"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fx.programs().contains(&"db_dump".to_string()));
    }

    #[test]
    fn test_unexpanded_macro_is_rejected() {
        let fx = Fixture::new("/var/lib/rpm");
        fx.runner
            .respond(PLATFORM_PYTHON, MockResponse::ok("%{_dbpath}\n"));

        let err = fx.repair(RepairOptions::default()).unwrap_err();

        assert!(matches!(err, BootstrapError::Discovery { .. }));
    }

    #[test]
    fn test_missing_packages_table() {
        let fx = Fixture::new("/var/lib/rpm");
        fs::remove_file(fx.path("var/lib/rpm/Packages")).unwrap();

        let err = fx.repair(expecting("/var/lib/rpm")).unwrap_err();

        assert!(matches!(err, BootstrapError::MissingPackagesTable { .. }));
        assert!(!fx.programs().contains(&"db_dump".to_string()));
    }
}
