//! Error types for the bootstrap core.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Can't install anything after the RPM database was fixed")]
    InvalidState,

    #[error("{command} failed ({status}){}", format_output(.output))]
    SubprocessFailure {
        command: String,
        status: ExitStatus,
        output: String,
    },

    #[error("Failed to discover RPM database path ({context}): {reason}")]
    Discovery { context: String, reason: String },

    #[error("RPM database has no Packages table: {}", .path.display())]
    MissingPackagesTable { path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid suite {}: {message}", .path.display())]
    Suite { path: PathBuf, message: String },
}

fn format_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{trimmed}")
    }
}

impl BootstrapError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BootstrapError::Io {
            context: context.into(),
            source,
        }
    }

    /// Build a `SubprocessFailure` from captured stdout and stderr.
    pub fn subprocess(command: impl Into<String>, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        let mut output = String::from_utf8_lossy(stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(stderr);
        if !stderr.trim().is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(stderr.trim());
        }
        BootstrapError::SubprocessFailure {
            command: command.into(),
            status,
            output,
        }
    }
}

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_subprocess_failure_includes_output() {
        let err = BootstrapError::subprocess(
            "db_dump /var/lib/rpm/Packages",
            ExitStatus::from_raw(1 << 8),
            b"",
            b"db_dump: unexpected file type or format\n",
        );
        let msg = err.to_string();
        assert!(msg.starts_with("db_dump /var/lib/rpm/Packages failed"));
        assert!(msg.contains("unexpected file type or format"));
    }

    #[test]
    fn test_subprocess_failure_without_output() {
        let err = BootstrapError::subprocess("rpm --rebuilddb", ExitStatus::from_raw(1 << 8), b"", b"");
        assert_eq!(err.to_string(), "rpm --rebuilddb failed (exit status: 1)");
    }
}
