//! Small filesystem helpers used against the chroot.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{BootstrapError, Result};

/// Create `path` (and its parent directories) if it does not exist yet,
/// writing `text` into it. An existing file is left untouched.
///
/// Returns `true` if the file was created.
pub fn touch_with_text(path: &Path, text: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    create_parent(path)?;
    fs::write(path, text)
        .map_err(|e| BootstrapError::io(format!("Failed to write {}", path.display()), e))?;
    debug!(path = %path.display(), "Created file");
    Ok(true)
}

/// Append the contents of `source` to `target`, creating `target` if absent.
pub fn append_file(source: &Path, target: &Path) -> Result<()> {
    let content = fs::read(source)
        .map_err(|e| BootstrapError::io(format!("Failed to read {}", source.display()), e))?;
    create_parent(target)?;
    let mut out = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(target)
        .map_err(|e| BootstrapError::io(format!("Failed to open {}", target.display()), e))?;
    out.write_all(&content)
        .map_err(|e| BootstrapError::io(format!("Failed to append to {}", target.display()), e))?;
    Ok(())
}

/// Remove a directory tree; a missing directory is not an error.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BootstrapError::io(format!("Failed to remove {}", path.display()), e)),
    }
}

/// Remove every entry of `dir` whose name is not in `keep`.
///
/// Returns the names of the removed entries, sorted.
pub fn remove_all_except(dir: &Path, keep: &[&str]) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| BootstrapError::io(format!("Failed to list {}", dir.display()), e))?;

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BootstrapError::io(format!("Failed to list {}", dir.display()), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep.contains(&name.as_str()) {
            continue;
        }
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| BootstrapError::io(format!("Failed to remove {}", path.display()), e))?;
        removed.push(name);
    }
    removed.sort();
    Ok(removed)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BootstrapError::io(format!("Failed to create directory {}", parent.display()), e))?;
    }
    Ok(())
}
