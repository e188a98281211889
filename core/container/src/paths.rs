//! Temp-file and atomic-rename discipline.
//!
//! Every save writes to a uniquely named sibling of the destination and
//! renames over it only after a successful flush and fsync. A rename
//! within one directory is atomic on the platforms we support, so a crash
//! mid-save never leaves a half-written file in place of a good one.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use argo_common::Result;

/// Guard over an in-progress temporary file.
///
/// The temp file is removed on drop unless [`commit`](Self::commit) ran,
/// so a failed or cancelled save leaves nothing behind.
pub(crate) struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    /// Choose a unique temp path next to `dest` (same filesystem, so the
    /// final rename cannot degrade into a copy).
    pub fn new(dest: &Path) -> Self {
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "container".to_string());
        let temp_name = format!(".{}.{}.tmp", file_name, Uuid::new_v4());

        let path = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(temp_name),
            _ => PathBuf::from(temp_name),
        };

        Self { path, armed: true }
    }

    /// The path to write to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the temp file over `dest`.
    pub fn commit(mut self, dest: &Path) -> Result<()> {
        fs::rename(&self.path, dest)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_commit_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("ledger.argo");
        fs::write(&dest, b"old").unwrap();

        let guard = TempFileGuard::new(&dest);
        fs::write(guard.path(), b"new").unwrap();
        guard.commit(&dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_drop_without_commit_cleans_up() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("ledger.argo");

        let temp_path;
        {
            let guard = TempFileGuard::new(&dest);
            fs::write(guard.path(), b"partial").unwrap();
            temp_path = guard.path().to_path_buf();
        }

        assert!(!temp_path.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("ledger.argo");

        let a = TempFileGuard::new(&dest);
        let b = TempFileGuard::new(&dest);
        assert_ne!(a.path(), b.path());
    }
}
