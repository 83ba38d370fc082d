//! Scoped temp workspace for one orchestrator run, plus the recursive copy
//! used to stage artifact directories into it.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

use crate::error::{DeployerError, Result};

/// Temp workspace removed on drop unless retention was requested.
pub struct WorkDir {
    inner: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    pub fn create(keep: bool) -> Result<Self> {
        let inner = tempfile::Builder::new().prefix("ipaas-deploy-").tempdir()?;
        let path = inner.path().to_path_buf();
        Ok(Self {
            inner: Some(inner),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep
            && let Some(dir) = self.inner.take()
        {
            let kept = dir.keep();
            info!(path = %kept.display(), "keeping work directory");
        }
        // Otherwise TempDir removes the tree when it drops.
    }
}

/// Recursively copy `src` into `dst`, creating directories as needed.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(DeployerError::NotFound(format!(
            "directory {} does not exist",
            src.display()
        )));
    }
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|err| {
            DeployerError::Other(format!("cannot walk {}: {err}", src.display()))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|err| DeployerError::Other(err.to_string()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
