use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

/// A per-request directory, removed on drop.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Creates `root/name`. Fails if the directory already exists.
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        if !root.exists() {
            fs::create_dir_all(root)
                .with_context(|| format!("failed to create directory: {}", root.display()))?;
        }
        let path = root.join(name);
        fs::create_dir(&path)
            .with_context(|| format!("failed to create workspace: {}", path.display()))?;
        debug!(path = %path.display(), "workspace created");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Removes the directory tree. Calling it more than once is harmless.
    pub fn cleanup(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "workspace removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), %err, "failed to remove workspace"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Creates `dir` if missing and returns its absolute, symlink-free path.
pub fn prepare_root(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    }
    fs::canonicalize(dir).with_context(|| format!("failed to resolve directory: {}", dir.display()))
}

/// `<prefix>-<unix millis>-<9 random lowercase alphanumerics>`
pub fn generate_name(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{}-{}", prefix, millis, suffix)
}
