use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

/// A per-request source file that is removed exactly once.
///
/// [`TransientSourceFile::remove`] is the normal path. If the guard is
/// dropped without it (early return, panic, cancelled request future) the
/// file is removed synchronously in `Drop`.
#[derive(Debug)]
pub struct TransientSourceFile {
    path: Option<PathBuf>,
}

impl TransientSourceFile {
    pub async fn create(dir: &Path, source: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir).await?;

        let path = dir.join(format!("code-{}.sk", Uuid::new_v4()));
        let file = Self {
            path: Some(path.clone()),
        };
        fs::write(&path, source).await?;

        Ok(file)
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub async fn remove(mut self) {
        if let Some(path) = self.path.take() {
            remove_logged(fs::remove_file(&path).await, &path);
        }
    }
}

impl Drop for TransientSourceFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove_logged(std::fs::remove_file(&path), &path);
        }
    }
}

fn remove_logged(result: std::io::Result<()>, path: &Path) {
    match result {
        Ok(()) => tracing::debug!("Removed source file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove source file {}: {}", path.display(), e),
    }
}
