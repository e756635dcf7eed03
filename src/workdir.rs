//! The shared work directory and its administrative reset.

use crate::error::BundleError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Handle to the directory where downloads, staging folders and bundles live.
///
/// Clones share one lock: a pipeline run holds it for its whole duration and
/// [`WorkDir::clear`] takes it too, so a reset can never race an active job.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
    admin_id: Option<u64>,
    lock: Arc<Mutex<()>>,
}

impl WorkDir {
    /// Opens (creating if needed) the work directory at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BundleError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            admin_id: None,
            lock: Arc::new(Mutex::new(())),
        })
    }

    /// Sets the only caller allowed to clear the directory.
    pub fn with_admin(mut self, admin_id: u64) -> Self {
        self.admin_id = Some(admin_id);
        self
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Waits for exclusive use of the directory.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Removes everything under the directory and recreates it empty.
    ///
    /// Fails with [`BundleError::AccessDenied`] without touching anything
    /// unless `caller` is the configured admin. Waits for a running job to
    /// finish first.
    pub async fn clear(&self, caller: u64) -> Result<(), BundleError> {
        if self.admin_id != Some(caller) {
            warn!("Rejected clear request from caller {}", caller);
            return Err(BundleError::AccessDenied { caller });
        }

        let _guard = self.lock().await;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.root).await?;

        info!("🧹 Cleared work directory {}", self.root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const ADMIN: u64 = 42;

    async fn populated(temp: &TempDir) -> WorkDir {
        let work_dir = WorkDir::open(temp.path().join("work"))
            .await
            .unwrap()
            .with_admin(ADMIN);
        std::fs::write(work_dir.path().join("a.bin"), b"a").unwrap();
        std::fs::create_dir_all(work_dir.path().join("Folder_1")).unwrap();
        work_dir
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let work_dir = WorkDir::open(temp.path().join("nested/work")).await.unwrap();
        assert!(work_dir.path().is_dir());
    }

    #[tokio::test]
    async fn test_clear_by_admin_empties_directory() {
        let temp = TempDir::new().unwrap();
        let work_dir = populated(&temp).await;

        work_dir.clear(ADMIN).await.unwrap();

        assert!(work_dir.path().is_dir());
        assert_eq!(entries(work_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_clear_by_other_caller_is_denied() {
        let temp = TempDir::new().unwrap();
        let work_dir = populated(&temp).await;

        let err = work_dir.clear(7).await.unwrap_err();

        assert!(matches!(err, BundleError::AccessDenied { caller: 7 }));
        assert_eq!(entries(work_dir.path()), 2);
    }

    #[tokio::test]
    async fn test_clear_without_admin_is_always_denied() {
        let temp = TempDir::new().unwrap();
        let work_dir = WorkDir::open(temp.path()).await.unwrap();
        assert!(matches!(
            work_dir.clear(0).await,
            Err(BundleError::AccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_clear_waits_for_running_job() {
        let temp = TempDir::new().unwrap();
        let work_dir = populated(&temp).await;

        let guard = work_dir.lock().await;
        let clearing = {
            let work_dir = work_dir.clone();
            tokio::spawn(async move { work_dir.clear(ADMIN).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!clearing.is_finished());
        assert_eq!(entries(work_dir.path()), 2);

        drop(guard);
        clearing.await.unwrap().unwrap();
        assert_eq!(entries(work_dir.path()), 0);
    }
}
