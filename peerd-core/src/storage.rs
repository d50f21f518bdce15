//! Storage requests and the executor that carries them out.

use crate::{PeerError, Result};
use async_trait::async_trait;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// One filesystem mutation decided by the basket status resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRequest {
    Create { path: PathBuf },
    Clone { source: PathBuf, dest: PathBuf },
    Delete { source: PathBuf, dest: PathBuf },
    Cancel { source: PathBuf, dest: PathBuf },
    Finalize { source: PathBuf, dest: PathBuf },
}

impl StorageRequest {
    /// The path the basket occupies once the request is applied.
    pub fn target(&self) -> &Path {
        match self {
            Self::Create { path } => path,
            Self::Clone { dest, .. }
            | Self::Delete { dest, .. }
            | Self::Cancel { dest, .. }
            | Self::Finalize { dest, .. } => dest,
        }
    }
}

impl fmt::Display for StorageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { path } => write!(f, "create {}", path.display()),
            Self::Clone { source, dest } => {
                write!(f, "clone {} -> {}", source.display(), dest.display())
            }
            Self::Delete { source, dest } => {
                write!(f, "delete {} -> {}", source.display(), dest.display())
            }
            Self::Cancel { source, dest } => {
                write!(f, "cancel {} -> {}", source.display(), dest.display())
            }
            Self::Finalize { source, dest } => {
                write!(f, "finalize {} -> {}", source.display(), dest.display())
            }
        }
    }
}

#[async_trait]
pub trait StorageExecutor: Send + Sync {
    async fn execute(&self, request: &StorageRequest) -> Result<()>;
}

/// Applies storage requests to the local filesystem.
///
/// Destination directories are claimed exclusively, so two racing requests
/// for the same target resolve to one success and one `AlreadyExists`.
#[derive(Debug, Default, Clone)]
pub struct FsStorageExecutor;

impl FsStorageExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn claim_dir(path: &Path) -> Result<()> {
        ensure_parent(path).await?;
        fs::create_dir(path).await.map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => PeerError::AlreadyExists(path.display().to_string()),
            _ => storage_error("create", path, e),
        })
    }

    /// Claims `dest` as an empty directory, then renames `source` over the
    /// claim. Racing moves to one destination see exactly one winner.
    async fn move_dir(source: &Path, dest: &Path) -> Result<()> {
        Self::claim_dir(dest).await?;
        if let Err(e) = fs::rename(source, dest).await {
            if let Err(cleanup) = fs::remove_dir(dest).await {
                tracing::warn!("Failed to release claim on {}: {}", dest.display(), cleanup);
            }
            return Err(storage_error("rename", source, e));
        }
        Ok(())
    }

    async fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
        Self::claim_dir(dest).await?;

        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
            .await
            .map_err(|e| PeerError::StorageExecution(format!("clone task failed: {}", e)))?
    }
}

#[async_trait]
impl StorageExecutor for FsStorageExecutor {
    async fn execute(&self, request: &StorageRequest) -> Result<()> {
        tracing::debug!("Executing storage request: {}", request);
        match request {
            StorageRequest::Create { path } => Self::claim_dir(path).await,
            StorageRequest::Clone { source, dest } => Self::copy_dir(source, dest).await,
            StorageRequest::Delete { source, dest }
            | StorageRequest::Cancel { source, dest }
            | StorageRequest::Finalize { source, dest } => Self::move_dir(source, dest).await,
        }
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_error("create parent of", path, e))?;
    }
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    let entries = std::fs::read_dir(source).map_err(|e| storage_error("read", source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| storage_error("read", source, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| storage_error("stat", &from, e))?;

        if file_type.is_dir() {
            std::fs::create_dir(&to).map_err(|e| storage_error("create", &to, e))?;
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|e| storage_error("copy", &from, e))?;
        }
    }
    Ok(())
}

fn storage_error(action: &str, path: &Path, error: std::io::Error) -> PeerError {
    PeerError::StorageExecution(format!("{} {}: {}", action, path.display(), error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let executor = FsStorageExecutor::new();
        let path = temp_dir.path().join("1/baskets/w/0/000/000/1.1.1");
        let request = StorageRequest::Create { path: path.clone() };

        executor.execute(&request).await.unwrap();
        assert!(path.is_dir());

        let error = executor.execute(&request).await.unwrap_err();
        assert!(matches!(error, PeerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_clone_copies_tree() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("a/1.1.1");
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("data"), b"payload").unwrap();
        std::fs::write(source.join("sub/more"), b"nested").unwrap();

        let dest = temp_dir.path().join("w/1.1.1");
        FsStorageExecutor::new()
            .execute(&StorageRequest::Clone {
                source: source.clone(),
                dest: dest.clone(),
            })
            .await
            .unwrap();

        assert_eq!(std::fs::read(dest.join("data")).unwrap(), b"payload");
        assert_eq!(std::fs::read(dest.join("sub/more")).unwrap(), b"nested");
        assert!(source.join("data").exists());
    }

    #[tokio::test]
    async fn test_move_refuses_existing_destination() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("w/1.1.1");
        let dest = temp_dir.path().join("a/1.1.1");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&dest).unwrap();

        let error = FsStorageExecutor::new()
            .execute(&StorageRequest::Finalize {
                source: source.clone(),
                dest,
            })
            .await
            .unwrap_err();
        assert!(matches!(error, PeerError::AlreadyExists(_)));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_move_missing_source_is_storage_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("d/9.1.1");
        let error = FsStorageExecutor::new()
            .execute(&StorageRequest::Delete {
                source: temp_dir.path().join("a/9.1.1"),
                dest: dest.clone(),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, PeerError::StorageExecution(_)));
        assert!(!dest.exists(), "claim released");
    }

    #[tokio::test]
    async fn test_racing_moves_to_one_destination() {
        let temp_dir = tempfile::tempdir().unwrap();
        let first = temp_dir.path().join("w/1.1.1");
        let second = temp_dir.path().join("w/1.1.1.other");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(first.join("data"), b"first").unwrap();
        std::fs::write(second.join("data"), b"second").unwrap();
        let dest = temp_dir.path().join("a/1.1.1");

        let executor = FsStorageExecutor::new();
        let move_first = StorageRequest::Finalize {
            source: first.clone(),
            dest: dest.clone(),
        };
        let move_second = StorageRequest::Finalize {
            source: second.clone(),
            dest: dest.clone(),
        };
        let (a, b) = tokio::join!(executor.execute(&move_first), executor.execute(&move_second));

        let outcomes = [(a, &first), (b, &second)];
        let winners: Vec<_> = outcomes.iter().filter(|(r, _)| r.is_ok()).collect();
        assert_eq!(winners.len(), 1);
        for (result, source) in &outcomes {
            match result {
                Ok(()) => assert!(!source.exists()),
                Err(error) => {
                    assert!(matches!(error, PeerError::AlreadyExists(_)));
                    assert!(source.join("data").is_file(), "loser left in place");
                }
            }
        }

        let kept = std::fs::read(dest.join("data")).unwrap();
        let winner_source = winners[0].1;
        let expected = if winner_source == &first {
            &b"first"[..]
        } else {
            &b"second"[..]
        };
        assert_eq!(kept, expected);
    }
}
