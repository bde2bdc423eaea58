//! Versioned-file store boundary and the local-filesystem implementation.

use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

/// Opaque token returned by a read; required to perform a conflict-checked
/// write of the same file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionToken(pub String);

/// Write failure split by recoverability: a `Conflict` drives the single
/// automatic retry, anything else propagates.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("version conflict: file changed since it was read")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Remote storage collaborator: read a file with its version token, write it
/// back conflict-checked against that token.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// File content and current version token; None when the file is absent
    async fn read(&self, path: &str) -> anyhow::Result<Option<(String, VersionToken)>>;

    /// Write with optimistic concurrency. `token` must match the store's
    /// current version (None asserts the file does not exist yet).
    async fn write(&self, path: &str, content: &str, token: Option<&VersionToken>) -> Result<(), WriteError>;
}

/// Local-filesystem implementation. The version token is a fingerprint of the
/// file bytes, and writes go through a temp file + rename.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn fingerprint(bytes: &[u8]) -> VersionToken {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        bytes.hash(&mut hasher);
        VersionToken(format!("{:016x}", hasher.finish()))
    }

    async fn current_token(&self, path: &str) -> anyhow::Result<Option<VersionToken>> {
        match tokio::fs::read(self.full_path(path)).await {
            Ok(bytes) => Ok(Some(Self::fingerprint(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("failed to stat history file"),
        }
    }
}

#[async_trait]
impl VersionedStore for LocalFileStore {
    async fn read(&self, path: &str) -> anyhow::Result<Option<(String, VersionToken)>> {
        match tokio::fs::read(self.full_path(path)).await {
            Ok(bytes) => {
                let token = Self::fingerprint(&bytes);
                Ok(Some((String::from_utf8_lossy(&bytes).into_owned(), token)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("failed to read history file"),
        }
    }

    async fn write(&self, path: &str, content: &str, token: Option<&VersionToken>) -> Result<(), WriteError> {
        let current = self.current_token(path).await?;
        if current.as_ref() != token {
            return Err(WriteError::Conflict);
        }

        let target = self.full_path(path);
        let tmp = target.with_extension("tmp");
        tokio::fs::write(&tmp, content.as_bytes())
            .await
            .context("failed to write temp history file")?;
        tokio::fs::rename(&tmp, &target)
            .await
            .context("failed to move history file into place")?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> (LocalFileStore, String) {
        let dir = std::env::temp_dir().join(format!("premium-store-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        (LocalFileStore::new(&dir), "history.csv".to_string())
    }

    #[tokio::test]
    async fn test_read_absent_file() {
        let (store, path) = temp_store("absent");
        assert!(store.read(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (store, path) = temp_store("roundtrip");
        store.write(&path, "hello", None).await.unwrap();

        let (content, token) = store.read(&path).await.unwrap().unwrap();
        assert_eq!(content, "hello");

        // conflict-checked overwrite with the right token succeeds
        store.write(&path, "world", Some(&token)).await.unwrap();
        let (content, _) = store.read(&path).await.unwrap().unwrap();
        assert_eq!(content, "world");
    }

    #[tokio::test]
    async fn test_stale_token_conflicts() {
        let (store, path) = temp_store("stale");
        store.write(&path, "v1", None).await.unwrap();
        let (_, token) = store.read(&path).await.unwrap().unwrap();

        // another writer lands v2
        store.write(&path, "v2", Some(&token)).await.unwrap();

        // the stale token must now be rejected
        let err = store.write(&path, "v3", Some(&token)).await.unwrap_err();
        assert!(matches!(err, WriteError::Conflict));
    }

    #[tokio::test]
    async fn test_create_conflicts_when_file_exists() {
        let (store, path) = temp_store("create");
        store.write(&path, "v1", None).await.unwrap();
        let err = store.write(&path, "v1-again", None).await.unwrap_err();
        assert!(matches!(err, WriteError::Conflict));
    }
}
