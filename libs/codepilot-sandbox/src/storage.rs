// Fixture storage: hidden unit tests addressed by key
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::error::StoreError;

#[async_trait]
pub trait FixtureStore: Send + Sync {
    /// Fetch the raw bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Serves fixtures from a directory laid out like the bucket it mirrors
#[derive(Debug, Clone)]
pub struct FsFixtureStore {
    root: PathBuf,
}

impl FsFixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !well_formed {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FixtureStore for FsFixtureStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}
