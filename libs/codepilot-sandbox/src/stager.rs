//! Artifact Stager
//!
//! Merges the user's code with the hidden fixture and writes the result where
//! the container runtime can bind-mount it. Every staged artifact is owned by
//! exactly one check and is consumed by `release`; an artifact dropped without
//! `release` (the pipeline panicked) deletes its file on drop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CheckError;
use crate::profiles::LanguageProfile;
use crate::storage::FixtureStore;

#[derive(Debug)]
pub struct StagedArtifact {
    pub id: Uuid,
    /// Location as seen by this process
    pub path: PathBuf,
    /// Location as seen by the container runtime
    pub host_path: PathBuf,
    pub content: String,
    released: bool,
}

impl StagedArtifact {
    pub(crate) fn new(id: Uuid, path: PathBuf, host_path: PathBuf, content: String) -> Self {
        Self {
            id,
            path,
            host_path,
            content,
            released: false,
        }
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Unwinding or an aborted task skipped release; runs outside the async fs pool
        match std::fs::remove_file(&self.path) {
            Ok(()) => warn!(artifact_id = %self.id, "Released dropped artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                artifact_id = %self.id,
                path = %self.path.display(),
                error = %e,
                "Failed to remove dropped artifact"
            ),
        }
    }
}

pub struct ArtifactStager {
    staging_dir: PathBuf,
    host_staging_dir: PathBuf,
    store: Arc<dyn FixtureStore>,
}

impl ArtifactStager {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        host_staging_dir: impl Into<PathBuf>,
        store: Arc<dyn FixtureStore>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            host_staging_dir: host_staging_dir.into(),
            store,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Create the staging directory
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await
    }

    pub async fn stage(
        &self,
        fixture_key: &str,
        user_code: &str,
        profile: &LanguageProfile,
    ) -> Result<StagedArtifact, CheckError> {
        let fixture = self
            .store
            .get(fixture_key)
            .await
            .map_err(|source| CheckError::FixtureFetch {
                key: fixture_key.to_string(),
                source,
            })?;
        let fixture = String::from_utf8_lossy(&fixture);

        let content = profile.merge_order.merge(user_code, &fixture);

        let id = Uuid::new_v4();
        let file_name = format!("{}.{}", id, profile.file_extension);
        let path = self.staging_dir.join(&file_name);
        let host_path = self.host_staging_dir.join(&file_name);

        if let Err(source) = tokio::fs::write(&path, content.as_bytes()).await {
            // A failed write can still leave a partial file behind
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove partially staged artifact");
                }
            }
            return Err(CheckError::StagingIo { path, source });
        }

        debug!(
            artifact_id = %id,
            path = %path.display(),
            bytes = content.len(),
            "Artifact staged"
        );

        Ok(StagedArtifact::new(id, path, host_path, content))
    }

    /// Delete the staged file. Failures are logged, never returned.
    pub async fn release(&self, mut artifact: StagedArtifact) {
        artifact.released = true;
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => debug!(artifact_id = %artifact.id, "Artifact released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(artifact_id = %artifact.id, "Artifact already gone");
            }
            Err(e) => warn!(
                artifact_id = %artifact.id,
                path = %artifact.path.display(),
                error = %e,
                "Failed to release artifact"
            ),
        }
    }
}
