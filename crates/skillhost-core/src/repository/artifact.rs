use skillhost_types::error::RepositoryError;
use skillhost_types::run::Artifact;
use uuid::Uuid;

use crate::execution::sandbox::ArtifactFile;

/// Durable storage for artifact bytes.
///
/// `store` copies the file somewhere that outlives the run's working
/// directory and returns the artifact record (checksum, size, locator).
/// Recording that artifact against the run is the caller's job.
pub trait ArtifactStore: Send + Sync {
    fn store(
        &self,
        run_id: Uuid,
        file: &ArtifactFile,
    ) -> impl std::future::Future<Output = Result<Artifact, RepositoryError>> + Send;
}
