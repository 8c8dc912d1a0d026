use skillhost_types::error::RepositoryError;
use skillhost_types::run::{Artifact, Run};
use uuid::Uuid;

/// Repository trait for run records and their artifacts.
///
/// Implementations live in skillhost-infra (e.g., SqliteRunRepository).
pub trait RunRepository: Send + Sync {
    fn create_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite the mutable fields of an existing run.
    fn update_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_run(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, RepositoryError>> + Send;

    /// Most recent runs first.
    fn list_runs(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, RepositoryError>> + Send;

    fn create_artifact(
        &self,
        artifact: &Artifact,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_artifacts(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Artifact>, RepositoryError>> + Send;
}
