use skillhost_types::error::RepositoryError;
use skillhost_types::skill::SkillVersion;
use uuid::Uuid;

/// Read access to published skill versions.
///
/// The engine never writes versions; registration belongs to whatever
/// catalog backs this trait.
pub trait SkillVersionRepository: Send + Sync {
    fn get_version(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<SkillVersion>, RepositoryError>> + Send;

    fn list_versions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<SkillVersion>, RepositoryError>> + Send;
}
