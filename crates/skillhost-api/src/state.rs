//! Application state wiring the execution engine to its adapters.
//!
//! The orchestrator is generic over its storage and resolver ports; AppState
//! pins it to the concrete infra implementations and is shared by both the
//! CLI commands and the HTTP handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use skillhost_core::event::RunEventBus;
use skillhost_core::execution::Orchestrator;
use skillhost_infra::config::{artifacts_dir, data_dir, database_url, load_host_config};
use skillhost_infra::skill::bundle::BundleCatalog;
use skillhost_infra::skill::resolver::ProcessEntrypointResolver;
use skillhost_infra::sqlite::pool::DatabasePool;
use skillhost_infra::sqlite::run::SqliteRunRepository;
use skillhost_infra::storage::artifacts::LocalArtifactStore;
use skillhost_types::config::HostConfig;
use skillhost_types::skill::SkillVersion;

pub type ConcreteOrchestrator = Orchestrator<
    BundleCatalog,
    SqliteRunRepository,
    LocalArtifactStore,
    ProcessEntrypointResolver,
>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConcreteOrchestrator>,
    /// Same index the orchestrator reads versions from.
    pub catalog: BundleCatalog,
    pub runs: Arc<SqliteRunRepository>,
    pub config: HostConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize from the default data directory.
    pub async fn init() -> anyhow::Result<Self> {
        Self::init_in(data_dir()).await
    }

    /// Initialize with all state under `data_dir`: config, database, artifacts.
    pub async fn init_in(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_host_config(&data_dir).await;

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("Failed to open run database")?;
        let runs = Arc::new(SqliteRunRepository::new(db_pool));

        let catalog = BundleCatalog::new();
        let orchestrator = Orchestrator::new(
            catalog.clone(),
            Arc::clone(&runs),
            LocalArtifactStore::new(artifacts_dir(&data_dir)),
            ProcessEntrypointResolver::from_config(&config),
            RunEventBus::new(),
            &config,
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            catalog,
            runs,
            config,
            data_dir,
        })
    }

    /// Register bundle directories, preserving argument order.
    pub async fn register_bundles(&self, dirs: &[PathBuf]) -> anyhow::Result<Vec<SkillVersion>> {
        let mut versions = Vec::with_capacity(dirs.len());
        for dir in dirs {
            versions.push(self.register_bundle(dir).await?);
        }
        Ok(versions)
    }

    pub async fn register_bundle(&self, dir: &Path) -> anyhow::Result<SkillVersion> {
        self.catalog
            .register_dir(dir)
            .await
            .with_context(|| format!("Failed to load skill bundle {}", dir.display()))
    }
}
