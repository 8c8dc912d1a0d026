//! Run lifecycle tracking.
//!
//! [`RunTracker`] is the only writer of a run's status. Every transition is
//! validated against the lifecycle graph, persisted, and only then announced
//! on the event bus, so a subscriber that sees `status` can already read the
//! new state from the repository.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use skillhost_types::error::RepositoryError;
use skillhost_types::event::RunEvent;
use skillhost_types::run::{Run, RunStatus};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::event::RunEventBus;
use crate::repository::RunRepository;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid run transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Owns one run record and drives it through its states.
pub struct RunTracker<S: RunRepository> {
    run: Run,
    repo: Arc<S>,
    bus: RunEventBus,
    status_tx: watch::Sender<RunStatus>,
}

impl<S: RunRepository> RunTracker<S> {
    /// Track an already persisted run.
    pub fn new(run: Run, repo: Arc<S>, bus: RunEventBus) -> Self {
        let (status_tx, _) = watch::channel(run.status);
        Self {
            run,
            repo,
            bus,
            status_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.run.id
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn into_run(self) -> Run {
        self.run
    }

    /// Observe status changes in-process.
    pub fn watch(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    /// `queued -> running`.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        self.transition(RunStatus::Running, |_| {}).await
    }

    /// `running -> success`, storing outputs.
    pub async fn succeed(
        &mut self,
        outputs: Map<String, Value>,
        logs: String,
        duration_ms: u64,
    ) -> Result<(), LifecycleError> {
        self.transition(RunStatus::Success, move |run| {
            run.output = Some(outputs);
            run.logs = Some(logs);
            run.error = None;
            run.duration_ms = Some(duration_ms);
        })
        .await
    }

    /// `running -> error`.
    pub async fn fail(
        &mut self,
        error: String,
        logs: String,
        duration_ms: u64,
    ) -> Result<(), LifecycleError> {
        self.transition(RunStatus::Error, move |run| {
            run.output = None;
            run.logs = Some(logs);
            run.error = Some(error);
            run.duration_ms = Some(duration_ms);
        })
        .await
    }

    /// `running -> cancelled`. Nothing in the engine issues cancellation yet;
    /// the state exists so stored records can carry it.
    pub async fn cancel(&mut self, reason: String, duration_ms: u64) -> Result<(), LifecycleError> {
        self.transition(RunStatus::Cancelled, move |run| {
            run.output = None;
            run.error = Some(reason);
            run.duration_ms = Some(duration_ms);
        })
        .await
    }

    async fn transition(
        &mut self,
        next: RunStatus,
        apply: impl FnOnce(&mut Run),
    ) -> Result<(), LifecycleError> {
        let from = self.run.status;
        if !from.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition { from, to: next });
        }

        let mut updated = self.run.clone();
        updated.status = next;
        apply(&mut updated);
        if next.is_terminal() {
            updated.completed_at = Some(Utc::now());
        }

        self.repo.update_run(&updated).await?;
        self.run = updated;
        self.status_tx.send_replace(next);
        self.bus.publish(self.run.id, RunEvent::Status { status: next });

        if next.is_terminal() {
            info!(run_id = %self.run.id, %from, to = %next, "run finished");
        } else {
            debug!(run_id = %self.run.id, %from, to = %next, "run transitioned");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
