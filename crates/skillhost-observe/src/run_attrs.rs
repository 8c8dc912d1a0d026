//! Span and attribute names for skill execution.
//!
//! The engine's per-run span and the composition root's request spans use
//! these names so logs and exported traces can be joined on them.

/// Span covering one run from `running` to its terminal status.
pub const SPAN_SKILL_RUN: &str = "skill.run";

/// Span covering one multi-skill request.
pub const SPAN_SKILL_BATCH: &str = "skill.batch";

// --- Run attributes ---

pub const SKILL_RUN_ID: &str = "skill.run_id";
pub const SKILL_NAME: &str = "skill.name";
pub const SKILL_VERSION: &str = "skill.version";

/// Terminal status of the run (`success`, `error`, ...).
pub const SKILL_RUN_STATUS: &str = "skill.run.status";

// --- Batch attributes ---

/// `parallel` or `chain`.
pub const SKILL_BATCH_STRATEGY: &str = "skill.batch.strategy";

/// Number of skill versions in the request.
pub const SKILL_BATCH_SIZE: &str = "skill.batch.size";

/// Span for one streamed run started by a transport (CLI `stream`, HTTP SSE).
///
/// Field names match [`SKILL_RUN_ID`] and [`SKILL_NAME`].
pub fn run_span(run_id: uuid::Uuid, skill: &str) -> tracing::Span {
    tracing::info_span!(
        "skill.run.stream",
        skill.run_id = %run_id,
        skill.name = %skill,
        skill.run.status = tracing::field::Empty,
    )
}

/// Span for a multi-skill request. Field names match the batch constants.
pub fn batch_span(strategy: &str, size: usize) -> tracing::Span {
    tracing::info_span!(
        "skill.batch",
        skill.batch.strategy = %strategy,
        skill.batch.size = size,
    )
}

/// Record the terminal status on a span made by [`run_span`].
pub fn record_status(span: &tracing::Span, status: &str) {
    span.record(SKILL_RUN_STATUS, status);
}
