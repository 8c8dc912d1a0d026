//! Execution engine for skillhost.
//!
//! This crate holds the run lifecycle, the per-run event bus, the execution
//! sandbox and the orchestrator, plus the repository and resolver traits that
//! `skillhost-infra` implements. It has no knowledge of SQLite, the
//! filesystem layout of bundles, or any particular interpreter.

pub mod event;
pub mod execution;
pub mod repository;
