//! Infrastructure adapters for skillhost.
//!
//! Implements the repository, artifact-store and resolver traits from
//! `skillhost-core` on top of SQLite, the local filesystem and interpreter
//! subprocesses.

pub mod config;
pub mod skill;
pub mod sqlite;
pub mod storage;
