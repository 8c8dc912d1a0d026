//! Shared domain types for skillhost.
//!
//! This crate contains the types that flow between the execution engine, its
//! storage adapters, and the transport layer: skill versions, runs, artifacts,
//! progress events, configuration, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono,
//! semver and thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod run;
pub mod skill;
