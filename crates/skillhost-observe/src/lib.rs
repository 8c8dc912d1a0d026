//! Observability for skillhost: subscriber setup and the attribute names
//! used on run spans.

pub mod run_attrs;
pub mod tracing_setup;

pub use tracing_setup::{LogFormat, init_tracing, shutdown_tracing};
