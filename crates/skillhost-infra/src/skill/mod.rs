//! Skill bundles on disk and the subprocess handlers that run them.

pub mod bundle;
pub mod process;
pub mod resolver;
pub mod scan;
pub mod tools;
