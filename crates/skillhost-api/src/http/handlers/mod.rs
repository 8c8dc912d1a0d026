//! REST API handlers, one module per resource.

pub mod run;
pub mod skill;
pub mod tool;
