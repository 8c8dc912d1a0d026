//! Skill execution: resolving entrypoints, sandboxing handler calls, tracking
//! run lifecycle and composing runs.

pub mod handler;
pub mod lifecycle;
pub mod orchestrator;
pub mod resolver;
pub mod sandbox;

#[cfg(test)]
pub(crate) mod test_support;

pub use handler::{
    AsyncFnHandler, BlockingFnHandler, CapturedOutput, HandlerFailure, HandlerReply, Invocation,
    OutputCapture, SkillHandler,
};
pub use lifecycle::{LifecycleError, RunTracker};
pub use orchestrator::{OrchestrationError, Orchestrator, RunHandle, TimeoutPolicy};
pub use resolver::{EntrypointDescriptor, EntrypointResolver, ResolveError};
pub use sandbox::{
    ArtifactFile, Sandbox, SandboxError, SandboxFailure, SandboxLimits, SandboxResult,
};
