//! HTTP API for skillhost.
//!
//! Axum-based REST API at `/api/v1/` with the envelope response format,
//! an SSE endpoint for streamed runs, and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
