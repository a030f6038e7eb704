//! Commissioner - orchestration core for multi-node database universes
//!
//! Commissioner mutates a live universe through fixed, multi-phase operations
//! (resume, node resize, TLS toggle) while unaffected nodes keep serving.
//!
//! # Architecture
//!
//! - Requests are validated against the persisted universe before anything
//!   is locked.
//! - A per-universe lease serializes mutating operations and carries the
//!   working copy; it is released on every exit path.
//! - Each operation expands into an ordered list of sub-task groups with a
//!   barrier between groups.
//! - On success the working copy is committed with compare-and-swap on the
//!   universe version.
//!
//! # Modules
//!
//! - [`model`] - Universe data model and operation requests
//! - [`validation`] - Resize and TLS toggle precondition checks
//! - [`lock`] - Per-universe leases
//! - [`store`] - Persistence gateway
//! - [`backend`] - Node execution, key service, telemetry and artifact collaborators
//! - [`task`] - Sub-task groups and their execution
//! - [`orchestrator`] - The top-level driver and per-operation phase plans
//! - [`retry`] - Backoff and bounded health polling
//! - [`config`] - Orchestrator configuration
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod validation;

pub use error::Error;
pub use orchestrator::{Context, TaskOrchestrator};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
