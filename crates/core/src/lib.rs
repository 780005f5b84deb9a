//! gitpush core library.
//!
//! Pushes the commits a CI build produced back to a git remote: the gate
//! decides whether a build may push, the resolver turns configured
//! remote/branch names into a concrete target, and the reconciler fetches,
//! merges when the remote moved, pushes with tags and re-fetches.

pub mod config;
pub mod env;
pub mod errors;
pub mod gate;
pub mod git;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod step;
pub mod validation;

// Re-exports for convenience.
pub use config::{GitPushConfig, JobConfig};
pub use env::Environment;
pub use errors::CoreError;
pub use git::GitClient;
pub use models::{BuildContext, BuildKind, BuildResult, Outcome, PushReport};
pub use step::{aggregate_end_build, PipelineStep, PostBuildStep};
