//! Error types for the gitpush core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for the invocation adapters,
//! which carry it as the reason of a failed [`Outcome`](crate::models::Outcome).

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Push(#[from] PushFailedError),
}

impl CoreError {
    /// Whether re-running the whole push protocol may succeed.
    ///
    /// Only transport failures and rejected pushes qualify; configuration
    /// problems and merge conflicts will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Push(err) => err.is_retryable(),
            Self::Git(err) => err.is_retryable(),
            Self::Config(_) | Self::Resolve(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The workspace path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Network, authentication or protocol failure talking to a remote.
    #[error("git {operation} via '{uri}' failed: {cause}")]
    Transport {
        operation: &'static str,
        uri: String,
        cause: git2::Error,
    },

    /// The remote refused to update a ref (e.g. non-fast-forward).
    #[error("git push rejected for '{refname}': {detail}")]
    PushRejected { refname: String, detail: String },

    /// The automatic merge produced textual conflicts.
    #[error("git merge conflict in {}", paths.join(", "))]
    MergeConflict { paths: Vec<String> },
}

impl GitError {
    /// Transport failures and rejected pushes can succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::PushRejected { .. })
    }
}

// ---------------------------------------------------------------------------
// Remote resolution errors
// ---------------------------------------------------------------------------

/// Errors turning a configured remote name into a concrete target.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No remote with this (expanded) name exists in the job's configuration.
    #[error("no repository found for target repo name '{0}'")]
    RemoteNotFound(String),

    /// The remote exists but has no URI to fetch from or push to.
    #[error("remote '{0}' has no configured URL")]
    NoUri(String),
}

// ---------------------------------------------------------------------------
// Push protocol errors
// ---------------------------------------------------------------------------

/// Failure of one step of the push protocol.
#[derive(Debug, Error)]
pub enum PushFailedError {
    #[error("failed to fetch from '{remote}': {cause}")]
    Fetch { remote: String, cause: GitError },

    /// The tracking ref for the target branch does not exist after fetching.
    #[error("unable to resolve revision '{revision}'; the branch does not exist on the remote")]
    RevisionNotFound { revision: String },

    /// Looking the tracking ref up failed for a reason other than absence.
    #[error("failed to resolve revision '{revision}': {cause}")]
    ResolveRevision { revision: String, cause: GitError },

    #[error("failed to read workspace HEAD: {0}")]
    ReadHead(GitError),

    #[error("failed to merge '{revision}' into HEAD: {cause}")]
    Merge { revision: String, cause: GitError },

    #[error("failed to push to '{remote}': {cause}")]
    Push { remote: String, cause: GitError },

    /// The push landed but tracking refs could not be refreshed afterwards.
    #[error("pushed to '{remote}' but failed to refresh tracking refs: {cause}")]
    Refetch { remote: String, cause: GitError },
}

impl PushFailedError {
    /// Whether re-running the whole protocol may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { cause, .. } | Self::Push { cause, .. } | Self::Refetch { cause, .. } => {
                cause.is_retryable()
            }
            Self::RevisionNotFound { .. }
            | Self::ResolveRevision { .. }
            | Self::ReadHead(_)
            | Self::Merge { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required field is missing or blank.
    #[error("'{field}' is required")]
    BlankField { field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// The push target names a remote the job does not configure.
    #[error("no remote repository configured with name '{name}'")]
    UnknownRemote { name: String },

    /// The job's source control is not git, so there is nothing to push.
    #[error("job is not configured to use git")]
    NotGitJob,

    /// The pipeline step was invoked without a source-control handle.
    #[error("source control configuration is missing")]
    MissingScm,

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConfigError {
    /// Attach the configuration field a blank or invalid value came from.
    pub fn for_field(self, field: &str) -> Self {
        match self {
            Self::BlankField { .. } => Self::BlankField {
                field: field.to_string(),
            },
            Self::InvalidValue { detail, .. } => Self::InvalidValue {
                field: field.to_string(),
                detail,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ResolveError::RemoteNotFound("upstream".into());
        assert_eq!(
            err.to_string(),
            "no repository found for target repo name 'upstream'"
        );

        let err = GitError::MergeConflict {
            paths: vec!["a.txt".into(), "b/c.txt".into()],
        };
        assert_eq!(err.to_string(), "git merge conflict in a.txt, b/c.txt");

        let err = PushFailedError::RevisionNotFound {
            revision: "origin/release".into(),
        };
        assert!(err.to_string().contains("origin/release"));

        let err = ConfigError::BlankField {
            field: "git_push.target_repo".into(),
        };
        assert_eq!(err.to_string(), "'git_push.target_repo' is required");
    }

    #[test]
    fn test_retry_classification() {
        let rejected = GitError::PushRejected {
            refname: "refs/heads/master".into(),
            detail: "non-fast-forward".into(),
        };
        let err: CoreError = PushFailedError::Push {
            remote: "origin".into(),
            cause: rejected,
        }
        .into();
        assert!(err.is_retryable());

        let conflict = GitError::MergeConflict {
            paths: vec!["a.txt".into()],
        };
        let err: CoreError = PushFailedError::Merge {
            revision: "origin/master".into(),
            cause: conflict,
        }
        .into();
        assert!(!err.is_retryable());

        let err: CoreError = ResolveError::RemoteNotFound("origin".into()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = ConfigError::NotGitJob.into();
        assert!(matches!(core_err, CoreError::Config(_)));

        let core_err: CoreError = GitError::RefNotFound("HEAD".into()).into();
        assert!(matches!(core_err, CoreError::Git(_)));
    }
}
