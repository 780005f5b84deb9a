//! Domain model types used throughout gitpush.
//!
//! These types bridge the host adapters, the gate and the reconciler.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::env::Environment;
use crate::errors::CoreError;

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Concrete fetch/push destination for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Name of the configured remote (after expansion).
    pub repository_name: String,
    /// Branch to push to (after expansion).
    pub branch_name: String,
    /// First configured URL of the remote.
    pub uri: String,
    /// Ref-specs used when fetching, in configured order.
    pub fetch_refspecs: Vec<String>,
}

impl Target {
    /// Branch name without a leading `refs/heads/`.
    pub fn short_branch(&self) -> &str {
        short_branch_name(&self.branch_name)
    }

    /// Local tracking revision for the target branch, e.g. `origin/master`.
    pub fn tracking_revision(&self) -> String {
        format!("{}/{}", self.repository_name, self.short_branch())
    }

    /// Ref-spec pushing local HEAD to the target branch.
    ///
    /// libgit2 requires a fully qualified destination, so the branch is
    /// always placed under `refs/heads/`.
    pub fn push_refspec(&self) -> String {
        format!("HEAD:refs/heads/{}", self.short_branch())
    }
}

/// `refs/heads/main` and `main` name the same branch.
pub fn short_branch_name(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}

// ---------------------------------------------------------------------------
// Build context
// ---------------------------------------------------------------------------

/// Result of the build as reported by the host, from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildResult {
    pub fn is_worse_than(self, other: BuildResult) -> bool {
        self > other
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Unstable => write!(f, "unstable"),
            Self::Failure => write!(f, "failure"),
            Self::NotBuilt => write!(f, "not_built"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl FromStr for BuildResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "unstable" => Ok(Self::Unstable),
            "failure" | "failed" => Ok(Self::Failure),
            "not_built" | "not-built" => Ok(Self::NotBuilt),
            "aborted" => Ok(Self::Aborted),
            other => Err(format!(
                "unknown build result '{other}' (expected success, unstable, failure, not_built or aborted)"
            )),
        }
    }
}

/// Position of this invocation in the build topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    /// A plain build, or the aggregate of a fan-out build.
    #[default]
    StandaloneOrAggregate,
    /// One configuration run of a fan-out build.
    FanOutUnit,
}

/// Everything the host knows about the running build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// `None` when the host has not recorded a result yet.
    pub result: Option<BuildResult>,
    pub kind: BuildKind,
    pub environment: Environment,
    /// Checkout directory owned by this build.
    pub workspace: PathBuf,
}

impl BuildContext {
    pub fn new(workspace: impl Into<PathBuf>, result: Option<BuildResult>) -> Self {
        Self {
            result,
            kind: BuildKind::default(),
            environment: Environment::default(),
            workspace: workspace.into(),
        }
    }

    pub fn with_kind(mut self, kind: BuildKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }
}

// ---------------------------------------------------------------------------
// Reconciliation report
// ---------------------------------------------------------------------------

/// How local HEAD was integrated with the remote tip before pushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    /// HEAD already equalled the remote tip; no merge attempted.
    AlreadyInSync,
    /// The remote tip was already contained in HEAD.
    UpToDate,
    /// HEAD moved forward to the remote tip.
    FastForward,
    /// A two-parent merge commit was created.
    MergeCommit,
    /// The branch did not exist on the remote and was created from HEAD.
    BranchCreated,
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInSync => write!(f, "already in sync"),
            Self::UpToDate => write!(f, "up to date"),
            Self::FastForward => write!(f, "fast-forward"),
            Self::MergeCommit => write!(f, "merge commit"),
            Self::BranchCreated => write!(f, "branch created"),
        }
    }
}

/// Summary of a successful reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushReport {
    pub repository: String,
    pub branch: String,
    pub uri: String,
    /// Remote tip seen after the initial fetch; `None` if the branch was new.
    pub remote_tip: Option<String>,
    /// Local HEAD before any merge.
    pub head_before: String,
    /// Commit pushed to the branch.
    pub pushed_head: String,
    pub action: MergeAction,
    /// Tag names included in the push.
    pub tags: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why a step decided not to push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The build result was missing or worse than success.
    BuildNotSuccessful,
    /// This is one unit of a fan-out build; the aggregate pushes instead.
    FanOutUnit,
    /// The job has no push step configured.
    NotConfigured,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildNotSuccessful => write!(f, "build did not succeed"),
            Self::FanOutUnit => write!(f, "fan-out unit; the aggregate pushes once"),
            Self::NotConfigured => write!(f, "no push step configured"),
        }
    }
}

/// Result of one step invocation, handed back to the host.
#[derive(Debug)]
pub enum Outcome {
    Success(PushReport),
    Skipped(SkipReason),
    Failed(CoreError),
}

impl Outcome {
    /// Host mapping: skips are successful steps, only failures fail the step.
    pub fn is_step_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    pub fn report(&self) -> Option<&PushReport> {
        match self {
            Self::Success(report) => Some(report),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    /// JSON rendering for machine consumption by the host.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Success(report) => serde_json::json!({
                "outcome": self.label(),
                "report": report,
            }),
            Self::Skipped(reason) => serde_json::json!({
                "outcome": self.label(),
                "reason": reason,
                "message": reason.to_string(),
            }),
            Self::Failed(err) => serde_json::json!({
                "outcome": self.label(),
                "error": err.to_string(),
                "retryable": err.is_retryable(),
            }),
        }
    }
}
