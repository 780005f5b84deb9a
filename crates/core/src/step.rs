//! Entry points the host calls: the post-build step, the pipeline step and
//! the aggregate completion hook.
//!
//! All three run the gate first, then resolve the target from the build
//! environment and drive the reconciler against the build's workspace.

use tracing::{info, instrument, warn};

use crate::config::{GitPushConfig, GitScm, IdentityConfig, JobConfig, ScmConfig};
use crate::errors::{ConfigError, CoreError};
use crate::gate;
use crate::git::{GitClient, Workspace};
use crate::models::{BuildContext, BuildKind, Outcome, PushReport, SkipReason, Target};
use crate::reconcile::reconcile;
use crate::remote::resolve_target;

// ---------------------------------------------------------------------------
// Post-build step
// ---------------------------------------------------------------------------

/// Push step declared in a job's configuration file.
#[derive(Debug, Clone)]
pub struct PostBuildStep {
    scm: ScmConfig,
    settings: GitPushConfig,
    identity: IdentityConfig,
}

impl PostBuildStep {
    /// `None` when the job does not configure a push step.
    pub fn from_job(job: &JobConfig) -> Option<Self> {
        let settings = job.git_push.clone()?;
        Some(Self {
            scm: job.scm.clone(),
            settings,
            identity: job.identity.clone(),
        })
    }

    pub fn settings(&self) -> &GitPushConfig {
        &self.settings
    }

    #[instrument(skip_all, fields(workspace = %build.workspace.display()))]
    pub fn perform(&self, build: &BuildContext) -> Outcome {
        gate::run(build.result, build.kind, || {
            let git = self.scm.as_git().ok_or(ConfigError::NotGitJob)?;
            execute(git, &self.settings, &self.identity, build)
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline step
// ---------------------------------------------------------------------------

/// Push step called programmatically with a ready-made source-control handle.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub scm: Option<GitScm>,
    pub settings: GitPushConfig,
    pub identity: IdentityConfig,
}

impl PipelineStep {
    pub fn new(scm: Option<GitScm>, settings: GitPushConfig) -> Self {
        Self {
            scm,
            settings,
            identity: IdentityConfig::default(),
        }
    }

    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    #[instrument(skip_all, fields(workspace = %build.workspace.display()))]
    pub fn run(&self, build: &BuildContext) -> Outcome {
        gate::run(build.result, build.kind, || {
            let git = self.scm.as_ref().ok_or(ConfigError::MissingScm)?;
            execute(git, &self.settings, &self.identity, build)
        })
    }
}

// ---------------------------------------------------------------------------
// Aggregate hook
// ---------------------------------------------------------------------------

/// Completion hook of a fan-out build: runs the job's push step exactly once,
/// against the aggregate's own checkout.
#[instrument(skip_all, fields(workspace = %build.workspace.display()))]
pub fn aggregate_end_build(job: &JobConfig, build: &BuildContext) -> Outcome {
    let Some(step) = PostBuildStep::from_job(job) else {
        info!("no push step configured on the job, nothing to do for the aggregate");
        return Outcome::Skipped(SkipReason::NotConfigured);
    };
    let build = build.clone().with_kind(BuildKind::StandaloneOrAggregate);
    step.perform(&build)
}

// ---------------------------------------------------------------------------
// Shared execution
// ---------------------------------------------------------------------------

fn execute(
    scm: &GitScm,
    settings: &GitPushConfig,
    identity: &IdentityConfig,
    build: &BuildContext,
) -> Result<PushReport, CoreError> {
    let target = resolve_target(
        scm,
        &settings.target_repo,
        &settings.target_branch,
        &build.environment,
    )?;
    let client = GitClient::new(&build.workspace)?.with_identity(identity.clone());
    push_with_retry(&client, &target, settings)
}

/// Run the whole protocol up to `settings.attempts` times, retrying only
/// failures classified as retryable.
pub fn push_with_retry<W: Workspace + ?Sized>(
    workspace: &W,
    target: &Target,
    settings: &GitPushConfig,
) -> Result<PushReport, CoreError> {
    let attempts = settings.attempts.max(1);
    let mut attempt = 1;
    loop {
        match reconcile(workspace, target, settings.missing_branch) {
            Ok(report) => return Ok(report),
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(attempt, attempts, error = %err, "push attempt failed, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
