//! The push protocol: bring the remote branch up to date with the workspace.
//!
//! Each attempt runs, in order:
//!
//! 1. fetch the target's ref-specs from its URI;
//! 2. resolve the tracking revision `<remote>/<branch>`;
//! 3. compare it with local HEAD;
//! 4. merge it into HEAD when they differ (fast-forward or a two-parent
//!    merge commit, never a rebase);
//! 5. push `HEAD:<branch>` together with every local tag;
//! 6. fetch again so tracking refs match what was pushed.
//!
//! Two protocol variants exist historically: one always merges before
//! pushing and re-fetches afterwards, the other compares first and skips the
//! merge when HEAD already equals the remote tip, with no trailing fetch.
//! This implementation compares first *and* re-fetches. Skipping the merge
//! on equality avoids spurious merge commits on rebuilds; the trailing fetch
//! keeps tracking refs consistent for later steps of the same build.
//!
//! Every attempt starts from a fresh fetch, so the whole protocol can be
//! retried after a transport failure or a rejected push.

use chrono::Utc;
use git2::Oid;
use tracing::{debug, info, instrument, warn};

use crate::config::MissingBranchPolicy;
use crate::errors::PushFailedError;
use crate::git::{MergeOutcome, Workspace};
use crate::models::{MergeAction, PushReport, Target};

/// Run one attempt of the push protocol against `workspace`.
#[instrument(skip(workspace, target), fields(remote = %target.repository_name, branch = %target.branch_name))]
pub fn reconcile<W: Workspace + ?Sized>(
    workspace: &W,
    target: &Target,
    missing_branch: MissingBranchPolicy,
) -> Result<PushReport, PushFailedError> {
    let started_at = Utc::now();
    let remote = target.repository_name.clone();

    workspace
        .fetch(&target.uri, &target.fetch_refspecs)
        .map_err(|cause| PushFailedError::Fetch {
            remote: remote.clone(),
            cause,
        })?;

    let revision = target.tracking_revision();
    let remote_tip = workspace
        .resolve_revision(&revision)
        .map_err(|cause| PushFailedError::ResolveRevision {
            revision: revision.clone(),
            cause,
        })?;

    let head_before = workspace.head().map_err(PushFailedError::ReadHead)?;

    let (pushed_head, action) = match remote_tip {
        None => match missing_branch {
            MissingBranchPolicy::Fail => {
                return Err(PushFailedError::RevisionNotFound { revision });
            }
            MissingBranchPolicy::Create => {
                info!(%revision, "branch does not exist on the remote, creating it");
                (head_before, MergeAction::BranchCreated)
            }
        },
        Some(tip) if tip == head_before => {
            debug!(%tip, "HEAD already equals the remote tip, skipping merge");
            (head_before, MergeAction::AlreadyInSync)
        }
        Some(tip) => merge_remote_tip(workspace, &revision, tip)?,
    };

    let tags = workspace
        .push(&target.uri, &target.push_refspec(), true)
        .map_err(|cause| PushFailedError::Push {
            remote: remote.clone(),
            cause,
        })?;

    workspace
        .fetch(&target.uri, &target.fetch_refspecs)
        .map_err(|cause| PushFailedError::Refetch {
            remote: remote.clone(),
            cause,
        })?;

    info!(head = %pushed_head, %action, tags = tags.len(), "pushed");
    Ok(PushReport {
        repository: remote,
        branch: target.branch_name.clone(),
        uri: target.uri.clone(),
        remote_tip: remote_tip.map(|oid| oid.to_string()),
        head_before: head_before.to_string(),
        pushed_head: pushed_head.to_string(),
        action,
        tags,
        started_at,
        completed_at: Utc::now(),
    })
}

fn merge_remote_tip<W: Workspace + ?Sized>(
    workspace: &W,
    revision: &str,
    tip: Oid,
) -> Result<(Oid, MergeAction), PushFailedError> {
    let outcome = workspace
        .merge(tip)
        .map_err(|cause| {
            warn!(%revision, error = %cause, "automatic merge failed");
            PushFailedError::Merge {
                revision: revision.to_string(),
                cause,
            }
        })?;
    let action = match outcome {
        MergeOutcome::UpToDate(_) => MergeAction::UpToDate,
        MergeOutcome::FastForward(_) => MergeAction::FastForward,
        MergeOutcome::Merged(_) => MergeAction::MergeCommit,
    };
    Ok((outcome.head(), action))
}
