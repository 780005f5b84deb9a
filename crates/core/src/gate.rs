//! Decides whether a build may push at all.

use tracing::{debug, error, info};

use crate::errors::CoreError;
use crate::models::{BuildKind, BuildResult, Outcome, PushReport, SkipReason};

/// Verdict of the gate for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Skip(SkipReason),
}

/// Fan-out units never push; the aggregate does it once. Anything other
/// than an explicit success result also skips.
pub fn evaluate(result: Option<BuildResult>, kind: BuildKind) -> Decision {
    if kind == BuildKind::FanOutUnit {
        debug!("fan-out unit, leaving the push to the aggregate");
        return Decision::Skip(SkipReason::FanOutUnit);
    }

    match result {
        Some(result) if !result.is_worse_than(BuildResult::Success) => Decision::Proceed,
        _ => {
            info!("Build did not succeed, so no pushing will occur.");
            Decision::Skip(SkipReason::BuildNotSuccessful)
        }
    }
}

/// Run `push` only when the gate lets the build through.
pub fn run<F>(result: Option<BuildResult>, kind: BuildKind, push: F) -> Outcome
where
    F: FnOnce() -> Result<PushReport, CoreError>,
{
    match evaluate(result, kind) {
        Decision::Skip(reason) => Outcome::Skipped(reason),
        Decision::Proceed => match push() {
            Ok(report) => Outcome::Success(report),
            Err(err) => {
                error!(error = %err, "failed to push to the remote repository");
                Outcome::Failed(err)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use chrono::Utc;

    use super::*;
    use crate::errors::ResolveError;
    use crate::models::MergeAction;

    fn report() -> PushReport {
        PushReport {
            repository: "origin".into(),
            branch: "master".into(),
            uri: "/srv/git/app.git".into(),
            remote_tip: None,
            head_before: "a".repeat(40),
            pushed_head: "a".repeat(40),
            action: MergeAction::BranchCreated,
            tags: vec![],
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_only_success_proceeds() {
        assert_eq!(
            evaluate(Some(BuildResult::Success), BuildKind::StandaloneOrAggregate),
            Decision::Proceed
        );
        for result in [
            None,
            Some(BuildResult::Unstable),
            Some(BuildResult::Failure),
            Some(BuildResult::NotBuilt),
            Some(BuildResult::Aborted),
        ] {
            assert_eq!(
                evaluate(result, BuildKind::StandaloneOrAggregate),
                Decision::Skip(SkipReason::BuildNotSuccessful)
            );
        }
    }

    #[test]
    fn test_fan_out_unit_always_skips() {
        assert_eq!(
            evaluate(Some(BuildResult::Success), BuildKind::FanOutUnit),
            Decision::Skip(SkipReason::FanOutUnit)
        );
        assert_eq!(
            evaluate(Some(BuildResult::Failure), BuildKind::FanOutUnit),
            Decision::Skip(SkipReason::FanOutUnit)
        );
    }

    #[test]
    fn test_skip_never_invokes_push() {
        let called = Cell::new(false);
        let outcome = run(Some(BuildResult::Unstable), BuildKind::StandaloneOrAggregate, || {
            called.set(true);
            Ok(report())
        });
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::BuildNotSuccessful)));
        assert!(outcome.is_step_success());
        assert!(!called.get());

        let outcome = run(Some(BuildResult::Success), BuildKind::FanOutUnit, || {
            called.set(true);
            Ok(report())
        });
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::FanOutUnit)));
        assert!(!called.get());
    }

    #[test]
    fn test_push_result_becomes_outcome() {
        let outcome = run(Some(BuildResult::Success), BuildKind::StandaloneOrAggregate, || {
            Ok(report())
        });
        assert_eq!(outcome.report().map(|r| r.branch.as_str()), Some("master"));

        let outcome = run(Some(BuildResult::Success), BuildKind::StandaloneOrAggregate, || {
            Err(ResolveError::RemoteNotFound("upstream".into()).into())
        });
        assert!(!outcome.is_step_success());
    }
}
