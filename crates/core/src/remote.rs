//! Remote resolution: configured remote/branch templates to a concrete [`Target`].

use tracing::{debug, instrument};

use crate::config::{GitScm, RemoteConfig};
use crate::env::Environment;
use crate::errors::ResolveError;
use crate::models::{short_branch_name, Target};

/// Source of named remote definitions.
pub trait RemoteProvider {
    /// Exact, case-sensitive lookup.
    fn lookup_remote(&self, name: &str) -> Option<&RemoteConfig>;

    /// The remote with its own templated fields expanded.
    fn expand_remote(&self, remote: &RemoteConfig, env: &Environment) -> RemoteConfig {
        remote.expanded(env)
    }
}

impl RemoteProvider for GitScm {
    fn lookup_remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.repository_by_name(name)
    }
}

/// Expand `remote_template` and `branch_template`, look the remote up and
/// build the target from its first URL.
///
/// Additional URLs of a remote are never pushed to. A branch given as
/// `refs/heads/<name>` is shortened to `<name>`.
#[instrument(skip(provider, env))]
pub fn resolve_target<P: RemoteProvider + ?Sized>(
    provider: &P,
    remote_template: &str,
    branch_template: &str,
    env: &Environment,
) -> Result<Target, ResolveError> {
    let remote_name = env.expand(remote_template);
    let branch_name = short_branch_name(&env.expand(branch_template)).to_string();

    let remote = provider
        .lookup_remote(&remote_name)
        .ok_or_else(|| ResolveError::RemoteNotFound(remote_name.clone()))?;
    let remote = provider.expand_remote(remote, env);

    let uri = remote
        .urls
        .first()
        .filter(|u| !u.trim().is_empty())
        .cloned()
        .ok_or_else(|| ResolveError::NoUri(remote_name.clone()))?;

    let target = Target {
        repository_name: remote_name,
        branch_name,
        uri,
        fetch_refspecs: remote.effective_fetch_refspecs(),
    };
    debug!(?target, "resolved push target");
    Ok(target)
}
