//! Workspace git operations via `git2`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::{
    Cred, Direction, ErrorCode, FetchOptions, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature,
};
use tracing::{debug, info, instrument, warn};

use crate::config::IdentityConfig;
use crate::errors::GitError;
use crate::git::{MergeOutcome, Workspace};

/// Committer used when neither the job nor the repository configures one.
const FALLBACK_NAME: &str = "gitpush";
const FALLBACK_EMAIL: &str = "gitpush@localhost";

/// Give up on a credential source after this many callback invocations;
/// libgit2 keeps asking as long as we keep answering.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Git client bound to one build workspace.
pub struct GitClient {
    repo: Repository,
    identity: IdentityConfig,
}

impl GitClient {
    /// Open the existing checkout at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening workspace repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            identity: IdentityConfig::default(),
        })
    }

    /// Use `identity` as author and committer of merge commits.
    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        if let (Some(name), Some(email)) = (&self.identity.name, &self.identity.email) {
            return Ok(Signature::now(name, email)?);
        }
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(e) => {
                debug!(error = %e, "no committer identity configured, using fallback");
                Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?)
            }
        }
    }

    /// Callbacks answering credential requests from the ssh agent or the
    /// configured git credential helper.
    fn remote_callbacks<'a>(&self) -> RemoteCallbacks<'a> {
        let cfg = self.repo.config().ok();
        let mut attempts = 0u32;
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username_from_url, allowed| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("authentication failed: no usable credentials"));
            }
            if allowed.is_ssh_key() {
                if let Some(user) = username_from_url {
                    return Cred::ssh_key_from_agent(user);
                }
            }
            if allowed.is_user_pass_plaintext() {
                if let Some(cfg) = &cfg {
                    if let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url) {
                        return Ok(cred);
                    }
                }
            }
            Cred::default()
        });
        callbacks
    }

    /// Refs the remote advertises for pushing, by name.
    fn advertised_refs(&self, uri: &str) -> Result<HashMap<String, Oid>, GitError> {
        let mut remote = self.repo.remote_anonymous(uri)?;
        let mut conn = remote
            .connect_auth(Direction::Push, Some(self.remote_callbacks()), None)
            .map_err(|cause| transport("connect", uri, cause))?;
        let heads = conn
            .remote()
            .list()?
            .iter()
            .map(|head| (head.name().to_string(), head.oid()))
            .collect();
        Ok(heads)
    }

    /// Point HEAD (or the branch it is attached to) at `oid`.
    fn move_head(&self, oid: Oid, message: &str) -> Result<(), GitError> {
        let mut head = self.repo.head()?;
        head.set_target(oid, message)?;
        Ok(())
    }

    fn conflict_paths(index: &git2::Index) -> Result<Vec<String>, GitError> {
        let mut paths = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                paths.push(String::from_utf8_lossy(&entry.path).into_owned());
            }
        }
        Ok(paths)
    }
}

fn transport(operation: &'static str, uri: &str, cause: git2::Error) -> GitError {
    GitError::Transport {
        operation,
        uri: uri.to_string(),
        cause,
    }
}

fn is_rejection(message: &str) -> bool {
    message.contains("non-fast-forward")
        || message.contains("non-fastforwardable")
        || message.contains("fetch first")
        || message.contains("not present locally")
        || message.contains("already exists")
}

impl Workspace for GitClient {
    #[instrument(skip(self, refspecs), fields(uri = %uri))]
    fn fetch(&self, uri: &str, refspecs: &[String]) -> Result<(), GitError> {
        info!(?refspecs, "fetching");
        let mut remote = self.repo.remote_anonymous(uri)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(self.remote_callbacks());
        remote
            .fetch(refspecs, Some(&mut fetch_opts), None)
            .map_err(|cause| transport("fetch", uri, cause))?;
        debug!("fetch completed");
        Ok(())
    }

    fn resolve_revision(&self, name: &str) -> Result<Option<Oid>, GitError> {
        match self.repo.revparse_single(name) {
            Ok(object) => Ok(Some(object.peel_to_commit()?.id())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn head(&self) -> Result<Oid, GitError> {
        let head = self
            .repo
            .head()
            .map_err(|_| GitError::RefNotFound("HEAD".into()))?;
        Ok(head.peel_to_commit()?.id())
    }

    #[instrument(skip(self))]
    fn merge(&self, revision: Oid) -> Result<MergeOutcome, GitError> {
        let ours = self.repo.head()?.peel_to_commit()?;
        let theirs = self.repo.find_commit(revision)?;
        let annotated = self.repo.find_annotated_commit(revision)?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            debug!(head = %ours.id(), "already contains revision");
            return Ok(MergeOutcome::UpToDate(ours.id()));
        }

        if analysis.is_fast_forward() {
            self.repo
                .checkout_tree(theirs.as_object(), Some(CheckoutBuilder::new().safe()))?;
            self.move_head(revision, &format!("gitpush: fast-forward to {revision}"))?;
            info!(from = %ours.id(), to = %revision, "fast-forwarded");
            return Ok(MergeOutcome::FastForward(revision));
        }

        // Merge in memory so a conflict never touches the working tree.
        let mut index = self.repo.merge_commits(&ours, &theirs, None)?;
        if index.has_conflicts() {
            let paths = Self::conflict_paths(&index)?;
            warn!(?paths, "merge produced conflicts");
            return Err(GitError::MergeConflict { paths });
        }

        let tree_oid = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self.signature()?;
        let message = format!("Merge commit '{revision}'");
        let merge_oid = self
            .repo
            .commit(None, &sig, &sig, &message, &tree, &[&ours, &theirs])?;

        self.repo
            .checkout_tree(tree.as_object(), Some(CheckoutBuilder::new().safe()))?;
        self.move_head(merge_oid, &format!("gitpush: {message}"))?;
        info!(sha = %merge_oid, "created merge commit");
        Ok(MergeOutcome::Merged(merge_oid))
    }

    #[instrument(skip(self), fields(uri = %uri))]
    fn push(&self, uri: &str, refspec: &str, include_tags: bool) -> Result<Vec<String>, GitError> {
        let mut refspecs = vec![refspec.to_string()];
        let mut tags = Vec::new();

        if include_tags {
            let advertised = self.advertised_refs(uri)?;
            for name in self.repo.tag_names(None)?.iter().flatten() {
                let refname = format!("refs/tags/{name}");
                let local = self.repo.refname_to_id(&refname)?;
                if advertised.get(&refname) == Some(&local) {
                    continue;
                }
                refspecs.push(format!("{refname}:{refname}"));
                tags.push(name.to_string());
            }
        }

        info!(?refspecs, "pushing");
        let rejected = RefCell::new(Vec::<(String, String)>::new());
        let pushed = {
            let mut callbacks = self.remote_callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(msg) = status {
                    warn!(refname, msg, "push rejected");
                    rejected
                        .borrow_mut()
                        .push((refname.to_string(), msg.to_string()));
                }
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            let mut remote = self.repo.remote_anonymous(uri)?;
            remote.push(&refspecs, Some(&mut push_opts))
        };

        if let Err(cause) = pushed {
            let detail = cause.message().to_string();
            if cause.code() == ErrorCode::NotFastForward || is_rejection(&detail) {
                return Err(GitError::PushRejected {
                    refname: refspec.to_string(),
                    detail,
                });
            }
            return Err(transport("push", uri, cause));
        }

        if let Some((refname, detail)) = rejected.into_inner().into_iter().next() {
            return Err(GitError::PushRejected { refname, detail });
        }

        info!(tags = tags.len(), "push completed");
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::RepositoryInitOptions;

    fn init_repo(path: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("master");
        Repository::init_opts(path, &opts).unwrap()
    }

    fn init_bare(path: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head("master");
        Repository::init_opts(path, &opts).unwrap()
    }

    fn sig() -> Signature<'static> {
        Signature::now("John Doe", "john@example.com").unwrap()
    }

    /// Write `file`, stage it and commit on HEAD.
    fn commit_file(repo: &Repository, file: &str, content: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(file), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig(), &sig(), &format!("Add {file}"), &tree, &parents)
            .unwrap()
    }

    /// Commit `file` on top of `parent` without touching HEAD or the workdir.
    fn commit_aside(repo: &Repository, parent: Oid, file: &str, content: &str) -> Oid {
        let parent = repo.find_commit(parent).unwrap();
        let mut builder = repo.treebuilder(Some(&parent.tree().unwrap())).unwrap();
        let blob = repo.blob(content.as_bytes()).unwrap();
        builder.insert(file, blob, 0o100644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        repo.commit(None, &sig(), &sig(), &format!("Add {file}"), &tree, &[&parent])
            .unwrap()
    }

    fn client(path: &Path) -> GitClient {
        GitClient::new(path).unwrap().with_identity(IdentityConfig {
            name: Some("CI".into()),
            email: Some("ci@example.com".into()),
        })
    }

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(
            GitClient::new("/nonexistent"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_head_and_resolve_revision() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        let a = commit_file(&repo, "a.txt", "a");

        let git = client(dir.path());
        assert_eq!(git.head().unwrap(), a);
        assert_eq!(git.resolve_revision("master").unwrap(), Some(a));
        assert_eq!(git.resolve_revision("origin/master").unwrap(), None);
    }

    #[test]
    fn test_head_of_empty_repo() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        assert!(matches!(
            client(dir.path()).head(),
            Err(GitError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_merge_ancestor_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        let a = commit_file(&repo, "a.txt", "a");
        let b = commit_file(&repo, "b.txt", "b");

        let outcome = client(dir.path()).merge(a).unwrap();
        assert_eq!(outcome, MergeOutcome::UpToDate(b));
        assert_eq!(repo.head().unwrap().target(), Some(b));
    }

    #[test]
    fn test_merge_fast_forward() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        let a = commit_file(&repo, "a.txt", "a");
        let c = commit_aside(&repo, a, "c.txt", "remote");

        let outcome = client(dir.path()).merge(c).unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward(c));
        assert_eq!(repo.head().unwrap().target(), Some(c));
        assert_eq!(repo.head().unwrap().shorthand(), Some("master"));
        assert_eq!(std::fs::read_to_string(dir.path().join("c.txt")).unwrap(), "remote");
    }

    #[test]
    fn test_merge_creates_two_parent_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        let a = commit_file(&repo, "a.txt", "a");
        let c = commit_aside(&repo, a, "c.txt", "remote");
        let b = commit_file(&repo, "b.txt", "local");

        let outcome = client(dir.path()).merge(c).unwrap();
        let MergeOutcome::Merged(m) = outcome else {
            panic!("expected a merge commit, got {outcome:?}");
        };
        let merge = repo.find_commit(m).unwrap();
        assert_eq!(merge.parent_ids().collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(merge.committer().email(), Some("ci@example.com"));
        assert_eq!(repo.head().unwrap().target(), Some(m));
        assert!(dir.path().join("c.txt").exists());
        assert!(dir.path().join("b.txt").exists());
        assert!(!repo.index().unwrap().has_conflicts());
    }

    #[test]
    fn test_merge_conflict_leaves_head() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        let a = commit_file(&repo, "shared.txt", "base\n");
        let c = commit_aside(&repo, a, "shared.txt", "remote\n");
        let b = commit_file(&repo, "shared.txt", "local\n");

        let err = client(dir.path()).merge(c).unwrap_err();
        match err {
            GitError::MergeConflict { paths } => assert_eq!(paths, vec!["shared.txt"]),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(repo.head().unwrap().target(), Some(b));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("shared.txt")).unwrap(),
            "local\n"
        );
    }

    #[test]
    fn test_push_with_tags_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin.git");
        let work_path = dir.path().join("work");
        let origin = init_bare(&origin_path);
        let repo = init_repo(&work_path);
        let a = commit_file(&repo, "a.txt", "a");
        let obj = repo.find_object(a, None).unwrap();
        repo.tag_lightweight("v1", &obj, false).unwrap();
        repo.tag("v1-annotated", &obj, &sig(), "release", false).unwrap();

        let git = client(&work_path);
        let uri = origin_path.to_str().unwrap();
        let mut tags = git.push(uri, "HEAD:refs/heads/master", true).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["v1", "v1-annotated"]);

        assert_eq!(origin.refname_to_id("refs/heads/master").unwrap(), a);
        let peeled = origin
            .find_reference("refs/tags/v1-annotated")
            .unwrap()
            .peel_to_commit()
            .unwrap();
        assert_eq!(peeled.id(), a);

        // Tags already on the remote are not pushed again.
        assert!(git.push(uri, "HEAD:refs/heads/master", true).unwrap().is_empty());

        git.fetch(uri, &["+refs/heads/*:refs/remotes/origin/*".to_string()])
            .unwrap();
        assert_eq!(git.resolve_revision("origin/master").unwrap(), Some(a));
    }

    #[test]
    fn test_push_non_fast_forward_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin.git");
        let work_path = dir.path().join("work");
        init_bare(&origin_path);
        let repo = init_repo(&work_path);
        let a = commit_file(&repo, "a.txt", "a");
        let uri = origin_path.to_str().unwrap();
        let git = client(&work_path);
        git.push(uri, "HEAD:refs/heads/master", false).unwrap();

        // Someone else moves the remote branch to a commit we never fetch.
        let c = commit_aside(&repo, a, "c.txt", "remote");
        repo.reference("refs/heads/other", c, false, "test").unwrap();
        git.push(uri, "refs/heads/other:refs/heads/master", false)
            .unwrap();
        repo.find_reference("refs/heads/other").unwrap().delete().unwrap();

        commit_file(&repo, "b.txt", "local");
        let err = git.push(uri, "HEAD:refs/heads/master", false).unwrap_err();
        assert!(
            matches!(err, GitError::PushRejected { .. }),
            "expected rejection, got {err:?}"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_fetch_unreachable_uri_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        commit_file(&repo, "a.txt", "a");
        let missing = dir.path().join("no-such-remote.git");

        let err = client(dir.path())
            .fetch(
                missing.to_str().unwrap(),
                &["+refs/heads/*:refs/remotes/origin/*".to_string()],
            )
            .unwrap_err();
        assert!(matches!(err, GitError::Transport { operation: "fetch", .. }));
    }
}
