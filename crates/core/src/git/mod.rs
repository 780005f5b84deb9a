//! Git operations against the build's workspace.

pub mod client;

use git2::Oid;

use crate::errors::GitError;

pub use client::GitClient;

/// Result of merging a revision into HEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The revision was already reachable from HEAD.
    UpToDate(Oid),
    /// HEAD moved forward to the revision.
    FastForward(Oid),
    /// A merge commit with parents `[HEAD, revision]` became HEAD.
    Merged(Oid),
}

impl MergeOutcome {
    /// HEAD after the merge.
    pub fn head(&self) -> Oid {
        match *self {
            Self::UpToDate(oid) | Self::FastForward(oid) | Self::Merged(oid) => oid,
        }
    }
}

/// Source-control capabilities the push protocol needs from a workspace.
///
/// Every method operates on the single checked-out working tree bound to the
/// current build.
pub trait Workspace {
    /// Fetch `refspecs` from `uri`, updating local tracking refs.
    fn fetch(&self, uri: &str, refspecs: &[String]) -> Result<(), GitError>;

    /// Commit a revision expression points at, or `None` if it does not exist.
    fn resolve_revision(&self, name: &str) -> Result<Option<Oid>, GitError>;

    /// Commit currently checked out.
    fn head(&self) -> Result<Oid, GitError>;

    /// Merge `revision` into HEAD. Conflicts fail with
    /// [`GitError::MergeConflict`] and leave HEAD untouched.
    fn merge(&self, revision: Oid) -> Result<MergeOutcome, GitError>;

    /// Push `refspec` to `uri`, plus every local tag when `include_tags`.
    /// Returns the names of the tags included.
    fn push(&self, uri: &str, refspec: &str, include_tags: bool) -> Result<Vec<String>, GitError>;
}
