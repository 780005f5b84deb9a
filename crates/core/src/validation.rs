//! Field checks for the push step's configuration.
//!
//! These run before any build does, against the raw (unexpanded) values a
//! user typed into the job configuration.

use crate::config::ScmConfig;
use crate::errors::ConfigError;

/// Result of checking one configuration field.
#[derive(Debug)]
pub enum FieldCheck {
    Ok,
    /// Not fatal, but worth showing to whoever edits the job.
    Warning(String),
    Error(ConfigError),
}

impl FieldCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Human-readable message; empty for [`FieldCheck::Ok`].
    pub fn message(&self) -> String {
        match self {
            Self::Ok => String::new(),
            Self::Warning(msg) => msg.clone(),
            Self::Error(ConfigError::BlankField { .. }) => "This field is required".into(),
            Self::Error(err) => err.to_string(),
        }
    }
}

fn check_not_blank(value: &str) -> FieldCheck {
    if value.trim().is_empty() {
        FieldCheck::Error(ConfigError::BlankField {
            field: String::new(),
        })
    } else {
        FieldCheck::Ok
    }
}

/// `target_branch` must be non-blank.
pub fn check_target_branch(value: &str) -> FieldCheck {
    check_not_blank(value)
}

/// `target_repo` must be non-blank and name one of the job's git remotes.
///
/// A job without git source control only warrants a warning: the remote
/// cannot be checked, and the push step will fail at run time anyway.
/// Templated names are checked at run time once the build environment is
/// known.
pub fn check_target_repo(value: &str, scm: &ScmConfig) -> FieldCheck {
    let blank = check_not_blank(value);
    if !blank.is_ok() {
        return blank;
    }

    let Some(git) = scm.as_git() else {
        return FieldCheck::Warning(
            "Project not currently configured to use Git; cannot check remote repository".into(),
        );
    };

    if value.contains('$') {
        return FieldCheck::Warning(format!(
            "'{value}' contains placeholders; the remote is checked when the build runs"
        ));
    }

    if git.repository_by_name(value).is_none() {
        return FieldCheck::Error(ConfigError::UnknownRemote {
            name: value.to_string(),
        });
    }

    FieldCheck::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GitScm, RemoteConfig};

    fn git_scm() -> ScmConfig {
        ScmConfig::Git(GitScm {
            remotes: vec![RemoteConfig::new("origin", "/srv/git/app.git")],
        })
    }

    #[test]
    fn test_blank_fields_are_errors() {
        for value in ["", "   ", "\t"] {
            let check = check_target_branch(value);
            assert!(check.is_error());
            assert_eq!(check.message(), "This field is required");

            assert!(check_target_repo(value, &git_scm()).is_error());
        }
    }

    #[test]
    fn test_branch_ok() {
        assert!(check_target_branch("master").is_ok());
        assert_eq!(check_target_branch("master").message(), "");
    }

    #[test]
    fn test_repo_not_git_is_warning() {
        for scm in [ScmConfig::None, ScmConfig::Other] {
            let check = check_target_repo("origin", &scm);
            assert!(matches!(check, FieldCheck::Warning(_)));
            assert!(check.message().contains("not currently configured to use Git"));
        }
    }

    #[test]
    fn test_repo_unknown_is_error() {
        let check = check_target_repo("upstream", &git_scm());
        assert!(check.is_error());
        assert_eq!(
            check.message(),
            "no remote repository configured with name 'upstream'"
        );
    }

    #[test]
    fn test_repo_lookup_is_case_sensitive() {
        assert!(check_target_repo("origin", &git_scm()).is_ok());
        assert!(check_target_repo("ORIGIN", &git_scm()).is_error());
    }

    #[test]
    fn test_templated_repo_is_deferred() {
        let check = check_target_repo("${REMOTE}", &git_scm());
        assert!(matches!(check, FieldCheck::Warning(_)));
    }
}
