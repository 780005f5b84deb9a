//! TOML-based job configuration for gitpush.
//!
//! A job file describes the job's source control (the named git remotes the
//! workspace was checked out from), the push step itself, the identity used
//! for merge commits, and logging. String fields of the push step and of each
//! remote may contain `$NAME` / `${NAME}` placeholders that are expanded from
//! the build environment at run time, never at load time.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::env::Environment;
use crate::errors::ConfigError;
use crate::validation::{self, FieldCheck};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level job configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Source-control settings of the job.
    #[serde(default)]
    pub scm: ScmConfig,

    /// Post-build push step; absent when the job does not push.
    #[serde(default)]
    pub git_push: Option<GitPushConfig>,

    /// Committer identity for merge commits.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging settings for the CLI host.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Source control
// ---------------------------------------------------------------------------

/// The job's source-control provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScmConfig {
    /// No source control configured.
    #[default]
    None,
    /// A git checkout with named remotes.
    Git(GitScm),
    /// Some other provider; pushing is not possible.
    Other,
}

impl ScmConfig {
    pub fn as_git(&self) -> Option<&GitScm> {
        match self {
            Self::Git(git) => Some(git),
            Self::None | Self::Other => None,
        }
    }
}

/// Git source control: the remotes the workspace knows about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitScm {
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
}

impl GitScm {
    /// Exact, case-sensitive lookup of a remote by name.
    pub fn repository_by_name(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.iter().find(|r| r.name == name)
    }
}

/// One named remote, possibly with templated fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,

    /// Remote URLs; the first one is the push/fetch endpoint.
    #[serde(default)]
    pub urls: Vec<String>,

    /// Fetch ref-specs; empty means the default for this remote's name.
    #[serde(default)]
    pub fetch_refspecs: Vec<String>,
}

impl RemoteConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            urls: vec![url.into()],
            fetch_refspecs: Vec::new(),
        }
    }

    /// `+refs/heads/*:refs/remotes/<name>/*`
    pub fn default_fetch_refspec(&self) -> String {
        format!("+refs/heads/*:refs/remotes/{}/*", self.name)
    }

    /// Configured ref-specs, or the default one when none are configured.
    pub fn effective_fetch_refspecs(&self) -> Vec<String> {
        if self.fetch_refspecs.is_empty() {
            vec![self.default_fetch_refspec()]
        } else {
            self.fetch_refspecs.clone()
        }
    }

    /// Copy with placeholders in URLs and ref-specs expanded.
    pub fn expanded(&self, env: &Environment) -> Self {
        Self {
            name: self.name.clone(),
            urls: env.expand_all(&self.urls),
            fetch_refspecs: env.expand_all(&self.fetch_refspecs),
        }
    }
}

// ---------------------------------------------------------------------------
// Push step
// ---------------------------------------------------------------------------

/// What to do when the target branch does not exist on the remote yet.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MissingBranchPolicy {
    /// Fail the step with an unresolvable revision.
    #[default]
    Fail,
    /// Push HEAD without merging, creating the branch.
    Create,
}

impl FromStr for MissingBranchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "create" => Ok(Self::Create),
            other => Err(format!("unknown missing-branch policy '{other}' (expected fail or create)")),
        }
    }
}

/// Settings of the push step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitPushConfig {
    /// Name of a configured remote (may contain placeholders).
    pub target_repo: String,

    /// Branch to push to (may contain placeholders).
    pub target_branch: String,

    #[serde(default)]
    pub missing_branch: MissingBranchPolicy,

    /// Total attempts of the whole protocol on retryable failures (default 1).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_attempts() -> u32 {
    1
}

impl GitPushConfig {
    pub fn new(target_repo: impl Into<String>, target_branch: impl Into<String>) -> Self {
        Self {
            target_repo: target_repo.into(),
            target_branch: target_branch.into(),
            missing_branch: MissingBranchPolicy::default(),
            attempts: default_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity & logging
// ---------------------------------------------------------------------------

/// Committer used for merge commits. Falls back to the repository's
/// `user.name` / `user.email` when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,
}

/// Logging configuration for the CLI host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional file to append logs to, in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl JobConfig {
    /// Load a [`JobConfig`] from a TOML file at the given path.
    ///
    /// This does **not** validate -- call [`validate`](Self::validate)
    /// afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading job configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: JobConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("job configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    ///
    /// Warnings from the validation surface (e.g. a job that does not use
    /// git) are logged, not returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(git) = self.scm.as_git() {
            for (i, remote) in git.remotes.iter().enumerate() {
                if remote.name.trim().is_empty() {
                    return Err(ConfigError::BlankField {
                        field: format!("scm.remotes[{i}].name"),
                    });
                }
                if git.remotes[..i].iter().any(|r| r.name == remote.name) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("scm.remotes[{i}].name"),
                        detail: format!("duplicate remote name '{}'", remote.name),
                    });
                }
                if remote.urls.first().map_or(true, |u| u.trim().is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("scm.remotes[{i}].urls"),
                        detail: format!("the first URL of remote '{}' must not be blank", remote.name),
                    });
                }
            }
        }

        if let Some(push) = &self.git_push {
            push.validate(&self.scm)?;
        }

        match (&self.identity.name, &self.identity.email) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    field: "identity".into(),
                    detail: "name and email must be set together".into(),
                });
            }
            _ => {}
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

impl GitPushConfig {
    /// Check the push step against the job's source control.
    pub fn validate(&self, scm: &ScmConfig) -> Result<(), ConfigError> {
        let checks = [
            ("git_push.target_repo", validation::check_target_repo(&self.target_repo, scm)),
            ("git_push.target_branch", validation::check_target_branch(&self.target_branch)),
        ];
        for (field, check) in checks {
            match check {
                FieldCheck::Ok => {}
                FieldCheck::Warning(message) => warn!(field, %message, "configuration warning"),
                FieldCheck::Error(err) => return Err(err.for_field(field)),
            }
        }

        if self.attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "git_push.attempts".into(),
                detail: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[scm]
type = "git"

[[scm.remotes]]
name = "origin"
urls = ["https://git.example.com/acme/app.git", "https://mirror.example.com/acme/app.git"]
fetch_refspecs = ["+refs/heads/*:refs/remotes/origin/*"]

[[scm.remotes]]
name = "fork"
urls = ["${FORK_URL}"]

[git_push]
target_repo = "origin"
target_branch = "${BRANCH_NAME}"
missing_branch = "create"
attempts = 3

[identity]
name = "CI"
email = "ci@example.com"

[logging]
level = "debug"
file = "/var/log/gitpush.log"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: JobConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        let git = config.scm.as_git().expect("git scm");
        assert_eq!(git.remotes.len(), 2);
        assert_eq!(git.remotes[0].urls.len(), 2);
        let push = config.git_push.as_ref().unwrap();
        assert_eq!(push.target_branch, "${BRANCH_NAME}");
        assert_eq!(push.missing_branch, MissingBranchPolicy::Create);
        assert_eq!(push.attempts, 3);
        assert_eq!(config.identity.email.as_deref(), Some("ci@example.com"));
        assert_eq!(config.logging.level, "debug");
        config.validate().expect("sample config is valid");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = JobConfig::load_and_validate(&path).expect("load failed");
        assert!(config.git_push.is_some());
    }

    #[test]
    fn test_file_not_found() {
        let result = JobConfig::load_from_file("/nonexistent/job.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(&path, "[scm\ntype = ").unwrap();
        assert!(matches!(
            JobConfig::load_from_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[scm]
type = "git"
[[scm.remotes]]
name = "origin"
urls = ["/srv/git/app.git"]
[git_push]
target_repo = "origin"
target_branch = "master"
"#;
        let config: JobConfig = toml::from_str(minimal).unwrap();
        let push = config.git_push.as_ref().unwrap();
        assert_eq!(push.missing_branch, MissingBranchPolicy::Fail);
        assert_eq!(push.attempts, 1);
        assert_eq!(config.logging.level, "info");
        assert!(config.identity.name.is_none());

        let remote = &config.scm.as_git().unwrap().remotes[0];
        assert_eq!(
            remote.effective_fetch_refspecs(),
            vec!["+refs/heads/*:refs/remotes/origin/*"]
        );
    }

    #[test]
    fn test_empty_file_has_no_scm() {
        let config: JobConfig = toml::from_str("").unwrap();
        assert_eq!(config.scm, ScmConfig::None);
        assert!(config.git_push.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_blank_branch() {
        let mut config: JobConfig = toml::from_str(sample_toml()).unwrap();
        config.git_push.as_mut().unwrap().target_branch = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BlankField { ref field }) if field == "git_push.target_branch"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_remote() {
        let mut config: JobConfig = toml::from_str(sample_toml()).unwrap();
        config.git_push.as_mut().unwrap().target_repo = "Origin".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownRemote { ref name, .. }) if name == "Origin"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_remote() {
        let mut config: JobConfig = toml::from_str(sample_toml()).unwrap();
        let git = match &mut config.scm {
            ScmConfig::Git(git) => git,
            _ => unreachable!(),
        };
        git.remotes[1].name = "origin".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "scm.remotes[1].name"
        ));
    }

    #[test]
    fn test_validate_rejects_blank_first_url() {
        let mut config: JobConfig = toml::from_str(sample_toml()).unwrap();
        if let ScmConfig::Git(git) = &mut config.scm {
            git.remotes[0].urls.insert(0, " ".into());
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "scm.remotes[0].urls"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_attempts_and_half_identity() {
        let mut config: JobConfig = toml::from_str(sample_toml()).unwrap();
        config.git_push.as_mut().unwrap().attempts = 0;
        assert!(config.validate().is_err());

        let mut config: JobConfig = toml::from_str(sample_toml()).unwrap();
        config.identity.email = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "identity"
        ));
    }

    #[test]
    fn test_remote_expansion() {
        let config: JobConfig = toml::from_str(sample_toml()).unwrap();
        let fork = config.scm.as_git().unwrap().repository_by_name("fork").unwrap();
        let env: Environment = [("FORK_URL", "/srv/git/fork.git")].into_iter().collect();
        let expanded = fork.expanded(&env);
        assert_eq!(expanded.urls, vec!["/srv/git/fork.git"]);
        assert_eq!(expanded.effective_fetch_refspecs(), vec!["+refs/heads/*:refs/remotes/fork/*"]);
    }

    #[test]
    fn test_missing_branch_policy_parse() {
        assert_eq!("create".parse::<MissingBranchPolicy>(), Ok(MissingBranchPolicy::Create));
        assert!("skip".parse::<MissingBranchPolicy>().is_err());
    }
}
