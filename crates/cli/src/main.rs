//! gitpush command-line host.
//!
//! Runs the push step the way a CI host would: after a build, against the
//! build's checkout, with the build's result and environment passed on the
//! command line. Also generates and validates job configuration files.

mod report;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use gitpush_core::config::{
    GitPushConfig, GitScm, IdentityConfig, JobConfig, LoggingConfig, MissingBranchPolicy,
    RemoteConfig, ScmConfig,
};
use gitpush_core::models::{BuildContext, BuildKind, BuildResult, Outcome};
use gitpush_core::validation::{self, FieldCheck};
use gitpush_core::{aggregate_end_build, Environment, PipelineStep, PostBuildStep};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Push a build's commits back to its git remote.
#[derive(Parser, Debug)]
#[command(
    name = "gitpush",
    version,
    about = "Push a build's commits and tags back to a git remote"
)]
struct Cli {
    /// Log level (overrides RUST_LOG and the job's [logging] level).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also append logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the job's post-build push step.
    Publish {
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Run the job's push step once for a finished fan-out build.
    Aggregate {
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Push with settings given on the command line, like a pipeline step.
    Push {
        /// Remote definition NAME=URL (repeatable).
        #[arg(long = "remote", value_parser = parse_key_val)]
        remotes: Vec<(String, String)>,

        /// Remote to push to (may contain $NAME placeholders).
        #[arg(long)]
        target_repo: String,

        /// Branch to push to (may contain $NAME placeholders).
        #[arg(long)]
        target_branch: String,

        /// What to do when the branch does not exist on the remote: fail or create.
        #[arg(long, default_value = "fail")]
        missing_branch: MissingBranchPolicy,

        /// Attempts of the whole protocol on transient failures.
        #[arg(long, default_value = "1")]
        attempts: u32,

        /// Committer name for merge commits.
        #[arg(long, requires = "identity_email")]
        identity_name: Option<String>,

        /// Committer email for merge commits.
        #[arg(long, requires = "identity_name")]
        identity_email: Option<String>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Validate a job configuration file.
    Validate {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Generate a default job configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./gitpush.toml")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Path to the job's TOML configuration file.
    #[arg(short = 'j', long = "job", default_value = "./gitpush.toml")]
    path: PathBuf,
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Checkout directory of the build.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Result of the build: success, unstable, failure, not_built or aborted.
    #[arg(short, long, default_value = "success")]
    result: BuildResult,

    /// This invocation is one unit of a fan-out build.
    #[arg(long)]
    fan_out_unit: bool,

    /// Build variable KEY=VALUE for placeholder expansion (repeatable).
    #[arg(short = 'e', long = "env", value_parser = parse_key_val)]
    vars: Vec<(String, String)>,

    /// Do not seed build variables from the process environment.
    #[arg(long)]
    no_inherit_env: bool,

    /// Print the outcome as JSON.
    #[arg(long)]
    json: bool,
}

impl BuildArgs {
    fn context(&self) -> BuildContext {
        let mut environment = if self.no_inherit_env {
            Environment::new()
        } else {
            Environment::from_process()
        };
        environment.extend(self.vars.iter().cloned());

        let kind = if self.fan_out_unit {
            BuildKind::FanOutUnit
        } else {
            BuildKind::StandaloneOrAggregate
        };
        BuildContext::new(&self.workspace, Some(self.result))
            .with_kind(kind)
            .with_environment(environment)
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let logs = LogArgs {
        level: cli.log_level,
        file: cli.log_file,
    };

    match cli.command {
        Commands::Publish { job, build } => {
            let config = load_job(&job.path)?;
            let _guard = init_tracing(&logs, &config.logging)?;
            let step = PostBuildStep::from_job(&config).with_context(|| {
                format!("{} has no [git_push] section", job.path.display())
            })?;
            Ok(finish(&step.perform(&build.context()), build.json))
        }
        Commands::Aggregate { job, build } => {
            let config = load_job(&job.path)?;
            let _guard = init_tracing(&logs, &config.logging)?;
            Ok(finish(&aggregate_end_build(&config, &build.context()), build.json))
        }
        Commands::Push {
            remotes,
            target_repo,
            target_branch,
            missing_branch,
            attempts,
            identity_name,
            identity_email,
            build,
        } => {
            let _guard = init_tracing(&logs, &LoggingConfig::default())?;
            let scm = (!remotes.is_empty()).then(|| GitScm {
                remotes: remotes
                    .into_iter()
                    .map(|(name, url)| RemoteConfig::new(name, url))
                    .collect(),
            });
            let settings = GitPushConfig {
                missing_branch,
                attempts,
                ..GitPushConfig::new(target_repo, target_branch)
            };
            if let Some(git) = &scm {
                settings
                    .validate(&ScmConfig::Git(git.clone()))
                    .context("invalid push settings")?;
            }
            let step = PipelineStep::new(scm, settings).with_identity(IdentityConfig {
                name: identity_name,
                email: identity_email,
            });
            Ok(finish(&step.run(&build.context()), build.json))
        }
        Commands::Validate { job } => {
            let _guard = init_tracing(&logs, &LoggingConfig::default())?;
            cmd_validate(&job.path)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { output } => {
            cmd_init(&output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn finish(outcome: &Outcome, json: bool) -> ExitCode {
    debug!(outcome = outcome.label(), "step finished");
    report::print_outcome(outcome, json);
    if outcome.is_step_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn load_job(path: &Path) -> Result<JobConfig> {
    JobConfig::load_and_validate(path)
        .with_context(|| format!("failed to load job configuration {}", path.display()))
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

struct LogArgs {
    level: Option<String>,
    file: Option<PathBuf>,
}

/// Install the global subscriber: stderr always, plus a log file when one is
/// configured. The returned guard flushes the file on drop.
fn init_tracing(args: &LogArgs, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match &args.level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .context("invalid [logging] level")?,
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = match args.file.as_ref().or(config.file.as_ref()) {
        Some(path) => {
            let directory = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            let file_name = path
                .file_name()
                .with_context(|| format!("log file path has no file name: {}", path.display()))?;
            let appender = RollingFileAppender::new(Rotation::NEVER, directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install the log subscriber")?;
    Ok(guard)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# gitpush job configuration

# Source control the build checks out from.
[scm]
type = "git"

[[scm.remotes]]
name = "origin"
urls = ["https://git.example.com/acme/app.git"]
# Defaults to +refs/heads/*:refs/remotes/<name>/* when omitted.
# fetch_refspecs = ["+refs/heads/*:refs/remotes/origin/*"]

# Push step run after a successful build. Values may use $NAME or ${NAME}
# placeholders filled from the build environment.
[git_push]
target_repo = "origin"
target_branch = "${BRANCH_NAME}"
# fail | create
missing_branch = "fail"
# Attempts of the whole fetch/merge/push sequence on transient failures.
attempts = 1

# Committer for merge commits; defaults to the repository's user.name/user.email.
# [identity]
# name = "CI"
# email = "ci@example.com"

[logging]
level = "info"
# file = "/var/log/gitpush.log"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the remotes and the push target");
    println!("  2. Validate with: gitpush validate --job {}", output.display());
    println!(
        "  3. After a build: gitpush publish --job {} --workspace <checkout> --result success",
        output.display()
    );

    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    println!("{}", style::header(&format!("Validating {}", path.display())));
    println!();

    let config = JobConfig::load_from_file(path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    let mut failed = false;
    match &config.git_push {
        Some(push) => {
            let checks = [
                ("target_repo", validation::check_target_repo(&push.target_repo, &config.scm)),
                ("target_branch", validation::check_target_branch(&push.target_branch)),
            ];
            for (field, check) in checks {
                let line = match &check {
                    FieldCheck::Ok => style::success(field),
                    FieldCheck::Warning(_) => style::warn(&format!("{field}: {}", check.message())),
                    FieldCheck::Error(_) => {
                        failed = true;
                        style::error(&format!("{field}: {}", check.message()))
                    }
                };
                println!("  {line}");
            }
        }
        None => println!("  {}", style::warn("no [git_push] section; nothing will be pushed")),
    }

    if !failed {
        match config.validate() {
            Ok(()) => println!("  {}", style::success("All fields are valid")),
            Err(e) => {
                println!("  {}", style::error(&e.to_string()));
                failed = true;
            }
        }
    }

    if failed {
        anyhow::bail!("configuration validation failed");
    }

    println!();
    println!("{}", style::header("Configuration summary"));
    match config.scm.as_git() {
        Some(git) => println!("{}", report::remotes_table(git)),
        None => println!("  {}", style::dim("job does not use git")),
    }
    if let Some(push) = &config.git_push {
        println!("  Target        : {}/{}", push.target_repo, push.target_branch);
        println!("  Missing branch: {:?}", push.missing_branch);
        println!("  Attempts      : {}", push.attempts);
    }
    println!(
        "  Committer     : {}",
        match (&config.identity.name, &config.identity.email) {
            (Some(name), Some(email)) => format!("{name} <{email}>"),
            _ => "repository default".to_string(),
        }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("BRANCH=release/1.0").unwrap(),
            ("BRANCH".to_string(), "release/1.0".to_string())
        );
        assert_eq!(
            parse_key_val("URL=https://x/?a=b").unwrap(),
            ("URL".to_string(), "https://x/?a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_cli_parses_publish() {
        let cli = Cli::try_parse_from([
            "gitpush",
            "publish",
            "--job",
            "job.toml",
            "--workspace",
            "/tmp/ws",
            "--result",
            "unstable",
            "--env",
            "BRANCH_NAME=main",
            "--fan-out-unit",
        ])
        .unwrap();
        let Commands::Publish { job, build } = cli.command else {
            panic!("expected publish");
        };
        assert_eq!(job.path, PathBuf::from("job.toml"));
        let ctx = build.context();
        assert_eq!(ctx.result, Some(BuildResult::Unstable));
        assert_eq!(ctx.kind, BuildKind::FanOutUnit);
        assert_eq!(ctx.environment.get("BRANCH_NAME"), Some("main"));
    }

    #[test]
    fn test_cli_identity_flags_go_together() {
        let result = Cli::try_parse_from([
            "gitpush",
            "push",
            "--target-repo",
            "origin",
            "--target-branch",
            "main",
            "--identity-name",
            "CI",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_init_then_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gitpush.toml");
        cmd_init(&path).unwrap();
        assert!(cmd_init(&path).is_err());
        cmd_validate(&path).unwrap();
    }
}
