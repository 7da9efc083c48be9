//! Builder for running the system `git` binary.
//!
//! Commands run with `git -C <dir>` so they never depend on the process's working
//! directory. Output is captured; a non-zero exit becomes
//! [`DeployError::GitCommandError`] carrying git's stderr.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::core::DeployError;

/// A git invocation under construction.
#[derive(Debug, Default)]
pub struct GitCommand {
    /// Command arguments to pass to Git (e.g., ["rev-parse", "HEAD"])
    args: Vec<String>,

    /// Working directory passed through `-C`
    current_dir: Option<PathBuf>,

    /// Optional context string prefixed to log lines
    context: Option<String>,
}

/// Output from a Git command
#[derive(Debug)]
pub struct GitCommandOutput {
    /// Standard output from the Git command
    pub stdout: String,
    /// Standard error output from the Git command
    pub stderr: String,
}

impl GitCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the repository directory the command runs against.
    #[must_use]
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Labels log lines for this command, e.g. with the definition id.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Execute the command and return the output
    pub async fn execute(self) -> Result<GitCommandOutput> {
        let start = std::time::Instant::now();
        let git = git_command();
        let mut cmd = Command::new(git);

        let mut full_args = Vec::new();
        if let Some(ref dir) = self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());

        cmd.args(&full_args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        match self.context {
            Some(ref ctx) => {
                tracing::debug!(target: "git", "({}) Executing command: {} {}", ctx, git, full_args.join(" "));
            }
            None => tracing::debug!(target: "git", "Executing command: {} {}", git, full_args.join(" ")),
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", full_args.join(" ")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(
                target: "git",
                "Command failed with exit code: {:?}",
                output.status.code()
            );
            if !stderr.is_empty() {
                tracing::debug!(target: "git", "Error: {}", stderr);
            }

            return Err(DeployError::GitCommandError {
                operation: self.args.first().cloned().unwrap_or_else(|| "unknown".to_string()),
                stderr,
            }
            .into());
        }

        let elapsed = start.elapsed();
        if elapsed.as_millis() > 100 {
            tracing::debug!(
                target: "git::perf",
                "Git {} took {}ms",
                self.args.first().map_or("unknown", String::as_str),
                elapsed.as_millis()
            );
        }

        Ok(GitCommandOutput {
            stdout,
            stderr,
        })
    }

    /// Execute the command and return only stdout as a trimmed string
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }
}

// Convenience builders for common Git operations

impl GitCommand {
    /// Create a rev-parse command
    pub fn rev_parse(ref_name: &str) -> Self {
        Self::new().args(["rev-parse", ref_name])
    }

    /// Create a command to get the current commit hash
    pub fn current_commit() -> Self {
        Self::rev_parse("HEAD")
    }

    /// Create a command cloning `url` into `target`
    pub fn clone_repo(url: &str, target: &Path) -> Self {
        Self::new().args(["clone", "--quiet", url]).arg(target.display().to_string())
    }

    /// Create a command fast-forwarding the current branch from its upstream
    pub fn pull_ff_only() -> Self {
        Self::new().args(["pull", "--ff-only", "--quiet"])
    }
}

/// Name of the git executable for this platform.
#[must_use]
pub const fn git_command() -> &'static str {
    if cfg!(windows) {
        "git.exe"
    } else {
        "git"
    }
}
