//! Git access for identity resolution.
//!
//! Only two things are needed from git here: splitting a repository URL into its
//! parts (to derive a checkout directory name) and reading the commit `HEAD` points
//! at in a local checkout. Both go through the system `git` binary, the same way
//! Cargo does it, rather than an embedded library.
//!
//! [`CommitReader`] is the seam the resolver uses, so tests and embedders can
//! substitute their own source of commit hashes.

pub mod command_builder;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};

use crate::core::DeployError;
use crate::git::command_builder::GitCommand;

/// A repository URL split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    /// Host name, or `local` for filesystem repositories
    pub host: String,
    /// Owning user or organization; empty when the URL has no owner segment
    pub owner: String,
    /// Repository name without a trailing `.git`
    pub repo: String,
}

/// Splits a repository URL into host, owner and repository name.
///
/// Accepted forms:
/// - `https://[user[:token]@]host[:port]/owner/repo(.git)` (also `http`, `ssh`, `git`)
/// - `git@host:owner/repo(.git)` (scp-like SSH)
/// - `file:///path/to/repo` and plain absolute or relative paths (host `local`)
///
/// ```rust
/// use fleetwright::git::parse_git_url;
///
/// let url = parse_git_url("git@github.com:acme/shop-api.git").unwrap();
/// assert_eq!((url.host.as_str(), url.owner.as_str(), url.repo.as_str()), ("github.com", "acme", "shop-api"));
/// ```
///
/// # Errors
///
/// [`DeployError::InvalidRepositoryUrl`] when no repository name can be extracted.
pub fn parse_git_url(url: &str) -> Result<GitUrl> {
    let invalid = || -> anyhow::Error {
        DeployError::InvalidRepositoryUrl {
            url: url.to_string(),
        }
        .into()
    };

    // Handle file:// URLs and plain local paths
    let local_path = url.strip_prefix("file://").or_else(|| {
        (url.starts_with('/') || url.starts_with("./") || url.starts_with("../")).then_some(url)
    });
    if let Some(path) = local_path {
        let (owner, repo) = split_owner_repo(path.trim_end_matches('/')).ok_or_else(invalid)?;
        return Ok(GitUrl {
            host: "local".to_string(),
            owner,
            repo,
        });
    }

    // Scheme URLs: https://, http://, ssh://, git://
    if let Some((_, rest)) = url.split_once("://") {
        let (authority, path) = rest.split_once('/').ok_or_else(invalid)?;
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        let (owner, repo) = split_owner_repo(path.trim_end_matches('/')).ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        return Ok(GitUrl {
            host: host.to_string(),
            owner,
            repo,
        });
    }

    // Handle SSH URLs like git@github.com:user/repo.git
    if let Some((authority, path)) = url.split_once(':') {
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let (owner, repo) = split_owner_repo(path.trim_end_matches('/')).ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        return Ok(GitUrl {
            host: host.to_string(),
            owner,
            repo,
        });
    }

    Err(invalid())
}

fn split_owner_repo(path: &str) -> Option<(String, String)> {
    let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
    let repo = segments.next()?.trim_end_matches(".git");
    if repo.is_empty() {
        return None;
    }
    let owner = segments.next().unwrap_or_default();
    Some((owner.to_string(), repo.to_string()))
}

/// Checks for a `.git` entry (directory, or file for worktrees) under `path`.
#[must_use]
pub fn is_valid_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

/// A local git working tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Handle to the repository at `path`. Does not check that it exists.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_git_repo(&self) -> bool {
        is_valid_git_repo(&self.path)
    }

    /// Full 40-character hash of the commit `HEAD` points at.
    pub async fn get_current_commit(&self) -> Result<String> {
        GitCommand::current_commit()
            .current_dir(&self.path)
            .execute_stdout()
            .await
            .context("Failed to get current commit")
    }
}

/// Reads the commit a local checkout's `HEAD` points at.
pub trait CommitReader: Send + Sync {
    /// Resolves `HEAD` in the repository at `checkout`.
    ///
    /// Fails if `checkout` is not a repository or `HEAD` does not resolve.
    fn head_commit<'a>(&'a self, checkout: &'a Path) -> BoxFuture<'a, Result<String>>;
}

/// [`CommitReader`] backed by `git rev-parse HEAD`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCommitReader;

impl CommitReader for GitCommitReader {
    fn head_commit<'a>(&'a self, checkout: &'a Path) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let repo = GitRepo::new(checkout);
            if !repo.is_git_repo() {
                return Err(DeployError::CheckoutError {
                    path: checkout.display().to_string(),
                    reason: "not a git repository".to_string(),
                }
                .into());
            }

            let commit = repo.get_current_commit().await?;
            tracing::debug!(target: "git", "HEAD of {} is {}", checkout.display(), commit);
            Ok(commit)
        })
    }
}
