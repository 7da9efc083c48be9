//! Identity resolution for compiled systems.
//!
//! Raw systems describe containers abstractly: a definition may point at a git
//! repository (`specific.repositoryUrl`) or a registry image (`specific.name`), both
//! of which can change under it. Before deploying, [`IdentityResolver::compile`]
//! binds every such definition to a stable identity and renames it, together with
//! every instance placing it:
//!
//! | Reference | Identity | Example id |
//! |---|---|---|
//! | `repositoryUrl` | commit `HEAD` points at after synchronizing | `api$3f2c...e91` |
//! | `name` | normalized tag, made identifier-safe | `web$acme.app_latest` |
//!
//! # Ordering
//!
//! Definitions are resolved one at a time in declaration order, and systems in
//! ascending id order. Synchronization of one definition never overlaps another's,
//! and each rename sees the topology left by the previous one. The first error
//! aborts the whole compile; nothing is returned for the systems resolved so far.
//!
//! Resolution is not idempotent: resolving an already resolved definition appends a
//! second suffix.

pub mod identity;

use anyhow::Result;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::compiler::{Synchronizer, SystemCompiler};
use crate::config::{ConfigLoader, DeployConfig};
use crate::core::DeployError;
use crate::git::{CommitReader, GitCommitReader};
use crate::output::{OutputLevel, OutputSink};
use crate::topology::{Rename, System, SystemsMap, TopologyEditor};

pub use identity::{checkout_path, normalize_image_tag, suffixed, tag_suffix};

/// Compiles systems and resolves the identities of their external references.
pub struct IdentityResolver {
    config_loader: Arc<dyn ConfigLoader>,
    compiler: Arc<dyn SystemCompiler>,
    synchronizer: Arc<dyn Synchronizer>,
    commits: Arc<dyn CommitReader>,
    /// Process-level configuration; source of the inherited `autoCheckoutDir`
    kernel_config: DeployConfig,
}

impl IdentityResolver {
    /// Creates a resolver reading commits with `git rev-parse HEAD`.
    pub fn new(
        config_loader: Arc<dyn ConfigLoader>,
        compiler: Arc<dyn SystemCompiler>,
        synchronizer: Arc<dyn Synchronizer>,
        kernel_config: DeployConfig,
    ) -> Self {
        Self {
            config_loader,
            compiler,
            synchronizer,
            commits: Arc::new(GitCommitReader),
            kernel_config,
        }
    }

    /// Replaces the source of commit hashes.
    #[must_use]
    pub fn with_commit_reader(mut self, commits: Arc<dyn CommitReader>) -> Self {
        self.commits = commits;
        self
    }

    /// Compiles the systems under `path` and resolves their identities.
    ///
    /// 1. Loads the merged configuration for a pseudo-system `{id, repoPath: path}`,
    ///    inheriting `autoCheckoutDir` from the kernel configuration when unset.
    /// 2. Hands `path` and the configuration to the compiler.
    /// 3. Resolves every system's definitions with `repoPath` set to `path`; the field
    ///    is cleared again before returning.
    ///
    /// # Errors
    ///
    /// - configuration loading errors, verbatim
    /// - [`DeployError::CompileError`] when the compiler rejects the sources
    /// - any error of [`resolve_system`](Self::resolve_system)
    pub async fn compile(
        &self,
        system_id: &str,
        path: &Path,
        out: &dyn OutputSink,
    ) -> Result<SystemsMap> {
        let repo_path = path.to_string_lossy().into_owned();
        let pseudo = System::pseudo(system_id, repo_path.clone());

        let mut config = self.config_loader.load(&pseudo).await?;
        if config.auto_checkout_dir.as_deref().is_none_or(str::is_empty) {
            config.auto_checkout_dir = self.inherited_auto_checkout_dir();
        }

        let mut systems = self.compiler.compile_all(path, &config).await.map_err(|failure| {
            tracing::error!(
                system = system_id,
                reasons = ?failure.reasons,
                "Compilation failed: {}",
                failure.message
            );
            anyhow::Error::new(DeployError::CompileError {
                message: failure.enriched_message(),
            })
        })?;

        let mut ids: Vec<String> = systems.keys().cloned().collect();
        ids.sort();

        for id in ids {
            let Some(system) = systems.get_mut(&id) else {
                continue;
            };

            system.repo_path = Some(repo_path.clone());
            let result = self.resolve_system(system, out).await;
            system.repo_path = None;
            result?;
        }

        Ok(systems)
    }

    /// Lists the deployment targets defined under `path`.
    pub async fn list_targets(&self, path: &Path) -> Result<Vec<String>> {
        self.compiler.list_targets(path).await
    }

    /// Resolves every definition of `system` in declaration order.
    ///
    /// Definitions without `repositoryUrl` and `name` are left alone.
    pub async fn resolve_system(&self, system: &mut System, out: &dyn OutputSink) -> Result<()> {
        for index in 0..system.container_definitions.len() {
            self.resolve_definition(system, index, out).await?;
        }
        Ok(())
    }

    /// Resolves the definition at `index`, if it carries an external reference.
    ///
    /// `repositoryUrl` takes precedence over `name`. Returns the applied rename, or
    /// `None` when the definition was skipped.
    ///
    /// # Errors
    ///
    /// - [`DeployError::SyncError`] (with the synchronizer's error as cause)
    /// - [`DeployError::InvalidRepositoryUrl`]
    /// - [`DeployError::CheckoutError`] when `HEAD` of the checkout cannot be read
    /// - [`DeployError::ConfigError`] when `system.repoPath` is unset for a git definition
    /// - [`DeployError::TopologyError`] when the rename would break the topology
    pub async fn resolve_definition(
        &self,
        system: &mut System,
        index: usize,
        out: &dyn OutputSink,
    ) -> Result<Option<Rename>> {
        let Some(definition) = system.container_definitions.get(index) else {
            return Ok(None);
        };

        let rename = if let Some(url) = definition.repository_url() {
            let url = url.to_string();
            self.resolve_commit(system, index, &url, out).await?
        } else if let Some(name) = definition.image_name() {
            let name = name.to_string();
            resolve_image_tag(system, index, &name)?
        } else {
            tracing::trace!(definition = %definition.id, "No external reference, skipping");
            return Ok(None);
        };

        tracing::info!(
            system = %system.id,
            instances = rename.instances.len(),
            "Renamed definition {} into {}",
            rename.old_id,
            rename.new_id
        );
        out.emit(
            &format!("--> Renamed definition {} into {}", rename.old_id, rename.new_id),
            OutputLevel::Info,
        );

        Ok(Some(rename))
    }

    async fn resolve_commit(
        &self,
        system: &mut System,
        index: usize,
        url: &str,
        out: &dyn OutputSink,
    ) -> Result<Rename> {
        let definition = &system.container_definitions[index];
        let definition_id = definition.id.clone();

        self.synchronizer.synch(system, definition, out).await.map_err(|e| {
            e.context(DeployError::SyncError {
                definition: definition_id.clone(),
            })
        })?;

        let repo_path = system.repo_path.as_deref().ok_or_else(|| DeployError::ConfigError {
            message: format!(
                "repoPath is not set for system '{}' while resolving '{definition_id}'",
                system.id
            ),
        })?;
        let checkout = checkout_path(Path::new(repo_path), definition, url)?;

        let commit = self.read_commit(&checkout).await?;
        let new_id = suffixed(&definition_id, &commit);

        let rename = TopologyEditor::new(system).rename_definition(index, new_id, |instance| {
            instance.id = suffixed(&instance.id, &commit);
            instance.specific.insert("commit".to_string(), Value::String(commit.clone()));
        })?;

        system.container_definitions[index]
            .specific
            .insert("commit".to_string(), Value::String(commit));

        Ok(rename)
    }

    async fn read_commit(&self, checkout: &Path) -> Result<String> {
        let checkout_error = |reason: String| DeployError::CheckoutError {
            path: checkout.display().to_string(),
            reason,
        };

        let commit = self.commits.head_commit(checkout).await.map_err(|e| {
            if matches!(e.downcast_ref::<DeployError>(), Some(DeployError::CheckoutError { .. })) {
                e
            } else {
                let reason = e.to_string();
                e.context(checkout_error(reason))
            }
        })?;

        let commit = commit.trim().to_string();
        if commit.is_empty() {
            return Err(checkout_error("HEAD resolved to an empty commit".to_string()).into());
        }
        Ok(commit)
    }

    fn inherited_auto_checkout_dir(&self) -> Option<String> {
        self.kernel_config
            .auto_checkout_dir
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .or_else(|| self.kernel_config.kernel.auto_checkout_dir())
            .map(str::to_string)
    }
}

fn resolve_image_tag(system: &mut System, index: usize, name: &str) -> Result<Rename> {
    let tag = normalize_image_tag(name);
    let suffix = tag_suffix(&tag);
    let new_id = suffixed(&system.container_definitions[index].id, &suffix);

    let rename = TopologyEditor::new(system).rename_definition(index, new_id, |instance| {
        instance.specific.insert("name".to_string(), Value::String(tag.clone()));
        instance.id = suffixed(&instance.id, &suffix);
    })?;

    system.container_definitions[index]
        .specific
        .insert("name".to_string(), Value::String(tag));

    Ok(rename)
}
