//! Common test utilities for fleetwright integration tests
//!
//! File-backed collaborators: a compiler reading systems from JSON files, a
//! synchronizer cloning real git repositories, and a loader reading `fleet.toml`.

// Allow dead code because these utilities are used across different test files
// and not all utilities are used in every test file
#![allow(dead_code)]

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};

use fleetwright::compiler::{CompilerFailure, Synchronizer, SystemCompiler};
use fleetwright::config::{ConfigLoader, DeployConfig};
use fleetwright::git::command_builder::GitCommand;
use fleetwright::git::is_valid_git_repo;
use fleetwright::output::{OutputLevel, OutputSink};
use fleetwright::resolver::checkout_path;
use fleetwright::topology::{ContainerDefinition, System, SystemsMap};

/// Name of the per-system configuration file read by [`FileConfigLoader`].
pub const CONFIG_FILE: &str = "fleet.toml";

/// Compiles every `<path>/systems/*.json` file into a system.
#[derive(Debug, Default)]
pub struct JsonDirCompiler;

impl JsonDirCompiler {
    async fn compile(path: &Path) -> std::result::Result<SystemsMap, CompilerFailure> {
        let failure = |reason: String| CompilerFailure::new("Failed to compile systems", vec![reason]);

        let mut entries = tokio::fs::read_dir(path.join("systems"))
            .await
            .map_err(|e| failure(format!("cannot read {}: {e}", path.join("systems").display())))?;

        let mut systems = SystemsMap::new();
        let mut reasons = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| failure(e.to_string()))? {
            let file = entry.path();
            if file.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&file).await.map_err(|e| failure(e.to_string()))?;
            match serde_json::from_str::<System>(&content) {
                Ok(system) => {
                    systems.insert(system.id.clone(), system);
                }
                Err(e) => reasons.push(format!("{}: {e}", file.display())),
            }
        }

        if reasons.is_empty() {
            Ok(systems)
        } else {
            reasons.sort();
            Err(CompilerFailure::new("Failed to compile systems", reasons))
        }
    }
}

impl SystemCompiler for JsonDirCompiler {
    fn compile_all<'a>(
        &'a self,
        path: &'a Path,
        _config: &'a DeployConfig,
    ) -> BoxFuture<'a, std::result::Result<SystemsMap, CompilerFailure>> {
        Box::pin(Self::compile(path))
    }

    fn list_targets<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let mut targets = Vec::new();
            let mut entries = tokio::fs::read_dir(path.join("targets"))
                .await
                .with_context(|| format!("Failed to list targets under {}", path.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    targets.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            targets.sort();
            Ok(targets)
        })
    }
}

/// Clones a definition's repository into its checkout, or fast-forwards an existing one.
#[derive(Debug, Default)]
pub struct CloningSynchronizer;

impl Synchronizer for CloningSynchronizer {
    fn synch<'a>(
        &'a self,
        system: &'a System,
        definition: &'a ContainerDefinition,
        out: &'a dyn OutputSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = definition.repository_url().context("definition has no repositoryUrl")?;
            let repo_path = system.repo_path.as_deref().context("system has no repoPath")?;
            let checkout = checkout_path(Path::new(repo_path), definition, url)?;

            if is_valid_git_repo(&checkout) {
                GitCommand::pull_ff_only().current_dir(&checkout).execute().await?;
                out.emit(&format!("updated {}", checkout.display()), OutputLevel::Debug);
            } else {
                GitCommand::clone_repo(url, &checkout).with_context(&definition.id).execute().await?;
                out.emit(&format!("cloned {}", checkout.display()), OutputLevel::Debug);
            }
            Ok(())
        })
    }
}

/// Loads `<repoPath>/fleet.toml`, or an empty configuration when it is missing.
#[derive(Debug, Default)]
pub struct FileConfigLoader;

impl ConfigLoader for FileConfigLoader {
    fn load<'a>(&'a self, system: &'a System) -> BoxFuture<'a, Result<DeployConfig>> {
        Box::pin(async move {
            let Some(repo_path) = system.repo_path.as_deref() else {
                return Ok(DeployConfig::default());
            };
            let file = Path::new(repo_path).join(CONFIG_FILE);
            if !file.exists() {
                return Ok(DeployConfig::default());
            }
            DeployConfig::load_from(&file).await
        })
    }
}

/// Writes `system` as `<root>/systems/<id>.json`.
pub fn write_system(root: &Path, system: &System) -> Result<PathBuf> {
    let dir = root.join("systems");
    std::fs::create_dir_all(&dir)?;
    let file = dir.join(format!("{}.json", system.id));
    std::fs::write(&file, serde_json::to_string_pretty(system)?)?;
    Ok(file)
}

/// `file://` URL of a local path.
pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
