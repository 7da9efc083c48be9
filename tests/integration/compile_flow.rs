//! Compile-and-resolve against real git checkouts.

use anyhow::Result;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use fleetwright::config::DeployConfig;
use fleetwright::core::DeployError;
use fleetwright::output::TracingOutput;
use fleetwright::resolver::IdentityResolver;
use fleetwright::test_utils::{RecordingOutput, TestGit, init_test_logging, shop_system};
use fleetwright::topology::System;

use crate::common::{CloningSynchronizer, FileConfigLoader, JsonDirCompiler, file_url, write_system};

struct Project {
    _temp: TempDir,
    root: PathBuf,
    upstream: TestGit,
    head: String,
}

impl Project {
    /// A project holding `shop_system()` whose `api` definition points at a fresh
    /// local upstream repository.
    fn new() -> Result<Self> {
        Self::with_system(|_| {})
    }

    fn with_system(customize: impl FnOnce(&mut System)) -> Result<Self> {
        init_test_logging(None);
        let temp = TempDir::new()?;
        let root = temp.path().join("project");
        std::fs::create_dir_all(&root)?;

        let upstream = TestGit::new(temp.path().join("upstream").join("shop-api"));
        let head = upstream.init_with_file("main.rs", "fn main() {}\n")?;

        let mut system = shop_system();
        system.container_definitions[1]
            .specific
            .insert("repositoryUrl".into(), json!(file_url(upstream.repo_path())));
        customize(&mut system);
        write_system(&root, &system)?;

        Ok(Self {
            _temp: temp,
            root,
            upstream,
            head,
        })
    }

    fn path(&self) -> &Path {
        &self.root
    }
}

fn resolver() -> IdentityResolver {
    IdentityResolver::new(
        Arc::new(FileConfigLoader),
        Arc::new(JsonDirCompiler),
        Arc::new(CloningSynchronizer),
        DeployConfig::default(),
    )
}

#[tokio::test]
async fn test_compile_pins_references_from_checkout() -> Result<()> {
    let project = Project::new()?;
    let out = RecordingOutput::new();

    let systems = resolver().compile("shop", project.path(), &out).await?;
    let shop = &systems["shop"];
    let head = &project.head;

    let api = shop.definition(&format!("api${head}")).expect("api pinned to upstream HEAD");
    assert_eq!(api.specific["commit"], json!(head));
    assert!(shop.topology.containers.contains_key(&format!("api-1${head}")));
    assert!(shop.definition("web$acme.app_latest").is_some());
    assert!(shop.repo_path.is_none());

    assert!(project.path().join("workspace/shop-api/main.rs").exists());
    assert!(out.messages().contains(&format!("--> Renamed definition api into api${head}")));
    Ok(())
}

#[tokio::test]
async fn test_recompile_follows_upstream() -> Result<()> {
    let project = Project::new()?;
    let resolver = resolver();

    resolver.compile("shop", project.path(), &TracingOutput).await?;

    std::fs::write(project.upstream.repo_path().join("lib.rs"), "pub fn api() {}\n")?;
    project.upstream.add_all()?;
    project.upstream.commit("Add library")?;
    let new_head = project.upstream.rev_parse_head()?;
    assert_ne!(new_head, project.head);

    // Each compile starts from the raw sources, so ids are suffixed once
    let systems = resolver.compile("shop", project.path(), &TracingOutput).await?;
    assert!(systems["shop"].definition(&format!("api${new_head}")).is_some());
    Ok(())
}

#[tokio::test]
async fn test_checkout_dir_names_the_workspace_directory() -> Result<()> {
    let project = Project::with_system(|system| {
        system.container_definitions[1].specific.insert("checkoutDir".into(), json!("api-src"));
    })?;

    let systems = resolver().compile("shop", project.path(), &TracingOutput).await?;

    assert!(project.path().join("workspace/api-src/main.rs").exists());
    assert!(!project.path().join("workspace/shop-api").exists());
    assert!(systems["shop"].definition(&format!("api${}", project.head)).is_some());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_repository_is_sync_error() -> Result<()> {
    let project = Project::with_system(|system| {
        system.container_definitions[1]
            .specific
            .insert("repositoryUrl".into(), json!("file:///nonexistent/fleetwright/missing-api"));
    })?;

    let err = resolver().compile("shop", project.path(), &TracingOutput).await.unwrap_err();

    assert_eq!(
        err.downcast_ref::<DeployError>(),
        Some(&DeployError::SyncError {
            definition: "api".to_string(),
        })
    );
    assert!(format!("{err:#}").contains("Git operation failed: clone"));
    Ok(())
}

#[tokio::test]
async fn test_invalid_system_file_is_compile_error() -> Result<()> {
    let project = Project::new()?;
    std::fs::write(project.path().join("systems/broken.json"), "{ \"id\": ")?;

    let err = resolver().compile("shop", project.path(), &TracingOutput).await.unwrap_err();

    match err.downcast_ref::<DeployError>() {
        Some(DeployError::CompileError {
            message,
        }) => {
            assert!(message.starts_with("Failed to compile systems\n--> "));
            assert!(message.contains("broken.json"));
        }
        other => panic!("expected CompileError, got {other:?}"),
    }
    // nothing was synchronized
    assert!(!project.path().join("workspace").exists());
    Ok(())
}

#[tokio::test]
async fn test_list_targets() -> Result<()> {
    let project = Project::new()?;
    for target in ["production", "alpha"] {
        std::fs::create_dir_all(project.path().join("targets").join(target))?;
    }
    std::fs::write(project.path().join("targets/README.md"), "targets\n")?;

    let targets = resolver().list_targets(project.path()).await?;
    assert_eq!(targets, vec!["alpha", "production"]);
    Ok(())
}
