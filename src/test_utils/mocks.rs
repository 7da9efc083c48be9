//! In-memory collaborators that record how they were called.

use anyhow::{Result, anyhow, bail};
use futures::future::{self, BoxFuture};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::compiler::{CompilerFailure, Synchronizer, SystemCompiler};
use crate::config::{ConfigLoader, DeployConfig};
use crate::git::CommitReader;
use crate::handlers::{ContainerHandler, HandlerFactories};
use crate::output::{OutputLevel, OutputSink};
use crate::topology::{ContainerDefinition, Settings, System, SystemsMap};

/// [`OutputSink`] that keeps every line.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    lines: Mutex<Vec<(String, OutputLevel)>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(String, OutputLevel)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines().into_iter().map(|(message, _)| message).collect()
    }
}

impl OutputSink for RecordingOutput {
    fn emit(&self, message: &str, level: OutputLevel) {
        self.lines.lock().unwrap().push((message.to_string(), level));
    }
}

/// [`SystemCompiler`] returning a fixed outcome and recording the configuration it
/// was handed.
pub struct ScriptedCompiler {
    outcome: std::result::Result<SystemsMap, CompilerFailure>,
    targets: Vec<String>,
    configs: Mutex<Vec<DeployConfig>>,
}

impl ScriptedCompiler {
    /// Compiles to `systems`, keyed by their ids.
    pub fn returning(systems: impl IntoIterator<Item = System>) -> Self {
        let systems = systems.into_iter().map(|system| (system.id.clone(), system)).collect();
        Self {
            outcome: Ok(systems),
            targets: Vec::new(),
            configs: Mutex::new(Vec::new()),
        }
    }

    /// Rejects every compile with `failure`.
    pub fn failing(failure: CompilerFailure) -> Self {
        Self {
            outcome: Err(failure),
            targets: Vec::new(),
            configs: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Configuration passed to the most recent compile.
    pub fn last_config(&self) -> Option<DeployConfig> {
        self.configs.lock().unwrap().last().cloned()
    }
}

impl SystemCompiler for ScriptedCompiler {
    fn compile_all<'a>(
        &'a self,
        _path: &'a Path,
        config: &'a DeployConfig,
    ) -> BoxFuture<'a, std::result::Result<SystemsMap, CompilerFailure>> {
        self.configs.lock().unwrap().push(config.clone());
        Box::pin(future::ready(self.outcome.clone()))
    }

    fn list_targets<'a>(&'a self, _path: &'a Path) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(future::ready(Ok(self.targets.clone())))
    }
}

/// One recorded synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchCall {
    pub system_id: String,
    pub definition_id: String,
    pub repo_path: Option<String>,
}

/// [`Synchronizer`] that records calls and optionally fails for one definition.
#[derive(Debug, Default)]
pub struct RecordingSynchronizer {
    calls: Mutex<Vec<SynchCall>>,
    fail_on: Option<String>,
}

impl RecordingSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails when asked to synchronize the definition with id `definition_id`.
    pub fn failing_on(definition_id: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(definition_id.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<SynchCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Synchronizer for RecordingSynchronizer {
    fn synch<'a>(
        &'a self,
        system: &'a System,
        definition: &'a ContainerDefinition,
        out: &'a dyn OutputSink,
    ) -> BoxFuture<'a, Result<()>> {
        self.calls.lock().unwrap().push(SynchCall {
            system_id: system.id.clone(),
            definition_id: definition.id.clone(),
            repo_path: system.repo_path.clone(),
        });

        let result = if self.fail_on.as_deref() == Some(definition.id.as_str()) {
            Err(anyhow!("remote rejected fetch of {}", definition.id))
        } else {
            out.emit(&format!("synchronized {}", definition.id), OutputLevel::Debug);
            Ok(())
        };
        Box::pin(future::ready(result))
    }
}

/// [`CommitReader`] answering from a table instead of git.
#[derive(Debug, Default)]
pub struct FixedCommitReader {
    commits: HashMap<PathBuf, String>,
    fallback: Option<String>,
    seen: Mutex<Vec<PathBuf>>,
}

impl FixedCommitReader {
    /// Every checkout is at `commit`.
    pub fn always(commit: &str) -> Self {
        Self {
            fallback: Some(commit.to_string()),
            ..Self::default()
        }
    }

    /// No checkout resolves.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The checkout at `path` is at `commit`.
    #[must_use]
    pub fn with(mut self, path: impl Into<PathBuf>, commit: &str) -> Self {
        self.commits.insert(path.into(), commit.to_string());
        self
    }

    /// Checkouts asked about, in order.
    pub fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

impl CommitReader for FixedCommitReader {
    fn head_commit<'a>(&'a self, checkout: &'a Path) -> BoxFuture<'a, Result<String>> {
        self.seen.lock().unwrap().push(checkout.to_path_buf());
        let result = self
            .commits
            .get(checkout)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| anyhow!("fatal: ambiguous argument 'HEAD' in {}", checkout.display()));
        Box::pin(future::ready(result))
    }
}

/// [`ConfigLoader`] whose configuration can be swapped between calls.
#[derive(Debug, Default)]
pub struct MutableConfigLoader {
    config: Mutex<DeployConfig>,
    loads: AtomicUsize,
}

impl MutableConfigLoader {
    pub fn new(config: DeployConfig) -> Self {
        Self {
            config: Mutex::new(config),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, config: DeployConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ConfigLoader for MutableConfigLoader {
    fn load<'a>(&'a self, _system: &'a System) -> BoxFuture<'a, Result<DeployConfig>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let config = self.config.lock().unwrap().clone();
        Box::pin(future::ready(Ok(config)))
    }
}

/// Shared counters behind every [`ProbeHandler`] a probe's factories build.
#[derive(Debug, Default)]
pub struct HandlerProbe {
    builds: AtomicUsize,
    releases: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
    services: Mutex<Vec<(String, PathBuf)>>,
    settings: Mutex<HashMap<String, Settings>>,
    fail_release: AtomicBool,
    fail_service: Mutex<Option<String>>,
}

impl HandlerProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factories for every built-in module plus `extra` `(module, container type)`
    /// pairs, all building [`ProbeHandler`]s reporting to this probe.
    pub fn factories(self: &Arc<Self>, extra: &[(&str, &str)]) -> HandlerFactories {
        let mut factories = HandlerFactories::new();
        let builtins = crate::handlers::BUILTIN_CONTAINER_TYPES
            .iter()
            .map(|b| (b.require, b.container_type));
        for (module, container_type) in builtins.chain(extra.iter().copied()) {
            let probe = Arc::clone(self);
            let container_type = container_type.to_string();
            factories.register(module, move |settings, _span| {
                probe.builds.fetch_add(1, Ordering::SeqCst);
                probe.events.lock().unwrap().push(format!("build {container_type}"));
                probe.settings.lock().unwrap().insert(container_type.clone(), settings.clone());
                Ok(Arc::new(ProbeHandler {
                    container_type: container_type.clone(),
                    settings,
                    probe: Arc::clone(&probe),
                }) as Arc<dyn ContainerHandler>)
            });
        }
        factories
    }

    /// Handlers built so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// `build <type>` and `release <type>` entries in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Container types released so far, in release order.
    pub fn releases(&self) -> Vec<String> {
        self.releases.lock().unwrap().clone()
    }

    /// `(container type, root)` of every started service, in start order.
    pub fn services(&self) -> Vec<(String, PathBuf)> {
        self.services.lock().unwrap().clone()
    }

    /// Settings the most recent handler of `container_type` was built with.
    pub fn settings_for(&self, container_type: &str) -> Option<Settings> {
        self.settings.lock().unwrap().get(container_type).cloned()
    }

    /// Makes every subsequent release fail.
    pub fn fail_releases(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    /// Makes the service of `container_type` fail.
    pub fn fail_service_of(&self, container_type: &str) {
        *self.fail_service.lock().unwrap() = Some(container_type.to_string());
    }
}

/// Handler built by a [`HandlerProbe`] factory.
#[derive(Debug)]
pub struct ProbeHandler {
    container_type: String,
    settings: Settings,
    probe: Arc<HandlerProbe>,
}

impl ProbeHandler {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl ContainerHandler for ProbeHandler {
    fn container_type(&self) -> &str {
        &self.container_type
    }

    fn release(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.probe.fail_release.load(Ordering::SeqCst) {
                bail!("{} refused to release", self.container_type);
            }
            self.probe.releases.lock().unwrap().push(self.container_type.clone());
            self.probe.events.lock().unwrap().push(format!("release {}", self.container_type));
            Ok(())
        })
    }

    fn service<'a>(&'a self, root: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let failing = self.probe.fail_service.lock().unwrap().clone();
            if failing.as_deref() == Some(self.container_type.as_str()) {
                bail!("{} service crashed", self.container_type);
            }
            self.probe
                .services
                .lock()
                .unwrap()
                .push((self.container_type.clone(), root.to_path_buf()));
            Ok(())
        })
    }
}
