//! Fleetwright - identity resolution and container handlers for deployments
//!
//! Fleetwright sits between a system compiler and the deployer. A compiled system
//! describes its containers abstractly: definitions may point at a git repository or
//! a registry image, both of which move over time. This crate pins those references
//! and provides the per-system handlers that later drive the containers.
//!
//! # Architecture Overview
//!
//! ```text
//! source tree ──► SystemCompiler ──► raw systems ──► IdentityResolver ──► pinned systems
//!                                                        │
//!                                         Synchronizer + CommitReader (git)
//!
//! (system, type) ──► HandlerRegistry ──► HandlerCache ──► Arc<dyn ContainerHandler>
//!                          │
//!                   ConfigLoader + HandlerFactories
//! ```
//!
//! - A git-backed definition `api` pinned at commit `3f2c...` becomes `api$3f2c...`.
//! - A registry definition `web` with image `acme/app` becomes `web$acme.app_latest`.
//!
//! Every instance placing a renamed definition is renamed the same way, and the
//! containment forest is kept consistent.
//!
//! # Core Modules
//!
//! - [`resolver`] - Compile-and-resolve pipeline and identity strings
//! - [`topology`] - System, definition and instance model, plus the topology editor
//! - [`handlers`] - Container handler trait, factories and the per-system registry
//! - [`cache`] - Handler cache keyed by system id and configuration fingerprint
//! - [`config`] - Merged deployment configuration and its loader seam
//!
//! # Supporting Modules
//!
//! - [`compiler`] - Seams to the system compiler and checkout synchronizer
//! - [`git`] - Repository URL parsing and `HEAD` lookup via the `git` binary
//! - [`output`] - Progress line sinks
//! - [`core`] - Error types and user-facing error formatting
//! - [`utils`] - Path helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use fleetwright::config::{DeployConfig, StaticConfigLoader};
//! use fleetwright::handlers::{HandlerFactories, HandlerRegistry};
//! use fleetwright::output::ConsoleOutput;
//! use fleetwright::resolver::IdentityResolver;
//! # use fleetwright::compiler::{Synchronizer, SystemCompiler};
//! # async fn example(
//! #     compiler: Arc<dyn SystemCompiler>,
//! #     synchronizer: Arc<dyn Synchronizer>,
//! # ) -> anyhow::Result<()> {
//! let config = DeployConfig::load_from(Path::new("/etc/fleetwright/config.toml")).await?;
//! let loader = Arc::new(StaticConfigLoader::new(config.clone()));
//!
//! let resolver = IdentityResolver::new(loader.clone(), compiler, synchronizer, config);
//! let systems = resolver.compile("shop", Path::new("/srv/shop"), &ConsoleOutput).await?;
//!
//! let registry = HandlerRegistry::new(loader, HandlerFactories::with_builtins());
//! let handler = registry.get_handler(&systems["shop"], "blank-container").await?;
//! # let _ = handler;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod core;
pub mod git;
pub mod handlers;
pub mod output;
pub mod resolver;
pub mod topology;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
