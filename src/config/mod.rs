//! Configuration for identity resolution and handler provisioning.
//!
//! The crate never merges configuration overlays itself. It asks a [`ConfigLoader`]
//! for the merged [`DeployConfig`] of a system and treats the result as read-only
//! input: the handler registry fingerprints it, the identity resolver passes it on to
//! the compiler.
//!
//! [`StaticConfigLoader`] serves a single fixed configuration, which is all an
//! embedder needs when overlays are resolved up front (and all tests need).

mod deploy;

pub use deploy::{ContainerTypeDefinition, DeployConfig, KernelSettings, LOGGER_KEY, is_set};

use anyhow::Result;
use futures::future::{self, BoxFuture};

use crate::topology::System;

/// Source of merged per-system configuration.
///
/// Implementations merge kernel, local and target-specific overlays for `system`
/// (identified by its id, `repoPath` and topology name) and fail on malformed
/// overlay files.
pub trait ConfigLoader: Send + Sync {
    /// Loads the merged configuration for `system`.
    fn load<'a>(&'a self, system: &'a System) -> BoxFuture<'a, Result<DeployConfig>>;
}

/// A [`ConfigLoader`] returning a clone of the same configuration for every system.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigLoader {
    config: DeployConfig,
}

impl StaticConfigLoader {
    pub fn new(config: DeployConfig) -> Self {
        Self {
            config,
        }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load<'a>(&'a self, _system: &'a System) -> BoxFuture<'a, Result<DeployConfig>> {
        Box::pin(future::ready(Ok(self.config.clone())))
    }
}
