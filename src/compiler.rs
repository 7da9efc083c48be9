//! Seams to the collaborators that produce and synchronize raw systems.
//!
//! Compiling source trees into systems and keeping git checkouts in sync are done
//! elsewhere; the identity resolver only drives them through these traits.

use anyhow::Result;
use futures::future::BoxFuture;
use std::path::Path;
use thiserror::Error;

use crate::config::DeployConfig;
use crate::output::OutputSink;
use crate::topology::{ContainerDefinition, System, SystemsMap};

/// A compiler rejection with its structured reasons.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CompilerFailure {
    /// Headline message
    pub message: String,
    /// One entry per problem found
    pub reasons: Vec<String>,
}

impl CompilerFailure {
    pub fn new(message: impl Into<String>, reasons: Vec<String>) -> Self {
        Self {
            message: message.into(),
            reasons,
        }
    }

    /// The message followed by one `--> reason` line per reason.
    #[must_use]
    pub fn enriched_message(&self) -> String {
        self.reasons.iter().fold(self.message.clone(), |mut acc, reason| {
            acc.push_str("\n--> ");
            acc.push_str(reason);
            acc
        })
    }
}

/// Turns a system source tree into raw compiled systems.
pub trait SystemCompiler: Send + Sync {
    /// Compiles every system found under `path`.
    fn compile_all<'a>(
        &'a self,
        path: &'a Path,
        config: &'a DeployConfig,
    ) -> BoxFuture<'a, std::result::Result<SystemsMap, CompilerFailure>>;

    /// Names of the deployment targets defined under `path`.
    fn list_targets<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// Brings the local checkout of a definition in line with its declared external state.
pub trait Synchronizer: Send + Sync {
    fn synch<'a>(
        &'a self,
        system: &'a System,
        definition: &'a ContainerDefinition,
        out: &'a dyn OutputSink,
    ) -> BoxFuture<'a, Result<()>>;
}
