//! Container handlers and the factories that build them.
//!
//! A container handler drives one kind of container (docker, plain processes, AWS
//! load balancers...) for one system. Handlers are built by factories that an
//! embedder registers up front under a module reference, the same string a
//! configuration's `containers[].require` entry names:
//!
//! ```rust
//! use std::sync::Arc;
//! use fleetwright::handlers::{BlankContainerHandler, ContainerHandler, HandlerFactories};
//!
//! let mut factories = HandlerFactories::with_builtins();
//! factories.register("acme-queue", |settings, _span| {
//!     Ok(Arc::new(BlankContainerHandler::new(settings)) as Arc<dyn ContainerHandler>)
//! });
//! assert!(factories.contains("acme-queue"));
//! ```
//!
//! Which factory serves which container type is decided per configuration by the
//! [`registry::HandlerRegistry`].

pub mod registry;

use anyhow::Result;
use futures::future::{self, BoxFuture};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::topology::Settings;

pub use registry::{HandlerRegistry, list_types};

/// Drives containers of one type for one system.
///
/// Both lifecycle hooks are optional; the defaults do nothing.
pub trait ContainerHandler: Send + Sync + fmt::Debug {
    /// The container type this handler was built for.
    fn container_type(&self) -> &str;

    /// Frees whatever the handler holds. Called once when the handler is evicted
    /// because its system's configuration changed.
    fn release(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(future::ready(Ok(())))
    }

    /// Starts the handler's background service, with `root` the directory above the
    /// systems root.
    fn service<'a>(&'a self, _root: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

/// Builds a handler from its merged `specific` settings, inside a `container` span.
pub type HandlerFactory =
    Arc<dyn Fn(Settings, tracing::Span) -> Result<Arc<dyn ContainerHandler>> + Send + Sync>;

/// A container type that resolves without any declaration in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinType {
    pub container_type: &'static str,
    /// Module reference of the factory
    pub require: &'static str,
}

pub const BUILTIN_CONTAINER_TYPES: &[BuiltinType] = &[
    BuiltinType {
        container_type: "blank-container",
        require: "blank-container",
    },
    BuiltinType {
        container_type: "docker",
        require: "docker-container",
    },
    BuiltinType {
        container_type: "process",
        require: "process-container",
    },
    BuiltinType {
        container_type: "aws-elb",
        require: "aws-elb-container",
    },
    BuiltinType {
        container_type: "aws-sg",
        require: "aws-sg-container",
    },
    BuiltinType {
        container_type: "aws-ami",
        require: "aws-ami-container",
    },
];

/// Built-in entry for `container_type`.
#[must_use]
pub fn builtin(container_type: &str) -> Option<&'static BuiltinType> {
    BUILTIN_CONTAINER_TYPES.iter().find(|b| b.container_type == container_type)
}

/// Factories keyed by module reference.
#[derive(Clone, Default)]
pub struct HandlerFactories {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerFactories {
    /// An empty set of factories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories for the handlers this crate ships: only `blank-container`.
    pub fn with_builtins() -> Self {
        let mut factories = Self::new();
        factories.register("blank-container", |settings, _span| {
            Ok(Arc::new(BlankContainerHandler::new(settings)) as Arc<dyn ContainerHandler>)
        });
        factories
    }

    /// Registers `factory` under `module`, replacing any previous registration.
    pub fn register<F>(&mut self, module: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Settings, tracing::Span) -> Result<Arc<dyn ContainerHandler>> + Send + Sync + 'static,
    {
        self.factories.insert(module.into(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn get(&self, module: &str) -> Option<&HandlerFactory> {
        self.factories.get(module)
    }

    #[must_use]
    pub fn contains(&self, module: &str) -> bool {
        self.factories.contains_key(module)
    }

    /// Registered module references, sorted.
    #[must_use]
    pub fn modules(&self) -> Vec<&str> {
        let mut modules: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        modules.sort_unstable();
        modules
    }
}

impl fmt::Debug for HandlerFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFactories").field("modules", &self.modules()).finish()
    }
}

/// Handler for containers that only group other containers.
#[derive(Debug, Clone)]
pub struct BlankContainerHandler {
    settings: Settings,
}

impl BlankContainerHandler {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
        }
    }

    /// Settings the handler was built with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl ContainerHandler for BlankContainerHandler {
    fn container_type(&self) -> &str {
        "blank-container"
    }
}
