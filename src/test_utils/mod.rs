//! Test utilities for fleetwright
//!
//! In-memory stand-ins for the resolver's and registry's collaborators, sample
//! systems, and a helper for building real git repositories.
//!
//! Available to this crate's unit tests and, through the `test-utils` feature, to
//! integration tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetwright::config::{DeployConfig, StaticConfigLoader};
//! use fleetwright::resolver::IdentityResolver;
//! use fleetwright::test_utils::{FixedCommitReader, RecordingSynchronizer, ScriptedCompiler, shop_system};
//!
//! let resolver = IdentityResolver::new(
//!     Arc::new(StaticConfigLoader::default()),
//!     Arc::new(ScriptedCompiler::returning([shop_system()])),
//!     Arc::new(RecordingSynchronizer::new()),
//!     DeployConfig::default(),
//! )
//! .with_commit_reader(Arc::new(FixedCommitReader::always("3f2c9e1")));
//! ```

pub mod fixtures;
pub mod git_helper;
pub mod mocks;

pub use fixtures::{API_REPOSITORY, kernel_config, registry_system, shop_system};
pub use git_helper::TestGit;
pub use mocks::{
    FixedCommitReader, HandlerProbe, MutableConfigLoader, ProbeHandler, RecordingOutput,
    RecordingSynchronizer, ScriptedCompiler,
};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Initializes the tracing subscriber once per process. Uses `level` when given,
/// otherwise `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer() // Important: uses test-compatible writer
            .with_target(true) // Show targets like "git" and "output"
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
