//! Integration test suite for fleetwright
//!
//! End-to-end tests driving the identity resolver and the handler registry with
//! file-backed collaborators and real git repositories.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **compile_flow**: Compile, synchronize and pin systems from a project directory
//! - **handler_registry**: Handler caching across `fleet.toml` edits, service startup
//! - **error_reporting**: Operator-facing rendering of pipeline failures

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod compile_flow;
mod error_reporting;
mod handler_registry;
