//! Core error types shared by every fleetwright module.

pub mod error;

pub use error::{DeployError, ErrorContext, user_friendly_error};
