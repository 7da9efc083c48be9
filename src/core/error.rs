//! Error handling for fleetwright
//!
//! Two layers, mirroring how errors travel through a deployment:
//! - [`DeployError`] - strongly-typed failure kinds that callers can match on
//! - [`ErrorContext`] - an operator-facing wrapper adding details and a suggestion
//!
//! Public operations return [`anyhow::Result`]. A typed [`DeployError`] is either the
//! error itself or a context layer on top of a collaborator's error, so both of these
//! work on any error the crate returns:
//!
//! ```rust,no_run
//! use fleetwright::core::DeployError;
//!
//! fn classify(err: &anyhow::Error) -> &'static str {
//!     match err.downcast_ref::<DeployError>() {
//!         Some(DeployError::SyncError { .. }) => "synchronization",
//!         Some(DeployError::ReleaseError { .. }) => "handler release",
//!         Some(_) => "deployment",
//!         None => "unknown",
//!     }
//! }
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The failure kinds of identity resolution and handler provisioning.
///
/// Every error raised while compiling a system aborts the whole compile; nothing is
/// retried here. Handler registry errors leave the cache in whatever state it reached.
///
/// `SyncError`, `ReleaseError` and `ServiceError` are attached as context on top of
/// the collaborator's own error. Their `to_string()` is only the wrapper message; the
/// collaborator's message stays verbatim in the cause chain (`{err:#}`,
/// `err.chain()`) and in the details of [`user_friendly_error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    /// The external compiler rejected the system sources.
    ///
    /// `message` is the compiler's message followed by one `--> reason` line per reason.
    #[error("{message}")]
    CompileError {
        /// Enriched compiler message
        message: String,
    },

    /// The local checkout is not a git repository or `HEAD` cannot be resolved.
    #[error("Cannot resolve HEAD of checkout at {path}: {reason}")]
    CheckoutError {
        /// Checkout path that was inspected
        path: String,
        /// Why the commit could not be read
        reason: String,
    },

    /// The synchronizer failed to bring a definition's checkout up to date.
    #[error("Failed to synchronize container definition '{definition}'")]
    SyncError {
        /// Id of the definition being synchronized
        definition: String,
    },

    /// Neither the configuration nor the built-in table defines the container type.
    #[error("No container definition for type '{container_type}'")]
    UnknownTypeError {
        /// Requested container type
        container_type: String,
    },

    /// A superseded cached handler failed to release its resources.
    #[error("Failed to release '{container_type}' handler for system '{system_id}'")]
    ReleaseError {
        /// System whose cache was being rebuilt
        system_id: String,
        /// Type of the handler whose release failed
        container_type: String,
    },

    /// A container type resolved to a factory module nobody registered.
    #[error("No handler factory registered for module '{module}' (type '{container_type}')")]
    FactoryNotRegistered {
        /// Factory module reference
        module: String,
        /// Container type that referenced it
        container_type: String,
    },

    /// A handler's service start failed.
    #[error("Failed to start service for container type '{container_type}'")]
    ServiceError {
        /// Container type whose service failed
        container_type: String,
    },

    /// A repository URL could not be split into host, owner and repository name.
    #[error("Could not parse repository URL: {url}")]
    InvalidRepositoryUrl {
        /// The offending URL
        url: String,
    },

    /// A topology edit would break an invariant of the containment graph.
    #[error("Topology invariant violated: {reason}")]
    TopologyError {
        /// Which invariant and where
        reason: String,
    },

    /// Configuration is missing a required value or cannot be parsed.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration problem
        message: String,
    },

    /// A git command exited unsuccessfully.
    #[error("Git operation failed: {operation}")]
    GitCommandError {
        /// The git operation that failed (e.g., "rev-parse")
        operation: String,
        /// The error output from the git command
        stderr: String,
    },
}

/// A [`DeployError`] together with operator-facing details and a suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: DeployError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error without details or suggestion.
    #[must_use]
    pub const fn new(error: DeployError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Attach a suggestion for resolving the error.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach additional details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with terminal colors.
    ///
    /// Error in red, details in yellow, suggestion in green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] suitable for operators.
///
/// Recognizes [`DeployError`] anywhere in the chain (including when attached as
/// context) and falls back to a generic configuration error carrying the full chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(deploy_error) = error.downcast_ref::<DeployError>() {
        let mut context = create_error_context(deploy_error.clone());
        // Keep the collaborator's cause visible when the typed error is only a context layer
        if context.details.is_none() && error.chain().count() > 1 {
            context.details = Some(format!("{error:#}"));
        }
        return context;
    }

    ErrorContext::new(DeployError::ConfigError {
        message: format!("{error:#}"),
    })
}

fn create_error_context(error: DeployError) -> ErrorContext {
    let (suggestion, details): (Option<String>, Option<String>) = match &error {
        DeployError::CompileError { .. } => (
            Some("Fix the reported problems in the system definition and compile again".into()),
            None,
        ),
        DeployError::CheckoutError { path, .. } => (
            Some(
                "Check the definition's checkoutDir and that the synchronizer cloned the repository"
                    .into(),
            ),
            Some(format!("Expected a git working tree with at least one commit at {path}")),
        ),
        DeployError::SyncError { .. } => (
            Some("Check network access and credentials for the definition's repositoryUrl".into()),
            None,
        ),
        DeployError::UnknownTypeError { container_type } => (
            Some(format!(
                "Declare '{container_type}' under [[containers]] in the configuration or use a built-in type"
            )),
            None,
        ),
        DeployError::ReleaseError { .. } => (
            Some("Inspect the handler's resources manually; the cache was not rolled back".into()),
            Some("Handlers are released when the system configuration changes".into()),
        ),
        DeployError::FactoryNotRegistered { module, .. } => {
            (Some(format!("Register a factory for '{module}' before building handlers")), None)
        }
        DeployError::ServiceError { .. } => (
            Some(
                "Check that the service's runtime (docker daemon, process manager) is available"
                    .into(),
            ),
            None,
        ),
        DeployError::InvalidRepositoryUrl { .. } => (
            Some(
                "Use a URL such as https://github.com/owner/repo.git or git@github.com:owner/repo.git"
                    .into(),
            ),
            None,
        ),
        DeployError::TopologyError { .. } => (
            None,
            Some("The compiled system has inconsistent container instance references".into()),
        ),
        DeployError::ConfigError { .. } => (None, None),
        DeployError::GitCommandError { stderr, .. } => (
            Some("Check that git is installed and the repository is valid".into()),
            Some(stderr.trim().to_string()),
        ),
    };

    ErrorContext {
        error,
        suggestion,
        details,
    }
}
