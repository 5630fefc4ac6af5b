//! Error types for pipeline definitions

use thiserror::Error;

/// Errors detected before any build begins
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A component was declared without a name
    #[error("component name must not be empty")]
    EmptyName,

    /// A component was declared without a base image
    #[error("component '{0}' has no base image")]
    EmptyImage(String),

    /// Two components share a name
    #[error("duplicate component name '{0}'")]
    DuplicateName(String),

    /// The pipeline (after filtering) contains nothing to run
    #[error("pipeline has no components")]
    NoComponents,

    /// The readiness probe targets a port the component does not expose
    #[error("component '{component}' health check port {port} is not exposed")]
    HealthPortNotExposed {
        /// Component name
        component: String,
        /// Port named by the health check
        port: u16,
    },

    /// An install step has no command
    #[error("component '{0}' has an install step with an empty command")]
    EmptyInstallCommand(String),

    /// A write-file step has no destination
    #[error("component '{0}' has a file step with an empty path")]
    EmptyFilePath(String),

    /// A host mount has no source or a relative container path
    #[error("component '{component}' has an invalid mount at '{target}'")]
    InvalidMount {
        /// Component name
        component: String,
        /// Container path of the mount
        target: String,
    },

    /// A component filter names a component that is not declared
    #[error("unknown component '{0}'")]
    UnknownComponent(String),
}
