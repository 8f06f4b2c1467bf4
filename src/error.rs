//! Custom error types for the todo server.
//!
//! Every component returns [`TodoError`]. The dispatcher converts it into the
//! client-visible message via [`TodoError::client_message`]; nothing in the
//! request path is allowed to panic on an error.

use thiserror::Error;

/// Coarse classification of a [`TodoError`], used by the transport to build
/// the outcome envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Operation,
    Permission,
    Conflict,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Operation => "operation",
            Self::Permission => "permission",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        };
        write!(f, "{name}")
    }
}

/// Main error type for todo server operations
#[derive(Error, Debug)]
pub enum TodoError {
    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// A todo, template or section does not exist
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// A parameter or piece of content failed validation
    #[error("Invalid parameter: {field} ({reason})")]
    Validation { field: String, reason: String },

    /// A filesystem or collaborator operation failed
    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },

    /// The filesystem refused access
    #[error("Permission denied: {message}")]
    Permission { message: String },

    /// The requested change collides with existing state
    #[error("Resource conflict: {what}")]
    Conflict { what: String },

    /// Invariant violation inside the server
    #[error("Internal error: {message}")]
    Internal { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Front-matter (YAML) error wrapper
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for TodoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::Permission {
                message: err.to_string(),
            },
            _ => Self::Io(err),
        }
    }
}

impl TodoError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a not-found error for a todo id
    pub fn todo_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Todo".to_string(),
            id: id.into(),
        }
    }

    /// Create a not-found error for a template name
    pub fn template_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Template".to_string(),
            id: name.into(),
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an operation error
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict { what: what.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Operation error used when a request deadline has passed.
    pub fn cancelled() -> Self {
        Self::operation("request", "cancelled")
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Kind of this error after unwrapping transport-level wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Operation { .. } => ErrorKind::Operation,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Self::Io(_) | Self::Yaml(_) => ErrorKind::Operation,
            Self::Json(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error is a not-found of any resource
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Message shown to tool-call clients.
    pub fn client_message(&self) -> String {
        match self {
            Self::NotFound { resource, .. } => format!("{resource} not found"),
            Self::Validation { field, reason } => format!("Invalid parameter: {field} ({reason})"),
            Self::Operation { operation, message } => format!("{operation} failed: {message}"),
            Self::Permission { .. } => "Permission denied".to_string(),
            Self::Conflict { what } => format!("Resource conflict: {what}"),
            Self::Internal { .. } => "Internal error".to_string(),
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => "Todo not found".to_string(),
            Self::Io(e) => format!("io failed: {e}"),
            Self::Yaml(e) => format!("parse failed: {e}"),
            Self::Json(_) | Self::Other(_) => "Internal error".to_string(),
        }
    }
}

/// Type alias for todo server results
pub type Result<T> = std::result::Result<T, TodoError>;

/// Extension trait for attaching an operation name to foreign errors
pub trait IntoTodoError<T> {
    fn into_operation(self, operation: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoTodoError<T> for std::result::Result<T, E> {
    fn into_operation(self, operation: &str) -> Result<T> {
        self.map_err(|e| TodoError::operation(operation, e.to_string()))
    }
}
