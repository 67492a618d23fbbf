//! Error taxonomy for the appearance core.
//!
//! The core (schedule, settings, dark mode, service) reports typed errors so
//! callers can decide between fatal and log-and-continue. The application layer
//! wraps them into `anyhow` with context.

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, AppearanceError>;

/// Errors reported by the appearance core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppearanceError {
    /// Out-of-range window bounds or a malformed value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A collaborator (settings store, observers) is not ready.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// The requested operation makes no sense for the current state.
    #[error("operation invalid: {0}")]
    OperationInvalid(String),

    /// The alarm primitive or settings store failed.
    #[error("system error: {0}")]
    SystemError(String),

    /// The caller lacks the required permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl AppearanceError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::NotInitialized(message.into())
    }

    pub fn operation_invalid(message: impl Into<String>) -> Self {
        Self::OperationInvalid(message.into())
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::SystemError(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }
}
