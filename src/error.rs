use thiserror::Error;

/// Vimo desktop client errors
#[derive(Debug, Error)]
pub enum VimoError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration and settings file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence adapter errors (quota, corrupt records, unavailable store)
    #[error("Storage error: {0}")]
    Storage(String),

    /// The backend answered with `success: false` or a non-2xx status
    #[error("Backend error: {0}")]
    Backend(String),

    /// Validation errors (path, size, query, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Operation abandoned because its owner stopped or shut down
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl VimoError {
    /// Build a backend error carrying the HTTP status, so classification can
    /// tell client from server failures.
    pub fn backend(status: u16, message: impl AsRef<str>) -> Self {
        VimoError::Backend(format!("status {}: {}", status, message.as_ref()))
    }
}

/// Front-ends display errors as plain strings
impl From<VimoError> for String {
    fn from(err: VimoError) -> String {
        err.to_string()
    }
}

impl From<Box<dyn std::error::Error>> for VimoError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        VimoError::Other(err.to_string())
    }
}

impl From<tokio::task::JoinError> for VimoError {
    fn from(err: tokio::task::JoinError) -> Self {
        VimoError::Other(format!("Background task failed: {}", err))
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, VimoError>;
}

impl<T, E: Into<VimoError>> ErrorContext<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, VimoError> {
        self.map_err(|e| {
            let err: VimoError = e.into();
            match err {
                VimoError::Other(s) => VimoError::Other(format!("{}: {}", msg, s)),
                VimoError::Config(s) => VimoError::Config(format!("{}: {}", msg, s)),
                VimoError::Storage(s) => VimoError::Storage(format!("{}: {}", msg, s)),
                VimoError::Backend(s) => VimoError::Backend(format!("{}: {}", msg, s)),
                VimoError::Validation(s) => VimoError::Validation(format!("{}: {}", msg, s)),
                VimoError::LockPoisoned(s) => {
                    VimoError::LockPoisoned(format!("{}: {}", msg, s))
                }
                other => other,
            }
        })
    }
}
