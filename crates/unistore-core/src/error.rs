//! Error types for the unistore core library.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause attached to generic backend failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the unistore library.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error raised by a backend
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No backend registered under the requested name
    #[error("Storage provider not found: {0}")]
    ProviderNotFound(String),

    /// Attempt to remove the configured default provider
    #[error("Cannot remove default storage provider: {0}")]
    CannotRemoveDefault(String),

    /// Manager or backend failed to initialize
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors every storage backend normalizes its native failures into.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object not found
    #[error("Object not found: {key} (provider: {provider})")]
    NotFound { key: String, provider: String },

    /// Credentials do not permit the operation
    #[error("Access denied: {key} (provider: {provider})")]
    AccessDenied { key: String, provider: String },

    /// Backend refused the write because a quota is exhausted
    #[error("Quota exceeded (provider: {provider})")]
    QuotaExceeded { provider: String },

    /// The backend does not implement the requested operation
    #[error("Operation {operation} is not supported by provider {provider}")]
    OperationNotSupported {
        operation: &'static str,
        provider: String,
    },

    /// Key cannot be mapped onto the backend namespace
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Any other backend failure
    #[error("Backend error ({provider}): {message}")]
    Backend {
        message: String,
        code: Option<String>,
        provider: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    pub fn not_found(key: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::NotFound {
            key: key.into(),
            provider: provider.into(),
        }
    }

    pub fn access_denied(key: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::AccessDenied {
            key: key.into(),
            provider: provider.into(),
        }
    }

    pub fn not_supported(operation: &'static str, provider: impl Into<String>) -> Self {
        Self::OperationNotSupported {
            operation,
            provider: provider.into(),
        }
    }

    /// Generic backend failure without an underlying cause.
    pub fn backend(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            code: None,
            provider: provider.into(),
            source: None,
        }
    }

    /// Generic backend failure that keeps the native error as its source.
    pub fn backend_with_source<E>(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            message: message.into(),
            code: None,
            provider: provider.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Attach a machine-readable code to a generic backend failure.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        match self {
            Self::Backend {
                message,
                provider,
                source,
                ..
            } => Self::Backend {
                message,
                code: Some(code.into()),
                provider,
                source,
            },
            other => other,
        }
    }
}

/// Coarse error classification, stable enough to branch on and to use as a
/// metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    QuotaExceeded,
    OperationNotSupported,
    InvalidKey,
    ProviderNotFound,
    CannotRemoveDefault,
    Initialization,
    Config,
    Serialization,
    Io,
    Backend,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::OperationNotSupported => "operation_not_supported",
            ErrorKind::InvalidKey => "invalid_key",
            ErrorKind::ProviderNotFound => "provider_not_found",
            ErrorKind::CannotRemoveDefault => "cannot_remove_default",
            ErrorKind::Initialization => "initialization",
            ErrorKind::Config => "config",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Io => "io",
            ErrorKind::Backend => "backend",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage(storage_err) => match storage_err {
                StorageError::NotFound { .. } => ErrorKind::NotFound,
                StorageError::AccessDenied { .. } => ErrorKind::AccessDenied,
                StorageError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
                StorageError::OperationNotSupported { .. } => ErrorKind::OperationNotSupported,
                StorageError::InvalidKey(_) => ErrorKind::InvalidKey,
                StorageError::Backend { .. } => ErrorKind::Backend,
            },
            Error::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            Error::CannotRemoveDefault(_) => ErrorKind::CannotRemoveDefault,
            Error::Initialization(_) => ErrorKind::Initialization,
            Error::Config(_) => ErrorKind::Config,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_not_supported(&self) -> bool {
        self.kind() == ErrorKind::OperationNotSupported
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
