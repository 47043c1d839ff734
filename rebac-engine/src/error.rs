use thiserror::Error;

/// Error taxonomy surfaced to the transport layer.
///
/// `Validation` is always caller-fixable and never retried internally.
/// `Database` carries a store-specific subkind for status mapping; retry
/// policy belongs to the caller. `Service` is an unexpected internal defect.
/// `Cancelled` is a distinct termination signal, not a fault.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error ({kind}): {message}")]
    Database { kind: StoreErrorKind, message: String },

    #[error("service error: {0}")]
    Service(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Store-specific subkind of a [`EngineError::Database`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The tuple or schema store cannot be reached.
    Unavailable,
    /// No snapshot exists for the requested schema version.
    SnapshotMissing,
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::SnapshotMissing => write!(f, "snapshot missing"),
        }
    }
}

/// Taxonomy class of an [`EngineError`], for transport-level status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Database,
    Service,
    Cancelled,
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn database(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self::Database {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Database { .. } => ErrorKind::Database,
            Self::Service(_) => ErrorKind::Service,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn subkind(&self) -> Option<StoreErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Wrap the message once with call context; the variant is preserved so
    /// transport mapping still sees the original taxonomy class.
    pub(crate) fn with_call_context(self, context: &str) -> Self {
        match self {
            Self::Validation(message) => Self::Validation(format!("{context}: {message}")),
            Self::Database { kind, message } => Self::Database {
                kind,
                message: format!("{context}: {message}"),
            },
            Self::Service(message) => Self::Service(format!("{context}: {message}")),
            Self::Cancelled => Self::Cancelled,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Service(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
