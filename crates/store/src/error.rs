use thiserror::Error;

/// Errors surfaced by the store.
///
/// `TypeMismatch`, `InvalidState` and `InvalidArgument` are expected and go
/// back to the caller. `MalformedKey` and `EngineIo` abort the operation and
/// are worth an operator's attention.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A physical key could not be decoded: unknown or retired namespace
    /// prefix, unknown kind byte, or a truncated layout.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("WRONGTYPE operation against a key holding the wrong kind of value")]
    TypeMismatch,

    /// The operation is not valid for the key's current state (count
    /// underflow, index out of range, missing key for an in-place update).
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine failed to read or commit. Nothing from the failed batch is
    /// visible.
    #[error("engine I/O error: {0:#}")]
    EngineIo(anyhow::Error),

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Namespace definitions conflict with each other or with the persisted table.
    #[error("config error: {0}")]
    Config(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        StoreError::MalformedKey(msg.into())
    }

    /// `true` for the errors a command layer replies with rather than logs.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StoreError::TypeMismatch
                | StoreError::InvalidState(_)
                | StoreError::InvalidArgument(_)
                | StoreError::NamespaceNotFound(_)
        )
    }
}
