use std::io;

use store::StoreError;
use thiserror::Error;
use wal::WalError;

/// Errors raised while producing, shipping or applying the replication stream.
///
/// `SequenceTooOld`, `SequenceAhead` and `UpToDate` are ordinary responses,
/// not errors.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The transport failed (connection reset, short read, ...).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame failed its CRC or carried an impossible length.
    #[error("corrupt frame: {0}")]
    Corrupt(String),

    /// A well-formed frame that makes no sense here: unknown tag, an
    /// out-of-order entry, a response where a request was expected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Applying replicated data to the local store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The producer answered with an error.
    #[error("producer error: {0}")]
    Remote(String),
}

pub type ReplResult<T> = Result<T, ReplicationError>;

impl From<WalError> for ReplicationError {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                ReplicationError::Corrupt("truncated op list".into())
            }
            WalError::Io(e) => ReplicationError::Io(e),
            WalError::Corrupt => ReplicationError::Corrupt("bad frame or op list".into()),
            WalError::TooLarge(len) => {
                ReplicationError::Protocol(format!("message too large ({len} bytes)"))
            }
        }
    }
}

impl ReplicationError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        ReplicationError::Protocol(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        ReplicationError::Corrupt(msg.into())
    }
}
