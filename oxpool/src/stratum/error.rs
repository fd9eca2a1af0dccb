//! Error types for the client engine.

use thiserror::Error;

use crate::store::StoreError;
use crate::work::WorkError;

/// Fatal and per-message errors raised by client tasks.
///
/// Which of these tear the connection down and which only produce an error
/// response is decided by the handlers; the reader and sender treat every
/// error as fatal.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error, including lines over the inbound size cap.
    #[error("framing error: {0}")]
    Frame(#[from] tokio_util::codec::LinesCodecError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A line parsed as JSON but not as any known message shape.
    #[error("malformed message: {0}")]
    InvalidMessage(String),

    /// The rolling read deadline expired.
    #[error("read timed out")]
    ReadTimeout,

    /// The connection is closed or closing.
    #[error("connection closed")]
    Disconnected,

    #[error(transparent)]
    Work(#[from] WorkError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenient Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
