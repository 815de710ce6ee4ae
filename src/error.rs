//! Error kinds surfaced from the engine, each carrying a stable numeric
//! code so callers can match on it without depending on the `Debug`
//! representation of this enum.

use thiserror::Error;

/// A `Result` typedef to use with [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced from the cache strategy, file cache, connection pool and
/// HTTP engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A request or configuration value was invalid: an unsupported URL
    /// scheme, or a required field missing. Stable code `100700`.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A stream or connection was used after it was closed or removed.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A transport-level timeout occurred during send or receive.
    #[error("timeout: {0}")]
    Timeout(String),

    /// TLS handshake, verification, or CA loading failure.
    #[error("tls error: {0}")]
    Ssl(String),

    /// Any other I/O or transport error, URL parse failure, or cache I/O
    /// failure surfaced to the caller. Stable code `100702` for URL parse
    /// failures encountered while sending.
    #[error("execution error: {0}")]
    Execution(String),

    /// A reused connection failed mid-request and the request body could
    /// not be reset to retry on a fresh connection.
    #[error("connection retry failed: request body could not be reset")]
    ConnectionRetry,

    /// An error from the on-disk metadata database.
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An I/O error while reading or writing a cache body file.
    #[error("cache file i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A URL failed to parse.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl EngineError {
    /// The stable numeric error code for this kind, where one is assigned.
    /// Kinds without an assigned code return `0`.
    pub fn code(&self) -> u32 {
        match self {
            EngineError::IllegalArgument(_) => 100_700,
            EngineError::Execution(msg) if msg.starts_with("url parse") => {
                100_702
            }
            _ => 0,
        }
    }

    /// True iff this error is the `Execution` kind raised by the send/receive
    /// path (including cooperative cancellation), as opposed to timeouts or
    /// TLS failures.
    pub fn is_execution(&self) -> bool {
        matches!(self, EngineError::Execution(_))
    }
}
