/// Saltline Error Types
///
/// Error kinds surfaced by the public stream and acceptor APIs. Protocol and
/// cryptographic failures never appear here: an invalid or unauthenticated
/// datagram is dropped locally without disturbing the session.

use std::io;
use thiserror::Error;

/// Main error type for Saltline operations
#[derive(Error, Debug)]
pub enum SaltlineError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Handshake retry budget exhausted without a server response
    #[error("connection refused: hello retries exhausted")]
    ConnectionRefused,

    /// Peer sent EOF and all bytes have been delivered
    #[error("end of stream")]
    EndOfStream,

    /// Peer terminated the stream with a failure marker
    #[error("stream failed by peer")]
    StreamFailure,

    /// A pending wait was released by a local close or cancel
    #[error("operation aborted")]
    OperationAborted,

    /// A bounded queue could not accept more entries
    #[error("queue overflow")]
    Overflow,

    /// Operation attempted on a stream that is not connected
    #[error("not connected")]
    NotConnected,
}

/// Result type alias for Saltline operations
pub type Result<T> = std::result::Result<T, SaltlineError>;

impl SaltlineError {
    /// Check if this error marks orderly stream termination
    #[must_use]
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// Check if this error terminates the session
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused | Self::StreamFailure | Self::OperationAborted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SaltlineError::EndOfStream.is_end_of_stream());
        assert!(!SaltlineError::Overflow.is_end_of_stream());
        assert!(SaltlineError::ConnectionRefused.is_fatal());
        assert!(!SaltlineError::Overflow.is_fatal());
    }

    #[test]
    fn io_conversion() {
        let err: SaltlineError = io::Error::new(io::ErrorKind::AddrInUse, "bind").into();
        assert!(matches!(err, SaltlineError::Io(_)));
    }
}
