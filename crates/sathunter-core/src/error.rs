//! Error types for SatHunter.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, codec,
//! and propagation errors are all captured here.

/// Failure to convert between an integer and its packed-decimal form.
///
/// Raised synchronously by the frame codec; never crosses the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// The value does not fit in the available decimal digits.
    #[error("value {0} does not fit in packed decimal")]
    Overflow(u64),

    /// A nibble held a value of 10 or more.
    #[error("invalid BCD digit at byte {index}: 0x{byte:02X}")]
    InvalidDigit {
        /// Position of the offending byte.
        index: usize,
        /// The raw byte.
        byte: u8,
    },
}

/// The error type for all SatHunter operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The BLE link reported a write or notify failure.
    ///
    /// The whole request may be retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// A notification arrived for the outstanding request but failed
    /// preamble, terminator, prefix, or length matching.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A protocol-level error (NAK from the rig, unexpected handshake traffic).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A value could not be packed into (or unpacked from) the wire format.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Timed out waiting for a response or for the pairing handshake.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a rig command or builder.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the rig has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the rig was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// The orbit propagator could not produce an observation.
    #[error("propagation error: {0}")]
    Propagation(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("write failed".into());
        assert_eq!(e.to_string(), "transport error: write failed");
    }

    #[test]
    fn error_display_malformed() {
        let e = Error::MalformedResponse("wrong terminator".into());
        assert_eq!(e.to_string(), "malformed response: wrong terminator");
    }

    #[test]
    fn error_display_encoding_overflow() {
        let e: Error = EncodingError::Overflow(1_000_000_000).into();
        assert_eq!(
            e.to_string(),
            "encoding error: value 1000000000 does not fit in packed decimal"
        );
    }

    #[test]
    fn error_display_invalid_digit() {
        let e = EncodingError::InvalidDigit {
            index: 2,
            byte: 0xA1,
        };
        assert_eq!(e.to_string(), "invalid BCD digit at byte 2: 0xA1");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::Transport("gatt".into()).is_retryable());
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::MalformedResponse("x".into()).is_retryable());
        assert!(!Error::NotConnected.is_retryable());
        assert!(!Error::Encoding(EncodingError::Overflow(0)).is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
