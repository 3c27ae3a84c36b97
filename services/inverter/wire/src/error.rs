//! Wire protocol error types.

use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Caller passed an out-of-range argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Device signalled that no further data will arrive mid-frame
    #[error("End of stream reached after {bytes_transferred} bytes")]
    EndOfStream {
        /// Bytes accumulated before the stream ended
        bytes_transferred: usize,
    },

    /// Frame grew past the configured maximum before a terminator arrived
    #[error("Limit of {limit} bytes reached")]
    BufferOverflow {
        /// Configured maximum buffer size
        limit: usize,
    },

    /// Deadline passed before a terminator arrived
    #[error("{} timeout reached", humantime::format_duration(*.timeout))]
    Timeout {
        /// Requested timeout
        timeout: Duration,
    },

    /// Read cancelled while waiting for more input
    #[error("Read interrupted after {bytes_transferred} bytes")]
    Interrupted {
        /// Bytes accumulated before cancellation
        bytes_transferred: usize,
    },

    /// Frame shorter than digest plus terminator
    #[error("Expected at least {expected} bytes but received {received} bytes")]
    TruncatedData {
        /// Minimum frame length, terminator included
        expected: usize,
        /// Actual frame length, terminator included
        received: usize,
    },

    /// Received digest does not match the recomputed one
    #[error("Digest received {} != {} calculated", hex(.received), hex(.calculated))]
    DigestMismatch {
        /// Digest bytes taken from the frame
        received: Vec<u8>,
        /// Digest computed over the received payload
        calculated: Vec<u8>,
    },

    /// Text encoding name not recognised
    #[error("unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    /// Transport failure
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the caller may reasonably retry the same call, possibly with
    /// adjusted configuration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WireError::BufferOverflow { .. }
                | WireError::Timeout { .. }
                | WireError::Interrupted { .. }
                | WireError::DigestMismatch { .. }
        )
    }
}

/// Format bytes as `[0x01,0x02]`
fn hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "[]".to_string();
    }

    let mut out = String::with_capacity(1 + bytes.len() * 5);
    out.push('[');
    for (idx, b) in bytes.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        let _ = write!(out, "0x{:02X}", b);
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_message() {
        let err = WireError::TruncatedData {
            expected: 5,
            received: 4,
        };
        assert_eq!(
            err.to_string(),
            "Expected at least 5 bytes but received 4 bytes"
        );
    }

    #[test]
    fn test_digest_mismatch_message() {
        let err = WireError::DigestMismatch {
            received: vec![0x09, 0x08, 0x07, 0x06],
            calculated: vec![0x01, 0x02, 0x03, 0x04],
        };
        assert_eq!(
            err.to_string(),
            "Digest received [0x09,0x08,0x07,0x06] != [0x01,0x02,0x03,0x04] calculated"
        );
    }

    #[test]
    fn test_empty_digest_formats_as_brackets() {
        let err = WireError::DigestMismatch {
            received: vec![],
            calculated: vec![0xAB],
        };
        assert_eq!(err.to_string(), "Digest received [] != [0xAB] calculated");
    }

    #[test]
    fn test_overflow_and_timeout_messages() {
        let err = WireError::BufferOverflow { limit: 32 };
        assert_eq!(err.to_string(), "Limit of 32 bytes reached");

        let err = WireError::Timeout {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.to_string(), "1s timeout reached");
    }

    #[test]
    fn test_recoverable() {
        assert!(WireError::Timeout {
            timeout: Duration::from_millis(10)
        }
        .is_recoverable());
        assert!(!WireError::EndOfStream {
            bytes_transferred: 0
        }
        .is_recoverable());
        assert!(!WireError::InvalidArgument("x".into()).is_recoverable());
    }
}
