//! Error types for the protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Protocol-level errors.
///
/// The line codec swallows malformed input itself, so the errors a
/// caller sees from decoding are transport failures; the parse variants
/// come from `Message` and `Dcc` and are per-line, not per-connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound line exceeded the maximum allowed length. Inbound
    /// oversized lines are discarded by the codec instead.
    #[error("line too long: {actual} bytes (limit: {limit})")]
    MessageTooLong {
        /// Actual line length.
        actual: usize,
        /// Maximum allowed length.
        limit: usize,
    },

    /// Failed to parse an IRC message.
    #[error("invalid message: {0:?}")]
    InvalidMessage(String),

    /// Failed to parse a DCC sub-message.
    #[error("invalid DCC payload: {0:?}")]
    InvalidDcc(String),
}
