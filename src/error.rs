//! Error taxonomy for the bot.
//!
//! Per-line and per-command failures are isolated: they produce at most a
//! notice to the offending sender and a log line. Only connection-level
//! failure ([`SessionError`]) terminates the process, leaving restart to
//! an external supervisor.

use thiserror::Error;

/// Fatal session errors. No internal reconnect logic exists; any of
/// these ends the process.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection closed by server")]
    Closed,

    #[error("connection error: {0}")]
    Protocol(#[from] sharebot_proto::ProtocolError),
}

/// Errors raised while handling a chat command.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("sender is not authorized")]
    NotAuthorized,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    /// The user-visible reply for this error.
    ///
    /// Returns `None` for errors that don't warrant a reply to the
    /// sender (internal I/O failures are only logged).
    pub fn to_reply(&self) -> Option<String> {
        match self {
            Self::NotAuthorized => Some("You are not authorized to use this command.".into()),
            Self::FileNotFound(name) => Some(format!("File not found: {name}")),
            Self::UnknownCommand(_) => Some("Command not recognized.".into()),
            Self::Usage(usage) => Some(format!("Usage: {usage}")),
            Self::Io(_) => None,
        }
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Errors from the DCC transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// RESUME referenced a (peer, filename, port) triple with no record.
    /// Ignored silently at the protocol level: log only, no reply.
    #[error("no transfer registered for {peer}/{filename}:{port}")]
    NotFound {
        peer: String,
        filename: String,
        port: u16,
    },

    /// RESUME offset outside `0 <= offset < size`. Ignored silently.
    #[error("resume offset {offset} out of range for file of {size} bytes")]
    InvalidOffset { offset: u64, size: u64 },

    /// The requested file does not exist in the shared directory.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The announced filename reduces to nothing usable on disk.
    #[error("unusable filename: {0:?}")]
    BadFilename(String),

    /// Every port in the configured DCC range is taken.
    #[error("no free port in configured DCC range")]
    PortRangeExhausted,

    /// Mid-stream read/write failure. The transfer is retained as
    /// Interrupted; resumption is an explicit RESUME/ACCEPT handshake,
    /// never an automatic retry.
    #[error("transfer io error: {0}")]
    Io(#[from] std::io::Error),
}
