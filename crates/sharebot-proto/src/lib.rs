//! Protocol library for sharebot.
//!
//! Covers the wire-level pieces of the bot: a CRLF line codec for tokio,
//! the classic `[:prefix] COMMAND param... [:trailing]` message grammar,
//! CTCP framing (`\x01`-delimited payloads inside PRIVMSG), and the DCC
//! SEND/RESUME/ACCEPT sub-message grammar used for out-of-band file
//! transfer negotiation.
//!
//! This crate is pure parsing and encoding; it carries no bot policy.

pub mod ctcp;
pub mod dcc;
pub mod error;
pub mod line;
pub mod message;

pub use ctcp::{Ctcp, CtcpKind};
pub use dcc::Dcc;
pub use error::{ProtocolError, Result};
pub use line::LineCodec;
pub use message::{Message, Prefix};
