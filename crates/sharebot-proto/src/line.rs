//! Line-based codec for tokio.
//!
//! Reads newline-terminated lines out of the raw byte stream, buffering
//! partial reads. Decoding is tolerant: invalid UTF-8 is decoded lossily
//! (legacy-encoded chat survives as replacement characters) and lines
//! over the length cap are discarded with a debug log, so one bad line
//! never poisons the stream. Encoding enforces the cap.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::{ProtocolError, Result};

/// Default maximum line length, per RFC 1459.
const DEFAULT_MAX_LEN: usize = 512;

/// Line-based codec that handles newline-terminated messages.
pub struct LineCodec {
    /// Index of next byte to check for newline.
    next_index: usize,
    /// Maximum line length.
    max_len: usize,
    /// Discarding the remainder of an oversized line.
    discarding: bool,
}

impl LineCodec {
    /// Create a new codec with the standard 512-byte line limit.
    pub fn new() -> Self {
        Self {
            next_index: 0,
            max_len: DEFAULT_MAX_LEN,
            discarding: false,
        }
    }

    /// Create a new codec with a custom max line length.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
            discarding: false,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            // Finish skipping an oversized line before parsing anything new
            if self.discarding {
                match src.iter().position(|b| *b == b'\n') {
                    Some(offset) => {
                        let _ = src.split_to(offset + 1);
                        self.discarding = false;
                        self.next_index = 0;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            // Look for a newline starting from where we left off
            if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
                let line = src.split_to(self.next_index + offset + 1);
                self.next_index = 0;

                if line.len() > self.max_len {
                    debug!(
                        len = line.len(),
                        limit = self.max_len,
                        "dropping oversized line"
                    );
                    continue;
                }

                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            // No complete line yet - remember where we stopped
            self.next_index = src.len();

            // A partial line over the limit will never fit; drop what we
            // have and skip the rest up to its newline
            if src.len() > self.max_len {
                debug!(
                    len = src.len(),
                    limit = self.max_len,
                    "discarding oversized partial line"
                );
                src.clear();
                self.next_index = 0;
                self.discarding = true;
            }

            return Ok(None);
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: String, dst: &mut BytesMut) -> Result<()> {
        if msg.len() > self.max_len {
            return Err(ProtocolError::MessageTooLong {
                actual: msg.len(),
                limit: self.max_len,
            });
        }
        dst.extend(msg.into_bytes());
        Ok(())
    }
}
