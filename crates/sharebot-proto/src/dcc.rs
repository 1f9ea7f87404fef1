//! DCC sub-message grammar.
//!
//! DCC negotiation rides inside CTCP payloads of the form
//! `DCC <SUBCOMMAND> <args...>`. Three sub-messages matter for file
//! transfer:
//!
//! - `DCC SEND <file> <ip32> <port> <size>` - offer a file; the sender
//!   listens on `port` and `ip32` is the IPv4 address as a decimal
//!   32-bit big-endian integer.
//! - `DCC RESUME <file> <port> <offset>` - ask the sender to restart an
//!   interrupted transfer from `offset`.
//! - `DCC ACCEPT <file> <port> <offset>` - sender's acknowledgement of a
//!   RESUME.
//!
//! Numeric fields are parsed from the *end* of the token list, so
//! filenames containing spaces survive the round trip.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::ProtocolError;

/// A parsed DCC sub-message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dcc {
    /// A file offer. The offering side listens on `addr:port`.
    Send {
        filename: String,
        addr: Ipv4Addr,
        port: u16,
        size: u64,
    },
    /// Request to resume an interrupted transfer from `offset`.
    Resume {
        filename: String,
        port: u16,
        offset: u64,
    },
    /// Acknowledgement of a RESUME; the peer may reconnect.
    Accept {
        filename: String,
        port: u16,
        offset: u64,
    },
}

impl Dcc {
    /// Parse the arguments of a `DCC` CTCP payload (everything after the
    /// `DCC` token, starting with the sub-command).
    pub fn parse(args: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidDcc(args.to_owned());
        let tokens: Vec<&str> = args.split_whitespace().collect();
        let sub = tokens.first().ok_or_else(invalid)?;

        match sub.to_ascii_uppercase().as_str() {
            "SEND" => {
                if tokens.len() < 5 {
                    return Err(invalid());
                }
                let n = tokens.len();
                let size: u64 = tokens[n - 1].parse().map_err(|_| invalid())?;
                let port: u16 = tokens[n - 2].parse().map_err(|_| invalid())?;
                let ip: u32 = tokens[n - 3].parse().map_err(|_| invalid())?;
                Ok(Dcc::Send {
                    filename: tokens[1..n - 3].join(" "),
                    addr: Ipv4Addr::from(ip),
                    port,
                    size,
                })
            }
            "RESUME" | "ACCEPT" => {
                if tokens.len() < 4 {
                    return Err(invalid());
                }
                let n = tokens.len();
                let offset: u64 = tokens[n - 1].parse().map_err(|_| invalid())?;
                let port: u16 = tokens[n - 2].parse().map_err(|_| invalid())?;
                let filename = tokens[1..n - 2].join(" ");
                if sub.eq_ignore_ascii_case("RESUME") {
                    Ok(Dcc::Resume {
                        filename,
                        port,
                        offset,
                    })
                } else {
                    Ok(Dcc::Accept {
                        filename,
                        port,
                        offset,
                    })
                }
            }
            _ => Err(invalid()),
        }
    }

    /// Render as a full CTCP message body, delimiters included.
    pub fn to_ctcp(&self) -> String {
        format!("\x01DCC {self}\x01")
    }
}

impl fmt::Display for Dcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dcc::Send {
                filename,
                addr,
                port,
                size,
            } => write!(f, "SEND {} {} {} {}", filename, u32::from(*addr), port, size),
            Dcc::Resume {
                filename,
                port,
                offset,
            } => write!(f, "RESUME {filename} {port} {offset}"),
            Dcc::Accept {
                filename,
                port,
                offset,
            } => write!(f, "ACCEPT {filename} {port} {offset}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let dcc = Dcc::parse("SEND file.bin 2130706433 50001 2500").unwrap();
        assert_eq!(
            dcc,
            Dcc::Send {
                filename: "file.bin".into(),
                addr: Ipv4Addr::new(127, 0, 0, 1),
                port: 50001,
                size: 2500,
            }
        );
    }

    #[test]
    fn test_parse_resume() {
        let dcc = Dcc::parse("RESUME file.bin 50001 1024").unwrap();
        assert_eq!(
            dcc,
            Dcc::Resume {
                filename: "file.bin".into(),
                port: 50001,
                offset: 1024,
            }
        );
    }

    #[test]
    fn test_parse_accept() {
        let dcc = Dcc::parse("ACCEPT file.bin 50001 1024").unwrap();
        assert!(matches!(dcc, Dcc::Accept { offset: 1024, .. }));
    }

    #[test]
    fn test_filename_with_spaces() {
        let dcc = Dcc::parse("RESUME my summer photos.zip 50001 4096").unwrap();
        assert_eq!(
            dcc,
            Dcc::Resume {
                filename: "my summer photos.zip".into(),
                port: 50001,
                offset: 4096,
            }
        );

        let dcc = Dcc::parse("SEND my summer photos.zip 2130706433 50001 9000").unwrap();
        match dcc {
            Dcc::Send { filename, size, .. } => {
                assert_eq!(filename, "my summer photos.zip");
                assert_eq!(size, 9000);
            }
            other => panic!("expected SEND, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bad_numeric() {
        assert!(Dcc::parse("RESUME file.bin fifty 1024").is_err());
        assert!(Dcc::parse("SEND file.bin 1 99999999 10").is_err()); // port overflow
    }

    #[test]
    fn test_parse_missing_fields() {
        assert!(Dcc::parse("").is_err());
        assert!(Dcc::parse("SEND file.bin 1 2").is_err());
        assert!(Dcc::parse("RESUME file.bin 50001").is_err());
        assert!(Dcc::parse("CHAT chat 2130706433 50001").is_err());
    }

    #[test]
    fn test_to_ctcp_roundtrip() {
        let dcc = Dcc::Send {
            filename: "file.bin".into(),
            addr: Ipv4Addr::new(10, 0, 0, 7),
            port: 50050,
            size: 123456,
        };
        let wire = dcc.to_ctcp();
        assert!(wire.starts_with('\x01') && wire.ends_with('\x01'));
        let inner = wire.trim_matches('\x01').strip_prefix("DCC ").unwrap();
        assert_eq!(Dcc::parse(inner).unwrap(), dcc);
    }

    #[test]
    fn test_ip_encoding() {
        // 10.0.0.7 == 0x0A000007
        let dcc = Dcc::Send {
            filename: "f".into(),
            addr: Ipv4Addr::new(10, 0, 0, 7),
            port: 1,
            size: 1,
        };
        assert_eq!(dcc.to_string(), format!("SEND f {} 1 1", 0x0A000007u32));
    }
}
