//! IRC message grammar.
//!
//! Parses the classic `[:prefix] COMMAND param... [:trailing]` line shape.
//! The trailing parameter (everything after the final lone colon) may
//! contain spaces and embedded colons and is kept verbatim as the last
//! entry of `params`.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// IRC message prefix - identifies the origin of a message.
///
/// A prefix is either a server name (contains a dot, no `!`/`@`) or a
/// user's `nick!user@host` identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Prefix {
    /// Server name (e.g., "irc.libera.chat").
    ServerName(String),
    /// User prefix parsed from `nick!user@host`.
    User {
        nick: String,
        user: String,
        host: String,
    },
}

impl Prefix {
    /// Parse a prefix string. Lenient: components are not validated.
    pub fn parse(s: &str) -> Self {
        if let Some(at) = s.find('@') {
            let before = &s[..at];
            let host = &s[at + 1..];
            let (nick, user) = match before.find('!') {
                Some(bang) => (&before[..bang], &before[bang + 1..]),
                None => (before, ""),
            };
            Prefix::User {
                nick: nick.to_owned(),
                user: user.to_owned(),
                host: host.to_owned(),
            }
        } else if let Some(bang) = s.find('!') {
            Prefix::User {
                nick: s[..bang].to_owned(),
                user: s[bang + 1..].to_owned(),
                host: String::new(),
            }
        } else if s.contains('.') {
            Prefix::ServerName(s.to_owned())
        } else {
            Prefix::User {
                nick: s.to_owned(),
                user: String::new(),
                host: String::new(),
            }
        }
    }

    /// Get the nickname if this is a user prefix.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::User { nick, .. } if !nick.is_empty() => Some(nick),
            _ => None,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::ServerName(name) => f.write_str(name),
            Prefix::User { nick, user, host } => {
                f.write_str(nick)?;
                if !user.is_empty() {
                    write!(f, "!{user}")?;
                }
                if !host.is_empty() {
                    write!(f, "@{host}")?;
                }
                Ok(())
            }
        }
    }
}

/// A parsed IRC message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Optional origin prefix.
    pub prefix: Option<Prefix>,
    /// Command token, normalized to uppercase.
    pub command: String,
    /// Parameters; a trailing parameter is the last entry, verbatim.
    pub params: Vec<String>,
}

impl Message {
    /// Create a message without a prefix.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.into().to_uppercase(),
            params,
        }
    }

    /// The nickname of the message origin, if any.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nick)
    }

    /// The trailing (last) parameter, if any.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtocolError::InvalidMessage(s.to_owned()));
        }

        let mut rest = line;

        let prefix = if let Some(r) = rest.strip_prefix(':') {
            let (p, r) = r
                .split_once(' ')
                .ok_or_else(|| ProtocolError::InvalidMessage(s.to_owned()))?;
            rest = r.trim_start_matches(' ');
            Some(Prefix::parse(p))
        } else {
            None
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ProtocolError::InvalidMessage(s.to_owned()));
        }

        let mut params = Vec::new();
        loop {
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                // Trailing parameter: everything after the colon, verbatim
                params.push(trailing.to_owned());
                break;
            }
            match rest.split_once(' ') {
                Some((p, r)) => {
                    if !p.is_empty() {
                        params.push(p.to_owned());
                    }
                    rest = r;
                }
                None => {
                    params.push(rest.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_uppercase(),
            params,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon =
                i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}
