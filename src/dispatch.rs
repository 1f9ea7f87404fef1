//! Line dispatch: raw protocol lines to typed events.
//!
//! Parsing is best-effort, not a hard contract: anything malformed or
//! uninteresting yields `None` and the line is dropped.

use sharebot_proto::{Ctcp, Message};

/// A typed connection event the bot reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// RPL_WELCOME (001) - registration finished.
    Welcome,
    Join {
        nick: String,
    },
    Part {
        nick: String,
    },
    Quit {
        nick: String,
    },
    Privmsg {
        nick: String,
        target: String,
        text: String,
    },
    /// A PRIVMSG whose body is a CTCP payload (delimiters intact).
    Ctcp {
        nick: String,
        target: String,
        payload: String,
    },
}

impl Event {
    /// Parse a raw line (CRLF already stripped) into an event.
    ///
    /// PING lines are not events; the session answers them before
    /// dispatch.
    pub fn from_line(line: &str) -> Option<Event> {
        let msg: Message = line.parse().ok()?;

        match msg.command.as_str() {
            "001" => Some(Event::Welcome),
            "JOIN" => Some(Event::Join {
                nick: msg.source_nick()?.to_owned(),
            }),
            "PART" => Some(Event::Part {
                nick: msg.source_nick()?.to_owned(),
            }),
            "QUIT" => Some(Event::Quit {
                nick: msg.source_nick()?.to_owned(),
            }),
            "PRIVMSG" => {
                let nick = msg.source_nick()?.to_owned();
                let target = msg.params.first()?.clone();
                let text = msg.params.get(1)?.clone();
                if Ctcp::is_ctcp(&text) {
                    Some(Event::Ctcp {
                        nick,
                        target,
                        payload: text,
                    })
                } else {
                    Some(Event::Privmsg { nick, target, text })
                }
            }
            _ => None,
        }
    }
}
