//! sharebot - an IRC file sharing bot.
//!
//! Connects to one server, joins one channel, answers `!`-commands, and
//! moves files over DCC with resume support. The wire grammar lives in
//! the `sharebot-proto` crate; this crate is the runtime: session,
//! dispatch, command handling, transfers, and statistics.

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod stats;
pub mod transfer;
