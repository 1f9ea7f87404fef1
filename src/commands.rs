//! Event routing and the `!`-command set.
//!
//! The router reacts to typed [`Event`]s: bookkeeping for joins and
//! parts, `!`-commands from channel and private messages, and DCC
//! negotiation payloads. Command failures never propagate; each one
//! becomes at most a notice to the sender and a log line.

use crate::config::Config;
use crate::dispatch::Event;
use crate::error::{HandlerError, HandlerResult};
use crate::session::Outbound;
use crate::stats::StatsStore;
use crate::transfer::TransferCoordinator;
use sharebot_proto::{Ctcp, CtcpKind, Dcc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const VERSION_STRING: &str = concat!("sharebot ", env!("CARGO_PKG_VERSION"));

/// Routes events to handlers. Cheap to construct, one per session.
pub struct Router {
    config: Arc<Config>,
    stats: Arc<StatsStore>,
    transfers: Arc<TransferCoordinator>,
    out: Outbound,
    token: CancellationToken,
}

impl Router {
    pub fn new(
        config: Arc<Config>,
        stats: Arc<StatsStore>,
        transfers: Arc<TransferCoordinator>,
        out: Outbound,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            stats,
            transfers,
            out,
            token,
        }
    }

    pub async fn handle(&self, event: Event) {
        match event {
            Event::Welcome => self.on_welcome().await,
            Event::Join { nick } => self.on_join(&nick).await,
            Event::Part { .. } => self.stats.record_part(),
            Event::Quit { .. } => self.stats.record_quit(),
            Event::Privmsg { nick, text, .. } => {
                self.stats.record_message(&nick);
                if text.starts_with('!') {
                    if let Err(e) = self.command(&nick, &text).await {
                        debug!(nick, command = %text, error = %e, "command failed");
                        if let Some(reply) = e.to_reply() {
                            self.out.privmsg(&nick, reply).await;
                        }
                    }
                }
            }
            Event::Ctcp {
                nick,
                target,
                payload,
            } => self.on_ctcp(&nick, &target, &payload).await,
        }
    }

    async fn on_welcome(&self) {
        if let Some(password) = &self.config.server.nickserv_password {
            self.out
                .privmsg("NickServ", format!("IDENTIFY {password}"))
                .await;
        }
        self.out
            .line(format!("JOIN {}", self.config.server.channel))
            .await;
        info!(channel = %self.config.server.channel, "registered, joining");
    }

    async fn on_join(&self, nick: &str) {
        if nick == self.config.server.nick {
            return;
        }
        self.stats.record_join();
        let channel = &self.config.server.channel;
        self.out
            .privmsg(channel, format!("Welcome, {nick}! Type !help for commands."))
            .await;
        if self.config.is_admin(nick) {
            self.out.line(format!("MODE {channel} +o {nick}")).await;
        }
    }

    async fn on_ctcp(&self, nick: &str, target: &str, payload: &str) {
        let Some(ctcp) = Ctcp::parse(payload) else {
            debug!(nick, "unparseable CTCP payload");
            return;
        };

        match ctcp.kind {
            CtcpKind::Dcc => {
                let Some(args) = ctcp.params else {
                    debug!(nick, "DCC with no arguments");
                    return;
                };
                self.on_dcc(nick, target, args).await;
            }
            CtcpKind::Version => {
                self.out
                    .line(format!(
                        "NOTICE {nick} :{}",
                        Ctcp::version_reply(VERSION_STRING)
                    ))
                    .await;
            }
            kind => debug!(nick, %kind, "ignoring CTCP"),
        }
    }

    async fn on_dcc(&self, nick: &str, target: &str, args: &str) {
        let dcc = match Dcc::parse(args) {
            Ok(dcc) => dcc,
            Err(e) => {
                debug!(nick, error = %e, "malformed DCC payload");
                return;
            }
        };

        match dcc {
            Dcc::Send {
                filename,
                addr,
                port,
                size,
            } => {
                // Inbound uploads only via direct message to the bot
                if target != self.config.server.nick {
                    debug!(nick, target, "DCC SEND not addressed to us");
                    return;
                }
                if !self.config.is_file_allowed(nick) {
                    self.out
                        .privmsg(nick, "You are not authorized to send files.")
                        .await;
                    return;
                }
                if let Err(e) = self
                    .transfers
                    .receive(nick, &filename, addr, port, size)
                    .await
                {
                    warn!(nick, filename, error = %e, "rejecting upload");
                }
            }
            Dcc::Resume {
                filename,
                port,
                offset,
            } => {
                // Bad RESUMEs are ignored without a reply
                if let Err(e) = self
                    .transfers
                    .handle_resume(nick, &filename, port, offset)
                    .await
                {
                    debug!(nick, filename, port, offset, error = %e, "resume ignored");
                }
            }
            Dcc::Accept { filename, port, .. } => {
                // We never send RESUME, so an inbound ACCEPT is noise
                debug!(nick, filename, port, "unexpected DCC ACCEPT");
            }
        }
    }

    /// Dispatch a `!`-command from `nick`. The admin tier is gated up
    /// front so denied commands never reach their handler.
    async fn command(&self, nick: &str, text: &str) -> HandlerResult {
        let mut tokens = text[1..].split_whitespace();
        let cmd = tokens.next().unwrap_or("").to_ascii_lowercase();

        if matches!(cmd.as_str(), "stats" | "uptime" | "kick" | "shutdown")
            && !self.config.is_admin(nick)
        {
            return Err(HandlerError::NotAuthorized);
        }

        let channel = &self.config.server.channel;
        match cmd.as_str() {
            "help" => {
                self.out
                    .privmsg(
                        channel,
                        "Commands: !help !files !get <filename> !stats !uptime !kick <nick> !shutdown",
                    )
                    .await;
            }
            "files" => {
                let listing = self.list_files().await?;
                self.out.privmsg(channel, listing).await;
            }
            "get" => {
                if !self.config.is_file_allowed(nick) {
                    return Err(HandlerError::NotAuthorized);
                }
                let filename = tokens.collect::<Vec<_>>().join(" ");
                if filename.is_empty() {
                    return Err(HandlerError::Usage("!get <filename>"));
                }
                match self.transfers.offer_send(nick, &filename).await {
                    Ok(()) => {}
                    Err(crate::error::TransferError::FileNotFound(name)) => {
                        return Err(HandlerError::FileNotFound(name));
                    }
                    Err(e) => {
                        warn!(nick, filename, error = %e, "failed to offer file");
                        self.out
                            .privmsg(nick, "Transfer could not be started, try again later.")
                            .await;
                    }
                }
            }
            "stats" => {
                self.out.privmsg(channel, self.stats.summary()).await;
            }
            "uptime" => {
                self.out
                    .privmsg(channel, format!("Uptime: {}", self.stats.uptime()))
                    .await;
            }
            "kick" => {
                let Some(target) = tokens.next() else {
                    return Err(HandlerError::Usage("!kick <nick>"));
                };
                self.out
                    .line(format!("KICK {channel} {target} :Kicked by admin"))
                    .await;
                info!(nick, target, "kick issued");
            }
            "shutdown" => {
                info!(nick, "shutdown requested");
                self.out.privmsg(channel, "Shutting down.").await;
                self.token.cancel();
            }
            _ => return Err(HandlerError::UnknownCommand(cmd)),
        }
        Ok(())
    }

    async fn list_files(&self) -> Result<String, HandlerError> {
        let mut entries = tokio::fs::read_dir(&self.config.paths.shared_dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        if names.is_empty() {
            Ok("No files available.".to_owned())
        } else {
            Ok(format!("Available files: {}", names.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, DccConfig, PathsConfig, ServerConfig, StatsConfig};
    use tokio::sync::mpsc;

    fn test_config(dir: &std::path::Path) -> Arc<Config> {
        Arc::new(Config {
            server: ServerConfig {
                host: "irc.example.net".into(),
                port: 6667,
                channel: "#test".into(),
                nick: "sharebot".into(),
                nickserv_password: None,
            },
            auth: AuthConfig {
                admins: vec!["alice".into()],
                file_allowed: vec!["alice".into(), "bob".into()],
            },
            dcc: DccConfig::default(),
            paths: PathsConfig {
                shared_dir: dir.join("shared"),
                upload_dir: dir.join("uploads"),
                stats_file: dir.join("stats.json"),
                log_file: None,
            },
            stats: StatsConfig::default(),
        })
    }

    fn router(dir: &std::path::Path) -> (Router, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let config = test_config(dir);
        let out = Outbound::new(tx);
        let token = CancellationToken::new();
        let transfers = Arc::new(TransferCoordinator::new(
            Arc::clone(&config),
            out.clone(),
            token.clone(),
        ));
        let router = Router::new(
            config,
            Arc::new(StatsStore::new()),
            transfers,
            out,
            token,
        );
        (router, rx)
    }

    fn privmsg(nick: &str, text: &str) -> Event {
        Event::Privmsg {
            nick: nick.into(),
            target: "#test".into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn test_admin_command_denied_for_non_admin() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("mallory", "!stats")).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(
            reply,
            "PRIVMSG mallory :You are not authorized to use this command."
        );
        // No summary leaked to the channel
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_admin_stats_goes_to_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("alice", "!stats")).await;

        let reply = rx.recv().await.unwrap();
        assert!(reply.starts_with("PRIVMSG #test :Stats: "));
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("bob", "!frobnicate")).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, "PRIVMSG bob :Command not recognized.");
    }

    #[tokio::test]
    async fn test_get_requires_file_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("mallory", "!get file.bin")).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(
            reply,
            "PRIVMSG mallory :You are not authorized to use this command."
        );
    }

    #[tokio::test]
    async fn test_get_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shared")).unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("bob", "!get absent.bin")).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, "PRIVMSG bob :File not found: absent.bin");
    }

    #[tokio::test]
    async fn test_get_without_argument() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("bob", "!get")).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, "PRIVMSG bob :Usage: !get <filename>");
    }

    #[tokio::test]
    async fn test_files_listing_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::write(shared.join("zeta.txt"), b"z").unwrap();
        std::fs::write(shared.join("alpha.txt"), b"a").unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("bob", "!files")).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, "PRIVMSG #test :Available files: alpha.txt, zeta.txt");
    }

    #[tokio::test]
    async fn test_help_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("mallory", "!help")).await;

        let reply = rx.recv().await.unwrap();
        assert!(reply.starts_with("PRIVMSG #test :Commands: "));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(privmsg("alice", "!shutdown")).await;

        assert!(router.token.is_cancelled());
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, "PRIVMSG #test :Shutting down.");
    }

    #[tokio::test]
    async fn test_join_greets_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router.handle(Event::Join { nick: "bob".into() }).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(
            reply,
            "PRIVMSG #test :Welcome, bob! Type !help for commands."
        );
        assert_eq!(router.stats.snapshot().joins, 1);
    }

    #[tokio::test]
    async fn test_own_join_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router
            .handle(Event::Join {
                nick: "sharebot".into(),
            })
            .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(router.stats.snapshot().joins, 0);
    }

    #[tokio::test]
    async fn test_admin_join_gets_ops() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router
            .handle(Event::Join {
                nick: "alice".into(),
            })
            .await;

        let _greeting = rx.recv().await.unwrap();
        let mode = rx.recv().await.unwrap();
        assert_eq!(mode, "MODE #test +o alice");
    }

    #[tokio::test]
    async fn test_upload_denied_for_unlisted_nick() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router
            .handle(Event::Ctcp {
                nick: "mallory".into(),
                target: "sharebot".into(),
                payload: "\x01DCC SEND evil.bin 2130706433 50001 100\x01".into(),
            })
            .await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(
            reply,
            "PRIVMSG mallory :You are not authorized to send files."
        );
        assert!(router.transfers.is_empty());
    }

    #[tokio::test]
    async fn test_version_query_answered() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router
            .handle(Event::Ctcp {
                nick: "carol".into(),
                target: "sharebot".into(),
                payload: "\x01VERSION\x01".into(),
            })
            .await;

        let reply = rx.recv().await.unwrap();
        assert!(reply.starts_with("NOTICE carol :\x01VERSION sharebot "));
    }

    #[tokio::test]
    async fn test_bad_resume_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = router(dir.path());

        router
            .handle(Event::Ctcp {
                nick: "carol".into(),
                target: "sharebot".into(),
                payload: "\x01DCC RESUME nothing.bin 50001 500\x01".into(),
            })
            .await;

        assert!(rx.try_recv().is_err());
    }
}
