//! Session - owns the single connection to the chat server.
//!
//! One task reads the connection continuously; a writer task owns the
//! sink and drains two queues, a priority queue for PONG and a normal
//! queue for everything else, so a keepalive answer is always the very
//! next outbound line ahead of any backlog.

use crate::commands::Router;
use crate::config::Config;
use crate::error::SessionError;
use futures_util::{SinkExt, StreamExt};
use sharebot_proto::{LineCodec, ProtocolError};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Cloneable handle for queueing outbound lines (without CRLF).
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<String>,
}

impl Outbound {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Queue a raw protocol line.
    pub async fn line(&self, line: impl Into<String>) {
        if self.tx.send(line.into()).await.is_err() {
            debug!("outbound queue closed, dropping line");
        }
    }

    /// Queue a PRIVMSG to `target`.
    pub async fn privmsg(&self, target: &str, text: impl AsRef<str>) {
        self.line(format!("PRIVMSG {} :{}", target, text.as_ref()))
            .await;
    }
}

/// The connection to the chat server.
pub struct Session<S> {
    reader: FramedRead<ReadHalf<S>, LineCodec>,
    pong_tx: mpsc::Sender<String>,
    out_tx: mpsc::Sender<String>,
    writer: JoinHandle<()>,
    config: Arc<Config>,
    token: CancellationToken,
}

impl Session<TcpStream> {
    /// Establish the TCP session. Connection failure is fatal; an
    /// external supervisor restarts the process.
    pub async fn connect(config: Arc<Config>, token: CancellationToken) -> std::io::Result<Self> {
        let addr = (config.server.host.as_str(), config.server.port);
        info!(host = %config.server.host, port = config.server.port, "connecting");
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream, config, token))
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an established stream. Spawns the writer task.
    pub fn new(stream: S, config: Arc<Config>, token: CancellationToken) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FramedRead::new(read_half, LineCodec::new());
        let sink = FramedWrite::new(write_half, LineCodec::new());

        let (pong_tx, pong_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(256);
        let writer = tokio::spawn(write_loop(sink, pong_rx, out_rx));

        Self {
            reader,
            pong_tx,
            out_tx,
            writer,
            config,
            token,
        }
    }

    /// Handle for queueing outbound lines from other components.
    pub fn outbound(&self) -> Outbound {
        Outbound::new(self.out_tx.clone())
    }

    /// Run the read loop until shutdown or connection failure.
    pub async fn run(mut self, router: Router) -> Result<(), SessionError> {
        self.register().await;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    info!("shutdown requested, closing session");
                    let _ = self.out_tx.send("QUIT :shutting down".to_owned()).await;
                    break;
                }
                item = self.reader.next() => match item {
                    None => return Err(SessionError::Closed),
                    // The codec swallows malformed lines itself, so a
                    // decode error here is a real transport failure
                    Some(Err(e)) => return Err(SessionError::Protocol(e)),
                    Some(Ok(line)) => {
                        let line = line.trim_end_matches(['\r', '\n']);
                        self.handle_line(line, &router).await;
                    }
                },
            }
        }

        // Dropping the queue senders lets the writer drain and exit. The
        // router holds an Outbound clone, so it goes first. Transfer
        // tasks may hold clones too; don't wait out their timeouts.
        drop(router);
        let Self { writer, .. } = self;
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), writer).await;
        Ok(())
    }

    async fn register(&self) {
        let nick = &self.config.server.nick;
        let _ = self.out_tx.send(format!("NICK {nick}")).await;
        let _ = self
            .out_tx
            .send(format!("USER {nick} 0 * :sharebot file sharing bot"))
            .await;
    }

    async fn handle_line(&self, line: &str, router: &Router) {
        if line.is_empty() {
            return;
        }
        debug!(line = %line, "<<");

        // Keepalive: answered on the priority queue, ahead of backlog
        if let Some(token) = line.strip_prefix("PING ") {
            let _ = self.pong_tx.send(format!("PONG {}", token.trim())).await;
            return;
        }

        match crate::dispatch::Event::from_line(line) {
            Some(event) => router.handle(event).await,
            None => trace!(line = %line, "dropped unhandled line"),
        }
    }
}

/// Drain the outbound queues into the sink. The `biased` select polls
/// the pong queue first, so keepalive answers jump any backlog.
async fn write_loop<W>(
    mut sink: FramedWrite<W, LineCodec>,
    mut pong_rx: mpsc::Receiver<String>,
    mut out_rx: mpsc::Receiver<String>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            biased;
            Some(line) = pong_rx.recv() => line,
            Some(line) = out_rx.recv() => line,
            else => break,
        };
        debug!(line = %line, ">>");
        match sink.send(format!("{line}\r\n")).await {
            Ok(()) => {}
            // Over-length lines are dropped; the connection is fine
            Err(e @ ProtocolError::MessageTooLong { .. }) => {
                warn!(error = %e, "dropping oversized outbound line");
            }
            Err(e) => {
                warn!(error = %e, "outbound write failed");
                break;
            }
        }
    }
}
