//! DCC transfer engine.
//!
//! Owns the table of in-flight and resumable transfers and drives their
//! sockets. Every transfer runs on its own task so file streaming never
//! blocks keepalive handling or command dispatch. The table lock is held
//! only across in-memory mutation, never across socket I/O.
//!
//! State machine: Offered -> Connected -> Active -> Completed or
//! Interrupted. Completed removes the record; Interrupted retains it so
//! a later RESUME/ACCEPT handshake on the same (peer, filename, port)
//! key can pick up at the last confirmed byte.

use crate::config::Config;
use crate::error::TransferError;
use crate::session::Outbound;
use parking_lot::Mutex;
use rand::Rng;
use sharebot_proto::Dcc;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, SeekFrom};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Composite identity of a transfer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub peer: String,
    pub filename: String,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Offered,
    Connected,
    Active,
    Completed,
    Interrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// A registered transfer.
#[derive(Clone, Debug)]
pub struct Transfer {
    /// Local file path (source for sends, destination for receives).
    pub path: PathBuf,
    /// Total file size in bytes.
    pub size: u64,
    /// Last confirmed byte position.
    pub offset: u64,
    pub direction: Direction,
    pub state: TransferState,
}

/// The DCC engine. One per process.
pub struct TransferCoordinator {
    config: Arc<Config>,
    out: Outbound,
    token: CancellationToken,
    table: Mutex<HashMap<TransferKey, Transfer>>,
}

impl TransferCoordinator {
    pub fn new(config: Arc<Config>, out: Outbound, token: CancellationToken) -> Self {
        Self {
            config,
            out,
            token,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// A copy of the record for `key`, if registered.
    pub fn lookup(&self, key: &TransferKey) -> Option<Transfer> {
        self.table.lock().get(key).cloned()
    }

    /// Number of registered transfers.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Offer `filename` from the shared directory to `peer`.
    ///
    /// Binds a listener in the configured port range, announces the
    /// offer over chat, registers the transfer, and spawns the transfer
    /// task. The announced port is always live because the bind happens
    /// before the announce.
    pub async fn offer_send(
        self: &Arc<Self>,
        peer: &str,
        filename: &str,
    ) -> Result<(), TransferError> {
        if filename.contains('/') || filename.contains("..") {
            return Err(TransferError::FileNotFound(filename.to_owned()));
        }
        let path = self.config.paths.shared_dir.join(filename);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| TransferError::FileNotFound(filename.to_owned()))?;
        if !meta.is_file() {
            return Err(TransferError::FileNotFound(filename.to_owned()));
        }
        let size = meta.len();

        let (listener, port) = self.bind_in_range().await?;
        let key = TransferKey {
            peer: peer.to_owned(),
            filename: filename.to_owned(),
            port,
        };

        self.table.lock().insert(
            key.clone(),
            Transfer {
                path,
                size,
                offset: 0,
                direction: Direction::Send,
                state: TransferState::Offered,
            },
        );

        let addr = self.config.dcc.public_ip.unwrap_or(Ipv4Addr::LOCALHOST);
        let offer = Dcc::Send {
            filename: filename.to_owned(),
            addr,
            port,
            size,
        };
        self.out.privmsg(peer, offer.to_ctcp()).await;
        info!(peer, filename, port, size, "DCC SEND offered");

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_send(key, listener, 0).await });
        Ok(())
    }

    /// Handle a `DCC RESUME` request from `peer`.
    ///
    /// Unknown keys, entries that are not interrupted sends, and
    /// out-of-range offsets are errors to the caller but silent on the
    /// wire: no reply, no mutation.
    pub async fn handle_resume(
        self: &Arc<Self>,
        peer: &str,
        filename: &str,
        port: u16,
        offset: u64,
    ) -> Result<(), TransferError> {
        let key = TransferKey {
            peer: peer.to_owned(),
            filename: filename.to_owned(),
            port,
        };

        {
            let table = self.table.lock();
            let record = table.get(&key).ok_or_else(|| TransferError::NotFound {
                peer: peer.to_owned(),
                filename: filename.to_owned(),
                port,
            })?;
            // Only an interrupted send is resumable. A RESUME against an
            // Offered or Active entry would race the task already
            // driving it (and the Offered listener still owns the port).
            if record.direction != Direction::Send
                || record.state != TransferState::Interrupted
            {
                return Err(TransferError::NotFound {
                    peer: peer.to_owned(),
                    filename: filename.to_owned(),
                    port,
                });
            }
            if offset >= record.size {
                return Err(TransferError::InvalidOffset {
                    offset,
                    size: record.size,
                });
            }
        }

        // The peer reconnects to the same port it was given in the offer.
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;

        {
            let mut table = self.table.lock();
            if let Some(record) = table.get_mut(&key) {
                record.offset = offset;
                record.state = TransferState::Offered;
            }
        }

        let accept = Dcc::Accept {
            filename: filename.to_owned(),
            port,
            offset,
        };
        self.out.privmsg(peer, accept.to_ctcp()).await;
        info!(peer, filename, port, offset, "DCC ACCEPT sent, resuming");

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_send(key, listener, offset).await });
        Ok(())
    }

    /// Accept an inbound upload announced via `DCC SEND`.
    ///
    /// The caller has already checked authorization. If a partial
    /// destination file exists, the transfer appends from its current
    /// length; the peer is expected to have sent RESUME first.
    pub async fn receive(
        self: &Arc<Self>,
        peer: &str,
        filename: &str,
        addr: Ipv4Addr,
        port: u16,
        size: u64,
    ) -> Result<(), TransferError> {
        let name = filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            .ok_or_else(|| TransferError::BadFilename(filename.to_owned()))?;
        let dest = self.config.paths.upload_dir.join(name);

        let resume_offset = tokio::fs::metadata(&dest).await.map(|m| m.len()).unwrap_or(0);
        // Nothing left to receive: the partial already covers the
        // announced size, so connecting would only produce a bogus
        // completion reply
        if size > 0 && resume_offset >= size {
            return Err(TransferError::InvalidOffset {
                offset: resume_offset,
                size,
            });
        }
        let key = TransferKey {
            peer: peer.to_owned(),
            filename: filename.to_owned(),
            port,
        };

        self.table.lock().insert(
            key.clone(),
            Transfer {
                path: dest,
                size,
                offset: resume_offset,
                direction: Direction::Receive,
                state: TransferState::Offered,
            },
        );
        info!(peer, filename, %addr, port, size, resume_offset, "accepting DCC upload");

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_receive(key, addr).await });
        Ok(())
    }

    /// Bind a listener on a free port in the configured range, scanning
    /// the whole range once from a random starting point.
    async fn bind_in_range(&self) -> Result<(TcpListener, u16), TransferError> {
        let lo = self.config.dcc.port_min;
        let hi = self.config.dcc.port_max;
        let span = u32::from(hi - lo) + 1;
        let start = rand::thread_rng().gen_range(0..span);

        for i in 0..span {
            let port = lo + ((start + i) % span) as u16;
            match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(listener) => return Ok((listener, port)),
                Err(_) => continue,
            }
        }
        Err(TransferError::PortRangeExhausted)
    }

    /// Transfer task for the send path: wait for the peer, stream the
    /// file from `offset`.
    async fn run_send(self: Arc<Self>, key: TransferKey, listener: TcpListener, offset: u64) {
        let Some(record) = self.lookup(&key) else {
            return;
        };

        let timeout = Duration::from_secs(self.config.dcc.accept_timeout_secs);
        let (mut stream, remote) = match tokio::time::timeout(timeout, listener.accept()).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(peer = %key.peer, filename = %key.filename, error = %e, "accept failed");
                self.remove(&key);
                return;
            }
            Err(_) => {
                info!(peer = %key.peer, filename = %key.filename, "no connection within timeout, offer discarded");
                self.remove(&key);
                return;
            }
        };
        drop(listener);
        debug!(peer = %key.peer, filename = %key.filename, %remote, "peer connected");
        self.set_state(&key, TransferState::Connected);

        let mut file = match File::open(&record.path).await {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %record.path.display(), error = %e, "source file unreadable");
                self.mark_interrupted(&key);
                return;
            }
        };
        if offset > 0 {
            if let Err(e) = file.seek(SeekFrom::Start(offset)).await {
                warn!(error = %e, "seek failed");
                self.mark_interrupted(&key);
                return;
            }
        }
        self.set_state(&key, TransferState::Active);

        match self
            .stream_chunks(&key, &mut file, &mut stream, offset, record.size)
            .await
        {
            Ok(sent) if sent >= record.size => {
                let _ = stream.shutdown().await;
                info!(peer = %key.peer, filename = %key.filename, bytes = sent, "transfer complete");
                self.remove(&key);
            }
            Ok(sent) => {
                self.mark_interrupted(&key);
                info!(peer = %key.peer, filename = %key.filename, offset = sent, "transfer stopped before completion");
            }
            Err(e) => {
                self.mark_interrupted(&key);
                warn!(peer = %key.peer, filename = %key.filename, error = %e, "transfer interrupted");
            }
        }
    }

    /// Transfer task for the receive path: connect out and append to the
    /// destination file.
    async fn run_receive(self: Arc<Self>, key: TransferKey, addr: Ipv4Addr) {
        let Some(record) = self.lookup(&key) else {
            return;
        };

        let timeout = Duration::from_secs(self.config.dcc.accept_timeout_secs);
        let mut stream =
            match tokio::time::timeout(timeout, TcpStream::connect((addr, key.port))).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(peer = %key.peer, %addr, port = key.port, error = %e, "connect failed");
                    self.remove(&key);
                    return;
                }
                Err(_) => {
                    warn!(peer = %key.peer, %addr, port = key.port, "connect timed out");
                    self.remove(&key);
                    return;
                }
            };
        self.set_state(&key, TransferState::Connected);

        let mut file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&record.path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %record.path.display(), error = %e, "destination unwritable");
                self.remove(&key);
                return;
            }
        };
        self.set_state(&key, TransferState::Active);

        match self
            .stream_chunks(&key, &mut stream, &mut file, record.offset, record.size)
            .await
        {
            Ok(received) if received >= record.size => {
                info!(peer = %key.peer, filename = %key.filename, bytes = received, "upload received");
                self.remove(&key);
                self.out
                    .privmsg(&key.peer, format!("Upload of {} complete.", key.filename))
                    .await;
            }
            Ok(received) => {
                // Early close: partial retained, resume is peer-initiated
                self.mark_interrupted(&key);
                info!(peer = %key.peer, filename = %key.filename, offset = received, "upload stopped early, partial retained");
            }
            Err(e) => {
                self.mark_interrupted(&key);
                warn!(peer = %key.peer, filename = %key.filename, error = %e, "upload interrupted");
            }
        }
    }

    /// Copy up to `size - offset` bytes from `src` to `dst` in fixed
    /// chunks, committing the table offset after each confirmed write.
    /// Returns the final offset; the caller decides Completed versus
    /// Interrupted from it. Stops at a chunk boundary on shutdown.
    async fn stream_chunks<R, W>(
        &self,
        key: &TransferKey,
        src: &mut R,
        dst: &mut W,
        mut offset: u64,
        size: u64,
    ) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.config.dcc.chunk_size];
        while offset < size {
            if self.token.is_cancelled() {
                break;
            }
            let want = buf.len().min((size - offset) as usize);
            let n = src.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).await?;
            offset += n as u64;
            self.commit_offset(key, offset);
        }
        dst.flush().await?;
        Ok(offset)
    }

    fn commit_offset(&self, key: &TransferKey, offset: u64) {
        let mut table = self.table.lock();
        if let Some(record) = table.get_mut(key) {
            // Offset is monotonically non-decreasing while Active
            debug_assert!(offset >= record.offset);
            record.offset = offset;
            record.state = TransferState::Active;
        }
    }

    fn set_state(&self, key: &TransferKey, state: TransferState) {
        let mut table = self.table.lock();
        if let Some(record) = table.get_mut(key) {
            record.state = state;
        }
    }

    fn mark_interrupted(&self, key: &TransferKey) {
        self.set_state(key, TransferState::Interrupted);
    }

    fn remove(&self, key: &TransferKey) {
        self.table.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, DccConfig, PathsConfig, ServerConfig, StatsConfig};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
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
            auth: AuthConfig::default(),
            dcc: DccConfig {
                port_min: 50200,
                port_max: 50260,
                public_ip: None,
                accept_timeout_secs: 5,
                chunk_size: 1024,
            },
            paths: PathsConfig {
                shared_dir: dir.join("shared"),
                upload_dir: dir.join("uploads"),
                stats_file: dir.join("stats.json"),
                log_file: None,
            },
            stats: StatsConfig::default(),
        })
    }

    fn coordinator(
        dir: &std::path::Path,
    ) -> (Arc<TransferCoordinator>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let coordinator = Arc::new(TransferCoordinator::new(
            test_config(dir),
            Outbound::new(tx),
            CancellationToken::new(),
        ));
        (coordinator, rx)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn send_key(port: u16) -> TransferKey {
        TransferKey {
            peer: "alice".into(),
            filename: "data.bin".into(),
            port,
        }
    }

    fn register_send(coordinator: &TransferCoordinator, key: &TransferKey, path: PathBuf, size: u64) {
        coordinator.table.lock().insert(
            key.clone(),
            Transfer {
                path,
                size,
                offset: 0,
                direction: Direction::Send,
                state: TransferState::Offered,
            },
        );
    }

    /// Accepts `limit` bytes, then fails every write.
    struct FailingWriter {
        written: usize,
        limit: usize,
    }

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.written >= self.limit {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "peer went away",
                )));
            }
            let n = buf.len().min(self.limit - self.written);
            self.written += n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Records the size of each successful write.
    #[derive(Default)]
    struct RecordingWriter {
        chunks: Vec<usize>,
        data: Vec<u8>,
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.chunks.push(buf.len());
            self.data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_failure_retains_confirmed_offset() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _rx) = coordinator(dir.path());
        let data = pattern(2500);
        let key = send_key(50201);
        register_send(&coordinator, &key, dir.path().join("data.bin"), 2500);

        // First chunk (1024 bytes) succeeds, second write fails.
        let mut src = io::Cursor::new(data);
        let mut dst = FailingWriter { written: 0, limit: 1024 };
        let result = coordinator
            .stream_chunks(&key, &mut src, &mut dst, 0, 2500)
            .await;

        assert!(result.is_err());
        let record = coordinator.lookup(&key).unwrap();
        assert_eq!(record.offset, 1024);
    }

    #[tokio::test]
    async fn test_resume_stream_starts_at_offset_byte() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _rx) = coordinator(dir.path());
        let data = pattern(2500);
        let key = send_key(50202);
        register_send(&coordinator, &key, dir.path().join("data.bin"), 2500);

        let offset = 1024u64;
        let mut src = io::Cursor::new(data[offset as usize..].to_vec());
        let mut dst = RecordingWriter::default();
        let sent = coordinator
            .stream_chunks(&key, &mut src, &mut dst, offset, 2500)
            .await
            .unwrap();

        assert_eq!(sent, 2500);
        assert_eq!(dst.data.first(), Some(&pattern(2500)[1024]));
        assert_eq!(dst.data, &pattern(2500)[1024..]);
    }

    #[tokio::test]
    async fn test_chunk_offsets_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _rx) = coordinator(dir.path());
        let data = pattern(2500);
        let key = send_key(50203);
        register_send(&coordinator, &key, dir.path().join("data.bin"), 2500);

        let mut src = io::Cursor::new(data.clone());
        let mut dst = RecordingWriter::default();
        let sent = coordinator
            .stream_chunks(&key, &mut src, &mut dst, 0, 2500)
            .await
            .unwrap();

        assert_eq!(sent, 2500);
        assert_eq!(dst.chunks, vec![1024, 1024, 452]);
        let cumulative: Vec<u64> = dst
            .chunks
            .iter()
            .scan(0u64, |acc, c| {
                *acc += *c as u64;
                Some(*acc)
            })
            .collect();
        assert_eq!(cumulative, vec![1024, 2048, 2500]);
        assert_eq!(dst.data, data);
    }

    #[tokio::test]
    async fn test_resume_unknown_key_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, mut rx) = coordinator(dir.path());

        let result = coordinator
            .handle_resume("ghost", "nothing.bin", 50204, 100)
            .await;

        assert!(matches!(result, Err(TransferError::NotFound { .. })));
        assert!(rx.try_recv().is_err(), "no reply expected");
        assert!(coordinator.is_empty());
    }

    #[tokio::test]
    async fn test_resume_of_live_transfer_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, mut rx) = coordinator(dir.path());
        let key = send_key(50206);
        register_send(&coordinator, &key, dir.path().join("data.bin"), 2500);

        // Offered: the original listener still owns the port
        let result = coordinator
            .handle_resume("alice", "data.bin", 50206, 100)
            .await;
        assert!(matches!(result, Err(TransferError::NotFound { .. })));

        // Active: a second send task would race the first
        coordinator.commit_offset(&key, 1024);
        let result = coordinator
            .handle_resume("alice", "data.bin", 50206, 100)
            .await;
        assert!(matches!(result, Err(TransferError::NotFound { .. })));

        assert!(rx.try_recv().is_err(), "no ACCEPT expected");
        let record = coordinator.lookup(&key).unwrap();
        assert_eq!(record.offset, 1024);
        assert_eq!(record.state, TransferState::Active);
    }

    #[tokio::test]
    async fn test_resume_offset_past_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, mut rx) = coordinator(dir.path());
        let key = send_key(50205);
        register_send(&coordinator, &key, dir.path().join("data.bin"), 2500);
        coordinator.mark_interrupted(&key);

        for bad in [2500u64, 9000] {
            let result = coordinator
                .handle_resume("alice", "data.bin", 50205, bad)
                .await;
            assert!(matches!(result, Err(TransferError::InvalidOffset { .. })));
        }

        assert!(rx.try_recv().is_err(), "no ACCEPT expected");
        let record = coordinator.lookup(&key).unwrap();
        assert_eq!(record.offset, 0);
        assert_eq!(record.state, TransferState::Interrupted);
    }

    #[tokio::test]
    async fn test_receive_declined_when_partial_already_complete() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, mut rx) = coordinator(dir.path());
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("done.bin"), pattern(2500)).unwrap();

        let result = coordinator
            .receive("alice", "done.bin", std::net::Ipv4Addr::LOCALHOST, 50207, 2500)
            .await;

        assert!(matches!(result, Err(TransferError::InvalidOffset { .. })));
        assert!(coordinator.is_empty());
        assert!(rx.try_recv().is_err(), "no completion reply expected");
    }

    #[tokio::test]
    async fn test_offer_send_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, mut rx) = coordinator(dir.path());
        std::fs::create_dir_all(dir.path().join("shared")).unwrap();

        let result = coordinator.offer_send("alice", "absent.bin").await;
        assert!(matches!(result, Err(TransferError::FileNotFound(_))));
        assert!(rx.try_recv().is_err(), "no offer expected");
        assert!(coordinator.is_empty());
    }

    #[tokio::test]
    async fn test_offer_send_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _rx) = coordinator(dir.path());

        let result = coordinator.offer_send("alice", "../etc/passwd").await;
        assert!(matches!(result, Err(TransferError::FileNotFound(_))));
    }
}
