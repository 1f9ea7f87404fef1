//! Channel statistics with periodic persistence.
//!
//! Counters and the per-nick tally live behind one mutex, held only
//! across the in-memory mutation. A background task snapshots them to a
//! JSON file on a fixed interval; a crash loses at most one interval of
//! deltas.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The persisted counter set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub messages: u64,
    pub joins: u64,
    pub parts: u64,
    pub quits: u64,
    /// Per-nick message tally.
    #[serde(default)]
    pub users: HashMap<String, u64>,
    /// When this snapshot was written.
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Thread-safe channel statistics.
pub struct StatsStore {
    inner: Mutex<Stats>,
    started_at: Instant,
}

impl StatsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Stats::default()),
            started_at: Instant::now(),
        }
    }

    /// Load the last snapshot from `path`. A missing or unreadable file
    /// starts the counters from zero.
    pub fn load(path: &Path) -> Self {
        let stats = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(stats) => {
                    info!(path = %path.display(), "loaded stats snapshot");
                    stats
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "stats snapshot unreadable, starting fresh");
                    Stats::default()
                }
            },
            Err(_) => Stats::default(),
        };
        Self {
            inner: Mutex::new(stats),
            started_at: Instant::now(),
        }
    }

    /// Record a channel message from `nick`.
    pub fn record_message(&self, nick: &str) {
        let mut stats = self.inner.lock();
        stats.messages += 1;
        *stats.users.entry(nick.to_owned()).or_insert(0) += 1;
    }

    pub fn record_join(&self) {
        self.inner.lock().joins += 1;
    }

    pub fn record_part(&self) {
        self.inner.lock().parts += 1;
    }

    pub fn record_quit(&self) {
        self.inner.lock().quits += 1;
    }

    /// A copy of the current counters.
    pub fn snapshot(&self) -> Stats {
        self.inner.lock().clone()
    }

    /// One-line counter summary for the !stats command.
    pub fn summary(&self) -> String {
        let stats = self.inner.lock();
        format!(
            "Stats: {} messages, {} joins, {} parts, {} quits, {} users.",
            stats.messages,
            stats.joins,
            stats.parts,
            stats.quits,
            stats.users.len()
        )
    }

    /// Elapsed time since startup, formatted as `XhYmZs`.
    pub fn uptime(&self) -> String {
        let secs = self.started_at.elapsed().as_secs();
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    /// Write a snapshot to `path` via a temp file and rename.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let snapshot = {
            let mut stats = self.inner.lock();
            stats.saved_at = Some(Utc::now());
            stats.clone()
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "stats snapshot written");
        Ok(())
    }

    /// Spawn the periodic flush task. Stops when `token` is cancelled;
    /// the caller writes the final snapshot on shutdown.
    pub fn spawn_flush(
        self: Arc<Self>,
        path: PathBuf,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval fires immediately on the first tick
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.save(&path) {
                            warn!(error = %e, "failed to write stats snapshot");
                        }
                    }
                }
            }
        })
    }
}

impl Default for StatsStore {
    fn default() -> Self {
        Self::new()
    }
}
