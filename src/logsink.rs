//! Append-only log writer shared by all subscriptions.
//!
//! The sink is the single arbiter of write access per log file: every
//! write goes through one async mutex over the open-handle table, so
//! concurrent deliveries to a shared file can never interleave partial
//! lines. Handles open lazily on first write (parent directories created,
//! append mode) and stay open until [`LogSink::shutdown`] flushes and
//! closes them.
//!
//! Line format, stable across runs:
//! `[YYYY-MM-DD_HH:MM:SS.mmm] [topic] payload` (UTC), one message per
//! line. Connection markers replace the `[topic] payload` part with the
//! marker text.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::mqtt::message::InboundMessage;

/// A standing `SUB` registration: messages on `topic` append to `logfile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub qos: u8,
    pub topic: String,
    pub logfile: PathBuf,
}

pub struct LogSink {
    files: Mutex<HashMap<PathBuf, File>>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl LogSink {
    pub fn new() -> Self {
        LogSink {
            files: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Registers a standing topic → logfile association.
    pub async fn register(&self, subscription: Subscription) {
        info!(
            topic = %subscription.topic,
            logfile = %subscription.logfile.display(),
            "registered subscription"
        );
        self.subscriptions.write().await.push(subscription);
    }

    /// Snapshot of all registrations, in registration order.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.read().await.clone()
    }

    pub async fn has_subscriptions(&self) -> bool {
        !self.subscriptions.read().await.is_empty()
    }

    /// Appends an inbound message to the log of every subscription whose
    /// topic matches exactly. Write failures are logged and skipped so one
    /// bad log path never stalls delivery to the others.
    pub async fn route(&self, message: &InboundMessage) {
        let targets: Vec<PathBuf> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|sub| sub.topic == message.topic)
            .map(|sub| sub.logfile.clone())
            .collect();
        for path in targets {
            if let Err(e) = self
                .write(&path, &message.topic, &message.payload, message.received_at)
                .await
            {
                warn!("log write to {} failed: {e}", path.display());
            }
        }
    }

    /// Appends one complete message record to `path`.
    pub async fn write(
        &self,
        path: &Path,
        topic: &str,
        payload: &str,
        at: DateTime<Utc>,
    ) -> std::io::Result<()> {
        let line = format!("{} [{}] {}\n", format_timestamp(at), topic, payload);
        self.append(path, &line).await
    }

    /// Writes a marker line (connection lost/restored) to every distinct
    /// registered log file.
    pub async fn write_marker_all(&self, marker: &str) {
        let targets: HashSet<PathBuf> = self
            .subscriptions
            .read()
            .await
            .iter()
            .map(|sub| sub.logfile.clone())
            .collect();
        let line = format!("{} {}\n", format_timestamp(Utc::now()), marker);
        for path in targets {
            if let Err(e) = self.append(&path, &line).await {
                warn!("marker write to {} failed: {e}", path.display());
            }
        }
    }

    async fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        let mut files = self.files.lock().await;
        let file = match files.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .await?;
                entry.insert(file)
            }
        };
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// Flushes and closes every open handle.
    pub async fn shutdown(&self) {
        let mut files = self.files.lock().await;
        for (path, mut file) in files.drain() {
            if let Err(e) = file.flush().await {
                warn!("flush of {} failed: {e}", path.display());
            }
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    format!("[{}]", at.format("%Y-%m-%d_%H:%M:%S%.3f"))
}
