//! Pass/block IP caches.
//!
//! Both caches map IP text to insertion time and protect the chain from
//! redundant work. The pass-cache may be backed by a file and is rewritten
//! in full by a background saver; the block-cache is session-only. Entries
//! are never evicted during normal operation, but a capacity bound protects
//! against unbounded growth: at capacity the oldest entry makes room.
//!
//! File format: one `"<ip> <RFC3339 timestamp>"` line per entry. A single
//! malformed line aborts the load and the cache starts empty.

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Interval between pass-cache snapshots.
const SAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Set of IP addresses with per-entry insertion timestamps.
pub struct IpCache {
    entries: DashMap<String, DateTime<Utc>>,
    path: Option<PathBuf>,
    max_entries: usize,
}

impl IpCache {
    /// Purely in-memory cache; `save` is a no-op.
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            path: None,
            max_entries,
        }
    }

    /// File-backed cache, loading existing content.
    ///
    /// A missing file is not an error. A file that fails to parse is logged
    /// and ignored; the cache starts empty.
    pub fn with_path(path: PathBuf, max_entries: usize) -> Self {
        let entries = DashMap::new();

        match File::open(&path) {
            Ok(file) => match Self::parse_reader(BufReader::new(file)) {
                Ok(loaded) => {
                    for (ip, timestamp) in loaded {
                        entries.insert(ip, timestamp);
                    }
                    info!(path = %path.display(), entries = entries.len(), "pass cache loaded");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot parse cache file, starting empty");
                    entries.clear();
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache file yet, starting empty");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open cache file, starting empty");
            }
        }

        Self {
            entries,
            path: Some(path),
            max_entries,
        }
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.entries.contains_key(ip)
    }

    /// Insert an address, keeping the original timestamp on re-insertion.
    pub fn add(&self, ip: IpAddr) {
        let key = ip.to_string();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }

        self.entries.entry(key).or_insert_with(Utc::now);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            debug!(ip = %key, "cache at capacity, evicted oldest entry");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize all entries to a writer, one line per entry.
    pub fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        for entry in self.entries.iter() {
            writeln!(
                w,
                "{} {}",
                entry.key(),
                entry.value().to_rfc3339_opts(SecondsFormat::Secs, true)
            )?;
        }
        Ok(())
    }

    /// Atomically replace the backing file with a fresh serialization.
    ///
    /// No-op for in-memory caches.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let temp_path = temp_path_for(path);
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            self.write_to(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, path)?;

        debug!(path = %path.display(), entries = self.entries.len(), "pass cache saved");
        Ok(())
    }

    fn parse_reader(reader: impl BufRead) -> Result<Vec<(String, DateTime<Utc>)>, String> {
        let mut entries = Vec::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| format!("line {}: {e}", number + 1))?;
            if line.trim().is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(ip), Some(timestamp), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(format!("line {}: expected \"<ip> <timestamp>\"", number + 1));
            };

            ip.parse::<IpAddr>()
                .map_err(|e| format!("line {}: bad address {ip:?}: {e}", number + 1))?;

            let timestamp = DateTime::parse_from_rfc3339(timestamp)
                .map_err(|e| format!("line {}: bad timestamp {timestamp:?}: {e}", number + 1))?
                .with_timezone(&Utc);

            entries.push((ip.to_string(), timestamp));
        }

        Ok(entries)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Background saver: snapshot every minute, final flush on shutdown.
pub fn spawn_saver(
    cache: std::sync::Arc<IpCache>,
    shutdown: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SAVE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = cache.save() {
                        warn!(error = %e, "cannot save pass cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    match cache.save() {
                        Ok(()) => info!("final pass cache flush completed"),
                        Err(e) => warn!(error = %e, "final pass cache flush failed"),
                    }
                    break;
                }
            }
        }
    })
}
