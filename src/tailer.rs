//! Append-only log file follower.
//!
//! Opens the log, seeks to its current end and never replays history. The
//! file size is polled on a fixed cadence; when it grows, exactly the delta
//! is read, split into lines and handed to the parser. Records flow to the
//! consumer through a bounded channel that preserves input order and
//! provides natural backpressure.
//!
//! A shrinking file is treated as rotation: the tailer reopens the path and
//! continues from offset zero. Stat/read failures latch a terminal error and
//! close the channel; a shutdown signal closes the channel cleanly.

use crate::error::StreamError;
use crate::parser::LogParser;
use crate::record::LogRecord;
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Cadence of the file-size poll.
const POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Handle to the tailer task.
///
/// The task itself owns the file; the handle only exposes the latched
/// terminal error after the record channel closes.
pub struct Tailer {
    error: Arc<Mutex<Option<StreamError>>>,
}

impl Tailer {
    /// Open the log and start following it.
    ///
    /// Fails fast when the file cannot be opened or statted. Returns the
    /// handle and the record stream.
    pub async fn spawn(
        path: PathBuf,
        parser: LogParser,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<(Self, mpsc::Receiver<LogRecord>), StreamError> {
        let mut file = File::open(&path).await.map_err(|source| StreamError::Open {
            path: path.clone(),
            source,
        })?;

        let meta = file.metadata().await.map_err(|source| StreamError::Stat {
            path: path.clone(),
            source,
        })?;

        // Skip history: start at the current end of file.
        let mut pos = meta.len();
        file.seek(SeekFrom::Start(pos))
            .await
            .map_err(|source| StreamError::Read {
                path: path.clone(),
                source,
            })?;

        let error = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel(1);
        let mut shutdown_rx = shutdown.subscribe();

        let latch = Arc::clone(&error);
        tokio::spawn(async move {
            let mut carry = String::new();
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match poll_once(&path, &mut file, &mut pos, &mut carry, &parser, &tx).await {
                            Ok(true) => {}
                            // Consumer hung up; nothing left to do.
                            Ok(false) => break,
                            Err(e) => {
                                *latch.lock() = Some(e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("tailer shutting down");
                        break;
                    }
                }
            }
        });

        Ok((Self { error }, rx))
    }

    /// Take the terminal error, if the stream ended with one.
    pub fn take_error(&self) -> Option<StreamError> {
        self.error.lock().take()
    }
}

/// One poll cycle. Returns `Ok(false)` when the consumer is gone.
async fn poll_once(
    path: &Path,
    file: &mut File,
    pos: &mut u64,
    carry: &mut String,
    parser: &LogParser,
    tx: &mpsc::Sender<LogRecord>,
) -> Result<bool, StreamError> {
    let size = tokio::fs::metadata(path)
        .await
        .map_err(|source| StreamError::Stat {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    if size < *pos {
        warn!(path = %path.display(), size, pos = *pos, "log file shrank, assuming rotation");
        *file = File::open(path).await.map_err(|source| StreamError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        *pos = 0;
        carry.clear();
    }

    if size == *pos {
        return Ok(true);
    }

    let mut buf = vec![0u8; (size - *pos) as usize];
    file.seek(SeekFrom::Start(*pos))
        .await
        .map_err(|source| StreamError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    file.read_exact(&mut buf)
        .await
        .map_err(|source| StreamError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    *pos = size;

    carry.push_str(&String::from_utf8_lossy(&buf));

    let mut start = 0;
    loop {
        let Some(offset) = carry[start..].find('\n') else {
            break;
        };
        let end = start + offset;
        let line = carry[start..end].strip_suffix('\r').unwrap_or(&carry[start..end]);
        let record = parser.parse(line);
        start = end + 1;

        if tx.send(record).await.is_err() {
            return Ok(false);
        }
    }

    // Keep a trailing partial line until its newline arrives.
    *carry = carry.split_off(start);

    Ok(true)
}
