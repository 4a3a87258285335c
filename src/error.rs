//! Error types shared across the engine.
//!
//! Fatal startup errors ([`CheckerBuildError`], config errors in
//! [`crate::config`]) abort the process; everything else is logged and the
//! pipeline keeps running.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Terminal errors of the log tailer.
///
/// Latched by the tailer task and retrieved by the host after the record
/// channel closes. Cancellation closes the channel without latching one.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("cannot open log {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot stat log {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot read log {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures while building a checker from configuration. All fatal.
#[derive(Debug, Error)]
pub enum CheckerBuildError {
    #[error("cannot fetch list source {src:?}: {source}")]
    FetchSource { src: String, source: reqwest::Error },

    #[error("cannot read list source {src:?}: {source}")]
    ReadSource {
        src: String,
        source: std::io::Error,
    },

    #[error("cannot parse aws ip ranges from {src:?}: {source}")]
    AwsIpRanges {
        src: String,
        source: serde_json::Error,
    },

    #[error("aws_ip_ranges source {src:?} requires a non-empty aws_service_filter")]
    MissingServiceFilter { src: String },

    #[error("cannot load GeoIP database: {0}")]
    GeoIpDatabase(#[from] maxminddb::MaxMindDbError),

    #[error("invalid reverse_dns rule: {0}")]
    InvalidRule(String),

    #[error("invalid resolver address {addr:?}: {reason}")]
    InvalidResolver { addr: String, reason: String },
}

/// Failures of the external block action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("cannot parse command template: {0}")]
    Template(#[from] tera::Error),

    #[error("cannot spawn {command:?}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command:?} exited with {status}")]
    Failed {
        command: String,
        status: ExitStatus,
    },
}

/// Failures of the block-event log printer.
#[derive(Debug, Error)]
pub enum BlockLogError {
    #[error("cannot open block log: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot render block log template: {0}")]
    Template(#[from] tera::Error),
}
