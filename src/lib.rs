//! logwarden - log-driven access-control engine.
//!
//! Tails an append-only access log, parses each line with a configurable
//! regex, and runs the client address through an ordered chain of checkers
//! (GeoIP, prefix lists, field matching, reverse-DNS verification). Banned
//! addresses are handed to a configurable external command so the
//! surrounding firewall or proxy can enforce the block.

pub mod action;
pub mod app;
pub mod blocklog;
pub mod cache;
pub mod chain;
pub mod checkers;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod parser;
pub mod record;
pub mod tailer;
