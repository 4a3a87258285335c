//! Parsed log records.
//!
//! A [`LogRecord`] is produced by the parser for every input line and carries
//! the client address plus the named fields the log format captured. Checkers
//! may stamp additional fields onto a record while it travels the chain.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// One parsed log line.
///
/// The IP is set exactly once at parse time; `None` means the `ip` capture
/// was absent or did not parse as an address.
#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    ip: Option<IpAddr>,
    fields: HashMap<String, String>,
}

impl LogRecord {
    /// Create a record with the given address and no fields.
    pub fn new(ip: Option<IpAddr>) -> Self {
        Self {
            ip,
            fields: HashMap::new(),
        }
    }

    /// The client address, if the line carried a parseable one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Look up a named field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Set or overwrite a named field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Iterate over all fields in unspecified order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{} {:?}", ip, self.fields),
            None => write!(f, "<no ip> {:?}", self.fields),
        }
    }
}
