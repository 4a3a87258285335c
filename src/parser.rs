//! Log line parsing via a user-supplied regex with named captures.
//!
//! The log format is a single regular expression. The capture named `ip` is
//! required and becomes the record address; every other named capture becomes
//! a field entry. Unnamed groups are ignored.

use crate::record::LogRecord;
use regex::Regex;
use thiserror::Error;

/// Name of the mandatory address capture group.
pub const IP_CAPTURE: &str = "ip";

/// Errors constructing a [`LogParser`].
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("cannot compile log format {format:?}: {source}")]
    Compile {
        format: String,
        source: regex::Error,
    },

    #[error("log format has no (?P<ip>...) capture group")]
    MissingIpCapture,
}

/// Parser built from the configured log format.
#[derive(Debug, Clone)]
pub struct LogParser {
    re: Regex,
}

impl LogParser {
    pub fn new(format: &str) -> Result<Self, FormatError> {
        let re = Regex::new(format).map_err(|source| FormatError::Compile {
            format: format.to_string(),
            source,
        })?;

        if !re.capture_names().flatten().any(|name| name == IP_CAPTURE) {
            return Err(FormatError::MissingIpCapture);
        }

        Ok(Self { re })
    }

    /// Parse one line into a record.
    ///
    /// A line that does not match yields a record with no address and no
    /// fields; the chain then typically rejects it trivially. A named group
    /// that did not participate in the match produces an empty field so that
    /// block-log templates stay renderable.
    pub fn parse(&self, line: &str) -> LogRecord {
        let Some(caps) = self.re.captures(line) else {
            return LogRecord::new(None);
        };

        let ip = caps
            .name(IP_CAPTURE)
            .and_then(|m| m.as_str().parse().ok());
        let mut record = LogRecord::new(ip);

        for name in self.re.capture_names().flatten() {
            if name == IP_CAPTURE {
                continue;
            }

            let value = caps.name(name).map(|m| m.as_str()).unwrap_or("");
            record.set(name, value);
        }

        record
    }
}
