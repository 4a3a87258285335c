//! Configuration loading and validation.
//!
//! The configuration is a single YAML document (`config.yml` by default).
//! Checker blocks are discriminated by their `kind` field and keep their
//! declaration order, which is also the chain evaluation order.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Default number of entries the pass-cache may hold.
pub const DEFAULT_WHITELIST_CACHE_MAX: usize = 1_000_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path of the access log to tail.
    pub logfile: PathBuf,
    /// Regex with named captures; must include `(?P<ip>...)`.
    pub log_format: String,
    /// Path of the ban-event log. Stdout when unset.
    #[serde(default)]
    pub blocklog: Option<PathBuf>,
    /// Template rendered for each ban-event line.
    pub blocklog_template: String,
    /// Path of the persistent pass-cache. In-memory only when unset.
    #[serde(default)]
    pub whitelist_cache_path: Option<PathBuf>,
    /// Bound on pass-cache entries; the oldest entry is evicted at capacity.
    #[serde(default = "default_whitelist_cache_max")]
    pub whitelist_cache_max: usize,
    /// `host:port` for the Prometheus endpoint. Disabled when unset.
    #[serde(default)]
    pub metrics_addr: Option<String>,
    #[serde(default)]
    pub debug: bool,
    /// External command invoked on every ban.
    #[serde(default)]
    pub block_action: BlockAction,
    /// Checker pipeline, evaluated in order.
    pub checkers: Vec<CheckerConfig>,
}

fn default_whitelist_cache_max() -> usize {
    DEFAULT_WHITELIST_CACHE_MAX
}

impl Config {
    /// Load the configuration from a YAML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

/// The block action: either a whole command line or an argv list.
///
/// Each element is a template; position 0 is the command path. A single
/// string is split on whitespace before templating, so rendered field values
/// containing spaces stay single arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BlockAction {
    Command(String),
    Argv(Vec<String>),
}

impl Default for BlockAction {
    fn default() -> Self {
        BlockAction::Argv(Vec::new())
    }
}

impl BlockAction {
    /// The argv template list. Empty means the action is a no-op.
    pub fn argv(&self) -> Vec<String> {
        match self {
            BlockAction::Command(line) => line.split_whitespace().map(str::to_string).collect(),
            BlockAction::Argv(argv) => argv.clone(),
        }
    }
}

impl fmt::Display for BlockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Verdict a list or field rule produces on a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Whitelist,
    Block,
}

/// One checker block, discriminated by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckerConfig {
    Geoip(GeoIpConfig),
    List(ListConfig),
    Field(FieldConfig),
    ReverseDns(ReverseDnsConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoIpConfig {
    /// MaxMind country database path; the bundled database when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// ISO country codes that short-circuit to a whitelist verdict.
    #[serde(default)]
    pub allowed_countries: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConfig {
    pub sources: Vec<ListSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListSourceConfig {
    /// `http(s)://` URL or local file path.
    pub src: String,
    #[serde(rename = "type")]
    pub kind: ListSourceKind,
    pub action: RuleAction,
    /// Which AWS services contribute prefixes; required for `aws_ip_ranges`.
    #[serde(default)]
    pub aws_service_filter: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListSourceKind {
    Txt,
    AwsIpRanges,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    pub field_name: String,
    pub contains: Vec<String>,
    pub action: RuleAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReverseDnsConfig {
    pub rules: Vec<ReverseDnsRuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReverseDnsRuleConfig {
    /// Record field that triggers this rule.
    pub field: String,
    /// Trigger substrings on that field.
    pub field_contains: Vec<String>,
    /// Domain suffixes a PTR name may legitimately end with.
    pub domain_suffixes: Vec<String>,
    /// Upstream resolver address(es); the host default when empty.
    #[serde(default)]
    pub resolver: ResolverAddrs,
}

/// One or many resolver addresses.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResolverAddrs {
    One(String),
    Many(Vec<String>),
}

impl Default for ResolverAddrs {
    fn default() -> Self {
        ResolverAddrs::Many(Vec::new())
    }
}

impl ResolverAddrs {
    pub fn as_slice(&self) -> &[String] {
        match self {
            ResolverAddrs::One(addr) => std::slice::from_ref(addr),
            ResolverAddrs::Many(addrs) => addrs.as_slice(),
        }
    }
}

/// Validate a loaded configuration, collecting every problem found.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    match regex::Regex::new(&config.log_format) {
        Ok(re) => {
            if !re
                .capture_names()
                .flatten()
                .any(|name| name == crate::parser::IP_CAPTURE)
            {
                errors.push("log_format has no (?P<ip>...) capture group".to_string());
            }
        }
        Err(e) => errors.push(format!("log_format does not compile: {e}")),
    }

    if config.blocklog_template.trim().is_empty() {
        errors.push("blocklog_template is empty".to_string());
    }

    if config.whitelist_cache_max == 0 {
        errors.push("whitelist_cache_max must be greater than zero".to_string());
    }

    for checker in &config.checkers {
        match checker {
            CheckerConfig::List(list) => {
                for source in &list.sources {
                    if source.kind == ListSourceKind::AwsIpRanges
                        && source.aws_service_filter.is_empty()
                    {
                        errors.push(format!(
                            "list source {:?}: aws_ip_ranges requires aws_service_filter",
                            source.src
                        ));
                    }
                }
            }
            CheckerConfig::Field(field) => {
                if field.contains.is_empty() {
                    errors.push(format!(
                        "field checker {:?}: contains is empty",
                        field.field_name
                    ));
                }
            }
            CheckerConfig::ReverseDns(rdns) => {
                for (i, rule) in rdns.rules.iter().enumerate() {
                    if rule.field.is_empty() {
                        errors.push(format!("reverse_dns rule #{i}: field is empty"));
                    }
                    if rule.field_contains.is_empty() {
                        errors.push(format!("reverse_dns rule #{i}: field_contains is empty"));
                    }
                    if rule.domain_suffixes.is_empty() {
                        errors.push(format!("reverse_dns rule #{i}: domain_suffixes is empty"));
                    }
                }
            }
            CheckerConfig::Geoip(_) => {}
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
