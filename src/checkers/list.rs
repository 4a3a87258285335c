//! IP prefix-list checker.
//!
//! Holds any number of prefix lists, each tagged with a whitelist or block
//! action. Lists are evaluated in declaration order; the first containing
//! list wins; a miss across all lists yields no opinion.
//!
//! Each list uses a dual-engine store: host routes (/32) go into a
//! `RoaringBitmap` for O(1) membership, proper prefixes are kept as CIDR
//! vectors. IPv6 entries are accepted (bare addresses as /128) but only the
//! CIDR path serves them.

use crate::chain::{HarmScore, Verdict};
use crate::config::{ListConfig, ListSourceConfig, ListSourceKind, RuleAction};
use crate::error::CheckerBuildError;
use crate::record::LogRecord;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use roaring::RoaringBitmap;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

/// Total timeout for fetching one remote list source.
const HTTP_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Membership store for one prefix list.
#[derive(Debug, Default)]
pub struct PrefixSet {
    v4_hosts: RoaringBitmap,
    v4_nets: Vec<Ipv4Net>,
    v6_nets: Vec<Ipv6Net>,
}

impl PrefixSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, net: IpNet) {
        match net {
            IpNet::V4(net) if net.prefix_len() == 32 => {
                self.v4_hosts.insert(u32::from(net.addr()));
            }
            IpNet::V4(net) => self.v4_nets.push(net),
            IpNet::V6(net) => self.v6_nets.push(net),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(ip) => {
                self.v4_hosts.contains(u32::from(ip))
                    || self.v4_nets.iter().any(|net| net.contains(&ip))
            }
            IpAddr::V6(ip) => self.v6_nets.iter().any(|net| net.contains(&ip)),
        }
    }

    /// Number of entries across all engines.
    pub fn len(&self) -> usize {
        self.v4_hosts.len() as usize + self.v4_nets.len() + self.v6_nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct IpList {
    prefixes: PrefixSet,
    action: RuleAction,
}

pub struct ListChecker {
    lists: Vec<IpList>,
}

impl ListChecker {
    /// Fetch and parse every configured source. Any fetch or decode failure
    /// aborts construction; individual malformed entries are skipped.
    pub async fn new(config: &ListConfig) -> Result<Self, CheckerBuildError> {
        let mut lists = Vec::with_capacity(config.sources.len());

        for source in &config.sources {
            let data = bytes_from_src(&source.src).await?;

            let prefixes = match source.kind {
                ListSourceKind::Txt => parse_txt(&data),
                ListSourceKind::AwsIpRanges => parse_aws_ip_ranges(source, &data)?,
            };

            info!(
                kind = ?source.kind,
                src = %source.src,
                rules = prefixes.len(),
                action = ?source.action,
                "list created"
            );

            lists.push(IpList {
                prefixes,
                action: source.action,
            });
        }

        Ok(Self { lists })
    }

    pub fn check(&self, record: &mut LogRecord) -> (HarmScore, Verdict) {
        let Some(ip) = record.ip() else {
            return (0, Verdict::None);
        };

        for list in &self.lists {
            if list.prefixes.contains(ip) {
                let verdict = match list.action {
                    RuleAction::Whitelist => Verdict::Whitelist,
                    RuleAction::Block => Verdict::Ban,
                };
                return (0, verdict);
            }
        }

        (0, Verdict::None)
    }
}

/// Read a source either over HTTP(S) or from the local filesystem.
async fn bytes_from_src(src: &str) -> Result<Vec<u8>, CheckerBuildError> {
    if src.starts_with("http://") || src.starts_with("https://") {
        let client = reqwest::Client::builder()
            .timeout(HTTP_FETCH_TIMEOUT)
            .build()
            .map_err(|source| CheckerBuildError::FetchSource {
                src: src.to_string(),
                source,
            })?;

        let response = client
            .get(src)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| CheckerBuildError::FetchSource {
                src: src.to_string(),
                source,
            })?;

        let body = response
            .bytes()
            .await
            .map_err(|source| CheckerBuildError::FetchSource {
                src: src.to_string(),
                source,
            })?;

        return Ok(body.to_vec());
    }

    tokio::fs::read(src)
        .await
        .map_err(|source| CheckerBuildError::ReadSource {
            src: src.to_string(),
            source,
        })
}

/// Parse an address or CIDR; a bare address gets a full-length mask.
fn parse_ip_or_cidr(entry: &str) -> Result<IpNet, String> {
    if entry.contains('/') {
        return entry.parse::<IpNet>().map_err(|e| e.to_string());
    }

    entry
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|e| e.to_string())
}

/// Newline-separated entries; `#` starts a comment, malformed entries are
/// logged and skipped.
fn parse_txt(data: &[u8]) -> PrefixSet {
    let mut prefixes = PrefixSet::new();

    for line in String::from_utf8_lossy(data).lines() {
        let entry = line.split('#').next().unwrap_or("").trim();
        if entry.is_empty() {
            continue;
        }

        match parse_ip_or_cidr(entry) {
            Ok(net) => prefixes.insert(net),
            Err(e) => warn!(entry = %entry, error = %e, "cannot parse list entry"),
        }
    }

    prefixes
}

#[derive(Deserialize)]
struct AwsIpRanges {
    prefixes: Vec<AwsPrefix>,
}

#[derive(Deserialize)]
struct AwsPrefix {
    ip_prefix: String,
    service: String,
}

/// AWS-published `ip-ranges.json`; only prefixes of filtered services count.
fn parse_aws_ip_ranges(
    source: &ListSourceConfig,
    data: &[u8],
) -> Result<PrefixSet, CheckerBuildError> {
    if source.aws_service_filter.is_empty() {
        return Err(CheckerBuildError::MissingServiceFilter {
            src: source.src.clone(),
        });
    }

    let ranges: AwsIpRanges =
        serde_json::from_slice(data).map_err(|e| CheckerBuildError::AwsIpRanges {
            src: source.src.clone(),
            source: e,
        })?;

    let mut prefixes = PrefixSet::new();

    for range in &ranges.prefixes {
        if !source.aws_service_filter.contains(&range.service) {
            continue;
        }

        match parse_ip_or_cidr(&range.ip_prefix) {
            Ok(net) => prefixes.insert(net),
            Err(e) => warn!(entry = %range.ip_prefix, error = %e, "cannot parse aws prefix"),
        }
    }

    Ok(prefixes)
}
