//! Reverse-DNS verification checker.
//!
//! Rule-based: a rule triggers when a record field contains one of its
//! trigger substrings. A triggered rule reverse-resolves the record address,
//! and for every PTR name ending with an allowed domain suffix performs a
//! confirming forward lookup. Only a name that both carries an allowed
//! suffix and resolves back to the record address whitelists it; anything
//! else is an impersonator and is banned.
//!
//! Resolution goes through a round-robin pool of resolvers, each bound to a
//! configured upstream or to the host default.

use crate::chain::{HarmScore, Verdict};
use crate::config::{ReverseDnsConfig, ReverseDnsRuleConfig};
use crate::error::CheckerBuildError;
use crate::record::LogRecord;
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Deadline for each reverse and forward lookup.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default DNS port appended to bare resolver addresses.
const DEFAULT_DNS_PORT: u16 = 53;

/// A failed DNS resolution. Treated as "no opinion" at the reverse step.
#[derive(Debug, Clone, Error)]
pub enum DnsError {
    #[error("{0}")]
    Lookup(String),

    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Resolution seam; the production implementation wraps hickory.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// PTR lookup of an address. Names keep their trailing dot.
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError>;

    /// A/AAAA lookup of a name.
    async fn forward(&self, name: &str) -> Result<Vec<IpAddr>, DnsError>;
}

/// Hickory-backed resolver with per-lookup timeouts.
pub struct HickoryResolver {
    inner: TokioResolver,
}

impl HickoryResolver {
    /// Resolver using the host's stub configuration.
    pub fn system_default() -> Self {
        let inner = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });

        Self { inner }
    }

    /// Resolver bound to one specific upstream (UDP with TCP fallback).
    pub fn for_upstream(addr: SocketAddr) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);
        let inner =
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default()).build();

        Self { inner }
    }
}

#[async_trait]
impl Resolve for HickoryResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        match tokio::time::timeout(LOOKUP_TIMEOUT, self.inner.reverse_lookup(ip)).await {
            Ok(Ok(lookup)) => Ok(lookup.iter().map(|ptr| ptr.to_string()).collect()),
            Ok(Err(e)) => Err(DnsError::Lookup(e.to_string())),
            Err(_) => Err(DnsError::Timeout(LOOKUP_TIMEOUT)),
        }
    }

    async fn forward(&self, name: &str) -> Result<Vec<IpAddr>, DnsError> {
        match tokio::time::timeout(LOOKUP_TIMEOUT, self.inner.lookup_ip(name)).await {
            Ok(Ok(lookup)) => Ok(lookup.iter().collect()),
            Ok(Err(e)) => Err(DnsError::Lookup(e.to_string())),
            Err(_) => Err(DnsError::Timeout(LOOKUP_TIMEOUT)),
        }
    }
}

/// Round-robin collection of resolvers. At least one is always present.
pub struct ResolverPool {
    resolvers: Vec<Arc<dyn Resolve>>,
    next: AtomicUsize,
}

impl ResolverPool {
    /// Pool over the given resolvers; empty falls back to the host default.
    pub fn new(resolvers: Vec<Arc<dyn Resolve>>) -> Self {
        let resolvers = if resolvers.is_empty() {
            vec![Arc::new(HickoryResolver::system_default()) as Arc<dyn Resolve>]
        } else {
            resolvers
        };

        Self {
            resolvers,
            next: AtomicUsize::new(0),
        }
    }

    /// Pool from configured upstream addresses. A bare address gets port 53.
    pub fn from_addrs(addrs: &[String]) -> Result<Self, CheckerBuildError> {
        let mut resolvers: Vec<Arc<dyn Resolve>> = Vec::with_capacity(addrs.len());

        for addr in addrs {
            let sock = parse_resolver_addr(addr)?;
            resolvers.push(Arc::new(HickoryResolver::for_upstream(sock)));
        }

        Ok(Self::new(resolvers))
    }

    /// Next resolver, round-robin with modulo wrap.
    pub fn pick(&self) -> Arc<dyn Resolve> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.resolvers.len();
        Arc::clone(&self.resolvers[index])
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Always false: construction guarantees at least one resolver.
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

fn parse_resolver_addr(addr: &str) -> Result<SocketAddr, CheckerBuildError> {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Ok(sock);
    }

    // Bare address without a port.
    addr.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|e| CheckerBuildError::InvalidResolver {
            addr: addr.to_string(),
            reason: e.to_string(),
        })
}

/// One verification rule.
pub struct ReverseDnsRule {
    field: String,
    field_contains: Vec<String>,
    domain_suffixes: Vec<String>,
    pool: ResolverPool,
}

impl ReverseDnsRule {
    pub fn new(
        field: impl Into<String>,
        field_contains: Vec<String>,
        domain_suffixes: Vec<String>,
        pool: ResolverPool,
    ) -> Result<Self, CheckerBuildError> {
        let field = field.into();

        if field.is_empty() {
            return Err(CheckerBuildError::InvalidRule("field is empty".to_string()));
        }
        if field_contains.is_empty() {
            return Err(CheckerBuildError::InvalidRule(
                "field_contains is empty".to_string(),
            ));
        }
        if domain_suffixes.is_empty() {
            return Err(CheckerBuildError::InvalidRule(
                "domain_suffixes is empty".to_string(),
            ));
        }

        Ok(Self {
            field,
            field_contains,
            domain_suffixes,
            pool,
        })
    }

    fn from_config(config: &ReverseDnsRuleConfig) -> Result<Self, CheckerBuildError> {
        let pool = ResolverPool::from_addrs(config.resolver.as_slice())?;

        info!(
            field = %config.field,
            contains = ?config.field_contains,
            suffixes = ?config.domain_suffixes,
            resolvers = pool.len(),
            "reverse dns rule created"
        );

        Self::new(
            config.field.clone(),
            config.field_contains.clone(),
            config.domain_suffixes.clone(),
            pool,
        )
    }

    /// Whether this rule applies to the record at all.
    fn matches(&self, record: &LogRecord) -> bool {
        let Some(value) = record.get(&self.field) else {
            return false;
        };

        self.field_contains
            .iter()
            .any(|needle| value.contains(needle))
    }

    fn has_allowed_suffix(&self, name: &str) -> bool {
        self.domain_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix))
    }

    /// Reverse-then-forward confirmation of an address.
    ///
    /// A reverse-lookup DNS failure yields no opinion. A forward-lookup
    /// failure escapes to the caller as a hard error.
    async fn verify(&self, ip: IpAddr) -> Result<Verdict, DnsError> {
        let resolver = self.pool.pick();

        let names = match resolver.reverse(ip).await {
            Ok(names) => names,
            Err(e) => {
                debug!(ip = %ip, error = %e, "reverse lookup failed, no opinion");
                return Ok(Verdict::None);
            }
        };

        for raw in &names {
            let name = raw.strip_suffix('.').unwrap_or(raw);

            if !self.has_allowed_suffix(name) {
                continue;
            }

            let addrs = resolver.forward(name).await?;
            if addrs.contains(&ip) {
                return Ok(Verdict::Whitelist);
            }
        }

        Ok(Verdict::Ban)
    }
}

/// Checker over an ordered rule set; the first triggered rule decides.
pub struct ReverseDnsChecker {
    rules: Vec<ReverseDnsRule>,
}

impl ReverseDnsChecker {
    pub fn new(config: &ReverseDnsConfig) -> Result<Self, CheckerBuildError> {
        let rules = config
            .rules
            .iter()
            .map(ReverseDnsRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_rules(rules))
    }

    pub fn from_rules(rules: Vec<ReverseDnsRule>) -> Self {
        Self { rules }
    }

    pub async fn check(&self, record: &mut LogRecord) -> (HarmScore, Verdict) {
        for rule in &self.rules {
            if !rule.matches(record) {
                continue;
            }

            let Some(ip) = record.ip() else {
                return (0, Verdict::None);
            };

            return match rule.verify(ip).await {
                Ok(verdict) => (0, verdict),
                Err(e) => {
                    warn!(ip = %ip, error = %e, "reverse dns verification failed");
                    (0, Verdict::None)
                }
            };
        }

        (0, Verdict::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockResolver {
        reverse: Option<Result<Vec<String>, DnsError>>,
        forward: HashMap<String, Result<Vec<IpAddr>, DnsError>>,
    }

    impl MockResolver {
        fn with_reverse(names: &[&str]) -> Self {
            Self {
                reverse: Some(Ok(names.iter().map(|s| s.to_string()).collect())),
                ..Self::default()
            }
        }

        fn reverse_error(error: DnsError) -> Self {
            Self {
                reverse: Some(Err(error)),
                ..Self::default()
            }
        }

        fn forward_ok(mut self, name: &str, addrs: &[&str]) -> Self {
            self.forward.insert(
                name.to_string(),
                Ok(addrs.iter().map(|s| s.parse().unwrap()).collect()),
            );
            self
        }

        fn forward_error(mut self, name: &str, error: DnsError) -> Self {
            self.forward.insert(name.to_string(), Err(error));
            self
        }
    }

    #[async_trait]
    impl Resolve for MockResolver {
        async fn reverse(&self, _ip: IpAddr) -> Result<Vec<String>, DnsError> {
            self.reverse.clone().expect("unexpected reverse lookup")
        }

        async fn forward(&self, name: &str) -> Result<Vec<IpAddr>, DnsError> {
            self.forward
                .get(name)
                .cloned()
                .unwrap_or_else(|| Err(DnsError::Lookup(format!("no mock entry for {name}"))))
        }
    }

    fn googlebot_rule(resolver: MockResolver) -> ReverseDnsRule {
        ReverseDnsRule::new(
            "user_agent",
            vec!["Googlebot".to_string(), "googlebot".to_string()],
            vec!["googlebot.com".to_string(), "google.com".to_string()],
            ResolverPool::new(vec![Arc::new(resolver)]),
        )
        .unwrap()
    }

    fn record(ip: &str, agent: &str) -> LogRecord {
        let mut record = LogRecord::new(ip.parse().ok());
        record.set("user_agent", agent);
        record
    }

    #[tokio::test]
    async fn genuine_crawler_is_whitelisted() {
        let resolver = MockResolver::with_reverse(&["crawl-66-249-66-1.googlebot.com."])
            .forward_ok("crawl-66-249-66-1.googlebot.com", &["66.249.66.1"]);
        let checker = ReverseDnsChecker::from_rules(vec![googlebot_rule(resolver)]);

        let mut rec = record("66.249.66.1", "Googlebot/2.1");
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::Whitelist));
    }

    #[tokio::test]
    async fn impersonator_is_banned() {
        // PTR carries an allowed suffix but the forward lookup resolves to a
        // different address.
        let resolver = MockResolver::with_reverse(&["fake-66-249-66-1.googlebot.com."])
            .forward_ok("fake-66-249-66-1.googlebot.com", &["66.249.66.1"]);
        let checker = ReverseDnsChecker::from_rules(vec![googlebot_rule(resolver)]);

        let mut rec = record("3.4.5.6", "pretends to be googlebot");
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::Ban));
    }

    #[tokio::test]
    async fn wrong_suffix_is_banned_without_forward_lookup() {
        let resolver = MockResolver::with_reverse(&["host.badbot.example."]);
        let checker = ReverseDnsChecker::from_rules(vec![googlebot_rule(resolver)]);

        let mut rec = record("3.4.5.6", "Googlebot impostor");
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::Ban));
    }

    #[tokio::test]
    async fn reverse_dns_error_has_no_opinion() {
        let resolver = MockResolver::reverse_error(DnsError::Lookup("NXDomain".to_string()));
        let checker = ReverseDnsChecker::from_rules(vec![googlebot_rule(resolver)]);

        let mut rec = record("66.249.66.1", "Googlebot/2.1");
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::None));
    }

    #[tokio::test]
    async fn reverse_timeout_has_no_opinion() {
        let resolver = MockResolver::reverse_error(DnsError::Timeout(LOOKUP_TIMEOUT));
        let checker = ReverseDnsChecker::from_rules(vec![googlebot_rule(resolver)]);

        let mut rec = record("66.249.66.1", "Googlebot/2.1");
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::None));
    }

    #[tokio::test]
    async fn forward_error_escapes_as_no_opinion() {
        let resolver = MockResolver::with_reverse(&["crawl-66-249-66-1.googlebot.com."])
            .forward_error(
                "crawl-66-249-66-1.googlebot.com",
                DnsError::Lookup("servfail".to_string()),
            );
        let checker = ReverseDnsChecker::from_rules(vec![googlebot_rule(resolver)]);

        let mut rec = record("66.249.66.1", "Googlebot/2.1");
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::None));
    }

    #[tokio::test]
    async fn non_triggering_record_skips_verification() {
        let resolver = MockResolver::default(); // would panic on reverse()
        let checker = ReverseDnsChecker::from_rules(vec![googlebot_rule(resolver)]);

        let mut rec = record("66.249.66.1", "Mozilla/5.0");
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::None));

        let mut rec = LogRecord::new("66.249.66.1".parse().ok());
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::None));
    }

    #[tokio::test]
    async fn first_triggered_rule_decides() {
        let banning = MockResolver::with_reverse(&["host.elsewhere.example."]);
        let first = googlebot_rule(banning);

        // The second rule would whitelist the same record, but it never runs.
        let whitelisting = MockResolver::with_reverse(&["crawl.googlebot.com."])
            .forward_ok("crawl.googlebot.com", &["66.249.66.1"]);
        let second = googlebot_rule(whitelisting);

        let checker = ReverseDnsChecker::from_rules(vec![first, second]);
        let mut rec = record("66.249.66.1", "Googlebot/2.1");
        assert_eq!(checker.check(&mut rec).await, (0, Verdict::Ban));
    }

    #[tokio::test]
    async fn pool_round_robin_wraps() {
        let a: Arc<dyn Resolve> = Arc::new(MockResolver::default());
        let b: Arc<dyn Resolve> = Arc::new(MockResolver::default());
        let pool = ResolverPool::new(vec![Arc::clone(&a), Arc::clone(&b)]);

        assert!(Arc::ptr_eq(&pool.pick(), &a));
        assert!(Arc::ptr_eq(&pool.pick(), &b));
        assert!(Arc::ptr_eq(&pool.pick(), &a));
        assert!(Arc::ptr_eq(&pool.pick(), &b));
    }

    #[tokio::test]
    async fn empty_pool_falls_back_to_host_default() {
        let pool = ResolverPool::new(Vec::new());
        assert!(!pool.is_empty());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn resolver_addr_normalization() {
        assert_eq!(
            parse_resolver_addr("8.8.8.8").unwrap(),
            "8.8.8.8:53".parse().unwrap()
        );
        assert_eq!(
            parse_resolver_addr("8.8.8.8:5353").unwrap(),
            "8.8.8.8:5353".parse().unwrap()
        );
        assert_eq!(
            parse_resolver_addr("::1").unwrap(),
            "[::1]:53".parse().unwrap()
        );
        assert!(parse_resolver_addr("ns1.example.com").is_err());
    }

    #[test]
    fn rule_validation_rejects_empty_parts() {
        let pool = || ResolverPool::new(vec![Arc::new(MockResolver::default()) as Arc<dyn Resolve>]);

        assert!(ReverseDnsRule::new("", vec!["x".into()], vec!["y".into()], pool()).is_err());
        assert!(ReverseDnsRule::new("f", vec![], vec!["y".into()], pool()).is_err());
        assert!(ReverseDnsRule::new("f", vec!["x".into()], vec![], pool()).is_err());
    }
}
