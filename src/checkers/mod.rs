//! Record classifiers.
//!
//! A checker inspects one record and either contributes a harm score or
//! short-circuits the chain with an instant verdict. Checkers are built once
//! at startup from configuration and are immutable afterwards.

pub mod field;
pub mod geoip;
pub mod list;
pub mod reverse_dns;

pub use field::FieldChecker;
pub use geoip::GeoIpChecker;
pub use list::{ListChecker, PrefixSet};
pub use reverse_dns::{Resolve, ResolverPool, ReverseDnsChecker, ReverseDnsRule};

use crate::chain::{HarmScore, Verdict};
use crate::config::CheckerConfig;
use crate::error::CheckerBuildError;
use crate::record::LogRecord;

/// A classifier plus its name tag, as a single value.
pub enum Checker {
    GeoIp(GeoIpChecker),
    List(ListChecker),
    Field(FieldChecker),
    ReverseDns(ReverseDnsChecker),
    #[cfg(test)]
    Static(StaticChecker),
}

impl Checker {
    /// Build one checker from its configuration block.
    pub async fn from_config(config: &CheckerConfig) -> Result<Self, CheckerBuildError> {
        match config {
            CheckerConfig::Geoip(cfg) => Ok(Checker::GeoIp(GeoIpChecker::new(cfg)?)),
            CheckerConfig::List(cfg) => Ok(Checker::List(ListChecker::new(cfg).await?)),
            CheckerConfig::Field(cfg) => Ok(Checker::Field(FieldChecker::new(cfg))),
            CheckerConfig::ReverseDns(cfg) => {
                Ok(Checker::ReverseDns(ReverseDnsChecker::new(cfg)?))
            }
        }
    }

    /// Name tag used for logging and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Checker::GeoIp(_) => "geoip",
            Checker::List(_) => "list",
            Checker::Field(_) => "field",
            Checker::ReverseDns(_) => "reverse_dns",
            #[cfg(test)]
            Checker::Static(_) => "static",
        }
    }

    /// Evaluate one record.
    pub async fn check(&self, record: &mut LogRecord) -> (HarmScore, Verdict) {
        match self {
            Checker::GeoIp(checker) => checker.check(record),
            Checker::List(checker) => checker.check(record),
            Checker::Field(checker) => checker.check(record),
            Checker::ReverseDns(checker) => checker.check(record).await,
            #[cfg(test)]
            Checker::Static(checker) => checker.check(record),
        }
    }
}

/// Fixed-answer checker for chain tests.
#[cfg(test)]
pub struct StaticChecker {
    score: HarmScore,
    verdict: Verdict,
}

#[cfg(test)]
impl StaticChecker {
    pub fn new(score: HarmScore, verdict: Verdict) -> Self {
        Self { score, verdict }
    }

    pub fn check(&self, _record: &mut LogRecord) -> (HarmScore, Verdict) {
        (self.score, self.verdict)
    }
}
