//! GeoIP country checker.
//!
//! Looks up the record address in a MaxMind-format country database and
//! whitelists addresses from allowed countries; everything else is banned.
//! The looked-up ISO code is stamped onto the record as the `country` field.

use crate::chain::{HarmScore, Verdict};
use crate::config::GeoIpConfig;
use crate::error::CheckerBuildError;
use crate::record::LogRecord;
use maxminddb::{Reader, geoip2};
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Field stamped with the looked-up ISO country code.
pub const COUNTRY_FIELD: &str = "country";

/// Bundled country database used when no path is configured.
const EMBEDDED_DB: &[u8] = include_bytes!("../../data/GeoLite2-Country.mmdb");

pub struct GeoIpChecker {
    db: Reader<Vec<u8>>,
    allowed_countries: Vec<String>,
}

impl GeoIpChecker {
    pub fn new(config: &GeoIpConfig) -> Result<Self, CheckerBuildError> {
        let db = match &config.path {
            Some(path) => Reader::open_readfile(path)?,
            None => Reader::from_source(EMBEDDED_DB.to_vec())?,
        };

        info!(
            db = %config
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "embedded".to_string()),
            allowed = ?config.allowed_countries,
            "geoip checker created"
        );

        Ok(Self {
            db,
            allowed_countries: config.allowed_countries.clone(),
        })
    }

    pub fn check(&self, record: &mut LogRecord) -> (HarmScore, Verdict) {
        let Some(ip) = record.ip() else {
            return (0, Verdict::None);
        };

        // The bundled database (and most country databases configured here)
        // only index IPv4; let later checkers decide for IPv6 clients.
        if matches!(ip, IpAddr::V6(_)) && self.db.metadata.ip_version == 4 {
            debug!(ip = %ip, "geoip: IPv6 address with IPv4-only database");
            return (0, Verdict::None);
        }

        let entry = match self.db.lookup::<geoip2::Country>(ip) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(ip = %ip, error = %e, "geoip lookup failed");
                return (0, Verdict::None);
            }
        };

        // An address with no entry is a miss, not an error: the empty code
        // never matches an allow-list, so the verdict falls to Ban.
        let iso_code = entry
            .and_then(|c| c.country)
            .and_then(|c| c.iso_code)
            .unwrap_or_default()
            .to_string();

        record.set(COUNTRY_FIELD, &iso_code);

        if self.allowed_countries.iter().any(|c| *c == iso_code) {
            (0, Verdict::Whitelist)
        } else {
            (0, Verdict::Ban)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(allowed: &[&str]) -> GeoIpChecker {
        GeoIpChecker::new(&GeoIpConfig {
            path: None,
            allowed_countries: allowed.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    fn record(ip: &str) -> LogRecord {
        LogRecord::new(ip.parse().ok())
    }

    #[test]
    fn allowed_country_whitelists_and_stamps() {
        let checker = checker(&["RU"]);
        let mut rec = record("77.88.55.60");

        assert_eq!(checker.check(&mut rec), (0, Verdict::Whitelist));
        assert_eq!(rec.get(COUNTRY_FIELD), Some("RU"));
    }

    #[test]
    fn other_country_bans() {
        let checker = checker(&["RU"]);
        let mut rec = record("66.249.66.1");

        assert_eq!(checker.check(&mut rec), (0, Verdict::Ban));
        assert_eq!(rec.get(COUNTRY_FIELD), Some("US"));
    }

    #[test]
    fn unknown_address_gets_empty_country_and_bans() {
        let checker = checker(&["RU"]);
        let mut rec = record("192.0.2.1");

        assert_eq!(checker.check(&mut rec), (0, Verdict::Ban));
        assert_eq!(rec.get(COUNTRY_FIELD), Some(""));
    }

    #[test]
    fn ipv6_with_v4_database_has_no_opinion() {
        let checker = checker(&["RU"]);
        let mut rec = record("2001:db8::1");

        assert_eq!(checker.check(&mut rec), (0, Verdict::None));
        assert_eq!(rec.get(COUNTRY_FIELD), None);
    }

    #[test]
    fn missing_ip_has_no_opinion() {
        let checker = checker(&["RU"]);
        let mut rec = LogRecord::new(None);
        assert_eq!(checker.check(&mut rec), (0, Verdict::None));
    }
}
