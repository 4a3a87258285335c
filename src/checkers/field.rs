//! Field-substring checker.

use crate::chain::{HarmScore, Verdict};
use crate::config::{FieldConfig, RuleAction};
use crate::record::LogRecord;
use tracing::info;

/// Matches a record field against configured substrings.
///
/// Matching is case-sensitive, plain byte-wise `contains`. A record without
/// the field yields no opinion.
pub struct FieldChecker {
    field: String,
    contains: Vec<String>,
    action: RuleAction,
}

impl FieldChecker {
    pub fn new(config: &FieldConfig) -> Self {
        info!(
            field = %config.field_name,
            contains = ?config.contains,
            action = ?config.action,
            "field checker created"
        );

        Self {
            field: config.field_name.clone(),
            contains: config.contains.clone(),
            action: config.action,
        }
    }

    pub fn check(&self, record: &mut LogRecord) -> (HarmScore, Verdict) {
        let Some(value) = record.get(&self.field) else {
            return (0, Verdict::None);
        };

        if self.contains.iter().any(|needle| value.contains(needle)) {
            let verdict = match self.action {
                RuleAction::Whitelist => Verdict::Whitelist,
                RuleAction::Block => Verdict::Ban,
            };
            return (0, verdict);
        }

        (0, Verdict::None)
    }
}
