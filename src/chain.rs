//! The decision chain: an ordered pipeline of checkers evaluating a record.
//!
//! Checkers run in configuration order. A checker either contributes a harm
//! score (`Verdict::None`) or short-circuits the chain with an instant
//! verdict. When no checker short-circuits, the record is denied iff the
//! accumulated score is strictly positive.

use crate::checkers::Checker;
use crate::config::CheckerConfig;
use crate::error::CheckerBuildError;
use crate::record::LogRecord;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Integer contribution toward a default-ban decision.
pub type HarmScore = i64;

/// A single checker's opinion about a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No opinion; the contributed score is added to the running total.
    None,
    /// Short-circuit block.
    Ban,
    /// Short-circuit allow.
    Whitelist,
}

/// Final outcome of a chain evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Field stamped with the name of the checker that decided the record.
pub const CHECKER_FIELD: &str = "checker";

/// Field stamped with the accumulated harm score.
pub const SCORE_FIELD: &str = "score";

/// Sentinel checker name used when the verdict came from score arithmetic.
pub const SCORE_SENTINEL: &str = "score";

/// Callback observing per-checker evaluation wall time, keyed by checker name.
pub type DurationObserver = Arc<dyn Fn(&str, Duration) + Send + Sync>;

/// Ordered pipeline of checkers.
pub struct Chain {
    checkers: Vec<Checker>,
    observer: Option<DurationObserver>,
}

impl Chain {
    pub fn new(checkers: Vec<Checker>) -> Self {
        Self {
            checkers,
            observer: None,
        }
    }

    /// Build the chain from configuration, preserving declaration order.
    pub async fn from_config(configs: &[CheckerConfig]) -> Result<Self, CheckerBuildError> {
        let mut checkers = Vec::with_capacity(configs.len());

        for config in configs {
            checkers.push(Checker::from_config(config).await?);
        }

        Ok(Self::new(checkers))
    }

    /// Attach a duration observer; called once per checker per record.
    pub fn with_observer(mut self, observer: DurationObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Evaluate a record against every checker in order.
    ///
    /// Stamps `checker` and `score` on the record before returning. The harm
    /// contributed by a short-circuiting checker is ignored: an instant
    /// verdict overrides score arithmetic.
    pub async fn evaluate(&self, record: &mut LogRecord) -> Decision {
        let mut total: HarmScore = 0;

        for checker in &self.checkers {
            let started = Instant::now();
            let (score, verdict) = checker.check(record).await;

            if let Some(observer) = &self.observer {
                observer(checker.name(), started.elapsed());
            }

            match verdict {
                Verdict::None => total += score,
                Verdict::Whitelist => {
                    stamp(record, checker.name(), total);
                    return Decision::Allow;
                }
                Verdict::Ban => {
                    stamp(record, checker.name(), total);
                    return Decision::Deny;
                }
            }
        }

        stamp(record, SCORE_SENTINEL, total);

        if total > 0 {
            Decision::Deny
        } else {
            Decision::Allow
        }
    }
}

fn stamp(record: &mut LogRecord, checker: &str, score: HarmScore) {
    record.set(CHECKER_FIELD, checker);
    record.set(SCORE_FIELD, score.to_string());
}
