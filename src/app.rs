//! The ingest loop tying the pipeline together.
//!
//! Per record, in order: pass-cache hit drops it, block-cache hit drops it,
//! otherwise the chain decides. A ban goes to the block-cache, the block log
//! and the external action; anything else goes to the pass-cache. Handling
//! is strictly sequential, and action failures never halt the loop.

use crate::action::Action;
use crate::blocklog::BlockLog;
use crate::cache::IpCache;
use crate::chain::{Chain, Decision};
use crate::metrics;
use crate::record::LogRecord;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct AppCore {
    chain: Chain,
    action: Action,
    blocklog: BlockLog,
    pass_cache: Arc<IpCache>,
    block_cache: Arc<IpCache>,
}

impl AppCore {
    pub fn new(
        chain: Chain,
        action: Action,
        blocklog: BlockLog,
        pass_cache: Arc<IpCache>,
        block_cache: Arc<IpCache>,
    ) -> Self {
        Self {
            chain,
            action,
            blocklog,
            pass_cache,
            block_cache,
        }
    }

    /// Drain the record stream until the producer closes it.
    pub async fn run(&mut self, mut records: mpsc::Receiver<LogRecord>) {
        while let Some(record) = records.recv().await {
            metrics::RECORDS_TOTAL.inc();
            self.handle(record).await;
        }
    }

    async fn handle(&mut self, mut record: LogRecord) {
        let key = record.ip().map(|ip| ip.to_string());

        if let Some(key) = &key {
            if self.pass_cache.contains(key) {
                debug!(ip = %key, "in pass cache");
                metrics::record_outcome(metrics::OUTCOME_CACHED_PASS);
                return;
            }

            if self.block_cache.contains(key) {
                debug!(ip = %key, "in block cache");
                metrics::record_outcome(metrics::OUTCOME_CACHED_BLOCK);
                return;
            }
        }

        match self.chain.evaluate(&mut record).await {
            Decision::Deny => {
                if let Some(ip) = record.ip() {
                    self.block_cache.add(ip);
                }

                // The ban line is flushed before the action runs.
                if let Err(e) = self.blocklog.println(&record) {
                    warn!(error = %e, "cannot write block log");
                }

                // A record with no usable address cannot be blocked upstream.
                if record.ip().is_some() {
                    if let Err(e) = self.action.execute(&record).await {
                        metrics::ACTION_FAILURES.inc();
                        warn!(error = %e, "cannot execute block action");
                    }
                }

                metrics::record_outcome(metrics::OUTCOME_BAN);
            }
            Decision::Allow => {
                if let Some(ip) = record.ip() {
                    self.pass_cache.add(ip);
                }
                metrics::record_outcome(metrics::OUTCOME_PASS);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklog::BlockLog;
    use crate::checkers::{Checker, FieldChecker};
    use crate::config::{FieldConfig, RuleAction};
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn blocking_field_checker() -> Checker {
        Checker::Field(FieldChecker::new(&FieldConfig {
            field_name: "user_agent".to_string(),
            contains: vec!["EvilBot".to_string()],
            action: RuleAction::Block,
        }))
    }

    fn record(ip: &str, agent: &str) -> LogRecord {
        let mut record = LogRecord::new(ip.parse().ok());
        record.set("user_agent", agent);
        record
    }

    struct Fixture {
        core: AppCore,
        pass_cache: Arc<IpCache>,
        block_cache: Arc<IpCache>,
        blocklog: SharedBuf,
        evaluations: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let evaluations = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new(vec![blocking_field_checker()]).with_observer({
            let evaluations = Arc::clone(&evaluations);
            Arc::new(move |_, _| {
                evaluations.fetch_add(1, Ordering::SeqCst);
            })
        });

        let pass_cache = Arc::new(IpCache::in_memory(1000));
        let block_cache = Arc::new(IpCache::in_memory(1000));
        let blocklog = SharedBuf::default();
        let printer =
            BlockLog::from_writer(Box::new(blocklog.clone()), "{{ ip }} {{ checker }}").unwrap();

        let core = AppCore::new(
            chain,
            Action::new(Vec::new()).unwrap(),
            printer,
            Arc::clone(&pass_cache),
            Arc::clone(&block_cache),
        );

        Fixture {
            core,
            pass_cache,
            block_cache,
            blocklog,
            evaluations,
        }
    }

    async fn run_records(fixture: &mut Fixture, records: Vec<LogRecord>) {
        let (tx, rx) = mpsc::channel(1);
        let feeder = tokio::spawn(async move {
            for record in records {
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        });

        fixture.core.run(rx).await;
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn banned_record_goes_to_block_cache_and_log() {
        let mut fx = fixture();
        run_records(&mut fx, vec![record("203.0.113.5", "EvilBot/1.0")]).await;

        assert!(fx.block_cache.contains("203.0.113.5"));
        assert!(!fx.pass_cache.contains("203.0.113.5"));

        let log = String::from_utf8(fx.blocklog.0.lock().clone()).unwrap();
        assert_eq!(log, "203.0.113.5 field\n");
    }

    #[tokio::test]
    async fn clean_record_goes_to_pass_cache() {
        let mut fx = fixture();
        run_records(&mut fx, vec![record("198.51.100.9", "Mozilla/5.0")]).await;

        assert!(fx.pass_cache.contains("198.51.100.9"));
        assert!(fx.block_cache.is_empty());
    }

    #[tokio::test]
    async fn cached_ip_skips_the_chain() {
        let mut fx = fixture();
        run_records(
            &mut fx,
            vec![
                record("198.51.100.9", "Mozilla/5.0"),
                record("198.51.100.9", "Mozilla/5.0"),
                record("198.51.100.9", "EvilBot/1.0"), // cached pass wins, chain never sees it
            ],
        )
        .await;

        // Only the first occurrence traversed the chain.
        assert_eq!(fx.evaluations.load(Ordering::SeqCst), 1);
        assert!(fx.pass_cache.contains("198.51.100.9"));
        assert!(fx.block_cache.is_empty());
    }

    #[tokio::test]
    async fn blocked_ip_is_dropped_by_block_cache() {
        let mut fx = fixture();
        run_records(
            &mut fx,
            vec![
                record("203.0.113.5", "EvilBot/1.0"),
                record("203.0.113.5", "EvilBot/1.0"),
            ],
        )
        .await;

        assert_eq!(fx.evaluations.load(Ordering::SeqCst), 1);
        let log = String::from_utf8(fx.blocklog.0.lock().clone()).unwrap();
        // One ban event, not two.
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn record_without_ip_is_never_cached() {
        let mut fx = fixture();
        run_records(&mut fx, vec![LogRecord::new(None)]).await;

        assert!(fx.pass_cache.is_empty());
        assert!(fx.block_cache.is_empty());
        // It still traversed the chain.
        assert_eq!(fx.evaluations.load(Ordering::SeqCst), 1);
    }
}
