//! End-to-end pipeline test: tailer → parser → chain → caches → block log.

use logwarden::action::Action;
use logwarden::app::AppCore;
use logwarden::blocklog::BlockLog;
use logwarden::cache::IpCache;
use logwarden::chain::Chain;
use logwarden::config::CheckerConfig;
use logwarden::parser::LogParser;
use logwarden::tailer::Tailer;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const LOG_FORMAT: &str = r#"^(?P<ip>\S+) "(?P<user_agent>[^"]*)"$"#;

async fn wait_for_content(path: &Path, predicate: impl Fn(&str) -> bool) -> String {
    for _ in 0..50 {
        if let Ok(content) = std::fs::read_to_string(path) {
            if predicate(&content) {
                return content;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "timed out waiting for {:?}, last content: {:?}",
        path,
        std::fs::read_to_string(path).unwrap_or_default()
    );
}

fn append(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    writeln!(file, "{line}").unwrap();
}

#[tokio::test]
async fn bans_flow_from_log_line_to_block_log() {
    let dir = tempfile::tempdir().unwrap();
    let access_log = dir.path().join("access.log");
    let block_log = dir.path().join("block.log");
    let block_list = dir.path().join("blocklist.txt");

    std::fs::write(&access_log, "").unwrap();
    std::fs::write(&block_list, "123.123.0.0/16\n").unwrap();

    // Chain built the same way main does: from configuration blocks.
    let yaml = format!(
        r#"
- kind: list
  sources:
    - src: {}
      type: txt
      action: block
- kind: field
  field_name: user_agent
  contains: [EvilBot]
  action: block
"#,
        block_list.display()
    );
    let configs: Vec<CheckerConfig> = serde_yaml::from_str(&yaml).unwrap();
    let chain = Chain::from_config(&configs).await.unwrap();

    let parser = LogParser::new(LOG_FORMAT).unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);
    let (tailer, records) = Tailer::spawn(access_log.clone(), parser, &shutdown_tx)
        .await
        .unwrap();

    let pass_cache = Arc::new(IpCache::in_memory(1000));
    let block_cache = Arc::new(IpCache::in_memory(1000));

    let blocklog = BlockLog::create(
        Some(&block_log),
        "{{ ip }} banned by {{ checker }} ua={{ user_agent }}",
    )
    .unwrap();

    let mut core = AppCore::new(
        chain,
        Action::new(Vec::new()).unwrap(),
        blocklog,
        Arc::clone(&pass_cache),
        Arc::clone(&block_cache),
    );
    let worker = tokio::spawn(async move { core.run(records).await });

    // Inside the blocked prefix.
    append(&access_log, r#"123.123.99.1 "Mozilla/5.0""#);
    // Clean client.
    append(&access_log, r#"198.51.100.7 "Mozilla/5.0""#);
    // Banned by user agent.
    append(&access_log, r#"203.0.113.9 "EvilBot/1.0""#);

    let content = wait_for_content(&block_log, |c| c.lines().count() >= 2).await;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "123.123.99.1 banned by list ua=Mozilla/5.0");
    assert_eq!(lines[1], "203.0.113.9 banned by field ua=EvilBot/1.0");

    // Repeat offender is dropped by the block cache: no new block-log line.
    append(&access_log, r#"123.123.99.1 "Mozilla/5.0""#);
    // A clean line afterwards proves the repeat was processed.
    append(&access_log, r#"198.51.100.8 "Mozilla/5.0""#);

    for _ in 0..50 {
        if pass_cache.contains("198.51.100.8") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(pass_cache.contains("198.51.100.7"));
    assert!(pass_cache.contains("198.51.100.8"));
    assert!(block_cache.contains("123.123.99.1"));
    assert!(block_cache.contains("203.0.113.9"));

    let content = std::fs::read_to_string(&block_log).unwrap();
    assert_eq!(content.lines().count(), 2);

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
    assert!(tailer.take_error().is_none());
}

#[tokio::test]
async fn pass_cache_file_round_trips_through_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let access_log = dir.path().join("access.log");
    let cache_path = dir.path().join("whitelist.cache");

    std::fs::write(&access_log, "").unwrap();

    let parser = LogParser::new(LOG_FORMAT).unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);
    let (_tailer, records) = Tailer::spawn(access_log.clone(), parser, &shutdown_tx)
        .await
        .unwrap();

    let pass_cache = Arc::new(IpCache::with_path(cache_path.clone(), 1000));
    let block_cache = Arc::new(IpCache::in_memory(1000));

    let mut core = AppCore::new(
        Chain::new(Vec::new()),
        Action::new(Vec::new()).unwrap(),
        BlockLog::create(Some(&dir.path().join("block.log")), "{{ ip }}").unwrap(),
        Arc::clone(&pass_cache),
        Arc::clone(&block_cache),
    );
    let worker = tokio::spawn(async move { core.run(records).await });

    append(&access_log, r#"198.51.100.77 "Mozilla/5.0""#);

    for _ in 0..50 {
        if pass_cache.contains("198.51.100.77") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(pass_cache.contains("198.51.100.77"));

    pass_cache.save().unwrap();
    let reloaded = IpCache::with_path(cache_path, 1000);
    assert!(reloaded.contains("198.51.100.77"));

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}
