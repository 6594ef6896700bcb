use logwell::config::types::{ReadStart, WatchConfig};
use logwell::pipeline::Coordinator;
use logwell::processor::{processor_fn, ProcessorChain, ProcessorError, ProcessorRegistry};
use logwell::record::{Annotation, Level};
use logwell::source::{FileWatcher, LineParser};
use logwell::storage::{MemoryStorage, RecordFilter, Storage};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn watch_config() -> WatchConfig {
    WatchConfig {
        poll_interval: Duration::ZERO,
        ..WatchConfig::default()
    }
}

fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
}

fn coordinator_for(path: &Path, chain: ProcessorChain) -> Coordinator {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(1000).unwrap());
    let mut watcher = FileWatcher::new(watch_config());
    watcher.watch_file(path, None, ReadStart::Beginning);
    Coordinator::new(watcher, LineParser::with_defaults(), chain, storage)
}

async fn raws(coordinator: &Coordinator) -> Vec<String> {
    coordinator
        .handle()
        .query(&RecordFilter::all())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.raw)
        .collect()
}

#[tokio::test]
async fn test_three_line_scenario() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.log");
    let mut coordinator = coordinator_for(&path, ProcessorChain::new());

    append(&path, "2024 INFO hello\ngarbage\n2024 ERROR boom\n");
    let report = coordinator.run_cycle().await.unwrap();
    assert_eq!(report.stored, 3);

    let handle = coordinator.handle();
    let records = handle.query(&RecordFilter::all()).await.unwrap();
    let summary: Vec<(u64, Level)> = records.iter().map(|r| (r.id, r.level)).collect();
    assert_eq!(
        summary,
        vec![(1, Level::Info), (2, Level::Unknown), (3, Level::Error)]
    );
    assert_eq!(records[1].message, "garbage");
    assert_eq!(records[0].source, path.display().to_string());

    let errors = handle
        .query(&RecordFilter::with_level(Level::Error))
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].id, 3);
    assert_eq!(errors[0].raw, "2024 ERROR boom");
}

#[tokio::test]
async fn test_no_loss_no_duplication_across_cycles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let mut coordinator = coordinator_for(&path, ProcessorChain::new());

    // Missing file is not an error
    assert_eq!(coordinator.run_cycle().await.unwrap().lines, 0);

    append(&path, "line 1\nline 2\n");
    coordinator.run_cycle().await.unwrap();

    // Partial line is held back until its newline arrives
    append(&path, "line 3\nline ");
    coordinator.run_cycle().await.unwrap();
    coordinator.run_cycle().await.unwrap();
    append(&path, "4\n\nline 6\n");
    coordinator.run_cycle().await.unwrap();
    coordinator.run_cycle().await.unwrap();

    assert_eq!(
        raws(&coordinator).await,
        vec!["line 1", "line 2", "line 3", "line 4", "", "line 6"]
    );
}

#[tokio::test]
async fn test_truncation_only_yields_new_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let mut coordinator = coordinator_for(&path, ProcessorChain::new());

    append(&path, "old one\nold two\n");
    coordinator.run_cycle().await.unwrap();

    std::fs::File::create(&path).unwrap();
    append(&path, "new\n");
    coordinator.run_cycle().await.unwrap();

    assert_eq!(raws(&coordinator).await, vec!["old one", "old two", "new"]);
}

#[tokio::test]
async fn test_same_size_rewrite_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let mut coordinator = coordinator_for(&path, ProcessorChain::new());

    append(&path, "aaaa\n");
    coordinator.run_cycle().await.unwrap();

    // Truncated and refilled past the old size before the next poll
    std::fs::write(&path, "bbbb\ncccc\n").unwrap();
    coordinator.run_cycle().await.unwrap();

    assert_eq!(raws(&coordinator).await, vec!["aaaa", "bbbb", "cccc"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_rotation_by_rename() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let mut coordinator = coordinator_for(&path, ProcessorChain::new());

    append(&path, "before rotation\n");
    coordinator.run_cycle().await.unwrap();

    std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
    append(&path, "after rotation, longer than before\n");
    coordinator.run_cycle().await.unwrap();

    assert_eq!(
        raws(&coordinator).await,
        vec!["before rotation", "after rotation, longer than before"]
    );
}

#[tokio::test]
async fn test_failing_processor_never_blocks_others_or_storage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");

    let mut chain = ProcessorChain::new();
    chain.register(
        "always_fails",
        processor_fn(|_| Err(ProcessorError::Failed("boom".to_string()))),
    );
    chain.register("always_panics", processor_fn(|_| panic!("bug")));
    chain.register(
        "tagger",
        processor_fn(|entry| {
            let mut annotation = Annotation::new();
            annotation.insert("len".to_string(), json!(entry.raw.len()));
            Ok(Some(annotation))
        }),
    );
    let mut coordinator = coordinator_for(&path, chain);

    append(&path, "INFO: one\nERROR: two\n");
    let report = coordinator.run_cycle().await.unwrap();
    assert_eq!(report.stored, 2);

    let records = coordinator
        .handle()
        .query(&RecordFilter::all())
        .await
        .unwrap();
    for record in &records {
        assert!(!record.annotations.contains_key("always_fails"));
        assert!(!record.annotations.contains_key("always_panics"));
        assert_eq!(record.annotations["tagger"]["len"], json!(record.raw.len()));
    }

    let stats = coordinator.handle().stats().await;
    assert_eq!(stats.processor_failures["always_fails"], 2);
    assert_eq!(stats.processor_failures["always_panics"], 2);
}

#[tokio::test]
async fn test_builtin_processors_annotate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let chain = ProcessorRegistry::with_builtins()
        .build_chain(&[
            logwell::config::types::ProcessorConfig::builtin("severity"),
            logwell::config::types::ProcessorConfig::builtin("patterns"),
        ])
        .unwrap();
    let mut coordinator = coordinator_for(&path, chain);

    append(
        &path,
        "2025-01-01T00:00:00Z INFO upload failed after 2.5 seconds\nuser logged in\n",
    );
    coordinator.run_cycle().await.unwrap();

    let handle = coordinator.handle();
    let records = handle.query(&RecordFilter::all()).await.unwrap();
    assert_eq!(
        records[0].annotations["severity"],
        json!({"level": "INFO"})
    );
    assert_eq!(
        records[0].annotations["patterns"],
        json!({"patterns": ["error", "performance"]})
    );
    assert!(records[1].annotations.is_empty());

    let flagged = handle
        .query(&RecordFilter {
            annotation: Some("patterns".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(flagged.len(), 1);
}

#[tokio::test]
async fn test_read_start_end_skips_existing_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "history\n");

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(10).unwrap());
    let mut watcher = FileWatcher::new(watch_config());
    watcher.watch_file(&path, None, ReadStart::End);
    let mut coordinator =
        Coordinator::new(watcher, LineParser::with_defaults(), ProcessorChain::new(), storage);

    coordinator.run_cycle().await.unwrap();
    append(&path, "fresh\n");
    coordinator.run_cycle().await.unwrap();

    assert_eq!(raws(&coordinator).await, vec!["fresh"]);
}
