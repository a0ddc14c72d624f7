//! End-to-end tests for the seed stage against in-memory sinks

mod common;

use async_trait::async_trait;
use cardvault_common::files::read_json;
use cardvault_ingest::checkpoint::{CheckpointState, CheckpointStatus, Counters};
use cardvault_ingest::error_log::ErrorLog;
use cardvault_ingest::models::{GroupRow, SinkRow};
use cardvault_ingest::seed::{
    AssetPipeline, AssetSource, MemoryAssetStore, MemorySink, PassthroughCodec, SeedOptions, Sink,
};
use cardvault_ingest::RemoteError;
use common::{cards, fast_retry, Workspace};
use std::sync::{Arc, Mutex};

/// Sink that rejects one `(set, number, language)` until told otherwise
struct FlakySink {
    inner: MemorySink,
    fail_on: Mutex<Option<(String, String, String)>>,
}

impl FlakySink {
    fn failing(set: &str, number: &str, language: &str) -> Self {
        Self {
            inner: MemorySink::new(),
            fail_on: Mutex::new(Some((set.into(), number.into(), language.into()))),
        }
    }

    fn heal(&self) {
        *self.fail_on.lock().unwrap() = None;
    }
}

#[async_trait]
impl Sink for FlakySink {
    async fn upsert_group(&self, group: &GroupRow) -> Result<(), RemoteError> {
        self.inner.upsert_group(group).await
    }

    async fn upsert_card(&self, row: &SinkRow) -> Result<(), RemoteError> {
        if self.fail_on.lock().unwrap().as_ref() == Some(&row.key()) {
            return Err(RemoteError::Status(503));
        }
        self.inner.upsert_card(row).await
    }
}

struct BrokenImageHost;

#[async_trait]
impl AssetSource for BrokenImageHost {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
        Err(RemoteError::Status(500))
    }
}

struct JpegHost;

#[async_trait]
impl AssetSource for JpegHost {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00])
    }
}

fn pipeline(source: impl AssetSource + 'static, store: Arc<MemoryAssetStore>) -> AssetPipeline {
    AssetPipeline::new(Arc::new(source), Arc::new(PassthroughCodec), store, fast_retry(), "cards")
}

/// a/en x3, a/fr x2, b/en x3, split and ready to seed
async fn split_workspace() -> Workspace {
    let mut records = cards("a", "en", 3);
    records.extend(cards("a", "fr", 2));
    records.extend(cards("b", "en", 3));
    let ws = Workspace::new(&records);
    ws.split().await;
    ws
}

fn no_images() -> SeedOptions {
    SeedOptions {
        skip_images: true,
        ..SeedOptions::default()
    }
}

fn checkpoint(ws: &Workspace) -> CheckpointState {
    read_json(ws.checkpoints().path()).unwrap()
}

// ============================================================================
// SELECTION
// ============================================================================

#[tokio::test]
async fn test_full_run_upserts_everything() {
    let ws = split_workspace().await;
    let sink = Arc::new(MemorySink::new());

    let report = ws.orchestrator(sink.clone(), None, no_images()).run().await.unwrap();

    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(
        report.totals,
        Counters {
            success: 8,
            errors: 0,
            skipped: 0
        }
    );
    assert_eq!(report.partitions_processed, 3);
    assert!(report.halted.is_none());
    assert_eq!(sink.cards().len(), 8);
    assert_eq!(sink.groups().len(), 2);

    let row = sink.card("a", "2", "fr").unwrap();
    assert_eq!(row.external_id, "a-fr-2");
    assert_eq!(row.attributes["oracle_text"], "Draw a card.");
    assert!(row.image_url.is_none());

    let state = checkpoint(&ws);
    assert_eq!(state.status, CheckpointStatus::Completed);
    assert_eq!(state.processed_files, vec!["a/en", "a/fr", "b/en"]);
    assert!(!ws.error_log_path().exists());
}

#[tokio::test]
async fn test_limit_counts_the_rest_as_skipped() {
    let ws = split_workspace().await;
    let sink = Arc::new(MemorySink::new());
    let options = SeedOptions {
        set: Some("b".into()),
        limit: Some(1),
        ..no_images()
    };

    let report = ws.orchestrator(sink.clone(), None, options).run().await.unwrap();

    assert_eq!(sink.cards().len(), 1);
    assert!(sink.card("b", "1", "en").is_some());
    assert_eq!(report.totals.success, 1);
    assert_eq!(report.totals.skipped, 2);
}

#[tokio::test]
async fn test_language_filter() {
    let ws = split_workspace().await;
    let sink = Arc::new(MemorySink::new());
    let options = SeedOptions {
        languages: vec!["fr".into()],
        ..no_images()
    };

    let report = ws.orchestrator(sink.clone(), None, options).run().await.unwrap();
    assert_eq!(report.partitions_processed, 1);
    assert!(sink.cards().iter().all(|row| row.language == "fr"));
}

#[tokio::test]
async fn test_seed_without_index_fails_before_writing() {
    let ws = Workspace::new(&cards("a", "en", 1));
    let sink = Arc::new(MemorySink::new());

    let err = ws.orchestrator(sink.clone(), None, no_images()).run().await.unwrap_err();
    assert!(matches!(err, cardvault_ingest::IngestError::MissingPrerequisite(_)));
    assert!(sink.groups().is_empty());
    assert!(!ws.checkpoints().path().exists());
}

// ============================================================================
// IMAGES
// ============================================================================

#[tokio::test]
async fn test_images_are_stored_and_linked() {
    let ws = split_workspace().await;
    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(MemoryAssetStore::new());
    let options = SeedOptions {
        set: Some("a".into()),
        languages: vec!["fr".into()],
        ..SeedOptions::default()
    };

    ws.orchestrator(sink.clone(), Some(pipeline(JpegHost, store.clone())), options)
        .run()
        .await
        .unwrap();

    assert_eq!(store.keys(), vec!["cards/a/fr/1.jpg", "cards/a/fr/2.jpg"]);
    assert_eq!(
        sink.card("a", "1", "fr").unwrap().image_url.as_deref(),
        Some("memory://cards/a/fr/1.jpg")
    );
}

#[tokio::test]
async fn test_image_failure_does_not_fail_the_record() {
    let ws = split_workspace().await;
    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(MemoryAssetStore::new());
    let options = SeedOptions {
        set: Some("a".into()),
        languages: vec!["fr".into()],
        continue_on_error: true,
        ..SeedOptions::default()
    };

    let report = ws
        .orchestrator(sink.clone(), Some(pipeline(BrokenImageHost, store.clone())), options)
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(report.totals.success, 2);
    assert_eq!(report.totals.errors, 0);
    assert!(sink.card("a", "1", "fr").unwrap().image_url.is_none());
    assert!(store.keys().is_empty());

    let logged = ErrorLog::read_all(&ws.error_log_path()).unwrap();
    assert_eq!(logged.len(), 2);
    assert!(logged.iter().all(|e| e.kind == "image" && e.set_code == "a"));
    assert_eq!(logged[0].card_number.as_deref(), Some("1"));
}

// ============================================================================
// CHECKPOINT AND RESUME
// ============================================================================

#[tokio::test]
async fn test_resume_honors_hand_edited_checkpoint() {
    let ws = split_workspace().await;
    std::fs::write(
        ws.checkpoints().path(),
        r#"{"status": "in_progress", "processedSetCodes": ["A_EN", "b"]}"#,
    )
    .unwrap();

    let sink = Arc::new(MemorySink::new());
    let options = SeedOptions {
        resume: true,
        ..no_images()
    };
    let report = ws.orchestrator(sink.clone(), None, options).run().await.unwrap();

    assert_eq!(report.partitions_skipped_by_checkpoint, 2);
    assert_eq!(report.partitions_processed, 1);
    assert!(sink.cards().iter().all(|row| row.set_code == "a" && row.language == "fr"));
    assert_eq!(sink.cards().len(), 2);
}

#[tokio::test]
async fn test_halt_then_resume_matches_uninterrupted_run() {
    let reference = {
        let ws = split_workspace().await;
        ws.orchestrator(Arc::new(MemorySink::new()), None, no_images())
            .run()
            .await
            .unwrap()
            .totals
    };

    let ws = split_workspace().await;
    let sink = Arc::new(FlakySink::failing("b", "2", "en"));

    let halted = ws.orchestrator(sink.clone(), None, no_images()).run().await.unwrap();
    assert_eq!(halted.status, CheckpointStatus::Failed);
    assert!(halted.halted.is_some());
    assert_eq!(halted.partitions_failed, 1);

    let state = checkpoint(&ws);
    assert_eq!(state.status, CheckpointStatus::Failed);
    assert_eq!(state.processed_files, vec!["a/en", "a/fr"]);
    assert_eq!(state.current_file.as_deref(), Some("b/en"));

    let logged = ErrorLog::read_all(&ws.error_log_path()).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].kind, "set");

    sink.heal();
    let options = SeedOptions {
        resume: true,
        ..no_images()
    };
    let resumed = ws.orchestrator(sink.clone(), None, options).run().await.unwrap();

    assert_eq!(resumed.status, CheckpointStatus::Completed);
    assert_eq!(resumed.partitions_skipped_by_checkpoint, 2);
    assert_eq!(resumed.totals, reference);
    assert_eq!(sink.inner.cards().len(), 8);
}

#[tokio::test]
async fn test_resume_after_completed_run_starts_over() {
    let ws = split_workspace().await;
    let sink = Arc::new(MemorySink::new());
    ws.orchestrator(sink.clone(), None, no_images()).run().await.unwrap();

    let options = SeedOptions {
        resume: true,
        ..no_images()
    };
    let report = ws.orchestrator(sink.clone(), None, options).run().await.unwrap();

    assert_eq!(report.partitions_skipped_by_checkpoint, 0);
    assert_eq!(report.totals.success, 8);
}

#[tokio::test]
async fn test_reseeding_is_idempotent() {
    let ws = split_workspace().await;
    let sink = Arc::new(MemorySink::new());

    ws.orchestrator(sink.clone(), None, no_images()).run().await.unwrap();
    let first = sink.cards();
    ws.orchestrator(sink.clone(), None, no_images()).run().await.unwrap();

    assert_eq!(sink.card_writes(), 16);
    assert_eq!(sink.cards(), first);
}

// ============================================================================
// CONTINUE ON ERROR
// ============================================================================

#[tokio::test]
async fn test_continue_on_error_logs_failed_record() {
    let ws = split_workspace().await;
    let sink = Arc::new(FlakySink::failing("b", "2", "en"));
    let options = SeedOptions {
        continue_on_error: true,
        ..no_images()
    };

    let report = ws.orchestrator(sink.clone(), None, options).run().await.unwrap();

    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(report.totals.success, 7);
    assert_eq!(report.totals.errors, 1);
    assert_eq!(report.partitions_processed, 3);

    let logged = ErrorLog::read_all(&ws.error_log_path()).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].kind, "card");
    assert_eq!(logged[0].card_number.as_deref(), Some("2"));
    assert_eq!(logged[0].language.as_deref(), Some("en"));
}

#[tokio::test]
async fn test_continue_on_error_skips_unreadable_partition() {
    let ws = split_workspace().await;
    let french = ws.dir.path().join("sets/a/a_fr.json");
    let original = std::fs::read(&french).unwrap();
    std::fs::write(&french, b"{ not json").unwrap();

    let sink = Arc::new(MemorySink::new());
    let options = SeedOptions {
        continue_on_error: true,
        ..no_images()
    };
    let report = ws.orchestrator(sink.clone(), None, options.clone()).run().await.unwrap();

    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(report.partitions_processed, 2);
    assert_eq!(report.partitions_failed, 1);
    assert_eq!(report.totals.success, 6);
    assert_eq!(report.totals.errors, 1);

    let state = checkpoint(&ws);
    assert_eq!(state.processed_files, vec!["a/en", "b/en"]);

    let logged = ErrorLog::read_all(&ws.error_log_path()).unwrap();
    assert_eq!(logged[0].kind, "set");
    assert_eq!(logged[0].language.as_deref(), Some("fr"));

    // The run ended completed, so a resume starts over rather than retrying
    std::fs::write(&french, original).unwrap();
    let options = SeedOptions {
        resume: true,
        ..options
    };
    let rerun = ws.orchestrator(sink.clone(), None, options).run().await.unwrap();
    assert_eq!(rerun.partitions_skipped_by_checkpoint, 0);
    assert_eq!(rerun.partitions_processed, 3);
    assert_eq!(sink.cards().len(), 8);
}

#[tokio::test]
async fn test_unreadable_partition_halts_without_continue() {
    let ws = split_workspace().await;
    std::fs::write(ws.dir.path().join("sets/a/a_fr.json"), b"{ not json").unwrap();

    let sink = Arc::new(MemorySink::new());
    let report = ws.orchestrator(sink.clone(), None, no_images()).run().await.unwrap();

    assert_eq!(report.status, CheckpointStatus::Failed);
    assert!(report.halted.is_some());
    assert_eq!(report.partitions_processed, 1);
    assert!(sink.card("b", "1", "en").is_none());
}
