//! Shared fixtures for the split and seed integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use cardvault_ingest::checkpoint::CheckpointStore;
use cardvault_ingest::config::IngestConfig;
use cardvault_ingest::error_log::ErrorLog;
use cardvault_ingest::retry::{RetryController, RetryPolicy};
use cardvault_ingest::seed::{AssetPipeline, SeedOptions, SeedOrchestrator, Sink};
use cardvault_ingest::split::{run_split, SplitOptions, SplitReport};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One catalog record with an image reference
pub fn card(set: &str, lang: &str, number: u32) -> Value {
    json!({
        "id": format!("{set}-{lang}-{number}"),
        "set": set,
        "set_name": format!("Set {}", set.to_uppercase()),
        "released_at": "1993-08-05",
        "lang": lang,
        "name": format!("Card {number}"),
        "collector_number": number.to_string(),
        "rarity": "common",
        "image_uris": {"normal": format!("https://img.example/{set}/{lang}/{number}.jpg")},
        "oracle_text": "Draw a card."
    })
}

/// `count` records for one partition, numbered from 1
pub fn cards(set: &str, lang: &str, count: u32) -> Vec<Value> {
    (1..=count).map(|n| card(set, lang, n)).collect()
}

pub fn write_bulk(path: &Path, records: &[Value]) {
    std::fs::write(path, serde_json::to_vec_pretty(&Value::Array(records.to_vec())).unwrap())
        .unwrap();
}

/// Workspace layout rooted at a temp dir: `bulk.json` plus a `sets/` data dir
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new(records: &[Value]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_bulk(&dir.path().join("bulk.json"), records);
        Self { dir }
    }

    pub fn bulk_file(&self) -> PathBuf {
        self.dir.path().join("bulk.json")
    }

    pub fn config(&self) -> IngestConfig {
        IngestConfig::with_paths(self.bulk_file(), self.dir.path().join("sets"))
    }

    pub fn split_options(&self) -> SplitOptions {
        SplitOptions::from_config(&self.config())
    }

    pub async fn split(&self) -> SplitReport {
        run_split(self.split_options()).await.unwrap()
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(&self.config().paths.checkpoint_file)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.config().paths.error_log
    }

    pub fn orchestrator(
        &self,
        sink: Arc<dyn Sink>,
        assets: Option<AssetPipeline>,
        options: SeedOptions,
    ) -> SeedOrchestrator {
        let config = self.config();
        SeedOrchestrator::new(
            sink,
            assets,
            fast_retry(),
            self.checkpoints(),
            ErrorLog::new(&config.paths.error_log),
            config.paths.index_file(),
            &config.paths.data_dir,
            options,
        )
    }
}

/// Two retries with no backoff
pub fn fast_retry() -> RetryController {
    RetryController::new(RetryPolicy::new(2, Duration::ZERO, Duration::ZERO))
}
