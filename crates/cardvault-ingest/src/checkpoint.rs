//! Durable progress for seed runs
//!
//! The checkpoint is owned by one [`CheckpointStore`]; the orchestrator
//! mutates a [`CheckpointState`] value and hands it back to the store to
//! persist. Nothing else writes the file.
//!
//! Running totals include the partition currently in flight. Its share is
//! also tracked in `currentFileProgress`, and [`CheckpointStore::load`]
//! subtracts it again on resume because that partition restarts from its
//! first record.

use crate::error::{IngestError, Result};
use crate::models::PartitionKey;
use cardvault_common::files::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lifecycle of one seed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }
}

/// Success/error/skip counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub success: u64,
    pub errors: u64,
    pub skipped: u64,
}

/// Persisted progress of a seed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckpointState {
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub status: CheckpointStatus,
    /// Identifiers of fully processed partitions ("lea/en")
    pub processed_files: Vec<String>,
    /// Hand-maintained entries; a bare set code covers every language of it
    #[serde(rename = "processedSetCodes", skip_serializing_if = "Vec::is_empty")]
    pub processed_groups: Vec<String>,
    #[serde(alias = "currentSet")]
    pub current_file: Option<String>,
    pub total_success: u64,
    pub total_errors: u64,
    pub total_skipped: u64,
    /// Counts already folded into the totals for `current_file`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file_progress: Option<Counters>,
}

impl Default for CheckpointState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            last_updated: now,
            status: CheckpointStatus::InProgress,
            processed_files: Vec::new(),
            processed_groups: Vec::new(),
            current_file: None,
            total_success: 0,
            total_errors: 0,
            total_skipped: 0,
            current_file_progress: None,
        }
    }
}

impl CheckpointState {
    /// Fresh state for a new run
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Whether `key` was fully processed by an earlier run
    ///
    /// Entries are matched case-insensitively against the partition id
    /// (`lea/en`) or its file name (`lea_en`, `lea_en.json`), so checkpoints
    /// edited by hand are honored. A `processedSetCodes` entry that is just a
    /// set code (`lea`) marks every language of that set.
    pub fn is_processed(&self, key: &PartitionKey) -> bool {
        self.processed_files
            .iter()
            .any(|entry| matches_partition(entry, key))
            || self.processed_groups.iter().any(|entry| {
                entry.trim().eq_ignore_ascii_case(&key.group) || matches_partition(entry, key)
            })
    }

    pub fn totals(&self) -> Counters {
        Counters {
            success: self.total_success,
            errors: self.total_errors,
            skipped: self.total_skipped,
        }
    }

    /// Mark `key` as the partition in flight
    pub fn begin_partition(&mut self, key: &PartitionKey) {
        self.current_file = Some(key.id());
        self.current_file_progress = Some(Counters::default());
    }

    pub fn record_success(&mut self) {
        self.total_success += 1;
        self.progress_mut().success += 1;
    }

    pub fn record_error(&mut self) {
        self.total_errors += 1;
        self.progress_mut().errors += 1;
    }

    pub fn record_skipped(&mut self) {
        self.total_skipped += 1;
        self.progress_mut().skipped += 1;
    }

    /// Mark the partition in flight as fully processed
    pub fn complete_partition(&mut self, key: &PartitionKey) {
        let id = key.id();
        if !self.processed_files.contains(&id) {
            self.processed_files.push(id);
        }
        self.current_file = None;
        self.current_file_progress = None;
    }

    /// Leave the partition in flight unprocessed after a partition-level failure
    ///
    /// Its record counts stay in the totals and the failure itself counts as
    /// one error.
    pub fn abandon_partition(&mut self) {
        self.total_errors += 1;
        self.current_file = None;
        self.current_file_progress = None;
    }

    /// Remove the partial counts of an interrupted partition from the totals
    pub fn rollback_partial(&mut self) {
        if let Some(progress) = self.current_file_progress.take() {
            self.total_success = self.total_success.saturating_sub(progress.success);
            self.total_errors = self.total_errors.saturating_sub(progress.errors);
            self.total_skipped = self.total_skipped.saturating_sub(progress.skipped);
        }
        self.current_file = None;
    }

    fn progress_mut(&mut self) -> &mut Counters {
        self.current_file_progress.get_or_insert_with(Counters::default)
    }
}

fn matches_partition(entry: &str, key: &PartitionKey) -> bool {
    let entry = entry.trim();
    let entry = match entry.strip_suffix(".json") {
        Some(file) => file.rsplit('/').next().unwrap_or(file),
        None => entry,
    };
    entry.eq_ignore_ascii_case(&key.id()) || entry.eq_ignore_ascii_case(&key.file_stem())
}

/// Sole reader and writer of the checkpoint file
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state a run should start from
    ///
    /// Returns a fresh state when `resume` is false, no file exists, the file
    /// fails to parse, or the previous run already completed. Never fails.
    pub fn load(&self, resume: bool) -> CheckpointState {
        if !resume {
            return CheckpointState::fresh();
        }

        if !self.path.exists() {
            info!(path = %self.path.display(), "No checkpoint found, starting fresh");
            return CheckpointState::fresh();
        }

        let mut state: CheckpointState = match read_json(&self.path) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Checkpoint unreadable, starting fresh"
                );
                return CheckpointState::fresh();
            },
        };

        if state.status == CheckpointStatus::Completed {
            info!(path = %self.path.display(), "Previous run completed, starting fresh");
            return CheckpointState::fresh();
        }

        if let Some(current) = state.current_file.clone() {
            info!(partition = %current, "Rolling back partially processed partition");
        }
        state.rollback_partial();
        state.status = CheckpointStatus::InProgress;

        info!(
            processed = state.processed_files.len(),
            success = state.total_success,
            errors = state.total_errors,
            skipped = state.total_skipped,
            "Resuming from checkpoint"
        );

        state
    }

    /// Stamp `last_updated` and atomically replace the checkpoint file
    pub async fn save(&self, state: &mut CheckpointState) -> Result<()> {
        state.last_updated = Utc::now();

        let snapshot = state.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_json_atomic(&path, &snapshot))
            .await
            .map_err(|e| IngestError::Io(std::io::Error::other(e)))??;

        debug!(path = %self.path.display(), status = state.status.as_str(), "Checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key(group: &str, lang: &str) -> PartitionKey {
        PartitionKey::new(group, lang)
    }

    #[test]
    fn test_load_without_resume_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, r#"{"processedFiles":["lea/en"]}"#).unwrap();

        let state = CheckpointStore::new(&path).load(false);
        assert!(state.processed_files.is_empty());
    }

    #[test]
    fn test_corrupt_checkpoint_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{ not json").unwrap();

        let state = CheckpointStore::new(&path).load(true);
        assert_eq!(state.status, CheckpointStatus::InProgress);
        assert!(state.processed_files.is_empty());
    }

    #[test]
    fn test_hand_edited_checkpoint_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, r#"{"status":"in_progress","processedSetCodes":["A/en"]}"#).unwrap();

        let state = CheckpointStore::new(&path).load(true);
        assert!(state.is_processed(&key("a", "en")));
        assert!(!state.is_processed(&key("a", "fr")));
    }

    #[test]
    fn test_bare_set_code_covers_every_language() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, r#"{"status":"in_progress","processedSetCodes":["MIR"]}"#).unwrap();

        let state = CheckpointStore::new(&path).load(true);
        assert!(state.is_processed(&key("mir", "en")));
        assert!(state.is_processed(&key("mir", "ja")));
        assert!(!state.is_processed(&key("mi", "r")));
        assert!(!state.is_processed(&key("lea", "en")));
    }

    #[tokio::test]
    async fn test_set_codes_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let mut state = CheckpointState {
            processed_groups: vec!["mir".into()],
            ..CheckpointState::fresh()
        };
        store.save(&mut state).await.unwrap();

        let reloaded = store.load(true);
        assert_eq!(reloaded.processed_groups, vec!["mir".to_string()]);
        assert!(reloaded.is_processed(&key("mir", "de")));
    }

    #[test]
    fn test_file_name_entries_match() {
        let state = CheckpointState {
            processed_files: vec!["lea/lea_en.json".into(), "mir_fr".into()],
            ..CheckpointState::fresh()
        };
        assert!(state.is_processed(&key("lea", "en")));
        assert!(state.is_processed(&key("mir", "fr")));
        assert!(!state.is_processed(&key("mir", "en")));
    }

    #[test]
    fn test_rollback_removes_partial_counts() {
        let mut state = CheckpointState::fresh();
        state.begin_partition(&key("lea", "en"));
        state.record_success();
        state.record_skipped();
        state.complete_partition(&key("lea", "en"));

        state.begin_partition(&key("lea", "fr"));
        state.record_success();
        state.record_error();

        state.rollback_partial();
        assert_eq!(
            state.totals(),
            Counters {
                success: 1,
                errors: 0,
                skipped: 1
            }
        );
        assert!(state.current_file.is_none());
        assert_eq!(state.processed_files, vec!["lea/en".to_string()]);
    }

    #[test]
    fn test_completed_checkpoint_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, r#"{"status":"completed","processedFiles":["lea/en"]}"#).unwrap();

        let state = CheckpointStore::new(&path).load(true);
        assert!(state.processed_files.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));

        let mut state = CheckpointState::fresh();
        state.begin_partition(&key("lea", "en"));
        state.record_success();
        state.record_success();
        state.complete_partition(&key("lea", "en"));
        state.begin_partition(&key("lea", "fr"));
        state.record_success();
        store.save(&mut state).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["status"], "in_progress");
        assert_eq!(raw["currentFile"], "lea/fr");
        assert_eq!(raw["totalSuccess"], 3);

        let resumed = store.load(true);
        assert_eq!(resumed.total_success, 2);
        assert!(resumed.is_processed(&key("lea", "en")));
        assert!(resumed.current_file.is_none());
    }
}
