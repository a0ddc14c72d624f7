//! Seed run: drive partition files from the index into the sink
//!
//! Partitions are processed one at a time in index order, and records in
//! file order. Failures are isolated per record (image problems never fail a
//! record) and per partition when `continue_on_error` is set; otherwise the
//! first partition-level failure halts the run with the checkpoint marked
//! `failed`, ready for `--resume`.

use crate::checkpoint::{CheckpointState, CheckpointStatus, CheckpointStore, Counters};
use crate::error::{IngestError, RemoteError, Result};
use crate::error_log::ErrorLog;
use crate::models::{
    ErrorRecord, GroupRow, Index, PartitionFile, PartitionKey, SinkRow, SourceRecord,
};
use crate::retry::RetryController;
use crate::seed::assets::AssetPipeline;
use crate::seed::sink::Sink;
use cardvault_common::files::read_json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Selection and behavior flags for a seed run
#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub set: Option<String>,
    /// Languages to seed; empty seeds every language in the index
    pub languages: Vec<String>,
    /// Records processed per partition; the rest count as skipped
    pub limit: Option<u64>,
    pub skip_images: bool,
    pub continue_on_error: bool,
    pub resume: bool,
    pub checkpoint_every: u64,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            set: None,
            languages: Vec::new(),
            limit: None,
            skip_images: false,
            continue_on_error: false,
            resume: false,
            checkpoint_every: crate::config::DEFAULT_CHECKPOINT_EVERY,
        }
    }
}

/// One partition to seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub key: PartitionKey,
    pub file_path: PathBuf,
    pub card_count: u64,
}

/// Work remaining for a run
#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub work: Vec<WorkItem>,
    /// Partitions matching the filters that an earlier run already finished
    pub already_processed: usize,
    pub state: CheckpointState,
}

impl SeedPlan {
    pub fn total_cards(&self) -> u64 {
        self.work.iter().map(|w| w.card_count).sum()
    }
}

/// Outcome of a seed run
#[derive(Debug)]
pub struct SeedReport {
    pub status: CheckpointStatus,
    pub totals: Counters,
    pub partitions_processed: usize,
    pub partitions_failed: usize,
    pub partitions_skipped_by_checkpoint: usize,
    pub errors_logged: u64,
    pub error_log: PathBuf,
    pub checkpoint: PathBuf,
    pub duration: Duration,
    /// Set when the run stopped on a partition failure
    pub halted: Option<IngestError>,
}

/// Read the index written by the split
pub fn load_index(path: &Path) -> Result<Index> {
    if !path.exists() {
        return Err(IngestError::MissingPrerequisite(format!(
            "index not found at {}; run the split first",
            path.display()
        )));
    }
    Ok(read_json(path)?)
}

/// Ordered work list for `index`, minus partitions `state` has finished
///
/// Order follows the index: groups by key, then languages by tag. A
/// requested group that is not in the index is an error.
pub fn plan_work(
    index: &Index,
    data_dir: &Path,
    options: &SeedOptions,
    state: &CheckpointState,
) -> Result<(Vec<WorkItem>, usize)> {
    let set = options.set.as_ref().map(|s| s.trim().to_lowercase());
    if let Some(set) = &set {
        if !index.sets.contains_key(set) {
            return Err(IngestError::GroupNotFound(set.clone()));
        }
    }

    let mut work = Vec::new();
    let mut already_processed = 0;

    for (group, entry) in &index.sets {
        if set.as_ref().is_some_and(|s| s != group) {
            continue;
        }

        for (language, file) in &entry.languages {
            if !options.languages.is_empty() && !options.languages.iter().any(|l| l == language) {
                continue;
            }

            let key = PartitionKey::new(group.as_str(), language.as_str());
            if state.is_processed(&key) {
                already_processed += 1;
                continue;
            }

            work.push(WorkItem {
                key,
                file_path: data_dir.join(&file.file_path),
                card_count: file.card_count,
            });
        }
    }

    Ok((work, already_processed))
}

/// Load the index and checkpoint and compute the remaining work
pub fn plan_seed(
    index_file: &Path,
    data_dir: &Path,
    checkpoints: &CheckpointStore,
    options: &SeedOptions,
) -> Result<SeedPlan> {
    let index = load_index(index_file)?;
    let state = checkpoints.load(options.resume);
    let (work, already_processed) = plan_work(&index, data_dir, options, &state)?;

    Ok(SeedPlan {
        work,
        already_processed,
        state,
    })
}

/// Drives a seed run against a sink and optional image pipeline
pub struct SeedOrchestrator {
    sink: Arc<dyn Sink>,
    assets: Option<AssetPipeline>,
    retry: RetryController,
    checkpoints: CheckpointStore,
    errors: ErrorLog,
    index_file: PathBuf,
    data_dir: PathBuf,
    options: SeedOptions,
}

impl SeedOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sink: Arc<dyn Sink>,
        assets: Option<AssetPipeline>,
        retry: RetryController,
        checkpoints: CheckpointStore,
        errors: ErrorLog,
        index_file: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        options: SeedOptions,
    ) -> Self {
        Self {
            sink,
            assets,
            retry,
            checkpoints,
            errors,
            index_file: index_file.into(),
            data_dir: data_dir.into(),
            options,
        }
    }

    /// Run every remaining partition
    ///
    /// Errors before any partition starts (missing index, unknown group) are
    /// returned as `Err`. A halt on a partition failure returns a report with
    /// `halted` set.
    pub async fn run(&mut self) -> Result<SeedReport> {
        let started = Instant::now();
        let plan = plan_seed(&self.index_file, &self.data_dir, &self.checkpoints, &self.options)?;
        let SeedPlan {
            work,
            already_processed,
            mut state,
        } = plan;

        info!(
            partitions = work.len(),
            cards = work.iter().map(|w| w.card_count).sum::<u64>(),
            already_processed,
            resume = self.options.resume,
            "Starting seed run"
        );

        state.status = CheckpointStatus::InProgress;
        self.checkpoints.save(&mut state).await?;

        let mut processed = 0;
        let mut failed = 0;
        let mut halted = None;

        for (position, item) in work.iter().enumerate() {
            info!(
                partition = %item.key,
                cards = item.card_count,
                position = position + 1,
                of = work.len(),
                "Processing partition"
            );

            state.begin_partition(&item.key);
            match self.process_partition(item, &mut state).await {
                Ok(()) => {
                    state.complete_partition(&item.key);
                    self.checkpoints.save(&mut state).await?;
                    processed += 1;
                },
                Err(e) if self.options.continue_on_error => {
                    error!(
                        partition = %item.key,
                        category = e.category(),
                        error = %e,
                        "Partition failed, continuing"
                    );
                    self.errors
                        .append(ErrorRecord::new("set", &item.key, e.to_string()))
                        .await?;
                    state.abandon_partition();
                    self.checkpoints.save(&mut state).await?;
                    failed += 1;
                },
                Err(e) => {
                    error!(
                        partition = %item.key,
                        category = e.category(),
                        error = %e,
                        "Partition failed, halting run"
                    );
                    self.errors
                        .append(ErrorRecord::new("set", &item.key, e.to_string()))
                        .await?;
                    state.status = CheckpointStatus::Failed;
                    self.checkpoints.save(&mut state).await?;
                    failed += 1;
                    halted = Some(e);
                    break;
                },
            }
        }

        if halted.is_none() {
            state.status = CheckpointStatus::Completed;
            self.checkpoints.save(&mut state).await?;
        }

        let report = SeedReport {
            status: state.status,
            totals: state.totals(),
            partitions_processed: processed,
            partitions_failed: failed,
            partitions_skipped_by_checkpoint: already_processed,
            errors_logged: self.errors.appended(),
            error_log: self.errors.path().to_path_buf(),
            checkpoint: self.checkpoints.path().to_path_buf(),
            duration: started.elapsed(),
            halted,
        };

        info!(
            status = report.status.as_str(),
            success = report.totals.success,
            errors = report.totals.errors,
            skipped = report.totals.skipped,
            partitions = processed,
            failed,
            "Seed run finished"
        );

        Ok(report)
    }

    async fn process_partition(
        &mut self,
        item: &WorkItem,
        state: &mut CheckpointState,
    ) -> Result<()> {
        let path = item.file_path.clone();
        let file: PartitionFile = tokio::task::spawn_blocking(move || read_json(&path))
            .await
            .map_err(|e| IngestError::Io(std::io::Error::other(e)))??;

        let group = GroupRow::from_partition(&file);
        self.retry
            .call("group upsert", || self.sink.upsert_group(&group))
            .await?
            .ok_or(RemoteError::NotFound)?;

        let mut since_checkpoint = 0u64;
        for (position, record) in file.cards.iter().enumerate() {
            if self.options.limit.is_some_and(|limit| position as u64 >= limit) {
                state.record_skipped();
                continue;
            }

            let missing = record.missing_fields();
            if !missing.is_empty() {
                debug!(
                    partition = %item.key,
                    id = %record.id,
                    missing = ?missing,
                    "Record missing required fields, skipped"
                );
                state.record_skipped();
            } else {
                let image_url = self.resolve_image(&item.key, record).await?;
                let row = SinkRow::from_record(record, image_url);

                let written = self
                    .retry
                    .call("card upsert", || self.sink.upsert_card(&row))
                    .await
                    .and_then(|written| written.ok_or(RemoteError::NotFound));

                match written {
                    Ok(()) => state.record_success(),
                    Err(e) if self.options.continue_on_error => {
                        warn!(
                            partition = %item.key,
                            number = %record.collector_number,
                            error = %e,
                            "Record upsert failed"
                        );
                        state.record_error();
                        self.errors
                            .append(
                                ErrorRecord::new("card", &item.key, e.to_string())
                                    .with_card_number(record.collector_number.clone()),
                            )
                            .await?;
                    },
                    Err(e) => return Err(e.into()),
                }
            }

            since_checkpoint += 1;
            if since_checkpoint >= self.options.checkpoint_every.max(1) {
                self.checkpoints.save(state).await?;
                since_checkpoint = 0;
            }
        }

        debug!(partition = %item.key, "Partition complete");
        Ok(())
    }

    /// Stored image URL for `record`, or `None` when there is none
    ///
    /// Image failures are logged and never fail the record.
    async fn resolve_image(
        &mut self,
        key: &PartitionKey,
        record: &SourceRecord,
    ) -> Result<Option<String>> {
        if self.options.skip_images {
            return Ok(None);
        }
        let Some(assets) = &self.assets else {
            return Ok(None);
        };

        match assets.resolve(key, record).await {
            Ok(url) => Ok(url),
            Err(e) => {
                warn!(
                    partition = %key,
                    number = %record.collector_number,
                    error = %e,
                    "Image unavailable, continuing without it"
                );
                self.errors
                    .append(
                        ErrorRecord::new("image", key, e.to_string())
                            .with_card_number(record.collector_number.clone()),
                    )
                    .await?;
                Ok(None)
            },
        }
    }
}
