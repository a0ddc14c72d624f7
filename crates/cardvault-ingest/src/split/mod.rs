//! Split stage: partition the bulk catalog into per-(set, language) files
//!
//! Three passes over durable files:
//!
//! 1. [`scanner`] counts records per partition from a [`stream::RecordStream`]
//! 2. [`writer`] re-reads the input and appends each record to its
//!    partition's temp file through a bounded handle pool
//! 3. [`materializer`] turns temp files into partition files and writes the
//!    index
//!
//! The split is not checkpointed; an interrupted split is simply re-run.

pub mod materializer;
pub mod scanner;
pub mod stream;
pub mod writer;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::models::{Index, PartitionKey};
use scanner::ScanOptions;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// Everything a split run needs
#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub bulk_file: PathBuf,
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub index_file: PathBuf,
    pub scan: ScanOptions,
    pub max_open_files: usize,
    pub evict_batch: usize,
    pub write_batch: usize,
    /// Run the scan only and report what would be written
    pub dry_run: bool,
}

impl SplitOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            bulk_file: config.paths.bulk_file.clone(),
            data_dir: config.paths.data_dir.clone(),
            temp_dir: config.paths.temp_dir.clone(),
            index_file: config.paths.index_file(),
            scan: ScanOptions {
                languages: config.split.languages.clone(),
                excluded_set_types: config.split.excluded_set_types.clone(),
                set: None,
                min_cards: 1,
                progress_interval: config.split.progress_interval,
            },
            max_open_files: config.split.max_open_files,
            evict_batch: config.split.evict_batch,
            write_batch: config.split.write_batch,
            dry_run: false,
        }
    }
}

/// Outcome of a split run
#[derive(Debug, Clone)]
pub struct SplitReport {
    pub records_scanned: u64,
    pub records_accepted: u64,
    /// Partitions written (or that would be written on a dry run) with counts
    pub partitions: BTreeMap<PartitionKey, u64>,
    /// Partitions dropped by the minimum count
    pub below_minimum: usize,
    /// `None` on a dry run
    pub index: Option<Index>,
    pub missing: Vec<PartitionKey>,
    pub dry_run: bool,
    pub duration: Duration,
}

/// Run the split on the blocking pool
pub async fn run_split(options: SplitOptions) -> Result<SplitReport> {
    tokio::task::spawn_blocking(move || split_blocking(&options))
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e)))?
}

/// Run all three passes on the current thread
pub fn split_blocking(options: &SplitOptions) -> Result<SplitReport> {
    let started = Instant::now();

    info!(file = %options.bulk_file.display(), "Pass 1/3: scanning bulk file");
    let scan = scanner::scan(stream::open(&options.bulk_file)?, &options.scan)?;

    if let Some(set) = &options.scan.set {
        if scan.metadata.is_empty() {
            return Err(IngestError::GroupNotFound(set.trim().to_lowercase()));
        }
    }

    let partitions: BTreeMap<PartitionKey, u64> = scan
        .valid_keys
        .iter()
        .map(|key| (key.clone(), scan.count(key)))
        .collect();
    let below_minimum = scan.counts.len() - scan.valid_keys.len();

    if options.dry_run {
        info!(
            partitions = partitions.len(),
            cards = scan.valid_records(),
            "Dry run: nothing written"
        );
        return Ok(SplitReport {
            records_scanned: scan.records_scanned,
            records_accepted: scan.records_accepted,
            partitions,
            below_minimum,
            index: None,
            missing: Vec::new(),
            dry_run: true,
            duration: started.elapsed(),
        });
    }

    info!(
        partitions = scan.valid_keys.len(),
        max_open_files = options.max_open_files,
        "Pass 2/3: writing partition temp files"
    );
    let mut records = stream::open(&options.bulk_file)?;
    let written = writer::write_partitions(
        &mut records,
        &options.scan,
        &scan.valid_keys,
        &writer::WriteOptions {
            temp_dir: options.temp_dir.clone(),
            max_open_files: options.max_open_files,
            evict_batch: options.evict_batch,
            batch_size: options.write_batch,
            progress_interval: options.scan.progress_interval,
        },
    )?;

    if written.counts != partitions {
        return Err(IngestError::InvalidInput {
            record: written.records_read,
            message: format!(
                "bulk file changed between passes ({} records scanned, {} written)",
                scan.valid_records(),
                written.records_written
            ),
        });
    }

    info!("Pass 3/3: materializing partition files");
    let materialized = materializer::materialize(
        &scan.valid_keys,
        &scan.metadata,
        &materializer::MaterializeOptions {
            data_dir: options.data_dir.clone(),
            temp_dir: options.temp_dir.clone(),
            index_file: options.index_file.clone(),
            source_file: options.bulk_file.display().to_string(),
            target_languages: options.scan.languages.clone(),
        },
    )?;

    Ok(SplitReport {
        records_scanned: scan.records_scanned,
        records_accepted: scan.records_accepted,
        partitions,
        below_minimum,
        index: Some(materialized.index),
        missing: materialized.missing,
        dry_run: false,
        duration: started.elapsed(),
    })
}
