//! Pass 1: count records per partition without keeping their bodies

use crate::error::Result;
use crate::models::{PartitionKey, PartitionMetadata, SourceRecord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Record selection applied by the scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Languages to keep; empty keeps every language
    pub languages: Vec<String>,
    pub excluded_set_types: Vec<String>,
    /// Restrict to one group
    pub set: Option<String>,
    /// Partitions with fewer records are not written
    pub min_cards: u64,
    pub progress_interval: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            excluded_set_types: Vec::new(),
            set: None,
            min_cards: 1,
            progress_interval: crate::config::DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl ScanOptions {
    /// Partition of `record` if the record passes every filter
    ///
    /// Both the scan and the write pass select through here, so they always
    /// agree on which records belong to which partition.
    pub fn select(&self, record: &SourceRecord) -> Option<PartitionKey> {
        let key = PartitionKey::from_record(record)?;

        if let Some(set) = &self.set {
            if !set.trim().eq_ignore_ascii_case(&key.group) {
                return None;
            }
        }
        if self.excludes_set_type(record.set_type.as_deref()) {
            return None;
        }
        if !self.accepts_language(&key.language) {
            return None;
        }

        Some(key)
    }

    fn accepts_language(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == language)
    }

    fn excludes_set_type(&self, set_type: Option<&str>) -> bool {
        set_type.is_some_and(|t| {
            let t = t.trim().to_lowercase();
            self.excluded_set_types.iter().any(|x| *x == t)
        })
    }
}

/// Output of the scan pass
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// One entry per group with at least one accepted record
    pub metadata: BTreeMap<String, PartitionMetadata>,
    /// Accepted record count for every partition seen
    pub counts: BTreeMap<PartitionKey, u64>,
    /// Partitions meeting the minimum count
    pub valid_keys: BTreeSet<PartitionKey>,
    pub records_scanned: u64,
    pub records_accepted: u64,
}

impl ScanResult {
    pub fn count(&self, key: &PartitionKey) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Records that will be written to valid partitions
    pub fn valid_records(&self) -> u64 {
        self.valid_keys.iter().map(|k| self.count(k)).sum()
    }
}

/// Scan a record sequence
///
/// Any error from the sequence aborts the scan; a partial result is never
/// returned.
pub fn scan<I>(records: I, options: &ScanOptions) -> Result<ScanResult>
where
    I: IntoIterator<Item = Result<SourceRecord>>,
{
    let mut result = ScanResult::default();

    for record in records {
        let record = record?;
        result.records_scanned += 1;

        if options.progress_interval > 0
            && result.records_scanned % options.progress_interval == 0
        {
            info!(
                scanned = result.records_scanned,
                accepted = result.records_accepted,
                groups = result.metadata.len(),
                "Scan progress"
            );
        }

        let Some(key) = options.select(&record) else {
            continue;
        };

        let meta = result
            .metadata
            .entry(key.group.clone())
            .or_insert_with(|| PartitionMetadata::from_record(&record));
        if meta.release_date.is_none() {
            meta.release_date = record.released_at.clone();
        }
        if meta.set_type.is_none() {
            meta.set_type = record.set_type.clone();
        }
        meta.record(&key.language);

        *result.counts.entry(key).or_default() += 1;
        result.records_accepted += 1;
    }

    for meta in result.metadata.values_mut() {
        meta.refresh_total(&options.languages);
    }

    let min_cards = options.min_cards.max(1);
    result.valid_keys = result
        .counts
        .iter()
        .filter(|(_, count)| **count >= min_cards)
        .map(|(key, _)| key.clone())
        .collect();

    debug!(
        rejected = result.records_scanned - result.records_accepted,
        "Records outside the requested partitions ignored"
    );

    info!(
        scanned = result.records_scanned,
        accepted = result.records_accepted,
        groups = result.metadata.len(),
        partitions = result.counts.len(),
        valid_partitions = result.valid_keys.len(),
        min_cards,
        "Scan complete"
    );

    Ok(result)
}
