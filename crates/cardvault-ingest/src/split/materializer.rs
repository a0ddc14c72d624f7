//! Pass 3: turn temp files into partition files and write the index

use crate::error::{IngestError, Result};
use crate::models::{
    path_component, Index, IndexLanguage, IndexSet, PartitionFile, PartitionKey, PartitionMetadata,
    SourceRecord,
};
use crate::split::writer::temp_path;
use cardvault_common::files::{write_json_atomic, write_json_compact_atomic};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub index_file: PathBuf,
    /// Provenance recorded in the index
    pub source_file: String,
    pub target_languages: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MaterializeResult {
    pub index: Index,
    /// Valid partitions whose temp file was missing
    pub missing: Vec<PartitionKey>,
}

/// Path of a partition file relative to the data directory ("lea/lea_en.json")
pub fn partition_file_path(key: &PartitionKey) -> String {
    format!("{}/{}.json", path_component(&key.group), key.file_stem())
}

/// Materialize every key in `valid` and write the index
///
/// A missing temp file is logged and the key left out of the index. The
/// index only lists partition files that were written in this pass.
pub fn materialize(
    valid: &BTreeSet<PartitionKey>,
    metadata: &BTreeMap<String, PartitionMetadata>,
    options: &MaterializeOptions,
) -> Result<MaterializeResult> {
    let mut sets: BTreeMap<String, IndexSet> = BTreeMap::new();
    let mut missing = Vec::new();
    let mut total_files = 0u64;

    for key in valid {
        let temp = temp_path(&options.temp_dir, key);
        if !temp.exists() {
            warn!(partition = %key, path = %temp.display(), "Temp file missing, partition omitted");
            missing.push(key.clone());
            continue;
        }

        let cards = read_lines(&temp)?;
        let meta = metadata.get(&key.group);
        let file = PartitionFile {
            set_code: key.group.clone(),
            set_name: meta.map_or_else(|| key.group.clone(), |m| m.name.clone()),
            release_date: meta.and_then(|m| m.release_date.clone()),
            set_type: meta.and_then(|m| m.set_type.clone()),
            language: key.language.clone(),
            card_count: cards.len() as u64,
            cards,
        };

        let relative = partition_file_path(key);
        write_json_compact_atomic(&options.data_dir.join(&relative), &file)?;
        fs::remove_file(&temp)?;
        total_files += 1;

        debug!(
            partition = %key,
            cards = file.card_count,
            path = %relative,
            "Partition file written"
        );

        let set = sets.entry(key.group.clone()).or_insert_with(|| IndexSet {
            name: file.set_name.clone(),
            release_date: file.release_date.clone(),
            set_type: file.set_type.clone(),
            languages: BTreeMap::new(),
            total_cards: 0,
        });
        set.total_cards += file.card_count;
        set.languages.insert(
            key.language.clone(),
            IndexLanguage {
                card_count: file.card_count,
                file_path: relative,
            },
        );
    }

    // Leaves the directory in place when anything else is still in it
    let _ = fs::remove_dir(&options.temp_dir);

    let index = Index {
        generated_at: Utc::now(),
        source_file: options.source_file.clone(),
        target_languages: options.target_languages.clone(),
        total_sets: sets.len() as u64,
        total_files,
        total_cards: sets.values().map(|s| s.total_cards).sum(),
        sets,
    };
    write_json_atomic(&options.index_file, &index)?;

    info!(
        sets = index.total_sets,
        files = index.total_files,
        cards = index.total_cards,
        missing = missing.len(),
        index = %options.index_file.display(),
        "Index written"
    );

    Ok(MaterializeResult { index, missing })
}

fn read_lines(path: &Path) -> Result<Vec<SourceRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| IngestError::InvalidInput {
            record: number as u64 + 1,
            message: format!("{}: {}", path.display(), e),
        })?;
        records.push(record);
    }

    Ok(records)
}
