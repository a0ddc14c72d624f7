//! Pass 2: fan records out into per-partition line-delimited temp files
//!
//! Thousands of partitions can be live at once, so handles come from a
//! bounded [`HandlePool`]. The first open of a partition in a run truncates
//! its temp file; every later reopen appends. Together with flushing on
//! eviction, this makes the temp files independent of the pool capacity.

use crate::error::{IngestError, Result};
use crate::models::PartitionKey;
use crate::split::scanner::ScanOptions;
use crate::split::stream::RecordStream;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Temp file extension for line-delimited partitions
pub const TEMP_EXTENSION: &str = "jsonl";

/// Temp file for `key` inside `dir`
pub fn temp_path(dir: &Path, key: &PartitionKey) -> PathBuf {
    dir.join(format!("{}.{}", key.file_stem(), TEMP_EXTENSION))
}

/// Bounded set of open partition writers
///
/// When full, the oldest-opened `evict_batch` handles are flushed and closed
/// before a new one is opened.
pub struct HandlePool {
    dir: PathBuf,
    capacity: usize,
    evict_batch: usize,
    handles: HashMap<PartitionKey, BufWriter<File>>,
    /// Open handles, oldest first
    order: VecDeque<PartitionKey>,
    /// Partitions already truncated in this run
    started: HashSet<PartitionKey>,
    evictions: u64,
}

impl HandlePool {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize, evict_batch: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            dir: dir.into(),
            capacity,
            evict_batch: evict_batch.clamp(1, capacity),
            handles: HashMap::new(),
            order: VecDeque::new(),
            started: HashSet::new(),
            evictions: 0,
        }
    }

    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    /// Eviction rounds so far
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Append one line to `key`'s temp file
    pub fn write_line(&mut self, key: &PartitionKey, line: &[u8]) -> Result<()> {
        if !self.handles.contains_key(key) {
            self.open(key)?;
        }

        let writer = self.handles.get_mut(key).ok_or_else(|| {
            IngestError::Io(std::io::Error::other(format!("no open handle for {key}")))
        })?;
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flush and close every open handle
    pub fn close_all(&mut self) -> Result<()> {
        while let Some(key) = self.order.pop_front() {
            if let Some(mut writer) = self.handles.remove(&key) {
                writer.flush()?;
            }
        }
        Ok(())
    }

    fn open(&mut self, key: &PartitionKey) -> Result<()> {
        if self.handles.len() >= self.capacity {
            self.evict_oldest()?;
        }

        let path = temp_path(&self.dir, key);
        let file = if self.started.insert(key.clone()) {
            File::create(&path)?
        } else {
            OpenOptions::new().create(true).append(true).open(&path)?
        };

        self.handles.insert(key.clone(), BufWriter::new(file));
        self.order.push_back(key.clone());
        Ok(())
    }

    fn evict_oldest(&mut self) -> Result<()> {
        let mut closed = 0;
        while closed < self.evict_batch {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if let Some(mut writer) = self.handles.remove(&key) {
                writer.flush()?;
            }
            closed += 1;
        }

        self.evictions += 1;
        debug!(closed, open = self.handles.len(), "Evicted oldest partition handles");
        Ok(())
    }
}

impl Drop for HandlePool {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

/// Write pass settings
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub temp_dir: PathBuf,
    pub max_open_files: usize,
    pub evict_batch: usize,
    /// Records pulled from the input before draining them to disk
    pub batch_size: usize,
    pub progress_interval: u64,
}

/// Output of the write pass
#[derive(Debug, Clone, Default)]
pub struct WriteResult {
    pub counts: BTreeMap<PartitionKey, u64>,
    pub records_read: u64,
    pub records_written: u64,
    pub evictions: u64,
}

/// Stream `records` into temp files for every partition in `valid`
///
/// Records are pulled in batches; the input is not read again until the
/// current batch has been written out.
pub fn write_partitions<R: BufRead>(
    records: &mut RecordStream<R>,
    selection: &ScanOptions,
    valid: &BTreeSet<PartitionKey>,
    options: &WriteOptions,
) -> Result<WriteResult> {
    std::fs::create_dir_all(&options.temp_dir)?;

    let mut pool = HandlePool::new(&options.temp_dir, options.max_open_files, options.evict_batch);
    let mut result = WriteResult::default();
    let mut next_progress = options.progress_interval;

    loop {
        let batch = records.next_batch(options.batch_size.max(1))?;
        if batch.is_empty() {
            break;
        }

        for record in &batch {
            let Some(key) = selection.select(record).filter(|k| valid.contains(k)) else {
                continue;
            };

            let line = serde_json::to_vec(record)?;
            pool.write_line(&key, &line)?;
            *result.counts.entry(key).or_default() += 1;
            result.records_written += 1;
        }

        result.records_read = records.records_read();
        if options.progress_interval > 0 && result.records_read >= next_progress {
            info!(
                read = result.records_read,
                written = result.records_written,
                open_files = pool.open_count(),
                "Write progress"
            );
            while next_progress <= result.records_read {
                next_progress += options.progress_interval;
            }
        }
    }

    pool.close_all()?;
    result.evictions = pool.evictions();

    info!(
        read = result.records_read,
        written = result.records_written,
        partitions = result.counts.len(),
        evictions = result.evictions,
        "Write complete"
    );

    Ok(result)
}
