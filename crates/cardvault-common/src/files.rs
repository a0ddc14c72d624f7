//! Whole-file JSON helpers
//!
//! Every durable single-writer file in the pipeline (index, partition files,
//! checkpoint, error log) is rewritten as a whole. Writes go to a sibling
//! temp file which is synced and then renamed over the target, so a crash
//! mid-write leaves the previous contents intact.

use crate::error::{CardvaultError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sibling path used while a file is being rewritten
///
/// `data/index.json` -> `data/.index.json.tmp`
pub fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| CardvaultError::InvalidPath(path.display().to_string()))?;

    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".tmp");

    Ok(path.with_file_name(temp_name))
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(value)
}

/// Serialize `value` as pretty JSON and atomically replace `path`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_atomic_with(path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, value)?;
        Ok(())
    })
}

/// Serialize `value` as compact JSON and atomically replace `path`
///
/// Used for large files where indentation would only add bytes.
pub fn write_json_compact_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_atomic_with(path, |writer| {
        serde_json::to_writer(&mut *writer, value)?;
        Ok(())
    })
}

fn write_atomic_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_path_for(path)?;
    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);

    if let Err(e) = write(&mut writer) {
        drop(writer);
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| CardvaultError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}
