//! Append-only log of per-record and per-partition failures
//!
//! Stored as a single JSON array. Each append rewrites the whole file
//! atomically; existing entries are never modified or removed.

use crate::error::{IngestError, Result};
use crate::models::ErrorRecord;
use cardvault_common::files::{read_json, write_json_atomic};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    appended: u64,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            appended: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended through this handle
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Read every entry currently in the log
    pub fn read_all(path: &Path) -> Result<Vec<ErrorRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(read_json(path)?)
    }

    pub async fn append(&mut self, entry: ErrorRecord) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_blocking(&path, entry))
            .await
            .map_err(|e| IngestError::Io(std::io::Error::other(e)))??;

        self.appended += 1;
        Ok(())
    }
}

fn append_blocking(path: &Path, entry: ErrorRecord) -> Result<()> {
    let mut entries = match ErrorLog::read_all(path) {
        Ok(entries) => entries,
        Err(e) => {
            // Keep the unreadable log next to the new one
            let aside = path.with_extension("json.corrupt");
            warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                error = %e,
                "Error log unreadable, moving it aside"
            );
            std::fs::rename(path, &aside)?;
            Vec::new()
        },
    };

    debug!(kind = %entry.kind, set = %entry.set_code, "Appending error record");
    entries.push(entry);
    write_json_atomic(path, &entries)?;
    Ok(())
}
