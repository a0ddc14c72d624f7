//! Cardvault Common Library
//!
//! Shared types, utilities, and error handling for the Cardvault workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CardvaultError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Files**: whole-file JSON reads and crash-safe (temp + rename) writes
//! - **Checksums**: content hashing for stored assets
//!
//! # Example
//!
//! ```no_run
//! use cardvault_common::files::{read_json, write_json_atomic};
//! use std::collections::BTreeMap;
//!
//! fn bump(path: &std::path::Path) -> cardvault_common::Result<()> {
//!     let mut counts: BTreeMap<String, u64> = read_json(path)?;
//!     *counts.entry("runs".to_string()).or_default() += 1;
//!     write_json_atomic(path, &counts)?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod files;
pub mod logging;

// Re-export commonly used types
pub use error::{CardvaultError, Result};
