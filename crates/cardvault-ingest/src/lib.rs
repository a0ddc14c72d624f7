//! Cardvault Ingest Library
//!
//! Imports a multi-gigabyte card catalog into the Cardvault store in two
//! stages:
//!
//! - **Split**: three streaming passes turn the bulk JSON array into one file
//!   per (set, language) plus an index, without holding the catalog in memory
//! - **Seed**: walks the index, upserts sets and cards into the sink, stores
//!   card images, and checkpoints progress so an interrupted run resumes
//!
//! # Example
//!
//! ```no_run
//! use cardvault_ingest::config::IngestConfig;
//! use cardvault_ingest::split::{run_split, SplitOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let report = run_split(SplitOptions::from_config(&config)).await?;
//!     println!("{} partitions", report.partitions.len());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod error_log;
pub mod models;
pub mod retry;
pub mod seed;
pub mod split;
pub mod summary;

pub use error::{IngestError, RemoteError, Result};
