//! Command-line definitions

use crate::config::{split_list, IngestConfig, PathConfig};
use crate::seed::SeedOptions;
use crate::split::SplitOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Cardvault catalog ingestion: split the bulk catalog, then seed the store
#[derive(Parser, Debug)]
#[command(name = "cardvault-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output directory for partition files, index, checkpoint and error log
    ///
    /// Replaces every derived path. `CARDVAULT_DATA_DIR` is read by the
    /// config loader instead, so explicit per-file settings still apply.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Partition the bulk catalog into per-set, per-language files
    Split(SplitArgs),

    /// Load partition files into the database
    Seed(SeedArgs),
}

/// Filters shared by both stages
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Restrict to these languages (`--lang en fr` or `--lang=en,fr`)
    #[arg(long = "lang", value_delimiter = ',', num_args = 1..)]
    pub languages: Vec<String>,

    /// Restrict to one set
    #[arg(long)]
    pub set: Option<String>,

    /// Compute and report only; write nothing
    #[arg(long)]
    pub dry_run: bool,
}

impl FilterArgs {
    fn languages(&self) -> Vec<String> {
        split_list(&self.languages.join(","))
    }
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Bulk catalog file (`.json` or `.json.gz`)
    #[arg(long, env = "CARDVAULT_BULK_FILE")]
    pub input: Option<PathBuf>,

    /// Partitions with fewer records are not written
    #[arg(long, default_value_t = 1)]
    pub min_cards: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SeedArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Records processed per partition
    #[arg(long)]
    pub limit: Option<u64>,

    /// Do not download or upload images
    #[arg(long)]
    pub skip_images: bool,

    /// Log failed partitions and records and keep going
    #[arg(long)]
    pub continue_on_error: bool,

    /// Skip partitions finished by a previous run
    #[arg(long)]
    pub resume: bool,

    /// Print the index summary and exit
    #[arg(long)]
    pub list: bool,
}

impl Cli {
    /// Apply global path overrides to `config`
    pub fn apply_paths(&self, config: &mut IngestConfig) {
        if let Some(data_dir) = &self.data_dir {
            let bulk_file = config.paths.bulk_file.clone();
            config.paths = PathConfig::under(bulk_file, data_dir);
        }
    }
}

impl SplitArgs {
    pub fn to_options(&self, config: &IngestConfig) -> SplitOptions {
        let mut options = SplitOptions::from_config(config);

        if let Some(input) = &self.input {
            options.bulk_file = input.clone();
        }
        let languages = self.filter.languages();
        if !languages.is_empty() {
            options.scan.languages = languages;
        }
        options.scan.set = self.filter.set.clone();
        options.scan.min_cards = self.min_cards;
        options.dry_run = self.filter.dry_run;
        options
    }
}

impl SeedArgs {
    pub fn to_options(&self, config: &IngestConfig) -> SeedOptions {
        SeedOptions {
            set: self.filter.set.clone(),
            languages: self.filter.languages(),
            limit: self.limit,
            skip_images: self.skip_images,
            continue_on_error: self.continue_on_error,
            resume: self.resume,
            checkpoint_every: config.seed.checkpoint_every,
        }
    }
}
