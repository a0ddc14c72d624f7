//! User-facing output: end-of-run summaries and the index listing
//!
//! Everything here goes to stdout; diagnostics go through `tracing` on stderr.

use crate::checkpoint::CheckpointStatus;
use crate::models::Index;
use crate::seed::{SeedPlan, SeedReport};
use crate::split::SplitReport;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, CellAlignment, Table};
use std::fmt::Write as _;
use std::time::Duration;

const RULE: &str = "============================================================";

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header.to_vec());
    table
}

/// Partition id and record count per row, counts right-aligned
fn partition_table(rows: impl IntoIterator<Item = (String, u64)>) -> Table {
    let mut table = table(&["Partition", "Cards"]);
    for (id, count) in rows {
        table.add_row(vec![id, count.to_string()]);
    }
    if let Some(column) = table.column_mut(1) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    table
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Summary block for a split run
pub fn render_split(report: &SplitReport) -> String {
    let mut out = String::new();
    let title = if report.dry_run {
        "SPLIT (DRY RUN)"
    } else {
        "SPLIT COMPLETE"
    };

    let _ = writeln!(out, "{RULE}\n{title}\n{RULE}");
    let _ = writeln!(out, "Records scanned:    {}", report.records_scanned);
    let _ = writeln!(out, "Records accepted:   {}", report.records_accepted);
    let _ = writeln!(out, "Partitions:         {}", report.partitions.len());
    let _ = writeln!(out, "Below min-cards:    {}", report.below_minimum);

    if report.dry_run {
        let rows = report.partitions.iter().map(|(key, count)| (key.id(), *count));
        let _ = writeln!(out, "\nWould write:\n{}", partition_table(rows));
    }

    if let Some(index) = &report.index {
        let _ = writeln!(out, "Sets:               {}", index.total_sets);
        let _ = writeln!(out, "Files:              {}", index.total_files);
        let _ = writeln!(out, "Cards:              {}", index.total_cards);
    }

    if !report.missing.is_empty() {
        let _ = writeln!(out, "Missing temp files: {}", report.missing.len());
        for key in &report.missing {
            let _ = writeln!(out, "  {}", key.id());
        }
    }

    let _ = writeln!(out, "Duration:           {}", format_duration(report.duration));
    let _ = write!(out, "{RULE}");
    out
}

/// Work list for a seed dry run
pub fn render_seed_plan(plan: &SeedPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}\nSEED (DRY RUN)\n{RULE}");
    let _ = writeln!(out, "Partitions to process: {}", plan.work.len());
    let _ = writeln!(out, "Cards to process:      {}", plan.total_cards());
    let _ = writeln!(out, "Already processed:     {}", plan.already_processed);

    if !plan.work.is_empty() {
        let rows = plan.work.iter().map(|item| (item.key.id(), item.card_count));
        let _ = writeln!(out, "{}", partition_table(rows));
    }

    let _ = write!(out, "{RULE}");
    out
}

/// Summary block for a seed run
pub fn render_seed(report: &SeedReport) -> String {
    let mut out = String::new();
    let title = match report.status {
        CheckpointStatus::Completed => "SEED COMPLETE",
        CheckpointStatus::Failed => "SEED FAILED",
        CheckpointStatus::InProgress => "SEED INTERRUPTED",
    };

    let _ = writeln!(out, "{RULE}\n{title}\n{RULE}");
    let _ = writeln!(out, "Success:            {}", report.totals.success);
    let _ = writeln!(out, "Errors:             {}", report.totals.errors);
    let _ = writeln!(out, "Skipped:            {}", report.totals.skipped);
    let _ = writeln!(out, "Partitions done:    {}", report.partitions_processed);
    if report.partitions_failed > 0 {
        let _ = writeln!(out, "Partitions failed:  {}", report.partitions_failed);
    }
    if report.partitions_skipped_by_checkpoint > 0 {
        let _ = writeln!(
            out,
            "Resumed past:       {}",
            report.partitions_skipped_by_checkpoint
        );
    }
    let _ = writeln!(out, "Duration:           {}", format_duration(report.duration));

    if report.errors_logged > 0 || report.totals.errors > 0 {
        let _ = writeln!(out, "Error log:          {}", report.error_log.display());
    }
    if let Some(err) = &report.halted {
        let _ = writeln!(out, "Halted:             {err}");
        let _ = writeln!(out, "Resume with --resume ({})", report.checkpoint.display());
    }

    let _ = write!(out, "{RULE}");
    out
}

/// Index listing for `--list`
pub fn render_index(index: &Index) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Index generated {} from {}",
        index.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        index.source_file
    );
    let _ = writeln!(out, "Languages: {}", index.target_languages.join(", "));
    let _ = writeln!(
        out,
        "{} sets, {} files, {} cards",
        index.total_sets, index.total_files, index.total_cards
    );

    let mut listing = table(&["Set", "Name", "Released", "Languages", "Cards"]);
    for (code, set) in &index.sets {
        let languages: Vec<String> = set
            .languages
            .iter()
            .map(|(lang, file)| format!("{lang}:{}", file.card_count))
            .collect();
        listing.add_row(vec![
            code.clone(),
            set.name.clone(),
            set.release_date.clone().unwrap_or_else(|| "-".to_string()),
            languages.join(" "),
            set.total_cards.to_string(),
        ]);
    }
    if let Some(column) = listing.column_mut(4) {
        column.set_cell_alignment(CellAlignment::Right);
    }

    let _ = write!(out, "{listing}");
    out
}
