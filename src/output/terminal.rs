// Colored terminal output for datasets and pipeline runs.
//
// Dataset records themselves go to JSON Lines (see dataset::jsonl); this
// module prints the human-readable summaries the CLI shows around them.

use colored::Colorize;

use crate::dataset::MediaFields;
use crate::db::models::PipelineInfo;
use crate::pipeline::events::SequenceSummary;
use crate::pipeline::observations::{DeleteSummary, StoreSummary};

/// Show a preview of a dataset: the first `limit` rows and a total.
pub fn display_media_preview<'a>(title: &str, media: impl ExactSizeIterator<Item = &'a MediaFields>, limit: usize) {
    let total = media.len();
    if total == 0 {
        println!("{}", format!("{title}: nothing found").dimmed());
        return;
    }

    println!("\n{}", format!("=== {title} ({total} files) ===").bold());
    println!(
        "  {:<48} {:<20} {:<20}",
        "Item".dimmed(),
        "Captured".dimmed(),
        "Location".dimmed(),
    );
    println!("  {}", "-".repeat(90).dimmed());

    for row in media.take(limit) {
        let captured = row
            .date_captured
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  {:<48} {:<20} {:<20}",
            super::truncate_chars(&row.item, 45),
            captured,
            row.location.as_deref().unwrap_or("?"),
        );
    }
    if total > limit {
        println!("  {}", format!("... and {} more", total - limit).dimmed());
    }
    println!();
}

pub fn display_sequence_summary(summary: &SequenceSummary) {
    println!(
        "\n{} {} events, {} files linked",
        "Sequences:".bold(),
        summary.events,
        summary.links
    );
    if summary.skipped > 0 {
        println!(
            "  {} {} files without a capture time were skipped",
            "~".yellow(),
            summary.skipped
        );
    }
    if summary.failed > 0 {
        println!("  {} {} files failed to link", "!".bright_red(), summary.failed);
    }
}

pub fn display_store_summary(summary: &StoreSummary) {
    println!(
        "\n{} {} stored",
        "Observations:".bold(),
        summary.stored.to_string().green()
    );
    if summary.failed > 0 {
        println!("  {} {} rows failed (see log)", "!".bright_red(), summary.failed);
    }
    if summary.marked_processed > 0 || summary.already_processed > 0 {
        println!(
            "  Processed files: {} marked, {} already marked",
            summary.marked_processed, summary.already_processed
        );
    }
}

pub fn display_delete_summary(summary: &DeleteSummary) {
    println!("\n{}", "Deleted:".bold());
    println!("  Observations:     {}", summary.observations);
    println!("  Geometries:       {}", summary.geometries);
    println!("  Processed marks:  {}", summary.processed_files);
}

/// Display a registered pipeline and its parameters.
pub fn display_pipeline(info: &PipelineInfo) {
    println!(
        "\n{}",
        format!("=== Pipeline {}@{} ===", info.name, info.version).bold()
    );
    println!("  Id:            {}", info.id);
    if !info.url_repo_model.is_empty() {
        println!("  Model repo:    {}", info.url_repo_model);
    }
    println!("  Registered:    {}", info.created_at);
    println!(
        "  Last run:      {}",
        info.last_execution.as_deref().unwrap_or("never")
    );
    if !info.comments.is_empty() {
        println!("  Comments:      {}", info.comments.dimmed());
    }

    println!("\n  Execution parameters:");
    match info.execution_params.as_object() {
        Some(params) if !params.is_empty() => {
            for (key, value) in params {
                println!("    {:<26} {}", key.cyan(), value);
            }
        }
        _ => println!("    {}", "(none)".dimmed()),
    }
    println!();
}
