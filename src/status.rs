// System status display — backend, row counts, configured projects.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;

/// Where the data lives, for the status header.
pub enum Backend<'a> {
    Sqlite(&'a str),
    Postgres,
}

/// Display system status to the terminal.
pub async fn show(db: &Arc<dyn Database>, backend: Backend<'_>, config: &Config) -> Result<()> {
    match backend {
        Backend::Sqlite(path) => {
            let file_size = std::fs::metadata(Path::new(path))
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("Database: {path} ({file_size})");
        }
        Backend::Postgres => println!("Database: PostgreSQL"),
    }

    let summary = db.storage_summary().await?;
    println!("Projects: {}", summary.projects);
    println!("Files: {}", summary.files);
    println!(
        "Observations: {} ({} processed-file marks)",
        summary.observations, summary.processed_files
    );
    println!("Sequence events: {}", summary.events);
    if summary.pipelines == 0 {
        println!("Pipelines: none registered");
        println!("  Run `balam pipeline register` to add one");
    } else {
        println!("Pipelines: {}", summary.pipelines);
    }

    let titles: Vec<&str> = config.projects.titles().collect();
    println!("Configured projects: {}", titles.join(", "));
    if config.username.is_empty() {
        println!("Author: not set (BALAM_USERNAME)");
    } else {
        println!("Author: {}", config.username);
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
