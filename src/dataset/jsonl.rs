// JSON Lines reading and writing for datasets.
//
// One record per line. Blank lines are skipped on read so hand-edited
// files with a trailing newline or spacing still load.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn read_records<T: DeserializeOwned, R: BufRead>(reader: R) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("Invalid record on line {}", idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_records<T: Serialize, W: Write>(mut writer: W, records: &[T]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_records(BufReader::new(file)).with_context(|| format!("Failed to load {}", path.display()))
}

/// Write to `path`, or to stdout when no path is given.
pub fn write_output<T: Serialize>(path: Option<&Path>, records: &[T]) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_records(BufWriter::new(file), records)
        }
        None => write_records(std::io::stdout().lock(), records),
    }
}
