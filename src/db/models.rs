// Data models — Rust structs that map to database rows.
//
// Each query returns its own typed row struct so callers never deal with
// loosely-keyed maps. They're kept apart from the queries so other modules
// can use them without depending on a particular backend.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type recorded for image bursts.
pub const PHOTO_SEQUENCE_EVENT: &str = "photo_sequence";

/// Which family of media a query or dataset covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// LIKE pattern matched against `files.mime_type`.
    pub fn mime_pattern(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/%",
            MediaKind::Video => "video/%",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        // Accept full MIME types too ("image/jpeg").
        match s.split('/').next().unwrap_or_default() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => anyhow::bail!("Unknown media kind '{other}' (expected image or video)"),
        }
    }
}

/// Observation authorship: model output or human annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationMethodKind {
    Machine,
    Human,
}

impl ObservationMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationMethodKind::Machine => "machine",
            ObservationMethodKind::Human => "human",
        }
    }
}

/// Filter shared by the media read queries.
#[derive(Debug, Clone)]
pub struct MediaQuery {
    pub project_title: String,
    pub site: String,
    pub kind: MediaKind,
    /// Key inside `files.file_metadata` that holds the capture time.
    pub datetime_key: String,
    /// Pipeline (name, version). Required by the processed / to-process queries.
    pub pipeline: Option<(String, String)>,
}

impl MediaQuery {
    pub fn require_pipeline(&self) -> anyhow::Result<(&str, &str)> {
        match &self.pipeline {
            Some((name, version)) => Ok((name.as_str(), version.as_str())),
            None => anyhow::bail!("This query needs a pipeline name and version"),
        }
    }

    /// JSON path for SQLite's json_extract, quoted so keys with spaces work.
    pub fn datetime_json_path(&self) -> String {
        format!("$.\"{}\"", self.datetime_key.replace('"', ""))
    }
}

/// A media file with its capture context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRow {
    pub file_id: Uuid,
    pub url: String,
    pub captured_at: Option<NaiveDateTime>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub site_identifier: String,
    pub sampling_area: Option<String>,
    pub device: String,
    pub ecosystem: Option<String>,
    /// Identifier of the sequence event this file belongs to, if any.
    pub seq_id: Option<String>,
}

/// A media file joined with one observation produced by a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRow {
    pub media: MediaRow,
    pub observation_id: Uuid,
    pub observation_type: Option<String>,
    pub observation_tag: Option<serde_json::Value>,
    pub taxon_id: Option<String>,
    pub bbox: Option<String>,
    pub video_frame_num: Option<i32>,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
}

/// Observation ready to be written, with its optional geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    pub id: Uuid,
    pub file_id: Uuid,
    pub project_id: Uuid,
    pub pipeline_id: Option<Uuid>,
    pub user_id: Uuid,
    pub observation_method_id: Uuid,
    pub observation_type: Option<String>,
    pub observation_tag: Option<serde_json::Value>,
    pub taxon_id: Option<String>,
    pub bbox: Option<String>,
    pub video_frame_num: Option<i32>,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPipelineInfo {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub url_repo_model: String,
    pub execution_params: serde_json::Value,
    pub comments: String,
    pub last_execution: Option<DateTime<Utc>>,
}

/// A registered inference pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub url_repo_model: String,
    pub execution_params: serde_json::Value,
    pub comments: String,
    pub last_execution: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservationMethod {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// Row counts shown by `balam status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageSummary {
    pub projects: i64,
    pub files: i64,
    pub observations: i64,
    pub events: i64,
    pub pipelines: i64,
    pub processed_files: i64,
}

/// Parse a capture time as stored in file metadata.
///
/// Camera EXIF uses `YYYY:MM:DD HH:MM:SS`; other ingest paths write ISO
/// forms. Fractional seconds are accepted. A bare date maps to midnight.
pub fn parse_capture_time(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y:%m:%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Deterministic processed-file key: UUID v5 of file id + pipeline id.
pub fn processed_file_id(file_id: &Uuid, pipeline_id: &Uuid) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_DNS,
        format!("{file_id}{pipeline_id}").as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exif_capture_time() {
        let ts = parse_capture_time("2023:06:20 14:03:07").unwrap();
        assert_eq!(ts.to_string(), "2023-06-20 14:03:07");
    }

    #[test]
    fn test_parse_iso_capture_time_with_fraction() {
        let ts = parse_capture_time("2023-06-20T14:03:07.250").unwrap();
        assert_eq!(ts.and_utc().timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_capture_time("").is_none());
        assert!(parse_capture_time("yesterday").is_none());
    }

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!("image/jpeg".parse::<MediaKind>().unwrap(), MediaKind::Image);
        assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert!("audio/wav".parse::<MediaKind>().is_err());
    }

    #[test]
    fn test_processed_file_id_is_stable() {
        let f = Uuid::new_v4();
        let p = Uuid::new_v4();
        assert_eq!(processed_file_id(&f, &p), processed_file_id(&f, &p));
        assert_ne!(processed_file_id(&f, &p), processed_file_id(&p, &f));
    }

    #[test]
    fn test_datetime_json_path_quotes_key() {
        let q = MediaQuery {
            project_title: "SiPeCaM".to_string(),
            site: "13".to_string(),
            kind: MediaKind::Image,
            datetime_key: "DateTimeOriginal".to_string(),
            pipeline: None,
        };
        assert_eq!(q.datetime_json_path(), "$.\"DateTimeOriginal\"");
        assert!(q.require_pipeline().is_err());
    }
}
