// Mapping between database rows and flat dataset records.
//
// from_db: MediaRow / ProcessedRow -> dataset rows.
// to_db:   prediction rows -> NewObservation.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::models::{MediaKind, MediaRow, NewObservation, ProcessedRow};
use crate::sequence::{self, SequenceError, SequenceGrouper};

use super::fields::{
    ItemRecord, MediaFields, MediaRecord, PredictionFields, PredictionRecord, VideoItem,
    VideoPrediction,
};

/// Observation type for a label: `empty` and `person` map to themselves,
/// any other label is an animal.
pub fn observation_type_for(label: &str) -> &'static str {
    match label {
        "empty" => "empty",
        "person" => "person",
        _ => "animal",
    }
}

/// `{"predicted_label": label}` plus `scientific_name` when known.
pub fn observation_tag_for(label: &str, scientific_name: Option<&str>) -> Value {
    let mut tag = json!({ "predicted_label": label });
    if let Some(name) = scientific_name {
        tag["scientific_name"] = json!(name);
    }
    tag
}

pub fn location_key(site: &str, sampling_area: Option<&str>, device: &str) -> String {
    format!("{site}-{}-{device}", sampling_area.unwrap_or_default())
}

/// Path of a stored URL relative to its `data/` segment.
///
/// `s3://sipecam-open-data/data/13/A1/IMG.JPG` -> `13/A1/IMG.JPG`. URLs
/// without that segment are returned unchanged.
pub fn strip_data_prefix(url: &str) -> &str {
    if let Some(pos) = url.find("/data/") {
        &url[pos + "/data/".len()..]
    } else if let Some(rest) = url.strip_prefix("data/") {
        rest
    } else {
        url
    }
}

// --- from_db ---

pub fn media_fields(row: &MediaRow) -> MediaFields {
    MediaFields {
        media_id: Some(row.file_id),
        item: strip_data_prefix(&row.url).to_string(),
        date_captured: row.captured_at,
        location: Some(location_key(
            &row.site_identifier,
            row.sampling_area.as_deref(),
            &row.device,
        )),
        site: Some(row.site_identifier.clone()),
        sampling_area: row.sampling_area.clone(),
        device: Some(row.device.clone()),
        ecosystem: row.ecosystem.clone(),
        longitude: row.longitude,
        latitude: row.latitude,
        seq_id: row.seq_id.clone(),
    }
}

/// Label of a stored observation: the taxon when identified, else the
/// predicted label in its tag, else its observation type.
pub fn label_for(row: &ProcessedRow) -> Option<String> {
    row.taxon_id
        .clone()
        .or_else(|| {
            row.observation_tag
                .as_ref()
                .and_then(|tag| tag.get("predicted_label"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| row.observation_type.clone())
}

pub fn item_from_db<R: ItemRecord>(row: &MediaRow) -> R {
    R::from_media(media_fields(row))
}

pub fn prediction_from_db<P: PredictionRecord>(row: &ProcessedRow) -> P {
    let scientific_name = row
        .observation_tag
        .as_ref()
        .and_then(|tag| tag.get("scientific_name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let prediction = PredictionFields {
        id: Some(row.observation_id),
        label: label_for(row),
        observation_type: row.observation_type.clone(),
        observation_tag: row.observation_tag.clone(),
        taxon_id: row.taxon_id.clone(),
        scientific_name,
        bbox: row.bbox.clone(),
        score: row.score,
        confidence: row.confidence,
    };
    P::from_parts(media_fields(&row.media), prediction, row.video_frame_num)
}

// --- to_db ---

/// Who and what an observation is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationOwner {
    pub project_id: Uuid,
    pub pipeline_id: Option<Uuid>,
    pub user_id: Uuid,
    pub observation_method_id: Uuid,
}

/// Build the observation row for one prediction of file `file_id`.
///
/// A label drives the type and tag; rows without one keep whatever type
/// and tag they already carry.
pub fn to_new_observation<P: PredictionRecord>(
    record: &P,
    file_id: Uuid,
    owner: &ObservationOwner,
) -> NewObservation {
    let pred = record.prediction();
    let (observation_type, observation_tag) = match pred.label.as_deref() {
        Some(label) => (
            Some(observation_type_for(label).to_string()),
            Some(observation_tag_for(label, pred.scientific_name.as_deref())),
        ),
        None => (pred.observation_type.clone(), pred.observation_tag.clone()),
    };

    NewObservation {
        id: pred.id.unwrap_or_else(Uuid::new_v4),
        file_id,
        project_id: owner.project_id,
        pipeline_id: owner.pipeline_id,
        user_id: owner.user_id,
        observation_method_id: owner.observation_method_id,
        observation_type,
        observation_tag,
        taxon_id: pred.taxon_id.clone(),
        bbox: pred.bbox.clone(),
        video_frame_num: record.video_frame_num(),
        score: pred.score,
        confidence: pred.confidence,
    }
}

// --- Sequences ---

/// Grouper inputs for a dataset. Items are keyed by media id when known,
/// else by their relative path; the location falls back to site, area and
/// device when the row has no explicit one.
pub fn sequence_inputs<R: MediaRecord>(records: &[R]) -> Vec<sequence::MediaRecord> {
    records
        .iter()
        .map(|record| {
            let media = record.media();
            let location_key = media.location.clone().or_else(|| {
                match (media.site.as_deref(), media.device.as_deref()) {
                    (Some(site), Some(device)) => {
                        Some(location_key(site, media.sampling_area.as_deref(), device))
                    }
                    _ => None,
                }
            });
            sequence::MediaRecord {
                item_id: record_key(media),
                location_key,
                captured_at: media.date_captured,
            }
        })
        .collect()
}

fn record_key(media: &MediaFields) -> String {
    media
        .media_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| media.item.clone())
}

/// Write a sequence id into every record's `seq_id`. Returns the number of
/// sequences. Video datasets are left untouched.
pub fn assign_sequences<R: MediaRecord>(
    records: &mut [R],
    min_interval_secs: f64,
) -> Result<usize, SequenceError> {
    if R::KIND == MediaKind::Video {
        return Ok(0);
    }
    let assignment = SequenceGrouper::new(min_interval_secs)?.group(&sequence_inputs(records))?;
    for record in records.iter_mut() {
        let key = record_key(record.media());
        record.media_mut().seq_id = assignment.get(&key).map(|id| id.to_string());
    }
    Ok(assignment.sequence_count())
}

/// Fill each video prediction's item and capture context from the video
/// dataset, matching on media id. Returns how many predictions found their
/// video.
pub fn attach_video_items(predictions: &mut [VideoPrediction], videos: &[VideoItem]) -> usize {
    let by_id: std::collections::HashMap<Uuid, &MediaFields> = videos
        .iter()
        .filter_map(|video| video.media.media_id.map(|id| (id, &video.media)))
        .collect();

    let mut matched = 0;
    for pred in predictions.iter_mut() {
        let Some(video) = pred.media.media_id.and_then(|id| by_id.get(&id)) else {
            continue;
        };
        let media = &mut pred.media;
        media.item = video.item.clone();
        media.date_captured = media.date_captured.or(video.date_captured);
        media.location = media.location.take().or_else(|| video.location.clone());
        media.site = media.site.take().or_else(|| video.site.clone());
        media.sampling_area = media.sampling_area.take().or_else(|| video.sampling_area.clone());
        media.device = media.device.take().or_else(|| video.device.clone());
        media.ecosystem = media.ecosystem.take().or_else(|| video.ecosystem.clone());
        media.longitude = media.longitude.or(video.longitude);
        media.latitude = media.latitude.or(video.latitude);
        media.seq_id = media.seq_id.take().or_else(|| video.seq_id.clone());
        matched += 1;
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fields::{ImageItem, ImagePrediction};
    use chrono::NaiveDate;

    fn row(url: &str, secs: u32) -> MediaRow {
        MediaRow {
            file_id: Uuid::new_v4(),
            url: url.to_string(),
            captured_at: NaiveDate::from_ymd_opt(2023, 6, 20)
                .unwrap()
                .and_hms_opt(12, 0, secs),
            longitude: Some(-93.5),
            latitude: Some(16.25),
            site_identifier: "13".to_string(),
            sampling_area: Some("A1".to_string()),
            device: "CAM-01".to_string(),
            ecosystem: None,
            seq_id: None,
        }
    }

    #[test]
    fn test_strip_data_prefix() {
        assert_eq!(
            strip_data_prefix("s3://sipecam-open-data/data/13/A1/IMG.JPG"),
            "13/A1/IMG.JPG"
        );
        assert_eq!(strip_data_prefix("data/x.jpg"), "x.jpg");
        assert_eq!(strip_data_prefix("https://host/other/x.jpg"), "https://host/other/x.jpg");
    }

    #[test]
    fn test_observation_type_for_labels() {
        assert_eq!(observation_type_for("empty"), "empty");
        assert_eq!(observation_type_for("person"), "person");
        assert_eq!(observation_type_for("Puma concolor"), "animal");
    }

    #[test]
    fn test_observation_tag_includes_scientific_name() {
        let tag = observation_tag_for("puma", Some("Puma concolor"));
        assert_eq!(tag["predicted_label"], "puma");
        assert_eq!(tag["scientific_name"], "Puma concolor");
        assert!(observation_tag_for("empty", None).get("scientific_name").is_none());
    }

    #[test]
    fn test_item_from_db_builds_location_and_relative_item() {
        let item: ImageItem = item_from_db(&row("s3://b/data/13/A1/IMG_0.JPG", 0));
        assert_eq!(item.media.item, "13/A1/IMG_0.JPG");
        assert_eq!(item.media.location.as_deref(), Some("13-A1-CAM-01"));
    }

    #[test]
    fn test_label_prefers_taxon_then_tag_then_type() {
        let mut processed = ProcessedRow {
            media: row("s3://b/data/x.jpg", 0),
            observation_id: Uuid::new_v4(),
            observation_type: Some("animal".to_string()),
            observation_tag: Some(json!({"predicted_label": "small bird"})),
            taxon_id: Some("taxon-42".to_string()),
            bbox: None,
            video_frame_num: None,
            score: None,
            confidence: None,
        };
        assert_eq!(label_for(&processed).as_deref(), Some("taxon-42"));
        processed.taxon_id = None;
        assert_eq!(label_for(&processed).as_deref(), Some("small bird"));
        processed.observation_tag = None;
        assert_eq!(label_for(&processed).as_deref(), Some("animal"));
    }

    #[test]
    fn test_to_new_observation_derives_type_from_label() {
        let pred = ImagePrediction {
            media: MediaFields::default(),
            prediction: PredictionFields {
                label: Some("person".to_string()),
                bbox: Some("[0, 0, 1, 1]".to_string()),
                ..Default::default()
            },
        };
        let owner = ObservationOwner {
            project_id: Uuid::new_v4(),
            pipeline_id: None,
            user_id: Uuid::new_v4(),
            observation_method_id: Uuid::new_v4(),
        };
        let obs = to_new_observation(&pred, Uuid::new_v4(), &owner);
        assert_eq!(obs.observation_type.as_deref(), Some("person"));
        assert_eq!(obs.observation_tag.unwrap()["predicted_label"], "person");
        assert_eq!(obs.pipeline_id, None);
    }

    #[test]
    fn test_assign_sequences_on_images() {
        let mut items: Vec<ImageItem> = [0, 1, 9]
            .iter()
            .map(|&s| item_from_db(&row(&format!("s3://b/data/{s}.jpg"), s)))
            .collect();
        let count = assign_sequences(&mut items, 2.0).unwrap();
        assert_eq!(count, 2);
        assert_eq!(items[0].media.seq_id, items[1].media.seq_id);
        assert_ne!(items[1].media.seq_id, items[2].media.seq_id);
    }

    #[test]
    fn test_assign_sequences_skips_videos() {
        let mut videos: Vec<VideoItem> = vec![item_from_db(&row("s3://b/data/v.mp4", 0))];
        assert_eq!(assign_sequences(&mut videos, 2.0).unwrap(), 0);
        assert!(videos[0].media.seq_id.is_none());
    }

    #[test]
    fn test_attach_video_items_by_media_id() {
        let video: VideoItem = item_from_db(&row("s3://b/data/13/A1/VID.MP4", 0));
        let mut preds = vec![
            VideoPrediction {
                media: MediaFields {
                    media_id: video.media.media_id,
                    ..Default::default()
                },
                prediction: PredictionFields::default(),
                video_frame_num: Some(3),
            },
            VideoPrediction {
                media: MediaFields {
                    media_id: Some(Uuid::new_v4()),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        assert_eq!(attach_video_items(&mut preds, &[video]), 1);
        assert_eq!(preds[0].media.item, "13/A1/VID.MP4");
        assert_eq!(preds[0].media.location.as_deref(), Some("13-A1-CAM-01"));
        assert!(preds[1].media.item.is_empty());
    }
}
