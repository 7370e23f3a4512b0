// Flat record types exchanged with inference pipelines.
//
// Each dataset row is one of four shapes: media awaiting inference
// (ImageItem, VideoItem) or inference output (ImagePrediction,
// VideoPrediction). They share two field sets, embedded with
// `#[serde(flatten)]` so a JSON line stays flat.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::MediaKind;

/// Fields every media row carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFields {
    pub media_id: Option<Uuid>,
    /// Path of the file relative to the project's media root.
    pub item: String,
    pub date_captured: Option<NaiveDateTime>,
    /// `"{site}-{sampling_area}-{device}"`.
    pub location: Option<String>,
    pub site: Option<String>,
    pub sampling_area: Option<String>,
    pub device: Option<String>,
    pub ecosystem: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub seq_id: Option<String>,
}

/// Fields a model (or annotator) produces for one detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionFields {
    /// Observation id; generated on store when absent.
    pub id: Option<Uuid>,
    pub label: Option<String>,
    pub observation_type: Option<String>,
    pub observation_tag: Option<serde_json::Value>,
    pub taxon_id: Option<String>,
    pub scientific_name: Option<String>,
    pub bbox: Option<String>,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    #[serde(flatten)]
    pub media: MediaFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    #[serde(flatten)]
    pub media: MediaFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagePrediction {
    #[serde(flatten)]
    pub media: MediaFields,
    #[serde(flatten)]
    pub prediction: PredictionFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoPrediction {
    #[serde(flatten)]
    pub media: MediaFields,
    #[serde(flatten)]
    pub prediction: PredictionFields,
    #[serde(default)]
    pub video_frame_num: Option<i32>,
}

/// Generic access to the media part of any dataset row.
pub trait MediaRecord {
    const KIND: MediaKind;

    fn media(&self) -> &MediaFields;
    fn media_mut(&mut self) -> &mut MediaFields;
}

/// Dataset rows that carry a prediction.
pub trait PredictionRecord: MediaRecord + Sized {
    fn prediction(&self) -> &PredictionFields;

    fn from_parts(media: MediaFields, prediction: PredictionFields, video_frame_num: Option<i32>) -> Self;

    fn video_frame_num(&self) -> Option<i32> {
        None
    }
}

/// Dataset rows describing media that still needs inference.
pub trait ItemRecord: MediaRecord + Sized {
    fn from_media(media: MediaFields) -> Self;
}

impl MediaRecord for ImageItem {
    const KIND: MediaKind = MediaKind::Image;

    fn media(&self) -> &MediaFields {
        &self.media
    }

    fn media_mut(&mut self) -> &mut MediaFields {
        &mut self.media
    }
}

impl ItemRecord for ImageItem {
    fn from_media(media: MediaFields) -> Self {
        Self { media }
    }
}

impl MediaRecord for VideoItem {
    const KIND: MediaKind = MediaKind::Video;

    fn media(&self) -> &MediaFields {
        &self.media
    }

    fn media_mut(&mut self) -> &mut MediaFields {
        &mut self.media
    }
}

impl ItemRecord for VideoItem {
    fn from_media(media: MediaFields) -> Self {
        Self { media }
    }
}

impl MediaRecord for ImagePrediction {
    const KIND: MediaKind = MediaKind::Image;

    fn media(&self) -> &MediaFields {
        &self.media
    }

    fn media_mut(&mut self) -> &mut MediaFields {
        &mut self.media
    }
}

impl PredictionRecord for ImagePrediction {
    fn prediction(&self) -> &PredictionFields {
        &self.prediction
    }

    fn from_parts(media: MediaFields, prediction: PredictionFields, _video_frame_num: Option<i32>) -> Self {
        Self { media, prediction }
    }
}

impl MediaRecord for VideoPrediction {
    const KIND: MediaKind = MediaKind::Video;

    fn media(&self) -> &MediaFields {
        &self.media
    }

    fn media_mut(&mut self) -> &mut MediaFields {
        &mut self.media
    }
}

impl PredictionRecord for VideoPrediction {
    fn prediction(&self) -> &PredictionFields {
        &self.prediction
    }

    fn from_parts(media: MediaFields, prediction: PredictionFields, video_frame_num: Option<i32>) -> Self {
        Self {
            media,
            prediction,
            video_frame_num,
        }
    }

    fn video_frame_num(&self) -> Option<i32> {
        self.video_frame_num
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_line_is_flat() {
        let line = r#"{"item":"13/A1/IMG_0.JPG","label":"Puma concolor","score":0.9,"bbox":"[0, 0, 1, 1]"}"#;
        let pred: ImagePrediction = serde_json::from_str(line).unwrap();
        assert_eq!(pred.media.item, "13/A1/IMG_0.JPG");
        assert_eq!(pred.prediction.label.as_deref(), Some("Puma concolor"));
        assert!(pred.media.media_id.is_none());

        let back = serde_json::to_value(&pred).unwrap();
        assert_eq!(back["label"], "Puma concolor");
        assert!(back.get("media").is_none());
    }

    #[test]
    fn test_video_prediction_keeps_frame_number() {
        let line = r#"{"media_id":"6f1c2a52-3f0e-4d7b-8a9b-0c1d2e3f4a5b","label":"empty","video_frame_num":12}"#;
        let pred: VideoPrediction = serde_json::from_str(line).unwrap();
        assert_eq!(PredictionRecord::video_frame_num(&pred), Some(12));
        assert_eq!(<VideoPrediction as MediaRecord>::KIND, MediaKind::Video);
    }
}
