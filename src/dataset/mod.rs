// Datasets — the flat record types inference pipelines read and write,
// and their mapping to and from database rows.

pub mod fields;
pub mod jsonl;
pub mod mapping;

pub use fields::{
    ImageItem, ImagePrediction, ItemRecord, MediaFields, MediaRecord, PredictionFields,
    PredictionRecord, VideoItem, VideoPrediction,
};
pub use mapping::{assign_sequences, attach_video_items, sequence_inputs, strip_data_prefix};
