// Pipeline registry — register inference pipelines and read back their
// execution parameters in typed form.
//
// Parameters are stored as a JSON object on `pipeline_info`. Each pipeline
// family has its own set; `ExecutionParams::parse` reads the stored JSON
// for a given family.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::db::models::{NewPipelineInfo, PipelineInfo};
use crate::db::{Database, StoreError};

/// The pipeline families the platform runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineFamily {
    /// Filters out images without wildlife.
    FilteringImages,
    /// Filters out videos without wildlife.
    FilteringVideos,
    Megadetector,
    /// Ensemble taxa classification of animal images.
    TaxaImages,
    /// Ensemble taxa classification of animal videos.
    TaxaVideos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteringImagesParams {
    pub threshold: f64,
    pub pred_method: String,
    pub detector_version: String,
    pub min_score_of_stored_dets: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteringVideosParams {
    #[serde(flatten)]
    pub images: FilteringImagesParams,
    pub freq_video_sampling: f64,
}

/// Megadetector stores its cut-off under `min_score_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MegadetectorParams {
    #[serde(rename = "min_score_threshold")]
    pub min_score_of_stored_dets: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxaImagesParams {
    pub pred_method: String,
    pub dets_threshold: f64,
    pub models_names: Vec<String>,
    pub models_weights: Vec<f64>,
    pub detector_version: String,
    pub min_score_of_stored_dets: f64,
    pub obs_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxaVideosParams {
    #[serde(flatten)]
    pub images: TaxaImagesParams,
    pub freq_video_sampling: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionParams {
    FilteringImages(FilteringImagesParams),
    FilteringVideos(FilteringVideosParams),
    Megadetector(MegadetectorParams),
    TaxaImages(TaxaImagesParams),
    TaxaVideos(TaxaVideosParams),
}

impl ExecutionParams {
    /// Read stored parameters as `family`. Extra keys are ignored; missing
    /// or mistyped ones are an error.
    pub fn parse(family: PipelineFamily, raw: &Value) -> Result<Self> {
        let raw = raw.clone();
        let params = match family {
            PipelineFamily::FilteringImages => Self::FilteringImages(serde_json::from_value(raw)?),
            PipelineFamily::FilteringVideos => Self::FilteringVideos(serde_json::from_value(raw)?),
            PipelineFamily::Megadetector => Self::Megadetector(serde_json::from_value(raw)?),
            PipelineFamily::TaxaImages => Self::TaxaImages(serde_json::from_value(raw)?),
            PipelineFamily::TaxaVideos => Self::TaxaVideos(serde_json::from_value(raw)?),
        };
        Ok(params)
    }

    pub fn family(&self) -> PipelineFamily {
        match self {
            Self::FilteringImages(_) => PipelineFamily::FilteringImages,
            Self::FilteringVideos(_) => PipelineFamily::FilteringVideos,
            Self::Megadetector(_) => PipelineFamily::Megadetector,
            Self::TaxaImages(_) => PipelineFamily::TaxaImages,
            Self::TaxaVideos(_) => PipelineFamily::TaxaVideos,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::FilteringImages(p) => serde_json::to_value(p)?,
            Self::FilteringVideos(p) => serde_json::to_value(p)?,
            Self::Megadetector(p) => serde_json::to_value(p)?,
            Self::TaxaImages(p) => serde_json::to_value(p)?,
            Self::TaxaVideos(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Minimum detection score kept when results are stored.
    pub fn min_score_of_stored_dets(&self) -> f64 {
        match self {
            Self::FilteringImages(p) => p.min_score_of_stored_dets,
            Self::FilteringVideos(p) => p.images.min_score_of_stored_dets,
            Self::Megadetector(p) => p.min_score_of_stored_dets,
            Self::TaxaImages(p) => p.min_score_of_stored_dets,
            Self::TaxaVideos(p) => p.images.min_score_of_stored_dets,
        }
    }
}

/// A registered pipeline with typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPipeline {
    pub info: PipelineInfo,
    pub params: ExecutionParams,
}

/// Register `name`@`version`. Registering the same pair twice is a
/// `StoreError::Duplicate`.
pub async fn register_pipeline(
    db: &Arc<dyn Database>,
    name: &str,
    version: &str,
    params: &ExecutionParams,
    url_repo_model: &str,
    comments: &str,
) -> Result<Uuid> {
    let pipeline = NewPipelineInfo {
        id: Uuid::new_v4(),
        name: name.to_string(),
        version: version.to_string(),
        url_repo_model: url_repo_model.to_string(),
        execution_params: params.to_value()?,
        comments: comments.to_string(),
        last_execution: Some(Utc::now()),
    };
    let id = db.insert_pipeline_info(&pipeline).await?;
    info!(name, version, family = ?params.family(), "Registered pipeline");
    Ok(id)
}

/// Load `name`@`version` and parse its parameters as `family`.
pub async fn load_pipeline(
    db: &Arc<dyn Database>,
    name: &str,
    version: &str,
    family: PipelineFamily,
) -> Result<LoadedPipeline> {
    let info = db
        .pipeline_info(name, version)
        .await?
        .ok_or_else(|| StoreError::not_found("pipeline", format!("{name}@{version}")))?;
    let params = ExecutionParams::parse(family, &info.execution_params).with_context(|| {
        format!("Stored parameters of {name}@{version} don't match the {family:?} pipeline family")
    })?;
    Ok(LoadedPipeline { info, params })
}
