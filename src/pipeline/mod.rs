// Pipeline operations — what inference jobs call around a model run.
//
// retrieval:    read media to process / already processed as dataset rows
// events:       group new images into sequences and store them as events
// observations: write predictions back, or delete a pipeline's results
// info:         register pipelines and read their execution parameters

pub mod events;
pub mod info;
pub mod observations;
pub mod retrieval;

use indicatif::{ProgressBar, ProgressStyle};

use crate::config::ProjectSettings;
use crate::db::models::{MediaKind, MediaQuery};

/// Project and site a pipeline run works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaScope {
    pub project: String,
    pub site: String,
}

impl MediaScope {
    pub fn new(project: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            site: site.into(),
        }
    }

    pub(crate) fn query(
        &self,
        settings: &ProjectSettings,
        kind: MediaKind,
        pipeline: Option<(&str, &str)>,
    ) -> MediaQuery {
        MediaQuery {
            project_title: self.project.clone(),
            site: self.site.clone(),
            kind,
            datetime_key: settings.datetime_key.clone(),
            pipeline: pipeline.map(|(name, version)| (name.to_string(), version.to_string())),
        }
    }
}

/// Bar for a bulk loop, labelled like `  Storing [====    ] 12/40 (3s)`.
pub(crate) fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let template = format!("  {label} [{{bar:30}}] {{pos}}/{{len}} ({{eta}})");
    if let Ok(style) = ProgressStyle::default_bar().template(&template) {
        pb.set_style(style);
    }
    pb
}
