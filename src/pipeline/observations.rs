// Observation storage — write pipeline predictions (or human annotations)
// back to the database, and delete a pipeline's results for a site.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{progress_bar, MediaScope};
use crate::config::ProjectSettings;
use crate::dataset::mapping::{to_new_observation, ObservationOwner};
use crate::dataset::PredictionRecord;
use crate::db::models::{MediaKind, ObservationMethodKind};
use crate::db::{is_duplicate, Database};

/// Who is storing observations, and for which pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    pub project: String,
    /// Pipeline (name, version). `None` stores human annotations.
    pub pipeline: Option<(String, String)>,
    pub username: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub stored: usize,
    pub failed: usize,
    /// Files newly marked as processed by the pipeline.
    pub marked_processed: usize,
    pub already_processed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub observations: u64,
    pub geometries: u64,
    pub processed_files: u64,
}

/// Store one observation per record, then mark every file they refer to
/// as processed by the pipeline.
///
/// Rows that fail (unknown file, duplicate id, ...) are logged and counted;
/// they never abort the batch. Unknown project, pipeline, user or method
/// does, before anything is written.
pub async fn store_observations<P: PredictionRecord>(
    db: &Arc<dyn Database>,
    settings: &ProjectSettings,
    request: &StoreRequest,
    records: &[P],
) -> Result<StoreSummary> {
    let project_id = db.project_id_by_title(&request.project).await?;

    let (pipeline_id, method) = match &request.pipeline {
        Some((name, version)) => (
            Some(db.pipeline_id(name, version).await?),
            ObservationMethodKind::Machine,
        ),
        None => (None, ObservationMethodKind::Human),
    };
    let user_id = db
        .user_id(&request.username)
        .await
        .context("Observations must be authored by an existing user")?;
    let observation_method_id = db
        .observation_method_id(method.as_str())
        .await
        .with_context(|| {
            format!(
                "Observation method '{}' is not registered. Add it with `balam method add {}`.",
                method.as_str(),
                method.as_str()
            )
        })?;

    let owner = ObservationOwner {
        project_id,
        pipeline_id,
        user_id,
        observation_method_id,
    };

    let mut summary = StoreSummary::default();
    let mut file_ids: BTreeSet<Uuid> = BTreeSet::new();

    let pb = progress_bar(records.len(), "Storing");
    for record in records {
        pb.inc(1);
        let media = record.media();
        let file_id = match media.media_id {
            Some(id) => id,
            None => {
                let url = settings.media_url(&media.item);
                match db.file_id_by_url(&url).await {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(item = %media.item, error = %e, "Unknown file, observation skipped");
                        summary.failed += 1;
                        continue;
                    }
                }
            }
        };

        let observation = to_new_observation(record, file_id, &owner);
        match db.insert_observation(&observation).await {
            Ok(_) => {
                summary.stored += 1;
                file_ids.insert(file_id);
            }
            Err(e) => {
                warn!(item = %media.item, file = %file_id, error = %e, "Failed to store observation");
                summary.failed += 1;
            }
        }
    }
    pb.finish_and_clear();

    if let Some(pipeline_id) = pipeline_id {
        for file_id in &file_ids {
            match db.insert_processed_file(file_id, &pipeline_id).await {
                Ok(_) => summary.marked_processed += 1,
                Err(e) if is_duplicate(&e) => {
                    warn!(file = %file_id, "File already marked as processed by this pipeline");
                    summary.already_processed += 1;
                }
                Err(e) => return Err(e.context(format!("Failed to mark {file_id} as processed"))),
            }
        }
    }

    info!(
        project = %request.project,
        method = method.as_str(),
        stored = summary.stored,
        failed = summary.failed,
        marked_processed = summary.marked_processed,
        "Stored observations"
    );
    Ok(summary)
}

/// Delete the observations `pipeline`@`version` made for a project/site,
/// the geometries they leave orphaned, and the processed-file markers.
pub async fn delete_observation_products(
    db: &Arc<dyn Database>,
    scope: &MediaScope,
    kind: MediaKind,
    pipeline: &str,
    version: &str,
) -> Result<DeleteSummary> {
    let project_id = db.project_id_by_title(&scope.project).await?;
    let pipeline_id = db.pipeline_id(pipeline, version).await?;

    let observations = db
        .delete_observations(&project_id, &scope.site, kind, &pipeline_id)
        .await?;
    info!(count = observations, "Deleted observations");

    let geometries = db.delete_orphan_geoms().await?;
    info!(count = geometries, "Deleted orphan observation geometries");

    let processed_files = db
        .delete_processed_files(&project_id, &pipeline_id, &scope.site, kind)
        .await?;
    info!(count = processed_files, "Deleted processed-file markers");

    Ok(DeleteSummary {
        observations,
        geometries,
        processed_files,
    })
}
