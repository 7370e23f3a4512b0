// Media retrieval — the dataset a pipeline starts from.
//
// The media kind comes from the record type asked for: ImageItem reads
// images, VideoPrediction reads video observations, and so on.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::MediaScope;
use crate::config::ProjectSettings;
use crate::dataset::mapping::{item_from_db, prediction_from_db};
use crate::dataset::{ItemRecord, PredictionRecord};
use crate::db::Database;

/// Media of the scope that `pipeline`@`version` has not processed yet.
pub async fn media_to_process<R: ItemRecord>(
    db: &Arc<dyn Database>,
    settings: &ProjectSettings,
    scope: &MediaScope,
    pipeline: &str,
    version: &str,
) -> Result<Vec<R>> {
    db.project_id_by_title(&scope.project).await?;
    let query = scope.query(settings, R::KIND, Some((pipeline, version)));
    let rows = db.files_to_process(&query).await?;
    info!(
        project = %scope.project,
        site = %scope.site,
        kind = R::KIND.as_str(),
        pipeline,
        version,
        count = rows.len(),
        "Media pending inference"
    );
    Ok(rows.iter().map(item_from_db).collect())
}

/// Observations `pipeline`@`version` already stored for the scope, one
/// record per observation.
pub async fn processed_media<P: PredictionRecord>(
    db: &Arc<dyn Database>,
    settings: &ProjectSettings,
    scope: &MediaScope,
    pipeline: &str,
    version: &str,
) -> Result<Vec<P>> {
    db.project_id_by_title(&scope.project).await?;
    let query = scope.query(settings, P::KIND, Some((pipeline, version)));
    let rows = db.processed_files(&query).await?;
    info!(
        project = %scope.project,
        site = %scope.site,
        kind = P::KIND.as_str(),
        pipeline,
        version,
        count = rows.len(),
        "Processed observations"
    );
    Ok(rows.iter().map(prediction_from_db).collect())
}

/// Media of the scope not yet assigned to any event.
pub async fn new_media<R: ItemRecord>(
    db: &Arc<dyn Database>,
    settings: &ProjectSettings,
    scope: &MediaScope,
) -> Result<Vec<R>> {
    db.project_id_by_title(&scope.project).await?;
    let query = scope.query(settings, R::KIND, None);
    let rows = db.files_without_events(&query).await?;
    info!(
        project = %scope.project,
        site = %scope.site,
        kind = R::KIND.as_str(),
        count = rows.len(),
        "Media without events"
    );
    Ok(rows.iter().map(item_from_db).collect())
}
