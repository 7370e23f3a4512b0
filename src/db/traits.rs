// Database trait — backend-agnostic async interface for all DB operations.
//
// Implementors: SqliteDatabase (wraps rusqlite), PgDatabase (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface.
//
// Lookups that miss return `StoreError::NotFound`; inserts that hit a
// uniqueness constraint return `StoreError::Duplicate`.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::models::{
    MediaKind, MediaQuery, MediaRow, NewObservation, NewObservationMethod, NewPipelineInfo,
    PipelineInfo, ProcessedRow, StorageSummary,
};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    /// Row counts for the main tables.
    async fn storage_summary(&self) -> Result<StorageSummary>;

    // --- Lookups ---

    async fn project_id_by_title(&self, title: &str) -> Result<Uuid>;

    async fn pipeline_id(&self, name: &str, version: &str) -> Result<Uuid>;

    async fn user_id(&self, username: &str) -> Result<Uuid>;

    async fn observation_method_id(&self, name: &str) -> Result<Uuid>;

    async fn file_id_by_url(&self, url: &str) -> Result<Uuid>;

    /// Load a pipeline by (name, version), if registered.
    async fn pipeline_info(&self, name: &str, version: &str) -> Result<Option<PipelineInfo>>;

    // --- Inserts ---

    async fn insert_observation_method(&self, method: &NewObservationMethod) -> Result<Uuid>;

    async fn insert_pipeline_info(&self, pipeline: &NewPipelineInfo) -> Result<Uuid>;

    /// Record that `pipeline_id` processed `file_id`. Both must exist.
    async fn insert_processed_file(&self, file_id: &Uuid, pipeline_id: &Uuid) -> Result<Uuid>;

    /// Insert an observation plus its geometry when a bbox is present.
    async fn insert_observation(&self, observation: &NewObservation) -> Result<Uuid>;

    async fn insert_event(&self, event_id: &Uuid, event_type: &str) -> Result<Uuid>;

    /// Attach a file to an event. Both must exist.
    async fn link_event_file(&self, event_id: &Uuid, file_id: &Uuid) -> Result<i64>;

    // --- Media reads ---

    /// Files not yet processed by the query's pipeline.
    async fn files_to_process(&self, query: &MediaQuery) -> Result<Vec<MediaRow>>;

    /// Observations produced by the query's pipeline, joined with their files.
    async fn processed_files(&self, query: &MediaQuery) -> Result<Vec<ProcessedRow>>;

    /// Files not linked to any event.
    async fn files_without_events(&self, query: &MediaQuery) -> Result<Vec<MediaRow>>;

    // --- Deletes ---

    async fn delete_observations(
        &self,
        project_id: &Uuid,
        site: &str,
        kind: MediaKind,
        pipeline_id: &Uuid,
    ) -> Result<u64>;

    async fn delete_orphan_geoms(&self) -> Result<u64>;

    async fn delete_processed_files(
        &self,
        project_id: &Uuid,
        pipeline_id: &Uuid,
        site: &str,
        kind: MediaKind,
    ) -> Result<u64>;
}
