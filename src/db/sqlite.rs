// SqliteDatabase — rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{
    MediaKind, MediaQuery, MediaRow, NewObservation, NewObservationMethod, NewPipelineInfo,
    PipelineInfo, ProcessedRow, StorageSummary,
};
use super::queries;
use super::traits::Database;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn storage_summary(&self) -> Result<StorageSummary> {
        let conn = self.conn.lock().await;
        queries::storage_summary(&conn)
    }

    async fn project_id_by_title(&self, title: &str) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::project_id_by_title(&conn, title)
    }

    async fn pipeline_id(&self, name: &str, version: &str) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::pipeline_id(&conn, name, version)
    }

    async fn user_id(&self, username: &str) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::user_id(&conn, username)
    }

    async fn observation_method_id(&self, name: &str) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::observation_method_id(&conn, name)
    }

    async fn file_id_by_url(&self, url: &str) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::file_id_by_url(&conn, url)
    }

    async fn pipeline_info(&self, name: &str, version: &str) -> Result<Option<PipelineInfo>> {
        let conn = self.conn.lock().await;
        queries::get_pipeline_info(&conn, name, version)
    }

    async fn insert_observation_method(&self, method: &NewObservationMethod) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::insert_observation_method(&conn, method)
    }

    async fn insert_pipeline_info(&self, pipeline: &NewPipelineInfo) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::insert_pipeline_info(&conn, pipeline)
    }

    async fn insert_processed_file(&self, file_id: &Uuid, pipeline_id: &Uuid) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::insert_processed_file(&conn, file_id, pipeline_id)
    }

    async fn insert_observation(&self, observation: &NewObservation) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::insert_observation(&conn, observation)
    }

    async fn insert_event(&self, event_id: &Uuid, event_type: &str) -> Result<Uuid> {
        let conn = self.conn.lock().await;
        queries::insert_event(&conn, event_id, event_type)
    }

    async fn link_event_file(&self, event_id: &Uuid, file_id: &Uuid) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::link_event_file(&conn, event_id, file_id)
    }

    async fn files_to_process(&self, query: &MediaQuery) -> Result<Vec<MediaRow>> {
        let conn = self.conn.lock().await;
        queries::files_to_process(&conn, query)
    }

    async fn processed_files(&self, query: &MediaQuery) -> Result<Vec<ProcessedRow>> {
        let conn = self.conn.lock().await;
        queries::processed_files(&conn, query)
    }

    async fn files_without_events(&self, query: &MediaQuery) -> Result<Vec<MediaRow>> {
        let conn = self.conn.lock().await;
        queries::files_without_events(&conn, query)
    }

    async fn delete_observations(
        &self,
        project_id: &Uuid,
        site: &str,
        kind: MediaKind,
        pipeline_id: &Uuid,
    ) -> Result<u64> {
        let conn = self.conn.lock().await;
        queries::delete_observations(&conn, project_id, site, kind, pipeline_id)
    }

    async fn delete_orphan_geoms(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        queries::delete_orphan_geoms(&conn)
    }

    async fn delete_processed_files(
        &self,
        project_id: &Uuid,
        pipeline_id: &Uuid,
        site: &str,
        kind: MediaKind,
    ) -> Result<u64> {
        let conn = self.conn.lock().await;
        queries::delete_processed_files(&conn, project_id, pipeline_id, site, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::error::is_not_found;
    use crate::db::queries::tests::{image_query, seed, test_db};

    fn seeded() -> (SqliteDatabase, queries::tests::Seed) {
        let conn = test_db();
        let fixture = seed(&conn);
        (SqliteDatabase::new(conn), fixture)
    }

    #[tokio::test]
    async fn test_trait_table_count() {
        let db = SqliteDatabase::new(test_db());
        assert_eq!(db.table_count().await.unwrap(), 17);
    }

    #[tokio::test]
    async fn test_trait_lookups() {
        let (db, fixture) = seeded();
        assert_eq!(
            db.project_id_by_title("SiPeCaM").await.unwrap(),
            fixture.project_id
        );
        assert_eq!(
            db.pipeline_id("megadetector", "v5a").await.unwrap(),
            fixture.pipeline_id
        );
        assert!(is_not_found(&db.user_id("nobody").await.unwrap_err()));
    }

    #[tokio::test]
    async fn test_trait_event_flow() {
        let (db, fixture) = seeded();
        let event_id = Uuid::new_v4();
        db.insert_event(&event_id, "photo_sequence").await.unwrap();
        for file_id in &fixture.image_ids[..2] {
            let link = db.link_event_file(&event_id, file_id).await.unwrap();
            assert!(link > 0);
        }
        let remaining = db.files_without_events(&image_query(None)).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].file_id, fixture.image_ids[2]);
    }

    #[tokio::test]
    async fn test_trait_storage_summary() {
        let (db, fixture) = seeded();
        db.insert_processed_file(&fixture.video_id, &fixture.pipeline_id)
            .await
            .unwrap();
        let summary = db.storage_summary().await.unwrap();
        assert_eq!(summary.projects, 1);
        assert_eq!(summary.files, 4);
        assert_eq!(summary.pipelines, 1);
        assert_eq!(summary.processed_files, 1);
    }
}
