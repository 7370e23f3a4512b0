// PgDatabase — PostgreSQL backend implementing the Database trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Key differences from SQLite:
// - native UUID columns instead of TEXT
// - JSONB for file metadata, tags and execution params
// - TIMESTAMPTZ instead of TEXT for timestamps
// - ILIKE for MIME matching
// - $1/$2 parameter syntax (handled by sqlx)

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};
use uuid::Uuid;

use super::error::StoreError;
use super::models::{
    parse_capture_time, processed_file_id, MediaKind, MediaQuery, MediaRow, NewObservation,
    NewObservationMethod, NewPipelineInfo, PipelineInfo, ProcessedRow, StorageSummary,
};
use super::traits::Database;

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

pub struct PgDatabase {
    pool: PgPool,
}

// Columns 0..=9 map onto MediaRow (see `media_row`). $1 is the metadata key
// holding the capture time, $2 project title, $3 MIME pattern, $4 site.
const MEDIA_SELECT: &str = "
    SELECT f.id, f.url,
           f.file_metadata->>$1,
           CASE WHEN jsonb_typeof(f.file_metadata->'Longitude') = 'number'
                THEN (f.file_metadata->>'Longitude')::double precision END,
           CASE WHEN jsonb_typeof(f.file_metadata->'Latitude') = 'number'
                THEN (f.file_metadata->>'Latitude')::double precision END,
           s.identifier, sa.identifier, pd.project_serial_number, eco.name,
           ev.identifier";

const MEDIA_JOINS: &str = "
    FROM files f
    JOIN sampling_points sp ON sp.id = f.sampling_point_id
    JOIN sampling_areas sa ON sa.id = sp.sampling_area_id
    JOIN sites s ON s.id = sp.site_id
    JOIN project_devices pd ON pd.id = sp.device_id
    LEFT JOIN ecosystems eco ON eco.id = s.ecosystem_id
    LEFT JOIN events_files ef ON ef.file_id = f.id
    LEFT JOIN events ev ON ev.id = ef.event_id";

const MEDIA_FILTER: &str = "
    WHERE f.project_id IN (SELECT id FROM projects WHERE title = $2)
      AND f.mime_type ILIKE $3
      AND s.identifier = $4";

// $1 site, $2 MIME pattern, $3 project id.
const SCOPED_FILES: &str = "
    SELECT f.id FROM files f
    JOIN sampling_points sp ON sp.id = f.sampling_point_id
    JOIN sites s ON s.id = sp.site_id
    WHERE s.identifier = $1 AND f.mime_type ILIKE $2 AND f.project_id = $3";

fn media_row(row: &PgRow) -> Result<MediaRow> {
    let captured_raw: Option<String> = row.try_get(2)?;
    Ok(MediaRow {
        file_id: row.try_get(0)?,
        url: row.try_get(1)?,
        captured_at: captured_raw.as_deref().and_then(parse_capture_time),
        longitude: row.try_get(3)?,
        latitude: row.try_get(4)?,
        site_identifier: row.try_get(5)?,
        sampling_area: row.try_get(6)?,
        device: row.try_get(7)?,
        ecosystem: row.try_get(8)?,
        seq_id: row.try_get(9)?,
    })
}

/// Turn unique violations into `StoreError::Duplicate`.
fn map_insert_error(err: sqlx_core::Error, entity: &'static str) -> anyhow::Error {
    if let sqlx_core::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::duplicate(entity, db_err.message());
        }
    }
    anyhow::Error::new(err).context(format!("Failed to insert {entity}"))
}

impl PgDatabase {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on a dedicated connection so two
    /// processes starting together don't race to apply the same migration.
    /// The unlock always runs; a migration error takes priority over an
    /// unlock error.
    ///
    /// Migration 1 is plain idempotent DDL and runs outside a transaction.
    /// Migrations 2+ run in a transaction so the schema change and the
    /// schema_version insert land together.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "BALAMCAM" as a big-endian i64.
        const MIGRATION_LOCK_KEY: i64 = 0x42414C414D43414D_u64 as i64;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [
                (
                    1,
                    include_str!("../../migrations/postgres/0001_initial.sql"),
                ),
                (
                    2,
                    include_str!("../../migrations/postgres/0002_unique_method_name.sql"),
                ),
            ];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await?
                .try_get(0)?;

                if applied {
                    continue;
                }
                if version == 1 {
                    sqlx_core::raw_sql::raw_sql(sql).execute(&self.pool).await?;
                } else {
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit().await?;
                }
                tracing::info!(version, "Applied PostgreSQL migration");
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        migration_result?;
        unlock_result?;

        Ok(())
    }

    /// `table` is always one of our own constants, never caller input.
    async fn require_row(&self, table: &str, entity: &'static str, id: &Uuid) -> Result<()> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1)");
        let exists: bool = sqlx_core::query::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        if !exists {
            return Err(StoreError::not_found(entity, id));
        }
        Ok(())
    }

    async fn lookup_id(
        &self,
        sql: &str,
        binds: &[&str],
        entity: &'static str,
        key: &str,
    ) -> Result<Uuid> {
        let mut query = sqlx_core::query::query(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to look up {entity} '{key}'"))?;
        match row {
            Some(row) => Ok(row.try_get(0)?),
            None => Err(StoreError::not_found(entity, key)),
        }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn storage_summary(&self) -> Result<StorageSummary> {
        let row = sqlx_core::query::query(
            "SELECT
                (SELECT COUNT(*) FROM projects),
                (SELECT COUNT(*) FROM files),
                (SELECT COUNT(*) FROM observations),
                (SELECT COUNT(*) FROM events),
                (SELECT COUNT(*) FROM pipeline_info),
                (SELECT COUNT(*) FROM processed_files)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StorageSummary {
            projects: row.try_get(0)?,
            files: row.try_get(1)?,
            observations: row.try_get(2)?,
            events: row.try_get(3)?,
            pipelines: row.try_get(4)?,
            processed_files: row.try_get(5)?,
        })
    }

    async fn project_id_by_title(&self, title: &str) -> Result<Uuid> {
        self.lookup_id(
            "SELECT id FROM projects WHERE title = $1",
            &[title],
            "project",
            title,
        )
        .await
    }

    async fn pipeline_id(&self, name: &str, version: &str) -> Result<Uuid> {
        self.lookup_id(
            "SELECT id FROM pipeline_info WHERE name = $1 AND version = $2",
            &[name, version],
            "pipeline",
            &format!("{name}@{version}"),
        )
        .await
    }

    async fn user_id(&self, username: &str) -> Result<Uuid> {
        self.lookup_id(
            "SELECT id FROM users WHERE username = $1",
            &[username],
            "user",
            username,
        )
        .await
    }

    async fn observation_method_id(&self, name: &str) -> Result<Uuid> {
        self.lookup_id(
            "SELECT id FROM observation_methods WHERE name = $1",
            &[name],
            "observation method",
            name,
        )
        .await
    }

    async fn file_id_by_url(&self, url: &str) -> Result<Uuid> {
        self.lookup_id("SELECT id FROM files WHERE url = $1", &[url], "file", url)
            .await
    }

    async fn pipeline_info(&self, name: &str, version: &str) -> Result<Option<PipelineInfo>> {
        let row = sqlx_core::query::query(
            "SELECT id, name, version, url_repo_model, execution_params, comments,
                    to_char(last_execution, 'YYYY-MM-DD HH24:MI:SS'),
                    to_char(created_at, 'YYYY-MM-DD HH24:MI:SS')
             FROM pipeline_info WHERE name = $1 AND version = $2",
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(r) => Ok(Some(PipelineInfo {
                id: r.try_get(0)?,
                name: r.try_get(1)?,
                version: r.try_get(2)?,
                url_repo_model: r.try_get(3)?,
                execution_params: r.try_get(4)?,
                comments: r.try_get(5)?,
                last_execution: r.try_get(6)?,
                created_at: r.try_get(7)?,
            })),
        }
    }

    async fn insert_observation_method(&self, method: &NewObservationMethod) -> Result<Uuid> {
        sqlx_core::query::query(
            "INSERT INTO observation_methods (id, name, description) VALUES ($1, $2, $3)",
        )
        .bind(method.id)
        .bind(&method.name)
        .bind(&method.description)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "observation method"))?;
        Ok(method.id)
    }

    async fn insert_pipeline_info(&self, pipeline: &NewPipelineInfo) -> Result<Uuid> {
        sqlx_core::query::query(
            "INSERT INTO pipeline_info
                (id, name, version, url_repo_model, execution_params, comments, last_execution)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.version)
        .bind(&pipeline.url_repo_model)
        .bind(&pipeline.execution_params)
        .bind(&pipeline.comments)
        .bind(pipeline.last_execution)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "pipeline"))?;
        Ok(pipeline.id)
    }

    async fn insert_processed_file(&self, file_id: &Uuid, pipeline_id: &Uuid) -> Result<Uuid> {
        self.require_row("files", "file", file_id).await?;
        self.require_row("pipeline_info", "pipeline", pipeline_id).await?;

        let id = processed_file_id(file_id, pipeline_id);
        sqlx_core::query::query(
            "INSERT INTO processed_files (id, file_id, pipeline_id) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(file_id)
        .bind(pipeline_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "processed file"))?;
        Ok(id)
    }

    async fn insert_observation(&self, obs: &NewObservation) -> Result<Uuid> {
        self.require_row("files", "file", &obs.file_id).await?;
        self.require_row("projects", "project", &obs.project_id).await?;
        if let Some(pipeline_id) = &obs.pipeline_id {
            self.require_row("pipeline_info", "pipeline", pipeline_id).await?;
        }
        self.require_row("users", "user", &obs.user_id).await?;
        self.require_row(
            "observation_methods",
            "observation method",
            &obs.observation_method_id,
        )
        .await?;

        let mut tx = self.pool.begin().await?;

        let geom_id = match &obs.bbox {
            Some(bbox) => {
                let geom_id = Uuid::new_v4();
                sqlx_core::query::query(
                    "INSERT INTO observation_geoms (id, bbox, video_frame_num) VALUES ($1, $2, $3)",
                )
                .bind(geom_id)
                .bind(bbox)
                .bind(obs.video_frame_num)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_insert_error(e, "observation geometry"))?;
                Some(geom_id)
            }
            None => None,
        };

        sqlx_core::query::query(
            "INSERT INTO observations
                (id, file_id, project_id, pipeline_id, user_id, observation_method_id, geom_id,
                 observation_type, observation_tag, taxon_id, score, confidence)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(obs.id)
        .bind(obs.file_id)
        .bind(obs.project_id)
        .bind(obs.pipeline_id)
        .bind(obs.user_id)
        .bind(obs.observation_method_id)
        .bind(geom_id)
        .bind(&obs.observation_type)
        .bind(&obs.observation_tag)
        .bind(&obs.taxon_id)
        .bind(obs.score)
        .bind(obs.confidence)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, "observation"))?;

        tx.commit().await?;
        Ok(obs.id)
    }

    async fn insert_event(&self, event_id: &Uuid, event_type: &str) -> Result<Uuid> {
        sqlx_core::query::query(
            "INSERT INTO events (id, identifier, event_type) VALUES ($1, $2, $3)",
        )
        .bind(event_id)
        .bind(event_id.to_string())
        .bind(event_type)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "event"))?;
        Ok(*event_id)
    }

    async fn link_event_file(&self, event_id: &Uuid, file_id: &Uuid) -> Result<i64> {
        self.require_row("files", "file", file_id).await?;
        self.require_row("events", "event", event_id).await?;

        let row = sqlx_core::query::query(
            "INSERT INTO events_files (event_id, file_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(event_id)
        .bind(file_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "event file link"))?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn files_to_process(&self, query: &MediaQuery) -> Result<Vec<MediaRow>> {
        let (name, version) = query.require_pipeline()?;
        let sql = format!(
            "{MEDIA_SELECT} {MEDIA_JOINS} {MEDIA_FILTER}
               AND f.id NOT IN (
                   SELECT pf.file_id FROM processed_files pf
                   JOIN pipeline_info p ON p.id = pf.pipeline_id
                   WHERE p.name = $5 AND p.version = $6)
             ORDER BY f.url"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(&query.datetime_key)
            .bind(&query.project_title)
            .bind(query.kind.mime_pattern())
            .bind(&query.site)
            .bind(name)
            .bind(version)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(media_row).collect()
    }

    async fn processed_files(&self, query: &MediaQuery) -> Result<Vec<ProcessedRow>> {
        let (name, version) = query.require_pipeline()?;
        let sql = format!(
            "{MEDIA_SELECT},
               o.id, o.observation_type, o.observation_tag, o.taxon_id,
               g.bbox, g.video_frame_num, o.score, o.confidence
             {MEDIA_JOINS}
             JOIN observations o ON o.file_id = f.id
             JOIN pipeline_info p ON p.id = o.pipeline_id
             LEFT JOIN observation_geoms g ON g.id = o.geom_id
             {MEDIA_FILTER}
               AND p.name = $5 AND p.version = $6
             ORDER BY f.url, o.id"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(&query.datetime_key)
            .bind(&query.project_title)
            .bind(query.kind.mime_pattern())
            .bind(&query.site)
            .bind(name)
            .bind(version)
            .fetch_all(&self.pool)
            .await?;

        let mut processed = Vec::with_capacity(rows.len());
        for row in &rows {
            processed.push(ProcessedRow {
                media: media_row(row)?,
                observation_id: row.try_get(10)?,
                observation_type: row.try_get(11)?,
                observation_tag: row.try_get(12)?,
                taxon_id: row.try_get(13)?,
                bbox: row.try_get(14)?,
                video_frame_num: row.try_get(15)?,
                score: row.try_get(16)?,
                confidence: row.try_get(17)?,
            });
        }
        Ok(processed)
    }

    async fn files_without_events(&self, query: &MediaQuery) -> Result<Vec<MediaRow>> {
        let sql = format!(
            "{MEDIA_SELECT} {MEDIA_JOINS} {MEDIA_FILTER}
               AND f.id NOT IN (SELECT file_id FROM events_files)
             ORDER BY f.url"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(&query.datetime_key)
            .bind(&query.project_title)
            .bind(query.kind.mime_pattern())
            .bind(&query.site)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(media_row).collect()
    }

    async fn delete_observations(
        &self,
        project_id: &Uuid,
        site: &str,
        kind: MediaKind,
        pipeline_id: &Uuid,
    ) -> Result<u64> {
        let sql = format!(
            "DELETE FROM observations
             WHERE pipeline_id = $4 AND file_id IN ({SCOPED_FILES})"
        );
        let result = sqlx_core::query::query(&sql)
            .bind(site)
            .bind(kind.mime_pattern())
            .bind(project_id)
            .bind(pipeline_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_orphan_geoms(&self) -> Result<u64> {
        let result = sqlx_core::query::query(
            "DELETE FROM observation_geoms g
             WHERE NOT EXISTS (SELECT 1 FROM observations o WHERE o.geom_id = g.id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_processed_files(
        &self,
        project_id: &Uuid,
        pipeline_id: &Uuid,
        site: &str,
        kind: MediaKind,
    ) -> Result<u64> {
        let sql = format!(
            "DELETE FROM processed_files
             WHERE pipeline_id = $4 AND file_id IN ({SCOPED_FILES})"
        );
        let result = sqlx_core::query::query(&sql)
            .bind(site)
            .bind(kind.mime_pattern())
            .bind(project_id)
            .bind(pipeline_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
