// Database queries — CRUD operations for all tables (SQLite).
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.
// All values are bound as parameters, including the per-project metadata
// key that holds the capture time.

use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::error::StoreError;
use super::models::{
    parse_capture_time, processed_file_id, MediaKind, MediaQuery, MediaRow, NewObservation,
    NewObservationMethod, NewPipelineInfo, PipelineInfo, ProcessedRow, StorageSummary,
};

// --- Helpers ---

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Turn UNIQUE / PRIMARY KEY violations into `StoreError::Duplicate`.
fn map_insert_error(err: rusqlite::Error, entity: &'static str) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(ref failure, ref msg) = err {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            let detail = msg.clone().unwrap_or_else(|| err.to_string());
            return StoreError::duplicate(entity, detail);
        }
    }
    anyhow::Error::new(err).context(format!("Failed to insert {entity}"))
}

/// `table` is always one of our own constants, never caller input.
fn row_exists(conn: &Connection, table: &str, id: &Uuid) -> Result<bool> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)");
    let exists: bool = conn.query_row(&sql, params![id.to_string()], |row| row.get(0))?;
    Ok(exists)
}

fn require_row(conn: &Connection, table: &str, entity: &'static str, id: &Uuid) -> Result<()> {
    if !row_exists(conn, table, id)? {
        return Err(StoreError::not_found(entity, id));
    }
    Ok(())
}

fn lookup_id(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    entity: &'static str,
    key: &str,
) -> Result<Uuid> {
    let id = conn
        .query_row(sql, params, |row| uuid_at(row, 0))
        .optional()
        .with_context(|| format!("Failed to look up {entity} '{key}'"))?;
    id.ok_or_else(|| StoreError::not_found(entity, key))
}

// --- Lookups ---

/// Resolve a project title to its id.
pub fn project_id_by_title(conn: &Connection, title: &str) -> Result<Uuid> {
    lookup_id(
        conn,
        "SELECT id FROM projects WHERE title = ?1",
        params![title],
        "project",
        title,
    )
}

/// Resolve a pipeline (name, version) to its id.
pub fn pipeline_id(conn: &Connection, name: &str, version: &str) -> Result<Uuid> {
    lookup_id(
        conn,
        "SELECT id FROM pipeline_info WHERE name = ?1 AND version = ?2",
        params![name, version],
        "pipeline",
        &format!("{name}@{version}"),
    )
}

pub fn user_id(conn: &Connection, username: &str) -> Result<Uuid> {
    lookup_id(
        conn,
        "SELECT id FROM users WHERE username = ?1",
        params![username],
        "user",
        username,
    )
}

pub fn observation_method_id(conn: &Connection, name: &str) -> Result<Uuid> {
    lookup_id(
        conn,
        "SELECT id FROM observation_methods WHERE name = ?1",
        params![name],
        "observation method",
        name,
    )
}

pub fn file_id_by_url(conn: &Connection, url: &str) -> Result<Uuid> {
    lookup_id(
        conn,
        "SELECT id FROM files WHERE url = ?1",
        params![url],
        "file",
        url,
    )
}

/// Load a registered pipeline with its execution parameters.
pub fn get_pipeline_info(
    conn: &Connection,
    name: &str,
    version: &str,
) -> Result<Option<PipelineInfo>> {
    let raw = conn
        .query_row(
            "SELECT id, name, version, url_repo_model, execution_params, comments,
                    last_execution, created_at
             FROM pipeline_info WHERE name = ?1 AND version = ?2",
            params![name, version],
            |row| {
                Ok((
                    uuid_at(row, 0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?;

    match raw {
        None => Ok(None),
        Some((id, name, version, url_repo_model, params_json, comments, last_execution, created_at)) => {
            let execution_params = serde_json::from_str(&params_json)
                .with_context(|| format!("Corrupt execution_params for pipeline {name}@{version}"))?;
            Ok(Some(PipelineInfo {
                id,
                name,
                version,
                url_repo_model,
                execution_params,
                comments,
                last_execution,
                created_at,
            }))
        }
    }
}

// --- Inserts ---

pub fn insert_observation_method(conn: &Connection, method: &NewObservationMethod) -> Result<Uuid> {
    conn.execute(
        "INSERT INTO observation_methods (id, name, description) VALUES (?1, ?2, ?3)",
        params![method.id.to_string(), method.name, method.description],
    )
    .map_err(|e| map_insert_error(e, "observation method"))?;
    Ok(method.id)
}

pub fn insert_pipeline_info(conn: &Connection, pipeline: &NewPipelineInfo) -> Result<Uuid> {
    let last_execution = pipeline
        .last_execution
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string());
    conn.execute(
        "INSERT INTO pipeline_info
            (id, name, version, url_repo_model, execution_params, comments, last_execution)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            pipeline.id.to_string(),
            pipeline.name,
            pipeline.version,
            pipeline.url_repo_model,
            pipeline.execution_params.to_string(),
            pipeline.comments,
            last_execution,
        ],
    )
    .map_err(|e| map_insert_error(e, "pipeline"))?;
    Ok(pipeline.id)
}

/// Mark a file as processed by a pipeline.
///
/// The row id is derived from the pair, so a second insert for the same
/// (file, pipeline) is reported as a duplicate.
pub fn insert_processed_file(conn: &Connection, file_id: &Uuid, pipeline_id: &Uuid) -> Result<Uuid> {
    require_row(conn, "files", "file", file_id)?;
    require_row(conn, "pipeline_info", "pipeline", pipeline_id)?;

    let id = processed_file_id(file_id, pipeline_id);
    conn.execute(
        "INSERT INTO processed_files (id, file_id, pipeline_id) VALUES (?1, ?2, ?3)",
        params![id.to_string(), file_id.to_string(), pipeline_id.to_string()],
    )
    .map_err(|e| map_insert_error(e, "processed file"))?;
    Ok(id)
}

/// Insert an observation and, when it carries a bbox, its geometry.
///
/// All references are checked first so a failed insert never leaves an
/// orphan geometry behind.
pub fn insert_observation(conn: &Connection, obs: &NewObservation) -> Result<Uuid> {
    require_row(conn, "files", "file", &obs.file_id)?;
    require_row(conn, "projects", "project", &obs.project_id)?;
    if let Some(pipeline_id) = &obs.pipeline_id {
        require_row(conn, "pipeline_info", "pipeline", pipeline_id)?;
    }
    require_row(conn, "users", "user", &obs.user_id)?;
    require_row(
        conn,
        "observation_methods",
        "observation method",
        &obs.observation_method_id,
    )?;

    let tx = conn.unchecked_transaction()?;

    let geom_id = match &obs.bbox {
        Some(bbox) => {
            let geom_id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO observation_geoms (id, bbox, video_frame_num) VALUES (?1, ?2, ?3)",
                params![geom_id.to_string(), bbox, obs.video_frame_num],
            )
            .map_err(|e| map_insert_error(e, "observation geometry"))?;
            Some(geom_id.to_string())
        }
        None => None,
    };

    tx.execute(
        "INSERT INTO observations
            (id, file_id, project_id, pipeline_id, user_id, observation_method_id, geom_id,
             observation_type, observation_tag, taxon_id, score, confidence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            obs.id.to_string(),
            obs.file_id.to_string(),
            obs.project_id.to_string(),
            obs.pipeline_id.map(|id| id.to_string()),
            obs.user_id.to_string(),
            obs.observation_method_id.to_string(),
            geom_id,
            obs.observation_type,
            obs.observation_tag.as_ref().map(|tag| tag.to_string()),
            obs.taxon_id,
            obs.score,
            obs.confidence,
        ],
    )
    .map_err(|e| map_insert_error(e, "observation"))?;

    tx.commit()?;
    Ok(obs.id)
}

/// Create a sequence event. The identifier mirrors the id so the
/// `seq_id` read back by the media queries is the id callers generated.
pub fn insert_event(conn: &Connection, event_id: &Uuid, event_type: &str) -> Result<Uuid> {
    conn.execute(
        "INSERT INTO events (id, identifier, event_type) VALUES (?1, ?1, ?2)",
        params![event_id.to_string(), event_type],
    )
    .map_err(|e| map_insert_error(e, "event"))?;
    Ok(*event_id)
}

/// Link a file to an event. Returns the link row id.
pub fn link_event_file(conn: &Connection, event_id: &Uuid, file_id: &Uuid) -> Result<i64> {
    require_row(conn, "files", "file", file_id)?;
    require_row(conn, "events", "event", event_id)?;

    conn.execute(
        "INSERT INTO events_files (event_id, file_id) VALUES (?1, ?2)",
        params![event_id.to_string(), file_id.to_string()],
    )
    .map_err(|e| map_insert_error(e, "event file link"))?;
    Ok(conn.last_insert_rowid())
}

// --- Media reads ---

// Columns 0..=9 map onto MediaRow (see `media_row`). ?1 is the JSON path of
// the capture-time key, ?2 project title, ?3 MIME pattern, ?4 site.
const MEDIA_SELECT: &str = "
    SELECT f.id, f.url,
           CAST(json_extract(f.file_metadata, ?1) AS TEXT),
           CASE WHEN json_type(f.file_metadata, '$.Longitude') IN ('real', 'integer')
                THEN json_extract(f.file_metadata, '$.Longitude') END,
           CASE WHEN json_type(f.file_metadata, '$.Latitude') IN ('real', 'integer')
                THEN json_extract(f.file_metadata, '$.Latitude') END,
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
    WHERE f.project_id IN (SELECT id FROM projects WHERE title = ?2)
      AND f.mime_type LIKE ?3
      AND s.identifier = ?4";

fn media_row(row: &Row<'_>) -> rusqlite::Result<MediaRow> {
    let captured_raw: Option<String> = row.get(2)?;
    Ok(MediaRow {
        file_id: uuid_at(row, 0)?,
        url: row.get(1)?,
        captured_at: captured_raw.as_deref().and_then(parse_capture_time),
        longitude: row.get(3)?,
        latitude: row.get(4)?,
        site_identifier: row.get(5)?,
        sampling_area: row.get(6)?,
        device: row.get(7)?,
        ecosystem: row.get(8)?,
        seq_id: row.get(9)?,
    })
}

/// Files of a project/site/kind the given pipeline has not processed yet.
pub fn files_to_process(conn: &Connection, query: &MediaQuery) -> Result<Vec<MediaRow>> {
    let (name, version) = query.require_pipeline()?;
    let sql = format!(
        "{MEDIA_SELECT} {MEDIA_JOINS} {MEDIA_FILTER}
           AND f.id NOT IN (
               SELECT pf.file_id FROM processed_files pf
               JOIN pipeline_info p ON p.id = pf.pipeline_id
               WHERE p.name = ?5 AND p.version = ?6)
         ORDER BY f.url"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            query.datetime_json_path(),
            query.project_title,
            query.kind.mime_pattern(),
            query.site,
            name,
            version,
        ],
        media_row,
    )?;

    let mut media = Vec::new();
    for row in rows {
        media.push(row?);
    }
    Ok(media)
}

/// Files of a project/site/kind that belong to no event yet.
pub fn files_without_events(conn: &Connection, query: &MediaQuery) -> Result<Vec<MediaRow>> {
    let sql = format!(
        "{MEDIA_SELECT} {MEDIA_JOINS} {MEDIA_FILTER}
           AND f.id NOT IN (SELECT file_id FROM events_files)
         ORDER BY f.url"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            query.datetime_json_path(),
            query.project_title,
            query.kind.mime_pattern(),
            query.site,
        ],
        media_row,
    )?;

    let mut media = Vec::new();
    for row in rows {
        media.push(row?);
    }
    Ok(media)
}

/// One row per observation the given pipeline produced for the project/site/kind.
pub fn processed_files(conn: &Connection, query: &MediaQuery) -> Result<Vec<ProcessedRow>> {
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
           AND p.name = ?5 AND p.version = ?6
         ORDER BY f.url, o.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            query.datetime_json_path(),
            query.project_title,
            query.kind.mime_pattern(),
            query.site,
            name,
            version,
        ],
        |row| {
            let tag_json: Option<String> = row.get(12)?;
            Ok((
                media_row(row)?,
                uuid_at(row, 10)?,
                row.get::<_, Option<String>>(11)?,
                tag_json,
                row.get::<_, Option<String>>(13)?,
                row.get::<_, Option<String>>(14)?,
                row.get::<_, Option<i32>>(15)?,
                row.get::<_, Option<f64>>(16)?,
                row.get::<_, Option<f64>>(17)?,
            ))
        },
    )?;

    let mut processed = Vec::new();
    for row in rows {
        let (media, observation_id, observation_type, tag_json, taxon_id, bbox, video_frame_num, score, confidence) =
            row?;
        let observation_tag = match tag_json {
            Some(json) => Some(
                serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt observation_tag on {observation_id}"))?,
            ),
            None => None,
        };
        processed.push(ProcessedRow {
            media,
            observation_id,
            observation_type,
            observation_tag,
            taxon_id,
            bbox,
            video_frame_num,
            score,
            confidence,
        });
    }
    Ok(processed)
}

// --- Deletes ---

// Files of a project/site/kind: ?1 site, ?2 MIME pattern, ?3 project id.
const SCOPED_FILES: &str = "
    SELECT f.id FROM files f
    JOIN sampling_points sp ON sp.id = f.sampling_point_id
    JOIN sites s ON s.id = sp.site_id
    WHERE s.identifier = ?1 AND f.mime_type LIKE ?2 AND f.project_id = ?3";

/// Delete a pipeline's observations for one project/site/kind.
pub fn delete_observations(
    conn: &Connection,
    project_id: &Uuid,
    site: &str,
    kind: MediaKind,
    pipeline_id: &Uuid,
) -> Result<u64> {
    let sql = format!(
        "DELETE FROM observations
         WHERE pipeline_id = ?4 AND file_id IN ({SCOPED_FILES})"
    );
    let deleted = conn.execute(
        &sql,
        params![
            site,
            kind.mime_pattern(),
            project_id.to_string(),
            pipeline_id.to_string(),
        ],
    )?;
    Ok(deleted as u64)
}

/// Delete geometries no observation points at any more.
pub fn delete_orphan_geoms(conn: &Connection) -> Result<u64> {
    let deleted = conn.execute(
        "DELETE FROM observation_geoms
         WHERE NOT EXISTS (
             SELECT 1 FROM observations o WHERE o.geom_id = observation_geoms.id)",
        [],
    )?;
    Ok(deleted as u64)
}

/// Forget that a pipeline processed the files of one project/site/kind.
pub fn delete_processed_files(
    conn: &Connection,
    project_id: &Uuid,
    pipeline_id: &Uuid,
    site: &str,
    kind: MediaKind,
) -> Result<u64> {
    let sql = format!(
        "DELETE FROM processed_files
         WHERE pipeline_id = ?4 AND file_id IN ({SCOPED_FILES})"
    );
    let deleted = conn.execute(
        &sql,
        params![
            site,
            kind.mime_pattern(),
            project_id.to_string(),
            pipeline_id.to_string(),
        ],
    )?;
    Ok(deleted as u64)
}

// --- Status ---

pub fn storage_summary(conn: &Connection) -> Result<StorageSummary> {
    let summary = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM projects),
            (SELECT COUNT(*) FROM files),
            (SELECT COUNT(*) FROM observations),
            (SELECT COUNT(*) FROM events),
            (SELECT COUNT(*) FROM pipeline_info),
            (SELECT COUNT(*) FROM processed_files)",
        [],
        |row| {
            Ok(StorageSummary {
                projects: row.get(0)?,
                files: row.get(1)?,
                observations: row.get(2)?,
                events: row.get(3)?,
                pipelines: row.get(4)?,
                processed_files: row.get(5)?,
            })
        },
    )?;
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::error::{is_duplicate, is_not_found};
    use crate::db::schema::create_tables;

    /// Ids of the fixture rows written by `seed`.
    pub(crate) struct Seed {
        pub project_id: Uuid,
        pub user_id: Uuid,
        pub machine_id: Uuid,
        pub pipeline_id: Uuid,
        /// Three images at 12:00:00, 12:00:01 and 12:00:05.
        pub image_ids: Vec<Uuid>,
        pub video_id: Uuid,
    }

    pub(crate) fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    /// One project ("SiPeCaM"), site "13", area "A1", camera "CAM-01".
    pub(crate) fn seed(conn: &Connection) -> Seed {
        let project_id = Uuid::new_v4();
        let ecosystem_id = Uuid::new_v4();
        let site_id = Uuid::new_v4();
        let area_id = Uuid::new_v4();
        let device_id = Uuid::new_v4();
        let point_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let machine_id = Uuid::new_v4();
        let pipeline_id = Uuid::new_v4();

        conn.execute(
            "INSERT INTO projects (id, title, shortname) VALUES (?1, 'SiPeCaM', 'sipecam')",
            params![project_id.to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO ecosystems (id, name) VALUES (?1, 'Selvas')",
            params![ecosystem_id.to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sites (id, identifier, ecosystem_id, project_id) VALUES (?1, '13', ?2, ?3)",
            params![site_id.to_string(), ecosystem_id.to_string(), project_id.to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sampling_areas (id, identifier, site_id, project_id) VALUES (?1, 'A1', ?2, ?3)",
            params![area_id.to_string(), site_id.to_string(), project_id.to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO project_devices (id, project_id, device_type, project_serial_number)
             VALUES (?1, ?2, 'camera', 'CAM-01')",
            params![device_id.to_string(), project_id.to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sampling_points (id, project_id, site_id, sampling_area_id, device_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                point_id.to_string(),
                project_id.to_string(),
                site_id.to_string(),
                area_id.to_string(),
                device_id.to_string()
            ],
        )
        .unwrap();

        let mut image_ids = Vec::new();
        for (i, ts) in ["2023:06:20 12:00:00", "2023:06:20 12:00:01", "2023:06:20 12:00:05"]
            .iter()
            .enumerate()
        {
            let id = Uuid::new_v4();
            let metadata = serde_json::json!({
                "DateTimeOriginal": ts,
                "Longitude": -93.5,
                "Latitude": 16.25,
            });
            conn.execute(
                "INSERT INTO files (id, name, url, mime_type, file_metadata, project_id, sampling_point_id)
                 VALUES (?1, ?2, ?3, 'image/jpeg', ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    format!("IMG_{i}.JPG"),
                    format!("s3://sipecam-open-data/data/13/A1/IMG_{i}.JPG"),
                    metadata.to_string(),
                    project_id.to_string(),
                    point_id.to_string()
                ],
            )
            .unwrap();
            image_ids.push(id);
        }

        let video_id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO files (id, name, url, mime_type, file_metadata, project_id, sampling_point_id)
             VALUES (?1, 'VID_0.MP4', 's3://sipecam-open-data/data/13/A1/VID_0.MP4', 'video/mp4',
                     '{\"DateTimeOriginal\": \"2023:06:20 13:00:00\"}', ?2, ?3)",
            params![video_id.to_string(), project_id.to_string(), point_id.to_string()],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO users (id, username) VALUES (?1, 'rebe')",
            params![user_id.to_string()],
        )
        .unwrap();
        insert_observation_method(
            conn,
            &NewObservationMethod {
                id: machine_id,
                name: "machine".to_string(),
                description: None,
            },
        )
        .unwrap();
        insert_pipeline_info(
            conn,
            &NewPipelineInfo {
                id: pipeline_id,
                name: "megadetector".to_string(),
                version: "v5a".to_string(),
                url_repo_model: "https://example.org/md".to_string(),
                execution_params: serde_json::json!({"min_score_threshold": 0.1}),
                comments: String::new(),
                last_execution: None,
            },
        )
        .unwrap();

        Seed {
            project_id,
            user_id,
            machine_id,
            pipeline_id,
            image_ids,
            video_id,
        }
    }

    pub(crate) fn image_query(pipeline: Option<(&str, &str)>) -> MediaQuery {
        MediaQuery {
            project_title: "SiPeCaM".to_string(),
            site: "13".to_string(),
            kind: MediaKind::Image,
            datetime_key: "DateTimeOriginal".to_string(),
            pipeline: pipeline.map(|(n, v)| (n.to_string(), v.to_string())),
        }
    }

    fn observation(seed: &Seed, file_id: Uuid, bbox: Option<&str>) -> NewObservation {
        NewObservation {
            id: Uuid::new_v4(),
            file_id,
            project_id: seed.project_id,
            pipeline_id: Some(seed.pipeline_id),
            user_id: seed.user_id,
            observation_method_id: seed.machine_id,
            observation_type: Some("animal".to_string()),
            observation_tag: Some(serde_json::json!({"predicted_label": "small bird"})),
            taxon_id: None,
            bbox: bbox.map(str::to_string),
            video_frame_num: None,
            score: Some(0.92),
            confidence: Some(0.81),
        }
    }

    #[test]
    fn test_lookups() {
        let conn = test_db();
        let seed = seed(&conn);
        assert_eq!(project_id_by_title(&conn, "SiPeCaM").unwrap(), seed.project_id);
        assert_eq!(pipeline_id(&conn, "megadetector", "v5a").unwrap(), seed.pipeline_id);
        assert_eq!(user_id(&conn, "rebe").unwrap(), seed.user_id);
        assert_eq!(observation_method_id(&conn, "machine").unwrap(), seed.machine_id);
        assert_eq!(
            file_id_by_url(&conn, "s3://sipecam-open-data/data/13/A1/IMG_0.JPG").unwrap(),
            seed.image_ids[0]
        );
    }

    #[test]
    fn test_missing_lookup_is_not_found() {
        let conn = test_db();
        let err = project_id_by_title(&conn, "Mordor").unwrap_err();
        assert!(is_not_found(&err));
        let err = pipeline_id(&conn, "palantir", "1.0").unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn test_pipeline_info_roundtrip_and_duplicate() {
        let conn = test_db();
        let seed = seed(&conn);
        let info = get_pipeline_info(&conn, "megadetector", "v5a").unwrap().unwrap();
        assert_eq!(info.id, seed.pipeline_id);
        assert_eq!(info.execution_params["min_score_threshold"], 0.1);
        assert!(get_pipeline_info(&conn, "megadetector", "v6").unwrap().is_none());

        // Same (name, version) under a fresh id is still a duplicate
        let err = insert_pipeline_info(
            &conn,
            &NewPipelineInfo {
                id: Uuid::new_v4(),
                name: "megadetector".to_string(),
                version: "v5a".to_string(),
                url_repo_model: String::new(),
                execution_params: serde_json::json!({}),
                comments: String::new(),
                last_execution: None,
            },
        )
        .unwrap_err();
        assert!(is_duplicate(&err));
    }

    #[test]
    fn test_processed_file_checks_references() {
        let conn = test_db();
        let seed = seed(&conn);

        let missing = insert_processed_file(&conn, &Uuid::new_v4(), &seed.pipeline_id).unwrap_err();
        assert!(is_not_found(&missing));
        let missing = insert_processed_file(&conn, &seed.image_ids[0], &Uuid::new_v4()).unwrap_err();
        assert!(is_not_found(&missing));

        let id = insert_processed_file(&conn, &seed.image_ids[0], &seed.pipeline_id).unwrap();
        assert_eq!(id, processed_file_id(&seed.image_ids[0], &seed.pipeline_id));
        let dup = insert_processed_file(&conn, &seed.image_ids[0], &seed.pipeline_id).unwrap_err();
        assert!(is_duplicate(&dup));
    }

    #[test]
    fn test_files_to_process_excludes_processed() {
        let conn = test_db();
        let seed = seed(&conn);
        let query = image_query(Some(("megadetector", "v5a")));

        let pending = files_to_process(&conn, &query).unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].device, "CAM-01");
        assert_eq!(pending[0].sampling_area.as_deref(), Some("A1"));
        assert_eq!(pending[0].ecosystem.as_deref(), Some("Selvas"));
        assert_eq!(pending[0].longitude, Some(-93.5));
        assert_eq!(
            pending[0].captured_at.unwrap().to_string(),
            "2023-06-20 12:00:00"
        );

        insert_processed_file(&conn, &seed.image_ids[1], &seed.pipeline_id).unwrap();
        let pending = files_to_process(&conn, &query).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|m| m.file_id != seed.image_ids[1]));
    }

    #[test]
    fn test_non_numeric_coordinates_read_as_none() {
        let conn = test_db();
        let seed = seed(&conn);
        conn.execute(
            "UPDATE files SET file_metadata = ?1 WHERE id = ?2",
            params![
                serde_json::json!({
                    "DateTimeOriginal": "2023:06:20 12:00:00",
                    "Longitude": "N/A",
                    "Latitude": "19.4",
                })
                .to_string(),
                seed.image_ids[0].to_string()
            ],
        )
        .unwrap();

        let rows = files_without_events(&conn, &image_query(None)).unwrap();
        let odd = rows.iter().find(|r| r.file_id == seed.image_ids[0]).unwrap();
        assert_eq!(odd.longitude, None);
        assert_eq!(odd.latitude, None);
        assert!(odd.captured_at.is_some());

        let plain = rows.iter().find(|r| r.file_id == seed.image_ids[1]).unwrap();
        assert_eq!(plain.longitude, Some(-93.5));
        assert_eq!(plain.latitude, Some(16.25));
    }

    #[test]
    fn test_files_to_process_requires_pipeline() {
        let conn = test_db();
        seed(&conn);
        assert!(files_to_process(&conn, &image_query(None)).is_err());
    }

    #[test]
    fn test_video_query_only_returns_videos() {
        let conn = test_db();
        let seed = seed(&conn);
        let mut query = image_query(None);
        query.kind = MediaKind::Video;
        let videos = files_without_events(&conn, &query).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].file_id, seed.video_id);
    }

    #[test]
    fn test_events_and_links() {
        let conn = test_db();
        let seed = seed(&conn);
        let event_id = Uuid::new_v4();
        insert_event(&conn, &event_id, "photo_sequence").unwrap();
        assert!(is_duplicate(&insert_event(&conn, &event_id, "photo_sequence").unwrap_err()));

        link_event_file(&conn, &event_id, &seed.image_ids[0]).unwrap();
        assert!(is_duplicate(
            &link_event_file(&conn, &event_id, &seed.image_ids[0]).unwrap_err()
        ));
        assert!(is_not_found(
            &link_event_file(&conn, &Uuid::new_v4(), &seed.image_ids[1]).unwrap_err()
        ));

        let remaining = files_without_events(&conn, &image_query(None)).unwrap();
        assert_eq!(remaining.len(), 2);

        // The linked file now reports its sequence id
        let pending = files_to_process(&conn, &image_query(Some(("megadetector", "v5a")))).unwrap();
        let linked = pending.iter().find(|m| m.file_id == seed.image_ids[0]).unwrap();
        assert_eq!(linked.seq_id, Some(event_id.to_string()));
    }

    #[test]
    fn test_observation_with_geometry_roundtrip() {
        let conn = test_db();
        let seed = seed(&conn);
        let obs = observation(&seed, seed.image_ids[0], Some("[0.1, 0.2, 0.3, 0.4]"));
        insert_observation(&conn, &obs).unwrap();

        let rows = processed_files(&conn, &image_query(Some(("megadetector", "v5a")))).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].observation_id, obs.id);
        assert_eq!(rows[0].bbox.as_deref(), Some("[0.1, 0.2, 0.3, 0.4]"));
        assert_eq!(
            rows[0].observation_tag.as_ref().unwrap()["predicted_label"],
            "small bird"
        );
        assert!(is_duplicate(&insert_observation(&conn, &obs).unwrap_err()));
    }

    #[test]
    fn test_observation_with_missing_user_leaves_no_geometry() {
        let conn = test_db();
        let seed = seed(&conn);
        let mut obs = observation(&seed, seed.image_ids[0], Some("[0, 0, 1, 1]"));
        obs.user_id = Uuid::new_v4();
        assert!(is_not_found(&insert_observation(&conn, &obs).unwrap_err()));

        let geoms: i64 = conn
            .query_row("SELECT COUNT(*) FROM observation_geoms", [], |r| r.get(0))
            .unwrap();
        assert_eq!(geoms, 0);
    }

    #[test]
    fn test_delete_observation_products() {
        let conn = test_db();
        let seed = seed(&conn);
        for file_id in &seed.image_ids {
            insert_observation(&conn, &observation(&seed, *file_id, Some("[0, 0, 1, 1]"))).unwrap();
            insert_processed_file(&conn, file_id, &seed.pipeline_id).unwrap();
        }

        let deleted = delete_observations(
            &conn,
            &seed.project_id,
            "13",
            MediaKind::Image,
            &seed.pipeline_id,
        )
        .unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(delete_orphan_geoms(&conn).unwrap(), 3);
        let unmarked = delete_processed_files(
            &conn,
            &seed.project_id,
            &seed.pipeline_id,
            "13",
            MediaKind::Image,
        )
        .unwrap();
        assert_eq!(unmarked, 3);

        let summary = storage_summary(&conn).unwrap();
        assert_eq!(summary.observations, 0);
        assert_eq!(summary.processed_files, 0);
        assert_eq!(summary.files, 4);
    }

    #[test]
    fn test_delete_scoped_to_site() {
        let conn = test_db();
        let seed = seed(&conn);
        insert_observation(&conn, &observation(&seed, seed.image_ids[0], None)).unwrap();
        let deleted = delete_observations(
            &conn,
            &seed.project_id,
            "99",
            MediaKind::Image,
            &seed.pipeline_id,
        )
        .unwrap();
        assert_eq!(deleted, 0);
    }
}
