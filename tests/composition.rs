// Composition tests — a pipeline run end to end against in-memory SQLite.
//
// These tests exercise the data flow between modules:
//   DB rows -> dataset records -> sequences / observations -> DB rows
// using the same Database trait object the CLI uses.

#![cfg(feature = "sqlite")]

use std::sync::Arc;

use balam::config::ProjectSettings;
use balam::dataset::{ImageItem, ImagePrediction, MediaFields, PredictionFields, VideoItem};
use balam::db::models::{MediaKind, NewObservationMethod};
use balam::db::{is_not_found, Database};
use balam::pipeline::info::{register_pipeline, ExecutionParams, MegadetectorParams};
use balam::pipeline::observations::{delete_observation_products, store_observations, StoreRequest};
use balam::pipeline::{events, retrieval, MediaScope};
use rusqlite::{params, Connection};
use uuid::Uuid;

const MEDIA_ROOT: &str = "s3://sipecam-open-data/data/";

fn settings() -> ProjectSettings {
    ProjectSettings::new(MEDIA_ROOT, "DateTimeOriginal")
}

fn scope() -> MediaScope {
    MediaScope::new("SiPeCaM", "13")
}

/// Site 13, one camera, three images at 12:00:00 / :01 / :05, one
/// undated image, one video.
fn seed(conn: &Connection) {
    let project = Uuid::new_v4().to_string();
    let site = Uuid::new_v4().to_string();
    let area = Uuid::new_v4().to_string();
    let device = Uuid::new_v4().to_string();
    let point = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO projects (id, title, shortname) VALUES (?1, 'SiPeCaM', 'sipecam')",
        params![project],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO sites (id, identifier, project_id) VALUES (?1, '13', ?2)",
        params![site, project],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO sampling_areas (id, identifier, site_id, project_id) VALUES (?1, 'A1', ?2, ?3)",
        params![area, site, project],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO project_devices (id, project_id, device_type, project_serial_number)
         VALUES (?1, ?2, 'camera', 'CAM-01')",
        params![device, project],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO sampling_points (id, project_id, site_id, sampling_area_id, device_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![point, project, site, area, device],
    )
    .unwrap();

    let files = [
        ("IMG_0.JPG", "image/jpeg", Some("2023:06:20 12:00:00")),
        ("IMG_1.JPG", "image/jpeg", Some("2023:06:20 12:00:01")),
        ("IMG_2.JPG", "image/jpeg", Some("2023:06:20 12:00:05")),
        ("IMG_3.JPG", "image/jpeg", None),
        ("VID_0.MP4", "video/mp4", Some("2023:06:20 13:00:00")),
    ];
    for (name, mime, taken) in files {
        let metadata = match taken {
            Some(ts) => serde_json::json!({ "DateTimeOriginal": ts }),
            None => serde_json::json!({}),
        };
        conn.execute(
            "INSERT INTO files (id, name, url, mime_type, file_metadata, project_id, sampling_point_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                name,
                format!("{MEDIA_ROOT}13/A1/{name}"),
                mime,
                metadata.to_string(),
                project,
                point
            ],
        )
        .unwrap();
    }

    conn.execute(
        "INSERT INTO users (id, username) VALUES (?1, 'rebe')",
        params![Uuid::new_v4().to_string()],
    )
    .unwrap();
}

async fn setup() -> (Arc<dyn Database>, Connection) {
    let (db, conn) = balam::db::memory_sqlite().unwrap();
    seed(&conn);
    for name in ["machine", "human"] {
        db.insert_observation_method(&NewObservationMethod {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
        })
        .await
        .unwrap();
    }
    let params = ExecutionParams::Megadetector(MegadetectorParams {
        min_score_of_stored_dets: 0.1,
    });
    register_pipeline(&db, "megadetector", "v5a", &params, "", "")
        .await
        .unwrap();
    (db, conn)
}

fn machine_request() -> StoreRequest {
    StoreRequest {
        project: "SiPeCaM".to_string(),
        pipeline: Some(("megadetector".to_string(), "v5a".to_string())),
        username: "rebe".to_string(),
    }
}

fn predictions_for(items: &[ImageItem], label: &str) -> Vec<ImagePrediction> {
    items
        .iter()
        .map(|item| ImagePrediction {
            media: item.media.clone(),
            prediction: PredictionFields {
                label: Some(label.to_string()),
                bbox: Some("[0.1, 0.1, 0.5, 0.5]".to_string()),
                score: Some(0.93),
                ..Default::default()
            },
        })
        .collect()
}

// ============================================================
// Chain: new media -> sequences -> events
// ============================================================

#[tokio::test]
async fn sequences_are_stored_once() {
    let (db, _conn) = setup().await;

    let summary = events::store_sequences(&db, &settings(), &scope(), MediaKind::Image, 2.0)
        .await
        .unwrap();
    assert_eq!(summary.files, 4);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.events, 2);
    assert_eq!(summary.links, 3);
    assert_eq!(summary.failed, 0);

    // Only the undated image is still without an event
    let again = events::store_sequences(&db, &settings(), &scope(), MediaKind::Image, 2.0)
        .await
        .unwrap();
    assert_eq!(again.files, 1);
    assert_eq!(again.events, 0);

    let pending: Vec<ImageItem> =
        retrieval::media_to_process(&db, &settings(), &scope(), "megadetector", "v5a")
            .await
            .unwrap();
    assert_eq!(pending.len(), 4);
    let seq = |item: &str| {
        pending
            .iter()
            .find(|p| p.media.item == format!("13/A1/{item}"))
            .and_then(|p| p.media.seq_id.clone())
    };
    assert!(seq("IMG_0.JPG").is_some());
    assert_eq!(seq("IMG_0.JPG"), seq("IMG_1.JPG"));
    assert_ne!(seq("IMG_1.JPG"), seq("IMG_2.JPG"));
    assert_eq!(seq("IMG_3.JPG"), None);
}

#[tokio::test]
async fn video_sequences_are_a_no_op() {
    let (db, _conn) = setup().await;
    let summary = events::store_sequences(&db, &settings(), &scope(), MediaKind::Video, 2.0)
        .await
        .unwrap();
    assert_eq!(summary.events, 0);

    let videos: Vec<VideoItem> = retrieval::new_media(&db, &settings(), &scope())
        .await
        .unwrap();
    assert_eq!(videos.len(), 1);
}

// ============================================================
// Chain: pending media -> predictions -> observations -> processed
// ============================================================

#[tokio::test]
async fn stored_predictions_mark_files_processed() {
    let (db, _conn) = setup().await;
    let pending: Vec<ImageItem> =
        retrieval::media_to_process(&db, &settings(), &scope(), "megadetector", "v5a")
            .await
            .unwrap();
    assert_eq!(pending.len(), 4);

    let preds = predictions_for(&pending, "Puma concolor");
    let summary = store_observations(&db, &settings(), &machine_request(), &preds)
        .await
        .unwrap();
    assert_eq!(summary.stored, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.marked_processed, 4);

    let still_pending: Vec<ImageItem> =
        retrieval::media_to_process(&db, &settings(), &scope(), "megadetector", "v5a")
            .await
            .unwrap();
    assert!(still_pending.is_empty());

    let processed: Vec<ImagePrediction> =
        retrieval::processed_media(&db, &settings(), &scope(), "megadetector", "v5a")
            .await
            .unwrap();
    assert_eq!(processed.len(), 4);
    for pred in &processed {
        assert_eq!(pred.prediction.label.as_deref(), Some("Puma concolor"));
        assert_eq!(pred.prediction.observation_type.as_deref(), Some("animal"));
        assert!(pred.media.item.starts_with("13/A1/"));
    }

    // A second run adds observations but the files were already marked
    let rerun = store_observations(&db, &settings(), &machine_request(), &preds)
        .await
        .unwrap();
    assert_eq!(rerun.stored, 4);
    assert_eq!(rerun.already_processed, 4);
}

#[tokio::test]
async fn human_annotations_resolve_files_by_url() {
    let (db, _conn) = setup().await;
    let annotation = ImagePrediction {
        media: MediaFields {
            item: "13/A1/IMG_2.JPG".to_string(),
            ..Default::default()
        },
        prediction: PredictionFields {
            label: Some("empty".to_string()),
            ..Default::default()
        },
    };
    let missing = ImagePrediction {
        media: MediaFields {
            item: "13/A1/NOT_THERE.JPG".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let request = StoreRequest {
        pipeline: None,
        ..machine_request()
    };

    let summary = store_observations(&db, &settings(), &request, &[annotation, missing])
        .await
        .unwrap();
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.marked_processed, 0);
    assert_eq!(db.storage_summary().await.unwrap().observations, 1);
}

#[tokio::test]
async fn unknown_author_stops_before_writing() {
    let (db, _conn) = setup().await;
    let request = StoreRequest {
        username: "nobody".to_string(),
        ..machine_request()
    };
    let err = store_observations::<ImagePrediction>(&db, &settings(), &request, &[])
        .await
        .unwrap_err();
    assert!(is_not_found(&err));
}

// ============================================================
// Chain: delete -> media pending again
// ============================================================

#[tokio::test]
async fn delete_products_makes_media_pending_again() {
    let (db, conn) = setup().await;
    let pending: Vec<ImageItem> =
        retrieval::media_to_process(&db, &settings(), &scope(), "megadetector", "v5a")
            .await
            .unwrap();
    store_observations(
        &db,
        &settings(),
        &machine_request(),
        &predictions_for(&pending, "empty"),
    )
    .await
    .unwrap();

    let deleted = delete_observation_products(&db, &scope(), MediaKind::Image, "megadetector", "v5a")
        .await
        .unwrap();
    assert_eq!(deleted.observations, 4);
    assert_eq!(deleted.geometries, 4);
    assert_eq!(deleted.processed_files, 4);

    let geoms: i64 = conn
        .query_row("SELECT COUNT(*) FROM observation_geoms", [], |r| r.get(0))
        .unwrap();
    assert_eq!(geoms, 0);

    let pending_again: Vec<ImageItem> =
        retrieval::media_to_process(&db, &settings(), &scope(), "megadetector", "v5a")
            .await
            .unwrap();
    assert_eq!(pending_again.len(), 4);
}

#[tokio::test]
async fn unknown_project_is_not_found() {
    let (db, _conn) = setup().await;
    let err = retrieval::new_media::<ImageItem>(&db, &settings(), &MediaScope::new("Atlantis", "1"))
        .await
        .unwrap_err();
    assert!(is_not_found(&err));
}
