// Sequence events — turn bursts of new images into `photo_sequence` events.
//
// Files without an event are grouped by location and capture-time gap,
// then each group becomes one event and every file is linked to it.
// Videos have no sequences; storing events for them does nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{progress_bar, MediaScope};
use crate::config::ProjectSettings;
use crate::dataset::mapping::sequence_inputs;
use crate::dataset::{ImageItem, MediaRecord};
use crate::db::models::{MediaKind, PHOTO_SEQUENCE_EVENT};
use crate::db::Database;
use crate::sequence::SequenceGrouper;

/// What a `store_sequences` run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SequenceSummary {
    /// Files considered (without an event before the run).
    pub files: usize,
    /// Files left out because they carry no capture time.
    pub skipped: usize,
    pub events: usize,
    pub links: usize,
    pub failed: usize,
}

pub async fn store_sequences(
    db: &Arc<dyn Database>,
    settings: &ProjectSettings,
    scope: &MediaScope,
    kind: MediaKind,
    min_interval_secs: f64,
) -> Result<SequenceSummary> {
    let grouper = SequenceGrouper::new(min_interval_secs)?;

    if kind == MediaKind::Video {
        info!(project = %scope.project, site = %scope.site, "Videos have no sequences, nothing to store");
        return Ok(SequenceSummary::default());
    }

    let items: Vec<ImageItem> = super::retrieval::new_media(db, settings, scope).await?;
    let mut summary = SequenceSummary {
        files: items.len(),
        ..Default::default()
    };

    let (dated, undated): (Vec<ImageItem>, Vec<ImageItem>) = items
        .into_iter()
        .partition(|item| item.media().date_captured.is_some());
    if !undated.is_empty() {
        summary.skipped = undated.len();
        warn!(
            count = undated.len(),
            key = %settings.datetime_key,
            "Files without a capture time were left out of sequencing"
        );
    }
    if dated.is_empty() {
        return Ok(summary);
    }

    let assignment = grouper.group(&sequence_inputs(&dated))?;

    // Group id -> member files, in a fixed order so links are created
    // deterministically.
    let mut members: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
    for item in &dated {
        let Some(file_id) = item.media.media_id else {
            continue;
        };
        if let Some(group_id) = assignment.get(&file_id.to_string()) {
            members.entry(group_id).or_default().push(file_id);
        }
    }

    let pb = progress_bar(dated.len(), "Sequences");
    for (event_id, files) in &members {
        if let Err(e) = db.insert_event(event_id, PHOTO_SEQUENCE_EVENT).await {
            warn!(event = %event_id, error = %e, "Failed to create sequence event, skipping its files");
            summary.failed += files.len();
            pb.inc(files.len() as u64);
            continue;
        }
        summary.events += 1;

        for file_id in files {
            match db.link_event_file(event_id, file_id).await {
                Ok(_) => summary.links += 1,
                Err(e) => {
                    warn!(event = %event_id, file = %file_id, error = %e, "Failed to link file to event");
                    summary.failed += 1;
                }
            }
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    info!(
        project = %scope.project,
        site = %scope.site,
        events = summary.events,
        links = summary.links,
        failed = summary.failed,
        "Stored image sequences"
    );
    Ok(summary)
}
