// Sequence grouping — assigns a shared id to camera-trap bursts.
//
// Images captured at the same location (site + sampling area + device)
// within a short time of each other belong to one sequence. Records are
// partitioned by location, sorted by capture time, and walked once: a new
// sequence starts whenever the gap to the *previous* capture is strictly
// greater than the configured interval.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{NaiveDateTime, TimeDelta};
use thiserror::Error;
use uuid::Uuid;

/// Gap (in seconds) above which a new sequence starts, unless overridden.
pub const DEFAULT_MIN_INTERVAL_SECS: f64 = 2.0;

/// One media item to be grouped.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    pub item_id: String,
    /// Composite "{site}-{sampling_area}-{device}" key.
    pub location_key: Option<String>,
    pub captured_at: Option<NaiveDateTime>,
}

impl MediaRecord {
    pub fn new(
        item_id: impl Into<String>,
        location_key: impl Into<String>,
        captured_at: NaiveDateTime,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            location_key: Some(location_key.into()),
            captured_at: Some(captured_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SequenceError {
    #[error("item '{item_id}' has no capture timestamp")]
    MissingTimestamp { item_id: String },
    #[error("item '{item_id}' has no location key")]
    MissingLocation { item_id: String },
    #[error("item '{item_id}' appears more than once in the batch")]
    DuplicateItem { item_id: String },
    #[error("minimum interval must be a finite, non-negative number of seconds (got {0})")]
    InvalidInterval(f64),
}

/// Result of a grouping call: item id -> sequence id.
///
/// Sequence ids are freshly generated on every call; only the partition
/// structure is reproducible.
#[derive(Debug, Clone, Default)]
pub struct SequenceAssignment {
    groups: HashMap<String, Uuid>,
}

impl SequenceAssignment {
    pub fn get(&self, item_id: &str) -> Option<Uuid> {
        self.groups.get(item_id).copied()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Uuid)> {
        self.groups.iter().map(|(item, id)| (item.as_str(), *id))
    }

    /// Distinct sequence ids, in no particular order.
    pub fn sequence_ids(&self) -> HashSet<Uuid> {
        self.groups.values().copied().collect()
    }

    pub fn sequence_count(&self) -> usize {
        self.sequence_ids().len()
    }

    /// The partition structure with ids erased: each inner set holds the
    /// items of one sequence. Comparable across runs.
    pub fn partition(&self) -> BTreeSet<BTreeSet<String>> {
        let mut by_sequence: HashMap<Uuid, BTreeSet<String>> = HashMap::new();
        for (item, id) in &self.groups {
            by_sequence.entry(*id).or_default().insert(item.clone());
        }
        by_sequence.into_values().collect()
    }
}

/// Time-gap sequence grouper.
#[derive(Debug, Clone, Copy)]
pub struct SequenceGrouper {
    min_interval_secs: f64,
}

impl Default for SequenceGrouper {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
        }
    }
}

impl SequenceGrouper {
    pub fn new(min_interval_secs: f64) -> Result<Self, SequenceError> {
        if !min_interval_secs.is_finite() || min_interval_secs < 0.0 {
            return Err(SequenceError::InvalidInterval(min_interval_secs));
        }
        Ok(Self { min_interval_secs })
    }

    pub fn min_interval_secs(&self) -> f64 {
        self.min_interval_secs
    }

    /// Group `records` into sequences.
    ///
    /// The whole batch is validated before any id is generated; a single
    /// record without a timestamp or location rejects the call.
    pub fn group(&self, records: &[MediaRecord]) -> Result<SequenceAssignment, SequenceError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
        let mut by_location: HashMap<&str, Vec<(NaiveDateTime, &str)>> = HashMap::new();

        for record in records {
            let item_id = record.item_id.as_str();
            let location = record
                .location_key
                .as_deref()
                .ok_or_else(|| SequenceError::MissingLocation {
                    item_id: item_id.to_string(),
                })?;
            let captured_at = record
                .captured_at
                .ok_or_else(|| SequenceError::MissingTimestamp {
                    item_id: item_id.to_string(),
                })?;
            if !seen.insert(item_id) {
                return Err(SequenceError::DuplicateItem {
                    item_id: item_id.to_string(),
                });
            }
            by_location
                .entry(location)
                .or_default()
                .push((captured_at, item_id));
        }

        let mut groups = HashMap::with_capacity(records.len());
        for (_location, mut captures) in by_location {
            // Stable: equal timestamps keep input order.
            captures.sort_by_key(|&(ts, _)| ts);

            let mut current = Uuid::new_v4();
            let mut previous: Option<NaiveDateTime> = None;
            for (ts, item_id) in captures {
                if let Some(prev) = previous {
                    if gap_secs(ts - prev) > self.min_interval_secs {
                        current = Uuid::new_v4();
                    }
                }
                previous = Some(ts);
                groups.insert(item_id.to_string(), current);
            }
        }

        Ok(SequenceAssignment { groups })
    }
}

/// Convenience wrapper: validate the interval and group in one call.
pub fn group(
    records: &[MediaRecord],
    min_interval_secs: f64,
) -> Result<SequenceAssignment, SequenceError> {
    SequenceGrouper::new(min_interval_secs)?.group(records)
}

fn gap_secs(delta: TimeDelta) -> f64 {
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_seconds() as f64,
    }
}
