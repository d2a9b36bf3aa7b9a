// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only event store, rolling-comment mapping, and evidence index.
//!
//! The insertion protocol in [`EventStore::insert`] implements §4.3 exactly:
//! look the event up by `event_id`, return the existing row unchanged on a
//! matching hash (idempotent replay), report a conflict on a differing
//! hash, or insert and return the new row. Persistence follows the
//! teacher's disk-backed hydrate/persist pattern — one JSON file per row
//! under a directory tree, reloaded at startup — so a restarted daemon
//! keeps seeing already-accepted events as idempotent.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use relay_core::{CommentMapping, EventRow, EvidenceRecord};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of [`EventStore::insert`].
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// No prior event with this `event_id` existed; `row` was inserted.
    Inserted(EventRow),
    /// An event with this `event_id` already existed with the same
    /// `payload_hash`; the existing row is returned unchanged.
    Idempotent(EventRow),
    /// An event with this `event_id` already existed with a *different*
    /// `payload_hash`.
    Conflict {
        /// Hash of the previously stored event.
        existing_hash: String,
        /// Hash of the event just submitted.
        new_hash: String,
    },
}

#[derive(Default)]
struct Inner {
    events_by_id: HashMap<String, EventRow>,
    comment_mappings: HashMap<(String, u64), CommentMapping>,
    evidence: HashMap<Uuid, EvidenceRecord>,
}

/// Error returned by disk persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O error occurred while reading or writing a persisted row.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A persisted row failed to (de)serialize.
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Event store, rolling-comment mapping table, and evidence index.
///
/// Safe to share across request handlers behind an `Arc`; all mutation
/// goes through a single `tokio::sync::RwLock`, matching the stateless,
/// lock-per-resource model in §5 (no per-issue locks; the store's own
/// lock only ever guards the in-memory index, never a forge call).
pub struct EventStore {
    dir: Option<PathBuf>,
    inner: RwLock<Inner>,
}

impl EventStore {
    /// Construct an in-memory-only store with no disk persistence.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Construct a store that persists every row under `dir` as it is
    /// written, and hydrates from `dir` via [`Self::hydrate`].
    pub fn with_persistence(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Reload all previously persisted rows from disk.
    ///
    /// No-op if this store was constructed with [`Self::in_memory`], or if
    /// the directory does not yet exist.
    pub async fn hydrate(&self) -> Result<(), StoreError> {
        let Some(dir) = &self.dir else { return Ok(()) };
        let mut inner = self.inner.write().await;

        hydrate_dir(&dir.join("events"), &mut inner.events_by_id, |row: &EventRow| {
            row.event_id.clone()
        })?;

        let mut mappings = HashMap::new();
        hydrate_dir(&dir.join("comments"), &mut mappings, |m: &CommentMapping| {
            format!("{}#{}", m.repo, m.issue_number)
        })?;
        for m in mappings.into_values() {
            inner.comment_mappings.insert((m.repo.clone(), m.issue_number), m);
        }

        let mut evidence = HashMap::new();
        hydrate_dir(&dir.join("evidence"), &mut evidence, |e: &EvidenceRecord| e.id.to_string())?;
        for e in evidence.into_values() {
            inner.evidence.insert(e.id, e);
        }

        Ok(())
    }

    /// Look up a stored row by `event_id` without mutating anything.
    ///
    /// Used by the daemon to decide, before doing any forge I/O, whether a
    /// submission is a brand-new event, an idempotent replay, or a
    /// conflict — per §4.3 steps 1-3, none of which have side effects.
    pub async fn lookup(&self, event_id: &str) -> Option<EventRow> {
        let inner = self.inner.read().await;
        inner.events_by_id.get(event_id).cloned()
    }

    /// Apply the §4.3 insertion protocol for `candidate`.
    ///
    /// `candidate.created_at` and `candidate.payload_hash` must already be
    /// populated by the caller (the daemon sets `created_at` at the moment
    /// it decides to insert, and `payload_hash` from the canonicalized
    /// validator output).
    pub async fn insert(&self, candidate: EventRow) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.events_by_id.get(&candidate.event_id) {
            return Ok(if existing.payload_hash == candidate.payload_hash {
                InsertOutcome::Idempotent(existing.clone())
            } else {
                InsertOutcome::Conflict {
                    existing_hash: existing.payload_hash.clone(),
                    new_hash: candidate.payload_hash.clone(),
                }
            });
        }

        if let Some(dir) = &self.dir {
            persist_json(&dir.join("events"), &candidate.event_id, &candidate)?;
        }
        inner.events_by_id.insert(candidate.event_id.clone(), candidate.clone());
        Ok(InsertOutcome::Inserted(candidate))
    }

    /// The most recent event of `event_type` for `(repo, issue_number)`,
    /// per §4.3's "latest-by-type" query.
    pub async fn latest_by_type(&self, repo: &str, issue_number: u64, event_type: &str) -> Option<EventRow> {
        let inner = self.inner.read().await;
        inner
            .events_by_id
            .values()
            .filter(|e| e.repo == repo && e.issue_number == issue_number && e.event_type == event_type)
            .max_by_key(|e| e.created_at)
            .cloned()
    }

    /// The most recent `limit` events (any type) for `(repo,
    /// issue_number)`, newest first, per §4.3's "recent-activity" query.
    pub async fn recent_activity(&self, repo: &str, issue_number: u64, limit: usize) -> Vec<EventRow> {
        let inner = self.inner.read().await;
        let mut rows: Vec<EventRow> = inner
            .events_by_id
            .values()
            .filter(|e| e.repo == repo && e.issue_number == issue_number)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        rows
    }

    /// Current rolling-comment mapping for `(repo, issue_number)`, if any.
    pub async fn comment_mapping(&self, repo: &str, issue_number: u64) -> Option<CommentMapping> {
        let inner = self.inner.read().await;
        inner.comment_mappings.get(&(repo.to_string(), issue_number)).cloned()
    }

    /// Record or replace the rolling-comment mapping for `(repo,
    /// issue_number)`.
    pub async fn put_comment_mapping(&self, mapping: CommentMapping) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(dir) = &self.dir {
            let key = format!("{}#{}", mapping.repo, mapping.issue_number);
            persist_json(&dir.join("comments"), &key, &mapping)?;
        }
        inner
            .comment_mappings
            .insert((mapping.repo.clone(), mapping.issue_number), mapping);
        Ok(())
    }

    /// Record a newly uploaded evidence blob's metadata.
    pub async fn insert_evidence(&self, record: EvidenceRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(dir) = &self.dir {
            persist_json(&dir.join("evidence"), &record.id.to_string(), &record)?;
        }
        inner.evidence.insert(record.id, record);
        Ok(())
    }

    /// Look up an evidence blob's metadata by id.
    pub async fn get_evidence(&self, id: Uuid) -> Option<EvidenceRecord> {
        let inner = self.inner.read().await;
        inner.evidence.get(&id).cloned()
    }
}

fn persist_json<T: serde::Serialize>(dir: &Path, key: &str, value: &T) -> Result<(), StoreError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", sanitize_key(key)));
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, body)?;
    Ok(())
}

fn hydrate_dir<T, K, F>(dir: &Path, out: &mut HashMap<K, T>, key_of: F) -> Result<(), StoreError>
where
    T: serde::de::DeserializeOwned,
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = std::fs::read(entry.path())?;
        let value: T = serde_json::from_slice(&bytes)?;
        out.insert(key_of(&value), value);
    }
    Ok(())
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[allow(unused)]
fn now() -> DateTime<Utc> {
    Utc::now()
}
