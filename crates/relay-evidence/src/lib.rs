// SPDX-License-Identifier: MIT OR Apache-2.0
//! Evidence blob storage, per §4.8.
//!
//! [`EvidenceStore`] is a filesystem-backed object store: no blob-storage
//! crate appears anywhere in the example corpus, so this follows the
//! teacher's convention of keeping durable artifacts as plain files on
//! disk (see `relay-store`'s hydrate/persist pattern) rather than
//! inventing a dependency the corpus never reaches for. The object key is
//! always `evidence/<repo>/issue-<n>/<id>/<filename>`; callers are
//! expected to pair a successful [`EvidenceStore::put`] with a
//! `relay_core::EvidenceRecord` row inserted into the event store's index.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use relay_core::EvidenceRecord;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Default filename used when the uploader does not supply one.
pub const DEFAULT_FILENAME: &str = "upload.bin";

/// Default content type used when the uploader does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Error returned by evidence store operations.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    /// An I/O error occurred while writing or reading a blob.
    #[error("evidence I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem-backed evidence object store.
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    /// Construct a store rooted at `root`. The directory is created lazily
    /// on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Compute the deterministic object key for a new upload.
    ///
    /// `filename` is sanitized to a bare basename (path separators
    /// stripped) before being embedded in the key, and defaults to
    /// [`DEFAULT_FILENAME`] when empty.
    pub fn object_key(repo: &str, issue_number: u64, id: Uuid, filename: &str) -> String {
        let filename = sanitize_filename(filename);
        format!("evidence/{repo}/issue-{issue_number}/{id}/{filename}")
    }

    /// Store `bytes` under a freshly generated id and return the resulting
    /// [`EvidenceRecord`]. Does not itself insert the record into any
    /// index; the caller does that via `relay-store`.
    pub async fn put(
        &self,
        repo: &str,
        issue_number: u64,
        event_id: Option<String>,
        filename: Option<&str>,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<EvidenceRecord, EvidenceError> {
        let id = Uuid::new_v4();
        let filename = sanitize_filename(filename.unwrap_or(DEFAULT_FILENAME));
        let object_key = Self::object_key(repo, issue_number, id, &filename);

        let path = self.path_for_key(&object_key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        Ok(EvidenceRecord {
            id,
            repo: repo.to_string(),
            issue_number,
            event_id,
            filename,
            content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
            object_key,
            size_bytes: bytes.len() as u64,
            uploaded_at: Utc::now(),
        })
    }

    /// Read back the raw bytes for a previously stored record.
    ///
    /// Returns `Ok(None)` when the record's object is absent from disk
    /// (e.g. manually deleted); the daemon maps that to a 404, matching
    /// §4.8's "missing or object absent" rule.
    pub async fn get(&self, record: &EvidenceRecord) -> Result<Option<Vec<u8>>, EvidenceError> {
        let path = self.path_for_key(&record.object_key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

/// Strip everything but the basename, and any surrounding quote
/// characters, from a caller-supplied filename — used both when computing
/// the object key and when building the `Content-Disposition` header on
/// retrieval.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_FILENAME);
    let stripped = base.trim_matches('"');
    if stripped.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        stripped.to_string()
    }
}
