// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rolling-comment upsert: the three-tier fallback from §4.6, modeled as
//! an explicit state machine per the §9 redesign note.
//!
//! States: `HAS_MAPPING` (try the cached comment id; any failure, including
//! a 404 from a deleted comment, falls through), `NEEDS_SCAN` (walk up to
//! 3 pages of comments looking for the marker), `NEEDS_CREATE` (post a new
//! comment). Only the final tier's forge error is fatal to the caller —
//! every earlier failure is a cue to advance to the next tier, not to
//! abort.

use chrono::Utc;
use relay_core::CommentMapping;
use relay_forge_client::{ForgeClient, ForgeError};
use relay_store::EventStore;

const MAX_SCAN_PAGES: u32 = 3;

/// Upsert the rolling-status comment for `(repo, issue_number)` with
/// `body`, returning the forge comment id that now carries it.
///
/// Only propagates a [`ForgeError`] when the final `NEEDS_CREATE` tier
/// itself fails — there is nowhere left to fall through to.
pub async fn upsert_rolling_comment(
    forge: &ForgeClient,
    store: &EventStore,
    repo: &str,
    issue_number: u64,
    body: &str,
) -> Result<u64, ForgeError> {
    if let Some(mapping) = store.comment_mapping(repo, issue_number).await {
        if forge.update_comment(repo, mapping.comment_id, body).await.is_ok() {
            remember_mapping(store, repo, issue_number, mapping.comment_id).await;
            return Ok(mapping.comment_id);
        }
        // Fall through to NEEDS_SCAN: the cached id is stale (edited away,
        // deleted, or otherwise unreachable).
    }

    for page in 1..=MAX_SCAN_PAGES {
        let comments = forge.list_comments(repo, issue_number, page).await?;
        if comments.is_empty() {
            break;
        }
        if let Some(found) = comments.iter().find(|c| c.body.starts_with(relay_render::MARKER)) {
            if forge.update_comment(repo, found.id, body).await.is_ok() {
                remember_mapping(store, repo, issue_number, found.id).await;
                return Ok(found.id);
            }
            // Even the marker comment we just found rejected the update;
            // fall through to NEEDS_CREATE rather than retry indefinitely.
            break;
        }
    }

    let created = forge.create_comment(repo, issue_number, body).await?;
    remember_mapping(store, repo, issue_number, created.id).await;
    Ok(created.id)
}

async fn remember_mapping(store: &EventStore, repo: &str, issue_number: u64, comment_id: u64) {
    let mapping = CommentMapping {
        repo: repo.to_string(),
        issue_number,
        comment_id,
        updated_at: Utc::now(),
    };
    if let Err(err) = store.put_comment_mapping(mapping).await {
        tracing::warn!(%err, repo, issue_number, comment_id, "failed to persist rolling-comment mapping");
    }
}
