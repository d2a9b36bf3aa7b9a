// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request/response DTOs and the `axum::IntoResponse` bridge for
//! [`relay_error::RelayError`], per §6's wire contracts.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_error::RelayError;
use serde::Serialize;

/// Newtype bridging [`RelayError`] (defined in another crate) to Axum's
/// `IntoResponse`, sidestepping the orphan rule.
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_response_body())).into_response()
    }
}

/// Response body for `POST /v2/events`, per §6.
#[derive(Debug, Clone, Serialize)]
pub struct EventIngestResponse {
    /// Always `true` on a 2xx response.
    pub ok: bool,
    /// Echoes the submitted `event_id`.
    pub event_id: String,
    /// `true` when this submission resulted in a new row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<bool>,
    /// `true` when this submission was a byte-identical replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
    /// The rolling-status comment's forge id, if the pipeline reached the
    /// upsert step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_comment_id: Option<u64>,
    /// The effective verdict (post provenance downgrade), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    /// Tri-state provenance verification result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance_verified: Option<bool>,
}

/// Response body for `POST /v2/evidence`, per §6.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceUploadResponse {
    /// Evidence id (UUIDv4).
    pub id: uuid::Uuid,
    /// Owning repo slug.
    pub repo: String,
    /// Owning issue number.
    pub issue_number: u64,
    /// The `event_id` this evidence was uploaded alongside, if any.
    pub event_id: Option<String>,
    /// Stored filename.
    pub filename: String,
    /// Stored content type.
    pub content_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Stable retrieval URL path.
    pub url: String,
}
