// SPDX-License-Identifier: MIT OR Apache-2.0
//! The agent relay daemon: wires the validator, event store, provenance
//! verifier, renderer, upsert state machine, and label engine into the
//! HTTP surface described in §4.9.
//!
//! The central pipeline lives in [`post_event`] and follows §2's data
//! flow verbatim: auth (middleware) → JSON parse → validate → hash →
//! idempotency lookup → mint forge token → provenance check → downgrade
//! verdict → insert → render → upsert → label transition → respond.

pub mod api;
pub mod middleware;
pub mod upsert;

use axum::extract::{Path as AxumPath, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum::body::Bytes;
use chrono::Utc;
use relay_core::EventRow;
use relay_error::{ErrorCode, RelayError};
use relay_evidence::EvidenceStore;
use relay_forge_client::{ForgeClient, ForgeConfig, ForgeError};
use relay_labels::LabelRules;
use relay_render::{ActivityEntry, BuildProvenance, QaResult, RenderInput};
use relay_store::{EventStore, InsertOutcome};
use std::sync::Arc;

use api::{ApiError, EventIngestResponse, EvidenceUploadResponse};

const DEV_EVENT_TYPE_PREFIX: &str = "dev.";
const QA_EVENT_TYPE_PREFIX: &str = "qa.";
const HEADER_RELAY_KEY: &str = "X-Relay-Key";

/// Shared, request-independent daemon state.
///
/// Per §5, the daemon itself is stateless across requests: `forge_config`
/// is just configuration, not a live token — each request builds its own
/// [`ForgeClient`] so the installation token is minted at most once per
/// request and discarded afterward.
pub struct AppState {
    /// Shared secret compared against `X-Relay-Key`.
    pub shared_secret: String,
    /// Configuration used to construct a fresh [`ForgeClient`] per request.
    pub forge_config: ForgeConfig,
    /// Declarative label transition rules.
    pub label_rules: Arc<LabelRules>,
    /// Event/comment-mapping/evidence-index store.
    pub event_store: Arc<EventStore>,
    /// Filesystem-backed evidence blob store.
    pub evidence_store: Arc<EvidenceStore>,
}

/// Build the daemon's router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v2/events", post(post_event))
        .route("/v2/evidence", post(post_evidence))
        .route("/v2/evidence/{id}", get(get_evidence))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .with_state(state)
}

async fn auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let provided = req
        .headers()
        .get(HEADER_RELAY_KEY)
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if key == state.shared_secret => next.run(req).await,
        _ => ApiError(RelayError::new(ErrorCode::AuthMissingOrInvalid, "missing or invalid X-Relay-Key")).into_response(),
    }
}

// ---------------------------------------------------------------------------
// POST /v2/events
// ---------------------------------------------------------------------------

async fn post_event(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let raw: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| RelayError::new(ErrorCode::MalformedJson, format!("request body is not valid JSON: {e}")))?;

    let input = relay_validate::validate(&raw).map_err(|e| RelayError::new(ErrorCode::ValidationFailed, e.to_string()))?;

    let (payload_json, payload_hash) = relay_core::canonicalize_and_hash(&input);

    if let Some(existing) = state.event_store.lookup(&input.event_id).await {
        if existing.payload_hash == payload_hash {
            let resp = EventIngestResponse {
                ok: true,
                event_id: input.event_id,
                stored: None,
                idempotent: Some(true),
                rolling_comment_id: None,
                verdict: None,
                provenance_verified: None,
            };
            return Ok((StatusCode::OK, Json(resp)).into_response());
        }
        return Err(RelayError::new(ErrorCode::EventHashConflict, "event_id already exists with a different payload")
            .with_context("existing_hash", &existing.payload_hash)
            .with_context("new_hash", &payload_hash)
            .into());
    }

    let forge = ForgeClient::new(state.forge_config.clone());

    let provenance = relay_provenance::verify(input.build.as_ref(), &forge, &input.repo)
        .await
        .map_err(forge_error)?;
    let verified = provenance.as_ref().map(|p| p.verified);
    let effective_verdict = relay_provenance::downgrade(input.overall_verdict, verified);

    let row = EventRow {
        event_id: input.event_id.clone(),
        repo: input.repo.clone(),
        issue_number: input.issue_number,
        event_type: input.event_type.clone(),
        role: input.role,
        agent: input.agent.clone(),
        environment: input.environment,
        overall_verdict: effective_verdict,
        build: input.build.clone(),
        scope_results: input.scope_results.clone(),
        severity: input.severity,
        repro_steps: input.repro_steps.clone(),
        expected: input.expected.clone(),
        actual: input.actual.clone(),
        summary: input.summary.clone(),
        evidence_urls: input.evidence_urls.clone(),
        artifacts: input.artifacts.clone(),
        details: input.details.clone(),
        created_at: Utc::now(),
        payload_hash,
        payload_json,
        provenance_verified: verified,
    };

    let inserted = state.event_store.insert(row).await.map_err(|e| {
        RelayError::new(ErrorCode::Internal, "failed to persist event").with_source(e)
    })?;

    let row = match inserted {
        InsertOutcome::Inserted(row) => row,
        InsertOutcome::Idempotent(row) => {
            let resp = EventIngestResponse {
                ok: true,
                event_id: row.event_id,
                stored: None,
                idempotent: Some(true),
                rolling_comment_id: None,
                verdict: None,
                provenance_verified: None,
            };
            return Ok((StatusCode::OK, Json(resp)).into_response());
        }
        InsertOutcome::Conflict { existing_hash, new_hash } => {
            return Err(RelayError::new(ErrorCode::EventHashConflict, "event_id already exists with a different payload")
                .with_context("existing_hash", existing_hash)
                .with_context("new_hash", new_hash)
                .into());
        }
    };

    let issue = forge.get_issue(&row.repo, row.issue_number).await.map_err(forge_error)?;
    let latest_dev = state
        .event_store
        .latest_by_type(&row.repo, row.issue_number, &format!("{DEV_EVENT_TYPE_PREFIX}update"))
        .await;
    let latest_qa = state
        .event_store
        .latest_by_type(&row.repo, row.issue_number, &format!("{QA_EVENT_TYPE_PREFIX}result_submitted"))
        .await;
    let recent = state.event_store.recent_activity(&row.repo, row.issue_number, 5).await;

    let render_input = RenderInput {
        issue_number: row.issue_number,
        labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        assignees: issue.assignees.iter().map(|a| a.login.clone()).collect(),
        provenance: BuildProvenance {
            environment: row.environment,
            pr: row.build.as_ref().and_then(|b| b.pr),
            commit_sha: row.build.as_ref().map(|b| b.commit_sha.clone()),
            verified,
            pr_head_sha: provenance.as_ref().map(|p| p.pr_head_sha.clone()),
        },
        latest_dev_summary: latest_dev.and_then(|e| e.summary),
        latest_qa: latest_qa.map(|e| QaResult {
            verdict: e.overall_verdict.unwrap_or(row.overall_verdict.unwrap_or(relay_core::Verdict::PASS)),
            scope_results: e.scope_results,
            evidence_urls: e.evidence_urls,
        }),
        recent_activity: recent
            .into_iter()
            .map(|e| ActivityEntry {
                created_at: e.created_at,
                event_type: e.event_type,
                agent: e.agent,
            })
            .collect(),
    };
    let body_md = relay_render::render(&render_input);

    let rolling_comment_id = upsert::upsert_rolling_comment(&forge, &state.event_store, &row.repo, row.issue_number, &body_md)
        .await
        .map_err(forge_error)?;

    if let Some(transition) = state
        .label_rules
        .resolve(&row.event_type, row.overall_verdict.map(|v| v.as_str()))
    {
        let current: Vec<String> = issue.labels.into_iter().map(|l| l.name).collect();
        let next = relay_labels::apply(&current, transition);
        forge
            .put_labels(&row.repo, row.issue_number, &next)
            .await
            .map_err(forge_error)?;
    }

    let resp = EventIngestResponse {
        ok: true,
        event_id: row.event_id,
        stored: Some(true),
        idempotent: None,
        rolling_comment_id: Some(rolling_comment_id),
        verdict: row.overall_verdict.map(|v| v.as_str().to_string()),
        provenance_verified: verified,
    };
    Ok((StatusCode::CREATED, Json(resp)).into_response())
}

fn forge_error(err: ForgeError) -> ApiError {
    match err {
        ForgeError::Response { status, body } => RelayError::new(ErrorCode::ForgeRequestFailed, "the upstream forge returned an error")
            .with_context("status", status)
            .with_context("body", body)
            .into(),
        other => RelayError::new(ErrorCode::ForgeRequestFailed, "forge request failed").with_source(other).into(),
    }
}

// ---------------------------------------------------------------------------
// Evidence endpoints
// ---------------------------------------------------------------------------

async fn post_evidence(State(state): State<Arc<AppState>>, mut multipart: axum::extract::Multipart) -> Result<Response, ApiError> {
    let mut repo: Option<String> = None;
    let mut issue_number: Option<u64> = None;
    let mut event_id: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::new(ErrorCode::ValidationFailed, format!("invalid multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "repo" => repo = Some(field_text(field).await?),
            "issue_number" => issue_number = Some(
                field_text(field)
                    .await?
                    .parse()
                    .map_err(|_| RelayError::new(ErrorCode::ValidationFailed, "issue_number must be a positive integer"))?,
            ),
            "event_id" => event_id = Some(field_text(field).await?),
            "file" => {
                filename = field.file_name().map(str::to_string);
                content_type = field.content_type().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| RelayError::new(ErrorCode::ValidationFailed, format!("failed to read file field: {e}")))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let repo = repo.ok_or_else(|| RelayError::new(ErrorCode::ValidationFailed, "repo is required"))?;
    let issue_number = issue_number.ok_or_else(|| RelayError::new(ErrorCode::ValidationFailed, "issue_number is required"))?;
    let bytes = bytes.ok_or_else(|| RelayError::new(ErrorCode::ValidationFailed, "file is required"))?;

    let record = state
        .evidence_store
        .put(&repo, issue_number, event_id.clone(), filename.as_deref(), content_type.as_deref(), &bytes)
        .await
        .map_err(|e| RelayError::new(ErrorCode::Internal, "failed to store evidence").with_source(e))?;

    state.event_store.insert_evidence(record.clone()).await.map_err(|e| {
        RelayError::new(ErrorCode::Internal, "failed to index evidence").with_source(e)
    })?;

    let resp = EvidenceUploadResponse {
        id: record.id,
        repo: record.repo,
        issue_number: record.issue_number,
        event_id: record.event_id,
        filename: record.filename,
        content_type: record.content_type,
        size_bytes: record.size_bytes,
        url: format!("/v2/evidence/{}", record.id),
    };
    Ok((StatusCode::CREATED, Json(resp)).into_response())
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| RelayError::new(ErrorCode::ValidationFailed, format!("invalid multipart field: {e}")).into())
}

async fn get_evidence(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<uuid::Uuid>) -> Result<Response, ApiError> {
    let record = state
        .event_store
        .get_evidence(id)
        .await
        .ok_or_else(|| RelayError::new(ErrorCode::EvidenceNotFound, "no such evidence"))?;

    let bytes = state
        .evidence_store
        .get(&record)
        .await
        .map_err(|e| RelayError::new(ErrorCode::Internal, "failed to read evidence object").with_source(e))?
        .ok_or_else(|| RelayError::new(ErrorCode::EvidenceNotFound, "evidence object is missing"))?;

    let sanitized = relay_evidence::sanitize_filename(&record.filename);
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::CONTENT_TYPE,
        record.content_type.parse().unwrap_or_else(|_| "application/octet-stream".parse().unwrap()),
    );
    headers.insert(
        axum::http::header::CONTENT_DISPOSITION,
        format!("inline; filename=\"{sanitized}\"").parse().unwrap(),
    );
    Ok((headers, bytes).into_response())
}
