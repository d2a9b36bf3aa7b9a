// SPDX-License-Identifier: MIT OR Apache-2.0
//! Domain types, canonicalization, and hashing for relay events.
//!
//! This crate defines the closed, tagged domain vocabulary shared by every
//! other relay crate — [`Role`], [`Environment`], [`Verdict`], [`Build`],
//! [`ScopeResult`] — together with [`EventInput`] (the normalized,
//! validator-emitted payload) and [`EventRow`] (the immutable stored
//! record). [`canonicalize`] and [`compute_hash`] implement the §4.3
//! hashing contract: re-submitting the same logical event must produce the
//! same hash byte-for-byte.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// The agent role that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Role {
    /// Quality-assurance agent.
    QA,
    /// Development agent.
    DEV,
    /// Project-management agent.
    PM,
    /// Mentor / oversight agent.
    MENTOR,
}

/// Deployment environment an event's build applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Preview / staging deployment.
    Preview,
    /// Production deployment.
    Production,
    /// Local development environment.
    Dev,
}

/// The outcome of a QA or DEV run.
///
/// Closed tagged enum per the redesign note in spec §9: polymorphism across
/// verdict kinds is replaced with this single type, and the downgrade rule
/// (see `relay-provenance`) is a pure function over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Verdict {
    /// The run passed.
    PASS,
    /// The run failed.
    FAIL,
    /// The run is blocked on an external dependency.
    BLOCKED,
    /// A `PASS` verdict whose reported commit did not match the PR head.
    PassUnverified,
    /// A `FAIL` verdict accepted from callers but never produced by the
    /// provenance downgrade rule.
    FailUnconfirmed,
}

impl Verdict {
    /// Parse the wire representation used in JSON payloads and label rules.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PASS" => Some(Self::PASS),
            "FAIL" => Some(Self::FAIL),
            "BLOCKED" => Some(Self::BLOCKED),
            "PASS_UNVERIFIED" => Some(Self::PassUnverified),
            "FAIL_UNCONFIRMED" => Some(Self::FailUnconfirmed),
            _ => None,
        }
    }

    /// The wire representation used in JSON payloads and label rules.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PASS => "PASS",
            Self::FAIL => "FAIL",
            Self::BLOCKED => "BLOCKED",
            Self::PassUnverified => "PASS_UNVERIFIED",
            Self::FailUnconfirmed => "FAIL_UNCONFIRMED",
        }
    }

    /// Returns `true` if this verdict requires `severity`, `repro_steps`,
    /// `expected`, and `actual` per §3.
    pub fn requires_failure_detail(&self) -> bool {
        matches!(self, Self::FAIL | Self::BLOCKED)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Verdict {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Verdict::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid verdict: {s}")))
    }
}

impl JsonSchema for Verdict {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "Verdict".into()
    }

    fn json_schema(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "string",
            "enum": ["PASS", "FAIL", "BLOCKED", "PASS_UNVERIFIED", "FAIL_UNCONFIRMED"],
        })
    }
}

/// Severity of a FAIL/BLOCKED verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Severity {
    /// Highest severity.
    P0,
    /// High severity.
    P1,
    /// Medium severity.
    P2,
    /// Low severity.
    P3,
}

/// Per-scope-item status within `scope_results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ScopeStatus {
    /// The scope item passed.
    PASS,
    /// The scope item failed.
    FAIL,
    /// The scope item was skipped.
    SKIPPED,
}

// ---------------------------------------------------------------------------
// Nested structures
// ---------------------------------------------------------------------------

/// Build provenance attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Build {
    /// Reported commit SHA, 7–40 hex characters, lowercased.
    pub commit_sha: String,
    /// Pull-request number this build was produced from.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pr: Option<u64>,
}

/// A single entry in `scope_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScopeResult {
    /// Non-empty scope-item identifier.
    pub id: String,
    /// Outcome of this scope item.
    pub status: ScopeStatus,
    /// Optional free-form note.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// EventInput — the validator-normalized, pre-persistence payload
// ---------------------------------------------------------------------------

/// The normalized, validated event payload as emitted by `relay-validate`.
///
/// Field order here is the canonical order used for hashing: struct-derived
/// serialization is deterministic, so two validator runs over the same
/// logical input always serialize identically. `details` is retained
/// verbatim as an opaque `serde_json::Value` — it participates in the
/// canonical serialization (and therefore the hash) but never drives
/// routing decisions (see spec §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventInput {
    /// Caller-supplied opaque event identifier, minimum 8 characters.
    pub event_id: String,
    /// `"<owner>/<name>"` slug.
    pub repo: String,
    /// Positive issue number.
    pub issue_number: u64,
    /// Free-form event type, e.g. `"qa.result_submitted"`.
    pub event_type: String,
    /// Emitting agent's role.
    pub role: Role,
    /// Emitting agent identifier, minimum 2 characters.
    pub agent: String,
    /// Deployment environment, if reported.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub environment: Option<Environment>,
    /// Reported verdict, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub overall_verdict: Option<Verdict>,
    /// Build provenance, if reported.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build: Option<Build>,
    /// Non-empty list of per-scope results, if reported.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scope_results: Option<Vec<ScopeResult>>,
    /// Required iff `overall_verdict` is `FAIL` or `BLOCKED`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub severity: Option<Severity>,
    /// Required (min length 3) iff `overall_verdict` is `FAIL` or `BLOCKED`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repro_steps: Option<String>,
    /// Required (min length 3) iff `overall_verdict` is `FAIL` or `BLOCKED`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected: Option<String>,
    /// Required (min length 3) iff `overall_verdict` is `FAIL` or `BLOCKED`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actual: Option<String>,
    /// Optional free-form human summary.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<String>,
    /// Optional list of evidence URLs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evidence_urls: Option<Vec<String>>,
    /// Optional free-form artifacts payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artifacts: Option<serde_json::Value>,
    /// Opaque unvalidated caller extension; part of the canonical
    /// serialization, never interpreted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<serde_json::Value>,
    /// Fields present on the inbound payload that the validator does not
    /// recognize. Per §4.2 these are ignored for routing purposes but
    /// flattened back into the canonical serialization, so they still
    /// participate in `payload_hash`/`payload_json`.
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// EventRow — the immutable, stored record
// ---------------------------------------------------------------------------

/// An immutable, stored event row.
///
/// `overall_verdict` here is the *effective* verdict (post provenance
/// downgrade); `payload_json`/`payload_hash` are computed from the
/// validator's [`EventInput`] before any downgrade is applied, since the
/// downgrade is a presentation/storage decision layered on top of the
/// caller's canonical submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventRow {
    /// Unique event identifier; primary identity.
    pub event_id: String,
    /// `"<owner>/<name>"` slug.
    pub repo: String,
    /// Issue number.
    pub issue_number: u64,
    /// Event type.
    pub event_type: String,
    /// Emitting agent's role.
    pub role: Role,
    /// Emitting agent identifier.
    pub agent: String,
    /// Deployment environment, if reported.
    pub environment: Option<Environment>,
    /// Effective verdict, after provenance downgrade.
    pub overall_verdict: Option<Verdict>,
    /// Build provenance, if reported.
    pub build: Option<Build>,
    /// Per-scope results, if reported.
    pub scope_results: Option<Vec<ScopeResult>>,
    /// Severity, required iff verdict demands failure detail.
    pub severity: Option<Severity>,
    /// Reproduction steps.
    pub repro_steps: Option<String>,
    /// Expected behavior.
    pub expected: Option<String>,
    /// Actual behavior.
    pub actual: Option<String>,
    /// Free-form summary.
    pub summary: Option<String>,
    /// Evidence URLs.
    pub evidence_urls: Option<Vec<String>>,
    /// Free-form artifacts payload.
    pub artifacts: Option<serde_json::Value>,
    /// Opaque caller extension.
    pub details: Option<serde_json::Value>,
    /// Server-assigned insertion timestamp.
    pub created_at: DateTime<Utc>,
    /// SHA-256 hex of the canonical serialized [`EventInput`].
    pub payload_hash: String,
    /// Canonical serialized payload, retained verbatim.
    pub payload_json: String,
    /// Whether the reported commit was verified against the PR head.
    /// `None` when no PR/commit was reported (not applicable).
    pub provenance_verified: Option<bool>,
}

// ---------------------------------------------------------------------------
// CommentMapping & EvidenceRecord — auxiliary store rows
// ---------------------------------------------------------------------------

/// The rolling-status comment currently associated with `(repo,
/// issue_number)`, per §4.6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CommentMapping {
    /// `"<owner>/<name>"` slug.
    pub repo: String,
    /// Issue number.
    pub issue_number: u64,
    /// Forge comment id.
    pub comment_id: u64,
    /// Last time this mapping was confirmed (created or successfully
    /// updated).
    pub updated_at: DateTime<Utc>,
}

/// Metadata for one uploaded evidence blob, per §4.8.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvidenceRecord {
    /// UUIDv4 evidence id.
    pub id: uuid::Uuid,
    /// `"<owner>/<name>"` slug.
    pub repo: String,
    /// Issue number.
    pub issue_number: u64,
    /// The `event_id` this evidence was uploaded alongside, if any.
    pub event_id: Option<String>,
    /// Original filename as supplied by the uploader, defaulting to
    /// `"upload.bin"`.
    pub filename: String,
    /// MIME type, as supplied by the uploader or `application/octet-stream`.
    pub content_type: String,
    /// Deterministic object-store key:
    /// `evidence/<repo>/issue-<n>/<id>/<filename>`.
    pub object_key: String,
    /// Size of the stored blob in bytes.
    pub size_bytes: u64,
    /// Server-assigned upload timestamp.
    pub uploaded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Canonicalization & hashing
// ---------------------------------------------------------------------------

/// Serialize `input` to its canonical JSON form.
///
/// Struct field order is fixed at compile time by `#[derive(Serialize)]`,
/// so this is deterministic across calls and across processes: the same
/// logical event always produces the same bytes.
pub fn canonicalize(input: &EventInput) -> String {
    serde_json::to_string(input).expect("EventInput serialization cannot fail")
}

/// Compute the SHA-256 hex digest of a canonical payload string.
pub fn compute_hash(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convenience: canonicalize `input` and return `(canonical_json, hash)`.
pub fn canonicalize_and_hash(input: &EventInput) -> (String, String) {
    let canonical = canonicalize(input);
    let hash = compute_hash(&canonical);
    (canonical, hash)
}

// Minimal local hex encoder to avoid pulling in the `hex` crate for seven
// lines of code; kept private to this module.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{b:02x}").expect("writing to a String cannot fail");
        }
        s
    }
}
