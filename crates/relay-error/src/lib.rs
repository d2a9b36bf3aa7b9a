//! Unified error taxonomy with stable error codes for the agent relay.
//!
//! Every relay error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`RelayError::new`] to construct errors fluently. [`ErrorCode::status`]
//! maps each code to the HTTP status the daemon responds with, per the
//! error taxonomy: validation (400), auth (401), not-found (404), conflict
//! (409), forge/internal (500).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or semantically invalid event payload.
    Validation,
    /// Missing or wrong shared secret / bearer token.
    Auth,
    /// Requested resource does not exist.
    NotFound,
    /// `event_id` reused with a differing payload hash.
    Conflict,
    /// Non-2xx response from the upstream code-forge.
    Forge,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Forge => "forge",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Validation --
    /// Event payload failed a §3 rule (the first violation encountered).
    ValidationFailed,
    /// Request body was not valid JSON.
    MalformedJson,

    // -- Auth --
    /// `X-Relay-Key` header missing or did not match the shared secret.
    AuthMissingOrInvalid,

    // -- NotFound --
    /// Evidence id is unknown, or its backing object is absent.
    EvidenceNotFound,

    // -- Conflict --
    /// `event_id` already exists with a different `payload_hash`.
    EventHashConflict,

    // -- Forge --
    /// The upstream code-forge returned a non-2xx response.
    ForgeRequestFailed,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationFailed | Self::MalformedJson => ErrorCategory::Validation,
            Self::AuthMissingOrInvalid => ErrorCategory::Auth,
            Self::EvidenceNotFound => ErrorCategory::NotFound,
            Self::EventHashConflict => ErrorCategory::Conflict,
            Self::ForgeRequestFailed => ErrorCategory::Forge,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// HTTP status code the daemon responds with for this error, per §7.
    pub fn status(&self) -> u16 {
        match self {
            Self::ValidationFailed | Self::MalformedJson => 400,
            Self::AuthMissingOrInvalid => 401,
            Self::EvidenceNotFound => 404,
            Self::EventHashConflict => 409,
            Self::ForgeRequestFailed | Self::Internal => 500,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"VALIDATION_FAILED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::MalformedJson => "MALFORMED_JSON",
            Self::AuthMissingOrInvalid => "AUTH_MISSING_OR_INVALID",
            Self::EvidenceNotFound => "EVIDENCE_NOT_FOUND",
            Self::EventHashConflict => "EVENT_HASH_CONFLICT",
            Self::ForgeRequestFailed => "FORGE_REQUEST_FAILED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RelayError
// ---------------------------------------------------------------------------

/// Unified relay error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use relay_error::{RelayError, ErrorCode};
///
/// let err = RelayError::new(ErrorCode::ForgeRequestFailed, "PUT labels failed")
///     .with_context("status", 503)
///     .with_context("repo", "acme/web");
/// ```
pub struct RelayError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl RelayError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.status()`.
    pub fn status(&self) -> u16 {
        self.code.status()
    }

    /// Convert this error into a JSON response body: `{error, details?}`.
    pub fn to_response_body(&self) -> serde_json::Value {
        if self.context.is_empty() {
            serde_json::json!({ "error": self.message })
        } else {
            serde_json::json!({ "error": self.message, "details": self.context })
        }
    }
}

impl fmt::Debug for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RelayError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
