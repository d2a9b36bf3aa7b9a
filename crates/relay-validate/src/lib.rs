// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validation of inbound relay event payloads.
//!
//! [`validate`] turns an untrusted [`serde_json::Value`] into a normalized
//! [`relay_core::EventInput`], short-circuiting on the *first* rule
//! violation per §4.2 — unlike `relay-json-guard`'s config validator (which
//! accumulates every error), this validator rejects with a single
//! diagnostic message so the daemon can respond 400 with one clear reason.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use relay_core::{Build, Environment, EventInput, Role, ScopeResult, ScopeStatus, Severity, Verdict};
use relay_json_guard::{validate_json_object, JsonGuardLimits};
use serde_json::Value;
use std::fmt;

/// Limits applied to the opaque `details`/`artifacts` fields.
const OPAQUE_FIELD_LIMITS: JsonGuardLimits = JsonGuardLimits::new(10, 65_536);

/// Top-level payload fields this validator interprets. Anything else on the
/// inbound object is preserved verbatim in [`EventInput::extra`] rather than
/// dropped, per §4.2.
const KNOWN_FIELDS: &[&str] = &[
    "event_id",
    "repo",
    "issue_number",
    "event_type",
    "role",
    "agent",
    "environment",
    "overall_verdict",
    "build",
    "scope_results",
    "severity",
    "repro_steps",
    "expected",
    "actual",
    "summary",
    "evidence_urls",
    "artifacts",
    "details",
];

/// A single first-violation validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

type Result<T> = std::result::Result<T, ValidationError>;

/// Validate and normalize a raw event payload.
///
/// On success, returns the normalized [`EventInput`] ready for
/// canonicalization and hashing. On failure, returns the single
/// diagnostic message describing the first violation encountered, in the
/// field order below.
pub fn validate(raw: &Value) -> Result<EventInput> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidationError::new("payload must be a JSON object"))?;

    let event_id = required_string(obj, "event_id")?;
    if event_id.len() < 8 {
        return Err(ValidationError::new("event_id must be at least 8 characters"));
    }

    let repo = required_string(obj, "repo")?;
    validate_repo_slug(&repo)?;

    let issue_number = required_positive_u64(obj, "issue_number")?;

    let event_type = required_string(obj, "event_type")?;
    if event_type.is_empty() {
        return Err(ValidationError::new("event_type must not be empty"));
    }

    let role = required_role(obj, "role")?;

    let agent = required_string(obj, "agent")?;
    if agent.len() < 2 {
        return Err(ValidationError::new("agent must be at least 2 characters"));
    }

    let environment = optional_environment(obj, "environment")?;
    let overall_verdict = optional_verdict(obj, "overall_verdict")?;
    let build = optional_build(obj, "build")?;
    let scope_results = optional_scope_results(obj, "scope_results")?;

    let requires_failure_detail = overall_verdict
        .map(|v| v.requires_failure_detail())
        .unwrap_or(false);

    let severity = optional_severity(obj, "severity")?;
    let repro_steps = optional_min_len_string(obj, "repro_steps", 3)?;
    let expected = optional_min_len_string(obj, "expected", 3)?;
    let actual = optional_min_len_string(obj, "actual", 3)?;

    if requires_failure_detail {
        if severity.is_none() {
            return Err(ValidationError::new(
                "severity is required when overall_verdict is FAIL or BLOCKED",
            ));
        }
        if repro_steps.is_none() {
            return Err(ValidationError::new(
                "repro_steps is required when overall_verdict is FAIL or BLOCKED",
            ));
        }
        if expected.is_none() {
            return Err(ValidationError::new(
                "expected is required when overall_verdict is FAIL or BLOCKED",
            ));
        }
        if actual.is_none() {
            return Err(ValidationError::new(
                "actual is required when overall_verdict is FAIL or BLOCKED",
            ));
        }
    }

    let summary = optional_string(obj, "summary")?;
    let evidence_urls = optional_string_array(obj, "evidence_urls")?;

    let artifacts = obj.get("artifacts").cloned();
    if let Some(ref v) = artifacts {
        let errors = validate_json_object(&wrap_for_guard(v), OPAQUE_FIELD_LIMITS);
        if !errors.is_empty() {
            return Err(ValidationError::new(format!("artifacts: {}", errors[0])));
        }
    }

    let details = obj.get("details").cloned();
    if let Some(ref v) = details {
        let errors = validate_json_object(&wrap_for_guard(v), OPAQUE_FIELD_LIMITS);
        if !errors.is_empty() {
            return Err(ValidationError::new(format!("details: {}", errors[0])));
        }
    }

    let extra = obj
        .iter()
        .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(EventInput {
        event_id,
        repo,
        issue_number,
        event_type,
        role,
        agent,
        environment,
        overall_verdict,
        build,
        scope_results,
        severity,
        repro_steps,
        expected,
        actual,
        summary,
        evidence_urls,
        artifacts,
        details,
        extra,
    })
}

/// `validate_json_object` requires a JSON object; opaque fields may be any
/// JSON value, so wrap non-objects in a single-key object before guarding.
fn wrap_for_guard(v: &Value) -> Value {
    if v.is_object() {
        v.clone()
    } else {
        serde_json::json!({ "_": v })
    }
}

fn validate_repo_slug(repo: &str) -> Result<()> {
    let parts: Vec<&str> = repo.split('/').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() || repo.matches('/').count() != 1
    {
        return Err(ValidationError::new(
            "repo must match \"<owner>/<name>\"",
        ));
    }
    Ok(())
}

fn required_string(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(ValidationError::new(format!("{field} must not be empty"))),
        Some(_) => Err(ValidationError::new(format!("{field} must be a string"))),
        None => Err(ValidationError::new(format!("{field} is required"))),
    }
}

fn optional_string(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Option<String>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::new(format!("{field} must be a string"))),
    }
}

fn optional_min_len_string(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    min_len: usize,
) -> Result<Option<String>> {
    match optional_string(obj, field)? {
        None => Ok(None),
        Some(s) if s.len() >= min_len => Ok(Some(s)),
        Some(_) => Err(ValidationError::new(format!(
            "{field} must be at least {min_len} characters"
        ))),
    }
}

fn optional_string_array(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<Vec<String>>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => return Err(ValidationError::new(format!("{field} must be an array of strings"))),
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(ValidationError::new(format!("{field} must be an array of strings"))),
    }
}

/// Accepts a JSON number or a string that parses as a non-negative integer
/// (string→int coercion, per §3), and requires it to be strictly positive.
fn required_positive_u64(obj: &serde_json::Map<String, Value>, field: &str) -> Result<u64> {
    let n = match obj.get(field) {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| ValidationError::new(format!("{field} must be a positive integer")))?,
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map_err(|_| ValidationError::new(format!("{field} must be a positive integer")))?,
        Some(_) => return Err(ValidationError::new(format!("{field} must be a positive integer"))),
        None => return Err(ValidationError::new(format!("{field} is required"))),
    };
    if n == 0 {
        return Err(ValidationError::new(format!("{field} must be positive")));
    }
    Ok(n)
}

fn required_role(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Role> {
    let s = required_string(obj, field)?;
    match s.as_str() {
        "QA" => Ok(Role::QA),
        "DEV" => Ok(Role::DEV),
        "PM" => Ok(Role::PM),
        "MENTOR" => Ok(Role::MENTOR),
        _ => Err(ValidationError::new(
            "role must be one of QA, DEV, PM, MENTOR",
        )),
    }
}

fn optional_environment(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<Environment>> {
    match optional_string(obj, field)? {
        None => Ok(None),
        Some(s) => match s.as_str() {
            "preview" => Ok(Some(Environment::Preview)),
            "production" => Ok(Some(Environment::Production)),
            "dev" => Ok(Some(Environment::Dev)),
            _ => Err(ValidationError::new(
                "environment must be one of preview, production, dev",
            )),
        },
    }
}

fn optional_verdict(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Option<Verdict>> {
    match optional_string(obj, field)? {
        None => Ok(None),
        Some(s) => Verdict::parse(&s)
            .map(Some)
            .ok_or_else(|| ValidationError::new(format!("{field} is not a recognized verdict"))),
    }
}

fn optional_severity(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Option<Severity>> {
    match optional_string(obj, field)? {
        None => Ok(None),
        Some(s) => match s.as_str() {
            "P0" => Ok(Some(Severity::P0)),
            "P1" => Ok(Some(Severity::P1)),
            "P2" => Ok(Some(Severity::P2)),
            "P3" => Ok(Some(Severity::P3)),
            _ => Err(ValidationError::new("severity must be one of P0, P1, P2, P3")),
        },
    }
}

fn optional_build(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Option<Build>> {
    let Some(v) = obj.get(field) else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    let build_obj = v
        .as_object()
        .ok_or_else(|| ValidationError::new("build must be an object"))?;

    let commit_sha = required_string(build_obj, "commit_sha").map_err(|_| {
        ValidationError::new("build.commit_sha is required")
    })?;
    let normalized = validate_commit_sha(&commit_sha)?;

    let pr = match build_obj.get("pr") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(
            n.as_u64()
                .ok_or_else(|| ValidationError::new("build.pr must be a positive integer"))?,
        ),
        Some(Value::String(s)) => Some(
            s.parse::<u64>()
                .map_err(|_| ValidationError::new("build.pr must be a positive integer"))?,
        ),
        Some(_) => return Err(ValidationError::new("build.pr must be a positive integer")),
    };

    Ok(Some(Build {
        commit_sha: normalized,
        pr,
    }))
}

fn validate_commit_sha(sha: &str) -> Result<String> {
    if !(7..=40).contains(&sha.len()) || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::new(
            "build.commit_sha must be 7-40 hexadecimal characters",
        ));
    }
    Ok(sha.to_ascii_lowercase())
}

fn optional_scope_results(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<Vec<ScopeResult>>> {
    let Some(v) = obj.get(field) else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    let items = v
        .as_array()
        .ok_or_else(|| ValidationError::new("scope_results must be an array"))?;
    if items.is_empty() {
        return Err(ValidationError::new("scope_results must not be empty"));
    }

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let item_obj = item
            .as_object()
            .ok_or_else(|| ValidationError::new("each scope_results entry must be an object"))?;
        let id = required_string(item_obj, "id").map_err(|_| {
            ValidationError::new("each scope_results entry requires a non-empty id")
        })?;
        let status_str = required_string(item_obj, "status").map_err(|_| {
            ValidationError::new("each scope_results entry requires a status")
        })?;
        let status = match status_str.as_str() {
            "PASS" => ScopeStatus::PASS,
            "FAIL" => ScopeStatus::FAIL,
            "SKIPPED" => ScopeStatus::SKIPPED,
            _ => {
                return Err(ValidationError::new(
                    "scope_results status must be one of PASS, FAIL, SKIPPED",
                ))
            }
        };
        let notes = optional_string(item_obj, "notes")?;
        out.push(ScopeResult { id, status, notes });
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> Value {
        serde_json::json!({
            "event_id": "evt-00000001",
            "repo": "acme/web",
            "issue_number": 42,
            "event_type": "qa.result_submitted",
            "role": "QA",
            "agent": "qa-bot",
            "overall_verdict": "PASS",
            "build": { "commit_sha": "abc1234def", "pr": 7 },
        })
    }

    #[test]
    fn accepts_a_minimal_valid_payload() {
        let result = validate(&valid_payload());
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn rejects_short_event_id() {
        let mut p = valid_payload();
        p["event_id"] = serde_json::json!("short");
        let err = validate(&p).unwrap_err();
        assert!(err.0.contains("event_id"));
    }

    #[test]
    fn rejects_malformed_repo_slug() {
        let mut p = valid_payload();
        p["repo"] = serde_json::json!("no-slash-here");
        let err = validate(&p).unwrap_err();
        assert!(err.0.contains("repo"));
    }

    #[test]
    fn rejects_zero_issue_number() {
        let mut p = valid_payload();
        p["issue_number"] = serde_json::json!(0);
        let err = validate(&p).unwrap_err();
        assert!(err.0.contains("issue_number"));
    }

    #[test]
    fn coerces_string_issue_number() {
        let mut p = valid_payload();
        p["issue_number"] = serde_json::json!("42");
        let input = validate(&p).unwrap();
        assert_eq!(input.issue_number, 42);
    }

    #[test]
    fn lowercases_commit_sha() {
        let mut p = valid_payload();
        p["build"]["commit_sha"] = serde_json::json!("ABC1234DEF");
        let input = validate(&p).unwrap();
        assert_eq!(input.build.unwrap().commit_sha, "abc1234def");
    }

    #[test]
    fn fail_verdict_requires_failure_detail_fields() {
        let mut p = valid_payload();
        p["overall_verdict"] = serde_json::json!("FAIL");
        let err = validate(&p).unwrap_err();
        assert!(err.0.contains("severity"));
    }

    #[test]
    fn fail_verdict_with_full_detail_is_accepted() {
        let mut p = valid_payload();
        p["overall_verdict"] = serde_json::json!("FAIL");
        p["severity"] = serde_json::json!("P1");
        p["repro_steps"] = serde_json::json!("do the thing");
        p["expected"] = serde_json::json!("it works");
        p["actual"] = serde_json::json!("it breaks");
        assert!(validate(&p).is_ok());
    }

    #[test]
    fn rejects_empty_scope_results() {
        let mut p = valid_payload();
        p["scope_results"] = serde_json::json!([]);
        let err = validate(&p).unwrap_err();
        assert!(err.0.contains("scope_results"));
    }

    #[test]
    fn first_violation_wins_event_id_before_repo() {
        let mut p = valid_payload();
        p["event_id"] = serde_json::json!("short");
        p["repo"] = serde_json::json!("also-bad");
        let err = validate(&p).unwrap_err();
        assert!(err.0.contains("event_id"));
    }

    #[test]
    fn unknown_fields_are_ignored_but_preserved() {
        let mut p = valid_payload();
        p["totally_unknown_field"] = serde_json::json!("whatever");
        let input = validate(&p).unwrap();
        assert_eq!(
            input.extra.get("totally_unknown_field"),
            Some(&serde_json::json!("whatever"))
        );
        let (canonical, _) = relay_core::canonicalize_and_hash(&input);
        assert!(canonical.contains("totally_unknown_field"));
    }
}
