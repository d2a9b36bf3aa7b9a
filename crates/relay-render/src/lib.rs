// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pure rendering of the rolling-status comment markdown, per §4.5.
//!
//! [`render`] is a pure function: the same [`RenderInput`] always produces
//! byte-identical markdown. All forge I/O (fetching the issue, the latest
//! dev/QA events, recent activity) happens upstream in the daemon; this
//! crate only formats what it is given.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use relay_core::{Environment, ScopeResult, ScopeStatus, Verdict};

/// The literal marker that must begin every rolling-status comment body.
pub const MARKER: &str = "<!-- RELAY_STATUS v2 -->";

/// Build provenance inputs for the "Build Provenance" section.
#[derive(Debug, Clone, Default)]
pub struct BuildProvenance {
    /// Deployment environment reported on the triggering event.
    pub environment: Option<Environment>,
    /// Pull request number reported on the triggering event.
    pub pr: Option<u64>,
    /// Commit SHA reported on the triggering event (already lowercased).
    pub commit_sha: Option<String>,
    /// Tri-state verification result: `None` when not applicable, `Some`
    /// otherwise.
    pub verified: Option<bool>,
    /// The PR's actual head SHA, populated whenever `verified.is_some()`.
    pub pr_head_sha: Option<String>,
}

/// Summary of the latest QA event for this issue.
#[derive(Debug, Clone)]
pub struct QaResult {
    /// Effective verdict of the latest QA event.
    pub verdict: Verdict,
    /// Per-scope results reported on that event, if any.
    pub scope_results: Option<Vec<ScopeResult>>,
    /// Evidence URLs reported on that event, if any.
    pub evidence_urls: Option<Vec<String>>,
}

/// One entry in the "Recent Activity" list.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
    /// The event's `event_type`.
    pub event_type: String,
    /// The event's reporting agent.
    pub agent: String,
}

/// Everything [`render`] needs to produce the rolling-status body.
#[derive(Debug, Clone, Default)]
pub struct RenderInput {
    /// Issue number this comment is attached to.
    pub issue_number: u64,
    /// The issue's current full label set.
    pub labels: Vec<String>,
    /// Login names of the issue's assignees, in forge order.
    pub assignees: Vec<String>,
    /// Build/provenance details from the event that triggered this render.
    pub provenance: BuildProvenance,
    /// `summary` from the latest `dev.*` event, if any.
    pub latest_dev_summary: Option<String>,
    /// Latest QA result, if any.
    pub latest_qa: Option<QaResult>,
    /// Up to 5 most recent events, newest first.
    pub recent_activity: Vec<ActivityEntry>,
}

/// Render the rolling-status comment body for `input`.
///
/// Deterministic: calling this twice with equal inputs produces identical
/// output, byte for byte.
pub fn render(input: &RenderInput) -> String {
    let mut out = String::new();
    out.push_str(MARKER);
    out.push('\n');
    out.push_str(&format!("## Relay Status — ISSUE #{}\n\n", input.issue_number));

    render_current_state(&mut out, input);
    render_build_provenance(&mut out, &input.provenance);
    render_latest_dev_update(&mut out, input);
    render_latest_qa_result(&mut out, input);
    render_recent_activity(&mut out, input);

    out
}

fn render_current_state(out: &mut String, input: &RenderInput) {
    let status = input
        .labels
        .iter()
        .find_map(|l| l.strip_prefix("status:"))
        .unwrap_or("n/a");
    let owner = input
        .assignees
        .first()
        .map(|login| format!("@{login}"))
        .unwrap_or_else(|| "unassigned".to_string());
    let labels_line = if input.labels.is_empty() {
        "n/a".to_string()
    } else {
        input.labels.join(", ")
    };

    out.push_str("### Current State\n");
    out.push_str(&format!("- Status: {status}\n"));
    out.push_str(&format!("- Labels: {labels_line}\n"));
    out.push_str(&format!("- Owner: {owner}\n\n"));
}

fn render_build_provenance(out: &mut String, prov: &BuildProvenance) {
    out.push_str("### Build Provenance\n");
    out.push_str(&format!(
        "- Environment: {}\n",
        prov.environment.map(environment_str).unwrap_or("n/a")
    ));
    out.push_str(&format!(
        "- PR: {}\n",
        prov.pr.map(|n| format!("#{n}")).unwrap_or_else(|| "n/a".to_string())
    ));
    out.push_str(&format!(
        "- Commit: {}\n",
        prov.commit_sha
            .as_deref()
            .map(|sha| format!("`{}`", short_sha(sha)))
            .unwrap_or_else(|| "n/a".to_string())
    ));
    let flag = match prov.verified {
        None => "n/a".to_string(),
        Some(true) => "VERIFIED (matches PR head)".to_string(),
        Some(false) => format!(
            "UNVERIFIED (PR head: `{}`)",
            prov.pr_head_sha.as_deref().map(short_sha).unwrap_or("unknown")
        ),
    };
    out.push_str(&format!("- Provenance: {flag}\n\n"));
}

fn render_latest_dev_update(out: &mut String, input: &RenderInput) {
    out.push_str("### Latest Dev Update\n");
    out.push_str(input.latest_dev_summary.as_deref().unwrap_or("n/a"));
    out.push_str("\n\n");
}

fn render_latest_qa_result(out: &mut String, input: &RenderInput) {
    out.push_str("### Latest QA Result\n");
    match &input.latest_qa {
        None => out.push_str("n/a\n\n"),
        Some(qa) => {
            out.push_str(&format!("- Verdict: `{}`\n", qa.verdict.as_str()));
            out.push_str("- Scope Results:\n");
            match &qa.scope_results {
                None => out.push_str("  n/a\n"),
                Some(results) if results.is_empty() => out.push_str("  n/a\n"),
                Some(results) => {
                    for r in results {
                        out.push_str(&format!("  - {}: {}\n", r.id, scope_status_str(r.status)));
                    }
                }
            }
            out.push_str("- Evidence: ");
            match &qa.evidence_urls {
                None => out.push_str("n/a\n\n"),
                Some(urls) if urls.is_empty() => out.push_str("n/a\n\n"),
                Some(urls) => {
                    out.push_str(&urls.join(", "));
                    out.push_str("\n\n");
                }
            }
        }
    }
}

fn render_recent_activity(out: &mut String, input: &RenderInput) {
    out.push_str("### Recent Activity\n");
    if input.recent_activity.is_empty() {
        out.push_str("n/a\n");
        return;
    }
    for entry in &input.recent_activity {
        out.push_str(&format!(
            "- {} — {} — {}\n",
            entry.created_at.format("%H:%MZ"),
            entry.event_type,
            entry.agent
        ));
    }
}

fn environment_str(env: Environment) -> &'static str {
    match env {
        Environment::Preview => "preview",
        Environment::Production => "production",
        Environment::Dev => "dev",
    }
}

fn scope_status_str(status: ScopeStatus) -> &'static str {
    match status {
        ScopeStatus::PASS => "PASS",
        ScopeStatus::FAIL => "FAIL",
        ScopeStatus::SKIPPED => "SKIPPED",
    }
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(7)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> RenderInput {
        RenderInput {
            issue_number: 42,
            labels: vec!["status:qa".to_string(), "prio:P1".to_string()],
            assignees: vec!["alice".to_string()],
            provenance: BuildProvenance {
                environment: Some(Environment::Production),
                pr: Some(7),
                commit_sha: Some("abc1234def".to_string()),
                verified: Some(true),
                pr_head_sha: Some("abc1234def".to_string()),
            },
            latest_dev_summary: None,
            latest_qa: Some(QaResult {
                verdict: Verdict::PASS,
                scope_results: None,
                evidence_urls: None,
            }),
            recent_activity: vec![],
        }
    }

    #[test]
    fn body_begins_with_marker() {
        let body = render(&base_input());
        assert!(body.starts_with(MARKER));
    }

    #[test]
    fn render_is_pure() {
        let input = base_input();
        assert_eq!(render(&input), render(&input));
    }

    #[test]
    fn unverified_provenance_includes_exact_message() {
        let mut input = base_input();
        input.provenance.verified = Some(false);
        input.provenance.pr_head_sha = Some("ffffffffff".to_string());
        let body = render(&input);
        assert!(body.contains("UNVERIFIED (PR head: `fffffff`)"));
    }

    #[test]
    fn verified_provenance_includes_exact_message() {
        let body = render(&base_input());
        assert!(body.contains("VERIFIED (matches PR head)"));
    }

    #[test]
    fn not_applicable_provenance_is_n_a() {
        let mut input = base_input();
        input.provenance.verified = None;
        let body = render(&input);
        assert!(body.contains("- Provenance: n/a"));
    }

    #[test]
    fn status_derived_from_first_status_label() {
        let body = render(&base_input());
        assert!(body.contains("- Status: qa"));
    }

    #[test]
    fn unassigned_owner_when_no_assignees() {
        let mut input = base_input();
        input.assignees.clear();
        let body = render(&input);
        assert!(body.contains("- Owner: unassigned"));
    }

    #[test]
    fn recent_activity_formats_each_entry() {
        let mut input = base_input();
        input.recent_activity.push(ActivityEntry {
            created_at: DateTime::parse_from_rfc3339("2026-07-27T14:32:00Z")
                .unwrap()
                .with_timezone(&Utc),
            event_type: "qa.result_submitted".to_string(),
            agent: "qa-bot".to_string(),
        });
        let body = render(&input);
        assert!(body.contains("- 14:32Z — qa.result_submitted — qa-bot"));
    }
}
