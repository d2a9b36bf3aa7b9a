// SPDX-License-Identifier: MIT OR Apache-2.0

//! Property-based tests for rendering determinism.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use relay_core::{Environment, Verdict};
use relay_render::{ActivityEntry, BuildProvenance, QaResult, RenderInput};

fn arb_environment() -> impl Strategy<Value = Option<Environment>> {
    prop_oneof![
        Just(None),
        Just(Some(Environment::Preview)),
        Just(Some(Environment::Production)),
        Just(Some(Environment::Dev)),
    ]
}

fn arb_verdict() -> impl Strategy<Value = Verdict> {
    prop_oneof![Just(Verdict::PASS), Just(Verdict::FAIL), Just(Verdict::BLOCKED)]
}

fn arb_render_input(
    labels: Vec<String>,
    assignees: Vec<String>,
    environment: Option<Environment>,
    verdict: Verdict,
) -> RenderInput {
    RenderInput {
        issue_number: 42,
        labels,
        assignees,
        provenance: BuildProvenance {
            environment,
            pr: Some(7),
            commit_sha: Some("abc1234def".to_string()),
            verified: Some(true),
            pr_head_sha: Some("abc1234def".to_string()),
        },
        latest_dev_summary: None,
        latest_qa: Some(QaResult {
            verdict,
            scope_results: None,
            evidence_urls: None,
        }),
        recent_activity: vec![ActivityEntry {
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            event_type: "qa.result_submitted".to_string(),
            agent: "qa-bot".to_string(),
        }],
    }
}

proptest! {
    /// Rendering the same input twice always produces byte-identical output,
    /// across arbitrary label sets, assignee lists, environments, and verdicts.
    #[test]
    fn render_is_deterministic(
        labels in prop::collection::vec("[a-z:]{1,12}", 0..4),
        assignees in prop::collection::vec("[a-z]{2,10}", 0..3),
        environment in arb_environment(),
        verdict in arb_verdict(),
    ) {
        let input = arb_render_input(labels, assignees, environment, verdict);
        let a = relay_render::render(&input);
        let b = relay_render::render(&input);
        prop_assert_eq!(a, b);
    }

    /// The rendered body always begins with the status marker, regardless of
    /// input shape.
    #[test]
    fn render_always_begins_with_marker(
        labels in prop::collection::vec("[a-z:]{1,12}", 0..4),
        assignees in prop::collection::vec("[a-z]{2,10}", 0..3),
    ) {
        let input = arb_render_input(labels, assignees, None, Verdict::PASS);
        let body = relay_render::render(&input);
        prop_assert!(body.starts_with(relay_render::MARKER));
    }
}
