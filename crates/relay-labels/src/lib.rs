// SPDX-License-Identifier: MIT OR Apache-2.0
//! Declarative label transition engine, per §4.7.
//!
//! Rules are a two-level map `rules[event_type][verdict_or_"_"] = {add?,
//! remove?}`. [`LabelRules::resolve`] looks up the exact verdict key first,
//! then falls back to the wildcard `"_"`; a missing `event_type` or a
//! missing rule is a no-op. [`apply`] computes `next = (current ∪ add) \
//! remove` without otherwise touching the current label set.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The wildcard verdict key, matched when no verdict is present or no
/// more-specific key applies. Per §9, a missing (null) verdict matches
/// only this key — it is never treated as an "unknown verdict" joker that
/// also matches itself.
pub const WILDCARD_VERDICT: &str = "_";

/// One `add`/`remove` transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Labels to add.
    #[serde(default)]
    pub add: Vec<String>,
    /// Labels to remove.
    #[serde(default)]
    pub remove: Vec<String>,
}

/// The full two-level rules table: `event_type -> verdict_key ->
/// transition`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelRules {
    #[serde(flatten)]
    rules: BTreeMap<String, BTreeMap<String, Transition>>,
}

impl LabelRules {
    /// An empty rules table; every lookup is a no-op.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a rules table from its JSON representation.
    ///
    /// Per §6, invalid JSON must never be a fatal error at startup: the
    /// caller is expected to fall back to [`LabelRules::empty`] when this
    /// returns `Err`, not abort.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Resolve the transition for `(event_type, verdict)`, trying the
    /// exact verdict key first, then the wildcard.
    ///
    /// `verdict` is `None` when the triggering event carried no verdict;
    /// per §9 this matches only the wildcard key, never a verdict-specific
    /// one.
    pub fn resolve(&self, event_type: &str, verdict: Option<&str>) -> Option<&Transition> {
        let by_verdict = self.rules.get(event_type)?;
        if let Some(v) = verdict {
            if let Some(t) = by_verdict.get(v) {
                return Some(t);
            }
        }
        by_verdict.get(WILDCARD_VERDICT)
    }
}

/// Compute the next full label set: `(current ∪ add) \ remove`.
///
/// Labels not mentioned by either `add` or `remove` are preserved
/// untouched. The result has no duplicate entries; order is not
/// meaningful (the forge's label-replace call is set-like).
pub fn apply(current: &[String], transition: &Transition) -> Vec<String> {
    let mut next: BTreeSet<String> = current.iter().cloned().collect();
    for label in &transition.add {
        next.insert(label.clone());
    }
    for label in &transition.remove {
        next.remove(label);
    }
    next.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_6_rules() -> LabelRules {
        LabelRules::parse(
            r#"{
                "qa.result_submitted": {
                    "PASS": { "add": ["status:verified"], "remove": ["status:qa"] },
                    "FAIL": { "add": ["status:rejected"], "remove": ["status:qa"] }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn scenario_6_label_transition() {
        let rules = scenario_6_rules();
        let transition = rules.resolve("qa.result_submitted", Some("PASS")).unwrap();
        let current = vec!["status:qa".to_string(), "prio:P1".to_string()];
        let mut next = apply(&current, transition);
        next.sort();
        assert_eq!(next, vec!["prio:P1".to_string(), "status:verified".to_string()]);
    }

    #[test]
    fn missing_event_type_is_a_no_op() {
        let rules = scenario_6_rules();
        assert!(rules.resolve("pm.status_update", Some("PASS")).is_none());
    }

    #[test]
    fn missing_verdict_rule_falls_back_to_wildcard() {
        let rules = LabelRules::parse(
            r#"{ "dev.update_posted": { "_": { "add": ["status:in_progress"] } } }"#,
        )
        .unwrap();
        let transition = rules.resolve("dev.update_posted", Some("PASS")).unwrap();
        assert_eq!(transition.add, vec!["status:in_progress".to_string()]);
    }

    #[test]
    fn null_verdict_matches_only_wildcard() {
        let rules = LabelRules::parse(
            r#"{ "dev.update_posted": { "_": { "add": ["status:in_progress"] }, "PASS": { "add": ["never"] } } }"#,
        )
        .unwrap();
        let transition = rules.resolve("dev.update_posted", None).unwrap();
        assert_eq!(transition.add, vec!["status:in_progress".to_string()]);
    }

    #[test]
    fn no_matching_rule_at_all_is_a_no_op() {
        let rules = LabelRules::parse(r#"{ "dev.update_posted": { "FAIL": {} } }"#).unwrap();
        assert!(rules.resolve("dev.update_posted", Some("PASS")).is_none());
    }

    #[test]
    fn invalid_json_yields_an_error_not_a_panic() {
        assert!(LabelRules::parse("{not json").is_err());
    }

    #[test]
    fn apply_preserves_unmentioned_labels() {
        let transition = Transition {
            add: vec!["b".to_string()],
            remove: vec![],
        };
        let current = vec!["a".to_string()];
        let mut next = apply(&current, &transition);
        next.sort();
        assert_eq!(next, vec!["a".to_string(), "b".to_string()]);
    }
}
