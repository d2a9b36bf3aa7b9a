// SPDX-License-Identifier: MIT OR Apache-2.0
//! Commit-to-PR-head provenance verification and the verdict downgrade
//! rule, per §4.4.
//!
//! [`verify`] performs the I/O (fetching the PR head SHA from the forge);
//! [`downgrade`] is a pure function from `(reported_verdict, verified)` to
//! the effective verdict, per the §9 redesign note. Keeping these separate
//! means the downgrade rule itself needs no mocking to test.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use relay_core::{Build, Verdict};
use relay_forge_client::{ForgeClient, ForgeError};

/// Result of a provenance check that was actually performed (i.e. the
/// event carried both a `pr` and a `commit_sha`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceCheck {
    /// Whether the reported commit matched the PR's head commit.
    pub verified: bool,
    /// The PR's actual head SHA (lowercased), for rendering.
    pub pr_head_sha: String,
}

/// Fetch the PR head SHA for `build.pr` (if present) and compare it,
/// case-insensitively, against `build.commit_sha`.
///
/// Returns `None` when there is nothing to verify (no `build`, or a
/// `build` with no `pr`) — provenance is "not applicable", not "failed".
pub async fn verify(build: Option<&Build>, forge: &ForgeClient, repo: &str) -> Result<Option<ProvenanceCheck>, ForgeError> {
    let Some(build) = build else { return Ok(None) };
    let Some(pr) = build.pr else { return Ok(None) };

    let pr_head_sha = forge.pr_head_sha(repo, pr).await?;
    // Both sides are already lowercased (validator normalizes commit_sha;
    // ForgeClient::pr_head_sha lowercases its result), so a plain
    // equality check is a case-insensitive comparison.
    let verified = pr_head_sha == build.commit_sha;
    Ok(Some(ProvenanceCheck { verified, pr_head_sha }))
}

/// The pure verdict downgrade rule: a reported `PASS` becomes
/// `PASS_UNVERIFIED` when provenance verification came back `false`.
/// Every other combination passes the reported verdict through unchanged
/// — in particular, this rule never produces `FAIL_UNCONFIRMED`; that
/// verdict is only ever accepted verbatim from callers.
pub fn downgrade(reported: Option<Verdict>, verified: Option<bool>) -> Option<Verdict> {
    match (reported, verified) {
        (Some(Verdict::PASS), Some(false)) => Some(Verdict::PassUnverified),
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_with_unverified_provenance_downgrades() {
        assert_eq!(
            downgrade(Some(Verdict::PASS), Some(false)),
            Some(Verdict::PassUnverified)
        );
    }

    #[test]
    fn pass_with_verified_provenance_is_unchanged() {
        assert_eq!(downgrade(Some(Verdict::PASS), Some(true)), Some(Verdict::PASS));
    }

    #[test]
    fn pass_with_no_applicable_provenance_is_unchanged() {
        assert_eq!(downgrade(Some(Verdict::PASS), None), Some(Verdict::PASS));
    }

    #[test]
    fn fail_is_never_downgraded() {
        assert_eq!(downgrade(Some(Verdict::FAIL), Some(false)), Some(Verdict::FAIL));
    }

    #[test]
    fn fail_unconfirmed_is_only_ever_passed_through() {
        assert_eq!(
            downgrade(Some(Verdict::FailUnconfirmed), Some(false)),
            Some(Verdict::FailUnconfirmed)
        );
        assert_eq!(
            downgrade(Some(Verdict::FailUnconfirmed), Some(true)),
            Some(Verdict::FailUnconfirmed)
        );
    }

    #[test]
    fn no_reported_verdict_stays_none() {
        assert_eq!(downgrade(None, Some(false)), None);
    }

    #[tokio::test]
    async fn verify_returns_none_without_a_build() {
        // verify() short-circuits before touching the network when there's
        // no build or no pr, so no ForgeClient/mock server is needed here.
        assert!(verify(None, &unreachable_forge_client(), "acme/web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verify_returns_none_without_a_pr() {
        let build = Build {
            commit_sha: "abc1234def".to_string(),
            pr: None,
        };
        assert!(
            verify(Some(&build), &unreachable_forge_client(), "acme/web")
                .await
                .unwrap()
                .is_none()
        );
    }

    fn unreachable_forge_client() -> ForgeClient {
        ForgeClient::new(relay_forge_client::ForgeConfig::new("unused", "unused", "unused"))
    }
}
