// SPDX-License-Identifier: MIT OR Apache-2.0
//! Signed-token minting and typed REST wrappers for the upstream
//! GitHub-compatible code-forge.
//!
//! [`ForgeClient`] mints an RS256 GitHub-App JWT, exchanges it for an
//! installation access token on first use (memoized for the lifetime of
//! the client via a single-flight [`tokio::sync::OnceCell`], per the §5/§9
//! concurrency note — there is no cross-request cache, a fresh
//! [`ForgeClient`] is expected per inbound request), and exposes the
//! handful of REST calls the relay pipeline needs. No call retries
//! internally; callers observe a [`ForgeError`] and decide what to do
//! next, per §4.1.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "agent-relay/0.1";
const JWT_CLOCK_SKEW_SECS: i64 = 30;
const JWT_TTL_SECS: i64 = 9 * 60;
const COMMENTS_PER_PAGE: u32 = 100;

/// Error returned by any forge REST call.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// Minting the app JWT failed (malformed private key, clock error, ...).
    #[error("failed to mint app JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The underlying HTTP transport failed before a response was received.
    #[error("forge request transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The forge returned a non-2xx response.
    #[error("forge returned {status}: {body}")]
    Response {
        /// HTTP status code returned by the forge.
        status: u16,
        /// Response body, truncated for diagnostics.
        body: String,
    },
}

/// Static configuration required to talk to the forge as a GitHub App
/// installation.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// GitHub App id, used as the JWT `iss` claim.
    pub app_id: String,
    /// Installation id to exchange the JWT for an installation token.
    pub installation_id: String,
    /// PEM-encoded RSA private key (PKCS#1 or PKCS#8).
    pub private_key_pem: String,
    /// Base URL of the forge's REST API; override for enterprise/self-hosted
    /// deployments. Defaults to `https://api.github.com`.
    pub api_base_url: String,
}

impl ForgeConfig {
    /// Construct a config pointed at the default public GitHub API.
    pub fn new(app_id: impl Into<String>, installation_id: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            installation_id: installation_id.into(),
            private_key_pem: private_key_pem.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    /// Override the API base URL.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct AppJwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: String,
}

/// A pull request's head commit SHA, as returned by the forge.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestHead {
    sha: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PullRequestResponse {
    head: PullRequestHead,
}

/// A forge issue.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    /// Issue number.
    pub number: u64,
    /// Current set of label names.
    pub labels: Vec<Label>,
    /// Assigned users, in forge order. Defaults to empty when the forge
    /// omits the field.
    #[serde(default)]
    pub assignees: Vec<Assignee>,
}

/// A label attached to an issue.
#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    /// Label name.
    pub name: String,
}

/// A user assigned to an issue.
#[derive(Debug, Clone, Deserialize)]
pub struct Assignee {
    /// Login handle.
    pub login: String,
}

/// A forge issue comment.
#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    /// Comment id, stable across edits.
    pub id: u64,
    /// Rendered markdown body.
    pub body: String,
}

#[derive(Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct UpdateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct PutLabelsRequest<'a> {
    labels: &'a [String],
}

/// Typed client for the handful of forge REST endpoints the relay uses.
///
/// Construct one per inbound request; the installation token is minted at
/// most once per instance regardless of how many concurrent calls race to
/// use it.
pub struct ForgeClient {
    http: reqwest::Client,
    config: ForgeConfig,
    token: OnceCell<String>,
}

impl ForgeClient {
    /// Construct a new client. Does not perform any network I/O.
    pub fn new(config: ForgeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: OnceCell::new(),
        }
    }

    fn mint_app_jwt(&self) -> Result<String, ForgeError> {
        let now = Utc::now().timestamp();
        let claims = AppJwtClaims {
            iat: now - JWT_CLOCK_SKEW_SECS,
            exp: now + JWT_TTL_SECS,
            iss: self.config.app_id.clone(),
        };
        let key = EncodingKey::from_rsa_pem(self.config.private_key_pem.as_bytes())?;
        let token = encode(&Header::new(Algorithm::RS256), &claims, &key)?;
        Ok(token)
    }

    /// Return the memoized installation access token, minting it (and the
    /// app JWT underneath it) on first call.
    async fn installation_token(&self) -> Result<&str, ForgeError> {
        self.token
            .get_or_try_init(|| async {
                let jwt = self.mint_app_jwt()?;
                let url = format!(
                    "{}/app/installations/{}/access_tokens",
                    self.config.api_base_url, self.config.installation_id
                );
                let resp = self
                    .http
                    .post(url)
                    .bearer_auth(jwt)
                    .header("User-Agent", USER_AGENT)
                    .header("Accept", "application/vnd.github+json")
                    .send()
                    .await?;
                let resp = check_status(resp).await?;
                let parsed: AccessTokenResponse = resp.json().await?;
                Ok(parsed.token)
            })
            .await
            .map(String::as_str)
    }

    fn request(&self, method: reqwest::Method, path: &str, token: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.api_base_url, path);
        self.http
            .request(method, url)
            .bearer_auth(token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    /// Fetch a pull request's head commit SHA, lowercased.
    pub async fn pr_head_sha(&self, repo: &str, pr: u64) -> Result<String, ForgeError> {
        let token = self.installation_token().await?;
        let path = format!("/repos/{repo}/pulls/{pr}");
        let resp = self.request(reqwest::Method::GET, &path, token).send().await?;
        let resp = check_status(resp).await?;
        let parsed: PullRequestResponse = resp.json().await?;
        Ok(parsed.head.sha.to_ascii_lowercase())
    }

    /// Fetch an issue, including its current labels.
    pub async fn get_issue(&self, repo: &str, issue_number: u64) -> Result<Issue, ForgeError> {
        let token = self.installation_token().await?;
        let path = format!("/repos/{repo}/issues/{issue_number}");
        let resp = self.request(reqwest::Method::GET, &path, token).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// List one page (up to 100) of an issue's comments, newest last.
    pub async fn list_comments(&self, repo: &str, issue_number: u64, page: u32) -> Result<Vec<Comment>, ForgeError> {
        let token = self.installation_token().await?;
        let path = format!(
            "/repos/{repo}/issues/{issue_number}/comments?per_page={COMMENTS_PER_PAGE}&page={page}"
        );
        let resp = self.request(reqwest::Method::GET, &path, token).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// Create a new issue comment.
    pub async fn create_comment(&self, repo: &str, issue_number: u64, body: &str) -> Result<Comment, ForgeError> {
        let token = self.installation_token().await?;
        let path = format!("/repos/{repo}/issues/{issue_number}/comments");
        let resp = self
            .request(reqwest::Method::POST, &path, token)
            .json(&CreateCommentRequest { body })
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// Update an existing issue comment by id.
    pub async fn update_comment(&self, repo: &str, comment_id: u64, body: &str) -> Result<Comment, ForgeError> {
        let token = self.installation_token().await?;
        let path = format!("/repos/{repo}/issues/comments/{comment_id}");
        let resp = self
            .request(reqwest::Method::PATCH, &path, token)
            .json(&UpdateCommentRequest { body })
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// Atomically replace an issue's label set.
    pub async fn put_labels(&self, repo: &str, issue_number: u64, labels: &[String]) -> Result<(), ForgeError> {
        let token = self.installation_token().await?;
        let path = format!("/repos/{repo}/issues/{issue_number}/labels");
        let resp = self
            .request(reqwest::Method::PUT, &path, token)
            .json(&PutLabelsRequest { labels })
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ForgeError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let body = body.chars().take(2048).collect();
        Err(ForgeError::Response { status, body })
    }
}
