//! Hosting API seam: fork a repository and open a pull request.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::source::{Credential, RepoRef};

const USER_AGENT: &str = concat!("patch-racer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum HostingError {
    #[error("no credential available for the hosting API")]
    MissingCredential,
    #[error("hosting request failed: {0}")]
    Request(String),
    #[error("hosting API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected hosting response: {0}")]
    Decode(String),
    #[error("hosting client does not support {0}")]
    Unsupported(&'static str),
}

/// Reference to an opened pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

/// Everything needed to open one pull request.
#[derive(Debug, Clone, Copy)]
pub struct PullRequestSpec<'a> {
    pub repo: &'a RepoRef,
    /// Branch holding the change; `owner:branch` when it lives on a fork.
    pub head: &'a str,
    /// Branch the change should merge into.
    pub base: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

#[async_trait]
pub trait HostingClient: Send + Sync {
    async fn open_pull_request(
        &self,
        spec: PullRequestSpec<'_>,
        credential: Option<&Credential>,
    ) -> Result<PullRequestRef, HostingError>;

    /// Fork `repo` into the credential holder's account and return the fork.
    ///
    /// The fork may still be materializing when this returns.
    async fn fork_repository(
        &self,
        repo: &RepoRef,
        credential: Option<&Credential>,
    ) -> Result<RepoRef, HostingError> {
        let _ = (repo, credential);
        Err(HostingError::Unsupported("forking"))
    }
}

#[derive(Debug, Serialize)]
struct PullRequestPayload<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Serialize)]
struct ForkPayload {
    default_branch_only: bool,
}

#[derive(Debug, Deserialize)]
struct ForkResponse {
    name: String,
    owner: ForkOwner,
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct ForkOwner {
    login: String,
}

/// GitHub REST v3 client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl GitHubClient {
    async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        credential: Option<&Credential>,
    ) -> Result<T, HostingError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let credential = credential.ok_or(HostingError::MissingCredential)?;
        let url = format!("{}{path}", self.api_base);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential.expose()))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json")
            .json(body)
            .send()
            .await
            .map_err(|e| HostingError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HostingError::Api {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| HostingError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HostingClient for GitHubClient {
    async fn open_pull_request(
        &self,
        spec: PullRequestSpec<'_>,
        credential: Option<&Credential>,
    ) -> Result<PullRequestRef, HostingError> {
        debug!(repo = %spec.repo, head = spec.head, base = spec.base, "opening pull request");
        let payload = PullRequestPayload {
            title: spec.title,
            body: spec.body,
            head: spec.head,
            base: spec.base,
        };
        let path = format!("/repos/{}/{}/pulls", spec.repo.owner(), spec.repo.name());

        let created: PullRequestResponse = self.post_json(&path, &payload, credential).await?;
        Ok(PullRequestRef {
            number: created.number,
            url: created.html_url,
        })
    }

    async fn fork_repository(
        &self,
        repo: &RepoRef,
        credential: Option<&Credential>,
    ) -> Result<RepoRef, HostingError> {
        debug!(repo = %repo, "forking repository");
        let path = format!("/repos/{}/{}/forks", repo.owner(), repo.name());
        let payload = ForkPayload {
            default_branch_only: true,
        };

        let fork: ForkResponse = self.post_json(&path, &payload, credential).await?;
        Ok(RepoRef::new(fork.owner.login, fork.name, fork.clone_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec<'a>(repo: &'a RepoRef, head: &'a str) -> PullRequestSpec<'a> {
        PullRequestSpec {
            repo,
            head,
            base: "main",
            title: "AI Agent: add a health endpoint",
            body: "body",
        }
    }

    #[tokio::test]
    async fn posts_pull_request_and_parses_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/widgets/pulls"))
            .and(header("authorization", "Bearer tok"))
            .and(header("accept", "application/vnd.github.v3+json"))
            .and(body_partial_json(json!({
                "base": "main",
                "head": "ai-agent/balanced-1234abcd-20260101000000",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "number": 42,
                "html_url": "https://github.com/octo/widgets/pull/42",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let repo = RepoRef::parse("octo/widgets").unwrap();

        let pr = GitHubClient::new(server.uri())
            .open_pull_request(
                spec(&repo, "ai-agent/balanced-1234abcd-20260101000000"),
                Some(&Credential::new("tok")),
            )
            .await
            .unwrap();

        assert_eq!(
            pr,
            PullRequestRef {
                number: 42,
                url: "https://github.com/octo/widgets/pull/42".into()
            }
        );
    }

    #[tokio::test]
    async fn api_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/widgets/pulls"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"message": "Validation Failed"})),
            )
            .mount(&server)
            .await;
        let repo = RepoRef::parse("octo/widgets").unwrap();

        let err = GitHubClient::new(server.uri())
            .open_pull_request(spec(&repo, "ai-agent/x"), Some(&Credential::new("tok")))
            .await
            .unwrap_err();

        match err {
            HostingError::Api { status, message } => {
                assert_eq!(status, 422);
                assert!(message.contains("Validation Failed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fork_returns_the_forked_repository() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/widgets/forks"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "name": "widgets",
                "full_name": "forker/widgets",
                "owner": {"login": "forker"},
                "clone_url": "https://github.com/forker/widgets.git",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let repo = RepoRef::parse("octo/widgets").unwrap();

        let fork = GitHubClient::new(server.uri())
            .fork_repository(&repo, Some(&Credential::new("tok")))
            .await
            .unwrap();

        assert_eq!(fork, RepoRef::parse("forker/widgets").unwrap());
    }

    #[tokio::test]
    async fn malformed_response_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/widgets/forks"))
            .respond_with(ResponseTemplate::new(202).set_body_string("not json"))
            .mount(&server)
            .await;
        let repo = RepoRef::parse("octo/widgets").unwrap();

        let err = GitHubClient::new(server.uri())
            .fork_repository(&repo, Some(&Credential::new("tok")))
            .await
            .unwrap_err();
        assert!(matches!(err, HostingError::Decode(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_request() {
        let repo = RepoRef::parse("octo/widgets").unwrap();
        let err = GitHubClient::new("http://127.0.0.1:9")
            .open_pull_request(spec(&repo, "ai-agent/x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, HostingError::MissingCredential));
    }
}
