//! Repository references, credentials and the source-fetch seam.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{GitError, GitManager};
use thiserror::Error;
use tracing::debug;

/// Hosting-side identity of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    owner: String,
    name: String,
    clone_url: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid repository reference '{0}': expected owner/name or a github.com URL")]
pub struct InvalidRepoRef(pub String);

impl RepoRef {
    /// Build a reference with an explicit clone URL (mirrors, local remotes).
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        clone_url: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            clone_url: clone_url.into(),
        }
    }

    /// Accepts `owner/name`, `https://github.com/owner/name(.git)` and
    /// `git@github.com:owner/name(.git)`.
    pub fn parse(input: &str) -> Result<Self, InvalidRepoRef> {
        let trimmed = input.trim().trim_end_matches('/');
        let path = trimmed
            .strip_prefix("https://github.com/")
            .or_else(|| trimmed.strip_prefix("http://github.com/"))
            .or_else(|| trimmed.strip_prefix("git@github.com:"))
            .unwrap_or(trimmed);
        let path = path.strip_suffix(".git").unwrap_or(path);

        let mut parts = path.split('/');
        let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(InvalidRepoRef(input.to_string()));
        };
        let valid = |s: &str| {
            !s.is_empty()
                && s != "."
                && s != ".."
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid(owner) || !valid(name) {
            return Err(InvalidRepoRef(input.to_string()));
        }

        Ok(Self::new(
            owner,
            name,
            format!("https://github.com/{owner}/{name}.git"),
        ))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `owner/name`
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn clone_url(&self) -> &str {
        &self.clone_url
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Access token for the hosting service. Never printed.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Produces a full checkout of a repository into an existing empty directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        repo: &RepoRef,
        credential: Option<&Credential>,
        dest: &Path,
    ) -> Result<(), GitError>;
}

/// `git clone` over https with the token injected for the duration of the
/// clone. Afterwards the fetch URL is scrubbed and the authenticated URL is
/// kept only as the push URL of `origin`.
#[derive(Debug, Clone)]
pub struct GitSource {
    timeout: Duration,
}

impl GitSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for GitSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

#[async_trait]
impl SourceFetcher for GitSource {
    async fn fetch(
        &self,
        repo: &RepoRef,
        credential: Option<&Credential>,
        dest: &Path,
    ) -> Result<(), GitError> {
        let plain = repo.clone_url();
        let authed = credential.and_then(|c| authenticated_url(plain, c));
        debug!(repo = %repo, authenticated = authed.is_some(), "cloning source");

        let checkout = GitManager::new(dest.parent().unwrap_or(dest))
            .with_timeout(self.timeout)
            .clone_into(authed.as_deref().unwrap_or(plain), dest)
            .await?;

        if let Some(authed) = authed {
            checkout.set_remote_url("origin", plain, false).await?;
            checkout.set_remote_url("origin", &authed, true).await?;
        }
        Ok(())
    }
}

/// `https://host/...` becomes `https://x-access-token:<token>@host/...`.
/// Non-https URLs (ssh, local paths) are left alone.
pub(crate) fn authenticated_url(url: &str, credential: &Credential) -> Option<String> {
    let rest = url.strip_prefix("https://")?;
    if rest.contains('@') {
        return None;
    }
    Some(format!(
        "https://x-access-token:{}@{rest}",
        credential.expose()
    ))
}
