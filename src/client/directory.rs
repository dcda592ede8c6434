use std::time::Duration;

use anyhow::Context;

use async_trait::async_trait;

use reqwest::{Client, StatusCode};

use secrecy::Secret;

use serde::Serialize;

use url::Url;

use crate::domain::{EmailAddress, GroupId, Whitelist};

/// Failure of a directory-membership call, classified by whether a retry of
/// the identical call can plausibly succeed.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory call failed, may succeed on retry: {0}")]
    Retryable(String),
    #[error("Directory rejected the change permanently: {0}")]
    Permanent(String),
}

/// Capability to add an address to a named group.
///
/// Implementations must be idempotent: adding a member who is already in the
/// group is a success, which is what makes a retry after a crash between
/// "added" and "state persisted" safe.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn add_member(&self, group: &GroupId, email: &EmailAddress)
        -> Result<(), DirectoryError>;
}

/// Directory client speaking the Google Admin SDK Directory API.
///
/// Credential acquisition is the operator's problem: the client is handed a
/// ready bearer token and never refreshes it.
#[derive(Debug)]
pub struct GoogleDirectoryClient {
    client: Client,
    api_base_url: Url,
    api_auth_token: Secret<String>,
}

impl GoogleDirectoryClient {
    pub fn new(
        api_timeout: Duration,
        api_base_url: Url,
        api_auth_token: Secret<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(api_timeout)
            .build()
            .context("Failed to build http client")?;

        Ok(Self {
            client,
            api_base_url,
            api_auth_token,
        })
    }

    /// Check that every whitelisted group is visible with the configured
    /// credentials, so a typo in the whitelist surfaces at startup rather
    /// than on the first confirmation.
    pub async fn preflight(&self, whitelist: &Whitelist) -> anyhow::Result<()> {
        use secrecy::ExposeSecret;

        for group in whitelist.iter() {
            let url = self.group_url(group, None).context("Bad group URL")?;
            self.client
                .get(url)
                .bearer_auth(self.api_auth_token.expose_secret())
                .send()
                .await
                .with_context(|| format!("Failed to fetch group {}", group))?
                .error_for_status()
                .with_context(|| format!("Group {} is not accessible", group))?;
        }

        Ok(())
    }

    fn group_url(&self, group: &GroupId, suffix: Option<&str>) -> Result<Url, url::ParseError> {
        let mut path = format!("groups/{}", group);
        if let Some(suffix) = suffix {
            path.push('/');
            path.push_str(suffix);
        }
        self.api_base_url.join(&path)
    }
}

#[async_trait]
impl DirectoryClient for GoogleDirectoryClient {
    #[tracing::instrument(name = "Add group member", skip(self))]
    async fn add_member(
        &self,
        group: &GroupId,
        email: &EmailAddress,
    ) -> Result<(), DirectoryError> {
        use secrecy::ExposeSecret;

        let url = self
            .group_url(group, Some("members"))
            .map_err(|e| DirectoryError::Permanent(format!("Bad group URL: {}", e)))?;

        let body = InsertMemberRequest {
            email: email.as_ref(),
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(self.api_auth_token.expose_secret())
            .json(&body)
            .send()
            .await
            // Timeouts and transport failures leave retry on the table
            .map_err(|e| DirectoryError::Retryable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Already a member: the add is idempotent
            StatusCode::CONFLICT => {
                tracing::info!(%group, "Member already present, treating add as success");
                Ok(())
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => Err(
                DirectoryError::Retryable(format!("Directory API returned {}", response.status())),
            ),
            status if status.is_server_error() => Err(DirectoryError::Retryable(format!(
                "Directory API returned {}",
                status
            ))),
            status => Err(DirectoryError::Permanent(format!(
                "Directory API returned {}",
                status
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
struct InsertMemberRequest<'a> {
    email: &'a str,
}
