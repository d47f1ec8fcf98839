use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use log::{info, warn};
use reqwest::{Client, StatusCode};

use crate::github::errors::GithubError;
use crate::github::models::{AuthenticatedUser, NewKeyRequest, SshKeyRecord};

const DEFAULT_API_URL: &str = "https://api.github.com";
const CONNECT_TIMEOUT: u64 = 10;
const MAX_TIMEOUT: u64 = 60;
const USER_AGENT: &str = concat!("vbclone/", env!("CARGO_PKG_VERSION"));

/// The credential-store operations this tooling consumes. Production talks
/// to the GitHub REST API; tests use an in-memory fake.
#[allow(async_fn_in_trait)]
pub trait CredentialStore {
    /// Confirm the session is authenticated; returns the account login.
    async fn auth_status(&self) -> Result<String, GithubError>;
    async fn list_keys(&self) -> Result<Vec<SshKeyRecord>, GithubError>;
    async fn add_key(&self, title: &str, public_key: &str) -> Result<(), GithubError>;
    async fn delete_key(&self, id: u64) -> Result<(), GithubError>;
}

pub struct GithubClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GithubClient {
    /// Build a client from the ambient token (`GITHUB_TOKEN`, falling back
    /// to `GH_TOKEN`). A missing token is the unauthenticated case.
    pub fn from_env() -> Result<Self, GithubError> {
        let token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GH_TOKEN"))
            .map_err(|_| GithubError::Unauthenticated)?;
        if token.trim().is_empty() {
            return Err(GithubError::Unauthenticated);
        }
        Self::with_base_url(&token, DEFAULT_API_URL)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, GithubError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(MAX_TIMEOUT))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT))
            .build()
            .map_err(GithubError::from)?;

        Ok(GithubClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    fn check_auth(status: StatusCode) -> Result<(), GithubError> {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GithubError::Unauthenticated);
        }
        Ok(())
    }
}

impl CredentialStore for GithubClient {
    async fn auth_status(&self) -> Result<String, GithubError> {
        let response = self.request(reqwest::Method::GET, "/user").send().await?;
        let status = response.status();
        Self::check_auth(status)?;
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GithubError::Api(format!(
                "auth status check failed: {error_text}"
            )));
        }
        let user: AuthenticatedUser = response.json().await?;
        Ok(user.login)
    }

    async fn list_keys(&self) -> Result<Vec<SshKeyRecord>, GithubError> {
        let response = self
            .request(reqwest::Method::GET, "/user/keys?per_page=100")
            .send()
            .await?;
        let status = response.status();
        Self::check_auth(status)?;
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GithubError::Api(format!(
                "failed to list keys: {error_text}"
            )));
        }
        let keys = response.json::<Vec<SshKeyRecord>>().await?;
        Ok(keys)
    }

    async fn add_key(&self, title: &str, public_key: &str) -> Result<(), GithubError> {
        info!("Registering public key '{title}'");
        let body = NewKeyRequest {
            title,
            key: public_key.trim(),
        };
        let response = self
            .request(reqwest::Method::POST, "/user/keys")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        Self::check_auth(status)?;
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GithubError::Api(format!(
                "failed to add key '{title}': {error_text}"
            )));
        }
        info!("Public key '{title}' registered");
        Ok(())
    }

    async fn delete_key(&self, id: u64) -> Result<(), GithubError> {
        info!("Deleting key {id}");

        let send_delete_request = || async {
            let response = self
                .request(reqwest::Method::DELETE, &format!("/user/keys/{id}"))
                .send()
                .await?;
            let status = response.status();
            Self::check_auth(status)?;
            if !status.is_success() && status != StatusCode::NO_CONTENT {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(GithubError::Api(format!(
                    "failed to delete key {id}: {error_text}"
                )));
            }
            Ok(())
        };

        // Transport hiccups are worth retrying; API rejections are not.
        send_delete_request
            .retry(ExponentialBuilder::default().with_max_times(3))
            .sleep(tokio::time::sleep)
            .when(|e| matches!(e, GithubError::Request(_)))
            .notify(|err, dur| warn!("Retrying key deletion after {dur:?}: {err}"))
            .await?;

        info!("Key {id} deleted");
        Ok(())
    }
}
