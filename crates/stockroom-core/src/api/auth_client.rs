//! HTTP client for the authentication endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{
    LoginRequest, RefreshRequest, RefreshResponse, RegisterRequest, TokenPair, UserProfile,
};
use super::ApiError;
use crate::auth::AuthBackend;

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Talks to `/login`, `/refresh`, `/users/email/{email}` and `/register`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: Url,
}

impl AuthClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Self::with_client(client, base_url)
    }

    /// Build on an existing client, sharing its connection pool.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid base URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest(format!(
                "base URL {} cannot carry a path",
                base_url
            )));
        }
        Ok(Self { client, base_url })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Create a new account. Not part of the session lifecycle; the caller
    /// sends the user to login afterwards.
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        let url = self.endpoint(&["register"]);
        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;
        check_response(response).await?;
        debug!(email = %request.email, "Account registered");
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for AuthClient {
    async fn login(&self, request: &LoginRequest) -> Result<TokenPair, ApiError> {
        let url = self.endpoint(&["login"]);
        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;
        read_json(check_response(response).await?).await
    }

    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshResponse, ApiError> {
        let url = self.endpoint(&["refresh"]);
        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;
        read_json(check_response(response).await?).await
    }

    async fn fetch_profile(
        &self,
        email: &str,
        access_token: &str,
    ) -> Result<UserProfile, ApiError> {
        let url = self.endpoint(&["users", "email", email]);
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await?;
        read_json(check_response(response).await?).await
    }
}

/// Check if response is successful, returning an error with body if not.
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let url = response.url().clone();
    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> AuthClient {
        AuthClient::new(base, Duration::from_secs(5)).expect("valid base URL")
    }

    #[test]
    fn test_endpoint_without_base_path() {
        let auth = client("http://localhost:8000");
        assert_eq!(auth.endpoint(&["login"]).as_str(), "http://localhost:8000/login");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let auth = client("https://api.example.com/v1/");
        assert_eq!(
            auth.endpoint(&["refresh"]).as_str(),
            "https://api.example.com/v1/refresh"
        );
    }

    #[test]
    fn test_endpoint_encodes_email_segment() {
        let auth = client("http://localhost:8000/api");
        let url = auth.endpoint(&["users", "email", "first last/x@b.com"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/users/email/first%20last%2Fx@b.com"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(matches!(
            AuthClient::new("not a url", Duration::from_secs(5)),
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            AuthClient::new("mailto:someone@example.com", Duration::from_secs(5)),
            Err(ApiError::InvalidRequest(_))
        ));
    }
}
