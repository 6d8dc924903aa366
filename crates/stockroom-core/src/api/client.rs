//! Request wrapper for the dashboard's REST calls.
//!
//! Every request built here goes through
//! [`SessionManager::attach_credential`] before it is sent. A missing or
//! expired token means the request goes out without credentials and the
//! backend's 401 comes back to the caller as an ordinary `ApiError`.

use std::time::Duration;

use reqwest::{header, Client, Method, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::auth_client::{check_response, read_json};
use super::{ApiError, AuthClient};
use crate::auth::SessionManager;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    session: SessionManager,
}

impl ApiClient {
    /// Shares the connection pool and base URL of `auth`.
    pub fn new(auth: &AuthClient, session: SessionManager) -> Self {
        Self {
            client: auth.http().clone(),
            base_url: auth.base_url().clone(),
            session,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Resolve `path` (which may carry a query string) against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = format!("{}/{}", base, path.trim_start_matches('/'));
        Url::parse(&joined)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid path {}: {}", path, e)))
    }

    /// Build a request with credentials attached, ready to send.
    pub fn prepare(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Request, ApiError> {
        let mut builder = self
            .client
            .request(method, self.url(path)?)
            .header(header::ACCEPT, "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let request = builder.build()?;
        Ok(self.session.attach_credential(request))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            // Rebuilt per attempt so a token renewed during backoff is used
            let request = self.prepare(method.clone(), path, body)?;
            debug!(method = %method, path = path, "Sending request");
            let response = self.client.execute(request).await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(path = path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            return check_response(response).await;
        }
    }

    fn to_body<B: Serialize>(body: &B) -> Result<serde_json::Value, ApiError> {
        serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize request body: {}", e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        read_json(self.send(Method::GET, path, None).await?).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = Self::to_body(body)?;
        read_json(self.send(Method::POST, path, Some(&body)).await?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = Self::to_body(body)?;
        read_json(self.send(Method::PUT, path, Some(&body)).await?).await
    }

    /// DELETE; any response body is ignored.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::{MemoryStore, SessionOptions};

    fn api_client(base: &str) -> ApiClient {
        let auth = AuthClient::new(base, Duration::from_secs(5)).expect("valid base URL");
        let session = SessionManager::new(
            Arc::new(auth.clone()),
            Arc::new(MemoryStore::new()),
            SessionOptions::default(),
        );
        ApiClient::new(&auth, session)
    }

    #[test]
    fn test_url_joins_path_and_query() {
        let api = api_client("http://localhost:8000/api/");
        assert_eq!(
            api.url("/products?page=2&size=20").unwrap().as_str(),
            "http://localhost:8000/api/products?page=2&size=20"
        );
        assert_eq!(
            api.url("vendors").unwrap().as_str(),
            "http://localhost:8000/api/vendors"
        );
    }

    #[test]
    fn test_prepare_without_session_has_no_authorization() {
        let api = api_client("http://localhost:8000");
        let request = api.prepare(Method::GET, "/sales", None).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert!(request.headers().get(header::AUTHORIZATION).is_none());
        assert_eq!(
            request.headers().get(header::ACCEPT).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_prepare_with_body() {
        let api = api_client("http://localhost:8000");
        let body = serde_json::json!({"name": "Widget", "price": 9.5});
        let request = api.prepare(Method::POST, "/products", Some(&body)).unwrap();
        assert_eq!(
            request.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let sent: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(sent, body);
    }
}
