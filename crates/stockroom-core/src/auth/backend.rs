use async_trait::async_trait;

use crate::api::{
    ApiError, LoginRequest, RefreshRequest, RefreshResponse, TokenPair, UserProfile,
};

/// The backend endpoints the session manager depends on.
///
/// `AuthClient` is the HTTP implementation.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// `POST /login`
    async fn login(&self, request: &LoginRequest) -> Result<TokenPair, ApiError>;

    /// `POST /refresh`
    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshResponse, ApiError>;

    /// `GET /users/email/{email}`, authorized with the given access token.
    async fn fetch_profile(&self, email: &str, access_token: &str)
        -> Result<UserProfile, ApiError>;
}
