//! REST API client module for the stockroom backend.
//!
//! This module provides the `AuthClient` for the login, refresh, profile
//! and registration endpoints, and the `ApiClient` request wrapper that
//! every other dashboard call goes through.
//!
//! The API uses JWT bearer token authentication; the wrapper asks the
//! `SessionManager` to attach the current access token.

pub mod auth_client;
pub mod client;
pub mod error;
pub mod types;

pub use auth_client::{AuthClient, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use client::ApiClient;
pub use error::ApiError;
pub use types::{
    LoginRequest, RefreshRequest, RefreshResponse, RegisterRequest, TokenPair, UserProfile,
};
