use thiserror::Error;

use super::store::StoreError;
use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Login rejected by the backend. Carries a message for the user.
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("Session renewal failed: {0}")]
    RenewalFailed(String),

    #[error("Could not load user profile: {0}")]
    ProfileFetchFailed(String),

    #[error("No active session")]
    NoSession,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Message suitable for showing on the login view.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}
