use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::token;
use crate::api::UserProfile;

/// Message shown on the login view when a session ends on its own.
pub const SESSION_EXPIRED_REASON: &str = "Session expired. Please login again.";

/// Snapshot of an authenticated session.
#[derive(Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    #[serde(skip_serializing)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub access_token: String,
    #[serde(skip_serializing)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub refresh_token: String,
    /// User email the session was opened with
    pub identity: String,
    pub profile: Option<UserProfile>,
}

// Tokens stay out of Debug output so sessions can be logged
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("profile", &self.profile)
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn is_expired(&self) -> bool {
        token::is_expired(&self.access_token)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        token::expires_at(&self.access_token)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at().map(|expiry| expiry - Utc::now())
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry()
            .map(|d| d.num_minutes().max(0))
            .unwrap_or(0)
    }
}

/// Broadcast to the rest of the application when the session state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionSignal {
    Authenticated { email: String },
    /// `reason` is empty for a plain user logout.
    Unauthenticated { reason: String },
}
