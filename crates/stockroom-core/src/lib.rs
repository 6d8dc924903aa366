//! Core library for stockroom: the client-side session lifecycle for the
//! inventory/sales dashboard backend.
//!
//! - [`auth`]: session manager, token inspection, credential storage
//! - [`api`]: authentication endpoints and the authenticated request wrapper
//! - [`config`]: configuration file and environment overrides

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, AuthClient, UserProfile};
pub use auth::{Session, SessionError, SessionManager, SessionOptions, SessionSignal};
pub use config::{Config, StoreKind};
