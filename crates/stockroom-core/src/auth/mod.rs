//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: login, restore, periodic renewal and logout
//! - `SessionStore`: persisted token storage (`FileStore`, `KeyringStore`, `MemoryStore`)
//! - `token`: expiry checks on JWT access tokens
//!
//! The access token is renewed every 60 seconds by default while a session
//! is open. A failed renewal ends the session.

pub mod backend;
pub mod error;
pub mod keyring_store;
pub mod manager;
pub mod session;
pub mod store;
pub mod token;

pub use backend::AuthBackend;
pub use error::SessionError;
pub use keyring_store::KeyringStore;
pub use manager::{SessionManager, SessionOptions, DEFAULT_RENEWAL_INTERVAL};
pub use session::{Session, SessionSignal, SESSION_EXPIRED_REASON};
pub use store::{FileStore, MemoryStore, SessionStore, StoreError, StoreKey, StoredSession};
pub use token::{decode_claims, is_expired, Claims, DecodeError};
