#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use reqwest::StatusCode;

use stockroom_core::api::{
    ApiError, LoginRequest, RefreshRequest, RefreshResponse, TokenPair, UserProfile,
};
use stockroom_core::auth::{
    AuthBackend, MemoryStore, SessionManager, SessionOptions, SessionSignal, SessionStore,
    StoreKey,
};

/// A JWT-shaped token expiring `secs_from_now` seconds from now.
pub fn token(tag: &str, secs_from_now: i64) -> String {
    let exp = Utc::now().timestamp() + secs_from_now;
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{}","exp":{}}}"#, tag, exp))
    )
}

pub fn live_token(tag: &str) -> String {
    token(tag, 3600)
}

pub fn expired_token(tag: &str) -> String {
    token(tag, -60)
}

/// A canned backend failure.
#[derive(Clone, Copy)]
pub struct Reject {
    pub status: u16,
    pub body: &'static str,
}

impl Reject {
    pub const UNAUTHORIZED: Reject = Reject {
        status: 401,
        body: r#"{"detail": "Could not validate credentials"}"#,
    };
    pub const SERVER_ERROR: Reject = Reject {
        status: 500,
        body: "Internal Server Error",
    };

    fn to_error(self) -> ApiError {
        let status = StatusCode::from_u16(self.status).expect("valid status");
        ApiError::from_status(status, self.body)
    }
}

/// Scripted `AuthBackend` that counts its calls.
pub struct FakeBackend {
    login: Mutex<Result<TokenPair, Reject>>,
    refreshes: Mutex<VecDeque<Result<RefreshResponse, Reject>>>,
    profile: Mutex<Result<(), Reject>>,
    refresh_delay: Mutex<Option<Duration>>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub last_refresh_token: Mutex<Option<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            login: Mutex::new(Ok(TokenPair {
                access_token: live_token("T1"),
                refresh_token: "R1".to_string(),
            })),
            refreshes: Mutex::new(VecDeque::new()),
            profile: Mutex::new(Ok(())),
            refresh_delay: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            last_refresh_token: Mutex::new(None),
        }
    }

    pub fn login_returns(&self, access_token: &str, refresh_token: &str) {
        *self.login.lock().unwrap() = Ok(TokenPair {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        });
    }

    pub fn login_rejects(&self, reject: Reject) {
        *self.login.lock().unwrap() = Err(reject);
    }

    pub fn queue_refresh(&self, access_token: &str, refresh_token: Option<&str>) {
        self.refreshes.lock().unwrap().push_back(Ok(RefreshResponse {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
        }));
    }

    pub fn queue_refresh_rejection(&self, reject: Reject) {
        self.refreshes.lock().unwrap().push_back(Err(reject));
    }

    pub fn profile_rejects(&self, reject: Reject) {
        *self.profile.lock().unwrap() = Err(reject);
    }

    /// Make every refresh call take `delay` before answering.
    pub fn slow_refresh(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    pub fn logins(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn profiles(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn login(&self, _request: &LoginRequest) -> Result<TokenPair, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login.lock().unwrap().clone().map_err(Reject::to_error)
    }

    async fn refresh(&self, request: &RefreshRequest) -> Result<RefreshResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(request.refresh_token.clone());

        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.refreshes.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result.map_err(Reject::to_error),
            None => Ok(RefreshResponse {
                access_token: live_token("renewed"),
                refresh_token: None,
            }),
        }
    }

    async fn fetch_profile(
        &self,
        email: &str,
        _access_token: &str,
    ) -> Result<UserProfile, ApiError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = *self.profile.lock().unwrap();
        outcome.map_err(Reject::to_error)?;
        Ok(UserProfile {
            id: Some(1),
            email: email.to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Byron".to_string()),
            role: Some("manager".to_string()),
            is_active: true,
        })
    }
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub store: Arc<MemoryStore>,
    pub manager: SessionManager,
}

impl Harness {
    pub fn new() -> Self {
        let backend = Arc::new(FakeBackend::new());
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(
            backend.clone(),
            store.clone(),
            SessionOptions {
                renewal_interval: Duration::from_secs(60),
            },
        );
        Self {
            backend,
            store,
            manager,
        }
    }

    pub fn stored(&self, key: StoreKey) -> Option<String> {
        self.store.get(key).unwrap()
    }

    pub fn store_is_empty(&self) -> bool {
        StoreKey::ALL.iter().all(|key| self.stored(*key).is_none())
    }

    pub fn seed_store(&self, access_token: &str, refresh_token: &str, email: &str) {
        self.store.set(StoreKey::AccessToken, access_token).unwrap();
        self.store.set(StoreKey::RefreshToken, refresh_token).unwrap();
        self.store.set(StoreKey::UserEmail, email).unwrap();
    }
}

/// Let spawned tasks run until they are idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Every signal received so far.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionSignal>) -> Vec<SessionSignal> {
    let mut signals = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        signals.push(signal);
    }
    signals
}
