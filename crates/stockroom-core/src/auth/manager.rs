//! Session lifecycle: login, restore, periodic renewal, logout.
//!
//! `SessionManager` is the only writer of the session store. It is cheap to
//! clone; all clones share one session, one renewal loop and one signal
//! channel.
//!
//! Renewal runs on a fixed interval rather than being scheduled from the
//! token's expiry. Concurrent renewals (timer and manual) are coalesced: a
//! caller that waited behind a successful renewal gets its result instead of
//! exchanging the refresh token a second time.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::backend::AuthBackend;
use super::error::SessionError;
use super::session::{Session, SessionSignal, SESSION_EXPIRED_REASON};
use super::store::{SessionStore, StoreError, StoreKey, StoredSession};
use super::token;
use crate::api::{LoginRequest, RefreshRequest};

/// Renewal interval used unless configured otherwise.
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest interval the renewal loop accepts.
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_secs(1);

/// Buffered signals per subscriber before slow receivers start lagging.
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub renewal_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
        }
    }
}

struct ActiveSession {
    session: Session,
    renewal: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn cancel_renewal(&mut self) {
        if let Some(handle) = self.renewal.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct State {
    active: Option<ActiveSession>,
    /// Bumped whenever a session starts or ends
    epoch: u64,
    /// Bumped whenever a renewal replaces the access token
    generation: u64,
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn SessionStore>,
    options: SessionOptions,
    state: Mutex<State>,
    renew_gate: tokio::sync::Mutex<()>,
    signals: broadcast::Sender<SessionSignal>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn SessionStore>,
        options: SessionOptions,
    ) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                options,
                state: Mutex::new(State::default()),
                renew_gate: tokio::sync::Mutex::new(()),
                signals,
            }),
        }
    }

    /// Receive `Authenticated` / `Unauthenticated` signals.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.inner.signals.subscribe()
    }

    /// Snapshot of the current session, if any.
    pub fn current(&self) -> Option<Session> {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// True if a session exists and its access token has not expired.
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| !active.session.is_expired())
            .unwrap_or(false)
    }

    /// True while a renewal loop is running for the current session.
    pub fn renewal_active(&self) -> bool {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .and_then(|active| active.renewal.as_ref())
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Expired or undecodable tokens count as expired.
    pub fn is_expired(token: &str) -> bool {
        token::is_expired(token)
    }

    // ===== Lifecycle =====

    /// Exchange credentials for a token pair and open a session.
    ///
    /// Nothing is changed if the backend rejects the credentials.
    pub async fn login(&self, identity: &str, secret: &str) -> Result<Session, SessionError> {
        let email = identity.trim().to_string();
        let request = LoginRequest {
            email: email.clone(),
            password: secret.to_string(),
        };

        let pair = self.inner.backend.login(&request).await.map_err(|e| {
            warn!(email = %email, error = %e, "Login failed");
            if e.is_rejection() {
                SessionError::InvalidCredentials(e.user_message())
            } else {
                SessionError::Api(e)
            }
        })?;

        let session = Session {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            identity: email.clone(),
            profile: None,
        };
        let epoch = self.install(session, true)?;
        info!(email = %email, "Login successful");

        if let Err(e) = self.refresh_profile().await {
            warn!(email = %email, error = %e, "Logged in without a user profile");
        }

        let session = self.current_if(epoch).ok_or(SessionError::NoSession)?;
        self.emit(SessionSignal::Authenticated { email });
        Ok(session)
    }

    /// Reopen the persisted session, if there is one the backend still accepts.
    ///
    /// Makes no network call when nothing is stored.
    pub async fn restore(&self) -> Result<Option<Session>, SessionError> {
        let stored = StoredSession::load(self.inner.store.as_ref())?;
        let Some((access_token, refresh_token, email)) = stored.complete() else {
            if !stored.is_empty() {
                warn!("Discarding incomplete stored session");
                self.inner.store.clear()?;
            }
            debug!("No stored session");
            return Ok(None);
        };
        let (access_token, refresh_token, email) = (
            access_token.to_string(),
            refresh_token.to_string(),
            email.to_string(),
        );

        let epoch = self.current_epoch();
        let profile = match self.inner.backend.fetch_profile(&email, &access_token).await {
            Ok(profile) => profile,
            Err(e) => {
                let e = SessionError::ProfileFetchFailed(e.user_message());
                warn!(email = %email, error = %e, "Stored session rejected");
                self.end_session(Some(epoch), SESSION_EXPIRED_REASON);
                return Ok(None);
            }
        };

        if self.current_epoch() != epoch {
            // A login finished while the profile was loading; it wins
            return Ok(self.current());
        }

        let session = Session {
            access_token,
            refresh_token,
            identity: email.clone(),
            profile: Some(profile),
        };
        self.install(session.clone(), false)?;
        info!(email = %email, "Session restored");
        self.emit(SessionSignal::Authenticated { email });
        Ok(Some(session))
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Any failure ends the session with the session-expired reason before
    /// the error is returned.
    pub async fn renew(&self) -> Result<String, SessionError> {
        let observed_generation = self.inner.state.lock().generation;
        let _gate = self.inner.renew_gate.lock().await;

        let (epoch, refresh_token) = {
            let state = self.inner.state.lock();
            let Some(active) = state.active.as_ref() else {
                return Err(SessionError::NoSession);
            };
            if state.generation != observed_generation {
                debug!("Renewal coalesced with one that just completed");
                return Ok(active.session.access_token.clone());
            }
            (state.epoch, active.session.refresh_token.clone())
        };

        if refresh_token.trim().is_empty() {
            return Err(self.fail_renewal(epoch, "no refresh token stored".to_string()));
        }

        let response = match self
            .inner
            .backend
            .refresh(&RefreshRequest { refresh_token })
            .await
        {
            Ok(response) => response,
            Err(e) => return Err(self.fail_renewal(epoch, e.to_string())),
        };

        if let Err(e) = token::decode_claims(&response.access_token) {
            return Err(self.fail_renewal(epoch, format!("malformed access token: {}", e)));
        }

        let outcome = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                debug!("Session ended while renewing; discarding renewed token");
                return Err(SessionError::RenewalFailed(
                    "session ended during renewal".to_string(),
                ));
            }
            match self.persist_renewal(&response.access_token, response.refresh_token.as_deref()) {
                Ok(()) => {
                    state.generation += 1;
                    match state.active.as_mut() {
                        Some(active) => {
                            active.session.access_token = response.access_token.clone();
                            if let Some(ref rotated) = response.refresh_token {
                                active.session.refresh_token = rotated.clone();
                            }
                            Ok(active.session.identity.clone())
                        }
                        None => Err("session missing during renewal".to_string()),
                    }
                }
                Err(e) => Err(format!("could not persist renewed tokens: {}", e)),
            }
        };

        match outcome {
            Ok(email) => {
                info!(
                    at = %Utc::now().to_rfc3339(),
                    email = %email,
                    rotated_refresh_token = response.refresh_token.is_some(),
                    "Access token renewed"
                );
                Ok(response.access_token)
            }
            Err(detail) => Err(self.fail_renewal(epoch, detail)),
        }
    }

    /// End the session: stop renewal, clear memory and store, signal the UI.
    ///
    /// `reason` is forwarded to the login view; empty for a user logout.
    pub fn logout(&self, reason: &str) {
        self.end_session(None, reason);
    }

    /// Stop the renewal loop, waiting for an in-flight renewal to finish and
    /// persist first. The session stays open and stored.
    ///
    /// Call before the runtime shuts down so a rotated refresh token is not
    /// lost with an aborted renewal.
    pub async fn suspend_renewal(&self) {
        let _gate = self.inner.renew_gate.lock().await;
        let mut state = self.inner.state.lock();
        let epoch = state.epoch;
        if let Some(active) = state.active.as_mut() {
            if active.renewal.is_some() {
                active.cancel_renewal();
                debug!(epoch, "Renewal loop suspended");
            }
        }
    }

    /// Log out if the held access token has expired. Returns true if it did.
    pub fn expire_if_stale(&self) -> bool {
        let stale_epoch = {
            let state = self.inner.state.lock();
            match state.active.as_ref() {
                Some(active) if active.session.is_expired() => Some(state.epoch),
                _ => None,
            }
        };
        match stale_epoch {
            Some(epoch) => {
                info!("Access token expired");
                self.end_session(Some(epoch), SESSION_EXPIRED_REASON)
            }
            None => false,
        }
    }

    /// Re-fetch and cache the profile of the current session.
    pub async fn refresh_profile(&self) -> Result<(), SessionError> {
        let (epoch, email, access_token) = {
            let state = self.inner.state.lock();
            let active = state.active.as_ref().ok_or(SessionError::NoSession)?;
            (
                state.epoch,
                active.session.identity.clone(),
                active.session.access_token.clone(),
            )
        };

        let profile = self
            .inner
            .backend
            .fetch_profile(&email, &access_token)
            .await
            .map_err(|e| SessionError::ProfileFetchFailed(e.user_message()))?;

        let mut state = self.inner.state.lock();
        if state.epoch == epoch {
            if let Some(active) = state.active.as_mut() {
                active.session.profile = Some(profile);
            }
        }
        Ok(())
    }

    // ===== Outbound requests =====

    /// Set the bearer authorization header if a live, unexpired access token
    /// exists. Otherwise the request goes out unchanged.
    pub fn attach_credential(&self, mut request: reqwest::Request) -> reqwest::Request {
        let access_token = self
            .inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.session.access_token.clone());

        let Some(access_token) = access_token.filter(|t| !token::is_expired(t)) else {
            return request;
        };

        match HeaderValue::from_str(&format!("Bearer {}", access_token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("Access token is not a valid header value"),
        }
        request
    }

    // ===== Internals =====

    fn current_epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    fn current_if(&self, epoch: u64) -> Option<Session> {
        let state = self.inner.state.lock();
        if state.epoch != epoch {
            return None;
        }
        state.active.as_ref().map(|active| active.session.clone())
    }

    fn emit(&self, signal: SessionSignal) {
        if self.inner.signals.send(signal).is_err() {
            debug!("No session signal subscribers");
        }
    }

    /// Replace any current session with `session` and start its renewal loop.
    fn install(&self, session: Session, persist: bool) -> Result<u64, SessionError> {
        let mut state = self.inner.state.lock();
        let had_previous = match state.active.take() {
            Some(mut previous) => {
                previous.cancel_renewal();
                true
            }
            None => false,
        };
        state.epoch += 1;

        if persist {
            if let Err(e) = self.persist_session(&session) {
                error!(error = %e, "Failed to persist session");
                if let Err(clear_err) = self.inner.store.clear() {
                    error!(error = %clear_err, "Failed to clear session store");
                }
                drop(state);
                if had_previous {
                    self.emit(SessionSignal::Unauthenticated {
                        reason: String::new(),
                    });
                }
                return Err(e.into());
            }
        }

        let epoch = state.epoch;
        let renewal = self.spawn_renewal_loop(epoch);
        state.active = Some(ActiveSession {
            session,
            renewal: Some(renewal),
        });
        Ok(epoch)
    }

    /// Clear the session. With `expected_epoch`, only if that session is
    /// still the current one. Returns true if the session was ended.
    fn end_session(&self, expected_epoch: Option<u64>, reason: &str) -> bool {
        {
            let mut state = self.inner.state.lock();
            if let Some(expected) = expected_epoch {
                if state.epoch != expected {
                    debug!(expected, current = state.epoch, "Stale session end ignored");
                    return false;
                }
            }
            if let Some(mut active) = state.active.take() {
                active.cancel_renewal();
            }
            state.epoch += 1;
            if let Err(e) = self.inner.store.clear() {
                error!(error = %e, "Failed to clear session store");
            }
        }

        info!(reason = %reason, "Session ended");
        self.emit(SessionSignal::Unauthenticated {
            reason: reason.to_string(),
        });
        true
    }

    fn fail_renewal(&self, epoch: u64, detail: String) -> SessionError {
        warn!(at = %Utc::now().to_rfc3339(), error = %detail, "Access token renewal failed");
        self.end_session(Some(epoch), SESSION_EXPIRED_REASON);
        SessionError::RenewalFailed(detail)
    }

    fn persist_session(&self, session: &Session) -> Result<(), StoreError> {
        let store = &self.inner.store;
        store.set(StoreKey::AccessToken, &session.access_token)?;
        store.set(StoreKey::RefreshToken, &session.refresh_token)?;
        store.set(StoreKey::UserEmail, &session.identity)?;
        Ok(())
    }

    fn persist_renewal(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.store.set(StoreKey::AccessToken, access_token)?;
        if let Some(refresh_token) = refresh_token {
            self.inner.store.set(StoreKey::RefreshToken, refresh_token)?;
        }
        Ok(())
    }

    /// Tick immediately, then every interval, until renewal fails, the
    /// session changes, or every manager handle is dropped.
    fn spawn_renewal_loop(&self, epoch: u64) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.options.renewal_interval.max(MIN_RENEWAL_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = SessionManager { inner };
                if manager.current_epoch() != epoch {
                    break;
                }
                // A failed renewal has already ended the session
                if manager.renew().await.is_err() {
                    break;
                }
            }
            debug!(epoch, "Renewal loop stopped");
        })
    }
}
