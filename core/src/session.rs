//! Authenticated-user lifecycle.
//!
//! A [`SessionManager`] reconciles three sources of credentials (tokens left in
//! persistent storage, OAuth redirects, and interactive sign-in) into one
//! published [`Session`]. Every resolution validates its access token against
//! the profile endpoint first and only then competes for the commit lock. A
//! commit succeeds only if no other commit happened since the resolution
//! started, so the first validated pair wins and late arrivals are dropped.

use crate::api::ClientContext;
use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::models::{Registration, TokenPair, User};
use crate::oauth::{parse_callback_url, CallbackMessage, CallbackPayload, OriginAllowList};
use crate::routes::Route;
use crate::storage::{KeyValueStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Remote operations the session manager depends on.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> ClientResult<TokenPair>;
    async fn register(&self, registration: &Registration) -> ClientResult<TokenPair>;
    async fn refresh(&self, refresh_token: &str) -> ClientResult<String>;
    /// Must use `access_token` rather than the shared credential.
    async fn fetch_profile(&self, access_token: &str) -> ClientResult<User>;
    async fn logout(&self, refresh_token: &str) -> ClientResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Loading,
    Authenticated,
    Unauthenticated,
}

/// Snapshot of who is signed in.
#[derive(Clone, Default)]
pub struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<User>,
    settled: bool,
    pending_callbacks: usize,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        if !self.settled || self.pending_callbacks > 0 {
            SessionStatus::Loading
        } else if self.user.is_some() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Unauthenticated
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status())
            .field("user", &self.user.as_ref().map(|user| &user.id))
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Side effects requested from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Navigate(Route),
    CloseAuthBrowser,
    AuthFailed(String),
}

/// Inbound OAuth deliveries that arrive after start-up.
#[derive(Debug, Clone)]
pub enum CallbackSource {
    Url(String),
    Message(CallbackMessage),
}

enum Adoption {
    Committed(User),
    Duplicate,
    Superseded,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn KeyValueStore>,
    context: ClientContext,
    deep_link_scheme: String,
    origins: OriginAllowList,
    state: watch::Sender<Session>,
    commit: tokio::sync::Mutex<()>,
    // Advanced by every authenticated commit and by logout.
    epoch: AtomicU64,
    validating: Mutex<HashSet<String>>,
    events: UnboundedSender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn KeyValueStore>,
        context: ClientContext,
        settings: &ClientSettings,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        let (state, _) = watch::channel(Session::default());
        let inner = Inner {
            backend,
            store,
            context,
            deep_link_scheme: settings.deep_link_scheme.clone(),
            origins: OriginAllowList::new(&settings.trusted_origins),
            state,
            commit: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
            validating: Mutex::new(HashSet::new()),
            events: events_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn current(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.borrow().status()
    }

    /// Restore the session at start-up.
    ///
    /// Stored tokens and `launch_url` (the redirect or deep link the process
    /// was opened with) are resolved concurrently. The returned session is
    /// never `Loading` unless another callback is still in flight.
    pub async fn bootstrap(&self, launch_url: Option<&str>) -> Session {
        // Both resolutions race from the same epoch; the first to commit wins.
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let launch = async {
            let Some(url) = launch_url else {
                return;
            };
            if let Err(err) = self.redirect_at(url, Some(epoch)).await {
                warn!(%err, "launch url did not complete sign-in");
            }
        };
        tokio::join!(self.restore_stored(epoch), launch);
        self.inner.state.send_if_modified(|session| {
            let unsettled = !session.settled;
            session.settled = true;
            unsettled
        });
        let session = self.current();
        info!("status" = ?session.status(), "bootstrap finished");
        session
    }

    async fn restore_stored(&self, epoch: u64) {
        let inner = &self.inner;

        let access = read_key(inner.store.as_ref(), ACCESS_TOKEN_KEY).await;
        let refresh = read_key(inner.store.as_ref(), REFRESH_TOKEN_KEY).await;
        let Some(access) = access else {
            debug!("no stored access token");
            self.settle_signed_out(epoch, false).await;
            return;
        };

        let err = match inner.backend.fetch_profile(&access).await {
            Ok(user) => {
                if let Err(err) = self.commit(epoch, access, refresh, user, "storage").await {
                    warn!(%err, "failed to restore stored session");
                }
                return;
            }
            Err(err) => err,
        };
        warn!(%err, "stored access token rejected");

        let Some(refresh) = refresh else {
            self.settle_signed_out(epoch, true).await;
            return;
        };
        match self.refresh_and_fetch(&refresh).await {
            Ok((access, user)) => {
                if let Err(err) = self.commit(epoch, access, Some(refresh), user, "refresh").await {
                    warn!(%err, "failed to persist refreshed session");
                }
            }
            Err(err) => {
                warn!(%err, "session refresh failed");
                self.settle_signed_out(epoch, true).await;
            }
        }
    }

    async fn refresh_and_fetch(&self, refresh: &str) -> ClientResult<(String, User)> {
        let access = self.inner.backend.refresh(refresh).await?;
        let user = self.inner.backend.fetch_profile(&access).await?;
        Ok((access, user))
    }

    /// Settle as signed out unless a sign-in committed since `epoch`.
    async fn settle_signed_out(&self, epoch: u64, clear_storage: bool) {
        let inner = &self.inner;
        let _commit = inner.commit.lock().await;
        if inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("signed-out settlement superseded");
            return;
        }
        if clear_storage {
            inner.context.set_credential(None);
            remove_tokens(inner.store.as_ref()).await;
        }
        inner.state.send_modify(|session| {
            session.access_token = None;
            session.refresh_token = None;
            session.user = None;
            session.settled = true;
        });
        info!("session unauthenticated");
    }

    /// Persist, publish and install the credential if nothing committed since `epoch`.
    async fn commit(
        &self,
        epoch: u64,
        access: String,
        refresh: Option<String>,
        user: User,
        source: &'static str,
    ) -> ClientResult<Adoption> {
        let inner = &self.inner;
        let _commit = inner.commit.lock().await;
        if inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("source" = source, "resolution superseded by an earlier commit");
            return Ok(Adoption::Superseded);
        }

        inner.store.set(ACCESS_TOKEN_KEY, &access).await?;
        if let Some(refresh) = &refresh {
            inner.store.set(REFRESH_TOKEN_KEY, refresh).await?;
        }
        inner.context.set_credential(Some(access.clone()));
        inner.epoch.fetch_add(1, Ordering::SeqCst);

        info!("source" = source, "user" = %user.id, "session authenticated");
        inner.state.send_modify(|session| {
            session.access_token = Some(access);
            session.refresh_token = refresh;
            session.user = Some(user.clone());
            session.settled = true;
        });
        Ok(Adoption::Committed(user))
    }

    /// Validate a freshly issued pair and commit it.
    async fn adopt(&self, pair: TokenPair, source: &'static str) -> ClientResult<Adoption> {
        self.adopt_at(pair, None, source).await
    }

    /// Like [`Self::adopt`], but loses to any commit made after `epoch`
    /// rather than after validation starts.
    async fn adopt_at(
        &self,
        pair: TokenPair,
        epoch: Option<u64>,
        source: &'static str,
    ) -> ClientResult<Adoption> {
        let inner = &self.inner;
        if inner.state.borrow().access_token.as_deref() == Some(pair.access_token.as_str()) {
            debug!("source" = source, "token pair already active");
            return Ok(Adoption::Duplicate);
        }
        let Some(_claim) = ValidationClaim::acquire(&inner.validating, &pair.access_token) else {
            debug!("source" = source, "token pair already being validated");
            return Ok(Adoption::Duplicate);
        };

        let epoch = epoch.unwrap_or_else(|| inner.epoch.load(Ordering::SeqCst));
        let user = inner.backend.fetch_profile(&pair.access_token).await?;
        let TokenPair {
            access_token,
            refresh_token,
        } = pair;
        self.commit(epoch, access_token, Some(refresh_token), user, source)
            .await
    }

    /// Apply an OAuth callback payload.
    ///
    /// Returns the signed-in user when this call committed the session and
    /// `None` when the payload was incomplete or already handled. Provider
    /// errors and failed validation leave the existing session untouched.
    pub async fn complete_oauth_callback(
        &self,
        payload: CallbackPayload,
    ) -> ClientResult<Option<User>> {
        self.complete_oauth_callback_at(payload, None).await
    }

    async fn complete_oauth_callback_at(
        &self,
        payload: CallbackPayload,
        epoch: Option<u64>,
    ) -> ClientResult<Option<User>> {
        if let Some(error) = payload.error.as_deref().filter(|e| !e.is_empty()) {
            warn!("error" = error, "oauth provider returned an error");
            self.emit(SessionEvent::AuthFailed(error.to_string()));
            return Err(ClientError::Auth(format!("Authentication failed: {error}")));
        }
        let Some(pair) = payload.token_pair() else {
            debug!(?payload, "oauth callback without a complete token pair");
            return Ok(None);
        };

        let _loading = LoadingGuard::enter(&self.inner.state);
        match self.adopt_at(pair, epoch, "oauth").await {
            Ok(Adoption::Committed(user)) => {
                self.emit(SessionEvent::CloseAuthBrowser);
                self.emit(SessionEvent::Navigate(Route::Home));
                Ok(Some(user))
            }
            Ok(Adoption::Duplicate | Adoption::Superseded) => Ok(None),
            Err(err) => {
                warn!(%err, "oauth callback failed");
                self.emit(SessionEvent::AuthFailed(err.user_message()));
                Err(err)
            }
        }
    }

    /// Handle a redirect or deep-link URL. Non-callback URLs are ignored.
    pub async fn handle_redirect(&self, url: &str) -> ClientResult<Option<User>> {
        self.redirect_at(url, None).await
    }

    async fn redirect_at(&self, url: &str, epoch: Option<u64>) -> ClientResult<Option<User>> {
        match parse_callback_url(url, &self.inner.deep_link_scheme)? {
            Some(payload) => self.complete_oauth_callback_at(payload, epoch).await,
            None => {
                debug!("url is not an oauth callback");
                Ok(None)
            }
        }
    }

    /// Handle a payload posted from another browsing context.
    pub async fn handle_message(&self, message: &CallbackMessage) -> ClientResult<Option<User>> {
        match self.inner.origins.accept(message)? {
            Some(payload) => self.complete_oauth_callback(payload).await,
            None => {
                warn!("origin" = %message.origin, "dropped message from untrusted origin");
                Ok(None)
            }
        }
    }

    /// Process callbacks that arrive while the app is running.
    pub fn listen(&self, mut inbound: UnboundedReceiver<CallbackSource>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(source) = inbound.recv().await {
                let outcome = match &source {
                    CallbackSource::Url(url) => manager.handle_redirect(url).await,
                    CallbackSource::Message(message) => manager.handle_message(message).await,
                };
                if let Err(err) = outcome {
                    warn!(%err, "inbound callback rejected");
                }
            }
            debug!("callback listener stopped");
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<User> {
        let pair = self.inner.backend.login(email, password).await?;
        self.finish_sign_in(pair, "login").await
    }

    pub async fn register(&self, registration: &Registration) -> ClientResult<User> {
        registration.validate()?;
        let pair = self.inner.backend.register(registration).await?;
        self.finish_sign_in(pair, "register").await
    }

    async fn finish_sign_in(&self, pair: TokenPair, source: &'static str) -> ClientResult<User> {
        match self.adopt(pair, source).await? {
            Adoption::Committed(user) => {
                self.emit(SessionEvent::Navigate(Route::Home));
                Ok(user)
            }
            Adoption::Duplicate => self
                .current()
                .user
                .ok_or_else(|| ClientError::Auth("Sign-in already in progress".into())),
            Adoption::Superseded => self
                .current()
                .user
                .ok_or_else(|| ClientError::Auth("Sign-in was interrupted".into())),
        }
    }

    /// Sign out locally, telling the server on a best-effort basis.
    pub async fn logout(&self) {
        let inner = &self.inner;
        let refresh = match self.current().refresh_token {
            Some(token) => Some(token),
            None => read_key(inner.store.as_ref(), REFRESH_TOKEN_KEY).await,
        };
        if let Some(refresh) = refresh {
            if let Err(err) = inner.backend.logout(&refresh).await {
                warn!(%err, "remote logout failed");
            }
        }

        let _commit = inner.commit.lock().await;
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.context.set_credential(None);
        remove_tokens(inner.store.as_ref()).await;
        inner.state.send_modify(|session| {
            session.access_token = None;
            session.refresh_token = None;
            session.user = None;
            session.settled = true;
        });
        self.emit(SessionEvent::Navigate(Route::Login));
        info!("signed out");
    }

    fn emit(&self, event: SessionEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("session event dropped, no listener");
        }
    }
}

async fn read_key(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value.filter(|value| !value.is_empty()),
        Err(err) => {
            warn!(%err, "key" = key, "failed to read stored token");
            None
        }
    }
}

async fn remove_tokens(store: &dyn KeyValueStore) {
    for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
        if let Err(err) = store.remove(key).await {
            warn!(%err, "key" = key, "failed to remove stored token");
        }
    }
}

/// Holds the session in `Loading` while an OAuth callback is processed.
struct LoadingGuard<'a> {
    state: &'a watch::Sender<Session>,
}

impl<'a> LoadingGuard<'a> {
    fn enter(state: &'a watch::Sender<Session>) -> Self {
        state.send_modify(|session| session.pending_callbacks += 1);
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|session| {
            session.pending_callbacks = session.pending_callbacks.saturating_sub(1);
        });
    }
}

struct ValidationClaim<'a> {
    validating: &'a Mutex<HashSet<String>>,
    token: String,
}

impl<'a> ValidationClaim<'a> {
    fn acquire(validating: &'a Mutex<HashSet<String>>, token: &str) -> Option<Self> {
        validating.lock().insert(token.to_string()).then(|| Self {
            validating,
            token: token.to_string(),
        })
    }
}

impl Drop for ValidationClaim<'_> {
    fn drop(&mut self) {
        self.validating.lock().remove(&self.token);
    }
}
