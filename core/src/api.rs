use crate::chat::{ChatBackend, ChatMessage};
use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::models::{
    Ack, ApiEnvelope, ErrorBody, LinkedAccount, OAuthSessionPoll, Registration, TokenPair, User,
};
use crate::oauth::{self, OAuthProvider, Platform};
use crate::project::{NewProject, Project};
use crate::session::AuthBackend;
use crate::stream::{read_deltas, DeltaStream};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

/// Bearer credential shared by every request made through an [`ApiClient`].
///
/// Only the session manager writes it.
#[derive(Clone, Default)]
pub struct ClientContext {
    bearer: Arc<RwLock<Option<String>>>,
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bearer(&self) -> Option<String> {
        self.bearer.read().clone()
    }

    pub fn has_credential(&self) -> bool {
        self.bearer.read().is_some()
    }

    pub(crate) fn set_credential(&self, token: Option<String>) {
        *self.bearer.write() = token;
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("has_credential", &self.has_credential())
            .finish()
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    chat_url: String,
    context: ClientContext,
}

#[derive(Deserialize)]
struct ErrorData {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedToken {
    access_token: String,
}

#[derive(Deserialize)]
struct ProjectPage {
    data: Vec<Project>,
}

#[derive(Deserialize)]
struct ChatReply {
    message: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordChange<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

#[derive(Serialize)]
struct CreateProjectBody<'a> {
    #[serde(flatten)]
    project: &'a NewProject,
    config: Map<String, Value>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, context: ClientContext) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            chat_url: base_url.clone(),
            base_url,
            context,
        }
    }

    pub fn from_settings(settings: &ClientSettings, context: ClientContext) -> Self {
        Self::new(settings.api_url.clone(), context).with_chat_url(settings.chat_url.clone())
    }

    /// Serve the streaming chat endpoint from another host.
    pub fn with_chat_url(mut self, chat_url: impl Into<String>) -> Self {
        self.chat_url = chat_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    fn join(base: &str, path: &str) -> String {
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn prepare(&self, method: Method, url: String, token: Option<&str>) -> RequestBuilder {
        debug!("method" = %method, "url" = %url, "requesting");
        let builder = self
            .http
            .request(method, url)
            .header(CONTENT_TYPE, "application/json");
        match token.map(str::to_owned).or_else(|| self.context.bearer()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.prepare(method, Self::join(&self.base_url, path), None)
    }

    /// `/projects/{id}` with `id` encoded as a single path segment.
    fn project_url(&self, id: &str) -> ClientResult<String> {
        if matches!(id, "" | "." | "..") {
            return Err(ClientError::Validation(format!("Invalid project id: {id:?}")));
        }
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Parse(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(["projects", id]);
        Ok(url.into())
    }

    async fn dispatch(builder: RequestBuilder) -> ClientResult<Response> {
        let response = builder.send().await.map_err(|err| {
            error!(%err, "request failed");
            ClientError::from(err)
        })?;
        let status = response.status();
        debug!("status" = status.as_u16(), "response received");
        if status.is_success() {
            return Ok(response);
        }

        let reason = status.canonical_reason().unwrap_or("Unknown Status");
        let message = response
            .json::<ErrorData>()
            .await
            .ok()
            .and_then(|data| data.error)
            .and_then(|body| body.message().map(str::to_owned))
            .unwrap_or_else(|| format!("API Request failed: {reason}"));
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth(message),
            _ => ClientError::Api(message),
        })
    }

    async fn execute<T: DeserializeOwned>(builder: RequestBuilder) -> ClientResult<T> {
        let response = Self::dispatch(builder).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<TokenPair> {
        let builder = self
            .request(Method::POST, "/auth/login")
            .json(&Credentials { email, password });
        Self::execute::<ApiEnvelope<TokenPair>>(builder)
            .await
            .and_then(|envelope| envelope.into_result("Login failed"))
            .map_err(ClientError::into_auth)
    }

    pub async fn register(&self, registration: &Registration) -> ClientResult<TokenPair> {
        let builder = self
            .request(Method::POST, "/auth/register")
            .json(registration);
        Self::execute::<ApiEnvelope<TokenPair>>(builder)
            .await
            .and_then(|envelope| envelope.into_result("Registration failed"))
            .map_err(ClientError::into_auth)
    }

    pub async fn logout(&self, refresh_token: &str) -> ClientResult<()> {
        let builder = self
            .request(Method::POST, "/auth/logout")
            .json(&RefreshRequest { refresh_token });
        Self::execute::<Value>(builder).await.map(|_| ())
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> ClientResult<String> {
        let builder = self
            .request(Method::POST, "/auth/refresh")
            .json(&RefreshRequest { refresh_token });
        Self::execute::<ApiEnvelope<RefreshedToken>>(builder)
            .await
            .and_then(|envelope| envelope.into_result("Session refresh failed"))
            .map(|refreshed| refreshed.access_token)
            .map_err(ClientError::into_auth)
    }

    pub async fn current_user(&self) -> ClientResult<User> {
        Self::fetch_user(self.request(Method::GET, "/auth/me")).await
    }

    /// Fetch the profile for `access_token` without touching the shared credential.
    pub async fn fetch_profile(&self, access_token: &str) -> ClientResult<User> {
        let url = Self::join(&self.base_url, "/auth/me");
        Self::fetch_user(self.prepare(Method::GET, url, Some(access_token))).await
    }

    async fn fetch_user(builder: RequestBuilder) -> ClientResult<User> {
        Self::execute::<ApiEnvelope<User>>(builder)
            .await
            .and_then(|envelope| envelope.into_result("Failed to fetch user profile"))
            .map_err(ClientError::into_auth)
    }

    pub async fn projects(&self) -> ClientResult<Vec<Project>> {
        let envelope =
            Self::execute::<ApiEnvelope<ProjectPage>>(self.request(Method::GET, "/projects"))
                .await?;
        Ok(envelope.into_result("Failed to load projects")?.data)
    }

    pub async fn project(&self, id: &str) -> ClientResult<Project> {
        let url = self.project_url(id)?;
        Self::execute::<ApiEnvelope<Project>>(self.prepare(Method::GET, url, None))
            .await?
            .into_result("Project not found")
    }

    pub async fn create_project(&self, project: &NewProject) -> ClientResult<Project> {
        let builder = self
            .request(Method::POST, "/projects")
            .json(&CreateProjectBody {
                project,
                config: Map::new(),
            });
        Self::execute::<ApiEnvelope<Project>>(builder)
            .await?
            .into_result("Failed to create project")
    }

    pub async fn delete_project(&self, id: &str) -> ClientResult<()> {
        let url = self.project_url(id)?;
        Self::execute::<Ack>(self.prepare(Method::DELETE, url, None))
            .await?
            .into_result("Failed to delete project")
    }

    /// Non-streaming chat turn.
    pub async fn send_message(&self, messages: &[ChatMessage]) -> ClientResult<String> {
        let builder = self
            .request(Method::POST, "/ai/chat")
            .json(&json!({ "messages": messages }));
        Ok(Self::execute::<ApiEnvelope<ChatReply>>(builder)
            .await?
            .into_result("Chat request failed")?
            .message)
    }

    /// Streaming chat turn. Fails with [`ClientError::Stream`] when the handshake
    /// is rejected or the response has no body.
    pub async fn stream_message(&self, messages: &[ChatMessage]) -> ClientResult<DeltaStream> {
        let url = Self::join(&self.chat_url, "/ai/chat");
        let response = self
            .prepare(Method::POST, url, None)
            .json(&json!({ "messages": messages, "stream": true }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown Status");
            return Err(ClientError::Stream(format!(
                "Streaming request failed: {reason}"
            )));
        }
        if response.content_length() == Some(0) {
            return Err(ClientError::Stream("No response body to read".into()));
        }
        Ok(read_deltas(response.bytes_stream()))
    }

    pub async fn change_password(&self, current: &str, new: &str) -> ClientResult<()> {
        let builder = self
            .request(Method::POST, "/auth/change-password")
            .json(&PasswordChange {
                current_password: current,
                new_password: new,
            });
        Self::execute::<Ack>(builder)
            .await?
            .into_result("Failed to change password")
    }

    pub async fn linked_accounts(&self) -> ClientResult<Vec<LinkedAccount>> {
        Self::execute::<ApiEnvelope<Vec<LinkedAccount>>>(self.request(Method::GET, "/auth/accounts"))
            .await?
            .into_result("Failed to load linked accounts")
    }

    pub async fn delete_account(&self) -> ClientResult<()> {
        Self::execute::<Value>(self.request(Method::DELETE, "/auth/account"))
            .await
            .map(|_| ())
    }

    /// Poll whether a browser-based sign-in for `session_id` has completed.
    pub async fn check_oauth_session(&self, session_id: &str) -> ClientResult<OAuthSessionPoll> {
        let url = Self::join(&self.base_url, "/auth/check-session");
        let builder = self.http.get(url).query(&[("sessionId", session_id)]);
        Self::execute::<OAuthSessionPoll>(builder).await
    }

    pub fn github_login_url(&self, platform: Platform) -> ClientResult<String> {
        Ok(oauth::login_url(&self.base_url, OAuthProvider::GitHub, platform)?.into())
    }

    pub fn discord_login_url(&self, platform: Platform) -> ClientResult<String> {
        Ok(oauth::login_url(&self.base_url, OAuthProvider::Discord, platform)?.into())
    }

    pub fn link_account_url(&self, provider: OAuthProvider) -> ClientResult<String> {
        let mut url = url::Url::parse(&Self::join(
            &self.base_url,
            &format!("/auth/link/{}", provider.slug()),
        ))?;
        if let Some(token) = self.context.bearer() {
            url.query_pairs_mut().append_pair("token", &token);
        }
        Ok(url.into())
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    async fn login(&self, email: &str, password: &str) -> ClientResult<TokenPair> {
        ApiClient::login(self, email, password).await
    }

    async fn register(&self, registration: &Registration) -> ClientResult<TokenPair> {
        ApiClient::register(self, registration).await
    }

    async fn refresh(&self, refresh_token: &str) -> ClientResult<String> {
        ApiClient::refresh(self, refresh_token).await
    }

    async fn fetch_profile(&self, access_token: &str) -> ClientResult<User> {
        ApiClient::fetch_profile(self, access_token).await
    }

    async fn logout(&self, refresh_token: &str) -> ClientResult<()> {
        ApiClient::logout(self, refresh_token).await
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn stream_reply(&self, history: &[ChatMessage]) -> ClientResult<DeltaStream> {
        self.stream_message(history).await
    }

    async fn reply(&self, history: &[ChatMessage]) -> ClientResult<String> {
        self.send_message(history).await
    }
}
