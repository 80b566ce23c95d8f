use crate::error::{ClientError, ClientResult};
use crate::models::TokenPair;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;
use uuid::Uuid;

const ACCESS_TOKEN_KEYS: [&str; 2] = ["accessToken", "access_token"];
const REFRESH_TOKEN_KEYS: [&str; 2] = ["refreshToken", "refresh_token"];
const ERROR_KEY: &str = "error";

/// Token delivery from an OAuth redirect or a cross-context message.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CallbackPayload {
    #[serde(default, alias = "accessToken")]
    pub access_token: Option<String>,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Both tokens, when present and non-empty.
    pub fn token_pair(&self) -> Option<TokenPair> {
        let access = self.access_token.as_deref().filter(|t| !t.is_empty())?;
        let refresh = self.refresh_token.as_deref().filter(|t| !t.is_empty())?;
        Some(TokenPair::new(access, refresh))
    }

    fn from_params(query: &HashMap<String, String>, fragment: &HashMap<String, String>) -> Self {
        let lookup = |keys: &[&str]| {
            [query, fragment]
                .into_iter()
                .flat_map(|params| keys.iter().filter_map(move |key| params.get(*key)))
                .find(|value| !value.is_empty())
                .cloned()
        };
        Self {
            access_token: lookup(&ACCESS_TOKEN_KEYS[..]),
            refresh_token: lookup(&REFRESH_TOKEN_KEYS[..]),
            error: lookup(&[ERROR_KEY][..]),
        }
    }

    fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.error.is_none()
    }
}

impl fmt::Debug for CallbackPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackPayload")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("error", &self.error)
            .finish()
    }
}

/// Extract a callback payload from a redirect URL.
///
/// `<scheme>://...` links count as callbacks when their host or path mentions
/// `callback`; web URLs count when they carry any token or error parameter.
/// Returns `Ok(None)` for URLs that are not callbacks.
pub fn parse_callback_url(raw: &str, scheme: &str) -> ClientResult<Option<CallbackPayload>> {
    let url = Url::parse(raw.trim())
        .map_err(|err| ClientError::Parse(format!("invalid callback url: {err}")))?;

    let query = pairs(url.query());
    let fragment = pairs(url.fragment());
    let payload = CallbackPayload::from_params(&query, &fragment);

    if url.scheme().eq_ignore_ascii_case(scheme) {
        let host = url.host_str().unwrap_or_default();
        if host.contains("callback") || url.path().contains("callback") {
            return Ok(Some(payload));
        }
        return Ok(None);
    }

    if matches!(url.scheme(), "http" | "https") && !payload.is_empty() {
        return Ok(Some(payload));
    }
    Ok(None)
}

fn pairs(component: Option<&str>) -> HashMap<String, String> {
    component
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// A payload posted from a popup or redirect page in another browsing context.
#[derive(Debug, Clone)]
pub struct CallbackMessage {
    pub origin: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct OriginAllowList {
    origins: Vec<String>,
}

impl OriginAllowList {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            origins: origins
                .into_iter()
                .filter_map(|origin| normalize_origin(origin.as_ref()))
                .collect(),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        normalize_origin(origin)
            .map(|origin| self.origins.iter().any(|allowed| *allowed == origin))
            .unwrap_or(false)
    }

    /// The payload of a message from a trusted origin.
    pub fn accept(&self, message: &CallbackMessage) -> ClientResult<Option<CallbackPayload>> {
        if !self.allows(&message.origin) {
            return Ok(None);
        }
        let payload: CallbackPayload = serde_json::from_value(message.data.clone())?;
        Ok(Some(payload))
    }
}

fn normalize_origin(origin: &str) -> Option<String> {
    let url = Url::parse(origin.trim()).ok()?;
    match url.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    GitHub,
    Discord,
}

impl OAuthProvider {
    pub fn slug(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::Discord => "discord",
        }
    }
}

impl std::str::FromStr for OAuthProvider {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "discord" => Ok(Self::Discord),
            other => Err(ClientError::Validation(format!(
                "unsupported sign-in provider: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Mobile,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Mobile => "mobile",
        }
    }
}

#[derive(Serialize)]
struct OAuthState<'a> {
    platform: &'a str,
    timestamp: i64,
    nonce: String,
}

/// Sign-in URL for an OAuth provider, without a `state` parameter.
pub fn login_url(
    api_url: &str,
    provider: OAuthProvider,
    platform: Platform,
) -> ClientResult<Url> {
    let mut url = Url::parse(api_url)?;
    url.path_segments_mut()
        .map_err(|_| ClientError::Parse(format!("{api_url} cannot be a base url")))?
        .pop_if_empty()
        .extend(["auth", "login", provider.slug()]);
    url.query_pairs_mut().append_pair("platform", platform.as_str());
    Ok(url)
}

/// Sign-in URL carrying an opaque `state` the provider hands back on redirect.
pub fn authorize_url(
    api_url: &str,
    provider: OAuthProvider,
    platform: Platform,
) -> ClientResult<Url> {
    let mut url = login_url(api_url, provider, platform)?;
    let state = serde_json::to_string(&OAuthState {
        platform: platform.as_str(),
        timestamp: Utc::now().timestamp_millis(),
        nonce: Uuid::new_v4().to_string(),
    })?;
    url.query_pairs_mut().append_pair("state", &state);
    Ok(url)
}
