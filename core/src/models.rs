use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

/// Profile returned by `/auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(UserRole::Admin)
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens never reach log output.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Email sign-up form.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip)]
    pub confirm_password: String,
}

impl Registration {
    pub fn validate(&self) -> ClientResult<()> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(ClientError::Validation(
                "Email and password are required".into(),
            ));
        }
        if self.password != self.confirm_password {
            return Err(ClientError::Validation("Passwords do not match".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// An OAuth identity attached to the signed-in account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkedAccount {
    pub id: String,
    pub provider: String,
    pub provider_account_id: String,
    pub created_at: String,
}

/// Result of polling `/auth/check-session` during a mobile OAuth flow.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSessionPoll {
    pub success: bool,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub data: Option<TokenPair>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Detailed {
        #[serde(default)]
        message: Option<String>,
    },
    Plain(String),
}

impl ErrorBody {
    pub fn message(&self) -> Option<&str> {
        let message = match self {
            Self::Detailed { message } => message.as_deref(),
            Self::Plain(message) => Some(message.as_str()),
        };
        message.filter(|message| !message.trim().is_empty())
    }
}

/// `{success: true, data}` or `{success: false, error: {message}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_result(self, fallback: &str) -> ClientResult<T> {
        if self.success {
            return self
                .data
                .ok_or_else(|| ClientError::Parse("response envelope is missing `data`".into()));
        }
        let message = self
            .error
            .as_ref()
            .and_then(ErrorBody::message)
            .unwrap_or(fallback)
            .to_string();
        Err(ClientError::Api(message))
    }
}

/// Envelope for endpoints that only acknowledge.
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

impl Ack {
    pub fn into_result(self, fallback: &str) -> ClientResult<()> {
        if self.success {
            return Ok(());
        }
        let message = self
            .error
            .as_ref()
            .and_then(ErrorBody::message)
            .unwrap_or(fallback);
        Err(ClientError::Api(message.to_string()))
    }
}
