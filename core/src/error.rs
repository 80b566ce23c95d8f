/// Failures surfaced by the client core.
///
/// `Network`, `Auth`, `Parse` and `Stream` follow the way the remote API fails;
/// the remaining variants cover local concerns.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Auth(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("{0}")]
    Api(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("{0}")]
    Validation(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Text suitable for an inline error label.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Unable to reach the server. Check your connection.".to_string(),
            Self::Auth(message) | Self::Api(message) | Self::Validation(message) => {
                message.clone()
            }
            Self::Parse(_) | Self::Stream(_) => "Something went wrong. Please try again.".to_string(),
            Self::Storage(_) => "Unable to save your settings on this device.".to_string(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Server rejections on credential endpoints are authentication failures.
    pub(crate) fn into_auth(self) -> Self {
        match self {
            Self::Api(message) => Self::Auth(message),
            other => other,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::Parse(err.to_string())
    }
}
