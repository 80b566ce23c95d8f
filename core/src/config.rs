use crate::oauth::Platform;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://magicappdev-api.magicappdev.workers.dev";
pub const DEFAULT_DEEP_LINK_SCHEME: &str = "magicappdev";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_url: String,
    pub chat_url: String,
    pub deep_link_scheme: String,
    pub trusted_origins: Vec<String>,
    pub platform: Platform,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            chat_url: DEFAULT_API_URL.to_string(),
            deep_link_scheme: DEFAULT_DEEP_LINK_SCHEME.to_string(),
            trusted_origins: vec![DEFAULT_API_URL.to_string()],
            platform: Platform::Mobile,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => {
                format!("MagicAppDev is misconfigured: {detail}. Update magicapp.yaml.")
            }
        }
    }
}

impl ClientSettings {
    /// Defaults, then `magicapp.yaml`, then `MAGICAPP_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let file = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                parse_config(&contents)?
            }
            None => ConfigFile::default(),
        };
        let overrides = EnvOverrides {
            api_url: std::env::var("MAGICAPP_API_URL").ok(),
            chat_url: std::env::var("MAGICAPP_CHAT_URL").ok(),
            deep_link_scheme: std::env::var("MAGICAPP_DEEP_LINK_SCHEME").ok(),
        };
        resolve_settings(file, overrides)
    }
}

#[derive(Debug, Default)]
struct EnvOverrides {
    api_url: Option<String>,
    chat_url: Option<String>,
    deep_link_scheme: Option<String>,
}

fn parse_config(contents: &str) -> Result<ConfigFile, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid magicapp.yaml: {err}")))
}

fn resolve_settings(file: ConfigFile, env: EnvOverrides) -> Result<ClientSettings, ConfigError> {
    let section = file.client.unwrap_or_default();
    let defaults = ClientSettings::default();

    let api_url = validate_url(
        "api_url",
        pick(env.api_url, section.api_url).unwrap_or(defaults.api_url),
    )?;
    let chat_url = match pick(env.chat_url, section.chat_url) {
        Some(url) => validate_url("chat_url", url)?,
        None => api_url.clone(),
    };
    let deep_link_scheme = pick(env.deep_link_scheme, section.deep_link_scheme)
        .unwrap_or(defaults.deep_link_scheme)
        .to_ascii_lowercase();
    if !deep_link_scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return Err(ConfigError::Invalid(format!(
            "deep link scheme `{deep_link_scheme}` is not a valid url scheme"
        )));
    }

    let mut trusted_origins = vec![api_url.clone()];
    for origin in section.trusted_origins {
        trusted_origins.push(validate_url("trusted_origins", origin)?);
    }

    Ok(ClientSettings {
        api_url,
        chat_url,
        deep_link_scheme,
        trusted_origins,
        platform: section.platform.unwrap_or(defaults.platform),
    })
}

fn pick(env: Option<String>, file: Option<String>) -> Option<String> {
    env.or(file)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate_url(field: &str, raw: String) -> Result<String, ConfigError> {
    let url = Url::parse(&raw)
        .map_err(|err| ConfigError::Invalid(format!("{field} `{raw}` is not a url: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "{field} `{raw}` must use http or https"
        )));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn locate_config_file() -> Option<PathBuf> {
    config_candidates().into_iter().find(|path| path.exists())
}

fn config_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("magicapp");
        paths.push(config_dir.join("magicapp.yaml"));
        paths.push(config_dir.join("magicapp.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".magicapp").join("magicapp.yaml"));
        paths.push(home_dir.join(".magicapp").join("magicapp.yml"));
    } else {
        paths.push(PathBuf::from("magicapp.yaml"));
        paths.push(PathBuf::from("magicapp.yml"));
    }
    paths
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    client: Option<ClientSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    chat_url: Option<String>,
    #[serde(default)]
    deep_link_scheme: Option<String>,
    #[serde(default)]
    trusted_origins: Vec<String>,
    #[serde(default)]
    platform: Option<Platform>,
}
