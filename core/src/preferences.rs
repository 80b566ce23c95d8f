use crate::error::ClientResult;
use crate::storage::{KeyValueStore, THEME_MODE_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    Automatic,
}

impl ThemeMode {
    pub const ALL: [ThemeMode; 3] = [ThemeMode::Light, ThemeMode::Dark, ThemeMode::Automatic];

    pub fn as_str(self) -> &'static str {
        match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
            ThemeMode::Automatic => "automatic",
        }
    }

    pub fn is_dark(self, system_prefers_dark: bool) -> bool {
        match self {
            ThemeMode::Dark => true,
            ThemeMode::Light => false,
            ThemeMode::Automatic => system_prefers_dark,
        }
    }

    /// The settings switch flips between explicit light and dark.
    pub fn toggled(self) -> Self {
        match self {
            ThemeMode::Light => ThemeMode::Dark,
            ThemeMode::Dark | ThemeMode::Automatic => ThemeMode::Light,
        }
    }

    pub async fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(THEME_MODE_KEY).await {
            Ok(Some(raw)) => raw.parse().unwrap_or_default(),
            Ok(None) => ThemeMode::default(),
            Err(err) => {
                warn!(%err, "failed to load theme preference");
                ThemeMode::default()
            }
        }
    }

    pub async fn save(self, store: &dyn KeyValueStore) -> ClientResult<()> {
        store.set(THEME_MODE_KEY, self.as_str()).await
    }
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ThemeMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown theme mode `{value}`"))
    }
}
