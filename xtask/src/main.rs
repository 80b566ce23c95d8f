use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::{stream, StreamExt};
use magicapp_core::api::ClientContext;
use magicapp_core::config::ClientSettings;
use magicapp_core::models::{Registration, TokenPair, User};
use magicapp_core::session::{AuthBackend, SessionManager, SessionStatus};
use magicapp_core::storage::{FileStore, KeyValueStore};
use magicapp_core::stream::read_deltas;
use magicapp_core::{telemetry, ClientError, ClientResult};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for MagicAppDev")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an offline smoke test of session bootstrap and stream decoding.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

/// Signs in `smoke-token` and nothing else.
struct OfflineAuth;

#[async_trait::async_trait]
impl AuthBackend for OfflineAuth {
    async fn login(&self, _email: &str, _password: &str) -> ClientResult<TokenPair> {
        Err(ClientError::Network("offline".into()))
    }

    async fn register(&self, _registration: &Registration) -> ClientResult<TokenPair> {
        Err(ClientError::Network("offline".into()))
    }

    async fn refresh(&self, _refresh_token: &str) -> ClientResult<String> {
        Err(ClientError::Auth("offline".into()))
    }

    async fn fetch_profile(&self, access_token: &str) -> ClientResult<User> {
        if access_token != "smoke-token" {
            return Err(ClientError::Auth("Token expired".into()));
        }
        Ok(serde_json::from_value(serde_json::json!({
            "id": "smoke",
            "email": "smoke@magicappdev.local",
            "name": "Smoke"
        }))?)
    }

    async fn logout(&self, _refresh_token: &str) -> ClientResult<()> {
        Ok(())
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;
    let store: Arc<dyn KeyValueStore> =
        Arc::new(FileStore::new(temp_dir.path().join("preferences.json")));

    runtime.block_on(async {
        let (manager, _events) = SessionManager::new(
            Arc::new(OfflineAuth),
            store.clone(),
            ClientContext::new(),
            &ClientSettings::default(),
        );
        let session = manager
            .bootstrap(Some(
                "magicappdev://auth/callback?accessToken=smoke-token&refreshToken=smoke-refresh",
            ))
            .await;
        if session.status() != SessionStatus::Authenticated {
            bail!("bootstrap settled as {:?}", session.status());
        }
        info!("user" = ?session.user().map(|u| &u.id), "bootstrap ok");

        manager.logout().await;
        if manager.status() != SessionStatus::Unauthenticated {
            bail!("logout left the session as {:?}", manager.status());
        }

        // "é" split across two chunks.
        let chunks: Vec<Result<Vec<u8>, ClientError>> = vec![
            Ok(b"data: {\"response\":\"caf\xc3".to_vec()),
            Ok(b"\xa9\"}\n\ndata: [DONE]\n\n".to_vec()),
        ];
        let deltas: Vec<String> = read_deltas(stream::iter(chunks))
            .map(|delta| delta.map_err(anyhow::Error::from))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()?;
        if deltas != ["café"] {
            bail!("unexpected deltas {deltas:?}");
        }
        info!("deltas" = deltas.len(), "stream decoding ok");
        Ok(())
    })
}
