use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static SUBSCRIBER_GUARD: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// Idempotent so that tests and binaries can call it more than once.
pub fn init_tracing(filter: EnvFilter) -> Result<()> {
    if SUBSCRIBER_GUARD.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber)?;
    SUBSCRIBER_GUARD.set(()).ok();

    Ok(())
}

/// `MAGICAPP_LOG`, then `RUST_LOG`, then `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    directive_from(
        std::env::var("MAGICAPP_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
    )
    .and_then(|directive| EnvFilter::try_new(directive).ok())
    .unwrap_or_else(|| EnvFilter::new(default))
}

fn directive_from(app: Option<String>, rust: Option<String>) -> Option<String> {
    app.into_iter()
        .chain(rust)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
