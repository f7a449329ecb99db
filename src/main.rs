//! `readthru` — run the caching proxy.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use readthru::{BackendClient, Cache, Config, KeyScope, Server, proxy};

/// Read-through caching proxy for an HTTP key-value backend.
#[derive(Debug, Parser)]
#[command(name = "readthru", version, about)]
struct Args {
    /// Base URL of the backend store
    #[arg(long, env = "READTHRU_BACKEND_URL", default_value = "http://localhost:8080")]
    backend_url: String,

    /// Seconds a fetched value is served before it is refreshed
    #[arg(long, env = "READTHRU_STALENESS_SECS", default_value_t = 300)]
    staleness_secs: u64,

    /// Address to listen on
    #[arg(long, env = "READTHRU_LISTEN_ADDR", default_value = "0.0.0.0:8081")]
    listen_addr: String,

    /// Seconds before a backend request is abandoned
    #[arg(long, env = "READTHRU_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    /// Cache key scoping: `collection` or `key-only`
    #[arg(long, env = "READTHRU_KEY_SCOPE", default_value_t = KeyScope::Collection)]
    key_scope: KeyScope,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            backend_url: args.backend_url,
            staleness: Duration::from_secs(args.staleness_secs),
            listen_addr: args.listen_addr,
            request_timeout: Duration::from_secs(args.timeout_secs),
            key_scope: args.key_scope,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from(Args::parse());
    config.validate()?;

    let backend = BackendClient::new(&config.backend_url, config.request_timeout)?;
    let cache = Cache::new(backend, config.staleness).with_key_scope(config.key_scope);
    info!(
        backend = %config.backend_url,
        staleness_secs = config.staleness.as_secs(),
        key_scope = %config.key_scope,
        "cache ready"
    );

    let server = Server::bind(&config.listen_addr).await?;
    tokio::select! {
        result = server.serve(proxy::app(Arc::new(cache))) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}
