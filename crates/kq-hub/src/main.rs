use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use kq_core::{AggregationEngine, EngineSettings};
use serde::Deserialize;
use serde_json::Map;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daemon::DaemonClient;

mod api;
mod daemon;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "kq-hub",
    version,
    about = "Dashboard search sidecar for a SphinxQL daemon"
)]
struct Args {
    /// Path to config file
    #[arg(long, default_value = "kq-hub.toml")]
    config: PathBuf,

    /// Server bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Search daemon HTTP endpoint (overrides the config file)
    #[arg(long)]
    daemon_url: Option<String>,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone, Debug)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    daemon: DaemonConfig,
    #[serde(default)]
    engine: EngineConfig,
}

#[derive(Deserialize, Clone, Debug)]
struct ServerConfig {
    #[serde(default = "default_bind")]
    bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Deserialize, Clone, Debug)]
struct DaemonConfig {
    #[serde(default = "default_daemon_url")]
    url: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            url: default_daemon_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
struct EngineConfig {
    #[serde(default = "default_count_alias")]
    count_alias: String,
    #[serde(default = "default_max_gap_buckets")]
    max_gap_buckets: usize,
    #[serde(default)]
    sql_options: Map<String, serde_json::Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            count_alias: default_count_alias(),
            max_gap_buckets: default_max_gap_buckets(),
            sql_options: Map::new(),
        }
    }
}

impl EngineConfig {
    fn settings(&self) -> EngineSettings {
        EngineSettings {
            count_alias: self.count_alias.clone(),
            max_gap_buckets: self.max_gap_buckets,
            sql_options: self.sql_options.clone(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:9400".into()
}
fn default_daemon_url() -> String {
    "http://127.0.0.1:9308".into()
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_count_alias() -> String {
    "cnt".into()
}
fn default_max_gap_buckets() -> usize {
    10_000
}

impl Config {
    fn load(path: &PathBuf) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        toml::from_str(&content).map_err(|e| e.to_string())
    }
}

// =============================================================================
// Application State
// =============================================================================

type Engine = AggregationEngine<Arc<DaemonClient>, Arc<DaemonClient>>;

pub struct AppState {
    engine: Engine,
    config: Config,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/:index/_search", post(api::search))
        .route("/api/translate", post(api::translate))
        .route("/api/status", get(api::status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "kq_hub=info,kq_core=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to read config {:?}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(url) = args.daemon_url {
        config.daemon.url = url;
    }

    let client = match DaemonClient::new(&config.daemon.url, config.daemon.timeout_ms) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!("Failed to build daemon client: {}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        engine: AggregationEngine::new(client.clone(), client.clone(), config.engine.settings()),
        config: config.clone(),
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    let addr: SocketAddr = match config.server.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address {}: {}", config.server.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("kq-hub v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Search:  http://{}/<index>/_search", addr);
    tracing::info!("  API:     http://{}/api/status", addr);
    tracing::info!("  Daemon:  {}", client.url());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9400");
        assert_eq!(config.daemon.url, "http://127.0.0.1:9308");
        assert_eq!(config.daemon.timeout_ms, 10_000);
        assert_eq!(config.engine.settings(), EngineSettings::default());
    }

    #[test]
    fn test_config_engine_section() {
        let config: Config = toml::from_str(
            r#"
            [daemon]
            url = "http://search:9308"

            [engine]
            count_alias = "doc_count"
            max_gap_buckets = 500

            [engine.sql_options]
            max_matches = 20000
            "#,
        )
        .unwrap();
        let settings = config.engine.settings();
        assert_eq!(config.daemon.url, "http://search:9308");
        assert_eq!(config.server.bind, "127.0.0.1:9400");
        assert_eq!(settings.count_alias, "doc_count");
        assert_eq!(settings.max_gap_buckets, 500);
        assert_eq!(settings.sql_options["max_matches"], serde_json::json!(20000));
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let config = Config::load(&PathBuf::from("/nonexistent/kq-hub.toml")).unwrap();
        assert_eq!(config.engine.count_alias, "cnt");
    }
}
