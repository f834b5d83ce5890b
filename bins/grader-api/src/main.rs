mod handlers;
mod language_config;
mod metrics;
mod problems;
mod routes;

use anyhow::Context;
use axum::Router;
use language_config::LanguageRegistry;
use metrics::Metrics;
use problems::ProblemStore;
use redis::aio::ConnectionManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub redis: ConnectionManager,
    pub problems: ProblemStore,
    pub languages: LanguageRegistry,
    pub metrics: Metrics,
}

/// Process settings read from the environment
struct ApiSettings {
    redis_url: String,
    problems_dir: PathBuf,
    languages_config: PathBuf,
    bind_addr: String,
}

impl ApiSettings {
    fn from_env() -> Self {
        let var = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());
        Self {
            redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
            problems_dir: PathBuf::from(var("PROBLEMS_DIR", "config/problems")),
            languages_config: PathBuf::from(var("LANGUAGES_CONFIG", "config/languages.json")),
            bind_addr: var("BIND_ADDR", "0.0.0.0:3000"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Grader API booting...");
    let settings = ApiSettings::from_env();

    let languages = LanguageRegistry::load_from_file(&settings.languages_config)?;
    info!("Enabled languages: {:?}", languages.enabled_languages());

    let problems = ProblemStore::load_dir(&settings.problems_dir)
        .with_context(|| format!("Failed to load problems from {}", settings.problems_dir.display()))?;
    info!("Problems: {:?}", problems.ids());

    let client = redis::Client::open(settings.redis_url.as_str()).context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", settings.redis_url);

    let state = Arc::new(AppState {
        redis: redis_conn,
        problems,
        languages,
        metrics: Metrics::new().context("Failed to register metrics")?,
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind_addr))?;
    info!("HTTP server listening on {}", settings.bind_addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
