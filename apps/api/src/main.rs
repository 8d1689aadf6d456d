mod config;
mod db;
mod discovery;
mod errors;
mod llm_client;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::discovery::audit::PgAuditRecorder;
use crate::discovery::guards::{default_guards, GuardFilter};
use crate::discovery::signals::{
    HttpSimilarityService, HttpTaxonomyService, LlmClassifierService, SignalCollector,
};
use crate::discovery::store::PgSkillStore;
use crate::discovery::{DiscoveryService, HttpSkillDictionary};
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let crate_target = env!("CARGO_PKG_NAME").replace('-', "_");
            EnvFilter::new(format!("{crate_target}={}", &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting discovery API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL and run migrations
    let db = create_pool(&config.database_url).await?;

    let signal_timeout = Duration::from_secs(config.signal_timeout_secs);
    let http = reqwest::Client::builder().timeout(signal_timeout).build()?;

    // Initialize LLM client (backs the classifier signal)
    let llm = LlmClient::new(
        config.anthropic_api_key.clone(),
        config.llm_model.clone(),
        signal_timeout,
    )?;
    info!("LLM client initialized (model: {})", config.llm_model);

    // External validation services behind the collector
    let collector = SignalCollector::new(
        Arc::new(HttpTaxonomyService::new(
            http.clone(),
            config.taxonomy_service_url.clone(),
        )),
        Arc::new(LlmClassifierService::new(llm)),
        Arc::new(HttpSimilarityService::new(
            http.clone(),
            config.similarity_service_url.clone(),
        )),
        signal_timeout,
    );

    let dictionary = Arc::new(HttpSkillDictionary::new(
        http,
        config.dictionary_service_url.clone(),
    ));

    let store = Arc::new(PgSkillStore::new(db.clone()));
    let audit = Arc::new(PgAuditRecorder::new(db.clone()));

    // Built-in guards first, then any deployment-specific ones from config.
    let guards: Vec<_> = default_guards()
        .into_iter()
        .chain(config.extra_guards.iter().cloned())
        .collect();

    let discovery = Arc::new(DiscoveryService::new(
        store.clone(),
        audit.clone(),
        collector,
        GuardFilter::new(guards),
        dictionary,
        config.decision.clone(),
    ));

    // Build app state
    let state = AppState {
        db,
        discovery,
        store,
        audit,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
