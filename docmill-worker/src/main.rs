//! docmill-worker - Document Generation Worker
//!
//! Claims queued document jobs, runs the research → write → qa → render
//! pipeline, and serves finished documents over HTTP.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use docmill_common::config::Settings;
use docmill_common::events::EventBus;
use docmill_worker::dispatch::{push_channel_from_bus, Dispatcher, InFlightSet};
use docmill_worker::orchestrator::JobOrchestrator;
use docmill_worker::pipeline::qa::QualityGate;
use docmill_worker::pipeline::render::RenderStage;
use docmill_worker::pipeline::research::{HttpPageFetcher, PageFetcher, ResearchStage};
use docmill_worker::pipeline::write::WriteStage;
use docmill_worker::providers::{
    DraftProvider, EncyclopediaClient, HostedLlmClient, LocalModelClient, PromptVersion,
    SearchProvider, WebSearchClient,
};
use docmill_worker::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting docmill-worker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!("Database: {}", settings.database_path.display());

    let pool = docmill_common::db::init_database(&settings.database_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(100);

    let prompt_version = PromptVersion::parse_str(&settings.prompt_version)?;

    // Evidence cascade: keyed web search first when configured, then the
    // public encyclopedia fallback.
    let mut search_providers: Vec<Arc<dyn SearchProvider>> = Vec::new();
    match &settings.search_api_key {
        Some(key) => {
            search_providers.push(Arc::new(WebSearchClient::new(key.clone())?));
            info!("Web search provider enabled");
        }
        None => {
            warn!("No search API key configured, relying on encyclopedia fallback");
        }
    }
    search_providers.push(Arc::new(EncyclopediaClient::new()?));

    // Content cascade: hosted LLM, then local model, both optional. The
    // deterministic synthesizer inside the write stage is the backstop.
    let mut draft_providers: Vec<Arc<dyn DraftProvider>> = Vec::new();
    match &settings.llm_api_key {
        Some(key) => {
            draft_providers.push(Arc::new(HostedLlmClient::new(
                key.clone(),
                settings.llm_models.clone(),
                prompt_version,
            )?));
            info!(models = ?settings.llm_models, "Hosted generation provider enabled");
        }
        None => {
            warn!("No hosted LLM key configured");
        }
    }
    if settings.local_llm_enabled {
        draft_providers.push(Arc::new(LocalModelClient::new(
            settings.local_llm_endpoint.clone(),
            settings.local_llm_models.clone(),
            prompt_version,
        )?));
        info!(endpoint = %settings.local_llm_endpoint, "Local generation provider enabled");
    }

    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpPageFetcher::new(settings.scrape_timeout_secs)?);
    let research = ResearchStage::new(
        search_providers,
        fetcher,
        settings.scrape_concurrency,
        settings.scrape_timeout_secs,
    );
    let write = WriteStage::new(draft_providers);
    let qa = QualityGate::new()?;
    let render = RenderStage::new()?;

    let orchestrator = Arc::new(JobOrchestrator::new(
        pool.clone(),
        event_bus.clone(),
        research,
        write,
        qa,
        render,
        settings.clone(),
    ));

    let in_flight = InFlightSet::new();
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        orchestrator,
        in_flight.clone(),
        settings.poll_interval_secs,
        settings.poll_batch_size,
    ));
    // Low-latency trigger: JobQueued events on the bus reach the dispatcher
    // through the push contract; the poll loop stays on as the durable path.
    let push_rx = push_channel_from_bus(&event_bus, 256);
    tokio::spawn(dispatcher.run(Some(push_rx)));
    info!(
        poll_interval_secs = settings.poll_interval_secs,
        poll_batch_size = settings.poll_batch_size,
        "Dispatcher started"
    );

    let state = AppState::new(pool, event_bus, in_flight);
    let app = docmill_worker::build_router(state);

    let bind_addr = format!("127.0.0.1:{}", settings.bind_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
