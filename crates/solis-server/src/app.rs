//! Process wiring: config → clients → stores → agents → HTTP router.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use tower_http::trace::TraceLayer;
use tracing::warn;

use solis_agent::gemini::{GeminiEmbedder, GeminiProvider, GeminiTranscriber};
use solis_agent::anthropic::AnthropicProvider;
use solis_agent::orchestrator::OrchestratorDeps;
use solis_agent::router::{ModelRouter, ProviderSlot};
use solis_agent::subagents::calendar::CalendarAgent;
use solis_agent::subagents::crm::CrmAgent;
use solis_agent::{ModelProvider, Orchestrator};
use solis_calendar::CalendarClient;
use solis_core::config::{SolisConfig, DEDUPE_TTL_SECS};
use solis_crm::CrmClient;
use solis_knowledge::KnowledgeStore;
use solis_media::MediaPipeline;
use solis_store::Store;
use solis_whatsapp::{GatewayClient, HumanizedSender};

use crate::dedupe::DedupeCache;
use crate::http;
use crate::intake::Intake;

pub struct AppState {
    pub config: SolisConfig,
    pub store: Arc<Store>,
    pub knowledge: Arc<KnowledgeStore>,
    pub sender: Arc<HumanizedSender>,
    pub calendar_client: Arc<CalendarClient>,
    pub intake: Intake,
    pub dedupe: DedupeCache,
    pub started_at: Instant,
}

/// Build the shared model provider stack: Gemini primary, Anthropic fallback.
pub fn build_provider(config: &SolisConfig) -> anyhow::Result<(Arc<dyn ModelProvider>, Arc<GeminiProvider>)> {
    let gemini_key = config
        .models
        .gemini_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("models.gemini_api_key is required"))?;
    let gemini = Arc::new(GeminiProvider::new(
        &config.models.gemini_base_url,
        &gemini_key,
        config.models.rate_per_sec,
    ));

    let mut slots = vec![ProviderSlot::new(
        Box::new(GeminiProvider::new(
            &config.models.gemini_base_url,
            &gemini_key,
            config.models.rate_per_sec,
        )),
        &config.models.primary_id,
        config.retry.retry_max,
    )];
    match config.models.anthropic_api_key {
        Some(ref key) => slots.push(ProviderSlot::new(
            Box::new(AnthropicProvider::new(
                &config.models.anthropic_base_url,
                key,
                config.models.rate_per_sec,
            )),
            &config.models.fallback_id,
            config.retry.retry_max,
        )),
        None => warn!("no fallback model configured (models.anthropic_api_key unset)"),
    }

    let router: Arc<dyn ModelProvider> = Arc::new(ModelRouter::new(slots));
    Ok((router, gemini))
}

/// Open the main store and the knowledge store on the configured database.
pub fn open_stores(
    config: &SolisConfig,
    gemini: Arc<GeminiProvider>,
) -> anyhow::Result<(Arc<Store>, Arc<KnowledgeStore>)> {
    let store = Arc::new(Store::open(&config.database.path)?);
    let knowledge_conn = if config.database.path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(&config.database.path)?
    };
    let knowledge = Arc::new(KnowledgeStore::new(
        knowledge_conn,
        Arc::new(GeminiEmbedder::new(gemini)),
        config.knowledge.clone(),
    )?);
    Ok((store, knowledge))
}

/// Assemble the full application state for `serve`.
pub fn build_state(config: SolisConfig) -> anyhow::Result<Arc<AppState>> {
    let (provider, gemini) = build_provider(&config)?;
    let (store, knowledge) = open_stores(&config, Arc::clone(&gemini))?;

    let gateway = Arc::new(GatewayClient::new(
        &config.gateway.base_url,
        &config.gateway.instance,
        &config.gateway.api_key,
    ));
    let sender = Arc::new(HumanizedSender::new(
        Arc::clone(&gateway),
        config.gateway.typing_max_ms,
        config.gateway.send_ceiling_secs,
    ));
    let media = Arc::new(MediaPipeline::new(
        Arc::clone(&gateway),
        Arc::new(GeminiTranscriber::new(
            Arc::clone(&gemini),
            &config.models.primary_id,
        )),
    ));

    let calendar_client = Arc::new(CalendarClient::new(
        config.calendar.base_url.as_deref().unwrap_or(""),
        config.calendar.api_key.as_deref().unwrap_or(""),
        config.calendar.calendar_id.as_deref().unwrap_or("primary"),
    ));
    let calendar_agent = Arc::new(CalendarAgent::new(
        Arc::clone(&calendar_client),
        Arc::clone(&store),
        config.calendar.meeting_minutes,
    ));

    let crm_client = Arc::new(CrmClient::new(
        config.crm.base_url.as_deref().unwrap_or(""),
        config.crm.api_key.as_deref().unwrap_or(""),
        config.crm.pipeline_id.clone(),
        &config.retry,
    ));
    let crm_agent = Arc::new(CrmAgent::new(crm_client, Arc::clone(&store)));

    let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
        store: Arc::clone(&store),
        knowledge: Arc::clone(&knowledge),
        provider,
        sender: Arc::clone(&sender),
        media,
        calendar_agent,
        crm_agent,
        config: config.clone(),
    }));

    Ok(Arc::new(AppState {
        config,
        store,
        knowledge,
        sender,
        calendar_client,
        intake: Intake::new(orchestrator),
        dedupe: DedupeCache::new(DEDUPE_TTL_SECS),
        started_at: Instant::now(),
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(http::webhook::webhook_handler))
        .route("/health", get(http::health::health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
