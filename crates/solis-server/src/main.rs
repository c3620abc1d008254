use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use solis_core::config::SolisConfig;
use solis_core::types::Phone;
use solis_knowledge::ChunkInput;
use solis_scheduler::{CalendarSyncLoop, FollowUpExecutor, ReminderLoop};
use solis_store::Store;

mod app;
mod dedupe;
mod http;
mod intake;

#[derive(Parser)]
#[command(name = "solis", about = "Conversational solar-lead SDR over WhatsApp")]
struct Cli {
    /// Config file path (default: ~/.solis/solis.toml, SOLIS_CONFIG honored).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server and the background loops.
    Serve,
    /// Index a knowledge corpus file (JSON array of chunks).
    IngestKnowledge { path: String },
    /// Embed every knowledge chunk that is missing its vector.
    BackfillEmbeddings,
    /// Cancel all open follow-ups for a lead.
    CancelFollowups {
        /// Lead phone number.
        #[arg(long)]
        lead: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solis=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    // Config problems are fatal here, before anything serves.
    let config = SolisConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::IngestKnowledge { path } => ingest_knowledge(config, &path).await,
        Command::BackfillEmbeddings => backfill_embeddings(config).await,
        Command::CancelFollowups { lead } => cancel_followups(config, &lead),
    }
}

async fn serve(config: SolisConfig) -> anyhow::Result<()> {
    let bind = config.server.bind.clone();
    let port = config.server.port;
    let quiet = config.followup.quiet_hours().map_err(|e| anyhow::anyhow!("{e}"))?;

    let state = app::build_state(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Background loops: follow-up executor, reminder loop, calendar sync.
    let executor = FollowUpExecutor::new(
        Arc::clone(&state.store),
        Arc::clone(&state.sender),
        state.config.followup.clone(),
        state.config.funnel.clone(),
        quiet,
    );
    tokio::spawn(executor.run(shutdown_rx.clone()));

    let reminders = ReminderLoop::new(
        Arc::clone(&state.store),
        Arc::clone(&state.sender),
        state.config.followup.reminder_tick_sec,
        state.config.followup.max_attempts,
    );
    tokio::spawn(reminders.run(shutdown_rx.clone()));

    let calsync = CalendarSyncLoop::new(
        Arc::clone(&state.store),
        Arc::clone(&state.calendar_client),
        state.config.calendar.sync_sec,
        state.config.funnel.missed_meeting_policy,
    );
    tokio::spawn(calsync.run(shutdown_rx.clone()));

    let router = app::build_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("solis listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

async fn ingest_knowledge(config: SolisConfig, path: &str) -> anyhow::Result<()> {
    let (_, gemini) = app::build_provider(&config)?;
    let (_, knowledge) = app::open_stores(&config, gemini)?;

    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read corpus file {path}: {e}"))?;
    let chunks: Vec<ChunkInput> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("corpus file is not a valid chunk array: {e}"))?;

    let total = chunks.len();
    for chunk in &chunks {
        knowledge.index(chunk).await?;
    }
    println!("indexed {total} chunks from {path}");
    Ok(())
}

async fn backfill_embeddings(config: SolisConfig) -> anyhow::Result<()> {
    let (_, gemini) = app::build_provider(&config)?;
    let (_, knowledge) = app::open_stores(&config, gemini)?;
    let n = knowledge.backfill_embeddings().await?;
    println!("backfilled {n} embeddings");
    Ok(())
}

fn cancel_followups(config: SolisConfig, lead: &str) -> anyhow::Result<()> {
    let store = Store::open(&config.database.path)?;
    let phone = Phone::new(lead);
    let lead_row = store
        .get_lead_by_phone(&phone)?
        .ok_or_else(|| anyhow::anyhow!("no lead with phone {phone}"))?;
    let n = store.cancel_open_follow_ups(&lead_row.id)?;
    println!("canceled {n} follow-ups for {phone}");
    Ok(())
}
