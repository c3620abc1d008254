//! Per-lead mailboxes feeding the orchestrator.
//!
//! One bounded mpsc channel and worker task per phone number: events for the
//! same lead process strictly in arrival order, events for different leads in
//! parallel. The orchestrator's own keyed lock backs this up, so ordering
//! holds even if a second worker ever appears for a phone.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use solis_agent::Orchestrator;
use solis_whatsapp::types::InboundEvent;

const MAILBOX_DEPTH: usize = 32;

pub struct Intake {
    orchestrator: Arc<Orchestrator>,
    mailboxes: DashMap<String, mpsc::Sender<InboundEvent>>,
}

impl Intake {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            mailboxes: DashMap::new(),
        }
    }

    /// Number of live mailboxes (health endpoint).
    pub fn depth(&self) -> usize {
        self.mailboxes.len()
    }

    /// Queue an event for its lead's worker, spawning the worker on first use.
    pub fn enqueue(&self, event: InboundEvent) {
        let phone = event.phone.as_str().to_string();

        let sender = self
            .mailboxes
            .entry(phone.clone())
            .or_insert_with(|| self.spawn_worker(&phone))
            .clone();

        match sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                // A lead spamming faster than we reply: drop the oldest-style
                // behavior is not available on mpsc, so drop the newest and log.
                warn!(phone = %ev.phone, "mailbox full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(ev)) => {
                // Worker died; replace it and retry once.
                warn!(phone = %ev.phone, "mailbox closed, respawning worker");
                let sender = self.spawn_worker(&phone);
                self.mailboxes.insert(phone, sender.clone());
                let _ = sender.try_send(ev);
            }
        }
    }

    fn spawn_worker(&self, phone: &str) -> mpsc::Sender<InboundEvent> {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(MAILBOX_DEPTH);
        let orchestrator = Arc::clone(&self.orchestrator);
        let phone = phone.to_string();

        tokio::spawn(async move {
            info!(%phone, "lead worker started");
            while let Some(event) = rx.recv().await {
                match orchestrator.handle_inbound(event).await {
                    Ok(outcome) if outcome.duplicate => {}
                    Ok(outcome) => {
                        info!(%phone, stage = %outcome.stage, replied = outcome.reply.is_some(), "turn complete");
                    }
                    Err(e) => {
                        warn!(%phone, error = %e, "turn failed");
                    }
                }
            }
            info!(%phone, "lead worker stopped");
        });

        tx
    }
}
