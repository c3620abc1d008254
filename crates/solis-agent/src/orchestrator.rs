//! Conversation orchestrator — one coordinator per inbound event.
//!
//! Serialized per lead: a keyed mutex map guarantees at most one turn runs
//! for a phone number at any instant, and the humanized sender's own per-lead
//! lock keeps follow-ups from interleaving with the reply. The whole turn
//! runs under a 45 s budget; blowing it degrades to a polite fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use solis_core::config::{SolisConfig, HISTORY_WINDOW, TURN_BUDGET_SECS};
use solis_core::types::{ContentType, MessageDirection, QualificationStage, SolutionChoice};
use solis_knowledge::KnowledgeStore;
use solis_media::{Artifact, MediaPipeline};
use solis_store::types::{AgentSession, Conversation, Lead, LeadPatch, SessionTurn};
use solis_store::Store;
use solis_whatsapp::types::InboundEvent;
use solis_whatsapp::HumanizedSender;

use crate::error::{AgentError, Result};
use crate::funnel;
use crate::guard::GuardRails;
use crate::intent::{self, Intent};
use crate::prompt::{parse_structured, PersonaPrompt};
use crate::provider::{ChatMessage, CompletionRequest, ModelProvider, Role};
use crate::score::{self, Engagement};
use crate::slots::{self, SlotExtractor};
use crate::subagents::bill::BillAnalyzerAgent;
use crate::subagents::calendar::CalendarAgent;
use crate::subagents::crm::CrmAgent;
use crate::subagents::followup::FollowUpAgent;
use crate::subagents::knowledge::KnowledgeAgent;
use crate::subagents::qualification::QualificationAgent;
use crate::subagents::{Subagent, SubagentOutcome, TurnContext};

/// Everything the orchestrator needs, wired once at startup.
pub struct OrchestratorDeps {
    pub store: Arc<Store>,
    pub knowledge: Arc<KnowledgeStore>,
    pub provider: Arc<dyn ModelProvider>,
    pub sender: Arc<HumanizedSender>,
    pub media: Arc<MediaPipeline>,
    pub calendar_agent: Arc<CalendarAgent>,
    pub crm_agent: Arc<CrmAgent>,
    pub config: SolisConfig,
}

/// What a completed turn did.
#[derive(Debug)]
pub struct TurnOutcome {
    /// `None` when the event was a duplicate or needed no reply.
    pub reply: Option<String>,
    pub stage: QualificationStage,
    pub duplicate: bool,
}

pub struct Orchestrator {
    store: Arc<Store>,
    provider: Arc<dyn ModelProvider>,
    sender: Arc<HumanizedSender>,
    media: Arc<MediaPipeline>,
    knowledge_agent: KnowledgeAgent,
    qualification_agent: QualificationAgent,
    calendar_agent: Arc<CalendarAgent>,
    crm_agent: Arc<CrmAgent>,
    bill_agent: BillAnalyzerAgent,
    followup_agent: FollowUpAgent,
    persona: PersonaPrompt,
    guard: GuardRails,
    extractor: SlotExtractor,
    config: SolisConfig,
    turn_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        let persona = PersonaPrompt::load(&deps.config.persona.path);
        Self {
            knowledge_agent: KnowledgeAgent::new(
                Arc::clone(&deps.knowledge),
                Arc::clone(&deps.provider),
                deps.config.knowledge.topk,
            ),
            qualification_agent: QualificationAgent::new(deps.config.funnel.clone()),
            bill_agent: BillAnalyzerAgent::new(Arc::clone(&deps.provider)),
            followup_agent: FollowUpAgent::new(Arc::clone(&deps.store)),
            store: deps.store,
            provider: deps.provider,
            sender: deps.sender,
            media: deps.media,
            calendar_agent: deps.calendar_agent,
            crm_agent: deps.crm_agent,
            persona,
            guard: GuardRails::new(),
            extractor: SlotExtractor::new(),
            config: deps.config,
            turn_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, phone: &str) -> Arc<Mutex<()>> {
        self.turn_locks
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Handle one inbound event end to end. Single-writer per lead.
    pub async fn handle_inbound(&self, event: InboundEvent) -> Result<TurnOutcome> {
        let lock = self.lock_for(event.phone.as_str());
        let _guard = lock.lock().await;

        let reply_sent = Arc::new(AtomicBool::new(false));
        let turn = self.run_turn(&event, Arc::clone(&reply_sent));

        match tokio::time::timeout(Duration::from_secs(TURN_BUDGET_SECS), turn).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(phone = %event.phone, "turn budget exceeded");
                let _ = self.store.record_event(
                    "turn_budget_exceeded",
                    None,
                    serde_json::json!({ "phone": event.phone.as_str() }),
                );
                if !reply_sent.load(Ordering::SeqCst) {
                    let _ = self
                        .sender
                        .send(
                            &event.phone,
                            "Opa, me perdi aqui por um instante. 😅 Pode repetir, por favor?",
                        )
                        .await;
                }
                Err(AgentError::TurnBudget {
                    secs: TURN_BUDGET_SECS,
                })
            }
        }
    }

    async fn run_turn(
        &self,
        event: &InboundEvent,
        reply_sent: Arc<AtomicBool>,
    ) -> Result<TurnOutcome> {
        let now = event.server_ts;

        // 1. Resolve lead + conversation, load the session. The gateway push
        // name only seeds a brand-new lead; it never overwrites one we hold.
        let lead = match self.store.get_lead_by_phone(&event.phone)? {
            Some(lead) => lead,
            None => self.store.upsert_lead_by_phone(
                &event.phone,
                LeadPatch {
                    display_name: event.push_name.clone(),
                    ..Default::default()
                },
            )?,
        };
        let conversation = self.store.conversation_for_lead(&lead.id)?;
        let mut session = self.store.load_session(&conversation.id)?;

        // Record the inbound message; a replayed gateway id ends the turn.
        let inbound_text = event.text.clone().unwrap_or_default();
        let appended = self.store.append_message(
            &conversation.id,
            MessageDirection::Inbound,
            event.content_type,
            &inbound_text,
            Some(&event.gateway_message_id),
        )?;
        if !appended.inserted {
            info!(phone = %event.phone, gateway_id = %event.gateway_message_id, "duplicate event ignored");
            return Ok(TurnOutcome {
                reply: None,
                stage: lead.stage,
                duplicate: true,
            });
        }
        self.store.touch_conversation(&conversation.id, now)?;

        // Reactions get an acknowledgement, not a model turn.
        if event.content_type == ContentType::Reaction {
            let _ = self
                .sender
                .react(&event.phone, &event.gateway_message_id, "👍")
                .await;
            return Ok(TurnOutcome {
                reply: None,
                stage: lead.stage,
                duplicate: false,
            });
        }

        // 2. Media first: the artifact feeds extraction and delegation.
        let (artifact, media_failed) = match &event.media {
            Some(media_ref) => match self.media.ingest(media_ref).await {
                Ok(a) => (Some(a), false),
                Err(e) => {
                    warn!(phone = %event.phone, error = %e, "media ingestion failed");
                    let _ = self.store.record_event(
                        "media_failed",
                        Some(&lead.id),
                        serde_json::json!({ "error": e.to_string() }),
                    );
                    (None, true)
                }
            },
            None => (None, false),
        };
        if media_failed {
            let reply = "Não consegui ler o arquivo que você mandou. 😅 \
                         Pode digitar o valor da sua conta, por favor?";
            return self
                .finish_turn(event, &lead, &conversation, session, reply.to_string(), reply_sent)
                .await;
        }

        // Audio transcripts join the text for extraction and prompting.
        let effective_text = match &artifact {
            Some(Artifact::Audio { transcript, .. }) if inbound_text.is_empty() => {
                transcript.clone()
            }
            _ => inbound_text.clone(),
        };

        // 3-of-§4.1 context load happens lazily below; slots first.
        let extracted = self.extractor.extract(&effective_text, lead.stage, now);
        let correction = self.extractor.is_correction(&effective_text);
        slots::merge(&mut session.slots, extracted, correction);

        // 4. Guard rails — deterministic, before any model involvement.
        if let Some(term) = self.guard.screen(&effective_text) {
            info!(phone = %event.phone, term, "guard rails fired");
            let _ = self.store.record_event(
                "guard_refusal",
                Some(&lead.id),
                serde_json::json!({ "term": term }),
            );
            let reply = self.guard.refusal_reply().to_string();
            return self
                .finish_turn(event, &lead, &conversation, session, reply, reply_sent)
                .await;
        }

        // 5. Delegation decision.
        let signals = intent::classify(&effective_text, event.content_type);
        let ctx = TurnContext {
            lead: &lead,
            conversation: &conversation,
            slots: &session.slots,
            text: &effective_text,
            artifact: artifact.as_ref(),
            now,
        };

        let outcome = match self.pick_subagent(&signals, &ctx) {
            Some(agent) => {
                info!(phone = %event.phone, subagent = agent.name(), "delegating turn");
                match agent.handle(&ctx).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // Degrade instead of dropping the turn: the lead still
                        // gets a coherent next step.
                        warn!(phone = %event.phone, subagent = agent.name(), error = %e, "subagent failed, degrading");
                        let _ = self.store.record_event(
                            "subagent_failed",
                            Some(&lead.id),
                            serde_json::json!({ "subagent": agent.name(), "error": e.to_string() }),
                        );
                        SubagentOutcome {
                            reply: self
                                .qualification_agent
                                .next_question(lead.stage, session.slots.name.as_deref()),
                            ..Default::default()
                        }
                    }
                }
            }
            None => self.coordinator_turn(&ctx, signals.complex).await?,
        };

        // 6. Post-process: merge subagent slots, advance stage, persist, reply.
        slots::merge(&mut session.slots, outcome.slot_updates.clone(), false);
        for (kind, payload) in &outcome.analytics {
            let _ = self.store.record_event(kind, Some(&lead.id), payload.clone());
        }
        self.finish_turn_with_hint(
            event,
            &lead,
            &conversation,
            session,
            outcome.reply,
            outcome.stage_hint,
            reply_sent,
        )
        .await
    }

    /// Pick a subagent for the turn, if any signal warrants one.
    fn pick_subagent<'a>(
        &'a self,
        signals: &intent::Signals,
        ctx: &TurnContext<'_>,
    ) -> Option<&'a dyn Subagent> {
        // A fully specified booking takes priority over keyword intent: the
        // funnel wants SCHEDULED and only the calendar agent can get it there.
        // A lead that is already booked only re-routes when the requested
        // time differs from the live event (a reschedule).
        let candidate = funnel::advance(ctx.lead.stage, ctx.slots, &self.config.funnel, true);
        let booking_ready = ctx.slots.meeting_at.is_some()
            && !ctx.slots.emails.is_empty()
            && candidate.ordinal() >= QualificationStage::Scheduling.ordinal()
            && !matches!(
                ctx.lead.stage,
                QualificationStage::Won | QualificationStage::Lost | QualificationStage::Abandoned
            );
        if booking_ready {
            let needs_booking = match self.store.active_event_for_lead(&ctx.lead.id) {
                Ok(Some(event)) => Some(event.start_at) != ctx.slots.meeting_at,
                Ok(None) => true,
                Err(_) => false,
            };
            if needs_booking {
                return Some(self.calendar_agent.as_ref());
            }
        }

        match signals.intent {
            Some(Intent::Calendar) => Some(self.calendar_agent.as_ref()),
            Some(Intent::Bill) => Some(&self.bill_agent),
            Some(Intent::Knowledge) => Some(&self.knowledge_agent),
            Some(Intent::FollowUp) => Some(&self.followup_agent),
            None if ctx.lead.stage == QualificationStage::Identifying
                && ctx.slots.name.is_some() =>
            {
                // Name just arrived: let the funnel agent move things along.
                Some(&self.qualification_agent)
            }
            None => None,
        }
    }

    /// The coordinator path: persona prompt + history + optional retrieval.
    async fn coordinator_turn(
        &self,
        ctx: &TurnContext<'_>,
        include_knowledge: bool,
    ) -> Result<SubagentOutcome> {
        let knowledge = if include_knowledge {
            self.knowledge_snippets(ctx.text).await
        } else {
            Vec::new()
        };

        let system = self.persona.build(ctx.lead, ctx.slots, &knowledge);
        let history = self.store.history(&ctx.conversation.id, HISTORY_WINDOW)?;
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .map(|m| ChatMessage {
                role: match m.direction {
                    MessageDirection::Inbound => Role::User,
                    MessageDirection::Outbound => Role::Assistant,
                },
                content: m.content.clone(),
            })
            .filter(|m| !m.content.is_empty())
            .collect();
        if messages.last().map(|m| m.role) != Some(Role::User) {
            messages.push(ChatMessage {
                role: Role::User,
                content: ctx.text.to_string(),
            });
        }

        let images = match ctx.artifact {
            Some(Artifact::Image { bytes, mime, .. }) => {
                use base64::Engine;
                vec![crate::provider::ImagePart {
                    mime: mime.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                }]
            }
            _ => Vec::new(),
        };

        let req = CompletionRequest {
            model: String::new(), // router substitutes the slot model
            system,
            messages,
            images,
            temperature: 0.6,
            max_tokens: self.config.models.max_tokens,
        };

        match self.provider.complete(&req).await {
            Ok(resp) => {
                let parsed = parse_structured(&resp.text);
                Ok(SubagentOutcome {
                    reply: parsed.reply,
                    slot_updates: parsed.slots,
                    stage_hint: parsed.stage_hint,
                    analytics: vec![(
                        "model_turn".to_string(),
                        serde_json::json!({
                            "model": resp.model,
                            "tokens_in": resp.tokens_in,
                            "tokens_out": resp.tokens_out,
                        }),
                    )],
                })
            }
            Err(e) => {
                // Router already retried and fell back; degrade to a canned
                // reply keyed to the stage.
                error!(error = %e, "all model providers failed, sending canned reply");
                Ok(SubagentOutcome {
                    reply: self
                        .qualification_agent
                        .next_question(ctx.lead.stage, ctx.slots.name.as_deref()),
                    analytics: vec![(
                        "model_degraded".to_string(),
                        serde_json::json!({ "error": e.to_string() }),
                    )],
                    ..Default::default()
                })
            }
        }
    }

    async fn knowledge_snippets(&self, query: &str) -> Vec<String> {
        self.knowledge_agent.snippets(query).await.unwrap_or_default()
    }

    async fn finish_turn(
        &self,
        event: &InboundEvent,
        lead: &Lead,
        conversation: &Conversation,
        session: AgentSession,
        reply: String,
        reply_sent: Arc<AtomicBool>,
    ) -> Result<TurnOutcome> {
        self.finish_turn_with_hint(event, lead, conversation, session, reply, None, reply_sent)
            .await
    }

    /// Advance the funnel, persist everything, emit the humanized reply, and
    /// schedule the side effects.
    #[allow(clippy::too_many_arguments)]
    async fn finish_turn_with_hint(
        &self,
        event: &InboundEvent,
        lead: &Lead,
        conversation: &Conversation,
        mut session: AgentSession,
        reply: String,
        stage_hint: Option<QualificationStage>,
        reply_sent: Arc<AtomicBool>,
    ) -> Result<TurnOutcome> {
        let now = event.server_ts;

        // Stage: funnel from slots, then the stronger of funnel and hint —
        // but only along legal transitions, and SCHEDULED needs a real event.
        let funnel_stage = funnel::advance(lead.stage, &session.slots, &self.config.funnel, true);
        let mut new_stage = match stage_hint {
            Some(hint)
                if funnel::transition_allowed(lead.stage, hint)
                    && hint.ordinal() > funnel_stage.ordinal() =>
            {
                hint
            }
            _ => funnel_stage,
        };
        if new_stage == QualificationStage::Scheduled
            && self.store.active_event_for_lead(&lead.id)?.is_none()
        {
            new_stage = QualificationStage::Scheduling;
        }
        if !funnel::transition_allowed(lead.stage, new_stage) {
            new_stage = lead.stage;
        }

        let engagement = Engagement::from_message_count(conversation.message_count + 1);
        let new_score = score::compute(&session.slots, engagement, &self.config.funnel);
        let new_temp = score::temperature(new_score, &self.config.funnel);

        let updated = self.store.update_lead(
            &lead.id,
            LeadPatch {
                display_name: session.slots.name.clone(),
                email: session.slots.emails.first().cloned(),
                stage: Some(new_stage),
                solution: session.slots.solution,
                bill_amount: session.slots.bill_amount,
                competitor_name: session.slots.competitor_name.clone(),
                competitor_discount_pct: session.slots.competitor_discount_pct,
                score: Some(new_score),
                temperature: Some(new_temp),
                crm_external_id: None,
            },
        )?;

        if new_stage != lead.stage {
            info!(
                phone = %event.phone,
                from = %lead.stage,
                to = %new_stage,
                score = new_score,
                "stage advanced"
            );
            let _ = self.store.record_event(
                "stage_transition",
                Some(&lead.id),
                serde_json::json!({ "from": lead.stage.to_string(), "to": new_stage.to_string() }),
            );
        }

        // Session context: record both turns and trim to the window.
        session.turns.push(SessionTurn {
            role: "user".to_string(),
            content: event.text.clone().unwrap_or_default(),
            at: now,
        });
        session.turns.push(SessionTurn {
            role: "assistant".to_string(),
            content: reply.clone(),
            at: Utc::now(),
        });
        session.trim(self.config.persona.session_turns);
        self.store.save_session(&session)?;

        // Emit the reply with humanized pacing.
        reply_sent.store(true, Ordering::SeqCst);
        let report = self.sender.send(&event.phone, &reply).await?;
        for id in &report.sent_ids {
            let _ = self.store.append_message(
                &conversation.id,
                MessageDirection::Outbound,
                ContentType::Text,
                &reply,
                Some(id),
            );
        }
        if !report.all_sent() {
            let _ = self.store.record_event(
                "outbound_failed",
                Some(&lead.id),
                serde_json::json!({ "failed_chunks": report.failed.len() }),
            );
        }

        self.side_effects(&updated, new_stage, now).await;

        Ok(TurnOutcome {
            reply: Some(reply),
            stage: new_stage,
            duplicate: false,
        })
    }

    /// Post-reply side effects: follow-up scheduling, invariant cleanup, CRM.
    async fn side_effects(
        &self,
        lead: &Lead,
        stage: QualificationStage,
        now: chrono::DateTime<Utc>,
    ) {
        // Mid-funnel silence gets a nudge; terminal stages must carry none.
        if matches!(
            stage,
            QualificationStage::Identifying
                | QualificationStage::DiscoveringSolution
                | QualificationStage::CapturingBill
        ) {
            if let Err(e) = self.followup_agent.ensure_reengagement(&lead.id, now) {
                warn!(lead_id = %lead.id, error = %e, "reengagement scheduling failed");
            }
        }
        if stage.is_terminal() {
            match self.store.cancel_reengagements(&lead.id) {
                Ok(n) if n > 0 => {
                    info!(lead_id = %lead.id, count = n, "reengagements canceled for terminal stage")
                }
                Err(e) => warn!(lead_id = %lead.id, error = %e, "reengagement cancel failed"),
                _ => {}
            }
        }

        // Investment leads go to a human.
        if lead.solution == SolutionChoice::Investment
            && stage == QualificationStage::Scheduling
        {
            if let Err(e) = self
                .crm_agent
                .create_handoff_task(lead, "lead de investimento")
                .await
            {
                warn!(lead_id = %lead.id, error = %e, "handoff task failed (best-effort)");
            }
        }

        // CRM sync is always best-effort.
        self.crm_agent.sync_best_effort(lead).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use solis_calendar::CalendarClient;
    use solis_core::config::{
        DatabaseConfig, FollowUpConfig, GatewayConfig, KnowledgeConfig, ModelsConfig,
        PersonaConfig, RetryConfig, ServerConfig,
    };
    use solis_core::types::Phone;
    use solis_crm::CrmClient;
    use solis_knowledge::Embedder;
    use solis_media::SpeechToText;
    use solis_whatsapp::GatewayClient;

    use crate::provider::{CompletionResponse, ProviderError};

    /// Scripted provider: returns a fixed envelope and counts invocations.
    struct ScriptedProvider {
        reply: String,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(
            &self,
            _req: &CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                text: self.reply.clone(),
                model: "scripted".to_string(),
                tokens_in: 1,
                tokens_out: 1,
            })
        }
    }

    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> solis_knowledge::Result<Vec<f32>> {
            let mut v = vec![0.0f32; solis_core::config::EMBEDDING_DIM];
            let len = v.len();
            for (i, b) in text.bytes().enumerate() {
                v[(i + b as usize) % len] += 1.0;
            }
            Ok(v)
        }
    }

    struct SilentStt;

    #[async_trait]
    impl SpeechToText for SilentStt {
        async fn transcribe(&self, _wav: &[u8]) -> solis_media::Result<String> {
            Ok("transcrito".to_string())
        }
    }

    fn test_config() -> SolisConfig {
        SolisConfig {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                instance: "test".to_string(),
                api_key: "k".to_string(),
                typing_max_ms: 1_000,
                send_ceiling_secs: 0, // skip pacing sleeps in tests
            },
            models: ModelsConfig::default(),
            knowledge: KnowledgeConfig::default(),
            funnel: solis_core::config::FunnelConfig::default(),
            followup: FollowUpConfig::default(),
            calendar: solis_core::config::CalendarConfig::default(),
            crm: solis_core::config::CrmConfig::default(),
            retry: RetryConfig {
                retry_max: 0,
                ..Default::default()
            },
            persona: PersonaConfig::default(),
        }
    }

    fn orchestrator_with(reply: &str) -> (Orchestrator, Arc<Store>, Arc<ScriptedProvider>) {
        let config = test_config();
        let store = Arc::new(Store::in_memory().unwrap());
        let provider = Arc::new(ScriptedProvider::new(reply));
        let gateway = Arc::new(GatewayClient::new("http://127.0.0.1:1", "test", "k"));
        let sender = Arc::new(HumanizedSender::new(Arc::clone(&gateway), 1_000, 0));
        let knowledge = Arc::new(
            KnowledgeStore::new(
                rusqlite::Connection::open_in_memory().unwrap(),
                Arc::new(HashEmbedder),
                config.knowledge.clone(),
            )
            .unwrap(),
        );
        let media = Arc::new(MediaPipeline::new(Arc::clone(&gateway), Arc::new(SilentStt)));
        let calendar_agent = Arc::new(CalendarAgent::new(
            Arc::new(CalendarClient::new("http://127.0.0.1:1", "k", "primary")),
            Arc::clone(&store),
            45,
        ));
        let crm_agent = Arc::new(CrmAgent::new(
            Arc::new(CrmClient::new("http://127.0.0.1:1", "k", None, &config.retry)),
            Arc::clone(&store),
        ));

        let orchestrator = Orchestrator::new(OrchestratorDeps {
            store: Arc::clone(&store),
            knowledge,
            provider: Arc::clone(&provider) as Arc<dyn ModelProvider>,
            sender,
            media,
            calendar_agent,
            crm_agent,
            config,
        });
        (orchestrator, store, provider)
    }

    fn inbound(phone: &str, text: &str, id: &str) -> InboundEvent {
        InboundEvent {
            phone: Phone::new(phone),
            push_name: None,
            content_type: ContentType::Text,
            text: Some(text.to_string()),
            media: None,
            gateway_message_id: id.to_string(),
            server_ts: Utc.with_ymd_and_hms(2025, 6, 13, 15, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn first_inbound_creates_lead_and_schedules_reengagement() {
        let (orch, store, _) =
            orchestrator_with(r#"{"reply": "Olá! Como posso te chamar?", "slots": {}}"#);
        let outcome = orch
            .handle_inbound(inbound(
                "+5581999999999",
                "Oi, quero saber sobre energia solar",
                "MSG1",
            ))
            .await
            .unwrap();

        assert!(!outcome.duplicate);
        assert_eq!(outcome.stage, QualificationStage::Identifying);

        let lead = store
            .get_lead_by_phone(&Phone::new("+5581999999999"))
            .unwrap()
            .unwrap();
        assert_eq!(lead.stage, QualificationStage::Identifying);
        assert!(store.has_pending_reengagement(&lead.id).unwrap());
    }

    #[tokio::test]
    async fn duplicate_gateway_id_is_a_noop() {
        let (orch, store, _) = orchestrator_with(r#"{"reply": "Oi!", "slots": {}}"#);
        let first = orch
            .handle_inbound(inbound("+5581988888888", "Oi", "DUP1"))
            .await
            .unwrap();
        assert!(!first.duplicate);

        let second = orch
            .handle_inbound(inbound("+5581988888888", "Oi", "DUP1"))
            .await
            .unwrap();
        assert!(second.duplicate);
        assert!(second.reply.is_none());

        let lead = store
            .get_lead_by_phone(&Phone::new("+5581988888888"))
            .unwrap()
            .unwrap();
        let conv = store.conversation_for_lead(&lead.id).unwrap();
        let inbound_rows: Vec<_> = store
            .history(&conv.id, 100)
            .unwrap()
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Inbound)
            .collect();
        assert_eq!(inbound_rows.len(), 1);
    }

    #[tokio::test]
    async fn guard_rails_refuse_without_a_model_call() {
        let (orch, store, provider) = orchestrator_with(r#"{"reply": "nunca", "slots": {}}"#);
        let outcome = orch
            .handle_inbound(inbound(
                "+5581977777777",
                "Me envia seu CPF para cadastro",
                "G1",
            ))
            .await
            .unwrap();

        let reply = outcome.reply.unwrap();
        assert!(reply.contains("segurança"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0, "model must not run");

        let lead = store
            .get_lead_by_phone(&Phone::new("+5581977777777"))
            .unwrap()
            .unwrap();
        let _ = lead; // guard refusals still create the lead row
    }

    #[tokio::test]
    async fn funnel_progresses_across_turns() {
        let (orch, store, _) = orchestrator_with(r#"{"reply": "Entendi!", "slots": {}}"#);
        let phone = "+5581966666666";

        orch.handle_inbound(inbound(phone, "Oi, quero saber sobre energia solar", "F1"))
            .await
            .unwrap();
        orch.handle_inbound(inbound(phone, "Meu nome é João", "F2"))
            .await
            .unwrap();
        orch.handle_inbound(inbound(phone, "Quero uma usina própria", "F3"))
            .await
            .unwrap();
        orch.handle_inbound(inbound(phone, "Pago R$ 850", "F4"))
            .await
            .unwrap();
        let outcome = orch
            .handle_inbound(inbound(phone, "Tenho desconto de 10% com a Origo", "F5"))
            .await
            .unwrap();

        assert_eq!(outcome.stage, QualificationStage::Scheduling);
        let lead = store.get_lead_by_phone(&Phone::new(phone)).unwrap().unwrap();
        assert_eq!(lead.display_name.as_deref(), Some("João"));
        assert_eq!(lead.solution, SolutionChoice::OwnPlant);
        assert_eq!(lead.bill_amount, Some(850.0));
        assert!(lead.score >= 60, "score was {}", lead.score);
    }

    #[tokio::test]
    async fn plain_prose_model_reply_still_flows() {
        let (orch, _, _) = orchestrator_with("Olá! Tudo bem por aí?");
        let outcome = orch
            .handle_inbound(inbound("+5581955555555", "Oi", "P1"))
            .await
            .unwrap();
        assert_eq!(outcome.reply.as_deref(), Some("Olá! Tudo bem por aí?"));
    }
}
