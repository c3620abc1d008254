use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::quiet::QuietHours;

// Hard limits that are not worth a config knob.
pub const EMBEDDING_DIM: usize = 768; // dimension of the external embedder
pub const HISTORY_WINDOW: usize = 100; // max messages loaded per turn
pub const DEDUPE_TTL_SECS: i64 = 3600; // webhook id dedupe window
pub const TURN_BUDGET_SECS: u64 = 45; // whole-turn deadline

/// Top-level config (solis.toml + SOLIS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolisConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub followup: FollowUpConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret the gateway must present on webhook POSTs.
    /// `None` disables verification (trusted-network deployments only).
    pub webhook_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            webhook_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// WhatsApp bridge connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the bridge HTTP API.
    pub base_url: String,
    /// Instance identifier within the bridge.
    pub instance: String,
    /// API key sent as `apikey` header and attached to media downloads.
    pub api_key: String,
    /// Ceiling for a single typing indicator, in milliseconds.
    #[serde(default = "default_typing_max_ms")]
    pub typing_max_ms: u64,
    /// Hard ceiling for one humanized reply end-to-end, in seconds.
    #[serde(default = "default_send_ceiling_secs")]
    pub send_ceiling_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_primary_id")]
    pub primary_id: String,
    #[serde(default = "default_fallback_id")]
    pub fallback_id: String,
    /// Must equal [`EMBEDDING_DIM`]; checked at startup.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
    /// Requests per second granted to each provider's token bucket.
    #[serde(default = "default_model_rate")]
    pub rate_per_sec: f64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            primary_id: default_primary_id(),
            fallback_id: default_fallback_id(),
            embedding_dim: default_embedding_dim(),
            max_tokens: default_max_tokens(),
            gemini_api_key: None,
            anthropic_api_key: None,
            gemini_base_url: default_gemini_base_url(),
            anthropic_base_url: default_anthropic_base_url(),
            rate_per_sec: default_model_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_topk")]
    pub topk: usize,
    /// Weight of the vector score in the hybrid blend (lexical gets 1-α).
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            topk: default_topk(),
            hybrid_alpha: default_hybrid_alpha(),
            min_score: default_min_score(),
        }
    }
}

/// Funnel thresholds and score weights (§ scoring schema; numbers are tunable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelConfig {
    /// Monthly bill (R$) required to advance past CAPTURING_BILL.
    #[serde(default = "default_min_bill")]
    pub min_bill_threshold: f64,
    /// Bill amount granting the full bill score.
    #[serde(default = "default_full_bill")]
    pub full_bill_amount: f64,
    /// Competitor discount (pct) below which the lead is still attractive.
    #[serde(default = "default_competitor_pct")]
    pub competitor_pct_threshold: f64,
    #[serde(default = "default_hot_score_min")]
    pub hot_score_min: u8,
    pub w_name: u8,
    pub w_bill_max: u8,
    pub w_solution_preferred: u8,
    pub w_solution_known: u8,
    pub w_no_competitor: u8,
    pub w_weak_competitor: u8,
    /// Hours without an inbound message before a lead counts as dormant.
    #[serde(default = "default_dormant_hours")]
    pub dormant_after_hours: i64,
    /// What a past, un-held meeting does to the lead.
    #[serde(default)]
    pub missed_meeting_policy: MissedMeetingPolicy,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            min_bill_threshold: default_min_bill(),
            full_bill_amount: default_full_bill(),
            competitor_pct_threshold: default_competitor_pct(),
            hot_score_min: default_hot_score_min(),
            w_name: 10,
            w_bill_max: 40,
            w_solution_preferred: 20,
            w_solution_known: 10,
            w_no_competitor: 15,
            w_weak_competitor: 20,
            dormant_after_hours: default_dormant_hours(),
            missed_meeting_policy: MissedMeetingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissedMeetingPolicy {
    /// Loop back to SCHEDULING and try to rebook.
    #[default]
    Reschedule,
    /// Close the lead as LOST.
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpConfig {
    #[serde(default = "default_followup_tick")]
    pub tick_sec: u64,
    #[serde(default = "default_reminder_tick")]
    pub reminder_tick_sec: u64,
    #[serde(default = "default_batch")]
    pub batch: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// `"HH:MM-HH:MM"`; due rows inside the window slide to its opening.
    #[serde(default = "default_quiet_hours")]
    pub quiet_hours: String,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            tick_sec: default_followup_tick(),
            reminder_tick_sec: default_reminder_tick(),
            batch: default_batch(),
            max_attempts: default_max_attempts(),
            quiet_hours: default_quiet_hours(),
        }
    }
}

impl FollowUpConfig {
    pub fn quiet_hours(&self) -> Result<QuietHours, crate::error::SolisError> {
        QuietHours::parse(&self.quiet_hours).map_err(crate::error::SolisError::Config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub calendar_id: Option<String>,
    #[serde(default = "default_calendar_sync")]
    pub sync_sec: u64,
    #[serde(default = "default_meeting_minutes")]
    pub meeting_minutes: i64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            calendar_id: None,
            sync_sec: default_calendar_sync(),
            meeting_minutes: default_meeting_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CrmConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// External pipeline id the funnel stages map into.
    pub pipeline_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default = "default_circuit_fails")]
    pub circuit_fails: u32,
    #[serde(default = "default_circuit_cooldown")]
    pub circuit_cooldown_sec: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_max: default_retry_max(),
            circuit_fails: default_circuit_fails(),
            circuit_cooldown_sec: default_circuit_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Markdown persona file loaded at startup. Missing file falls back to a
    /// built-in minimal persona.
    #[serde(default = "default_persona_path")]
    pub path: String,
    /// Turns kept in the working session context.
    #[serde(default = "default_session_turns")]
    pub session_turns: usize,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            path: default_persona_path(),
            session_turns: default_session_turns(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8330
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.solis/solis.db")
}
fn default_typing_max_ms() -> u64 {
    5_000
}
fn default_send_ceiling_secs() -> u64 {
    12
}
fn default_primary_id() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_fallback_id() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_embedding_dim() -> usize {
    EMBEDDING_DIM
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_model_rate() -> f64 {
    2.0
}
fn default_topk() -> usize {
    5
}
fn default_hybrid_alpha() -> f32 {
    0.6
}
fn default_min_score() -> f32 {
    0.35
}
fn default_min_bill() -> f64 {
    400.0
}
fn default_full_bill() -> f64 {
    4000.0
}
fn default_competitor_pct() -> f64 {
    15.0
}
fn default_hot_score_min() -> u8 {
    80
}
fn default_dormant_hours() -> i64 {
    48
}
fn default_followup_tick() -> u64 {
    60
}
fn default_reminder_tick() -> u64 {
    60
}
fn default_batch() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_quiet_hours() -> String {
    "20:00-08:00".to_string()
}
fn default_calendar_sync() -> u64 {
    300
}
fn default_meeting_minutes() -> i64 {
    45
}
fn default_retry_max() -> u32 {
    3
}
fn default_circuit_fails() -> u32 {
    5
}
fn default_circuit_cooldown() -> u64 {
    60
}
fn default_persona_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.solis/persona.md")
}
fn default_session_turns() -> usize {
    20
}

/// Bare env-var names honored without the SOLIS_ prefix, mapped onto config
/// paths. These are the knobs operators set in deployment manifests.
const BARE_ENV_KEYS: &[(&str, &str)] = &[
    ("MODEL_PRIMARY_ID", "models.primary_id"),
    ("MODEL_FALLBACK_ID", "models.fallback_id"),
    ("EMBEDDING_DIM", "models.embedding_dim"),
    ("FOLLOWUP_TICK_SEC", "followup.tick_sec"),
    ("REMINDER_TICK_SEC", "followup.reminder_tick_sec"),
    ("CALENDAR_SYNC_SEC", "calendar.sync_sec"),
    ("QUIET_HOURS", "followup.quiet_hours"),
    ("TYPING_MAX_MS", "gateway.typing_max_ms"),
    ("MIN_BILL_THRESHOLD", "funnel.min_bill_threshold"),
    ("HOT_SCORE_MIN", "funnel.hot_score_min"),
    ("KNOWLEDGE_TOPK", "knowledge.topk"),
    ("HYBRID_ALPHA", "knowledge.hybrid_alpha"),
    ("RETRY_MAX", "retry.retry_max"),
    ("CIRCUIT_FAILS", "retry.circuit_fails"),
    ("CIRCUIT_COOLDOWN_SEC", "retry.circuit_cooldown_sec"),
];

impl SolisConfig {
    /// Load config, environment-first:
    ///   solis.toml < SOLIS_SECTION__KEY vars < bare deployment vars.
    ///
    /// Checks in order for the file:
    ///   1. Explicit path argument
    ///   2. SOLIS_CONFIG env var
    ///   3. ~/.solis/solis.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("SOLIS_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let mut figment = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SOLIS_").split("__"));

        for (var, key) in BARE_ENV_KEYS {
            if let Ok(val) = std::env::var(var) {
                // Numbers must land as numbers or serde rejects the field.
                figment = if let Ok(n) = val.parse::<i64>() {
                    figment.merge(figment::providers::Serialized::global(key, n))
                } else if let Ok(f) = val.parse::<f64>() {
                    figment.merge(figment::providers::Serialized::global(key, f))
                } else {
                    figment.merge(figment::providers::Serialized::global(key, val))
                };
            }
        }

        let config: SolisConfig = figment
            .extract()
            .map_err(|e| crate::error::SolisError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Startup-only sanity checks; failures here exit non-zero before serving.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.models.embedding_dim != EMBEDDING_DIM {
            return Err(crate::error::SolisError::Config(format!(
                "embedding_dim must be {EMBEDDING_DIM}, got {}",
                self.models.embedding_dim
            )));
        }
        if !(0.0..=1.0).contains(&self.knowledge.hybrid_alpha) {
            return Err(crate::error::SolisError::Config(format!(
                "hybrid_alpha must be in [0,1], got {}",
                self.knowledge.hybrid_alpha
            )));
        }
        self.followup.quiet_hours()?;
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.solis/solis.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SolisConfig {
        SolisConfig {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig {
                base_url: "http://bridge:8080".to_string(),
                instance: "main".to_string(),
                api_key: "k".to_string(),
                typing_max_ms: default_typing_max_ms(),
                send_ceiling_secs: default_send_ceiling_secs(),
            },
            models: ModelsConfig::default(),
            knowledge: KnowledgeConfig::default(),
            funnel: FunnelConfig::default(),
            followup: FollowUpConfig::default(),
            calendar: CalendarConfig::default(),
            crm: CrmConfig::default(),
            retry: RetryConfig::default(),
            persona: PersonaConfig::default(),
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn wrong_embedding_dim_is_fatal() {
        let mut cfg = base_config();
        cfg.models.embedding_dim = 1536;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn alpha_out_of_range_is_fatal() {
        let mut cfg = base_config();
        cfg.knowledge.hybrid_alpha = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_quiet_hours_is_fatal() {
        let mut cfg = base_config();
        cfg.followup.quiet_hours = "night".to_string();
        assert!(cfg.validate().is_err());
    }
}
