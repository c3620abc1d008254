//! Provider failover: primary → fallback, with per-slot retries.
//!
//! Each slot gets its configured retries with jittered exponential backoff;
//! a rate-limit response skips straight to the next provider. The model id is
//! a property of the slot, so the fallback runs with its own model.

use async_trait::async_trait;
use tracing::{info, warn};

use solis_core::backoff::Backoff;

use crate::provider::{CompletionRequest, CompletionResponse, ModelProvider, ProviderError};

pub struct ProviderSlot {
    pub provider: Box<dyn ModelProvider>,
    /// Model id used when this slot serves the request.
    pub model: String,
    pub max_retries: u32,
}

impl ProviderSlot {
    pub fn new(provider: Box<dyn ModelProvider>, model: &str, max_retries: u32) -> Self {
        Self {
            provider,
            model: model.to_string(),
            max_retries,
        }
    }
}

pub struct ModelRouter {
    slots: Vec<ProviderSlot>,
    backoff: Backoff,
}

impl ModelRouter {
    /// At least one slot is required.
    pub fn new(slots: Vec<ProviderSlot>) -> Self {
        assert!(!slots.is_empty(), "ModelRouter requires at least one provider slot");
        Self {
            slots,
            backoff: Backoff::default(),
        }
    }
}

#[async_trait]
impl ModelProvider for ModelRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for slot in &self.slots {
            let provider_name = slot.provider.name();
            let slot_req = CompletionRequest {
                model: slot.model.clone(),
                ..req.clone()
            };

            for attempt in 0..=slot.max_retries {
                match slot.provider.complete(&slot_req).await {
                    Ok(resp) => {
                        if attempt > 0 {
                            info!(provider = %provider_name, attempt, "request succeeded after retry");
                        }
                        return Ok(resp);
                    }
                    Err(e) => {
                        warn!(provider = %provider_name, attempt, err = %e, "provider call failed");

                        // Rate limits burn the whole slot — move on rather
                        // than queueing behind the window.
                        if matches!(e, ProviderError::RateLimited { .. }) {
                            last_err = Some(e);
                            break;
                        }
                        let retryable = e.is_retryable();
                        last_err = Some(e);
                        if !retryable || attempt >= slot.max_retries {
                            break;
                        }
                        tokio::time::sleep(self.backoff.delay(attempt)).await;
                    }
                }
            }

            info!(provider = %provider_name, "provider exhausted, trying next");
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all providers failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatMessage, Role};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFail;

    #[async_trait]
    impl ModelProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn complete(
            &self,
            _req: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Err(ProviderError::Unavailable("intentional failure".to_string()))
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl ModelProvider for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        async fn complete(
            &self,
            req: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                text: "ok".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
            })
        }
    }

    struct FailThenOk {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelProvider for FailThenOk {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn complete(
            &self,
            req: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                })
            } else {
                Ok(CompletionResponse {
                    text: "recovered".to_string(),
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                })
            }
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "unset".to_string(),
            system: "persona".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "oi".to_string(),
            }],
            images: vec![],
            temperature: 0.4,
            max_tokens: 128,
        }
    }

    #[tokio::test]
    async fn falls_back_to_second_slot() {
        let router = ModelRouter::new(vec![
            ProviderSlot::new(Box::new(AlwaysFail), "primary-model", 0),
            ProviderSlot::new(Box::new(AlwaysOk), "fallback-model", 0),
        ]);
        let resp = router.complete(&request()).await.unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(resp.model, "fallback-model");
    }

    #[tokio::test]
    async fn retries_transient_errors_on_same_slot() {
        let router = ModelRouter::new(vec![ProviderSlot::new(
            Box::new(FailThenOk {
                calls: AtomicU32::new(0),
            }),
            "m",
            2,
        )]);
        let resp = router.complete(&request()).await.unwrap();
        assert_eq!(resp.text, "recovered");
    }

    #[tokio::test]
    async fn errors_when_all_slots_fail() {
        let router = ModelRouter::new(vec![
            ProviderSlot::new(Box::new(AlwaysFail), "a", 0),
            ProviderSlot::new(Box::new(AlwaysFail), "b", 0),
        ]);
        assert!(router.complete(&request()).await.is_err());
    }
}
