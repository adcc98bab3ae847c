//! Deterministic stand-ins for agents and collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use augur_contract::{Agent, AgentRegistry};
use augur_shared::{AgentRequest, AgentResponse, AugurError, Result, method};

use crate::llm::{Generation, GenerationError, GenerationRequest, TextGenerator, TokenUsage};

#[derive(Clone)]
enum Behavior {
    Echo,
    Fail(String),
    Invalid,
    Hang,
}

/// Configurable agent that counts its executions.
#[derive(Clone)]
pub(crate) struct StubAgent {
    name: String,
    delay: Duration,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl StubAgent {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            behavior: Behavior::Echo,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_delay(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub(crate) fn failing(mut self, message: &str) -> Self {
        self.behavior = Behavior::Fail(message.into());
        self
    }

    pub(crate) fn invalid(mut self) -> Self {
        self.behavior = Behavior::Invalid;
        self
    }

    pub(crate) fn hanging(mut self) -> Self {
        self.behavior = Behavior::Hang;
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Agent for StubAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.behavior {
            Behavior::Echo => {
                let inputs = request
                    .context
                    .upstream_entries()
                    .map(|(name, r)| format!("{name}={}", r.interpretation_seed))
                    .collect::<Vec<_>>()
                    .join(",");
                let query = request.context.user_query.as_deref().unwrap_or_default();
                let seed = format!("{}[{query}]({inputs})", self.name);
                Ok(AgentResponse::new(seed, method::DETERMINISTIC)
                    .with_calculation(serde_json::json!({"stage": self.name}))
                    .with_correlations(vec![format!("{} ran", self.name)])
                    .with_confidence(0.5))
            }
            Behavior::Fail(message) => Err(AugurError::stage(&self.name, message.clone())),
            Behavior::Invalid => Ok(AgentResponse::new("", "")),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

pub(crate) fn registry_of(agents: impl IntoIterator<Item = StubAgent>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent).expect("register stub");
    }
    registry
}

/// Text generator that replies from a script and records every request.
pub(crate) struct StubGenerator {
    reply: std::result::Result<String, GenerationError>,
    pub(crate) requests: Mutex<Vec<GenerationRequest>>,
}

impl StubGenerator {
    pub(crate) fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing(error: GenerationError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(error),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .last()
            .map(|r| r.prompt.clone())
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<Generation, GenerationError> {
        let prompt_tokens = request.prompt.split_whitespace().count() as u32;
        self.requests.lock().expect("requests lock").push(request);
        let text = self.reply.clone()?;
        Ok(Generation {
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens: text.split_whitespace().count() as u32,
            },
            text,
        })
    }
}
