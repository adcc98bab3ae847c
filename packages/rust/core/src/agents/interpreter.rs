//! Turns upstream findings into prose through the text generator.

use std::sync::Arc;

use async_trait::async_trait;
use augur_contract::Agent;
use augur_shared::{AgentContext, AgentRequest, AgentResponse, AugurError, Result, method};
use serde_json::json;
use tracing::debug;

use super::{INTERPRETER, mean_confidence, themes, upstream_lines};
use crate::llm::{GenerationSettings, TextGenerator};
use crate::retrieval::{Embedder, SimilarityMatch, SimilaritySearch};

const SYSTEM_PROMPT: &str = "You interpret structured findings from several symbolic frameworks. \
Stay grounded in the findings you are given, note where they agree, and answer in plain prose.";

/// Similarity lookup used to add reference passages to the prompt.
#[derive(Clone)]
pub struct Retrieval {
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn SimilaritySearch>,
    pub limit: usize,
    pub threshold: f32,
}

impl Retrieval {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn SimilaritySearch>) -> Self {
        Self {
            embedder,
            index,
            limit: 3,
            threshold: 0.2,
        }
    }

    async fn lookup(&self, text: &str) -> Result<Vec<SimilarityMatch>> {
        let embedding = self.embedder.embed(text).await?;
        self.index.search(&embedding, self.limit, self.threshold).await
    }
}

pub struct Interpreter {
    generator: Arc<dyn TextGenerator>,
    settings: GenerationSettings,
    retrieval: Option<Retrieval>,
}

impl Interpreter {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: GenerationSettings) -> Self {
        Self {
            generator,
            settings,
            retrieval: None,
        }
    }

    pub fn with_retrieval(mut self, retrieval: Retrieval) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    async fn passages(&self, context: &AgentContext) -> Result<Vec<SimilarityMatch>> {
        let Some(retrieval) = &self.retrieval else {
            return Ok(Vec::new());
        };

        let mut probe = context.user_query.clone().unwrap_or_default();
        for theme in themes(context) {
            probe.push(' ');
            probe.push_str(theme);
        }
        if probe.trim().is_empty() {
            return Ok(Vec::new());
        }
        retrieval.lookup(probe.trim()).await
    }
}

fn prompt(context: &AgentContext, passages: &[SimilarityMatch]) -> String {
    let mut prompt = String::new();
    if let Some(query) = context.user_query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        prompt.push_str(&format!("Question: {query}\n\n"));
    }

    let lines = upstream_lines(context);
    if !lines.is_empty() {
        prompt.push_str("Findings:\n");
        prompt.push_str(&lines.join("\n"));
        prompt.push_str("\n\n");
    }

    let themes = themes(context);
    if !themes.is_empty() {
        prompt.push_str(&format!("Journal themes: {}\n\n", themes.join(", ")));
    }

    if !passages.is_empty() {
        prompt.push_str("Reference passages:\n");
        for passage in passages {
            prompt.push_str(&format!("- [{}] {}\n", passage.id, passage.text));
        }
        prompt.push('\n');
    }

    prompt.push_str("Interpret these findings together in a short paragraph.");
    prompt
}

#[async_trait]
impl Agent for Interpreter {
    fn name(&self) -> &str {
        INTERPRETER
    }

    fn description(&self) -> &str {
        "generated reading of upstream findings, optionally with retrieved passages"
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let context = &request.context;
        let has_query = context
            .user_query
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty());
        if !has_query && context.upstream_entries().next().is_none() {
            return Err(AugurError::stage(INTERPRETER, "nothing to interpret"));
        }

        let passages = self.passages(context).await?;
        debug!(passages = passages.len(), "building interpreter prompt");

        let generation = self
            .generator
            .generate(self.settings.request(prompt(context, &passages), Some(SYSTEM_PROMPT)))
            .await?;

        let text = generation.text.trim();
        if text.is_empty() {
            return Err(AugurError::stage(INTERPRETER, "generator returned empty text"));
        }

        let mut response = AgentResponse::new(text, method::GENERATED)
            .with_calculation(json!({
                "usage": generation.usage,
                "passages": passages.iter().map(|p| json!({"id": p.id, "score": p.score})).collect::<Vec<_>>(),
            }))
            .with_correlations(passages.iter().map(|p| format!("passage:{}", p.id)).collect());
        if let Some(confidence) = mean_confidence(context) {
            response = response.with_confidence(confidence);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationError;
    use crate::retrieval::{HashingEmbedder, InMemoryIndex};
    use crate::testing::StubGenerator;

    fn request(query: &str) -> AgentRequest {
        let mut context = AgentContext::query(query);
        context.insert_upstream(
            "calculator",
            AgentResponse::new("Born in spring", method::DETERMINISTIC).with_confidence(0.8),
        );
        AgentRequest::new(INTERPRETER, context)
    }

    #[tokio::test]
    async fn prompts_with_query_and_findings() {
        let generator = StubGenerator::replying("  A season of renewal.  ");
        let agent = Interpreter::new(generator.clone(), GenerationSettings::default());

        let response = agent.execute(&request("What now?")).await.unwrap();
        assert_eq!(response.interpretation_seed, "A season of renewal.");
        assert_eq!(response.method, method::GENERATED);
        assert_eq!(response.confidence, Some(0.8));

        let prompt = generator.last_prompt().unwrap();
        assert!(prompt.starts_with("Question: What now?"));
        assert!(prompt.contains("- calculator: Born in spring"));
        assert!(!prompt.contains("Reference passages"));
        let sent = generator.requests.lock().unwrap();
        assert_eq!(sent[0].system.as_deref(), Some(SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn includes_retrieved_passages() {
        let embedder = Arc::new(HashingEmbedder::new(4096));
        let index = Arc::new(InMemoryIndex::new());
        index
            .insert_text(embedder.as_ref(), "renewal", "spring brings renewal")
            .await
            .unwrap();
        index
            .insert_text(embedder.as_ref(), "tax", "quarterly tax filing")
            .await
            .unwrap();

        let generator = StubGenerator::replying("ok");
        let agent = Interpreter::new(generator.clone(), GenerationSettings::default())
            .with_retrieval(Retrieval::new(embedder, index));

        let response = agent.execute(&request("renewal in spring")).await.unwrap();
        assert_eq!(response.correlations, vec!["passage:renewal"]);
        let prompt = generator.last_prompt().unwrap();
        assert!(prompt.contains("- [renewal] spring brings renewal"));
        assert!(!prompt.contains("tax"));
    }

    #[tokio::test]
    async fn generation_failure_is_an_error() {
        let agent = Interpreter::new(
            StubGenerator::failing(GenerationError::RateLimited("slow down".into())),
            GenerationSettings::default(),
        );
        let err = agent.execute(&request("q")).await.unwrap_err();
        assert!(matches!(err, AugurError::Generation(ref m) if m.contains("slow down")));
    }

    #[tokio::test]
    async fn empty_request_fails_without_calling_generator() {
        let generator = StubGenerator::replying("unused");
        let agent = Interpreter::new(generator.clone(), GenerationSettings::default());
        let err = agent
            .execute(&AgentRequest::new(INTERPRETER, AgentContext::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AugurError::StageExecution { .. }));
        assert!(generator.last_prompt().is_none());
    }
}
