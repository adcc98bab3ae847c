//! Final answer generation.

use std::sync::Arc;

use async_trait::async_trait;
use augur_contract::Agent;
use augur_shared::{AgentRequest, AgentResponse, AugurError, Result, method};
use serde_json::json;

use super::{ORACLE, SYNTHESIZER, upstream_lines};
use crate::llm::{GenerationSettings, TextGenerator};

const SYSTEM_PROMPT: &str = "You are a thoughtful guide. Answer the user's question using only \
the reading provided. Be specific and kind, and keep it under two paragraphs.";

/// Answers the user's question from the synthesized reading.
pub struct Oracle {
    generator: Arc<dyn TextGenerator>,
    settings: GenerationSettings,
}

impl Oracle {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: GenerationSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }
}

#[async_trait]
impl Agent for Oracle {
    fn name(&self) -> &str {
        ORACLE
    }

    fn description(&self) -> &str {
        "generated answer to the user's question from the synthesized reading"
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let context = &request.context;

        // Prefer the synthesizer's handoff; fall back to every upstream seed.
        let reading = match context.upstream(SYNTHESIZER) {
            Some(synthesis) => synthesis.interpretation_seed.trim().to_string(),
            None => upstream_lines(context).join("\n"),
        };
        let query = context
            .user_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());

        if reading.is_empty() && query.is_none() {
            return Err(AugurError::stage(ORACLE, "needs a reading or a question"));
        }

        let mut prompt = String::new();
        if !reading.is_empty() {
            prompt.push_str(&format!("Reading:\n{reading}\n\n"));
        }
        prompt.push_str(&format!(
            "Question: {}",
            query.unwrap_or("What does this reading suggest for me today?")
        ));

        let generation = self
            .generator
            .generate(self.settings.request(prompt, Some(SYSTEM_PROMPT)))
            .await?;
        let text = generation.text.trim();
        if text.is_empty() {
            return Err(AugurError::stage(ORACLE, "generator returned empty text"));
        }

        let mut response = AgentResponse::new(text, method::GENERATED)
            .with_calculation(json!({ "usage": generation.usage }));
        if let Some(synthesis) = context.upstream(SYNTHESIZER) {
            response = response.with_correlations(synthesis.correlations.clone());
            if let Some(confidence) = synthesis.confidence {
                response = response.with_confidence(confidence);
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubGenerator;
    use augur_shared::AgentContext;

    #[tokio::test]
    async fn answers_from_the_synthesis() {
        let generator = StubGenerator::replying("Slow down and rest.");
        let oracle = Oracle::new(generator.clone(), GenerationSettings::default());

        let mut context = AgentContext::query("How should I spend the week?");
        context.insert_upstream(
            SYNTHESIZER,
            AgentResponse::new("[calculator] Born in spring.", method::COMPOSED)
                .with_correlations(vec!["season:spring".into()])
                .with_confidence(0.7),
        );
        context.insert_upstream("other", AgentResponse::new("ignored", method::DETERMINISTIC));

        let response = oracle
            .execute(&AgentRequest::new(ORACLE, context))
            .await
            .unwrap();
        assert_eq!(response.interpretation_seed, "Slow down and rest.");
        assert_eq!(response.correlations, vec!["season:spring"]);
        assert_eq!(response.confidence, Some(0.7));

        let prompt = generator.last_prompt().unwrap();
        assert_eq!(
            prompt,
            "Reading:\n[calculator] Born in spring.\n\nQuestion: How should I spend the week?"
        );
    }

    #[tokio::test]
    async fn falls_back_to_default_question() {
        let generator = StubGenerator::replying("ok");
        let oracle = Oracle::new(generator.clone(), GenerationSettings::default());
        let mut context = AgentContext::default();
        context.insert_upstream("calculator", AgentResponse::new("Born in spring.", method::DETERMINISTIC));

        oracle
            .execute(&AgentRequest::new(ORACLE, context))
            .await
            .unwrap();
        let prompt = generator.last_prompt().unwrap();
        assert!(prompt.contains("- calculator: Born in spring."));
        assert!(prompt.ends_with("What does this reading suggest for me today?"));
    }

    #[tokio::test]
    async fn blank_generation_fails() {
        let oracle = Oracle::new(StubGenerator::replying("   "), GenerationSettings::default());
        let err = oracle
            .execute(&AgentRequest::new(ORACLE, AgentContext::query("hi")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty text"));
    }
}
