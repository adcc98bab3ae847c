//! Deterministic merge of every upstream result.

use async_trait::async_trait;
use augur_contract::Agent;
use augur_shared::{AgentRequest, AgentResponse, AugurError, Result, method};
use serde_json::json;

use super::{SYNTHESIZER, mean_confidence};

#[derive(Debug, Clone, Copy, Default)]
pub struct Synthesizer;

#[async_trait]
impl Agent for Synthesizer {
    fn name(&self) -> &str {
        SYNTHESIZER
    }

    fn description(&self) -> &str {
        "composes upstream seeds and correlations into one handoff"
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let context = &request.context;
        if context.upstream_entries().next().is_none() {
            return Err(AugurError::stage(SYNTHESIZER, "no upstream results to synthesize"));
        }

        let mut sources = Vec::new();
        let mut sections = Vec::new();
        let mut correlations: Vec<String> = Vec::new();

        for (name, response) in context.upstream_entries() {
            sources.push(name.as_str());
            sections.push(format!("[{name}] {}", response.interpretation_seed.trim()));
            for link in &response.correlations {
                if !correlations.contains(link) {
                    correlations.push(link.clone());
                }
            }
        }

        let mut response = AgentResponse::new(sections.join("\n"), method::COMPOSED)
            .with_calculation(json!({ "sources": sources }))
            .with_correlations(correlations);
        if let Some(confidence) = mean_confidence(context) {
            response = response.with_confidence(confidence);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_shared::AgentContext;

    #[tokio::test]
    async fn merges_in_name_order_and_dedupes() {
        let mut context = AgentContext::default();
        context.insert_upstream(
            "zodiac",
            AgentResponse::new("Fire sign.", method::DETERMINISTIC)
                .with_correlations(vec!["season:spring".into(), "element:fire".into()])
                .with_confidence(0.9),
        );
        context.insert_upstream(
            "calculator",
            AgentResponse::new(" Born in spring. ", method::DETERMINISTIC)
                .with_correlations(vec!["season:spring".into()])
                .with_confidence(0.5),
        );

        let response = Synthesizer
            .execute(&AgentRequest::new(SYNTHESIZER, context))
            .await
            .unwrap();

        assert_eq!(
            response.interpretation_seed,
            "[calculator] Born in spring.\n[zodiac] Fire sign."
        );
        assert_eq!(response.correlations, vec!["season:spring", "element:fire"]);
        assert!((response.confidence.unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(response.method, method::COMPOSED);
        assert_eq!(
            response.calculation.unwrap()["sources"],
            json!(["calculator", "zodiac"])
        );
    }

    #[tokio::test]
    async fn nothing_upstream_fails() {
        let err = Synthesizer
            .execute(&AgentRequest::new(SYNTHESIZER, AgentContext::query("hi")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no upstream results"));
    }
}
