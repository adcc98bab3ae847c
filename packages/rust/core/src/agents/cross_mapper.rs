//! Links journal themes and upstream frameworks to each other.

use std::collections::BTreeMap;

use async_trait::async_trait;
use augur_contract::Agent;
use augur_shared::{AgentRequest, AgentResponse, AugurError, Result, method};
use serde_json::{Value, json};

use super::{CROSS_MAPPER, themes};

#[derive(Debug, Clone, Copy, Default)]
pub struct CrossMapper;

fn mentions(response: &AgentResponse, needle: &str) -> bool {
    response.interpretation_seed.to_lowercase().contains(needle)
        || response
            .correlations
            .iter()
            .any(|c| c.to_lowercase().contains(needle))
}

fn calculation_keys(response: &AgentResponse) -> Vec<&str> {
    match &response.calculation {
        Some(Value::Object(map)) => map.keys().map(String::as_str).collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Agent for CrossMapper {
    fn name(&self) -> &str {
        CROSS_MAPPER
    }

    fn description(&self) -> &str {
        "links journal themes to upstream frameworks that mention them"
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let context = &request.context;
        let themes = themes(context);
        let upstream: Vec<(&String, &AgentResponse)> = context.upstream_entries().collect();

        if themes.is_empty() && upstream.is_empty() {
            return Err(AugurError::stage(
                CROSS_MAPPER,
                "needs journal themes or upstream results to map",
            ));
        }

        let mut correlations = Vec::new();
        let mut matched: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut unmatched = Vec::new();

        for theme in &themes {
            let needle = theme.to_lowercase();
            let hits: Vec<&str> = upstream
                .iter()
                .filter(|(_, r)| mentions(r, &needle))
                .map(|(name, _)| name.as_str())
                .collect();
            if hits.is_empty() {
                unmatched.push(*theme);
                continue;
            }
            for name in &hits {
                correlations.push(format!("theme:{theme} -> {name}"));
            }
            matched.insert(*theme, hits);
        }

        let mut shared = Vec::new();
        for (i, (left, l)) in upstream.iter().enumerate() {
            let left_keys = calculation_keys(l);
            for (right, r) in &upstream[i + 1..] {
                let common: Vec<&str> = calculation_keys(r)
                    .into_iter()
                    .filter(|k| left_keys.contains(k))
                    .collect();
                if !common.is_empty() {
                    correlations.push(format!("{left} <-> {right}: {}", common.join(", ")));
                    shared.push(json!({"between": [left, right], "keys": common}));
                }
            }
        }

        let seed = if correlations.is_empty() {
            format!(
                "No cross-framework links found across {} theme(s) and {} upstream result(s).",
                themes.len(),
                upstream.len()
            )
        } else {
            let mut seed = format!("{} cross-framework link(s):", correlations.len());
            for link in &correlations {
                seed.push_str("\n- ");
                seed.push_str(link);
            }
            seed
        };

        let confidence = if themes.is_empty() {
            if shared.is_empty() { 0.3 } else { 0.6 }
        } else {
            matched.len() as f64 / themes.len() as f64
        };

        Ok(AgentResponse::new(seed, method::DETERMINISTIC)
            .with_calculation(json!({
                "matchedThemes": matched,
                "unmatchedThemes": unmatched,
                "sharedKeys": shared,
            }))
            .with_correlations(correlations)
            .with_confidence(confidence))
    }
}
