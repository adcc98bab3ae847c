//! The agent capability and the name → implementation registry.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use augur_shared::{AgentRequest, AgentResponse, AugurError, Result};
use regex::Regex;

/// Valid agent names: lowercase, starting with a letter.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("static pattern compiles"));

/// A computational unit. Pure with respect to the executor: it owns nothing
/// beyond its own computation and returns a response or an error.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registered framework name.
    fn name(&self) -> &str;

    /// One-line summary for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Run the computation for `request`.
    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse>;
}

/// Statically registered agents, keyed by framework name.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own name.
    pub fn register(&mut self, agent: impl Agent + 'static) -> Result<()> {
        self.register_shared(Arc::new(agent))
    }

    /// Register an already shared agent.
    pub fn register_shared(&mut self, agent: Arc<dyn Agent>) -> Result<()> {
        let name = agent.name().to_string();
        if !NAME_PATTERN.is_match(&name) {
            return Err(AugurError::config(format!(
                "invalid agent name '{name}': expected lowercase letters, digits, '_' or '-'"
            )));
        }
        if self.agents.contains_key(&name) {
            return Err(AugurError::config(format!(
                "agent '{name}' is already registered"
            )));
        }
        tracing::debug!(agent = %name, "registered agent");
        self.agents.insert(name, agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    /// `(name, description)` pairs in sorted order.
    pub fn describe(&self) -> Vec<(&str, &str)> {
        self.agents
            .iter()
            .map(|(name, agent)| (name.as_str(), agent.description()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoAgent;
    use augur_shared::AgentContext;

    #[test]
    fn names_are_sorted() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent::new("oracle")).unwrap();
        registry.register(EchoAgent::new("calculator")).unwrap();
        assert_eq!(registry.names(), vec!["calculator", "oracle"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent::new("oracle")).unwrap();
        let err = registry.register(EchoAgent::new("oracle")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn invalid_names_rejected() {
        let mut registry = AgentRegistry::new();
        for bad in ["", "Oracle", "9lives", "has space"] {
            assert!(registry.register(EchoAgent::new(bad)).is_err(), "{bad}");
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn lookup_executes_registered_agent() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent::new("echo")).unwrap();
        let agent = registry.get("echo").expect("registered");
        let response = agent
            .execute(&AgentRequest::new("echo", AgentContext::query("hi")))
            .await
            .expect("execute");
        assert_eq!(response.interpretation_seed, "echo: hi");
        assert!(registry.get("missing").is_none());
    }
}
