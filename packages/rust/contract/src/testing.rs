use async_trait::async_trait;
use augur_shared::{AgentRequest, AgentResponse, Result, method};

use crate::registry::Agent;

/// Echoes the user query back as its seed.
pub(crate) struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let query = request.context.user_query.as_deref().unwrap_or_default();
        Ok(AgentResponse::new(
            format!("{}: {query}", self.name),
            method::DETERMINISTIC,
        ))
    }
}
