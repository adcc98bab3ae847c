//! Built-in agents and the standard pipeline.
//!
//! The deterministic agents need nothing but their request. The generating
//! agents need a [`TextGenerator`] and are only registered when one is
//! supplied.

pub mod calculator;
pub mod cross_mapper;
pub mod interpreter;
pub mod oracle;
pub mod synthesizer;

use std::sync::Arc;

use augur_contract::AgentRegistry;
use augur_shared::{AgentContext, CacheClass, Result};

use crate::llm::{GenerationSettings, TextGenerator};
use crate::plan::{Pipeline, PipelineStage};

pub use calculator::Calculator;
pub use cross_mapper::CrossMapper;
pub use interpreter::{Interpreter, Retrieval};
pub use oracle::Oracle;
pub use synthesizer::Synthesizer;

pub const CALCULATOR: &str = "calculator";
pub const CROSS_MAPPER: &str = "cross_mapper";
pub const INTERPRETER: &str = "interpreter";
pub const SYNTHESIZER: &str = "synthesizer";
pub const ORACLE: &str = "oracle";

/// Frameworks that call the text generator.
pub const GENERATED: [&str; 2] = [INTERPRETER, ORACLE];

/// Which built-ins to register and with what collaborators.
#[derive(Clone, Default)]
pub struct Builtins {
    generator: Option<Arc<dyn TextGenerator>>,
    settings: GenerationSettings,
    retrieval: Option<Retrieval>,
}

impl Builtins {
    /// Only the agents that need no collaborators.
    pub fn deterministic() -> Self {
        Self::default()
    }

    pub fn with_generator(
        mut self,
        generator: Arc<dyn TextGenerator>,
        settings: GenerationSettings,
    ) -> Self {
        self.generator = Some(generator);
        self.settings = settings;
        self
    }

    pub fn with_retrieval(mut self, retrieval: Retrieval) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn register(self, registry: &mut AgentRegistry) -> Result<()> {
        registry.register(Calculator)?;
        registry.register(CrossMapper)?;
        registry.register(Synthesizer)?;

        if let Some(generator) = self.generator {
            let mut interpreter = Interpreter::new(generator.clone(), self.settings);
            if let Some(retrieval) = self.retrieval {
                interpreter = interpreter.with_retrieval(retrieval);
            }
            registry.register(interpreter)?;
            registry.register(Oracle::new(generator, self.settings))?;
        }
        Ok(())
    }

    pub fn registry(self) -> Result<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        self.register(&mut registry)?;
        Ok(registry)
    }
}

/// calculator -> cross_mapper -> interpreter -> synthesizer, closed by oracle.
pub fn standard_pipeline(registry: &AgentRegistry) -> Result<Pipeline> {
    Pipeline::builder()
        .stage(PipelineStage::new(CALCULATOR))
        .stage(PipelineStage::new(CROSS_MAPPER).depends_on([CALCULATOR]))
        .stage(PipelineStage::new(INTERPRETER).depends_on([CALCULATOR, CROSS_MAPPER]))
        .stage(PipelineStage::new(SYNTHESIZER).depends_on([CALCULATOR, CROSS_MAPPER, INTERPRETER]))
        .synthesize_with(PipelineStage::new(ORACLE).depends_on([SYNTHESIZER]))
        .build(registry)
}

/// Suggested TTL classes for the built-ins: birth-derived facts are stable,
/// day-scoped readings last the day, the final answer is always fresh.
pub fn recommended_cache_classes() -> [(&'static str, CacheClass); 5] {
    [
        (CALCULATOR, CacheClass::Stable),
        (CROSS_MAPPER, CacheClass::Daily),
        (INTERPRETER, CacheClass::Daily),
        (SYNTHESIZER, CacheClass::Daily),
        (ORACLE, CacheClass::NoCache),
    ]
}

/// Upstream seeds as `- name: seed` lines, in stage-name order.
pub(crate) fn upstream_lines(context: &AgentContext) -> Vec<String> {
    context
        .upstream_entries()
        .map(|(name, response)| format!("- {name}: {}", response.interpretation_seed.trim()))
        .collect()
}

/// Trimmed, non-blank journal themes.
pub(crate) fn themes(context: &AgentContext) -> Vec<&str> {
    context
        .journal_themes
        .iter()
        .flatten()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Mean of the upstream confidences that are present.
pub(crate) fn mean_confidence(context: &AgentContext) -> Option<f64> {
    let values: Vec<f64> = context
        .upstream_entries()
        .filter_map(|(_, r)| r.confidence)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::executor::Executor;
    use crate::report::{RunStatus, StageOutcome};
    use crate::testing::StubGenerator;
    use augur_shared::{BirthData, method};
    use augur_storage::MemoryStore;
    use chrono::NaiveDate;
    use tokio_util::sync::CancellationToken;

    fn context() -> AgentContext {
        let mut birth = BirthData::on(NaiveDate::from_ymd_opt(1990, 4, 12).unwrap());
        birth.time = Some("06:30".into());
        AgentContext {
            birth_data: Some(birth),
            journal_themes: Some(vec!["spring".into(), "rest".into()]),
            user_query: Some("What should I focus on?".into()),
            ..AgentContext::default()
        }
    }

    #[test]
    fn deterministic_builtins_skip_generated_agents() {
        let registry = Builtins::deterministic().registry().unwrap();
        assert_eq!(registry.names(), vec![CALCULATOR, CROSS_MAPPER, SYNTHESIZER]);
        assert!(matches!(
            standard_pipeline(&registry),
            Err(augur_shared::AugurError::UnknownFramework { ref name }) if name == INTERPRETER
        ));
    }

    #[test]
    fn standard_pipeline_order() {
        let registry = Builtins::default()
            .with_generator(StubGenerator::replying("ok"), GenerationSettings::default())
            .registry()
            .unwrap();
        let pipeline = standard_pipeline(&registry).unwrap();
        let names: Vec<_> = pipeline.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![CALCULATOR, CROSS_MAPPER, INTERPRETER, SYNTHESIZER, ORACLE]
        );
        assert_eq!(pipeline.terminal(), Some(ORACLE));
    }

    #[tokio::test]
    async fn standard_pipeline_runs_end_to_end() {
        let generator = StubGenerator::replying("Rest well this spring.");
        let registry = Builtins::default()
            .with_generator(generator.clone(), GenerationSettings::default())
            .registry()
            .unwrap();
        let pipeline = standard_pipeline(&registry).unwrap();
        let store = Arc::new(MemoryStore::new());
        let policy = CachePolicy::new(CacheClass::Stable).with_fallbacks(recommended_cache_classes());
        let exec = Executor::new(Arc::new(registry), store, policy);

        let first = exec
            .run(&pipeline, context(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.status, RunStatus::Complete);
        let answer = first.final_response.clone().expect("oracle answer");
        assert_eq!(answer.method, method::GENERATED);
        assert_eq!(answer.interpretation_seed, "Rest well this spring.");
        assert_eq!(first.merged_context.len(), 5);

        let second = exec
            .run(&pipeline, context(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            second.outcome(CALCULATOR),
            Some(StageOutcome::Skipped { .. })
        ));
        assert_eq!(second.outcome(ORACLE), Some(&StageOutcome::Succeeded));
        assert_eq!(second.final_response, first.final_response);
        // interpreter was served from cache the second time
        assert_eq!(generator.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn standard_pipeline_without_birth_data_fails_cleanly() {
        let registry = Builtins::default()
            .with_generator(StubGenerator::replying("x"), GenerationSettings::default())
            .registry()
            .unwrap();
        let pipeline = standard_pipeline(&registry).unwrap();
        let exec = Executor::new(
            Arc::new(registry),
            Arc::new(MemoryStore::new()),
            CachePolicy::disabled(),
        );

        let report = exec
            .run(&pipeline, AgentContext::query("hello"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(
            report.outcome(ORACLE),
            Some(&StageOutcome::DependencyAborted {
                dependency: CALCULATOR.into()
            })
        );
    }

    #[test]
    fn helpers_trim_and_average() {
        let mut ctx = AgentContext::default();
        ctx.journal_themes = Some(vec![" a ".into(), " ".into(), "b".into()]);
        assert_eq!(themes(&ctx), vec!["a", "b"]);
        assert_eq!(mean_confidence(&ctx), None);

        ctx.insert_upstream(
            "x",
            augur_shared::AgentResponse::new("one", method::DETERMINISTIC).with_confidence(0.2),
        );
        ctx.insert_upstream(
            "y",
            augur_shared::AgentResponse::new("two", method::DETERMINISTIC).with_confidence(0.6),
        );
        assert!((mean_confidence(&ctx).unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(upstream_lines(&ctx), vec!["- x: one", "- y: two"]);
    }
}
