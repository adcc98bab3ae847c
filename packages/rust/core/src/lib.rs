//! Pipeline planning, execution and caching for augur.
//!
//! This crate ties the agent contract, the result cache and the external
//! collaborators (text generation, similarity search) into runs that end in
//! a [`RunReport`].

pub mod agents;
pub mod cache;
pub mod executor;
pub mod llm;
pub mod plan;
pub mod report;
pub mod retrieval;

#[cfg(test)]
mod testing;

pub use cache::{CachePolicy, ResultCache, fingerprint};
pub use executor::{Executor, ProgressReporter, SilentProgress};
pub use llm::{
    Generation, GenerationError, GenerationRequest, GenerationSettings, OpenRouterClient,
    TextGenerator, TokenUsage,
};
pub use plan::{Pipeline, PipelineBuilder, PipelineStage};
pub use report::{RunReport, RunStatus, StageError, StageOutcome, StageReport};
pub use retrieval::{Embedder, HashingEmbedder, InMemoryIndex, SimilarityMatch, SimilaritySearch};
