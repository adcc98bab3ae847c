//! Shared types, error model, and configuration for augur.
//!
//! This crate is the foundation depended on by all other augur crates.
//! It provides:
//! - [`AugurError`] — the unified error type, and [`ValidationError`]
//! - Domain types ([`AgentRequest`], [`AgentContext`], [`AgentResponse`], [`CacheEntry`])
//! - Configuration ([`AppConfig`], [`ExecutorConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, DefaultsConfig, ExecutorConfig, OpenRouterConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{AugurError, Result, ValidationError, Violation};
pub use types::{
    AgentContext, AgentRequest, AgentResponse, BIRTH_TIME_FORMATS, BirthData, CacheClass,
    CacheEntry, method,
};
