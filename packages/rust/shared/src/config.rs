//! Application configuration for augur.
//!
//! User config lives at `~/.augur/augur.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AugurError, Result};
use crate::types::CacheClass;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "augur.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".augur";

// ---------------------------------------------------------------------------
// Config structs (matching augur.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Executor defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Result cache policy.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Per-stage execution timeout in milliseconds.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,

    /// Maximum stages executing at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    /// Location of the persistent result cache.
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: default_stage_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            cache_path: default_cache_path(),
        }
    }
}

fn default_stage_timeout_ms() -> u64 {
    30_000
}
fn default_max_concurrency() -> u32 {
    4
}
fn default_cache_path() -> String {
    "~/.augur/cache.db".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for text generation.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Chat-completions API root.
    #[serde(default = "default_base_url")]
    pub base_url: Url,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_base_url() -> Url {
    Url::parse("https://openrouter.ai/api/v1/").expect("static URL is valid")
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    1024
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of `stable` entries.
    #[serde(default = "default_stable_ttl_hours")]
    pub stable_ttl_hours: u64,

    /// Class for frameworks not listed under `[cache.frameworks]`.
    #[serde(default = "default_class")]
    pub default_class: CacheClass,

    /// Per-framework TTL class.
    #[serde(default)]
    pub frameworks: BTreeMap<String, CacheClass>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stable_ttl_hours: default_stable_ttl_hours(),
            default_class: default_class(),
            frameworks: BTreeMap::new(),
        }
    }
}

fn default_stable_ttl_hours() -> u64 {
    720
}
fn default_class() -> CacheClass {
    CacheClass::Stable
}

// ---------------------------------------------------------------------------
// Executor config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime executor configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Independent timeout applied to every stage execution.
    pub stage_timeout: Duration,
    /// Maximum stages executing at once.
    pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ExecutorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            stage_timeout: Duration::from_millis(config.defaults.stage_timeout_ms),
            max_concurrency: config.defaults.max_concurrency.max(1) as usize,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.augur/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| AugurError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.augur/augur.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| AugurError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AugurError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| AugurError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AugurError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AugurError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AugurError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(AugurError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
