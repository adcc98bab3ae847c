//! Fingerprinted result cache over any [`CacheStore`].
//!
//! The store only persists strings. This layer decides what a key is, which
//! frameworks may be cached and for how long, and evicts expired or corrupt
//! entries lazily when they are read.

use std::collections::HashMap;
use std::sync::Arc;

use augur_contract::check_response;
use augur_shared::{AgentContext, AgentResponse, CacheClass, CacheConfig, CacheEntry};
use augur_storage::CacheStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Upper bound on configured stable TTLs (about a century).
const MAX_STABLE_TTL_HOURS: i64 = 24 * 365 * 100;

/// Per-framework TTL classes, supplied by the caller.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    default_class: CacheClass,
    frameworks: HashMap<String, CacheClass>,
    stable_ttl: chrono::Duration,
}

impl CachePolicy {
    pub fn new(default_class: CacheClass) -> Self {
        Self {
            default_class,
            frameworks: HashMap::new(),
            stable_ttl: chrono::Duration::days(30),
        }
    }

    /// Policy that never caches anything.
    pub fn disabled() -> Self {
        Self::new(CacheClass::NoCache)
    }

    pub fn with(mut self, framework: impl Into<String>, class: CacheClass) -> Self {
        self.frameworks.insert(framework.into(), class);
        self
    }

    pub fn with_stable_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.stable_ttl = ttl;
        self
    }

    /// Apply `classes` only for frameworks not already configured.
    pub fn with_fallbacks<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = (S, CacheClass)>,
        S: Into<String>,
    {
        for (framework, class) in classes {
            self.frameworks.entry(framework.into()).or_insert(class);
        }
        self
    }

    pub fn class_for(&self, framework: &str) -> CacheClass {
        self.frameworks
            .get(framework)
            .copied()
            .unwrap_or(self.default_class)
    }

    pub fn expires_at(&self, class: CacheClass, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        class.expires_at(created_at, self.stable_ttl)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        let ttl_hours = i64::try_from(config.stable_ttl_hours)
            .unwrap_or(MAX_STABLE_TTL_HOURS)
            .min(MAX_STABLE_TTL_HOURS);
        Self {
            default_class: config.default_class,
            frameworks: config
                .frameworks
                .iter()
                .map(|(name, class)| (name.clone(), *class))
                .collect(),
            stable_ttl: chrono::Duration::hours(ttl_hours),
        }
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Deterministic digest of a stage's effective input.
///
/// The context is normalized first (trimmed query and themes, blank themes
/// dropped) and serialized with sorted object keys, so logically equal
/// inputs always hash alike.
pub fn fingerprint(framework: &str, context: &AgentContext) -> String {
    let normalized = normalize(context);
    let value = serde_json::to_value(&normalized).unwrap_or(Value::Null);

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(framework.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize(context: &AgentContext) -> AgentContext {
    let mut normalized = context.clone();
    normalized.user_query = context.user_query.as_ref().map(|q| q.trim().to_string());
    normalized.journal_themes = context.journal_themes.as_ref().map(|themes| {
        themes
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    });
    normalized
}

/// JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ---------------------------------------------------------------------------
// ResultCache
// ---------------------------------------------------------------------------

/// Cache of validated agent responses keyed by fingerprint.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    policy: CachePolicy,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, policy: CachePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// A live, valid entry for `fingerprint`.
    ///
    /// Expired, unreadable or invalid entries are deleted and reported as a miss.
    /// Store errors are logged and also count as a miss.
    pub async fn lookup(&self, fingerprint: &str) -> Option<CacheEntry> {
        let raw = match self.store.get(fingerprint).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(%fingerprint, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%fingerprint, error = %e, "unreadable cache entry, evicting");
                self.evict(fingerprint).await;
                return None;
            }
        };

        if entry.fingerprint != fingerprint {
            warn!(%fingerprint, stored = %entry.fingerprint, "cache key mismatch, evicting");
            self.evict(fingerprint).await;
            return None;
        }

        if !entry.is_live(Utc::now()) {
            debug!(%fingerprint, framework = %entry.framework, "cache entry expired, evicting");
            self.evict(fingerprint).await;
            return None;
        }

        if let Err(violations) = check_response(&entry.response) {
            warn!(%fingerprint, error = %violations, "cached response fails contract, evicting");
            self.evict(fingerprint).await;
            return None;
        }

        Some(entry)
    }

    /// Record `response` for `framework` unless its class is `no-cache`.
    ///
    /// Returns whether an entry was written.
    pub async fn store(&self, fingerprint: &str, framework: &str, response: &AgentResponse) -> bool {
        let class = self.policy.class_for(framework);
        if !class.is_cacheable() {
            return false;
        }

        let created_at = Utc::now();
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            framework: framework.to_string(),
            response: response.clone(),
            created_at,
            class,
            expires_at: self.policy.expires_at(class, created_at),
        };

        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%fingerprint, error = %e, "failed to serialize cache entry");
                return false;
            }
        };

        match self.store.put(fingerprint, &raw, entry.expires_at).await {
            Ok(()) => {
                debug!(%fingerprint, %framework, %class, "cached stage result");
                true
            }
            Err(e) => {
                warn!(%fingerprint, error = %e, "cache write failed");
                false
            }
        }
    }

    async fn evict(&self, fingerprint: &str) {
        if let Err(e) = self.store.delete(fingerprint).await {
            warn!(%fingerprint, error = %e, "cache eviction failed");
        }
    }
}
