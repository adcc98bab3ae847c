//! Core domain types exchanged between agents and the executor.
//!
//! Wire names are camelCase; every optional field round-trips its presence
//! or absence unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Accepted birth-time formats, most specific first.
pub const BIRTH_TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Birth date, optional time of day and optional geocoordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BirthData {
    /// Calendar date (`YYYY-MM-DD`).
    pub date: NaiveDate,
    /// Local time of day (`HH:MM` or `HH:MM:SS`), kept as written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Degrees north, in [-90, 90].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Degrees east, in [-180, 180].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl BirthData {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date,
            time: None,
            latitude: None,
            longitude: None,
        }
    }

    /// The birth time parsed with [`BIRTH_TIME_FORMATS`], if present and valid.
    pub fn parsed_time(&self) -> Option<NaiveTime> {
        let raw = self.time.as_deref()?;
        BIRTH_TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
    }
}

/// Everything an agent may read. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_data: Option<BirthData>,

    /// Open map of health metric name to value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_metrics: Option<BTreeMap<String, serde_json::Value>>,

    /// Journal theme tags in the order the user wrote them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_themes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,

    /// Results of earlier stages, keyed by producing stage name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<BTreeMap<String, AgentResponse>>,
}

impl AgentContext {
    /// Context carrying only a user query.
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            user_query: Some(text.into()),
            ..Self::default()
        }
    }

    /// Output of the named upstream stage, if merged into this context.
    pub fn upstream(&self, name: &str) -> Option<&AgentResponse> {
        self.upstream.as_ref()?.get(name)
    }

    /// Iterate upstream outputs in stage-name order.
    pub fn upstream_entries(&self) -> impl Iterator<Item = (&String, &AgentResponse)> {
        self.upstream.iter().flat_map(|m| m.iter())
    }

    /// Record `response` under `name` in the upstream map.
    pub fn insert_upstream(&mut self, name: impl Into<String>, response: AgentResponse) {
        self.upstream
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), response);
    }
}

/// A request addressed to one registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Registered agent name.
    pub framework: String,
    #[serde(default)]
    pub context: AgentContext,
}

impl AgentRequest {
    pub fn new(framework: impl Into<String>, context: AgentContext) -> Self {
        Self {
            framework: framework.into(),
            context,
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Common `method` tags.
pub mod method {
    pub const DETERMINISTIC: &str = "deterministic";
    pub const COMPOSED: &str = "composed";
    pub const GENERATED: &str = "generated";
}

/// What an agent hands back. Only `interpretation_seed` and `method` are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    /// Agent-specific computed payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<serde_json::Value>,

    /// Cross-framework links in discovery order.
    #[serde(default)]
    pub correlations: Vec<String>,

    /// Handoff text for the next stage or final generation.
    pub interpretation_seed: String,

    /// How the result was produced.
    pub method: String,

    /// In [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AgentResponse {
    pub fn new(interpretation_seed: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            calculation: None,
            correlations: Vec::new(),
            interpretation_seed: interpretation_seed.into(),
            method: method.into(),
            confidence: None,
        }
    }

    pub fn with_calculation(mut self, calculation: serde_json::Value) -> Self {
        self.calculation = Some(calculation);
        self
    }

    pub fn with_correlations(mut self, correlations: Vec<String>) -> Self {
        self.correlations = correlations;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Time-to-live class assigned to a framework ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheClass {
    /// Long-lived profile computations.
    Stable,
    /// Valid until the end of the UTC calendar day it was created on.
    Daily,
    /// Real-time; never written to the cache.
    NoCache,
}

impl CacheClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Daily => "daily",
            Self::NoCache => "no-cache",
        }
    }

    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::NoCache)
    }

    /// Expiry for an entry created at `created_at`; `None` for [`CacheClass::NoCache`].
    pub fn expires_at(
        &self,
        created_at: DateTime<Utc>,
        stable_ttl: chrono::Duration,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Stable => Some(created_at + stable_ttl),
            Self::Daily => created_at
                .date_naive()
                .succ_opt()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
            Self::NoCache => None,
        }
    }
}

impl std::fmt::Display for CacheClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CacheClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Self::Stable),
            "daily" => Ok(Self::Daily),
            "no-cache" => Ok(Self::NoCache),
            other => Err(format!(
                "unknown cache class '{other}' (expected stable, daily or no-cache)"
            )),
        }
    }
}

/// A stored agent result keyed by its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fingerprint: String,
    pub framework: String,
    pub response: AgentResponse,
    pub created_at: DateTime<Utc>,
    pub class: CacheClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Whether the entry may still be served at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.class.is_cacheable() && self.expires_at.is_none_or(|at| now < at)
    }
}
