//! Structured outcome of one executor run.

use std::collections::BTreeMap;
use std::time::Duration;

use augur_shared::{AgentResponse, AugurError, Result, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Why a stage that ran did not produce a usable response.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    /// The agent returned an error or panicked.
    #[error("{0}")]
    Execution(String),

    /// The agent did not finish within the stage timeout.
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The agent returned a response that fails the contract.
    #[error("invalid response: {0}")]
    InvalidResponse(ValidationError),
}

impl StageError {
    /// Convert to the crate error for `stage`.
    pub fn into_error(self, stage: &str) -> AugurError {
        match self {
            Self::Execution(message) => AugurError::StageExecution {
                stage: stage.to_string(),
                message,
            },
            Self::Timeout { after_ms } => AugurError::Timeout {
                stage: stage.to_string(),
                after_ms,
            },
            Self::InvalidResponse(violations) => AugurError::Validation(violations),
        }
    }
}

impl Serialize for StageError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Terminal state of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Executed and passed the contract.
    Succeeded,
    /// Served from the cache without executing.
    Skipped { cached_at: DateTime<Utc> },
    /// Executed and failed.
    Failed { error: StageError },
    /// Never ran because `dependency` (the originating failure) did not succeed.
    DependencyAborted { dependency: String },
    /// Never finished because the run was cancelled.
    Cancelled,
}

impl StageOutcome {
    /// Whether a response is available from this stage.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
            Self::DependencyAborted { .. } => "aborted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One stage's row in a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub name: String,
    pub framework: String,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(rename = "elapsed_ms", serialize_with = "millis")]
    pub elapsed: Duration,
}

/// Overall verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded or was served from cache.
    Complete,
    /// Some output is usable; the named stages did not succeed.
    Partial { failed: Vec<String> },
    /// Nothing usable was produced.
    Failed,
}

/// Everything a caller needs to judge a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Stages in plan order.
    pub stages: Vec<StageReport>,
    /// Responses of every stage that succeeded, keyed by stage name.
    pub merged_context: BTreeMap<String, AgentResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_response: Option<AgentResponse>,
    #[serde(flatten)]
    pub status: RunStatus,
    pub cancelled: bool,
    #[serde(rename = "elapsed_ms", serialize_with = "millis")]
    pub elapsed: Duration,
}

fn millis<S: Serializer>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl RunStatus {
    /// Derive the verdict from per-stage outcomes and the final answer.
    pub fn from_outcomes(stages: &[StageReport], has_final: bool) -> Self {
        let failed: Vec<String> = stages
            .iter()
            .filter(|s| !s.outcome.is_success())
            .map(|s| s.name.clone())
            .collect();

        if failed.is_empty() {
            return Self::Complete;
        }
        if has_final || stages.iter().any(|s| s.outcome.is_success()) {
            Self::Partial { failed }
        } else {
            Self::Failed
        }
    }
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn outcome(&self, name: &str) -> Option<&StageOutcome> {
        self.stage(name).map(|s| &s.outcome)
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    /// Stages that executed rather than being served from the cache.
    pub fn executed(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| matches!(s.outcome, StageOutcome::Succeeded | StageOutcome::Failed { .. }))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// The first error that caused the run to fall short, if any.
    pub fn originating_error(&self) -> Option<AugurError> {
        if let Some(failed) = self.stages.iter().find_map(|s| match &s.outcome {
            StageOutcome::Failed { error } => Some((s.name.as_str(), error)),
            _ => None,
        }) {
            return Some(failed.1.clone().into_error(failed.0));
        }

        self.stages.iter().find_map(|s| match &s.outcome {
            StageOutcome::DependencyAborted { dependency } => Some(AugurError::DependencyAborted {
                stage: s.name.clone(),
                dependency: dependency.clone(),
            }),
            StageOutcome::Cancelled => Some(AugurError::Cancelled {
                stage: s.name.clone(),
            }),
            _ => None,
        })
    }

    /// The final response when the run fully succeeded.
    ///
    /// Partial runs surface the originating stage error instead.
    pub fn into_result(self) -> Result<AgentResponse> {
        if let Some(error) = self.originating_error() {
            return Err(error);
        }
        self.final_response.ok_or_else(|| AugurError::NoFinalResponse {
            stages: self.merged_context.keys().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_shared::{Violation, method};

    fn row(name: &str, outcome: StageOutcome) -> StageReport {
        StageReport {
            name: name.into(),
            framework: name.into(),
            outcome,
            fingerprint: None,
            elapsed: Duration::from_millis(3),
        }
    }

    fn report(stages: Vec<StageReport>, final_response: Option<AgentResponse>) -> RunReport {
        let status = RunStatus::from_outcomes(&stages, final_response.is_some());
        RunReport {
            run_id: Uuid::now_v7(),
            stages,
            merged_context: BTreeMap::new(),
            final_response,
            status,
            cancelled: false,
            elapsed: Duration::from_millis(10),
        }
    }

    fn failed(message: &str) -> StageOutcome {
        StageOutcome::Failed {
            error: StageError::Execution(message.into()),
        }
    }

    #[test]
    fn status_complete_partial_failed() {
        let ok = report(
            vec![
                row("a", StageOutcome::Succeeded),
                row("b", StageOutcome::Skipped { cached_at: Utc::now() }),
            ],
            None,
        );
        assert_eq!(ok.status, RunStatus::Complete);

        let partial = report(
            vec![row("a", StageOutcome::Succeeded), row("b", failed("boom"))],
            None,
        );
        assert_eq!(
            partial.status,
            RunStatus::Partial {
                failed: vec!["b".into()]
            }
        );

        let total = report(
            vec![
                row("a", failed("boom")),
                row(
                    "b",
                    StageOutcome::DependencyAborted {
                        dependency: "a".into(),
                    },
                ),
            ],
            None,
        );
        assert_eq!(total.status, RunStatus::Failed);
    }

    #[test]
    fn into_result_returns_final_response() {
        let response = AgentResponse::new("done", method::COMPOSED);
        let run = report(vec![row("a", StageOutcome::Succeeded)], Some(response.clone()));
        assert_eq!(run.into_result().unwrap(), response);
    }

    #[test]
    fn into_result_surfaces_originating_error() {
        let run = report(
            vec![
                row(
                    "b",
                    StageOutcome::DependencyAborted {
                        dependency: "a".into(),
                    },
                ),
                row(
                    "a",
                    StageOutcome::Failed {
                        error: StageError::Timeout { after_ms: 50 },
                    },
                ),
            ],
            None,
        );
        match run.into_result().unwrap_err() {
            AugurError::Timeout { stage, after_ms } => {
                assert_eq!(stage, "a");
                assert_eq!(after_ms, 50);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn several_sinks_have_no_single_answer() {
        let mut run = report(
            vec![row("a", StageOutcome::Succeeded), row("b", StageOutcome::Succeeded)],
            None,
        );
        for name in ["a", "b"] {
            run.merged_context
                .insert(name.into(), AgentResponse::new(name, method::DETERMINISTIC));
        }
        assert_eq!(run.status, RunStatus::Complete);
        match run.into_result().unwrap_err() {
            AugurError::NoFinalResponse { stages } => assert_eq!(stages, vec!["a", "b"]),
            other => panic!("expected missing final response, got {other:?}"),
        }
    }

    #[test]
    fn invalid_response_maps_to_validation() {
        let err = StageError::InvalidResponse(ValidationError::new(vec![Violation::new(
            "method",
            "is required",
        )]))
        .into_error("a");
        assert!(matches!(err, AugurError::Validation(ref v) if v.names("method")));
    }

    #[test]
    fn serializes_flat_rows() {
        let run = report(
            vec![row("a", failed("boom")), row("b", StageOutcome::Cancelled)],
            None,
        );
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["elapsed_ms"], 10);
        assert_eq!(json["stages"][0]["outcome"], "failed");
        assert_eq!(json["stages"][0]["error"], "boom");
        assert_eq!(json["stages"][0]["elapsed_ms"], 3);
        assert_eq!(json["stages"][1]["outcome"], "cancelled");
        assert!(json.get("final_response").is_none());
    }

    #[test]
    fn executed_excludes_cache_hits() {
        let run = report(
            vec![
                row("a", StageOutcome::Skipped { cached_at: Utc::now() }),
                row("b", StageOutcome::Succeeded),
            ],
            None,
        );
        assert_eq!(run.executed(), vec!["b"]);
    }
}
