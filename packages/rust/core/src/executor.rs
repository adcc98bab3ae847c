//! The pipeline executor.
//!
//! Runs a planned [`Pipeline`] against a base context:
//! 1. Every stage whose prerequisites have settled is dispatched onto a
//!    `JoinSet`; a semaphore bounds how many agents execute at once.
//! 2. Each stage first consults the [`ResultCache`] under its fingerprint and
//!    only executes its agent on a miss, under an independent timeout.
//! 3. Responses are checked against the contract before they are merged,
//!    cached or handed to any dependent.
//! 4. Failures are recorded per stage and abort only the stages that
//!    required them; the run always ends in a [`RunReport`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use augur_contract::{Agent, AgentRegistry, check_response, check_upstream, validate_request};
use augur_shared::{AgentContext, AgentRequest, AgentResponse, AugurError, ExecutorConfig, Result};
use augur_storage::CacheStore;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{Id as TaskId, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{CachePolicy, ResultCache, fingerprint};
use crate::plan::{Pipeline, PipelineStage};
use crate::report::{RunReport, RunStatus, StageError, StageOutcome, StageReport};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Observer for run progress. Every method defaults to a no-op.
pub trait ProgressReporter: Send + Sync {
    /// A stage missed the cache and its agent is about to execute.
    fn stage_started(&self, _stage: &str, _framework: &str) {}

    /// A stage reached a terminal outcome.
    fn stage_finished(&self, _report: &StageReport) {}

    /// The run is over.
    fn done(&self, _report: &RunReport) {}
}

/// Reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    registry: Arc<AgentRegistry>,
    cache: ResultCache,
    config: ExecutorConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl Executor {
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<dyn CacheStore>, policy: CachePolicy) -> Self {
        Self {
            registry,
            cache: ResultCache::new(store, policy),
            config: ExecutorConfig::default(),
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Validate a raw request and run its framework as a one-stage pipeline.
    ///
    /// Contract and membership failures are returned before anything executes.
    pub async fn submit(&self, raw: &Value, cancel: &CancellationToken) -> Result<RunReport> {
        let request = validate_request(raw, &self.registry)?;
        let pipeline = Pipeline::single(&request.framework, &self.registry)?;
        self.run(&pipeline, request.context, cancel).await
    }

    /// [`Executor::submit`] for an already typed request.
    pub async fn submit_request(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let raw = serde_json::to_value(request)?;
        self.submit(&raw, cancel).await
    }

    /// Plan `stages` against this executor's registry, then run them.
    pub async fn run_stages(
        &self,
        stages: impl IntoIterator<Item = PipelineStage>,
        base: AgentContext,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let pipeline = stages
            .into_iter()
            .fold(Pipeline::builder(), |builder, stage| builder.stage(stage))
            .build(&self.registry)?;
        self.run(&pipeline, base, cancel).await
    }

    /// Run a planned pipeline to completion, failure or cancellation.
    ///
    /// Upstream results seeded into `base` must pass the response contract;
    /// otherwise nothing executes and a validation error is returned.
    #[instrument(skip_all, fields(stages = pipeline.stages().len()))]
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        base: AgentContext,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        check_upstream(&base)?;

        let started = Instant::now();
        let run_id = Uuid::now_v7();
        info!(%run_id, synthesis = ?pipeline.synthesis(), "starting run");

        let mut state = RunState::new(pipeline);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<(usize, StageReport, Option<AgentResponse>)> = JoinSet::new();
        let mut spawned: HashMap<TaskId, usize> = HashMap::new();
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            while let Some(i) = state.ready.pop_front() {
                let task = self.stage_task(pipeline, i, &base, &state, &semaphore);
                let handle = tasks.spawn(task.run(i));
                spawned.insert(handle.id(), i);
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = tasks.join_next_with_id() => match joined {
                    Some(Ok((id, (i, report, response)))) => {
                        spawned.remove(&id);
                        state.settle(i, report, response, self.progress.as_ref());
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "stage task ended abnormally");
                        if let Some(i) = spawned.remove(&e.id()) {
                            state.settle_abnormal(i, self.progress.as_ref());
                        }
                    }
                    None => break,
                },
            }
        }

        if cancelled {
            info!(%run_id, in_flight = tasks.len(), "run cancelled");
            tasks.abort_all();
            // Stages that finished before the abort landed keep their results.
            while let Some(joined) = tasks.join_next().await {
                if let Ok((i, report, response)) = joined {
                    state.settle(i, report, response, self.progress.as_ref());
                }
            }
        }

        let report = state.finish(pipeline, run_id, cancelled, started.elapsed());
        info!(
            %run_id,
            status = ?report.status,
            cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        self.progress.done(&report);
        Ok(report)
    }

    /// Everything one stage needs, owned so it can move onto a task.
    fn stage_task(
        &self,
        pipeline: &Pipeline,
        i: usize,
        base: &AgentContext,
        state: &RunState,
        semaphore: &Arc<Semaphore>,
    ) -> StageTask {
        let stage = pipeline.stages()[i].clone();

        let mut context = base.clone();
        for input in pipeline.waits_for(&stage.name) {
            if let Some(response) = state.merged.get(input) {
                context.insert_upstream(input, response.clone());
            }
        }

        StageTask {
            agent: self.registry.get(&stage.framework),
            stage,
            context,
            cache: self.cache.clone(),
            semaphore: semaphore.clone(),
            timeout: self.config.stage_timeout,
            progress: self.progress.clone(),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.registry)
            .field("policy", self.cache.policy())
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Per-run scheduling state. Only the run loop mutates it.
struct RunState {
    names: Vec<String>,
    frameworks: Vec<String>,
    /// For each stage, the stages waiting on it and whether the edge is hard.
    dependents: Vec<Vec<(usize, bool)>>,
    /// Unsettled prerequisites per stage.
    pending: Vec<usize>,
    settled: Vec<Option<StageReport>>,
    merged: BTreeMap<String, AgentResponse>,
    ready: VecDeque<usize>,
}

impl RunState {
    fn new(pipeline: &Pipeline) -> Self {
        let stages = pipeline.stages();
        let index: HashMap<&str, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut dependents = vec![Vec::new(); stages.len()];
        let mut pending = vec![0; stages.len()];
        for (i, stage) in stages.iter().enumerate() {
            for input in pipeline.waits_for(&stage.name) {
                if let Some(&j) = index.get(input) {
                    let hard = stage.depends_on.iter().any(|d| d == input);
                    dependents[j].push((i, hard));
                    pending[i] += 1;
                }
            }
        }

        let ready = (0..stages.len()).filter(|&i| pending[i] == 0).collect();

        Self {
            names: stages.iter().map(|s| s.name.clone()).collect(),
            frameworks: stages.iter().map(|s| s.framework.clone()).collect(),
            dependents,
            pending,
            settled: vec![None; stages.len()],
            merged: BTreeMap::new(),
            ready,
        }
    }

    /// Record a terminal outcome and release or abort whatever waited on it.
    fn settle(
        &mut self,
        i: usize,
        report: StageReport,
        response: Option<AgentResponse>,
        progress: &dyn ProgressReporter,
    ) {
        let mut work = vec![(i, report, response)];

        while let Some((i, report, response)) = work.pop() {
            if self.settled[i].is_some() {
                continue;
            }

            let origin = match &report.outcome {
                StageOutcome::DependencyAborted { dependency } => Some(dependency.clone()),
                outcome if outcome.is_success() => None,
                _ => Some(self.names[i].clone()),
            };

            if let Some(response) = response.filter(|_| origin.is_none()) {
                self.merged.insert(self.names[i].clone(), response);
            }
            progress.stage_finished(&report);
            self.settled[i] = Some(report);

            for &(d, hard) in &self.dependents[i] {
                if self.settled[d].is_some() {
                    continue;
                }
                match (&origin, hard) {
                    (Some(dependency), true) => {
                        debug!(stage = %self.names[d], %dependency, "dependency failed, aborting stage");
                        let report = StageReport {
                            name: self.names[d].clone(),
                            framework: self.frameworks[d].clone(),
                            outcome: StageOutcome::DependencyAborted {
                                dependency: dependency.clone(),
                            },
                            fingerprint: None,
                            elapsed: Duration::ZERO,
                        };
                        work.push((d, report, None));
                    }
                    _ => {
                        self.pending[d] -= 1;
                        if self.pending[d] == 0 {
                            self.ready.push_back(d);
                        }
                    }
                }
            }
        }
    }

    /// Settle a stage whose task died before producing a report.
    fn settle_abnormal(&mut self, i: usize, progress: &dyn ProgressReporter) {
        let report = StageReport {
            name: self.names[i].clone(),
            framework: self.frameworks[i].clone(),
            outcome: StageOutcome::Failed {
                error: StageError::Execution("stage task ended abnormally".into()),
            },
            fingerprint: None,
            elapsed: Duration::ZERO,
        };
        self.settle(i, report, None, progress);
    }

    fn finish(
        self,
        pipeline: &Pipeline,
        run_id: Uuid,
        cancelled: bool,
        elapsed: Duration,
    ) -> RunReport {
        let stages: Vec<StageReport> = self
            .settled
            .into_iter()
            .zip(pipeline.stages())
            .map(|(settled, stage)| {
                settled.unwrap_or_else(|| StageReport {
                    name: stage.name.clone(),
                    framework: stage.framework.clone(),
                    outcome: if cancelled {
                        StageOutcome::Cancelled
                    } else {
                        StageOutcome::Failed {
                            error: StageError::Execution("stage never completed".into()),
                        }
                    },
                    fingerprint: None,
                    elapsed: Duration::ZERO,
                })
            })
            .collect();

        let final_response = pipeline
            .terminal()
            .and_then(|name| self.merged.get(name).cloned());
        let status = RunStatus::from_outcomes(&stages, final_response.is_some());

        RunReport {
            run_id,
            stages,
            merged_context: self.merged,
            final_response,
            status,
            cancelled,
            elapsed,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage execution
// ---------------------------------------------------------------------------

/// Aborts the wrapped task when dropped, so a timed-out or cancelled stage
/// does not keep its agent running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct StageTask {
    agent: Option<Arc<dyn Agent>>,
    stage: PipelineStage,
    context: AgentContext,
    cache: ResultCache,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    progress: Arc<dyn ProgressReporter>,
}

impl StageTask {
    async fn run(self, i: usize) -> (usize, StageReport, Option<AgentResponse>) {
        let started = Instant::now();
        let key = fingerprint(&self.stage.framework, &self.context);

        let (outcome, response) = match self.cache.lookup(&key).await {
            Some(entry) => {
                debug!(stage = %self.stage.name, fingerprint = %key, "cache hit");
                (
                    StageOutcome::Skipped {
                        cached_at: entry.created_at,
                    },
                    Some(entry.response),
                )
            }
            None => match self.execute(&key).await {
                Ok(response) => (StageOutcome::Succeeded, Some(response)),
                Err(error) => {
                    warn!(stage = %self.stage.name, framework = %self.stage.framework, %error, "stage failed");
                    (StageOutcome::Failed { error }, None)
                }
            },
        };

        let report = StageReport {
            name: self.stage.name,
            framework: self.stage.framework,
            outcome,
            fingerprint: Some(key),
            elapsed: started.elapsed(),
        };
        (i, report, response)
    }

    async fn execute(&self, key: &str) -> std::result::Result<AgentResponse, StageError> {
        let Some(agent) = self.agent.clone() else {
            return Err(StageError::Execution(format!(
                "framework '{}' is not registered with this executor",
                self.stage.framework
            )));
        };

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| StageError::Execution("executor shut down".into()))?;

        self.progress
            .stage_started(&self.stage.name, &self.stage.framework);
        debug!(stage = %self.stage.name, framework = %self.stage.framework, fingerprint = %key, "executing stage");

        let request = AgentRequest::new(self.stage.framework.clone(), self.context.clone());
        let mut handle = AbortOnDrop(tokio::spawn(async move { agent.execute(&request).await }));

        let response = match tokio::time::timeout(self.timeout, &mut handle.0).await {
            Err(_) => {
                return Err(StageError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                });
            }
            Ok(Err(join)) if join.is_panic() => {
                return Err(StageError::Execution("agent panicked".into()));
            }
            Ok(Err(join)) => return Err(StageError::Execution(join.to_string())),
            Ok(Ok(Err(AugurError::StageExecution { message, .. }))) => {
                return Err(StageError::Execution(message));
            }
            Ok(Ok(Err(e))) => return Err(StageError::Execution(e.to_string())),
            Ok(Ok(Ok(response))) => response,
        };

        check_response(&response).map_err(StageError::InvalidResponse)?;
        self.cache
            .store(key, &self.stage.framework, &response)
            .await;
        Ok(response)
    }
}
