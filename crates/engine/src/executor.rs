//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Parses and validates the graph before any record exists.
//! 2. Creates a `pending` execution record and drives it in the background.
//! 3. Dispatches each frontier batch in chunks of `max_concurrent_steps`,
//!    resolving `{{…}}` placeholders against the execution context first.
//! 4. Folds each step's output into the context, follows taken edges and
//!    skips steps that are only reachable through untaken branches.
//! 5. Persists the record after every step; the first step failure stops
//!    further dispatch and fails the run.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use db::{
    ExecutionRecord, ExecutionStatus, ExecutionStore, LogEntry, RecordUpdate, StepState, StepStatus,
    WorkflowStore,
};
use nodes::builtin::NoopNode;
use nodes::{Branch, ExecutableNode, ExecutionContext, NodeError, NodeOutput, NodeRegistry};

use crate::dag::{prepare, PreparedWorkflow};
use crate::models::{Step, WorkflowGraph};
use crate::resolver::VariableResolver;
use crate::traversal::{Phase, Traversal};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do with a step whose kind has no registered executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownKindPolicy {
    /// Treat the step as a no-op that succeeds.
    #[default]
    Succeed,
    /// Fail the step (and therefore the run).
    Fail,
}

impl FromStr for UnknownKindPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "succeed" | "noop" | "skip" => Ok(Self::Succeed),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown policy '{other}', expected 'succeed' or 'fail'")),
        }
    }
}

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How many steps of one frontier batch run at the same time; `1`
    /// dispatches strictly one after another in graph order.
    pub max_concurrent_steps: usize,
    pub unknown_kind: UnknownKindPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 4,
            unknown_kind: UnknownKindPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

/// Everything one run mutates. Always accessed under a single lock so that
/// context updates and record writes are serialised.
struct RunState {
    record: ExecutionRecord,
    context: ExecutionContext,
}

impl RunState {
    fn log(&mut self, entry: LogEntry) {
        self.record.logs.push(entry);
    }

    fn step_mut(&mut self, step_id: &str) -> &mut StepState {
        self.record.step_status.entry(step_id.to_owned()).or_default()
    }

    fn snapshot(&mut self) -> RecordUpdate {
        self.record.results = Some(self.context.to_value());
        RecordUpdate::from(&self.record)
    }
}

enum StepOutcome {
    Completed(Option<Branch>),
    Failed(String),
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflows stored in a [`WorkflowStore`] and records progress in an
/// [`ExecutionStore`]. Cheap to clone; clones share the registry, the stores
/// and the table of in-flight runs.
#[derive(Clone)]
pub struct WorkflowExecutor {
    workflows: Arc<dyn WorkflowStore>,
    store: Arc<dyn ExecutionStore>,
    registry: Arc<NodeRegistry>,
    config: ExecutorConfig,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        store: Arc<dyn ExecutionStore>,
        registry: NodeRegistry,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            workflows,
            store,
            registry: Arc::new(registry),
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Parse and validate a graph definition against the registered executors.
    pub fn load(&self, definition: &serde_json::Value) -> Result<PreparedWorkflow, EngineError> {
        prepare(definition, &self.registry)
    }

    /// Create a `pending` record and drive it to completion in the background.
    ///
    /// # Errors
    /// Only graph validation and persistence problems are returned; failures
    /// of individual steps are reported on the record.
    #[instrument(skip(self))]
    pub async fn start_execution(&self, workflow_id: Uuid) -> Result<ExecutionRecord, EngineError> {
        let (record, prepared, token) = self.begin(workflow_id).await?;
        let executor = self.clone();
        let pending = record.clone();
        tokio::spawn(async move {
            // drive() already reports its own failures.
            let _ = executor.drive(record, prepared, token).await;
        });
        Ok(pending)
    }

    /// Like [`start_execution`](Self::start_execution) but waits for the run
    /// to finish and returns the terminal record.
    #[instrument(skip(self))]
    pub async fn execute(&self, workflow_id: Uuid) -> Result<ExecutionRecord, EngineError> {
        let (record, prepared, token) = self.begin(workflow_id).await?;
        self.drive(record, prepared, token).await
    }

    /// Ask a running execution to stop before its next dispatch. Returns
    /// `false` if no such run is in flight.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.running.lock().get(&execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn begin(
        &self,
        workflow_id: Uuid,
    ) -> Result<(ExecutionRecord, PreparedWorkflow, CancellationToken), EngineError> {
        let workflow = self.workflows.get_workflow(workflow_id).await?;
        let prepared = self.load(&workflow.definition)?;
        let record = self.store.create(workflow_id).await?;
        let token = CancellationToken::new();
        self.running.lock().insert(record.id, token.clone());
        info!(execution_id = %record.id, steps = prepared.graph.steps.len(), "execution created");
        Ok((record, prepared, token))
    }

    async fn drive(
        &self,
        record: ExecutionRecord,
        prepared: PreparedWorkflow,
        token: CancellationToken,
    ) -> Result<ExecutionRecord, EngineError> {
        let execution_id = record.id;
        let result = AssertUnwindSafe(self.run(record, &prepared, &token))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(EngineError::Panicked(panic_message(&*panic))));
        self.running.lock().remove(&execution_id);

        if let Err(e) = &result {
            error!(%execution_id, "execution aborted: {e}");
            self.mark_failed(execution_id, e).await;
        }
        result
    }

    /// Best effort: the store itself may be what failed.
    async fn mark_failed(&self, execution_id: Uuid, cause: &EngineError) {
        let Ok(Some(mut record)) = self.store.get(execution_id).await else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        record.status = ExecutionStatus::Failed;
        for (step_id, step) in &mut record.step_status {
            if step.status == StepStatus::Running {
                step.status = StepStatus::Failed;
                step.error = Some(cause.to_string());
                step.end_time = Some(Utc::now());
                let message = format!("Step {step_id} aborted: {cause}");
                record.logs.push(LogEntry::error(Some(step_id.as_str()), message));
            }
        }
        record
            .logs
            .push(LogEntry::error(None, format!("Workflow execution aborted: {cause}")));
        if let Err(e) = self.store.update(execution_id, RecordUpdate::from(&record)).await {
            warn!(%execution_id, "could not mark execution failed: {e}");
        }
    }

    async fn persist(&self, state: &mut RunState) -> Result<(), EngineError> {
        let update = state.snapshot();
        state.record = self.store.update(state.record.id, update).await?;
        Ok(())
    }

    async fn finish(
        &self,
        mut state: RunState,
        status: ExecutionStatus,
        entry: LogEntry,
    ) -> Result<ExecutionRecord, EngineError> {
        state.record.status = status;
        state.log(entry);
        self.persist(&mut state).await?;
        info!(execution_id = %state.record.id, %status, "execution finished");
        Ok(state.record)
    }

    async fn run(
        &self,
        record: ExecutionRecord,
        prepared: &PreparedWorkflow,
        token: &CancellationToken,
    ) -> Result<ExecutionRecord, EngineError> {
        let graph = &prepared.graph;
        let context = ExecutionContext::new(record.workflow_id, record.id);
        let mut state = RunState { record, context };

        for step in &graph.steps {
            state.record.step_status.insert(step.id.clone(), StepState::default());
        }
        state.record.status = ExecutionStatus::Running;
        state.log(LogEntry::info(
            None,
            format!("Starting workflow execution with {} steps", graph.steps.len()),
        ));
        self.persist(&mut state).await?;

        let mut traversal = Traversal::new(graph, &prepared.topology);
        let mut frontier = traversal.start();
        if frontier.is_empty() {
            let entry = LogEntry::error(
                None,
                "Workflow has no entry point: every step has an incoming edge",
            );
            return self.finish(state, ExecutionStatus::Failed, entry).await;
        }

        let state = tokio::sync::Mutex::new(state);
        let chunk_size = self.config.max_concurrent_steps.max(1);
        let mut failure: Option<String> = None;

        'batches: while !frontier.is_empty() {
            let mut next = Vec::new();
            for chunk in frontier.chunks(chunk_size) {
                if token.is_cancelled() {
                    failure = Some("Workflow execution cancelled".to_owned());
                    break 'batches;
                }

                let outcomes =
                    join_all(chunk.iter().map(|&idx| self.run_step(&state, graph, idx))).await;

                let mut skipped = Vec::new();
                for (&idx, outcome) in chunk.iter().zip(outcomes) {
                    match outcome? {
                        StepOutcome::Completed(branch) => {
                            let advance = traversal.complete(idx, branch);
                            next.extend(advance.ready);
                            skipped.extend(advance.skipped);
                        }
                        StepOutcome::Failed(message) => {
                            let step_id = &graph.steps[idx].id;
                            failure.get_or_insert(format!("step '{step_id}' failed: {message}"));
                        }
                    }
                }

                if !skipped.is_empty() {
                    let mut st = state.lock().await;
                    for idx in skipped {
                        let step = &graph.steps[idx];
                        st.step_mut(&step.id).status = StepStatus::Skipped;
                        st.log(LogEntry::info(
                            Some(&step.id),
                            format!("Skipping step {}: its branch was not taken", step.label),
                        ));
                    }
                    self.persist(&mut st).await?;
                }

                if failure.is_some() {
                    break 'batches;
                }
            }
            next.sort_unstable();
            next.dedup();
            frontier = next;
        }

        let state = state.into_inner();
        match failure {
            Some(reason) => {
                warn!(execution_id = %state.record.id, "{reason}");
                let entry = LogEntry::error(None, format!("Workflow execution failed: {reason}"));
                self.finish(state, ExecutionStatus::Failed, entry).await
            }
            None => {
                let entry = LogEntry::info(
                    None,
                    format!(
                        "Workflow execution completed: {} steps completed, {} skipped",
                        traversal.count(Phase::Completed),
                        traversal.count(Phase::Skipped)
                    ),
                );
                self.finish(state, ExecutionStatus::Completed, entry).await
            }
        }
    }

    /// Run one step: mark it running, resolve its config, execute it outside
    /// the lock, then fold the result back in. Only persistence errors are
    /// returned as `Err`.
    async fn run_step(
        &self,
        state: &tokio::sync::Mutex<RunState>,
        graph: &WorkflowGraph,
        idx: usize,
    ) -> Result<StepOutcome, EngineError> {
        let step = &graph.steps[idx];
        let node = self.executor_for(step);

        let (config, ctx) = {
            let mut st = state.lock().await;
            let entry = st.step_mut(&step.id);
            entry.status = StepStatus::Running;
            entry.start_time = Some(Utc::now());
            st.log(LogEntry::info(
                Some(&step.id),
                format!("Executing step {} ({})", step.label, step.kind),
            ));
            if node.is_none() && self.config.unknown_kind == UnknownKindPolicy::Succeed {
                st.log(LogEntry::warn(
                    Some(&step.id),
                    format!("No executor for step kind '{}'; treating it as a no-op", step.kind),
                ));
            }
            self.persist(&mut st).await?;
            let config = VariableResolver::new(&st.context).resolve_value(&step.config);
            (config, st.context.clone())
        };

        let result = match node {
            Some(node) => node.execute(&config, &ctx).await,
            None => match self.config.unknown_kind {
                UnknownKindPolicy::Succeed => NoopNode.execute(&config, &ctx).await,
                UnknownKindPolicy::Fail => Err(NodeError::config(format!(
                    "no executor registered for step kind '{}'",
                    step.kind
                ))),
            },
        };

        let mut st = state.lock().await;
        let outcome = match result {
            Ok(NodeOutput { value, aliases, branch }) => {
                st.context.insert(step.id.clone(), value.clone());
                for (key, alias) in aliases {
                    st.context.insert(key, alias);
                }
                let entry = st.step_mut(&step.id);
                entry.status = StepStatus::Completed;
                entry.output = Some(value);
                entry.end_time = Some(Utc::now());
                let message = match branch {
                    Some(branch) => {
                        format!("Step {} completed ({} branch)", step.label, branch.as_str())
                    }
                    None => format!("Step {} completed", step.label),
                };
                st.log(LogEntry::info(Some(&step.id), message));
                info!(step_id = %step.id, kind = %step.kind, "step completed");
                StepOutcome::Completed(branch)
            }
            Err(e) => {
                let message = e.to_string();
                let entry = st.step_mut(&step.id);
                entry.status = StepStatus::Failed;
                entry.error = Some(message.clone());
                entry.end_time = Some(Utc::now());
                let text = format!("Step {} failed: {message}", step.label);
                let details = json!({ "kind": step.kind.as_str(), "config": config });
                st.log(LogEntry::error(Some(&step.id), text).with_data(details));
                error!(step_id = %step.id, kind = %step.kind, "step failed: {message}");
                StepOutcome::Failed(message)
            }
        };
        self.persist(&mut st).await?;
        Ok(outcome)
    }

    fn executor_for(&self, step: &Step) -> Option<Arc<dyn ExecutableNode>> {
        self.registry.get(step.kind.as_str())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
