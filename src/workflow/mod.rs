//! Workflow Executor (§4.9): bounded-concurrency dispatch of `Workflow`s chosen by a policy rule
//! table keyed on `(consensus, score_bucket, vector)`, with hard timeout and cancellation.

use crate::cognition::{CognitiveEngine, Observation};
use crate::config::WorkflowConfig;
use crate::types::{
    AppError, AppResult, Consensus, EventEnvelope, ReviewOutcome, Value, Vector, Workflow, WorkflowId, WorkflowKind,
    WorkflowState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

/// Seam for the side-effecting part of a workflow (quarantine a number, forward upstream,
/// dispatch an automated response, or drop silently).
#[async_trait]
pub trait WorkflowAction: Send + Sync {
    async fn run(&self, kind: WorkflowKind, inputs: &Value, cancel: CancellationToken) -> AppResult<()>;
}

/// `(consensus, score_bucket, vector) -> WorkflowKind` policy table (§4.9). `Split` consensus
/// defers to the event's dominant label being high/critical severity before forwarding instead
/// of quarantining, since a split panel on a low-severity label is treated as noise and dropped.
pub fn resolve_workflow_kind(outcome: &ReviewOutcome, vector: Vector) -> WorkflowKind {
    let bucket = outcome.score_bucket();
    let interactive = matches!(vector, Vector::Sms | Vector::Voice | Vector::Irc);
    match (outcome.consensus, bucket) {
        (Consensus::Agree, "high") => WorkflowKind::Quarantine,
        (Consensus::Agree, "medium") if interactive => WorkflowKind::Forward,
        (Consensus::Agree, "medium") => WorkflowKind::Quarantine,
        (Consensus::Agree, "low") if interactive => WorkflowKind::DispatchResponse,
        (Consensus::Agree, "low") => WorkflowKind::Drop,
        (Consensus::Split, "high") => WorkflowKind::Quarantine,
        (Consensus::Split, _) => WorkflowKind::Drop,
        (Consensus::Timeout, _) => WorkflowKind::Drop,
        _ => WorkflowKind::Drop,
    }
}

/// Dispatches to the out-of-scope I/O adapters over HTTP, keyed by workflow kind. `Drop` has no
/// configured endpoint and is always a no-op; a kind with no configured endpoint is also a no-op
/// (logged), so an incomplete `action_endpoints` map degrades gracefully rather than failing
/// workflows.
pub struct HttpWorkflowAction {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
}

impl HttpWorkflowAction {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self { client: reqwest::Client::new(), endpoints }
    }
}

#[async_trait]
impl WorkflowAction for HttpWorkflowAction {
    async fn run(&self, kind: WorkflowKind, inputs: &Value, cancel: CancellationToken) -> AppResult<()> {
        if kind == WorkflowKind::Drop {
            return Ok(());
        }
        let Some(url) = self.endpoints.get(&kind.to_string()) else {
            tracing::debug!("no action endpoint configured for workflow kind {}, treating as no-op", kind);
            return Ok(());
        };

        tokio::select! {
            result = self.client.post(url).json(inputs).send() => {
                result.map(|_| ()).map_err(AppError::from)
            }
            _ = cancel.cancelled() => Err(AppError::Cancelled),
        }
    }
}

pub struct WorkflowExecutor {
    config: WorkflowConfig,
    action: Arc<dyn WorkflowAction>,
    cognition: Option<Arc<CognitiveEngine>>,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
    cancellations: Arc<RwLock<HashMap<WorkflowId, CancellationToken>>>,
    queue_tx: mpsc::Sender<QueuedWorkflow>,
}

struct QueuedWorkflow {
    workflow: Workflow,
}

impl WorkflowExecutor {
    pub fn new(config: WorkflowConfig, action: Arc<dyn WorkflowAction>, cognition: Option<Arc<CognitiveEngine>>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let max_concurrent = config.max_concurrent;

        let executor = Arc::new(Self {
            config,
            action,
            cognition,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: AtomicUsize::new(0),
            workflows: Arc::new(RwLock::new(HashMap::new())),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
            queue_tx,
        });

        let worker = Arc::clone(&executor);
        tokio::spawn(async move { worker.drain(queue_rx).await });

        executor
    }

    /// Build the workflow from a review outcome and enqueue it. Returns `StorageUnavailable` if
    /// the bounded queue is full (§4.9 backpressure).
    pub async fn submit(&self, event: &EventEnvelope, outcome: &ReviewOutcome) -> AppResult<WorkflowId> {
        let kind = resolve_workflow_kind(outcome, event.vector);
        let id = WorkflowId::new_v4();
        let workflow = Workflow {
            id,
            kind,
            inputs: event.payload.clone(),
            state: WorkflowState::Pending,
            started_ts: event.received_ts,
            ended_ts: None,
        };

        self.workflows.write().await.insert(id, workflow.clone());
        self.queue_tx
            .try_send(QueuedWorkflow { workflow })
            .map_err(|_| AppError::StorageUnavailable("workflow queue is full".to_string()))?;
        Ok(id)
    }

    pub async fn status(&self, id: WorkflowId) -> Option<Workflow> {
        self.workflows.read().await.get(&id).cloned()
    }

    /// Number of workflows currently running, for the Orchestration API's `/status` endpoint.
    pub fn active_count(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub async fn cancel(&self, id: WorkflowId) -> AppResult<()> {
        let cancellations = self.cancellations.read().await;
        match cancellations.get(&id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("workflow {} not found or already finished", id))),
        }
    }

    async fn drain(self: Arc<Self>, mut queue_rx: mpsc::Receiver<QueuedWorkflow>) {
        while let Some(queued) = queue_rx.recv().await {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.in_flight.fetch_add(1, Ordering::Relaxed);
                this.run_one(queued.workflow).await;
                this.in_flight.fetch_sub(1, Ordering::Relaxed);
                drop(permit);
            });
        }
    }

    async fn run_one(&self, mut workflow: Workflow) {
        let token = CancellationToken::new();
        self.cancellations.write().await.insert(workflow.id, token.clone());

        self.set_state(workflow.id, WorkflowState::Running).await;

        let timeout = std::time::Duration::from_secs(self.config.default_timeout_seconds);
        let result = tokio::select! {
            r = tokio::time::timeout(timeout, self.action.run(workflow.kind, &workflow.inputs, token.clone())) => r,
            _ = token.cancelled() => Ok(Err(AppError::Cancelled)),
        };

        let final_state = match result {
            Ok(Ok(())) => WorkflowState::Succeeded,
            Ok(Err(AppError::Cancelled)) => WorkflowState::Cancelled,
            Ok(Err(e)) => {
                tracing::warn!("workflow {} failed: {}", workflow.id, e);
                WorkflowState::Failed
            }
            Err(_) => {
                tracing::warn!("workflow {} timed out after {:?}", workflow.id, timeout);
                WorkflowState::Cancelled
            }
        };

        workflow.state = final_state;
        workflow.ended_ts = Some(now_unix());
        self.workflows.write().await.insert(workflow.id, workflow.clone());
        self.cancellations.write().await.remove(&workflow.id);

        if let Some(cognition) = &self.cognition {
            let confidence = if final_state == WorkflowState::Succeeded { 1.0 } else { 0.0 };
            cognition
                .observe(Observation {
                    signature: format!("workflow:{}", workflow.kind),
                    confidence,
                    ts: workflow.started_ts,
                })
                .await;
        }
    }

    async fn set_state(&self, id: WorkflowId, state: WorkflowState) {
        if let Some(workflow) = self.workflows.write().await.get_mut(&id) {
            workflow.state = state;
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAction;

    #[async_trait]
    impl WorkflowAction for NoopAction {
        async fn run(&self, _kind: WorkflowKind, _inputs: &Value, _cancel: CancellationToken) -> AppResult<()> {
            Ok(())
        }
    }

    struct HangingAction;

    #[async_trait]
    impl WorkflowAction for HangingAction {
        async fn run(&self, _kind: WorkflowKind, _inputs: &Value, _cancel: CancellationToken) -> AppResult<()> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn outcome(consensus: Consensus, score: f64) -> ReviewOutcome {
        ReviewOutcome {
            panel_topic: "sms-spam".into(),
            responses: vec![],
            aggregate_score: score,
            consensus,
            decision: "test".into(),
        }
    }

    #[test]
    fn agree_with_high_score_quarantines() {
        let kind = resolve_workflow_kind(&outcome(Consensus::Agree, 0.9), Vector::Sms);
        assert_eq!(kind, WorkflowKind::Quarantine);
    }

    #[test]
    fn agree_with_low_score_dispatches_response() {
        let kind = resolve_workflow_kind(&outcome(Consensus::Agree, 0.2), Vector::Sms);
        assert_eq!(kind, WorkflowKind::DispatchResponse);
    }

    #[test]
    fn timeout_consensus_always_drops() {
        let kind = resolve_workflow_kind(&outcome(Consensus::Timeout, 0.95), Vector::Sms);
        assert_eq!(kind, WorkflowKind::Drop);
    }

    #[tokio::test]
    async fn submitted_workflow_runs_to_completion() {
        let mut config = WorkflowConfig::default();
        config.default_timeout_seconds = 5;
        let executor = WorkflowExecutor::new(config, Arc::new(NoopAction), None);

        let event = EventEnvelope {
            vector: Vector::Sms,
            source_id: "sms-gw-1".into(),
            received_ts: 0,
            payload: Value::Null,
            correlation_id: "corr-1".into(),
        };
        let id = executor.submit(&event, &outcome(Consensus::Agree, 0.9)).await.unwrap();

        for _ in 0..50 {
            if let Some(workflow) = executor.status(id).await {
                if workflow.state.is_terminal() {
                    assert_eq!(workflow.state, WorkflowState::Succeeded);
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("workflow did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn cancel_transitions_a_running_workflow_to_cancelled() {
        let mut config = WorkflowConfig::default();
        config.default_timeout_seconds = 3600;
        let executor = WorkflowExecutor::new(config, Arc::new(HangingAction), None);

        let event = EventEnvelope {
            vector: Vector::Sms,
            source_id: "sms-gw-1".into(),
            received_ts: 0,
            payload: Value::Null,
            correlation_id: "corr-2".into(),
        };
        let id = executor.submit(&event, &outcome(Consensus::Agree, 0.9)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        executor.cancel(id).await.unwrap();

        for _ in 0..50 {
            if let Some(workflow) = executor.status(id).await {
                if workflow.state.is_terminal() {
                    assert_eq!(workflow.state, WorkflowState::Cancelled);
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("workflow did not reach cancelled state in time");
    }
}
