//! Capability dispatcher.
//!
//! The dispatcher turns an [`InvocationRequest`] into a tracked task: it
//! validates the parameters against the capability's declared schema,
//! selects a provider through the [`CapabilityRegistry`], invokes it under a
//! timeout, and records the outcome in the provider's metrics.
//!
//! # Task lifecycle
//!
//! ```text
//! Pending  -->  Running  -->  Completed
//!                        \->  Failed
//! ```
//!
//! A task is immutable once it reaches `Completed` or `Failed`.  Every status
//! change is published on the [`IpcBus`] as [`Event::TaskStatusChanged`].
//!
//! # Modes
//!
//! * **Sync** -- `execute` waits for the provider (bounded by the timeout) and
//!   returns the terminal task.  The call itself runs on a spawned tokio task,
//!   so a caller that gives up early (an outer timeout, a dropped future)
//!   detaches from it instead of cancelling it; the task still finishes and
//!   its provider metrics are still recorded.
//! * **Async** -- `execute` returns the `Pending` task immediately and runs
//!   the call on a spawned tokio task.  Completion is observed by polling
//!   [`Dispatcher::status`], by listening on the bus, or through a
//!   [`TaskObservation`].  Dropping an observation never cancels the call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::capability::CapabilityProvider;
use crate::error::{KernelError, Result};
use crate::ipc::{Event, IpcBus};
use crate::registry::CapabilityRegistry;

/// Default timeout applied when a request does not carry its own.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Unique, time-ordered task identifier (UUID v7).
pub type TaskId = Uuid;

/// Lifecycle state of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Recorded, not yet handed to the provider.
    Pending,
    /// The provider call is in flight.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How [`Dispatcher::execute`] waits for the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sync,
    Async,
}

/// Failure class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// No selectable provider, or the pinned provider is unreachable.
    ProviderUnavailable,
    /// The provider did not answer in time.
    Timeout,
    /// The provider rejected the parameters.
    InvalidParams,
    /// The provider ran and failed.
    ProviderError,
}

/// Error recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    /// Deadline that expired, for `Timeout` errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timeout_ms: None,
        }
    }

    /// `ProviderUnavailable` and `Timeout` are worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            TaskErrorKind::ProviderUnavailable | TaskErrorKind::Timeout
        )
    }

    fn from_kernel(err: &KernelError) -> Self {
        let kind = match err {
            KernelError::NoProviderAvailable { .. } | KernelError::ProviderUnreachable { .. } => {
                TaskErrorKind::ProviderUnavailable
            }
            KernelError::Timeout { .. } => TaskErrorKind::Timeout,
            KernelError::InvalidParams { .. } => TaskErrorKind::InvalidParams,
            _ => TaskErrorKind::ProviderError,
        };
        let mut error = Self::new(kind, err.to_string());
        if let KernelError::Timeout { timeout_ms, .. } = err {
            error.timeout_ms = Some(*timeout_ms);
        }
        error
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Inbound request to run a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub capability_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Overrides the dispatcher's default timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Bypass provider selection and use this provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

impl InvocationRequest {
    pub fn new(capability: impl Into<String>, parameters: Value) -> Self {
        Self {
            capability_name: capability.into(),
            parameters,
            mode: ExecutionMode::Sync,
            timeout_ms: None,
            provider_id: None,
        }
    }

    pub fn asynchronous(mut self) -> Self {
        self.mode = ExecutionMode::Async;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn on_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }
}

/// Snapshot of a task visible to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub capability: String,
    pub provider_id: Option<String>,
    pub params: Value,
    pub mode: ExecutionMode,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskInfo {
    /// Convert a terminal task into its result value or a [`KernelError`].
    pub fn into_result(self) -> Result<Value> {
        match (self.status, self.error) {
            (TaskStatus::Completed, _) => Ok(self.result.unwrap_or(Value::Null)),
            (_, Some(error)) => {
                let provider_id = self.provider_id.unwrap_or_default();
                Err(match error.kind {
                    TaskErrorKind::ProviderUnavailable => KernelError::NoProviderAvailable {
                        capability: self.capability,
                    },
                    TaskErrorKind::Timeout => KernelError::Timeout {
                        capability: self.capability,
                        provider_id,
                        timeout_ms: error.timeout_ms.unwrap_or_default(),
                    },
                    TaskErrorKind::InvalidParams => KernelError::InvalidParams {
                        capability: self.capability,
                        reason: error.message,
                    },
                    TaskErrorKind::ProviderError => KernelError::ProviderError {
                        provider_id,
                        reason: error.message,
                    },
                })
            }
            (status, None) => Err(KernelError::Internal(format!(
                "task {} is not finished ({status:?})",
                self.task_id
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Executes capability calls against registered providers.
///
/// The dispatcher is cheaply cloneable (`Arc`-backed) and safe to share across
/// threads and async tasks.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: CapabilityRegistry,
    bus: IpcBus,
    /// Authoritative task metadata.
    tasks: DashMap<TaskId, TaskInfo>,
    default_timeout: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: CapabilityRegistry, bus: IpcBus) -> Self {
        Self::with_default_timeout(registry, bus, DEFAULT_DISPATCH_TIMEOUT)
    }

    #[must_use]
    pub fn with_default_timeout(
        registry: CapabilityRegistry,
        bus: IpcBus,
        default_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                bus,
                tasks: DashMap::new(),
                default_timeout,
            }),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.inner.registry
    }

    pub fn bus(&self) -> &IpcBus {
        &self.inner.bus
    }

    /// Execute a capability.
    ///
    /// Unknown capabilities and schema mismatches are returned as `Err`
    /// before anything is dispatched, and no task is recorded.  Every other
    /// failure is reported on the returned task.
    pub async fn execute(&self, request: InvocationRequest) -> Result<TaskInfo> {
        let InvocationRequest {
            capability_name: capability,
            parameters: params,
            mode,
            timeout_ms,
            provider_id: pinned,
        } = request;

        let descriptor = self.inner.registry.descriptor(&capability)?;
        descriptor.param_schema.validate(&capability, &params)?;

        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.inner.default_timeout);

        let selection = match &pinned {
            Some(id) => match self.inner.registry.check_pinned(id, &capability) {
                Ok(()) => Ok(id.clone()),
                Err(e @ KernelError::ProviderUnreachable { .. }) => Err(e),
                Err(e) => return Err(e),
            },
            None => match self.inner.registry.resolve_provider(&capability) {
                Ok(id) => Ok(id),
                Err(e @ KernelError::NoProviderAvailable { .. }) => Err(e),
                Err(e) => return Err(e),
            },
        };

        let task_id = Uuid::now_v7();
        let mut info = TaskInfo {
            task_id,
            capability: capability.clone(),
            provider_id: selection.as_ref().ok().cloned(),
            params: params.clone(),
            mode,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let provider_id = match selection {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(task_id = %task_id, capability = %capability, error = %e, "dispatch without provider");
                info.status = TaskStatus::Failed;
                info.error = Some(TaskError::from_kernel(&e));
                info.completed_at = Some(Utc::now());
                self.inner.tasks.insert(task_id, info.clone());
                self.publish_status(&info);
                return Ok(info);
            }
        };

        let handle = self.inner.registry.provider(&provider_id)?;
        self.inner.tasks.insert(task_id, info.clone());
        self.publish_status(&info);

        tracing::debug!(
            task_id = %task_id,
            capability = %capability,
            provider_id = %provider_id,
            ?mode,
            "task dispatched"
        );

        let run = RunSpec {
            task_id,
            capability,
            provider_id,
            params,
            timeout,
        };

        match mode {
            ExecutionMode::Sync => {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.run(run, handle).await })
                    .await
                    .map_err(|e| KernelError::Internal(format!("task {task_id} aborted: {e}")))
            }
            ExecutionMode::Async => {
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    dispatcher.run(run, handle).await;
                });
                Ok(info)
            }
        }
    }

    /// Execute synchronously and unwrap the task into its result.
    pub async fn invoke(&self, capability: &str, params: Value) -> Result<Value> {
        self.execute(InvocationRequest::new(capability, params))
            .await?
            .into_result()
    }

    /// Query the current state of a task.
    pub fn status(&self, task_id: TaskId) -> Result<TaskInfo> {
        self.inner
            .tasks
            .get(&task_id)
            .map(|entry| entry.clone())
            .ok_or(KernelError::TaskNotFound { task_id })
    }

    /// Snapshot of every known task, oldest first.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut all: Vec<TaskInfo> = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|t| t.task_id);
        all
    }

    /// Forget terminal tasks that finished more than `max_age` ago.
    ///
    /// Returns the number of tasks removed.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };
        let before = self.inner.tasks.len();
        self.inner.tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff))
        });
        before - self.inner.tasks.len()
    }

    /// Observe a task until it reaches a terminal state.
    pub fn observe(&self, task_id: TaskId) -> Result<TaskObservation> {
        // Subscribe before checking so a completion in between is not missed.
        let events = self.inner.bus.subscribe();
        self.status(task_id)?;
        Ok(TaskObservation {
            dispatcher: self.clone(),
            task_id,
            events,
        })
    }

    // -- Private helpers ----------------------------------------------------

    async fn run(&self, run: RunSpec, handle: Arc<dyn CapabilityProvider>) -> TaskInfo {
        let RunSpec {
            task_id,
            capability,
            provider_id,
            params,
            timeout,
        } = run;

        self.update(task_id, |task| {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        });

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, handle.invoke(&capability, params)).await;
        let latency = started.elapsed();

        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskError::from_kernel(&e)),
            Err(_) => Err(TaskError::from_kernel(&KernelError::Timeout {
                capability: capability.clone(),
                provider_id: provider_id.clone(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })),
        };

        self.inner
            .registry
            .record_request(&provider_id, result.is_ok(), latency);

        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(_) => tracing::info!(
                task_id = %task_id,
                capability = %capability,
                provider_id = %provider_id,
                latency_ms,
                "task completed"
            ),
            Err(error) => tracing::warn!(
                task_id = %task_id,
                capability = %capability,
                provider_id = %provider_id,
                latency_ms,
                kind = ?error.kind,
                error = %error.message,
                "task failed"
            ),
        }

        self.update(task_id, |task| {
            task.completed_at = Some(Utc::now());
            match result {
                Ok(value) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(value);
                }
                Err(error) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(error);
                }
            }
        })
    }

    /// Mutate a task in place, publish the new status and return a snapshot.
    fn update(&self, task_id: TaskId, f: impl FnOnce(&mut TaskInfo)) -> TaskInfo {
        let snapshot = match self.inner.tasks.get_mut(&task_id) {
            Some(mut entry) => {
                f(&mut entry);
                entry.clone()
            }
            None => {
                // Pruned while running; keep reporting through a detached record.
                let mut detached = TaskInfo {
                    task_id,
                    capability: String::new(),
                    provider_id: None,
                    params: Value::Null,
                    mode: ExecutionMode::Async,
                    status: TaskStatus::Pending,
                    result: None,
                    error: None,
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                };
                f(&mut detached);
                detached
            }
        };
        self.publish_status(&snapshot);
        snapshot
    }

    fn publish_status(&self, task: &TaskInfo) {
        self.inner.bus.publish(Event::TaskStatusChanged {
            task_id: task.task_id,
            capability: task.capability.clone(),
            provider_id: task.provider_id.clone(),
            status: task.status,
            timestamp: Utc::now(),
        });
    }
}

struct RunSpec {
    task_id: TaskId,
    capability: String,
    provider_id: String,
    params: Value,
    timeout: Duration,
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Waits for one task to finish.
///
/// Dropping the observation only stops waiting; the provider call continues.
pub struct TaskObservation {
    dispatcher: Dispatcher,
    task_id: TaskId,
    events: broadcast::Receiver<Arc<Event>>,
}

impl TaskObservation {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Resolve to the terminal task.
    pub async fn wait(mut self) -> Result<TaskInfo> {
        loop {
            let current = self.dispatcher.status(self.task_id)?;
            if current.status.is_terminal() {
                return Ok(current);
            }

            // Skip unrelated events until ours changes; re-read on lag.
            loop {
                match self.events.recv().await {
                    Ok(event) => {
                        if let Event::TaskStatusChanged {
                            task_id, status, ..
                        } = event.as_ref()
                            && *task_id == self.task_id
                            && status.is_terminal()
                        {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(task_id = %self.task_id, skipped, "observation lagged");
                        break;
                    }
                    Err(RecvError::Closed) => return self.dispatcher.status(self.task_id),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityDescriptor, ParamKind, ParamSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo {
        id: &'static str,
        delay: Duration,
        fail: bool,
        calls: AtomicU32,
    }

    impl Echo {
        fn new(id: &'static str) -> Arc<Self> {
            Self::with(id, Duration::ZERO, false)
        }

        fn with(id: &'static str, delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                delay,
                fail,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CapabilityProvider for Echo {
        fn id(&self) -> &str {
            self.id
        }
        fn capabilities(&self) -> Vec<CapabilityDescriptor> {
            vec![
                CapabilityDescriptor::new("echo", "returns its params")
                    .with_schema(ParamSchema::empty().required("text", ParamKind::String)),
            ]
        }
        async fn invoke(&self, _capability: &str, params: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(KernelError::provider(self.id, "boom"));
            }
            Ok(json!({ "echo": params["text"], "by": self.id }))
        }
    }

    fn setup(provider: Arc<Echo>) -> Dispatcher {
        let registry = CapabilityRegistry::new();
        registry.register(provider).unwrap();
        Dispatcher::new(registry, IpcBus::new(64))
    }

    #[tokio::test]
    async fn sync_execute_completes() {
        let dispatcher = setup(Echo::new("p1"));
        let task = dispatcher
            .execute(InvocationRequest::new("echo", json!({ "text": "hi" })))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_ref().unwrap()["echo"], "hi");
        assert_eq!(task.provider_id.as_deref(), Some("p1"));
        assert!(task.started_at.is_some() && task.completed_at.is_some());

        let metrics = dispatcher.registry().summary("p1").unwrap().metrics;
        assert_eq!(metrics.requests, 1);
        assert_eq!(metrics.successes, 1);
    }

    #[tokio::test]
    async fn unknown_capability_fails_fast() {
        let dispatcher = setup(Echo::new("p1"));
        let err = dispatcher
            .execute(InvocationRequest::new("nope", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::UnknownCapability { .. }));
        assert!(dispatcher.tasks().is_empty());
    }

    #[tokio::test]
    async fn invalid_params_fail_fast_without_dispatch() {
        let provider = Echo::new("p1");
        let dispatcher = setup(provider.clone());
        let err = dispatcher
            .execute(InvocationRequest::new("echo", json!({ "text": 5 })))
            .await
            .unwrap_err();

        assert!(matches!(err, KernelError::InvalidParams { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.tasks().is_empty());
    }

    #[tokio::test]
    async fn sync_timeout_fails_task_and_counts_failure() {
        let dispatcher = setup(Echo::with("slow", Duration::from_millis(500), false));
        let task = dispatcher
            .execute(
                InvocationRequest::new("echo", json!({ "text": "x" }))
                    .with_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.clone().unwrap();
        assert_eq!(error.kind, TaskErrorKind::Timeout);
        assert_eq!(error.timeout_ms, Some(20));
        assert!(error.is_retryable());

        match task.into_result() {
            Err(KernelError::Timeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 20),
            other => panic!("expected timeout, got {other:?}"),
        }

        let metrics = dispatcher.registry().summary("slow").unwrap().metrics;
        assert_eq!(metrics.failures, 1);
    }

    #[tokio::test]
    async fn abandoned_sync_call_still_finishes() {
        let provider = Echo::with("slow", Duration::from_millis(60), false);
        let dispatcher = setup(provider.clone());

        let call = dispatcher.execute(InvocationRequest::new("echo", json!({ "text": "x" })));
        assert!(
            tokio::time::timeout(Duration::from_millis(10), call)
                .await
                .is_err()
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        let tasks = dispatcher.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert!(tasks[0].completed_at.is_some());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let metrics = dispatcher.registry().summary("slow").unwrap().metrics;
        assert_eq!(metrics.requests, 1);
        assert_eq!(metrics.successes, 1);
    }

    #[tokio::test]
    async fn provider_error_is_not_retryable() {
        let dispatcher = setup(Echo::with("bad", Duration::ZERO, true));
        let task = dispatcher
            .execute(InvocationRequest::new("echo", json!({ "text": "x" })))
            .await
            .unwrap();

        let error = task.error.clone().unwrap();
        assert_eq!(error.kind, TaskErrorKind::ProviderError);
        assert!(!error.is_retryable());
        assert!(matches!(
            task.into_result(),
            Err(KernelError::ProviderError { .. })
        ));
    }

    #[tokio::test]
    async fn no_provider_available_records_failed_task() {
        let dispatcher = setup(Echo::new("p1"));
        for _ in 0..3 {
            dispatcher.registry().record_ping("p1", false).unwrap();
        }

        let task = dispatcher
            .execute(InvocationRequest::new("echo", json!({ "text": "x" })))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().kind, TaskErrorKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn async_execute_returns_pending_then_completes() {
        let dispatcher = setup(Echo::with("p1", Duration::from_millis(30), false));
        let task = dispatcher
            .execute(InvocationRequest::new("echo", json!({ "text": "later" })).asynchronous())
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let done = dispatcher.observe(task.task_id).unwrap().wait().await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.unwrap()["echo"], "later");
        assert_eq!(
            dispatcher.status(task.task_id).unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn async_completion_is_pushed_on_bus() {
        let dispatcher = setup(Echo::with("p1", Duration::from_millis(10), false));
        let mut rx = dispatcher.bus().subscribe();

        let task = dispatcher
            .execute(InvocationRequest::new("echo", json!({ "text": "x" })).asynchronous())
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.recv().await {
            if let Event::TaskStatusChanged {
                task_id, status, ..
            } = event.as_ref()
                && *task_id == task.task_id
            {
                seen.push(*status);
                if status.is_terminal() {
                    break;
                }
            }
        }
        assert_eq!(
            seen,
            vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Completed]
        );
    }

    #[tokio::test]
    async fn dropped_observation_does_not_cancel() {
        let provider = Echo::with("p1", Duration::from_millis(30), false);
        let dispatcher = setup(provider.clone());
        let task = dispatcher
            .execute(InvocationRequest::new("echo", json!({ "text": "x" })).asynchronous())
            .await
            .unwrap();

        drop(dispatcher.observe(task.task_id).unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            dispatcher.status(task.task_id).unwrap().status,
            TaskStatus::Completed
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pinned_provider_is_used() {
        let registry = CapabilityRegistry::new();
        registry.register(Echo::new("a")).unwrap();
        registry.register(Echo::new("b")).unwrap();
        let dispatcher = Dispatcher::new(registry, IpcBus::default());

        for _ in 0..3 {
            let value = dispatcher
                .execute(InvocationRequest::new("echo", json!({ "text": "x" })).on_provider("b"))
                .await
                .unwrap()
                .into_result()
                .unwrap();
            assert_eq!(value["by"], "b");
        }
    }

    #[tokio::test]
    async fn invocation_request_wire_shape() {
        let request: InvocationRequest = serde_json::from_value(json!({
            "capability_name": "echo",
            "parameters": { "text": "wire" },
            "mode": "async"
        }))
        .unwrap();
        assert_eq!(request.mode, ExecutionMode::Async);

        let dispatcher = setup(Echo::new("p1"));
        let task = dispatcher.execute(request).await.unwrap();
        let wire = serde_json::to_value(&task).unwrap();
        assert_eq!(wire["status"], "pending");
        assert!(wire.get("task_id").is_some());
        assert!(wire.get("completed_at").is_none());
    }

    #[tokio::test]
    async fn prune_removes_only_old_terminal_tasks() {
        let dispatcher = setup(Echo::new("p1"));
        dispatcher.invoke("echo", json!({ "text": "x" })).await.unwrap();

        assert_eq!(dispatcher.prune_finished(Duration::from_secs(3600)), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(dispatcher.prune_finished(Duration::ZERO), 1);
        assert!(dispatcher.tasks().is_empty());
    }
}
