//! Integration tests for the leadflow-kernel crate.
//!
//! These tests exercise the registry, health monitor, dispatcher and IPC bus
//! as integrated subsystems.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use leadflow_kernel::{
    CapabilityDescriptor, CapabilityProvider, CapabilityRegistry, DiscoveryFilter, Dispatcher,
    Event, HealthMonitor, HealthStatus, InvocationRequest, IpcBus, KernelError, ParamKind,
    ParamSchema, Result, TaskErrorKind, TaskStatus,
};

struct Worker {
    id: String,
    alive: AtomicBool,
    calls: AtomicU32,
}

impl Worker {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            alive: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CapabilityProvider for Worker {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![
            CapabilityDescriptor::new("source_search", "search one source")
                .with_schema(ParamSchema::empty().required("criteria", ParamKind::Object)),
        ]
    }

    async fn invoke(&self, _capability: &str, _params: Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "provider": self.id }))
    }

    async fn ping(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Health monitor + registry + dispatcher
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unreachable_provider_is_skipped_by_dispatch() {
    let bus = IpcBus::new(128);
    let registry = CapabilityRegistry::with_bus(bus.clone());
    let a = Worker::new("a");
    let b = Worker::new("b");
    registry.register(a.clone()).unwrap();
    registry.register(b.clone()).unwrap();

    b.alive.store(false, Ordering::SeqCst);
    let monitor = HealthMonitor::new(registry.clone());
    for _ in 0..3 {
        monitor.check_once().await;
    }
    assert_eq!(
        registry.summary("b").unwrap().health.status,
        HealthStatus::Unreachable
    );

    let dispatcher = Dispatcher::new(registry.clone(), bus);
    for _ in 0..6 {
        let value = dispatcher
            .invoke("source_search", json!({ "criteria": {} }))
            .await
            .unwrap();
        assert_eq!(value["provider"], "a");
    }
    assert_eq!(a.calls.load(Ordering::SeqCst), 6);
    assert_eq!(b.calls.load(Ordering::SeqCst), 0);

    // One good ping brings it back into rotation.
    b.alive.store(true, Ordering::SeqCst);
    monitor.check_once().await;
    let picks: Vec<String> = (0..2)
        .map(|_| registry.resolve_provider("source_search").unwrap())
        .collect();
    assert!(picks.contains(&"b".to_string()));
}

#[tokio::test]
async fn health_transitions_are_published() {
    let bus = IpcBus::new(128);
    let mut rx = bus.subscribe();
    let registry = CapabilityRegistry::with_bus(bus);
    let worker = Worker::new("w");
    registry.register(worker.clone()).unwrap();
    worker.alive.store(false, Ordering::SeqCst);

    let monitor = HealthMonitor::new(registry);
    for _ in 0..4 {
        monitor.check_once().await;
    }

    let mut transitions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::ProviderHealthChanged { from, to, .. } = event.as_ref() {
            transitions.push((*from, *to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (HealthStatus::Healthy, HealthStatus::Degraded),
            (HealthStatus::Degraded, HealthStatus::Unreachable),
        ]
    );
}

#[tokio::test]
async fn all_unreachable_yields_failed_task_not_error() {
    let registry = CapabilityRegistry::new();
    let worker = Worker::new("only");
    registry.register(worker.clone()).unwrap();
    for _ in 0..3 {
        registry.record_ping("only", false).unwrap();
    }

    let dispatcher = Dispatcher::new(registry, IpcBus::default());
    let task = dispatcher
        .execute(InvocationRequest::new("source_search", json!({ "criteria": {} })))
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert_eq!(error.kind, TaskErrorKind::ProviderUnavailable);
    assert!(error.is_retryable());
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn schema_violation_is_rejected_before_dispatch() {
    let registry = CapabilityRegistry::new();
    let worker = Worker::new("w");
    registry.register(worker.clone()).unwrap();
    let dispatcher = Dispatcher::new(registry, IpcBus::default());

    let err = dispatcher
        .execute(InvocationRequest::new("source_search", json!({ "criteria": "saas" })))
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::InvalidParams { .. }));
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    assert!(dispatcher.tasks().is_empty());
}

#[tokio::test]
async fn async_tasks_complete_in_background() {
    let registry = CapabilityRegistry::new();
    registry.register(Worker::new("w")).unwrap();
    let dispatcher = Dispatcher::new(registry.clone(), IpcBus::default());

    let mut ids = Vec::new();
    for _ in 0..5 {
        let task = dispatcher
            .execute(
                InvocationRequest::new("source_search", json!({ "criteria": {} })).asynchronous(),
            )
            .await
            .unwrap();
        ids.push(task.task_id);
    }

    for id in ids {
        let observation = dispatcher.observe(id).unwrap();
        let done = tokio::time::timeout(Duration::from_secs(2), observation.wait())
            .await
            .expect("task should finish")
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
    }

    let stats = registry.stats();
    assert_eq!(stats.total_requests, 5);
    assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);
}

#[test]
fn discovery_is_a_sorted_snapshot() {
    let registry = CapabilityRegistry::new();
    for id in ["zeta", "alpha", "mid"] {
        registry.register(Worker::new(id)).unwrap();
    }
    registry.record_ping("mid", false).unwrap();

    let ids: Vec<String> = registry
        .discover(&DiscoveryFilter::capability("source_search"))
        .into_iter()
        .map(|s| s.provider_id)
        .collect();
    assert_eq!(ids, vec!["alpha", "mid", "zeta"]);

    let degraded = registry.discover(&DiscoveryFilter {
        capability: None,
        health: Some(HealthStatus::Degraded),
    });
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].provider_id, "mid");
}
