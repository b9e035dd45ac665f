//! Periodic provider health checks.
//!
//! The [`HealthMonitor`] pings every registered provider on a fixed interval,
//! in parallel, each ping bounded by a timeout.  Outcomes are fed into
//! [`CapabilityRegistry::record_ping`], which owns the status transitions.
//! The loop runs on its own tokio task and never holds a registry lock while
//! a ping is in flight, so dispatch is never blocked by a slow provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::{CapabilityRegistry, HealthStatus, ProviderId};

/// Default interval between two health-check rounds.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default timeout for a single ping.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Background health checker for a [`CapabilityRegistry`].
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    registry: CapabilityRegistry,
    interval: Duration,
    ping_timeout: Duration,
    shutdown: AtomicBool,
    notify: Notify,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self::with_timing(registry, DEFAULT_CHECK_INTERVAL, DEFAULT_PING_TIMEOUT)
    }

    #[must_use]
    pub fn with_timing(
        registry: CapabilityRegistry,
        interval: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                registry,
                interval,
                ping_timeout,
                shutdown: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Spawn the check loop.  The first round runs immediately.
    ///
    /// Returns a [`JoinHandle`] that resolves after [`HealthMonitor::shutdown`].
    pub fn start(&self) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                interval_ms = monitor.inner.interval.as_millis() as u64,
                "health monitor started"
            );

            let mut ticker = tokio::time::interval(monitor.inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if monitor.inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check_once().await;
                    }
                    _ = monitor.inner.notify.notified() => {}
                }
            }

            tracing::info!("health monitor stopped");
        })
    }

    /// Ping every registered provider once and apply the outcomes.
    ///
    /// Returns the resulting status per provider, ordered by provider id.
    pub async fn check_once(&self) -> Vec<(ProviderId, HealthStatus)> {
        let handles = self.inner.registry.handles();
        let timeout = self.inner.ping_timeout;

        let pings = handles.into_iter().map(|(id, handle)| async move {
            let healthy = matches!(tokio::time::timeout(timeout, handle.ping()).await, Ok(true));
            (id, healthy)
        });
        let outcomes = join_all(pings).await;

        let mut statuses = Vec::with_capacity(outcomes.len());
        for (id, healthy) in outcomes {
            // The provider may have been deregistered while its ping was in flight.
            match self.inner.registry.record_ping(&id, healthy) {
                Ok(status) => statuses.push((id, status)),
                Err(e) => tracing::debug!(provider_id = %id, error = %e, "ping result dropped"),
            }
        }
        statuses
    }

    /// Stop the check loop after the current round.
    pub fn shutdown(&self) {
        tracing::info!("health monitor shutdown requested");
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityDescriptor, CapabilityProvider};
    use crate::error::Result;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicU32;

    struct Pingable {
        id: &'static str,
        alive: AtomicBool,
        delay: Duration,
        pings: AtomicU32,
    }

    impl Pingable {
        fn new(id: &'static str, alive: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id,
                alive: AtomicBool::new(alive),
                delay,
                pings: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CapabilityProvider for Pingable {
        fn id(&self) -> &str {
            self.id
        }
        fn capabilities(&self) -> Vec<CapabilityDescriptor> {
            vec![CapabilityDescriptor::new("source_search", "test")]
        }
        async fn invoke(&self, _capability: &str, params: Value) -> Result<Value> {
            Ok(params)
        }
        async fn ping(&self) -> bool {
            self.pings.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn three_failed_rounds_mark_unreachable() {
        let registry = CapabilityRegistry::new();
        let flaky = Pingable::new("flaky", false, Duration::ZERO);
        registry.register(flaky.clone()).unwrap();
        let monitor = HealthMonitor::new(registry.clone());

        assert_eq!(monitor.check_once().await[0].1, HealthStatus::Degraded);
        assert_eq!(monitor.check_once().await[0].1, HealthStatus::Degraded);
        assert_eq!(monitor.check_once().await[0].1, HealthStatus::Unreachable);

        flaky.alive.store(true, Ordering::SeqCst);
        assert_eq!(monitor.check_once().await[0].1, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn slow_ping_counts_as_failure() {
        let registry = CapabilityRegistry::new();
        registry
            .register(Pingable::new("slow", true, Duration::from_millis(200)))
            .unwrap();
        registry
            .register(Pingable::new("fast", true, Duration::ZERO))
            .unwrap();

        let monitor = HealthMonitor::with_timing(
            registry.clone(),
            Duration::from_secs(30),
            Duration::from_millis(20),
        );
        let statuses = monitor.check_once().await;
        assert_eq!(
            statuses,
            vec![
                ("fast".to_string(), HealthStatus::Healthy),
                ("slow".to_string(), HealthStatus::Degraded),
            ]
        );
    }

    #[tokio::test]
    async fn pings_run_in_parallel() {
        let registry = CapabilityRegistry::new();
        for id in ["a", "b", "c", "d"] {
            registry
                .register(Pingable::new(id, true, Duration::from_millis(80)))
                .unwrap();
        }
        let monitor = HealthMonitor::new(registry);

        let started = std::time::Instant::now();
        monitor.check_once().await;
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn loop_runs_until_shutdown() {
        let registry = CapabilityRegistry::new();
        let provider = Pingable::new("p", true, Duration::ZERO);
        registry.register(provider.clone()).unwrap();

        let monitor = HealthMonitor::with_timing(
            registry,
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        let handle = monitor.start();
        tokio::time::sleep(Duration::from_millis(60)).await;

        monitor.shutdown();
        handle.await.expect("monitor should exit cleanly");
        assert!(provider.pings.load(Ordering::SeqCst) >= 2);
    }
}
