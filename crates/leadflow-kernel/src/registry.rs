//! Capability registry.
//!
//! The registry tracks every capability provider known to the kernel: which
//! capabilities it declares, its health as observed by the health monitor,
//! and the request metrics recorded by the dispatcher.
//!
//! Internally the registry is backed by [`DashMap`], which gives per-entry
//! write locking (one writer at a time per provider entry) and lets readers
//! proceed concurrently.  Every read API returns an owned snapshot, so no
//! caller ever holds a map guard across an `.await`.  Registration and
//! deregistration touch two maps and are additionally serialized by a small
//! mutex.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use leadflow_kernel::registry::{CapabilityRegistry, DiscoveryFilter};
//! # fn example(provider: Arc<dyn leadflow_kernel::CapabilityProvider>) {
//! let registry = CapabilityRegistry::new();
//! registry.register(provider).unwrap();
//!
//! let id = registry.resolve_provider("search_prospects").unwrap();
//! let all = registry.discover(&DiscoveryFilter::default());
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityDescriptor, CapabilityProvider};
use crate::error::{KernelError, Result};
use crate::ipc::{Event, IpcBus};

/// Provider identifier.
pub type ProviderId = String;

/// Consecutive ping failures after which a provider becomes unreachable.
pub const UNREACHABLE_AFTER_FAILURES: u32 = 3;

// ---------------------------------------------------------------------------
// Health & metrics
// ---------------------------------------------------------------------------

/// Health status of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Answering pings; preferred for selection.
    Healthy,
    /// Recently failed a ping; selected only when nothing healthy exists.
    Degraded,
    /// Failed [`UNREACHABLE_AFTER_FAILURES`] consecutive pings; never selected.
    Unreachable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
        };
        write!(f, "{s}")
    }
}

/// Health record of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    /// Time of the most recent ping, if any.
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl ProviderHealth {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_check: None,
            consecutive_failures: 0,
        }
    }

    /// Apply one ping outcome and return the resulting status.
    ///
    /// A success always lands on `Healthy`; failures land on `Degraded` until
    /// the third consecutive one, which lands on `Unreachable`.  Repeating an
    /// outcome never moves the status past where it already is.
    pub fn apply_ping(&mut self, healthy: bool, at: DateTime<Utc>) -> HealthStatus {
        self.last_check = Some(at);
        if healthy {
            self.consecutive_failures = 0;
            self.status = HealthStatus::Healthy;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.status = if self.consecutive_failures >= UNREACHABLE_AFTER_FAILURES {
                HealthStatus::Unreachable
            } else {
                HealthStatus::Degraded
            };
        }
        self.status
    }
}

/// Request metrics of a provider, updated by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Cumulative latency over all requests, in milliseconds.
    pub total_latency_ms: u64,
}

impl ProviderMetrics {
    /// Mean latency per request in milliseconds (0 when idle).
    pub fn average_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.requests as f64
    }
}

/// Read-only snapshot of a registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub provider_id: ProviderId,
    pub name: String,
    /// Declared capability names, sorted.
    pub capabilities: Vec<String>,
    pub health: ProviderHealth,
    pub metrics: ProviderMetrics,
    pub registered_at: DateTime<Utc>,
}

/// Filter for [`CapabilityRegistry::discover`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub health: Option<HealthStatus>,
}

impl DiscoveryFilter {
    pub fn capability(name: impl Into<String>) -> Self {
        Self {
            capability: Some(name.into()),
            health: None,
        }
    }

    fn matches(&self, summary: &ProviderSummary) -> bool {
        let capability_ok = self
            .capability
            .as_ref()
            .is_none_or(|c| summary.capabilities.iter().any(|have| have == c));
        let health_ok = self.health.is_none_or(|h| summary.health.status == h);
        capability_ok && health_ok
    }
}

/// What [`CapabilityRegistry::register`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A new provider id.
    Added,
    /// Same id, same capability set.
    Refreshed,
    /// Same id, different capability set; the new set replaced the old one.
    Replaced { previous: Vec<String> },
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_providers: usize,
    pub healthy_providers: usize,
    pub degraded_providers: usize,
    pub unreachable_providers: usize,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Percentage of successful requests (0 when idle).
    pub success_rate: f64,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct ProviderEntry {
    summary: ProviderSummary,
    handle: Arc<dyn CapabilityProvider>,
}

struct CapabilityEntry {
    descriptor: CapabilityDescriptor,
    providers: BTreeSet<ProviderId>,
    /// Round-robin cursor shared by every resolution of this capability.
    cursor: Arc<AtomicUsize>,
}

struct RegistryInner {
    providers: DashMap<ProviderId, ProviderEntry>,
    capabilities: DashMap<String, CapabilityEntry>,
    registration: Mutex<()>,
    bus: Option<IpcBus>,
}

/// Concurrent capability registry.
///
/// The registry is cheaply cloneable (`Arc`-backed) and `Send + Sync`; it is
/// created once and handed to whoever needs it.
#[derive(Clone)]
pub struct CapabilityRegistry {
    inner: Arc<RegistryInner>,
}

impl CapabilityRegistry {
    /// Create an empty registry that publishes no events.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty registry that publishes lifecycle and health events.
    #[must_use]
    pub fn with_bus(bus: IpcBus) -> Self {
        Self::build(Some(bus))
    }

    fn build(bus: Option<IpcBus>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                providers: DashMap::new(),
                capabilities: DashMap::new(),
                registration: Mutex::new(()),
                bus,
            }),
        }
    }

    // -- Registration -------------------------------------------------------

    /// Register (or re-register) a provider and index its capabilities.
    ///
    /// Re-registering an id with the same capability set keeps its health
    /// and metrics.  A different capability set replaces the old set, starts
    /// health over and logs a warning.  Declaring a capability with a different
    /// execution mode than the other providers of that capability is a
    /// [`KernelError::RegistryConflict`].
    pub fn register(&self, provider: Arc<dyn CapabilityProvider>) -> Result<RegisterOutcome> {
        let _guard = self
            .inner
            .registration
            .lock()
            .map_err(|e| KernelError::Internal(format!("registration lock poisoned: {e}")))?;

        let id = provider.id().to_string();
        let mut descriptors = provider.capabilities();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors.dedup_by(|a, b| a.name == b.name);

        for descriptor in &descriptors {
            if let Some(entry) = self.inner.capabilities.get(&descriptor.name) {
                let shared_with_others = entry.providers.iter().any(|p| p != &id);
                if shared_with_others && entry.descriptor.is_async != descriptor.is_async {
                    return Err(KernelError::RegistryConflict {
                        capability: descriptor.name.clone(),
                        reason: format!(
                            "provider {id} declares is_async={} but existing providers declare is_async={}",
                            descriptor.is_async, entry.descriptor.is_async
                        ),
                    });
                }
            }
        }

        let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        let previous = self.inner.providers.get(&id).map(|entry| {
            (
                entry.summary.capabilities.clone(),
                entry.summary.health.clone(),
                entry.summary.metrics.clone(),
            )
        });
        let (health, metrics) = match &previous {
            Some((prev, health, metrics)) if *prev == names => (health.clone(), metrics.clone()),
            Some((_, _, metrics)) => (ProviderHealth::new(), metrics.clone()),
            None => (ProviderHealth::new(), ProviderMetrics::default()),
        };

        let outcome = match previous.map(|(prev, _, _)| prev) {
            None => RegisterOutcome::Added,
            Some(prev) if prev == names => RegisterOutcome::Refreshed,
            Some(prev) => {
                tracing::warn!(
                    provider_id = %id,
                    previous = ?prev,
                    current = ?names,
                    "provider re-registered with a different capability set, last write wins"
                );
                RegisterOutcome::Replaced { previous: prev }
            }
        };

        if outcome != RegisterOutcome::Added {
            self.unindex(&id);
        }

        for descriptor in descriptors {
            let name = descriptor.name.clone();
            let mut entry = self
                .inner
                .capabilities
                .entry(name)
                .or_insert_with(|| CapabilityEntry {
                    descriptor: descriptor.clone(),
                    providers: BTreeSet::new(),
                    cursor: Arc::new(AtomicUsize::new(0)),
                });
            if entry.providers.is_empty() {
                entry.descriptor = descriptor;
            }
            entry.providers.insert(id.clone());
        }

        self.inner.providers.insert(
            id.clone(),
            ProviderEntry {
                summary: ProviderSummary {
                    provider_id: id.clone(),
                    name: provider.name().to_string(),
                    capabilities: names.clone(),
                    health,
                    metrics,
                    registered_at: Utc::now(),
                },
                handle: provider,
            },
        );

        tracing::info!(provider_id = %id, capabilities = ?names, "provider registered");
        self.publish(Event::ProviderRegistered {
            provider_id: id,
            capabilities: names,
        });

        Ok(outcome)
    }

    /// Remove a provider, its index entries and its metrics.
    ///
    /// Returns the final snapshot if the provider existed.
    pub fn deregister(&self, id: &str) -> Option<ProviderSummary> {
        // The guard holds no data; a poisoned lock is still usable.
        let _guard = self.inner.registration.lock().unwrap_or_else(|poisoned| {
            tracing::error!(provider_id = %id, "registration lock poisoned, deregistering anyway");
            poisoned.into_inner()
        });

        let removed = self.inner.providers.remove(id).map(|(_, e)| e.summary)?;
        self.unindex(id);

        tracing::info!(provider_id = %id, "provider deregistered");
        self.publish(Event::ProviderDeregistered {
            provider_id: id.to_string(),
        });
        Some(removed)
    }

    /// Drop `id` from every capability entry, removing entries left empty.
    fn unindex(&self, id: &str) {
        for mut entry in self.inner.capabilities.iter_mut() {
            entry.providers.remove(id);
        }
        self.inner
            .capabilities
            .retain(|_, entry| !entry.providers.is_empty());
    }

    // -- Lookup -------------------------------------------------------------

    /// The descriptor of a registered capability.
    pub fn descriptor(&self, capability: &str) -> Result<CapabilityDescriptor> {
        self.inner
            .capabilities
            .get(capability)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| KernelError::UnknownCapability {
                capability: capability.to_string(),
            })
    }

    /// All registered capability names, sorted.
    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .capabilities
            .iter()
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// The live handle of a provider.
    pub fn provider(&self, id: &str) -> Result<Arc<dyn CapabilityProvider>> {
        self.inner
            .providers
            .get(id)
            .map(|entry| Arc::clone(&entry.handle))
            .ok_or_else(|| KernelError::ProviderNotFound {
                provider_id: id.to_string(),
            })
    }

    /// A snapshot of one provider.
    pub fn summary(&self, id: &str) -> Result<ProviderSummary> {
        self.inner
            .providers
            .get(id)
            .map(|entry| entry.summary.clone())
            .ok_or_else(|| KernelError::ProviderNotFound {
                provider_id: id.to_string(),
            })
    }

    /// Snapshot of every provider matching `filter`, ordered by provider id.
    pub fn discover(&self, filter: &DiscoveryFilter) -> Vec<ProviderSummary> {
        let mut found: Vec<ProviderSummary> = self
            .inner
            .providers
            .iter()
            .filter(|e| filter.matches(&e.value().summary))
            .map(|e| e.value().summary.clone())
            .collect();
        found.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        found
    }

    /// Return the number of registered providers.
    pub fn count(&self) -> usize {
        self.inner.providers.len()
    }

    /// Every registered provider handle, ordered by id.
    pub(crate) fn handles(&self) -> Vec<(ProviderId, Arc<dyn CapabilityProvider>)> {
        let mut handles: Vec<_> = self
            .inner
            .providers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(&e.value().handle)))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        handles
    }

    // -- Selection ----------------------------------------------------------

    /// Pick a provider for `capability`.
    ///
    /// Round-robin among healthy providers; degraded providers are used only
    /// when no healthy one exists; unreachable providers are never returned.
    pub fn resolve_provider(&self, capability: &str) -> Result<ProviderId> {
        let (candidates, cursor) = {
            let entry = self.inner.capabilities.get(capability).ok_or_else(|| {
                KernelError::UnknownCapability {
                    capability: capability.to_string(),
                }
            })?;
            let ids: Vec<ProviderId> = entry.providers.iter().cloned().collect();
            (ids, Arc::clone(&entry.cursor))
        };

        let mut healthy = Vec::new();
        let mut degraded = Vec::new();
        for id in candidates {
            let status = match self.inner.providers.get(&id) {
                Some(entry) => entry.summary.health.status,
                None => continue,
            };
            match status {
                HealthStatus::Healthy => healthy.push(id),
                HealthStatus::Degraded => degraded.push(id),
                HealthStatus::Unreachable => {}
            }
        }

        let pool = if healthy.is_empty() { degraded } else { healthy };
        if pool.is_empty() {
            tracing::warn!(capability, "no selectable provider");
            return Err(KernelError::NoProviderAvailable {
                capability: capability.to_string(),
            });
        }

        let index = cursor.fetch_add(1, Ordering::Relaxed) % pool.len();
        let chosen = pool[index].clone();
        tracing::debug!(capability, provider_id = %chosen, "provider resolved");
        Ok(chosen)
    }

    /// Validate a caller-pinned provider for `capability`.
    pub fn check_pinned(&self, provider_id: &str, capability: &str) -> Result<()> {
        let entry =
            self.inner
                .providers
                .get(provider_id)
                .ok_or_else(|| KernelError::ProviderNotFound {
                    provider_id: provider_id.to_string(),
                })?;

        if !entry.summary.capabilities.iter().any(|c| c == capability) {
            return Err(KernelError::UnknownCapability {
                capability: format!("{capability} (on provider {provider_id})"),
            });
        }
        if entry.summary.health.status == HealthStatus::Unreachable {
            return Err(KernelError::ProviderUnreachable {
                provider_id: provider_id.to_string(),
            });
        }
        Ok(())
    }

    // -- Health & metrics ---------------------------------------------------

    /// Record one ping outcome and return the provider's new status.
    pub fn record_ping(&self, id: &str, healthy: bool) -> Result<HealthStatus> {
        let (from, to) = {
            let mut entry =
                self.inner
                    .providers
                    .get_mut(id)
                    .ok_or_else(|| KernelError::ProviderNotFound {
                        provider_id: id.to_string(),
                    })?;
            let from = entry.summary.health.status;
            let to = entry.summary.health.apply_ping(healthy, Utc::now());
            (from, to)
        };

        if from != to {
            match to {
                HealthStatus::Healthy => {
                    tracing::info!(provider_id = %id, %from, %to, "provider recovered")
                }
                _ => tracing::warn!(provider_id = %id, %from, %to, "provider health degraded"),
            }
            self.publish(Event::ProviderHealthChanged {
                provider_id: id.to_string(),
                from,
                to,
                timestamp: Utc::now(),
            });
        } else {
            tracing::trace!(provider_id = %id, status = %to, healthy, "ping recorded");
        }

        Ok(to)
    }

    /// Record the outcome of one dispatched request.
    pub fn record_request(&self, id: &str, success: bool, latency: Duration) {
        let Some(mut entry) = self.inner.providers.get_mut(id) else {
            tracing::debug!(provider_id = %id, "metrics for unknown provider dropped");
            return;
        };
        let metrics = &mut entry.summary.metrics;
        metrics.requests += 1;
        if success {
            metrics.successes += 1;
        } else {
            metrics.failures += 1;
        }
        metrics.total_latency_ms += u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
    }

    /// Aggregate statistics over all providers.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.inner.providers.iter() {
            let summary = &entry.value().summary;
            stats.total_providers += 1;
            match summary.health.status {
                HealthStatus::Healthy => stats.healthy_providers += 1,
                HealthStatus::Degraded => stats.degraded_providers += 1,
                HealthStatus::Unreachable => stats.unreachable_providers += 1,
            }
            stats.total_requests += summary.metrics.requests;
            stats.total_successes += summary.metrics.successes;
            stats.total_failures += summary.metrics.failures;
        }
        if stats.total_requests > 0 {
            stats.success_rate = stats.total_successes as f64 / stats.total_requests as f64 * 100.0;
        }
        stats
    }

    fn publish(&self, event: Event) {
        if let Some(bus) = &self.inner.bus {
            bus.publish(event);
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Fake {
        id: &'static str,
        caps: Vec<CapabilityDescriptor>,
    }

    impl Fake {
        fn new(id: &'static str, caps: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                id,
                caps: caps
                    .iter()
                    .map(|c| CapabilityDescriptor::new(*c, "test"))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl CapabilityProvider for Fake {
        fn id(&self) -> &str {
            self.id
        }
        fn capabilities(&self) -> Vec<CapabilityDescriptor> {
            self.caps.clone()
        }
        async fn invoke(&self, _capability: &str, params: Value) -> Result<Value> {
            Ok(params)
        }
    }

    fn fail_pings(registry: &CapabilityRegistry, id: &str, n: usize) -> HealthStatus {
        let mut status = HealthStatus::Healthy;
        for _ in 0..n {
            status = registry.record_ping(id, false).unwrap();
        }
        status
    }

    #[test]
    fn register_and_discover() {
        let registry = CapabilityRegistry::new();
        assert_eq!(
            registry.register(Fake::new("b", &["search"])).unwrap(),
            RegisterOutcome::Added
        );
        registry.register(Fake::new("a", &["search", "build"])).unwrap();

        let all = registry.discover(&DiscoveryFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].provider_id, "a");
        assert_eq!(all[0].capabilities, vec!["build", "search"]);

        let builders = registry.discover(&DiscoveryFilter::capability("build"));
        assert_eq!(builders.len(), 1);
        assert_eq!(builders[0].provider_id, "a");
    }

    #[test]
    fn reregistration_with_new_capabilities_replaces() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("p", &["search"])).unwrap();
        assert_eq!(
            registry.register(Fake::new("p", &["search"])).unwrap(),
            RegisterOutcome::Refreshed
        );

        let outcome = registry.register(Fake::new("p", &["build"])).unwrap();
        assert_eq!(
            outcome,
            RegisterOutcome::Replaced {
                previous: vec!["search".into()]
            }
        );
        assert!(matches!(
            registry.resolve_provider("search"),
            Err(KernelError::UnknownCapability { .. })
        ));
        assert_eq!(registry.resolve_provider("build").unwrap(), "p");
    }

    #[test]
    fn conflicting_execution_mode_is_fatal() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("sync", &["search"])).unwrap();

        let conflicting = Arc::new(Fake {
            id: "async",
            caps: vec![CapabilityDescriptor::new("search", "x").asynchronous()],
        });
        let err = registry.register(conflicting).unwrap_err();
        assert!(matches!(err, KernelError::RegistryConflict { .. }));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn deregister_removes_index() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("p", &["search"])).unwrap();
        assert!(registry.deregister("p").is_some());
        assert!(registry.deregister("p").is_none());
        assert_eq!(registry.count(), 0);
        assert!(registry.capability_names().is_empty());
    }

    #[test]
    fn deregister_survives_a_poisoned_lock() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("p", &["search"])).unwrap();

        let poisoner = registry.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.registration.lock().unwrap();
            panic!("poison the registration lock");
        })
        .join();
        assert!(registry.inner.registration.is_poisoned());

        assert!(registry.deregister("p").is_some());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn refresh_keeps_health_but_new_capabilities_reset_it() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("p", &["search"])).unwrap();
        registry.record_request("p", true, Duration::from_millis(5));
        assert_eq!(fail_pings(&registry, "p", 3), HealthStatus::Unreachable);

        registry.register(Fake::new("p", &["search"])).unwrap();
        let summary = registry.summary("p").unwrap();
        assert_eq!(summary.health.status, HealthStatus::Unreachable);
        assert_eq!(summary.health.consecutive_failures, 3);
        assert_eq!(summary.metrics.requests, 1);
        assert!(matches!(
            registry.resolve_provider("search"),
            Err(KernelError::NoProviderAvailable { .. })
        ));

        registry.register(Fake::new("p", &["build"])).unwrap();
        let summary = registry.summary("p").unwrap();
        assert_eq!(summary.health.status, HealthStatus::Healthy);
        assert_eq!(summary.metrics.requests, 1);
    }

    #[test]
    fn unreachable_after_exactly_three_failures() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("p", &["search"])).unwrap();

        assert_eq!(registry.record_ping("p", false).unwrap(), HealthStatus::Degraded);
        assert_eq!(registry.record_ping("p", false).unwrap(), HealthStatus::Degraded);
        assert_eq!(registry.record_ping("p", false).unwrap(), HealthStatus::Unreachable);
        assert_eq!(registry.record_ping("p", false).unwrap(), HealthStatus::Unreachable);

        assert_eq!(registry.record_ping("p", true).unwrap(), HealthStatus::Healthy);
        assert_eq!(registry.record_ping("p", true).unwrap(), HealthStatus::Healthy);
        assert_eq!(registry.summary("p").unwrap().health.consecutive_failures, 0);
    }

    #[test]
    fn success_resets_failure_streak() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("p", &["search"])).unwrap();

        fail_pings(&registry, "p", 2);
        registry.record_ping("p", true).unwrap();
        assert_eq!(fail_pings(&registry, "p", 2), HealthStatus::Degraded);
    }

    #[test]
    fn round_robin_among_healthy() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("a", &["search"])).unwrap();
        registry.register(Fake::new("b", &["search"])).unwrap();

        let picks: Vec<String> = (0..4)
            .map(|_| registry.resolve_provider("search").unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn degraded_only_when_no_healthy() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("a", &["search"])).unwrap();
        registry.register(Fake::new("b", &["search"])).unwrap();
        fail_pings(&registry, "a", 1);

        for _ in 0..4 {
            assert_eq!(registry.resolve_provider("search").unwrap(), "b");
        }

        fail_pings(&registry, "b", 3);
        assert_eq!(registry.resolve_provider("search").unwrap(), "a");
    }

    #[test]
    fn only_unreachable_means_no_provider() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("a", &["search"])).unwrap();
        fail_pings(&registry, "a", 3);

        assert!(matches!(
            registry.resolve_provider("search"),
            Err(KernelError::NoProviderAvailable { .. })
        ));
    }

    #[test]
    fn never_resolves_unreachable_while_alternatives_exist() {
        let registry = CapabilityRegistry::new();
        for id in ["a", "b", "c"] {
            registry.register(Fake::new(id, &["search"])).unwrap();
        }
        fail_pings(&registry, "a", 3);
        fail_pings(&registry, "c", 1);

        for _ in 0..10 {
            assert_ne!(registry.resolve_provider("search").unwrap(), "a");
        }
    }

    #[test]
    fn pinned_provider_checks() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("a", &["search"])).unwrap();

        assert!(registry.check_pinned("a", "search").is_ok());
        assert!(matches!(
            registry.check_pinned("zzz", "search"),
            Err(KernelError::ProviderNotFound { .. })
        ));
        assert!(registry.check_pinned("a", "build").is_err());

        fail_pings(&registry, "a", 3);
        assert!(matches!(
            registry.check_pinned("a", "search"),
            Err(KernelError::ProviderUnreachable { .. })
        ));
    }

    #[test]
    fn metrics_and_stats() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("a", &["search"])).unwrap();
        registry.record_request("a", true, Duration::from_millis(40));
        registry.record_request("a", false, Duration::from_millis(60));

        let metrics = registry.summary("a").unwrap().metrics;
        assert_eq!(metrics.requests, 2);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.total_latency_ms, 100);
        assert!((metrics.average_latency_ms() - 50.0).abs() < f64::EPSILON);

        let stats = registry.stats();
        assert_eq!(stats.total_providers, 1);
        assert_eq!(stats.healthy_providers, 1);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn discover_by_health() {
        let registry = CapabilityRegistry::new();
        registry.register(Fake::new("a", &["search"])).unwrap();
        registry.register(Fake::new("b", &["search"])).unwrap();
        fail_pings(&registry, "b", 3);

        let filter = DiscoveryFilter {
            capability: Some("search".into()),
            health: Some(HealthStatus::Unreachable),
        };
        let found = registry.discover(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider_id, "b");
    }
}
