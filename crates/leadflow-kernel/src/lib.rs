//! LeadFlow capability kernel.
//!
//! This crate provides the services every other LeadFlow crate builds on:
//!
//! - **[`capability`]** -- capability descriptors, parameter schemas and the
//!   [`CapabilityProvider`] trait implemented by workers.
//! - **[`registry`]** -- concurrent provider registry using [`DashMap`] with
//!   per-provider health, metrics and round-robin provider selection.
//! - **[`health`]** -- periodic, parallel health checks feeding the registry.
//! - **[`dispatcher`]** -- sync/async capability execution with timeouts,
//!   task tracking and metrics.
//! - **[`ipc`]** -- publish/subscribe event bus backed by
//!   [`tokio::sync::broadcast`].
//! - **[`router`]** -- whole-word phrase matching (aho-corasick) and regex
//!   pattern matching with named captures.
//! - **[`error`]** -- unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.
//!
//! [`DashMap`]: dashmap::DashMap

pub mod capability;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod ipc;
pub mod registry;
pub mod router;

// Re-export the most commonly used types at the crate root for convenience.
pub use capability::{CapabilityDescriptor, CapabilityProvider, ParamKind, ParamSchema, ParamSpec};
pub use dispatcher::{
    Dispatcher, ExecutionMode, InvocationRequest, TaskError, TaskErrorKind, TaskId, TaskInfo,
    TaskObservation, TaskStatus,
};
pub use error::{KernelError, Result};
pub use health::HealthMonitor;
pub use ipc::{Event, IpcBus};
pub use registry::{
    CapabilityRegistry, DiscoveryFilter, HealthStatus, ProviderHealth, ProviderId,
    ProviderMetrics, ProviderSummary, RegisterOutcome, RegistryStats,
};
pub use router::{KeywordMatch, KeywordRouter};
