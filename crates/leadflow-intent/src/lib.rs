//! Intent classification and workflow orchestration for LeadFlow.
//!
//! This crate provides:
//!
//! - **Intents**: the intent taxonomy and the validation applied to
//!   classifier output, in [`intent`].
//! - **Oracles**: the [`oracle::ClassificationOracle`] seam, a deterministic
//!   [`oracle::KeywordOracle`] and a capability-backed oracle.
//! - **Workflow**: the state machine that routes a message to a capability,
//!   a free-form reply or a local state change, via
//!   [`workflow::WorkflowMachine`].
//! - **Orchestration**: per-conversation serialized turns, dispatch,
//!   completion events, persistence and streaming, via
//!   [`orchestrator::Orchestrator`].
//! - **Configuration**: [`config::EngineConfig`], loaded from TOML.

pub mod config;
pub mod error;
pub mod intent;
pub mod oracle;
pub mod orchestrator;
pub mod workflow;

pub use config::{DEFAULT_CONFIG_PATH, EngineConfig};
pub use error::{IntentError, Result};
pub use intent::{Intent, IntentCategory};
pub use oracle::{CapabilityOracle, ClassificationOracle, ContextSnapshot, KeywordOracle};
pub use orchestrator::{ConversationStatus, Orchestrator, TurnResponse, TurnUpdate};
pub use workflow::{
    Capability, Completion, FreeFormKind, LocalAction, RouteDecision, RouteTarget,
    WorkflowMachine,
};
