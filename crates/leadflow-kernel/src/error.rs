//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

use uuid::Uuid;

/// Unified error type for the LeadFlow capability kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Registry errors ----------------------------------------------------
    /// The requested provider is not registered.
    #[error("provider not found: {provider_id}")]
    ProviderNotFound { provider_id: String },

    /// No provider declares the requested capability.
    #[error("unknown capability: {capability}")]
    UnknownCapability { capability: String },

    /// Providers exist for the capability but none is in a selectable state.
    #[error("no provider available for capability `{capability}`")]
    NoProviderAvailable { capability: String },

    /// The caller pinned a provider that cannot be used right now.
    #[error("provider unreachable: {provider_id}")]
    ProviderUnreachable { provider_id: String },

    /// Two registrations disagree in a way that cannot be reconciled.
    ///
    /// This is the only error the orchestration core treats as fatal.
    #[error("registry conflict on `{capability}`: {reason}")]
    RegistryConflict { capability: String, reason: String },

    // -- Dispatch errors ----------------------------------------------------
    /// The parameters do not match the capability's declared schema.
    #[error("invalid params for `{capability}`: {reason}")]
    InvalidParams { capability: String, reason: String },

    /// The provider did not answer within the allotted time.
    #[error("capability `{capability}` on {provider_id} timed out after {timeout_ms} ms")]
    Timeout {
        capability: String,
        provider_id: String,
        timeout_ms: u64,
    },

    /// The capability ran but reported an error.
    #[error("provider {provider_id} failed: {reason}")]
    ProviderError { provider_id: String, reason: String },

    /// The referenced task does not exist in the dispatcher.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The [`Uuid`] that was looked up.
        task_id: Uuid,
    },

    // -- Router errors ------------------------------------------------------
    /// A regex pattern supplied to the router is invalid.
    #[error("invalid regex pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // -- Generic ------------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

impl KernelError {
    /// Whether a caller may reasonably retry the same request later.
    ///
    /// Availability and timeout failures are transient; schema and provider
    /// logic failures will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoProviderAvailable { .. } | Self::ProviderUnreachable { .. } | Self::Timeout { .. }
        )
    }

    /// Build a [`KernelError::ProviderError`]; convenience for provider impls.
    pub fn provider(provider_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderError {
            provider_id: provider_id.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            KernelError::Timeout {
                capability: "search".into(),
                provider_id: "p1".into(),
                timeout_ms: 10,
            }
            .is_retryable()
        );
        assert!(
            KernelError::NoProviderAvailable {
                capability: "search".into()
            }
            .is_retryable()
        );
        assert!(
            !KernelError::InvalidParams {
                capability: "search".into(),
                reason: "missing".into(),
            }
            .is_retryable()
        );
        assert!(!KernelError::provider("p1", "boom").is_retryable());
    }
}
