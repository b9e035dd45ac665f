//! Prospect error types.
//!
//! All prospect subsystems surface errors through [`ProspectError`].  When an
//! error has to cross the provider boundary it is converted into a
//! [`KernelError`] with [`ProspectError::into_kernel`].

use leadflow_kernel::KernelError;

/// Unified error type for the prospect crate.
#[derive(Debug, thiserror::Error)]
pub enum ProspectError {
    // -- Input errors ---------------------------------------------------------
    /// Search criteria or profile parameters are malformed.
    #[error("invalid criteria: {reason}")]
    InvalidCriteria { reason: String },

    /// A capability was asked for something this provider does not serve.
    #[error("unsupported capability `{capability}` on {provider_id}")]
    UnsupportedCapability {
        provider_id: String,
        capability: String,
    },

    // -- Scoring errors -------------------------------------------------------
    /// The primary scorer failed as a whole.
    #[error("scoring failed: {reason}")]
    Scoring { reason: String },

    /// A scorer response could not be parsed.
    #[error("score parse error: {reason}")]
    ScoreParse { reason: String },

    // -- Source errors --------------------------------------------------------
    /// A source provider reported an error.
    #[error("source {provider_id} failed: {reason}")]
    Source { provider_id: String, reason: String },

    // -- Serialization --------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Upstream crate errors ------------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
}

impl ProspectError {
    /// Convert into the error type providers return from `invoke`.
    pub fn into_kernel(self, capability: &str, provider_id: &str) -> KernelError {
        match self {
            Self::Kernel(inner) => inner,
            Self::InvalidCriteria { reason } => KernelError::InvalidParams {
                capability: capability.to_string(),
                reason,
            },
            Self::Json(e) => KernelError::InvalidParams {
                capability: capability.to_string(),
                reason: e.to_string(),
            },
            Self::UnsupportedCapability { capability, .. } => {
                KernelError::UnknownCapability { capability }
            }
            other => KernelError::provider(provider_id, other.to_string()),
        }
    }
}

/// Convenience alias used throughout the prospect crate.
pub type Result<T> = std::result::Result<T, ProspectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_errors_become_invalid_params() {
        let err = ProspectError::InvalidCriteria {
            reason: "limit must be positive".into(),
        }
        .into_kernel("search_prospects", "aggregator");
        assert!(matches!(err, KernelError::InvalidParams { .. }));
    }

    #[test]
    fn kernel_errors_pass_through() {
        let err = ProspectError::from(KernelError::NoProviderAvailable {
            capability: "source_search".into(),
        })
        .into_kernel("search_prospects", "aggregator");
        assert!(err.is_retryable());
    }
}
