//! Intent engine error types.
//!
//! All intent subsystems surface errors through [`IntentError`].  Most of
//! them never reach the user: classification problems turn into a
//! clarification turn and capability failures into a degraded reply.

/// Unified error type for the intent engine.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    // -- Classification errors -----------------------------------------------
    /// The oracle output could not be turned into an intent.
    #[error("classification failed: {reason}")]
    ClassificationFailed { reason: String },

    /// The oracle did not answer in time.
    #[error("classification timed out after {timeout_ms}ms")]
    ClassificationTimeout { timeout_ms: u64 },

    // -- Configuration errors ------------------------------------------------
    /// The configuration file is missing, unreadable or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] leadflow_kernel::KernelError),

    /// An error propagated from the store crate.
    #[error("store error: {0}")]
    Store(#[from] leadflow_store::StoreError),

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.
    #[error("internal intent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
