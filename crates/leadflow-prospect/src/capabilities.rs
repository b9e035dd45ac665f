//! Capability names served or consumed by this crate.

/// Build a target profile from business facts.
pub const BUILD_PROFILE: &str = "build_profile";

/// Apply feedback to an existing profile.
pub const REFINE_PROFILE: &str = "refine_profile";

/// Multi-source prospect search (fan-out, merge, score, rank).
pub const SEARCH_PROSPECTS: &str = "search_prospects";

/// Search a single data source; implemented by source providers.
pub const SOURCE_SEARCH: &str = "source_search";

/// Batch scoring by an external (typically model-backed) scorer.
pub const SCORE_CANDIDATES: &str = "score_candidates";

/// Render a profile as JSON, text or a one-line summary.
pub const EXPORT_PROFILE: &str = "export_profile";

/// Derive business facts from attached links and documents.
pub const ANALYZE_SOURCE: &str = "analyze_source";
