//! Prospect search for LeadFlow.
//!
//! This crate holds the domain providers the orchestrator dispatches to:
//! profile building and refinement, multi-source candidate search, scoring
//! and ranking.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ ProfileBuilder │   │ SearchAggregator │──>│ source_search│ (many)
//! │ build/refine   │   │  fan-out, merge, │   └──────────────┘
//! │ export/analyze │   │  refine          │
//! └────────────────┘   └────────┬─────────┘
//!                               │
//!                      ┌────────┴────────┐
//!                      │ CandidateScorer │──> score_candidates (optional)
//!                      │ primary+fallback│
//!                      └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`profile`] -- Target profiles, feedback parsing, the profile builder.
//! - [`criteria`] -- Search criteria derived from profiles.
//! - [`candidate`] -- Candidate records, identity keys and scores.
//! - [`aggregator`] -- Parallel multi-source search with merge and provenance.
//! - [`feedback`] -- Liked/disliked candidates and the score adjustment they imply.
//! - [`analysis`] -- Business facts derived from attached links and documents.
//! - [`scoring`] -- Primary scorer contract and the rule-based fallback.
//! - [`rank`] -- Deterministic ordering of scored candidates.
//! - [`sources`] -- In-process source providers.
//! - [`error`] -- Prospect error types.

pub mod aggregator;
pub mod analysis;
pub mod candidate;
pub mod capabilities;
pub mod criteria;
pub mod error;
pub mod feedback;
pub mod profile;
pub mod rank;
pub mod scoring;
pub mod sources;

pub use aggregator::{
    AggregatedResult, AggregatorConfig, ProviderOutcome, SearchAggregator,
    SearchAggregatorProvider, SourceStatus, merge,
};
pub use analysis::{SourceAnalysis, SourceFinding, SourceInput, analyze_sources};
pub use candidate::{Candidate, CompanyInfo, ScoreSource, ScoredCandidate};
pub use criteria::{DEFAULT_RESULT_LIMIT, SearchCriteria};
pub use error::{ProspectError, Result};
pub use feedback::ProspectFeedback;
pub use profile::{CompanySizeRange, ExportFormat, Profile, ProfileBuilder, ProfileChanges};
pub use rank::rank;
pub use scoring::{
    CandidateScorer, CapabilityScorer, PrimaryScorer, RuleBasedScorer, ScoringWeights,
};
pub use sources::StaticSource;
