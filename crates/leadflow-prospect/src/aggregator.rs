//! Multi-source prospect aggregation.
//!
//! The [`SearchAggregator`] fans a search out to several `source_search`
//! providers in parallel, merges and de-duplicates what comes back, scores
//! every unique candidate, adjusts the scores by review feedback and ranks
//! the result.
//!
//! ```text
//!            ┌──────────── source A ───────────┐
//! criteria ──┼──────────── source B ───────────┼── merge ── score ── refine ── rank ── limit
//!            └──────────── source C ───────────┘
//!              (per-provider timeout, overall deadline)
//! ```
//!
//! Each provider call runs on its own spawned task bounded by the
//! per-provider timeout; the whole fan-out is bounded by the overall timeout.
//! Providers still pending at the deadline are recorded as timed out and
//! their calls are left to finish in the background, so they still update
//! provider metrics.  Responses are merged in provider-list order, which
//! makes the merge independent of completion order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use leadflow_kernel::{
    CapabilityDescriptor, CapabilityProvider, DiscoveryFilter, Dispatcher, HealthStatus,
    InvocationRequest, KernelError, ParamKind, ParamSchema, TaskErrorKind, TaskInfo, TaskStatus,
};

use crate::candidate::{Candidate, ScoredCandidate};
use crate::capabilities::{SEARCH_PROSPECTS, SOURCE_SEARCH};
use crate::criteria::SearchCriteria;
use crate::error::Result;
use crate::feedback::ProspectFeedback;
use crate::profile::{Profile, ProfileChanges};
use crate::rank::rank;
use crate::scoring::CandidateScorer;

/// Default bound on a single source call.
pub const DEFAULT_PER_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on the whole fan-out.
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// How one source fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Succeeded,
    Failed,
    /// Hit the per-provider timeout or was still pending at the deadline.
    TimedOut,
}

/// Provenance record for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub provider_id: String,
    pub status: SourceStatus,
    /// Number of valid candidate records returned.
    pub candidates: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// Outcome of a multi-source search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Ranked, de-duplicated and limited candidates.
    pub candidates: Vec<ScoredCandidate>,
    /// One entry per queried source, in query order.
    pub provenance: Vec<ProviderOutcome>,
    /// Unique candidates before the limit was applied.
    pub total_found: usize,
    /// No source succeeded.
    pub degraded: bool,
    /// Some, but not all, sources failed.
    pub partial: bool,
}

impl AggregatedResult {
    fn empty(provenance: Vec<ProviderOutcome>) -> Self {
        Self {
            candidates: Vec::new(),
            provenance,
            total_found: 0,
            degraded: true,
            partial: false,
        }
    }

    /// Ids of the sources that did not succeed.
    pub fn failed_providers(&self) -> Vec<&str> {
        self.provenance
            .iter()
            .filter(|p| p.status != SourceStatus::Succeeded)
            .map(|p| p.provider_id.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Timeouts of the fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub per_provider_timeout: Duration,
    pub overall_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            per_provider_timeout: DEFAULT_PER_PROVIDER_TIMEOUT,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
        }
    }
}

type SourceCall = JoinHandle<(leadflow_kernel::Result<TaskInfo>, Duration)>;

/// Fans a search out to source providers and aggregates the answers.
#[derive(Clone)]
pub struct SearchAggregator {
    dispatcher: Dispatcher,
    scorer: CandidateScorer,
    config: AggregatorConfig,
}

impl SearchAggregator {
    pub fn new(dispatcher: Dispatcher, scorer: CandidateScorer, config: AggregatorConfig) -> Self {
        Self {
            dispatcher,
            scorer,
            config,
        }
    }

    /// Every `source_search` provider that is not unreachable, by id.
    pub fn default_sources(&self) -> Vec<String> {
        self.dispatcher
            .registry()
            .discover(&DiscoveryFilter::capability(SOURCE_SEARCH))
            .into_iter()
            .filter(|p| p.health.status != HealthStatus::Unreachable)
            .map(|p| p.provider_id)
            .collect()
    }

    /// Run one aggregated search.  An empty `providers` list means
    /// [`SearchAggregator::default_sources`].
    ///
    /// Source failures never surface as errors; they are recorded in the
    /// provenance and reflected by `degraded` / `partial`.
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
        providers: &[String],
    ) -> Result<AggregatedResult> {
        self.search_refined(criteria, providers, &ProspectFeedback::default())
            .await
    }

    /// [`SearchAggregator::search`], with scores adjusted towards the liked
    /// and away from the disliked candidates of `feedback` before ranking.
    pub async fn search_refined(
        &self,
        criteria: &SearchCriteria,
        providers: &[String],
        feedback: &ProspectFeedback,
    ) -> Result<AggregatedResult> {
        criteria.validate()?;

        let providers = if providers.is_empty() {
            self.default_sources()
        } else {
            providers.to_vec()
        };
        if providers.is_empty() {
            tracing::warn!("no source providers available for search");
            return Ok(AggregatedResult::empty(Vec::new()));
        }

        let deadline = Instant::now() + self.config.overall_timeout;
        let params = json!({ "criteria": criteria });

        let calls: Vec<(String, SourceCall)> = providers
            .iter()
            .map(|id| (id.clone(), self.spawn_call(id, params.clone())))
            .collect();

        tracing::info!(sources = calls.len(), "prospect fan-out started");

        let mut provenance = Vec::with_capacity(calls.len());
        let mut batches: Vec<Vec<Candidate>> = Vec::with_capacity(calls.len());
        for (provider_id, mut call) in calls {
            let (outcome, found) = match tokio::time::timeout_at(deadline, &mut call).await {
                Ok(Ok((result, latency))) => settle(&provider_id, result, latency),
                Ok(Err(join_error)) => (
                    outcome(&provider_id, SourceStatus::Failed, 0, Some(join_error.to_string()), Duration::ZERO),
                    Vec::new(),
                ),
                Err(_) => {
                    // Dropping the handle detaches the call; it keeps running.
                    tracing::warn!(provider_id = %provider_id, "source still pending at overall deadline");
                    (
                        outcome(
                            &provider_id,
                            SourceStatus::TimedOut,
                            0,
                            Some("abandoned at overall deadline".into()),
                            self.config.overall_timeout,
                        ),
                        Vec::new(),
                    )
                }
            };
            provenance.push(outcome);
            batches.push(found);
        }

        let merged = merge(batches);
        let total_found = merged.len();
        let succeeded = provenance
            .iter()
            .filter(|p| p.status == SourceStatus::Succeeded)
            .count();

        let scored = self.scorer.score(criteria, merged).await;
        if !feedback.is_empty() {
            tracing::debug!(
                liked = feedback.liked.len(),
                disliked = feedback.disliked.len(),
                "refining scores from review feedback"
            );
        }
        let mut ranked = rank(feedback.apply(scored));
        ranked.truncate(criteria.limit);

        let result = AggregatedResult {
            candidates: ranked,
            total_found,
            degraded: succeeded == 0,
            partial: succeeded > 0 && succeeded < provenance.len(),
            provenance,
        };

        tracing::info!(
            sources = result.provenance.len(),
            succeeded,
            unique = total_found,
            returned = result.candidates.len(),
            degraded = result.degraded,
            partial = result.partial,
            "prospect fan-out finished"
        );
        Ok(result)
    }

    fn spawn_call(&self, provider_id: &str, params: Value) -> SourceCall {
        let dispatcher = self.dispatcher.clone();
        let request = InvocationRequest::new(SOURCE_SEARCH, params)
            .on_provider(provider_id)
            .with_timeout(self.config.per_provider_timeout);
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = dispatcher.execute(request).await;
            (result, started.elapsed())
        })
    }
}

fn outcome(
    provider_id: &str,
    status: SourceStatus,
    candidates: usize,
    error: Option<String>,
    latency: Duration,
) -> ProviderOutcome {
    ProviderOutcome {
        provider_id: provider_id.to_string(),
        status,
        candidates,
        error,
        latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Turn one finished source call into its provenance and candidates.
fn settle(
    provider_id: &str,
    result: leadflow_kernel::Result<TaskInfo>,
    latency: Duration,
) -> (ProviderOutcome, Vec<Candidate>) {
    let task = match result {
        Ok(task) => task,
        Err(e) => {
            tracing::warn!(provider_id, error = %e, "source rejected before dispatch");
            return (
                outcome(provider_id, SourceStatus::Failed, 0, Some(e.to_string()), latency),
                Vec::new(),
            );
        }
    };

    if task.status != TaskStatus::Completed {
        let (status, message) = match task.error {
            Some(error) if error.kind == TaskErrorKind::Timeout => {
                (SourceStatus::TimedOut, error.message)
            }
            Some(error) => (SourceStatus::Failed, error.message),
            None => (SourceStatus::Failed, format!("task ended as {:?}", task.status)),
        };
        return (
            outcome(provider_id, status, 0, Some(message), latency),
            Vec::new(),
        );
    }

    let candidates = parse_candidates(provider_id, task.result.unwrap_or(Value::Null));
    (
        outcome(provider_id, SourceStatus::Succeeded, candidates.len(), None, latency),
        candidates,
    )
}

/// Accepts `{"candidates": [...]}` or a bare array; invalid records are skipped.
fn parse_candidates(provider_id: &str, value: Value) -> Vec<Candidate> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("candidates") {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let total = entries.len();
    let candidates: Vec<Candidate> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<Candidate>(entry).ok())
        .filter(|c| !c.name.trim().is_empty())
        .map(|mut c| {
            c.provenance.insert(provider_id.to_string());
            c
        })
        .collect();

    if candidates.len() < total {
        tracing::debug!(
            provider_id,
            skipped = total - candidates.len(),
            "invalid candidate records skipped"
        );
    }
    candidates
}

/// Merge batches in order, de-duplicating by identity key.
///
/// For duplicates the record with more populated fields wins (first seen on
/// a tie) and provenance tags are unioned.
pub fn merge(batches: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for candidate in batches.into_iter().flatten() {
        let key = candidate.identity_key();
        match index.get(&key) {
            None => {
                index.insert(key, merged.len());
                merged.push(candidate);
            }
            Some(&at) => {
                let existing = &mut merged[at];
                let mut provenance = std::mem::take(&mut existing.provenance);
                provenance.extend(candidate.provenance.iter().cloned());
                if candidate.populated_fields() > existing.populated_fields() {
                    *existing = candidate;
                }
                existing.provenance = provenance;
            }
        }
    }

    merged
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Serves `search_prospects` on top of a [`SearchAggregator`].
///
/// Parameters: `criteria` (object), or a `profile` to derive criteria from;
/// optional `providers` (array of ids), `limit` (number), `feedback`
/// (string, applied to the criteria before searching) and `liked` /
/// `disliked` (arrays of candidates from the previous results).
pub struct SearchAggregatorProvider {
    id: String,
    aggregator: Arc<SearchAggregator>,
}

impl SearchAggregatorProvider {
    pub const DEFAULT_ID: &'static str = "prospect-aggregator";

    pub fn new(aggregator: SearchAggregator) -> Self {
        Self {
            id: Self::DEFAULT_ID.to_string(),
            aggregator: Arc::new(aggregator),
        }
    }

    fn criteria_from(params: &Value) -> Result<SearchCriteria> {
        let mut criteria = match (params.get("criteria"), params.get("profile")) {
            (Some(c @ Value::Object(_)), _) => serde_json::from_value(c.clone())?,
            (_, Some(p @ Value::Object(_))) => {
                let profile: Profile = serde_json::from_value(p.clone())?;
                SearchCriteria::from_profile(&profile)
            }
            _ => SearchCriteria::default(),
        };

        if let Some(limit) = params.get("limit").and_then(Value::as_u64) {
            criteria.limit = usize::try_from(limit).unwrap_or(usize::MAX);
        }
        if let Some(feedback) = params.get("feedback").and_then(Value::as_str) {
            criteria.apply_changes(&ProfileChanges::from_feedback(feedback));
        }
        Ok(criteria)
    }

    fn feedback_from(params: &Value) -> Result<ProspectFeedback> {
        let examples = |key: &str| -> Result<Vec<Candidate>> {
            match params.get(key) {
                Some(v @ Value::Array(_)) => Ok(serde_json::from_value(v.clone())?),
                _ => Ok(Vec::new()),
            }
        };
        Ok(ProspectFeedback {
            liked: examples("liked")?,
            disliked: examples("disliked")?,
        })
    }
}

#[async_trait]
impl CapabilityProvider for SearchAggregatorProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Multi-source prospect search"
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![
            CapabilityDescriptor::new(
                SEARCH_PROSPECTS,
                "Search all sources, merge, score and rank prospects",
            )
            .with_schema(
                ParamSchema::empty()
                    .optional("criteria", ParamKind::Object)
                    .optional("profile", ParamKind::Object)
                    .optional("providers", ParamKind::Array)
                    .optional("limit", ParamKind::Number)
                    .optional("feedback", ParamKind::String)
                    .optional("liked", ParamKind::Array)
                    .optional("disliked", ParamKind::Array),
            ),
        ]
    }

    async fn invoke(&self, capability: &str, params: Value) -> leadflow_kernel::Result<Value> {
        if capability != SEARCH_PROSPECTS {
            return Err(KernelError::UnknownCapability {
                capability: capability.to_string(),
            });
        }

        let criteria =
            Self::criteria_from(&params).map_err(|e| e.into_kernel(capability, &self.id))?;
        let feedback =
            Self::feedback_from(&params).map_err(|e| e.into_kernel(capability, &self.id))?;
        let providers: Vec<String> = params
            .get("providers")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let result = self
            .aggregator
            .search_refined(&criteria, &providers, &feedback)
            .await
            .map_err(|e| e.into_kernel(capability, &self.id))?;
        Ok(serde_json::to_value(result)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CompanyInfo;

    fn person(name: &str, company: &str, url: Option<&str>) -> Candidate {
        let mut c = Candidate::new(name, "CTO", CompanyInfo::named(company));
        c.profile_url = url.map(str::to_string);
        c
    }

    fn tagged(mut c: Candidate, tag: &str) -> Candidate {
        c.provenance.insert(tag.to_string());
        c
    }

    #[test]
    fn merge_keeps_richer_record_and_unions_provenance() {
        let sparse = tagged(person("Ann", "Acme", Some("https://x.io/ann")), "a");
        let mut rich = tagged(person("Ann S.", "Acme", Some("x.io/ann/")), "b");
        rich.email = Some("ann@acme.io".into());

        let merged = merge(vec![vec![sparse], vec![rich]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Ann S.");
        assert_eq!(
            merged[0].provenance.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn merge_keeps_first_on_tie_and_preserves_order() {
        let merged = merge(vec![
            vec![tagged(person("Ann", "Acme", None), "a"), tagged(person("Bob", "Beta", None), "a")],
            vec![tagged(person("ann", "ACME", None), "b"), tagged(person("Cy", "Core", None), "b")],
        ]);
        let names: Vec<&str> = merged.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Ann", "Bob", "Cy"]);
        assert_eq!(merged[0].provenance.len(), 2);
    }

    #[test]
    fn parse_candidates_skips_invalid_records() {
        let parsed = parse_candidates(
            "src",
            json!({ "candidates": [
                { "name": "Ann", "title": "CTO" },
                { "title": "no name" },
                42,
                { "name": "  " }
            ]}),
        );
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].provenance.contains("src"));
    }

    #[test]
    fn criteria_from_profile_and_feedback() {
        let mut profile = Profile::new("p");
        profile.industries = vec!["Retail".into()];
        let criteria = SearchAggregatorProvider::criteria_from(&json!({
            "profile": profile,
            "limit": 5,
            "feedback": "add fintech to industries"
        }))
        .unwrap();
        assert_eq!(criteria.industries, vec!["Retail", "fintech"]);
        assert_eq!(criteria.limit, 5);
    }

    #[test]
    fn feedback_from_liked_and_disliked() {
        let feedback = SearchAggregatorProvider::feedback_from(&json!({
            "liked": [person("Ann", "Acme", None)],
            "disliked": [person("Bob", "Beta", None), person("Cy", "Core", None)]
        }))
        .unwrap();
        assert_eq!(feedback.liked.len(), 1);
        assert_eq!(feedback.disliked.len(), 2);

        assert!(SearchAggregatorProvider::feedback_from(&json!({})).unwrap().is_empty());
        assert!(SearchAggregatorProvider::feedback_from(&json!({ "liked": [7] })).is_err());
    }
}
