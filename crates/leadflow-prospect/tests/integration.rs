//! Integration tests for the leadflow-prospect crate.
//!
//! These tests run multi-source searches through a real registry and
//! dispatcher, with static sources standing in for data vendors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use leadflow_kernel::{CapabilityRegistry, Dispatcher, IpcBus};
use leadflow_prospect::{
    AggregatedResult, AggregatorConfig, Candidate, CandidateScorer, CompanyInfo, PrimaryScorer,
    ProfileBuilder, Result, ScoreSource, ScoringWeights, SearchAggregator,
    SearchAggregatorProvider, SearchCriteria, SourceStatus, StaticSource,
};

fn ann() -> Candidate {
    let mut company = CompanyInfo::named("Ledgerly");
    company.industry = Some("Fintech".into());
    Candidate::new("Ann Lee", "CTO", company).with_profile_url("https://www.linkedin.com/in/annlee")
}

fn bob() -> Candidate {
    let mut company = CompanyInfo::named("Carewell");
    company.industry = Some("Healthcare".into());
    Candidate::new("Bob Diaz", "VP Engineering", company)
}

fn cy() -> Candidate {
    Candidate::new("Cy Park", "Director of Sales", CompanyInfo::named("Orbit"))
}

fn dispatcher() -> Dispatcher {
    let bus = IpcBus::new(256);
    Dispatcher::new(CapabilityRegistry::with_bus(bus.clone()), bus)
}

fn aggregator(dispatcher: &Dispatcher, per_provider: Duration, overall: Duration) -> SearchAggregator {
    SearchAggregator::new(
        dispatcher.clone(),
        CandidateScorer::rule_based(ScoringWeights::default()),
        AggregatorConfig {
            per_provider_timeout: per_provider,
            overall_timeout: overall,
        },
    )
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn names(result: &AggregatedResult) -> Vec<&str> {
    result
        .candidates
        .iter()
        .map(|s| s.candidate.name.as_str())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
//  Fan-out, merge and provenance
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn slow_source_and_duplicate_are_handled() {
    let dispatcher = dispatcher();
    let registry = dispatcher.registry();

    let mut richer_ann = ann();
    richer_ann.email = Some("ann@ledgerly.io".into());
    richer_ann.profile_url = Some("linkedin.com/in/annlee/".into());

    registry
        .register(Arc::new(StaticSource::new("vendor-a", vec![ann(), bob()])))
        .unwrap();
    registry
        .register(Arc::new(
            StaticSource::new("vendor-b", vec![cy()]).with_latency(Duration::from_millis(500)),
        ))
        .unwrap();
    registry
        .register(Arc::new(StaticSource::new("vendor-c", vec![richer_ann])))
        .unwrap();

    let result = aggregator(&dispatcher, Duration::from_millis(100), Duration::from_secs(5))
        .search(
            &SearchCriteria::default(),
            &ids(&["vendor-a", "vendor-b", "vendor-c"]),
        )
        .await
        .unwrap();

    assert_eq!(result.total_found, 2);
    assert_eq!(names(&result), vec!["Ann Lee", "Bob Diaz"]);

    let merged_ann = &result.candidates[0].candidate;
    assert_eq!(merged_ann.email.as_deref(), Some("ann@ledgerly.io"));
    assert!(merged_ann.provenance.contains("vendor-a"));
    assert!(merged_ann.provenance.contains("vendor-c"));

    let statuses: Vec<SourceStatus> = result.provenance.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![
            SourceStatus::Succeeded,
            SourceStatus::TimedOut,
            SourceStatus::Succeeded
        ]
    );
    assert_eq!(result.failed_providers(), vec!["vendor-b"]);
    assert!(result.partial);
    assert!(!result.degraded);
}

#[tokio::test]
async fn overall_deadline_bounds_the_search() {
    let dispatcher = dispatcher();
    let registry = dispatcher.registry();
    registry
        .register(Arc::new(StaticSource::new("fast", vec![ann()])))
        .unwrap();
    registry
        .register(Arc::new(
            StaticSource::new("stuck", vec![bob()]).with_latency(Duration::from_secs(3)),
        ))
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = aggregator(&dispatcher, Duration::from_secs(10), Duration::from_millis(200))
        .search(&SearchCriteria::default(), &ids(&["fast", "stuck"]))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(names(&result), vec!["Ann Lee"]);
    assert_eq!(result.provenance[1].status, SourceStatus::TimedOut);
    assert!(result.partial);
}

#[tokio::test]
async fn all_sources_failing_is_degraded_not_an_error() {
    let dispatcher = dispatcher();
    let registry = dispatcher.registry();
    registry
        .register(Arc::new(StaticSource::new("x", vec![ann()]).failing()))
        .unwrap();
    registry
        .register(Arc::new(StaticSource::new("y", vec![bob()]).failing()))
        .unwrap();

    let result = aggregator(&dispatcher, Duration::from_secs(1), Duration::from_secs(2))
        .search(&SearchCriteria::default(), &[])
        .await
        .unwrap();

    assert!(result.candidates.is_empty());
    assert!(result.degraded);
    assert!(!result.partial);
    assert_eq!(result.provenance.len(), 2);
    assert!(
        result
            .provenance
            .iter()
            .all(|p| p.status == SourceStatus::Failed && p.error.is_some())
    );
}

#[tokio::test]
async fn ranking_is_independent_of_completion_order() {
    let dispatcher = dispatcher();
    let registry = dispatcher.registry();
    registry
        .register(Arc::new(
            StaticSource::new("slow-first", vec![bob()]).with_latency(Duration::from_millis(80)),
        ))
        .unwrap();
    registry
        .register(Arc::new(StaticSource::new("fast-second", vec![cy()])))
        .unwrap();

    let agg = aggregator(&dispatcher, Duration::from_secs(1), Duration::from_secs(2));
    let providers = ids(&["slow-first", "fast-second"]);
    let first = agg.search(&SearchCriteria::default(), &providers).await.unwrap();
    let second = agg.search(&SearchCriteria::default(), &providers).await.unwrap();

    assert_eq!(names(&first), vec!["Bob Diaz", "Cy Park"]);
    assert_eq!(names(&first), names(&second));
}

#[tokio::test]
async fn zero_limit_is_rejected() {
    let dispatcher = dispatcher();
    let err = aggregator(&dispatcher, Duration::from_secs(1), Duration::from_secs(1))
        .search(&SearchCriteria::default().with_limit(0), &[])
        .await;
    assert!(err.is_err());
}

// ═══════════════════════════════════════════════════════════════════════
//  Scoring
// ═══════════════════════════════════════════════════════════════════════

/// Scores only the first candidate; the rest must fall back.
struct FirstOnly;

#[async_trait]
impl PrimaryScorer for FirstOnly {
    async fn score_batch(
        &self,
        _criteria: &SearchCriteria,
        candidates: &[Candidate],
    ) -> Result<Vec<Value>> {
        let mut entries = vec![json!({
            "company_match_score": 0.9,
            "person_match_score": 0.8,
            "total_score": 0.85,
            "reasoning": "strong fit"
        })];
        entries.extend((1..candidates.len()).map(|_| json!({ "total_score": "n/a" })));
        Ok(entries)
    }
}

#[tokio::test]
async fn invalid_primary_entries_fall_back_per_candidate() {
    let dispatcher = dispatcher();
    dispatcher
        .registry()
        .register(Arc::new(StaticSource::new("s", vec![bob(), cy()])))
        .unwrap();

    let scorer =
        CandidateScorer::rule_based(ScoringWeights::default()).with_primary(Arc::new(FirstOnly));
    let agg = SearchAggregator::new(dispatcher.clone(), scorer, AggregatorConfig::default());
    let result = agg.search(&SearchCriteria::default(), &[]).await.unwrap();

    assert_eq!(result.candidates[0].candidate.name, "Bob Diaz");
    assert_eq!(result.candidates[0].scorer, ScoreSource::Primary);
    assert_eq!(result.candidates[1].scorer, ScoreSource::Fallback);
    for scored in &result.candidates {
        assert!((0.0..=1.0).contains(&scored.total_score));
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Providers through the dispatcher
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn search_prospects_capability_applies_limit() {
    let dispatcher = dispatcher();
    let registry = dispatcher.registry();
    registry
        .register(Arc::new(StaticSource::new("s", vec![ann(), bob(), cy()])))
        .unwrap();
    registry
        .register(Arc::new(SearchAggregatorProvider::new(aggregator(
            &dispatcher,
            Duration::from_secs(1),
            Duration::from_secs(2),
        ))))
        .unwrap();

    let value = dispatcher
        .invoke("search_prospects", json!({ "criteria": {}, "limit": 2 }))
        .await
        .unwrap();
    let result: AggregatedResult = serde_json::from_value(value).unwrap();
    assert_eq!(result.candidates.len(), 2);
    assert_eq!(result.total_found, 3);
}

#[tokio::test]
async fn profile_build_then_refine() {
    let dispatcher = dispatcher();
    dispatcher
        .registry()
        .register(Arc::new(ProfileBuilder::new()))
        .unwrap();

    let built = dispatcher
        .invoke(
            "build_profile",
            json!({ "business_context": {
                "company_name": "Ledgerly",
                "industry": "fintech",
                "target_roles": "CTO, VP Engineering"
            }}),
        )
        .await
        .unwrap();
    assert_eq!(built["profile"]["industries"], json!(["fintech"]));

    let refined = dispatcher
        .invoke(
            "refine_profile",
            json!({ "profile": built["profile"], "feedback": "add healthcare to industries" }),
        )
        .await
        .unwrap();
    assert_eq!(
        refined["profile"]["industries"],
        json!(["fintech", "healthcare"])
    );
    assert_eq!(refined["profile"]["version"], json!(2));
}

// ═══════════════════════════════════════════════════════════════════════
//  Review feedback, export and source analysis
// ═══════════════════════════════════════════════════════════════════════

fn dee() -> Candidate {
    let mut company = CompanyInfo::named("Payflow");
    company.industry = Some("Fintech".into());
    Candidate::new("Dee Shaw", "CTO", company)
}

#[tokio::test]
async fn liked_and_disliked_candidates_reshape_the_ranking() {
    let dispatcher = dispatcher();
    let registry = dispatcher.registry();
    registry
        .register(Arc::new(StaticSource::new("s", vec![bob(), cy(), dee()])))
        .unwrap();
    registry
        .register(Arc::new(SearchAggregatorProvider::new(aggregator(
            &dispatcher,
            Duration::from_secs(1),
            Duration::from_secs(2),
        ))))
        .unwrap();

    let plain: AggregatedResult = serde_json::from_value(
        dispatcher
            .invoke("search_prospects", json!({ "criteria": {} }))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(names(&plain), vec!["Bob Diaz", "Cy Park", "Dee Shaw"]);

    let refined: AggregatedResult = serde_json::from_value(
        dispatcher
            .invoke(
                "search_prospects",
                json!({ "criteria": {}, "liked": [ann()], "disliked": [bob()] }),
            )
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(names(&refined), vec!["Dee Shaw", "Cy Park"]);
    assert!(refined.candidates[0].total_score > plain.candidates[2].total_score);
    assert!(refined.candidates[0].rationale.contains("feedback"));
    assert_eq!(refined.total_found, 3);
}

#[tokio::test]
async fn analyzed_sources_feed_profile_building() {
    let dispatcher = dispatcher();
    dispatcher
        .registry()
        .register(Arc::new(ProfileBuilder::new()))
        .unwrap();

    let analysis = dispatcher
        .invoke(
            "analyze_source",
            json!({ "sources": [{
                "kind": "link",
                "url": "https://ledgerly.io/payments",
                "content": "Trusted by the CFO at lenders with 50-200 employees"
            }]}),
        )
        .await
        .unwrap();
    assert_eq!(analysis["facts"]["industry"], "Fintech");

    let built = dispatcher
        .invoke("build_profile", json!({ "business_context": analysis["facts"] }))
        .await
        .unwrap();
    assert_eq!(built["profile"]["industries"], json!(["Fintech"]));
    assert_eq!(built["profile"]["target_roles"], json!(["CFO"]));
    assert_eq!(built["profile"]["company_size"]["max_employees"], json!(200));

    let exported = dispatcher
        .invoke(
            "export_profile",
            json!({ "profile": built["profile"], "format": "summary" }),
        )
        .await
        .unwrap();
    assert_eq!(
        exported["profile"],
        "Target profile: targeting Fintech companies with CFO decision makers."
    );
}
