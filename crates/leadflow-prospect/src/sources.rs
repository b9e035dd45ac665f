//! In-process `source_search` providers.
//!
//! [`StaticSource`] serves a fixed candidate set, filtered by the search
//! criteria.  It backs the demo data set shipped with the CLI and stands in
//! for real data vendors in tests, where its latency and failure knobs are
//! used to simulate slow or broken sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use leadflow_kernel::{
    CapabilityDescriptor, CapabilityProvider, KernelError, ParamKind, ParamSchema,
};

use crate::candidate::Candidate;
use crate::capabilities::SOURCE_SEARCH;
use crate::criteria::SearchCriteria;

/// A source answering from an in-memory candidate list.
pub struct StaticSource {
    id: String,
    name: String,
    candidates: Vec<Candidate>,
    latency: Duration,
    failing: bool,
    reachable: Arc<AtomicBool>,
}

impl StaticSource {
    pub fn new(id: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            candidates,
            latency: Duration::ZERO,
            failing: false,
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Delay every search by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every search fail.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Shared switch controlling whether health pings succeed.
    pub fn reachability(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reachable)
    }

    /// Candidates matching `criteria`; everything when it is unconstrained.
    pub fn matching(&self, criteria: &SearchCriteria) -> Vec<Candidate> {
        if criteria.is_unconstrained() {
            return self.candidates.clone();
        }
        self.candidates
            .iter()
            .filter(|c| qualifies(criteria, c))
            .cloned()
            .collect()
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .any(|n| !n.trim().is_empty() && haystack.contains(&n.trim().to_lowercase()))
}

/// Loose match: a candidate qualifies when it hits any industry or role.
/// With neither set, the other filters decide.
fn qualifies(criteria: &SearchCriteria, candidate: &Candidate) -> bool {
    let industry = candidate.company.industry.as_deref().unwrap_or_default();
    let location = [
        candidate.location.as_deref().unwrap_or_default(),
        candidate.company.location.as_deref().unwrap_or_default(),
    ]
    .join(" ");

    let primary_filters = !criteria.industries.is_empty() || !criteria.target_roles.is_empty();
    let primary_hit = contains_any(industry, &criteria.industries)
        || contains_any(&candidate.title, &criteria.target_roles);

    let region_ok = criteria.regions.is_empty() || contains_any(&location, &criteria.regions);
    let size_ok = match (criteria.company_size, candidate.company.employee_count) {
        (Some(range), Some(count)) => range.contains(count),
        _ => true,
    };

    (!primary_filters || primary_hit) && region_ok && size_ok
}

#[async_trait]
impl CapabilityProvider for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![
            CapabilityDescriptor::new(SOURCE_SEARCH, "Search a static candidate set")
                .with_schema(ParamSchema::empty().required("criteria", ParamKind::Object)),
        ]
    }

    async fn invoke(&self, capability: &str, params: Value) -> leadflow_kernel::Result<Value> {
        if capability != SOURCE_SEARCH {
            return Err(KernelError::UnknownCapability {
                capability: capability.to_string(),
            });
        }

        let criteria: SearchCriteria = params
            .get("criteria")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing {
            return Err(KernelError::provider(&self.id, "source backend error"));
        }

        let found = self.matching(&criteria);
        tracing::debug!(provider_id = %self.id, found = found.len(), "static source searched");
        Ok(json!({ "candidates": found }))
    }

    async fn ping(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CompanyInfo;
    use crate::profile::CompanySizeRange;

    fn people() -> Vec<Candidate> {
        let mut fin = CompanyInfo::named("Ledgerly");
        fin.industry = Some("Fintech".into());
        fin.employee_count = Some(120);
        let mut health = CompanyInfo::named("Carewell");
        health.industry = Some("Healthcare".into());
        health.employee_count = Some(4000);
        vec![
            Candidate::new("Ann", "CTO", fin),
            Candidate::new("Bob", "Head of Nursing", health),
        ]
    }

    #[test]
    fn unconstrained_returns_everything() {
        let source = StaticSource::new("s", people());
        assert_eq!(source.matching(&SearchCriteria::default()).len(), 2);
    }

    #[test]
    fn filters_by_industry_and_size() {
        let source = StaticSource::new("s", people());
        let criteria = SearchCriteria {
            industries: vec!["fintech".into(), "healthcare".into()],
            company_size: Some(CompanySizeRange {
                min_employees: 50,
                max_employees: 500,
            }),
            ..SearchCriteria::default()
        };
        let found = source.matching(&criteria);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Ann");
    }

    #[tokio::test]
    async fn failing_source_returns_error() {
        let source = StaticSource::new("s", people()).failing();
        let err = source
            .invoke(SOURCE_SEARCH, json!({ "criteria": {} }))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::ProviderError { .. }));
    }

    #[tokio::test]
    async fn ping_follows_reachability_switch() {
        let source = StaticSource::new("s", Vec::new());
        assert!(source.ping().await);
        source.reachability().store(false, Ordering::SeqCst);
        assert!(!source.ping().await);
    }
}
