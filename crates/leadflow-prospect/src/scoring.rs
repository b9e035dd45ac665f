//! Candidate scoring.
//!
//! Scoring is two-tiered.  A [`PrimaryScorer`] (opaque, typically backed by a
//! model) returns one raw JSON entry per candidate.  Any entry that is
//! missing, unparsable or lacks a numeric score, and every entry when the
//! primary call fails as a whole, is scored by the deterministic
//! [`RuleBasedScorer`] instead.  Scores are clamped into `[0, 1]` on the way
//! out, never rejected.
//!
//! Expected primary entry shape:
//!
//! ```json
//! { "company_match_score": 0.8, "person_match_score": 0.6,
//!   "total_score": 0.7, "reasoning": "..." }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use leadflow_kernel::Dispatcher;

use crate::candidate::{Candidate, ScoreSource, ScoredCandidate};
use crate::capabilities::SCORE_CANDIDATES;
use crate::criteria::SearchCriteria;
use crate::error::{ProspectError, Result};

/// Default timeout for one primary scoring call.
pub const DEFAULT_SCORING_TIMEOUT: Duration = Duration::from_secs(20);

// ---------------------------------------------------------------------------
// Primary scorer
// ---------------------------------------------------------------------------

/// An external batch scorer.
///
/// Entries are matched to candidates by position.
#[async_trait]
pub trait PrimaryScorer: Send + Sync {
    async fn score_batch(
        &self,
        criteria: &SearchCriteria,
        candidates: &[Candidate],
    ) -> Result<Vec<Value>>;
}

/// A parsed primary score entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryScore {
    pub company: f64,
    pub person: f64,
    pub total: f64,
    pub reasoning: String,
}

/// Parse one primary entry; `None` means "use the fallback".
pub fn parse_primary_entry(entry: &Value) -> Option<PrimaryScore> {
    let obj = entry.as_object()?;
    let number = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_f64));

    Some(PrimaryScore {
        company: number(&["company_match_score", "company_score"])?,
        person: number(&["person_match_score", "person_score"])?,
        total: number(&["total_score", "score"])?,
        reasoning: obj
            .get("reasoning")
            .or_else(|| obj.get("rationale"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Locate the JSON payload inside a model reply.
///
/// Prefers a fenced ```` ```json ```` block, then the outermost array, then
/// the outermost object; otherwise returns the trimmed text unchanged.
pub fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }

    let outermost = |open: char, close: char| {
        let start = text.find(open)?;
        let end = text.rfind(close)?;
        (end > start).then(|| &text[start..=end])
    };
    outermost('[', ']')
        .or_else(|| outermost('{', '}'))
        .unwrap_or_else(|| text.trim())
}

/// Parse a batch scoring reply into per-candidate entries.
///
/// Accepts a bare array or an object with a `scores` array.
pub fn parse_score_response(text: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(extract_json(text)).map_err(|e| {
        ProspectError::ScoreParse {
            reason: e.to_string(),
        }
    })?;
    entries_from_value(value)
}

fn entries_from_value(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut map) => match map.remove("scores") {
            Some(Value::Array(entries)) => Ok(entries),
            _ => match map.remove("text") {
                Some(Value::String(text)) => parse_score_response(&text),
                _ => Err(ProspectError::ScoreParse {
                    reason: "expected an array of scores".into(),
                }),
            },
        },
        other => Err(ProspectError::ScoreParse {
            reason: format!("expected an array of scores, got {other}"),
        }),
    }
}

/// Primary scorer reached through the `score_candidates` capability.
pub struct CapabilityScorer {
    dispatcher: Dispatcher,
}

impl CapabilityScorer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Whether any provider currently declares `score_candidates`.
    pub fn is_available(&self) -> bool {
        self.dispatcher.registry().descriptor(SCORE_CANDIDATES).is_ok()
    }
}

#[async_trait]
impl PrimaryScorer for CapabilityScorer {
    async fn score_batch(
        &self,
        criteria: &SearchCriteria,
        candidates: &[Candidate],
    ) -> Result<Vec<Value>> {
        let reply = self
            .dispatcher
            .invoke(
                SCORE_CANDIDATES,
                json!({ "criteria": criteria, "candidates": candidates }),
            )
            .await?;
        entries_from_value(reply)
    }
}

// ---------------------------------------------------------------------------
// Rule-based scorer
// ---------------------------------------------------------------------------

/// Component weights of the rule-based scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub industry: f64,
    pub company_size: f64,
    pub geography: f64,
    pub role: f64,
    pub seniority: f64,
    /// Share of the company score in the total; the person score gets the rest.
    pub company_share: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            industry: 0.4,
            company_size: 0.3,
            geography: 0.1,
            role: 0.4,
            seniority: 0.3,
            company_share: 0.5,
        }
    }
}

/// Deterministic scorer comparing a candidate against the criteria.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedScorer {
    weights: ScoringWeights,
}

const NEUTRAL: f64 = 0.5;

impl RuleBasedScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, criteria: &SearchCriteria, candidate: &Candidate) -> ScoredCandidate {
        let mut matched = Vec::new();
        let w = &self.weights;

        let mut company = Vec::new();
        if let Some(industry) = candidate.company.industry.as_deref()
            && !criteria.industries.is_empty()
        {
            let hit = criteria
                .industries
                .iter()
                .any(|target| contains_either(industry, target));
            if hit {
                matched.push("industry");
            }
            company.push((if hit { 1.0 } else { 0.0 }, w.industry));
        }
        if let (Some(range), Some(count)) = (criteria.company_size, candidate.company.employee_count)
        {
            let score = if range.contains(count) {
                matched.push("company size");
                1.0
            } else if count < range.min_employees {
                f64::from(count) / f64::from(range.min_employees.max(1)) * 0.5
            } else {
                f64::from(range.max_employees) / f64::from(count) * 0.5
            };
            company.push((score, w.company_size));
        }
        let location = candidate
            .company
            .location
            .as_deref()
            .or(candidate.location.as_deref());
        if let Some(location) = location
            && !criteria.regions.is_empty()
        {
            let hit = criteria
                .regions
                .iter()
                .any(|region| contains_either(location, region));
            if hit {
                matched.push("region");
            }
            company.push((if hit { 1.0 } else { 0.0 }, w.geography));
        }

        let mut person = Vec::new();
        if !criteria.target_roles.is_empty() && !candidate.title.trim().is_empty() {
            let score = role_match(&candidate.title, &criteria.target_roles);
            if score > 0.0 {
                matched.push("role");
            }
            person.push((score, w.role));
        }
        if !criteria.seniority_levels.is_empty()
            && let Some(level) = seniority_of(&candidate.title)
        {
            let hit = criteria
                .seniority_levels
                .iter()
                .any(|s| seniority_of(s) == Some(level) || s.eq_ignore_ascii_case(level));
            if hit {
                matched.push("seniority");
            }
            person.push((if hit { 1.0 } else { 0.0 }, w.seniority));
        }

        let company_score = weighted(&company);
        let person_score = weighted(&person);
        let share = w.company_share.clamp(0.0, 1.0);
        let total = company_score * share + person_score * (1.0 - share);

        let rationale = if matched.is_empty() {
            "rule-based: no criteria matched".to_string()
        } else {
            format!("rule-based: matched {}", matched.join(", "))
        };

        ScoredCandidate::new(
            candidate.clone(),
            company_score,
            person_score,
            total,
            rationale,
            ScoreSource::Fallback,
        )
    }
}

fn weighted(components: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = components.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        return NEUTRAL;
    }
    components.iter().map(|(s, w)| s * w).sum::<f64>() / total_weight
}

fn contains_either(a: &str, b: &str) -> bool {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

fn role_match(title: &str, targets: &[String]) -> f64 {
    let title = title.to_lowercase();
    if targets.iter().any(|t| t.to_lowercase() == title) {
        return 1.0;
    }
    let title_words: Vec<&str> = title.split(|c: char| !c.is_alphanumeric()).collect();
    let partial = targets.iter().any(|target| {
        target
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2 && !matches!(*w, "and" | "the" | "for"))
            .any(|w| title_words.contains(&w))
    });
    if partial { 0.7 } else { 0.0 }
}

/// Coarse seniority bucket inferred from a title.
fn seniority_of(title: &str) -> Option<&'static str> {
    let lowered = title.to_lowercase();
    let has = |w: &str| {
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == w)
    };
    if ["ceo", "cto", "cfo", "coo", "cmo", "cro", "chief", "founder", "owner", "president"]
        .iter()
        .any(|w| has(w))
        || lowered.contains("c-level")
    {
        Some("c-level")
    } else if has("vp") || lowered.contains("vice president") {
        Some("vp")
    } else if has("director") || has("head") {
        Some("director")
    } else if has("manager") || has("lead") {
        Some("manager")
    } else if has("senior") || has("sr") {
        Some("senior")
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Combined scoring
// ---------------------------------------------------------------------------

/// Primary scorer with per-candidate fallback.
#[derive(Clone)]
pub struct CandidateScorer {
    primary: Option<Arc<dyn PrimaryScorer>>,
    fallback: RuleBasedScorer,
    timeout: Duration,
}

impl CandidateScorer {
    /// Rule-based scoring only.
    pub fn rule_based(weights: ScoringWeights) -> Self {
        Self {
            primary: None,
            fallback: RuleBasedScorer::new(weights),
            timeout: DEFAULT_SCORING_TIMEOUT,
        }
    }

    pub fn with_primary(mut self, primary: Arc<dyn PrimaryScorer>) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Score every candidate, preserving order.
    pub async fn score(
        &self,
        criteria: &SearchCriteria,
        candidates: Vec<Candidate>,
    ) -> Vec<ScoredCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let entries = match &self.primary {
            None => Vec::new(),
            Some(primary) => {
                match tokio::time::timeout(self.timeout, primary.score_batch(criteria, &candidates))
                    .await
                {
                    Ok(Ok(entries)) => entries,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "primary scorer failed, using fallback for all");
                        Vec::new()
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout_ms = self.timeout.as_millis() as u64,
                            "primary scorer timed out, using fallback for all"
                        );
                        Vec::new()
                    }
                }
            }
        };

        let mut fallbacks = 0usize;
        let scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| match entries.get(i).and_then(parse_primary_entry) {
                Some(p) => ScoredCandidate::new(
                    candidate,
                    p.company,
                    p.person,
                    p.total,
                    p.reasoning,
                    ScoreSource::Primary,
                ),
                None => {
                    fallbacks += 1;
                    self.fallback.score(criteria, &candidate)
                }
            })
            .collect();

        if self.primary.is_some() && fallbacks > 0 {
            tracing::debug!(fallbacks, total = scored.len(), "fallback scorer used");
        }
        scored
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
