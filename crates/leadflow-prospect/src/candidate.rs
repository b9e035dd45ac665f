//! Candidate records and their scores.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw records
// ---------------------------------------------------------------------------

/// Company attached to a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl CompanyInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Bucketed headcount label, e.g. `"51-200"`.
    pub fn employee_range(&self) -> Option<&'static str> {
        self.employee_count.map(employee_range)
    }
}

/// A person found by a source provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: CompanyInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Ids of the providers that returned this record.
    #[serde(default)]
    pub provenance: BTreeSet<String>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, title: impl Into<String>, company: CompanyInfo) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            company,
            ..Self::default()
        }
    }

    pub fn with_profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = Some(url.into());
        self
    }

    /// Stable identity used for de-duplication across providers.
    ///
    /// The normalized profile URL when there is one, otherwise the
    /// normalized name and company.
    pub fn identity_key(&self) -> String {
        if let Some(url) = self.profile_url.as_deref().map(normalize_url)
            && !url.is_empty()
        {
            return format!("url:{url}");
        }
        format!(
            "name:{}|{}",
            normalize_text(&self.name),
            normalize_text(&self.company.name)
        )
    }

    /// Number of populated optional fields, used to pick the richer record.
    pub fn populated_fields(&self) -> usize {
        let present = |s: &str| !s.trim().is_empty();
        let some = |s: &Option<String>| s.as_deref().is_some_and(present);
        [
            present(&self.name),
            present(&self.title),
            present(&self.company.name),
            some(&self.company.industry),
            self.company.employee_count.is_some(),
            some(&self.company.location),
            some(&self.company.website),
            some(&self.profile_url),
            some(&self.location),
            some(&self.email),
        ]
        .into_iter()
        .filter(|p| *p)
        .count()
    }
}

/// Map a headcount onto the usual size buckets.
pub fn employee_range(count: u32) -> &'static str {
    match count {
        0..=10 => "1-10",
        11..=50 => "11-50",
        51..=200 => "51-200",
        201..=500 => "201-500",
        501..=1000 => "501-1000",
        1001..=5000 => "1001-5000",
        5001..=10000 => "5001-10000",
        _ => "10000+",
    }
}

fn normalize_url(url: &str) -> String {
    let lowered = url.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    let end = without_www.find(['?', '#']).unwrap_or(without_www.len());
    without_www[..end].trim_end_matches('/').to_string()
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Which scorer produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Primary,
    Fallback,
}

/// Clamp a raw score into `[0, 1]`; non-finite values become `0`.
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A candidate with its scores.  All scores are always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub company_score: f64,
    pub person_score: f64,
    pub total_score: f64,
    #[serde(default)]
    pub rationale: String,
    pub scorer: ScoreSource,
}

impl ScoredCandidate {
    /// Build a scored candidate, clamping every score.
    pub fn new(
        candidate: Candidate,
        company_score: f64,
        person_score: f64,
        total_score: f64,
        rationale: impl Into<String>,
        scorer: ScoreSource,
    ) -> Self {
        Self {
            candidate,
            company_score: clamp_score(company_score),
            person_score: clamp_score(person_score),
            total_score: clamp_score(total_score),
            rationale: rationale.into(),
            scorer,
        }
    }
}
