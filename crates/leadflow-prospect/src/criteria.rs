//! Search criteria handed to source providers and scorers.

use serde::{Deserialize, Serialize};

use crate::error::{ProspectError, Result};
use crate::profile::{CompanySizeRange, Profile, ProfileChanges};

/// Default number of ranked candidates returned by a search.
pub const DEFAULT_RESULT_LIMIT: usize = 50;

fn default_limit() -> usize {
    DEFAULT_RESULT_LIMIT
}

/// What to look for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub target_roles: Vec<String>,
    #[serde(default)]
    pub seniority_levels: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<CompanySizeRange>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Maximum number of ranked candidates to keep.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            industries: Vec::new(),
            target_roles: Vec::new(),
            seniority_levels: Vec::new(),
            regions: Vec::new(),
            company_size: None,
            keywords: Vec::new(),
            limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

impl SearchCriteria {
    /// Criteria derived from a profile; pain points become keywords.
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            industries: profile.industries.clone(),
            target_roles: profile.target_roles.clone(),
            seniority_levels: profile.seniority_levels.clone(),
            regions: profile.regions.clone(),
            company_size: profile.company_size,
            keywords: profile.pain_points.clone(),
            limit: DEFAULT_RESULT_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Narrow or widen the criteria with feedback-derived changes.
    pub fn apply_changes(&mut self, changes: &ProfileChanges) {
        extend_unique(&mut self.industries, &changes.add_industries);
        extend_unique(&mut self.target_roles, &changes.add_target_roles);
        extend_unique(&mut self.regions, &changes.add_regions);
        extend_unique(&mut self.seniority_levels, &changes.add_seniority_levels);
        extend_unique(&mut self.keywords, &changes.add_pain_points);
        for gone in &changes.remove {
            for list in [
                &mut self.industries,
                &mut self.target_roles,
                &mut self.regions,
                &mut self.seniority_levels,
                &mut self.keywords,
            ] {
                list.retain(|item| !item.eq_ignore_ascii_case(gone));
            }
        }
        if changes.company_size.is_some() {
            self.company_size = changes.company_size;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(ProspectError::InvalidCriteria {
                reason: "limit must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Whether no filter is set at all.
    pub fn is_unconstrained(&self) -> bool {
        self.industries.is_empty()
            && self.target_roles.is_empty()
            && self.seniority_levels.is_empty()
            && self.regions.is_empty()
            && self.company_size.is_none()
            && self.keywords.is_empty()
    }
}

fn extend_unique(list: &mut Vec<String>, additions: &[String]) {
    for item in additions {
        if !list.iter().any(|have| have.eq_ignore_ascii_case(item)) {
            list.push(item.clone());
        }
    }
}
