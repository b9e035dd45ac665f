//! Target customer profiles and the rule-based profile builder.
//!
//! A [`Profile`] describes who the user wants to reach: industries, company
//! size, regions, roles and seniority.  The [`ProfileBuilder`] provider
//! serves `build_profile` (from accumulated business facts),
//! `refine_profile` (from user feedback), `export_profile` and
//! `analyze_source` without any model in the loop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use leadflow_kernel::{CapabilityDescriptor, CapabilityProvider, KernelError, ParamKind, ParamSchema};

use crate::analysis::{SourceInput, analyze_sources};
use crate::capabilities::{ANALYZE_SOURCE, BUILD_PROFILE, EXPORT_PROFILE, REFINE_PROFILE};
use crate::error::{ProspectError, Result};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Inclusive headcount range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanySizeRange {
    pub min_employees: u32,
    pub max_employees: u32,
}

impl CompanySizeRange {
    pub fn contains(&self, count: u32) -> bool {
        (self.min_employees..=self.max_employees).contains(&count)
    }

    /// Parse `"50-200"`, `"50 to 200"`, `"500+"`, a bare number, or a
    /// segment word (`startup`, `smb`, `mid-market`, `enterprise`).
    pub fn parse(text: &str) -> Option<Self> {
        let lowered = text.trim().to_lowercase().replace(',', "");
        let range = |min, max| {
            Some(Self {
                min_employees: min,
                max_employees: max,
            })
        };
        match lowered.as_str() {
            "startup" | "startups" => return range(1, 50),
            "smb" | "small" | "small business" => return range(1, 200),
            "mid-market" | "midmarket" | "mid market" => return range(200, 1000),
            "enterprise" | "large" => return range(1000, u32::MAX),
            _ => {}
        }

        let numbers: Vec<u32> = lowered
            .split(|c: char| !c.is_ascii_digit())
            .filter_map(|n| n.parse().ok())
            .collect();
        match numbers.as_slice() {
            [min, max, ..] if min <= max => range(*min, *max),
            [n] if lowered.contains('+') => range(*n, u32::MAX),
            [n] => range(*n, *n),
            _ => None,
        }
    }
}

impl fmt::Display for CompanySizeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max_employees == u32::MAX {
            write!(f, "{}+ employees", self.min_employees)
        } else {
            write!(f, "{}-{} employees", self.min_employees, self.max_employees)
        }
    }
}

/// One round of user feedback applied to a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub feedback: String,
    pub changes: Value,
    /// Version the feedback was applied to.
    pub version: u32,
    pub at: DateTime<Utc>,
}

/// Ideal customer profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<CompanySizeRange>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub target_roles: Vec<String>,
    #[serde(default)]
    pub seniority_levels: Vec<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default)]
    pub feedback_history: Vec<FeedbackEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn first_version() -> u32 {
    1
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            description: String::new(),
            industries: Vec::new(),
            company_size: None,
            regions: Vec::new(),
            target_roles: Vec::new(),
            seniority_levels: Vec::new(),
            pain_points: Vec::new(),
            version: 1,
            feedback_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `changes` and record `feedback`, bumping the version.
    pub fn apply(&mut self, feedback: &str, changes: &ProfileChanges) {
        merge_into(&mut self.industries, &changes.add_industries);
        merge_into(&mut self.target_roles, &changes.add_target_roles);
        merge_into(&mut self.regions, &changes.add_regions);
        merge_into(&mut self.seniority_levels, &changes.add_seniority_levels);
        merge_into(&mut self.pain_points, &changes.add_pain_points);

        for gone in &changes.remove {
            let gone = gone.to_lowercase();
            for list in [
                &mut self.industries,
                &mut self.target_roles,
                &mut self.regions,
                &mut self.seniority_levels,
                &mut self.pain_points,
            ] {
                list.retain(|item| item.to_lowercase() != gone);
            }
        }

        if let Some(size) = changes.company_size {
            self.company_size = Some(size);
        }

        self.feedback_history.push(FeedbackEntry {
            feedback: feedback.to_string(),
            changes: serde_json::to_value(changes).unwrap_or(Value::Null),
            version: self.version,
            at: Utc::now(),
        });
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Markdown-style rendering for reading or pasting elsewhere.
    pub fn to_text(&self) -> String {
        let list = or_any;
        let mut lines = vec![format!("# {}", self.name)];
        if !self.description.is_empty() {
            lines.push(String::new());
            lines.push(self.description.clone());
        }
        lines.push(String::new());
        lines.push(format!("## Industries\n{}", list(&self.industries)));
        lines.push(format!(
            "## Company size\n{}",
            self.company_size
                .map(|size| size.to_string())
                .unwrap_or_else(|| "any".to_string())
        ));
        lines.push(format!("## Regions\n{}", list(&self.regions)));
        lines.push(format!("## Target roles\n{}", list(&self.target_roles)));
        lines.push(format!("## Seniority\n{}", list(&self.seniority_levels)));
        if !self.pain_points.is_empty() {
            lines.push(format!("## Pain points\n{}", list(&self.pain_points)));
        }
        lines.push(format!("\nVersion {}", self.version));
        lines.join("\n")
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{}: targeting {} companies with {} decision makers.",
            self.name,
            or_any(&self.industries),
            or_any(&self.target_roles)
        )
    }
}

fn or_any(items: &[String]) -> String {
    if items.is_empty() {
        "any".to_string()
    } else {
        items.join(", ")
    }
}

/// Output shape of `export_profile`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Json,
    Text,
    Summary,
}

impl ExportFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "text" | "markdown" | "md" => Some(Self::Text),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
            Self::Summary => "summary",
        }
    }

    /// Render `profile` in this format.
    pub fn render(self, profile: &Profile) -> Result<Value> {
        Ok(match self {
            Self::Json => serde_json::to_value(profile)?,
            Self::Text => Value::String(profile.to_text()),
            Self::Summary => Value::String(profile.summary()),
        })
    }
}

/// Structured edits to a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileChanges {
    #[serde(default)]
    pub add_industries: Vec<String>,
    #[serde(default)]
    pub add_target_roles: Vec<String>,
    #[serde(default)]
    pub add_regions: Vec<String>,
    #[serde(default)]
    pub add_seniority_levels: Vec<String>,
    #[serde(default)]
    pub add_pain_points: Vec<String>,
    /// Values removed from every list, case-insensitively.
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub company_size: Option<CompanySizeRange>,
}

static ADD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:add|include|also target|target|focus on)\s+(?P<items>.+?)(?:\s+(?:to|as|in|into)\s+(?:the\s+)?(?P<field>industries|industry|roles|role|titles|title|regions|region|locations|location|seniority|pain points))?\s*$",
    )
    .ok()
});

static REMOVE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:remove|exclude|drop|no more)\s+(?P<items>.+?)\s*$").ok()
});

pub(crate) static SIZE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(?P<range>\d[\d,]*\s*(?:-|to)\s*\d[\d,]*|\d[\d,]*\s*\+)\s*(?:employees|people|staff)")
        .ok()
});

const ROLE_WORDS: &[&str] = &[
    "ceo", "cto", "cfo", "coo", "cmo", "cro", "vp", "head", "director", "manager", "founder",
    "officer", "engineer", "lead", "president", "owner", "chief",
];

impl ProfileChanges {
    /// Extract structured edits from free-text feedback.
    pub fn from_feedback(feedback: &str) -> Self {
        let mut changes = Self::default();

        for clause in feedback
            .split(['.', ';', '\n'])
            .flat_map(|c| c.split(" but "))
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            if let Some(caps) = SIZE_RE.as_ref().and_then(|re| re.captures(clause)) {
                changes.company_size = CompanySizeRange::parse(&caps["range"]);
                continue;
            }

            if let Some(caps) = REMOVE_RE.as_ref().and_then(|re| re.captures(clause)) {
                changes.remove.extend(split_list(&caps["items"]));
                continue;
            }

            if let Some(caps) = ADD_RE.as_ref().and_then(|re| re.captures(clause)) {
                let items = split_list(&caps["items"]);
                let field = caps.name("field").map(|m| m.as_str().to_lowercase());
                for item in items {
                    let target = match field.as_deref() {
                        Some("industries" | "industry") => &mut changes.add_industries,
                        Some("roles" | "role" | "titles" | "title") => {
                            &mut changes.add_target_roles
                        }
                        Some("regions" | "region" | "locations" | "location") => {
                            &mut changes.add_regions
                        }
                        Some("seniority") => &mut changes.add_seniority_levels,
                        Some(_) => &mut changes.add_pain_points,
                        None if looks_like_role(&item) => &mut changes.add_target_roles,
                        None => &mut changes.add_industries,
                    };
                    target.push(item);
                }
            }
        }

        changes
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Union of two change sets; `other` wins on company size.
    pub fn merged(mut self, other: ProfileChanges) -> Self {
        self.add_industries.extend(other.add_industries);
        self.add_target_roles.extend(other.add_target_roles);
        self.add_regions.extend(other.add_regions);
        self.add_seniority_levels.extend(other.add_seniority_levels);
        self.add_pain_points.extend(other.add_pain_points);
        self.remove.extend(other.remove);
        if other.company_size.is_some() {
            self.company_size = other.company_size;
        }
        self
    }
}

fn looks_like_role(item: &str) -> bool {
    let lowered = item.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| ROLE_WORDS.contains(&word))
}

/// Split `"fintech, healthcare and retail"` into its items.
pub fn split_list(text: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in text
        .split([',', ';', '/'])
        .flat_map(|part| part.split(" and "))
        .map(|s| s.trim().trim_matches(|c: char| c == '"' || c == '\''))
        .filter(|s| !s.is_empty())
    {
        if !items.iter().any(|have| have.eq_ignore_ascii_case(item)) {
            items.push(item.to_string());
        }
    }
    items
}

fn merge_into(list: &mut Vec<String>, additions: &[String]) {
    for item in additions {
        if !list.iter().any(|have| have.eq_ignore_ascii_case(item)) {
            list.push(item.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build a profile from accumulated business facts.
///
/// Recognised keys: `company_name`, `industry`, `target_market`,
/// `target_roles`, `seniority`, `company_size`, `region`, `pain_points`,
/// `product`, `business_description`.  Unknown keys are ignored.
pub fn build_from_context(context: &BTreeMap<String, String>, name: Option<&str>) -> Profile {
    let get = |key: &str| context.get(key).map(String::as_str).unwrap_or_default();

    let name = match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ if !get("company_name").is_empty() => format!("{} target profile", get("company_name")),
        _ => "Target profile".to_string(),
    };

    let mut profile = Profile::new(name);
    profile.industries = split_list(get("industry"));
    merge_into(&mut profile.industries, &split_list(get("target_market")));
    profile.target_roles = split_list(get("target_roles"));
    profile.seniority_levels = split_list(get("seniority"));
    profile.regions = split_list(get("region"));
    profile.pain_points = split_list(get("pain_points"));
    profile.company_size = CompanySizeRange::parse(get("company_size"));
    profile.description = [get("business_description"), get("product")]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    profile
}

/// Rule-based provider for `build_profile` and `refine_profile`.
pub struct ProfileBuilder {
    id: String,
}

impl ProfileBuilder {
    pub const DEFAULT_ID: &'static str = "profile-builder";

    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Self::DEFAULT_ID.to_string(),
        }
    }

    fn build(&self, params: &Value) -> Result<Value> {
        let context: BTreeMap<String, String> = match params.get("business_context") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        };
        let name = params.get("name").and_then(Value::as_str);

        let profile = build_from_context(&context, name);
        tracing::info!(
            profile_id = %profile.id,
            industries = profile.industries.len(),
            roles = profile.target_roles.len(),
            "profile built"
        );
        Ok(json!({ "profile": profile }))
    }

    fn refine(&self, params: &Value) -> Result<Value> {
        let mut profile = profile_param(params)?;

        let feedback = params
            .get("feedback")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let structured: ProfileChanges = match params.get("changes") {
            Some(v @ Value::Object(_)) => serde_json::from_value(v.clone())?,
            _ => ProfileChanges::default(),
        };
        let changes = ProfileChanges::from_feedback(feedback).merged(structured);

        if changes.is_empty() {
            tracing::debug!(profile_id = %profile.id, "feedback carried no structured changes");
        }
        profile.apply(feedback, &changes);
        tracing::info!(profile_id = %profile.id, version = profile.version, "profile refined");

        Ok(json!({ "profile": profile, "changes": changes }))
    }

    fn export(&self, params: &Value) -> Result<Value> {
        let profile = profile_param(params)?;
        let format = match params.get("format").and_then(Value::as_str) {
            None => ExportFormat::default(),
            Some(name) => ExportFormat::parse(name).ok_or_else(|| ProspectError::InvalidCriteria {
                reason: format!("unsupported export format `{name}`"),
            })?,
        };
        let rendered = format.render(&profile)?;
        tracing::info!(profile_id = %profile.id, format = format.as_str(), "profile exported");
        Ok(json!({ "format": format, "profile_id": profile.id, "profile": rendered }))
    }

    fn analyze(&self, params: &Value) -> Result<Value> {
        let sources: Vec<SourceInput> = match params.get("sources") {
            Some(v @ Value::Array(_)) => serde_json::from_value(v.clone())?,
            _ => Vec::new(),
        };
        Ok(serde_json::to_value(analyze_sources(&sources))?)
    }
}

fn profile_param(params: &Value) -> Result<Profile> {
    params
        .get("profile")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .ok_or_else(|| ProspectError::InvalidCriteria {
            reason: "missing profile".into(),
        })
}

impl Default for ProfileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityProvider for ProfileBuilder {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Rule-based profile builder"
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![
            CapabilityDescriptor::new(BUILD_PROFILE, "Build a target profile from business facts")
                .with_schema(
                    ParamSchema::empty()
                        .required("business_context", ParamKind::Object)
                        .optional("name", ParamKind::String)
                        .optional("source_materials", ParamKind::Array),
                ),
            CapabilityDescriptor::new(REFINE_PROFILE, "Apply user feedback to a profile").with_schema(
                ParamSchema::empty()
                    .required("profile", ParamKind::Object)
                    .optional("feedback", ParamKind::String)
                    .optional("changes", ParamKind::Object),
            ),
            CapabilityDescriptor::new(EXPORT_PROFILE, "Render a profile as json, text or summary")
                .with_schema(
                    ParamSchema::empty()
                        .required("profile", ParamKind::Object)
                        .optional("format", ParamKind::String),
                ),
            CapabilityDescriptor::new(ANALYZE_SOURCE, "Derive business facts from attached sources")
                .with_schema(ParamSchema::empty().required("sources", ParamKind::Array)),
        ]
    }

    async fn invoke(&self, capability: &str, params: Value) -> leadflow_kernel::Result<Value> {
        let outcome = match capability {
            BUILD_PROFILE => self.build(&params),
            REFINE_PROFILE => self.refine(&params),
            EXPORT_PROFILE => self.export(&params),
            ANALYZE_SOURCE => self.analyze(&params),
            other => {
                return Err(KernelError::UnknownCapability {
                    capability: other.to_string(),
                });
            }
        };
        outcome.map_err(|e| e.into_kernel(capability, &self.id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
