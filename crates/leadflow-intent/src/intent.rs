//! Classified intents and the validation applied to oracle output.
//!
//! Oracle output is untrusted.  [`Intent::validated`] clamps the confidence
//! into `[0, 1]` (non-finite becomes `0`) and keeps only allow-listed
//! extracted fields whose values fit the length bound.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IntentError, Result};

/// Extracted field names the engine accepts from a classifier.
pub const ALLOWED_FIELDS: &[&str] = &[
    "company_name",
    "industry",
    "target_market",
    "target_roles",
    "seniority",
    "company_size",
    "region",
    "pain_points",
    "product",
    "business_description",
    "website",
    "direction",
    "resource_url",
];

/// Longest accepted extracted value, in characters.
pub const MAX_FIELD_CHARS: usize = 500;

/// Fields that are business facts (merged into the conversation context).
pub const BUSINESS_FIELDS: &[&str] = &[
    "company_name",
    "industry",
    "target_market",
    "target_roles",
    "seniority",
    "company_size",
    "region",
    "pain_points",
    "product",
    "business_description",
    "website",
];

/// What the user is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    CasualGreeting,
    ProvideBusinessInfo,
    #[serde(alias = "request_icp_creation")]
    RequestProfileCreation,
    ProvideFeedback,
    Approve,
    FindProspects,
    NavigateWorkflow,
    MemoryQuery,
    AskQuestion,
    AnalyzeResource,
    Unclear,
}

impl IntentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CasualGreeting => "casual_greeting",
            Self::ProvideBusinessInfo => "provide_business_info",
            Self::RequestProfileCreation => "request_profile_creation",
            Self::ProvideFeedback => "provide_feedback",
            Self::Approve => "approve",
            Self::FindProspects => "find_prospects",
            Self::NavigateWorkflow => "navigate_workflow",
            Self::MemoryQuery => "memory_query",
            Self::AskQuestion => "ask_question",
            Self::AnalyzeResource => "analyze_resource",
            Self::Unclear => "unclear",
        }
    }

    /// Lenient parse; anything unknown is [`IntentCategory::Unclear`].
    pub fn parse(label: &str) -> Self {
        serde_json::from_value(Value::String(label.trim().to_lowercase())).unwrap_or(Self::Unclear)
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub category: IntentCategory,
    pub confidence: f64,
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, String>,
}

impl Intent {
    pub fn new(category: IntentCategory, confidence: f64) -> Self {
        Self {
            category,
            confidence,
            extracted_fields: BTreeMap::new(),
        }
    }

    /// The intent used when classification fails or times out.
    pub fn unclear() -> Self {
        Self::new(IntentCategory::Unclear, 0.0)
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extracted_fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.extracted_fields.get(key).map(String::as_str)
    }

    /// Apply the trust boundary: clamp confidence, filter fields.
    pub fn validated(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let before = self.extracted_fields.len();
        self.extracted_fields = std::mem::take(&mut self.extracted_fields)
            .into_iter()
            .filter_map(|(key, value)| {
                let key = key.trim().to_lowercase();
                let value = value.trim().to_string();
                let allowed = ALLOWED_FIELDS.contains(&key.as_str());
                let fits = !value.is_empty() && value.chars().count() <= MAX_FIELD_CHARS;
                (allowed && fits).then_some((key, value))
            })
            .collect();

        let dropped = before - self.extracted_fields.len();
        if dropped > 0 {
            tracing::debug!(dropped, "extracted fields rejected by validation");
        }
        self
    }

    /// Business facts among the extracted fields.
    pub fn business_facts(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.extracted_fields
            .iter()
            .filter(|(k, _)| BUSINESS_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Parse model-produced JSON (optionally wrapped in a code fence) into a
    /// validated intent.
    ///
    /// Accepts `category` or `intent_type` for the label and
    /// `extracted_fields`, `extracted_info` or `entities` for the fields.
    /// Non-string field values are stringified; nested values are dropped.
    pub fn from_model_output(text: &str) -> Result<Self> {
        let payload = leadflow_prospect::scoring::extract_json(text);
        let parsed: Value =
            serde_json::from_str(payload).map_err(|e| IntentError::ClassificationFailed {
                reason: format!("classifier output is not JSON: {e}"),
            })?;
        let Value::Object(obj) = parsed else {
            return Err(IntentError::ClassificationFailed {
                reason: "classifier output is not a JSON object".into(),
            });
        };

        let category = ["category", "intent_type", "intent"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(IntentCategory::parse)
            .unwrap_or(IntentCategory::Unclear);
        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let extracted_fields = ["extracted_fields", "extracted_info", "entities"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_object))
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|(k, v)| {
                        let value = match v {
                            Value::String(s) => s.clone(),
                            Value::Number(n) => n.to_string(),
                            Value::Bool(b) => b.to_string(),
                            Value::Array(items) => items
                                .iter()
                                .filter_map(Value::as_str)
                                .collect::<Vec<_>>()
                                .join(", "),
                            _ => return None,
                        };
                        Some((k.clone(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            category,
            confidence,
            extracted_fields,
        }
        .validated())
    }
}
