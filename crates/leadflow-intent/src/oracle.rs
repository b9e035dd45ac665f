//! Classification oracles.
//!
//! The workflow machine asks a [`ClassificationOracle`] what a message means.
//! Two implementations ship with the crate:
//!
//! - [`KeywordOracle`] -- deterministic phrase and pattern matching on top of
//!   the kernel's [`KeywordRouter`], with regex extraction of business facts.
//! - [`CapabilityOracle`] -- forwards to whichever provider serves
//!   `classify_intent` and parses its (untrusted) JSON reply.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};

use leadflow_kernel::{Dispatcher, KeywordMatch, KeywordRouter};
use leadflow_store::{Conversation, Turn, WorkflowState};

use crate::error::{IntentError, Result};
use crate::intent::{Intent, IntentCategory};

/// Capability served by model-backed classifiers.
pub const CLASSIFY_INTENT: &str = "classify_intent";

/// Number of recent turns included in a snapshot.
pub const SNAPSHOT_TURNS: usize = 6;

// ---------------------------------------------------------------------------
// Context snapshot
// ---------------------------------------------------------------------------

/// What the oracle is told about the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub state: WorkflowState,
    pub business_context: BTreeMap<String, String>,
    pub has_profile: bool,
    pub has_candidates: bool,
    pub recent_turns: Vec<Turn>,
}

impl ContextSnapshot {
    pub fn of(conversation: &Conversation) -> Self {
        Self {
            state: conversation.state,
            business_context: conversation.business_context.clone(),
            has_profile: conversation.has_profile(),
            has_candidates: conversation.has_candidates(),
            recent_turns: conversation
                .recent_turns(SNAPSHOT_TURNS)
                .cloned()
                .collect(),
        }
    }
}

/// Turns a message into an [`Intent`].
///
/// Implementations may return anything; the caller validates the result and
/// bounds the call with a timeout.
#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify(&self, message: &str, context: &ContextSnapshot) -> Result<Intent>;
}

// ---------------------------------------------------------------------------
// Keyword oracle
// ---------------------------------------------------------------------------

const NAV_BACK: &str = "navigate:back";
const NAV_START_OVER: &str = "navigate:start_over";
const NAV_SKIP: &str = "navigate:skip";
const RESOURCE: &str = "resource";

const PHRASE_CONFIDENCE: f64 = 0.85;
const PATTERN_CONFIDENCE: f64 = 0.8;
const FACTS_CONFIDENCE: f64 = 0.75;
const CONTEXTUAL_CONFIDENCE: f64 = 0.6;
const UNMATCHED_CONFIDENCE: f64 = 0.3;

const PHRASES: &[(IntentCategory, &[&str])] = &[
    (
        IntentCategory::CasualGreeting,
        &["hi", "hello", "hey", "good morning", "good afternoon", "howdy", "greetings"],
    ),
    (
        IntentCategory::ProvideBusinessInfo,
        &[
            "my company", "our company", "we are a", "we're a", "our business", "i run a",
            "we sell", "we help", "our product", "our customers",
        ],
    ),
    (
        IntentCategory::RequestProfileCreation,
        &[
            "create a profile", "create profile", "build a profile", "create an icp",
            "customer profile", "buyer persona", "ideal customer", "target profile",
        ],
    ),
    (
        IntentCategory::FindProspects,
        &[
            "find prospects", "search for prospects", "search for leads", "find leads",
            "i need leads", "find customers", "find companies", "start searching",
        ],
    ),
    (
        IntentCategory::ProvideFeedback,
        &[
            "refine", "change", "add", "remove", "exclude", "instead", "different",
            "more senior", "focus on", "more like", "less like", "don't like", "similar to",
        ],
    ),
    (
        IntentCategory::Approve,
        &["looks good", "approve", "approved", "yes", "perfect", "let's do it", "sounds good"],
    ),
    (
        IntentCategory::MemoryQuery,
        &["what did we discuss", "remind me", "what was my", "what did i say"],
    ),
    (
        IntentCategory::AskQuestion,
        &["what can you do", "how does this work", "help", "what is an icp"],
    ),
    (
        IntentCategory::AnalyzeResource,
        &["analyze", "analyse", "take a look at", "check out this"],
    ),
];

static COMPANY_NAME_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:my company is|our company is|company name is|we are called|we're called|company called)\s+(?P<v>[^,.;!?\n]+)",
    )
    .ok()
});

static INDUSTRY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:for|we are|we're|i run)\s+(?:a|an)\s+(?P<v>[^,.;!?\n]+?)\s+(?:company|business|startup|firm|agency|platform)\b",
    )
    .ok()
});

static SECTOR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\bin the\s+(?P<v>[^,.;!?\n]+?)\s+(?:industry|space|sector|market)\b").ok()
});

static TARGET_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:targeting|selling to|sell to|we target)\s+(?P<v>[^.;!?\n]+)").ok()
});

static REGION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:based in|located in|operating in|companies in)\s+(?P<v>[^,.;!?\n]+)").ok()
});

static SIZE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<v>\d[\d,]*\s*(?:-|to)\s*\d[\d,]*|\d[\d,]*\s*\+)\s*(?:employees|people|staff)",
    )
    .ok()
});

static URL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?P<v>https?://[^\s,;]+)").ok());

const ROLE_WORDS: &[&str] = &[
    "ceo", "cto", "cfo", "coo", "cmo", "cro", "vp", "head", "director", "manager", "founder",
    "officer", "engineer", "lead", "chief", "owner",
];

/// Deterministic classifier built on the kernel's keyword router.
///
/// The longest matching phrase decides the category.  Messages without a
/// phrase fall back to the URL pattern, then to any extracted business facts,
/// then to a state-dependent guess, and finally to a low-confidence
/// [`IntentCategory::Unclear`].
pub struct KeywordOracle {
    router: KeywordRouter,
}

impl KeywordOracle {
    pub fn new() -> Result<Self> {
        let mut router = KeywordRouter::new();
        for (category, phrases) in PHRASES {
            router.add_phrases(phrases.iter().copied(), category.as_str());
        }
        router.add_phrases(["go back", "previous step", "back up"], NAV_BACK);
        router.add_phrases(["start over", "restart", "reset", "from scratch"], NAV_START_OVER);
        router.add_phrases(["skip", "skip this", "next step"], NAV_SKIP);
        router.add_pattern(r"https?://\S+", RESOURCE)?;

        tracing::debug!(
            phrases = router.phrase_count(),
            patterns = router.pattern_count(),
            "keyword oracle built"
        );
        Ok(Self { router })
    }

    /// Business facts found in `message` by the extraction patterns.
    pub fn extract_facts(message: &str) -> BTreeMap<String, String> {
        let mut facts = BTreeMap::new();
        let capture = |re: &LazyLock<Option<Regex>>| {
            re.as_ref()
                .and_then(|re| re.captures(message))
                .and_then(|caps| caps.name("v"))
                .map(|m| m.as_str().trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(name) = capture(&COMPANY_NAME_RE) {
            let lowered = name.to_lowercase();
            if !["a ", "an ", "the "].iter().any(|p| lowered.starts_with(p)) {
                facts.insert("company_name".to_string(), name);
            }
        }
        if let Some(industry) = capture(&INDUSTRY_RE).or_else(|| capture(&SECTOR_RE)) {
            facts.insert("industry".to_string(), industry);
        }
        if let Some(target) = capture(&TARGET_RE) {
            let key = if looks_like_role(&target) {
                "target_roles"
            } else {
                "target_market"
            };
            facts.insert(key.to_string(), target);
        }
        if let Some(region) = capture(&REGION_RE) {
            facts.insert("region".to_string(), region);
        }
        if let Some(size) = capture(&SIZE_RE) {
            facts.insert("company_size".to_string(), size);
        }
        if let Some(url) = capture(&URL_RE) {
            facts.insert("website".to_string(), url);
        }
        facts
    }

    fn fallback(
        &self,
        message: &str,
        state: WorkflowState,
        facts: &BTreeMap<String, String>,
    ) -> Intent {
        if !facts.is_empty() {
            return Intent::new(IntentCategory::ProvideBusinessInfo, FACTS_CONFIDENCE);
        }
        let words = message.split_whitespace().count();
        match state {
            WorkflowState::Greeting | WorkflowState::BusinessContextGathering if words >= 4 => {
                let mut intent =
                    Intent::new(IntentCategory::ProvideBusinessInfo, CONTEXTUAL_CONFIDENCE);
                if state == WorkflowState::BusinessContextGathering {
                    intent = intent.with_field("business_description", message.trim());
                }
                intent
            }
            WorkflowState::ProfileRefinement | WorkflowState::CandidateReview if words >= 3 => {
                Intent::new(IntentCategory::ProvideFeedback, CONTEXTUAL_CONFIDENCE)
            }
            _ => Intent::new(IntentCategory::Unclear, UNMATCHED_CONFIDENCE),
        }
    }
}

fn looks_like_role(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| ROLE_WORDS.contains(&word) || ROLE_WORDS.contains(&word.trim_end_matches('s')))
}

#[async_trait]
impl ClassificationOracle for KeywordOracle {
    async fn classify(&self, message: &str, context: &ContextSnapshot) -> Result<Intent> {
        let facts = Self::extract_facts(message);

        let mut intent = match self.router.route(message) {
            KeywordMatch::Phrase { label, .. } => {
                let direction = match label.as_str() {
                    NAV_BACK => Some("back"),
                    NAV_START_OVER => Some("start_over"),
                    NAV_SKIP => Some("skip"),
                    _ => None,
                };
                match direction {
                    Some(direction) => Intent::new(IntentCategory::NavigateWorkflow, PHRASE_CONFIDENCE)
                        .with_field("direction", direction),
                    None => Intent::new(IntentCategory::parse(&label), PHRASE_CONFIDENCE),
                }
            }
            KeywordMatch::Pattern { .. } => {
                Intent::new(IntentCategory::AnalyzeResource, PATTERN_CONFIDENCE)
            }
            KeywordMatch::NoMatch => self.fallback(message, context.state, &facts),
        };

        if intent.category == IntentCategory::AnalyzeResource
            && let Some(url) = facts.get("website")
        {
            intent = intent.with_field("resource_url", url.clone());
        }
        intent.extracted_fields.extend(facts);

        tracing::debug!(
            category = %intent.category,
            confidence = intent.confidence,
            fields = intent.extracted_fields.len(),
            "message classified by keywords"
        );
        Ok(intent)
    }
}

// ---------------------------------------------------------------------------
// Capability-backed oracle
// ---------------------------------------------------------------------------

/// Oracle reached through the `classify_intent` capability.
///
/// The provider may answer with an intent object, or with `{"text": ...}`
/// holding model output (fenced JSON is accepted).
pub struct CapabilityOracle {
    dispatcher: Dispatcher,
}

impl CapabilityOracle {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Whether any provider currently declares `classify_intent`.
    pub fn is_available(&self) -> bool {
        self.dispatcher.registry().descriptor(CLASSIFY_INTENT).is_ok()
    }
}

#[async_trait]
impl ClassificationOracle for CapabilityOracle {
    async fn classify(&self, message: &str, context: &ContextSnapshot) -> Result<Intent> {
        let reply = self
            .dispatcher
            .invoke(
                CLASSIFY_INTENT,
                json!({ "message": message, "context": context }),
            )
            .await?;
        match reply {
            Value::String(text) => Intent::from_model_output(&text),
            Value::Object(ref map) => match map.get("text").and_then(Value::as_str) {
                Some(text) => Intent::from_model_output(text),
                None => Intent::from_model_output(&reply.to_string()),
            },
            other => Err(IntentError::ClassificationFailed {
                reason: format!("unexpected classifier reply: {other}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
