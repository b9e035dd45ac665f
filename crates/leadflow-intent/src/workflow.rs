//! The conversational workflow state machine.
//!
//! [`WorkflowMachine::route`] turns one user message into a
//! [`RouteDecision`]: which capability to dispatch (if any), with which
//! parameters, and which state the conversation enters.  Routing rules apply
//! in precedence order, first match wins:
//!
//! 1. navigation commands (go back, start over, skip)
//! 2. explicit capability requests, with visible auto-fill of missing inputs
//! 3. the default handler of the current state
//! 4. a free-form reply that leaves the state alone
//!
//! Completion events ("profile built", "results ready") are applied by the
//! orchestrator through [`apply_completion`] once the capability returns.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use leadflow_prospect::capabilities::{
    ANALYZE_SOURCE, BUILD_PROFILE, REFINE_PROFILE, SEARCH_PROSPECTS,
};
use leadflow_prospect::profile::build_from_context;
use leadflow_prospect::{
    AggregatedResult, DEFAULT_RESULT_LIMIT, Profile, ProspectFeedback, SearchCriteria,
    SourceAnalysis,
};
use leadflow_store::{Conversation, SourceMaterial, WorkflowState};

use crate::error::{IntentError, Result};
use crate::intent::{Intent, IntentCategory};
use crate::oracle::{ClassificationOracle, ContextSnapshot};

/// Intents below this confidence get a clarification turn.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.55;

/// Default bound on one oracle call.
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Substitutes used when a profile is requested before the facts are known.
const PROFILE_DEFAULTS: &[(&str, &str)] = &[
    ("company_name", "Your company"),
    ("industry", "General business"),
    ("target_roles", "Founder, CEO, Head of Sales"),
];

// ---------------------------------------------------------------------------
// Route targets
// ---------------------------------------------------------------------------

/// The workflow's capability families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    BuildProfile,
    RefineProfile,
    SearchProspects,
    AnalyzeSource,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Self::BuildProfile,
        Self::RefineProfile,
        Self::SearchProspects,
        Self::AnalyzeSource,
    ];

    /// Registry name of the capability.
    pub fn name(self) -> &'static str {
        match self {
            Self::BuildProfile => BUILD_PROFILE,
            Self::RefineProfile => REFINE_PROFILE,
            Self::SearchProspects => SEARCH_PROSPECTS,
            Self::AnalyzeSource => ANALYZE_SOURCE,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Replies that need no capability and do not advance the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeFormKind {
    Greeting,
    Question,
    MemoryQuery,
    Clarification,
    Acknowledge,
    ResourceNoted,
}

/// State changes handled by the orchestrator without dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalAction {
    StartOver,
    GoBack,
    Skip,
    RecordContext,
}

/// Where a message is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RouteTarget {
    Capability(Capability),
    FreeForm(FreeFormKind),
    Local(LocalAction),
}

impl RouteTarget {
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Self::Capability(c) => Some(*c),
            _ => None,
        }
    }
}

/// Outcome of routing one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub target: RouteTarget,
    /// Parameters for the capability; `null` for other targets.
    pub params: Value,
    /// State the conversation enters once the decision is applied.
    pub next_state: WorkflowState,
    /// Inputs substituted with defaults, in the order filled.
    pub auto_filled: Vec<String>,
    /// User-visible note about substitutions.
    pub notice: Option<String>,
    pub intent: Intent,
}

impl RouteDecision {
    fn free_form(kind: FreeFormKind, state: WorkflowState, intent: Intent) -> Self {
        Self {
            target: RouteTarget::FreeForm(kind),
            params: Value::Null,
            next_state: state,
            auto_filled: Vec::new(),
            notice: None,
            intent,
        }
    }

    fn local(action: LocalAction, next_state: WorkflowState, intent: Intent) -> Self {
        Self {
            target: RouteTarget::Local(action),
            params: Value::Null,
            next_state,
            auto_filled: Vec::new(),
            notice: None,
            intent,
        }
    }

    fn dispatch(
        capability: Capability,
        params: Value,
        next_state: WorkflowState,
        auto_filled: Vec<String>,
        intent: Intent,
    ) -> Self {
        let notice = (!auto_filled.is_empty()).then(|| {
            format!(
                "I filled in defaults for {}. Tell me the real values any time and I'll update the profile.",
                auto_filled.join(", ")
            )
        });
        Self {
            target: RouteTarget::Capability(capability),
            params,
            next_state,
            auto_filled,
            notice,
            intent,
        }
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// Interprets messages against the conversation's workflow state.
#[derive(Clone)]
pub struct WorkflowMachine {
    oracle: Arc<dyn ClassificationOracle>,
    classify_timeout: Duration,
    confidence_threshold: f64,
    result_limit: usize,
}

impl WorkflowMachine {
    pub fn new(oracle: Arc<dyn ClassificationOracle>) -> Self {
        Self {
            oracle,
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            result_limit: DEFAULT_RESULT_LIMIT,
        }
    }

    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = timeout;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_result_limit(mut self, limit: usize) -> Self {
        self.result_limit = limit;
        self
    }

    /// Classify `message` and decide where it goes.
    ///
    /// Records `attachments` on the conversation and, unless the intent is
    /// below the confidence threshold, merges the validated extracted
    /// business facts into its context.  The state itself is not changed;
    /// see [`enter`].
    pub async fn route(
        &self,
        conversation: &mut Conversation,
        message: &str,
        attachments: &[SourceMaterial],
    ) -> RouteDecision {
        for material in attachments {
            conversation.add_source_material(material.clone());
        }

        let snapshot = ContextSnapshot::of(conversation);
        let intent = self.classify(message, &snapshot).await;
        let state = conversation.state;

        if intent.confidence < self.confidence_threshold {
            tracing::info!(
                conversation_id = %conversation.id,
                category = %intent.category,
                confidence = intent.confidence,
                "low-confidence intent, asking for clarification"
            );
            return RouteDecision::free_form(FreeFormKind::Clarification, state, intent);
        }

        let merged = conversation.merge_facts(intent.business_facts());
        if let Some(url) = intent.field("resource_url") {
            conversation.add_source_material(SourceMaterial::new("link", url));
        }

        let decision = self
            .navigation(conversation, &intent)
            .or_else(|| self.explicit_request(conversation, &intent))
            .or_else(|| self.state_default(conversation, message, &intent))
            .unwrap_or_else(|| Self::fallback(state, intent.clone()));

        tracing::info!(
            conversation_id = %conversation.id,
            from = %state,
            to = %decision.next_state,
            category = %decision.intent.category,
            route = ?decision.target,
            facts_merged = merged,
            "message routed"
        );
        decision
    }

    async fn classify(&self, message: &str, snapshot: &ContextSnapshot) -> Intent {
        match tokio::time::timeout(self.classify_timeout, self.oracle.classify(message, snapshot))
            .await
        {
            Ok(Ok(intent)) => intent.validated(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "classification failed");
                Intent::unclear()
            }
            Err(_) => {
                let e = IntentError::ClassificationTimeout {
                    timeout_ms: self.classify_timeout.as_millis() as u64,
                };
                tracing::warn!(error = %e, "classification timed out");
                Intent::unclear()
            }
        }
    }

    // -- Rule 1: navigation --------------------------------------------------

    fn navigation(&self, conversation: &Conversation, intent: &Intent) -> Option<RouteDecision> {
        if intent.category != IntentCategory::NavigateWorkflow {
            return None;
        }
        let state = conversation.state;
        let intent = intent.clone();

        let decision = match intent.field("direction").unwrap_or_default() {
            "start_over" => {
                RouteDecision::local(LocalAction::StartOver, WorkflowState::Greeting, intent)
            }
            "back" => RouteDecision::local(LocalAction::GoBack, state.predecessor(), intent),
            "skip" => {
                let successor = state.successor();
                match successor {
                    WorkflowState::ProfileCreation => self.build_profile(conversation, intent),
                    WorkflowState::ProfileRefinement if !conversation.has_profile() => {
                        self.build_profile(conversation, intent)
                    }
                    WorkflowState::CandidateSearch => self.search(conversation, None, intent),
                    WorkflowState::CandidateReview if !conversation.has_candidates() => {
                        self.search(conversation, None, intent)
                    }
                    _ => RouteDecision::local(LocalAction::Skip, successor, intent),
                }
            }
            _ => RouteDecision::free_form(FreeFormKind::Clarification, state, intent),
        };
        Some(decision)
    }

    // -- Rule 2: explicit capability requests --------------------------------

    fn explicit_request(
        &self,
        conversation: &Conversation,
        intent: &Intent,
    ) -> Option<RouteDecision> {
        match intent.category {
            IntentCategory::RequestProfileCreation => {
                Some(self.build_profile(conversation, intent.clone()))
            }
            IntentCategory::FindProspects => Some(self.search(conversation, None, intent.clone())),
            IntentCategory::AnalyzeResource => analyze_sources(conversation, intent.clone()),
            _ => None,
        }
    }

    // -- Rule 3: state defaults ----------------------------------------------

    fn state_default(
        &self,
        conversation: &Conversation,
        message: &str,
        intent: &Intent,
    ) -> Option<RouteDecision> {
        use IntentCategory as I;
        use WorkflowState as S;

        let intent = intent.clone();
        let decision = match (conversation.state, intent.category) {
            (S::Greeting | S::BusinessContextGathering, I::ProvideBusinessInfo) => {
                RouteDecision::local(
                    LocalAction::RecordContext,
                    S::BusinessContextGathering,
                    intent,
                )
            }
            (S::BusinessContextGathering, I::Approve) => self.build_profile(conversation, intent),
            (S::ProfileCreation, I::Approve | I::ProvideBusinessInfo | I::ProvideFeedback) => {
                self.build_profile(conversation, intent)
            }
            (S::ProfileRefinement, I::Approve) => self.search(conversation, None, intent),
            (S::ProfileRefinement, I::ProvideFeedback) => match &conversation.profile {
                Some(profile) => RouteDecision::dispatch(
                    Capability::RefineProfile,
                    json!({ "profile": profile, "feedback": message }),
                    S::ProfileRefinement,
                    Vec::new(),
                    intent,
                ),
                None => self.build_profile(conversation, intent),
            },
            (S::CandidateSearch, I::Approve) => self.search(conversation, None, intent),
            (S::CandidateSearch | S::CandidateReview, I::ProvideFeedback) => {
                self.search(conversation, Some(message), intent)
            }
            (_, I::ProvideBusinessInfo) => {
                RouteDecision::local(LocalAction::RecordContext, conversation.state, intent)
            }
            _ => return None,
        };
        Some(decision)
    }

    // -- Rule 4: free-form ---------------------------------------------------

    fn fallback(state: WorkflowState, intent: Intent) -> RouteDecision {
        let kind = match intent.category {
            IntentCategory::CasualGreeting => FreeFormKind::Greeting,
            IntentCategory::AskQuestion => FreeFormKind::Question,
            IntentCategory::MemoryQuery => FreeFormKind::MemoryQuery,
            IntentCategory::AnalyzeResource => FreeFormKind::ResourceNoted,
            IntentCategory::Unclear => FreeFormKind::Clarification,
            _ => FreeFormKind::Acknowledge,
        };
        RouteDecision::free_form(kind, state, intent)
    }

    // -- Parameter derivation ------------------------------------------------

    /// `build_profile` with whatever facts exist; missing required facts are
    /// substituted and listed.
    fn build_profile(&self, conversation: &Conversation, intent: Intent) -> RouteDecision {
        let (context, auto_filled) = with_profile_defaults(&conversation.business_context);
        if !auto_filled.is_empty() {
            tracing::info!(
                conversation_id = %conversation.id,
                auto_filled = ?auto_filled,
                "building profile from incomplete context"
            );
        }
        let params = json!({
            "business_context": context,
            "source_materials": conversation.source_materials,
        });
        RouteDecision::dispatch(
            Capability::BuildProfile,
            params,
            WorkflowState::ProfileCreation,
            auto_filled,
            intent,
        )
    }

    /// `search_prospects` against the active profile, or criteria derived
    /// from the business context when no profile exists yet.
    fn search(
        &self,
        conversation: &Conversation,
        feedback: Option<&str>,
        intent: Intent,
    ) -> RouteDecision {
        let mut auto_filled = Vec::new();
        let mut params = match &conversation.profile {
            Some(profile) => json!({ "profile": profile }),
            None => {
                auto_filled.push("profile".to_string());
                let derived = build_from_context(&conversation.business_context, None);
                json!({ "criteria": SearchCriteria::from_profile(&derived) })
            }
        };
        params["limit"] = json!(self.result_limit);
        if let Some(feedback) = feedback {
            params["feedback"] = json!(feedback);
            let review = ProspectFeedback::from_review(feedback, &conversation.candidates);
            if !review.liked.is_empty() {
                params["liked"] = json!(review.liked);
            }
            if !review.disliked.is_empty() {
                params["disliked"] = json!(review.disliked);
            }
        }
        RouteDecision::dispatch(
            Capability::SearchProspects,
            params,
            WorkflowState::CandidateSearch,
            auto_filled,
            intent,
        )
    }
}

/// `analyze_source` over the conversation's web links; `None` when there
/// are none, so the resource is only acknowledged.
fn analyze_sources(conversation: &Conversation, intent: Intent) -> Option<RouteDecision> {
    let links: Vec<&SourceMaterial> = conversation
        .source_materials
        .iter()
        .filter(|m| m.url.starts_with("http://") || m.url.starts_with("https://"))
        .collect();
    if links.is_empty() {
        return None;
    }
    Some(RouteDecision::dispatch(
        Capability::AnalyzeSource,
        json!({ "sources": links }),
        conversation.state,
        Vec::new(),
        intent,
    ))
}

/// Business context with required profile inputs filled in.
///
/// A missing industry is taken from `target_market` before falling back to
/// the generic default.
pub fn with_profile_defaults(
    context: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let mut filled = context.clone();
    let mut auto_filled = Vec::new();
    for (key, default) in PROFILE_DEFAULTS {
        if filled.get(*key).is_some_and(|v| !v.trim().is_empty()) {
            continue;
        }
        let value = match (*key, context.get("target_market")) {
            ("industry", Some(market)) if !market.trim().is_empty() => market.clone(),
            _ => (*default).to_string(),
        };
        filled.insert((*key).to_string(), value);
        auto_filled.push((*key).to_string());
    }
    (filled, auto_filled)
}

// ---------------------------------------------------------------------------
// Applying decisions and completions
// ---------------------------------------------------------------------------

/// Move the conversation into the decision's state.
pub fn enter(conversation: &mut Conversation, decision: &RouteDecision) {
    match decision.target {
        RouteTarget::Local(LocalAction::StartOver) => conversation.reset(),
        _ => conversation.advance_to(decision.next_state),
    }
}

/// What a successful capability call changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Completion {
    ProfileBuilt {
        profile_id: String,
    },
    ProfileRefined {
        version: u32,
    },
    CandidatesReady {
        kept: usize,
        total_found: usize,
        failed_providers: Vec<String>,
        degraded: bool,
    },
    SourcesAnalyzed {
        analyzed: usize,
        /// Context keys filled from the analysis.
        facts: Vec<String>,
    },
}

/// Apply the completion event of `capability` to the conversation.
///
/// A degraded search (no source succeeded) leaves the conversation in
/// `CandidateSearch`.  Source analysis only fills context keys the user has
/// not set, and moves a conversation still in `Greeting` on to gathering.
pub fn apply_completion(
    conversation: &mut Conversation,
    capability: Capability,
    result: Value,
) -> Result<Completion> {
    match capability {
        Capability::BuildProfile | Capability::RefineProfile => {
            let profile: Profile = result
                .get("profile")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| IntentError::Internal(format!("{capability} returned no profile")))?;
            let completion = if capability == Capability::BuildProfile {
                Completion::ProfileBuilt {
                    profile_id: profile.id.clone(),
                }
            } else {
                Completion::ProfileRefined {
                    version: profile.version,
                }
            };
            conversation.profile = Some(profile);
            conversation.advance_to(WorkflowState::ProfileRefinement);
            Ok(completion)
        }
        Capability::SearchProspects => {
            let outcome: AggregatedResult = serde_json::from_value(result)?;
            let completion = Completion::CandidatesReady {
                kept: outcome.candidates.len(),
                total_found: outcome.total_found,
                failed_providers: outcome
                    .failed_providers()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                degraded: outcome.degraded,
            };
            if !outcome.degraded {
                conversation.candidates = outcome.candidates;
                conversation.advance_to(WorkflowState::CandidateReview);
            }
            Ok(completion)
        }
        Capability::AnalyzeSource => {
            let analysis: SourceAnalysis = serde_json::from_value(result)?;
            let fresh: Vec<(String, String)> = analysis
                .facts
                .into_iter()
                .filter(|(key, _)| {
                    conversation
                        .business_context
                        .get(key)
                        .is_none_or(|v| v.trim().is_empty())
                })
                .collect();
            let facts: Vec<String> = fresh.iter().map(|(key, _)| key.clone()).collect();
            conversation.merge_facts(fresh);
            if !facts.is_empty() && conversation.state == WorkflowState::Greeting {
                conversation.advance_to(WorkflowState::BusinessContextGathering);
            }
            Ok(Completion::SourcesAnalyzed {
                analyzed: analysis.findings.len(),
                facts,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
