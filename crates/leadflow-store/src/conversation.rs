//! Conversation state persisted between turns.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use leadflow_prospect::{Profile, ScoredCandidate};

/// Number of turns kept per conversation unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

/// Position of a conversation in the lead-generation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Greeting,
    BusinessContextGathering,
    ProfileCreation,
    ProfileRefinement,
    CandidateSearch,
    CandidateReview,
}

impl WorkflowState {
    /// All states in workflow order.
    pub const ORDER: [WorkflowState; 6] = [
        Self::Greeting,
        Self::BusinessContextGathering,
        Self::ProfileCreation,
        Self::ProfileRefinement,
        Self::CandidateSearch,
        Self::CandidateReview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::BusinessContextGathering => "business_context_gathering",
            Self::ProfileCreation => "profile_creation",
            Self::ProfileRefinement => "profile_refinement",
            Self::CandidateSearch => "candidate_search",
            Self::CandidateReview => "candidate_review",
        }
    }

    /// Canonical predecessor; `Greeting` is its own.
    pub fn predecessor(self) -> Self {
        let at = self.position();
        Self::ORDER[at.saturating_sub(1)]
    }

    /// Canonical successor; `CandidateReview` is its own.
    pub fn successor(self) -> Self {
        let at = self.position();
        Self::ORDER[(at + 1).min(Self::ORDER.len() - 1)]
    }

    fn position(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).unwrap_or(0)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Turns and attachments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message in the bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// State the conversation was in when the turn was recorded.
    pub state: WorkflowState,
    pub at: DateTime<Utc>,
}

/// A link or document the user shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMaterial {
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    pub added_at: DateTime<Utc>,
}

impl SourceMaterial {
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
            description: String::new(),
            added_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Everything the engine remembers about one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub state: WorkflowState,
    /// Business facts gathered so far, keyed by field name.
    #[serde(default)]
    pub business_context: BTreeMap<String, String>,
    /// Most recent turns, oldest first.
    #[serde(default)]
    pub turns: VecDeque<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub candidates: Vec<ScoredCandidate>,
    #[serde(default)]
    pub source_materials: Vec<SourceMaterial>,
    /// States the conversation has moved past, in the order left.
    #[serde(default)]
    pub completed_steps: Vec<WorkflowState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: WorkflowState::Greeting,
            business_context: BTreeMap::new(),
            turns: VecDeque::new(),
            profile: None,
            candidates: Vec::new(),
            source_materials: Vec::new(),
            completed_steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fresh, time-ordered conversation id.
    pub fn generate_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Append a turn, evicting the oldest ones beyond `limit`.
    pub fn push_turn(&mut self, role: TurnRole, content: impl Into<String>, limit: usize) {
        self.turns.push_back(Turn {
            role,
            content: content.into(),
            state: self.state,
            at: Utc::now(),
        });
        while self.turns.len() > limit.max(1) {
            self.turns.pop_front();
        }
        self.touch();
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> impl Iterator<Item = &Turn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }

    /// Merge facts into the business context; later values overwrite.
    pub fn merge_facts<I>(&mut self, facts: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut changed = 0;
        for (key, value) in facts {
            if self.business_context.get(&key) != Some(&value) {
                self.business_context.insert(key, value);
                changed += 1;
            }
        }
        if changed > 0 {
            self.touch();
        }
        changed
    }

    pub fn add_source_material(&mut self, material: SourceMaterial) {
        if !self
            .source_materials
            .iter()
            .any(|m| m.url == material.url)
        {
            self.source_materials.push(material);
            self.touch();
        }
    }

    /// Move to `next`, recording the state being left as completed when the
    /// move goes forward.
    pub fn advance_to(&mut self, next: WorkflowState) {
        if next == self.state {
            return;
        }
        if next.position() > self.state.position() && !self.completed_steps.contains(&self.state) {
            self.completed_steps.push(self.state);
        }
        self.state = next;
        self.touch();
    }

    /// Start over: back to `Greeting` with facts, profile, candidates and
    /// progress cleared.  History and source materials are kept.
    pub fn reset(&mut self) {
        self.state = WorkflowState::Greeting;
        self.business_context.clear();
        self.profile = None;
        self.candidates.clear();
        self.completed_steps.clear();
        self.touch();
    }

    pub fn has_profile(&self) -> bool {
        self.profile.is_some()
    }

    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    pub fn is_step_completed(&self, step: WorkflowState) -> bool {
        self.completed_steps.contains(&step)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded_oldest_first() {
        let mut conv = Conversation::new("c");
        for i in 0..25 {
            conv.push_turn(TurnRole::User, format!("m{i}"), DEFAULT_HISTORY_LIMIT);
        }
        assert_eq!(conv.turns.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(conv.turns.front().map(|t| t.content.as_str()), Some("m5"));
        let last: Vec<&str> = conv.recent_turns(2).map(|t| t.content.as_str()).collect();
        assert_eq!(last, vec!["m23", "m24"]);
    }

    #[test]
    fn neighbours_saturate_at_the_ends() {
        assert_eq!(WorkflowState::Greeting.predecessor(), WorkflowState::Greeting);
        assert_eq!(
            WorkflowState::ProfileRefinement.predecessor(),
            WorkflowState::ProfileCreation
        );
        assert_eq!(
            WorkflowState::CandidateReview.successor(),
            WorkflowState::CandidateReview
        );
    }

    #[test]
    fn advancing_records_completed_steps() {
        let mut conv = Conversation::new("c");
        conv.advance_to(WorkflowState::BusinessContextGathering);
        conv.advance_to(WorkflowState::ProfileCreation);
        conv.advance_to(WorkflowState::BusinessContextGathering);
        assert_eq!(
            conv.completed_steps,
            vec![
                WorkflowState::Greeting,
                WorkflowState::BusinessContextGathering
            ]
        );
    }

    #[test]
    fn reset_clears_workflow_data_but_keeps_history() {
        let mut conv = Conversation::new("c");
        conv.merge_facts([("industry".to_string(), "fintech".to_string())]);
        conv.push_turn(TurnRole::User, "hello", 20);
        conv.profile = Some(Profile::new("p"));
        conv.advance_to(WorkflowState::ProfileRefinement);

        conv.reset();
        assert_eq!(conv.state, WorkflowState::Greeting);
        assert!(conv.business_context.is_empty());
        assert!(!conv.has_profile());
        assert_eq!(conv.turns.len(), 1);
    }

    #[test]
    fn merge_facts_counts_changes() {
        let mut conv = Conversation::new("c");
        let facts = || [("industry".to_string(), "saas".to_string())];
        assert_eq!(conv.merge_facts(facts()), 1);
        assert_eq!(conv.merge_facts(facts()), 0);
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&WorkflowState::CandidateReview).unwrap();
        assert_eq!(json, "\"candidate_review\"");
    }
}
