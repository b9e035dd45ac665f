//! Turn handling.
//!
//! The [`Orchestrator`] owns the per-conversation path from an incoming
//! message to a persisted conversation and a reply:
//!
//! ```text
//! lock(conversation) -> load -> record turn -> route -> enter state
//!     -> dispatch (sync) -> completion event -> reply -> save -> unlock
//! ```
//!
//! Turns of one conversation are serialized by a per-conversation mutex held
//! for the whole turn, so they complete in request order.  Different
//! conversations proceed in parallel.
//!
//! After every turn, dispatcher tasks that finished longer ago than the
//! retention window are pruned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use leadflow_kernel::{Dispatcher, Event, InvocationRequest, TaskInfo, TaskStatus};
use leadflow_prospect::ExportFormat;
use leadflow_prospect::capabilities::EXPORT_PROFILE;
use leadflow_store::{
    Conversation, ConversationStore, ConversationSummary, DEFAULT_HISTORY_LIMIT, SourceMaterial,
    TurnRole, WorkflowState,
};

use crate::config::{DEFAULT_TASK_RETENTION, EngineConfig};
use crate::error::Result;
use crate::intent::IntentCategory;
use crate::oracle::ClassificationOracle;
use crate::workflow::{
    self, Capability, Completion, FreeFormKind, LocalAction, RouteDecision, RouteTarget,
    WorkflowMachine,
};

/// Extra time granted to `search_prospects` on top of the aggregator's own
/// overall deadline.
const SEARCH_GRACE: Duration = Duration::from_secs(5);

/// Buffer of a streaming turn channel.
const STREAM_BUFFER: usize = 16;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub conversation_id: String,
    pub reply: String,
    /// State after the turn, completion events included.
    pub state: WorkflowState,
    /// State the route decision entered.
    pub entered_state: WorkflowState,
    pub target: RouteTarget,
    pub intent: IntentCategory,
    pub confidence: f64,
    pub auto_filled: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
    /// The capability failed or no source answered.
    pub degraded: bool,
}

/// Progress of a streamed turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnUpdate {
    Classified {
        intent: IntentCategory,
        confidence: f64,
        target: RouteTarget,
        entered_state: WorkflowState,
    },
    Dispatching {
        capability: Capability,
    },
    Completed(TurnResponse),
    Failed {
        reason: String,
    },
}

/// Where a conversation stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStatus {
    pub id: String,
    pub state: WorkflowState,
    pub completed_steps: Vec<WorkflowState>,
    pub business_context: BTreeMap<String, String>,
    pub profile_name: Option<String>,
    pub profile_version: Option<u32>,
    pub candidates: usize,
    pub turns: usize,
    pub source_materials: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationStatus {
    fn from(conv: &Conversation) -> Self {
        Self {
            id: conv.id.clone(),
            state: conv.state,
            completed_steps: conv.completed_steps.clone(),
            business_context: conv.business_context.clone(),
            profile_name: conv.profile.as_ref().map(|p| p.name.clone()),
            profile_version: conv.profile.as_ref().map(|p| p.version),
            candidates: conv.candidates.len(),
            turns: conv.turns.len(),
            source_materials: conv.source_materials.len(),
            updated_at: conv.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Routes messages, dispatches capabilities and persists conversations.
///
/// Cheaply cloneable; clones share locks, store and dispatcher.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    dispatcher: Dispatcher,
    store: Arc<dyn ConversationStore>,
    machine: WorkflowMachine,
    dispatch_timeout: Duration,
    search_timeout: Duration,
    history_limit: usize,
    task_retention: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(
        dispatcher: Dispatcher,
        store: Arc<dyn ConversationStore>,
        machine: WorkflowMachine,
    ) -> Self {
        Self::build(
            dispatcher,
            store,
            machine,
            leadflow_kernel::dispatcher::DEFAULT_DISPATCH_TIMEOUT,
            leadflow_prospect::aggregator::DEFAULT_OVERALL_TIMEOUT + SEARCH_GRACE,
            DEFAULT_HISTORY_LIMIT,
            DEFAULT_TASK_RETENTION,
        )
    }

    /// Orchestrator with every knob taken from `config`.
    pub fn from_config(
        dispatcher: Dispatcher,
        store: Arc<dyn ConversationStore>,
        oracle: Arc<dyn ClassificationOracle>,
        config: &EngineConfig,
    ) -> Self {
        let machine = WorkflowMachine::new(oracle)
            .with_classify_timeout(config.classify_timeout())
            .with_confidence_threshold(config.engine.confidence_threshold)
            .with_result_limit(config.search.result_limit);
        Self::build(
            dispatcher,
            store,
            machine,
            config.dispatch_timeout(),
            config.aggregator().overall_timeout + SEARCH_GRACE,
            config.engine.history_limit,
            config.task_retention(),
        )
    }

    fn build(
        dispatcher: Dispatcher,
        store: Arc<dyn ConversationStore>,
        machine: WorkflowMachine,
        dispatch_timeout: Duration,
        search_timeout: Duration,
        history_limit: usize,
        task_retention: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                dispatcher,
                store,
                machine,
                dispatch_timeout,
                search_timeout,
                history_limit,
                task_retention,
                locks: DashMap::new(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Handle one message and return the reply.
    ///
    /// Store failures are returned as errors; everything else (low
    /// confidence, missing providers, failed capabilities) produces a reply.
    pub async fn handle_message(
        &self,
        conversation_id: &str,
        message: &str,
        attachments: &[SourceMaterial],
    ) -> Result<TurnResponse> {
        self.run_turn(conversation_id, message, attachments, None)
            .await
    }

    /// Handle one message in the background, reporting progress.
    ///
    /// The channel closes after `Completed` or `Failed`.  Dropping the
    /// receiver does not abort the turn.
    pub fn handle_message_stream(
        &self,
        conversation_id: impl Into<String>,
        message: impl Into<String>,
        attachments: Vec<SourceMaterial>,
    ) -> mpsc::Receiver<TurnUpdate> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let orchestrator = self.clone();
        let conversation_id = conversation_id.into();
        let message = message.into();

        tokio::spawn(async move {
            let outcome = orchestrator
                .run_turn(&conversation_id, &message, &attachments, Some(&tx))
                .await;
            let last = match outcome {
                Ok(response) => TurnUpdate::Completed(response),
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "streamed turn failed");
                    TurnUpdate::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            let _ = tx.send(last).await;
        });

        rx
    }

    /// Status summary of a stored conversation.
    pub async fn status(&self, conversation_id: &str) -> Result<Option<ConversationStatus>> {
        Ok(self
            .inner
            .store
            .load(conversation_id)
            .await?
            .as_ref()
            .map(ConversationStatus::from))
    }

    /// Export the conversation's active profile through `export_profile`.
    ///
    /// `None` when the conversation is unknown or has no profile yet.
    pub async fn export_profile(
        &self,
        conversation_id: &str,
        format: ExportFormat,
    ) -> Result<Option<Value>> {
        let Some(profile) = self
            .inner
            .store
            .load(conversation_id)
            .await?
            .and_then(|conv| conv.profile)
        else {
            return Ok(None);
        };
        let request = InvocationRequest::new(
            EXPORT_PROFILE,
            json!({ "profile": profile, "format": format.as_str() }),
        )
        .with_timeout(self.inner.dispatch_timeout);
        let exported = self.inner.dispatcher.execute(request).await?.into_result()?;
        Ok(Some(exported))
    }

    /// Stored conversations, most recently updated first.
    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.inner.store.list().await?)
    }

    // -- Turn ----------------------------------------------------------------

    fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        message: &str,
        attachments: &[SourceMaterial],
        progress: Option<&mpsc::Sender<TurnUpdate>>,
    ) -> Result<TurnResponse> {
        let lock = self.lock_for(conversation_id);
        let _turn = lock.lock().await;
        let limit = self.inner.history_limit;

        let mut conversation = match self.inner.store.load(conversation_id).await? {
            Some(conv) => conv,
            None => {
                info!(conversation_id, "starting new conversation");
                Conversation::new(conversation_id)
            }
        };
        conversation.push_turn(TurnRole::User, message, limit);
        let started_in = conversation.state;

        let decision = self
            .inner
            .machine
            .route(&mut conversation, message, attachments)
            .await;
        workflow::enter(&mut conversation, &decision);
        let entered_state = conversation.state;

        notify(
            progress,
            TurnUpdate::Classified {
                intent: decision.intent.category,
                confidence: decision.intent.confidence,
                target: decision.target,
                entered_state,
            },
        )
        .await;

        let mut outcome = DispatchOutcome::default();
        if let RouteTarget::Capability(capability) = decision.target {
            notify(progress, TurnUpdate::Dispatching { capability }).await;
            outcome = self
                .dispatch(&mut conversation, capability, decision.params.clone())
                .await;
        }

        let reply = compose_reply(&conversation, &decision, &outcome);
        conversation.push_turn(TurnRole::Assistant, reply.clone(), limit);
        self.inner.store.save(&conversation).await?;

        if conversation.state != started_in {
            self.inner.dispatcher.bus().publish(Event::WorkflowTransition {
                conversation_id: conversation.id.clone(),
                from: started_in.as_str().to_string(),
                to: conversation.state.as_str().to_string(),
                timestamp: Utc::now(),
            });
        }

        let pruned = self
            .inner
            .dispatcher
            .prune_finished(self.inner.task_retention);
        if pruned > 0 {
            debug!(pruned, "finished tasks pruned");
        }

        info!(
            conversation_id,
            state = %conversation.state,
            degraded = outcome.degraded,
            "turn complete"
        );

        Ok(TurnResponse {
            conversation_id: conversation.id,
            reply,
            state: conversation.state,
            entered_state,
            target: decision.target,
            intent: decision.intent.category,
            confidence: decision.intent.confidence,
            auto_filled: decision.auto_filled,
            task: outcome.task,
            completion: outcome.completion,
            degraded: outcome.degraded,
        })
    }

    async fn dispatch(
        &self,
        conversation: &mut Conversation,
        capability: Capability,
        params: Value,
    ) -> DispatchOutcome {
        let timeout = match capability {
            Capability::SearchProspects => self.inner.search_timeout,
            _ => self.inner.dispatch_timeout,
        };
        let request = InvocationRequest::new(capability.name(), params).with_timeout(timeout);

        let task = match self.inner.dispatcher.execute(request).await {
            Ok(task) => task,
            Err(e) => {
                warn!(capability = %capability, error = %e, "capability rejected before dispatch");
                return DispatchOutcome::failed(None, e.to_string());
            }
        };

        if task.status != TaskStatus::Completed {
            let reason = task
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| format!("task ended as {:?}", task.status));
            warn!(capability = %capability, task_id = %task.task_id, reason = %reason, "capability failed");
            return DispatchOutcome::failed(Some(task), reason);
        }

        let result = task.result.clone().unwrap_or(Value::Null);
        match workflow::apply_completion(conversation, capability, result) {
            Ok(completion) => {
                debug!(capability = %capability, ?completion, "completion applied");
                let degraded =
                    matches!(completion, Completion::CandidatesReady { degraded: true, .. });
                DispatchOutcome {
                    task: Some(task),
                    completion: Some(completion),
                    degraded,
                    failure: None,
                }
            }
            Err(e) => {
                warn!(capability = %capability, error = %e, "capability returned an unusable result");
                DispatchOutcome::failed(Some(task), e.to_string())
            }
        }
    }
}

async fn notify(progress: Option<&mpsc::Sender<TurnUpdate>>, update: TurnUpdate) {
    if let Some(tx) = progress
        && tx.send(update).await.is_err()
    {
        debug!("turn stream receiver dropped");
    }
}

#[derive(Debug, Default)]
struct DispatchOutcome {
    task: Option<TaskInfo>,
    completion: Option<Completion>,
    degraded: bool,
    failure: Option<String>,
}

impl DispatchOutcome {
    fn failed(task: Option<TaskInfo>, reason: String) -> Self {
        Self {
            task,
            completion: None,
            degraded: true,
            failure: Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

fn compose_reply(
    conversation: &Conversation,
    decision: &RouteDecision,
    outcome: &DispatchOutcome,
) -> String {
    let mut reply = match decision.target {
        RouteTarget::FreeForm(kind) => free_form_reply(conversation, kind),
        RouteTarget::Local(action) => local_reply(conversation, action, decision),
        RouteTarget::Capability(capability) => capability_reply(conversation, capability, outcome),
    };
    if let Some(notice) = &decision.notice {
        reply.push_str("\n\n");
        reply.push_str(notice);
    }
    reply
}

fn free_form_reply(conversation: &Conversation, kind: FreeFormKind) -> String {
    match kind {
        FreeFormKind::Greeting => "Hi! I help you find prospects. Tell me about your business: \
             what you sell and who buys it."
            .to_string(),
        FreeFormKind::Question => "I collect facts about your business, build an ideal customer \
             profile, then search several data sources for matching prospects and rank them. \
             Say \"go back\", \"start over\" or \"skip\" at any point."
            .to_string(),
        FreeFormKind::MemoryQuery => {
            if conversation.business_context.is_empty() {
                "We haven't covered any business details yet.".to_string()
            } else {
                let facts: Vec<String> = conversation
                    .business_context
                    .iter()
                    .map(|(k, v)| format!("{}: {v}", k.replace('_', " ")))
                    .collect();
                format!("So far I know: {}.", facts.join("; "))
            }
        }
        FreeFormKind::Clarification => "I'm not sure what you mean. Could you rephrase? You can \
             tell me about your business, ask for a profile, or ask me to find prospects."
            .to_string(),
        FreeFormKind::Acknowledge => format!(
            "Noted. We're at the {} step.",
            conversation.state.as_str().replace('_', " ")
        ),
        FreeFormKind::ResourceNoted => format!(
            "Thanks, I've saved that. This conversation has {} resource(s) on file.",
            conversation.source_materials.len()
        ),
    }
}

fn local_reply(
    conversation: &Conversation,
    action: LocalAction,
    decision: &RouteDecision,
) -> String {
    let step = conversation.state.as_str().replace('_', " ");
    match action {
        LocalAction::StartOver => "Starting over. Tell me about your business.".to_string(),
        LocalAction::GoBack => format!("Going back to the {step} step."),
        LocalAction::Skip => format!("Skipping ahead to the {step} step."),
        LocalAction::RecordContext => {
            let keys: Vec<String> = decision
                .intent
                .business_facts()
                .map(|(k, _)| k.replace('_', " "))
                .collect();
            if keys.is_empty() {
                "Thanks. What else should I know about your business?".to_string()
            } else {
                format!(
                    "Thanks, noted your {}. Tell me more, or say \"create a profile\" when you're ready.",
                    keys.join(", ")
                )
            }
        }
    }
}

fn capability_reply(
    conversation: &Conversation,
    capability: Capability,
    outcome: &DispatchOutcome,
) -> String {
    let step = conversation.state.as_str().replace('_', " ");
    if let Some(reason) = &outcome.failure {
        return format!(
            "I couldn't complete {capability} right now ({reason}). We're still at the {step} \
             step; try again in a moment."
        );
    }

    match &outcome.completion {
        Some(Completion::ProfileBuilt { .. } | Completion::ProfileRefined { .. }) => {
            let Some(profile) = &conversation.profile else {
                return "The profile is ready.".to_string();
            };
            let list = |items: &[String]| {
                if items.is_empty() {
                    "any".to_string()
                } else {
                    items.join(", ")
                }
            };
            let verb = if profile.version > 1 { "Updated" } else { "Built" };
            format!(
                "{verb} profile \"{}\" (version {}): industries {}; roles {}; regions {}. \
                 Want to change anything, or shall I find prospects?",
                profile.name,
                profile.version,
                list(&profile.industries),
                list(&profile.target_roles),
                list(&profile.regions),
            )
        }
        Some(Completion::CandidatesReady {
            kept,
            total_found,
            failed_providers,
            degraded,
        }) => {
            if *degraded {
                return "None of the data sources answered, so I have no prospects yet. \
                        Say \"find prospects\" to try again."
                    .to_string();
            }
            let top: Vec<String> = conversation
                .candidates
                .iter()
                .take(3)
                .map(|c| {
                    format!(
                        "{} ({}, {}) {:.0}%",
                        c.candidate.name,
                        c.candidate.title,
                        c.candidate.company.name,
                        c.total_score * 100.0
                    )
                })
                .collect();
            let mut reply = format!("Found {total_found} prospects, showing the top {kept}.");
            if !top.is_empty() {
                reply.push_str(&format!(" Best matches: {}.", top.join("; ")));
            }
            if !failed_providers.is_empty() {
                reply.push_str(&format!(
                    " Some sources did not respond: {}.",
                    failed_providers.join(", ")
                ));
            }
            reply
        }
        Some(Completion::SourcesAnalyzed { analyzed, facts }) => {
            if facts.is_empty() {
                format!(
                    "I looked at {analyzed} link(s) but found nothing new about your market. \
                     Tell me more about who you sell to."
                )
            } else {
                let learned: Vec<String> = facts
                    .iter()
                    .filter_map(|key| {
                        conversation
                            .business_context
                            .get(key)
                            .map(|value| format!("{} {value}", key.replace('_', " ")))
                    })
                    .collect();
                format!(
                    "From {analyzed} link(s) I noted {}. Correct me if that's off, or ask me to \
                     build the profile.",
                    learned.join("; ")
                )
            }
        }
        None => format!("Done with {capability}."),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
