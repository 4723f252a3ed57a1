use crate::delegation::DelegationResolver;
use crate::error::{ApprovalError, Result};
use crate::event::{StepEvent, StepEventKind};
use crate::reconcile::{self, ReconcileOutcome};
use crate::shape::StepShape;
use crate::step::{Step, StepId};
use crate::token::ApiToken;
use crate::tree::StepTree;
use crate::types::{StepStatus, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ProposalId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProposalId {
    type Err = ApprovalError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ApprovalError::InvalidId(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// A request routed through a tree of approval steps.
///
/// A proposal starts without steps. The first shape assigned builds the
/// tree; later assignments reconcile against it. Its status mirrors the root
/// step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub requester: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "steps", skip_serializing_if = "Option::is_none")]
    tree: Option<StepTree>,
}

impl Proposal {
    pub fn new(requester: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: ProposalId::generate(),
            requester,
            created_at: now,
            updated_at: now,
            completed_at: None,
            tree: None,
        }
    }

    pub(crate) fn from_parts(
        id: ProposalId,
        requester: UserId,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        tree: Option<StepTree>,
    ) -> Self {
        Self {
            id,
            requester,
            created_at,
            updated_at,
            completed_at,
            tree,
        }
    }

    // ---------------------------------------------------------------------------
    // Derived views
    // ---------------------------------------------------------------------------

    pub fn tree(&self) -> Option<&StepTree> {
        self.tree.as_ref()
    }

    pub fn status(&self) -> StepStatus {
        self.root_step()
            .map(|s| s.status)
            .unwrap_or(StepStatus::Pending)
    }

    pub fn is_completed(&self) -> bool {
        self.status() == StepStatus::Completed
    }

    pub fn root_step(&self) -> Option<&Step> {
        self.tree.as_ref().map(StepTree::root)
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.tree.as_ref().and_then(|t| t.get(id))
    }

    /// All steps, root first, in traversal order.
    pub fn steps(&self) -> Vec<&Step> {
        self.tree.as_ref().map(StepTree::steps).unwrap_or_default()
    }

    pub fn step_ids(&self) -> HashSet<StepId> {
        self.tree.as_ref().map(StepTree::ids).unwrap_or_default()
    }

    pub fn individual_steps(&self) -> Vec<&Step> {
        self.tree
            .as_ref()
            .map(StepTree::individual_steps)
            .unwrap_or_default()
    }

    /// People whose approval the tree asks for, in traversal order.
    pub fn approvers(&self) -> Vec<&UserId> {
        self.individual_steps()
            .into_iter()
            .filter(|s| s.is_approval())
            .filter_map(Step::responsible_party)
            .collect()
    }

    pub fn observers(&self) -> Vec<&UserId> {
        self.individual_steps()
            .into_iter()
            .filter(|s| s.is_observer())
            .filter_map(Step::responsible_party)
            .collect()
    }

    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&Step> {
        self.steps()
            .into_iter()
            .filter(|s| s.status == status)
            .collect()
    }

    pub fn actionable_steps(&self) -> Vec<&Step> {
        self.steps_with_status(StepStatus::Actionable)
    }

    // ---------------------------------------------------------------------------
    // Tree assignment
    // ---------------------------------------------------------------------------

    /// Assign a new desired tree. The first call builds it; later calls keep
    /// the decisions of approvers who remain and drop everyone else's.
    pub fn set_root_step(&mut self, desired: &StepShape) -> Result<ReconcileOutcome> {
        reconcile::reconcile(self, desired)
    }

    /// Route through `steps` one after another.
    pub fn add_initial_steps(&mut self, steps: Vec<StepShape>) -> Result<ReconcileOutcome> {
        self.set_root_step(&StepShape::serial(steps))
    }

    /// Install a reconciled tree. A tree that arrives already complete runs
    /// the completion hook and reports it as `RootCompleted`.
    pub(crate) fn replace_tree(
        &mut self,
        tree: StepTree,
        now: DateTime<Utc>,
    ) -> Option<StepEvent> {
        let root = tree.root_id();
        let completed = tree.root().is_completed();
        self.tree = Some(tree);
        self.updated_at = now;
        match (completed, self.completed_at) {
            (true, None) => {
                self.complete(now);
                Some(StepEvent {
                    proposal_id: self.id,
                    step_id: root,
                    kind: StepEventKind::RootCompleted,
                })
            }
            (true, Some(_)) => None,
            (false, _) => {
                self.completed_at = None;
                None
            }
        }
    }

    // ---------------------------------------------------------------------------
    // Completion
    // ---------------------------------------------------------------------------

    /// Complete an actionable individual step on behalf of its party.
    pub fn complete_step(&mut self, step_id: StepId) -> Result<Vec<StepEvent>> {
        let now = Utc::now();
        let tree = self.tree.as_mut().ok_or(ApprovalError::NoSteps)?;
        let changes = tree.complete_leaf(step_id, now)?;
        self.updated_at = now;

        let events: Vec<StepEvent> = changes
            .into_iter()
            .map(|(step_id, kind)| StepEvent {
                proposal_id: self.id,
                step_id,
                kind,
            })
            .collect();

        tracing::info!(proposal = %self.id, step = %step_id, "step completed");
        if events.iter().any(StepEvent::is_root_completed) {
            self.complete(now);
        }
        Ok(events)
    }

    /// Runs once, when the root step completes.
    fn complete(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        tracing::info!(proposal = %self.id, requester = %self.requester, "proposal fully approved");
    }

    // ---------------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------------

    pub fn step_for(&self, user: &UserId) -> Option<&Step> {
        self.tree.as_ref().and_then(|t| t.find_party(user))
    }

    /// The step `user` is responsible for, or failing that the step of the
    /// principal `user` acts for.
    pub fn existing_or_delegated_step_for(
        &self,
        user: &UserId,
        delegations: &dyn DelegationResolver,
    ) -> Option<&Step> {
        self.step_for(user).or_else(|| {
            delegations
                .resolve_delegate(user)
                .and_then(|principal| self.step_for(&principal))
        })
    }

    // ---------------------------------------------------------------------------
    // Tokens
    // ---------------------------------------------------------------------------

    pub fn attach_token(&mut self, step_id: StepId, token: ApiToken) -> Result<()> {
        let step = self
            .tree
            .as_mut()
            .and_then(|t| t.get_mut(step_id))
            .ok_or_else(|| ApprovalError::StepNotFound(step_id.to_string()))?;
        if !step.is_individual() || step.is_completed() {
            return Err(ApprovalError::InvalidTransition {
                step: step_id.to_string(),
                from: step.status.to_string(),
                to: StepStatus::Completed.to_string(),
                reason: "tokens only attach to open individual steps".into(),
            });
        }
        step.api_token = Some(token);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The step a still-usable token belongs to.
    pub fn step_for_token(&self, access_token: &str, now: DateTime<Utc>) -> Option<&Step> {
        if access_token.is_empty() {
            return None;
        }
        self.individual_steps()
            .into_iter()
            .find(|s| s.api_token(now).map(|t| t.access_token.as_str()) == Some(access_token))
    }

    /// Complete the step a token was issued for, consuming the token.
    pub fn complete_with_token(&mut self, access_token: &str) -> Result<Vec<StepEvent>> {
        let now = Utc::now();
        let Some(step_id) = self.step_for_token(access_token, now).map(|s| s.id) else {
            tracing::warn!(proposal = %self.id, "rejected unusable token");
            return Err(ApprovalError::InvalidToken);
        };
        let events = self.complete_step(step_id)?;
        if let Some(token) = self
            .tree
            .as_mut()
            .and_then(|t| t.get_mut(step_id))
            .and_then(|s| s.api_token.as_mut())
        {
            token.mark_used(now);
        }
        Ok(events)
    }

    pub fn completion_events(events: &[StepEvent]) -> usize {
        events
            .iter()
            .filter(|e| e.kind == StepEventKind::RootCompleted)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
