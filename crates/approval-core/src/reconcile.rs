//! Step tree reconciliation.
//!
//! Assigning a new shape to a proposal never rebuilds it from scratch.
//! [`plan_merge`] matches every individual node of the desired shape against
//! the existing tree by responsible party (not by position), keeps the
//! matched step's id, completion and token, builds fresh composites around
//! them, and lists everything from the old tree that no longer has a place.
//! The plan is pure; [`reconcile`] applies it to a proposal and the store
//! persists the resulting row diff in one transaction.

use crate::error::Result;
use crate::event::StepEvent;
use crate::proposal::Proposal;
use crate::shape::StepShape;
use crate::step::{Step, StepId, StepKind};
use crate::tree::StepTree;
use crate::types::{StepStatus, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// The merged tree plus a description of how it differs from the old one.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub tree: StepTree,
    pub outcome: ReconcileOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Individual steps carried over from the old tree.
    pub retained: Vec<StepId>,
    /// Steps that did not exist before (new leaves and all composites).
    pub created: Vec<StepId>,
    /// Old steps with no place in the new tree: unmatched leaves and the
    /// composites that were replaced.
    pub deleted: Vec<StepId>,
    /// Individual steps that are actionable now but were not before.
    pub activated: Vec<StepId>,
    /// `RootCompleted` when the new tree finished the proposal, for example
    /// after dropping the only approver still outstanding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<StepEvent>,
}

impl ReconcileOutcome {
    /// True when the reassignment kept every step and asked nothing new.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.deleted.is_empty()
            && self.activated.is_empty()
            && self.events.is_empty()
    }

    pub fn completed_proposal(&self) -> bool {
        self.events.iter().any(StepEvent::is_root_completed)
    }
}

/// Merge `desired` into `old` without touching either.
pub fn plan_merge(
    old: Option<&StepTree>,
    desired: &StepShape,
    now: DateTime<Utc>,
) -> Result<MergePlan> {
    desired.validate()?;

    let previous: HashMap<&UserId, &Step> = old
        .map(|tree| {
            tree.individual_steps()
                .into_iter()
                .filter_map(|s| s.responsible_party().map(|p| (p, s)))
                .collect()
        })
        .unwrap_or_default();

    let mut builder = Builder {
        previous,
        steps: Vec::new(),
        outcome: ReconcileOutcome::default(),
    };
    builder.build(desired, None);

    let Builder {
        steps, mut outcome, ..
    } = builder;
    let mut tree = StepTree::from_steps(steps)?;
    tree.refresh(now);

    if let Some(old) = old {
        let kept: HashSet<StepId> = outcome.retained.iter().copied().collect();
        outcome.deleted = old
            .steps()
            .into_iter()
            .map(|s| s.id)
            .filter(|id| !kept.contains(id))
            .collect();
    }

    outcome.activated = tree
        .individual_steps()
        .into_iter()
        .filter(|s| s.is_actionable())
        .filter(|s| {
            !old.and_then(|t| t.get(s.id))
                .map(Step::is_actionable)
                .unwrap_or(false)
        })
        .map(|s| s.id)
        .collect();

    Ok(MergePlan { tree, outcome })
}

/// Replace the proposal's tree with `desired`, preserving decisions made by
/// people who remain on it.
pub fn reconcile(proposal: &mut Proposal, desired: &StepShape) -> Result<ReconcileOutcome> {
    let now = Utc::now();
    let plan = plan_merge(proposal.tree(), desired, now)?;
    tracing::info!(
        proposal = %proposal.id,
        retained = plan.outcome.retained.len(),
        created = plan.outcome.created.len(),
        deleted = plan.outcome.deleted.len(),
        activated = plan.outcome.activated.len(),
        "reconciled step tree"
    );
    let MergePlan { tree, mut outcome } = plan;
    outcome.events.extend(proposal.replace_tree(tree, now));
    Ok(outcome)
}

struct Builder<'a> {
    previous: HashMap<&'a UserId, &'a Step>,
    steps: Vec<Step>,
    outcome: ReconcileOutcome,
}

impl Builder<'_> {
    fn build(&mut self, shape: &StepShape, parent: Option<StepId>) -> StepId {
        if let Some((role, user)) = shape.individual() {
            let mut step = Step::new(
                StepKind::Individual {
                    role,
                    responsible_party: user.clone(),
                },
                parent,
            );
            match self.previous.get(user) {
                Some(prev) => {
                    step.id = prev.id;
                    step.status = prev.status;
                    step.completed_at = prev.completed_at;
                    step.api_token = prev.api_token.clone();
                    if step.status != StepStatus::Completed {
                        step.completed_at = None;
                    }
                    self.outcome.retained.push(step.id);
                }
                None => self.outcome.created.push(step.id),
            }
            let id = step.id;
            self.steps.push(step);
            return id;
        }

        let kind = match shape {
            StepShape::Parallel {
                min_children_needed,
                ..
            } => StepKind::Parallel {
                min_children_needed: *min_children_needed,
            },
            _ => StepKind::Serial,
        };
        let step = Step::new(kind, parent);
        let id = step.id;
        let index = self.steps.len();
        self.steps.push(step);
        self.outcome.created.push(id);

        let children: Vec<StepId> = shape
            .children()
            .iter()
            .map(|child| self.build(child, Some(id)))
            .collect();
        self.steps[index].child_steps = children;
        id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApprovalError;
    use crate::token::ApiToken;
    use chrono::Duration;

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn approvals(names: &[&str]) -> Vec<StepShape> {
        names.iter().map(|n| StepShape::approval(user(n))).collect()
    }

    fn leaf<'a>(tree: &'a StepTree, name: &str) -> &'a Step {
        tree.find_party(&user(name)).unwrap()
    }

    fn complete(tree: &mut StepTree, name: &str) {
        let id = leaf(tree, name).id;
        tree.complete_leaf(id, Utc::now()).unwrap();
    }

    #[test]
    fn initial_merge_creates_everything() {
        let plan = plan_merge(None, &StepShape::parallel(approvals(&["a", "b", "c"])), Utc::now())
            .unwrap();
        assert_eq!(plan.tree.len(), 4);
        assert_eq!(plan.outcome.created.len(), 4);
        assert!(plan.outcome.retained.is_empty());
        assert!(plan.outcome.deleted.is_empty());
        assert_eq!(plan.outcome.activated.len(), 3);
    }

    #[test]
    fn preserves_completion_when_approver_moves() {
        let now = Utc::now();
        let mut old = plan_merge(None, &StepShape::serial(approvals(&["a", "b"])), now)
            .unwrap()
            .tree;
        complete(&mut old, "a");
        let completed_at = leaf(&old, "a").completed_at;
        let a_id = leaf(&old, "a").id;

        // a moves into a nested parallel group behind c
        let desired = StepShape::serial(vec![
            StepShape::approval(user("c")),
            StepShape::parallel(approvals(&["b", "a"])),
        ]);
        let plan = plan_merge(Some(&old), &desired, now + Duration::minutes(5)).unwrap();
        let a = leaf(&plan.tree, "a");
        assert_eq!(a.id, a_id);
        assert!(a.is_completed());
        assert_eq!(a.completed_at, completed_at);
        assert_eq!(a.parent, Some(plan.tree.steps()[2].id));

        assert!(leaf(&plan.tree, "c").is_actionable());
        assert!(leaf(&plan.tree, "b").is_pending());
    }

    #[test]
    fn drops_unmatched_leaves_and_old_composites() {
        let now = Utc::now();
        let old = plan_merge(None, &StepShape::parallel(approvals(&["a", "b"])), now)
            .unwrap()
            .tree;
        let a_id = leaf(&old, "a").id;
        let b_id = leaf(&old, "b").id;

        let plan = plan_merge(Some(&old), &StepShape::serial(approvals(&["b"])), now).unwrap();
        assert!(plan.outcome.deleted.contains(&a_id));
        assert!(plan.outcome.deleted.contains(&old.root_id()));
        assert!(!plan.outcome.deleted.contains(&b_id));
        assert_eq!(plan.outcome.retained, [b_id]);
        assert!(!plan.tree.contains(a_id));
    }

    #[test]
    fn completed_tree_stays_completed() {
        let now = Utc::now();
        let shape = StepShape::parallel(approvals(&["a", "b"]));
        let mut old = plan_merge(None, &shape, now).unwrap().tree;
        complete(&mut old, "a");
        complete(&mut old, "b");
        assert!(old.root().is_completed());

        let plan = plan_merge(Some(&old), &shape, now).unwrap();
        assert!(plan.tree.root().is_completed());
        assert!(plan
            .tree
            .steps_with_status(StepStatus::Actionable)
            .is_empty());
        assert!(plan.outcome.activated.is_empty());
    }

    #[test]
    fn replacing_a_leaf_restarts_from_the_new_approver() {
        let now = Utc::now();
        let mut old = plan_merge(None, &StepShape::serial(approvals(&["a", "b"])), now)
            .unwrap()
            .tree;
        complete(&mut old, "a");

        let plan =
            plan_merge(Some(&old), &StepShape::serial(approvals(&["a", "c"])), now).unwrap();
        let tree = &plan.tree;
        assert_eq!(tree.steps_with_status(StepStatus::Completed).len(), 1);
        assert_eq!(tree.steps_with_status(StepStatus::Actionable).len(), 2);
        assert!(leaf(tree, "c").is_actionable());
        assert_eq!(plan.outcome.activated, [leaf(tree, "c").id]);
    }

    #[test]
    fn stale_actionable_status_is_recomputed() {
        let now = Utc::now();
        let old = plan_merge(None, &StepShape::parallel(approvals(&["a", "b"])), now)
            .unwrap()
            .tree;
        assert!(leaf(&old, "b").is_actionable());

        let plan =
            plan_merge(Some(&old), &StepShape::serial(approvals(&["a", "b"])), now).unwrap();
        assert!(leaf(&plan.tree, "a").is_actionable());
        assert!(leaf(&plan.tree, "b").is_pending());
        assert!(plan.outcome.activated.is_empty());
    }

    #[test]
    fn tokens_follow_their_approver() {
        let now = Utc::now();
        let mut old = plan_merge(None, &StepShape::serial(approvals(&["a", "b"])), now)
            .unwrap()
            .tree;
        let b_id = leaf(&old, "b").id;
        let token = ApiToken::issue(now, Duration::hours(2));
        if let Some(step) = old.get_mut(b_id) {
            step.api_token = Some(token.clone());
        }

        let plan =
            plan_merge(Some(&old), &StepShape::parallel(approvals(&["b", "c"])), now).unwrap();
        assert_eq!(leaf(&plan.tree, "b").api_token.as_ref(), Some(&token));
    }

    #[test]
    fn malformed_shape_leaves_old_tree_alone() {
        let now = Utc::now();
        let old = plan_merge(None, &StepShape::serial(approvals(&["a"])), now)
            .unwrap()
            .tree;
        let bad = StepShape::threshold(3, approvals(&["a", "b"]));
        assert!(matches!(
            plan_merge(Some(&old), &bad, now),
            Err(ApprovalError::MalformedThreshold { .. })
        ));
        assert!(leaf(&old, "a").is_actionable());
    }
}
