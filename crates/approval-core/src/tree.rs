//! Arena-backed step tree.
//!
//! Nodes live in a flat map keyed by [`StepId`]; composites list their
//! children by id and every node points back at its parent by id. The tree is
//! owned top-down through the root, so there are no shared or cyclic owners.
//!
//! All derived state (composite statuses, the actionable frontier) is
//! recomputed from leaf statuses by [`StepTree::refresh`]. The pass walks the
//! tree top-down, handing each child an `active` flag from its parent, and
//! derives each composite's status bottom-up from what its children became.

use crate::error::{ApprovalError, Result};
use crate::event::StepEventKind;
use crate::step::{Step, StepId, StepKind};
use crate::types::{StepStatus, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<Step>", into = "Vec<Step>")]
pub struct StepTree {
    root: StepId,
    nodes: HashMap<StepId, Step>,
}

impl StepTree {
    /// Assemble a tree from flat rows, checking that the parent/child edges
    /// agree and that every row hangs off the single root.
    pub fn from_steps(steps: Vec<Step>) -> Result<Self> {
        let roots: Vec<StepId> = steps.iter().filter(|s| s.is_root()).map(|s| s.id).collect();
        let root = match roots.as_slice() {
            [root] => *root,
            [] => return Err(ApprovalError::CorruptTree("no root step".into())),
            _ => {
                return Err(ApprovalError::CorruptTree(format!(
                    "{} root steps",
                    roots.len()
                )))
            }
        };

        let total = steps.len();
        let nodes: HashMap<StepId, Step> = steps.into_iter().map(|s| (s.id, s)).collect();
        if nodes.len() != total {
            return Err(ApprovalError::CorruptTree("duplicate step id".into()));
        }

        let tree = Self { root, nodes };
        let mut reached = HashSet::new();
        tree.check_edges(root, &mut reached)?;
        if reached.len() != tree.nodes.len() {
            return Err(ApprovalError::CorruptTree(format!(
                "{} steps unreachable from root",
                tree.nodes.len() - reached.len()
            )));
        }
        Ok(tree)
    }

    fn check_edges(&self, id: StepId, reached: &mut HashSet<StepId>) -> Result<()> {
        if !reached.insert(id) {
            return Err(ApprovalError::CorruptTree(format!("step {id} reached twice")));
        }
        let step = self
            .nodes
            .get(&id)
            .ok_or_else(|| ApprovalError::CorruptTree(format!("missing step {id}")))?;
        if step.is_individual() && !step.child_steps.is_empty() {
            return Err(ApprovalError::CorruptTree(format!(
                "individual step {id} has children"
            )));
        }
        for child in &step.child_steps {
            let child_step = self
                .nodes
                .get(child)
                .ok_or_else(|| ApprovalError::CorruptTree(format!("missing step {child}")))?;
            if child_step.parent != Some(id) {
                return Err(ApprovalError::CorruptTree(format!(
                    "step {child} does not point back at {id}"
                )));
            }
            self.check_edges(*child, reached)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn root_id(&self) -> StepId {
        self.root
    }

    pub fn root(&self) -> &Step {
        &self.nodes[&self.root]
    }

    pub fn get(&self, id: StepId) -> Option<&Step> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: StepId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> HashSet<StepId> {
        self.nodes.keys().copied().collect()
    }

    /// Every step with its depth, root first, children in declared order.
    pub fn walk(&self) -> Vec<(usize, &Step)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(0usize, self.root)];
        while let Some((depth, id)) = stack.pop() {
            let Some(step) = self.nodes.get(&id) else {
                continue;
            };
            out.push((depth, step));
            for child in step.child_steps.iter().rev() {
                stack.push((depth + 1, *child));
            }
        }
        out
    }

    /// Every step in pre-order.
    pub fn steps(&self) -> Vec<&Step> {
        self.walk().into_iter().map(|(_, s)| s).collect()
    }

    pub fn individual_steps(&self) -> Vec<&Step> {
        self.steps().into_iter().filter(|s| s.is_individual()).collect()
    }

    pub fn find_party(&self, user: &UserId) -> Option<&Step> {
        self.steps()
            .into_iter()
            .find(|s| s.responsible_party() == Some(user))
    }

    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&Step> {
        self.steps()
            .into_iter()
            .filter(|s| s.status == status)
            .collect()
    }

    fn gates(&self, id: &StepId) -> bool {
        self.nodes.get(id).map(Step::is_gating).unwrap_or(false)
    }

    /// Completion derived purely from leaf statuses, ignoring the stored
    /// status of composites.
    pub fn is_complete(&self, id: StepId) -> bool {
        let Some(step) = self.nodes.get(&id) else {
            return false;
        };
        match &step.kind {
            StepKind::Individual { .. } => step.is_completed(),
            StepKind::Serial => step
                .child_steps
                .iter()
                .filter(|c| self.gates(c))
                .all(|c| self.is_complete(*c)),
            StepKind::Parallel {
                min_children_needed,
            } => {
                let gating: Vec<&StepId> =
                    step.child_steps.iter().filter(|c| self.gates(c)).collect();
                let needed = min_children_needed.unwrap_or(gating.len());
                let done = gating.iter().filter(|c| self.is_complete(***c)).count();
                done >= needed
            }
        }
    }

    // -----------------------------------------------------------------------
    // Recompute
    // -----------------------------------------------------------------------

    /// Re-derive every status in the tree. Returns the composites that became
    /// completed during this pass, innermost first.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Vec<StepId> {
        let mut completed = Vec::new();
        self.refresh_node(self.root, true, now, &mut completed);
        tracing::debug!(
            steps = self.nodes.len(),
            newly_completed = completed.len(),
            "refreshed step tree"
        );
        completed
    }

    fn refresh_node(
        &mut self,
        id: StepId,
        active: bool,
        now: DateTime<Utc>,
        completed: &mut Vec<StepId>,
    ) -> StepStatus {
        let Some(step) = self.nodes.get(&id) else {
            return StepStatus::Pending;
        };
        let kind = step.kind.clone();
        let children = step.child_steps.clone();

        let status = match kind {
            StepKind::Individual { .. } => {
                if step.is_completed() {
                    StepStatus::Completed
                } else if active {
                    StepStatus::Actionable
                } else {
                    StepStatus::Pending
                }
            }
            StepKind::Serial => {
                let done = self.is_complete(id);
                // Frontier: everything up to and including the first
                // unfinished gating child.
                let mut open = active && !done;
                let mut any_actionable = false;
                for child in &children {
                    let child_status = self.refresh_node(*child, open, now, completed);
                    any_actionable |= child_status == StepStatus::Actionable;
                    if self.gates(child) && child_status != StepStatus::Completed {
                        open = false;
                    }
                }
                derive(done, any_actionable)
            }
            StepKind::Parallel { .. } => {
                let done = self.is_complete(id);
                // Once the threshold is met nothing else is asked of the
                // remaining children.
                let open = active && !done;
                let mut any_actionable = false;
                for child in &children {
                    any_actionable |=
                        self.refresh_node(*child, open, now, completed) == StepStatus::Actionable;
                }
                derive(done, any_actionable)
            }
        };

        if let Some(step) = self.nodes.get_mut(&id) {
            let was_completed = step.is_completed();
            step.set_status(status, now);
            if !was_completed && step.is_completed() && !step.is_individual() {
                completed.push(id);
            }
        }
        status
    }

    /// Complete an actionable individual step and propagate the change.
    ///
    /// Returns what changed in order: the leaf, any composites that completed
    /// because of it, and finally the root if the whole tree is now done.
    pub fn complete_leaf(
        &mut self,
        id: StepId,
        now: DateTime<Utc>,
    ) -> Result<Vec<(StepId, StepEventKind)>> {
        let root_was_complete = self.root().is_completed();
        let step = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ApprovalError::StepNotFound(id.to_string()))?;

        if !step.is_individual() {
            return Err(ApprovalError::InvalidTransition {
                step: id.to_string(),
                from: step.status.to_string(),
                to: StepStatus::Completed.to_string(),
                reason: format!(
                    "{} steps complete only through their children",
                    step.kind.as_str()
                ),
            });
        }
        if step.is_observer() {
            return Err(ApprovalError::InvalidTransition {
                step: id.to_string(),
                from: step.status.to_string(),
                to: StepStatus::Completed.to_string(),
                reason: "observers do not approve".into(),
            });
        }
        if !step.is_actionable() {
            return Err(ApprovalError::InvalidTransition {
                step: id.to_string(),
                from: step.status.to_string(),
                to: StepStatus::Completed.to_string(),
                reason: "step is not actionable".into(),
            });
        }
        step.set_status(StepStatus::Completed, now);

        let mut events = vec![(id, StepEventKind::LeafCompleted)];
        for branch in self.refresh(now) {
            if branch != self.root {
                events.push((branch, StepEventKind::BranchCompleted));
            }
        }
        if !root_was_complete && self.root().is_completed() {
            events.push((self.root, StepEventKind::RootCompleted));
        }
        Ok(events)
    }
}

fn derive(done: bool, any_actionable: bool) -> StepStatus {
    if done {
        StepStatus::Completed
    } else if any_actionable {
        StepStatus::Actionable
    } else {
        StepStatus::Pending
    }
}

impl TryFrom<Vec<Step>> for StepTree {
    type Error = ApprovalError;

    fn try_from(steps: Vec<Step>) -> Result<Self> {
        Self::from_steps(steps)
    }
}

impl From<StepTree> for Vec<Step> {
    fn from(tree: StepTree) -> Self {
        let order: Vec<StepId> = tree.steps().iter().map(|s| s.id).collect();
        let mut nodes = tree.nodes;
        order.iter().filter_map(|id| nodes.remove(id)).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
