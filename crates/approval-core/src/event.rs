use crate::proposal::ProposalId;
use crate::step::StepId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEventKind {
    /// An individual step was completed by its responsible party.
    LeafCompleted,
    /// A composite step became completed as a result of a leaf completion.
    BranchCompleted,
    /// The root step completed; the proposal is fully approved.
    RootCompleted,
}

/// Emitted by a completion, in the order the tree changed: the leaf first,
/// then each composite that completed with it, then the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub proposal_id: ProposalId,
    pub step_id: StepId,
    pub kind: StepEventKind,
}

impl StepEvent {
    pub fn is_root_completed(&self) -> bool {
        self.kind == StepEventKind::RootCompleted
    }
}
