use crate::error::ApprovalError;
use crate::token::ApiToken;
use crate::types::{IndividualRole, StepStatus, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StepId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub Uuid);

impl StepId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StepId {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ApprovalError::InvalidId(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

/// Variant tag of a step node. Shared state lives on [`Step`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Ordered AND: children act one after another.
    Serial,
    /// Threshold group: completes once `min_children_needed` gating children
    /// complete. `None` means all of them.
    Parallel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_children_needed: Option<usize>,
    },
    /// Leaf bound to one responsible party.
    Individual {
        role: IndividualRole,
        responsible_party: UserId,
    },
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Serial => "serial",
            StepKind::Parallel { .. } => "parallel",
            StepKind::Individual { role, .. } => role.as_str(),
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub kind: StepKind,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Owning composite. Lookup only; the tree is owned top-down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<StepId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_steps: Vec<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<ApiToken>,
}

impl Step {
    pub fn new(kind: StepKind, parent: Option<StepId>) -> Self {
        Self {
            id: StepId::generate(),
            kind,
            status: StepStatus::Pending,
            completed_at: None,
            parent,
            child_steps: Vec::new(),
            api_token: None,
        }
    }

    pub fn is_individual(&self) -> bool {
        matches!(self.kind, StepKind::Individual { .. })
    }

    pub fn is_approval(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Individual {
                role: IndividualRole::Approval,
                ..
            }
        )
    }

    pub fn is_observer(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Individual {
                role: IndividualRole::Observer,
                ..
            }
        )
    }

    /// Whether this step holds up its parent. Only observers do not.
    pub fn is_gating(&self) -> bool {
        !self.is_observer()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn responsible_party(&self) -> Option<&UserId> {
        match &self.kind {
            StepKind::Individual {
                responsible_party, ..
            } => Some(responsible_party),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }

    pub fn is_actionable(&self) -> bool {
        self.status == StepStatus::Actionable
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// The attached token, but only while it can still be used.
    pub fn api_token(&self, now: DateTime<Utc>) -> Option<&ApiToken> {
        self.api_token.as_ref().filter(|t| t.is_valid_at(now))
    }

    /// Move to `status`, stamping `completed_at` the first time the step
    /// completes. A completed step never leaves that state.
    pub(crate) fn set_status(&mut self, status: StepStatus, now: DateTime<Utc>) {
        if self.is_completed() {
            return;
        }
        self.status = status;
        if status == StepStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
