//! Desired tree shapes.
//!
//! A `StepShape` describes the tree a caller wants a proposal to have. It
//! carries no ids and no state; reconciliation turns it into persisted steps,
//! carrying over decisions already made by the same people.

use crate::error::{ApprovalError, Result};
use crate::types::{IndividualRole, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepShape {
    Serial {
        steps: Vec<StepShape>,
    },
    Parallel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_children_needed: Option<usize>,
        steps: Vec<StepShape>,
    },
    Approval {
        user: UserId,
    },
    Observer {
        user: UserId,
    },
}

impl StepShape {
    pub fn serial(steps: Vec<StepShape>) -> Self {
        StepShape::Serial { steps }
    }

    /// Parallel group that needs every gating child.
    pub fn parallel(steps: Vec<StepShape>) -> Self {
        StepShape::Parallel {
            min_children_needed: None,
            steps,
        }
    }

    pub fn threshold(min_children_needed: usize, steps: Vec<StepShape>) -> Self {
        StepShape::Parallel {
            min_children_needed: Some(min_children_needed),
            steps,
        }
    }

    pub fn approval(user: UserId) -> Self {
        StepShape::Approval { user }
    }

    pub fn observer(user: UserId) -> Self {
        StepShape::Observer { user }
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let shape: StepShape = serde_yaml::from_str(data)?;
        shape.validate()?;
        Ok(shape)
    }

    pub fn children(&self) -> &[StepShape] {
        match self {
            StepShape::Serial { steps } | StepShape::Parallel { steps, .. } => steps,
            StepShape::Approval { .. } | StepShape::Observer { .. } => &[],
        }
    }

    pub fn individual(&self) -> Option<(IndividualRole, &UserId)> {
        match self {
            StepShape::Approval { user } => Some((IndividualRole::Approval, user)),
            StepShape::Observer { user } => Some((IndividualRole::Observer, user)),
            _ => None,
        }
    }

    pub fn is_gating(&self) -> bool {
        !matches!(self, StepShape::Observer { .. })
    }

    /// Responsible parties in pre-order.
    pub fn parties(&self) -> Vec<&UserId> {
        let mut out = Vec::new();
        self.collect_parties(&mut out);
        out
    }

    fn collect_parties<'a>(&'a self, out: &mut Vec<&'a UserId>) {
        if let Some((_, user)) = self.individual() {
            out.push(user);
        }
        for child in self.children() {
            child.collect_parties(out);
        }
    }

    /// Reject shapes that could never be satisfied or that break the
    /// one-leaf-per-person rule. Runs before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for party in self.parties() {
            if !seen.insert(party) {
                return Err(ApprovalError::DuplicateParty(party.to_string()));
            }
        }
        if !self.is_gating() {
            return Err(ApprovalError::ObserverRoot);
        }
        self.validate_node()
    }

    fn validate_node(&self) -> Result<()> {
        match self {
            StepShape::Approval { .. } | StepShape::Observer { .. } => Ok(()),
            StepShape::Serial { steps } => {
                if !steps.iter().any(StepShape::is_gating) {
                    return Err(ApprovalError::EmptyComposite);
                }
                steps.iter().try_for_each(StepShape::validate_node)
            }
            StepShape::Parallel {
                min_children_needed,
                steps,
            } => {
                let available = steps.iter().filter(|s| s.is_gating()).count();
                if available == 0 {
                    return Err(ApprovalError::EmptyComposite);
                }
                if let Some(needed) = *min_children_needed {
                    if needed == 0 || needed > available {
                        return Err(ApprovalError::MalformedThreshold { needed, available });
                    }
                }
                steps.iter().try_for_each(StepShape::validate_node)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn parses_nested_yaml() {
        let yaml = r#"
type: parallel
min_children_needed: 2
steps:
  - type: parallel
    steps:
      - type: approval
        user: amy
      - type: approval
        user: bob
  - type: approval
    user: carrie
  - type: serial
    steps:
      - type: approval
        user: dan
      - type: observer
        user: olga
      - type: approval
        user: erin
"#;
        let shape = StepShape::from_yaml(yaml).unwrap();
        let parties: Vec<&str> = shape.parties().iter().map(|u| u.as_str()).collect();
        assert_eq!(parties, ["amy", "bob", "carrie", "dan", "olga", "erin"]);
    }

    #[test]
    fn threshold_above_child_count_rejected() {
        let shape = StepShape::threshold(
            3,
            vec![
                StepShape::approval(user("amy")),
                StepShape::approval(user("bob")),
            ],
        );
        assert!(matches!(
            shape.validate(),
            Err(ApprovalError::MalformedThreshold {
                needed: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn zero_threshold_rejected() {
        let shape = StepShape::threshold(0, vec![StepShape::approval(user("amy"))]);
        assert!(matches!(
            shape.validate(),
            Err(ApprovalError::MalformedThreshold { needed: 0, .. })
        ));
    }

    #[test]
    fn observers_do_not_count_toward_threshold() {
        let shape = StepShape::threshold(
            2,
            vec![
                StepShape::approval(user("amy")),
                StepShape::observer(user("olga")),
            ],
        );
        assert!(shape.validate().is_err());
    }

    #[test]
    fn duplicate_party_rejected() {
        let shape = StepShape::serial(vec![
            StepShape::approval(user("amy")),
            StepShape::parallel(vec![StepShape::observer(user("amy"))]),
        ]);
        assert!(matches!(
            shape.validate(),
            Err(ApprovalError::DuplicateParty(p)) if p == "amy"
        ));
    }

    #[test]
    fn empty_composites_rejected() {
        assert!(StepShape::serial(vec![]).validate().is_err());
        assert!(StepShape::parallel(vec![StepShape::observer(user("olga"))])
            .validate()
            .is_err());
    }

    #[test]
    fn single_leaf_is_valid() {
        StepShape::approval(user("amy")).validate().unwrap();
        assert!(matches!(
            StepShape::observer(user("olga")).validate(),
            Err(ApprovalError::ObserverRoot)
        ));
    }
}
