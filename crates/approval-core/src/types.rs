use crate::error::ApprovalError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Actionable,
    Completed,
}

impl StepStatus {
    pub fn all() -> &'static [StepStatus] {
        &[
            StepStatus::Pending,
            StepStatus::Actionable,
            StepStatus::Completed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Actionable => "actionable",
            StepStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "actionable" => Ok(StepStatus::Actionable),
            "completed" => Ok(StepStatus::Completed),
            _ => Err(ApprovalError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// IndividualRole
// ---------------------------------------------------------------------------

/// What an individual leaf asks of its responsible party.
///
/// Approvals gate their parent. Observers are told about the proposal but
/// never hold up a chain or count toward a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndividualRole {
    Approval,
    Observer,
}

impl IndividualRole {
    pub fn as_str(self) -> &'static str {
        match self {
            IndividualRole::Approval => "approval",
            IndividualRole::Observer => "observer",
        }
    }
}

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Identity of a person who can request, approve or observe.
///
/// Usually an email address, but any token without whitespace is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

static USER_RE: OnceLock<Regex> = OnceLock::new();

fn user_re() -> &'static Regex {
    USER_RE.get_or_init(|| Regex::new(r"^[^\s]{1,254}$").expect("static regex"))
}

impl UserId {
    pub fn parse(s: impl Into<String>) -> Result<Self, ApprovalError> {
        let s = s.into();
        if !user_re().is_match(&s) {
            return Err(ApprovalError::InvalidUser(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = ApprovalError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<UserId> for String {
    fn from(u: UserId) -> Self {
        u.0
    }
}

// ---------------------------------------------------------------------------
// DispatchMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    #[default]
    Linear,
    Parallel,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchMode::Linear => "linear",
            DispatchMode::Parallel => "parallel",
        })
    }
}

// ---------------------------------------------------------------------------
// SinkKind
// ---------------------------------------------------------------------------

/// Where notifications go when the service is opened from a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Append to `.approvals/outbox.jsonl`.
    #[default]
    Outbox,
    /// Emit a tracing event per notification.
    Log,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkKind::Outbox => "outbox",
            SinkKind::Log => "log",
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
