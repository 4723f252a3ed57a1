use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("not initialized: run 'approvals init'")]
    NotInitialized,

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("no step for user '{0}' on this proposal")]
    NoStepForUser(String),

    #[error("invalid id '{0}'")]
    InvalidId(String),

    #[error("invalid user id '{0}': must be non-empty without whitespace")]
    InvalidUser(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid transition for step {step} from {from} to {to}: {reason}")]
    InvalidTransition {
        step: String,
        from: String,
        to: String,
        reason: String,
    },

    #[error("malformed threshold: min_children_needed={needed} with {available} gating children")]
    MalformedThreshold { needed: usize, available: usize },

    #[error("composite step has no gating children")]
    EmptyComposite,

    #[error("an observer cannot be the root step")]
    ObserverRoot,

    #[error("user '{0}' appears more than once in the step tree")]
    DuplicateParty(String),

    #[error("corrupt step tree: {0}")]
    CorruptTree(String),

    #[error("proposal has no steps")]
    NoSteps,

    #[error("token is invalid, used or expired")]
    InvalidToken,

    #[error("store error: {0}")]
    Store(String),

    #[error("notification failed for '{recipient}': {reason}")]
    Notify { recipient: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ApprovalError>;
