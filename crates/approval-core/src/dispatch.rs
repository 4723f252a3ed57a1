//! Who gets told what, and when.
//!
//! A [`Dispatcher`] turns proposal changes into [`Notification`]s and hands
//! them to a [`NotificationSink`]. Transport is the sink's business; the
//! shipped sinks record in memory, append to a JSON-lines outbox, or log.

use crate::error::{ApprovalError, Result};
use crate::event::{StepEvent, StepEventKind};
use crate::io;
use crate::proposal::{Proposal, ProposalId};
use crate::reconcile::ReconcileOutcome;
use crate::step::{Step, StepId};
use crate::types::{DispatchMode, UserId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum NotificationEvent {
    /// Sent to observers when a proposal is routed to them.
    #[serde(rename = "proposal.created")]
    ProposalCreated {
        proposal_id: ProposalId,
        requester: UserId,
    },

    /// Sent to an approver whose step is waiting on them.
    #[serde(rename = "approval.requested")]
    ApprovalRequested {
        proposal_id: ProposalId,
        step_id: StepId,
        requester: UserId,
    },

    /// Sent to the requester after each approval.
    #[serde(rename = "approval.recorded")]
    ApprovalRecorded {
        proposal_id: ProposalId,
        step_id: StepId,
        #[serde(skip_serializing_if = "Option::is_none")]
        approver: Option<UserId>,
        proposal_completed: bool,
    },
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            NotificationEvent::ProposalCreated { .. } => "proposal.created",
            NotificationEvent::ApprovalRequested { .. } => "approval.requested",
            NotificationEvent::ApprovalRecorded { .. } => "approval.recorded",
        }
    }

    pub fn proposal_id(&self) -> ProposalId {
        match self {
            NotificationEvent::ProposalCreated { proposal_id, .. }
            | NotificationEvent::ApprovalRequested { proposal_id, .. }
            | NotificationEvent::ApprovalRecorded { proposal_id, .. } => *proposal_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub recipient: UserId,
    pub event: NotificationEvent,
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

pub trait NotificationSink {
    fn notify(&self, recipient: &UserId, event: &NotificationEvent) -> Result<()>;
}

impl<S: NotificationSink + ?Sized> NotificationSink for &S {
    fn notify(&self, recipient: &UserId, event: &NotificationEvent) -> Result<()> {
        (**self).notify(recipient, event)
    }
}

impl<S: NotificationSink + ?Sized> NotificationSink for Box<S> {
    fn notify(&self, recipient: &UserId, event: &NotificationEvent) -> Result<()> {
        (**self).notify(recipient, event)
    }
}

impl<S: NotificationSink + ?Sized> NotificationSink for Arc<S> {
    fn notify(&self, recipient: &UserId, event: &NotificationEvent) -> Result<()> {
        (**self).notify(recipient, event)
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recipients in the order they were notified.
    pub fn recipients(&self) -> Vec<UserId> {
        self.notifications()
            .into_iter()
            .map(|n| n.recipient)
            .collect()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, recipient: &UserId, event: &NotificationEvent) -> Result<()> {
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.push(Notification {
            recipient: recipient.clone(),
            event: event.clone(),
        });
        Ok(())
    }
}

/// Appends one JSON object per notification to a file.
#[derive(Debug, Clone)]
pub struct OutboxSink {
    path: PathBuf,
}

impl OutboxSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Everything written so far, oldest first. A missing outbox is empty.
    pub fn read_all(&self) -> Result<Vec<Notification>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(ApprovalError::from))
            .collect()
    }
}

impl NotificationSink for OutboxSink {
    fn notify(&self, recipient: &UserId, event: &NotificationEvent) -> Result<()> {
        let line = serde_json::to_string(&Notification {
            recipient: recipient.clone(),
            event: event.clone(),
        })?;
        io::append_line(&self.path, &line)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, recipient: &UserId, event: &NotificationEvent) -> Result<()> {
        tracing::info!(
            recipient = %recipient,
            event = event.event_type(),
            proposal = %event.proposal_id(),
            "notification"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatchers
// ---------------------------------------------------------------------------

/// The first actionable approval step in traversal order. Observers never
/// count as pending approvals.
pub fn next_pending_approval(proposal: &Proposal) -> Option<&Step> {
    proposal
        .individual_steps()
        .into_iter()
        .find(|s| s.is_approval() && s.is_actionable())
}

/// Every notification method returns how many notifications went out.
pub trait Dispatcher {
    fn deliver_new_proposal_emails(&self, proposal: &Proposal) -> Result<usize>;

    /// Runs after `step` was approved and the tree was recomputed.
    fn on_approval_approved(&self, proposal: &Proposal, step: &Step) -> Result<usize>;

    /// Runs after the tree was reassigned, including when the new tree
    /// completed the proposal.
    fn on_rerouted(&self, proposal: &Proposal, outcome: &ReconcileOutcome) -> Result<usize>;

    fn dispatch_events(&self, proposal: &Proposal, events: &[StepEvent]) -> Result<usize> {
        let mut sent = 0;
        for event in events {
            if event.kind != StepEventKind::LeafCompleted {
                continue;
            }
            if let Some(step) = proposal.step(event.step_id) {
                sent += self.on_approval_approved(proposal, step)?;
            }
        }
        Ok(sent)
    }
}

fn email_approver<S: NotificationSink>(
    sink: &S,
    proposal: &Proposal,
    step: &Step,
) -> Result<usize> {
    let Some(party) = step.responsible_party() else {
        return Ok(0);
    };
    sink.notify(
        party,
        &NotificationEvent::ApprovalRequested {
            proposal_id: proposal.id,
            step_id: step.id,
            requester: proposal.requester.clone(),
        },
    )?;
    Ok(1)
}

fn email_observers<S: NotificationSink>(sink: &S, proposal: &Proposal) -> Result<usize> {
    let event = NotificationEvent::ProposalCreated {
        proposal_id: proposal.id,
        requester: proposal.requester.clone(),
    };
    let observers = proposal.observers();
    for observer in &observers {
        sink.notify(observer, &event)?;
    }
    Ok(observers.len())
}

fn email_requester<S: NotificationSink>(
    sink: &S,
    proposal: &Proposal,
    step: &Step,
) -> Result<usize> {
    sink.notify(
        &proposal.requester,
        &NotificationEvent::ApprovalRecorded {
            proposal_id: proposal.id,
            step_id: step.id,
            approver: step.responsible_party().cloned(),
            proposal_completed: proposal.is_completed(),
        },
    )?;
    Ok(1)
}

/// Tells the requester when a reroute alone finished the proposal.
fn email_rerouted_completion<S: NotificationSink>(
    sink: &S,
    proposal: &Proposal,
    outcome: &ReconcileOutcome,
) -> Result<usize> {
    match proposal.root_step() {
        Some(root) if outcome.completed_proposal() => email_requester(sink, proposal, root),
        _ => Ok(0),
    }
}

/// Asks one approver at a time.
#[derive(Debug)]
pub struct LinearDispatcher<S> {
    sink: S,
}

impl<S: NotificationSink> LinearDispatcher<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn next_pending_approval<'p>(&self, proposal: &'p Proposal) -> Option<&'p Step> {
        next_pending_approval(proposal)
    }
}

impl<S: NotificationSink> Dispatcher for LinearDispatcher<S> {
    fn deliver_new_proposal_emails(&self, proposal: &Proposal) -> Result<usize> {
        let mut sent = 0;
        if let Some(step) = next_pending_approval(proposal) {
            sent += email_approver(&self.sink, proposal, step)?;
        }
        sent += email_observers(&self.sink, proposal)?;
        Ok(sent)
    }

    fn on_approval_approved(&self, proposal: &Proposal, step: &Step) -> Result<usize> {
        let mut sent = email_requester(&self.sink, proposal, step)?;
        if let Some(next) = next_pending_approval(proposal) {
            sent += email_approver(&self.sink, proposal, next)?;
        }
        Ok(sent)
    }

    fn on_rerouted(&self, proposal: &Proposal, outcome: &ReconcileOutcome) -> Result<usize> {
        let asked = match next_pending_approval(proposal) {
            Some(next) if outcome.activated.contains(&next.id) => {
                email_approver(&self.sink, proposal, next)?
            }
            _ => 0,
        };
        Ok(asked + email_rerouted_completion(&self.sink, proposal, outcome)?)
    }
}

/// Asks every actionable approver at once.
#[derive(Debug)]
pub struct ParallelDispatcher<S> {
    sink: S,
}

impl<S: NotificationSink> ParallelDispatcher<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    fn email_actionable(&self, proposal: &Proposal, only: Option<&[StepId]>) -> Result<usize> {
        let mut sent = 0;
        for step in proposal.individual_steps() {
            if !step.is_approval() || !step.is_actionable() {
                continue;
            }
            if only.is_some_and(|ids| !ids.contains(&step.id)) {
                continue;
            }
            sent += email_approver(&self.sink, proposal, step)?;
        }
        Ok(sent)
    }
}

impl<S: NotificationSink> Dispatcher for ParallelDispatcher<S> {
    fn deliver_new_proposal_emails(&self, proposal: &Proposal) -> Result<usize> {
        Ok(self.email_actionable(proposal, None)? + email_observers(&self.sink, proposal)?)
    }

    fn on_approval_approved(&self, proposal: &Proposal, step: &Step) -> Result<usize> {
        Ok(email_requester(&self.sink, proposal, step)? + self.email_actionable(proposal, None)?)
    }

    fn on_rerouted(&self, proposal: &Proposal, outcome: &ReconcileOutcome) -> Result<usize> {
        Ok(self.email_actionable(proposal, Some(&outcome.activated))?
            + email_rerouted_completion(&self.sink, proposal, outcome)?)
    }
}

pub fn dispatcher_for<'a, S: NotificationSink + 'a>(
    mode: DispatchMode,
    sink: S,
) -> Box<dyn Dispatcher + 'a> {
    match mode {
        DispatchMode::Linear => Box::new(LinearDispatcher::new(sink)),
        DispatchMode::Parallel => Box::new(ParallelDispatcher::new(sink)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
