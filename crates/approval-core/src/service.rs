//! Store, dispatcher and delegation wired together.
//!
//! Every mutating call commits to the store first and notifies afterwards.
//! A notification failure is logged and never undoes a committed change.

use crate::config::Config;
use crate::delegation::{DelegationResolver, DelegationTable};
use crate::dispatch::{self, dispatcher_for, Dispatcher, LogSink, OutboxSink};
use crate::error::{ApprovalError, Result};
use crate::event::StepEvent;
use crate::io;
use crate::paths;
use crate::proposal::{Proposal, ProposalId};
use crate::reconcile::ReconcileOutcome;
use crate::shape::StepShape;
use crate::step::{Step, StepId};
use crate::store::ProposalStore;
use crate::token::ApiToken;
use crate::types::{SinkKind, UserId};
use chrono::Utc;
use std::path::Path;

pub struct ApprovalService {
    config: Config,
    store: ProposalStore,
    dispatcher: Box<dyn Dispatcher>,
    delegations: DelegationTable,
}

impl ApprovalService {
    /// Create `.approvals/` with a default config and an empty database.
    /// Existing files are left alone. Returns true if the config was written.
    pub fn init(root: &Path) -> Result<bool> {
        io::ensure_dir(&paths::approvals_dir(root))?;
        let created = !paths::config_path(root).try_exists()?;
        if created {
            Config::new().save(root)?;
        }
        let cfg = Config::load(root)?;
        ProposalStore::open(&paths::database_path(root, &cfg))?;
        Ok(created)
    }

    /// Open an initialized root, notifying through the configured sink.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let store = ProposalStore::open(&paths::database_path(root, &config))?;
        let dispatcher = match config.sink {
            SinkKind::Outbox => {
                dispatcher_for(config.dispatch, OutboxSink::new(paths::outbox_path(root)))
            }
            SinkKind::Log => dispatcher_for(config.dispatch, LogSink),
        };
        let delegations = config.delegation_table()?;
        if !delegations.is_empty() {
            tracing::debug!(delegations = delegations.len(), "loaded delegations");
        }
        Ok(Self::with_parts(config, store, dispatcher, delegations))
    }

    pub fn with_parts(
        config: Config,
        store: ProposalStore,
        dispatcher: Box<dyn Dispatcher>,
        delegations: DelegationTable,
    ) -> Self {
        Self {
            config,
            store,
            dispatcher,
            delegations,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---------------------------------------------------------------------------
    // Proposals
    // ---------------------------------------------------------------------------

    pub fn create_proposal(&self, requester: UserId, shape: &StepShape) -> Result<Proposal> {
        let mut proposal = Proposal::new(requester);
        proposal.set_root_step(shape)?;
        self.store.insert(&proposal)?;
        tracing::info!(
            proposal = %proposal.id,
            requester = %proposal.requester,
            steps = proposal.steps().len(),
            "proposal created"
        );
        notified(
            self.dispatcher.deliver_new_proposal_emails(&proposal),
            proposal.id,
        );
        Ok(proposal)
    }

    pub fn reroute(
        &self,
        id: ProposalId,
        shape: &StepShape,
    ) -> Result<(Proposal, ReconcileOutcome)> {
        let (proposal, outcome) = self.store.update(id, |p| p.set_root_step(shape))?;
        notified(self.dispatcher.on_rerouted(&proposal, &outcome), proposal.id);
        Ok((proposal, outcome))
    }

    pub fn show(&self, id: ProposalId) -> Result<Proposal> {
        self.store.load(id)
    }

    pub fn list(&self) -> Result<Vec<Proposal>> {
        self.store.list()
    }

    pub fn delete(&self, id: ProposalId) -> Result<()> {
        self.store.delete(id)
    }

    // ---------------------------------------------------------------------------
    // Approvals
    // ---------------------------------------------------------------------------

    /// Approve as `user`, directly or on behalf of whoever delegated to them.
    pub fn approve(&self, id: ProposalId, user: &UserId) -> Result<(Proposal, Vec<StepEvent>)> {
        let resolver: &dyn DelegationResolver = &self.delegations;
        let (proposal, events) = self.store.update(id, |p| {
            let step = p
                .existing_or_delegated_step_for(user, resolver)
                .ok_or_else(|| ApprovalError::NoStepForUser(user.to_string()))?
                .id;
            p.complete_step(step)
        })?;
        notified(
            self.dispatcher.dispatch_events(&proposal, &events),
            proposal.id,
        );
        Ok((proposal, events))
    }

    pub fn approve_with_token(
        &self,
        id: ProposalId,
        access_token: &str,
    ) -> Result<(Proposal, Vec<StepEvent>)> {
        let (proposal, events) = self
            .store
            .update(id, |p| p.complete_with_token(access_token))?;
        notified(
            self.dispatcher.dispatch_events(&proposal, &events),
            proposal.id,
        );
        Ok((proposal, events))
    }

    /// Issue a fresh one-time token on `user`'s own step, replacing any
    /// earlier one.
    pub fn issue_token(&self, id: ProposalId, user: &UserId) -> Result<(StepId, ApiToken)> {
        let ttl = self.config.token_ttl();
        let (_, issued) = self.store.update(id, |p| {
            let step = p
                .step_for(user)
                .ok_or_else(|| ApprovalError::NoStepForUser(user.to_string()))?
                .id;
            let token = ApiToken::issue(Utc::now(), ttl);
            p.attach_token(step, token.clone())?;
            Ok((step, token))
        })?;
        tracing::info!(proposal = %id, step = %issued.0, "token issued");
        Ok(issued)
    }

    pub fn next_pending_approval(&self, id: ProposalId) -> Result<Option<Step>> {
        let proposal = self.store.load(id)?;
        Ok(dispatch::next_pending_approval(&proposal).cloned())
    }
}

fn notified(result: Result<usize>, proposal: ProposalId) {
    match result {
        Ok(sent) => tracing::debug!(proposal = %proposal, sent, "notifications sent"),
        Err(e) => tracing::warn!(proposal = %proposal, error = %e, "notification failed"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{NotificationEvent, NotificationSink, RecordingSink};
    use crate::types::DispatchMode;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn approvals(names: &[&str]) -> Vec<StepShape> {
        names.iter().map(|n| StepShape::approval(user(n))).collect()
    }

    fn recording(dir: &TempDir, config: Config) -> (ApprovalService, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let store = ProposalStore::open(&dir.path().join("test.db")).unwrap();
        let delegations = config.delegation_table().unwrap();
        let dispatcher = dispatcher_for(config.dispatch, Arc::clone(&sink));
        let service = ApprovalService::with_parts(config, store, dispatcher, delegations);
        (service, sink)
    }

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn notify(&self, recipient: &UserId, _event: &NotificationEvent) -> Result<()> {
            Err(ApprovalError::Notify {
                recipient: recipient.to_string(),
                reason: "smtp down".into(),
            })
        }
    }

    #[test]
    fn init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        assert!(ApprovalService::init(dir.path()).unwrap());
        assert!(!ApprovalService::init(dir.path()).unwrap());
        assert!(paths::config_path(dir.path()).exists());
        assert!(ApprovalService::open(dir.path()).is_ok());
    }

    #[test]
    fn open_uninitialized_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ApprovalService::open(dir.path()),
            Err(ApprovalError::NotInitialized)
        ));
    }

    #[test]
    fn serial_flow_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (svc, sink) = recording(&dir, Config::new());

        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["a", "b"])))
            .unwrap();
        assert_eq!(sink.recipients(), [user("a")]);

        sink.clear();
        let (p2, events) = svc.approve(p.id, &user("a")).unwrap();
        assert_eq!(Proposal::completion_events(&events), 0);
        assert!(!p2.is_completed());
        let mut recipients = sink.recipients();
        recipients.sort();
        assert_eq!(recipients, [user("b"), user("requester")]);

        let (p3, events) = svc.approve(p.id, &user("b")).unwrap();
        assert_eq!(Proposal::completion_events(&events), 1);
        assert!(p3.is_completed());
        assert!(svc.show(p.id).unwrap().is_completed());
    }

    #[test]
    fn approve_for_stranger_fails() {
        let dir = TempDir::new().unwrap();
        let (svc, _sink) = recording(&dir, Config::new());
        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["a"])))
            .unwrap();
        assert!(matches!(
            svc.approve(p.id, &user("mallory")),
            Err(ApprovalError::NoStepForUser(_))
        ));
    }

    #[test]
    fn observer_cannot_approve() {
        let dir = TempDir::new().unwrap();
        let (svc, sink) = recording(&dir, Config::new());
        let p = svc
            .create_proposal(
                user("requester"),
                &StepShape::serial(vec![
                    StepShape::approval(user("a")),
                    StepShape::observer(user("o")),
                    StepShape::approval(user("b")),
                ]),
            )
            .unwrap();
        svc.approve(p.id, &user("a")).unwrap();
        sink.clear();

        assert!(matches!(
            svc.approve(p.id, &user("o")),
            Err(ApprovalError::InvalidTransition { .. })
        ));
        assert!(sink.notifications().is_empty());
        assert_eq!(
            svc.next_pending_approval(p.id)
                .unwrap()
                .and_then(|s| s.responsible_party().cloned()),
            Some(user("b"))
        );
    }

    #[test]
    fn delegate_can_approve() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new();
        cfg.delegations
            .insert("deputy".to_string(), "chief".to_string());
        let (svc, _sink) = recording(&dir, cfg);

        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["chief"])))
            .unwrap();
        let (p, _) = svc.approve(p.id, &user("deputy")).unwrap();
        assert!(p.is_completed());
    }

    #[test]
    fn malformed_shape_is_not_stored() {
        let dir = TempDir::new().unwrap();
        let (svc, sink) = recording(&dir, Config::new());
        let err = svc
            .create_proposal(
                user("requester"),
                &StepShape::threshold(4, approvals(&["a", "b"])),
            )
            .unwrap_err();
        assert!(matches!(err, ApprovalError::MalformedThreshold { .. }));
        assert!(svc.list().unwrap().is_empty());
        assert!(sink.notifications().is_empty());
    }

    #[test]
    fn reroute_notifies_activated_approver() {
        let dir = TempDir::new().unwrap();
        let (svc, sink) = recording(&dir, Config::new());
        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["a", "b"])))
            .unwrap();
        svc.approve(p.id, &user("a")).unwrap();
        sink.clear();

        let (_, outcome) = svc
            .reroute(p.id, &StepShape::serial(approvals(&["a", "c"])))
            .unwrap();
        assert_eq!(outcome.deleted.len(), 2);
        assert_eq!(sink.recipients(), [user("c")]);
        assert_eq!(
            svc.next_pending_approval(p.id)
                .unwrap()
                .and_then(|s| s.responsible_party().cloned()),
            Some(user("c"))
        );
    }

    #[test]
    fn reroute_can_finish_a_proposal() {
        let dir = TempDir::new().unwrap();
        let (svc, sink) = recording(&dir, Config::new());
        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["a", "b"])))
            .unwrap();
        svc.approve(p.id, &user("a")).unwrap();
        sink.clear();

        let (p, outcome) = svc
            .reroute(p.id, &StepShape::serial(approvals(&["a"])))
            .unwrap();
        assert!(p.is_completed());
        assert_eq!(Proposal::completion_events(&outcome.events), 1);
        assert_eq!(sink.recipients(), [user("requester")]);
        assert!(svc.show(p.id).unwrap().completed_at.is_some());
    }

    #[test]
    fn parallel_mode_asks_everyone() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new();
        cfg.dispatch = DispatchMode::Parallel;
        let (svc, sink) = recording(&dir, cfg);
        svc.create_proposal(
            user("requester"),
            &StepShape::parallel(approvals(&["a", "b", "c"])),
        )
        .unwrap();
        assert_eq!(sink.notifications().len(), 3);
    }

    #[test]
    fn token_roundtrip_through_store() {
        let dir = TempDir::new().unwrap();
        let (svc, _sink) = recording(&dir, Config::new());
        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["a"])))
            .unwrap();

        let (step, token) = svc.issue_token(p.id, &user("a")).unwrap();
        let stored = svc.show(p.id).unwrap();
        assert!(stored.step(step).unwrap().api_token(Utc::now()).is_some());
        let shown = serde_json::to_string(&stored).unwrap();
        assert!(!shown.contains(&token.access_token));

        let (p, _) = svc.approve_with_token(p.id, &token.access_token).unwrap();
        assert!(p.is_completed());
        let shown = serde_json::to_string(&svc.show(p.id).unwrap()).unwrap();
        assert!(!shown.contains(&token.access_token));
        assert!(matches!(
            svc.approve_with_token(p.id, &token.access_token),
            Err(ApprovalError::InvalidToken)
        ));
    }

    #[test]
    fn sink_failure_does_not_fail_approval() {
        let dir = TempDir::new().unwrap();
        let store = ProposalStore::open(&dir.path().join("test.db")).unwrap();
        let svc = ApprovalService::with_parts(
            Config::new(),
            store,
            dispatcher_for(DispatchMode::Linear, FailingSink),
            DelegationTable::new(),
        );
        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["a"])))
            .unwrap();
        let (p, _) = svc.approve(p.id, &user("a")).unwrap();
        assert!(p.is_completed());
        assert!(svc.show(p.id).unwrap().is_completed());
    }

    #[test]
    fn delete_removes_proposal() {
        let dir = TempDir::new().unwrap();
        let (svc, _sink) = recording(&dir, Config::new());
        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["a"])))
            .unwrap();
        svc.delete(p.id).unwrap();
        assert!(matches!(
            svc.show(p.id),
            Err(ApprovalError::ProposalNotFound(_))
        ));
    }

    #[test]
    fn log_sink_leaves_outbox_alone() {
        let dir = TempDir::new().unwrap();
        ApprovalService::init(dir.path()).unwrap();
        let mut cfg = Config::load(dir.path()).unwrap();
        cfg.sink = SinkKind::Log;
        cfg.delegations
            .insert("deputy".to_string(), "a".to_string());
        cfg.save(dir.path()).unwrap();

        let svc = ApprovalService::open(dir.path()).unwrap();
        let p = svc
            .create_proposal(user("requester"), &StepShape::serial(approvals(&["a"])))
            .unwrap();
        let (p, _) = svc.approve(p.id, &user("deputy")).unwrap();
        assert!(p.is_completed());
        assert!(!paths::outbox_path(dir.path()).exists());
    }

    #[test]
    fn outbox_written_when_opened_from_root() {
        let dir = TempDir::new().unwrap();
        ApprovalService::init(dir.path()).unwrap();
        let svc = ApprovalService::open(dir.path()).unwrap();
        svc.create_proposal(user("requester"), &StepShape::serial(approvals(&["a"])))
            .unwrap();

        let outbox = OutboxSink::new(paths::outbox_path(dir.path()));
        let sent = outbox.read_all().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, user("a"));
    }
}
