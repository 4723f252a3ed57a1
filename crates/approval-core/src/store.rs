//! Persistent storage for proposals and their step trees using redb.
//!
//! # Table design
//!
//! Two tables, both JSON-valued:
//!
//! ```text
//! PROPOSALS  [ proposal uuid: 16 bytes ]                      -> proposal header
//! STEPS      [ proposal uuid: 16 bytes | step uuid: 16 bytes ] -> step row
//! ```
//!
//! Steps are flat rows with parent-id edges. Prefixing the step key with the
//! proposal id keeps a proposal's rows contiguous, so loading or deleting a
//! tree is a single range scan over the 16-byte prefix.
//!
//! Every mutation runs inside one write transaction: the proposal is loaded,
//! changed in memory, and the row diff is written back. If the change fails
//! the transaction is aborted and nothing is persisted.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::error::{ApprovalError, Result};
use crate::proposal::{Proposal, ProposalId};
use crate::step::{Step, StepId};
use crate::tree::StepTree;
use crate::types::UserId;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const PROPOSALS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("proposals");
const STEPS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("steps");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn step_key(proposal: ProposalId, step: StepId) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(proposal.0.as_bytes());
    key[16..].copy_from_slice(step.0.as_bytes());
    key
}

/// Inclusive key bounds covering every step row of `proposal`.
fn step_range(proposal: ProposalId) -> ([u8; 32], [u8; 32]) {
    let mut lower = [0u8; 32];
    lower[..16].copy_from_slice(proposal.0.as_bytes());
    let mut upper = lower;
    upper[16..].fill(0xff);
    (lower, upper)
}

fn store_err(e: impl fmt::Display) -> ApprovalError {
    ApprovalError::Store(e.to_string())
}

/// Proposal fields that live outside the step rows.
#[derive(Debug, Serialize, Deserialize)]
struct ProposalRow {
    id: ProposalId,
    requester: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl From<&Proposal> for ProposalRow {
    fn from(p: &Proposal) -> Self {
        Self {
            id: p.id,
            requester: p.requester.clone(),
            created_at: p.created_at,
            updated_at: p.updated_at,
            completed_at: p.completed_at,
        }
    }
}

/// A step as persisted. Token secrets are skipped when a step is serialized,
/// so the row carries the secret beside it.
#[derive(Debug, Serialize, Deserialize)]
struct StepRow {
    step: Step,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
}

impl StepRow {
    fn new(step: &Step) -> Self {
        Self {
            step: step.clone(),
            access_token: step.api_token.as_ref().map(|t| t.access_token.clone()),
        }
    }

    fn into_step(self) -> Step {
        let mut step = self.step;
        if let (Some(token), Some(secret)) = (step.api_token.as_mut(), self.access_token) {
            token.access_token = secret;
        }
        step
    }
}

// ---------------------------------------------------------------------------
// Row access
// ---------------------------------------------------------------------------

fn read_steps<T>(steps: &T, id: ProposalId) -> Result<Vec<Step>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let (lower, upper) = step_range(id);
    let mut out = Vec::new();
    for entry in steps
        .range(lower.as_slice()..=upper.as_slice())
        .map_err(store_err)?
    {
        let (_, v) = entry.map_err(store_err)?;
        let row: StepRow = serde_json::from_slice(v.value())?;
        out.push(row.into_step());
    }
    Ok(out)
}

fn read_proposal<P, S>(proposals: &P, steps: &S, id: ProposalId) -> Result<Option<Proposal>>
where
    P: ReadableTable<&'static [u8], &'static [u8]>,
    S: ReadableTable<&'static [u8], &'static [u8]>,
{
    let Some(raw) = proposals.get(id.0.as_bytes().as_slice()).map_err(store_err)? else {
        return Ok(None);
    };
    let row: ProposalRow = serde_json::from_slice(raw.value())?;
    let rows = read_steps(steps, id)?;
    let tree = if rows.is_empty() {
        None
    } else {
        Some(StepTree::from_steps(rows)?)
    };
    Ok(Some(Proposal::from_parts(
        row.id,
        row.requester,
        row.created_at,
        row.updated_at,
        row.completed_at,
        tree,
    )))
}

fn step_keys(
    steps: &Table<'_, &'static [u8], &'static [u8]>,
    id: ProposalId,
) -> Result<Vec<Vec<u8>>> {
    let (lower, upper) = step_range(id);
    let mut keys = Vec::new();
    for entry in steps
        .range(lower.as_slice()..=upper.as_slice())
        .map_err(store_err)?
    {
        let (k, _) = entry.map_err(store_err)?;
        keys.push(k.value().to_vec());
    }
    Ok(keys)
}

/// Write `proposal` back, removing rows for steps that were in `before` but
/// are no longer in the tree.
fn write_proposal(
    proposals: &mut Table<'_, &'static [u8], &'static [u8]>,
    steps: &mut Table<'_, &'static [u8], &'static [u8]>,
    proposal: &Proposal,
    before: &HashSet<StepId>,
) -> Result<()> {
    let header = serde_json::to_vec(&ProposalRow::from(proposal))?;
    proposals
        .insert(proposal.id.0.as_bytes().as_slice(), header.as_slice())
        .map_err(store_err)?;

    let now = proposal.step_ids();
    for gone in before.difference(&now) {
        steps
            .remove(step_key(proposal.id, *gone).as_slice())
            .map_err(store_err)?;
    }
    for step in proposal.steps() {
        let value = serde_json::to_vec(&StepRow::new(step))?;
        steps
            .insert(step_key(proposal.id, step.id).as_slice(), value.as_slice())
            .map_err(store_err)?;
    }
    Ok(())
}

fn apply_update<T>(
    wt: &WriteTransaction,
    id: ProposalId,
    f: impl FnOnce(&mut Proposal) -> Result<T>,
) -> Result<(Proposal, T)> {
    let mut proposals = wt.open_table(PROPOSALS).map_err(store_err)?;
    let mut steps = wt.open_table(STEPS).map_err(store_err)?;
    let mut proposal = read_proposal(&proposals, &steps, id)?
        .ok_or_else(|| ApprovalError::ProposalNotFound(id.to_string()))?;
    let before = proposal.step_ids();
    let out = f(&mut proposal)?;
    write_proposal(&mut proposals, &mut steps, &proposal, &before)?;
    Ok((proposal, out))
}

fn apply_delete(wt: &WriteTransaction, id: ProposalId) -> Result<()> {
    let mut proposals = wt.open_table(PROPOSALS).map_err(store_err)?;
    let mut steps = wt.open_table(STEPS).map_err(store_err)?;
    let existed = proposals
        .remove(id.0.as_bytes().as_slice())
        .map_err(store_err)?
        .is_some();
    if !existed {
        return Err(ApprovalError::ProposalNotFound(id.to_string()));
    }
    for key in step_keys(&steps, id)? {
        steps.remove(key.as_slice()).map_err(store_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ProposalStore
// ---------------------------------------------------------------------------

pub struct ProposalStore {
    db: Database,
}

impl ProposalStore {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(PROPOSALS).map_err(store_err)?;
        wt.open_table(STEPS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    /// Persist a new proposal with whatever tree it already has.
    pub fn insert(&self, proposal: &Proposal) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut proposals = wt.open_table(PROPOSALS).map_err(store_err)?;
            let mut steps = wt.open_table(STEPS).map_err(store_err)?;
            write_proposal(&mut proposals, &mut steps, proposal, &HashSet::new())?;
        }
        wt.commit().map_err(store_err)?;
        tracing::debug!(proposal = %proposal.id, steps = proposal.steps().len(), "stored proposal");
        Ok(())
    }

    pub fn load(&self, id: ProposalId) -> Result<Proposal> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let proposals = rt.open_table(PROPOSALS).map_err(store_err)?;
        let steps = rt.open_table(STEPS).map_err(store_err)?;
        read_proposal(&proposals, &steps, id)?
            .ok_or_else(|| ApprovalError::ProposalNotFound(id.to_string()))
    }

    /// All proposals, newest first.
    pub fn list(&self) -> Result<Vec<Proposal>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let proposals = rt.open_table(PROPOSALS).map_err(store_err)?;
        let steps = rt.open_table(STEPS).map_err(store_err)?;

        let mut ids = Vec::new();
        for entry in proposals.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            let row: ProposalRow = serde_json::from_slice(v.value())?;
            ids.push(row.id);
        }

        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = read_proposal(&proposals, &steps, id)? {
                result.push(p);
            }
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    /// Load, change and write back a proposal in one transaction. The change
    /// is committed only if `f` succeeds.
    pub fn update<T>(
        &self,
        id: ProposalId,
        f: impl FnOnce(&mut Proposal) -> Result<T>,
    ) -> Result<(Proposal, T)> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let result = apply_update(&wt, id, f);
        match result {
            Ok(done) => {
                wt.commit().map_err(store_err)?;
                Ok(done)
            }
            Err(e) => {
                wt.abort().map_err(store_err)?;
                Err(e)
            }
        }
    }

    /// Remove a proposal and every step row it owns.
    pub fn delete(&self, id: ProposalId) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let result = apply_delete(&wt, id);
        match result {
            Ok(()) => {
                wt.commit().map_err(store_err)?;
                tracing::info!(proposal = %id, "deleted proposal");
                Ok(())
            }
            Err(e) => {
                wt.abort().map_err(store_err)?;
                Err(e)
            }
        }
    }

    /// Number of persisted step rows for `id`.
    pub fn step_rows(&self, id: ProposalId) -> Result<usize> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let steps = rt.open_table(STEPS).map_err(store_err)?;
        Ok(read_steps(&steps, id)?.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
