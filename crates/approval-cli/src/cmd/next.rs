use crate::output::print_json;
use anyhow::Context;
use approval_core::{proposal::ProposalId, service::ApprovalService};
use std::path::Path;

pub fn run(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let id: ProposalId = id.parse()?;
    let service = ApprovalService::open(root).context("failed to open approvals")?;
    let next = service
        .next_pending_approval(id)
        .with_context(|| format!("proposal '{id}' not found"))?;

    if json {
        print_json(&next)?;
        return Ok(());
    }
    match next.as_ref().and_then(|s| s.responsible_party().map(|p| (s, p))) {
        Some((step, party)) => println!("{party} ({})", step.id),
        None => println!("No pending approvals."),
    }
    Ok(())
}
