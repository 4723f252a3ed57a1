use crate::output::print_json;
use anyhow::Context;
use approval_core::{
    event::StepEvent, proposal::ProposalId, service::ApprovalService, types::UserId,
};
use std::path::Path;

pub fn run(
    root: &Path,
    id: &str,
    user: Option<&str>,
    token: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let id: ProposalId = id.parse()?;
    let service = ApprovalService::open(root).context("failed to open approvals")?;

    let (proposal, events) = match (user, token) {
        (_, Some(token)) => service
            .approve_with_token(id, token)
            .context("token approval failed")?,
        (Some(user), None) => {
            let user = UserId::parse(user)?;
            service
                .approve(id, &user)
                .with_context(|| format!("approval by '{user}' failed"))?
        }
        (None, None) => anyhow::bail!("either --as or --token is required"),
    };

    if json {
        print_json(&serde_json::json!({
            "proposal_id": proposal.id,
            "status": proposal.status(),
            "events": events,
        }))?;
        return Ok(());
    }
    for StepEvent { step_id, kind, .. } in &events {
        println!("{kind:?}: {step_id}");
    }
    println!("Proposal {} is {}", proposal.id, proposal.status());
    Ok(())
}
