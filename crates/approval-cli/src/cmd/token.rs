use crate::output::print_json;
use anyhow::Context;
use approval_core::{proposal::ProposalId, service::ApprovalService, types::UserId};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum TokenSubcommand {
    /// Issue a one-time approval token for a user's step
    Issue {
        id: String,
        /// Whose step the token completes
        #[arg(long = "for")]
        user: String,
    },
}

pub fn run(root: &Path, subcmd: TokenSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TokenSubcommand::Issue { id, user } => issue(root, &id, &user, json),
    }
}

fn issue(root: &Path, id: &str, user: &str, json: bool) -> anyhow::Result<()> {
    let id: ProposalId = id.parse()?;
    let user = UserId::parse(user)?;
    let service = ApprovalService::open(root).context("failed to open approvals")?;
    let (step, token) = service
        .issue_token(id, &user)
        .with_context(|| format!("failed to issue token for '{user}'"))?;

    if json {
        print_json(&serde_json::json!({
            "proposal_id": id,
            "step_id": step,
            "access_token": token.access_token,
            "expires_at": token.expires_at,
        }))?;
    } else {
        println!("{}", token.access_token);
        println!("  step:    {step}");
        println!("  expires: {}", token.expires_at.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}
