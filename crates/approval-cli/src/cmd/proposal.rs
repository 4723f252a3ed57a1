use crate::output::{print_json, print_table};
use anyhow::Context;
use approval_core::{
    proposal::{Proposal, ProposalId},
    service::ApprovalService,
    shape::StepShape,
    step::StepKind,
    types::UserId,
};
use clap::{Args, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ProposalSubcommand {
    /// Create a proposal and route it to its first approvers
    Create {
        /// Who is asking for approval
        #[arg(long)]
        requester: String,
        #[command(flatten)]
        tree: TreeArgs,
    },
    /// Show a proposal and its step tree
    Show { id: String },
    /// List proposals, newest first
    List,
    /// Assign a new step tree, keeping decisions already made
    Reroute {
        id: String,
        #[command(flatten)]
        tree: TreeArgs,
    },
    /// Delete a proposal and all of its steps
    Delete { id: String },
}

/// Where the desired step tree comes from.
#[derive(Args)]
pub struct TreeArgs {
    /// YAML step tree file ("-" reads stdin)
    #[arg(long, short = 'f', conflicts_with_all = ["serial", "parallel"])]
    file: Option<PathBuf>,
    /// Approvers in order, comma-separated
    #[arg(long, value_delimiter = ',', conflicts_with = "parallel")]
    serial: Vec<String>,
    /// Approvers asked at once, comma-separated
    #[arg(long, value_delimiter = ',')]
    parallel: Vec<String>,
    /// With --parallel: approvals needed (default: all)
    #[arg(long, requires = "parallel")]
    min: Option<usize>,
    /// Observers appended to --serial or --parallel, comma-separated
    #[arg(long, value_delimiter = ',')]
    observers: Vec<String>,
}

impl TreeArgs {
    fn shape(&self) -> anyhow::Result<StepShape> {
        if let Some(path) = &self.file {
            let data = if path.as_os_str() == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("failed to read stdin")?;
                buf
            } else {
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?
            };
            return StepShape::from_yaml(&data).context("invalid step tree");
        }

        let users = |names: &[String]| -> anyhow::Result<Vec<UserId>> {
            names
                .iter()
                .map(|n| UserId::parse(n.as_str()).map_err(anyhow::Error::from))
                .collect()
        };
        let observers = users(&self.observers)?.into_iter().map(StepShape::observer);

        let shape = if !self.serial.is_empty() {
            let mut steps: Vec<StepShape> = users(&self.serial)?
                .into_iter()
                .map(StepShape::approval)
                .collect();
            steps.extend(observers);
            StepShape::serial(steps)
        } else if !self.parallel.is_empty() {
            let mut steps: Vec<StepShape> = users(&self.parallel)?
                .into_iter()
                .map(StepShape::approval)
                .collect();
            steps.extend(observers);
            match self.min {
                Some(k) => StepShape::threshold(k, steps),
                None => StepShape::parallel(steps),
            }
        } else {
            anyhow::bail!("a step tree is required: use --file, --serial or --parallel");
        };
        Ok(shape)
    }
}

pub fn run(root: &Path, subcmd: ProposalSubcommand, json: bool) -> anyhow::Result<()> {
    let service = ApprovalService::open(root).context("failed to open approvals")?;
    match subcmd {
        ProposalSubcommand::Create { requester, tree } => {
            create(&service, &requester, &tree, json)
        }
        ProposalSubcommand::Show { id } => show(&service, &id, json),
        ProposalSubcommand::List => list(&service, json),
        ProposalSubcommand::Reroute { id, tree } => reroute(&service, &id, &tree, json),
        ProposalSubcommand::Delete { id } => delete(&service, &id, json),
    }
}

fn create(
    service: &ApprovalService,
    requester: &str,
    tree: &TreeArgs,
    json: bool,
) -> anyhow::Result<()> {
    let requester = UserId::parse(requester)?;
    let shape = tree.shape()?;
    let proposal = service
        .create_proposal(requester, &shape)
        .context("failed to create proposal")?;

    if json {
        print_json(&proposal)?;
    } else {
        println!("Created proposal {}", proposal.id);
        print_tree(&proposal);
    }
    Ok(())
}

fn show(service: &ApprovalService, id: &str, json: bool) -> anyhow::Result<()> {
    let id: ProposalId = id.parse()?;
    let proposal = service
        .show(id)
        .with_context(|| format!("proposal '{id}' not found"))?;

    if json {
        print_json(&proposal)?;
        return Ok(());
    }
    println!("Proposal:  {}", proposal.id);
    println!("Requester: {}", proposal.requester);
    println!("Status:    {}", proposal.status());
    println!("Created:   {}", proposal.created_at.format("%Y-%m-%d %H:%M UTC"));
    if let Some(done) = proposal.completed_at {
        println!("Completed: {}", done.format("%Y-%m-%d %H:%M UTC"));
    }
    println!();
    print_tree(&proposal);
    Ok(())
}

fn list(service: &ApprovalService, json: bool) -> anyhow::Result<()> {
    let proposals = service.list().context("failed to list proposals")?;

    if json {
        let items: Vec<serde_json::Value> = proposals
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "requester": p.requester,
                    "status": p.status(),
                    "approvers": p.approvers(),
                    "created_at": p.created_at,
                })
            })
            .collect();
        print_json(&items)?;
        return Ok(());
    }

    if proposals.is_empty() {
        println!("No proposals. Run: approvals proposal create --requester <user> --serial a,b");
        return Ok(());
    }
    let rows = proposals
        .iter()
        .map(|p| {
            let approvers: Vec<&str> = p.approvers().iter().map(|u| u.as_str()).collect();
            vec![
                p.id.to_string(),
                p.requester.to_string(),
                p.status().to_string(),
                approvers.join(","),
            ]
        })
        .collect();
    print_table(&["ID", "REQUESTER", "STATUS", "APPROVERS"], rows);
    Ok(())
}

fn reroute(
    service: &ApprovalService,
    id: &str,
    tree: &TreeArgs,
    json: bool,
) -> anyhow::Result<()> {
    let id: ProposalId = id.parse()?;
    let shape = tree.shape()?;
    let (proposal, outcome) = service
        .reroute(id, &shape)
        .with_context(|| format!("failed to reroute proposal '{id}'"))?;

    if json {
        print_json(&serde_json::json!({
            "proposal": proposal,
            "outcome": outcome,
        }))?;
    } else if outcome.is_noop() {
        println!("Proposal {} already follows that tree.", proposal.id);
    } else {
        println!(
            "Rerouted {}: {} kept, {} created, {} deleted, {} activated",
            proposal.id,
            outcome.retained.len(),
            outcome.created.len(),
            outcome.deleted.len(),
            outcome.activated.len()
        );
        if outcome.completed_proposal() {
            println!("Proposal {} is now completed", proposal.id);
        }
        print_tree(&proposal);
    }
    Ok(())
}

fn delete(service: &ApprovalService, id: &str, json: bool) -> anyhow::Result<()> {
    let id: ProposalId = id.parse()?;
    service
        .delete(id)
        .with_context(|| format!("failed to delete proposal '{id}'"))?;

    if json {
        print_json(&serde_json::json!({ "id": id, "deleted": true }))?;
    } else {
        println!("Deleted proposal {id}");
    }
    Ok(())
}

fn print_tree(proposal: &Proposal) {
    let Some(tree) = proposal.tree() else {
        println!("(no steps)");
        return;
    };
    for (depth, step) in tree.walk() {
        let indent = "  ".repeat(depth);
        let label = match (&step.kind, step.responsible_party()) {
            (kind, Some(party)) => format!("{} {party}", kind.as_str()),
            (
                StepKind::Parallel {
                    min_children_needed: Some(k),
                },
                None,
            ) => format!("parallel (need {k})"),
            (kind, None) => kind.as_str().to_string(),
        };
        println!(
            "{indent}[{:<10}] {label}  {}",
            step.status.as_str(),
            step.id.short()
        );
    }
}
