mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{proposal::ProposalSubcommand, token::TokenSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "approvals",
    about = "Route proposals through serial, parallel and threshold approval trees",
    version,
    propagate_version = true
)]
struct Cli {
    /// Approvals root (default: auto-detect from .approvals/)
    #[arg(long, global = true, env = "APPROVALS_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .approvals/ with a default config and database
    Init,

    /// Create, inspect, reroute and delete proposals
    Proposal {
        #[command(subcommand)]
        subcommand: ProposalSubcommand,
    },

    /// Approve a proposal as a user or with a one-time token
    Approve {
        id: String,
        /// Approving user (a delegate may approve for their principal)
        #[arg(long = "as", conflicts_with = "token")]
        user: Option<String>,
        /// One-time approval token
        #[arg(long)]
        token: Option<String>,
    },

    /// Manage one-time approval tokens
    Token {
        #[command(subcommand)]
        subcommand: TokenSubcommand,
    },

    /// Show the next approver a proposal is waiting on
    Next { id: String },

    /// Show notifications written to the outbox
    Outbox {
        /// Only notifications for this recipient
        #[arg(long = "for")]
        recipient: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Proposal { subcommand } => cmd::proposal::run(&root, subcommand, cli.json),
        Commands::Approve { id, user, token } => {
            cmd::approve::run(&root, &id, user.as_deref(), token.as_deref(), cli.json)
        }
        Commands::Token { subcommand } => cmd::token::run(&root, subcommand, cli.json),
        Commands::Next { id } => cmd::next::run(&root, &id, cli.json),
        Commands::Outbox { recipient } => cmd::outbox::run(&root, recipient.as_deref(), cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
