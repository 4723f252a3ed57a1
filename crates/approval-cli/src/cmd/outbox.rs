use crate::output::{print_json, print_table};
use anyhow::Context;
use approval_core::{dispatch::OutboxSink, paths, types::UserId};
use std::path::Path;

pub fn run(root: &Path, recipient: Option<&str>, json: bool) -> anyhow::Result<()> {
    let recipient = recipient.map(UserId::parse).transpose()?;
    let outbox = OutboxSink::new(paths::outbox_path(root));
    let mut sent = outbox.read_all().context("failed to read outbox")?;
    if let Some(r) = &recipient {
        sent.retain(|n| &n.recipient == r);
    }

    if json {
        print_json(&sent)?;
        return Ok(());
    }
    if sent.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }
    let rows = sent
        .iter()
        .map(|n| {
            vec![
                n.recipient.to_string(),
                n.event.event_type().to_string(),
                n.event.proposal_id().to_string(),
            ]
        })
        .collect();
    print_table(&["RECIPIENT", "EVENT", "PROPOSAL"], rows);
    Ok(())
}
