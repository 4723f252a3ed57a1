use anyhow::Context;
use approval_core::{config::Config, paths, service::ApprovalService};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing approvals in: {}", root.display());

    let created = ApprovalService::init(root)
        .with_context(|| format!("failed to initialize {}", root.display()))?;
    if created {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    let cfg = Config::load(root).context("failed to load config")?;
    println!("  database: {}", paths::database_path(root, &cfg).display());
    println!("  dispatch: {} via {}", cfg.dispatch, cfg.sink);
    for w in cfg.validate() {
        eprintln!("  {:?}: {}", w.level, w.message);
    }
    Ok(())
}
