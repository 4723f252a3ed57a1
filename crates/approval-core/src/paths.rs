use crate::config::Config;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const APPROVALS_DIR: &str = ".approvals";
pub const CONFIG_FILE: &str = ".approvals/config.yaml";
pub const OUTBOX_FILE: &str = ".approvals/outbox.jsonl";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn approvals_dir(root: &Path) -> PathBuf {
    root.join(APPROVALS_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn outbox_path(root: &Path) -> PathBuf {
    root.join(OUTBOX_FILE)
}

/// The configured database file. Relative paths live under `.approvals/`.
pub fn database_path(root: &Path, cfg: &Config) -> PathBuf {
    let db = Path::new(&cfg.database);
    if db.is_absolute() {
        db.to_path_buf()
    } else {
        approvals_dir(root).join(db)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.approvals/config.yaml")
        );
        assert_eq!(
            outbox_path(root),
            PathBuf::from("/tmp/proj/.approvals/outbox.jsonl")
        );
        assert_eq!(
            database_path(root, &Config::new()),
            PathBuf::from("/tmp/proj/.approvals/approvals.db")
        );
    }

    #[test]
    fn absolute_database_kept() {
        let mut cfg = Config::new();
        cfg.database = "/var/lib/approvals/main.db".to_string();
        assert_eq!(
            database_path(Path::new("/tmp/proj"), &cfg),
            PathBuf::from("/var/lib/approvals/main.db")
        );
    }
}
