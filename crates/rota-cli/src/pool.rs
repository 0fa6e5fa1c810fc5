//! Wires the engine to its default observers.

use std::sync::Arc;

use anyhow::{Context, Result};

use rota_db::{ActivityLog, AllocationEngine, Database, ParticipantLedger};

use crate::Config;

/// The engine plus the activity feed and participant ledger it reports to.
///
/// Each part has its own connection to the same database file.
pub struct Pool {
    pub engine: AllocationEngine,
    pub activity: Arc<ActivityLog>,
    pub ledger: Arc<ParticipantLedger>,
}

impl Pool {
    /// Opens the database named in `config`, creating its directory if needed.
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.database_path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }

        let open = || {
            Database::open_with_busy_timeout(path, config.busy_timeout())
                .with_context(|| format!("failed to open {}", path.display()))
        };
        let activity = Arc::new(ActivityLog::new(open()?));
        let ledger = Arc::new(ParticipantLedger::new(open()?));
        let engine = AllocationEngine::new(open()?, config.claim_ttl())
            .with_sink(activity.clone())
            .with_participant_stats(ledger.clone());

        Ok(Self {
            engine,
            activity,
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_missing_directory() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("nested/dir/rota.db"),
            claim_ttl_hours: 18,
            busy_timeout_ms: 1000,
        };

        let mut pool = Pool::open(&config).unwrap();
        assert!(config.database_path.exists());

        pool.engine.claim(1, "Ali").unwrap();
        assert_eq!(pool.activity.recent(10).unwrap().len(), 1);
        assert!(
            pool.ledger
                .profile(&rota_core::HolderName::new("ali").unwrap())
                .unwrap()
                .is_some()
        );
    }
}
