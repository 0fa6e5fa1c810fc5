//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use rota_core::ClaimTtl;
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// How long a claim holds its slot before it lapses.
    pub claim_ttl_hours: u32,
    /// How long to wait for a competing writer before giving up.
    pub busy_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("rota.db"),
            claim_ttl_hours: ClaimTtl::default().hours(),
            busy_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // ROTA_DATABASE_PATH, ROTA_CLAIM_TTL_HOURS, ...
        figment = figment.merge(Env::prefixed("ROTA_"));

        figment.extract()
    }

    /// The claim TTL, clamped into the supported range.
    pub fn claim_ttl(&self) -> ClaimTtl {
        ClaimTtl::new(self.claim_ttl_hours).unwrap_or_else(|err| {
            let clamped = ClaimTtl::clamped(self.claim_ttl_hours);
            tracing::warn!(error = %err, using = %clamped, "claim_ttl_hours out of range");
            clamped
        })
    }

    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Returns the platform-specific config directory for rota.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rota"))
}

/// Returns the platform-specific data directory for rota.
///
/// On Linux: `~/.local/share/rota`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("rota"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirs_data_path_ends_with_rota() {
        let path = dirs_data_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "rota");
    }

    #[test]
    fn default_config_uses_data_dir_for_db() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.database_path, data_dir.join("rota.db"));
        assert_eq!(config.claim_ttl_hours, 18);
        assert_eq!(config.busy_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("rota.toml");
        std::fs::write(
            &path,
            "database_path = \"/srv/rota/pool.db\"\nclaim_ttl_hours = 6\n",
        )
        .unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/srv/rota/pool.db"));
        assert_eq!(config.claim_ttl().hours(), 6);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn out_of_range_ttl_is_clamped() {
        let mut config = Config::default();
        config.claim_ttl_hours = 0;
        assert_eq!(config.claim_ttl().hours(), 1);
        config.claim_ttl_hours = 1000;
        assert_eq!(config.claim_ttl().hours(), 168);
    }
}
