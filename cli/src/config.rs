use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::warn;

use macrotrack_core::db::PoolSettings;

pub const DEFAULT_OFF_URL: &str = "https://world.openfoodfacts.org";

pub struct Config {
    pub db_path: PathBuf,
    pub pool: PoolSettings,
    pub off_base_url: String,
}

impl Config {
    /// Resolve settings from the environment. `db_override` (the `--db`
    /// flag) wins over `MACROTRACK_DB`, which wins over the data directory.
    pub fn load(db_override: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_override.or_else(|| env::var_os("MACROTRACK_DB").map(PathBuf::from)) {
            Some(path) => path,
            None => {
                let proj_dirs = ProjectDirs::from("", "", "macrotrack")
                    .context("Could not determine home directory")?;
                let data_dir = proj_dirs.data_dir().to_path_buf();
                std::fs::create_dir_all(&data_dir).with_context(|| {
                    format!("Failed to create data directory: {}", data_dir.display())
                })?;
                data_dir.join("macrotrack.db")
            }
        };

        let pool = pool_settings(
            env::var("MACROTRACK_POOL_SIZE").ok(),
            env::var("MACROTRACK_POOL_TIMEOUT_SECS").ok(),
        );

        let off_base_url = env::var("MACROTRACK_OFF_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_OFF_URL.to_string());

        Ok(Config {
            db_path,
            pool,
            off_base_url,
        })
    }
}

/// Pool size and acquire timeout from their raw env values. Both must be
/// positive; zero falls back to the default like any other invalid value.
fn pool_settings(size: Option<String>, timeout_secs: Option<String>) -> PoolSettings {
    let defaults = PoolSettings::default();
    let max_size = positive(
        "MACROTRACK_POOL_SIZE",
        parse_or("MACROTRACK_POOL_SIZE", size, defaults.max_size),
        defaults.max_size,
    );
    let timeout = positive(
        "MACROTRACK_POOL_TIMEOUT_SECS",
        parse_or(
            "MACROTRACK_POOL_TIMEOUT_SECS",
            timeout_secs,
            defaults.acquire_timeout.as_secs(),
        ),
        defaults.acquire_timeout.as_secs(),
    );
    PoolSettings {
        max_size,
        acquire_timeout: Duration::from_secs(timeout),
    }
}

/// Parse an env value, falling back to `default` when it is unset or invalid.
fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value '{raw}': {e}; using default {default}");
            default
        }),
    }
}

fn positive<T>(key: &str, value: T, default: T) -> T
where
    T: Default + PartialEq + Display,
{
    if value == T::default() {
        warn!("{key} must be greater than 0; using default {default}");
        default
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_missing_uses_default() {
        assert_eq!(parse_or("MACROTRACK_TEST_UNSET_VAR", None, 8_u32), 8);
    }

    #[test]
    fn test_parse_or_invalid_uses_default() {
        assert_eq!(parse_or("MACROTRACK_POOL_SIZE", Some("lots".into()), 8_u32), 8);
        assert_eq!(parse_or("MACROTRACK_POOL_SIZE", Some(" 4 ".into()), 8_u32), 4);
    }

    #[test]
    fn test_zero_pool_values_fall_back_to_defaults() {
        let defaults = PoolSettings::default();
        let pool = pool_settings(Some("0".into()), Some("0".into()));
        assert_eq!(pool.max_size, defaults.max_size);
        assert_eq!(pool.acquire_timeout, defaults.acquire_timeout);

        let pool = pool_settings(Some("3".into()), Some("12".into()));
        assert_eq!(pool.max_size, 3);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(12));

        let pool = pool_settings(None, None);
        assert_eq!(pool.max_size, defaults.max_size);
    }

    #[test]
    fn test_db_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.db");
        let config = Config::load(Some(path.clone())).unwrap();
        assert_eq!(config.db_path, path);
        assert!(config.pool.max_size >= 1);
    }
}
