//! Environment-driven server configuration.

use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use shadow_wallet_state::{AdjustMode, Database, DEFAULT_CONFIRMATION_DELAY, IN_MEMORY_LOCATION};
use tracing::warn;

pub const LISTEN_ADDR_ENV: &str = "SHADOW_WALLET_LISTEN_ADDR";
pub const DB_PATH_ENV: &str = "SHADOW_WALLET_DB_PATH";
pub const APP_NAME_ENV: &str = "SHADOW_WALLET_APP_NAME";
pub const WALLETCONNECT_PROJECT_ID_ENV: &str = "SHADOW_WALLET_WALLETCONNECT_PROJECT_ID";
pub const ENABLE_TESTNETS_ENV: &str = "SHADOW_WALLET_ENABLE_TESTNETS";
pub const CONFIRMATION_DELAY_ENV: &str = "SHADOW_WALLET_CONFIRMATION_DELAY_MS";
pub const ADJUST_MODE_ENV: &str = "SHADOW_WALLET_ADJUST_MODE";
pub const ENABLE_CORS_ENV: &str = "SHADOW_WALLET_ENABLE_CORS";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DB_PATH: &str = "data/shadow-wallet.db";
const DEFAULT_APP_NAME: &str = "ShadowWallet";

/// Where account and ledger data live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DbLocation {
    InMemory,
    Path(PathBuf),
}

impl DbLocation {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(IN_MEMORY_LOCATION) {
            DbLocation::InMemory
        } else {
            DbLocation::Path(PathBuf::from(trimmed))
        }
    }

    /// Builds the handle. A sled database is not opened until first use.
    pub fn database(&self) -> Database {
        match self {
            DbLocation::InMemory => Database::in_memory(),
            DbLocation::Path(path) => Database::persistent(path),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub listen_addr: String,
    pub db_location: DbLocation,
    pub app_name: String,
    pub walletconnect_project_id: Option<String>,
    pub enable_testnets: bool,
    pub confirmation_delay: Duration,
    pub adjust_mode: AdjustMode,
    pub enable_cors: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            db_location: DbLocation::Path(PathBuf::from(DEFAULT_DB_PATH)),
            app_name: DEFAULT_APP_NAME.into(),
            walletconnect_project_id: None,
            enable_testnets: true,
            confirmation_delay: DEFAULT_CONFIRMATION_DELAY,
            adjust_mode: AdjustMode::default(),
            enable_cors: true,
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`. Unparseable values fall back to the
    /// default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let confirmation_delay = parse_or(
            CONFIRMATION_DELAY_ENV,
            lookup(CONFIRMATION_DELAY_ENV),
            defaults.confirmation_delay.as_millis() as u64,
        );

        Self {
            listen_addr: lookup(LISTEN_ADDR_ENV).unwrap_or(defaults.listen_addr),
            db_location: lookup(DB_PATH_ENV)
                .map(|raw| DbLocation::parse(&raw))
                .unwrap_or(defaults.db_location),
            app_name: lookup(APP_NAME_ENV).unwrap_or(defaults.app_name),
            walletconnect_project_id: lookup(WALLETCONNECT_PROJECT_ID_ENV),
            enable_testnets: flag_or(
                ENABLE_TESTNETS_ENV,
                lookup(ENABLE_TESTNETS_ENV),
                defaults.enable_testnets,
            ),
            confirmation_delay: Duration::from_millis(confirmation_delay),
            adjust_mode: parse_or(ADJUST_MODE_ENV, lookup(ADJUST_MODE_ENV), defaults.adjust_mode),
            enable_cors: flag_or(ENABLE_CORS_ENV, lookup(ENABLE_CORS_ENV), defaults.enable_cors),
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(err) => {
            warn!(key, value = %raw, error = %err, fallback = %default, "invalid setting, using default");
            default
        }
    }
}

fn flag_or(key: &str, raw: Option<String>, default: bool) -> bool {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(key, value = %raw, fallback = default, "invalid flag, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> BackendConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BackendConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(
            config.db_location,
            DbLocation::Path(PathBuf::from("data/shadow-wallet.db"))
        );
        assert_eq!(config.app_name, "ShadowWallet");
        assert!(config.walletconnect_project_id.is_none());
        assert!(config.enable_testnets);
        assert_eq!(config.confirmation_delay, Duration::from_millis(2000));
        assert_eq!(config.adjust_mode, AdjustMode::Serialized);
        assert!(config.enable_cors);
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            (LISTEN_ADDR_ENV, "127.0.0.1:8080"),
            (DB_PATH_ENV, "memory"),
            (APP_NAME_ENV, "Shadow Test"),
            (WALLETCONNECT_PROJECT_ID_ENV, "wc-123"),
            (ENABLE_TESTNETS_ENV, "false"),
            (CONFIRMATION_DELAY_ENV, "50"),
            (ADJUST_MODE_ENV, "unserialized"),
            (ENABLE_CORS_ENV, "0"),
        ]);
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.db_location, DbLocation::InMemory);
        assert_eq!(config.app_name, "Shadow Test");
        assert_eq!(config.walletconnect_project_id.as_deref(), Some("wc-123"));
        assert!(!config.enable_testnets);
        assert_eq!(config.confirmation_delay, Duration::from_millis(50));
        assert_eq!(config.adjust_mode, AdjustMode::Unserialized);
        assert!(!config.enable_cors);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config(&[
            (CONFIRMATION_DELAY_ENV, "soon"),
            (ADJUST_MODE_ENV, "chaotic"),
            (ENABLE_TESTNETS_ENV, "maybe"),
            (WALLETCONNECT_PROJECT_ID_ENV, "  "),
        ]);
        assert_eq!(config.confirmation_delay, Duration::from_millis(2000));
        assert_eq!(config.adjust_mode, AdjustMode::Serialized);
        assert!(config.enable_testnets);
        assert!(config.walletconnect_project_id.is_none());
    }

    #[test]
    fn in_memory_location_builds_volatile_database() {
        assert!(!DbLocation::parse("MEMORY").database().is_persistent());
        assert!(DbLocation::parse("/tmp/wallet.db").database().is_persistent());
    }
}
