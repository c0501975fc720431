use std::str::FromStr;

use chrono::Duration;
use ledger::LedgerConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Pool size. Must be 1 for `sqlite::memory:`.
    pub db_max_connections: u32,

    // =========================
    // Reservation configuration
    // =========================
    /// Hold lifetime, extension policy, sweep cadence and retention.
    pub ledger: LedgerConfig,

    /// How often rows whose TTL elapsed are physically deleted.
    pub purge_interval: std::time::Duration,

    /// Currency for newly created carts.
    pub default_currency: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values keep their default.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = LedgerConfig::default();
        let minutes = |key: &str, default: Duration| {
            positive_or(&var, key, default.num_minutes())
                .and_then(Duration::try_minutes)
                .unwrap_or(default)
        };

        let ledger = LedgerConfig {
            reservation_timeout: minutes("RESERVATION_TIMEOUT_MINUTES", defaults.reservation_timeout),
            max_extensions: parse_or(&var, "RESERVATION_MAX_EXTENSIONS", defaults.max_extensions)
                .unwrap_or(defaults.max_extensions),
            extension_increment: minutes("RESERVATION_EXTENSION_MINUTES", defaults.extension_increment),
            sweep_interval: minutes("RESERVATION_SWEEP_INTERVAL_MINUTES", defaults.sweep_interval),
            retention: minutes("RESERVATION_RETENTION_MINUTES", defaults.retention),
        };

        Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite://cartsync_dev.db".to_string()),
            db_max_connections: positive_or(&var, "DATABASE_MAX_CONNECTIONS", 8).unwrap_or(8),
            ledger,
            purge_interval: std::time::Duration::from_secs(
                positive_or(&var, "RESERVATION_PURGE_INTERVAL_SECS", 900).unwrap_or(900),
            ),
            default_currency: var("DEFAULT_CURRENCY").unwrap_or_else(|| "USD".to_string()),
        }
    }
}

/// `default` when unset, `None` (with a warning) when set but unparseable.
fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Option<T> {
    let Some(raw) = var(key) else {
        return Some(default);
    };

    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}

/// Like [`parse_or`], but zero and negative values are rejected too.
fn positive_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    parse_or(var, key, default).filter(|v| {
        let usable = *v > T::default();
        if !usable {
            tracing::warn!(key, "ignoring non-positive configuration value");
        }
        usable
    })
}
