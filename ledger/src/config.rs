use chrono::Duration;

/// Timing knobs for the reservation ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Lifetime of a freshly minted hold.
    pub reservation_timeout: Duration,

    /// Upper bound on successful `extend` calls per hold.
    pub max_extensions: u32,

    /// New expiry is `now + extension_increment` on every extension.
    pub extension_increment: Duration,

    /// Cadence of the expiry sweep.
    pub sweep_interval: Duration,

    /// How long a hold stays readable in the store after it closed or lapsed.
    pub retention: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reservation_timeout: Duration::minutes(15),
            max_extensions: 3,
            extension_increment: Duration::minutes(15),
            sweep_interval: Duration::minutes(5),
            retention: Duration::minutes(60),
        }
    }
}

impl LedgerConfig {
    /// Sweep cadence as a std duration for tokio timers.
    pub fn sweep_period(&self) -> std::time::Duration {
        self.sweep_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(300))
    }
}
