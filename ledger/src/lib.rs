pub mod config;
pub mod error;
pub mod ledger;
pub mod links;
pub mod model;
pub mod oracle;
pub mod store;
pub mod sweeper;

pub use config::LedgerConfig;
pub use error::LedgerError;
pub use ledger::{ReservationLedger, SweepReport};
