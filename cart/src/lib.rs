pub mod error;
pub mod model;
pub mod repository;
pub mod resolver;
pub mod sync;

pub use error::SyncError;
pub use repository::{CartRepository, RepositoryCartLinks, SaveError, SqliteCartRepository};
pub use sync::{AddItemRequest, CartSyncService, SyncOutcome, SyncRequest};
