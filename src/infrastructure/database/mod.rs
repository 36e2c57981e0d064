//! Persistence infrastructure: connection pool, schema, and the two `Store`
//! implementations.

pub mod connection;
pub mod memory_store;
pub mod retry;
pub mod schema;
pub mod sqlite_store;

pub use connection::DatabaseConnection;
pub use memory_store::InMemoryStore;
pub use retry::with_retry;
pub use sqlite_store::SqliteStore;

use std::sync::Arc;

use crate::domain::ports::Store;

/// Open the durable store at `path`, downgrading to the in-memory store if
/// the backing engine is unavailable. The downgrade is announced once via a
/// warning; callers can distinguish the mode through `Store::is_persistent`.
pub async fn open_store(path: &str) -> Arc<dyn Store> {
    match SqliteStore::open(path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                kind = e.kind(),
                error = %e,
                "embedded database unavailable, falling back to in-memory store"
            );
            Arc::new(InMemoryStore::new())
        }
    }
}
