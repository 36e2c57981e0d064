use std::sync::Arc;

use hivemind::domain::ports::Store;
use hivemind::infrastructure::database::SqliteStore;

/// Create an in-memory SQLite store with migrations applied.
#[allow(dead_code)]
pub async fn setup_sqlite_store() -> Arc<dyn Store> {
    let store = SqliteStore::open_in_memory()
        .await
        .expect("failed to open in-memory sqlite store");
    Arc::new(store)
}

/// Teardown the store.
#[allow(dead_code)]
pub async fn teardown_store(store: Arc<dyn Store>) {
    store.close().await;
}
