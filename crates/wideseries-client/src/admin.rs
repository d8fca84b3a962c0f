//! One-shot table bootstrap.

use tracing::info;

use crate::error::Result;
use crate::store::AdminStore;

/// Create `table` with column family `family` unless the table already exists.
///
/// Returns `true` when the table was created.
pub async fn ensure_table(admin: &dyn AdminStore, table: &str, family: &str) -> Result<bool> {
    let tables = admin.list_tables().await?;
    if tables.iter().any(|t| t == table) {
        info!(table, "Table exists");
        return Ok(false);
    }

    admin.create_table(table).await?;
    admin.create_column_family(table, family).await?;
    info!(table, family, "Table created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::store::COLUMN_FAMILY;

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let store = MemoryStore::new();

        assert!(ensure_table(&store, "sec", COLUMN_FAMILY).await.unwrap());
        assert!(!ensure_table(&store, "sec", COLUMN_FAMILY).await.unwrap());
        assert_eq!(store.list_tables().await.unwrap(), vec!["sec"]);
    }
}
