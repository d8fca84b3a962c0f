//! In-process wide-column store.
//!
//! Tables are ordered maps from row key to cells, guarded by one `RwLock`.
//! Scans hold the read lock for their duration, bulk writes the write lock.
//! Used by the stress binary when no external store is configured and by the
//! tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};
use wideseries_core::RowKey;

use crate::error::{ClientError, Result};
use crate::store::{AdminStore, Cell, Mutation, Row, RowError, WideColumnStore};

type Cells = BTreeMap<(String, Bytes), Bytes>;

#[derive(Debug, Default)]
struct MemoryTable {
    families: HashSet<String>,
    rows: BTreeMap<RowKey, Cells>,
}

/// Thread-safe in-memory implementation of both store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table, 0 if it does not exist.
    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Overwrite a raw cell without going through a mutation. Lets callers
    /// plant data the codec would never produce.
    pub async fn put_raw(
        &self,
        table: &str,
        row_key: RowKey,
        family: &str,
        qualifier: Bytes,
        value: Bytes,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| ClientError::TableNotFound(table.to_string()))?;
        t.rows
            .entry(row_key)
            .or_default()
            .insert((family.to_string(), qualifier), value);
        Ok(())
    }
}

#[async_trait]
impl WideColumnStore for MemoryStore {
    async fn bulk_apply(
        &self,
        table: &str,
        entries: Vec<(RowKey, Mutation)>,
    ) -> Result<Vec<RowError>> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| ClientError::TableNotFound(table.to_string()))?;

        let mut row_errors = Vec::new();
        for (index, (row_key, mutation)) in entries.into_iter().enumerate() {
            // A row is rejected whole if any of its cells names an unknown family
            if let Some(cell) = mutation
                .cells()
                .iter()
                .find(|c| !t.families.contains(&c.family))
            {
                let missing = ClientError::FamilyNotFound {
                    table: table.to_string(),
                    family: cell.family.clone(),
                };
                row_errors.push(RowError {
                    index,
                    row_key,
                    message: missing.to_string(),
                });
                continue;
            }

            let row = t.rows.entry(row_key).or_default();
            for cell in mutation.cells() {
                row.insert(
                    (cell.family.clone(), cell.qualifier.clone()),
                    cell.value.clone(),
                );
            }
        }

        Ok(row_errors)
    }

    async fn scan_range(
        &self,
        table: &str,
        begin: &RowKey,
        end: &RowKey,
        visitor: &mut (dyn FnMut(Row) -> bool + Send),
    ) -> Result<()> {
        let tables = self.tables.read().await;
        let t = tables
            .get(table)
            .ok_or_else(|| ClientError::TableNotFound(table.to_string()))?;

        // BTreeMap::range panics on an inverted range
        if begin >= end {
            return Ok(());
        }

        for (key, cells) in t.rows.range(begin.clone()..end.clone()) {
            let row = Row {
                key: key.clone(),
                cells: cells
                    .iter()
                    .map(|((family, qualifier), value)| Cell {
                        family: family.clone(),
                        qualifier: qualifier.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            };
            if !visitor(row) {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AdminStore for MemoryStore {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(name) {
            return Err(ClientError::Store(format!("table '{}' already exists", name)));
        }
        tables.insert(name.to_string(), MemoryTable::default());
        info!(table = name, "Created table");
        Ok(())
    }

    async fn create_column_family(&self, table: &str, family: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| ClientError::TableNotFound(table.to_string()))?;
        if !t.families.insert(family.to_string()) {
            debug!(table, family, "Column family already exists");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CELL_TIMESTAMP, COLUMN_FAMILY, COLUMN_QUALIFIER};

    async fn store_with_table() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("t").await.unwrap();
        store.create_column_family("t", COLUMN_FAMILY).await.unwrap();
        store
    }

    fn mutation(value: &'static [u8]) -> Mutation {
        let mut m = Mutation::new();
        m.set(COLUMN_FAMILY, COLUMN_QUALIFIER, CELL_TIMESTAMP, value);
        m
    }

    async fn scan_all(store: &MemoryStore, begin: &str, end: &str) -> Vec<Row> {
        let mut rows = Vec::new();
        store
            .scan_range("t", &RowKey::from(begin), &RowKey::from(end), &mut |row| {
                rows.push(row);
                true
            })
            .await
            .unwrap();
        rows
    }

    #[tokio::test]
    async fn test_bulk_apply_overwrites() {
        let store = store_with_table().await;

        store
            .bulk_apply("t", vec![(RowKey::from("a_1"), mutation(b"x"))])
            .await
            .unwrap();
        store
            .bulk_apply("t", vec![(RowKey::from("a_1"), mutation(b"y"))])
            .await
            .unwrap();

        let rows = scan_all(&store, "a", "b").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells.len(), 1);
        assert_eq!(rows[0].value("0", b"0").unwrap().as_ref(), b"y");
    }

    #[tokio::test]
    async fn test_unknown_family_is_row_error() {
        let store = store_with_table().await;
        let mut bad = Mutation::new();
        bad.set("nope", COLUMN_QUALIFIER, CELL_TIMESTAMP, &b"x"[..]);

        let errors = store
            .bulk_apply(
                "t",
                vec![
                    (RowKey::from("a_1"), mutation(b"1")),
                    (RowKey::from("a_2"), bad),
                    (RowKey::from("a_3"), mutation(b"3")),
                ],
            )
            .await
            .unwrap();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 1);
        assert_eq!(
            errors[0].message,
            "Column family 'nope' does not exist in table 't'"
        );
        assert_eq!(store.row_count("t").await, 2);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let store = MemoryStore::new();
        let err = store
            .bulk_apply("missing", vec![(RowKey::from("a_1"), mutation(b"1"))])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_scan_is_half_open_and_ordered() {
        let store = store_with_table().await;
        let entries = ["a_3", "a_1", "a_2", "b_1"]
            .iter()
            .map(|k| (RowKey::from(*k), mutation(b"v")))
            .collect();
        store.bulk_apply("t", entries).await.unwrap();

        let keys: Vec<String> = scan_all(&store, "a_1", "a_3")
            .await
            .into_iter()
            .map(|r| r.key.into_string())
            .collect();
        assert_eq!(keys, vec!["a_1", "a_2"]);

        assert!(scan_all(&store, "a_3", "a_1").await.is_empty());
        assert!(scan_all(&store, "a_2", "a_2").await.is_empty());
    }

    #[tokio::test]
    async fn test_visitor_can_stop_early() {
        let store = store_with_table().await;
        let entries = (0..10)
            .map(|i| (RowKey::from(format!("a_{}", i)), mutation(b"v")))
            .collect();
        store.bulk_apply("t", entries).await.unwrap();

        let mut seen = 0;
        store
            .scan_range("t", &RowKey::from("a"), &RowKey::from("b"), &mut |_| {
                seen += 1;
                seen < 3
            })
            .await
            .unwrap();
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let store = MemoryStore::new();
        store.create_table("b").await.unwrap();
        store.create_table("a").await.unwrap();
        assert_eq!(store.list_tables().await.unwrap(), vec!["a", "b"]);

        assert!(store.create_table("a").await.is_err());
        store.create_column_family("a", "0").await.unwrap();
        store.create_column_family("a", "0").await.unwrap();
        assert!(matches!(
            store.create_column_family("zzz", "0").await,
            Err(ClientError::TableNotFound(_))
        ));
    }
}
