//! Wide-Column Store Abstraction
//!
//! The pipeline talks to the backing store through two traits:
//!
//! - [`WideColumnStore`]: bulk mutation and ordered range scans, shared by
//!   every writer and query worker
//! - [`AdminStore`]: table and column family management, used once at startup
//!
//! Implementations must be safe for concurrent use; the pipeline holds them as
//! `Arc<dyn WideColumnStore>` and never locks around calls.
//!
//! ## Semantics
//!
//! - Writing a cell that already exists overwrites it. Duplicate samples are
//!   therefore idempotent.
//! - `bulk_apply` returns `Err` when the whole call failed and `Ok(row_errors)`
//!   otherwise. Rows not listed in `row_errors` are committed.
//! - `scan_range` visits rows in `[begin, end)` in row key order until the
//!   visitor returns `false`.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use wideseries_core::RowKey;

use crate::error::Result;

/// Column family every sample is written under.
pub const COLUMN_FAMILY: &str = "0";

/// Column qualifier of the single value in a per-second row.
pub const COLUMN_QUALIFIER: &[u8] = b"0";

/// Cell version timestamp. All writes use the same version so a rewrite of
/// the same cell replaces it.
pub const CELL_TIMESTAMP: i64 = 0;

/// Set one cell of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct SetCell {
    pub family: String,
    pub qualifier: Bytes,
    pub timestamp: i64,
    pub value: Bytes,
}

/// All cell writes for one row, applied together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    cells: Vec<SetCell>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp: i64,
        value: impl Into<Bytes>,
    ) -> &mut Self {
        self.cells.push(SetCell {
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            value: value.into(),
        });
        self
    }

    pub fn cells(&self) -> &[SetCell] {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// One stored cell as returned by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub family: String,
    pub qualifier: Bytes,
    pub value: Bytes,
}

/// A scanned row with its cells ordered by (family, qualifier).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: RowKey,
    pub cells: Vec<Cell>,
}

impl Row {
    /// Cells of one column family.
    pub fn family<'a>(&'a self, family: &'a str) -> impl Iterator<Item = &'a Cell> + 'a {
        self.cells.iter().filter(move |c| c.family == family)
    }

    /// Value of a single cell, if present.
    pub fn value(&self, family: &str, qualifier: &[u8]) -> Option<&Bytes> {
        self.cells
            .iter()
            .find(|c| c.family == family && c.qualifier.as_ref() == qualifier)
            .map(|c| &c.value)
    }
}

/// A row that failed inside an otherwise successful bulk call.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// Position of the row in the submitted entries
    pub index: usize,
    pub row_key: RowKey,
    pub message: String,
}

/// Data-plane operations against a wide-column store.
#[async_trait]
pub trait WideColumnStore: Send + Sync {
    /// Apply one mutation per row as a single bulk call.
    async fn bulk_apply(
        &self,
        table: &str,
        entries: Vec<(RowKey, Mutation)>,
    ) -> Result<Vec<RowError>>;

    /// Visit rows in `[begin, end)` in key order until `visitor` returns `false`.
    async fn scan_range(
        &self,
        table: &str,
        begin: &RowKey,
        end: &RowKey,
        visitor: &mut (dyn FnMut(Row) -> bool + Send),
    ) -> Result<()>;
}

/// Administrative operations, used once before the pipeline starts.
#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn create_table(&self, name: &str) -> Result<()>;

    async fn create_column_family(&self, table: &str, family: &str) -> Result<()>;
}

/// A store bound to one table name.
#[derive(Clone)]
pub struct Table {
    store: Arc<dyn WideColumnStore>,
    name: String,
}

impl Table {
    pub fn open(store: Arc<dyn WideColumnStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn apply_bulk(&self, entries: Vec<(RowKey, Mutation)>) -> Result<Vec<RowError>> {
        self.store.bulk_apply(&self.name, entries).await
    }

    pub async fn read_rows<F>(&self, begin: &RowKey, end: &RowKey, mut visitor: F) -> Result<()>
    where
        F: FnMut(Row) -> bool + Send,
    {
        self.store
            .scan_range(&self.name, begin, end, &mut visitor)
            .await
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_collects_cells() {
        let mut mutation = Mutation::new();
        assert!(mutation.is_empty());

        mutation
            .set(COLUMN_FAMILY, COLUMN_QUALIFIER, CELL_TIMESTAMP, vec![1u8, 2])
            .set(COLUMN_FAMILY, Bytes::from_static(b"q"), CELL_TIMESTAMP, Bytes::new());

        assert_eq!(mutation.cells().len(), 2);
        assert_eq!(mutation.cells()[0].qualifier.as_ref(), b"0");
        assert_eq!(mutation.cells()[0].value.as_ref(), &[1u8, 2]);
    }

    #[test]
    fn test_row_value_lookup() {
        let row = Row {
            key: RowKey::from("abc_1"),
            cells: vec![
                Cell {
                    family: "0".to_string(),
                    qualifier: Bytes::from_static(b"0"),
                    value: Bytes::from_static(b"v0"),
                },
                Cell {
                    family: "1".to_string(),
                    qualifier: Bytes::from_static(b"0"),
                    value: Bytes::from_static(b"v1"),
                },
            ],
        };

        assert_eq!(row.value("1", b"0").unwrap().as_ref(), b"v1");
        assert!(row.value("0", b"x").is_none());
        assert_eq!(row.family("0").count(), 1);
    }
}
