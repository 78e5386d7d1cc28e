//! Storage adapter boundary and the in-memory adapter.
//!
//! The gateway only needs flat-table access: run a predicate over one table,
//! insert a row, patch or delete the rows matching a predicate, and wrap it
//! all in (possibly nested) transactions.

use reactant_foundation::{Error, LtMap, Record, RecordId, Result, Value};
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::query::{MatchAtom, MatchExp};

/// A predicate over the flat columns of one table.
#[derive(Clone, Debug)]
pub struct TableQuery {
    /// Table name.
    pub table: String,
    /// Row filter; `None` selects every row.
    pub predicate: Option<MatchExp>,
}

impl TableQuery {
    /// Selects every row of `table`.
    #[must_use]
    pub fn all(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicate: None,
        }
    }

    /// Sets the row filter.
    #[must_use]
    pub fn with_predicate(mut self, predicate: MatchExp) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// Flat-table storage used by the record gateway.
///
/// Rows are returned in id order. Predicates only address top-level
/// columns.
pub trait StorageAdapter {
    /// Returns the rows matching the query.
    ///
    /// # Errors
    ///
    /// Adapter-specific failures.
    fn execute(&self, query: &TableQuery) -> Result<Vec<Record>>;

    /// Inserts a row, allocating its id. Returns the stored row.
    ///
    /// # Errors
    ///
    /// Adapter-specific failures.
    fn insert(&mut self, table: &str, row: Record) -> Result<Record>;

    /// Merges `patch` into every matching row. Returns `(old, new)` pairs.
    ///
    /// # Errors
    ///
    /// Adapter-specific failures.
    fn update(&mut self, table: &str, predicate: &MatchExp, patch: &Record) -> Result<Vec<(Record, Record)>>;

    /// Deletes every matching row. Returns the deleted rows.
    ///
    /// # Errors
    ///
    /// Adapter-specific failures.
    fn delete(&mut self, table: &str, predicate: &MatchExp) -> Result<Vec<Record>>;

    /// Opens a (nested) transaction.
    ///
    /// # Errors
    ///
    /// Adapter-specific failures.
    fn begin(&mut self) -> Result<()>;

    /// Commits the innermost transaction.
    ///
    /// # Errors
    ///
    /// Returns a transaction error if none is open.
    fn commit(&mut self) -> Result<()>;

    /// Rolls back the innermost transaction.
    ///
    /// # Errors
    ///
    /// Returns a transaction error if none is open.
    fn rollback(&mut self) -> Result<()>;

    /// Number of open transactions.
    fn transaction_depth(&self) -> usize;
}

type Tables = LtMap<String, LtMap<RecordId, Record>>;

/// In-memory adapter over persistent maps.
///
/// Beginning a transaction snapshots the tables in O(1); rolling back
/// restores the snapshot. The id sequence is never rolled back, so ids are
/// not reused.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemoryStore {
    tables: Tables,
    next_id: u64,
    #[cfg_attr(feature = "serde", serde(skip))]
    snapshots: Vec<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table.
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, LtMap::len)
    }

    /// True if no table holds any row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(LtMap::is_empty)
    }

    /// Names of tables that have held rows.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn rows_matching<'a>(
        &'a self,
        table: &str,
        predicate: Option<&'a MatchExp>,
    ) -> impl Iterator<Item = &'a Record> + 'a {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(LtMap::values)
            .filter(move |row| predicate.is_none_or(|exp| row_matches(exp, row)))
    }
}

fn row_matches(exp: &MatchExp, row: &Record) -> bool {
    exp.evaluate(|atom: &MatchAtom| Ok::<_, std::convert::Infallible>(atom.matches(row)))
        .is_ok()
}

impl StorageAdapter for MemoryStore {
    fn execute(&self, query: &TableQuery) -> Result<Vec<Record>> {
        Ok(self
            .rows_matching(&query.table, query.predicate.as_ref())
            .cloned()
            .collect())
    }

    fn insert(&mut self, table: &str, row: Record) -> Result<Record> {
        self.next_id += 1;
        let id = RecordId(self.next_id);
        let row = row.insert("id", Value::Id(id));
        let rows = self.tables.get(table).cloned().unwrap_or_default();
        self.tables.set(table, rows.insert(id, row.clone()));
        trace!(table, %id, "insert");
        Ok(row)
    }

    fn update(&mut self, table: &str, predicate: &MatchExp, patch: &Record) -> Result<Vec<(Record, Record)>> {
        let patch = patch.remove("id");
        let changed: Vec<(Record, Record)> = self
            .rows_matching(table, Some(predicate))
            .map(|old| (old.clone(), old.union(&patch)))
            .collect();
        if changed.is_empty() {
            return Ok(changed);
        }
        let mut rows = self.tables.get(table).cloned().unwrap_or_default();
        for (_, new) in &changed {
            let id = new
                .id()
                .ok_or_else(|| Error::storage(format!("row without id in {table}")))?;
            rows.set(id, new.clone());
        }
        self.tables.set(table, rows);
        trace!(table, rows = changed.len(), "update");
        Ok(changed)
    }

    fn delete(&mut self, table: &str, predicate: &MatchExp) -> Result<Vec<Record>> {
        let removed: Vec<Record> = self.rows_matching(table, Some(predicate)).cloned().collect();
        if removed.is_empty() {
            return Ok(removed);
        }
        let mut rows = self.tables.get(table).cloned().unwrap_or_default();
        for row in &removed {
            if let Some(id) = row.id() {
                rows.take(&id);
            }
        }
        self.tables.set(table, rows);
        trace!(table, rows = removed.len(), "delete");
        Ok(removed)
    }

    fn begin(&mut self) -> Result<()> {
        self.snapshots.push(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshots
            .pop()
            .map(|_| ())
            .ok_or_else(|| Error::transaction("commit without an open transaction"))
    }

    fn rollback(&mut self) -> Result<()> {
        let snapshot = self
            .snapshots
            .pop()
            .ok_or_else(|| Error::transaction("rollback without an open transaction"))?;
        self.tables = snapshot;
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.snapshots.len()
    }
}
