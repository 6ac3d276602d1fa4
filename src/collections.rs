//! Derivative collection adapters over [`Table`]: an array-like list and a
//! map-like dictionary, both storing JSON values.

use std::sync::Arc;

use crate::db::Database;
use crate::error::TableError;
use crate::query::{Query, Select, SetClause, ROWID_NAME};
use crate::schema::{ColumnDef, ColumnType, RowSchema};
use crate::table::Table;
use crate::value::{Row, Value};

fn rowid_query(id: i64) -> Query {
    Query::named("rowid = :id", vec![("id".to_string(), Value::Integer(id))])
}

fn row_integer(row: &Row, name: &str) -> Option<i64> {
    match row.get(name) {
        Some(Value::Integer(i)) => Some(*i),
        _ => None,
    }
}

// ─────────────────────────────────────────────
// LiteList
// ─────────────────────────────────────────────

/// An array-like collection of JSON values backed by a single-column table.
///
/// Index order is rowid order. Indexes shift when earlier elements are
/// removed, exactly as in an in-memory vector.
pub struct LiteList {
    table: Table,
}

impl LiteList {
    /// Opens (creating if needed) the list table of the given name.
    pub fn open(db: &Arc<Database>, name: &str) -> Result<Self, TableError> {
        let schema = RowSchema::new(vec![ColumnDef::new("item", ColumnType::Json)])?;
        let table = Table::create_or_bind(db, name, schema, None, true)?;
        Ok(Self { table })
    }

    /// Appends a value to the end of the list.
    pub fn push(&self, item: serde_json::Value) -> Result<(), TableError> {
        self.table.insert(&Row::new().with("item", item))?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, TableError> {
        Ok(self.table.count(&Query::all())? as usize)
    }

    pub fn is_empty(&self) -> Result<bool, TableError> {
        Ok(!self.table.exists(&Query::all())?)
    }

    /// Returns the element at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Result<Option<serde_json::Value>, TableError> {
        let ids = self.rowids()?;
        let Some(id) = ids.get(index) else {
            return Ok(None);
        };
        let row = self
            .table
            .single(&rowid_query(*id), &Select::Column("item".into()))?;
        match row.get("item") {
            Some(Value::Json(j)) => Ok(Some(j.clone())),
            _ => Ok(None),
        }
    }

    /// Replaces the element at `index`.
    pub fn set(&self, index: usize, item: serde_json::Value) -> Result<(), TableError> {
        let ids = self.rowids()?;
        let id = ids.get(index).ok_or_else(|| {
            TableError::Argument(format!("index {index} out of bounds (len {})", ids.len()))
        })?;
        self.table
            .update_exactly_one(&rowid_query(*id), &SetClause::field("item", Value::Json(item)))
    }

    /// All elements in index order.
    pub fn items(&self) -> Result<Vec<serde_json::Value>, TableError> {
        let rows = self.table.scan(
            &Select::Columns(vec![Select::Rowid, Select::Column("item".into())]),
            None,
        )?;
        let mut keyed: Vec<(i64, serde_json::Value)> = rows
            .iter()
            .filter_map(|row| match (row_integer(row, ROWID_NAME), row.get("item")) {
                (Some(id), Some(Value::Json(j))) => Some((id, j.clone())),
                _ => None,
            })
            .collect();
        keyed.sort_by_key(|(id, _)| *id);
        Ok(keyed.into_iter().map(|(_, j)| j).collect())
    }

    pub fn clear(&self) -> Result<usize, TableError> {
        self.table.clear()
    }

    /// Rowids in index order. The engine guarantees no scan order, so the
    /// sort happens here.
    fn rowids(&self) -> Result<Vec<i64>, TableError> {
        let rows = self.table.scan(&Select::Rowid, None)?;
        let mut ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| row_integer(row, ROWID_NAME))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

// ─────────────────────────────────────────────
// LiteMap
// ─────────────────────────────────────────────

/// How [`LiteMap::set`] writes an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// One round trip via the engine's `ON CONFLICT DO UPDATE` primitive.
    Upsert,
    /// Look the existing rowid up first and branch between insert and
    /// update. One extra round trip, but no reliance on upsert semantics.
    LookupThenWrite,
}

/// A map-like collection of string keys to JSON values, backed by a
/// two-column table with a unique key constraint.
pub struct LiteMap {
    table: Table,
    mode: WriteMode,
}

impl LiteMap {
    /// Opens (creating if needed) the map table of the given name.
    pub fn open(db: &Arc<Database>, name: &str, mode: WriteMode) -> Result<Self, TableError> {
        let schema = RowSchema::new(vec![
            ColumnDef::new("key", ColumnType::Text),
            ColumnDef::new("value", ColumnType::Json),
        ])?;
        let table =
            Table::create_or_bind(db, name, schema, Some("UNIQUE (\"key\")"), true)?;
        Ok(Self { table, mode })
    }

    /// Inserts or replaces the value under `key`.
    pub fn set(&self, key: &str, value: serde_json::Value) -> Result<(), TableError> {
        let row = Row::new().with("key", key).with("value", value.clone());
        match self.mode {
            WriteMode::Upsert => {
                self.table.upsert(&row, "key")?;
                Ok(())
            }
            WriteMode::LookupThenWrite => {
                let existing = self
                    .table
                    .first(&Query::field("key", key), &Select::Rowid, 1)?;
                match existing.first().and_then(|r| row_integer(r, ROWID_NAME)) {
                    Some(id) => self.table.update_exactly_one(
                        &rowid_query(id),
                        &SetClause::field("value", Value::Json(value)),
                    ),
                    None => {
                        self.table.insert(&row)?;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Looks up the value under `key`.
    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>, TableError> {
        let rows = self
            .table
            .first(&Query::field("key", key), &Select::Column("value".into()), 1)?;
        match rows.first().and_then(|r| r.get("value")) {
            Some(Value::Json(j)) => Ok(Some(j.clone())),
            _ => Ok(None),
        }
    }

    /// Removes `key`, reporting whether it was present.
    pub fn remove(&self, key: &str) -> Result<bool, TableError> {
        Ok(self.table.delete(&Query::field("key", key))? > 0)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, TableError> {
        self.table.exists(&Query::field("key", key))
    }

    pub fn len(&self) -> Result<usize, TableError> {
        Ok(self.table.count(&Query::all())? as usize)
    }

    pub fn is_empty(&self) -> Result<bool, TableError> {
        Ok(!self.table.exists(&Query::all())?)
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> Result<Vec<String>, TableError> {
        let rows = self.table.scan(&Select::Column("key".into()), None)?;
        Ok(rows
            .iter()
            .filter_map(|row| match row.get("key") {
                Some(Value::Text(k)) => Some(k.clone()),
                _ => None,
            })
            .collect())
    }

    pub fn clear(&self) -> Result<usize, TableError> {
        self.table.clear()
    }
}
