//! # litetable
//!
//! Typed, schema-checked table collections over an embedded SQLite database.
//!
//! A [`Table`] exposes one named SQLite table as a typed collection:
//! - [`schema::RowSchema`] — declared row type, compiled to DDL (including
//!   runtime CHECK constraints) and parsed back from the engine's stored DDL
//! - [`codec`] — per-column conversion between native [`Value`]s and SQLite
//!   storage types
//! - [`query`] — structured WHERE / SET / SELECT specifications translated
//!   into parameterized SQL fragments
//! - [`collections`] — array-like ([`LiteList`]) and map-like ([`LiteMap`])
//!   adapters built on top of [`Table`]
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use litetable::{ColumnDef, ColumnType, Database, Query, Row, RowSchema, Select, Table};
//!
//! let db = Arc::new(Database::open_memory().unwrap());
//!
//! let schema = RowSchema::new(vec![
//!     ColumnDef::new("id", ColumnType::RowidAlias),
//!     ColumnDef::new("name", ColumnType::Text),
//!     ColumnDef::new("age", ColumnType::Integer).nullable(),
//! ])
//! .unwrap();
//!
//! let table = Table::create_or_bind(&db, "users", schema, None, false).unwrap();
//! table
//!     .insert(&Row::new().with("name", "Ada").with("age", 36i64))
//!     .unwrap();
//!
//! let row = table.single(&Query::field("name", "Ada"), &Select::All).unwrap();
//! assert_eq!(row.get("age"), Some(&litetable::Value::Integer(36)));
//! ```

pub mod codec;
pub mod collections;
pub mod db;
pub mod error;
pub mod query;
pub mod schema;
pub mod table;
pub mod value;

// Re-exports for convenience.
pub use collections::{LiteList, LiteMap, WriteMode};
pub use db::Database;
pub use error::TableError;
pub use query::{Query, Select, SetClause};
pub use schema::{ColumnDef, ColumnType, RowSchema};
pub use table::Table;
pub use value::{Row, Value};
