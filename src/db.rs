use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use tracing::debug;

use crate::error::TableError;

/// Prepared statements cached per connection, keyed by SQL text. The first
/// caller of a given text pays the prepare cost; later callers reuse it.
const STMT_CACHE_CAPACITY: usize = 64;

/// A shared handle to one embedded SQLite database.
///
/// The connection is the unit of shared mutable state: any number of
/// [`crate::Table`] handles may hold the same `Arc<Database>` across
/// threads. One mutex guards the connection and its prepared-statement
/// cache; because SQLite statements borrow the connection, the critical
/// section covers statement execution as well, which matches the engine's
/// own serialization of a single connection.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) a SQLite database at the given file path.
    pub fn open(path: &str) -> Result<Self, TableError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.set_prepared_statement_cache_capacity(STMT_CACHE_CAPACITY);
        debug!("Opened database at {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory SQLite database (useful for testing).
    pub fn open_memory() -> Result<Self, TableError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.set_prepared_statement_cache_capacity(STMT_CACHE_CAPACITY);
        debug!("Opened in-memory database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquires the connection lock.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Checks whether a table exists.
    pub fn table_exists(&self, name: &str) -> Result<bool, TableError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            rusqlite::params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Reads back the literal DDL text SQLite stored for a table, or `None`
    /// if the table does not exist. This is the engine's own record of the
    /// CREATE TABLE statement, used for byte-for-byte schema comparison.
    pub(crate) fn table_ddl(&self, name: &str) -> Result<Option<String>, TableError> {
        let conn = self.conn();
        let result: Result<String, _> = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
            rusqlite::params![name],
            |row| row.get(0),
        );
        match result {
            Ok(ddl) => Ok(Some(ddl)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TableError::Sqlite(e)),
        }
    }

    /// Lists all user-created table names (excludes SQLite system tables).
    pub fn list_tables(&self) -> Result<Vec<String>, TableError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Drops a table by name. Returns [`TableError::TableNotFound`] if it
    /// does not exist.
    pub fn drop_table(&self, name: &str) -> Result<(), TableError> {
        if !self.table_exists(name)? {
            return Err(TableError::TableNotFound(name.to_string()));
        }
        if !crate::schema::is_identifier(name) {
            return Err(TableError::Argument(format!("invalid table name: {name}")));
        }
        let conn = self.conn();
        conn.execute(&format!("DROP TABLE \"{name}\""), [])?;
        debug!("Dropped table {}", name);
        Ok(())
    }
}
