use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ToSql};
use tracing::{debug, instrument};

use crate::codec;
use crate::db::Database;
use crate::error::TableError;
use crate::query::{self, Params, Query, Select, SetClause, ROWID_NAME};
use crate::schema::{is_identifier, ColumnDef, ColumnType, RowSchema};
use crate::value::Row;

/// Rows sampled at bind time for the re-serialization self-check.
const MISMATCH_SAMPLE_ROWS: usize = 8;

/// A handle bound to one physical SQLite table.
///
/// The handle owns its view of the schema, re-derived from the engine's
/// stored DDL at bind time so the view always matches reality. The schema is
/// immutable for the life of the handle; re-bind to pick up changes.
///
/// At bind time a small sample of existing rows is round-tripped through
/// decode → encode; columns whose re-encoded value differs textually from the
/// stored value (JSON key reordering, float formatting drift, foreign
/// writers) are flagged, and equality filters on them are rejected rather
/// than silently matching nothing.
#[derive(Debug, Clone)]
pub struct Table {
    db: Arc<Database>,
    name: String,
    schema: RowSchema,
    unreliable: HashSet<String>,
}

impl Table {
    // ─────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────

    /// Creates the table from `schema` if absent, then binds to it.
    ///
    /// If a table of that name already exists, its stored DDL is compared
    /// byte-for-byte against `schema.compile(..)`:
    /// - `keep_compatible = true` and equal: bind to the existing table.
    /// - `keep_compatible = true` but different: [`TableError::SchemaConflict`]
    ///   (an incompatible schema is never silently adopted).
    /// - `keep_compatible = false`: always [`TableError::SchemaConflict`],
    ///   with the message distinguishing the compatible case.
    #[instrument(skip_all, fields(table = %name))]
    pub fn create_or_bind(
        db: &Arc<Database>,
        name: &str,
        schema: RowSchema,
        constraints: Option<&str>,
        keep_compatible: bool,
    ) -> Result<Self, TableError> {
        if !is_identifier(name) {
            return Err(TableError::InvalidSchema(format!(
                "Invalid table name: {name:?}"
            )));
        }
        let expected = schema.compile(name, constraints);
        match db.table_ddl(name)? {
            None => {
                debug!("CREATE TABLE SQL: {}", expected);
                db.conn().execute(&expected, [])?;
                Self::bind(db, name)
            }
            Some(stored) => {
                if keep_compatible && stored == expected {
                    Self::bind(db, name)
                } else {
                    let detail = if stored == expected {
                        "an identical table already exists (pass keep_compatible to bind to it)"
                    } else {
                        "an existing table has a different schema"
                    };
                    Err(TableError::SchemaConflict {
                        table: name.to_string(),
                        detail: detail.to_string(),
                    })
                }
            }
        }
    }

    /// Binds directly to a pre-existing table by parsing its stored DDL.
    ///
    /// Only tables whose DDL this crate's schema compiler could have
    /// produced are accepted.
    #[instrument(skip_all, fields(table = %name))]
    pub fn bind(db: &Arc<Database>, name: &str) -> Result<Self, TableError> {
        let ddl = db
            .table_ddl(name)?
            .ok_or_else(|| TableError::TableNotFound(name.to_string()))?;
        let (_, schema) = RowSchema::parse(&ddl)?;
        let unreliable = Self::probe_unreliable(db, name, &schema)?;
        if !unreliable.is_empty() {
            debug!("Columns failing the re-serialization check: {:?}", unreliable);
        }
        Ok(Self {
            db: Arc::clone(db),
            name: name.to_string(),
            schema,
            unreliable,
        })
    }

    /// Round-trips a sample of stored rows through decode → encode and flags
    /// columns whose re-encoded value differs from what is stored. A stored
    /// value that fails to decode at all flags its column too.
    fn probe_unreliable(
        db: &Database,
        name: &str,
        schema: &RowSchema,
    ) -> Result<HashSet<String>, TableError> {
        let cols: Vec<String> = schema
            .columns()
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect();
        let sql = format!(
            "SELECT {} FROM \"{}\" LIMIT {}",
            cols.join(", "),
            name,
            MISMATCH_SAMPLE_ROWS
        );
        let conn = db.conn();
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query([])?;
        let mut flagged = HashSet::new();
        while let Some(row) = rows.next()? {
            for (i, def) in schema.columns().iter().enumerate() {
                if flagged.contains(&def.name) {
                    continue;
                }
                let stored = SqlValue::from(row.get_ref(i)?);
                let survives = match codec::decode(def, row.get_ref(i)?) {
                    Ok(value) => codec::encode(def, &value)
                        .map(|reencoded| reencoded == stored)
                        .unwrap_or(false),
                    Err(_) => false,
                };
                if !survives {
                    flagged.insert(def.name.clone());
                }
            }
        }
        Ok(flagged)
    }

    // ─────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// Columns that failed the bind-time re-serialization self-check.
    pub fn unreliable_columns(&self) -> &HashSet<String> {
        &self.unreliable
    }

    // ─────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────

    /// Inserts one row, returning its rowid. A row with zero fields inserts
    /// engine defaults, which supports all-rowid or all-default schemas.
    /// Engine constraint violations propagate unchanged.
    #[instrument(skip_all, fields(table = %self.name))]
    pub fn insert(&self, row: &Row) -> Result<i64, TableError> {
        let (sql, values) = self.insert_sql(row)?;
        let conn = self.db.conn();
        {
            let mut stmt = conn.prepare_cached(&sql)?;
            stmt.execute(params_from_iter(values.iter()))?;
        }
        let rowid = conn.last_insert_rowid();
        debug!("Inserted row with rowid {}", rowid);
        Ok(rowid)
    }

    /// Inserts a batch of rows inside one transaction. Any failure rolls the
    /// whole batch back; no partial success is ever observable.
    #[instrument(skip_all, fields(table = %self.name, rows = rows.len()))]
    pub fn insert_many(&self, rows: &[Row]) -> Result<usize, TableError> {
        // Encode everything before touching the engine.
        let mut statements = Vec::with_capacity(rows.len());
        for row in rows {
            statements.push(self.insert_sql(row)?);
        }
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        for (sql, values) in &statements {
            let mut stmt = tx.prepare_cached(sql)?;
            stmt.execute(params_from_iter(values.iter()))?;
        }
        tx.commit()?;
        Ok(statements.len())
    }

    /// Insert-or-update on a conflict column, via the engine's upsert
    /// primitive. Returns the rowid of the inserted or updated row. The row
    /// must contain at least one column besides `conflict_col`.
    #[instrument(skip_all, fields(table = %self.name))]
    pub fn upsert(&self, row: &Row, conflict_col: &str) -> Result<i64, TableError> {
        if self.schema.column(conflict_col).is_none() {
            return Err(TableError::Argument(format!(
                "unknown column: {conflict_col}"
            )));
        }
        if row.get(conflict_col).is_none() {
            return Err(TableError::Argument(format!(
                "upsert row must contain the conflict column {conflict_col}"
            )));
        }
        let assigns: Vec<String> = row
            .iter()
            .filter(|(name, _)| *name != conflict_col)
            .map(|(name, _)| format!("\"{name}\" = excluded.\"{name}\""))
            .collect();
        if assigns.is_empty() {
            return Err(TableError::Argument(
                "upsert row must contain at least one non-conflict column".into(),
            ));
        }
        let (insert_sql, values) = self.insert_sql(row)?;
        let sql = format!(
            "{insert_sql} ON CONFLICT (\"{conflict_col}\") DO UPDATE SET {} RETURNING rowid",
            assigns.join(", ")
        );
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut result = stmt.query(params_from_iter(values.iter()))?;
        match result.next()? {
            Some(r) => Ok(r.get(0)?),
            None => Err(TableError::Sqlite(rusqlite::Error::QueryReturnedNoRows)),
        }
    }

    fn insert_sql(&self, row: &Row) -> Result<(String, Vec<SqlValue>), TableError> {
        if row.is_empty() {
            return Ok((
                format!("INSERT INTO \"{}\" DEFAULT VALUES", self.name),
                Vec::new(),
            ));
        }
        let mut cols = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (name, value) in row.iter() {
            let def = self
                .schema
                .column(name)
                .ok_or_else(|| TableError::Argument(format!("unknown column: {name}")))?;
            cols.push(format!("\"{name}\""));
            values.push(codec::encode(def, value)?);
        }
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.name,
            cols.join(", "),
            placeholders.join(", ")
        );
        Ok((sql, values))
    }

    // ─────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────

    /// Counts rows matching the query.
    pub fn count(&self, query: &Query) -> Result<u64, TableError> {
        let (frag, params) = query::where_clause(&self.schema, &self.unreliable, query)?;
        let sql = format!("SELECT count(*) FROM \"{}\" WHERE {frag}", self.name);
        let conn = self.db.conn();
        let (_, raw) = fetch_raw(&conn, &sql, &params)?;
        match raw.first().map(Vec::as_slice) {
            Some([SqlValue::Integer(n), ..]) => Ok(*n as u64),
            _ => Err(TableError::Argument("count returned no rows".into())),
        }
    }

    /// True if any row matches the query.
    pub fn exists(&self, query: &Query) -> Result<bool, TableError> {
        let (frag, params) = query::where_clause(&self.schema, &self.unreliable, query)?;
        let sql = format!("SELECT 1 FROM \"{}\" WHERE {frag} LIMIT 1", self.name);
        let conn = self.db.conn();
        let (_, raw) = fetch_raw(&conn, &sql, &params)?;
        Ok(!raw.is_empty())
    }

    /// Scans every row. No ordering is guaranteed; callers must impose their
    /// own order if they need one.
    pub fn scan(&self, select: &Select, limit: Option<usize>) -> Result<Vec<Row>, TableError> {
        self.select_rows(&Query::all(), select, &limit_suffix(limit))
    }

    /// Scans rows matching the query. No ordering is guaranteed.
    pub fn scan_filtered(
        &self,
        query: &Query,
        select: &Select,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, TableError> {
        self.select_rows(query, select, &limit_suffix(limit))
    }

    /// Returns up to `n` matching rows.
    pub fn first(
        &self,
        query: &Query,
        select: &Select,
        n: usize,
    ) -> Result<Vec<Row>, TableError> {
        self.select_rows(query, select, &format!(" LIMIT {n}"))
    }

    /// Returns the single matching row, or [`TableError::Ambiguous`] when
    /// zero or more than one row matches. Fetches with LIMIT 2 so ambiguity
    /// is detected without a separate existence check.
    pub fn single(&self, query: &Query, select: &Select) -> Result<Row, TableError> {
        let rows = self.select_rows(query, select, " LIMIT 2")?;
        expect_exactly_one(rows)
    }

    /// Draws `n` distinct matching rows uniformly at random.
    ///
    /// `with_replacement` is accepted only for `n <= 1` (where it is
    /// indistinguishable from drawing without replacement); otherwise the
    /// call fails with [`TableError::Argument`]. Fewer than `n` matching
    /// rows fails with [`TableError::InsufficientRows`].
    pub fn sample(
        &self,
        query: &Query,
        n: usize,
        with_replacement: bool,
        select: &Select,
    ) -> Result<Vec<Row>, TableError> {
        if with_replacement && n > 1 {
            return Err(TableError::Argument(
                "sampling with replacement is not supported for n > 1".into(),
            ));
        }
        let rows = self.select_rows(query, select, &format!(" ORDER BY random() LIMIT {n}"))?;
        if rows.len() < n {
            return Err(TableError::InsufficientRows {
                wanted: n,
                got: rows.len(),
            });
        }
        Ok(rows)
    }

    fn select_rows(
        &self,
        query: &Query,
        select: &Select,
        suffix: &str,
    ) -> Result<Vec<Row>, TableError> {
        let (frag, params) = query::where_clause(&self.schema, &self.unreliable, query)?;
        let sel = query::select_clause(&self.schema, select)?;
        let sql = format!("SELECT {sel} FROM \"{}\" WHERE {frag}{suffix}", self.name);
        let raw = {
            let conn = self.db.conn();
            fetch_raw(&conn, &sql, &params)?
        };
        self.decode_rows(&raw.0, raw.1)
    }

    // ─────────────────────────────────────────────
    // Updates and deletes
    // ─────────────────────────────────────────────

    /// Updates matching rows in one engine call, returning the number of
    /// rows changed.
    #[instrument(skip_all, fields(table = %self.name))]
    pub fn update(&self, query: &Query, set: &SetClause) -> Result<usize, TableError> {
        let (sql, params) = self.update_sql(query, set, None)?;
        let conn = self.db.conn();
        let changed = execute_params(&conn, &sql, &params)?;
        debug!("Updated {} rows", changed);
        Ok(changed)
    }

    /// Updates matching rows and returns the selected columns of every
    /// changed row.
    pub fn update_returning(
        &self,
        query: &Query,
        set: &SetClause,
        select: &Select,
    ) -> Result<Vec<Row>, TableError> {
        let (sql, params) = self.update_sql(query, set, Some(select))?;
        let raw = {
            let conn = self.db.conn();
            fetch_raw(&conn, &sql, &params)?
        };
        self.decode_rows(&raw.0, raw.1)
    }

    /// Updates exactly one row; [`TableError::Ambiguous`] if the query
    /// matched zero or more than one.
    pub fn update_exactly_one(&self, query: &Query, set: &SetClause) -> Result<(), TableError> {
        let changed = self.update_returning(query, set, &Select::Rowid)?.len();
        if changed != 1 {
            return Err(TableError::Ambiguous {
                wanted: "exactly one",
                got: changed,
            });
        }
        Ok(())
    }

    /// Updates one or more rows; [`TableError::Ambiguous`] if the query
    /// matched none. Returns the number of rows changed.
    pub fn update_at_least_one(
        &self,
        query: &Query,
        set: &SetClause,
    ) -> Result<usize, TableError> {
        let changed = self.update_returning(query, set, &Select::Rowid)?.len();
        if changed == 0 {
            return Err(TableError::Ambiguous {
                wanted: "at least one",
                got: 0,
            });
        }
        Ok(changed)
    }

    fn update_sql(
        &self,
        query: &Query,
        set: &SetClause,
        returning: Option<&Select>,
    ) -> Result<(String, Params), TableError> {
        let (set_frag, set_params) = query::set_clause(&self.schema, set)?;
        let (where_frag, where_params) =
            query::where_clause(&self.schema, &self.unreliable, query)?;
        let params = query::merge_params(set_params, where_params)?;
        let mut sql = format!(
            "UPDATE \"{}\" SET {set_frag} WHERE {where_frag}",
            self.name
        );
        if let Some(select) = returning {
            sql.push_str(" RETURNING ");
            sql.push_str(&query::select_clause(&self.schema, select)?);
        }
        Ok((sql, params))
    }

    /// Deletes matching rows in one engine call, returning the number of
    /// rows removed.
    #[instrument(skip_all, fields(table = %self.name))]
    pub fn delete(&self, query: &Query) -> Result<usize, TableError> {
        let (sql, params) = self.delete_sql(query, None)?;
        let conn = self.db.conn();
        let removed = execute_params(&conn, &sql, &params)?;
        debug!("Deleted {} rows", removed);
        Ok(removed)
    }

    /// Deletes matching rows and returns the selected columns of every
    /// removed row.
    pub fn delete_returning(
        &self,
        query: &Query,
        select: &Select,
    ) -> Result<Vec<Row>, TableError> {
        let (sql, params) = self.delete_sql(query, Some(select))?;
        let raw = {
            let conn = self.db.conn();
            fetch_raw(&conn, &sql, &params)?
        };
        self.decode_rows(&raw.0, raw.1)
    }

    /// Deletes exactly one row; [`TableError::Ambiguous`] if the query
    /// matched zero or more than one.
    pub fn delete_exactly_one(&self, query: &Query) -> Result<(), TableError> {
        let removed = self.delete_returning(query, &Select::Rowid)?.len();
        if removed != 1 {
            return Err(TableError::Ambiguous {
                wanted: "exactly one",
                got: removed,
            });
        }
        Ok(())
    }

    /// Deletes one or more rows; [`TableError::Ambiguous`] if the query
    /// matched none. Returns the number of rows removed.
    pub fn delete_at_least_one(&self, query: &Query) -> Result<usize, TableError> {
        let removed = self.delete_returning(query, &Select::Rowid)?.len();
        if removed == 0 {
            return Err(TableError::Ambiguous {
                wanted: "at least one",
                got: 0,
            });
        }
        Ok(removed)
    }

    /// Deletes every row.
    pub fn clear(&self) -> Result<usize, TableError> {
        self.delete(&Query::all())
    }

    fn delete_sql(
        &self,
        query: &Query,
        returning: Option<&Select>,
    ) -> Result<(String, Params), TableError> {
        let (frag, params) = query::where_clause(&self.schema, &self.unreliable, query)?;
        let mut sql = format!("DELETE FROM \"{}\" WHERE {frag}", self.name);
        if let Some(select) = returning {
            sql.push_str(" RETURNING ");
            sql.push_str(&query::select_clause(&self.schema, select)?);
        }
        Ok((sql, params))
    }

    // ─────────────────────────────────────────────
    // Row decoding
    // ─────────────────────────────────────────────

    fn decode_rows(
        &self,
        names: &[String],
        raw: Vec<Vec<SqlValue>>,
    ) -> Result<Vec<Row>, TableError> {
        let rowid_def = ColumnDef::new(ROWID_NAME, ColumnType::Integer);
        let defs: Vec<&ColumnDef> = names
            .iter()
            .map(|name| {
                if name == ROWID_NAME {
                    Ok(&rowid_def)
                } else {
                    self.schema.column(name).ok_or_else(|| {
                        TableError::Argument(format!("unknown result column: {name}"))
                    })
                }
            })
            .collect::<Result<_, TableError>>()?;

        let mut rows = Vec::with_capacity(raw.len());
        for values in raw {
            let mut row = Row::new();
            for (def, value) in defs.iter().zip(&values) {
                let decoded = codec::decode(def, value.into())?;
                row.push(def.name.clone(), decoded);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Shared "exactly one" check used by [`Table::single`].
fn expect_exactly_one<T>(mut rows: Vec<T>) -> Result<T, TableError> {
    let got = rows.len();
    match rows.pop() {
        Some(row) if got == 1 => Ok(row),
        _ => Err(TableError::Ambiguous {
            wanted: "exactly one",
            got,
        }),
    }
}

fn limit_suffix(limit: Option<usize>) -> String {
    match limit {
        Some(n) => format!(" LIMIT {n}"),
        None => String::new(),
    }
}

/// Runs a statement through the connection's prepared-statement cache and
/// collects every result row as owned SQLite values, together with the
/// output column names. Fully materializes before returning, so no engine
/// cursor outlives the call.
fn fetch_raw(
    conn: &Connection,
    sql: &str,
    params: &Params,
) -> Result<(Vec<String>, Vec<Vec<SqlValue>>), TableError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = names.len();
    let mut read = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Vec<SqlValue>> {
        (0..width)
            .map(|i| Ok(SqlValue::from(row.get_ref(i)?)))
            .collect()
    };
    let rows = match params {
        Params::None => stmt
            .query_map([], &mut read)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        Params::Positional(values) => stmt
            .query_map(params_from_iter(values.iter()), &mut read)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        Params::Named(pairs) => {
            let keys: Vec<String> = pairs.iter().map(|(k, _)| format!(":{k}")).collect();
            let refs: Vec<(&str, &dyn ToSql)> = keys
                .iter()
                .map(String::as_str)
                .zip(pairs.iter().map(|(_, v)| v as &dyn ToSql))
                .collect();
            stmt.query_map(refs.as_slice(), &mut read)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok((names, rows))
}

/// Runs a non-SELECT statement, returning the number of affected rows.
fn execute_params(conn: &Connection, sql: &str, params: &Params) -> Result<usize, TableError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let changed = match params {
        Params::None => stmt.execute([])?,
        Params::Positional(values) => stmt.execute(params_from_iter(values.iter()))?,
        Params::Named(pairs) => {
            let keys: Vec<String> = pairs.iter().map(|(k, _)| format!(":{k}")).collect();
            let refs: Vec<(&str, &dyn ToSql)> = keys
                .iter()
                .map(String::as_str)
                .zip(pairs.iter().map(|(_, v)| v as &dyn ToSql))
                .collect();
            stmt.execute(refs.as_slice())?
        }
    };
    Ok(changed)
}
