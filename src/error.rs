use thiserror::Error;

/// Errors that can occur during table operations.
///
/// Engine-native failures (constraint violations, lock contention, ...) are
/// carried unwrapped inside [`TableError::Sqlite`] so callers can distinguish
/// "this layer rejected the call" from "the storage engine rejected the data".
#[derive(Debug, Error)]
pub enum TableError {
    /// An error originating from the underlying SQLite database.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The provided schema is invalid (e.g., no columns, duplicate names).
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Stored DDL does not match any shape this crate's schema compiler can
    /// produce (foreign or ambiguous schema).
    #[error("Schema parse error: {0}")]
    SchemaParse(String),

    /// `create_or_bind` found an existing table it was not allowed to adopt.
    #[error("Schema conflict on table \"{table}\": {detail}")]
    SchemaConflict { table: String, detail: String },

    /// The requested table does not exist.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// A native value's runtime type does not match the declared column type.
    #[error("type mismatch for column \"{column}\": expected {expected}, got {got}")]
    Type {
        column: String,
        expected: &'static str,
        got: &'static str,
    },

    /// Stored data could not be decoded under the declared column type. This
    /// signals the engine's stored data is inconsistent with the schema.
    #[error("malformed stored value in column \"{column}\": {detail}")]
    Format { column: String, detail: String },

    /// A filter referenced a column that failed the bind-time
    /// re-serialization self-check; equality filters on it would be
    /// silently wrong.
    #[error("cannot filter on unreliable column(s): {columns:?}")]
    UnreliableColumn { columns: Vec<String> },

    /// An "exactly one" / "at least one" operation matched the wrong number
    /// of rows.
    #[error("expected {wanted} matching row(s), got {got}")]
    Ambiguous { wanted: &'static str, got: usize },

    /// Sampling without replacement requested more rows than matched.
    #[error("sample of {wanted} rows requested but only {got} matched")]
    InsufficientRows { wanted: usize, got: usize },

    /// Invalid call-level argument.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// An error occurred during JSON or binary serialization.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
