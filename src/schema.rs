use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Marker line separating column definitions from trailing table
/// constraints in compiled DDL. [`RowSchema::parse`] keys off it.
const CONSTRAINTS_MARKER: &str = "  -- constraints";

/// Logical column types supported by litetable.
///
/// Each tag maps deterministically to an SQLite storage keyword plus a CHECK
/// predicate that emulates strict typing atop SQLite's dynamic typing:
/// - `Bool`       -> `int`, `CHECK (col IN (0, 1))`
/// - `Integer`    -> `int`, `CHECK (typeof(col) = 'integer')`
/// - `Float`      -> `real`, `CHECK (typeof(col) = 'real')`
/// - `Text`       -> `text`, `CHECK (typeof(col) = 'text')`
/// - `Timestamp`  -> `text`, GLOB check for `YYYY-MM-DD HH:MM:SS.sss`
/// - `Date`       -> `text`, GLOB check for `YYYY-MM-DD`
/// - `Time`       -> `text`, GLOB check for `HH:MM:SS.sss`
/// - `Json`       -> `text`, `CHECK (json_valid(col))`
/// - `Serialized` -> `blob`, `CHECK (typeof(col) = 'blob')`
/// - `RowidAlias` -> `integer PRIMARY KEY`
///
/// `Integer` is deliberately declared with the `int` keyword rather than
/// `integer`: in SQLite only the exact phrase `integer PRIMARY KEY` aliases
/// the implicit rowid, and plain columns must never do so silently. The one
/// `RowidAlias` column uses the aliasing keyword on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Integer,
    Float,
    Text,
    Timestamp,
    Date,
    Time,
    Json,
    Serialized,
    /// Alias for SQLite's implicit integer rowid.
    RowidAlias,
}

impl ColumnType {
    /// All tags, in the order `parse` tries them.
    const ALL: [ColumnType; 10] = [
        ColumnType::Bool,
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::Text,
        ColumnType::Timestamp,
        ColumnType::Date,
        ColumnType::Time,
        ColumnType::Json,
        ColumnType::Serialized,
        ColumnType::RowidAlias,
    ];

    /// SQLite storage keyword for this column type.
    pub fn storage_keyword(self) -> &'static str {
        match self {
            ColumnType::Bool | ColumnType::Integer => "int",
            ColumnType::Float => "real",
            ColumnType::Text
            | ColumnType::Timestamp
            | ColumnType::Date
            | ColumnType::Time
            | ColumnType::Json => "text",
            ColumnType::Serialized => "blob",
            ColumnType::RowidAlias => "integer",
        }
    }

    /// Expected native [`crate::Value`] variant name, for error messages.
    pub(crate) fn native_name(self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Integer | ColumnType::RowidAlias => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Json => "json",
            ColumnType::Serialized => "serialized",
        }
    }

    /// CHECK predicate template for this type, with `name` interpolated.
    /// `RowidAlias` carries no CHECK; SQLite enforces its integerness.
    fn check_predicate(self, name: &str) -> Option<String> {
        const D: &str = "[0-9]";
        match self {
            ColumnType::Bool => Some(format!("\"{name}\" IN (0, 1)")),
            ColumnType::Integer => Some(format!("typeof(\"{name}\") = 'integer'")),
            ColumnType::Float => Some(format!("typeof(\"{name}\") = 'real'")),
            ColumnType::Text => Some(format!("typeof(\"{name}\") = 'text'")),
            ColumnType::Timestamp => Some(format!(
                "\"{name}\" GLOB '{D}{D}{D}{D}-{D}{D}-{D}{D} {D}{D}:{D}{D}:{D}{D}.{D}{D}{D}'"
            )),
            ColumnType::Date => Some(format!("\"{name}\" GLOB '{D}{D}{D}{D}-{D}{D}-{D}{D}'")),
            ColumnType::Time => Some(format!("\"{name}\" GLOB '{D}{D}:{D}{D}:{D}{D}.{D}{D}{D}'")),
            ColumnType::Json => Some(format!("json_valid(\"{name}\")")),
            ColumnType::Serialized => Some(format!("typeof(\"{name}\") = 'blob'")),
            ColumnType::RowidAlias => None,
        }
    }
}

/// Defines a single column within a row schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// The column name. Must match `^\w+$`.
    pub name: String,
    /// The logical type of the column.
    pub col_type: ColumnType,
    /// Whether the column accepts NULL values.
    pub nullable: bool,
}

impl ColumnDef {
    /// A non-nullable column of the given type.
    pub fn new(name: &str, col_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            col_type,
            nullable: false,
        }
    }

    /// Marks the column nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// The DDL fragment for this column: `"name" storage [NOT NULL]
    /// [CHECK (predicate)]`.
    fn ddl(&self) -> String {
        if self.col_type == ColumnType::RowidAlias {
            return format!("\"{}\" integer PRIMARY KEY", self.name);
        }
        let mut out = format!("\"{}\" {}", self.name, self.col_type.storage_keyword());
        if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if let Some(check) = self.col_type.check_predicate(&self.name) {
            out.push_str(" CHECK (");
            out.push_str(&check);
            out.push(')');
        }
        out
    }
}

/// Ordered, validated mapping from column name to column type.
///
/// Immutable once owned by a [`crate::Table`]; a handle's view of the schema
/// changes only by re-binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSchema {
    columns: Vec<ColumnDef>,
}

impl RowSchema {
    /// Validates and builds a schema.
    ///
    /// Rejected: empty column lists, duplicate or non-`\w+` names, more than
    /// one [`ColumnType::RowidAlias`] column, or a nullable rowid alias.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self, TableError> {
        if columns.is_empty() {
            return Err(TableError::InvalidSchema(
                "Table must have at least one column".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        let mut rowid_aliases = 0usize;
        for col in &columns {
            if !is_identifier(&col.name) {
                return Err(TableError::InvalidSchema(format!(
                    "Invalid column name: {:?}",
                    col.name
                )));
            }
            if !seen.insert(col.name.as_str()) {
                return Err(TableError::InvalidSchema(format!(
                    "Duplicate column name: {}",
                    col.name
                )));
            }
            if col.col_type == ColumnType::RowidAlias {
                rowid_aliases += 1;
                if col.nullable {
                    return Err(TableError::InvalidSchema(format!(
                        "Rowid alias column {} cannot be nullable",
                        col.name
                    )));
                }
            }
        }
        if rowid_aliases > 1 {
            return Err(TableError::InvalidSchema(
                "At most one rowid alias column is allowed".into(),
            ));
        }
        Ok(Self { columns })
    }

    /// Column definitions in declared order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Compiles the schema into a full CREATE TABLE statement.
    ///
    /// One column per line in declared order; `constraints`, if given, is a
    /// single-line trailing table clause (e.g. `UNIQUE ("key")`) delimited by
    /// a marker comment so [`RowSchema::parse`] can split it back off.
    pub fn compile(&self, table: &str, constraints: Option<&str>) -> String {
        let mut out = format!("CREATE TABLE \"{table}\" (\n");
        let cols: Vec<String> = self.columns.iter().map(|c| format!("  {}", c.ddl())).collect();
        out.push_str(&cols.join(",\n"));
        if let Some(extra) = constraints {
            out.push('\n');
            out.push_str(CONSTRAINTS_MARKER);
            out.push_str("\n  , ");
            out.push_str(extra);
        }
        out.push_str("\n)");
        out
    }

    /// Parses DDL text back into `(table name, schema)`.
    ///
    /// Strict inverse of [`RowSchema::compile`]: only text that `compile`
    /// could have produced is accepted. Each column line is matched against
    /// every (type, nullability) candidate's compiled form, and exactly one
    /// candidate must equal the line byte-for-byte; zero or multiple matches
    /// mean a foreign or ambiguous schema.
    pub fn parse(ddl: &str) -> Result<(String, RowSchema), TableError> {
        let lines: Vec<&str> = ddl.lines().collect();
        if lines.len() < 3 || *lines.last().unwrap() != ")" {
            return Err(TableError::SchemaParse(
                "DDL does not have the compiler's line structure".into(),
            ));
        }

        let header = lines[0];
        let table = header
            .strip_prefix("CREATE TABLE \"")
            .and_then(|rest| rest.strip_suffix("\" ("))
            .ok_or_else(|| {
                TableError::SchemaParse(format!("Unrecognized header line: {header:?}"))
            })?;
        if !is_identifier(table) {
            return Err(TableError::SchemaParse(format!(
                "Invalid table name: {table:?}"
            )));
        }

        let body = &lines[1..lines.len() - 1];
        let col_lines = match body.iter().position(|l| *l == CONSTRAINTS_MARKER) {
            Some(pos) => {
                // Exactly one constraint line follows the marker.
                if body.len() != pos + 2 || !body[pos + 1].starts_with("  , ") {
                    return Err(TableError::SchemaParse(
                        "Malformed constraints section".into(),
                    ));
                }
                &body[..pos]
            }
            None => body,
        };

        let mut columns = Vec::with_capacity(col_lines.len());
        for line in col_lines {
            let bare = line.strip_suffix(',').unwrap_or(line);
            let bare = bare.strip_prefix("  ").ok_or_else(|| {
                TableError::SchemaParse(format!("Unrecognized column line: {line:?}"))
            })?;
            columns.push(Self::parse_column(bare)?);
        }

        let schema = RowSchema::new(columns)
            .map_err(|e| TableError::SchemaParse(format!("Parsed schema is invalid: {e}")))?;
        Ok((table.to_string(), schema))
    }

    /// Matches one column line against every candidate column shape.
    fn parse_column(line: &str) -> Result<ColumnDef, TableError> {
        let name = line
            .strip_prefix('"')
            .and_then(|rest| rest.split('"').next())
            .filter(|n| is_identifier(n))
            .ok_or_else(|| {
                TableError::SchemaParse(format!("Unrecognized column line: {line:?}"))
            })?;

        let mut matched: Option<ColumnDef> = None;
        for col_type in ColumnType::ALL {
            let nullabilities: &[bool] = if col_type == ColumnType::RowidAlias {
                &[false]
            } else {
                &[false, true]
            };
            for &nullable in nullabilities {
                let candidate = ColumnDef {
                    name: name.to_string(),
                    col_type,
                    nullable,
                };
                if candidate.ddl() == line {
                    if matched.is_some() {
                        return Err(TableError::SchemaParse(format!(
                            "Ambiguous column line: {line:?}"
                        )));
                    }
                    matched = Some(candidate);
                }
            }
        }
        matched.ok_or_else(|| {
            TableError::SchemaParse(format!("No known column shape matches: {line:?}"))
        })
    }
}

/// True iff `s` matches `^\w+$` (ASCII letters, digits, underscore).
pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_schema() -> RowSchema {
        RowSchema::new(vec![
            ColumnDef::new("id", ColumnType::RowidAlias),
            ColumnDef::new("flag", ColumnType::Bool),
            ColumnDef::new("n", ColumnType::Integer),
            ColumnDef::new("x", ColumnType::Float).nullable(),
            ColumnDef::new("name", ColumnType::Text),
            ColumnDef::new("at", ColumnType::Timestamp),
            ColumnDef::new("day", ColumnType::Date).nullable(),
            ColumnDef::new("tod", ColumnType::Time),
            ColumnDef::new("meta", ColumnType::Json).nullable(),
            ColumnDef::new("blob", ColumnType::Serialized),
        ])
        .unwrap()
    }

    #[test]
    fn compile_emits_expected_ddl() {
        let schema = RowSchema::new(vec![
            ColumnDef::new("id", ColumnType::RowidAlias),
            ColumnDef::new("age", ColumnType::Integer),
            ColumnDef::new("note", ColumnType::Text).nullable(),
        ])
        .unwrap();

        let ddl = schema.compile("users", None);
        assert_eq!(
            ddl,
            "CREATE TABLE \"users\" (\n  \
             \"id\" integer PRIMARY KEY,\n  \
             \"age\" int NOT NULL CHECK (typeof(\"age\") = 'integer'),\n  \
             \"note\" text CHECK (typeof(\"note\") = 'text')\n)"
        );
    }

    #[test]
    fn compile_appends_constraints_after_marker() {
        let schema =
            RowSchema::new(vec![ColumnDef::new("k", ColumnType::Text)]).unwrap();
        let ddl = schema.compile("kv", Some("UNIQUE (\"k\")"));
        assert!(ddl.contains("  -- constraints\n  , UNIQUE (\"k\")\n)"));
    }

    #[test]
    fn parse_compile_roundtrip_all_tags() {
        let schema = full_schema();
        let ddl = schema.compile("everything", None);
        let (name, parsed) = RowSchema::parse(&ddl).unwrap();
        assert_eq!(name, "everything");
        assert_eq!(parsed, schema);
    }

    #[test]
    fn parse_compile_roundtrip_with_constraints() {
        let schema = RowSchema::new(vec![
            ColumnDef::new("a", ColumnType::Integer),
            ColumnDef::new("b", ColumnType::Text),
        ])
        .unwrap();
        let ddl = schema.compile("t", Some("UNIQUE (\"a\")"));
        let (name, parsed) = RowSchema::parse(&ddl).unwrap();
        assert_eq!(name, "t");
        assert_eq!(parsed, schema);
    }

    #[test]
    fn parse_rejects_foreign_ddl() {
        let err = RowSchema::parse("CREATE TABLE t (a INTEGER)").unwrap_err();
        assert!(matches!(err, TableError::SchemaParse(_)));

        // Right line structure, unknown column shape.
        let err = RowSchema::parse(
            "CREATE TABLE \"t\" (\n  \"a\" varchar(10) NOT NULL\n)",
        )
        .unwrap_err();
        assert!(matches!(err, TableError::SchemaParse(_)));
    }

    #[test]
    fn parse_rejects_malformed_constraints_section() {
        let ddl = "CREATE TABLE \"t\" (\n  \"a\" int NOT NULL CHECK (typeof(\"a\") = 'integer')\n  -- constraints\n)";
        let err = RowSchema::parse(ddl).unwrap_err();
        assert!(matches!(err, TableError::SchemaParse(_)));
    }

    #[test]
    fn schema_rejects_duplicate_columns() {
        let err = RowSchema::new(vec![
            ColumnDef::new("a", ColumnType::Integer),
            ColumnDef::new("a", ColumnType::Text),
        ])
        .unwrap_err();
        assert!(matches!(err, TableError::InvalidSchema(_)));
    }

    #[test]
    fn schema_rejects_bad_identifiers() {
        let err = RowSchema::new(vec![ColumnDef::new("bad name", ColumnType::Text)])
            .unwrap_err();
        assert!(matches!(err, TableError::InvalidSchema(_)));
        let err =
            RowSchema::new(vec![ColumnDef::new("", ColumnType::Text)]).unwrap_err();
        assert!(matches!(err, TableError::InvalidSchema(_)));
    }

    #[test]
    fn schema_rejects_two_rowid_aliases() {
        let err = RowSchema::new(vec![
            ColumnDef::new("a", ColumnType::RowidAlias),
            ColumnDef::new("b", ColumnType::RowidAlias),
        ])
        .unwrap_err();
        assert!(matches!(err, TableError::InvalidSchema(_)));
    }

    #[test]
    fn schema_rejects_nullable_rowid_alias() {
        let err = RowSchema::new(vec![
            ColumnDef::new("a", ColumnType::RowidAlias).nullable()
        ])
        .unwrap_err();
        assert!(matches!(err, TableError::InvalidSchema(_)));
    }

    #[test]
    fn schema_rejects_empty() {
        assert!(matches!(
            RowSchema::new(vec![]).unwrap_err(),
            TableError::InvalidSchema(_)
        ));
    }
}
