//! Structured filter / update / projection specifications and their
//! translation into parameterized SQL fragments.
//!
//! Translation never interpolates values into SQL text; every native value
//! travels as a bind parameter. Field-equality forms are encoded through the
//! column codec using the declared column type, while the raw pass-through
//! forms convert values by their runtime variant.

use std::collections::HashSet;

use rusqlite::types::Value as SqlValue;

use crate::error::TableError;
use crate::schema::RowSchema;
use crate::value::{Row, Value};

/// Reserved prefix for SET-clause parameter names, keeping them disjoint
/// from WHERE-clause parameters when both are merged into one bind set.
pub(crate) const SET_PREFIX: &str = "set_";

/// Reserved output name the rowid is projected under.
pub(crate) const ROWID_NAME: &str = "_rowid_";

// ─────────────────────────────────────────────
// Specs
// ─────────────────────────────────────────────

/// A WHERE-clause specification.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Conjunction of per-column equality tests. An empty row translates to
    /// the always-true predicate and matches every row. `Value::Null` tests
    /// `IS NULL`.
    Fields(Row),
    /// Raw SQL fragment, no parameters.
    Raw(String),
    /// SQL fragment with positional `?` placeholders.
    Positional(String, Vec<Value>),
    /// SQL fragment with named `:name` placeholders.
    Named(String, Vec<(String, Value)>),
}

impl Query {
    /// Matches every row.
    pub fn all() -> Self {
        Query::Fields(Row::new())
    }

    /// Equality test on a single column.
    pub fn field(name: &str, value: impl Into<Value>) -> Self {
        Query::Fields(Row::new().with(name, value))
    }

    pub fn fields(row: Row) -> Self {
        Query::Fields(row)
    }

    pub fn raw(sql: &str) -> Self {
        Query::Raw(sql.to_string())
    }

    pub fn positional(sql: &str, values: Vec<Value>) -> Self {
        Query::Positional(sql.to_string(), values)
    }

    pub fn named(sql: &str, params: Vec<(String, Value)>) -> Self {
        Query::Named(sql.to_string(), params)
    }
}

/// A SET-clause specification, mirroring the shapes of [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub enum SetClause {
    /// Per-column assignments, encoded by declared column type.
    Fields(Row),
    Raw(String),
    Positional(String, Vec<Value>),
    Named(String, Vec<(String, Value)>),
}

impl SetClause {
    /// Assignment of a single column.
    pub fn field(name: &str, value: impl Into<Value>) -> Self {
        SetClause::Fields(Row::new().with(name, value))
    }

    pub fn fields(row: Row) -> Self {
        SetClause::Fields(row)
    }

    pub fn raw(sql: &str) -> Self {
        SetClause::Raw(sql.to_string())
    }
}

/// An output-column selection specification.
#[derive(Debug, Clone, PartialEq)]
pub enum Select {
    /// Every declared column.
    All,
    /// One named column.
    Column(String),
    /// The engine rowid, projected as `"_rowid_"`.
    Rowid,
    /// An ordered list of selections (no nested [`Select::All`]).
    Columns(Vec<Select>),
    /// Every declared column except the named ones, in declared order.
    Exclude(Vec<String>),
}

/// Bind parameters accompanying a translated fragment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Params {
    None,
    Positional(Vec<SqlValue>),
    /// Keys are stored without the leading `:`.
    Named(Vec<(String, SqlValue)>),
}

// ─────────────────────────────────────────────
// Translation
// ─────────────────────────────────────────────

/// Translates a WHERE specification into `(fragment, params)`.
///
/// Field-equality forms are rejected with
/// [`TableError::UnreliableColumn`] if any referenced column failed the
/// bind-time re-serialization self-check.
pub(crate) fn where_clause(
    schema: &RowSchema,
    unreliable: &HashSet<String>,
    query: &Query,
) -> Result<(String, Params), TableError> {
    match query {
        Query::Raw(sql) => Ok((sql.clone(), Params::None)),
        Query::Positional(sql, values) => Ok((
            sql.clone(),
            Params::Positional(values.iter().map(Value::to_sql_value).collect()),
        )),
        Query::Named(sql, params) => Ok((
            sql.clone(),
            Params::Named(
                params
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_sql_value()))
                    .collect(),
            ),
        )),
        Query::Fields(row) => {
            let bad: Vec<String> = row
                .iter()
                .filter(|(name, _)| unreliable.contains(*name))
                .map(|(name, _)| name.to_string())
                .collect();
            if !bad.is_empty() {
                return Err(TableError::UnreliableColumn { columns: bad });
            }

            if row.is_empty() {
                return Ok(("1".to_string(), Params::None));
            }

            let mut conds = Vec::with_capacity(row.len());
            let mut params = Vec::new();
            for (name, value) in row.iter() {
                let def = schema
                    .column(name)
                    .ok_or_else(|| TableError::Argument(format!("unknown column: {name}")))?;
                if let Value::Null = value {
                    conds.push(format!("\"{name}\" IS NULL"));
                } else {
                    conds.push(format!("\"{name}\" = :{name}"));
                    params.push((name.to_string(), crate::codec::encode(def, value)?));
                }
            }
            let params = if params.is_empty() {
                Params::None
            } else {
                Params::Named(params)
            };
            Ok((conds.join(" AND "), params))
        }
    }
}

/// Translates a SET specification into `(fragment, params)`. Field-form
/// parameter names carry the reserved [`SET_PREFIX`].
pub(crate) fn set_clause(
    schema: &RowSchema,
    set: &SetClause,
) -> Result<(String, Params), TableError> {
    match set {
        SetClause::Raw(sql) => Ok((sql.clone(), Params::None)),
        SetClause::Positional(sql, values) => Ok((
            sql.clone(),
            Params::Positional(values.iter().map(Value::to_sql_value).collect()),
        )),
        SetClause::Named(sql, params) => Ok((
            sql.clone(),
            Params::Named(
                params
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_sql_value()))
                    .collect(),
            ),
        )),
        SetClause::Fields(row) => {
            if row.is_empty() {
                return Err(TableError::Argument(
                    "update requires at least one column assignment".into(),
                ));
            }
            let mut assigns = Vec::with_capacity(row.len());
            let mut params = Vec::with_capacity(row.len());
            for (name, value) in row.iter() {
                let def = schema
                    .column(name)
                    .ok_or_else(|| TableError::Argument(format!("unknown column: {name}")))?;
                assigns.push(format!("\"{name}\" = :{SET_PREFIX}{name}"));
                params.push((format!("{SET_PREFIX}{name}"), crate::codec::encode(def, value)?));
            }
            Ok((assigns.join(", "), Params::Named(params)))
        }
    }
}

/// Merges SET-clause parameters with WHERE-clause parameters into one bind
/// set. SET text precedes WHERE text in an UPDATE statement, so positional
/// SET values come first.
///
/// A name collision between the two named sets indicates a prefixing bug in
/// this layer (the `set_` prefix exists to prevent it), so it panics rather
/// than returning an error.
pub(crate) fn merge_params(set: Params, filter: Params) -> Result<Params, TableError> {
    match (set, filter) {
        (Params::None, other) | (other, Params::None) => Ok(other),
        (Params::Positional(mut a), Params::Positional(b)) => {
            a.extend(b);
            Ok(Params::Positional(a))
        }
        (Params::Named(mut a), Params::Named(b)) => {
            for (key, _) in &b {
                assert!(
                    a.iter().all(|(k, _)| k != key),
                    "parameter name collision between SET and WHERE clauses: {key}"
                );
            }
            a.extend(b);
            Ok(Params::Named(a))
        }
        _ => Err(TableError::Argument(
            "cannot mix positional and named parameters between SET and WHERE clauses".into(),
        )),
    }
}

/// Translates a selection specification into a SELECT column list fragment.
pub(crate) fn select_clause(schema: &RowSchema, select: &Select) -> Result<String, TableError> {
    match select {
        Select::All => Ok("*".to_string()),
        Select::Rowid => Ok(format!("rowid AS \"{ROWID_NAME}\"")),
        Select::Column(name) => {
            if schema.column(name).is_none() {
                return Err(TableError::Argument(format!("unknown column: {name}")));
            }
            Ok(format!("\"{name}\""))
        }
        Select::Columns(items) => {
            if items.is_empty() {
                return Err(TableError::Argument("empty column list".into()));
            }
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                if matches!(item, Select::All) {
                    return Err(TableError::Argument(
                        "Select::All cannot appear inside a column list".into(),
                    ));
                }
                parts.push(select_clause(schema, item)?);
            }
            Ok(parts.join(", "))
        }
        Select::Exclude(names) => {
            for name in names {
                if schema.column(name).is_none() {
                    return Err(TableError::Argument(format!("unknown column: {name}")));
                }
            }
            let kept: Vec<Select> = schema
                .columns()
                .iter()
                .filter(|c| !names.contains(&c.name))
                .map(|c| Select::Column(c.name.clone()))
                .collect();
            if kept.is_empty() {
                return Err(TableError::Argument(
                    "selection excludes every column".into(),
                ));
            }
            select_clause(schema, &Select::Columns(kept))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType};

    fn schema() -> RowSchema {
        RowSchema::new(vec![
            ColumnDef::new("a", ColumnType::Integer),
            ColumnDef::new("b", ColumnType::Text),
            ColumnDef::new("c", ColumnType::Json).nullable(),
        ])
        .unwrap()
    }

    fn no_unreliable() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn empty_fields_is_always_true() {
        let (frag, params) =
            where_clause(&schema(), &no_unreliable(), &Query::all()).unwrap();
        assert_eq!(frag, "1");
        assert_eq!(params, Params::None);
    }

    #[test]
    fn fields_translate_to_named_equalities() {
        let q = Query::fields(Row::new().with("a", 3i64).with("b", "x"));
        let (frag, params) = where_clause(&schema(), &no_unreliable(), &q).unwrap();
        assert_eq!(frag, "\"a\" = :a AND \"b\" = :b");
        assert_eq!(
            params,
            Params::Named(vec![
                ("a".into(), SqlValue::Integer(3)),
                ("b".into(), SqlValue::Text("x".into())),
            ])
        );
    }

    #[test]
    fn null_field_becomes_is_null() {
        let q = Query::fields(Row::new().with("c", Value::Null));
        let (frag, params) = where_clause(&schema(), &no_unreliable(), &q).unwrap();
        assert_eq!(frag, "\"c\" IS NULL");
        assert_eq!(params, Params::None);
    }

    #[test]
    fn fields_encode_through_declared_type() {
        // Text value against an Integer column must fail at translation.
        let q = Query::field("a", "not a number");
        let err = where_clause(&schema(), &no_unreliable(), &q).unwrap_err();
        assert!(matches!(err, TableError::Type { .. }));
    }

    #[test]
    fn unknown_column_rejected() {
        let q = Query::field("zz", 1i64);
        let err = where_clause(&schema(), &no_unreliable(), &q).unwrap_err();
        assert!(matches!(err, TableError::Argument(_)));
    }

    #[test]
    fn unreliable_column_rejected_by_name() {
        let mut unreliable = HashSet::new();
        unreliable.insert("c".to_string());
        let q = Query::fields(Row::new().with("a", 1i64).with("c", Value::Null));
        let err = where_clause(&schema(), &unreliable, &q).unwrap_err();
        match err {
            TableError::UnreliableColumn { columns } => assert_eq!(columns, vec!["c"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn raw_and_passthrough_forms() {
        let (frag, params) =
            where_clause(&schema(), &no_unreliable(), &Query::raw("\"a\" > 5")).unwrap();
        assert_eq!(frag, "\"a\" > 5");
        assert_eq!(params, Params::None);

        let (frag, params) = where_clause(
            &schema(),
            &no_unreliable(),
            &Query::positional("\"a\" > ?", vec![Value::Integer(5)]),
        )
        .unwrap();
        assert_eq!(frag, "\"a\" > ?");
        assert_eq!(params, Params::Positional(vec![SqlValue::Integer(5)]));
    }

    #[test]
    fn set_fields_carry_reserved_prefix() {
        let s = SetClause::field("b", "new");
        let (frag, params) = set_clause(&schema(), &s).unwrap();
        assert_eq!(frag, "\"b\" = :set_b");
        assert_eq!(
            params,
            Params::Named(vec![("set_b".into(), SqlValue::Text("new".into()))])
        );
    }

    #[test]
    fn set_and_where_params_merge_disjointly() {
        let (_, set) = set_clause(&schema(), &SetClause::field("b", "x")).unwrap();
        let (_, filter) =
            where_clause(&schema(), &no_unreliable(), &Query::field("b", "y")).unwrap();
        let merged = merge_params(set, filter).unwrap();
        assert_eq!(
            merged,
            Params::Named(vec![
                ("set_b".into(), SqlValue::Text("x".into())),
                ("b".into(), SqlValue::Text("y".into())),
            ])
        );
    }

    #[test]
    #[should_panic(expected = "parameter name collision")]
    fn merge_panics_on_name_collision() {
        let a = Params::Named(vec![("x".into(), SqlValue::Integer(1))]);
        let b = Params::Named(vec![("x".into(), SqlValue::Integer(2))]);
        let _ = merge_params(a, b);
    }

    #[test]
    fn merge_rejects_mixed_styles() {
        let a = Params::Positional(vec![SqlValue::Integer(1)]);
        let b = Params::Named(vec![("x".into(), SqlValue::Integer(2))]);
        assert!(matches!(
            merge_params(a, b).unwrap_err(),
            TableError::Argument(_)
        ));
    }

    #[test]
    fn empty_set_fields_rejected() {
        let err = set_clause(&schema(), &SetClause::fields(Row::new())).unwrap_err();
        assert!(matches!(err, TableError::Argument(_)));
    }

    #[test]
    fn select_variants() {
        let s = schema();
        assert_eq!(select_clause(&s, &Select::All).unwrap(), "*");
        assert_eq!(
            select_clause(&s, &Select::Column("a".into())).unwrap(),
            "\"a\""
        );
        assert_eq!(
            select_clause(&s, &Select::Rowid).unwrap(),
            "rowid AS \"_rowid_\""
        );
        assert_eq!(
            select_clause(
                &s,
                &Select::Columns(vec![Select::Rowid, Select::Column("b".into())])
            )
            .unwrap(),
            "rowid AS \"_rowid_\", \"b\""
        );
        // Exclusion preserves declared order.
        assert_eq!(
            select_clause(&s, &Select::Exclude(vec!["b".into()])).unwrap(),
            "\"a\", \"c\""
        );
    }

    #[test]
    fn select_rejects_unknown_and_degenerate() {
        let s = schema();
        assert!(select_clause(&s, &Select::Column("zz".into())).is_err());
        assert!(select_clause(&s, &Select::Columns(vec![])).is_err());
        assert!(select_clause(&s, &Select::Columns(vec![Select::All])).is_err());
        assert!(select_clause(
            &s,
            &Select::Exclude(vec!["a".into(), "b".into(), "c".into()])
        )
        .is_err());
    }
}
