//! Per-column value codec: native [`Value`] ⇄ SQLite storage value.
//!
//! Pure functions of (declared column type, value). `encode` rejects values
//! whose runtime variant does not match the declared type; `decode` rejects
//! stored data that does not parse under the declared type, which signals
//! the engine's data is inconsistent with the schema.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{Value as SqlValue, ValueRef};

use crate::error::TableError;
use crate::schema::{ColumnDef, ColumnType};
use crate::value::Value;

/// Fixed-width storage format for [`ColumnType::Timestamp`]:
/// `YYYY-MM-DD HH:MM:SS.sss`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
/// Fixed-width storage format for [`ColumnType::Date`]: `YYYY-MM-DD`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Fixed-width storage format for [`ColumnType::Time`]: `HH:MM:SS.sss`.
pub const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Encodes a native value for storage in the given column.
pub fn encode(def: &ColumnDef, value: &Value) -> Result<SqlValue, TableError> {
    if let Value::Null = value {
        if def.nullable {
            return Ok(SqlValue::Null);
        }
        return Err(type_error(def, value));
    }

    match (def.col_type, value) {
        (ColumnType::Bool, Value::Bool(b)) => Ok(SqlValue::Integer(*b as i64)),
        (ColumnType::Integer | ColumnType::RowidAlias, Value::Integer(i)) => {
            Ok(SqlValue::Integer(*i))
        }
        (ColumnType::Float, Value::Float(f)) => Ok(SqlValue::Real(*f)),
        (ColumnType::Text, Value::Text(s)) => Ok(SqlValue::Text(s.clone())),
        (ColumnType::Timestamp, Value::Timestamp(t)) => {
            Ok(SqlValue::Text(t.format(TIMESTAMP_FORMAT).to_string()))
        }
        (ColumnType::Date, Value::Date(d)) => {
            Ok(SqlValue::Text(d.format(DATE_FORMAT).to_string()))
        }
        (ColumnType::Time, Value::Time(t)) => {
            Ok(SqlValue::Text(t.format(TIME_FORMAT).to_string()))
        }
        (ColumnType::Json, Value::Json(j)) => {
            let text = serde_json::to_string(j)
                .map_err(|e| TableError::Serialization(format!("JSON encode: {e}")))?;
            Ok(SqlValue::Text(text))
        }
        (ColumnType::Serialized, Value::Serialized(bytes)) => {
            Ok(SqlValue::Blob(bytes.clone()))
        }
        _ => Err(type_error(def, value)),
    }
}

/// Decodes a stored value back into a native value under the given column.
pub fn decode(def: &ColumnDef, stored: ValueRef<'_>) -> Result<Value, TableError> {
    if let ValueRef::Null = stored {
        if def.nullable {
            return Ok(Value::Null);
        }
        return Err(format_error(def, "NULL stored in a non-nullable column"));
    }

    match def.col_type {
        ColumnType::Bool => match stored {
            ValueRef::Integer(0) => Ok(Value::Bool(false)),
            ValueRef::Integer(1) => Ok(Value::Bool(true)),
            other => Err(format_error(def, &format!("expected 0 or 1, got {other:?}"))),
        },
        ColumnType::Integer | ColumnType::RowidAlias => match stored {
            ValueRef::Integer(i) => Ok(Value::Integer(i)),
            other => Err(format_error(def, &format!("expected an integer, got {other:?}"))),
        },
        ColumnType::Float => match stored {
            ValueRef::Real(f) => Ok(Value::Float(f)),
            other => Err(format_error(def, &format!("expected a real, got {other:?}"))),
        },
        ColumnType::Text => Ok(Value::Text(stored_text(def, stored)?.to_string())),
        ColumnType::Timestamp => {
            let s = fixed_width_text(def, stored, 23)?;
            let t = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                .map_err(|e| format_error(def, &format!("bad timestamp {s:?}: {e}")))?;
            Ok(Value::Timestamp(t))
        }
        ColumnType::Date => {
            let s = fixed_width_text(def, stored, 10)?;
            let d = NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map_err(|e| format_error(def, &format!("bad date {s:?}: {e}")))?;
            Ok(Value::Date(d))
        }
        ColumnType::Time => {
            let s = fixed_width_text(def, stored, 12)?;
            let t = NaiveTime::parse_from_str(s, TIME_FORMAT)
                .map_err(|e| format_error(def, &format!("bad time {s:?}: {e}")))?;
            Ok(Value::Time(t))
        }
        ColumnType::Json => {
            let s = stored_text(def, stored)?;
            let j: serde_json::Value = serde_json::from_str(s)
                .map_err(|e| format_error(def, &format!("bad JSON: {e}")))?;
            Ok(Value::Json(j))
        }
        ColumnType::Serialized => match stored {
            ValueRef::Blob(b) => Ok(Value::Serialized(b.to_vec())),
            other => Err(format_error(def, &format!("expected a blob, got {other:?}"))),
        },
    }
}

fn stored_text<'a>(def: &ColumnDef, stored: ValueRef<'a>) -> Result<&'a str, TableError> {
    match stored {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| format_error(def, &format!("invalid UTF-8: {e}"))),
        other => Err(format_error(def, &format!("expected text, got {other:?}"))),
    }
}

/// The temporal formats are fixed width; anything else is malformed even if
/// a lenient parser would accept it.
fn fixed_width_text<'a>(
    def: &ColumnDef,
    stored: ValueRef<'a>,
    width: usize,
) -> Result<&'a str, TableError> {
    let s = stored_text(def, stored)?;
    if s.len() != width {
        return Err(format_error(
            def,
            &format!("expected {width} characters, got {} in {s:?}", s.len()),
        ));
    }
    Ok(s)
}

fn type_error(def: &ColumnDef, value: &Value) -> TableError {
    TableError::Type {
        column: def.name.clone(),
        expected: def.col_type.native_name(),
        got: value.type_name(),
    }
}

fn format_error(def: &ColumnDef, detail: &str) -> TableError {
    TableError::Format {
        column: def.name.clone(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::json;

    fn roundtrip(def: &ColumnDef, value: Value) {
        let stored = encode(def, &value).unwrap();
        let back = decode(def, ValueRef::from(&stored)).unwrap();
        assert_eq!(back, value, "round-trip failed for {def:?}");
    }

    #[test]
    fn roundtrip_every_tag() {
        roundtrip(&ColumnDef::new("c", ColumnType::Bool), Value::Bool(true));
        roundtrip(&ColumnDef::new("c", ColumnType::Bool), Value::Bool(false));
        roundtrip(&ColumnDef::new("c", ColumnType::Integer), Value::Integer(-42));
        roundtrip(&ColumnDef::new("c", ColumnType::RowidAlias), Value::Integer(7));
        roundtrip(&ColumnDef::new("c", ColumnType::Float), Value::Float(3.5));
        roundtrip(
            &ColumnDef::new("c", ColumnType::Text),
            Value::Text("héllo".into()),
        );
        roundtrip(
            &ColumnDef::new("c", ColumnType::Timestamp),
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, 2)
                    .unwrap()
                    .and_hms_milli_opt(3, 4, 5, 678)
                    .unwrap(),
            ),
        );
        roundtrip(
            &ColumnDef::new("c", ColumnType::Date),
            Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()),
        );
        roundtrip(
            &ColumnDef::new("c", ColumnType::Time),
            Value::Time(NaiveTime::from_hms_milli_opt(23, 59, 58, 1).unwrap()),
        );
        roundtrip(
            &ColumnDef::new("c", ColumnType::Json),
            Value::Json(json!({"a": [1, 2, {"b": null}], "c": "text"})),
        );
        roundtrip(
            &ColumnDef::new("c", ColumnType::Serialized),
            Value::Serialized(vec![0, 1, 2, 255]),
        );
    }

    #[test]
    fn nullable_passes_null_through() {
        let def = ColumnDef::new("c", ColumnType::Integer).nullable();
        assert_eq!(encode(&def, &Value::Null).unwrap(), SqlValue::Null);
        assert_eq!(decode(&def, ValueRef::Null).unwrap(), Value::Null);
    }

    #[test]
    fn null_rejected_for_non_nullable() {
        let def = ColumnDef::new("c", ColumnType::Integer);
        assert!(matches!(
            encode(&def, &Value::Null).unwrap_err(),
            TableError::Type { .. }
        ));
        assert!(matches!(
            decode(&def, ValueRef::Null).unwrap_err(),
            TableError::Format { .. }
        ));
    }

    #[test]
    fn encode_rejects_wrong_variant() {
        let def = ColumnDef::new("age", ColumnType::Integer);
        let err = encode(&def, &Value::Text("five".into())).unwrap_err();
        match err {
            TableError::Type { column, expected, got } => {
                assert_eq!(column, "age");
                assert_eq!(expected, "integer");
                assert_eq!(got, "text");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_rejects_out_of_range_bool() {
        let def = ColumnDef::new("c", ColumnType::Bool);
        assert!(matches!(
            decode(&def, ValueRef::Integer(2)).unwrap_err(),
            TableError::Format { .. }
        ));
    }

    #[test]
    fn decode_rejects_malformed_time_text() {
        let def = ColumnDef::new("c", ColumnType::Timestamp);
        for text in [
            "2024-01-02",             // date only
            "2024-01-02 03:04:05",    // missing millis
            "2024-01-02T03:04:05.678", // wrong separator
            "garbage",
        ] {
            assert!(
                matches!(
                    decode(&def, ValueRef::Text(text.as_bytes())).unwrap_err(),
                    TableError::Format { .. }
                ),
                "accepted malformed timestamp {text:?}"
            );
        }
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let def = ColumnDef::new("c", ColumnType::Json);
        assert!(matches!(
            decode(&def, ValueRef::Text(b"{not json")).unwrap_err(),
            TableError::Format { .. }
        ));
    }

    #[test]
    fn json_decode_materializes_owned_value() {
        // Decoded structures are freshly owned; mutating one decode result
        // must not affect another.
        let def = ColumnDef::new("c", ColumnType::Json);
        let stored = encode(&def, &Value::Json(json!({"k": 1}))).unwrap();
        let a = decode(&def, ValueRef::from(&stored)).unwrap();
        let mut b = decode(&def, ValueRef::from(&stored)).unwrap();
        if let Value::Json(ref mut j) = b {
            j["k"] = json!(2);
        }
        assert_eq!(a, Value::Json(json!({"k": 1})));
    }

    #[test]
    fn pack_unpack_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Point {
            x: f32,
            y: f32,
        }
        let v = Value::pack(&Point { x: 1.5, y: -2.0 }).unwrap();
        let def = ColumnDef::new("c", ColumnType::Serialized);
        let stored = encode(&def, &v).unwrap();
        let back = decode(&def, ValueRef::from(&stored)).unwrap();
        let point: Point = back.unpack().unwrap();
        assert_eq!(point, Point { x: 1.5, y: -2.0 });
    }
}
