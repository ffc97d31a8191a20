//! Typed workspace tables.
//!
//! A row type declares its table name and column list once, at compile
//! time. DDL, inserts and reads are derived from that list and the row's
//! serde field names, which are its column names.

use crate::error::{ModelError, ModelResult};
use rusqlite::types::Value as SqlValue;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Real,
    Integer,
    /// Nested values (lists) stored as JSON text.
    Json,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            Self::Text | Self::Json => "TEXT",
            Self::Real => "REAL",
            Self::Integer => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

pub(crate) const fn text(name: &'static str) -> Column {
    Column { name, ty: ColumnType::Text, nullable: false }
}
pub(crate) const fn real(name: &'static str) -> Column {
    Column { name, ty: ColumnType::Real, nullable: false }
}
pub(crate) const fn int(name: &'static str) -> Column {
    Column { name, ty: ColumnType::Integer, nullable: false }
}
pub(crate) const fn json(name: &'static str) -> Column {
    Column { name, ty: ColumnType::Json, nullable: false }
}
pub(crate) const fn nullable(c: Column) -> Column {
    Column { nullable: true, ..c }
}

/// A row type that can live in a workspace table.
pub trait TableRow: Serialize + DeserializeOwned {
    const TABLE: &'static str;
    const COLUMNS: &'static [Column];
}

pub(crate) fn create_sql<T: TableRow>(qualified: &str) -> String {
    let columns: Vec<String> = T::COLUMNS
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("{} {}{null}", c.name, c.ty.sql())
        })
        .collect();
    format!("CREATE TABLE IF NOT EXISTS {qualified} ({});", columns.join(", "))
}

pub(crate) fn insert_sql<T: TableRow>(qualified: &str) -> String {
    let names: Vec<&str> = T::COLUMNS.iter().map(|c| c.name).collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {qualified} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}

pub(crate) fn select_sql<T: TableRow>(qualified: &str) -> String {
    let names: Vec<&str> = T::COLUMNS.iter().map(|c| c.name).collect();
    format!("SELECT {} FROM {qualified}", names.join(", "))
}

/// Bind values for one row, in column order.
pub(crate) fn row_values<T: TableRow>(row: &T) -> ModelResult<Vec<SqlValue>> {
    let Value::Object(fields) = serde_json::to_value(row)? else {
        return Err(ModelError::ingestion(T::TABLE, "row is not a record"));
    };
    T::COLUMNS
        .iter()
        .map(|c| to_sql_value::<T>(c, fields.get(c.name)))
        .collect()
}

fn to_sql_value<T: TableRow>(col: &Column, value: Option<&Value>) -> ModelResult<SqlValue> {
    let bad = |what: &str| ModelError::ingestion(T::TABLE, format!("column {} {what}", col.name));
    let value = match value {
        None | Some(Value::Null) if col.nullable => return Ok(SqlValue::Null),
        None | Some(Value::Null) => return Err(bad("is missing or not finite")),
        Some(v) => v,
    };
    Ok(match col.ty {
        ColumnType::Text => SqlValue::Text(value.as_str().ok_or_else(|| bad("is not text"))?.to_string()),
        ColumnType::Real => SqlValue::Real(value.as_f64().ok_or_else(|| bad("is not a number"))?),
        ColumnType::Integer => SqlValue::Integer(value.as_i64().ok_or_else(|| bad("is not an integer"))?),
        ColumnType::Json => SqlValue::Text(value.to_string()),
    })
}

/// Rebuild a typed row from a `select_sql` result row.
pub(crate) fn from_sql_row<T: TableRow>(row: &rusqlite::Row<'_>) -> ModelResult<T> {
    let mut map = Map::with_capacity(T::COLUMNS.len());
    for (idx, col) in T::COLUMNS.iter().enumerate() {
        let value = match col.ty {
            ColumnType::Text => row.get::<_, Option<String>>(idx)?.map(Value::String),
            ColumnType::Integer => row.get::<_, Option<i64>>(idx)?.map(Value::from),
            ColumnType::Real => match row.get::<_, Option<f64>>(idx)? {
                Some(v) => Some(Value::Number(Number::from_f64(v).ok_or_else(|| {
                    ModelError::ingestion(T::TABLE, format!("column {} is not finite", col.name))
                })?)),
                None => None,
            },
            ColumnType::Json => match row.get::<_, Option<String>>(idx)? {
                Some(text) => Some(serde_json::from_str(&text)?),
                None => None,
            },
        };
        map.insert(col.name.to_string(), value.unwrap_or(Value::Null));
    }
    serde_json::from_value(Value::Object(map))
        .map_err(|e| ModelError::ingestion(T::TABLE, e.to_string()))
}
