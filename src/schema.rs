//! Maps namespaces onto target tables and documents onto ordered rows.

use crate::blocking::streamer::bson_helper;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::ID_KEY;
use bson::{Bson, Document};
use bytes::BytesMut;
use chrono::{DateTime, TimeZone, Utc};
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use std::collections::HashMap;
use std::error::Error as StdError;

/// Trailing column receiving fields not claimed by any mapped column.
pub const EXTRA_PROPS_COLUMN: &str = "_extra_props";

/// The closed set of target column types this engine knows how to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int4,
    Int8,
    Float8,
    Bool,
    TimestampTz,
    Json,
    Jsonb,
    Uuid,
    Bytea,
}

impl ColumnType {
    pub fn from_sql_type(sql_type: &str) -> Option<ColumnType> {
        match sql_type.trim().to_ascii_lowercase().as_str() {
            "text" | "varchar" | "character varying" => Some(ColumnType::Text),
            "integer" | "int" | "int4" => Some(ColumnType::Int4),
            "bigint" | "int8" => Some(ColumnType::Int8),
            "double precision" | "float8" | "double" => Some(ColumnType::Float8),
            "boolean" | "bool" => Some(ColumnType::Bool),
            "timestamptz" | "timestamp with time zone" => Some(ColumnType::TimestampTz),
            "json" => Some(ColumnType::Json),
            "jsonb" => Some(ColumnType::Jsonb),
            "uuid" => Some(ColumnType::Uuid),
            "bytea" => Some(ColumnType::Bytea),
            _ => None,
        }
    }

    /// wire type handed to the binary copy writer.
    pub fn pg_type(self) -> Type {
        match self {
            ColumnType::Text => Type::TEXT,
            ColumnType::Int4 => Type::INT4,
            ColumnType::Int8 => Type::INT8,
            ColumnType::Float8 => Type::FLOAT8,
            ColumnType::Bool => Type::BOOL,
            ColumnType::TimestampTz => Type::TIMESTAMPTZ,
            ColumnType::Json => Type::JSON,
            ColumnType::Jsonb => Type::JSONB,
            ColumnType::Uuid => Type::UUID,
            ColumnType::Bytea => Type::BYTEA,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub source: String,
    pub sql_type: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub db: String,
    pub coll: String,
    pub table: String,
    pub extra_props: bool,
    pub columns: Vec<Column>,
    pkey_idx: usize,
}

impl CollectionSpec {
    pub fn ns(&self) -> String {
        format!("{}.{}", self.db, self.coll)
    }

    pub fn pkey_column(&self) -> &Column {
        &self.columns[self.pkey_idx]
    }

    /// ordered column names, including the extra-props column when enabled.
    pub fn all_column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        if self.extra_props {
            names.push(EXTRA_PROPS_COLUMN);
        }
        names
    }

    /// ordered wire types matching [all_column_names](CollectionSpec::all_column_names).
    pub fn column_types(&self) -> Vec<Type> {
        let mut types: Vec<Type> = self.columns.iter().map(|c| c.ty.pg_type()).collect();
        if self.extra_props {
            types.push(Type::JSONB);
        }
        types
    }
}

/// Validated view over the `[[sync]]` configuration, keyed by namespace.
#[derive(Debug)]
pub struct SchemaMap {
    specs: Vec<CollectionSpec>,
    by_ns: HashMap<String, usize>,
}

impl SchemaMap {
    pub fn from_config(config: &Config) -> Result<SchemaMap> {
        let mut specs = Vec::with_capacity(config.sync_specs().len());
        let mut by_ns = HashMap::new();
        for raw in config.sync_specs() {
            let mut columns = Vec::with_capacity(raw.columns().len());
            let mut pkey_idx = None;
            for (idx, col) in raw.columns().iter().enumerate() {
                let ty = ColumnType::from_sql_type(col.sql_type()).ok_or_else(|| {
                    SyncError::UnsupportedColumnType {
                        table: raw.table().to_string(),
                        column: col.name().to_string(),
                        sql_type: col.sql_type().to_string(),
                    }
                })?;
                if col.source() == ID_KEY {
                    pkey_idx.get_or_insert(idx);
                }
                columns.push(Column {
                    name: col.name().to_string(),
                    source: col.source().to_string(),
                    sql_type: col.sql_type().to_string(),
                    ty,
                });
            }
            let spec = CollectionSpec {
                db: raw.db().to_string(),
                coll: raw.coll().to_string(),
                table: raw.table().to_string(),
                extra_props: raw.extra_props(),
                columns,
                pkey_idx: pkey_idx.ok_or_else(|| SyncError::NoPrimaryKey {
                    ns: format!("{}.{}", raw.db(), raw.coll()),
                })?,
            };
            by_ns.insert(spec.ns(), specs.len());
            specs.push(spec);
        }
        Ok(SchemaMap { specs, by_ns })
    }

    pub fn specs(&self) -> &[CollectionSpec] {
        &self.specs
    }

    pub fn find_ns(&self, ns: &str) -> Option<&CollectionSpec> {
        self.by_ns.get(ns).map(|&idx| &self.specs[idx])
    }

    /// configured collections of one database, in configuration order.
    pub fn find_db(&self, db: &str) -> Vec<&CollectionSpec> {
        self.specs.iter().filter(|s| s.db == db).collect()
    }

    /// configured databases, in first-appearance order.
    pub fn databases(&self) -> Vec<&str> {
        let mut dbs: Vec<&str> = Vec::new();
        for spec in &self.specs {
            if !dbs.contains(&spec.db.as_str()) {
                dbs.push(&spec.db);
            }
        }
        dbs
    }

    pub fn primary_sql_key_for_ns(&self, ns: &str) -> Option<&str> {
        self.find_ns(ns).map(|s| s.pkey_column().name.as_str())
    }

    /// Map one source document to an ordered row for `ns`.
    pub fn transform(&self, ns: &str, doc: &Document) -> Result<Vec<SqlValue>> {
        let spec = self
            .find_ns(ns)
            .ok_or_else(|| SyncError::UnknownNamespace { ns: ns.to_string() })?;
        let mut row = Vec::with_capacity(spec.columns.len() + 1);
        for col in &spec.columns {
            let value = bson_helper::lookup_path(doc, &col.source);
            row.push(bson_to_sql(value, col, &spec.table)?);
        }
        if spec.extra_props {
            row.push(SqlValue::Json(extra_props_json(doc, spec)));
        }
        Ok(row)
    }

    /// Translate a bare `_id` value into the primary SQL key for `ns`.
    pub fn transform_id(&self, ns: &str, id: &Bson) -> Result<SqlValue> {
        let spec = self
            .find_ns(ns)
            .ok_or_else(|| SyncError::UnknownNamespace { ns: ns.to_string() })?;
        bson_to_sql(Some(id), spec.pkey_column(), &spec.table)
    }
}

/// One scalar of a row, already shaped for its target column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Text(String),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Uuid(uuid::Uuid),
    Bytes(Vec<u8>),
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql_checked(ty, out),
            SqlValue::Int4(v) => v.to_sql_checked(ty, out),
            SqlValue::Int8(v) => v.to_sql_checked(ty, out),
            SqlValue::Float8(v) => v.to_sql_checked(ty, out),
            SqlValue::Text(v) => v.to_sql_checked(ty, out),
            SqlValue::TimestampTz(v) => v.to_sql_checked(ty, out),
            SqlValue::Json(v) => v.to_sql_checked(ty, out),
            SqlValue::Uuid(v) => v.to_sql_checked(ty, out),
            SqlValue::Bytes(v) => v.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // per-variant validation happens in the delegated to_sql_checked call.
        true
    }

    to_sql_checked!();
}

fn coercion_error(col: &Column, table: &str, value: &Bson) -> SyncError {
    SyncError::ValueCoercion {
        table: table.to_string(),
        column: col.name.clone(),
        value: format!("{:?}", value),
    }
}

fn bson_to_sql(value: Option<&Bson>, col: &Column, table: &str) -> Result<SqlValue> {
    let value = match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => return Ok(SqlValue::Null),
        Some(v) => v,
    };

    match col.ty {
        ColumnType::Text => Ok(SqlValue::Text(match value {
            Bson::String(s) => s.clone(),
            Bson::Symbol(s) => s.clone(),
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::Int32(v) => v.to_string(),
            Bson::Int64(v) => v.to_string(),
            Bson::Double(v) => v.to_string(),
            Bson::Boolean(v) => v.to_string(),
            Bson::Decimal128(v) => v.to_string(),
            Bson::DateTime(dt) => bson_datetime(dt)
                .ok_or_else(|| coercion_error(col, table, value))?
                .to_rfc3339(),
            other => other.clone().into_relaxed_extjson().to_string(),
        })),
        ColumnType::Int4 => match value {
            Bson::Int32(v) => Ok(SqlValue::Int4(*v)),
            Bson::Int64(v) => i32::try_from(*v)
                .map(SqlValue::Int4)
                .map_err(|_| coercion_error(col, table, value)),
            Bson::Double(v) if v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64 => {
                Ok(SqlValue::Int4(*v as i32))
            }
            _ => Err(coercion_error(col, table, value)),
        },
        ColumnType::Int8 => match value {
            Bson::Int32(v) => Ok(SqlValue::Int8(*v as i64)),
            Bson::Int64(v) => Ok(SqlValue::Int8(*v)),
            Bson::Double(v) if v.fract() == 0.0 => Ok(SqlValue::Int8(*v as i64)),
            _ => Err(coercion_error(col, table, value)),
        },
        ColumnType::Float8 => match value {
            Bson::Double(v) => Ok(SqlValue::Float8(*v)),
            Bson::Int32(v) => Ok(SqlValue::Float8(*v as f64)),
            Bson::Int64(v) => Ok(SqlValue::Float8(*v as f64)),
            _ => Err(coercion_error(col, table, value)),
        },
        ColumnType::Bool => match value {
            Bson::Boolean(v) => Ok(SqlValue::Bool(*v)),
            _ => Err(coercion_error(col, table, value)),
        },
        ColumnType::TimestampTz => match value {
            Bson::DateTime(dt) => bson_datetime(dt)
                .map(SqlValue::TimestampTz)
                .ok_or_else(|| coercion_error(col, table, value)),
            Bson::Timestamp(ts) => Utc
                .timestamp_opt(ts.time as i64, 0)
                .single()
                .map(SqlValue::TimestampTz)
                .ok_or_else(|| coercion_error(col, table, value)),
            _ => Err(coercion_error(col, table, value)),
        },
        ColumnType::Json | ColumnType::Jsonb => {
            Ok(SqlValue::Json(value.clone().into_relaxed_extjson()))
        }
        ColumnType::Uuid => match value {
            Bson::Binary(_) => bson_helper::uuid_from_bson(value)
                .map(SqlValue::Uuid)
                .ok_or_else(|| coercion_error(col, table, value)),
            Bson::String(s) => uuid::Uuid::parse_str(s)
                .map(SqlValue::Uuid)
                .map_err(|_| coercion_error(col, table, value)),
            _ => Err(coercion_error(col, table, value)),
        },
        ColumnType::Bytea => match value {
            Bson::Binary(bin) => Ok(SqlValue::Bytes(bin.bytes.clone())),
            _ => Err(coercion_error(col, table, value)),
        },
    }
}

fn bson_datetime(dt: &bson::DateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(dt.timestamp_millis()).single()
}

/// Everything in `doc` whose top-level field feeds no mapped column.
fn extra_props_json(doc: &Document, spec: &CollectionSpec) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in doc.iter() {
        let consumed = spec
            .columns
            .iter()
            .any(|c| c.source == *key || c.source.split('.').next() == Some(key.as_str()));
        if !consumed {
            map.insert(key.clone(), value.clone().into_relaxed_extjson());
        }
    }
    serde_json::Value::Object(map)
}
