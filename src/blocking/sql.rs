//! Column-wise PostgreSQL adapter: DDL, bulk copy, upserts and keyed deletes
//! over rows shaped by the schema transform.

use crate::error::{Result, SyncError};
use crate::schema::{CollectionSpec, SchemaMap, SqlValue, EXTRA_PROPS_COLUMN};
use crate::ID_KEY;
use bson::Document;
use postgres::binary_copy::BinaryCopyInWriter;
use postgres::types::ToSql;
use postgres::Client;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub struct SqlAdapter {
    client: Client,
    schema: Arc<SchemaMap>,
}

impl SqlAdapter {
    pub fn new(client: Client, schema: Arc<SchemaMap>) -> SqlAdapter {
        SqlAdapter { client, schema }
    }

    /// Whether individually rejected rows may be dropped under the unsafe
    /// policy. PostgreSQL reports enough structure per row to allow it.
    pub fn supports_row_skip(&self) -> bool {
        true
    }

    /// Apply the DDL for every configured table, dropping first when asked.
    /// A table shared by several namespaces is handled once.
    pub fn create_schema(&mut self, drop_first: bool) -> Result<()> {
        let schema = self.schema.clone();
        let mut seen = HashSet::new();
        for spec in schema.specs() {
            if !seen.insert(spec.table.as_str()) {
                continue;
            }
            if drop_first {
                self.client
                    .batch_execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&spec.table)))?;
            }
            self.client.batch_execute(&build_create_table(spec))?;
            debug!(table = %spec.table, drop_first, "applied table ddl");
        }
        Ok(())
    }

    pub fn truncate(&mut self, table: &str) -> Result<()> {
        self.client
            .batch_execute(&format!("TRUNCATE TABLE {}", quote_ident(table)))?;
        Ok(())
    }

    /// Load a whole batch in one `COPY … FROM STDIN` round trip.
    pub fn copy_data(&mut self, ns: &str, rows: &[Vec<SqlValue>]) -> Result<()> {
        let schema = self.schema.clone();
        let spec = find_spec(&schema, ns)?;
        let sink = self.client.copy_in(build_copy(spec).as_str())?;
        let types = spec.column_types();
        let mut writer = BinaryCopyInWriter::new(sink, &types);
        for row in rows {
            let params: Vec<&(dyn ToSql + Sync)> =
                row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            writer.write(&params)?;
        }
        writer.finish()?;
        Ok(())
    }

    /// Single-row upsert keyed on the primary SQL key.
    pub fn upsert_row(&mut self, ns: &str, row: &[SqlValue]) -> Result<()> {
        let schema = self.schema.clone();
        let spec = find_spec(&schema, ns)?;
        let stmt = build_upsert(spec);
        let params: Vec<&(dyn ToSql + Sync)> =
            row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        self.client.execute(stmt.as_str(), &params)?;
        Ok(())
    }

    /// Transform one source document and upsert the result.
    pub fn upsert_ns(&mut self, ns: &str, doc: &Document) -> Result<()> {
        let row = self.schema.transform(ns, doc)?;
        self.upsert_row(ns, &row)
    }

    /// Delete the row whose primary SQL key matches the selector's `_id`.
    pub fn delete_ns(&mut self, ns: &str, selector: &Document) -> Result<()> {
        let schema = self.schema.clone();
        let spec = find_spec(&schema, ns)?;
        let id = selector
            .get(ID_KEY)
            .ok_or_else(|| SyncError::NoSelectorId { ns: ns.to_string() })?;
        let key = schema.transform_id(ns, id)?;
        let rows = self
            .client
            .execute(build_delete(spec).as_str(), &[&key])?;
        debug!(%ns, rows, "applied delete");
        Ok(())
    }
}

fn find_spec<'a>(schema: &'a SchemaMap, ns: &str) -> Result<&'a CollectionSpec> {
    schema
        .find_ns(ns)
        .ok_or_else(|| SyncError::UnknownNamespace { ns: ns.to_string() })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(spec: &CollectionSpec) -> String {
    spec.all_column_names()
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_create_table(spec: &CollectionSpec) -> String {
    let pkey = &spec.pkey_column().name;
    let mut cols: Vec<String> = spec
        .columns
        .iter()
        .map(|c| {
            if &c.name == pkey {
                format!("{} {} PRIMARY KEY", quote_ident(&c.name), c.sql_type)
            } else {
                format!("{} {}", quote_ident(&c.name), c.sql_type)
            }
        })
        .collect();
    if spec.extra_props {
        cols.push(format!("{} jsonb", quote_ident(EXTRA_PROPS_COLUMN)));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&spec.table),
        cols.join(", ")
    )
}

fn build_copy(spec: &CollectionSpec) -> String {
    format!(
        "COPY {} ({}) FROM STDIN (FORMAT binary)",
        quote_ident(&spec.table),
        column_list(spec)
    )
}

fn build_upsert(spec: &CollectionSpec) -> String {
    let names = spec.all_column_names();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${}", i)).collect();
    let pkey = quote_ident(&spec.pkey_column().name);
    let updates: Vec<String> = names
        .iter()
        .map(|n| quote_ident(n))
        .filter(|n| n != &pkey)
        .map(|n| format!("{} = EXCLUDED.{}", n, n))
        .collect();
    if updates.is_empty() {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
            quote_ident(&spec.table),
            column_list(spec),
            placeholders.join(", "),
            pkey
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            quote_ident(&spec.table),
            column_list(spec),
            placeholders.join(", "),
            pkey,
            updates.join(", ")
        )
    }
}

fn build_delete(spec: &CollectionSpec) -> String {
    format!(
        "DELETE FROM {} WHERE {} = $1",
        quote_ident(&spec.table),
        quote_ident(&spec.pkey_column().name)
    )
}
