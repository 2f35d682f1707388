//! Batched write path: one bulk copy per batch, degrading to row-by-row
//! upserts so a single rejected row cannot poison the rest.

use crate::blocking::sql::SqlAdapter;
use crate::error::{Result, SyncError};
use crate::schema::SqlValue;
use bson::Document;
use tracing::{error, warn};

/// Write a whole batch for `ns`.
///
/// On return every row has either been committed or, under the unsafe
/// policy, logged and skipped.
pub fn write_batch(
    sql: &mut SqlAdapter,
    ns: &str,
    rows: Vec<Vec<SqlValue>>,
    unsafe_mode: bool,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    match sql.copy_data(ns, &rows) {
        Ok(()) => Ok(()),
        Err(err @ SyncError::Postgres { .. }) => {
            warn!(%ns, rows = rows.len(), error = %err, "bulk copy failed, falling back to row-by-row upserts");
            for row in &rows {
                if let Err(e) = sql.upsert_row(ns, row) {
                    absorb_row_error(sql, ns, &format!("{:?}", row), unsafe_mode, e)?;
                }
            }
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Upsert one source document, applying the poisoned-row policy.
pub fn upsert_doc_shielded(
    sql: &mut SqlAdapter,
    ns: &str,
    doc: &Document,
    unsafe_mode: bool,
) -> Result<()> {
    if let Err(e) = sql.upsert_ns(ns, doc) {
        absorb_row_error(sql, ns, &format!("{:?}", doc), unsafe_mode, e)?;
    }
    Ok(())
}

// The unsafe policy only ever swallows errors the target itself reported
// with row-level structure; everything else surfaces.
fn absorb_row_error(
    sql: &SqlAdapter,
    ns: &str,
    row: &str,
    unsafe_mode: bool,
    err: SyncError,
) -> Result<()> {
    if unsafe_mode && sql.supports_row_skip() {
        if let SyncError::Postgres { source } = &err {
            if source.as_db_error().is_some() {
                warn!(%ns, row, error = %err, "ignoring row rejected by the target");
                return Ok(());
            }
        }
    }
    error!(%ns, row, error = %err, "row write failed");
    Err(err)
}
