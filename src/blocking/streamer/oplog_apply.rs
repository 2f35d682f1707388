//! Interpret one oplog entry and apply it against the target.

use super::{bulk, retry};
use crate::blocking::connection::Connection;
use crate::blocking::sql::SqlAdapter;
use crate::config::SyncOpts;
use crate::error::Result;
use crate::schema::SchemaMap;
use crate::{ID_KEY, NAMESPACE_KEY, OBJECT_KEY, OP_KEY, SELECTOR_KEY};
use bson::{doc, Bson, Document};
use tracing::{debug, info, warn};

/// What a single oplog entry asks of the target.
#[derive(Debug, PartialEq)]
pub enum OplogAction {
    /// server bookkeeping, nothing to do.
    Noop { ns: String },
    Insert { ns: String, doc: Document },
    /// inserts into `system.indexes` describe indexes, not data.
    SystemIndexes { ns: String },
    /// full new image; `_id` restored from the update selector.
    ReplaceUpdate { ns: String, doc: Document },
    /// `$`-operator update; the post-image only exists at the source.
    MutatorUpdate { ns: String, id: Bson },
    Delete { ns: String, selector: Document },
    Unknown { ns: String, op: String },
    Malformed { reason: &'static str },
}

impl OplogAction {
    /// namespace the entry names; only malformed entries have none.
    fn ns(&self) -> Option<&str> {
        match self {
            OplogAction::Malformed { .. } => None,
            OplogAction::Noop { ns }
            | OplogAction::Insert { ns, .. }
            | OplogAction::SystemIndexes { ns }
            | OplogAction::ReplaceUpdate { ns, .. }
            | OplogAction::MutatorUpdate { ns, .. }
            | OplogAction::Delete { ns, .. }
            | OplogAction::Unknown { ns, .. } => Some(ns),
        }
    }
}

/// Classify `entry` without touching any connection.
pub fn parse_oplog(entry: &Document) -> OplogAction {
    let ns = match entry.get_str(NAMESPACE_KEY) {
        Ok(ns) => ns,
        Err(_) => return OplogAction::Malformed { reason: "missing ns" },
    };
    let op = match entry.get_str(OP_KEY) {
        Ok(op) => op,
        Err(_) => return OplogAction::Malformed { reason: "missing op" },
    };

    match op {
        "n" => OplogAction::Noop { ns: ns.to_string() },
        "i" => {
            let obj = match entry.get_document(OBJECT_KEY) {
                Ok(o) => o,
                Err(_) => return OplogAction::Malformed { reason: "insert without o" },
            };
            if ns.split_once('.').map(|(_, coll)| coll) == Some("system.indexes") {
                OplogAction::SystemIndexes { ns: ns.to_string() }
            } else {
                OplogAction::Insert {
                    ns: ns.to_string(),
                    doc: obj.clone(),
                }
            }
        }
        "u" => {
            let obj = match entry.get_document(OBJECT_KEY) {
                Ok(o) => o,
                Err(_) => return OplogAction::Malformed { reason: "update without o" },
            };
            let id = match entry
                .get_document(SELECTOR_KEY)
                .ok()
                .and_then(|o2| o2.get(ID_KEY))
            {
                Some(id) => id.clone(),
                None => return OplogAction::Malformed { reason: "update selector without _id" },
            };
            if obj.keys().any(|k| k.starts_with('$')) {
                OplogAction::MutatorUpdate {
                    ns: ns.to_string(),
                    id,
                }
            } else {
                // the oplog image omits _id; the selector's value wins.
                let mut doc = obj.clone();
                doc.insert(ID_KEY, id);
                OplogAction::ReplaceUpdate {
                    ns: ns.to_string(),
                    doc,
                }
            }
        }
        "d" => {
            let obj = match entry.get_document(OBJECT_KEY) {
                Ok(o) => o,
                Err(_) => return OplogAction::Malformed { reason: "delete without o" },
            };
            if !obj.contains_key(ID_KEY) {
                return OplogAction::Malformed { reason: "delete selector without _id" };
            }
            OplogAction::Delete {
                ns: ns.to_string(),
                selector: obj.clone(),
            }
        }
        other => OplogAction::Unknown {
            ns: ns.to_string(),
            op: other.to_string(),
        },
    }
}

/// Apply one oplog entry. Every entry ends up applied, deliberately skipped
/// with a log line, or an error.
pub fn apply_oplog(
    entry: &Document,
    conn: &Connection,
    sql: &mut SqlAdapter,
    schema: &SchemaMap,
    opts: &SyncOpts,
) -> Result<()> {
    let action = parse_oplog(entry);
    if let OplogAction::Malformed { reason } = &action {
        warn!(?entry, reason, "dropping malformed oplog entry");
        return Ok(());
    }
    // non-replicated namespaces are filtered here, before any dispatch on
    // the opcode.
    if let Some(ns) = action.ns() {
        if schema.find_ns(ns).is_none() {
            debug!(%ns, "namespace not configured, dropping entry");
            return Ok(());
        }
    }
    match action {
        // returned above.
        OplogAction::Malformed { .. } => Ok(()),
        OplogAction::Noop { .. } => {
            debug!("skipping no-op oplog entry");
            Ok(())
        }
        OplogAction::Unknown { ns, op } => {
            info!(%ns, %op, "skipping oplog entry with unknown opcode");
            Ok(())
        }
        OplogAction::SystemIndexes { ns } => {
            info!(%ns, "skipping system.indexes insert");
            Ok(())
        }
        OplogAction::Insert { ns, doc } | OplogAction::ReplaceUpdate { ns, doc } => {
            bulk::upsert_doc_shielded(sql, &ns, &doc, opts.unsafe_mode)
        }
        OplogAction::MutatorUpdate { ns, id } => resync_object(conn, sql, &ns, id),
        OplogAction::Delete { ns, selector } => {
            if opts.ignore_delete {
                info!(%ns, "ignoring delete per configuration");
                return Ok(());
            }
            sql.delete_ns(&ns, &selector)
        }
    }
}

// A mutator update cannot be replayed against a row projection, so re-read
// the authoritative document; if it has since vanished, delete the row.
fn resync_object(conn: &Connection, sql: &mut SqlAdapter, ns: &str, id: Bson) -> Result<()> {
    let coll = conn.ns_coll(ns)?;
    let filter = doc! {ID_KEY: id};
    let fetched = retry::with_retries("resync lookup", || {
        Ok(coll.find_one(filter.clone(), None)?)
    })?;
    match fetched {
        None => {
            warn!(%ns, selector = ?filter, "gave up re-reading document for mutator update");
            Ok(())
        }
        Some(Some(doc)) => sql.upsert_ns(ns, &doc),
        Some(None) => {
            debug!(%ns, selector = ?filter, "document gone at source, deleting target row");
            sql.delete_ns(ns, &filter)
        }
    }
}
