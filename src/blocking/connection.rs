use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::schema::SchemaMap;
use crate::{OPLOG_COLL, OPLOG_DB, TIMESTAMP_KEY};
use bson::{doc, Document, Timestamp};
use mongodb::options::FindOneOptions;
use mongodb::sync::{Client, Collection};
use postgres::NoTls;
use std::sync::Arc;

/// Handles to the replication endpoints: one MongoDB client for the source
/// plus the ability to open PostgreSQL connections against the target.
pub struct Connection {
    source: Client,
    config: Arc<Config>,
}

impl Connection {
    pub fn new(config: Arc<Config>) -> Result<Connection> {
        let source = Client::with_uri_str(config.src_url())?;
        Ok(Connection { source, config })
    }

    pub fn source_coll(&self, db: &str, coll: &str) -> Collection<Document> {
        self.source.database(db).collection(coll)
    }

    /// collection handle for a `<db>.<collection>` namespace.
    pub fn ns_coll(&self, ns: &str) -> Result<Collection<Document>> {
        let (db, coll) = ns
            .split_once('.')
            .ok_or_else(|| SyncError::BadNamespace(ns.to_string()))?;
        Ok(self.source_coll(db, coll))
    }

    pub fn oplog_coll(&self) -> Collection<Document> {
        self.source.database(OPLOG_DB).collection(OPLOG_COLL)
    }

    /// Timestamp of the newest entry in the source oplog.
    pub fn latest_oplog_ts(&self) -> Result<Timestamp> {
        self.oplog_endpoint_ts(-1)
    }

    /// Timestamp of the oldest entry the source oplog still retains.
    pub fn earliest_oplog_ts(&self) -> Result<Timestamp> {
        self.oplog_endpoint_ts(1)
    }

    // natural order reads the capped oplog from either end.
    fn oplog_endpoint_ts(&self, natural: i32) -> Result<Timestamp> {
        let entry = self
            .oplog_coll()
            .find_one(
                None,
                FindOneOptions::builder()
                    .sort(doc! {"$natural": natural})
                    .build(),
            )?
            .ok_or(SyncError::EmptyOplog)?;
        Ok(entry.get_timestamp(TIMESTAMP_KEY)?)
    }

    /// open a fresh connection against the target database.
    pub fn connect_target(&self) -> Result<postgres::Client> {
        Ok(postgres::Client::connect(self.config.dst_url(), NoTls)?)
    }

    pub fn check_permissions(&self, schema: &SchemaMap) -> Result<()> {
        for db_name in schema.databases() {
            if let Err(e) = self.source.database(db_name).list_collection_names(None) {
                return Err(SyncError::PermissionError {
                    uri: self.config.src_url().to_string(),
                    db: db_name.to_string(),
                    detail: e.to_string(),
                });
            }
        }
        Ok(())
    }
}
