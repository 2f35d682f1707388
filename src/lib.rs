pub mod blocking;
mod config;
mod error;
mod schema;

const OPLOG_DB: &str = "local";
const OPLOG_COLL: &str = "oplog.rs";

// oplog relative keys.
const NAMESPACE_KEY: &str = "ns";
const TIMESTAMP_KEY: &str = "ts";
const OP_KEY: &str = "op";
const OBJECT_KEY: &str = "o";
const SELECTOR_KEY: &str = "o2";
const ID_KEY: &str = "_id";

pub use blocking::{Connection, OplogTailer, SqlAdapter, Streamer};
pub use config::{Config, SyncOpts};
pub use error::{ErrorClass, Result, SyncError};
pub use schema::{ColumnType, SchemaMap, SqlValue};
