pub mod bson_helper;
pub mod bulk;
mod importer;
pub mod oplog_apply;
pub mod retry;
#[allow(clippy::module_inception)]
mod streamer;
mod time_helper;

pub use streamer::Streamer;

/// Rows per bulk write during import, and oplog entries per tail chunk.
pub(crate) const BATCH_SIZE: usize = 1000;
