/// provide blocking replication apis.
mod connection;
mod sql;
mod tailer;
#[doc(hidden)]
pub mod streamer;

pub use connection::Connection;
pub use sql::SqlAdapter;
pub use streamer::Streamer;
pub use tailer::OplogTailer;
