//! Follow the source oplog and remember how far replication has gotten.

use crate::blocking::connection::Connection;
use crate::blocking::streamer::retry;
use crate::error::Result;
use crate::TIMESTAMP_KEY;
use bson::{doc, Document, Timestamp};
use mongodb::options::FindOptions;
use mongodb::sync::Collection;
use postgres::Client as PgClient;
use std::time::Duration;
use tracing::{debug, info};

/// "never ran" marker in the state table.
pub const ZERO_TS: Timestamp = Timestamp {
    time: 0,
    increment: 0,
};

const STATE_TABLE: &str = "oplog_tail_state";
const IDLE_DELAY: Duration = Duration::from_secs(1);

/// Reads the oplog in order and persists the resume position after every
/// applied chunk. State lives in the target database on a dedicated
/// connection, keyed by the configured service name, so several streams can
/// share one target.
pub struct OplogTailer {
    oplog_coll: Collection<Document>,
    state: PgClient,
    service: String,
    pos: Timestamp,
}

impl OplogTailer {
    pub fn new(conn: &Connection, state: PgClient, service: &str) -> Result<OplogTailer> {
        let mut tailer = OplogTailer {
            oplog_coll: conn.oplog_coll(),
            state,
            service: service.to_string(),
            pos: ZERO_TS,
        };
        tailer.state.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (service text PRIMARY KEY, ts_time bigint NOT NULL, ts_increment bigint NOT NULL)",
            STATE_TABLE
        ))?;
        Ok(tailer)
    }

    pub fn read_timestamp(&mut self) -> Result<Timestamp> {
        let stmt = format!(
            "SELECT ts_time, ts_increment FROM {} WHERE service = $1",
            STATE_TABLE
        );
        let row = self.state.query_opt(stmt.as_str(), &[&self.service])?;
        Ok(match row {
            Some(row) => Timestamp {
                time: row.get::<_, i64>(0) as u32,
                increment: row.get::<_, i64>(1) as u32,
            },
            None => ZERO_TS,
        })
    }

    pub fn write_timestamp(&mut self, ts: Timestamp) -> Result<()> {
        let stmt = format!(
            "INSERT INTO {} (service, ts_time, ts_increment) VALUES ($1, $2, $3) \
             ON CONFLICT (service) DO UPDATE SET ts_time = EXCLUDED.ts_time, \
             ts_increment = EXCLUDED.ts_increment",
            STATE_TABLE
        );
        self.state.execute(
            stmt.as_str(),
            &[&self.service, &(ts.time as i64), &(ts.increment as i64)],
        )?;
        debug!(service = %self.service, ?ts, "persisted resume timestamp");
        Ok(())
    }

    /// Position the tailer; `None` resumes from the persisted timestamp.
    pub fn tail_from(&mut self, ts: Option<Timestamp>) -> Result<()> {
        self.pos = match ts {
            Some(t) => t,
            None => self.read_timestamp()?,
        };
        info!(pos = ?self.pos, "tailing oplog");
        Ok(())
    }

    /// Pull up to `batch_size` oplog entries after the current position and
    /// hand each to `apply` in oplog order, then advance and persist the
    /// position. Sleeps briefly and returns 0 when the oplog has nothing new.
    pub fn stream<F>(&mut self, batch_size: usize, mut apply: F) -> Result<usize>
    where
        F: FnMut(&Document) -> Result<()>,
    {
        let pos = self.pos;
        let coll = self.oplog_coll.clone();
        let fetched = retry::with_retries("oplog fetch", || {
            let cursor = coll.find(
                doc! {TIMESTAMP_KEY: {"$gt": pos}},
                FindOptions::builder()
                    .sort(doc! {"$natural": 1})
                    .limit(batch_size as i64)
                    .batch_size(batch_size as u32)
                    .build(),
            )?;
            let entries = cursor.collect::<mongodb::error::Result<Vec<Document>>>()?;
            Ok(entries)
        })?;

        let entries = match fetched {
            Some(entries) => entries,
            // best-effort fetch gave up; the next loop turn tries again.
            None => return Ok(0),
        };
        if entries.is_empty() {
            std::thread::sleep(IDLE_DELAY);
            return Ok(0);
        }

        for entry in &entries {
            apply(entry)?;
        }
        if let Some(last) = entries.last() {
            let ts = last.get_timestamp(TIMESTAMP_KEY)?;
            self.pos = ts;
            self.write_timestamp(ts)?;
        }
        Ok(entries.len())
    }
}
