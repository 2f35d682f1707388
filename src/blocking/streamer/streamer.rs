use super::{oplog_apply, time_helper, BATCH_SIZE};
use crate::blocking::connection::Connection;
use crate::blocking::sql::SqlAdapter;
use crate::blocking::tailer::{OplogTailer, ZERO_TS};
use crate::config::{Config, SyncOpts};
use crate::error::Result;
use crate::schema::SchemaMap;
use bson::Timestamp;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// One-way replication engine: an initial bulk import of the configured
/// collections followed by a continuous tail of the oplog.
///
/// # Example
/// ```no_run
/// use mongres::{Config, Streamer, SyncOpts};
/// use std::sync::Arc;
///
/// let data = std::fs::read_to_string("config.toml").unwrap();
/// let config: Config = toml::from_str(&data).unwrap();
/// let mut streamer = Streamer::new(Arc::new(config), SyncOpts::default()).unwrap();
/// streamer.import().unwrap();
/// streamer.optail().unwrap();
/// ```
pub struct Streamer {
    pub(crate) conn: Connection,
    pub(crate) schema: Arc<SchemaMap>,
    pub(crate) sql: SqlAdapter,
    pub(crate) tailer: OplogTailer,
    pub(crate) opts: SyncOpts,
    pub(crate) stop: Arc<AtomicBool>,
    /// tables already truncated this run; shared tables truncate once.
    pub(crate) truncated: HashSet<String>,
}

impl Streamer {
    pub fn new(config: Arc<Config>, opts: SyncOpts) -> Result<Streamer> {
        let schema = Arc::new(SchemaMap::from_config(&config)?);
        let conn = Connection::new(config.clone())?;
        conn.check_permissions(&schema)?;
        let sql = SqlAdapter::new(conn.connect_target()?, schema.clone());
        let tailer = OplogTailer::new(&conn, conn.connect_target()?, config.service())?;
        Ok(Streamer {
            conn,
            schema,
            sql,
            tailer,
            opts,
            stop: Arc::new(AtomicBool::new(false)),
            truncated: HashSet::new(),
        })
    }

    /// Cooperative cancellation handle. Setting it ends the import at the
    /// next batch boundary and the tail loop at the next chunk boundary;
    /// in-flight writes complete.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the initial import when forced by `reimport` or when the tailer
    /// has never recorded a position; otherwise do nothing.
    pub fn import(&mut self) -> Result<()> {
        let resume = self.tailer.read_timestamp()?;
        if self.opts.reimport || resume == ZERO_TS {
            self.sync_import()
        } else {
            info!(?resume, "resume timestamp present, skipping initial import");
            Ok(())
        }
    }

    /// Tail the oplog until the stop flag is set, applying each entry in
    /// observation order.
    pub fn optail(&mut self) -> Result<()> {
        let start = self.opts.tail_from.map(|secs| Timestamp {
            time: secs as u32,
            increment: 0,
        });
        if let Some(ts) = start {
            info!(?ts, at = ?time_helper::to_datetime(&ts), "tail position overridden from configuration");
        } else {
            self.check_oplog_coverage()?;
        }
        self.tailer.tail_from(start)?;

        let Streamer {
            conn,
            schema,
            sql,
            tailer,
            opts,
            stop,
            ..
        } = self;
        while !stop.load(Ordering::Relaxed) {
            tailer.stream(BATCH_SIZE, |entry| {
                oplog_apply::apply_oplog(entry, conn, sql, schema, opts)
            })?;
        }
        info!("stop requested, leaving tail loop");
        Ok(())
    }

    // A resume point older than the oldest retained oplog entry means
    // mutations were lost while we were away.
    fn check_oplog_coverage(&mut self) -> Result<()> {
        let resume = self.tailer.read_timestamp()?;
        if resume == ZERO_TS {
            return Ok(());
        }
        if let Ok(earliest) = self.conn.earliest_oplog_ts() {
            if earliest > resume {
                warn!(
                    ?earliest,
                    ?resume,
                    "oplog no longer covers the resume timestamp; mutations may have been lost, consider --reimport"
                );
            }
        }
        Ok(())
    }
}
