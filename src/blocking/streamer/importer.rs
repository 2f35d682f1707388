use super::streamer::Streamer;
use super::{bulk, retry, BATCH_SIZE};
use crate::error::Result;
use crate::schema::SqlValue;
use mongodb::options::FindOptions;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{info, warn};

impl Streamer {
    /// Materialize every configured collection into its target table, then
    /// hand the pre-import oplog position to the tailer.
    pub(crate) fn sync_import(&mut self) -> Result<()> {
        self.sql.create_schema(!self.opts.no_drop_tables)?;

        // capture the resume point before any document is read, so the tail
        // replays everything the scan could have missed.
        let start_ts = if self.opts.skip_tail {
            None
        } else {
            Some(self.conn.latest_oplog_ts()?)
        };
        info!(?start_ts, "starting import of configured collections");

        let namespaces: Vec<String> = self
            .schema
            .databases()
            .iter()
            .flat_map(|db| self.schema.find_db(db))
            .map(|spec| spec.ns())
            .collect();

        for ns in namespaces {
            if self.import_collection(&ns)? {
                info!(%ns, "stop requested, abandoning import");
                return Ok(());
            }
        }

        if let Some(ts) = start_ts {
            self.tailer.write_timestamp(ts)?;
            info!(?ts, "recorded resume timestamp for tailing");
        }
        Ok(())
    }

    // Returns true when the stop flag ended the scan early.
    fn import_collection(&mut self, ns: &str) -> Result<bool> {
        let spec = match self.schema.find_ns(ns) {
            Some(spec) => spec,
            None => return Ok(false),
        };
        let table = spec.table.clone();
        let (db, coll_name) = (spec.db.clone(), spec.coll.clone());

        if !self.opts.no_drop_tables && !self.truncated.contains(&table) {
            self.sql.truncate(&table)?;
            self.truncated.insert(table.clone());
        }

        let coll = self.conn.source_coll(&db, &coll_name);
        let mut cursor = coll.find(
            None,
            FindOptions::builder().batch_size(BATCH_SIZE as u32).build(),
        )?;

        let Streamer {
            sql,
            schema,
            opts,
            stop,
            ..
        } = self;

        let mut batch: Vec<Vec<SqlValue>> = Vec::with_capacity(BATCH_SIZE);
        let mut total: u64 = 0;
        let started = Instant::now();
        let mut sql_time = Duration::ZERO;

        info!(%ns, %table, "importing collection");
        let outcome = retry::with_retries("collection scan", || {
            while let Some(item) = cursor.next() {
                let doc = item?;
                batch.push(schema.transform(ns, &doc)?);
                if batch.len() >= BATCH_SIZE {
                    let rows = std::mem::take(&mut batch);
                    let flushed = rows.len() as u64;
                    let write_started = Instant::now();
                    bulk::write_batch(sql, ns, rows, opts.unsafe_mode)?;
                    sql_time += write_started.elapsed();
                    total += flushed;
                    info!(
                        %ns,
                        rows = total,
                        elapsed = ?started.elapsed(),
                        sql = ?sql_time,
                        "import progress"
                    );
                    if stop.load(Ordering::Relaxed) {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        })?;

        match outcome {
            Some(true) => return Ok(true),
            Some(false) => {}
            // the scan cursor does not survive the failure that exhausted the
            // retries; finish with what it yielded so far.
            None => warn!(%ns, "scan gave up after repeated source errors, collection imported partially"),
        }

        if !batch.is_empty() {
            let flushed = batch.len() as u64;
            let write_started = Instant::now();
            bulk::write_batch(sql, ns, std::mem::take(&mut batch), opts.unsafe_mode)?;
            sql_time += write_started.elapsed();
            total += flushed;
        }
        info!(
            %ns,
            rows = total,
            elapsed = ?started.elapsed(),
            sql = ?sql_time,
            "collection import complete"
        );
        Ok(false)
    }
}
