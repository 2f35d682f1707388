// Live interpreter tests; they need a running mongod replica set member and
// a running postgres, so they are ignored by default:
//
//   MONGRES_TEST_SOURCE=mongodb://localhost:27017 \
//   MONGRES_TEST_TARGET="host=localhost user=postgres" \
//   cargo test -- --ignored

use bson::{doc, Document, Timestamp};
use mongres::blocking::streamer::oplog_apply::apply_oplog;
use mongres::{Config, Connection, SchemaMap, SqlAdapter, SyncOpts};
use postgres::NoTls;
use std::sync::Arc;

const TEST_DB: &str = "mongres_test";

fn test_config() -> Config {
    let source = option_env!("MONGRES_TEST_SOURCE").unwrap_or("mongodb://localhost:27017");
    let target = option_env!("MONGRES_TEST_TARGET").unwrap_or("host=localhost user=postgres");
    toml::from_str(&format!(
        r#"
        [src]
        url = "{source}"

        [dst]
        url = "{target}"

        [[sync]]
        db = "{TEST_DB}"
        coll = "widgets"
        table = "widgets"
        columns = [
            {{ name = "id", source = "_id", type = "text" }},
            {{ name = "name", type = "text" }},
            {{ name = "n", type = "bigint" }},
        ]
        "#
    ))
    .unwrap()
}

struct Context {
    conn: Connection,
    schema: Arc<SchemaMap>,
    sql: SqlAdapter,
    check: postgres::Client,
    mongo: mongodb::sync::Client,
    opts: SyncOpts,
}

impl Context {
    fn new() -> Self {
        let config = Arc::new(test_config());
        let schema = Arc::new(SchemaMap::from_config(&config).unwrap());
        let conn = Connection::new(config.clone()).unwrap();
        let mut sql = SqlAdapter::new(conn.connect_target().unwrap(), schema.clone());
        sql.create_schema(true).unwrap();
        let check = postgres::Client::connect(config.dst_url(), NoTls).unwrap();
        let mongo = mongodb::sync::Client::with_uri_str(config.src_url()).unwrap();
        Context {
            conn,
            schema,
            sql,
            check,
            mongo,
            opts: SyncOpts::default(),
        }
    }

    fn widget_rows(&mut self) -> Vec<(String, Option<String>, Option<i64>)> {
        self.check
            .query("SELECT id, name, n FROM widgets ORDER BY id", &[])
            .unwrap()
            .iter()
            .map(|r| (r.get(0), r.get(1), r.get(2)))
            .collect()
    }

    fn apply(&mut self, entry: &Document) {
        apply_oplog(entry, &self.conn, &mut self.sql, &self.schema, &self.opts).unwrap();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.mongo.database(TEST_DB).drop(None).unwrap();
        self.check.batch_execute("DROP TABLE IF EXISTS widgets").unwrap();
    }
}

fn ts() -> Timestamp {
    Timestamp {
        time: 10,
        increment: 0,
    }
}

#[test]
#[ignore = "needs a running mongod replica set member and postgres"]
fn test_replacement_update_upserts_merged_image() {
    let mut context = Context::new();
    let entry = doc! {
        "ts": ts(), "op": "u", "ns": format!("{}.widgets", TEST_DB),
        "o2": {"_id": 42},
        "o": {"name": "x"},
    };
    context.apply(&entry);
    assert_eq!(
        context.widget_rows(),
        vec![("42".to_string(), Some("x".to_string()), None)]
    );
}

#[test]
#[ignore = "needs a running mongod replica set member and postgres"]
fn test_mutator_update_resyncs_from_source() {
    let mut context = Context::new();
    let coll = context
        .mongo
        .database(TEST_DB)
        .collection::<Document>("widgets");
    coll.insert_one(doc! {"_id": 42, "n": 1_i64, "name": "x"}, None)
        .unwrap();

    let entry = doc! {
        "ts": ts(), "op": "u", "ns": format!("{}.widgets", TEST_DB),
        "o2": {"_id": 42},
        "o": {"$set": {"n": 1_i64}},
    };
    context.apply(&entry);
    assert_eq!(
        context.widget_rows(),
        vec![("42".to_string(), Some("x".to_string()), Some(1))]
    );
}

#[test]
#[ignore = "needs a running mongod replica set member and postgres"]
fn test_mutator_update_of_vanished_document_deletes_row() {
    let mut context = Context::new();

    // the row exists on the target, but the source document is gone.
    let insert = doc! {
        "ts": ts(), "op": "i", "ns": format!("{}.widgets", TEST_DB),
        "o": {"_id": 42, "name": "x"},
    };
    context.apply(&insert);
    assert_eq!(context.widget_rows().len(), 1);

    let entry = doc! {
        "ts": ts(), "op": "u", "ns": format!("{}.widgets", TEST_DB),
        "o2": {"_id": 42},
        "o": {"$set": {"n": 1_i64}},
    };
    context.apply(&entry);
    assert_eq!(context.widget_rows(), vec![]);
}

#[test]
#[ignore = "needs a running mongod replica set member and postgres"]
fn test_system_indexes_insert_touches_nothing() {
    let mut context = Context::new();
    let entry = doc! {
        "ts": ts(), "op": "i", "ns": format!("{}.system.indexes", TEST_DB),
        "o": {"key": {"name": 1}, "name": "name_1"},
    };
    context.apply(&entry);
    assert_eq!(context.widget_rows(), vec![]);
}

#[test]
#[ignore = "needs a running mongod replica set member and postgres"]
fn test_delete_removes_row_and_ignore_delete_skips() {
    let mut context = Context::new();
    let insert = doc! {
        "ts": ts(), "op": "i", "ns": format!("{}.widgets", TEST_DB),
        "o": {"_id": 42, "name": "x"},
    };
    context.apply(&insert);

    let delete = doc! {
        "ts": ts(), "op": "d", "ns": format!("{}.widgets", TEST_DB),
        "o": {"_id": 42},
    };
    context.opts.ignore_delete = true;
    context.apply(&delete);
    assert_eq!(context.widget_rows().len(), 1);

    context.opts.ignore_delete = false;
    context.apply(&delete);
    assert_eq!(context.widget_rows(), vec![]);
}
