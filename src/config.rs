//! mongres basic configuration, express in toml.
//!
//! Basic configuration file example:
//! ```toml
//! [src]
//! # source mongodb url, needs to be a replica set member.
//! url = "mongodb://localhost:27017"
//!
//! [dst]
//! # target postgres connection string.
//! url = "host=localhost user=postgres dbname=mirror"
//!
//! # name of the state row used to remember the tail position.
//! service = "mongres"
//!
//! [[sync]]
//! db = "blog"
//! coll = "posts"
//! table = "blog_posts"
//! extra_props = true
//!
//! [[sync.columns]]
//! name = "id"
//! source = "_id"
//! type = "text"
//!
//! [[sync.columns]]
//! name = "title"
//! type = "text"
//! ```
use serde::Deserialize;

/// Global replication configuration.
#[derive(Deserialize, Debug)]
pub struct Config {
    src: Src,
    dst: Dst,
    /// identifies this replication stream in the target state table.
    #[serde(default = "default_service")]
    service: String,
    sync: Vec<SyncSpec>,
}

impl Config {
    /// get source mongodb url.
    pub fn src_url(&self) -> &str {
        &self.src.url
    }

    /// get target postgres connection string.
    pub fn dst_url(&self) -> &str {
        &self.dst.url
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn sync_specs(&self) -> &[SyncSpec] {
        &self.sync
    }
}

/// Source database configuration.
#[derive(Deserialize, Debug)]
pub struct Src {
    /// Source database url, it needs to be a replica set member, begins with 'mongodb://'
    url: String,
}

/// Target database configuration.
#[derive(Deserialize, Debug)]
pub struct Dst {
    /// Target postgres connection string, either key-value or 'postgres://' form.
    url: String,
}

/// One namespace to mirror: which collection, into which table, with which columns.
#[derive(Deserialize, Debug)]
pub struct SyncSpec {
    db: String,
    coll: String,
    table: String,
    /// collect fields not claimed by any column into a trailing jsonb column.
    #[serde(default)]
    extra_props: bool,
    columns: Vec<ColumnConf>,
}

impl SyncSpec {
    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn coll(&self) -> &str {
        &self.coll
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn extra_props(&self) -> bool {
        self.extra_props
    }

    pub fn columns(&self) -> &[ColumnConf] {
        &self.columns
    }
}

#[derive(Deserialize, Debug)]
pub struct ColumnConf {
    name: String,
    /// document field feeding this column, default is the column name itself.
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "type")]
    sql_type: String,
}

impl ColumnConf {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    pub fn sql_type(&self) -> &str {
        &self.sql_type
    }
}

fn default_service() -> String {
    "mongres".to_string()
}

/// Runtime behavior switches, normally filled from the command line.
#[derive(Debug, Default, Clone)]
pub struct SyncOpts {
    /// run the initial import even when a resume timestamp exists.
    pub reimport: bool,
    /// import only; never touch the tailer state.
    pub skip_tail: bool,
    /// neither drop tables during schema creation nor truncate before import.
    pub no_drop_tables: bool,
    /// seconds since epoch overriding the stored tail position.
    pub tail_from: Option<i64>,
    /// drop delete operations instead of applying them.
    pub ignore_delete: bool,
    /// log and skip rows the target rejects instead of aborting.
    pub unsafe_mode: bool,
}
