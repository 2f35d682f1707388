use clap::Parser;
use mongres::{Config, Streamer, SyncOpts};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Mirror MongoDB collections into PostgreSQL by tailing the oplog")]
struct Opts {
    /// configuration file path.
    #[arg(short, long, default_value = "config.toml")]
    conf: String,
    /// force the initial import even when a resume timestamp exists.
    #[arg(long)]
    reimport: bool,
    /// run the initial import only; leave the tail position untouched.
    #[arg(long)]
    skip_tail: bool,
    /// neither drop tables while creating the schema nor truncate them before import.
    #[arg(long)]
    no_drop_tables: bool,
    /// seconds since epoch to tail from, overriding the stored resume timestamp.
    #[arg(long)]
    tail_from: Option<i64>,
    /// drop delete operations instead of applying them.
    #[arg(long)]
    ignore_delete: bool,
    /// log and skip rows rejected by postgres instead of aborting.
    #[arg(long = "unsafe")]
    unsafe_mode: bool,
    /// log file path, if not specified, all log information will be output to stdout.
    #[arg(long)]
    log_path: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts: Opts = Opts::parse();
    let collector = tracing_subscriber::fmt();
    let (non_blocking, _guard) = match &opts.log_path {
        Some(path) => {
            let path = Path::new(path);
            let dir_name = path.parent().unwrap();
            let file_name = path.file_name().unwrap().to_str().unwrap();
            let file_appender = tracing_appender::rolling::daily(dir_name, file_name);
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    collector.with_writer(non_blocking).init();

    let data = std::fs::read_to_string(&opts.conf)?;
    let config: Config = toml::from_str(&data)?;
    let sync_opts = SyncOpts {
        reimport: opts.reimport,
        skip_tail: opts.skip_tail,
        no_drop_tables: opts.no_drop_tables,
        tail_from: opts.tail_from,
        ignore_delete: opts.ignore_delete,
        unsafe_mode: opts.unsafe_mode,
    };

    let mut streamer = Streamer::new(Arc::new(config), sync_opts)?;
    streamer.import()?;
    if !opts.skip_tail {
        streamer.optail()?;
    }
    info!("replication finished");
    Ok(())
}
