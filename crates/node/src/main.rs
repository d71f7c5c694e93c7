//! RedRock - Redis-compatible persistent store on an LSM engine
//!
//! Opens the configured slots, produces an initial dump per slot, and
//! serves snapshot transfers to replicas.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use redrock::config::{Config, SharedConfig};
use redrock::registry::Registry;
use rsync::{RsyncServer, RsyncServerOptions};
use storage::Slot;

/// RedRock node configuration
#[derive(Parser, Debug)]
#[command(name = "redrock")]
#[command(about = "RedRock - Redis-compatible persistent store on an LSM engine")]
struct Args {
    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rsync listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Worker pool size
    #[arg(long)]
    thread_num: Option<usize>,

    /// Root of the engine data
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Snapshot directory location
    #[arg(long)]
    dump_path: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration from file if specified, otherwise use defaults
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Override config with command line arguments
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(thread_num) = args.thread_num {
        config.server.thread_num = thread_num;
    }
    if let Some(db_path) = args.db_path {
        config.storage.db_path = db_path;
    }
    if let Some(dump_path) = args.dump_path {
        config.dump.dump_path = dump_path;
    }
    if let Some(log_level) = args.log_level {
        config.log.level = log_level;
    }

    // Initialize logging
    let level = match config.log.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = SharedConfig::new(config);
    let (db_path, dump_path, dump_prefix, db_name, slot_num, write_buffer_size) = {
        let c = config.read();
        (
            c.storage.db_path.clone(),
            c.dump.dump_path.clone(),
            c.dump.dump_prefix.clone(),
            c.storage.db_name.clone(),
            c.storage.slot_num,
            c.storage.write_buffer_size,
        )
    };

    info!("starting redrock node");
    info!("data directory: {:?}", db_path);
    info!("dump directory: {:?}", dump_path);

    std::fs::create_dir_all(&db_path)?;

    // Open the slots and advertise an initial dump for each
    let registry = Arc::new(Registry::new());
    for slot_id in 0..slot_num {
        let slot = Arc::new(Slot::open(
            &db_name,
            slot_id,
            &db_path,
            &dump_path,
            &dump_prefix,
            write_buffer_size,
        )?);
        if let Err(e) = slot.bgsave() {
            warn!("initial background save for slot {} failed: {}", slot_id, e);
        }
        registry.insert(slot);
    }
    info!("opened {} slot(s) for {}", slot_num, db_name);

    // Start the snapshot transfer server
    let (addr, opts) = {
        let c = config.read();
        let addr: SocketAddr = format!("0.0.0.0:{}", c.server.port).parse()?;
        let opts = RsyncServerOptions {
            worker_num: c.server.thread_num,
            idle_timeout: c.server.idle_timeout(),
            max_connections: c.server.maxconnection,
            ..RsyncServerOptions::default()
        };
        (addr, opts)
    };
    let server = RsyncServer::new(registry.clone(), addr, opts);
    let handle = server.start().await?;

    info!("redrock node is ready on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown().await;

    Ok(())
}
