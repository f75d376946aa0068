//! tsmeta management tool
//!
//! Opens the local replication log, replays it into the management-node
//! directory and runs one administrative command against it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tsmeta_common::{Config, NodeId, SyncRole};
use tsmeta_mnode::{Connection, MemoryHosts, MemoryUsers, NodeDirectory, User};
use tsmeta_sdb::{FileLog, Sdb};

#[derive(Parser, Debug)]
#[command(name = "tsmeta-mgmt")]
#[command(about = "tsmeta management-node directory tool")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/tsmeta/mgmt.toml")]
    config: String,

    /// Data directory holding the replication log
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show directory status and the failover set
    Status {
        /// Hand out public addresses even when the config does not
        #[arg(long)]
        public: bool,
    },
    /// Admit a host as a management node
    Admit {
        /// Host id
        node_id: i32,
    },
    /// Drop a management node
    Drop {
        /// Node id
        node_id: i32,
    },
    /// Change the role of a management node
    SetRole {
        /// Node id
        node_id: i32,
        /// offline, unsynced, slave or master
        role: SyncRole,
    },
    /// List management nodes
    Show {
        /// Rows fetched per batch
        #[arg(long, default_value = "16")]
        batch: usize,
    },
}

fn load_config(path: &str) -> Result<Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| anyhow::anyhow!("Invalid config file {}: {}", path, e))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    // CLI takes precedence over the config file
    let data_dir = args.data_dir.unwrap_or_else(|| config.node.data_dir.clone());
    let log_level = if args.log_level != "info" {
        args.log_level
    } else {
        config.logging.level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Node {} ({})", config.node.id, config.node.name);

    let wal_path = data_dir.join(&config.sdb.wal_file);
    info!("Opening replication log {}", wal_path.display());
    let log = Arc::new(FileLog::open(&wal_path, config.sdb.sync_on_write)?);
    let sdb = Sdb::new(log);

    let hosts = Arc::new(MemoryHosts::from_config(&config.hosts));
    if hosts.is_empty() {
        warn!("No hosts configured; admitting nodes will fail");
    }
    let directory = NodeDirectory::open(&sdb, hosts, &config.mnode)?;

    let stats = sdb.replay()?;
    info!(
        "Replayed {} entries, {} skipped, last seq {}",
        stats.applied, stats.skipped, stats.last_seq
    );

    match args.command {
        Commands::Status { public } => print_status(&directory, public, stats.last_seq),
        Commands::Admit { node_id } => {
            directory.admit(NodeId::new(node_id))?;
            println!("Admitted management node {node_id}");
        }
        Commands::Drop { node_id } => {
            directory.remove(NodeId::new(node_id))?;
            println!("Dropped management node {node_id}");
        }
        Commands::SetRole { node_id, role } => {
            directory.set_role(NodeId::new(node_id), role)?;
            println!("Management node {node_id} is now {role}");
        }
        Commands::Show { batch } => print_listing(&directory, &config, batch)?,
    }

    Ok(())
}

fn print_status(directory: &NodeDirectory, public: bool, last_seq: u64) {
    println!("Management Nodes");
    println!("================");
    println!("Count:    {}", directory.count());
    match directory.master() {
        Some(id) => println!("Master:   {id}"),
        None => println!("Master:   (none)"),
    }
    println!("Last seq: {last_seq}");

    let set = directory.client_failover_set(public);
    println!();
    println!("Failover set (in use: {})", set.in_use);
    for (idx, endpoint) in set.endpoints.iter().enumerate() {
        let marker = if idx == set.in_use { "*" } else { " " };
        println!("{marker} {}:{}", endpoint.addr(), endpoint.port());
    }
}

fn print_listing(directory: &NodeDirectory, config: &Config, batch: usize) -> Result<()> {
    // The tool acts as the administrative account
    let users = MemoryUsers::new();
    let conn = Connection { id: 0 };
    users.login(
        conn,
        User {
            name: config.mnode.admin_user.clone(),
            account: config.mnode.admin_user.clone(),
        },
    );

    let rows = batch.max(1);
    let mut show = directory.show_meta(&users, &conn)?;
    let mut data = vec![0u8; show.row_size * rows];

    println!(
        "{:>6}  {:<16} {:<16} {:>14}  {}",
        "id", "private ip", "public ip", "create time", "role"
    );
    loop {
        let n = directory.retrieve(&mut show, &mut data, rows)?;
        if n == 0 {
            break;
        }
        for row in 0..n {
            println!(
                "{:>6}  {:<16} {:<16} {:>14}  {}",
                show.i16_at(&data, rows, 0, row),
                show.text_at(&data, rows, 1, row),
                show.text_at(&data, rows, 2, row),
                show.i64_at(&data, rows, 3, row),
                show.text_at(&data, rows, 4, row),
            );
        }
    }
    println!("({} rows)", show.reads);
    Ok(())
}
