// nodelink-daemon: reference node storing uploads and serving downloads
use clap::Parser;
use nodelink_daemon::{DaemonConfig, NodeServer};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nodelink-daemon")]
#[command(about = "Reference node for the nodelink client", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Directory holding stored files
    #[arg(short, long, value_name = "DIR")]
    storage: Option<PathBuf>,

    /// Sender id stamped on outgoing frames
    #[arg(long, value_name = "ID")]
    node_id: Option<u64>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let default = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = DaemonConfig::from_env();
    if let Some(addr) = cli.listen {
        config.address = addr;
    }
    if let Some(dir) = cli.storage {
        config.storage_dir = dir;
    }
    if let Some(id) = cli.node_id {
        config.node_id = id;
    }

    let storage = config.storage_dir.clone();
    let server = match NodeServer::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start");
            process::exit(1);
        }
    };

    match server.local_address() {
        Ok(addr) => info!(%addr, storage = %storage.display(), "node serving"),
        Err(e) => error!(error = %e, "listener has no address"),
    }
    server.serve();
}
