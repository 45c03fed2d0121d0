// nodelink: interactive client for a node
use clap::Parser;
use nodelink_client::{CancelHandle, ClientConfig, Command, ConnectionState, Progress, Session};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nodelink")]
#[command(about = "Interactive client for exchanging files with a node", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Node to connect to at startup ([host][:port])
    #[arg(value_name = "ADDRESS")]
    address: Option<String>,

    /// Dial timeout in milliseconds, 0 waits for the OS
    #[arg(long, value_name = "MS")]
    connect_timeout: Option<u64>,

    /// Deadline for each read while waiting on the node
    #[arg(long, value_name = "MS")]
    read_timeout: Option<u64>,

    /// Deadline for each write
    #[arg(long, value_name = "MS")]
    write_timeout: Option<u64>,

    /// Default directory for requested files
    #[arg(short = 'd', long, value_name = "DIR")]
    download_dir: Option<PathBuf>,

    /// Largest file sent or accepted, in bytes
    #[arg(long, value_name = "BYTES")]
    max_file_size: Option<u64>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(ms) = self.connect_timeout {
            config.connect_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = self.read_timeout.filter(|&ms| ms > 0) {
            config.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.write_timeout.filter(|&ms| ms > 0) {
            config.write_timeout = Duration::from_millis(ms);
        }
        if let Some(ref dir) = self.download_dir {
            config.download_dir = dir.clone();
        }
        if let Some(limit) = self.max_file_size {
            config.max_file_size = limit;
        }
        config
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn show_progress(event: Progress) {
    match event {
        // one line per chunk is too chatty for large files
        Progress::ChunkSent { index, total } if index != total && index % 64 != 0 => {}
        Progress::Received { received, expected }
            if received != expected && received % (64 * 4096) != 0 => {}
        other => println!("  {}", other),
    }
}

fn prompt() {
    print!("[COMMAND]: ");
    let _ = io::stdout().flush();
}

/// Ctrl-C drops the live connection, which unblocks a transfer stuck on a
/// silent node. The REPL itself keeps running.
fn install_interrupt(cancel: CancelHandle) {
    let installed = ctrlc::set_handler(move || {
        if cancel.cancel() {
            println!("\n[!!] Interrupted, connection closed.");
        } else {
            println!("\n[!!] Nothing to interrupt. Type 'exit' to leave.");
            prompt();
        }
    });
    if let Err(e) = installed {
        warn!(error = %e, "Ctrl-C will not interrupt commands");
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut session = Session::new(cli.config());
    let mut sink = show_progress;
    install_interrupt(session.connection().cancel_handle());

    println!("Welcome to the node client. Type 'help' for commands.");

    if let Some(ref addr) = cli.address {
        let res = session.execute(Command::Connect(Some(addr.clone())), &mut sink);
        println!("{}", res);
    }

    let mut last_state = session.connection().state();
    let stdin = io::stdin();
    prompt();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        };

        // the reader thread may have dropped the connection while we waited
        let state = session.connection().state();
        if last_state == ConnectionState::Connected && state == ConnectionState::Disconnected {
            println!("[xx] Connection lost!");
        }

        let exiting = line.parse::<Command>().is_ok_and(|c| c.is_exit());
        if let Some(res) = session.run_line(&line, &mut sink) {
            println!("{}", res);
        }
        if exiting {
            return;
        }

        last_state = session.connection().state();
        prompt();
    }

    // stdin closed
    if session.connection().is_connected() {
        let _ = session.connection_mut().disconnect();
    }
}
