//! The brine cache server daemon.
//!
//! Wires a [`ThreadSafeLru`] store to one of the two server variants and
//! runs until killed.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use brine_net::{MtServer, StServer};
use brine_store::ThreadSafeLru;

use config::{ConfigFile, Settings};

#[derive(Parser, Debug)]
#[command(name = "brined", version, about = "In-memory key/value cache server")]
struct Cli {
    /// Socket address to listen on (default 127.0.0.1:8080)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Worker threads for the multi-threaded server (default: CPU count)
    #[arg(long)]
    workers: Option<usize>,

    /// Storage byte budget (default 1 MiB)
    #[arg(long)]
    max_bytes: Option<usize>,

    /// Run the single-threaded server variant
    #[arg(long)]
    single_threaded: bool,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => match ConfigFile::load(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("[brined] {e}");
                std::process::exit(1);
            }
        },
        None => ConfigFile::default(),
    };
    let settings = Settings::resolve(
        file,
        cli.listen,
        cli.workers,
        cli.max_bytes,
        cli.single_threaded,
    );

    eprintln!(
        "[brined] cache budget {} bytes, {} mode",
        settings.max_bytes,
        if settings.single_threaded {
            "single-threaded".to_string()
        } else {
            format!("{} workers", settings.workers)
        }
    );

    let storage = Arc::new(ThreadSafeLru::new(settings.max_bytes));

    if settings.single_threaded {
        let mut server = StServer::new(storage);
        if let Err(e) = server.start(settings.listen) {
            eprintln!("[brined] failed to start server: {e}");
            std::process::exit(1);
        }
        server.join();
    } else {
        let mut server = MtServer::new(storage, settings.workers);
        if let Err(e) = server.start(settings.listen) {
            eprintln!("[brined] failed to start server: {e}");
            std::process::exit(1);
        }
        server.join();
    }
}
