mod config;
mod error;
mod handlers;
mod state;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::{parse_size, ServerSection};
use crate::state::AppState;
use crate::store::{LocalBlobClient, LocalMetadataStore};

#[derive(Parser)]
#[command(name = "windlass-server", version, about = "windlass backup pull server")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8686")]
    listen: String,

    /// Root directory holding metadata records and blobs
    #[arg(short, long, default_value = "/var/lib/windlass")]
    data_dir: String,

    /// Log output format: "json" or "pretty"
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Frame chunk limit (e.g. "4M", "512K", plain bytes)
    #[arg(long, default_value = "4M", value_parser = parse_size)]
    chunk_limit: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.chunk_limit == 0 {
        eprintln!("Error: --chunk-limit must be positive");
        std::process::exit(1);
    }

    let config = ServerSection {
        listen: cli.listen,
        data_dir: cli.data_dir,
        log_format: cli.log_format,
        chunk_limit: cli.chunk_limit as usize,
    };

    // Initialize tracing
    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt().json().init();
        }
        _ => {
            tracing_subscriber::fmt().init();
        }
    }

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir).unwrap_or_else(|e| {
        eprintln!(
            "Error: cannot create data directory '{}': {e}",
            config.data_dir
        );
        std::process::exit(1);
    });

    let listen_addr = config.listen.clone();
    let data_dir = PathBuf::from(&config.data_dir);
    let meta = Arc::new(LocalMetadataStore::new(&data_dir));
    let blobs = Arc::new(LocalBlobClient::new(&data_dir));
    let state = AppState::new(config, meta, blobs);

    let app = handlers::router(state);

    info!("windlass-server listening on {listen_addr}");
    let listener = TcpListener::bind(&listen_addr).await.unwrap_or_else(|e| {
        eprintln!("Error: cannot bind to {listen_addr}: {e}");
        std::process::exit(1);
    });
    axum::serve(listener, app).await.unwrap();
}
