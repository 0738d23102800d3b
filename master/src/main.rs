use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use master::WeightStore;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let (weights_path, port) = match (args.next(), args.next()) {
        (Some(path), Some(port)) => (PathBuf::from(path), port),
        _ => {
            eprintln!("usage: master <weights_path> <port>");
            return ExitCode::FAILURE;
        }
    };

    let weights = match std::fs::read(&weights_path) {
        Ok(weights) => {
            info!("loaded {} weight bytes from {}", weights.len(), weights_path.display());
            weights
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no weights at {}, starting empty", weights_path.display());
            Vec::new()
        }
        Err(e) => {
            error!("failed to read {}: {e}", weights_path.display());
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(WeightStore::new(weights));

    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("serving weights on {addr}, version {}", store.version());

    tokio::select! {
        ret = master::serve(listener, Arc::clone(&store)) => {
            if let Err(e) = ret {
                error!("accept loop failed: {e}");
                return ExitCode::FAILURE;
            }
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
    }

    // In-flight connections are dropped; the buffer only holds completed
    // updates.
    if let Err(e) = std::fs::write(&weights_path, store.snapshot()) {
        error!("failed to persist weights to {}: {e}", weights_path.display());
        return ExitCode::FAILURE;
    }
    info!("persisted weights to {}", weights_path.display());

    ExitCode::SUCCESS
}
