use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use log::{error, info};
use tokio::signal;
use tokio::task::JoinSet;
use training::plugin::Model;
use worker::{MasterClient, WorkerConfig, WorkerLoop};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let (host, port, model_path) = match (args.next(), args.next(), args.next()) {
        (Some(host), Some(port), Some(path)) => (host, port, PathBuf::from(path)),
        _ => {
            eprintln!("usage: worker <host> <port> <model_path>");
            return ExitCode::FAILURE;
        }
    };
    let addr = format!("{host}:{port}");

    let threads = thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1);
    info!("starting {threads} training threads against {addr}");

    let mut tasks = JoinSet::new();
    for idx in 0..threads as u32 {
        // Each thread owns its own model instance.
        let model = match Model::load(&model_path, idx) {
            Ok(model) => model,
            Err(e) => {
                error!("failed to load model {}: {e}", model_path.display());
                return ExitCode::FAILURE;
            }
        };

        let client = MasterClient::new(addr.clone());
        tasks.spawn(async move {
            let worker = WorkerLoop::new(WorkerConfig::default(), client);
            worker.run(model).await
        });
    }

    tokio::select! {
        ret = tasks.join_next() => {
            match ret {
                Some(Ok(Err(e))) => {
                    error!("training thread failed: {e}");
                    return ExitCode::FAILURE;
                }
                Some(Err(e)) => {
                    error!("training task panicked: {e}");
                    return ExitCode::FAILURE;
                }
                _ => {}
            }
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT, dropping pending work");
        }
    }

    ExitCode::SUCCESS
}
