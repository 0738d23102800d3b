//! Training worker: pulls weights from the master, runs local training
//! steps and pushes weight deltas back.

mod client;
mod loop_;

pub use client::{MasterClient, PushOutcome};
pub use loop_::{WorkerConfig, WorkerLoop};
