//! Harness error types.

use bebida_core::DecodeError;
use bebida_env::EnvError;
use thiserror::Error;

/// Failures of a simulated peer (not of the broker under test).
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Transport(#[from] EnvError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Broker started unknown job {0}")]
    UnknownJob(String),

    #[error("Simulation did not end within {0} steps")]
    Stalled(u64),

    #[error("Peer task failed: {0}")]
    Task(String),

    #[error("Runtime setup failed: {0}")]
    Runtime(#[from] std::io::Error),
}

