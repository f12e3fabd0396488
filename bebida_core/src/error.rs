//! Error taxonomy of the broker.
//!
//! Three families, all fatal:
//! 1. **Transport** - a peer link failed ([`EnvError`])
//! 2. **Decode** - a frame or payload does not have the expected shape
//! 3. **Protocol** - an ordering or ownership invariant was violated
//!
//! The loop driver returns the first error it meets; nothing is retried.

use bebida_env::EnvError;
use thiserror::Error;

/// Which half of the resource handoff an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffStage {
    /// Resources taken from System B before a System A job starts
    Prolog,

    /// Resources given back to System B after a System A job completes
    Epilog,
}

impl std::fmt::Display for HandoffStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffStage::Prolog => f.write_str("prolog"),
            HandoffStage::Epilog => f.write_str("epilog"),
        }
    }
}

/// A frame or event payload could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{kind} event is missing payload key `{key}`")]
    MissingKey { kind: String, key: &'static str },

    #[error("{kind} event payload key `{key}` is not {expected}")]
    WrongType {
        kind: String,
        key: &'static str,
        expected: &'static str,
    },
}

/// An invariant of the routing/handoff protocol was violated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Job `{job_id}` arrived before SIMULATION_BEGINS declared the workloads")]
    MappingNotLearned { job_id: String },

    #[error("Workload `{workload}` of job `{job_id}` is owned by neither scheduler")]
    UnknownWorkload { workload: String, job_id: String },

    #[error("SIMULATION_BEGINS re-declared the workloads with a different table")]
    MappingConflict,

    #[error("{stage} acknowledgment for `{acknowledged}` does not match pending allocation `{pending}`")]
    AllocationMismatch {
        stage: HandoffStage,
        pending: String,
        acknowledged: String,
    },

    #[error("{stage} acknowledgment for `{acknowledged}` arrived with nothing pending")]
    UnexpectedAcknowledgment {
        stage: HandoffStage,
        acknowledged: String,
    },

    #[error("JOB_KILLED event spans both schedulers: {job_ids:?}")]
    MixedKill { job_ids: Vec<String> },
}

/// Top-level broker error.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Transport(#[from] EnvError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

impl BrokerError {
    /// Returns the protocol violation, if that is what this is.
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            BrokerError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}
