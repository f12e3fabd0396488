//! Bebida Broker Core - event routing and resource handoff
//!
//! Sits between a discrete-event simulator and two job schedulers that own
//! disjoint workloads:
//! 1. **Routing**: every simulator event goes to the scheduler owning its job
//! 2. **Merging**: both replies fold back into one time-consistent batch
//! 3. **Handoff**: System A job starts wait until System B gives up the
//!    resources (prolog); completions give them back (epilog)

pub mod broker;
pub mod config;
pub mod error;
pub mod handoff;
pub mod merger;
pub mod message;
pub mod router;
pub mod workload;

// Re-export key types for convenience
pub use broker::{Broker, Phase, RunContext, RunSummary};
pub use config::{BrokerConfig, EpilogMode};
pub use error::{BrokerError, DecodeError, HandoffStage, ProtocolError};
pub use handoff::{HandoffMachine, HandoffStats, PendingHandoff};
pub use message::{kinds, Allocation, Batch, Event, Payload};
pub use router::{EventRouter, Split};
pub use workload::{Owner, System, WorkloadClassifier, WorkloadMapping};
