//! Bebida Deterministic Simulation Harness
//!
//! Runs the real broker loop against a toy simulator and two scripted
//! schedulers, all in one process over channel transports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          SimWorld                            │
//! │                                                              │
//! │  ┌──────────────┐   REQ/REP   ┌────────┐   REQ/REP  ┌──────┐ │
//! │  │ ToySimulator │────────────►│ Broker │───────────►│  A   │ │
//! │  │ (job stream) │◄────────────│        │───────────►│  B   │ │
//! │  └──────┬───────┘             └────────┘            └──────┘ │
//! │         │                                                    │
//! │  ┌──────▼────────┐                                           │
//! │  │ OutputChecker │  (no handoff leaks, monotonic clock,      │
//! │  └───────────────┘   starts acknowledged by B first)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every source of randomness derives from one 64-bit seed, so a failing
//! run replays exactly.
//!
//! # Usage
//!
//! ```ignore
//! use bebida_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::FifoBurst);
//! assert!(result.passed);
//! ```

mod checker;
mod error;
mod runner;
mod scheduler;
mod simulator;
mod world;
pub mod scenarios;

pub use checker::OutputChecker;
pub use error::SimError;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scheduler::{SchedulerBehaviour, SchedulerModel, SchedulerReport};
pub use simulator::{JobMix, SimJob, SimulatorReport, ToySimulator};
pub use world::{SimConfig, SimWorld, WorldOutcome};
