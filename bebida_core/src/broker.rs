//! Broker Runtime - the per-step state machine between the three peers.
//!
//! # Step
//!
//! ```text
//!  AWAIT_SIM ──> FORWARD_A ──> HANDLE_PROLOG ──> FORWARD_B ──> RECONCILE ──> REPLY_SIM
//!      ▲                                                                         │
//!      └─────────────────────────────────────────────────────────────────────────┤
//!                                                     SIMULATION_ENDS seen ──> TERMINATED
//! ```
//!
//! Every exchange is awaited before the next one starts: System B's batch
//! depends on System A's reply (prolog requests), so there is never more
//! than one peer exchange in flight. Both schedulers get a batch every
//! step, even an empty one, to keep their clocks in sync.
//!
//! # Usage
//!
//! ```ignore
//! use bebida_core::{Broker, BrokerConfig};
//!
//! let broker = Broker::new(BrokerConfig::default(), simulator, system_a, system_b);
//! let summary = broker.run().await?;
//! ```

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::handoff::{HandoffMachine, HandoffStats, Intercepted};
use crate::merger;
use crate::message::Batch;
use crate::router::EventRouter;
use crate::workload::WorkloadClassifier;

use bebida_env::{Requester, Responder};
use tracing::{debug, error, info, warn};

/// Where the broker is within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitSim,
    ForwardA,
    HandleProlog,
    ForwardB,
    Reconcile,
    ReplySim,
    Terminated,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::AwaitSim => "AWAIT_SIM",
            Phase::ForwardA => "FORWARD_A",
            Phase::HandleProlog => "HANDLE_PROLOG",
            Phase::ForwardB => "FORWARD_B",
            Phase::Reconcile => "RECONCILE",
            Phase::ReplySim => "REPLY_SIM",
            Phase::Terminated => "TERMINATED",
        }
    }
}

/// All mutable state of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Router, owning the learned workload mapping
    pub router: EventRouter,

    /// Pending prolog/epilog handoffs
    pub handoff: HandoffMachine,

    /// Completed steps
    step: u64,

    /// Clock of the last reply sent to the simulator
    last_clock: f64,

    terminated: bool,
}

impl RunContext {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            router: EventRouter::new(WorkloadClassifier::new(config)),
            handoff: HandoffMachine::new(config.epilog_mode),
            step: 0,
            last_clock: 0.0,
            terminated: false,
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn summary(&self) -> RunSummary {
        let (outstanding_prolog, outstanding_epilog) = self.handoff.outstanding();
        RunSummary {
            steps: self.step,
            final_clock: self.last_clock,
            handoffs: self.handoff.stats().clone(),
            outstanding_prolog,
            outstanding_epilog,
        }
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub final_clock: f64,
    pub handoffs: HandoffStats,
    pub outstanding_prolog: usize,
    pub outstanding_epilog: usize,
}

/// Man-in-the-middle between the simulator and two schedulers.
///
/// Generic over the transport, so the same loop runs over ZeroMQ in
/// production and over in-process channels in the simulation harness.
pub struct Broker<S, A, B>
where
    S: Responder,
    A: Requester,
    B: Requester,
{
    /// Simulator link (the broker answers it)
    simulator: S,

    /// System A link (the broker asks it)
    system_a: A,

    /// System B link (the broker asks it)
    system_b: B,

    context: RunContext,
    phase: Phase,
}

impl<S, A, B> Broker<S, A, B>
where
    S: Responder,
    A: Requester,
    B: Requester,
{
    pub fn new(config: BrokerConfig, simulator: S, system_a: A, system_b: B) -> Self {
        Self {
            simulator,
            system_a,
            system_b,
            context: RunContext::new(&config),
            phase: Phase::AwaitSim,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    fn enter(&mut self, phase: Phase) {
        debug!("step {}: {} -> {}", self.context.step, self.phase.name(), phase.name());
        self.phase = phase;
    }

    /// Runs one full simulator round trip and returns the reply sent back.
    pub async fn step(&mut self) -> Result<Batch, BrokerError> {
        self.enter(Phase::AwaitSim);
        let inbound = Batch::decode(&self.simulator.recv().await?)?;
        debug!("simulator: now={} events={}", inbound.now, inbound.len());

        let mut split = self.context.router.split(&inbound)?;
        self.context.handoff.begin_epilog(&mut split)?;

        self.enter(Phase::ForwardA);
        let reply_a = exchange(&self.system_a, &split.batch_for_a()).await?;

        self.enter(Phase::HandleProlog);
        let Intercepted { reply: reply_a, removals } = self.context.handoff.intercept_prolog(reply_a)?;
        split.system_b.extend(removals);

        self.enter(Phase::ForwardB);
        let reply_b = exchange(&self.system_b, &split.batch_for_b()).await?;

        self.enter(Phase::Reconcile);
        let settlement = self.context.handoff.settle(reply_b)?;
        let (reply_a, reply_b) = settlement.apply(reply_a);
        let merged = merger::merge(reply_a, reply_b).at_least(inbound.now);

        self.enter(Phase::ReplySim);
        self.simulator.reply(merged.encode()?).await?;
        self.context.step += 1;
        self.context.last_clock = merged.now;

        if split.terminated {
            self.context.terminated = true;
            self.enter(Phase::Terminated);
        }

        Ok(merged)
    }

    /// Loops until the simulation ends, or until the first fatal error.
    pub async fn run(mut self) -> Result<RunSummary, BrokerError> {
        info!("Broker running (epilog: {})", self.context.handoff.epilog_mode());

        while !self.context.terminated {
            if let Err(e) = self.step().await {
                error!(
                    "Broker aborted in {} at step {}: {}",
                    self.phase.name(),
                    self.context.step,
                    e
                );
                return Err(e);
            }
        }

        let summary = self.context.summary();
        if summary.outstanding_prolog > 0 || summary.outstanding_epilog > 0 {
            warn!(
                "Simulation ended with handoffs pending: prolog={} epilog={}",
                summary.outstanding_prolog, summary.outstanding_epilog
            );
        }
        info!("Bye Bye! {} steps, final clock {}", summary.steps, summary.final_clock);

        Ok(summary)
    }
}

/// One blocking round trip with a scheduler.
async fn exchange<R: Requester>(link: &R, batch: &Batch) -> Result<Batch, BrokerError> {
    debug!("-> {}: now={} events={}", link.peer(), batch.now, batch.len());
    let reply = Batch::decode(&link.request(batch.encode()?).await?)?;
    debug!("<- {}: now={} events={}", link.peer(), reply.now, reply.len());
    Ok(reply)
}
