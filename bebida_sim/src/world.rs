//! SimWorld - wires the broker to its simulated peers.

use crate::checker::OutputChecker;
use crate::error::SimError;
use crate::scheduler::{SchedulerBehaviour, SchedulerModel, SchedulerReport};
use crate::simulator::{SimJob, SimulatorReport, ToySimulator, HPC_WORKLOAD};

use bebida_core::{Broker, BrokerConfig, BrokerError, RunSummary, System};
use bebida_env::{channel, PeerId};
use tokio::task::JoinHandle;
use tracing::debug;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Job stream replayed by the simulator
    pub jobs: Vec<SimJob>,

    /// Broker under test
    pub broker: BrokerConfig,

    pub system_a: SchedulerBehaviour,
    pub system_b: SchedulerBehaviour,

    /// Simulator steps before the run counts as stalled
    pub max_steps: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            jobs: Vec::new(),
            broker: BrokerConfig::default(),
            system_a: SchedulerBehaviour::default(),
            system_b: SchedulerBehaviour::default(),
            max_steps: 10_000,
        }
    }
}

/// How every participant of a run finished.
#[derive(Debug)]
pub struct WorldOutcome {
    pub simulator: Result<SimulatorReport, SimError>,
    pub broker: Result<RunSummary, BrokerError>,
    pub system_a: Result<SchedulerReport, SimError>,
    pub system_b: Result<SchedulerReport, SimError>,
    pub checker: OutputChecker,
}

/// The SimWorld - one broker, one simulator, two schedulers.
pub struct SimWorld {
    pub config: SimConfig,
}

impl SimWorld {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    /// Runs until the simulator is done or any participant fails.
    ///
    /// The broker and both schedulers run as tasks; the simulator is driven
    /// from the calling task.
    pub async fn run(self) -> WorldOutcome {
        let SimConfig {
            jobs,
            broker,
            system_a,
            system_b,
            max_steps,
        } = self.config;

        let (sim_link, broker_sim) = channel(PeerId::Simulator);
        let (broker_a, a_link) = channel(PeerId::SystemA);
        let (broker_b, b_link) = channel(PeerId::SystemB);

        let broker_task = tokio::spawn(Broker::new(broker, broker_sim, broker_a, broker_b).run());
        let a_task = tokio::spawn(SchedulerModel::new(System::A, system_a).serve(a_link));
        let b_task = tokio::spawn(SchedulerModel::new(System::B, system_b).serve(b_link));

        debug!("world: {} jobs, max {} steps", jobs.len(), max_steps);
        let mut checker = OutputChecker::new(HPC_WORKLOAD);
        let simulator = ToySimulator::new(jobs).drive(&sim_link, &mut checker, max_steps).await;

        // Hang up so a broker still waiting on the simulator unblocks
        drop(sim_link);

        // Re-raise broker panics
        let broker = match broker_task.await {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };

        WorldOutcome {
            simulator,
            broker,
            system_a: join(a_task).await,
            system_b: join(b_task).await,
            checker,
        }
    }
}

async fn join(task: JoinHandle<Result<SchedulerReport, SimError>>) -> Result<SchedulerReport, SimError> {
    task.await.map_err(|e| SimError::Task(e.to_string()))?
}
