//! Scenario runner - executes broker scenarios against simulated peers.

use crate::scenarios::ScenarioId;
use crate::scheduler::SchedulerBehaviour;
use crate::simulator::{JobMix, SimJob, HPC_WORKLOAD};
use crate::world::{SimConfig, SimWorld, WorldOutcome};

use bebida_core::{EpilogMode, ProtocolError};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Broker steps completed
    pub steps: u64,

    /// Clock of the last reply to the simulator
    pub final_clock: f64,

    /// Jobs in the stream
    pub jobs: usize,

    /// Jobs that needed a prolog/epilog
    pub handoff_jobs: usize,

    /// Job starts released after a removal acknowledgment
    pub prolog_releases: u64,

    /// Completions released after an addition acknowledgment
    pub epilog_releases: u64,

    /// Largest delay between a removal request and the start it held back
    pub max_prolog_latency_steps: u64,
}

/// Runs broker scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Jobs per generated stream
    jobs: usize,

    /// Epilog mode for scenarios that do not fix one
    epilog: Option<EpilogMode>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            jobs: 24,
            epilog: None,
        }
    }

    /// Sets the number of generated jobs.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Forces an epilog mode.
    pub fn with_epilog(mut self, mode: EpilogMode) -> Self {
        self.epilog = Some(mode);
        self
    }

    fn config_for(&self, scenario: ScenarioId) -> SimConfig {
        let mut config = SimConfig::default();
        if let Some(mode) = self.epilog {
            config.broker.epilog_mode = mode;
        }

        match scenario {
            ScenarioId::HandoffBasic => {
                config.jobs = vec![SimJob::new(HPC_WORKLOAD, 0, 1.0, 4.0)];
            }
            ScenarioId::FifoBurst => {
                let mix = JobMix {
                    share_a: 0.8,
                    burst: true,
                    ..Default::default()
                };
                config.jobs = mix.generate(self.seed, self.jobs);
            }
            ScenarioId::DelayedAck => {
                config.jobs = JobMix::default().generate(self.seed, self.jobs);
                config.system_b = SchedulerBehaviour {
                    removal_ack_delay: 2,
                    ..Default::default()
                };
            }
            ScenarioId::EpilogBlocking | ScenarioId::EpilogImmediate => {
                let mix = JobMix {
                    share_a: 1.0,
                    ..Default::default()
                };
                config.jobs = mix.generate(self.seed, self.jobs);
                config.broker.epilog_mode = if scenario == ScenarioId::EpilogBlocking {
                    EpilogMode::Blocking
                } else {
                    EpilogMode::Immediate
                };
            }
            ScenarioId::MixedWorkload => {
                let mix = JobMix {
                    share_a: 0.4,
                    share_dynamic: 0.2,
                    burst: false,
                };
                config.jobs = mix.generate(self.seed, self.jobs);
            }
            ScenarioId::AckReorder => {
                let mix = JobMix {
                    share_a: 1.0,
                    burst: true,
                    ..Default::default()
                };
                config.jobs = mix.generate(self.seed, self.jobs.max(2));
                config.system_b = SchedulerBehaviour {
                    reorder_acks: true,
                    ..Default::default()
                };
            }
        }

        config
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let config = self.config_for(scenario);
        let mut metrics = ScenarioMetrics {
            jobs: config.jobs.len(),
            handoff_jobs: config.jobs.iter().filter(|j| j.workload == HPC_WORKLOAD).count(),
            ..Default::default()
        };
        let mode = config.broker.epilog_mode;

        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => return self.result(scenario, metrics, Err(format!("runtime setup failed: {}", e))),
        };
        let outcome = runtime.block_on(SimWorld::new(config).run());

        let verdict = if scenario.expects_abort() {
            Self::expect_abort(outcome)
        } else {
            Self::expect_clean(scenario, mode, outcome, &mut metrics)
        };

        self.result(scenario, metrics, verdict)
    }

    fn result(&self, scenario: ScenarioId, metrics: ScenarioMetrics, verdict: Result<(), String>) -> ScenarioResult {
        match &verdict {
            Ok(()) => debug!("{}: {:?}", scenario.name(), metrics),
            Err(reason) => warn!("{} (seed={}) failed: {}", scenario.name(), self.seed, reason),
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: verdict.is_ok(),
            failure_reason: verdict.err(),
            metrics,
        }
    }

    fn expect_abort(outcome: WorldOutcome) -> Result<(), String> {
        match outcome.broker {
            Err(e) if matches!(e.as_protocol(), Some(ProtocolError::AllocationMismatch { .. })) => {
                info!("Broker aborted as expected: {}", e);
                Ok(())
            }
            Err(e) => Err(format!("broker aborted for the wrong reason: {}", e)),
            Ok(_) => Err("broker accepted out-of-order acknowledgments".to_string()),
        }
    }

    fn expect_clean(
        scenario: ScenarioId,
        mode: EpilogMode,
        outcome: WorldOutcome,
        metrics: &mut ScenarioMetrics,
    ) -> Result<(), String> {
        let WorldOutcome {
            simulator,
            broker,
            system_a,
            system_b,
            mut checker,
        } = outcome;

        let summary = broker.map_err(|e| format!("broker aborted: {}", e))?;
        let simulator = simulator.map_err(|e| format!("simulator: {}", e))?;
        let system_a = system_a.map_err(|e| format!("system A: {}", e))?;
        let system_b = system_b.map_err(|e| format!("system B: {}", e))?;

        metrics.steps = summary.steps;
        metrics.final_clock = summary.final_clock;
        metrics.prolog_releases = summary.handoffs.prolog_releases;
        metrics.epilog_releases = summary.handoffs.epilog_releases;
        metrics.max_prolog_latency_steps = checker.max_prolog_latency(&system_b);

        checker.verify_handoffs(&system_a, &system_b, mode);
        if !checker.is_clean() {
            return Err(checker.violations().join("; "));
        }

        if simulator.completed != metrics.jobs {
            return Err(format!("{} of {} jobs completed", simulator.completed, metrics.jobs));
        }
        if summary.outstanding_prolog > 0 || summary.outstanding_epilog > 0 {
            return Err(format!(
                "handoffs left pending: prolog={} epilog={}",
                summary.outstanding_prolog, summary.outstanding_epilog
            ));
        }
        if metrics.prolog_releases != metrics.handoff_jobs as u64 {
            return Err(format!(
                "{} starts released for {} HPC jobs",
                metrics.prolog_releases, metrics.handoff_jobs
            ));
        }

        match scenario {
            ScenarioId::DelayedAck if metrics.handoff_jobs > 0 && metrics.max_prolog_latency_steps != 2 => {
                Err(format!(
                    "starts held for {} steps, expected 2",
                    metrics.max_prolog_latency_steps
                ))
            }
            ScenarioId::EpilogBlocking if metrics.epilog_releases != metrics.handoff_jobs as u64 => Err(format!(
                "{} completions released for {} HPC jobs",
                metrics.epilog_releases, metrics.handoff_jobs
            )),
            ScenarioId::EpilogImmediate if metrics.epilog_releases != 0 => {
                Err("immediate epilog matched acknowledgments".to_string())
            }
            _ => {
                info!(
                    "✓ {} complete: {} steps, {} handoffs, final clock {}",
                    scenario.name(),
                    metrics.steps,
                    metrics.prolog_releases,
                    metrics.final_clock
                );
                Ok(())
            }
        }
    }
}
