//! Toy discrete-event simulator.
//!
//! Plays the simulator's side of the protocol: it submits a seeded job
//! stream, starts jobs when an `EXECUTE_JOB` comes back, completes them once
//! their walltime has elapsed and ends the simulation when every job is done.

use crate::checker::OutputChecker;
use crate::error::SimError;

use bebida_core::{kinds, Batch, Event, Payload};
use bebida_env::Requester;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

/// Workload owned by System A (HPC).
pub const HPC_WORKLOAD: &str = "w0";

/// Workload owned by System B (BDA).
pub const BDA_WORKLOAD: &str = "w1";

/// Workload never declared at `SIMULATION_BEGINS` (dynamic submissions).
pub const DYNAMIC_WORKLOAD: &str = "dyn";

/// One job of the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SimJob {
    /// `<workload>!<n>`
    pub id: String,

    pub workload: &'static str,

    /// Submission time
    pub submit_at: f64,

    /// Run time once started
    pub walltime: f64,
}

impl SimJob {
    pub fn new(workload: &'static str, n: usize, submit_at: f64, walltime: f64) -> Self {
        Self {
            id: format!("{}!{}", workload, n),
            workload,
            submit_at,
            walltime,
        }
    }
}

/// Shape of a generated job stream.
#[derive(Debug, Clone, Copy)]
pub struct JobMix {
    /// Share of jobs in the HPC workload
    pub share_a: f64,

    /// Share of dynamically submitted jobs (the rest goes to BDA)
    pub share_dynamic: f64,

    /// Submit everything at once instead of spreading arrivals
    pub burst: bool,
}

impl Default for JobMix {
    fn default() -> Self {
        Self {
            share_a: 0.5,
            share_dynamic: 0.0,
            burst: false,
        }
    }
}

impl JobMix {
    /// Generates `jobs` jobs from `seed`.
    ///
    /// Arrival gaps and walltimes are whole numbers so clocks stay exact.
    pub fn generate(&self, seed: u64, jobs: usize) -> Vec<SimJob> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut submit_at = 1.0;

        (0..jobs)
            .map(|n| {
                if !self.burst && n > 0 {
                    submit_at += rng.gen_range(0..3u32) as f64;
                }
                let roll: f64 = rng.gen();
                let workload = if roll < self.share_a {
                    HPC_WORKLOAD
                } else if roll < self.share_a + self.share_dynamic {
                    DYNAMIC_WORKLOAD
                } else {
                    BDA_WORKLOAD
                };
                let walltime = rng.gen_range(1..=8u32) as f64;
                SimJob::new(workload, n, submit_at, walltime)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Running {
    job_id: String,
    alloc: Value,
    ends_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    NotStarted,
    Running,
    Ended,
}

/// What the simulator saw over a run.
#[derive(Debug, Clone, Default)]
pub struct SimulatorReport {
    pub steps: u64,
    pub final_clock: f64,
    pub started: usize,
    pub completed: usize,
}

/// The simulator peer.
pub struct ToySimulator {
    jobs: Vec<SimJob>,
    walltimes: HashMap<String, f64>,
    next_submission: usize,
    running: Vec<Running>,

    /// Submitted, not started yet
    waiting: usize,

    started: usize,
    completed: usize,
    clock: f64,
    stage: Stage,
}

impl ToySimulator {
    pub fn new(mut jobs: Vec<SimJob>) -> Self {
        jobs.sort_by(|a, b| a.submit_at.total_cmp(&b.submit_at));
        let walltimes = jobs.iter().map(|job| (job.id.clone(), job.walltime)).collect();

        Self {
            jobs,
            walltimes,
            next_submission: 0,
            running: Vec::new(),
            waiting: 0,
            started: 0,
            completed: 0,
            clock: 0.0,
            stage: Stage::NotStarted,
        }
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn is_ended(&self) -> bool {
        self.stage == Stage::Ended
    }

    fn begins(&self) -> Event {
        Event::new(
            self.clock,
            kinds::SIMULATION_BEGINS,
            payload(json!({
                "workloads": {
                    HPC_WORKLOAD: format!("{}_hpc.json", HPC_WORKLOAD),
                    BDA_WORKLOAD: format!("{}_bda.json", BDA_WORKLOAD),
                }
            })),
        )
    }

    /// Produces the next batch to send, or `None` once `SIMULATION_ENDS`
    /// went out.
    pub fn next_batch(&mut self) -> Option<Batch> {
        match self.stage {
            Stage::Ended => None,
            Stage::NotStarted => {
                self.stage = Stage::Running;
                Some(Batch::new(self.clock, vec![self.begins()]))
            }
            Stage::Running if self.completed == self.jobs.len() => {
                self.stage = Stage::Ended;
                let ends = Event::new(self.clock, kinds::SIMULATION_ENDS, Payload::new());
                Some(Batch::new(self.clock, vec![ends]))
            }
            Stage::Running => Some(self.advance()),
        }
    }

    /// Jumps to the next submission or completion; without one, ticks the
    /// clock so the schedulers get a chance to start waiting jobs.
    fn advance(&mut self) -> Batch {
        let next_submit = self.jobs.get(self.next_submission).map(|job| job.submit_at);
        let next_end = self.running.iter().map(|r| r.ends_at).min_by(f64::total_cmp);

        let now = match (next_submit, next_end) {
            (Some(s), Some(e)) => s.min(e).max(self.clock),
            (Some(t), None) | (None, Some(t)) => t.max(self.clock),
            (None, None) => self.clock + 1.0,
        };

        let mut events = Vec::new();

        self.running.sort_by(|a, b| a.ends_at.total_cmp(&b.ends_at));
        let (done, still_running): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.running).into_iter().partition(|r| r.ends_at <= now);
        self.running = still_running;
        for job in done {
            events.push(Event::new(
                now,
                kinds::JOB_COMPLETED,
                payload(json!({"job_id": job.job_id, "alloc": job.alloc})),
            ));
            self.completed += 1;
        }

        while let Some(job) = self.jobs.get(self.next_submission) {
            if job.submit_at > now {
                break;
            }
            events.push(Event::new(now, kinds::JOB_SUBMITTED, payload(json!({"job_id": job.id}))));
            self.next_submission += 1;
            self.waiting += 1;
        }

        self.clock = now;
        Batch::new(now, events)
    }

    /// Takes in the broker's reply: adopts its clock and starts jobs.
    pub fn observe(&mut self, reply: &Batch) -> Result<(), SimError> {
        self.clock = self.clock.max(reply.now);

        for event in reply.events.iter().filter(|e| e.is(kinds::EXECUTE_JOB)) {
            let job_id = event.job_id()?;
            let walltime = *self
                .walltimes
                .get(job_id)
                .ok_or_else(|| SimError::UnknownJob(job_id.to_string()))?;

            debug!("sim: {} starts at t={} for {}", job_id, event.timestamp, walltime);
            self.running.push(Running {
                job_id: job_id.to_string(),
                alloc: event.allocation()?.as_value().clone(),
                ends_at: event.timestamp + walltime,
            });
            self.waiting = self.waiting.saturating_sub(1);
            self.started += 1;
        }

        Ok(())
    }

    /// Drives a whole run over `link`, feeding every exchange to `checker`.
    pub async fn drive<R: Requester>(
        mut self,
        link: &R,
        checker: &mut OutputChecker,
        max_steps: u64,
    ) -> Result<SimulatorReport, SimError> {
        let mut step = 0;

        while let Some(batch) = self.next_batch() {
            if step >= max_steps {
                return Err(SimError::Stalled(max_steps));
            }

            let reply = Batch::decode(&link.request(batch.encode()?).await?)?;
            checker.observe(step, &batch, &reply);
            self.observe(&reply)?;
            step += 1;
        }

        debug!(
            "sim: ended after {} steps at t={} ({} waiting)",
            step, self.clock, self.waiting
        );

        Ok(SimulatorReport {
            steps: step,
            final_clock: self.clock,
            started: self.started,
            completed: self.completed,
        })
    }
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic() {
        let mix = JobMix::default();
        assert_eq!(mix.generate(7, 20), mix.generate(7, 20));
        assert_ne!(mix.generate(7, 20), mix.generate(8, 20));
    }

    #[test]
    fn test_burst_submits_together() {
        let mix = JobMix {
            burst: true,
            ..Default::default()
        };
        let jobs = mix.generate(1, 10);
        assert!(jobs.iter().all(|job| job.submit_at == 1.0));
    }

    #[test]
    fn test_lifecycle_without_broker() {
        let mut sim = ToySimulator::new(vec![SimJob::new(HPC_WORKLOAD, 0, 1.0, 4.0)]);

        let first = sim.next_batch().unwrap();
        assert!(first.contains_kind(kinds::SIMULATION_BEGINS));
        sim.observe(&Batch::empty(0.0)).unwrap();

        let submit = sim.next_batch().unwrap();
        assert_eq!(submit.now, 1.0);
        assert!(submit.contains_kind(kinds::JOB_SUBMITTED));

        let start = Event::new(
            2.0,
            kinds::EXECUTE_JOB,
            payload(json!({"job_id": "w0!0", "alloc": "a-0"})),
        );
        sim.observe(&Batch::new(2.0, vec![start])).unwrap();

        let completion = sim.next_batch().unwrap();
        assert_eq!(completion.now, 6.0);
        assert_eq!(completion.events[0].allocation().unwrap().to_string(), "a-0");

        sim.observe(&Batch::empty(6.0)).unwrap();
        let end = sim.next_batch().unwrap();
        assert!(end.contains_kind(kinds::SIMULATION_ENDS));
        assert!(sim.next_batch().is_none());
        assert!(sim.is_ended());
    }

    #[test]
    fn test_idle_tick_while_waiting() {
        let mut sim = ToySimulator::new(vec![SimJob::new(HPC_WORKLOAD, 0, 1.0, 4.0)]);
        sim.next_batch();
        sim.next_batch();
        sim.observe(&Batch::empty(2.0)).unwrap();

        // Job not started yet: clock ticks forward on an empty batch
        let tick = sim.next_batch().unwrap();
        assert!(tick.is_empty());
        assert_eq!(tick.now, 3.0);
    }

    #[test]
    fn test_unknown_start_is_rejected() {
        let mut sim = ToySimulator::new(Vec::new());
        let start = Event::new(1.0, kinds::EXECUTE_JOB, payload(json!({"job_id": "w0!9", "alloc": "x"})));
        let err = sim.observe(&Batch::new(1.0, vec![start])).unwrap_err();
        assert!(matches!(err, SimError::UnknownJob(_)));
    }
}
