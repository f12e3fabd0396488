//! Broker output checker.
//!
//! Watches what the simulator gets back, then cross-checks it against what
//! each scheduler saw once the run is over.

use crate::scheduler::SchedulerReport;

use bebida_core::{kinds, Batch, EpilogMode, Event};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Observed {
    step: u64,
    job_id: String,
    alloc: String,
}

impl Observed {
    fn from_event(step: u64, event: &Event) -> Option<Self> {
        Some(Self {
            step,
            job_id: event.job_id().ok()?.to_string(),
            alloc: event.allocation().ok()?.to_string(),
        })
    }
}

/// Collects invariant violations over a run.
#[derive(Debug, Clone)]
pub struct OutputChecker {
    /// Workload whose jobs need a prolog/epilog
    handoff_workload: String,

    last_clock: Option<f64>,

    /// Job starts delivered to the simulator
    starts: Vec<Observed>,

    /// Handoff-workload completions sent by the simulator
    completions: Vec<Observed>,

    violations: Vec<String>,
}

impl OutputChecker {
    pub fn new(handoff_workload: impl Into<String>) -> Self {
        Self {
            handoff_workload: handoff_workload.into(),
            last_clock: None,
            starts: Vec::new(),
            completions: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn needs_handoff(&self, job_id: &str) -> bool {
        job_id.split('!').next() == Some(self.handoff_workload.as_str())
    }

    /// Checks one exchange as seen from the simulator.
    pub fn observe(&mut self, step: u64, sent: &Batch, reply: &Batch) {
        for event in reply.events.iter().filter(|e| e.is_internal()) {
            self.violations
                .push(format!("step {}: {} reached the simulator", step, event.kind));
        }

        if reply.now < sent.now {
            self.violations
                .push(format!("step {}: reply clock {} behind request {}", step, reply.now, sent.now));
        }
        if let Some(last) = self.last_clock.filter(|last| reply.now < *last) {
            self.violations
                .push(format!("step {}: clock went back from {} to {}", step, last, reply.now));
        }
        self.last_clock = Some(reply.now);

        for event in reply.events.iter().filter(|e| e.is(kinds::EXECUTE_JOB)) {
            match Observed::from_event(step, event) {
                Some(start) => self.starts.push(start),
                None => self.violations.push(format!("step {}: malformed job start", step)),
            }
        }

        let completions: Vec<Observed> = sent
            .events
            .iter()
            .filter(|e| e.is(kinds::JOB_COMPLETED))
            .filter_map(|e| Observed::from_event(step, e))
            .filter(|c| self.needs_handoff(&c.job_id))
            .collect();
        self.completions.extend(completions);
    }

    /// Cross-checks handoffs against the schedulers' logs.
    pub fn verify_handoffs(&mut self, system_a: &SchedulerReport, system_b: &SchedulerReport, mode: EpilogMode) {
        for (step, event) in system_a.received.iter().filter(|(_, e)| e.is_internal()) {
            self.violations
                .push(format!("step {}: system A was sent {}", step, event.kind));
        }
        for (step, event) in system_b
            .received
            .iter()
            .filter(|(_, e)| e.is(kinds::RESOURCES_REMOVED) || e.is(kinds::RESOURCES_ADDED))
        {
            self.violations
                .push(format!("step {}: system B was sent {}", step, event.kind));
        }

        self.verify_prolog(system_b);
        self.verify_epilog(system_a, system_b, mode);
    }

    /// Starts must follow B's removal acknowledgments one for one, in order.
    fn verify_prolog(&mut self, system_b: &SchedulerReport) {
        let acks: Vec<(u64, String)> = system_b
            .sent_of(kinds::RESOURCES_REMOVED)
            .filter_map(|(step, e)| Some((*step, e.resources().ok()?.to_string())))
            .collect();

        let starts: Vec<Observed> = self
            .starts
            .iter()
            .filter(|s| self.needs_handoff(&s.job_id))
            .cloned()
            .collect();

        if starts.len() != acks.len() {
            self.violations.push(format!(
                "{} handoff starts but {} removal acknowledgments",
                starts.len(),
                acks.len()
            ));
        }

        for (start, (ack_step, ack_alloc)) in starts.iter().zip(&acks) {
            if start.alloc != *ack_alloc {
                self.violations.push(format!(
                    "{} started on {} but B acknowledged {}",
                    start.job_id, start.alloc, ack_alloc
                ));
            }
            if start.step < *ack_step {
                self.violations.push(format!(
                    "{} started at step {} before B's acknowledgment at step {}",
                    start.job_id, start.step, ack_step
                ));
            }
        }
    }

    fn verify_epilog(&mut self, system_a: &SchedulerReport, system_b: &SchedulerReport, mode: EpilogMode) {
        let additions: HashMap<String, u64> = system_b
            .received_of(kinds::ADD_RESOURCES)
            .filter_map(|(step, e)| Some((e.resources().ok()?.to_string(), *step)))
            .collect();
        let acks: HashMap<String, u64> = system_b
            .sent_of(kinds::RESOURCES_ADDED)
            .filter_map(|(step, e)| Some((e.resources().ok()?.to_string(), *step)))
            .collect();
        let delivered: Vec<Observed> = system_a
            .received_of(kinds::JOB_COMPLETED)
            .filter_map(|(step, e)| Observed::from_event(*step, e))
            .collect();

        if additions.len() != self.completions.len() {
            self.violations.push(format!(
                "{} handoff completions but {} resource additions",
                self.completions.len(),
                additions.len()
            ));
        }
        if delivered.len() != self.completions.len() {
            self.violations.push(format!(
                "{} handoff completions but system A got {}",
                self.completions.len(),
                delivered.len()
            ));
        }

        for completion in &delivered {
            let violation = match mode {
                EpilogMode::Blocking => match acks.get(&completion.alloc) {
                    Some(ack_step) if *ack_step < completion.step => None,
                    Some(ack_step) => Some(format!(
                        "{} delivered at step {} but resources only returned at step {}",
                        completion.job_id, completion.step, ack_step
                    )),
                    None => Some(format!("{} delivered before its resources returned", completion.job_id)),
                },
                EpilogMode::Immediate => match additions.get(&completion.alloc) {
                    Some(add_step) if *add_step == completion.step => None,
                    _ => Some(format!(
                        "{} not forwarded together with its resource addition",
                        completion.job_id
                    )),
                },
            };
            self.violations.extend(violation);
        }
    }

    /// Largest gap in steps between a removal request and the job start it
    /// held back.
    pub fn max_prolog_latency(&self, system_b: &SchedulerReport) -> u64 {
        let requested: HashMap<String, u64> = system_b
            .received_of(kinds::REMOVE_RESOURCES)
            .filter_map(|(step, e)| Some((e.resources().ok()?.to_string(), *step)))
            .collect();

        self.starts
            .iter()
            .filter_map(|s| requested.get(&s.alloc).map(|at| s.step.saturating_sub(*at)))
            .max()
            .unwrap_or(0)
    }

    pub fn starts(&self) -> usize {
        self.starts.len()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}
