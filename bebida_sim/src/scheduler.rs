//! Scripted scheduler models for System A (HPC) and System B (BDA).
//!
//! Both start every job they are handed right away on a fresh allocation.
//! System B also answers the broker's resource transfer requests, with
//! optional fault injection: late removal acknowledgments, or
//! acknowledgments sent out of order.

use crate::error::SimError;

use bebida_core::{kinds, Allocation, Batch, Event, Payload, System};
use bebida_env::Responder;
use serde_json::json;
use std::collections::VecDeque;
use tracing::debug;

/// Fault injection and timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerBehaviour {
    /// Simulated time a reply is ahead of the batch it answers
    pub reaction_time: f64,

    /// Steps a `RESOURCES_REMOVED` is held back
    pub removal_ack_delay: u64,

    /// Swap the first two removal acknowledgments sent in one step
    pub reorder_acks: bool,
}

impl Default for SchedulerBehaviour {
    fn default() -> Self {
        Self {
            reaction_time: 1.0,
            removal_ack_delay: 0,
            reorder_acks: false,
        }
    }
}

/// Everything a scheduler received and sent, tagged with the step.
#[derive(Debug, Clone)]
pub struct SchedulerReport {
    pub system: System,
    pub steps: u64,
    pub received: Vec<(u64, Event)>,
    pub sent: Vec<(u64, Event)>,
}

impl SchedulerReport {
    pub fn received_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a (u64, Event)> + 'a {
        self.received.iter().filter(move |(_, e)| e.is(kind))
    }

    pub fn sent_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a (u64, Event)> + 'a {
        self.sent.iter().filter(move |(_, e)| e.is(kind))
    }
}

/// A scheduler peer.
pub struct SchedulerModel {
    system: System,
    behaviour: SchedulerBehaviour,
    step: u64,
    next_alloc: u64,

    /// Removal acknowledgments not sent yet: (due step, resources)
    delayed: VecDeque<(u64, Allocation)>,

    finished: bool,
    received: Vec<(u64, Event)>,
    sent: Vec<(u64, Event)>,
}

impl SchedulerModel {
    pub fn new(system: System, behaviour: SchedulerBehaviour) -> Self {
        Self {
            system,
            behaviour,
            step: 0,
            next_alloc: 0,
            delayed: VecDeque::new(),
            finished: false,
            received: Vec::new(),
            sent: Vec::new(),
        }
    }

    fn fresh_allocation(&mut self) -> Allocation {
        let prefix = match self.system {
            System::A => "a",
            System::B => "b",
        };
        let allocation = Allocation::new(format!("{}-{}", prefix, self.next_alloc));
        self.next_alloc += 1;
        allocation
    }

    /// Answers one batch from the broker.
    pub fn respond(&mut self, batch: &Batch) -> Batch {
        let now = batch.now + self.behaviour.reaction_time;
        let mut events = Vec::new();

        for event in &batch.events {
            self.received.push((self.step, event.clone()));

            match event.kind.as_str() {
                kinds::JOB_SUBMITTED => {
                    let Ok(job_id) = event.job_id() else { continue };
                    let mut data = Payload::new();
                    data.insert("job_id".into(), json!(job_id));
                    data.insert("alloc".into(), self.fresh_allocation().as_value().clone());
                    events.push(Event::new(now, kinds::EXECUTE_JOB, data));
                }
                kinds::REMOVE_RESOURCES => {
                    if let Ok(resources) = event.resources() {
                        self.delayed
                            .push_back((self.step + self.behaviour.removal_ack_delay, resources));
                    }
                }
                kinds::ADD_RESOURCES => {
                    if let Ok(resources) = event.resources() {
                        events.push(Event::resources_added(now, &resources));
                    }
                }
                kinds::SIMULATION_ENDS => self.finished = true,
                _ => {}
            }
        }

        let mut due = Vec::new();
        while self.delayed.front().is_some_and(|(at, _)| *at <= self.step) {
            if let Some((_, resources)) = self.delayed.pop_front() {
                due.push(Event::resources_removed(now, &resources));
            }
        }
        if self.behaviour.reorder_acks && due.len() >= 2 {
            debug!("{}: swapping acknowledgments", self.system);
            due.swap(0, 1);
        }
        events.extend(due);

        self.sent.extend(events.iter().map(|e| (self.step, e.clone())));
        self.step += 1;
        Batch::new(now, events)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Serves the broker until `SIMULATION_ENDS`, or until the broker hangs
    /// up.
    pub async fn serve<R: Responder>(mut self, link: R) -> Result<SchedulerReport, SimError> {
        while !self.finished {
            let frame = match link.recv().await {
                Ok(frame) => frame,
                Err(e) if e.is_closed() => {
                    debug!("{}: broker hung up at step {}", self.system, self.step);
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            let reply = self.respond(&Batch::decode(&frame)?);
            link.reply(reply.encode()?).await?;
        }

        Ok(SchedulerReport {
            system: self.system,
            steps: self.step,
            received: self.received,
            sent: self.sent,
        })
    }
}
