//! Resource Handoff State Machine - Bebida prolog/epilog.
//!
//! System A jobs run on resources that System B considers its own. Before a
//! System A job may start, the broker takes its resources away from B
//! (prolog); after it completes, the broker gives them back (epilog).
//!
//! # Prolog
//!
//! ```text
//! System A reply            broker                          System B
//!  EXECUTE_JOB{alloc} ──> withheld in FIFO ── REMOVE_RESOURCES{resources} ──>
//!                                        <── RESOURCES_REMOVED{resources} ──
//!  EXECUTE_JOB (re-stamped at ack) <── pop head, check allocation
//! ```
//!
//! Acknowledgments are matched strictly in request order. A mismatch means
//! the two schedulers disagree on ordering, which is fatal.
//!
//! # Epilog
//!
//! An A-owned `JOB_COMPLETED` yields an `ADD_RESOURCES` request for B. In
//! [`EpilogMode::Blocking`] the completion waits in its own FIFO until B's
//! `RESOURCES_ADDED` arrives, then rides along with A's next batch; in
//! [`EpilogMode::Immediate`] it is forwarded at once.
//!
//! Both queues outlive a single step: an acknowledgment may come steps
//! after its request.

use crate::config::EpilogMode;
use crate::error::{BrokerError, HandoffStage, ProtocolError};
use crate::message::{kinds, Allocation, Batch, Event};
use crate::router::Split;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// FIFO of events withheld until System B acknowledges a transfer.
#[derive(Debug, Clone)]
pub struct PendingHandoff {
    stage: HandoffStage,
    queue: VecDeque<(Allocation, Event)>,
}

impl PendingHandoff {
    pub fn new(stage: HandoffStage) -> Self {
        Self {
            stage,
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, allocation: Allocation, event: Event) {
        self.queue.push_back((allocation, event));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Allocations still waiting, oldest first.
    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.queue.iter().map(|(allocation, _)| allocation)
    }

    /// Matches `ack` against the head of the queue.
    ///
    /// Returns the withheld event re-stamped at the acknowledgment time.
    pub fn acknowledge(&mut self, ack: &Event) -> Result<Event, BrokerError> {
        let acknowledged = ack.resources()?;

        let (pending, event) = self.queue.pop_front().ok_or_else(|| ProtocolError::UnexpectedAcknowledgment {
            stage: self.stage,
            acknowledged: acknowledged.to_string(),
        })?;

        if pending != acknowledged {
            return Err(ProtocolError::AllocationMismatch {
                stage: self.stage,
                pending: pending.to_string(),
                acknowledged: acknowledged.to_string(),
            }
            .into());
        }

        Ok(event.with_timestamp(ack.timestamp))
    }
}

/// Handoff counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub prolog_requests: u64,
    pub prolog_releases: u64,
    pub epilog_requests: u64,
    pub epilog_releases: u64,
}

/// System A's reply with job starts pulled out.
#[derive(Debug, Clone, PartialEq)]
pub struct Intercepted {
    /// What is left of A's reply
    pub reply: Batch,

    /// `REMOVE_RESOURCES` requests for System B, one per withheld start
    pub removals: Vec<Event>,
}

/// System B's reply with acknowledgments consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// What is left of B's reply
    pub reply: Batch,

    /// Job starts cleared by B, in request order
    pub released: Vec<Event>,

    /// Latest prolog acknowledgment timestamp, if any
    pub ack_clock: Option<f64>,
}

impl Settlement {
    /// Appends released starts to A's outgoing reply and returns both
    /// outgoing replies `(a, b)`.
    pub fn apply(self, reply_a: Batch) -> (Batch, Batch) {
        let Batch { now, mut events } = reply_a;
        events.extend(self.released);

        let reply_a = Batch::new(now, events).at_least(self.ack_clock.unwrap_or(now));
        (reply_a, self.reply)
    }
}

/// Drives the prolog and epilog across steps.
#[derive(Debug, Clone)]
pub struct HandoffMachine {
    epilog_mode: EpilogMode,
    prolog: PendingHandoff,
    epilog: PendingHandoff,

    /// Completions cleared by System B, delivered with A's next batch
    cleared_completions: Vec<Event>,

    stats: HandoffStats,
}

impl HandoffMachine {
    pub fn new(epilog_mode: EpilogMode) -> Self {
        Self {
            epilog_mode,
            prolog: PendingHandoff::new(HandoffStage::Prolog),
            epilog: PendingHandoff::new(HandoffStage::Epilog),
            cleared_completions: Vec::new(),
            stats: HandoffStats::default(),
        }
    }

    pub fn epilog_mode(&self) -> EpilogMode {
        self.epilog_mode
    }

    pub fn prolog(&self) -> &PendingHandoff {
        &self.prolog
    }

    pub fn epilog(&self) -> &PendingHandoff {
        &self.epilog
    }

    pub fn stats(&self) -> &HandoffStats {
        &self.stats
    }

    /// Completions cleared but not yet delivered to System A.
    pub fn cleared_completions(&self) -> &[Event] {
        &self.cleared_completions
    }

    /// Epilog, on the routed simulator batch before System A is contacted.
    ///
    /// Appends one `ADD_RESOURCES` per A-owned completion to B's stream. In
    /// blocking mode the completions leave A's stream, and completions
    /// cleared in earlier steps go to the front of it.
    pub fn begin_epilog(&mut self, split: &mut Split) -> Result<(), BrokerError> {
        let mut stream_a = std::mem::take(&mut self.cleared_completions);

        for event in std::mem::take(&mut split.system_a) {
            if !event.is(kinds::JOB_COMPLETED) {
                stream_a.push(event);
                continue;
            }

            let allocation = event.allocation()?;
            debug!("Epilog: returning {} to system B", allocation);
            split.system_b.push(Event::add_resources(split.now, &allocation));
            self.stats.epilog_requests += 1;

            match self.epilog_mode {
                EpilogMode::Immediate => stream_a.push(event),
                EpilogMode::Blocking => self.epilog.push(allocation, event),
            }
        }

        split.system_a = stream_a;
        Ok(())
    }

    /// Prolog steps 1-4, on System A's reply.
    ///
    /// Each `EXECUTE_JOB` is withheld and turned into a `REMOVE_RESOURCES`
    /// request stamped with A's clock.
    pub fn intercept_prolog(&mut self, reply: Batch) -> Result<Intercepted, BrokerError> {
        let Batch { now, events } = reply;
        let mut kept = Vec::with_capacity(events.len());
        let mut removals = Vec::new();

        for event in events {
            if event.is(kinds::EXECUTE_JOB) {
                let allocation = event.allocation()?;
                debug!("Prolog: withholding job start on {} until system B releases it", allocation);
                removals.push(Event::remove_resources(now, &allocation));
                self.prolog.push(allocation, event);
                self.stats.prolog_requests += 1;
            } else if event.is_internal() {
                warn!("Dropping {} from system A reply", event.kind);
            } else {
                kept.push(event);
            }
        }

        Ok(Intercepted {
            reply: Batch::new(now, kept),
            removals,
        })
    }

    /// Prolog step 5 (and the blocking epilog), on System B's reply.
    ///
    /// Acknowledgments are consumed in order and never forwarded.
    pub fn settle(&mut self, reply: Batch) -> Result<Settlement, BrokerError> {
        let Batch { now, events } = reply;
        let mut kept = Vec::with_capacity(events.len());
        let mut released = Vec::new();
        let mut ack_clock: Option<f64> = None;

        for event in events {
            match event.kind.as_str() {
                kinds::RESOURCES_REMOVED => {
                    let start = self.prolog.acknowledge(&event)?;
                    debug!("Prolog: releasing job start at t={}", start.timestamp);
                    ack_clock = Some(ack_clock.map_or(event.timestamp, |clock| clock.max(event.timestamp)));
                    released.push(start);
                    self.stats.prolog_releases += 1;
                }
                kinds::RESOURCES_ADDED => match self.epilog_mode {
                    EpilogMode::Blocking => {
                        let completion = self.epilog.acknowledge(&event)?;
                        debug!("Epilog: completion cleared at t={}", completion.timestamp);
                        self.cleared_completions.push(completion);
                        self.stats.epilog_releases += 1;
                    }
                    EpilogMode::Immediate => debug!("Epilog: ignoring acknowledgment in immediate mode"),
                },
                _ if event.is_internal() => warn!("Dropping {} from system B reply", event.kind),
                _ => kept.push(event),
            }
        }

        Ok(Settlement {
            reply: Batch::new(now, kept),
            released,
            ack_clock,
        })
    }

    /// Handoffs not yet delivered: `(prolog, epilog)`.
    ///
    /// The epilog count includes completions B already cleared that have
    /// not reached System A; after the last step they never will.
    pub fn outstanding(&self) -> (usize, usize) {
        (self.prolog.len(), self.epilog.len() + self.cleared_completions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use proptest::prelude::*;
    use serde_json::json;

    fn execute(job: u32, alloc: &str, at: f64) -> Event {
        let data: Payload = serde_json::from_value(json!({"job_id": format!("w0!{}", job), "alloc": alloc})).unwrap();
        Event::new(at, kinds::EXECUTE_JOB, data)
    }

    fn completed(job: u32, alloc: &str, at: f64) -> Event {
        let data: Payload = serde_json::from_value(json!({"job_id": format!("w0!{}", job), "alloc": alloc})).unwrap();
        Event::new(at, kinds::JOB_COMPLETED, data)
    }

    fn removed(alloc: &str, at: f64) -> Event {
        Event::resources_removed(at, &Allocation::new(alloc))
    }

    fn added(alloc: &str, at: f64) -> Event {
        Event::resources_added(at, &Allocation::new(alloc))
    }

    #[test]
    fn test_prolog_withholds_and_requests() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        let notify = Event::new(2.0, "NOTIFY", Payload::new());
        let reply = Batch::new(2.0, vec![notify.clone(), execute(3, "R1", 2.0)]);

        let intercepted = machine.intercept_prolog(reply).unwrap();

        assert_eq!(intercepted.reply.events, vec![notify]);
        assert_eq!(intercepted.removals, vec![Event::remove_resources(2.0, &Allocation::new("R1"))]);
        assert_eq!(machine.outstanding(), (1, 0));
    }

    #[test]
    fn test_prolog_release_restamps_and_strips_ack() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        let intercepted = machine
            .intercept_prolog(Batch::new(2.0, vec![execute(3, "R1", 2.0)]))
            .unwrap();

        let settlement = machine.settle(Batch::new(3.0, vec![removed("R1", 3.0)])).unwrap();
        assert!(settlement.reply.is_empty());
        assert_eq!(settlement.ack_clock, Some(3.0));

        let (reply_a, reply_b) = settlement.apply(intercepted.reply);
        assert_eq!(reply_a.now, 3.0);
        assert_eq!(reply_a.events, vec![execute(3, "R1", 3.0)]);
        assert!(reply_b.is_empty());
        assert_eq!(machine.outstanding(), (0, 0));
        assert_eq!(machine.stats().prolog_releases, 1);
    }

    #[test]
    fn test_prolog_swapped_acks_are_fatal() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        machine
            .intercept_prolog(Batch::new(2.0, vec![execute(1, "a1", 2.0), execute(2, "a2", 2.0)]))
            .unwrap();

        let err = machine
            .settle(Batch::new(3.0, vec![removed("a2", 3.0), removed("a1", 3.0)]))
            .unwrap_err();

        assert_eq!(
            err.as_protocol(),
            Some(&ProtocolError::AllocationMismatch {
                stage: HandoffStage::Prolog,
                pending: "a1".into(),
                acknowledged: "a2".into(),
            })
        );
    }

    #[test]
    fn test_ack_without_request_is_fatal() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        let err = machine.settle(Batch::new(1.0, vec![removed("R9", 1.0)])).unwrap_err();
        assert!(matches!(
            err.as_protocol(),
            Some(ProtocolError::UnexpectedAcknowledgment { stage: HandoffStage::Prolog, .. })
        ));
    }

    #[test]
    fn test_prolog_carries_over_steps() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        machine
            .intercept_prolog(Batch::new(2.0, vec![execute(1, "R1", 2.0)]))
            .unwrap();

        // Step k: B says nothing about R1
        let settlement = machine.settle(Batch::empty(3.0)).unwrap();
        assert!(settlement.released.is_empty());
        assert_eq!(machine.outstanding(), (1, 0));

        // Step k+1: acknowledgment arrives
        let settlement = machine.settle(Batch::new(6.0, vec![removed("R1", 5.5)])).unwrap();
        assert_eq!(settlement.released, vec![execute(1, "R1", 5.5)]);
        assert_eq!(machine.outstanding(), (0, 0));
    }

    #[test]
    fn test_execute_without_alloc_is_decode_error() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        let start = Event::new(2.0, kinds::EXECUTE_JOB, Payload::new());
        let err = machine.intercept_prolog(Batch::new(2.0, vec![start])).unwrap_err();
        assert!(matches!(err, BrokerError::Decode(_)));
    }

    #[test]
    fn test_blocking_epilog_round() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        let mut split = Split::new(10.0);
        split.system_a.push(completed(1, "R1", 10.0));

        machine.begin_epilog(&mut split).unwrap();
        assert!(split.system_a.is_empty());
        assert_eq!(split.system_b, vec![Event::add_resources(10.0, &Allocation::new("R1"))]);
        assert_eq!(machine.outstanding(), (0, 1));

        let settlement = machine.settle(Batch::new(11.0, vec![added("R1", 11.0)])).unwrap();
        assert!(settlement.reply.is_empty());
        assert!(settlement.released.is_empty());
        assert_eq!(machine.cleared_completions(), &[completed(1, "R1", 11.0)]);
        assert_eq!(machine.outstanding(), (0, 1));

        // Next step: the cleared completion leads System A's batch
        let submitted = Event::new(12.0, kinds::JOB_SUBMITTED, Payload::new());
        let mut next = Split::new(12.0);
        next.system_a.push(submitted.clone());
        machine.begin_epilog(&mut next).unwrap();

        assert_eq!(next.system_a, vec![completed(1, "R1", 11.0), submitted]);
        assert!(next.system_b.is_empty());
        assert!(machine.cleared_completions().is_empty());
        assert_eq!(machine.outstanding(), (0, 0));
        assert_eq!(machine.stats().epilog_releases, 1);
    }

    #[test]
    fn test_blocking_epilog_mismatch_is_fatal() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        let mut split = Split::new(10.0);
        split.system_a.push(completed(1, "R1", 10.0));
        machine.begin_epilog(&mut split).unwrap();

        let err = machine.settle(Batch::new(11.0, vec![added("R2", 11.0)])).unwrap_err();
        assert!(matches!(
            err.as_protocol(),
            Some(ProtocolError::AllocationMismatch { stage: HandoffStage::Epilog, .. })
        ));
    }

    #[test]
    fn test_immediate_epilog_forwards_completion() {
        let mut machine = HandoffMachine::new(EpilogMode::Immediate);
        let mut split = Split::new(10.0);
        split.system_a.push(completed(1, "R1", 10.0));

        machine.begin_epilog(&mut split).unwrap();
        assert_eq!(split.system_a, vec![completed(1, "R1", 10.0)]);
        assert_eq!(split.system_b.len(), 1);
        assert_eq!(machine.outstanding(), (0, 0));

        // Acknowledgment, if B sends one, is still stripped
        let settlement = machine.settle(Batch::new(11.0, vec![added("R1", 11.0)])).unwrap();
        assert!(settlement.reply.is_empty());
    }

    #[test]
    fn test_stray_internal_events_are_stripped() {
        let mut machine = HandoffMachine::new(EpilogMode::Blocking);
        let stray = Event::remove_resources(1.0, &Allocation::new("R1"));

        let intercepted = machine.intercept_prolog(Batch::new(1.0, vec![stray.clone()])).unwrap();
        assert!(intercepted.reply.is_empty());

        let settlement = machine.settle(Batch::new(1.0, vec![stray])).unwrap();
        assert!(settlement.reply.is_empty());
    }

    proptest! {
        #[test]
        fn prop_prolog_fifo_release_order(n in 1usize..12) {
            let mut machine = HandoffMachine::new(EpilogMode::Blocking);
            let allocs: Vec<String> = (0..n).map(|i| format!("a{}", i)).collect();
            let starts: Vec<Event> = allocs.iter().enumerate().map(|(i, a)| execute(i as u32, a, 2.0)).collect();

            let intercepted = machine.intercept_prolog(Batch::new(2.0, starts.clone())).unwrap();
            prop_assert_eq!(intercepted.removals.len(), n);

            let acks: Vec<Event> = allocs.iter().map(|a| removed(a, 3.0)).collect();
            let settlement = machine.settle(Batch::new(3.0, acks)).unwrap();
            let expected: Vec<Event> = starts.iter().map(|s| s.with_timestamp(3.0)).collect();
            prop_assert_eq!(settlement.released, expected);
            prop_assert_eq!(machine.outstanding(), (0, 0));
        }

        #[test]
        fn prop_out_of_order_acks_fail(n in 2usize..12, swap in 0usize..11) {
            let swap = swap % (n - 1);
            let mut machine = HandoffMachine::new(EpilogMode::Blocking);
            let allocs: Vec<String> = (0..n).map(|i| format!("a{}", i)).collect();
            let starts: Vec<Event> = allocs.iter().enumerate().map(|(i, a)| execute(i as u32, a, 2.0)).collect();
            machine.intercept_prolog(Batch::new(2.0, starts)).unwrap();

            let mut order = allocs.clone();
            order.swap(swap, swap + 1);
            let acks: Vec<Event> = order.iter().map(|a| removed(a, 3.0)).collect();
            let err = machine.settle(Batch::new(3.0, acks)).unwrap_err();
            let is_mismatch = matches!(err.as_protocol(), Some(ProtocolError::AllocationMismatch { .. }));
            prop_assert!(is_mismatch);
        }
    }
}
