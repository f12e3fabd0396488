//! Event Router - splits a simulator batch between the two schedulers.
//!
//! ```text
//!                    ┌── System A stream ── + common ──> System A
//! simulator batch ───┼── System B stream ── + common ──> System B
//!                    └── common (SIMULATION_BEGINS / SIMULATION_ENDS)
//! ```
//!
//! The partition is stable: each stream keeps the inbound order, and every
//! job event lands in exactly one stream. Common events go after each
//! system's own events in both forwarded batches.
//!
//! Simulator events the broker does not know and that carry no job id
//! (e.g. `NOTIFY`) cannot be attributed to either scheduler, so they join
//! the common events and reach both. A job event always names at least
//! one job: an empty `job_ids` list is a decode error.

use crate::error::{BrokerError, DecodeError, ProtocolError};
use crate::message::{kinds, Batch, Event};
use crate::workload::{System, WorkloadClassifier};
use tracing::debug;

/// A simulator batch after routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// Clock of the inbound batch, copied into both forwarded batches
    pub now: f64,

    /// Events owned by System A, inbound order
    pub system_a: Vec<Event>,

    /// Events owned by System B, inbound order
    pub system_b: Vec<Event>,

    /// Lifecycle (and unroutable) events broadcast to both
    pub common: Vec<Event>,

    /// `SIMULATION_ENDS` was seen
    pub terminated: bool,
}

impl Split {
    pub fn new(now: f64) -> Self {
        Self {
            now,
            system_a: Vec::new(),
            system_b: Vec::new(),
            common: Vec::new(),
            terminated: false,
        }
    }

    fn stream_mut(&mut self, system: System) -> &mut Vec<Event> {
        match system {
            System::A => &mut self.system_a,
            System::B => &mut self.system_b,
        }
    }

    /// Batch forwarded to System A: own events, then common events.
    pub fn batch_for_a(&self) -> Batch {
        Batch::new(self.now, [&self.system_a[..], &self.common[..]].concat())
    }

    /// Batch forwarded to System B: own events, then common events.
    pub fn batch_for_b(&self) -> Batch {
        Batch::new(self.now, [&self.system_b[..], &self.common[..]].concat())
    }

    /// System A job completions, which trigger the epilog.
    pub fn completions_for_a(&self) -> impl Iterator<Item = &Event> {
        self.system_a.iter().filter(|e| e.is(kinds::JOB_COMPLETED))
    }
}

/// Routes simulator events, learning workload ownership on the way.
#[derive(Debug, Clone)]
pub struct EventRouter {
    classifier: WorkloadClassifier,
}

impl EventRouter {
    pub fn new(classifier: WorkloadClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &WorkloadClassifier {
        &self.classifier
    }

    /// Splits one simulator batch into the A stream, the B stream and the
    /// common events.
    pub fn split(&mut self, batch: &Batch) -> Result<Split, BrokerError> {
        let mut split = Split::new(batch.now);

        for event in &batch.events {
            match event.kind.as_str() {
                kinds::SIMULATION_BEGINS => {
                    self.classifier.learn(event.workloads()?)?;
                    split.common.push(event.clone());
                }
                kinds::SIMULATION_ENDS => {
                    split.terminated = true;
                    split.common.push(event.clone());
                }
                kinds::JOB_SUBMITTED | kinds::JOB_COMPLETED => {
                    let system = self.classifier.route(event.job_id()?)?;
                    split.stream_mut(system).push(event.clone());
                }
                kinds::JOB_KILLED => {
                    let system = self.route_all(event)?;
                    split.stream_mut(system).push(event.clone());
                }
                other if event.has_job_identity() => {
                    debug!("Routing {} by its job id", other);
                    let system = self.route_all(event)?;
                    split.stream_mut(system).push(event.clone());
                }
                other => {
                    debug!("Not handled simulator event {}, broadcasting", other);
                    split.common.push(event.clone());
                }
            }
        }

        Ok(split)
    }

    /// Routes an event naming several jobs; all must share one owner.
    fn route_all(&self, event: &Event) -> Result<System, BrokerError> {
        let job_ids = event.job_ids()?;
        let (first, rest) = job_ids.split_first().ok_or(DecodeError::WrongType {
            kind: event.kind.clone(),
            key: "job_ids",
            expected: "a non-empty list of strings",
        })?;

        let owner = self.classifier.route(first)?;
        for job_id in rest {
            if self.classifier.route(job_id)? != owner {
                return Err(ProtocolError::MixedKill {
                    job_ids: job_ids.iter().map(|id| id.to_string()).collect(),
                }
                .into());
            }
        }

        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::message::Payload;
    use proptest::prelude::*;
    use serde_json::json;

    fn event(kind: &str, data: serde_json::Value) -> Event {
        let data: Payload = serde_json::from_value(data).unwrap();
        Event::new(0.0, kind, data)
    }

    fn begins() -> Event {
        event(
            kinds::SIMULATION_BEGINS,
            json!({"workloads": {"w0": "x_hpc.json", "w1": "y_bda.json"}}),
        )
    }

    fn submitted(job_id: &str) -> Event {
        event(kinds::JOB_SUBMITTED, json!({ "job_id": job_id }))
    }

    fn router() -> EventRouter {
        let mut router = EventRouter::new(WorkloadClassifier::new(&BrokerConfig::default()));
        router.split(&Batch::new(0.0, vec![begins()])).unwrap();
        router
    }

    #[test]
    fn test_begins_is_broadcast_and_learned() {
        let mut router = EventRouter::new(WorkloadClassifier::new(&BrokerConfig::default()));
        let split = router.split(&Batch::new(0.0, vec![begins()])).unwrap();

        assert_eq!(split.common.len(), 1);
        assert!(split.system_a.is_empty() && split.system_b.is_empty());
        assert_eq!(split.batch_for_a().events, split.batch_for_b().events);
        assert!(router.classifier().mapping().is_some());
    }

    #[test]
    fn test_job_routing_and_clock() {
        let mut router = router();
        let batch = Batch::new(1.0, vec![submitted("w0!3")]);
        let split = router.split(&batch).unwrap();

        let to_a = split.batch_for_a();
        let to_b = split.batch_for_b();
        assert_eq!(to_a.now, 1.0);
        assert_eq!(to_b.now, 1.0);
        assert_eq!(to_a.events, vec![submitted("w0!3")]);
        assert!(to_b.is_empty());
    }

    #[test]
    fn test_own_events_precede_common() {
        let mut router = router();
        let ends = event(kinds::SIMULATION_ENDS, json!({}));
        let batch = Batch::new(5.0, vec![ends.clone(), submitted("w1!1"), submitted("w0!1")]);
        let split = router.split(&batch).unwrap();

        assert!(split.terminated);
        assert_eq!(split.batch_for_a().events, vec![submitted("w0!1"), ends.clone()]);
        assert_eq!(split.batch_for_b().events, vec![submitted("w1!1"), ends]);
    }

    #[test]
    fn test_completion_for_a_is_epilog_candidate() {
        let mut router = router();
        let completed = event(kinds::JOB_COMPLETED, json!({"job_id": "w0!1", "alloc": "0-3"}));
        let split = router.split(&Batch::new(4.0, vec![completed.clone()])).unwrap();

        assert_eq!(split.completions_for_a().collect::<Vec<_>>(), vec![&completed]);
    }

    #[test]
    fn test_kill_routing() {
        let mut router = router();
        let kill = event(kinds::JOB_KILLED, json!({"job_ids": ["w1!1", "w1!2"]}));
        let split = router.split(&Batch::new(2.0, vec![kill.clone()])).unwrap();
        assert_eq!(split.system_b, vec![kill]);

        let mixed = event(kinds::JOB_KILLED, json!({"job_ids": ["w0!1", "w1!2"]}));
        let err = router.split(&Batch::new(2.0, vec![mixed])).unwrap_err();
        assert!(matches!(err.as_protocol(), Some(ProtocolError::MixedKill { .. })));
    }

    #[test]
    fn test_job_before_begins_is_fatal() {
        let mut router = EventRouter::new(WorkloadClassifier::new(&BrokerConfig::default()));
        let err = router.split(&Batch::new(0.0, vec![submitted("w0!1")])).unwrap_err();
        assert!(matches!(err.as_protocol(), Some(ProtocolError::MappingNotLearned { .. })));
    }

    #[test]
    fn test_missing_job_id_is_decode_error() {
        let mut router = router();
        let err = router
            .split(&Batch::new(1.0, vec![event(kinds::JOB_SUBMITTED, json!({}))]))
            .unwrap_err();
        assert!(matches!(err, BrokerError::Decode(_)));
    }

    #[test]
    fn test_empty_kill_list_is_decode_error() {
        let mut router = router();
        let kill = event(kinds::JOB_KILLED, json!({"job_ids": []}));
        let err = router.split(&Batch::new(1.0, vec![kill])).unwrap_err();
        assert!(matches!(err, BrokerError::Decode(DecodeError::WrongType { key: "job_ids", .. })));
    }

    #[test]
    fn test_unknown_event_without_job_is_broadcast() {
        let mut router = router();
        let notify = event("NOTIFY", json!({"type": "no_more_static_job_to_submit"}));
        let split = router.split(&Batch::new(1.0, vec![notify.clone()])).unwrap();
        assert_eq!(split.common, vec![notify]);
    }

    proptest! {
        #[test]
        fn prop_partition_is_complete_and_stable(owners in proptest::collection::vec(any::<bool>(), 0..40)) {
            let mut router = router();
            let events: Vec<Event> = owners
                .iter()
                .enumerate()
                .map(|(i, to_a)| submitted(&format!("{}!{}", if *to_a { "w0" } else { "w1" }, i)))
                .collect();

            let split = router.split(&Batch::new(1.0, events.clone())).unwrap();

            prop_assert_eq!(split.system_a.len() + split.system_b.len(), events.len());
            let expected_a: Vec<Event> = events.iter().zip(&owners).filter(|(_, a)| **a).map(|(e, _)| e.clone()).collect();
            let expected_b: Vec<Event> = events.iter().zip(&owners).filter(|(_, a)| !**a).map(|(e, _)| e.clone()).collect();
            prop_assert_eq!(split.system_a, expected_a);
            prop_assert_eq!(split.system_b, expected_b);
        }
    }
}
