//! Wire vocabulary shared by the simulator, the broker and both schedulers.
//!
//! A [`Batch`] is one protocol exchange: a clock plus an ordered list of
//! [`Event`]s. Event payloads stay an open JSON map, so keys the broker does
//! not know about survive forwarding untouched.
//!
//! ```json
//! {"now": 1.0, "events": [
//!     {"timestamp": 1.0, "type": "JOB_SUBMITTED", "data": {"job_id": "w0!3"}}
//! ]}
//! ```

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kinds the broker understands.
pub mod kinds {
    pub const SIMULATION_BEGINS: &str = "SIMULATION_BEGINS";
    pub const SIMULATION_ENDS: &str = "SIMULATION_ENDS";
    pub const JOB_SUBMITTED: &str = "JOB_SUBMITTED";
    pub const JOB_KILLED: &str = "JOB_KILLED";
    pub const JOB_COMPLETED: &str = "JOB_COMPLETED";
    pub const EXECUTE_JOB: &str = "EXECUTE_JOB";

    // Broker <-> System B only
    pub const REMOVE_RESOURCES: &str = "REMOVE_RESOURCES";
    pub const RESOURCES_REMOVED: &str = "RESOURCES_REMOVED";
    pub const ADD_RESOURCES: &str = "ADD_RESOURCES";
    pub const RESOURCES_ADDED: &str = "RESOURCES_ADDED";
}

/// Open, string-keyed event payload.
pub type Payload = serde_json::Map<String, Value>;

/// Opaque resource set carried by job-start and handoff events.
///
/// Only ever compared for equality; the broker never looks inside.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation(Value);

impl Allocation {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

/// A single timestamped protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: f64,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub data: Payload,
}

impl Event {
    pub fn new(timestamp: f64, kind: impl Into<String>, data: Payload) -> Self {
        Self {
            timestamp,
            kind: kind.into(),
            data,
        }
    }

    /// Resource-removal request for System B (prolog).
    pub fn remove_resources(timestamp: f64, resources: &Allocation) -> Self {
        Self::with_resources(timestamp, kinds::REMOVE_RESOURCES, resources)
    }

    /// Resource-removal acknowledgment from System B.
    pub fn resources_removed(timestamp: f64, resources: &Allocation) -> Self {
        Self::with_resources(timestamp, kinds::RESOURCES_REMOVED, resources)
    }

    /// Resource-addition request for System B (epilog).
    pub fn add_resources(timestamp: f64, resources: &Allocation) -> Self {
        Self::with_resources(timestamp, kinds::ADD_RESOURCES, resources)
    }

    /// Resource-addition acknowledgment from System B.
    pub fn resources_added(timestamp: f64, resources: &Allocation) -> Self {
        Self::with_resources(timestamp, kinds::RESOURCES_ADDED, resources)
    }

    fn with_resources(timestamp: f64, kind: &str, resources: &Allocation) -> Self {
        let mut data = Payload::new();
        data.insert("resources".to_string(), resources.as_value().clone());
        Self::new(timestamp, kind, data)
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Simulation start/end markers, broadcast to both schedulers.
    pub fn is_lifecycle(&self) -> bool {
        self.is(kinds::SIMULATION_BEGINS) || self.is(kinds::SIMULATION_ENDS)
    }

    /// Resource-transfer events that must never reach the simulator.
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind.as_str(),
            kinds::REMOVE_RESOURCES | kinds::RESOURCES_REMOVED | kinds::ADD_RESOURCES | kinds::RESOURCES_ADDED
        )
    }

    /// Clone of this event re-stamped at `timestamp`.
    pub fn with_timestamp(&self, timestamp: f64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    fn field(&self, key: &'static str) -> Result<&Value, DecodeError> {
        self.data.get(key).ok_or_else(|| DecodeError::MissingKey {
            kind: self.kind.clone(),
            key,
        })
    }

    fn str_field(&self, key: &'static str) -> Result<&str, DecodeError> {
        self.field(key)?.as_str().ok_or_else(|| DecodeError::WrongType {
            kind: self.kind.clone(),
            key,
            expected: "a string",
        })
    }

    /// The `job_id` payload key.
    pub fn job_id(&self) -> Result<&str, DecodeError> {
        self.str_field("job_id")
    }

    /// Whether the payload names a job at all.
    pub fn has_job_identity(&self) -> bool {
        self.data.contains_key("job_id") || self.data.contains_key("job_ids")
    }

    /// Job ids of a kill event: the `job_ids` list, or a lone `job_id`.
    pub fn job_ids(&self) -> Result<Vec<&str>, DecodeError> {
        if !self.data.contains_key("job_ids") {
            return Ok(vec![self.job_id()?]);
        }

        let wrong_type = || DecodeError::WrongType {
            kind: self.kind.clone(),
            key: "job_ids",
            expected: "a non-empty list of strings",
        };

        let job_ids = self
            .field("job_ids")?
            .as_array()
            .ok_or_else(wrong_type)?
            .iter()
            .map(|id| id.as_str().ok_or_else(wrong_type))
            .collect::<Result<Vec<_>, _>>()?;

        if job_ids.is_empty() {
            return Err(wrong_type());
        }
        Ok(job_ids)
    }

    /// Allocation of a job-start or job-completion event (`alloc` key).
    pub fn allocation(&self) -> Result<Allocation, DecodeError> {
        Ok(Allocation(self.field("alloc")?.clone()))
    }

    /// Allocation carried by a resource-transfer event (`resources` key).
    pub fn resources(&self) -> Result<Allocation, DecodeError> {
        Ok(Allocation(self.field("resources")?.clone()))
    }

    /// Workload id -> file path table of a `SIMULATION_BEGINS` event.
    pub fn workloads(&self) -> Result<Vec<(&str, &str)>, DecodeError> {
        let table = self.field("workloads")?.as_object().ok_or_else(|| DecodeError::WrongType {
            kind: self.kind.clone(),
            key: "workloads",
            expected: "a map",
        })?;

        table
            .iter()
            .map(|(id, path)| {
                let path = path.as_str().ok_or_else(|| DecodeError::WrongType {
                    kind: self.kind.clone(),
                    key: "workloads",
                    expected: "a map of file paths",
                })?;
                Ok((id.as_str(), path))
            })
            .collect()
    }
}

/// One timestamped set of events exchanged in a single round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub now: f64,

    #[serde(default)]
    pub events: Vec<Event>,
}

impl Batch {
    pub fn new(now: f64, events: Vec<Event>) -> Self {
        Self { now, events }
    }

    /// Clock-only batch, used to keep an idle scheduler in sync.
    pub fn empty(now: f64) -> Self {
        Self::new(now, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Same events, clock raised to at least `floor`.
    pub fn at_least(self, floor: f64) -> Self {
        Self {
            now: self.now.max(floor),
            events: self.events,
        }
    }

    pub fn contains_kind(&self, kind: &str) -> bool {
        self.events.iter().any(|e| e.is(kind))
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_batsim_frame() {
        let frame = br#"{"now": 1.5, "events": [
            {"timestamp": 1.5, "type": "JOB_SUBMITTED",
             "data": {"job_id": "w0!3", "job": {"res": 4, "walltime": 100}}}
        ]}"#;

        let batch = Batch::decode(frame).unwrap();
        assert_eq!(batch.now, 1.5);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.events[0].kind, kinds::JOB_SUBMITTED);
        assert_eq!(batch.events[0].job_id().unwrap(), "w0!3");
    }

    #[test]
    fn test_unknown_payload_keys_survive() {
        let frame = br#"{"now":0,"events":[{"timestamp":0,"type":"NOTIFY","data":{"type":"x","nested":{"a":[1,2.5,"z"]}}}]}"#;
        let batch = Batch::decode(frame).unwrap();
        let again = Batch::decode(&batch.encode().unwrap()).unwrap();

        assert_eq!(batch, again);
        assert_eq!(again.events[0].data["nested"], json!({"a": [1, 2.5, "z"]}));
    }

    #[test]
    fn test_missing_data_is_empty_payload() {
        let batch = Batch::decode(br#"{"now":3,"events":[{"timestamp":3,"type":"SIMULATION_ENDS"}]}"#).unwrap();
        assert!(batch.events[0].data.is_empty());
        assert!(batch.events[0].is_lifecycle());
    }

    #[test]
    fn test_malformed_frame() {
        let err = Batch::decode(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_missing_job_id() {
        let event = Event::new(0.0, kinds::JOB_SUBMITTED, Payload::new());
        let err = event.job_id().unwrap_err();
        assert!(matches!(err, DecodeError::MissingKey { key: "job_id", .. }));
    }

    #[test]
    fn test_job_ids_forms() {
        let mut data = Payload::new();
        data.insert("job_ids".into(), json!(["w0!1", "w0!2"]));
        let killed = Event::new(0.0, kinds::JOB_KILLED, data);
        assert_eq!(killed.job_ids().unwrap(), vec!["w0!1", "w0!2"]);

        let mut data = Payload::new();
        data.insert("job_id".into(), json!("w1!9"));
        let single = Event::new(0.0, kinds::JOB_KILLED, data);
        assert_eq!(single.job_ids().unwrap(), vec!["w1!9"]);

        let mut data = Payload::new();
        data.insert("job_ids".into(), json!([1, 2]));
        let bad = Event::new(0.0, kinds::JOB_KILLED, data);
        assert!(matches!(bad.job_ids().unwrap_err(), DecodeError::WrongType { .. }));

        let mut data = Payload::new();
        data.insert("job_ids".into(), json!([]));
        let empty = Event::new(0.0, kinds::JOB_KILLED, data);
        assert!(matches!(empty.job_ids().unwrap_err(), DecodeError::WrongType { key: "job_ids", .. }));
    }

    #[test]
    fn test_internal_kinds() {
        let alloc = Allocation::new("0-3");
        assert!(Event::remove_resources(1.0, &alloc).is_internal());
        assert!(Event::resources_removed(1.0, &alloc).is_internal());
        assert!(Event::add_resources(1.0, &alloc).is_internal());
        assert!(Event::resources_added(1.0, &alloc).is_internal());
        assert!(!Event::new(1.0, kinds::EXECUTE_JOB, Payload::new()).is_internal());
    }

    #[test]
    fn test_resources_round_trip_allocation() {
        let alloc = Allocation::new(json!(["0-3", "8"]));
        let request = Event::remove_resources(2.0, &alloc);
        assert_eq!(request.resources().unwrap(), alloc);
        assert_eq!(Allocation::new("R1").to_string(), "R1");
    }

    #[test]
    fn test_with_timestamp_keeps_payload() {
        let mut data = Payload::new();
        data.insert("job_id".into(), json!("w0!1"));
        data.insert("alloc".into(), json!("R1"));
        let start = Event::new(2.0, kinds::EXECUTE_JOB, data);

        let released = start.with_timestamp(3.0);
        assert_eq!(released.timestamp, 3.0);
        assert_eq!(released.data, start.data);
        assert_eq!(start.timestamp, 2.0);
    }

    #[test]
    fn test_at_least_never_lowers_clock() {
        assert_eq!(Batch::empty(5.0).at_least(3.0).now, 5.0);
        assert_eq!(Batch::empty(2.0).at_least(3.0).now, 3.0);
    }
}
