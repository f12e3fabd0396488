//! Broker scenarios for deterministic simulation runs.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// One HPC job through a full prolog and epilog
    HandoffBasic,

    /// Many HPC starts in one step, acknowledged in order
    FifoBurst,

    /// System B acknowledges removals a few steps late
    DelayedAck,

    /// Completions held back until System B has its resources again
    EpilogBlocking,

    /// Legacy epilog: completions forwarded at once
    EpilogImmediate,

    /// HPC, BDA and dynamic jobs interleaved
    MixedWorkload,

    /// System B acknowledges out of order; the broker must abort
    AckReorder,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::HandoffBasic,
            ScenarioId::FifoBurst,
            ScenarioId::DelayedAck,
            ScenarioId::EpilogBlocking,
            ScenarioId::EpilogImmediate,
            ScenarioId::MixedWorkload,
            ScenarioId::AckReorder,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::HandoffBasic => "handoff_basic",
            ScenarioId::FifoBurst => "fifo_burst",
            ScenarioId::DelayedAck => "delayed_ack",
            ScenarioId::EpilogBlocking => "epilog_blocking",
            ScenarioId::EpilogImmediate => "epilog_immediate",
            ScenarioId::MixedWorkload => "mixed_workload",
            ScenarioId::AckReorder => "ack_reorder",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::HandoffBasic => "Single HPC job: start withheld until B releases its resources",
            ScenarioId::FifoBurst => "Burst of submissions, FIFO release of every withheld start",
            ScenarioId::DelayedAck => "Removal acknowledgments two steps late, starts carried across steps",
            ScenarioId::EpilogBlocking => "Completions reach A only after B acknowledges the returned resources",
            ScenarioId::EpilogImmediate => "Completions reach A in the step they happen",
            ScenarioId::MixedWorkload => "Random HPC/BDA/dynamic mix, all invariants checked",
            ScenarioId::AckReorder => "Swapped acknowledgments must abort the run",
        }
    }

    /// Returns true if the broker is expected to abort.
    pub fn expects_abort(&self) -> bool {
        matches!(self, ScenarioId::AckReorder)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "handoff_basic" | "basic" => Ok(ScenarioId::HandoffBasic),
            "fifo_burst" | "burst" => Ok(ScenarioId::FifoBurst),
            "delayed_ack" => Ok(ScenarioId::DelayedAck),
            "epilog_blocking" => Ok(ScenarioId::EpilogBlocking),
            "epilog_immediate" => Ok(ScenarioId::EpilogImmediate),
            "mixed_workload" | "mixed" => Ok(ScenarioId::MixedWorkload),
            "ack_reorder" | "reorder" => Ok(ScenarioId::AckReorder),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
