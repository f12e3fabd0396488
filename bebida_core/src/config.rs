//! Broker configuration.

use crate::workload::System;

/// How a System A job completion is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpilogMode {
    /// Withhold the completion from System A until System B acknowledges the
    /// returned resources (same matching discipline as the prolog).
    #[default]
    Blocking,

    /// Legacy: send the resource addition and forward the completion at once.
    Immediate,
}

impl EpilogMode {
    pub fn name(&self) -> &'static str {
        match self {
            EpilogMode::Blocking => "blocking",
            EpilogMode::Immediate => "immediate",
        }
    }
}

impl std::fmt::Display for EpilogMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for EpilogMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocking" => Ok(EpilogMode::Blocking),
            "immediate" | "legacy" => Ok(EpilogMode::Immediate),
            _ => Err(format!("Unknown epilog mode: {} (expected blocking or immediate)", s)),
        }
    }
}

/// Configuration for a broker run.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Epilog handling (default: blocking)
    pub epilog_mode: EpilogMode,

    /// Workload files ending with this belong to System A (default: `_hpc.json`)
    pub system_a_suffix: String,

    /// Workload files ending with this belong to System B (default: `_bda.json`)
    pub system_b_suffix: String,

    /// Separates the workload id from the job number in job ids (default: `!`)
    pub job_id_separator: char,

    /// Owner of jobs whose workload was never declared, i.e. jobs submitted
    /// dynamically during the run (default: System B)
    pub dynamic_job_owner: System,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            epilog_mode: EpilogMode::default(),
            system_a_suffix: "_hpc.json".to_string(),
            system_b_suffix: "_bda.json".to_string(),
            job_id_separator: '!',
            dynamic_job_owner: System::B,
        }
    }
}

impl BrokerConfig {
    pub fn with_epilog_mode(mut self, mode: EpilogMode) -> Self {
        self.epilog_mode = mode;
        self
    }

    pub fn with_suffixes(mut self, system_a: impl Into<String>, system_b: impl Into<String>) -> Self {
        self.system_a_suffix = system_a.into();
        self.system_b_suffix = system_b.into();
        self
    }
}
