//! Workload Classifier - decides which scheduler owns a job.
//!
//! Ownership is learned once, from the workload table of the
//! `SIMULATION_BEGINS` event: a workload whose file ends with the System A
//! suffix (`*_hpc.json`) belongs to A, one ending with the System B suffix
//! (`*_bda.json`) to B. Job ids embed their workload as a prefix
//! (`w0!42` belongs to workload `w0`).

use crate::config::BrokerConfig;
use crate::error::ProtocolError;
use std::collections::BTreeSet;
use tracing::info;

/// A downstream scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum System {
    A,
    B,
}

impl std::fmt::Display for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            System::A => f.write_str("system A"),
            System::B => f.write_str("system B"),
        }
    }
}

/// Result of classifying a job or workload id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    SystemA,
    SystemB,
    /// Declared in the workload table but matching neither suffix
    Unknown,
}

impl From<System> for Owner {
    fn from(system: System) -> Self {
        match system {
            System::A => Owner::SystemA,
            System::B => Owner::SystemB,
        }
    }
}

/// Workload ownership learned at simulation start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadMapping {
    system_a: BTreeSet<String>,
    system_b: BTreeSet<String>,
    unowned: BTreeSet<String>,
}

impl WorkloadMapping {
    /// Builds the mapping from `(workload id, file path)` declarations.
    pub fn from_declarations<'a>(
        declarations: impl IntoIterator<Item = (&'a str, &'a str)>,
        system_a_suffix: &str,
        system_b_suffix: &str,
    ) -> Self {
        let mut mapping = Self::default();

        for (id, path) in declarations {
            let set = if path.ends_with(system_a_suffix) {
                &mut mapping.system_a
            } else if path.ends_with(system_b_suffix) {
                &mut mapping.system_b
            } else {
                &mut mapping.unowned
            };
            set.insert(id.to_string());
        }

        mapping
    }

    pub fn system_a(&self) -> impl Iterator<Item = &str> {
        self.system_a.iter().map(String::as_str)
    }

    pub fn system_b(&self) -> impl Iterator<Item = &str> {
        self.system_b.iter().map(String::as_str)
    }

    /// Owner of a declared workload, `None` if it was never declared.
    pub fn owner_of(&self, workload: &str) -> Option<Owner> {
        if self.system_a.contains(workload) {
            Some(Owner::SystemA)
        } else if self.system_b.contains(workload) {
            Some(Owner::SystemB)
        } else if self.unowned.contains(workload) {
            Some(Owner::Unknown)
        } else {
            None
        }
    }
}

/// Maps job ids to their owning scheduler.
#[derive(Debug, Clone)]
pub struct WorkloadClassifier {
    mapping: Option<WorkloadMapping>,
    system_a_suffix: String,
    system_b_suffix: String,
    separator: char,
    dynamic_owner: System,
}

impl WorkloadClassifier {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            mapping: None,
            system_a_suffix: config.system_a_suffix.clone(),
            system_b_suffix: config.system_b_suffix.clone(),
            separator: config.job_id_separator,
            dynamic_owner: config.dynamic_job_owner,
        }
    }

    pub fn mapping(&self) -> Option<&WorkloadMapping> {
        self.mapping.as_ref()
    }

    /// Learns the mapping from a workload declaration table.
    ///
    /// Idempotent: learning the same table again is a no-op, a different
    /// table is a [`ProtocolError::MappingConflict`].
    pub fn learn<'a>(
        &mut self,
        declarations: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<&WorkloadMapping, ProtocolError> {
        let learned =
            WorkloadMapping::from_declarations(declarations, &self.system_a_suffix, &self.system_b_suffix);

        match &self.mapping {
            Some(existing) if *existing != learned => return Err(ProtocolError::MappingConflict),
            Some(_) => {}
            None => info!(
                "Workloads learned: A={:?} B={:?}",
                learned.system_a().collect::<Vec<_>>(),
                learned.system_b().collect::<Vec<_>>()
            ),
        }

        Ok(self.mapping.get_or_insert(learned))
    }

    /// Workload part of a job id (the whole id when it has no separator).
    pub fn workload_of<'a>(&self, job_id: &'a str) -> &'a str {
        job_id.split(self.separator).next().unwrap_or(job_id)
    }

    /// Classifies a job (or bare workload) id.
    ///
    /// Ids whose workload was never declared are dynamic submissions and go
    /// to the configured dynamic owner.
    pub fn classify(&self, id: &str) -> Result<Owner, ProtocolError> {
        let mapping = self.mapping.as_ref().ok_or_else(|| ProtocolError::MappingNotLearned {
            job_id: id.to_string(),
        })?;

        Ok(mapping
            .owner_of(self.workload_of(id))
            .unwrap_or(Owner::from(self.dynamic_owner)))
    }

    /// Classifies and rejects anything neither scheduler owns.
    pub fn route(&self, id: &str) -> Result<System, ProtocolError> {
        match self.classify(id)? {
            Owner::SystemA => Ok(System::A),
            Owner::SystemB => Ok(System::B),
            Owner::Unknown => Err(ProtocolError::UnknownWorkload {
                workload: self.workload_of(id).to_string(),
                job_id: id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn learned() -> WorkloadClassifier {
        let mut classifier = WorkloadClassifier::new(&BrokerConfig::default());
        classifier
            .learn([("w0", "x_hpc.json"), ("w1", "y_bda.json"), ("w2", "z.json")])
            .unwrap();
        classifier
    }

    #[test]
    fn test_classify_by_prefix() {
        let classifier = learned();
        assert_eq!(classifier.classify("w0!3").unwrap(), Owner::SystemA);
        assert_eq!(classifier.classify("w1!3").unwrap(), Owner::SystemB);
        assert_eq!(classifier.classify("w0").unwrap(), Owner::SystemA);
    }

    #[test]
    fn test_declared_but_unowned_is_unknown() {
        let classifier = learned();
        assert_eq!(classifier.classify("w2!1").unwrap(), Owner::Unknown);
        assert_eq!(
            classifier.route("w2!1").unwrap_err(),
            ProtocolError::UnknownWorkload {
                workload: "w2".into(),
                job_id: "w2!1".into()
            }
        );
    }

    #[test]
    fn test_dynamic_jobs_go_to_system_b() {
        let classifier = learned();
        assert_eq!(classifier.classify("dyn!7").unwrap(), Owner::SystemB);
        assert_eq!(classifier.route("dyn!7").unwrap(), System::B);
    }

    #[test]
    fn test_classify_before_learning_fails() {
        let classifier = WorkloadClassifier::new(&BrokerConfig::default());
        assert!(matches!(
            classifier.classify("w0!1"),
            Err(ProtocolError::MappingNotLearned { .. })
        ));
    }

    #[test]
    fn test_relearning_same_table_is_noop() {
        let mut classifier = learned();
        classifier
            .learn([("w2", "z.json"), ("w1", "y_bda.json"), ("w0", "x_hpc.json")])
            .unwrap();
        assert_eq!(classifier.route("w0!1").unwrap(), System::A);
    }

    #[test]
    fn test_relearning_different_table_conflicts() {
        let mut classifier = learned();
        let err = classifier.learn([("w0", "x_bda.json"), ("w1", "y_hpc.json")]).unwrap_err();
        assert_eq!(err, ProtocolError::MappingConflict);
        // The original mapping is still in force
        assert_eq!(classifier.route("w0!1").unwrap(), System::A);
    }

    #[test]
    fn test_custom_separator_and_suffix() {
        let mut config = BrokerConfig::default().with_suffixes(".hpc", ".bda");
        config.job_id_separator = ':';
        let mut classifier = WorkloadClassifier::new(&config);
        classifier.learn([("hpc", "jobs.hpc"), ("bda", "jobs.bda")]).unwrap();

        assert_eq!(classifier.route("hpc:1").unwrap(), System::A);
        assert_eq!(classifier.route("bda:1").unwrap(), System::B);
    }

    proptest! {
        #[test]
        fn prop_classification_is_stable(job in 0u32..10_000, repeats in 1usize..20) {
            let classifier = learned();
            let id = format!("w0!{}", job);
            let first = classifier.classify(&id).unwrap();
            for _ in 0..repeats {
                prop_assert_eq!(classifier.classify(&id).unwrap(), first);
            }
            prop_assert_eq!(first, Owner::SystemA);
        }

        #[test]
        fn prop_undeclared_prefixes_are_dynamic(prefix in "[a-v][a-z0-9]{0,6}", job in 0u32..1000) {
            let classifier = learned();
            let id = format!("{}!{}", prefix, job);
            prop_assume!(!["w0", "w1", "w2"].contains(&prefix.as_str()));
            prop_assert_eq!(classifier.route(&id).unwrap(), System::B);
        }
    }
}
