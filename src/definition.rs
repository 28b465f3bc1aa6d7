//! Job definitions and the catalog compiled from them.
//!
//! Definitions are read from a JSON array. Each one is compiled on its own:
//! a malformed schedule or rule rejects that job only, the rest still load.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::rule::{Rule, RuleSpec};
use crate::schedule::{RecurrenceSpec, Schedule};
use crate::scheduler::job::JobType;

/// How a node should start the job. Carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSpec {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub run_as: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub replace_env: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(rename = "type", default)]
    pub job_type: JobType,
    #[serde(default)]
    pub execution: ExecutionSpec,
    #[serde(default)]
    pub schedule: RecurrenceSpec,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// A definition whose schedule and rules parsed successfully.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    pub definition: Arc<JobDefinition>,
    pub schedule: Schedule,
    pub rules: Vec<Rule>,
}

impl CompiledJob {
    pub fn compile(definition: JobDefinition) -> Result<Self> {
        if definition.name.trim().is_empty() {
            return Err(SchedulerError::InvalidDefinition {
                name: definition.name,
                reason: "name must not be empty".to_string(),
            });
        }

        let schedule = Schedule::from_spec(&definition.name, &definition.schedule)?;
        let mut rules = Vec::new();
        for spec in &definition.rules {
            rules.extend(spec.compile(&definition.name)?);
        }

        Ok(Self {
            definition: Arc::new(definition),
            schedule,
            rules,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Every job the scheduler knows about, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct JobCatalog {
    jobs: BTreeMap<String, CompiledJob>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `definitions`, returning the catalog of accepted jobs and the
    /// errors for the rejected ones.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = JobDefinition>,
    ) -> (Self, Vec<SchedulerError>) {
        let mut catalog = Self::new();
        let mut rejected = Vec::new();

        for definition in definitions {
            let name = definition.name.clone();
            match catalog.insert(definition) {
                Ok(()) => tracing::debug!(job = %name, "Job definition loaded"),
                Err(e) => {
                    tracing::warn!(job = %name, error = %e, "Job definition rejected");
                    rejected.push(e);
                }
            }
        }

        (catalog, rejected)
    }

    pub fn insert(&mut self, definition: JobDefinition) -> Result<()> {
        if self.jobs.contains_key(&definition.name) {
            return Err(SchedulerError::InvalidDefinition {
                name: definition.name,
                reason: "duplicate job name".to_string(),
            });
        }
        let job = CompiledJob::compile(definition)?;
        self.jobs.insert(job.name().to_string(), job);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CompiledJob> {
        self.jobs.get(name)
    }

    /// Job names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &CompiledJob> {
        self.jobs.values()
    }

    /// All rules of all jobs, in job name order, never merged.
    pub fn rules(&self) -> Vec<Rule> {
        self.jobs.values().flat_map(|job| job.rules.iter().cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Read a JSON array of job definitions from `path`. Unreadable files and
/// non-array documents fail as a whole; a malformed element only rejects
/// that job.
pub fn load_catalog(path: &Path) -> Result<(JobCatalog, Vec<SchedulerError>)> {
    let text = std::fs::read_to_string(path)?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&text)?;

    let mut definitions = Vec::with_capacity(values.len());
    let mut rejected = Vec::new();
    for value in values {
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        match serde_json::from_value::<JobDefinition>(value) {
            Ok(definition) => definitions.push(definition),
            Err(e) => {
                tracing::warn!(job = %name, error = %e, "Job definition malformed");
                rejected.push(SchedulerError::InvalidDefinition {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }

    let (catalog, mut invalid) = JobCatalog::from_definitions(definitions);
    rejected.append(&mut invalid);
    tracing::info!(
        path = %path.display(),
        loaded = catalog.len(),
        rejected = rejected.len(),
        "Job definitions loaded"
    );
    Ok((catalog, rejected))
}
