use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::definition::JobCatalog;
use crate::error::{Result, SchedulerError};
use crate::rule::{Constraint, Rule};
use crate::scheduler::job::JobEntry;

/// Outcome of evaluating the rule set for one job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Admission {
    /// Every rule's `can_run` held.
    pub admitted: bool,
    /// Nodes not yet running the job that every rule's `can_run_on` accepts.
    /// Empty unless admitted.
    pub candidates: Vec<String>,
}

impl Admission {
    pub fn is_placeable(&self) -> bool {
        self.admitted && !self.candidates.is_empty()
    }
}

/// Authoritative record of every job and the nodes currently running it.
#[derive(Debug, Default)]
pub struct JobLedger {
    catalog: JobCatalog,
    rules: Vec<Rule>,
    entries: HashMap<String, JobEntry>,
    /// Jobs whose schedule is spent; they are never materialized afresh.
    retired: BTreeSet<String>,
}

impl JobLedger {
    pub fn new(catalog: JobCatalog) -> Self {
        let rules = catalog.rules();
        Self {
            catalog,
            rules,
            entries: HashMap::new(),
            retired: BTreeSet::new(),
        }
    }

    pub fn catalog(&self) -> &JobCatalog {
        &self.catalog
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Return the entry for `name`, materializing it from its definition on
    /// first use.
    pub fn get_or_create_entry(&mut self, name: &str) -> Result<&mut JobEntry> {
        if !self.entries.contains_key(name) {
            let job = self
                .catalog
                .get(name)
                .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
            let definition = &job.definition;
            let mut entry = JobEntry::new(
                definition.name.clone(),
                job.schedule.clone(),
                definition.tags.iter().cloned(),
            )
            .with_type(definition.job_type);
            if self.retired.contains(name) {
                entry.exhaust();
            }
            tracing::debug!(job = %name, "Ledger entry created");
            self.entries.insert(name.to_string(), entry);
        }

        self.entries
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))
    }

    pub fn entry(&self, name: &str) -> Option<&JobEntry> {
        self.entries.get(name)
    }

    /// Names of jobs that may still be scheduled, in ascending order.
    pub fn schedulable_jobs(&self) -> Vec<String> {
        self.catalog
            .names()
            .filter(|name| !self.retired.contains(*name))
            .map(str::to_string)
            .collect()
    }

    pub fn is_retired(&self, name: &str) -> bool {
        self.retired.contains(name)
    }

    /// Entries with at least one instance running.
    pub fn running_entries(&self) -> Vec<&JobEntry> {
        let mut running: Vec<&JobEntry> = self.entries.values().filter(|e| e.is_running()).collect();
        running.sort_by(|a, b| a.name().cmp(b.name()));
        running
    }

    /// Number of instances of any job running on `node`.
    pub fn load_of(&self, node: &str) -> usize {
        self.entries.values().filter(|e| e.runs_on(node)).count()
    }

    pub fn add_node(&mut self, name: &str, node: &str) -> Result<()> {
        self.get_or_create_entry(name)?.add_node(node)?;
        tracing::debug!(job = %name, node = %node, "Instance recorded");
        Ok(())
    }

    /// Remove the instance of `name` on `node`. An entry whose schedule is
    /// spent is removed together with its last instance.
    pub fn drop_node(&mut self, name: &str, node: &str) -> Result<()> {
        if self.catalog.get(name).is_none() {
            return Err(SchedulerError::UnknownJob(name.to_string()));
        }
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| SchedulerError::NodeNotRunning {
                job: name.to_string(),
                node: node.to_string(),
            })?;
        entry.drop_node(node)?;
        tracing::debug!(job = %name, node = %node, "Instance dropped");

        if !entry.is_running() && entry.is_exhausted() {
            self.remove_entry(name);
        }
        Ok(())
    }

    /// Forget `name` and stop scheduling it. Any instances still recorded go
    /// with it.
    pub fn remove_entry(&mut self, name: &str) -> Option<JobEntry> {
        let removed = self.entries.remove(name);
        if let Some(entry) = &removed {
            if entry.is_running() {
                tracing::warn!(job = %name, nodes = ?entry.nodes(), "Removing entry with running instances");
            }
            self.retired.insert(name.to_string());
            tracing::debug!(job = %name, "Ledger entry removed");
        }
        removed
    }

    /// Evaluate every rule for `name` against the running entries.
    pub fn evaluate_admission(&mut self, name: &str, nodes: &[String]) -> Result<Admission> {
        self.get_or_create_entry(name)?;
        let job = self
            .entries
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        let running = self.running_entries();

        let admitted = self.rules.iter().all(|rule| rule.can_run(job, &running));
        if !admitted {
            return Ok(Admission::default());
        }

        // One instance per node per job, whatever the rules say.
        let candidates = nodes
            .iter()
            .filter(|node| !job.runs_on(node.as_str()))
            .filter(|node| {
                self.rules
                    .iter()
                    .all(|rule| rule.can_run_on(node.as_str(), job, &running))
            })
            .cloned()
            .collect();

        Ok(Admission {
            admitted,
            candidates,
        })
    }

    /// True when the job runs and no rule that applies to it wants more
    /// instances.
    pub fn is_satisfied(&self, name: &str) -> bool {
        let Some(job) = self.entries.get(name) else {
            return false;
        };
        let running = self.running_entries();
        job.is_running()
            && self
                .rules
                .iter()
                .filter(|rule| rule.applies_to(job))
                .all(|rule| rule.satisfied(&running))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to the ledger for the leader's tasks.
///
/// The ledger can only be reached through [`SharedLedger::exclusive`], so an
/// admission decision and the mutation recording it always happen in one
/// critical section.
#[derive(Debug, Clone, Default)]
pub struct SharedLedger {
    inner: Arc<Mutex<JobLedger>>,
}

impl SharedLedger {
    pub fn new(ledger: JobLedger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Run `f` with exclusive access to the ledger.
    pub async fn exclusive<R>(&self, f: impl FnOnce(&mut JobLedger) -> R) -> R {
        let mut ledger = self.inner.lock().await;
        f(&mut ledger)
    }
}
