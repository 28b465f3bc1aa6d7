use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::schedule::{truncate_to_minute, Schedule};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Long running; kept at its desired instance count.
    Service,
    /// Runs to completion; one instance per deadline.
    #[default]
    Batch,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Service => write!(f, "service"),
            JobType::Batch => write!(f, "batch"),
        }
    }
}

/// Ledger record for one job: its schedule state and where it runs.
#[derive(Debug, Clone)]
pub struct JobEntry {
    name: String,
    schedule: Schedule,
    tags: BTreeSet<String>,
    job_type: JobType,
    nodes: Vec<String>,
    running: bool,
    next_deadline: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    exhausted: bool,
}

impl JobEntry {
    pub fn new<T: Into<String>>(
        name: impl Into<String>,
        schedule: Schedule,
        tags: impl IntoIterator<Item = T>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule,
            tags: tags.into_iter().map(Into::into).collect(),
            job_type: JobType::default(),
            nodes: Vec::new(),
            running: false,
            next_deadline: None,
            last_run: None,
            exhausted: false,
        }
    }

    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.job_type = job_type;
        self
    }

    /// Seed the entry with instances already running on `nodes`.
    pub fn with_nodes<T: Into<String>>(mut self, nodes: impl IntoIterator<Item = T>) -> Self {
        for node in nodes {
            let node = node.into();
            if !self.nodes.contains(&node) {
                self.nodes.push(node);
            }
        }
        self.running = !self.nodes.is_empty();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Nodes running an instance, in the order the instances were added.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn runs_on(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.next_deadline
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// True once the schedule will never produce another deadline.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn add_node(&mut self, node: impl Into<String>) -> Result<()> {
        let node = node.into();
        if self.runs_on(&node) {
            return Err(SchedulerError::NodeAlreadyRunning {
                job: self.name.clone(),
                node,
            });
        }
        self.nodes.push(node);
        self.running = true;
        Ok(())
    }

    pub fn drop_node(&mut self, node: &str) -> Result<()> {
        let Some(index) = self.nodes.iter().position(|n| n == node) else {
            return Err(SchedulerError::NodeNotRunning {
                job: self.name.clone(),
                node: node.to_string(),
            });
        };
        self.nodes.remove(index);
        self.running = !self.nodes.is_empty();
        Ok(())
    }

    /// Returns the pending deadline if it has come due at `now`.
    ///
    /// A deadline is computed once and kept until consumed, so a job held back
    /// by its rules stays due. A new one is computed from `now`, or from the
    /// minute after the last run when that is later. The schedule sees `now`
    /// with its seconds so a one-shot target inside a minute is honored.
    pub fn poll_deadline(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.next_deadline.is_none() && !self.exhausted {
            let reference = match self.last_run {
                Some(last) if last >= truncate_to_minute(now) => last + TimeDelta::minutes(1),
                _ => now,
            };
            match self.schedule.get_next_deadline(reference) {
                Some(deadline) => self.next_deadline = Some(deadline),
                None => self.exhausted = true,
            }
        }

        self.next_deadline.filter(|deadline| *deadline <= now)
    }

    /// Record that the pending deadline was acted upon at `now`.
    pub fn consume_deadline(&mut self, now: DateTime<Utc>) {
        self.next_deadline = None;
        self.last_run = Some(truncate_to_minute(now));
    }

    pub(crate) fn exhaust(&mut self) {
        self.schedule.exhaust();
        self.next_deadline = None;
        self.exhausted = true;
    }
}
